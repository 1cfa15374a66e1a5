//! Token introspection: who may ask, and what they get back.
//!
//! A client may introspect a token it owns, or any token whose entire
//! scope it holds itself. The response renders either the UMA
//! permission list or a flat scope string, never both.

use crate::models::{AccessToken, AuthenticationHolder, ClientDetails, Permission, RefreshToken};
use crate::scope::{join_scope_param, ScopeCatalog};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use utoipa::ToSchema;

/// RFC 7662 style introspection result.
#[derive(Debug, Serialize, ToSchema)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<Permission>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl IntrospectionResponse {
    /// The non-revealing answer for unknown, expired or off-limits tokens.
    pub fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            permissions: None,
            sub: None,
            client_id: None,
            token_type: None,
            exp: None,
            expires_at: None,
            iat: None,
        }
    }
}

#[derive(Clone)]
pub struct IntrospectionService {
    scopes: Arc<ScopeCatalog>,
}

impl IntrospectionService {
    pub fn new(scopes: Arc<ScopeCatalog>) -> Self {
        Self { scopes }
    }

    /// The caller must own the token or hold every scope it carries.
    pub fn is_introspection_permitted(
        &self,
        auth_client: &ClientDetails,
        token_client_id: &str,
        token_scope: &HashSet<String>,
    ) -> bool {
        auth_client.client_id == token_client_id
            || self.scopes.scopes_match(&auth_client.scope, token_scope)
    }

    pub fn assemble_access_token(
        &self,
        token: &AccessToken,
        holder: &AuthenticationHolder,
        authorized_scope: &HashSet<String>,
    ) -> IntrospectionResponse {
        let mut response = IntrospectionResponse::inactive();
        response.active = true;
        response.sub = Some(holder.principal.username.clone());
        response.client_id = Some(token.client_id.clone());
        response.token_type = Some("Bearer".to_string());
        response.iat = Some(token.issued_at.timestamp());
        if let Some(exp) = token.expiration {
            response.exp = Some(exp.timestamp());
            response.expires_at = Some(exp.to_rfc3339());
        }

        if token.permissions.is_empty() {
            response.scope = Some(join_scope_param(
                &self.covered_scope(&token.scope, authorized_scope),
            ));
        } else {
            response.permissions = Some(token.permissions.clone());
        }
        response
    }

    pub fn assemble_refresh_token(
        &self,
        token: &RefreshToken,
        holder: &AuthenticationHolder,
        authorized_scope: &HashSet<String>,
    ) -> IntrospectionResponse {
        let mut response = IntrospectionResponse::inactive();
        response.active = true;
        response.sub = Some(holder.principal.username.clone());
        response.client_id = Some(token.client_id.clone());
        response.iat = Some(token.issued_at.timestamp());
        if let Some(exp) = token.expiration {
            response.exp = Some(exp.timestamp());
            response.expires_at = Some(exp.to_rfc3339());
        }
        response.scope = Some(join_scope_param(
            &self.covered_scope(&holder.scope, authorized_scope),
        ));
        response
    }

    /// The part of `scope` the caller is itself authorized to see.
    fn covered_scope(
        &self,
        scope: &HashSet<String>,
        authorized_scope: &HashSet<String>,
    ) -> HashSet<String> {
        scope
            .iter()
            .filter(|s| {
                let single: HashSet<String> = std::iter::once((*s).clone()).collect();
                self.scopes.scopes_match(authorized_scope, &single)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Principal;
    use chrono::{Duration, Utc};

    fn service() -> IntrospectionService {
        IntrospectionService::new(Arc::new(ScopeCatalog::new()))
    }

    fn scopes(values: &[&str]) -> HashSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn client_with_scope(id: &str, scope: &[&str]) -> ClientDetails {
        let mut client = ClientDetails::new(id);
        client.scope = scopes(scope);
        client
    }

    fn token_with(scope: &[&str], permissions: Vec<Permission>) -> AccessToken {
        AccessToken {
            value: "token-value".to_string(),
            id: "token-id".to_string(),
            client_id: "owner".to_string(),
            auth_holder_id: "holder-id".to_string(),
            scope: scopes(scope),
            expiration: Some(Utc::now() + Duration::hours(1)),
            issued_at: Utc::now(),
            refresh_token_id: None,
            approved_site: None,
            permissions,
        }
    }

    fn holder() -> AuthenticationHolder {
        AuthenticationHolder::new(Principal::new("alice"), "owner", scopes(&["openid"]))
    }

    #[test]
    fn test_owner_may_always_introspect() {
        let service = service();
        let owner = client_with_scope("owner", &[]);
        assert!(service.is_introspection_permitted(&owner, "owner", &scopes(&["secret"])));
    }

    #[test]
    fn test_covering_scope_grants_introspection() {
        let service = service();
        let rs = client_with_scope("resource-server", &["resource"]);
        assert!(service.is_introspection_permitted(&rs, "owner", &scopes(&["resource:42"])));
    }

    #[test]
    fn test_uncovered_scope_denies_introspection() {
        let service = service();
        let other = client_with_scope("other", &["different"]);
        assert!(!service.is_introspection_permitted(&other, "owner", &scopes(&["resource:42"])));
    }

    #[test]
    fn test_flat_scope_is_restricted_to_the_caller() {
        let service = service();
        let token = token_with(&["openid", "profile", "resource:42"], Vec::new());
        let response =
            service.assemble_access_token(&token, &holder(), &scopes(&["openid", "resource"]));

        assert!(response.active);
        assert_eq!(response.scope.as_deref(), Some("openid resource:42"));
        assert!(response.permissions.is_none());
        assert_eq!(response.sub.as_deref(), Some("alice"));
        assert_eq!(response.client_id.as_deref(), Some("owner"));
        assert_eq!(response.token_type.as_deref(), Some("Bearer"));
        assert!(response.exp.is_some());
        assert!(response.expires_at.is_some());
    }

    #[test]
    fn test_rpt_renders_permissions_instead_of_scope() {
        let service = service();
        let permission = Permission {
            resource_set_id: "rs-1".to_string(),
            scopes: scopes(&["read"]),
        };
        let token = token_with(&["read"], vec![permission.clone()]);
        let response = service.assemble_access_token(&token, &holder(), &scopes(&["read"]));

        assert_eq!(response.permissions, Some(vec![permission]));
        assert!(response.scope.is_none());
    }

    #[test]
    fn test_token_without_expiry_has_no_exp() {
        let service = service();
        let mut token = token_with(&["openid"], Vec::new());
        token.expiration = None;
        let response = service.assemble_access_token(&token, &holder(), &scopes(&["openid"]));
        assert!(response.exp.is_none());
        assert!(response.expires_at.is_none());
    }

    #[test]
    fn test_refresh_token_renders_holder_scope() {
        let service = service();
        let refresh = RefreshToken {
            value: "refresh-value".to_string(),
            id: "refresh-id".to_string(),
            client_id: "owner".to_string(),
            auth_holder_id: "holder-id".to_string(),
            expiration: None,
            issued_at: Utc::now(),
        };
        let response = service.assemble_refresh_token(&refresh, &holder(), &scopes(&["openid"]));
        assert!(response.active);
        assert_eq!(response.scope.as_deref(), Some("openid"));
        assert_eq!(response.client_id.as_deref(), Some("owner"));
        assert!(response.token_type.is_none());
    }

    #[test]
    fn test_inactive_response_serializes_minimal() {
        let response = IntrospectionResponse::inactive();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, serde_json::json!({"active": false}));
    }
}
