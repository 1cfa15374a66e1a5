use crate::api::{bearer_authentication, protection_api_authentication};
use crate::errors::AuthError;
use crate::models::{Claim, ResourceSet};
use crate::openapi::UMA_TAG;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use utoipa::ToSchema;

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/uma/resource_set",
            post(create_resource_set_handler).get(list_resource_sets_handler),
        )
        .route(
            "/uma/resource_set/{id}",
            get(get_resource_set_handler)
                .put(update_resource_set_handler)
                .delete(delete_resource_set_handler),
        )
        .route("/uma/permission", post(register_permission_handler))
        .route("/uma/authorize", post(authorize_handler))
        .route("/uma/claims", post(supply_claims_handler))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(crate) struct PermissionRequest {
    pub resource_set_id: String,
    #[serde(default)]
    pub scopes: HashSet<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(crate) struct TicketResponse {
    pub ticket: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(crate) struct AuthorizationRequest {
    pub ticket: String,
    /// A previously issued RPT to upgrade, if the party holds one
    pub rpt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(crate) struct RptResponse {
    pub rpt: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(crate) struct ClaimsRequest {
    pub ticket: String,
    #[serde(default)]
    pub claims: Vec<Claim>,
}

#[utoipa::path(
    post,
    path = "/uma/resource_set",
    tag = UMA_TAG,
    request_body = ResourceSet,
    responses(
        (status = 201, description = "Resource set registered", body = ResourceSet),
        (status = 401, description = "A bearer access token is required"),
        (status = 403, description = "The uma_protection scope is required")
    )
)]
pub(crate) async fn create_resource_set_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(resource_set): Json<ResourceSet>,
) -> Response {
    let (token, holder) = match protection_api_authentication(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    match state
        .uma
        .create_resource_set(resource_set, &holder.principal, &token.client_id)
        .await
    {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/uma/resource_set",
    tag = UMA_TAG,
    responses(
        (status = 200, description = "Resource sets owned by the caller", body = Vec<ResourceSet>),
        (status = 401, description = "A bearer access token is required")
    )
)]
pub(crate) async fn list_resource_sets_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let (_, holder) = match protection_api_authentication(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    match state
        .uma
        .resource_sets_for_owner(&holder.principal.username)
        .await
    {
        Ok(sets) => (StatusCode::OK, Json(sets)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/uma/resource_set/{id}",
    tag = UMA_TAG,
    params(("id" = String, Path, description = "Resource set id")),
    responses(
        (status = 200, description = "Resource set", body = ResourceSet),
        (status = 403, description = "Caller does not own the resource set"),
        (status = 404, description = "Resource set does not exist")
    )
)]
pub(crate) async fn get_resource_set_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    match read_resource_set(&state, &headers, &id).await {
        Ok(found) => (StatusCode::OK, Json(found)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn read_resource_set(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
) -> Result<ResourceSet, AuthError> {
    let (_, holder) = protection_api_authentication(state, headers).await?;
    let found = state.uma.get_resource_set(id).await?;
    if found.owner != holder.principal.username {
        return Err(AuthError::not_authorized(
            "Only the resource owner may read a resource set",
        ));
    }
    Ok(found)
}

#[utoipa::path(
    put,
    path = "/uma/resource_set/{id}",
    tag = UMA_TAG,
    params(("id" = String, Path, description = "Resource set id")),
    request_body = ResourceSet,
    responses(
        (status = 200, description = "Resource set replaced", body = ResourceSet),
        (status = 403, description = "Caller does not own the resource set"),
        (status = 404, description = "Resource set does not exist")
    )
)]
pub(crate) async fn update_resource_set_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(resource_set): Json<ResourceSet>,
) -> Response {
    let (_, holder) = match protection_api_authentication(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    match state
        .uma
        .update_resource_set(&id, resource_set, &holder.principal)
        .await
    {
        Ok(updated) => (StatusCode::OK, Json(updated)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/uma/resource_set/{id}",
    tag = UMA_TAG,
    params(("id" = String, Path, description = "Resource set id")),
    responses(
        (status = 204, description = "Resource set deleted"),
        (status = 403, description = "Caller does not own the resource set"),
        (status = 404, description = "Resource set does not exist")
    )
)]
pub(crate) async fn delete_resource_set_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let (_, holder) = match protection_api_authentication(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    match state.uma.delete_resource_set(&id, &holder.principal).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Register a permission request on behalf of the resource owner,
/// yielding the ticket handed to the requesting party.
#[utoipa::path(
    post,
    path = "/uma/permission",
    tag = UMA_TAG,
    request_body = PermissionRequest,
    responses(
        (status = 200, description = "Permission ticket issued", body = TicketResponse),
        (status = 400, description = "Requested scopes are not registered on the resource set"),
        (status = 403, description = "The uma_protection scope is required")
    )
)]
pub(crate) async fn register_permission_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PermissionRequest>,
) -> Response {
    let (_, holder) = match protection_api_authentication(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    match state
        .uma
        .register_permission(&request.resource_set_id, request.scopes, &holder.principal)
        .await
    {
        Ok(ticket) => (
            StatusCode::OK,
            Json(TicketResponse {
                ticket: ticket.ticket,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Decide a pending ticket. Satisfied policies answer with a fresh RPT;
/// unsatisfied ones answer `need_info` naming the claims still missing,
/// and the ticket stays valid for the next round.
#[utoipa::path(
    post,
    path = "/uma/authorize",
    tag = UMA_TAG,
    request_body = AuthorizationRequest,
    responses(
        (status = 200, description = "Requesting-party token issued", body = RptResponse),
        (status = 400, description = "Permission ticket is invalid or expired"),
        (status = 403, description = "Authorization denied or further claims required")
    )
)]
pub(crate) async fn authorize_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AuthorizationRequest>,
) -> Response {
    let (_, holder) = match bearer_authentication(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    match state
        .uma
        .authorize(&request.ticket, request.rpt.as_deref(), &holder)
        .await
    {
        Ok(rpt) => (StatusCode::OK, Json(RptResponse { rpt: rpt.value })).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Attach claims gathered by the interactive layer to a pending ticket.
#[utoipa::path(
    post,
    path = "/uma/claims",
    tag = UMA_TAG,
    request_body = ClaimsRequest,
    responses(
        (status = 200, description = "Claims recorded", body = TicketResponse),
        (status = 400, description = "Permission ticket is invalid or expired"),
        (status = 401, description = "A bearer access token is required")
    )
)]
pub(crate) async fn supply_claims_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ClaimsRequest>,
) -> Response {
    if let Err(err) = bearer_authentication(&state, &headers).await {
        return err.into_response();
    }
    match state.uma.supply_claims(&request.ticket, request.claims).await {
        Ok(ticket) => (
            StatusCode::OK,
            Json(TicketResponse {
                ticket: ticket.ticket,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AuthenticationHolder, ClientDetails, Policy, Principal, SCOPE_UMA_PROTECTION,
    };
    use crate::test_utils::TestFixture;
    use serde_json::json;

    fn scopes(values: &[&str]) -> HashSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    async fn pat(fixture: &TestFixture, username: &str) -> String {
        let mut client = ClientDetails::new("resource-server");
        client.scope = scopes(&["read", "write", SCOPE_UMA_PROTECTION]);
        fixture.seed_client(client);
        let holder = AuthenticationHolder::new(
            Principal::new(username),
            "resource-server",
            scopes(&[SCOPE_UMA_PROTECTION]),
        );
        fixture
            .state
            .tokens
            .create_access_token(&holder, None)
            .await
            .unwrap()
            .access_token
            .value
    }

    async fn party_token(fixture: &TestFixture, username: &str) -> String {
        let mut client = ClientDetails::new("party-app");
        client.scope = scopes(&["read", "write"]);
        fixture.seed_client(client);
        let holder =
            AuthenticationHolder::new(Principal::new(username), "party-app", scopes(&["read"]));
        fixture
            .state
            .tokens
            .create_access_token(&holder, None)
            .await
            .unwrap()
            .access_token
            .value
    }

    fn photo_album(policies: Vec<Policy>) -> serde_json::Value {
        json!({
            "owner": "",
            "name": "Photo album",
            "scopes": ["read", "write"],
            "policies": policies,
        })
    }

    fn open_policy() -> Policy {
        Policy {
            name: "anyone".to_string(),
            scopes: scopes(&["read"]),
            claims_required: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_resource_set_round_trip() {
        let fixture = TestFixture::new().await;
        let pat = pat(&fixture, "alice").await;

        let created = fixture
            .post_json_as("/uma/resource_set", &pat, &photo_album(vec![]))
            .await;
        created.assert_status(StatusCode::CREATED);
        assert_eq!(created.json["owner"], "alice");
        let id = created.json["id"].as_str().unwrap().to_string();

        let fetched = fixture
            .get_as(&format!("/uma/resource_set/{}", id), &pat)
            .await;
        fetched.assert_ok();
        assert_eq!(fetched.json["name"], "Photo album");

        let listed = fixture.get_as("/uma/resource_set", &pat).await;
        listed.assert_ok();
        assert_eq!(listed.json.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resource_set_requires_protection_scope() {
        let fixture = TestFixture::new().await;
        let plain = party_token(&fixture, "alice").await;

        let response = fixture
            .post_json_as("/uma/resource_set", &plain, &photo_album(vec![]))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_foreign_owner_cannot_read_or_delete() {
        let fixture = TestFixture::new().await;
        let alice = pat(&fixture, "alice").await;
        let created = fixture
            .post_json_as("/uma/resource_set", &alice, &photo_album(vec![]))
            .await;
        let id = created.json["id"].as_str().unwrap().to_string();

        let eve_holder = AuthenticationHolder::new(
            Principal::new("eve"),
            "resource-server",
            scopes(&[SCOPE_UMA_PROTECTION]),
        );
        let eve = fixture
            .state
            .tokens
            .create_access_token(&eve_holder, None)
            .await
            .unwrap()
            .access_token
            .value;

        fixture
            .get_as(&format!("/uma/resource_set/{}", id), &eve)
            .await
            .assert_status(StatusCode::FORBIDDEN);
        fixture
            .delete_as(&format!("/uma/resource_set/{}", id), &eve)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_update_resource_set_replaces_the_record() {
        let fixture = TestFixture::new().await;
        let pat = pat(&fixture, "alice").await;
        let created = fixture
            .post_json_as("/uma/resource_set", &pat, &photo_album(vec![]))
            .await;
        let id = created.json["id"].as_str().unwrap().to_string();

        let mut replacement = photo_album(vec![open_policy()]);
        replacement["name"] = json!("Family album");
        let response = fixture
            .put_json_as(&format!("/uma/resource_set/{}", id), &pat, &replacement)
            .await;
        response.assert_ok();
        assert_eq!(response.json["name"], "Family album");
        assert_eq!(response.json["policies"].as_array().unwrap().len(), 1);

        let fetched = fixture
            .get_as(&format!("/uma/resource_set/{}", id), &pat)
            .await;
        assert_eq!(fetched.json["name"], "Family album");
    }

    #[tokio::test]
    async fn test_delete_resource_set() {
        let fixture = TestFixture::new().await;
        let pat = pat(&fixture, "alice").await;
        let created = fixture
            .post_json_as("/uma/resource_set", &pat, &photo_album(vec![]))
            .await;
        let id = created.json["id"].as_str().unwrap().to_string();

        fixture
            .delete_as(&format!("/uma/resource_set/{}", id), &pat)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        fixture
            .get_as(&format!("/uma/resource_set/{}", id), &pat)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_permission_ticket_issuance() {
        let fixture = TestFixture::new().await;
        let pat = pat(&fixture, "alice").await;
        let created = fixture
            .post_json_as("/uma/resource_set", &pat, &photo_album(vec![]))
            .await;
        let id = created.json["id"].as_str().unwrap().to_string();

        let response = fixture
            .post_json_as(
                "/uma/permission",
                &pat,
                &json!({ "resource_set_id": id, "scopes": ["read"] }),
            )
            .await;
        response.assert_ok();
        assert!(!response.json["ticket"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_permission_rejects_unregistered_scopes() {
        let fixture = TestFixture::new().await;
        let pat = pat(&fixture, "alice").await;
        let created = fixture
            .post_json_as("/uma/resource_set", &pat, &photo_album(vec![]))
            .await;
        let id = created.json["id"].as_str().unwrap().to_string();

        let response = fixture
            .post_json_as(
                "/uma/permission",
                &pat,
                &json!({ "resource_set_id": id, "scopes": ["admin"] }),
            )
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json["error"], "invalid_scope");
    }

    #[tokio::test]
    async fn test_authorize_mints_rpt_for_satisfied_policy() {
        let fixture = TestFixture::new().await;
        let pat = pat(&fixture, "alice").await;
        let created = fixture
            .post_json_as("/uma/resource_set", &pat, &photo_album(vec![open_policy()]))
            .await;
        let id = created.json["id"].as_str().unwrap().to_string();
        let ticket = fixture
            .post_json_as(
                "/uma/permission",
                &pat,
                &json!({ "resource_set_id": id, "scopes": ["read"] }),
            )
            .await
            .json["ticket"]
            .as_str()
            .unwrap()
            .to_string();

        let bob = party_token(&fixture, "bob").await;
        let response = fixture
            .post_json_as("/uma/authorize", &bob, &json!({ "ticket": ticket }))
            .await;
        response.assert_ok();
        let rpt = response.json["rpt"].as_str().unwrap();
        assert!(!rpt.is_empty());

        let minted = fixture
            .state
            .tokens
            .get_access_token(rpt)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(minted.permissions.len(), 1);
    }

    #[tokio::test]
    async fn test_authorize_answers_need_info_and_claims_unlock() {
        let fixture = TestFixture::new().await;
        let pat = pat(&fixture, "alice").await;
        let gated = Policy {
            name: "verified-email".to_string(),
            scopes: scopes(&["read"]),
            claims_required: vec![Claim::new(
                "email",
                json!("bob@example.com"),
                "https://idp.example.com",
            )],
        };
        let created = fixture
            .post_json_as("/uma/resource_set", &pat, &photo_album(vec![gated]))
            .await;
        let id = created.json["id"].as_str().unwrap().to_string();
        let ticket = fixture
            .post_json_as(
                "/uma/permission",
                &pat,
                &json!({ "resource_set_id": id, "scopes": ["read"] }),
            )
            .await
            .json["ticket"]
            .as_str()
            .unwrap()
            .to_string();

        let bob = party_token(&fixture, "bob").await;
        let denied = fixture
            .post_json_as("/uma/authorize", &bob, &json!({ "ticket": ticket }))
            .await;
        denied.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(denied.json["error"], "need_info");
        assert_eq!(denied.json["required_claims"][0]["name"], "email");

        let supplied = fixture
            .post_json_as(
                "/uma/claims",
                &bob,
                &json!({
                    "ticket": ticket,
                    "claims": [{
                        "name": "email",
                        "issuer": ["https://idp.example.com"],
                        "value": "bob@example.com",
                    }],
                }),
            )
            .await;
        supplied.assert_ok();

        let granted = fixture
            .post_json_as("/uma/authorize", &bob, &json!({ "ticket": ticket }))
            .await;
        granted.assert_ok();
        assert!(!granted.json["rpt"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_authorize_rejects_unknown_ticket() {
        let fixture = TestFixture::new().await;
        let bob = party_token(&fixture, "bob").await;

        let response = fixture
            .post_json_as("/uma/authorize", &bob, &json!({ "ticket": "no-such" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn test_uma_endpoints_require_bearer() {
        let fixture = TestFixture::new().await;
        fixture
            .post_json("/uma/authorize", &json!({ "ticket": "x" }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        fixture
            .post_json("/uma/permission", &json!({ "resource_set_id": "x" }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}
