//! Core data records: grants, tokens, scopes, UMA resources and tickets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use utoipa::ToSchema;
use uuid::Uuid;

/// Scope that marks a token as an OpenID Connect grant
pub const SCOPE_OPENID: &str = "openid";
/// Scope that authorizes minting a companion refresh token
pub const SCOPE_OFFLINE_ACCESS: &str = "offline_access";
/// Reserved scope for dynamic client registration
pub const SCOPE_REGISTRATION: &str = "registration";
/// Reserved scope for the UMA protection API
pub const SCOPE_UMA_PROTECTION: &str = "uma_protection";

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
pub const GRANT_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Request-extension keys carried on an authentication holder
pub const EXT_CODE_CHALLENGE: &str = "code_challenge";
pub const EXT_CODE_CHALLENGE_METHOD: &str = "code_challenge_method";

/// The authenticated principal behind a grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    #[serde(default)]
    pub authorities: Vec<String>,
}

impl Principal {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            authorities: Vec::new(),
        }
    }
}

/// Frozen snapshot of a granted authorization request.
///
/// Created once per grant, referenced by the code and tokens minted from it,
/// and deleted by the orphan sweep once nothing references it anymore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationHolder {
    pub id: String,
    pub principal: Principal,
    pub client_id: String,
    pub scope: HashSet<String>,
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub response_types: HashSet<String>,
    pub approved: bool,
    /// Request extensions, e.g. the PKCE challenge parameters
    #[serde(default)]
    pub extensions: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub request_parameters: HashMap<String, String>,
}

impl AuthenticationHolder {
    pub fn new(principal: Principal, client_id: &str, scope: HashSet<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            principal,
            client_id: client_id.to_string(),
            scope,
            redirect_uri: None,
            response_types: HashSet::new(),
            approved: true,
            extensions: HashMap::new(),
            request_parameters: HashMap::new(),
        }
    }

    /// Copy of this holder under a fresh id, for grants derived from it
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.id = Uuid::new_v4().to_string();
        copy
    }

    pub fn code_challenge(&self) -> Option<&str> {
        self.extensions.get(EXT_CODE_CHALLENGE).and_then(|v| v.as_str())
    }

    pub fn code_challenge_method(&self) -> Option<&str> {
        self.extensions
            .get(EXT_CODE_CHALLENGE_METHOD)
            .and_then(|v| v.as_str())
    }
}

/// Single-use authorization code storage model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// The opaque code value handed to the client
    pub code: String,
    /// Id of the frozen authentication this code redeems into
    pub auth_holder_id: String,
    /// Client the code was issued to
    pub client_id: String,
    /// Redirect URI the code was bound to, when one was given
    pub redirect_uri: Option<String>,
    pub expiration: DateTime<Utc>,
}

impl AuthorizationCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}

/// Access token storage model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// The signed token value presented by clients
    pub value: String,
    /// Token id (the `jti` claim of the signed value)
    pub id: String,
    pub client_id: String,
    pub auth_holder_id: String,
    pub scope: HashSet<String>,
    /// Absent means the token never expires
    pub expiration: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
    /// Id of the companion refresh token, when one was minted
    pub refresh_token_id: Option<String>,
    pub approved_site: Option<String>,
    /// UMA permissions; populated only on requesting-party tokens
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration, Some(exp) if exp <= now)
    }
}

/// Refresh token storage model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    /// The signed token value presented by clients
    pub value: String,
    /// Token id (the `jti` claim of the signed value)
    pub id: String,
    pub client_id: String,
    pub auth_holder_id: String,
    /// Absent means the token never expires
    pub expiration: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration, Some(exp) if exp <= now)
    }
}

/// Device-authorization grant storage model.
///
/// Lifecycle: pending (approved=false) -> approved (holder attached) ->
/// consumed (removed from the store on token exchange).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    /// Short code the end user types on the verification screen
    pub user_code: String,
    pub client_id: String,
    pub scope: HashSet<String>,
    #[serde(default)]
    pub request_parameters: HashMap<String, String>,
    /// Absent means the grant never expires
    pub expiration: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub approved: bool,
    pub auth_holder_id: Option<String>,
}

impl DeviceCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration, Some(exp) if exp <= now)
    }
}

/// A scope known to the server, with its structured/reserved flags
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemScope {
    /// The base scope value (without any structured suffix)
    pub value: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    /// Granted to clients that don't ask for anything specific
    pub default_scope: bool,
    /// Assignable by administrators only
    pub restricted: bool,
    /// Accepts a per-request `base:value` suffix
    pub structured: bool,
    pub structured_value: Option<String>,
}

impl SystemScope {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
            description: None,
            icon: None,
            default_scope: false,
            restricted: false,
            structured: false,
            structured_value: None,
        }
    }

    pub fn restricted(value: &str) -> Self {
        let mut scope = Self::new(value);
        scope.restricted = true;
        scope
    }

    pub fn structured(value: &str) -> Self {
        let mut scope = Self::new(value);
        scope.structured = true;
        scope
    }
}

/// A protected resource registered by its owner
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResourceSet {
    #[serde(default)]
    pub id: String,
    /// Username of the resource owner; only the owner may mutate the set
    pub owner: String,
    /// Client that registered the resource, when registered over the wire
    pub client_id: Option<String>,
    pub name: String,
    pub uri: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    pub icon_uri: Option<String>,
    pub scopes: HashSet<String>,
    #[serde(default)]
    pub policies: Vec<Policy>,
}

/// An access rule attached to a resource set: a scope set plus the
/// claims a requesting party must present to be granted those scopes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Policy {
    pub name: String,
    pub scopes: HashSet<String>,
    #[serde(default)]
    pub claims_required: Vec<Claim>,
}

/// A claim about the requesting party, either required by a policy or
/// supplied during the claims-gathering negotiation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Claim {
    pub name: String,
    pub friendly_name: Option<String>,
    pub claim_type: Option<String>,
    #[serde(default)]
    pub issuer: HashSet<String>,
    #[serde(default)]
    pub claim_token_format: HashSet<String>,
    /// Concrete value; `null` on a required claim matches any supplied value
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Claim {
    pub fn new(name: &str, value: serde_json::Value, issuer: &str) -> Self {
        Self {
            name: name.to_string(),
            friendly_name: None,
            claim_type: None,
            issuer: HashSet::from([issuer.to_string()]),
            claim_token_format: HashSet::new(),
            value,
        }
    }
}

/// A resource-set/scope combination a client has asked access for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub resource_set_id: String,
    pub scopes: HashSet<String>,
}

/// Pending UMA authorization request, accumulating supplied claims
/// across negotiation rounds until a policy is satisfied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionTicket {
    /// Opaque handle returned to the client
    pub ticket: String,
    pub permission: Permission,
    #[serde(default)]
    pub claims_supplied: Vec<Claim>,
    pub expiration: DateTime<Utc>,
}

impl PermissionTicket {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}

/// Registered OAuth client as served by the client directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDetails {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub client_name: Option<String>,
    #[serde(default)]
    pub scope: HashSet<String>,
    #[serde(default)]
    pub grant_types: HashSet<String>,
    #[serde(default)]
    pub redirect_uris: HashSet<String>,
    /// Positive value bounds token lifetime; absent or zero means no expiry
    pub access_token_validity_seconds: Option<i64>,
    pub refresh_token_validity_seconds: Option<i64>,
    pub device_code_validity_seconds: Option<i64>,
    #[serde(default)]
    pub reuse_refresh_token: bool,
    #[serde(default)]
    pub clear_access_tokens_on_refresh: bool,
    pub code_challenge_method: Option<String>,
}

impl ClientDetails {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: None,
            client_name: None,
            scope: HashSet::new(),
            grant_types: HashSet::new(),
            redirect_uris: HashSet::new(),
            access_token_validity_seconds: None,
            refresh_token_validity_seconds: None,
            device_code_validity_seconds: None,
            reuse_refresh_token: false,
            clear_access_tokens_on_refresh: false,
            code_challenge_method: None,
        }
    }

    /// Whether this client may redeem refresh tokens
    pub fn allow_refresh(&self) -> bool {
        self.grant_types.contains(GRANT_REFRESH_TOKEN)
    }
}
