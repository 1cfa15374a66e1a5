use crate::clients::DirectoryError;
use crate::store::StoreError;
use axum::response::IntoResponse;
use axum::Json;
use http::StatusCode;
use serde_json::{json, Value};

/// Protocol-level error returned by every OAuth and UMA endpoint.
///
/// The wire shape follows RFC 6749: a JSON body with an `error` code and
/// an optional `error_description`. UMA negotiation errors additionally
/// merge fields such as `ticket` and `required_claims` into the body.
#[derive(Debug, Clone)]
pub struct AuthError {
    pub error: String,
    pub description: String,
    pub status_code: StatusCode,
    pub extra: Option<Value>,
}

impl AuthError {
    pub fn new<S: ToString>(error: &str, description: S, status_code: StatusCode) -> Self {
        Self {
            error: error.to_string(),
            description: description.to_string(),
            status_code,
            extra: None,
        }
    }

    /// Malformed or incomplete request (400)
    pub fn invalid_request<S: ToString>(description: S) -> Self {
        Self::new("invalid_request", description, StatusCode::BAD_REQUEST)
    }

    /// Unknown client or failed client authentication (401)
    pub fn invalid_client<S: ToString>(description: S) -> Self {
        Self::new("invalid_client", description, StatusCode::UNAUTHORIZED)
    }

    /// Invalid, consumed, expired or foreign grant material (400)
    pub fn invalid_grant<S: ToString>(description: S) -> Self {
        Self::new("invalid_grant", description, StatusCode::BAD_REQUEST)
    }

    /// Requested scope exceeds what the grant allows (400)
    pub fn invalid_scope<S: ToString>(description: S) -> Self {
        Self::new("invalid_scope", description, StatusCode::BAD_REQUEST)
    }

    /// Grant type this server or client does not support (400)
    pub fn unsupported_grant_type<S: ToString>(description: S) -> Self {
        Self::new("unsupported_grant_type", description, StatusCode::BAD_REQUEST)
    }

    /// Caller is not allowed to act on the addressed object (403)
    pub fn not_authorized<S: ToString>(description: S) -> Self {
        Self::new("not_authorized", description, StatusCode::FORBIDDEN)
    }

    /// Claims gathering must continue before access can be granted (403).
    /// Carries the refreshed ticket and the claims still missing.
    pub fn need_info(ticket: &str, required_claims: Value) -> Self {
        let mut err = Self::new(
            "need_info",
            "Additional claims are required",
            StatusCode::FORBIDDEN,
        );
        err.extra = Some(json!({
            "ticket": ticket,
            "required_claims": required_claims,
        }));
        err
    }

    /// Addressed object does not exist (404)
    pub fn not_found<S: ToString>(description: S) -> Self {
        Self::new("not_found", description, StatusCode::NOT_FOUND)
    }

    /// Device grant not yet approved by the resource owner (400)
    pub fn authorization_pending() -> Self {
        Self::new(
            "authorization_pending",
            "The device authorization is still pending",
            StatusCode::BAD_REQUEST,
        )
    }

    /// Device grant expired before it was approved (400)
    pub fn expired_token() -> Self {
        Self::new(
            "expired_token",
            "The device code has expired",
            StatusCode::BAD_REQUEST,
        )
    }

    /// Backing store failure (503)
    pub fn unavailable<S: ToString>(description: S) -> Self {
        Self::new(
            "temporarily_unavailable",
            description,
            StatusCode::SERVICE_UNAVAILABLE,
        )
    }

    /// Unexpected server-side failure (500)
    pub fn internal<S: ToString>(description: S) -> Self {
        Self::new("server_error", description, StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.description)
    }
}

impl std::error::Error for AuthError {}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Redis(e) => AuthError::unavailable(format!("Store failure: {}", e)),
            StoreError::Timeout(e) => AuthError::unavailable(format!("Store timeout: {}", e)),
            StoreError::Serialization(e) => AuthError::internal(format!("Store failure: {}", e)),
            StoreError::Deserialization(e) => {
                AuthError::internal(format!("Store failure: {}", e))
            }
            StoreError::Config(e) => AuthError::internal(format!("Store misconfigured: {}", e)),
        }
    }
}

impl From<DirectoryError> for AuthError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => AuthError::invalid_client("Client not found"),
            DirectoryError::Backend(e) => {
                AuthError::unavailable(format!("Client directory failure: {}", e))
            }
            DirectoryError::Invalid(e) => AuthError::invalid_request(e),
            DirectoryError::Config(e) => {
                AuthError::internal(format!("Client directory misconfigured: {}", e))
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code;
        let mut body = json!({
            "error": self.error,
        });
        if !self.description.is_empty() {
            body["error_description"] = Value::String(self.description);
        }
        if let Some(Value::Object(extra)) = self.extra {
            if let Value::Object(ref mut map) = body {
                map.extend(extra);
            }
        }
        if status_code == StatusCode::UNAUTHORIZED {
            let headers = [("WWW-Authenticate", "Basic realm=\"oauth\"")];
            return (status_code, headers, Json(body)).into_response();
        }
        (status_code, Json(body)).into_response()
    }
}
