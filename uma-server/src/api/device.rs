use crate::api::{bearer_authentication, client_from_request};
use crate::errors::AuthError;
use crate::models::{AuthenticationHolder, Principal};
use crate::openapi::DEVICE_TAG;
use crate::scope::{join_scope_param, split_scope_param};
use crate::state::AppState;
use axum::extract::{Form, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http::{HeaderMap, StatusCode};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// Minimum seconds a client should wait between token-endpoint polls
const POLL_INTERVAL_SECONDS: i64 = 5;

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/oauth2/device/authorize", post(device_authorize_handler))
        .route("/oauth2/device/approve", post(device_approve_handler))
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub(crate) struct DeviceAuthorizationRequest {
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// RFC 8628 device authorization response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(crate) struct DeviceAuthorizationResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: i64,
    pub interval: i64,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub(crate) struct DeviceApprovalRequest {
    pub user_code: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(crate) struct DeviceApprovalResponse {
    pub user_code: String,
    /// Client the approved grant will be issued to
    pub client_id: String,
    pub scope: String,
    pub approved: bool,
}

/// Open a device authorization: mints the device and user code pair the
/// limited-input device shows to its user.
#[utoipa::path(
    post,
    path = "/oauth2/device/authorize",
    tag = DEVICE_TAG,
    request_body(
        content = DeviceAuthorizationRequest,
        content_type = "application/x-www-form-urlencoded"
    ),
    responses(
        (status = 200, description = "Device authorization opened", body = DeviceAuthorizationResponse),
        (status = 400, description = "Requested scope exceeds the client's registration"),
        (status = 401, description = "Client authentication failed")
    )
)]
pub(crate) async fn device_authorize_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(request): Form<DeviceAuthorizationRequest>,
) -> Response {
    match open_device_authorization(&state, &headers, request).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn open_device_authorization(
    state: &AppState,
    headers: &HeaderMap,
    request: DeviceAuthorizationRequest,
) -> Result<DeviceAuthorizationResponse, AuthError> {
    let client = client_from_request(
        state,
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .await?;

    let scope = match request.scope.as_deref() {
        Some(raw) => {
            let requested = split_scope_param(raw);
            if !state.scopes.scopes_match(&client.scope, &requested) {
                return Err(AuthError::invalid_scope(
                    "Requested scope exceeds the client's registered scope",
                ));
            }
            requested
        }
        None => client.scope.clone(),
    };

    let device = state
        .devices
        .create(&client.client_id, scope, HashMap::new())
        .await?;
    let expires_in = device
        .expiration
        .map(|exp| (exp - device.created_at).num_seconds())
        .unwrap_or(state.config.tokens.ttl.device);

    Ok(DeviceAuthorizationResponse {
        device_code: device.device_code,
        user_code: device.user_code,
        verification_uri: format!("{}/device", state.config.issuer),
        expires_in,
        interval: POLL_INTERVAL_SECONDS,
    })
}

/// Approve a pending device authorization on behalf of the caller. The
/// bearer token names the approving user; the grant is frozen under the
/// device's client and scope.
#[utoipa::path(
    post,
    path = "/oauth2/device/approve",
    tag = DEVICE_TAG,
    request_body = DeviceApprovalRequest,
    responses(
        (status = 200, description = "Device authorization approved", body = DeviceApprovalResponse),
        (status = 401, description = "A bearer access token is required"),
        (status = 404, description = "Unknown or expired user code")
    )
)]
pub(crate) async fn device_approve_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DeviceApprovalRequest>,
) -> Response {
    match approve_device_authorization(&state, &headers, request).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn approve_device_authorization(
    state: &AppState,
    headers: &HeaderMap,
    request: DeviceApprovalRequest,
) -> Result<DeviceApprovalResponse, AuthError> {
    let (_, session) = bearer_authentication(state, headers).await?;

    let device = state
        .devices
        .lookup_by_user_code(&request.user_code)
        .await?
        .ok_or_else(|| AuthError::not_found("Unknown or expired user code"))?;

    let authentication = AuthenticationHolder::new(
        Principal::new(&session.principal.username),
        &device.client_id,
        device.scope.clone(),
    );
    let approved = state
        .devices
        .approve(&device.device_code, &device.client_id, &authentication)
        .await?;
    info!(
        "User {} approved device authorization for client {}",
        session.principal.username, approved.client_id
    );

    Ok(DeviceApprovalResponse {
        user_code: approved.user_code,
        scope: join_scope_param(&approved.scope),
        client_id: approved.client_id,
        approved: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientDetails, GRANT_DEVICE_CODE};
    use crate::test_utils::TestFixture;
    use std::collections::HashSet;

    fn scopes(values: &[&str]) -> HashSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn tv_client() -> ClientDetails {
        let mut client = ClientDetails::new("tv-app");
        client.client_secret = Some("s3cret".to_string());
        client.scope = scopes(&["openid", "watch"]);
        client.grant_types = HashSet::from([GRANT_DEVICE_CODE.to_string()]);
        client
    }

    async fn session_token(fixture: &TestFixture, username: &str) -> String {
        let mut portal = ClientDetails::new("portal");
        portal.scope = scopes(&["openid"]);
        fixture.seed_client(portal);
        let holder =
            AuthenticationHolder::new(Principal::new(username), "portal", scopes(&["openid"]));
        fixture
            .state
            .tokens
            .create_access_token(&holder, None)
            .await
            .unwrap()
            .access_token
            .value
    }

    #[tokio::test]
    async fn test_device_authorization_opens() {
        let fixture = TestFixture::new().await;
        fixture.seed_client(tv_client());

        let response = fixture
            .post_form_as(
                "/oauth2/device/authorize",
                "tv-app",
                "s3cret",
                &[("scope", "watch")],
            )
            .await;
        let body: DeviceAuthorizationResponse = response.assert_ok().json_as();
        assert!(!body.device_code.is_empty());
        assert!(!body.user_code.is_empty());
        assert!(body.verification_uri.ends_with("/device"));
        assert!(body.expires_in > 0);
        assert_eq!(body.interval, POLL_INTERVAL_SECONDS);
    }

    #[tokio::test]
    async fn test_device_authorization_rejects_upscoping() {
        let fixture = TestFixture::new().await;
        fixture.seed_client(tv_client());

        let response = fixture
            .post_form_as(
                "/oauth2/device/authorize",
                "tv-app",
                "s3cret",
                &[("scope", "watch admin")],
            )
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json["error"], "invalid_scope");
    }

    #[tokio::test]
    async fn test_client_without_device_grant_is_rejected() {
        let fixture = TestFixture::new().await;
        let mut client = tv_client();
        client.grant_types = HashSet::new();
        fixture.seed_client(client);

        let response = fixture
            .post_form_as("/oauth2/device/authorize", "tv-app", "s3cret", &[])
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_approval_attaches_the_caller() {
        let fixture = TestFixture::new().await;
        fixture.seed_client(tv_client());
        let session = session_token(&fixture, "alice").await;
        let device = fixture
            .state
            .devices
            .create("tv-app", scopes(&["watch"]), HashMap::new())
            .await
            .unwrap();

        let response = fixture
            .post_json_as(
                "/oauth2/device/approve",
                &session,
                &serde_json::json!({ "user_code": device.user_code }),
            )
            .await;
        let body: DeviceApprovalResponse = response.assert_ok().json_as();
        assert!(body.approved);
        assert_eq!(body.client_id, "tv-app");
        assert_eq!(body.scope, "watch");

        let holder = fixture
            .state
            .devices
            .redeem(&device.device_code, "tv-app")
            .await
            .unwrap();
        assert_eq!(holder.principal.username, "alice");
        assert_eq!(holder.client_id, "tv-app");
    }

    #[tokio::test]
    async fn test_unknown_user_code_is_not_found() {
        let fixture = TestFixture::new().await;
        fixture.seed_client(tv_client());
        let session = session_token(&fixture, "alice").await;

        let response = fixture
            .post_json_as(
                "/oauth2/device/approve",
                &session,
                &serde_json::json!({ "user_code": "XXXX-XXXX" }),
            )
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_approval_requires_a_bearer_token() {
        let fixture = TestFixture::new().await;
        fixture.seed_client(tv_client());

        let response = fixture
            .post_json(
                "/oauth2/device/approve",
                &serde_json::json!({ "user_code": "XXXX-XXXX" }),
            )
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }
}
