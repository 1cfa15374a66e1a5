use crate::api::client_from_request;
use crate::errors::AuthError;
use crate::models::{
    AuthenticationHolder, ClientDetails, Principal, GRANT_AUTHORIZATION_CODE,
    GRANT_CLIENT_CREDENTIALS, GRANT_DEVICE_CODE, GRANT_REFRESH_TOKEN, SCOPE_OFFLINE_ACCESS,
};
use crate::openapi::OAUTH_TAG;
use crate::scope::{join_scope_param, split_scope_param};
use crate::state::AppState;
use crate::token::IssuedToken;
use axum::extract::{Form, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub(super) fn router() -> Router<AppState> {
    Router::new().route("/oauth2/token", post(token_handler))
}

/// Form parameters accepted by the token endpoint, across all grants
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub(crate) struct TokenRequest {
    pub grant_type: String,
    /// Authorization code (authorization_code grant)
    pub code: Option<String>,
    /// Must repeat the redirect URI bound to the code
    pub redirect_uri: Option<String>,
    /// PKCE verifier matching the code's challenge
    pub code_verifier: Option<String>,
    /// Refresh token (refresh_token grant)
    pub refresh_token: Option<String>,
    /// Device code (device_code grant)
    pub device_code: Option<String>,
    /// Space-separated scope to request
    pub scope: Option<String>,
    /// Client id, for clients not using Basic authentication
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Successful token response per RFC 6749
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

impl From<IssuedToken> for TokenResponse {
    fn from(issued: IssuedToken) -> Self {
        Self {
            expires_in: issued
                .access_token
                .expiration
                .map(|exp| (exp - Utc::now()).num_seconds()),
            scope: join_scope_param(&issued.access_token.scope),
            access_token: issued.access_token.value,
            token_type: "Bearer".to_string(),
            refresh_token: issued.refresh_token.map(|rt| rt.value),
        }
    }
}

#[utoipa::path(
    post,
    path = "/oauth2/token",
    tag = OAUTH_TAG,
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Invalid grant, scope or request"),
        (status = 401, description = "Client authentication failed")
    )
)]
pub(crate) async fn token_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Response {
    match issue_token(&state, &headers, request).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn issue_token(
    state: &AppState,
    headers: &HeaderMap,
    request: TokenRequest,
) -> Result<TokenResponse, AuthError> {
    let client = client_from_request(
        state,
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .await?;

    match request.grant_type.as_str() {
        GRANT_AUTHORIZATION_CODE => authorization_code_grant(state, &client, &request).await,
        GRANT_REFRESH_TOKEN => refresh_token_grant(state, &client, &request).await,
        GRANT_CLIENT_CREDENTIALS => client_credentials_grant(state, &client, &request).await,
        GRANT_DEVICE_CODE => device_code_grant(state, &client, &request).await,
        other => Err(AuthError::unsupported_grant_type(format!(
            "Grant type {} is not supported",
            other
        ))),
    }
}

fn require_grant(client: &ClientDetails, grant: &str) -> Result<(), AuthError> {
    if client.grant_types.contains(grant) {
        Ok(())
    } else {
        Err(AuthError::invalid_client(format!(
            "Client is not authorized for the {} grant",
            grant
        )))
    }
}

async fn authorization_code_grant(
    state: &AppState,
    client: &ClientDetails,
    request: &TokenRequest,
) -> Result<TokenResponse, AuthError> {
    require_grant(client, GRANT_AUTHORIZATION_CODE)?;
    let code = request
        .code
        .as_deref()
        .ok_or_else(|| AuthError::invalid_request("code is required"))?;

    let holder = state.codes.consume(code).await?;
    if holder.client_id != client.client_id {
        return Err(AuthError::invalid_grant(
            "Authorization code was issued to another client",
        ));
    }
    if holder.redirect_uri.is_some() && holder.redirect_uri != request.redirect_uri {
        return Err(AuthError::invalid_grant(
            "redirect_uri does not match the authorization request",
        ));
    }

    let issued = state
        .tokens
        .create_access_token(&holder, request.code_verifier.as_deref())
        .await?;
    Ok(issued.into())
}

async fn refresh_token_grant(
    state: &AppState,
    client: &ClientDetails,
    request: &TokenRequest,
) -> Result<TokenResponse, AuthError> {
    let value = request
        .refresh_token
        .as_deref()
        .ok_or_else(|| AuthError::invalid_request("refresh_token is required"))?;
    let requested_scope = request.scope.as_deref().map(split_scope_param);
    let issued = state
        .tokens
        .refresh_access_token(value, &client.client_id, requested_scope)
        .await?;
    Ok(issued.into())
}

async fn client_credentials_grant(
    state: &AppState,
    client: &ClientDetails,
    request: &TokenRequest,
) -> Result<TokenResponse, AuthError> {
    require_grant(client, GRANT_CLIENT_CREDENTIALS)?;
    let mut scope = match request.scope.as_deref() {
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
    // Client credentials grants never carry a refresh token.
    scope.remove(SCOPE_OFFLINE_ACCESS);

    let holder =
        AuthenticationHolder::new(Principal::new(&client.client_id), &client.client_id, scope);
    let issued = state.tokens.create_access_token(&holder, None).await?;
    Ok(issued.into())
}

async fn device_code_grant(
    state: &AppState,
    client: &ClientDetails,
    request: &TokenRequest,
) -> Result<TokenResponse, AuthError> {
    let device_code = request
        .device_code
        .as_deref()
        .ok_or_else(|| AuthError::invalid_request("device_code is required"))?;
    let holder = state.devices.redeem(device_code, &client.client_id).await?;
    let issued = state.tokens.create_access_token(&holder, None).await?;
    Ok(issued.into())
}
