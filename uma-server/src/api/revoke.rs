use crate::api::client_from_request;
use crate::errors::AuthError;
use crate::models::ClientDetails;
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::extract::{Form, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use http::{HeaderMap, StatusCode};
use log::debug;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub(super) fn router() -> Router<AppState> {
    Router::new().route("/oauth2/revoke", post(revoke_handler))
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub(crate) struct RevocationRequest {
    pub token: String,
    /// `access_token` or `refresh_token`, ordering the lookup only
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// RFC 7009 token revocation. Revoking an unknown token succeeds with
/// an empty response so callers cannot probe for live token values.
#[utoipa::path(
    post,
    path = "/oauth2/revoke",
    tag = OAUTH_TAG,
    request_body(content = RevocationRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token revoked or unknown"),
        (status = 401, description = "Client authentication failed"),
        (status = 403, description = "Token belongs to another client")
    )
)]
pub(crate) async fn revoke_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(request): Form<RevocationRequest>,
) -> Response {
    match revoke_token(&state, &headers, request).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn revoke_token(
    state: &AppState,
    headers: &HeaderMap,
    request: RevocationRequest,
) -> Result<(), AuthError> {
    let client = client_from_request(
        state,
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .await?;

    let refresh_first = request.token_type_hint.as_deref() == Some("refresh_token");
    let revoked = if refresh_first {
        revoke_refresh(state, &client, &request.token).await?
            || revoke_access(state, &client, &request.token).await?
    } else {
        revoke_access(state, &client, &request.token).await?
            || revoke_refresh(state, &client, &request.token).await?
    };
    if !revoked {
        debug!("Revocation requested for an unknown token; answering blindly");
    }
    Ok(())
}

async fn revoke_access(
    state: &AppState,
    client: &ClientDetails,
    value: &str,
) -> Result<bool, AuthError> {
    match state.tokens.get_access_token(value).await? {
        Some(token) if token.client_id == client.client_id => {
            state.tokens.revoke_access_token(&token).await?;
            Ok(true)
        }
        Some(_) => Err(AuthError::not_authorized(
            "Token was issued to another client",
        )),
        None => Ok(false),
    }
}

async fn revoke_refresh(
    state: &AppState,
    client: &ClientDetails,
    value: &str,
) -> Result<bool, AuthError> {
    match state.tokens.get_refresh_token(value).await? {
        Some(token) if token.client_id == client.client_id => {
            state.tokens.revoke_refresh_token(&token).await?;
            Ok(true)
        }
        Some(_) => Err(AuthError::not_authorized(
            "Token was issued to another client",
        )),
        None => Ok(false),
    }
}
