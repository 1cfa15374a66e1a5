pub(crate) mod device;
pub(crate) mod health;
pub(crate) mod introspect;
pub(crate) mod revoke;
pub(crate) mod token;
pub(crate) mod uma;

use crate::errors::AuthError;
use crate::headers::{bearer_token, BasicCredentials};
use crate::models::{AccessToken, AuthenticationHolder, ClientDetails, SCOPE_UMA_PROTECTION};
use crate::state::AppState;
use axum::Router;
use http::header::AUTHORIZATION;
use http::HeaderMap;

/// Combines all API routes into a single router
pub(super) fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(token::router())
        .merge(revoke::router())
        .merge(introspect::router())
        .merge(device::router())
        .merge(uma::router())
}

/// Authenticate the requesting client from the Basic Authorization header
/// or, failing that, from `client_id`/`client_secret` form fields.
pub(crate) async fn client_from_request(
    state: &AppState,
    headers: &HeaderMap,
    form_id: Option<&str>,
    form_secret: Option<&str>,
) -> Result<ClientDetails, AuthError> {
    if let Some(creds) = BasicCredentials::from_header_value(headers.get(AUTHORIZATION)) {
        return state
            .authenticate_client(&creds.client_id, Some(creds.client_secret.as_str()))
            .await;
    }
    match form_id {
        Some(id) => state.authenticate_client(id, form_secret).await,
        None => Err(AuthError::invalid_client(
            "Client authentication is required",
        )),
    }
}

/// Resolve the bearer access token on the request together with the
/// frozen authentication it was minted from.
pub(crate) async fn bearer_authentication(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(AccessToken, AuthenticationHolder), AuthError> {
    let value = bearer_token(headers.get(AUTHORIZATION))
        .ok_or_else(|| AuthError::invalid_client("A bearer access token is required"))?;
    let token = state
        .tokens
        .get_access_token(value)
        .await?
        .ok_or_else(|| AuthError::invalid_client("Access token is invalid"))?;
    let holder = state
        .store
        .get_holder(&token.auth_holder_id)
        .await
        .map_err(AuthError::from)?
        .ok_or_else(|| AuthError::internal("Authentication for the access token is missing"))?;
    Ok((token, holder))
}

/// Bearer authentication for the UMA protection API. The presented
/// token must carry the `uma_protection` scope.
pub(crate) async fn protection_api_authentication(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(AccessToken, AuthenticationHolder), AuthError> {
    let (token, holder) = bearer_authentication(state, headers).await?;
    if !token.scope.contains(SCOPE_UMA_PROTECTION) {
        return Err(AuthError::not_authorized(
            "The uma_protection scope is required",
        ));
    }
    Ok((token, holder))
}
