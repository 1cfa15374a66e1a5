use crate::api::client_from_request;
use crate::errors::AuthError;
use crate::introspect::IntrospectionResponse;
use crate::models::ClientDetails;
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::extract::{Form, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http::{HeaderMap, StatusCode};
use log::debug;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub(super) fn router() -> Router<AppState> {
    Router::new().route("/oauth2/introspect", post(introspect_handler))
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub(crate) struct IntrospectionRequest {
    pub token: String,
    /// `access_token` or `refresh_token`, ordering the lookup only
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// RFC 7662 introspection. Tokens that are unknown, expired or outside
/// the caller's authority all answer `{"active": false}` so the
/// endpoint reveals nothing it should not.
#[utoipa::path(
    post,
    path = "/oauth2/introspect",
    tag = OAUTH_TAG,
    request_body(
        content = IntrospectionRequest,
        content_type = "application/x-www-form-urlencoded"
    ),
    responses(
        (status = 200, description = "Introspection result", body = IntrospectionResponse),
        (status = 401, description = "Client authentication failed")
    )
)]
pub(crate) async fn introspect_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(request): Form<IntrospectionRequest>,
) -> Response {
    match introspect_token(&state, &headers, request).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn introspect_token(
    state: &AppState,
    headers: &HeaderMap,
    request: IntrospectionRequest,
) -> Result<IntrospectionResponse, AuthError> {
    let client = client_from_request(
        state,
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .await?;

    let refresh_first = request.token_type_hint.as_deref() == Some("refresh_token");
    let found = if refresh_first {
        match introspect_refresh(state, &client, &request.token).await? {
            Some(body) => Some(body),
            None => introspect_access(state, &client, &request.token).await?,
        }
    } else {
        match introspect_access(state, &client, &request.token).await? {
            Some(body) => Some(body),
            None => introspect_refresh(state, &client, &request.token).await?,
        }
    };

    Ok(found.unwrap_or_else(|| {
        debug!("Introspection answered inactive for client {}", client.client_id);
        IntrospectionResponse::inactive()
    }))
}

async fn introspect_access(
    state: &AppState,
    client: &ClientDetails,
    value: &str,
) -> Result<Option<IntrospectionResponse>, AuthError> {
    let Some(token) = state.tokens.get_access_token(value).await? else {
        return Ok(None);
    };
    if !state
        .introspection
        .is_introspection_permitted(client, &token.client_id, &token.scope)
    {
        return Ok(Some(IntrospectionResponse::inactive()));
    }
    let holder = state
        .store
        .get_holder(&token.auth_holder_id)
        .await?
        .ok_or_else(|| AuthError::internal("Authentication for the access token is missing"))?;
    Ok(Some(state.introspection.assemble_access_token(
        &token,
        &holder,
        &client.scope,
    )))
}

async fn introspect_refresh(
    state: &AppState,
    client: &ClientDetails,
    value: &str,
) -> Result<Option<IntrospectionResponse>, AuthError> {
    let Some(token) = state.tokens.get_refresh_token(value).await? else {
        return Ok(None);
    };
    let holder = state
        .store
        .get_holder(&token.auth_holder_id)
        .await?
        .ok_or_else(|| AuthError::internal("Authentication for the refresh token is missing"))?;
    if !state
        .introspection
        .is_introspection_permitted(client, &token.client_id, &holder.scope)
    {
        return Ok(Some(IntrospectionResponse::inactive()));
    }
    Ok(Some(state.introspection.assemble_refresh_token(
        &token,
        &holder,
        &client.scope,
    )))
}
