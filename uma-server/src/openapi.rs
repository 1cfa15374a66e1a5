use crate::api;
use crate::state::AppState;
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

pub(crate) const OAUTH_TAG: &str = "OAuth2 API";
pub(crate) const DEVICE_TAG: &str = "Device API";
pub(crate) const UMA_TAG: &str = "UMA API";
pub(crate) const HEALTH_TAG: &str = "Health API";

#[derive(OpenApi)]
#[openapi(
    paths(
        api::token::token_handler,
        api::revoke::revoke_handler,
        api::introspect::introspect_handler,
        api::device::device_authorize_handler,
        api::device::device_approve_handler,
        api::uma::create_resource_set_handler,
        api::uma::list_resource_sets_handler,
        api::uma::get_resource_set_handler,
        api::uma::update_resource_set_handler,
        api::uma::delete_resource_set_handler,
        api::uma::register_permission_handler,
        api::uma::authorize_handler,
        api::uma::supply_claims_handler,
        api::health::healthy_handler,
        api::health::ready_handler,
    ),
    tags(
        (name = OAUTH_TAG, description = "Token issuance, revocation and introspection"),
        (name = DEVICE_TAG, description = "Device authorization grant"),
        (name = UMA_TAG, description = "User-Managed Access protection and authorization"),
        (name = HEALTH_TAG, description = "Health check endpoints"),
    ),
    info(
        title = "UMA Authorization Server API",
        description = "OAuth2 and User-Managed Access authorization server",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;

/// Handler for the OpenAPI JSON specification endpoint
async fn openapi_json_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Creates a router for OpenAPI documentation routes
pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json_handler))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TestFixture;

    #[tokio::test]
    async fn test_openapi_document_lists_the_token_endpoint() {
        let fixture = TestFixture::new().await;
        let response = fixture.get("/openapi.json").await;
        response.assert_ok();
        assert!(response.json["paths"]
            .as_object()
            .unwrap()
            .contains_key("/oauth2/token"));
        assert!(response.json["paths"]
            .as_object()
            .unwrap()
            .contains_key("/uma/authorize"));
    }
}
