use crate::clients::registry::ClientRegistry;
use crate::config::UmaConfig;
use crate::create_app;
use crate::headers::BasicCredentials;
use crate::models::ClientDetails;
use crate::scope::ScopeCatalog;
use crate::state::AppState;
use crate::store::memory::InMemoryStore;
use axum::body::Body;
use axum::Router;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// Test fixture for driving the full router against an in-memory backend.
///
/// The fixture assembles the application with an [`InMemoryStore`] and a
/// [`ClientRegistry`], so tests can seed clients, mint grants through
/// `fixture.state` and then exercise the HTTP surface exactly as a caller
/// would.
///
/// # Examples
///
/// ```rust
/// #[tokio::test]
/// async fn test_endpoint() {
///     let fixture = TestFixture::new().await;
///     fixture.seed_client(ClientDetails::new("web-app"));
///
///     let response = fixture
///         .post_form("/oauth2/token", &[("grant_type", "client_credentials")])
///         .await;
///
///     response.assert_ok();
/// }
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// Shared state behind the router, for seeding and direct service calls
    pub state: AppState,
    /// Handle to the backing client registry
    pub registry: Arc<ClientRegistry>,
}

impl TestFixture {
    /// Creates a new fixture with an empty in-memory store and registry.
    pub async fn new() -> Self {
        // Initialize test logger
        let _ = env_logger::builder()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();

        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(ClientRegistry::new(ScopeCatalog::new()));
        let state = AppState::assemble(
            UmaConfig::for_testing(),
            store,
            registry.clone(),
            Arc::new(ScopeCatalog::new()),
        );
        let app = create_app(state.clone()).await;

        Self {
            app,
            state,
            registry,
        }
    }

    /// Inserts a trusted client record into the backing registry.
    pub fn seed_client(&self, client: ClientDetails) {
        self.registry
            .seed(client)
            .expect("Failed to seed test client");
    }

    /// Sends a GET request without credentials.
    pub async fn get(&self, uri: &str) -> TestResponse {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Sends a GET request with a bearer access token.
    pub async fn get_as(&self, uri: &str, bearer: &str) -> TestResponse {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {}", bearer))
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Sends a DELETE request with a bearer access token.
    pub async fn delete_as(&self, uri: &str, bearer: &str) -> TestResponse {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {}", bearer))
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    /// POSTs a urlencoded form without client credentials.
    pub async fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> TestResponse {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form_body(fields)))
            .expect("Failed to build request");
        self.send(request).await
    }

    /// POSTs a urlencoded form as a client authenticated through HTTP Basic.
    pub async fn post_form_as(
        &self,
        uri: &str,
        client_id: &str,
        client_secret: &str,
        fields: &[(&str, &str)],
    ) -> TestResponse {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                AUTHORIZATION,
                BasicCredentials::encode(client_id, client_secret),
            )
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form_body(fields)))
            .expect("Failed to build request");
        self.send(request).await
    }

    /// POSTs a JSON body without credentials.
    pub async fn post_json<T: Serialize>(&self, uri: &str, body: &T) -> TestResponse {
        self.send_json(Method::POST, uri, None, body).await
    }

    /// POSTs a JSON body with a bearer access token.
    pub async fn post_json_as<T: Serialize>(
        &self,
        uri: &str,
        bearer: &str,
        body: &T,
    ) -> TestResponse {
        self.send_json(Method::POST, uri, Some(bearer), body).await
    }

    /// PUTs a JSON body with a bearer access token.
    pub async fn put_json_as<T: Serialize>(
        &self,
        uri: &str,
        bearer: &str,
        body: &T,
    ) -> TestResponse {
        self.send_json(Method::PUT, uri, Some(bearer), body).await
    }

    async fn send_json<T: Serialize>(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: &T,
    ) -> TestResponse {
        let json_body = serde_json::to_vec(body).expect("Failed to serialize body to JSON");
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = builder
            .body(Body::from(json_body))
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Sends a prepared request through the router and collects the response.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        // Parse as JSON, defaulting to an empty object for empty bodies
        let json = if !body.is_empty() {
            serde_json::from_slice(&body).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        TestResponse { status, json }
    }
}

fn form_body(fields: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish()
}

/// Response from a test request with convenient access to status and body.
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response body as JSON (empty object when the body is not JSON)
    pub json: Value,
}

impl TestResponse {
    /// Asserts that the response has the expected status code.
    ///
    /// # Panics
    ///
    /// Panics with the response body when the status does not match.
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {} but got {} with body: {}",
            expected,
            self.status,
            serde_json::to_string_pretty(&self.json).unwrap_or_default()
        );
        self
    }

    /// Asserts that the response status is 200 OK.
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    /// Deserializes the response body into the given type.
    pub fn json_as<T: DeserializeOwned>(&self) -> T {
        serde_json::from_value(self.json.clone()).expect("Failed to deserialize response JSON")
    }
}
