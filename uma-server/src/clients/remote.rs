//! HTTP-backed client directory.
//!
//! Fetches client records from an external registry endpoint at
//! `GET {base}/clients/{client_id}`. A 404 from the registry maps to
//! `DirectoryError::NotFound`; every other failure is a backend error.

use super::{ClientDirectory, DirectoryError};
use crate::config::ClientsConfig;
use crate::models::ClientDetails;
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use log::{debug, error};
use reqwest::{Client, StatusCode};
use std::time::Duration;

pub struct RemoteDirectory {
    http: Client,
    base_url: String,
}

impl RemoteDirectory {
    pub fn new(config: &ClientsConfig) -> Result<Self, DirectoryError> {
        if config.url.is_empty() {
            return Err(DirectoryError::Config(
                "Remote client directory requires clients.url".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &config.token {
            let value = format!("Bearer {}", token).parse().map_err(|_| {
                DirectoryError::Config("Invalid clients.token header value".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .connect_timeout(Duration::from_secs(2))
            .default_headers(headers)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|err| {
                DirectoryError::Config(format!("Failed to create directory client: {}", err))
            })?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ClientDirectory for RemoteDirectory {
    async fn load_by_client_id(&self, client_id: &str) -> Result<ClientDetails, DirectoryError> {
        let url = format!("{}/clients/{}", self.base_url, client_id);
        debug!("Fetching client record from {}", url);

        let response = self.http.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(DirectoryError::NotFound),
            status if status.is_success() => Ok(response.json::<ClientDetails>().await?),
            status => {
                error!("Client directory returned status {} for {}", status, client_id);
                Err(DirectoryError::Backend(format!(
                    "client directory returned status {}",
                    status
                )))
            }
        }
    }
}
