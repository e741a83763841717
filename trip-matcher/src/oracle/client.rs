//! Route matrix HTTP client.
//!
//! Queries a route matrix API for driving distances between sets of
//! coordinates. Handles authentication, concurrency limits, and status
//! code mapping.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue};
use tokio::sync::Semaphore;
use tracing::debug;

use super::error::OracleError;
use super::types::RouteMatrixResponse;
use super::{DistanceMatrix, DistanceOracle, MAX_PAIRS_PER_CALL};
use crate::domain::LatLng;

/// Default base URL for the route matrix API.
const DEFAULT_BASE_URL: &str = "https://api.radar.io";

/// Default maximum concurrent requests.
const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Configuration for the route matrix client.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// API key sent in the `Authorization` header
    pub api_key: String,
    /// Base URL for the API
    pub base_url: String,
    /// Maximum concurrent requests
    pub max_concurrent: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Travel mode passed to the API
    pub mode: String,
}

impl OracleConfig {
    /// Create a new config with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout_secs: 30,
            mode: "car".to_string(),
        }
    }

    /// Set a custom base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set maximum concurrent requests.
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }
}

fn join_points(points: &[LatLng]) -> String {
    points
        .iter()
        .map(LatLng::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

/// Route matrix API client.
///
/// Uses a semaphore to limit concurrent requests and avoid rate limiting.
#[derive(Debug, Clone)]
pub struct RouteMatrixClient {
    http: reqwest::Client,
    base_url: String,
    mode: String,
    semaphore: Arc<Semaphore>,
}

impl RouteMatrixClient {
    /// Create a new client with the given configuration.
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        let mut headers = HeaderMap::new();

        let api_key =
            HeaderValue::from_str(&config.api_key).map_err(|_| OracleError::ApiError {
                status: 0,
                message: "Invalid API key format".to_string(),
            })?;
        headers.insert(reqwest::header::AUTHORIZATION, api_key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url,
            mode: config.mode,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
        })
    }

    /// Fetch the raw route matrix between origins and destinations.
    pub async fn route_matrix(
        &self,
        origins: &[LatLng],
        destinations: &[LatLng],
    ) -> Result<RouteMatrixResponse, OracleError> {
        let pairs = origins.len() * destinations.len();
        if pairs > MAX_PAIRS_PER_CALL {
            return Err(OracleError::TooManyPairs {
                pairs,
                limit: MAX_PAIRS_PER_CALL,
            });
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| OracleError::ApiError {
                status: 0,
                message: "Semaphore closed".to_string(),
            })?;

        let url = format!("{}/v1/route/matrix", self.base_url);
        debug!(origins = origins.len(), destinations = destinations.len(), "route matrix request");

        let response = self
            .http
            .get(&url)
            .query(&[
                ("origins", join_points(origins)),
                ("destinations", join_points(destinations)),
                ("mode", self.mode.clone()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(OracleError::Unauthorized);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = response.text().await?;

        serde_json::from_str(&body).map_err(|e| OracleError::Json {
            message: e.to_string(),
            body: Some(body.chars().take(500).collect()),
        })
    }
}

impl DistanceOracle for RouteMatrixClient {
    async fn matrix(
        &self,
        origins: &[LatLng],
        destinations: &[LatLng],
    ) -> Result<DistanceMatrix, OracleError> {
        if origins.is_empty() || destinations.is_empty() {
            return Ok(DistanceMatrix::new(vec![Vec::new(); origins.len()]));
        }

        let response = self.route_matrix(origins, destinations).await?;
        let rows = response
            .matrix
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|el| el.distance.map(|d| d.value))
                    .collect()
            })
            .collect();

        let matrix = DistanceMatrix::new(rows);
        matrix.check_shape(origins.len(), destinations.len())?;
        Ok(matrix)
    }
}
