// HTTP client for the game-statistics service.
//
// All endpoints are unauthenticated GETs returning JSON. Every request
// carries `Accept: application/json` and a short fixed timeout, so a hung
// remote call can delay cancellation by at most that timeout. Successful
// responses surface the service's rate-limit headers verbatim.

use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::GamesFilter;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure modes of one remote call. The `Display` form is the exact text
/// recorded on a player record or shown in a task result.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection refused, DNS failure, or timeout.
    #[error("cannot connect to remote service")]
    Unreachable(#[source] reqwest::Error),

    /// Non-200 status; the message is the status's reason phrase.
    #[error("{reason}")]
    Status { reason: String },

    /// The response body was not JSON at all.
    #[error("response was not valid JSON")]
    InvalidBody(#[source] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Rate-limit headers from the most recent call, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: String,
    pub limit: String,
}

/// A successful (HTTP 200) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub body: Value,
    pub rate_limit: Option<RateLimitInfo>,
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Bounded-timeout GET client for the statistics service.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Build a client with the given base URL (no trailing slash) and
    /// per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(ApiClient { http, base_url })
    }

    /// `GET /player/{id}`: one player's profile.
    pub async fn player(&self, id: i64) -> Result<ApiResponse, ApiError> {
        self.get_json(&format!("/player/{id}")).await
    }

    /// `GET /game/{id}`: one game by id.
    pub async fn game(&self, id: i64) -> Result<ApiResponse, ApiError> {
        self.get_json(&format!("/game/{id}")).await
    }

    /// `GET /map/{id}`: one map by id.
    pub async fn map(&self, id: i64) -> Result<ApiResponse, ApiError> {
        self.get_json(&format!("/map/{id}")).await
    }

    /// `GET /server/{id}`: one server by id.
    pub async fn server(&self, id: i64) -> Result<ApiResponse, ApiError> {
        self.get_json(&format!("/server/{id}")).await
    }

    /// `GET /games?{player_id|map_id|server_id}={id}[&start_game_id={cursor}]`
    /// for one page of games matching the filter, starting after the cursor.
    pub async fn games(
        &self,
        filter: GamesFilter,
        start_game_id: Option<i64>,
    ) -> Result<ApiResponse, ApiError> {
        let mut path = format!("/games?{}={}", filter.query_key(), filter.id());
        if let Some(cursor) = start_game_id {
            path.push_str(&format!("&start_game_id={cursor}"));
        }
        self.get_json(&path).await
    }

    async fn get_json(&self, path_and_query: &str) -> Result<ApiResponse, ApiError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(ApiError::Unreachable)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ApiError::Status {
                reason: reason_phrase(status),
            });
        }

        let rate_limit = rate_limit_info(response.headers());
        let body = response.json().await.map_err(ApiError::InvalidBody)?;
        Ok(ApiResponse { body, rate_limit })
    }
}

/// The standard reason phrase for a status, falling back to the bare code
/// for statuses that don't have one.
fn reason_phrase(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

fn rate_limit_info(headers: &reqwest::header::HeaderMap) -> Option<RateLimitInfo> {
    let remaining = headers.get("X-Ratelimit-Remaining")?.to_str().ok()?;
    let limit = headers.get("X-Ratelimit-Limit")?.to_str().ok()?;
    Some(RateLimitInfo {
        remaining: remaining.to_string(),
        limit: limit.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
