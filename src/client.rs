use crate::errors::{AppError, AppResult};
use crate::models::{AnalyticsData, FollowUpToday, SyncSheetRequest, SyncSheetResponse};
use crate::scheduler::{SheetSyncTransport, SyncFuture};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const USER_HEADER: &str = "x-user-id";

/// Thin HTTP client for the dashboard side of the API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    user_id: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, user_id: &str, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: user_id.to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn sync_sheet(&self, sheet_url: &str) -> AppResult<SyncSheetResponse> {
        let response = self
            .http
            .post(self.url("/leads/sync-sheet"))
            .header(USER_HEADER, &self.user_id)
            .json(&SyncSheetRequest {
                sheet_url: sheet_url.to_string(),
            })
            .send()
            .await?;
        read_json(response).await
    }

    pub async fn analytics_data(&self) -> AppResult<AnalyticsData> {
        self.get_json("/leads/analytics-data").await
    }

    pub async fn follow_up_today(&self) -> AppResult<FollowUpToday> {
        self.get_json("/leads/follow-up-today").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let response = self
            .http
            .get(self.url(path))
            .header(USER_HEADER, &self.user_id)
            .send()
            .await?;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> AppResult<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| value.get("message").and_then(|m| m.as_str()).map(ToString::to_string))
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        return Err(AppError::Upstream(message));
    }
    serde_json::from_str(&body).map_err(|error| AppError::Upstream(format!("Unexpected response: {}", error)))
}

impl SheetSyncTransport for ApiClient {
    fn sync_sheet(&self, sheet_url: String) -> SyncFuture {
        let client = self.clone();
        Box::pin(async move { ApiClient::sync_sheet(&client, &sheet_url).await })
    }
}
