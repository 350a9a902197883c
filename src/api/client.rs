use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use super::ApiError;
use crate::backoff::Backoff;
use crate::config::ApiConfig;
use crate::notification::{Notification, NotificationId, UserId};

/// Response body of `GET /notifications`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NotificationPage {
    #[serde(default)]
    pub data: Vec<Notification>,
    #[serde(rename = "unreadCount", default)]
    pub unread_count: usize,
}

/// Pull-side operations against the Notification Store, scoped by user.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Complete current list for `user`. `show_all` selects full history
    /// instead of the recent scope.
    async fn fetch_notifications(
        &self,
        user: &UserId,
        show_all: bool,
    ) -> Result<NotificationPage, ApiError>;

    /// Set `isRead = true` on `user`'s viewer entry of one notification.
    async fn mark_read(&self, id: &NotificationId, user: &UserId) -> Result<(), ApiError>;

    /// Mark every unread, non-archived notification of `user` in one request.
    async fn mark_all_read(&self, user: &UserId) -> Result<(), ApiError>;
}

#[derive(Serialize)]
struct MarkReadBody<'a> {
    #[serde(rename = "userId")]
    user_id: &'a UserId,
}

#[derive(Deserialize)]
struct MutationAck {
    success: Option<bool>,
    message: Option<String>,
}

pub struct HttpNotificationApi {
    client: reqwest::Client,
    base_url: String,
    retry_count: u32,
    retry: Backoff,
}

impl HttpNotificationApi {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        if config.base_url.trim().is_empty() {
            return Err(ApiError::Config("api base url cannot be empty".to_string()));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        if let Some(token) = &config.auth_token {
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|e| ApiError::Config(format!("invalid auth token: {e}")))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            retry_count: config.retry_count,
            retry: config.retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut send: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            match send().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.retry_count => {
                    let delay: Duration = self.retry.delay(attempt);
                    warn!(
                        "{operation} failed (attempt {}/{}): {error}, retrying in {delay:?}",
                        attempt + 1,
                        self.retry_count + 1,
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn fetch_once(&self, user: &UserId, show_all: bool) -> Result<NotificationPage, ApiError> {
        let mut url = format!(
            "{}/notifications?byUser={}",
            self.base_url,
            urlencoding::encode(user.as_str())
        );
        if show_all {
            url.push_str("&limit=all");
        }
        trace!("GET {url}");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            ApiError::InvalidResponse(format!("failed to parse notifications page: {e}"))
        })
    }

    async fn patch_once(&self, url: &str, user: &UserId) -> Result<(), ApiError> {
        trace!("PATCH {url}");
        let response = self
            .client
            .patch(url)
            .json(&MarkReadBody { user_id: user })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        // Some deployments answer 200 with `{ success: false }`.
        if let Ok(ack) = serde_json::from_str::<MutationAck>(&body) {
            if ack.success == Some(false) {
                return Err(ApiError::Rejected(
                    ack.message.unwrap_or_else(|| "mutation not applied".to_string()),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn fetch_notifications(
        &self,
        user: &UserId,
        show_all: bool,
    ) -> Result<NotificationPage, ApiError> {
        let page = self
            .with_retry("fetch notifications", move || self.fetch_once(user, show_all))
            .await?;
        debug!(
            user = %user,
            show_all,
            count = page.data.len(),
            unread = page.unread_count,
            "fetched notifications"
        );
        Ok(page)
    }

    async fn mark_read(&self, id: &NotificationId, user: &UserId) -> Result<(), ApiError> {
        let endpoint = format!(
            "{}/notifications/{}/mark-read",
            self.base_url,
            urlencoding::encode(id.as_str())
        );
        let url = endpoint.as_str();
        self.with_retry("mark notification read", move || self.patch_once(url, user))
            .await
    }

    async fn mark_all_read(&self, user: &UserId) -> Result<(), ApiError> {
        let endpoint = format!("{}/notifications/mark-all-read", self.base_url);
        let url = endpoint.as_str();
        self.with_retry("mark all notifications read", move || self.patch_once(url, user))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{GET, PATCH};
    use httpmock::MockServer;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn api_for(server: &MockServer, retry_count: u32) -> HttpNotificationApi {
        HttpNotificationApi::new(&ApiConfig {
            base_url: server.base_url(),
            timeout_ms: 5_000,
            retry_count,
            auth_token: Some("secret".to_string()),
            retry: Backoff {
                base_delay_ms: 1,
                max_delay_ms: 5,
                jitter: false,
            },
        })
        .expect("http api should initialize")
    }

    #[tokio::test]
    async fn fetch_scopes_by_user_and_decodes_page() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/notifications")
                .query_param("byUser", "u1")
                .header("authorization", "Bearer secret");
            then.status(200).json_body(json!({
                "data": [{
                    "_id": "n1",
                    "message": "New proposal",
                    "type": "report",
                    "createdAt": "2024-05-01T08:00:00Z",
                    "viewers": []
                }],
                "unreadCount": 1
            }));
        });

        let page = api_for(&server, 0)
            .fetch_notifications(&"u1".into(), false)
            .await
            .expect("fetch should succeed");

        mock.assert();
        assert_eq!(page.unread_count, 1);
        assert_eq!(page.data[0].id.as_str(), "n1");
    }

    #[tokio::test]
    async fn show_all_adds_limit_all() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/notifications")
                .query_param("byUser", "u1")
                .query_param("limit", "all");
            then.status(200).json_body(json!({ "data": [], "unreadCount": 0 }));
        });

        api_for(&server, 0)
            .fetch_notifications(&"u1".into(), true)
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn fetch_retries_server_errors() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/notifications");
            then.status(502).body("bad gateway");
        });

        let error = api_for(&server, 2)
            .fetch_notifications(&"u1".into(), false)
            .await
            .unwrap_err();

        mock.assert_hits(3);
        assert_eq!(
            error,
            ApiError::Status {
                status: 502,
                message: "bad gateway".to_string()
            }
        );
    }

    #[tokio::test]
    async fn malformed_page_is_invalid_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/notifications");
            then.status(200).body("<html>");
        });

        let error = api_for(&server, 3)
            .fetch_notifications(&"u1".into(), false)
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn mark_read_sends_user_scoped_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PATCH)
                .path("/notifications/n1/mark-read")
                .json_body(json!({ "userId": "u1" }));
            then.status(200).json_body(json!({ "success": true }));
        });

        api_for(&server, 0)
            .mark_read(&"n1".into(), &"u1".into())
            .await
            .expect("mark read should succeed");
        mock.assert();
    }

    #[tokio::test]
    async fn mark_read_success_false_is_rejection() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PATCH).path("/notifications/n1/mark-read");
            then.status(200)
                .json_body(json!({ "success": false, "message": "stale viewer" }));
        });

        let error = api_for(&server, 2)
            .mark_read(&"n1".into(), &"u1".into())
            .await
            .unwrap_err();
        assert_eq!(error, ApiError::Rejected("stale viewer".to_string()));
    }

    #[tokio::test]
    async fn mark_all_read_hits_bulk_endpoint() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PATCH)
                .path("/notifications/mark-all-read")
                .json_body(json!({ "userId": "u1" }));
            then.status(204);
        });

        api_for(&server, 0).mark_all_read(&"u1".into()).await.unwrap();
        mock.assert();
    }

    #[test]
    fn empty_base_url_is_config_error() {
        let result = HttpNotificationApi::new(&ApiConfig {
            base_url: "  ".to_string(),
            ..ApiConfig::default()
        });
        assert!(matches!(result, Err(ApiError::Config(_))));
    }
}
