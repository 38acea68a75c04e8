//! reqwest implementation of the log API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::api::{AggregationBucket, ExportStatus, LogPage, LogQueryClient};
use crate::config::ApiConfig;
use crate::error::{ConsoleError, Result};
use crate::log_entry::{Filter, LogDraft, LogPatch, LogRecord};
use crate::session::{Session, SessionStore};
use crate::user::{NewUser, User, UserPatch, UserQuery};

/// Every API response is wrapped in `{success, message?, data?}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default = "Option::default")]
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn require(self, what: &str) -> Result<T> {
        self.data
            .ok_or_else(|| ConsoleError::Decode(format!("response has no {what}")))
    }
}

#[derive(Debug, Deserialize)]
struct LogData {
    log: LogRecord,
}

#[derive(Debug, Deserialize)]
struct UsersData {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    user: User,
}

#[derive(Debug, Deserialize)]
struct AggregationData {
    #[serde(default)]
    aggregation: Option<Aggregation>,
}

#[derive(Debug, Deserialize)]
struct Aggregation {
    #[serde(default)]
    buckets: Vec<AggregationBucket>,
}

#[derive(Debug, Deserialize)]
struct ExportJobData {
    #[serde(default)]
    job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    user: User,
    token: TokenData,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    access_token: String,
}

/// Error bodies come in a few shapes depending on which layer rejected us.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct HttpApi {
    client: Client,
    base_url: String,
    /// Parsed form of `base_url`, used when a path segment needs escaping.
    base: Url,
    session: Arc<SessionStore>,
}

impl HttpApi {
    pub fn new(config: &ApiConfig, session: Arc<SessionStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConsoleError::Config(format!("Failed to create HTTP client: {e}")))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| ConsoleError::Config(format!("invalid api.base_url {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ConsoleError::Config(format!(
                "api.base_url {base_url} cannot carry a path"
            )));
        }

        debug!("Log API client for {base_url}");

        Ok(Self {
            client,
            base_url,
            base,
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `{base}/logs/export/{job_id}[/download]` with the job id escaped as a
    /// single path segment.
    fn export_url(&self, job_id: &str, download: bool) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["logs", "export", job_id]);
            if download {
                segments.push("download");
            }
        }
        url
    }

    /// Build a request, attaching the bearer token when the session has one.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.authorized(self.client.request(method, self.url(path)))
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.session.token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<Envelope<T>> {
        let response = req.send().await?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let mut form = Vec::new();
        if !username.is_empty() {
            form.push(("username", username));
        }
        if !password.is_empty() {
            form.push(("password", password));
        }
        let req = self.request(Method::POST, "/auth/login").form(&form);
        let envelope: Envelope<LoginData> = self.send(req).await?;

        if envelope.success == Some(false) {
            return Err(ConsoleError::Unauthorized(
                envelope.message.unwrap_or_else(|| "Login failed".into()),
            ));
        }
        let data = envelope.require("login data")?;
        self.session.login(data.user, data.token.access_token)?;
        self.session
            .current()
            .ok_or_else(|| ConsoleError::Decode("session was not stored".into()))
    }

    /// Tell the server we are leaving, then clear the local session even if
    /// the server call fails.
    pub async fn logout(&self) -> Result<()> {
        if self.session.token().is_some() {
            let req = self.request(Method::POST, "/auth/logout");
            if let Err(e) = self.send::<serde_json::Value>(req).await {
                warn!("Server logout failed: {e}");
            }
        }
        self.session.logout()
    }

    pub async fn get_log(&self, id: &str) -> Result<LogRecord> {
        let req = self.request(Method::GET, &format!("/logs/{id}"));
        let envelope: Envelope<LogData> = self.send(req).await?;
        Ok(envelope.require("log")?.log)
    }

    pub async fn create_log(&self, draft: &LogDraft) -> Result<LogRecord> {
        draft.validate()?;
        let req = self.request(Method::POST, "/logs").json(draft);
        let envelope: Envelope<LogData> = self.send(req).await?;
        let log = envelope.require("log")?.log;
        info!("Created log {}", log.id);
        Ok(log)
    }

    pub async fn update_log(&self, id: &str, patch: &LogPatch) -> Result<LogRecord> {
        patch.validate()?;
        let req = self.request(Method::PATCH, &format!("/logs/{id}")).json(patch);
        let envelope: Envelope<LogData> = self.send(req).await?;
        Ok(envelope.require("log")?.log)
    }

    /// Returns whether the server confirmed the deletion.
    pub async fn delete_log(&self, id: &str) -> Result<bool> {
        let req = self.request(Method::DELETE, &format!("/logs/{id}"));
        let envelope: Envelope<serde_json::Value> = self.send(req).await?;
        Ok(envelope.success == Some(true))
    }

    pub async fn list_users(&self, query: &UserQuery) -> Result<Vec<User>> {
        let req = self
            .request(Method::GET, "/users")
            .query(&query.query_pairs());
        let envelope: Envelope<UsersData> = self.send(req).await?;
        Ok(envelope.data.map(|d| d.users).unwrap_or_default())
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        let req = self.request(Method::GET, &format!("/users/{id}"));
        let envelope: Envelope<UserData> = self.send(req).await?;
        Ok(envelope.require("user")?.user)
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<User> {
        user.validate()?;
        let req = self.request(Method::POST, "/users").json(user);
        let envelope: Envelope<UserData> = self.send(req).await?;
        let user = envelope.require("user")?.user;
        info!("Created user {}", user.username);
        Ok(user)
    }

    pub async fn update_user(&self, id: &str, patch: &UserPatch) -> Result<User> {
        patch.validate()?;
        let req = self.request(Method::PATCH, &format!("/users/{id}")).json(patch);
        let envelope: Envelope<UserData> = self.send(req).await?;
        Ok(envelope.require("user")?.user)
    }

    pub async fn delete_user(&self, id: &str) -> Result<bool> {
        let req = self.request(Method::DELETE, &format!("/users/{id}"));
        let envelope: Envelope<serde_json::Value> = self.send(req).await?;
        Ok(envelope.success == Some(true))
    }
}

#[async_trait]
impl LogQueryClient for HttpApi {
    async fn list_logs(&self, limit: u32, offset: u64, filter: &Filter) -> Result<LogPage> {
        filter.validate()?;
        let mut params = filter.query_pairs();
        params.push(("limit", limit.to_string()));
        params.push(("offset", offset.to_string()));

        debug!("GET /logs limit={limit} offset={offset}");
        let req = self.request(Method::GET, "/logs").query(&params);
        let envelope: Envelope<LogPage> = self.send(req).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    async fn aggregate_logs(
        &self,
        dimension: &str,
        filter: &Filter,
    ) -> Result<Vec<AggregationBucket>> {
        filter.validate()?;
        let req = self
            .request(Method::GET, &format!("/logs/aggregate/by/{dimension}"))
            .query(&filter.query_pairs());
        let envelope: Envelope<AggregationData> = self.send(req).await?;
        Ok(envelope
            .data
            .and_then(|d| d.aggregation)
            .map(|a| a.buckets)
            .unwrap_or_default())
    }

    async fn enqueue_export(&self, filter: &Filter) -> Result<String> {
        filter.validate()?;
        let req = self
            .request(Method::POST, "/logs/export")
            .query(&filter.query_pairs());
        let envelope: Envelope<ExportJobData> = self.send(req).await?;
        envelope
            .data
            .and_then(|d| d.job_id)
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConsoleError::EnqueueRejected)
    }

    async fn export_status(&self, job_id: &str) -> Result<ExportStatus> {
        let req = self.authorized(self.client.get(self.export_url(job_id, false)));
        let envelope: Envelope<ExportStatus> = self.send(req).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    fn download_url(&self, job_id: &str) -> String {
        self.export_url(job_id, true).to_string()
    }
}

/// Turn a non-success response into the matching error, carrying the
/// server's message when it sent one.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| {
            b.message.or_else(|| {
                b.detail.map(|d| match d {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
            })
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    Err(ConsoleError::from_status(status.as_u16(), message))
}
