//! HTTP client for the Reddit OAuth API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use modsentry_core::{Action, ContentSource};
use modsentry_types::config::SourceConfig;
use modsentry_types::{Item, SecretString, SourceError};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::listing::{Listing, fullname};
use crate::status::{error_for_status, transport_error};

/// Refresh the bearer token this long before Reddit says it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Most listing pages followed in one call. Reddit stops serving a listing
/// after roughly 1000 entries anyway.
const MAX_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct RedditClient {
    http: reqwest::Client,
    auth_base_url: String,
    api_base_url: String,
    client_id: String,
    client_secret: SecretString,
    username: String,
    password: SecretString,
    fetch_limit: u32,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for RedditClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditClient")
            .field("api_base_url", &self.api_base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("username", &self.username)
            .field("password", &self.password)
            .finish()
    }
}

impl RedditClient {
    pub fn new(config: &SourceConfig) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            auth_base_url: config.auth_base_url.trim_end_matches('/').to_string(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            fetch_limit: config.fetch_limit.clamp(1, 100),
            token: Mutex::new(None),
        })
    }

    /// A valid bearer token, fetching a new one when none is cached or the
    /// cached one is about to expire.
    async fn bearer(&self) -> Result<String, SourceError> {
        let mut cached = self.token.lock().await;
        if let Some(tok) = cached.as_ref()
            && Instant::now() < tok.refresh_at
        {
            return Ok(tok.value.clone());
        }

        let url = format!("{}/api/v1/access_token", self.auth_base_url);
        debug!(%url, username = %self.username, "requesting access token");
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose()))
            .form(&[
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.expose()),
            ])
            .send()
            .await
            .map_err(|e| transport_error("access_token", e))?;

        if !response.status().is_success() {
            return Err(error_for_status("access_token", response).await);
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| transport_error("access_token", e))?;

        // Bad credentials come back as 200 with {"error": "invalid_grant"}.
        let value = match (body.access_token, body.error) {
            (_, Some(err)) => {
                return Err(SourceError::Permission(format!(
                    "access_token: token request rejected: {err}"
                )));
            }
            (Some(token), None) if !token.is_empty() => token,
            _ => {
                return Err(SourceError::Transient(
                    "access_token: response carried no token".into(),
                ));
            }
        };

        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(3600));
        let refresh_at = Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN);
        info!(expires_in_secs = lifetime.as_secs(), "reddit access token acquired");
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at,
        });
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Send an authorized request; on a 401 the token is refreshed and the
    /// request sent once more.
    async fn send(
        &self,
        what: &str,
        build: impl Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, SourceError> {
        for refreshed in [false, true] {
            let token = self.bearer().await?;
            let response = build(&self.http, &token)
                .send()
                .await
                .map_err(|e| transport_error(what, e))?;

            log_ratelimit(what, response.headers());

            if response.status() == reqwest::StatusCode::UNAUTHORIZED && !refreshed {
                warn!(op = what, "access token rejected, refreshing");
                self.invalidate_token().await;
                continue;
            }
            if !response.status().is_success() {
                return Err(error_for_status(what, response).await);
            }
            return Ok(response);
        }
        Err(SourceError::Permission(format!(
            "{what}: unauthorized after token refresh"
        )))
    }

    /// One page of the subreddit's newest comments, starting after `after`.
    async fn comments_page(
        &self,
        source_id: &str,
        after: Option<&str>,
    ) -> Result<Listing, SourceError> {
        let url = format!("{}/r/{}/comments", self.api_base_url, source_id);
        let limit = self.fetch_limit.to_string();
        let response = self
            .send("list", |http, token| {
                let mut req = http
                    .get(&url)
                    .bearer_auth(token)
                    .query(&[("limit", limit.as_str()), ("raw_json", "1")]);
                if let Some(after) = after {
                    req = req.query(&[("after", after)]);
                }
                req
            })
            .await?;
        response
            .json()
            .await
            .map_err(|e| transport_error("list", e))
    }

    /// Fetch a single comment's current state.
    async fn comment_info(&self, item_id: &str) -> Result<Listing, SourceError> {
        let url = format!("{}/api/info", self.api_base_url);
        let name = fullname(item_id);
        let response = self
            .send("info", |http, token| {
                http.get(&url)
                    .bearer_auth(token)
                    .query(&[("id", name.as_str()), ("raw_json", "1")])
            })
            .await?;
        response
            .json::<Listing>()
            .await
            .map_err(|e| transport_error("info", e))
    }

    /// Replace the content of wiki page `page` in `subreddit`.
    pub async fn edit_wiki(
        &self,
        subreddit: &str,
        page: &str,
        content: &str,
        reason: &str,
    ) -> Result<(), SourceError> {
        let url = format!("{}/r/{}/api/wiki/edit", self.api_base_url, subreddit);
        self.send("wiki_edit", |http, token| {
            http.post(&url)
                .bearer_auth(token)
                .form(&[("page", page), ("content", content), ("reason", reason)])
        })
        .await?;
        info!(subreddit, page, bytes = content.len(), "wiki page updated");
        Ok(())
    }
}

fn log_ratelimit(what: &str, headers: &reqwest::header::HeaderMap) {
    let remaining = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok());
    if let Some(remaining) = remaining
        && remaining < 5.0
    {
        warn!(op = what, remaining, "reddit request budget nearly spent");
    }
}

#[async_trait]
impl ContentSource for RedditClient {
    async fn list_new_items(
        &self,
        source_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Item>, SourceError> {
        // First run: the newest page is the starting window.
        let Some(since) = since else {
            let items = self.comments_page(source_id, None).await?.into_items();
            debug!(subreddit = source_id, count = items.len(), "listed comments");
            return Ok(items);
        };

        let mut items = Vec::new();
        let mut after: Option<String> = None;
        let mut pages = 0;
        loop {
            let listing = self.comments_page(source_id, after.as_deref()).await?;
            pages += 1;
            let next = listing.data.after.clone();
            let page = listing.into_items();
            let caught_up = page.is_empty() || page.iter().any(|i| i.created_at <= since);
            items.extend(page.into_iter().filter(|i| i.created_at > since));

            match next {
                Some(cursor) if !caught_up && !cursor.is_empty() => {
                    if pages >= MAX_PAGES {
                        warn!(
                            subreddit = source_id,
                            pages,
                            %since,
                            "listing page cap reached before the checkpoint; older comments are not fetched"
                        );
                        break;
                    }
                    after = Some(cursor);
                }
                _ => break,
            }
        }
        debug!(subreddit = source_id, pages, count = items.len(), "listed comments");
        Ok(items)
    }

    async fn apply_action(&self, item_id: &str, action: Action) -> Result<(), SourceError> {
        match action {
            Action::Remove => {
                let url = format!("{}/api/remove", self.api_base_url);
                let name = fullname(item_id);
                self.send("remove", |http, token| {
                    http.post(&url)
                        .bearer_auth(token)
                        .form(&[("id", name.as_str()), ("spam", "false")])
                })
                .await?;
                debug!(item_id, "remove accepted");
                Ok(())
            }
        }
    }

    async fn is_action_applied(&self, item_id: &str, action: Action) -> Result<bool, SourceError> {
        match action {
            Action::Remove => {
                let listing = self.comment_info(item_id).await?;
                let Some(thing) = listing.data.children.first() else {
                    return Err(SourceError::NotFound(format!("info: {}", fullname(item_id))));
                };
                Ok(thing.data.is_removed())
            }
        }
    }
}
