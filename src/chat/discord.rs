//! Discord REST client for a single text channel.
//!
//! Talks to the HTTP API directly (no gateway connection): every operation
//! the poller needs is a plain request authenticated with a `Bot` token.
//! Status codes are folded into [`ChatError`]:
//!   404       → NotFound
//!   401 / 403 → Forbidden
//!   429       → waited out (`retry_after`) and retried a few times
//!   anything else that is not 2xx, plus network and decode errors → Transient

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{ChatError, ChatSurface, Embed, MessageRef};
use crate::config::DiscordConfig;

/// Discord caps history pages and bulk deletes at 100 messages.
const PAGE_SIZE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Retries of a single request after a 429.
const MAX_RATE_LIMIT_RETRIES: u32 = 5;
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Milliseconds between the Unix epoch and the first second of 2015.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;
/// Bulk delete rejects messages older than two weeks; keep a margin.
const BULK_DELETE_MAX_AGE_HOURS: i64 = 14 * 24 - 1;

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    id: String,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    author: Option<UserInfo>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    global_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MemberInfo {
    user: UserInfo,
    #[serde(default)]
    nick: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoleInfo {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Transient(e.to_string())
    }
}

pub struct DiscordClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    channel_id: String,
    guild_id: Option<String>,
    bot_user_id: OnceCell<String>,
}

impl DiscordClient {
    /// Build a client and resolve the configured channel. Fails if the
    /// channel does not exist or the bot cannot see it.
    pub async fn connect(config: &DiscordConfig) -> Result<Self, ChatError> {
        let mut this = Self::new(config)?;

        let path = format!("/channels/{}", this.channel_id);
        let channel: ChannelInfo = decode(this.request(Method::GET, &path, &[], None).await?)?;
        info!(
            channel = %channel.id,
            name = channel.name.as_deref().unwrap_or("?"),
            guild = channel.guild_id.as_deref().unwrap_or("-"),
            "channel resolved"
        );
        this.guild_id = channel.guild_id;
        Ok(this)
    }

    fn new(config: &DiscordConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("DiscordBot (firstblood, ", env!("CARGO_PKG_VERSION"), ")"))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            channel_id: config.channel_id.to_string(),
            guild_id: None,
            bot_user_id: OnceCell::new(),
        })
    }

    /// One API call. A 429 is waited out and retried up to
    /// [`MAX_RATE_LIMIT_RETRIES`] times before it surfaces as `Transient`.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ChatError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;

        loop {
            let mut req = self
                .client
                .request(method.clone(), &url)
                .header("Authorization", format!("Bot {}", self.token));
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(body) = body {
                req = req.json(body);
            }

            let resp = req.send().await?;
            let status = resp.status().as_u16();
            match status {
                200..=299 => {}
                404 => return Err(ChatError::NotFound),
                401 | 403 => return Err(ChatError::Forbidden),
                429 if attempt < MAX_RATE_LIMIT_RETRIES => {
                    let header = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let text = resp.text().await.unwrap_or_default();
                    let wait = retry_delay(header.as_deref(), &text);
                    attempt += 1;
                    warn!(
                        path = path,
                        wait_ms = wait.as_millis() as u64,
                        attempt = attempt,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    continue;
                }
                _ => {
                    let text = resp.text().await.unwrap_or_default();
                    return Err(ChatError::Transient(format!(
                        "{} {} → {}: {}",
                        method, path, status, text
                    )));
                }
            }

            let text = resp.text().await?;
            if text.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| ChatError::Transient(format!("bad JSON from {}: {}", path, e)));
        }
    }

    fn messages_path(&self) -> String {
        format!("/channels/{}/messages", self.channel_id)
    }

    fn message_path(&self, msg: &MessageRef) -> String {
        format!("/channels/{}/messages/{}", self.channel_id, msg)
    }

    async fn post_message(&self, body: Value) -> Result<MessageRef, ChatError> {
        let path = self.messages_path();
        let msg: MessageInfo = decode(self.request(Method::POST, &path, &[], Some(&body)).await?)?;
        Ok(MessageRef(msg.id))
    }

    async fn bot_user_id(&self) -> Result<&str, ChatError> {
        self.bot_user_id
            .get_or_try_init(|| async {
                let me: UserInfo = decode(self.request(Method::GET, "/users/@me", &[], None).await?)?;
                Ok::<_, ChatError>(me.id)
            })
            .await
            .map(String::as_str)
    }

    /// Delete a batch of recent messages with one call; a single leftover
    /// goes through the plain delete. Falls back to one-by-one deletes if
    /// the bulk call is refused.
    async fn delete_batch(&self, ids: &[String]) -> usize {
        if ids.len() > 1 {
            let path = format!("{}/bulk-delete", self.messages_path());
            let body = json!({ "messages": ids });
            match self.request(Method::POST, &path, &[], Some(&body)).await {
                Ok(_) => return ids.len(),
                Err(e) => warn!(count = ids.len(), error = %e, "bulk delete failed, deleting one by one"),
            }
        }

        let mut removed = 0;
        for id in ids {
            match self.delete(&MessageRef(id.clone())).await {
                Ok(()) | Err(ChatError::NotFound) => removed += 1,
                Err(e) => warn!(msg_id = %id, error = %e, "failed to delete during purge"),
            }
        }
        removed
    }

    async fn find_member(&self, guild: &str, identifier: &str) -> Option<String> {
        if is_snowflake(identifier) {
            let path = format!("/guilds/{}/members/{}", guild, identifier);
            return match self.request(Method::GET, &path, &[], None).await {
                Ok(_) => Some(identifier.to_string()),
                Err(_) => None,
            };
        }

        let path = format!("/guilds/{}/members/search", guild);
        let query = [("query", identifier.to_string()), ("limit", "10".to_string())];
        let members: Vec<MemberInfo> = match self.request(Method::GET, &path, &query, None).await {
            Ok(v) => serde_json::from_value(v).ok()?,
            Err(e) => {
                debug!(error = %e, "member search failed");
                return None;
            }
        };
        members
            .into_iter()
            .find(|m| {
                m.user.username == identifier
                    || m.user.global_name.as_deref() == Some(identifier)
                    || m.nick.as_deref() == Some(identifier)
            })
            .map(|m| m.user.id)
    }

    async fn find_role(&self, guild: &str, identifier: &str) -> Option<String> {
        let path = format!("/guilds/{}/roles", guild);
        let roles: Vec<RoleInfo> = match self.request(Method::GET, &path, &[], None).await {
            Ok(v) => serde_json::from_value(v).ok()?,
            Err(e) => {
                debug!(error = %e, "role lookup failed");
                return None;
            }
        };
        roles
            .into_iter()
            .find(|r| r.id == identifier || r.name == identifier)
            .map(|r| r.id)
    }
}

#[async_trait]
impl ChatSurface for DiscordClient {
    async fn send_text(&self, content: &str) -> Result<MessageRef, ChatError> {
        self.post_message(json!({ "content": content })).await
    }

    async fn send_embed(&self, embed: &Embed) -> Result<MessageRef, ChatError> {
        self.post_message(json!({ "embeds": [embed] })).await
    }

    async fn edit_embed(&self, msg: &MessageRef, embed: &Embed) -> Result<(), ChatError> {
        let body = json!({ "embeds": [embed] });
        self.request(Method::PATCH, &self.message_path(msg), &[], Some(&body))
            .await
            .map(|_| ())
    }

    async fn fetch_content(&self, msg: &MessageRef) -> Result<String, ChatError> {
        let path = self.message_path(msg);
        let info: MessageInfo = decode(self.request(Method::GET, &path, &[], None).await?)?;
        Ok(info.content)
    }

    async fn delete(&self, msg: &MessageRef) -> Result<(), ChatError> {
        self.request(Method::DELETE, &self.message_path(msg), &[], None)
            .await
            .map(|_| ())
    }

    async fn purge_own_messages(&self) -> Result<usize, ChatError> {
        let me = self.bot_user_id().await?.to_string();
        let path = self.messages_path();
        let mut before: Option<String> = None;
        let mut removed = 0usize;

        loop {
            let mut query = vec![("limit", PAGE_SIZE.to_string())];
            if let Some(b) = &before {
                query.push(("before", b.clone()));
            }
            let page: Vec<MessageInfo> = decode(self.request(Method::GET, &path, &query, None).await?)?;
            let count = page.len();
            before = page.last().map(|m| m.id.clone());

            let now = Utc::now();
            let (recent, old): (Vec<String>, Vec<String>) = page
                .into_iter()
                .filter(|m| m.author.as_ref().map(|a| a.id.as_str()) == Some(me.as_str()))
                .map(|m| m.id)
                .partition(|id| bulk_deletable(id, now));

            removed += self.delete_batch(&recent).await;
            for id in old {
                removed += self.delete_batch(std::slice::from_ref(&id)).await;
            }

            if count < PAGE_SIZE {
                break;
            }
        }

        Ok(removed)
    }

    async fn resolve_mention(&self, identifier: &str) -> String {
        let Some(guild) = self.guild_id.as_deref() else {
            return format!("@{}", identifier);
        };

        if let Some(user_id) = self.find_member(guild, identifier).await {
            return format!("<@{}>", user_id);
        }
        if let Some(role_id) = self.find_role(guild, identifier).await {
            return format!("<@&{}>", role_id);
        }

        warn!(identifier = identifier, "mention target not found, using plain text");
        format!("@{}", identifier)
    }
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, ChatError> {
    serde_json::from_value(value)
        .map_err(|e| ChatError::Transient(format!("unexpected response shape: {}", e)))
}

fn is_snowflake(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// How long a 429 asks us to wait. The JSON body's `retry_after` is more
/// precise than the header, so it wins.
fn retry_delay(header: Option<&str>, body: &str) -> Duration {
    let secs = serde_json::from_str::<RateLimitBody>(body)
        .ok()
        .map(|b| b.retry_after)
        .or_else(|| header.and_then(|h| h.trim().parse::<f64>().ok()))
        .filter(|s| s.is_finite() && *s >= 0.0);

    match secs {
        Some(s) => Duration::from_secs_f64(s).min(MAX_RETRY_AFTER),
        None => DEFAULT_RETRY_AFTER,
    }
}

/// Creation time encoded in a snowflake ID.
fn snowflake_time(id: &str) -> Option<DateTime<Utc>> {
    let raw: u64 = id.parse().ok()?;
    let ms = (raw >> 22) as i64 + DISCORD_EPOCH_MS;
    Utc.timestamp_millis_opt(ms).single()
}

fn bulk_deletable(id: &str, now: DateTime<Utc>) -> bool {
    snowflake_time(id)
        .map(|t| now - t < ChronoDuration::hours(BULK_DELETE_MAX_AGE_HOURS))
        .unwrap_or(false)
}
