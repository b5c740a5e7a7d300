use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

/// Error string the API returns when the supplied password does not match.
pub const INVALID_PASSWORD: &str = "Invalid password";
/// Author label attached to every comment posted from this client.
pub const COMMENT_AUTHOR: &str = "User";

const COMMENT_KEY_PREFIX: &str = "COMMENT#";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default = "default_get_feed")]
    pub get_feed: String,
    #[serde(default = "default_upload_photo")]
    pub upload_photo: String,
    #[serde(default = "default_delete_photo")]
    pub delete_photo: String,
    #[serde(default = "default_add_comment")]
    pub add_comment: String,
    #[serde(default = "default_delete_comment")]
    pub delete_comment: String,
    #[serde(default = "default_add_like")]
    pub add_like: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            get_feed: default_get_feed(),
            upload_photo: default_upload_photo(),
            delete_photo: default_delete_photo(),
            add_comment: default_add_comment(),
            delete_comment: default_delete_comment(),
            add_like: default_add_like(),
        }
    }
}

fn default_get_feed() -> String {
    "getFeed".into()
}

fn default_upload_photo() -> String {
    "uploadPhoto".into()
}

fn default_delete_photo() -> String {
    "deletePhoto".into()
}

fn default_add_comment() -> String {
    "addComment".into()
}

fn default_delete_comment() -> String {
    "deleteComment".into()
}

fn default_add_like() -> String {
    "addLike".into()
}

#[derive(Debug, Clone)]
struct ResolvedEndpoints {
    get_feed: Url,
    upload_photo: Url,
    delete_photo: Url,
    add_comment: Url,
    delete_comment: Url,
    add_like: Url,
}

impl ResolvedEndpoints {
    fn resolve(base_url: &str, endpoints: &Endpoints) -> Result<Self> {
        let base = normalize_base(base_url)?;
        let join = |name: &str, path: &str| -> Result<Url> {
            let path = path.trim();
            if path.is_empty() {
                bail!("gallery: endpoint {name} is empty");
            }
            if let Ok(absolute) = Url::parse(path) {
                return Ok(absolute);
            }
            base.join(path.trim_start_matches('/'))
                .with_context(|| format!("gallery: resolve endpoint {name} ({path})"))
        };
        Ok(Self {
            get_feed: join("get_feed", &endpoints.get_feed)?,
            upload_photo: join("upload_photo", &endpoints.upload_photo)?,
            delete_photo: join("delete_photo", &endpoints.delete_photo)?,
            add_comment: join("add_comment", &endpoints.add_comment)?,
            delete_comment: join("delete_comment", &endpoints.delete_comment)?,
            add_like: join("add_like", &endpoints.add_like)?,
        })
    }
}

fn normalize_base(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("gallery: api base url required");
    }
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).with_context(|| format!("gallery: invalid api base url {trimmed:?}"))
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub endpoints: Endpoints,
    pub user_agent: String,
    pub timeout: Duration,
    pub upload_timeout: Duration,
    pub http_client: Option<HttpClient>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            endpoints: Endpoints::default(),
            user_agent: format!("galleria/{}", crate::VERSION),
            timeout: Duration::from_secs(30),
            upload_timeout: Duration::from_secs(120),
            http_client: None,
        }
    }
}

pub struct Client {
    http: HttpClient,
    upload_http: HttpClient,
    user_agent: String,
    endpoints: ResolvedEndpoints,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("gallery client user agent required");
        }
        let endpoints = ResolvedEndpoints::resolve(&config.base_url, &config.endpoints)?;

        let (http, upload_http) = match config.http_client {
            Some(client) => (client.clone(), client),
            None => (
                HttpClient::builder()
                    .timeout(config.timeout)
                    .build()
                    .context("gallery: build http client")?,
                HttpClient::builder()
                    .timeout(config.upload_timeout)
                    .build()
                    .context("gallery: build upload http client")?,
            ),
        };

        Ok(Client {
            http,
            upload_http,
            user_agent: config.user_agent,
            endpoints,
        })
    }

    pub fn feed(&self) -> Result<FeedResponse> {
        let resp = self
            .http
            .get(self.endpoints.get_feed.clone())
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .send()
            .context("gallery: request feed")?;
        decode(resp, "getFeed")
    }

    pub fn upload_photo(&self, request: &UploadRequest<'_>) -> Result<Ack> {
        self.post_json(&self.upload_http, &self.endpoints.upload_photo, request, "uploadPhoto")
    }

    pub fn delete_photo(&self, request: &DeletePhotoRequest<'_>) -> Result<Ack> {
        self.post_json(&self.http, &self.endpoints.delete_photo, request, "deletePhoto")
    }

    pub fn add_comment(&self, request: &AddCommentRequest<'_>) -> Result<CommentAck> {
        self.post_json(&self.http, &self.endpoints.add_comment, request, "addComment")
    }

    pub fn delete_comment(&self, request: &DeleteCommentRequest<'_>) -> Result<Ack> {
        self.post_json(&self.http, &self.endpoints.delete_comment, request, "deleteComment")
    }

    pub fn add_like(&self, request: &AddLikeRequest<'_>) -> Result<Ack> {
        self.post_json(&self.http, &self.endpoints.add_like, request, "addLike")
    }

    fn post_json<B, T>(&self, http: &HttpClient, url: &Url, body: &B, name: &str) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let resp = http
            .post(url.clone())
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .with_context(|| format!("gallery: request {name}"))?;
        decode(resp, name)
    }
}

// The API reports application failures inside the JSON envelope, sometimes with
// a non-2xx status. Only bodies that are not the envelope count as failures here.
fn decode<T: DeserializeOwned>(resp: Response, name: &str) -> Result<T> {
    let status = resp.status();
    let body = resp
        .text()
        .with_context(|| format!("gallery: read {name} response"))?;
    match serde_json::from_str(&body) {
        Ok(value) => Ok(value),
        Err(err) if status.is_success() => {
            Err(anyhow!(err).context(format!("gallery: decode {name} response")))
        }
        Err(_) => Err(anyhow!("gallery: {name} failed with status {status}: {}", snippet(&body))),
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    let mut out: String = trimmed.chars().take(200).collect();
    if trimmed.chars().count() > 200 {
        out.push('…');
    }
    out
}

/// Plaintext authorization value captured for a single action. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Returns `None` for an empty input, which callers treat as a cancelled prompt.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Opaque sort key the API uses to address a comment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommentKey(String);

impl CommentKey {
    pub fn for_timestamp(timestamp: &str) -> Self {
        Self(format!("{COMMENT_KEY_PREFIX}{timestamp}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Millis(i64),
    Text(String),
}

impl Timestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Timestamp::Text(text) => DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    text.parse::<i64>()
                        .ok()
                        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                }),
        }
    }

    pub fn display_local(&self) -> String {
        match self.to_datetime() {
            Some(dt) => dt
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            None => match self {
                Timestamp::Millis(ms) => ms.to_string(),
                Timestamp::Text(text) => text.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub post_id: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub comments: Vec<Comment>,
}

impl Post {
    pub fn caption_text(&self) -> &str {
        self.caption.as_deref().unwrap_or("")
    }

    pub fn posted_at(&self) -> String {
        self.timestamp
            .as_ref()
            .map(Timestamp::display_local)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub text: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub timestamp: String,
    #[serde(default = "default_comment_author")]
    pub username: String,
}

impl Comment {
    pub fn posted_at(&self) -> String {
        Timestamp::Text(self.timestamp.clone()).display_local()
    }
}

fn default_comment_author() -> String {
    COMMENT_AUTHOR.to_string()
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(text)) => text,
        Some(Raw::Int(value)) => value.to_string(),
        Some(Raw::Float(value)) => value.to_string(),
        None => String::new(),
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub posts: Vec<Post>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentAck {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub comment: Option<CreatedComment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedComment {
    #[serde(default, deserialize_with = "string_or_number")]
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct UploadRequest<'a> {
    pub image: &'a str,
    pub caption: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePhotoRequest<'a> {
    pub post_id: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCommentRequest<'a> {
    pub post_id: &'a str,
    pub username: &'a str,
    pub text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCommentRequest<'a> {
    pub post_id: &'a str,
    #[serde(rename = "commentSK")]
    pub comment_sk: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLikeRequest<'a> {
    pub post_id: &'a str,
    pub username: &'a str,
}
