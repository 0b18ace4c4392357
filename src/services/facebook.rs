use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use sha2::Sha256;

/// A failed publish attempt, with the Graph API error body when one was returned.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct PublishError {
    pub message: String,
    pub details: Option<Value>,
}

impl PublishError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    fn transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(format!("Facebook API request timed out: {}", err))
        } else {
            Self::new(format!("HTTP error: {}", err))
        }
    }
}

impl From<FacebookError> for PublishError {
    fn from(err: FacebookError) -> Self {
        match err {
            FacebookError::Http(e) => PublishError::transport(e),
            FacebookError::Api { status, details } => PublishError {
                message: match &details {
                    Some(body) => format!("Facebook API error: {}", body),
                    None => format!("Facebook API error: status {}", status),
                },
                details,
            },
            FacebookError::Decode { status } => PublishError::new(format!(
                "Facebook API returned an unreadable response (status {})",
                status
            )),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FacebookError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Facebook API error (status {status})")]
    Api {
        status: StatusCode,
        details: Option<Value>,
    },
    #[error("Facebook API returned an unreadable response (status {status})")]
    Decode { status: StatusCode },
}

impl FacebookError {
    /// Decoded error body, if the API sent one
    pub fn details(&self) -> Option<&Value> {
        match self {
            FacebookError::Api { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}

/// Outbound page publishing.
///
/// Implemented by [`FacebookClient`]; the scheduler only depends on this trait.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one post. An image turns the post into a photo post with the
    /// message as its caption. Empty strings are treated as absent.
    async fn publish(
        &self,
        page_id: &str,
        access_token: &str,
        message: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<Value, PublishError>;
}

#[derive(Clone)]
pub struct FacebookClient {
    graph_base: String,
    app_secret: Option<String>,
    http: Client,
}

impl FacebookClient {
    pub fn new(
        graph_base: &str,
        app_secret: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            graph_base: graph_base.trim_end_matches('/').to_string(),
            app_secret: app_secret.map(str::to_string),
            http: Client::builder().timeout(timeout).build()?,
        })
    }

    /// `appsecret_proof` for a token, when an app secret is configured
    fn proof(&self, access_token: &str) -> Option<String> {
        self.app_secret
            .as_deref()
            .and_then(|secret| appsecret_proof(secret, access_token))
    }

    fn page_url(&self, page_id: &str, edge: Option<&str>) -> String {
        match edge {
            Some(edge) => format!("{}/{}/{}", self.graph_base, percent_encode(page_id), edge),
            None => format!("{}/{}", self.graph_base, percent_encode(page_id)),
        }
    }

    async fn get_json(
        &self,
        url: &str,
        access_token: &str,
        fields: &[(&str, &str)],
    ) -> Result<Value, FacebookError> {
        let mut query: Vec<(&str, String)> = fields
            .iter()
            .map(|(k, v)| (*k, (*v).to_string()))
            .collect();
        query.push(("access_token", access_token.to_string()));
        if let Some(proof) = self.proof(access_token) {
            query.push(("appsecret_proof", proof));
        }

        let resp = self.http.get(url).query(&query).send().await?;
        decode(resp).await
    }

    /// Validate a page token by reading the page's id and name
    pub async fn page_status(&self, page_id: &str, access_token: &str) -> Result<Value, FacebookError> {
        self.get_json(&self.page_url(page_id, None), access_token, &[("fields", "id,name")])
            .await
    }

    /// Fetch page fields and the five most recent posts with engagement summaries
    pub async fn fetch_page_analysis(
        &self,
        page_id: &str,
        access_token: &str,
    ) -> Result<PageAnalysis, FacebookError> {
        let page = self
            .get_json(
                &self.page_url(page_id, None),
                access_token,
                &[("fields", "name,about,fan_count,followers_count")],
            )
            .await?;

        let posts = self
            .get_json(
                &self.page_url(page_id, Some("posts")),
                access_token,
                &[
                    ("limit", "5"),
                    (
                        "fields",
                        "message,created_time,full_picture,\
                         attachments{media,media_type,url,subattachments{media}},\
                         reactions.summary(true).limit(0),comments.summary(true).limit(0),shares",
                    ),
                ],
            )
            .await?;

        Ok(PageAnalysis { page, posts })
    }
}

#[async_trait]
impl Publisher for FacebookClient {
    async fn publish(
        &self,
        page_id: &str,
        access_token: &str,
        message: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<Value, PublishError> {
        let message = message.filter(|m| !m.is_empty());
        let image_url = image_url.filter(|u| !u.is_empty());

        let mut form: Vec<(&str, String)> = Vec::new();
        let url = match image_url {
            Some(image) => {
                form.push(("url", image.to_string()));
                if let Some(caption) = message {
                    form.push(("caption", caption.to_string()));
                }
                self.page_url(page_id, Some("photos"))
            }
            None => {
                if let Some(message) = message {
                    form.push(("message", message.to_string()));
                }
                self.page_url(page_id, Some("feed"))
            }
        };

        form.push(("access_token", access_token.to_string()));
        form.push(("published", "true".to_string()));
        if let Some(proof) = self.proof(access_token) {
            form.push(("appsecret_proof", proof));
        }

        let resp = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(PublishError::transport)?;

        Ok(decode(resp).await?)
    }
}

/// Raw analytics payloads as returned by the Graph API
#[derive(Debug, Clone)]
pub struct PageAnalysis {
    pub page: Value,
    pub posts: Value,
}

impl PageAnalysis {
    /// Snapshot document stored per poll
    pub fn into_snapshot(self, ts_millis: i64) -> Value {
        json!({ "ts": ts_millis, "page": self.page, "posts": self.posts })
    }
}

async fn decode(resp: reqwest::Response) -> Result<Value, FacebookError> {
    let status = resp.status();
    let body = resp.text().await?;
    let parsed: Option<Value> = serde_json::from_str(&body).ok();

    if !status.is_success() {
        return Err(FacebookError::Api {
            status,
            details: parsed,
        });
    }

    parsed.ok_or(FacebookError::Decode { status })
}

/// Hex HMAC-SHA256 of the access token keyed by the app secret
pub fn appsecret_proof(app_secret: &str, access_token: &str) -> Option<String> {
    if app_secret.is_empty() || access_token.is_empty() {
        return None;
    }
    let mut mac = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()).ok()?;
    mac.update(access_token.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn percent_encode(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s, percent_encoding::NON_ALPHANUMERIC).to_string()
}
