use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::types::{FeedPage, RawItem};
use crate::{FeedFetcher, Item, NotifyError, Notifier, UpstreamError};

#[derive(Debug, Clone)]
pub struct SquabblesClientConfig {
    /// API root, e.g. `https://squabblr.co/api`.
    pub base_url: String,
    pub token: String,
    /// Account the bot posts messages as.
    pub bot_user_id: i64,
    /// Applied to every request.
    pub timeout: Duration,
}

/// HTTP client for the Squabbles REST API.
#[derive(Debug, Clone)]
pub struct SquabblesClient {
    client: Client,
    base_url: String,
    token: String,
    bot_user_id: i64,
}

impl SquabblesClient {
    pub fn new(config: SquabblesClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("notifybot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
            bot_user_id: config.bot_user_id,
        })
    }

    /// Site root used to build links when the API omits one.
    fn site_url(&self) -> &str {
        self.base_url
            .strip_suffix("/api")
            .unwrap_or(&self.base_url)
    }

    async fn get_feed(&self, url: String) -> Result<Vec<RawItem>, UpstreamError> {
        let mut request = self.client.get(&url);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let response = request.send().await.map_err(|err| UpstreamError::Transport {
            url: url.clone(),
            message: err.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                url,
                status: status.as_u16(),
                body: truncate(body.trim(), 300),
            });
        }

        let page: FeedPage = response.json().await.map_err(|err| UpstreamError::Decode {
            url: url.clone(),
            message: err.to_string(),
        })?;
        let items = page.into_items();
        debug!(url, count = items.len(), "feed fetched");
        Ok(items)
    }
}

#[async_trait]
impl FeedFetcher for SquabblesClient {
    async fn fetch_posts(&self, community: &str) -> Result<Vec<Item>, UpstreamError> {
        let url = format!("{}/s/{community}/posts?page=1&sort=new", self.base_url);
        let site = self.site_url().to_string();
        let items = self
            .get_feed(url)
            .await?
            .into_iter()
            .map(RawItem::normalize)
            .map(|mut item| {
                if item.url.is_none() {
                    item.url = Some(format!("{site}/s/{community}/posts/{}", item.id));
                }
                item
            })
            .collect();
        Ok(items)
    }

    async fn fetch_chat_messages(&self, community: &str) -> Result<Vec<Item>, UpstreamError> {
        let url = format!("{}/s/{community}/chat-messages", self.base_url);
        let items = self
            .get_feed(url)
            .await?
            .into_iter()
            .map(RawItem::normalize)
            .collect();
        Ok(items)
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    content: &'a str,
    user_id: i64,
}

#[async_trait]
impl Notifier for SquabblesClient {
    async fn send(&self, thread_id: i64, message: &str) -> Result<(), NotifyError> {
        let url = format!("{}/message-threads/{thread_id}/messages", self.base_url);
        let body = SendMessageRequest {
            content: message,
            user_id: self.bot_user_id,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .form(&body)
            .send()
            .await
            .map_err(|err| NotifyError::Transport {
                thread_id,
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                thread_id,
                status: status.as_u16(),
                body: truncate(body.trim(), 300),
            });
        }

        debug!(thread_id, "message delivered");
        Ok(())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}
