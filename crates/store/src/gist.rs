use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{StoreError, WatermarkMap, WatermarkStore};

#[derive(Debug, Clone)]
pub struct GistStoreConfig {
    /// API root, e.g. `https://api.github.com`.
    pub api_url: String,
    pub gist_id: String,
    pub token: String,
    /// File inside the gist holding the document.
    pub filename: String,
    pub timeout: Duration,
}

/// Watermark document stored as one file of a GitHub Gist.
///
/// Loads with `GET /gists/{id}` and saves with `PATCH /gists/{id}`, replacing
/// the file's whole content.  The gist API has no conditional update, so two
/// overlapping runs are last-writer-wins; runs must be serialised by the
/// caller.
#[derive(Debug, Clone)]
pub struct GistStore {
    client: Client,
    config: GistStoreConfig,
}

impl GistStore {
    pub fn new(config: GistStoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("notifybot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    fn gist_url(&self) -> String {
        format!(
            "{}/gists/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.gist_id
        )
    }

    fn auth_header(&self) -> String {
        format!("token {}", self.config.token)
    }

    /// GitHub truncates large file bodies in the gist listing; fetch the raw
    /// file in that case.
    async fn fetch_raw(&self, raw_url: &str) -> Result<String, StoreError> {
        let response = self
            .client
            .get(raw_url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl WatermarkStore for GistStore {
    fn describe(&self) -> String {
        format!("gist {}/{}", self.config.gist_id, self.config.filename)
    }

    async fn load(&self) -> Result<WatermarkMap, StoreError> {
        let response = self
            .client
            .get(self.gist_url())
            .header("Authorization", self.auth_header())
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;
        let response = check_status(response).await?;

        let gist: GistResponse = response
            .json()
            .await
            .map_err(|err| StoreError::Unavailable(format!("unexpected gist response: {err}")))?;
        let file = gist.files.get(&self.config.filename).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "gist {} has no file named {}",
                self.config.gist_id, self.config.filename
            ))
        })?;

        let raw = match (&file.content, file.truncated, &file.raw_url) {
            (Some(content), false, _) => content.clone(),
            (_, _, Some(raw_url)) => {
                debug!(raw_url, "gist file truncated; fetching raw content");
                self.fetch_raw(raw_url).await?
            }
            (Some(content), true, None) => content.clone(),
            (None, _, None) => {
                return Err(StoreError::Corrupt(format!(
                    "gist file {} has no content",
                    self.config.filename
                )));
            }
        };

        WatermarkMap::parse(&raw)
    }

    async fn save(&self, map: &WatermarkMap) -> Result<(), StoreError> {
        let content = map.render()?;
        let mut files = HashMap::new();
        files.insert(self.config.filename.as_str(), GistFileUpdate { content: &content });

        let response = self
            .client
            .patch(self.gist_url())
            .header("Authorization", self.auth_header())
            .header("Accept", "application/vnd.github+json")
            .json(&GistUpdateRequest { files })
            .send()
            .await?;
        check_status(response).await?;

        info!(gist = %self.config.gist_id, bytes = content.len(), "watermark document saved");
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let hint = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => " (check the gist token)",
        StatusCode::NOT_FOUND => " (check the gist id)",
        _ => "",
    };
    Err(StoreError::Unavailable(format!(
        "gist API returned {status}{hint}: {}",
        body.trim()
    )))
}

#[derive(Debug, Deserialize)]
struct GistResponse {
    files: HashMap<String, GistFile>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    raw_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct GistUpdateRequest<'a> {
    files: HashMap<&'a str, GistFileUpdate<'a>>,
}

#[derive(Debug, Serialize)]
struct GistFileUpdate<'a> {
    content: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOC: &str = r#"{"communities": [
        {"community_name": "rust", "last_processed_id": 100,
         "watchers": [{"user_id": 1, "thread_id": 10}]}
    ]}"#;

    fn store_for(server: &MockServer) -> GistStore {
        GistStore::new(GistStoreConfig {
            api_url: server.uri(),
            gist_id: "g1".to_string(),
            token: "secret".to_string(),
            filename: "notifybot.json".to_string(),
            timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn load_reads_named_file_with_token_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gists/g1"))
            .and(header("Authorization", "token secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": {
                    "other.txt": {"content": "ignored"},
                    "notifybot.json": {"content": DOC, "truncated": false}
                }
            })))
            .mount(&server)
            .await;

        let map = store_for(&server).load().await.unwrap();
        assert_eq!(map.communities[0].last_processed_id, 100);
    }

    #[tokio::test]
    async fn load_follows_raw_url_when_truncated() {
        let server = MockServer::start().await;
        let raw_url = format!("{}/raw/notifybot.json", server.uri());
        Mock::given(method("GET"))
            .and(path("/gists/g1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": {"notifybot.json": {"content": "{\"commun", "truncated": true, "raw_url": raw_url}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/raw/notifybot.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DOC))
            .mount(&server)
            .await;

        let map = store_for(&server).load().await.unwrap();
        assert_eq!(map.communities.len(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_corrupt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gists/g1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"files": {}})))
            .mount(&server)
            .await;

        assert!(store_for(&server).load().await.unwrap_err().is_corrupt());
    }

    #[tokio::test]
    async fn auth_failure_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gists/g1"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Bad credentials"))
            .mount(&server)
            .await;

        let err = store_for(&server).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(err.to_string().contains("gist token"));
    }

    #[tokio::test]
    async fn save_patches_whole_file() {
        let server = MockServer::start().await;
        let map = WatermarkMap::parse(DOC).unwrap();
        let rendered = map.render().unwrap();
        Mock::given(method("PATCH"))
            .and(path("/gists/g1"))
            .and(header("Authorization", "token secret"))
            .and(body_partial_json(json!({
                "files": {"notifybot.json": {"content": rendered}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        store_for(&server).save(&map).await.unwrap();
    }

    #[tokio::test]
    async fn save_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/gists/g1"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = store_for(&server).save(&WatermarkMap::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
