/// Object store reached over plain HTTP (S3-compatible gateway)
///
/// Two namespaces share one bucket: image uploads under `poi-images/` and
/// job result documents under `rcmnd_job/`. Retention is the store's
/// concern; it expires images after 24 hours and job results after 48.
use std::time::Duration;

use reqwest::Client as HttpClient;

use crate::config::Config;
use crate::error::{AppError, AppResult};

use super::ObjectStore;

const STORE_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct HttpObjectStore {
    http_client: HttpClient,
    base_url: String,
    api_key: Option<String>,
}

impl HttpObjectStore {
    pub fn new(config: &Config) -> AppResult<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(STORE_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.storage_base_url.trim_end_matches('/').to_string(),
            api_key: config.storage_api_key.clone(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> AppResult<String> {
        let url = self.object_url(key);

        let response = self
            .authorize(self.http_client.put(&url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Storage(format!(
                "PUT {} returned {}",
                key,
                response.status()
            )));
        }

        tracing::debug!(key = %key, "object stored");
        Ok(url)
    }

    async fn get_object(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        let url = self.object_url(key);

        let response = self.authorize(self.http_client.get(&url)).send().await?;

        // Not-found is a normal outcome: a job result that has not been
        // written yet reads as "still processing" upstream
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Storage(format!(
                "GET {} returned {}",
                key,
                response.status()
            )));
        }

        Ok(Some(response.bytes().await?.to_vec()))
    }
}
