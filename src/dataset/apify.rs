//! Apify platform API client for datasets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{DatasetClient, ListOptions};
use crate::error::{ExportError, ExportResult};
use crate::models::Record;

/// Default API endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.apify.com";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetInfo {
    item_count: u64,
}

/// HTTP client for the `/v2/datasets` endpoints.
#[derive(Clone)]
pub struct ApifyClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl ApifyClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> ExportResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ExportError::config(format!("invalid API base URL {base_url}: {e}")))?;
        let client = Client::builder()
            .user_agent(concat!("dsexport/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| ExportError::config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Underlying HTTP client, shared with the key-value store.
    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Build `<base>/v2/<segments...>` with each segment percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v2").extend(segments);
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub(crate) fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(url))
    }

    pub(crate) fn put(&self, url: Url) -> reqwest::RequestBuilder {
        self.authorize(self.client.put(url))
    }

    pub(crate) fn delete(&self, url: Url) -> reqwest::RequestBuilder {
        self.authorize(self.client.delete(url))
    }
}

#[async_trait]
impl DatasetClient for ApifyClient {
    async fn item_count(&self, dataset_id: &str) -> ExportResult<u64> {
        let url = self.endpoint(&["datasets", dataset_id]);
        let response = self
            .get(url)
            .send()
            .await
            .map_err(|e| ExportError::fetch(dataset_id, 0, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ExportError::fetch(dataset_id, 0, "dataset not found"));
        }
        let response = response
            .error_for_status()
            .map_err(|e| ExportError::fetch(dataset_id, 0, e))?;
        let info: Envelope<DatasetInfo> = response
            .json()
            .await
            .map_err(|e| ExportError::fetch(dataset_id, 0, e))?;

        Ok(info.data.item_count)
    }

    async fn list_items(
        &self,
        dataset_id: &str,
        options: &ListOptions,
    ) -> ExportResult<Vec<Record>> {
        let mut url = self.endpoint(&["datasets", dataset_id, "items"]);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("format", "json")
                .append_pair("offset", &options.offset.to_string())
                .append_pair("limit", &options.limit.to_string());
            if let Some(fields) = &options.fields {
                query.append_pair("fields", &fields.join(","));
            }
        }

        let fail = |e: reqwest::Error| ExportError::fetch(dataset_id, options.offset, e);
        self.get(url)
            .send()
            .await
            .map_err(fail)?
            .error_for_status()
            .map_err(fail)?
            .json::<Vec<Record>>()
            .await
            .map_err(fail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApifyClient {
        ApifyClient::new(DEFAULT_API_BASE_URL, None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let url = client().endpoint(&["datasets", "user~my dataset", "items"]);
        assert_eq!(
            url.as_str(),
            "https://api.apify.com/v2/datasets/user~my%20dataset/items"
        );
    }

    #[test]
    fn test_endpoint_with_base_path() {
        let client =
            ApifyClient::new("http://localhost:8080/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.endpoint(&["datasets", "abc"]).as_str(),
            "http://localhost:8080/v2/datasets/abc"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = ApifyClient::new("not a url", None, Duration::from_secs(1))
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_dataset_info_parsing() {
        let info: Envelope<DatasetInfo> =
            serde_json::from_str(r#"{"data": {"id": "x", "itemCount": 1234}}"#).unwrap();
        assert_eq!(info.data.item_count, 1234);
    }
}
