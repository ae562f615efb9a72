use super::{
    Upstream,
    UpstreamFuture,
};
use crate::error::{
    CollectError,
    MappingError,
};
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// `reqwest` client for the SimpleMDM API. The API key is sent as the basic-auth user with an empty password.
#[derive(Clone)]
pub struct ApiClient {
    http_client: HttpClient,
    base_url: Url,
    api_key: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(base_url: Url, api_key: impl Into<String>, request_timeout: Duration) -> Result<Self, CollectError> {
        let http_client = HttpClient::builder()
            .timeout(request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| CollectError::Transport {
                path: base_url.to_string(),
                source,
            })?;

        Ok(Self {
            http_client,
            base_url: with_trailing_slash(base_url),
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> Result<Url, MappingError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| MappingError::Malformed {
                field: "path".to_string(),
                reason: format!("cannot join {path} onto {}: {e}", self.base_url),
            })
    }

    async fn fetch(&self, path: &str, query: &[(&'static str, String)]) -> Result<Value, CollectError> {
        let url = self.url_for(path)?;
        trace!(%url, ?query, "GET");

        let transport_error = |source| CollectError::Transport {
            path: path.to_string(),
            source,
        };

        let response = self
            .http_client
            .get(url)
            .basic_auth(&self.api_key, Some(""))
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollectError::Upstream {
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await.map_err(transport_error)?;
        let value = serde_json::from_slice(&body).map_err(|e| MappingError::Malformed {
            field: path.to_string(),
            reason: format!("response is not JSON: {e}"),
        })?;
        Ok(value)
    }
}

impl Upstream for ApiClient {
    fn get<'a>(&'a self, path: &'a str, query: &'a [(&'static str, String)]) -> UpstreamFuture<'a> {
        Box::pin(self.fetch(path, query))
    }
}

/// `Url::join` drops the last path segment unless the base ends with a slash.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn joins_resource_paths_below_the_api_version() {
        let base = Url::parse("https://a.simplemdm.com/api/v1").unwrap();
        let client = ApiClient::new(base, "secret", Duration::from_secs(5)).unwrap();

        assert_eq!(client.base_url().as_str(), "https://a.simplemdm.com/api/v1/");
        assert_eq!(
            client.url_for("devices").unwrap().as_str(),
            "https://a.simplemdm.com/api/v1/devices"
        );
        assert_eq!(
            client.url_for("/dep_servers/7/dep_devices").unwrap().as_str(),
            "https://a.simplemdm.com/api/v1/dep_servers/7/dep_devices"
        );
    }

    #[test]
    fn debug_output_hides_the_api_key() {
        let base = Url::parse("https://a.simplemdm.com/api/v1/").unwrap();
        let client = ApiClient::new(base, "very-secret", Duration::from_secs(5)).unwrap();
        assert!(!format!("{client:?}").contains("very-secret"));
    }
}
