use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use url::Url;

use crate::error::FetchError;

/// One page of search results: the declared total page count plus raw records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiPage {
    pub pages: u32,
    #[serde(default)]
    pub results: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Wrapped { response: ApiPage },
    Bare(ApiPage),
}

impl ApiPage {
    /// Accepts both `{"response": {...}}` and a bare `{pages, results}` body.
    pub fn from_slice(page: u32, bytes: &[u8]) -> Result<Self, FetchError> {
        match serde_json::from_slice::<Payload>(bytes) {
            Ok(Payload::Wrapped { response }) | Ok(Payload::Bare(response)) => Ok(response),
            Err(e) => Err(FetchError::Parse { page, reason: e.to_string() }),
        }
    }
}

/// Where result pages come from. Pages are 1-based.
pub trait PageSource: Send + Sync + 'static {
    fn fetch_page(&self, page: u32) -> impl Future<Output = Result<ApiPage, FetchError>> + Send;
}

/// Fetches pages from the content API over HTTP.
#[derive(Clone)]
pub struct HttpPageSource {
    client: Client,
    base: Url,
    api_key: String,
    page_size: u32,
}

impl HttpPageSource {
    pub fn new(client: Client, base: Url, api_key: impl Into<String>, page_size: u32) -> Self {
        Self { client, base, api_key: api_key.into(), page_size }
    }

    pub fn page_url(&self, page: u32) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("page-size", &self.page_size.to_string())
            .append_pair("show-blocks", "all")
            .append_pair("api-key", &self.api_key);
        url
    }
}

impl PageSource for HttpPageSource {
    fn fetch_page(&self, page: u32) -> impl Future<Output = Result<ApiPage, FetchError>> + Send {
        let request = self.client.get(self.page_url(page));
        async move {
            let transport = |e: reqwest::Error| FetchError::Transport { page, reason: e.to_string() };
            let resp = request.send().await.map_err(transport)?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::Status { page, status: status.as_u16() });
            }
            let bytes = resp.bytes().await.map_err(transport)?;
            ApiPage::from_slice(page, &bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_and_bare_payloads() {
        let wrapped = br#"{"response":{"status":"ok","pages":12,"results":[{"id":"a"}]}}"#;
        let page = ApiPage::from_slice(1, wrapped).unwrap();
        assert_eq!(page.pages, 12);
        assert_eq!(page.results.len(), 1);

        let bare = br#"{"pages":3,"results":[]}"#;
        assert_eq!(ApiPage::from_slice(1, bare).unwrap().pages, 3);
    }

    #[test]
    fn malformed_payload_is_a_parse_error() {
        let err = ApiPage::from_slice(4, b"<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, FetchError::Parse { page: 4, .. }));
        let err = ApiPage::from_slice(5, br#"{"results":[]}"#).unwrap_err();
        assert!(matches!(err, FetchError::Parse { page: 5, .. }));
    }

    #[test]
    fn page_url_carries_query_parameters() {
        let base = Url::parse("https://content.example.com/search").unwrap();
        let source = HttpPageSource::new(Client::new(), base, "k3y", 50);
        let url = source.page_url(7);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("page".into(), "7".into())));
        assert!(pairs.contains(&("page-size".into(), "50".into())));
        assert!(pairs.contains(&("show-blocks".into(), "all".into())));
        assert!(pairs.contains(&("api-key".into(), "k3y".into())));
    }
}
