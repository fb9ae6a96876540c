//! Serper web search, used to gather evidence snippets before answering.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SERPER_DEFAULT_URL: &str = "https://google.serper.dev/search";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub q: String,
    pub gl: String,
    pub hl: String,
    pub num: u32,
}

impl SearchQuery {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            gl: "br".into(),
            hl: "pt-br".into(),
            num: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub link: String,
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Serper API key is not configured")]
    MissingKey,
    #[error("search request failed: {0}")]
    Transport(String),
    #[error("search returned HTTP status {0}")]
    Status(u16),
    #[error("search response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Clone)]
pub struct SearchClient {
    client: Client,
    endpoint: String,
}

impl SearchClient {
    pub fn new(client: Client) -> Self {
        Self::with_endpoint(client, SERPER_DEFAULT_URL)
    }

    pub fn with_endpoint(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Organic results in ranking order.
    pub async fn search(
        &self,
        api_key: Option<&str>,
        query: &SearchQuery,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let api_key = api_key.ok_or(SearchError::MissingKey)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", api_key)
            .json(query)
            .send()
            .await
            .map_err(|err| SearchError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let body: SerperResponse = response
            .json()
            .await
            .map_err(|err| SearchError::Decode(err.to_string()))?;
        Ok(body.organic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_query_and_reads_organic_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "serper-key"))
            .and(body_json(serde_json::json!({
                "q": "capital do Equador",
                "gl": "br",
                "hl": "pt-br",
                "num": 5,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "searchParameters": { "q": "capital do Equador" },
                "organic": [
                    { "title": "Quito", "snippet": "Quito é a capital", "link": "https://a.example", "position": 1 },
                    { "title": "Equador" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SearchClient::with_endpoint(Client::new(), server.uri());
        let hits = client
            .search(Some("serper-key"), &SearchQuery::new("capital do Equador"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].snippet, "Quito é a capital");
        assert_eq!(hits[1].link, "");
    }

    #[tokio::test]
    async fn missing_organic_is_an_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = SearchClient::with_endpoint(Client::new(), server.uri());
        let hits = client
            .search(Some("k"), &SearchQuery::new("anything"))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn errors_are_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = SearchClient::with_endpoint(Client::new(), server.uri());
        let query = SearchQuery::new("q");
        assert!(matches!(
            client.search(None, &query).await,
            Err(SearchError::MissingKey)
        ));
        assert!(matches!(
            client.search(Some("k"), &query).await,
            Err(SearchError::Status(403))
        ));
    }
}
