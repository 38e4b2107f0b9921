//! Event catalog client for the competition scoring server
//!
//! The scoring server lists its events at `/api/v1/events/` and describes each
//! one at `/api/v1/events/{code}/`. Only the code and display name are used.

use futures::future::try_join_all;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::constants::catalog::EVENTS_PATH;

/// One event as described by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_code: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventCodes {
    event_codes: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("'{0}' is not a usable catalog host")]
    InvalidHost(String),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered {status}")]
    Status { url: String, status: StatusCode },

    #[error("unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

pub struct EventCatalogClient {
    http: Client,
    base: Url,
}

impl EventCatalogClient {
    /// Client for the catalog served at `http://{host}`; `host` may carry a port
    pub fn new(host: &str) -> Result<Self, CatalogError> {
        let invalid = || CatalogError::InvalidHost(host.to_string());
        if host.trim().is_empty() || host.contains(['/', '?', '#']) {
            return Err(invalid());
        }
        let base = Url::parse(&format!("http://{host}/")).map_err(|_| invalid())?;
        Ok(Self {
            http: Client::new(),
            base,
        })
    }

    /// Codes of every event the server knows, in server order
    pub async fn list_event_codes(&self) -> Result<Vec<String>, CatalogError> {
        let codes: EventCodes = self.get(&[]).await?;
        debug!(count = codes.event_codes.len(), "Fetched event codes");
        Ok(codes.event_codes)
    }

    pub async fn event(&self, code: &str) -> Result<Event, CatalogError> {
        self.get(&[code]).await
    }

    /// All events, details fetched concurrently, in code order
    pub async fn fetch_events(&self) -> Result<Vec<Event>, CatalogError> {
        let codes = self.list_event_codes().await?;
        let events = try_join_all(codes.iter().map(|code| self.event(code))).await?;
        info!(host = %self.base, count = events.len(), "Fetched events");
        Ok(events)
    }

    /// `{base}/api/v1/events/{segments..}/` with each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.clear()
                .extend(EVENTS_PATH.split('/'))
                .extend(segments)
                .push("");
        }
        url
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, CatalogError> {
        let url = self.endpoint(segments);
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| CatalogError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                url: url.to_string(),
                status,
            });
        }

        response.json().await.map_err(|source| CatalogError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn catalog() -> (MockServer, EventCatalogClient) {
        let server = MockServer::start().await;
        let client = EventCatalogClient::new(&server.address().to_string()).unwrap();
        (server, client)
    }

    async fn serve(server: &MockServer, route: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_endpoint_paths() {
        let client = EventCatalogClient::new("scoring.local:8080").unwrap();
        assert_eq!(client.endpoint(&[]).as_str(), "http://scoring.local:8080/api/v1/events/");
        assert_eq!(
            client.endpoint(&["USCAFFL"]).as_str(),
            "http://scoring.local:8080/api/v1/events/USCAFFL/"
        );
        assert_eq!(client.endpoint(&["A/B"]).as_str(), "http://scoring.local:8080/api/v1/events/A%2FB/");
    }

    #[test]
    fn test_rejects_unusable_host() {
        assert!(matches!(EventCatalogClient::new(""), Err(CatalogError::InvalidHost(_))));
        assert!(matches!(EventCatalogClient::new("host/path"), Err(CatalogError::InvalidHost(_))));
        assert!(matches!(EventCatalogClient::new("bad host"), Err(CatalogError::InvalidHost(_))));
    }

    #[tokio::test]
    async fn test_fetch_events_in_code_order() {
        let (server, client) = catalog().await;
        serve(&server, "/api/v1/events/", json!({ "eventCodes": ["B2", "A1"] })).await;
        serve(
            &server,
            "/api/v1/events/B2/",
            json!({ "eventCode": "B2", "name": "Bay Qualifier", "type": 2 }),
        )
        .await;
        serve(&server, "/api/v1/events/A1/", json!({ "eventCode": "A1", "name": "Alpha Scrimmage" })).await;

        let events = client.fetch_events().await.unwrap();
        assert_eq!(
            events,
            vec![
                Event {
                    event_code: "B2".to_string(),
                    name: "Bay Qualifier".to_string()
                },
                Event {
                    event_code: "A1".to_string(),
                    name: "Alpha Scrimmage".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_catalog() {
        let (server, client) = catalog().await;
        serve(&server, "/api/v1/events/", json!({ "eventCodes": [] })).await;

        assert!(client.fetch_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_event_is_status_error() {
        let (server, client) = catalog().await;
        serve(&server, "/api/v1/events/", json!({ "eventCodes": ["GONE"] })).await;

        match client.fetch_events().await {
            Err(CatalogError::Status { status, url }) => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert!(url.ends_with("/api/v1/events/GONE/"));
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unexpected_body_is_decode_error() {
        let (server, client) = catalog().await;
        serve(&server, "/api/v1/events/", json!({ "events": [] })).await;

        assert!(matches!(client.list_event_codes().await, Err(CatalogError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_request_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        let client = EventCatalogClient::new(&address.to_string()).unwrap();

        assert!(matches!(client.list_event_codes().await, Err(CatalogError::Request { .. })));
    }
}
