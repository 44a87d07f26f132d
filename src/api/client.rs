use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::error::{ErrorKind, RequestError};

/// Longest response body excerpt kept in error messages
const MAX_ERROR_BODY: usize = 200;

/// HTTP client for the configuration API.
///
/// Every request carries its own timeout; failures are classified into
/// [`RequestError`] kinds.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: String,
  api_key: Option<String>,
  key_header: String,
  timeout: Duration,
}

impl ApiClient {
  pub fn new(base_url: &str, api_key: Option<String>, config: &ApiConfig) -> Result<Self> {
    Url::parse(base_url).map_err(|e| eyre!("Invalid API URL {}: {}", base_url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("cfgshield/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: base_url.trim_end_matches('/').to_string(),
      api_key,
      key_header: config.key_header.clone(),
      timeout: config.request_timeout(),
    })
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  fn url_for(&self, path: &str) -> Result<Url, RequestError> {
    let joined = if path.starts_with('/') {
      format!("{}{}", self.base_url, path)
    } else {
      format!("{}/{}", self.base_url, path)
    };
    Url::parse(&joined).map_err(|e| RequestError::validation(format!("Invalid request URL {}: {}", joined, e)))
  }

  /// Send one request and decode the JSON response. An empty body decodes to `null`.
  pub async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, RequestError> {
    let url = self.url_for(path)?;
    debug!(%method, %url, "Sending request");

    let mut request = self.http.request(method, url).timeout(self.timeout);
    if let Some(key) = &self.api_key {
      request = request.header(self.key_header.as_str(), key);
    }
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
      let excerpt: String = text.chars().take(MAX_ERROR_BODY).collect();
      return Err(RequestError::from_status(status.as_u16(), &excerpt));
    }

    if text.trim().is_empty() {
      return Ok(Value::Null);
    }

    serde_json::from_str(&text)
      .map_err(|e| RequestError::new(ErrorKind::Decode, format!("Failed to parse response: {}", e)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{body_json, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(&format!("{}/v1", server.uri()), Some("secret".to_string()), &ApiConfig::default()).unwrap()
  }

  #[tokio::test]
  async fn test_decodes_json_and_sends_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/v1/gates"))
      .and(header("statsig-api-key", "secret"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [1, 2]})))
      .expect(1)
      .mount(&server)
      .await;

    let value = client(&server).send(Method::GET, "/gates", None).await.unwrap();

    assert_eq!(value, json!({"data": [1, 2]}));
  }

  #[tokio::test]
  async fn test_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/v1/gates"))
      .and(body_json(json!({"name": "beta"})))
      .respond_with(ResponseTemplate::new(201))
      .expect(1)
      .mount(&server)
      .await;

    let value = client(&server)
      .send(Method::POST, "gates", Some(&json!({"name": "beta"})))
      .await
      .unwrap();

    assert_eq!(value, Value::Null);
  }

  #[tokio::test]
  async fn test_classifies_status_errors() {
    let server = MockServer::start().await;
    Mock::given(path("/v1/down"))
      .respond_with(ResponseTemplate::new(503).set_body_string("down"))
      .mount(&server)
      .await;
    Mock::given(path("/v1/busy"))
      .respond_with(ResponseTemplate::new(429))
      .mount(&server)
      .await;
    Mock::given(path("/v1/gates"))
      .respond_with(ResponseTemplate::new(422).set_body_string("bad name"))
      .mount(&server)
      .await;
    let c = client(&server);

    let err = c.send(Method::GET, "/down", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Server(503));
    assert_eq!(err.message, "HTTP 503: down");

    let err = c.send(Method::GET, "/busy", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RateLimited);

    let err = c.send(Method::POST, "/gates", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(!err.is_retryable());
  }

  #[tokio::test]
  async fn test_timeout_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(path("/v1/slow"))
      .respond_with(ResponseTemplate::new(200).set_body_string("{}").set_delay(Duration::from_millis(500)))
      .mount(&server)
      .await;

    let err = client(&server)
      .with_timeout(Duration::from_millis(50))
      .send(Method::GET, "/slow", None)
      .await
      .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(err.is_retryable());
  }

  #[tokio::test]
  async fn test_connection_refused_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = ApiClient::new(&format!("http://127.0.0.1:{}", port), None, &ApiConfig::default())
      .unwrap()
      .send(Method::GET, "/gates", None)
      .await
      .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Network);
    assert!(err.is_retryable());
  }

  #[tokio::test]
  async fn test_invalid_json_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(path("/v1/a"))
      .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
      .mount(&server)
      .await;

    let err = client(&server).send(Method::GET, "/a", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Decode);
  }

  #[test]
  fn test_rejects_invalid_base_url() {
    assert!(ApiClient::new("not a url", None, &ApiConfig::default()).is_err());
  }
}
