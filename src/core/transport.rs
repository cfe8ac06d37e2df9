//! HTTP Transport
//!
//! HTTP client interface and implementations shared by the token endpoint
//! client and the remote secret store.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{ConfigurationError, NetworkError, OAuth2Error, ProtocolError};

/// HTTP request definition.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

/// HTTP response definition.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, lowercased names.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Check for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Look up a header by lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, OAuth2Error>;
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
    max_response_size: usize,
}

impl ReqwestHttpTransport {
    /// Create new transport with the default timeout.
    pub fn new() -> Result<Self, OAuth2Error> {
        Self::with_options(Duration::from_secs(10), DEFAULT_MAX_RESPONSE_SIZE)
    }

    /// Create transport with custom options.
    pub fn with_options(timeout: Duration, max_response_size: usize) -> Result<Self, OAuth2Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                OAuth2Error::Configuration(ConfigurationError::InvalidConfig {
                    message: format!("failed to create HTTP client: {}", e),
                })
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
            max_response_size,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, OAuth2Error> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
        };

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let response = req_builder.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                OAuth2Error::Network(NetworkError::Timeout { timeout })
            } else {
                OAuth2Error::Network(NetworkError::ConnectionFailed {
                    message: e.to_string(),
                })
            }
        })?;

        let status = response.status().as_u16();

        if (300..400).contains(&status) {
            let location = response
                .headers()
                .get("location")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(OAuth2Error::Protocol(ProtocolError::UnexpectedRedirect {
                location,
            }));
        }

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_lowercase(), v.to_string());
            }
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_size {
                return Err(OAuth2Error::Protocol(ProtocolError::ResponseTooLarge {
                    size: len as usize,
                }));
            }
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                OAuth2Error::Network(NetworkError::Timeout { timeout })
            } else {
                OAuth2Error::Protocol(ProtocolError::InvalidResponse {
                    message: e.to_string(),
                })
            }
        })?;

        if body.len() > self.max_response_size {
            return Err(OAuth2Error::Protocol(ProtocolError::ResponseTooLarge {
                size: body.len(),
            }));
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Mock HTTP transport for testing. Queued responses are returned in order.
#[derive(Default)]
pub struct MockHttpTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, OAuth2Error>>>,
    request_history: Mutex<Vec<HttpRequest>>,
}

impl MockHttpTransport {
    /// Create new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to return.
    pub fn queue_response(&self, response: HttpResponse) -> &Self {
        self.lock_responses().push_back(Ok(response));
        self
    }

    /// Queue a JSON response.
    pub fn queue_json_response(&self, status: u16, body: &serde_json::Value) -> &Self {
        self.queue_response(HttpResponse {
            status,
            headers: [("content-type".to_string(), "application/json".to_string())]
                .into_iter()
                .collect(),
            body: body.to_string(),
        })
    }

    /// Queue a transport-level failure.
    pub fn queue_error(&self, error: OAuth2Error) -> &Self {
        self.lock_responses().push_back(Err(error));
        self
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<HttpRequest> {
        self.lock_history().clone()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<HttpRequest> {
        self.lock_history().last().cloned()
    }

    fn lock_responses(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<HttpResponse, OAuth2Error>>> {
        self.responses.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, Vec<HttpRequest>> {
        self.request_history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, OAuth2Error> {
        self.lock_history().push(request);

        self.lock_responses().pop_front().unwrap_or_else(|| {
            Err(OAuth2Error::Network(NetworkError::ConnectionFailed {
                message: "No mock response available".to_string(),
            }))
        })
    }
}

/// Largest response body accepted.
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_returns_in_order() {
        let transport = MockHttpTransport::new();
        transport.queue_json_response(200, &serde_json::json!({"n": 1}));
        transport.queue_json_response(500, &serde_json::json!({"n": 2}));

        let request = HttpRequest {
            method: HttpMethod::Get,
            url: "https://example.com".to_string(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        };

        let first = transport.send(request.clone()).await.unwrap();
        let second = transport.send(request.clone()).await.unwrap();
        assert_eq!(first.status, 200);
        assert_eq!(second.status, 500);
        assert!(transport.send(request).await.is_err());

        let history = transport.get_requests();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].url, "https://example.com");
    }

    #[test]
    fn test_http_method_as_str() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Post.as_str(), "POST");
        assert_eq!(HttpMethod::Put.as_str(), "PUT");
    }
}
