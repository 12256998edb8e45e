//! # HTTP Retrieval Utilities
//!
//! This module provides an asynchronous API client wrapper around `reqwest`.
//! It handles base URLs, bearer authentication, request timeouts and optional
//! exponential-backoff retries, and it classifies every failure into a
//! [`FetchError`] so callers never deal with transport types directly.
//!
//! Retries are off by default: a resource fetch is a single round-trip, and a
//! failed refresh is surfaced to the page instead of being hidden.

use std::time::Duration;

use reqwest::{
    header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE},
    Method, Url,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::FetchError;

/// A standardized container for API responses.
///
/// This struct wraps the deserialized data along with metadata about the
/// HTTP transaction, such as status codes and headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
    /// The absolute URL that was requested.
    pub url: String,
}

impl<T> ApiResponse<T> {
    /// Converts the response into its payload, mapping non-2xx answers to
    /// [`FetchError::Status`].
    pub fn into_result(self) -> Result<T, FetchError> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(FetchError::Decode {
                url: self.url,
                message: "empty response body".to_string(),
            }),
            (false, _) => Err(FetchError::Status {
                url: self.url,
                status: self.status,
                body: self.error_body,
            }),
        }
    }
}

/// Tunables for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ApiClientOptions {
    /// An optional Bearer token used for authorization.
    pub auth_token: Option<String>,
    /// Per-request timeout. `None` leaves the request unbounded.
    pub timeout: Option<Duration>,
    /// Transient-failure retries. `0` disables the retry middleware.
    pub max_retries: u32,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            auth_token: None,
            timeout: Some(Duration::from_secs(10)),
            max_retries: 0,
            user_agent: concat!("shopfloor/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`, it handles base URLs,
/// authentication tokens, timeouts and (optionally) automatic retries.
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.auth_token.is_some())
            .finish()
    }
}

impl ApiClient {
    /// Creates a new `ApiClient`.
    ///
    /// # Arguments
    /// * `base_url` - The absolute base URL for the API (e.g., "https://mes.local/api/").
    ///   A trailing slash is added when missing so relative paths are appended
    ///   rather than replacing the last segment.
    /// * `options` - Token, timeout and retry settings.
    ///
    /// # Errors
    /// Returns [`FetchError::InvalidUrl`] if `base_url` is not an absolute URL.
    pub fn new(base_url: &str, options: ApiClientOptions) -> Result<Self, FetchError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let url = Url::parse(&normalized).map_err(|_| FetchError::InvalidUrl(base_url.to_string()))?;

        let mut builder = reqwest::Client::builder().user_agent(options.user_agent.clone());
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        // Only wrap with the retry layer when it was asked for
        let inner = if options.max_retries > 0 {
            let retry_policy = ExponentialBackoff::builder().build_with_max_retries(options.max_retries);
            ClientBuilder::new(client)
                .with(RetryTransientMiddleware::new_with_policy(retry_policy))
                .build()
        } else {
            ClientBuilder::new(client).build()
        };

        Ok(Self {
            inner,
            base_url: url,
            auth_token: options.auth_token,
        })
    }

    /// The normalized base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a generic HTTP request and handles the response.
    ///
    /// This method manages URL joining, header injection, authentication,
    /// and JSON serialization/deserialization. A non-2xx status is *not* an
    /// error here: it is reported through [`ApiResponse::success`].
    ///
    /// # Arguments
    /// * `method` - The HTTP verb (GET, POST, etc.).
    /// * `path` - The relative path (and query) to append to the base URL.
    /// * `headers` - Optional additional headers for this specific request.
    /// * `body` - Optional serializable object to send as the JSON body.
    ///
    /// # Errors
    /// Returns a [`FetchError`] if URL joining, the network exchange or
    /// decoding of a successful body fails.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<B>,
    ) -> Result<ApiResponse<T>, FetchError>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        // 1. Construct the full absolute URL
        let full_url = self
            .base_url
            .join(path)
            .map_err(|_| FetchError::InvalidUrl(path.to_string()))?;
        let url_text = full_url.to_string();
        let mut req = self.inner.request(method.clone(), full_url);

        // 2. Add Custom Headers if provided
        if let Some(h) = headers {
            req = req.headers(h);
        }

        // 3. Inject Bearer Authentication if a token is present
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        // 4. Serialize and attach the JSON body if present
        if let Some(b) = body {
            let json_body = serde_json::to_string(&b).map_err(|e| FetchError::Encode(e.to_string()))?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        log::debug!("{} {}", method, url_text);

        // 5. Execute the request and capture response metadata
        let response = req.send().await.map_err(|e| classify(&url_text, e))?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        // 6. Handle the result based on success status
        if status.is_success() {
            let bytes = response.bytes().await.map_err(|e| FetchError::Request {
                url: url_text.clone(),
                message: e.to_string(),
            })?;
            // An empty 2xx body decodes like JSON `null`, so `()` and `Value` work for 204s
            let raw: &[u8] = if bytes.is_empty() { b"null" } else { &bytes[..] };
            let data = serde_json::from_slice::<T>(raw).map_err(|e| FetchError::Decode {
                url: url_text.clone(),
                message: e.to_string(),
            })?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
                url: url_text,
            })
        } else {
            let error_text = response.text().await.ok().filter(|t| !t.is_empty());
            log::warn!("{} {} answered {}", method, url_text, status.as_u16());
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
                url: url_text,
            })
        }
    }

    /// `GET path` decoded as `T`; non-2xx becomes [`FetchError::Status`].
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        self.request::<T, ()>(Method::GET, path, None, None)
            .await?
            .into_result()
    }

    /// Sends `body` with `method` and decodes the answer as `T`.
    pub async fn send_json<T, B>(&self, method: Method, path: &str, body: &B) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        self.request::<T, &B>(method, path, None, Some(body))
            .await?
            .into_result()
    }
}

fn classify(url: &str, err: reqwest_middleware::Error) -> FetchError {
    match err {
        reqwest_middleware::Error::Reqwest(e) if e.is_timeout() => FetchError::Timeout { url: url.to_string() },
        other => FetchError::Request {
            url: url.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serves exactly one canned HTTP response on a random local port.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to random port");
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "{}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            request
        });
        (format!("http://127.0.0.1:{}/api", port), handle)
    }

    #[test]
    fn new_rejects_relative_base_url() {
        let err = ApiClient::new("not a url", ApiClientOptions::default()).unwrap_err();
        assert_eq!(err, FetchError::InvalidUrl("not a url".to_string()));
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let client = ApiClient::new("http://127.0.0.1:9/api", ApiClientOptions::default()).unwrap();
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:9/api/");
    }

    #[tokio::test]
    async fn get_json_decodes_body_and_sends_bearer_token() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", r#"[{"id":1},{"id":2}]"#);
        let options = ApiClientOptions {
            auth_token: Some("secret".into()),
            ..ApiClientOptions::default()
        };
        let client = ApiClient::new(&base, options).unwrap();

        let rows: Vec<serde_json::Value> = client.get_json("orders?stage_id=4").await.unwrap();
        assert_eq!(rows.len(), 2);

        let request = server.join().unwrap();
        assert!(request.starts_with("GET /api/orders?stage_id=4 "));
        assert!(request.to_lowercase().contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn non_success_status_becomes_status_error() {
        let (base, server) = serve_once("HTTP/1.1 503 Service Unavailable", r#"{"message":"down"}"#);
        let client = ApiClient::new(&base, ApiClientOptions::default()).unwrap();

        let err = client.get_json::<serde_json::Value>("orders").await.unwrap_err();
        server.join().unwrap();
        match err {
            FetchError::Status { status, body, .. } => {
                assert_eq!(status, 503);
                assert_eq!(body.as_deref(), Some(r#"{"message":"down"}"#));
            }
            other => panic!("Expected FetchError::Status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn undecodable_body_becomes_decode_error() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", r#"{"not":"a list"}"#);
        let client = ApiClient::new(&base, ApiClientOptions::default()).unwrap();

        let err = client.get_json::<Vec<u32>>("orders").await.unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, FetchError::Decode { .. }));
    }

    #[tokio::test]
    async fn refused_connection_becomes_request_error() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let client = ApiClient::new(&format!("http://127.0.0.1:{}/", port), ApiClientOptions::default()).unwrap();

        let err = client.get_json::<serde_json::Value>("orders").await.unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }));
    }
}
