use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use crate::errors::TransportError;

/// Performs one HTTP exchange and reports the response status.
///
/// The worker pool only sees this trait, so tests drive the engine with an
/// in-process fake and the binary plugs in [`ReqwestTransport`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        method: &Method,
        url: &str,
        body: Option<&str>,
    ) -> Result<u16, TransportError>;
}

/// Transport backed by a shared `reqwest::Client`.
///
/// Supports GET and POST; anything else is rejected with
/// [`TransportError::UnsupportedMethod`].
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    content_type: String,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client, content_type: impl Into<String>) -> Self {
        Self {
            client,
            content_type: content_type.into(),
        }
    }

    fn build_request(
        &self,
        method: &Method,
        url: &str,
        body: Option<&str>,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        match *method {
            Method::GET => Ok(self.client.get(url)),
            Method::POST => {
                let req = self.client.post(url);
                Ok(match body {
                    Some(body) => req
                        .header(reqwest::header::CONTENT_TYPE, self.content_type.as_str())
                        .body(body.to_owned()),
                    None => req,
                })
            }
            _ => Err(TransportError::UnsupportedMethod(method.to_string())),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        method: &Method,
        url: &str,
        body: Option<&str>,
    ) -> Result<u16, TransportError> {
        let mut response = self.build_request(method, url, body)?.send().await?;
        let status = response.status().as_u16();

        // Drain the body chunk by chunk so nothing is buffered whole.
        while response.chunk().await?.is_some() {}

        debug!(url, status_code = status, "Request completed");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_methods_are_rejected_before_sending() {
        let transport = ReqwestTransport::new(reqwest::Client::new(), "text/plain");

        for method in [Method::PUT, Method::DELETE, Method::PATCH, Method::HEAD] {
            let err = transport
                .build_request(&method, "http://localhost/", None)
                .err()
                .expect("should reject");
            assert_eq!(err, TransportError::UnsupportedMethod(method.to_string()));
        }
    }

    #[test]
    fn get_and_post_are_supported() {
        let transport = ReqwestTransport::new(reqwest::Client::new(), "text/plain");
        assert!(transport
            .build_request(&Method::GET, "http://localhost/", None)
            .is_ok());
        assert!(transport
            .build_request(&Method::POST, "http://localhost/", Some("key=value"))
            .is_ok());
    }
}
