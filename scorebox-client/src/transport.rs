//! HTTP transport
//!
//! The narrow set of HTTP calls the scoring protocol needs. The reqwest
//! implementation is used in production; tests script their own.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

use crate::error::Result;

/// Status and body of an HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    /// Body decoded as UTF-8, lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP calls used by the prober and the scoring client
#[async_trait]
pub trait ScoringTransport: Send + Sync {
    /// Issues a GET and returns whatever status came back
    async fn get(&self, url: &str) -> Result<HttpReply>;

    /// Posts `content` as the multipart field `file`
    async fn post_file(&self, url: &str, file_name: &str, content: Vec<u8>) -> Result<HttpReply>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport whose requests give up after `request_timeout`
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client })
    }

    /// Create a transport with a custom HTTP client
    ///
    /// This allows you to configure proxies, TLS settings, etc.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn into_reply(response: reqwest::Response) -> Result<HttpReply> {
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(HttpReply { status, body })
    }
}

#[async_trait]
impl ScoringTransport for HttpTransport {
    async fn get(&self, url: &str) -> Result<HttpReply> {
        let response = self.client.get(url).send().await?;
        Self::into_reply(response).await
    }

    async fn post_file(&self, url: &str, file_name: &str, content: Vec<u8>) -> Result<HttpReply> {
        let part = Part::bytes(content).file_name(file_name.to_string());
        let form = Form::new().part("file", part);
        let response = self.client.post(url).multipart(form).send().await?;
        Self::into_reply(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_creation() {
        assert!(HttpTransport::new(Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_reply_text_is_lossy() {
        let reply = HttpReply {
            status: 200,
            body: vec![b'p', b'o', 0xff],
        };
        assert_eq!(reply.text(), "po\u{fffd}");
    }
}
