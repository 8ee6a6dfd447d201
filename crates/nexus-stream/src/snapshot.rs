//! HTTP snapshot frame source.
//!
//! Polls a camera's JPEG snapshot endpoint, one request per frame. Many IP
//! cameras expose one next to their video stream.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{StreamError, StreamResult};
use crate::frame::{Frame, FrameFormat};
use crate::source::FrameSource;

pub struct SnapshotSource {
    http: Client,
    interval: Duration,
    target: Option<String>,
    next_poll: Option<Instant>,
    sequence: u64,
}

impl SnapshotSource {
    pub fn new(http: Client, interval: Duration) -> Self {
        Self {
            http,
            interval,
            target: None,
            next_poll: None,
            sequence: 0,
        }
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> StreamResult<bytes::Bytes> {
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StreamError::FrameTimeout(timeout)
                } else {
                    StreamError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::connect_failed(format!(
                "{} returned {}",
                url, status
            )));
        }
        if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !content_type.starts_with("image/") {
                return Err(StreamError::decode(format!(
                    "{} returned content type '{}'",
                    url, content_type
                )));
            }
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(StreamError::decode(format!("{} returned an empty image", url)));
        }
        Ok(body)
    }
}

#[async_trait]
impl FrameSource for SnapshotSource {
    async fn connect(&mut self, target: &str) -> StreamResult<()> {
        self.target = None;
        // One request up front; a camera that cannot serve a snapshot is not connected.
        self.fetch(target, Duration::from_secs(10)).await?;
        self.target = Some(target.to_string());
        self.next_poll = Some(Instant::now());
        debug!("Snapshot source connected to {}", target);
        Ok(())
    }

    async fn next_frame(&mut self, timeout: Duration) -> StreamResult<Frame> {
        let Some(target) = self.target.clone() else {
            return Err(StreamError::NotConnected);
        };

        let started = Instant::now();
        if let Some(at) = self.next_poll {
            if at.saturating_duration_since(started) >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(StreamError::FrameTimeout(timeout));
            }
            tokio::time::sleep_until(at).await;
        }
        self.next_poll = Some(Instant::now() + self.interval);

        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(StreamError::FrameTimeout(timeout));
        }
        let body = self.fetch(&target, remaining).await?;
        self.sequence += 1;
        Ok(Frame::new(body, 0, 0, FrameFormat::Jpeg, self.sequence))
    }

    async fn close(&mut self) {
        self.target = None;
        self.next_poll = None;
    }

    fn is_connected(&self) -> bool {
        self.target.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jpeg_bytes() -> Vec<u8> {
        let frame = Frame::new(vec![90u8; 8 * 8], 8, 8, FrameFormat::Gray8, 1);
        match frame.to_payload().unwrap() {
            nexus_models::ImagePayload::Inline(bytes) => bytes.to_vec(),
            nexus_models::ImagePayload::Reference(_) => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_polls_snapshots() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/snapshot.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(jpeg_bytes()),
            )
            .mount(&server)
            .await;

        let url = format!("{}/snapshot.jpg", server.uri());
        let mut source = SnapshotSource::new(Client::new(), Duration::from_millis(10));
        source.connect(&url).await.unwrap();

        let first = source.next_frame(Duration::from_secs(2)).await.unwrap();
        let second = source.next_frame(Duration::from_secs(2)).await.unwrap();
        assert_eq!(first.format, FrameFormat::Jpeg);
        assert_eq!(second.sequence, 2);
        assert_eq!(first.to_luma().unwrap().dimensions(), (8, 8));
    }

    #[tokio::test]
    async fn test_connect_fails_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut source = SnapshotSource::new(Client::new(), Duration::from_millis(10));
        let err = source.connect(&server.uri()).await.unwrap_err();
        assert!(matches!(err, StreamError::ConnectFailed(_)));
        assert!(!source.is_connected());
    }

    #[tokio::test]
    async fn test_non_image_response_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html>login</html>"),
            )
            .mount(&server)
            .await;

        let mut source = SnapshotSource::new(Client::new(), Duration::from_millis(10));
        assert!(matches!(
            source.connect(&server.uri()).await,
            Err(StreamError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_next_frame_requires_connect() {
        let mut source = SnapshotSource::new(Client::new(), Duration::from_millis(10));
        assert!(matches!(
            source.next_frame(Duration::from_millis(10)).await,
            Err(StreamError::NotConnected)
        ));
        source.close().await;
    }
}
