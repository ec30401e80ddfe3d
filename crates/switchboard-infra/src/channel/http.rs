//! HTTP channel sender.
//!
//! POSTs each [`OutboundMessage`] as JSON to the adapter endpoint. The
//! bearer token is wrapped in [`SecretString`] and only exposed when the
//! header is built.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use switchboard_core::channel::OutboundSender;
use switchboard_types::error::ChannelError;
use switchboard_types::message::OutboundMessage;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct HttpChannelSender {
    client: reqwest::Client,
    url: String,
    token: Option<SecretString>,
}

impl HttpChannelSender {
    pub fn new(url: &str, token: Option<SecretString>) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::Delivery(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            token,
        })
    }
}

impl OutboundSender for HttpChannelSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        let mut request = self.client.post(&self.url).json(message);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token.expose_secret()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChannelError::Delivery(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, url = %self.url, contact_id = %message.contact_id, "channel rejected outbound message");
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
            });
        }

        tracing::debug!(contact_id = %message.contact_id, "outbound message delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;

    /// Accept one request, hand its raw text back, answer with `status_line`.
    async fn one_shot_server(status_line: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= head_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&raw).to_string());
        });

        (format!("http://{addr}/send"), rx)
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            contact_id: "5511".to_string(),
            text: "Olá".to_string(),
            session_id: None,
        }
    }

    #[tokio::test]
    async fn posts_json_with_bearer_token() {
        let (url, request) = one_shot_server("HTTP/1.1 200 OK").await;
        let sender = HttpChannelSender::new(&url, Some(SecretString::from("tok-123".to_string()))).unwrap();

        sender.send(&message()).await.unwrap();

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /send"));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer tok-123"));
        assert!(raw.contains("\"contactId\":\"5511\""));
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let (url, _request) = one_shot_server("HTTP/1.1 503 Service Unavailable").await;
        let sender = HttpChannelSender::new(&url, None).unwrap();

        let err = sender.send(&message()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Rejected { status: 503 }));
    }
}
