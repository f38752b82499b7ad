//! WhatsApp Business Cloud API transport.
//!
//! Sends plain text messages through the Graph API.
//! Requires: Access Token + Phone Number ID from Meta Business Suite.

use async_trait::async_trait;
use rastro_core::config::WhatsAppChannelConfig;
use rastro_core::error::{RastroError, Result};
use rastro_core::traits::Transport;
use rastro_core::types::{Channel, RenderedMessage};
use reqwest::StatusCode;

/// WhatsApp Cloud API transport.
pub struct WhatsAppTransport {
    config: WhatsAppChannelConfig,
    client: reqwest::Client,
}

impl WhatsAppTransport {
    pub fn new(config: WhatsAppChannelConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.phone_number_id
        )
    }
}

/// Graph API body for a text message. Subject goes on its own line, in bold.
pub fn text_payload(to: &str, message: &RenderedMessage) -> serde_json::Value {
    let text = if message.subject.is_empty() {
        message.body.clone()
    } else {
        format!("*{}*\n{}", message.subject, message.body)
    };
    serde_json::json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": normalize_phone(to),
        "type": "text",
        "text": {
            "preview_url": true,
            "body": text
        }
    })
}

/// Digits only; the Cloud API rejects `+`, spaces and punctuation.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Throttling, timeouts and server errors are worth another try; other HTTP errors are not.
pub fn classify_status(status: StatusCode, body: &str) -> RastroError {
    let detail = format!("WhatsApp API error {status}: {body}");
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        RastroError::TransientDispatch(detail)
    } else {
        RastroError::PermanentDispatch(detail)
    }
}

#[async_trait]
impl Transport for WhatsAppTransport {
    async fn send(&self, channel: Channel, target: &str, message: &RenderedMessage) -> Result<()> {
        if channel != Channel::WhatsApp {
            return Err(RastroError::PermanentDispatch(format!(
                "WhatsApp transport cannot send over {channel}"
            )));
        }
        if normalize_phone(target).is_empty() {
            return Err(RastroError::PermanentDispatch(format!(
                "Invalid phone number '{target}'"
            )));
        }

        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.config.access_token)
            .json(&text_payload(target, message))
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    RastroError::PermanentDispatch(format!("WhatsApp request invalid: {e}"))
                } else {
                    RastroError::TransientDispatch(format!("WhatsApp API request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        let result: serde_json::Value = response.json().await.unwrap_or_default();
        let msg_id = result["messages"][0]["id"].as_str().unwrap_or("unknown");
        tracing::debug!("WhatsApp message sent: {} → {}", msg_id, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        for code in [500, 502, 503, 429, 408] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(classify_status(status, "").is_transient(), "{code}");
        }
        for code in [400, 401, 403, 404, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(
                matches!(classify_status(status, ""), RastroError::PermanentDispatch(_)),
                "{code}"
            );
        }
    }

    #[test]
    fn test_payload_shape() {
        let msg = RenderedMessage {
            subject: "Pedido enviado".into(),
            body: "Olá Ana".into(),
        };
        let payload = text_payload("+55 (81) 99999-0000", &msg);
        assert_eq!(payload["to"], "5581999990000");
        assert_eq!(payload["messaging_product"], "whatsapp");
        assert_eq!(payload["text"]["body"], "*Pedido enviado*\nOlá Ana");
    }

    #[test]
    fn test_messages_url() {
        let transport = WhatsAppTransport::new(WhatsAppChannelConfig {
            enabled: true,
            access_token: "tok".into(),
            phone_number_id: "12345".into(),
            api_base_url: "https://graph.facebook.com/v21.0/".into(),
        });
        assert_eq!(
            transport.messages_url(),
            "https://graph.facebook.com/v21.0/12345/messages"
        );
    }

    #[tokio::test]
    async fn test_rejects_empty_phone() {
        let transport = WhatsAppTransport::new(WhatsAppChannelConfig {
            enabled: true,
            access_token: "tok".into(),
            phone_number_id: "12345".into(),
            api_base_url: "http://127.0.0.1:9".into(),
        });
        let msg = RenderedMessage {
            subject: String::new(),
            body: "oi".into(),
        };
        let err = transport.send(Channel::WhatsApp, "n/a", &msg).await.unwrap_err();
        assert!(matches!(err, RastroError::PermanentDispatch(_)));
    }
}
