//! E-mail transport via SMTP (async lettre).
//!
//! Works with any STARTTLS relay: Gmail, Outlook, SES, a custom server.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use rastro_core::config::EmailChannelConfig;
use rastro_core::error::{RastroError, Result};
use rastro_core::traits::Transport;
use rastro_core::types::{Channel, RenderedMessage};

/// SMTP transport.
pub struct EmailTransport {
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailTransport {
    pub fn new(config: &EmailChannelConfig) -> Result<Self> {
        let from = sender_mailbox(config)?;
        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| RastroError::Config(format!("SMTP relay: {e}")))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();
        Ok(Self { from, mailer })
    }
}

#[async_trait]
impl Transport for EmailTransport {
    async fn send(&self, channel: Channel, target: &str, message: &RenderedMessage) -> Result<()> {
        if channel != Channel::Email {
            return Err(RastroError::PermanentDispatch(format!(
                "e-mail transport cannot send over {channel}"
            )));
        }
        let email = compose(&self.from, target, message)?;
        self.mailer.send(email).await.map_err(|e| classify_smtp(&e))?;
        tracing::info!("📤 Email sent to: {target}");
        Ok(())
    }
}

fn sender_mailbox(config: &EmailChannelConfig) -> Result<Mailbox> {
    let raw = match &config.from_name {
        Some(name) => format!("{name} <{}>", config.from_address),
        None => config.from_address.clone(),
    };
    raw.parse()
        .map_err(|e| RastroError::Config(format!("Invalid from address: {e}")))
}

/// Build the plain-text message. A malformed recipient can never succeed.
pub fn compose(from: &Mailbox, to: &str, message: &RenderedMessage) -> Result<Message> {
    let to_mailbox: Mailbox = to
        .parse()
        .map_err(|e| RastroError::PermanentDispatch(format!("Invalid recipient '{to}': {e}")))?;
    Message::builder()
        .from(from.clone())
        .to(to_mailbox)
        .subject(message.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(message.body.clone())
        .map_err(|e| RastroError::PermanentDispatch(format!("Build email: {e}")))
}

/// 5xx replies and client-side errors are final; connection trouble and 4xx are retried.
fn classify_smtp(e: &lettre::transport::smtp::Error) -> RastroError {
    if e.is_permanent() || e.is_client() {
        RastroError::PermanentDispatch(format!("SMTP send: {e}"))
    } else {
        RastroError::TransientDispatch(format!("SMTP send: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(from_name: Option<&str>) -> EmailChannelConfig {
        EmailChannelConfig {
            enabled: true,
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            username: "loja".into(),
            password: "secret".into(),
            from_address: "loja@example.com".into(),
            from_name: from_name.map(String::from),
        }
    }

    fn message() -> RenderedMessage {
        RenderedMessage {
            subject: "Seu pedido saiu".into(),
            body: "Acompanhe em https://loja.test/r/BR123".into(),
        }
    }

    #[test]
    fn test_sender_with_display_name() {
        let from = sender_mailbox(&config(Some("Loja da Ana"))).unwrap();
        assert_eq!(from.email.to_string(), "loja@example.com");
        assert_eq!(from.name.as_deref(), Some("Loja da Ana"));
    }

    #[test]
    fn test_compose_sets_headers() {
        let from = sender_mailbox(&config(None)).unwrap();
        let email = compose(&from, "ana@example.com", &message()).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("To: ana@example.com"));
        assert!(raw.contains("Subject: Seu pedido saiu"));
        assert!(raw.contains("https://loja.test/r/BR123"));
    }

    #[test]
    fn test_bad_recipient_is_permanent() {
        let from = sender_mailbox(&config(None)).unwrap();
        let err = compose(&from, "not an address", &message()).unwrap_err();
        assert!(matches!(err, RastroError::PermanentDispatch(_)));
        assert!(!err.is_transient());
    }
}
