//! Channel router — one `Transport` that fans out to the per-channel transports.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rastro_core::config::ChannelConfig;
use rastro_core::error::{RastroError, Result};
use rastro_core::traits::Transport;
use rastro_core::types::{Channel, RenderedMessage};

use crate::email::EmailTransport;
use crate::whatsapp::WhatsAppTransport;

/// Routes each send to the transport registered for its channel.
#[derive(Default)]
pub struct ChannelRouter {
    routes: HashMap<Channel, Arc<dyn Transport>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every enabled channel from config.
    pub fn from_config(config: &ChannelConfig) -> Result<Self> {
        let mut router = Self::new();
        if let Some(email) = config.email.as_ref().filter(|c| c.enabled) {
            router = router.with_route(Channel::Email, Arc::new(EmailTransport::new(email)?));
            tracing::info!("📧 E-mail channel enabled via {}", email.smtp_host);
        }
        if let Some(whatsapp) = config.whatsapp.as_ref().filter(|c| c.enabled) {
            router = router.with_route(
                Channel::WhatsApp,
                Arc::new(WhatsAppTransport::new(whatsapp.clone())),
            );
            tracing::info!("💬 WhatsApp channel enabled");
        }
        if router.routes.is_empty() {
            tracing::warn!("⚠️ No notification channel configured, every send will fail");
        }
        Ok(router)
    }

    pub fn with_route(mut self, channel: Channel, transport: Arc<dyn Transport>) -> Self {
        self.routes.insert(channel, transport);
        self
    }

    pub fn supports(&self, channel: Channel) -> bool {
        self.routes.contains_key(&channel)
    }
}

#[async_trait]
impl Transport for ChannelRouter {
    async fn send(&self, channel: Channel, target: &str, message: &RenderedMessage) -> Result<()> {
        let transport = self.routes.get(&channel).ok_or_else(|| {
            RastroError::PermanentDispatch(format!("channel '{channel}' is not configured"))
        })?;
        transport.send(channel, target, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rastro_core::config::WhatsAppChannelConfig;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Channel, String)>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, channel: Channel, target: &str, _message: &RenderedMessage) -> Result<()> {
            self.calls.lock().unwrap().push((channel, target.to_string()));
            Ok(())
        }
    }

    fn message() -> RenderedMessage {
        RenderedMessage {
            subject: "s".into(),
            body: "b".into(),
        }
    }

    #[tokio::test]
    async fn test_routes_by_channel() {
        let email = Arc::new(Recorder::default());
        let router = ChannelRouter::new().with_route(Channel::Email, email.clone());
        router.send(Channel::Email, "ana@example.com", &message()).await.unwrap();
        assert_eq!(
            email.calls.lock().unwrap().as_slice(),
            &[(Channel::Email, "ana@example.com".to_string())]
        );
    }

    #[tokio::test]
    async fn test_missing_channel_is_permanent() {
        let router = ChannelRouter::new();
        let err = router
            .send(Channel::WhatsApp, "5581999990000", &message())
            .await
            .unwrap_err();
        assert!(matches!(err, RastroError::PermanentDispatch(_)));
    }

    #[test]
    fn test_from_config_skips_disabled() {
        let config = ChannelConfig {
            email: None,
            whatsapp: Some(WhatsAppChannelConfig {
                enabled: false,
                access_token: "t".into(),
                phone_number_id: "1".into(),
                api_base_url: "https://graph.facebook.com/v21.0".into(),
            }),
        };
        let router = ChannelRouter::from_config(&config).unwrap();
        assert!(!router.supports(Channel::WhatsApp));
        assert!(!router.supports(Channel::Email));
    }
}
