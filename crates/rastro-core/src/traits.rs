//! Collaborator contracts implemented outside the engine.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Channel, RenderedMessage};

/// Outbound message transport (e-mail, WhatsApp).
///
/// Implementations classify failures: `RastroError::TransientDispatch` for anything worth
/// retrying, `RastroError::PermanentDispatch` for everything else.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `message` to `target` over `channel`.
    async fn send(&self, channel: Channel, target: &str, message: &RenderedMessage) -> Result<()>;
}
