//! # Rastro Channels
//!
//! Outbound transports for tracking notifications: SMTP e-mail and the WhatsApp Cloud API,
//! behind a single [`ChannelRouter`].

pub mod email;
pub mod router;
pub mod whatsapp;

pub use email::EmailTransport;
pub use router::ChannelRouter;
pub use whatsapp::WhatsAppTransport;
