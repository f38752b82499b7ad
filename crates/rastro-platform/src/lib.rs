//! # Rastro Platform
//!
//! Persistence and the inbound operations of the tracking engine.
//!
//! - `db` — SQLite store (owners, referrals, delivery models, automation settings)
//! - `trackings` — tracking and timeline rows
//! - `queue` — lease-based [`rastro_scheduler::NotificationQueue`] over the same store
//! - `quota` — plans, capabilities, monthly allowance
//! - `service` — `TrackingService`: order confirmation, public lookup, settings, deletion

pub mod db;
pub mod queue;
pub mod quota;
pub mod service;
pub mod trackings;

pub use db::PlatformDb;
pub use quota::{Plans, QuotaLedger, QuotaState, ReservationToken};
pub use service::{
    CreatedTracking, DeliveryModelDraft, OrderConfirmed, SettingUpdate, TrackingService,
    TrackingView, assert_owner,
};
