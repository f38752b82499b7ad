//! # Rastro Timeline
//!
//! Pure, lock-free building blocks shared by creation and status queries:
//! - `calendar` — business days and send windows
//! - `catalog` — event copy per level and tone
//! - `generator` — delivery model → ordered timeline
//! - `status` — timeline + now → projection

pub mod calendar;
pub mod catalog;
pub mod generator;
pub mod status;

pub use catalog::{CatalogEntry, MessageCatalog, StaticCatalog};
pub use generator::{TimelineEntry, TimelineGenerator, seed_for};
pub use status::{Projection, project};
