//! Timeline generator — turns a delivery model into an ordered event list.
//!
//! Output is a pure function of `(model, created_at, seed, tone)`: spacing jitter comes from
//! SHA-256 over `(seed, index)`, never from the wall clock or a process-local RNG, so a lost
//! timeline can be regenerated byte-for-byte.

use chrono::Duration;
use rastro_core::error::{RastroError, Result};
use rastro_core::types::{DeliveryModel, Instant, ToneOfVoice};
use sha2::{Digest, Sha256};

use crate::calendar;
use crate::catalog::MessageCatalog;

/// One generated event, not yet bound to a persisted tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub order_in_timeline: u32,
    pub simulated_datetime: Instant,
    pub event_level: u8,
    pub location_label: String,
    pub tone_of_voice_text: String,
}

/// Derive a stable generation seed from a tracking id.
pub fn seed_for(tracking_id: &str) -> u64 {
    let digest = Sha256::digest(tracking_id.as_bytes());
    u64::from_be_bytes(first_eight(&digest))
}

fn first_eight(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

/// Deterministic 64-bit value for event `index` under `seed`.
fn jitter_hash(seed: u64, index: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(b"rastro-timeline");
    hasher.update(seed.to_be_bytes());
    hasher.update(index.to_be_bytes());
    u64::from_be_bytes(first_eight(&hasher.finalize()))
}

/// Timeline generator bound to a message catalog.
pub struct TimelineGenerator<'a> {
    catalog: &'a dyn MessageCatalog,
}

impl<'a> TimelineGenerator<'a> {
    pub fn new(catalog: &'a dyn MessageCatalog) -> Self {
        Self { catalog }
    }

    /// Generate the full timeline. Fails with `InvalidModel` on a malformed model.
    pub fn generate(
        &self,
        model: &DeliveryModel,
        created_at: Instant,
        seed: u64,
        tone: ToneOfVoice,
    ) -> Result<Vec<TimelineEntry>> {
        model.validate()?;

        let delivery = calendar::add_business_days(created_at, model.exact_delivery_days)
            .ok_or_else(|| RastroError::InvalidModel("delivery date out of range".into()))?;
        let instants = spread(created_at, delivery, model.event_count, seed);
        let levels = model.effective_levels();

        let timeline = instants
            .into_iter()
            .enumerate()
            .map(|(i, at)| {
                let index = i as u32;
                let level = levels[i % levels.len()];
                let copy = self.catalog.entry(level, index, tone);
                TimelineEntry {
                    order_in_timeline: index,
                    simulated_datetime: at,
                    event_level: level,
                    location_label: copy.location_label,
                    tone_of_voice_text: copy.text,
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            "🧭 Generated {} events for model '{}' ({} business days)",
            timeline.len(),
            model.id,
            model.exact_delivery_days
        );
        Ok(timeline)
    }
}

/// Strictly increasing instants: first at `start`, last exactly at `end`.
///
/// Intermediate events sit at proportional offsets moved by at most a quarter of a slot,
/// so neighbours can never cross or touch.
fn spread(start: Instant, end: Instant, count: u32, seed: u64) -> Vec<Instant> {
    if count == 1 {
        return vec![end];
    }

    let span = (end - start).num_seconds();
    let gaps = i64::from(count - 1);
    let slot = span / gaps;
    let max_jitter = slot / 4;

    let mut instants = Vec::with_capacity(count as usize);
    instants.push(start);
    for i in 1..count - 1 {
        let base = span * i64::from(i) / gaps;
        let jitter = if max_jitter > 0 {
            let range = (2 * max_jitter + 1) as u64;
            (jitter_hash(seed, i) % range) as i64 - max_jitter
        } else {
            0
        };
        instants.push(start + Duration::seconds(base + jitter));
    }
    instants.push(end);

    debug_assert!(instants.windows(2).all(|w| w[0] < w[1]));
    instants
}
