//! Tracking service — the inbound operations: order confirmation, public status lookup,
//! automation updates, deletion, and delivery-model management.

use std::sync::Arc;

use chrono::{DurationRound, TimeDelta};
use rand::Rng;
use rastro_core::error::{RastroError, Result};
use rastro_core::types::{
    AutomationSetting, AutomationSettingDraft, Channel, DeliveryModel, Feature, Instant,
    ScheduledNotification, Tracking, TrackingEvent, TrackingStatus, ordered_levels,
};
use rastro_scheduler::notify;
use rastro_timeline::{MessageCatalog, Projection, StaticCatalog, TimelineGenerator, project, seed_for};
use serde::{Deserialize, Serialize};

use crate::db::{PlatformDb, get_model_in, get_setting_in, get_user_in, upsert_setting_in};
use crate::quota::{QuotaLedger, QuotaState};
use crate::queue::{cancel_for_channel_in, cancel_for_tracking_in, insert_notification_in};
use crate::trackings::{delete_tracking_in, get_tracking_in, insert_tracking_in, tracking_code_taken_in};

/// Tracking codes: "BR" + 9 uppercase alphanumerics.
pub const TRACKING_CODE_PREFIX: &str = "BR";
const TRACKING_CODE_BODY_LEN: usize = 9;
const TRACKING_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TRACKING_CODE_ATTEMPTS: usize = 16;

/// Row-level authorization: the caller must own the resource.
pub fn assert_owner(owner_id: &str, caller_id: &str) -> Result<()> {
    if owner_id == caller_id {
        Ok(())
    } else {
        Err(RastroError::AccessDenied)
    }
}

/// Random tracking code, e.g. `BR7Q2K9XH1M`.
pub fn generate_tracking_code(rng: &mut impl Rng) -> String {
    let body: String = (0..TRACKING_CODE_BODY_LEN)
        .map(|_| TRACKING_CODE_ALPHABET[rng.gen_range(0..TRACKING_CODE_ALPHABET.len())] as char)
        .collect();
    format!("{TRACKING_CODE_PREFIX}{body}")
}

/// Timestamps are stored with second precision.
fn whole_seconds(now: Instant) -> Instant {
    now.duration_trunc(TimeDelta::seconds(1)).unwrap_or(now)
}

/// Confirmed order that should become a tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub owner_id: String,
    pub customer_name: String,
    pub destination_city: String,
    pub destination_state: String,
    pub delivery_model_id: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
}

/// Result of an order confirmation.
#[derive(Debug, Clone)]
pub struct CreatedTracking {
    pub tracking: Tracking,
    pub events: Vec<TrackingEvent>,
    pub notifications: Vec<ScheduledNotification>,
    pub monthly_usage: u32,
}

/// Public tracking page payload.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingView {
    pub tracking: Tracking,
    pub events: Vec<TrackingEvent>,
    pub projection: Projection,
}

impl TrackingView {
    /// Events the customer may see at projection time.
    pub fn visible_events(&self) -> &[TrackingEvent] {
        let shown = (self.projection.event_index + 1).max(0) as usize;
        &self.events[..shown.min(self.events.len())]
    }
}

/// Outcome of an automation setting change.
#[derive(Debug, Clone)]
pub struct SettingUpdate {
    pub setting: AutomationSetting,
    pub cancelled: usize,
    pub rescheduled: usize,
}

/// Owner-submitted delivery model fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryModelDraft {
    pub name: String,
    pub exact_delivery_days: u32,
    pub event_count: u32,
    #[serde(default)]
    pub used_levels: Vec<u8>,
}

impl DeliveryModelDraft {
    fn into_model(self, id: String, owner_id: &str) -> Result<DeliveryModel> {
        if self.name.trim().is_empty() {
            return Err(RastroError::InvalidModel("name is empty".into()));
        }
        let model = DeliveryModel {
            id,
            owner_id: Some(owner_id.to_string()),
            name: self.name.trim().to_string(),
            exact_delivery_days: self.exact_delivery_days,
            event_count: self.event_count,
            used_levels: self.used_levels,
        };
        // Duplicates are rejected, never folded.
        let normalized = ordered_levels(&model.used_levels);
        if normalized.len() != model.used_levels.len() {
            return Err(RastroError::InvalidModel("used_levels contains duplicates".into()));
        }
        let model = DeliveryModel {
            used_levels: normalized,
            ..model
        };
        model.validate()?;
        Ok(model)
    }
}

/// Service handling every inbound tracking operation.
pub struct TrackingService {
    db: Arc<PlatformDb>,
    ledger: QuotaLedger,
    catalog: Box<dyn MessageCatalog>,
}

impl TrackingService {
    pub fn new(db: Arc<PlatformDb>, ledger: QuotaLedger) -> Self {
        Self::with_catalog(db, ledger, Box::new(StaticCatalog::new()))
    }

    pub fn with_catalog(db: Arc<PlatformDb>, ledger: QuotaLedger, catalog: Box<dyn MessageCatalog>) -> Self {
        Self { db, ledger, catalog }
    }

    pub fn db(&self) -> &Arc<PlatformDb> {
        &self.db
    }

    pub fn quota(&self, owner_id: &str, now: Instant) -> Result<QuotaState> {
        self.ledger.state(&self.db, owner_id, now)
    }

    // ─── Inbound events ──────────────────────────────────────

    /// Reserve quota, generate the timeline, persist everything, and schedule one job per
    /// active automation the owner's plan allows. All or nothing.
    pub fn order_confirmed(&self, order: OrderConfirmed, now: Instant) -> Result<CreatedTracking> {
        let now = whole_seconds(now);
        let user = self.db.get_user(&order.owner_id)?;
        let capabilities = self.ledger.plans().capabilities(&user.plan);

        let model = self.db.get_model(&order.delivery_model_id)?;
        if let Some(model_owner) = &model.owner_id {
            assert_owner(model_owner, &order.owner_id)?;
        }
        if self.db.model_is_archived(&model.id)? {
            return Err(RastroError::InvalidModel(format!(
                "delivery model '{}' was replaced by a newer version",
                model.name
            )));
        }

        let tracking_id = uuid::Uuid::new_v4().to_string();
        let events: Vec<TrackingEvent> = TimelineGenerator::new(self.catalog.as_ref())
            .generate(&model, now, seed_for(&tracking_id), user.tone_of_voice)?
            .into_iter()
            .map(|entry| TrackingEvent {
                id: uuid::Uuid::new_v4().to_string(),
                tracking_id: tracking_id.clone(),
                order_in_timeline: entry.order_in_timeline,
                simulated_datetime: entry.simulated_datetime,
                event_level: entry.event_level,
                location_label: entry.location_label,
                tone_of_voice_text: entry.tone_of_voice_text,
            })
            .collect();

        let mut tracking = Tracking {
            id: tracking_id,
            owner_id: order.owner_id.clone(),
            delivery_model_id: model.id.clone(),
            customer_name: order.customer_name,
            customer_email: order.customer_email,
            customer_phone: order.customer_phone,
            destination_city: order.destination_city,
            destination_state: order.destination_state,
            tracking_code: String::new(),
            created_at: now,
            current_status: TrackingStatus::AwaitingPosting,
            current_event_index: 0,
            is_completed: false,
            clicks: 0,
            last_updated_at: now,
        };
        let projection = project(&tracking, &model, &events, now);
        tracking.current_status = projection.status;
        tracking.current_event_index = projection.event_index;
        tracking.is_completed = projection.is_completed;

        let (tracking, notifications, monthly_usage) = self.db.immediate(|tx| {
            let reservation = self.ledger.reserve(tx, &tracking.owner_id, now)?;
            let monthly_usage = reservation.usage_after();

            let mut rng = rand::thread_rng();
            let mut code = None;
            for _ in 0..TRACKING_CODE_ATTEMPTS {
                let candidate = generate_tracking_code(&mut rng);
                if !tracking_code_taken_in(tx, &candidate)? {
                    code = Some(candidate);
                    break;
                }
            }
            tracking.tracking_code = code.ok_or_else(|| {
                RastroError::Storage("could not allocate a unique tracking code".into())
            })?;
            insert_tracking_in(tx, reservation, &tracking, &events)?;

            let mut notifications = Vec::new();
            for channel in [Channel::Email, Channel::WhatsApp] {
                if !capabilities.allows(Feature::for_channel(channel)) {
                    continue;
                }
                let Some(setting) = get_setting_in(tx, &tracking.owner_id, channel)? else {
                    continue;
                };
                if let Some(job) = notify::schedule(&tracking, &setting, now)? {
                    insert_notification_in(tx, &job, now)?;
                    notifications.push(job);
                }
            }
            Ok((tracking, notifications, monthly_usage))
        })?;

        tracing::info!(
            "📦 Tracking {} created for {} ({} events, {} notifications, usage {})",
            tracking.tracking_code,
            tracking.owner_id,
            events.len(),
            notifications.len(),
            monthly_usage
        );
        Ok(CreatedTracking {
            tracking,
            events,
            notifications,
            monthly_usage,
        })
    }

    /// Public lookup by code: project at `now`, count the view, refresh the cached status.
    /// An unknown code is `NotFound` with no owner detail.
    pub fn get_tracking_status(&self, tracking_code: &str, now: Instant) -> Result<TrackingView> {
        let now = whole_seconds(now);
        let tracking = self
            .db
            .get_tracking_by_code(tracking_code.trim())?
            .ok_or_else(|| RastroError::NotFound("tracking code".into()))?;
        let model = self.db.get_model(&tracking.delivery_model_id)?;
        let events = self.db.list_events(&tracking.id)?;
        let projection = project(&tracking, &model, &events, now);
        let tracking = self.db.record_view(&tracking.id, &projection, now)?;
        tracing::debug!(
            "🔎 {} viewed: {} ({}%)",
            tracking.tracking_code,
            projection.status.as_str(),
            projection.progress_percent
        );
        Ok(TrackingView {
            tracking,
            events,
            projection,
        })
    }

    /// Persist a setting and re-plan its pending jobs: every not-yet-started job on the
    /// channel is cancelled, and replaced when the setting stays active.
    pub fn update_automation_setting(
        &self,
        owner_id: &str,
        draft: AutomationSettingDraft,
        now: Instant,
    ) -> Result<SettingUpdate> {
        let now = whole_seconds(now);
        let setting = draft.into_setting(owner_id)?;
        let user = self.db.get_user(owner_id)?;
        let capabilities = self.ledger.plans().capabilities(&user.plan);
        if setting.is_active && !capabilities.allows(Feature::for_channel(setting.channel)) {
            return Err(RastroError::InvalidSetting(format!(
                "plan '{}' does not include {} automation",
                user.plan, setting.channel
            )));
        }

        let offset = self.db.offset();
        let update = self.db.immediate(|tx| {
            upsert_setting_in(tx, &setting, now)?;
            let affected = cancel_for_channel_in(tx, owner_id, setting.channel, now)?;
            let mut rescheduled = 0;
            if setting.is_active {
                for tracking_id in &affected {
                    let tracking = get_tracking_in(tx, tracking_id, offset)?;
                    if let Some(job) = notify::schedule(&tracking, &setting, now)? {
                        insert_notification_in(tx, &job, now)?;
                        rescheduled += 1;
                    }
                }
            }
            Ok(SettingUpdate {
                setting: setting.clone(),
                cancelled: affected.len(),
                rescheduled,
            })
        })?;

        tracing::info!(
            "⚙️ {} automation for {} updated (active: {}, cancelled {}, rescheduled {})",
            update.setting.channel,
            owner_id,
            update.setting.is_active,
            update.cancelled,
            update.rescheduled
        );
        Ok(update)
    }

    /// Cancel pending notifications, then drop the tracking and its timeline.
    /// A send already in flight completes; nothing new starts.
    pub fn delete_tracking(&self, tracking_id: &str, caller_id: &str, now: Instant) -> Result<()> {
        let offset = self.db.offset();
        let cancelled = self.db.immediate(|tx| {
            let tracking = get_tracking_in(tx, tracking_id, offset)?;
            assert_owner(&tracking.owner_id, caller_id)?;
            let cancelled = cancel_for_tracking_in(tx, tracking_id, now)?;
            delete_tracking_in(tx, tracking_id)?;
            Ok(cancelled)
        })?;
        tracing::info!("🗑️ Tracking {} deleted ({} notifications cancelled)", tracking_id, cancelled);
        Ok(())
    }

    /// Owner's view of one tracking.
    pub fn get_tracking(&self, tracking_id: &str, caller_id: &str) -> Result<Tracking> {
        let tracking = self.db.get_tracking(tracking_id)?;
        assert_owner(&tracking.owner_id, caller_id)?;
        Ok(tracking)
    }

    pub fn list_failed_notifications(&self, caller_id: &str) -> Result<Vec<ScheduledNotification>> {
        self.db.list_failed_notifications(caller_id)
    }

    // ─── Delivery models ──────────────────────────────────────

    pub fn list_models(&self, caller_id: &str) -> Result<Vec<DeliveryModel>> {
        self.db.list_models(caller_id)
    }

    pub fn create_model(&self, caller_id: &str, draft: DeliveryModelDraft) -> Result<DeliveryModel> {
        self.require_custom_models(caller_id)?;
        let model = draft.into_model(uuid::Uuid::new_v4().to_string(), caller_id)?;
        self.db.insert_model(&model)?;
        tracing::info!("📐 Delivery model '{}' created for {}", model.name, caller_id);
        Ok(model)
    }

    /// Update in place while unreferenced; otherwise store the edit as a new model, retire
    /// the old one, and return the new one.
    pub fn update_model(
        &self,
        model_id: &str,
        caller_id: &str,
        draft: DeliveryModelDraft,
    ) -> Result<DeliveryModel> {
        let existing = self.owned_model(model_id, caller_id)?;
        if self.db.model_is_archived(&existing.id)? {
            return Err(RastroError::InvalidModel(
                "model was replaced by a newer version".into(),
            ));
        }
        if !self.db.model_is_referenced(&existing.id)? {
            let model = draft.into_model(existing.id, caller_id)?;
            self.db.update_model(&model)?;
            return Ok(model);
        }
        let model = draft.into_model(uuid::Uuid::new_v4().to_string(), caller_id)?;
        self.db.replace_model(&existing.id, &model)?;
        tracing::info!(
            "📐 Delivery model {} is in use, edit stored as {}",
            existing.id,
            model.id
        );
        Ok(model)
    }

    pub fn delete_model(&self, model_id: &str, caller_id: &str) -> Result<()> {
        let existing = self.owned_model(model_id, caller_id)?;
        if self.db.model_is_referenced(&existing.id)? {
            return Err(RastroError::InvalidModel(format!(
                "delivery model '{}' is used by existing trackings",
                existing.name
            )));
        }
        self.db.delete_model(&existing.id)
    }

    fn owned_model(&self, model_id: &str, caller_id: &str) -> Result<DeliveryModel> {
        let model = get_model_in(&*self.db.conn()?, model_id)?;
        match &model.owner_id {
            // System models are shared and read-only.
            None => Err(RastroError::AccessDenied),
            Some(owner) => {
                assert_owner(owner, caller_id)?;
                Ok(model)
            }
        }
    }

    fn require_custom_models(&self, caller_id: &str) -> Result<()> {
        let user = get_user_in(&*self.db.conn()?, caller_id)?;
        if self.ledger.plans().capabilities(&user.plan).allows(Feature::CustomModels) {
            Ok(())
        } else {
            Err(RastroError::AccessDenied)
        }
    }

    // ─── Profile ──────────────────────────────────────

    pub fn record_referral(&self, referrer_id: &str, referred_id: &str, now: Instant) -> Result<bool> {
        self.db.record_referral(referrer_id, referred_id, now)
    }

    pub fn mark_onboarding_seen(&self, caller_id: &str) -> Result<()> {
        self.db.mark_onboarding_seen(caller_id)
    }
}
