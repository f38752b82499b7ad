//! Domain records shared by the timeline, scheduler and platform crates.

use chrono::{DateTime, FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{RastroError, Result};

/// Local instant. Every timestamp carries the store's fixed UTC offset.
pub type Instant = DateTime<FixedOffset>;

/// Highest event level a model may use.
pub const MAX_EVENT_LEVEL: u8 = 5;
/// Longest promise a delivery model may make, in business days.
pub const MAX_DELIVERY_DAYS: u32 = 25;
/// Upper bound on timeline length.
pub const MAX_EVENT_COUNT: u32 = 40;
/// Longest notification delay in hours (one year).
pub const MAX_TIMING_HOURS: i64 = 8760;
/// Longest notification delay in business days.
pub const MAX_TIMING_BUSINESS_DAYS: i64 = 365;

// ─── Delivery models ──────────────────────────────────────

/// Template describing the promised delivery and the shape of the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryModel {
    pub id: String,
    /// `None` for system defaults shared by every owner.
    pub owner_id: Option<String>,
    pub name: String,
    pub exact_delivery_days: u32,
    pub event_count: u32,
    /// Ascending, unique, each within `[1, event_count]` and `[1, 5]`.
    pub used_levels: Vec<u8>,
}

impl DeliveryModel {
    /// Check the model invariants. Never coerces a bad value.
    pub fn validate(&self) -> Result<()> {
        if self.event_count < 1 {
            return Err(RastroError::InvalidModel("event_count must be at least 1".into()));
        }
        if self.event_count > MAX_EVENT_COUNT {
            return Err(RastroError::InvalidModel(format!(
                "event_count must be at most {MAX_EVENT_COUNT}"
            )));
        }
        if self.exact_delivery_days < 1 || self.exact_delivery_days > MAX_DELIVERY_DAYS {
            return Err(RastroError::InvalidModel(format!(
                "exact_delivery_days must be within 1..={MAX_DELIVERY_DAYS}"
            )));
        }
        let mut previous = 0u8;
        for &level in &self.used_levels {
            if level <= previous {
                return Err(RastroError::InvalidModel(
                    "used_levels must be unique and ascending".into(),
                ));
            }
            if level > MAX_EVENT_LEVEL || u32::from(level) > self.event_count {
                return Err(RastroError::InvalidModel(format!(
                    "level {level} is outside 1..={}",
                    self.event_count.min(u32::from(MAX_EVENT_LEVEL))
                )));
            }
            previous = level;
        }
        Ok(())
    }

    /// Levels the generator walks. An empty set means every level the model can hold.
    pub fn effective_levels(&self) -> Vec<u8> {
        if self.used_levels.is_empty() {
            let top = self.event_count.min(u32::from(MAX_EVENT_LEVEL)) as u8;
            (1..=top).collect()
        } else {
            self.used_levels.clone()
        }
    }
}

/// Normalize user-provided levels into the stored ordered-set form.
pub fn ordered_levels(levels: &[u8]) -> Vec<u8> {
    levels.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

// ─── Trackings ──────────────────────────────────────

/// Displayed state of a simulated shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    AwaitingPosting,
    Posted,
    InTransit,
    Delivered,
}

impl TrackingStatus {
    /// Status shown for an event level.
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => TrackingStatus::AwaitingPosting,
            1 => TrackingStatus::Posted,
            l if l >= MAX_EVENT_LEVEL => TrackingStatus::Delivered,
            _ => TrackingStatus::InTransit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::AwaitingPosting => "awaiting_posting",
            TrackingStatus::Posted => "posted",
            TrackingStatus::InTransit => "in_transit",
            TrackingStatus::Delivered => "delivered",
        }
    }

    /// Customer-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            TrackingStatus::AwaitingPosting => "Aguardando postagem",
            TrackingStatus::Posted => "Objeto postado",
            TrackingStatus::InTransit => "Em trânsito",
            TrackingStatus::Delivered => "Entregue",
        }
    }
}

impl FromStr for TrackingStatus {
    type Err = RastroError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "awaiting_posting" => Ok(TrackingStatus::AwaitingPosting),
            "posted" => Ok(TrackingStatus::Posted),
            "in_transit" => Ok(TrackingStatus::InTransit),
            "delivered" => Ok(TrackingStatus::Delivered),
            other => Err(RastroError::Storage(format!("unknown tracking status '{other}'"))),
        }
    }
}

/// A simulated shipment shown to one customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tracking {
    pub id: String,
    pub owner_id: String,
    pub delivery_model_id: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub destination_city: String,
    pub destination_state: String,
    pub tracking_code: String,
    pub created_at: Instant,
    pub current_status: TrackingStatus,
    pub current_event_index: i32,
    pub is_completed: bool,
    pub clicks: u64,
    pub last_updated_at: Instant,
}

impl Tracking {
    /// Contact address for a notification channel, if the customer gave one.
    pub fn target_for(&self, channel: Channel) -> Option<&str> {
        let target = match channel {
            Channel::Email => self.customer_email.as_deref(),
            Channel::WhatsApp => self.customer_phone.as_deref(),
        };
        target.filter(|t| !t.trim().is_empty())
    }
}

/// One timestamped entry of a tracking's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: String,
    pub tracking_id: String,
    pub order_in_timeline: u32,
    pub simulated_datetime: Instant,
    pub event_level: u8,
    pub location_label: String,
    pub tone_of_voice_text: String,
}

/// Voice used by the message catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneOfVoice {
    #[default]
    Formal,
    Friendly,
}

impl ToneOfVoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToneOfVoice::Formal => "formal",
            ToneOfVoice::Friendly => "friendly",
        }
    }
}

impl FromStr for ToneOfVoice {
    type Err = RastroError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "formal" => Ok(ToneOfVoice::Formal),
            "friendly" => Ok(ToneOfVoice::Friendly),
            other => Err(RastroError::Config(format!("unknown tone of voice '{other}'"))),
        }
    }
}

// ─── Automation ──────────────────────────────────────

/// Notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    #[serde(rename = "whatsapp")]
    WhatsApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::WhatsApp => "whatsapp",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = RastroError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "email" => Ok(Channel::Email),
            "whatsapp" => Ok(Channel::WhatsApp),
            other => Err(RastroError::InvalidSetting(format!("unknown channel '{other}'"))),
        }
    }
}

/// How the notification delay is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingType {
    Hours,
    BusinessDays,
}

impl TimingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimingType::Hours => "hours",
            TimingType::BusinessDays => "business_days",
        }
    }
}

impl FromStr for TimingType {
    type Err = RastroError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hours" => Ok(TimingType::Hours),
            "business_days" => Ok(TimingType::BusinessDays),
            other => Err(RastroError::InvalidSetting(format!("unknown timing type '{other}'"))),
        }
    }
}

/// Per-owner, per-channel notification configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationSetting {
    pub owner_id: String,
    pub channel: Channel,
    pub timing_type: TimingType,
    pub timing_value: i64,
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    /// Subject line, used by e-mail only.
    pub subject: String,
    pub message_template: String,
    pub is_active: bool,
}

impl AutomationSetting {
    pub fn validate(&self) -> Result<()> {
        self.check_timing()?;
        if self.message_template.trim().is_empty() {
            return Err(RastroError::InvalidSetting("message_template is empty".into()));
        }
        Ok(())
    }

    /// `timing_value` within `1..=` the cap for its timing type.
    pub fn check_timing(&self) -> Result<()> {
        let max = match self.timing_type {
            TimingType::Hours => MAX_TIMING_HOURS,
            TimingType::BusinessDays => MAX_TIMING_BUSINESS_DAYS,
        };
        if self.timing_value < 1 || self.timing_value > max {
            return Err(RastroError::InvalidSetting(format!(
                "timing_value for {} must be within 1..={max}",
                self.timing_type.as_str()
            )));
        }
        Ok(())
    }
}

/// Raw setting as submitted by the owner, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationSettingDraft {
    pub channel: Channel,
    pub timing_type: TimingType,
    pub timing_value: i64,
    /// `HH:MM` or `HH:MM:SS`.
    pub window_start: String,
    pub window_end: String,
    #[serde(default)]
    pub subject: String,
    pub message_template: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl AutomationSettingDraft {
    /// Validate and bind the draft to its owner.
    pub fn into_setting(self, owner_id: &str) -> Result<AutomationSetting> {
        let setting = AutomationSetting {
            owner_id: owner_id.to_string(),
            channel: self.channel,
            timing_type: self.timing_type,
            timing_value: self.timing_value,
            window_start: parse_time_of_day(&self.window_start)?,
            window_end: parse_time_of_day(&self.window_end)?,
            subject: self.subject,
            message_template: self.message_template,
            is_active: self.is_active,
        };
        setting.validate()?;
        Ok(setting)
    }
}

/// Parse a time of day, rejecting anything that is not a wall-clock time.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| RastroError::InvalidSetting(format!("'{s}' is not a valid time of day")))
}

/// Lifecycle of a queued notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = RastroError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "failed" => Ok(NotificationStatus::Failed),
            "cancelled" => Ok(NotificationStatus::Cancelled),
            other => Err(RastroError::Storage(format!("unknown notification status '{other}'"))),
        }
    }
}

/// Time-gated dispatch job derived from a tracking and an automation setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: String,
    pub tracking_id: String,
    pub owner_id: String,
    pub channel: Channel,
    /// Customer address snapshotted at schedule time.
    pub target: String,
    pub due_at: Instant,
    pub status: NotificationStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Everything the worker needs to render a job, loaded at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    pub customer_name: String,
    pub tracking_code: String,
    pub subject: String,
    pub message_template: String,
    /// Send window of the setting, reused when a retry is re-queued.
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
}

/// Message after variable substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

// ─── Users & plans ──────────────────────────────────────

/// Owner profile with plan, credits and preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub plan: String,
    pub referral_credits: u32,
    pub tone_of_voice: ToneOfVoice,
    pub has_seen_onboarding: bool,
}

/// Plan-gated capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    EmailAutomation,
    #[serde(rename = "whatsapp_automation")]
    WhatsAppAutomation,
    CustomModels,
}

impl Feature {
    /// Feature required to automate a channel.
    pub fn for_channel(channel: Channel) -> Self {
        match channel {
            Channel::Email => Feature::EmailAutomation,
            Channel::WhatsApp => Feature::WhatsAppAutomation,
        }
    }
}

/// Capabilities resolved once per request from the owner's plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    features: BTreeSet<Feature>,
}

impl CapabilitySet {
    pub fn new(features: impl IntoIterator<Item = Feature>) -> Self {
        Self {
            features: features.into_iter().collect(),
        }
    }

    pub fn allows(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}
