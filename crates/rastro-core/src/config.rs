//! Rastro configuration system.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{RastroError, Result};
use crate::types::Feature;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RastroConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Public page base; the tracking code is appended as the last path segment.
    #[serde(default = "default_public_tracking_url")]
    pub public_tracking_url: String,
    /// Offset of the merchant's local calendar from UTC, in minutes.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    /// Plan used for users whose plan name is not configured.
    #[serde(default = "default_plan")]
    pub default_plan: String,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default = "default_plans")]
    pub plans: BTreeMap<String, PlanConfig>,
    #[serde(default)]
    pub channel: ChannelConfig,
}

fn default_database_path() -> String { "~/.rastro/rastro.db".into() }
fn default_public_tracking_url() -> String { "https://rastreio.example.com/r".into() }
fn default_utc_offset_minutes() -> i32 { -180 }
fn default_plan() -> String { "free".into() }

fn default_plans() -> BTreeMap<String, PlanConfig> {
    let mut plans = BTreeMap::new();
    plans.insert("free".into(), PlanConfig {
        monthly_limit: Some(10),
        features: vec![],
    });
    plans.insert("starter".into(), PlanConfig {
        monthly_limit: Some(60),
        features: vec![Feature::EmailAutomation],
    });
    plans.insert("pro".into(), PlanConfig {
        monthly_limit: Some(300),
        features: vec![
            Feature::EmailAutomation,
            Feature::WhatsAppAutomation,
            Feature::CustomModels,
        ],
    });
    plans.insert("unlimited".into(), PlanConfig {
        monthly_limit: None,
        features: vec![
            Feature::EmailAutomation,
            Feature::WhatsAppAutomation,
            Feature::CustomModels,
        ],
    });
    plans
}

impl Default for RastroConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            public_tracking_url: default_public_tracking_url(),
            utc_offset_minutes: default_utc_offset_minutes(),
            default_plan: default_plan(),
            dispatch: DispatchConfig::default(),
            plans: default_plans(),
            channel: ChannelConfig::default(),
        }
    }
}

impl RastroConfig {
    /// Load config from the default path (~/.rastro/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RastroError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RastroError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| RastroError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Rastro home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rastro")
    }

    /// Fixed offset of the merchant calendar.
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            RastroError::Config(format!("utc_offset_minutes {} out of range", self.utc_offset_minutes))
        })
    }

    fn validate(&self) -> Result<()> {
        self.utc_offset()?;
        if !self.plans.contains_key(&self.default_plan) {
            return Err(RastroError::Config(format!(
                "default_plan '{}' is not defined in [plans]",
                self.default_plan
            )));
        }
        if self.dispatch.workers == 0 {
            return Err(RastroError::Config("dispatch.workers must be at least 1".into()));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(RastroError::Config("dispatch.max_attempts must be at least 1".into()));
        }
        // A send that outlives its lease is settled as failed by the next claim.
        if self.dispatch.lease_secs <= self.dispatch.send_timeout_secs {
            return Err(RastroError::Config(format!(
                "dispatch.lease_secs ({}) must exceed dispatch.send_timeout_secs ({})",
                self.dispatch.lease_secs, self.dispatch.send_timeout_secs
            )));
        }
        Ok(())
    }
}

/// Subscription plan: monthly allowance and enabled features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// `None` = unlimited.
    #[serde(default)]
    pub monthly_limit: Option<u32>,
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// Notification dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    /// Visibility timeout of a claimed job.
    #[serde(default = "default_lease")]
    pub lease_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
    /// How long settled jobs are kept before purge.
    #[serde(default = "default_retention")]
    pub retention_hours: u64,
}

fn default_workers() -> usize { 2 }
fn default_poll_interval() -> u64 { 15 }
fn default_send_timeout() -> u64 { 20 }
fn default_lease() -> u64 { 120 }
fn default_max_attempts() -> u32 { 5 }
fn default_backoff_base() -> u64 { 60 }
fn default_backoff_max() -> u64 { 3600 }
fn default_retention() -> u64 { 72 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_secs: default_poll_interval(),
            send_timeout_secs: default_send_timeout(),
            lease_secs: default_lease(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            retention_hours: default_retention(),
        }
    }
}

/// Channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    #[serde(default)]
    pub email: Option<EmailChannelConfig>,
    #[serde(default)]
    pub whatsapp: Option<WhatsAppChannelConfig>,
}

/// SMTP sending configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailChannelConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
}

fn bool_true() -> bool { true }
fn default_smtp_port() -> u16 { 587 }

/// WhatsApp Business Cloud API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppChannelConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    pub access_token: String,
    pub phone_number_id: String,
    #[serde(default = "default_graph_api_url")]
    pub api_base_url: String,
}

fn default_graph_api_url() -> String { "https://graph.facebook.com/v21.0".into() }
