//! Platform database — SQLite schema for owners, delivery models, trackings and the
//! notification queue.
//!
//! Instants are stored as unix seconds and rehydrated with the store's fixed UTC offset,
//! so range predicates (month quota, due jobs) stay plain integer comparisons.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{FixedOffset, TimeZone};
use rastro_core::error::{RastroError, Result};
use rastro_core::types::{
    AutomationSetting, Channel, DeliveryModel, Instant, ToneOfVoice, UserProfile,
    ordered_levels,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};

/// Platform database manager.
pub struct PlatformDb {
    conn: Mutex<Connection>,
    offset: FixedOffset,
}

// ─── Column helpers ──────────────────────────────────────

/// Parse a TEXT column through the domain `FromStr`.
pub(crate) fn parse_col<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = RastroError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Rehydrate an INTEGER unix-seconds column.
pub(crate) fn instant_col(row: &Row, idx: usize, offset: FixedOffset) -> rusqlite::Result<Instant> {
    let secs: i64 = row.get(idx)?;
    offset.timestamp_opt(secs, 0).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp {secs} out of range").into(),
        )
    })
}

fn time_col(row: &Row, idx: usize) -> rusqlite::Result<chrono::NaiveTime> {
    let raw: String = row.get(idx)?;
    chrono::NaiveTime::parse_from_str(&raw, "%H:%M:%S")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const USER_SELECT: &str =
    "SELECT id,email,plan,referral_credits,tone_of_voice,has_seen_onboarding FROM users";

fn row_to_user(row: &Row) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: row.get(0)?,
        email: row.get(1)?,
        plan: row.get(2)?,
        referral_credits: row.get(3)?,
        tone_of_voice: parse_col(row, 4)?,
        has_seen_onboarding: row.get::<_, i32>(5)? != 0,
    })
}

const MODEL_SELECT: &str =
    "SELECT id,owner_id,name,exact_delivery_days,event_count,used_levels FROM delivery_models";

fn row_to_model(row: &Row) -> rusqlite::Result<DeliveryModel> {
    let levels: String = row.get(5)?;
    let used_levels: Vec<u8> = serde_json::from_str(&levels)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    Ok(DeliveryModel {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        exact_delivery_days: row.get(3)?,
        event_count: row.get(4)?,
        used_levels,
    })
}

const SETTING_SELECT: &str = "SELECT owner_id,channel,timing_type,timing_value,window_start,window_end,subject,message_template,is_active FROM automation_settings";

fn row_to_setting(row: &Row) -> rusqlite::Result<AutomationSetting> {
    Ok(AutomationSetting {
        owner_id: row.get(0)?,
        channel: parse_col(row, 1)?,
        timing_type: parse_col(row, 2)?,
        timing_value: row.get(3)?,
        window_start: time_col(row, 4)?,
        window_end: time_col(row, 5)?,
        subject: row.get(6)?,
        message_template: row.get(7)?,
        is_active: row.get::<_, i32>(8)? != 0,
    })
}

/// Delivery models seeded on a fresh store: (name, business days, events).
pub const SYSTEM_MODELS: [(&str, u32, u32); 3] =
    [("Expresso", 3, 5), ("Padrão", 7, 8), ("Econômico", 12, 10)];

impl PlatformDb {
    /// Open or create the platform database. Pass `:memory:` for a throwaway store.
    pub fn open(path: &Path, offset: FixedOffset) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| RastroError::Storage(format!("DB open error: {e}")))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| RastroError::Storage(format!("DB pragma error: {e}")))?;

        let db = Self {
            conn: Mutex::new(conn),
            offset,
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                plan TEXT NOT NULL DEFAULT 'free',
                referral_credits INTEGER NOT NULL DEFAULT 0,
                tone_of_voice TEXT NOT NULL DEFAULT 'formal',
                has_seen_onboarding INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS referrals (
                referred_id TEXT PRIMARY KEY REFERENCES users(id),
                referrer_id TEXT NOT NULL REFERENCES users(id),
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS delivery_models (
                id TEXT PRIMARY KEY,
                owner_id TEXT REFERENCES users(id),
                name TEXT NOT NULL,
                exact_delivery_days INTEGER NOT NULL,
                event_count INTEGER NOT NULL,
                used_levels TEXT NOT NULL DEFAULT '[]',
                archived INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS trackings (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL REFERENCES users(id),
                delivery_model_id TEXT NOT NULL REFERENCES delivery_models(id),
                customer_name TEXT NOT NULL,
                customer_email TEXT,
                customer_phone TEXT,
                destination_city TEXT NOT NULL,
                destination_state TEXT NOT NULL,
                tracking_code TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL,
                current_status TEXT NOT NULL,
                current_event_index INTEGER NOT NULL DEFAULT 0,
                is_completed INTEGER NOT NULL DEFAULT 0,
                clicks INTEGER NOT NULL DEFAULT 0,
                last_updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trackings_owner_created
                ON trackings(owner_id, created_at);
            CREATE TABLE IF NOT EXISTS tracking_events (
                id TEXT PRIMARY KEY,
                tracking_id TEXT NOT NULL REFERENCES trackings(id) ON DELETE CASCADE,
                order_in_timeline INTEGER NOT NULL,
                simulated_at INTEGER NOT NULL,
                event_level INTEGER NOT NULL,
                location_label TEXT NOT NULL,
                tone_of_voice_text TEXT NOT NULL,
                UNIQUE(tracking_id, order_in_timeline)
            );
            CREATE TABLE IF NOT EXISTS automation_settings (
                owner_id TEXT NOT NULL REFERENCES users(id),
                channel TEXT NOT NULL,
                timing_type TEXT NOT NULL,
                timing_value INTEGER NOT NULL,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                message_template TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (owner_id, channel)
            );
            CREATE TABLE IF NOT EXISTS scheduled_notifications (
                id TEXT PRIMARY KEY,
                tracking_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                target TEXT NOT NULL,
                due_at INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                lease_owner TEXT,
                lease_until INTEGER,
                in_flight INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_due
                ON scheduled_notifications(status, due_at);
            CREATE INDEX IF NOT EXISTS idx_notifications_tracking
                ON scheduled_notifications(tracking_id, channel);
            ",
            )
            .map_err(|e| RastroError::Storage(format!("Migration error: {e}")))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RastroError::Storage("connection mutex poisoned".into()))
    }

    /// Run `f` inside an IMMEDIATE transaction: the write lock is taken up front, so two
    /// writers never interleave between a read and the write that depends on it.
    pub fn immediate<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    // ─── Users ──────────────────────────────────────

    /// Create an owner profile. Returns the new id.
    pub fn create_user(&self, email: &str, plan: &str, now: Instant) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn()?
            .execute(
                "INSERT INTO users (id,email,plan,created_at) VALUES (?1,?2,?3,?4)",
                params![id, email, plan, now.timestamp()],
            )
            .map_err(|e| RastroError::Storage(format!("Create user: {e}")))?;
        tracing::info!("👤 User created: {} ({})", email, plan);
        Ok(id)
    }

    pub fn get_user(&self, id: &str) -> Result<UserProfile> {
        get_user_in(&*self.conn()?, id)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        Ok(self
            .conn()?
            .query_row(
                &format!("{USER_SELECT} WHERE email=?1"),
                params![email],
                row_to_user,
            )
            .optional()?)
    }

    pub fn set_user_plan(&self, id: &str, plan: &str) -> Result<()> {
        let changed = self
            .conn()?
            .execute("UPDATE users SET plan=?1 WHERE id=?2", params![plan, id])?;
        require_row(changed, "user", id)
    }

    pub fn set_tone_of_voice(&self, id: &str, tone: ToneOfVoice) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE users SET tone_of_voice=?1 WHERE id=?2",
            params![tone.as_str(), id],
        )?;
        require_row(changed, "user", id)
    }

    /// Persist that the owner dismissed the onboarding tour.
    pub fn mark_onboarding_seen(&self, id: &str) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE users SET has_seen_onboarding=1 WHERE id=?1",
            params![id],
        )?;
        require_row(changed, "user", id)
    }

    /// Credit `referrer` once for `referred`. Returns whether a credit was granted;
    /// repeats and self-referrals grant nothing.
    pub fn record_referral(&self, referrer: &str, referred: &str, now: Instant) -> Result<bool> {
        if referrer == referred {
            return Ok(false);
        }
        self.immediate(|tx| {
            get_user_in(tx, referrer)?;
            get_user_in(tx, referred)?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO referrals (referred_id,referrer_id,created_at) VALUES (?1,?2,?3)",
                params![referred, referrer, now.timestamp()],
            )?;
            if inserted == 0 {
                return Ok(false);
            }
            tx.execute(
                "UPDATE users SET referral_credits = referral_credits + 1 WHERE id=?1",
                params![referrer],
            )?;
            tracing::info!("🎁 Referral credit granted to {}", referrer);
            Ok(true)
        })
    }

    // ─── Delivery models ──────────────────────────────────────

    /// Insert the system models missing by name. Returns how many were added.
    pub fn seed_system_models(&self) -> Result<usize> {
        self.immediate(|tx| {
            let mut added = 0;
            for (name, days, events) in SYSTEM_MODELS {
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM delivery_models WHERE owner_id IS NULL AND name=?1)",
                    params![name],
                    |row| row.get(0),
                )?;
                if exists {
                    continue;
                }
                let model = DeliveryModel {
                    id: uuid::Uuid::new_v4().to_string(),
                    owner_id: None,
                    name: name.to_string(),
                    exact_delivery_days: days,
                    event_count: events,
                    used_levels: vec![1, 2, 3, 4, 5],
                };
                insert_model_in(tx, &model)?;
                added += 1;
            }
            if added > 0 {
                tracing::info!("📦 Seeded {} system delivery models", added);
            }
            Ok(added)
        })
    }

    pub fn insert_model(&self, model: &DeliveryModel) -> Result<()> {
        insert_model_in(&*self.conn()?, model)
    }

    pub fn get_model(&self, id: &str) -> Result<DeliveryModel> {
        get_model_in(&*self.conn()?, id)
    }

    /// Whether any tracking (live or not) points at the model.
    pub fn model_is_referenced(&self, id: &str) -> Result<bool> {
        Ok(self.conn()?.query_row(
            "SELECT EXISTS(SELECT 1 FROM trackings WHERE delivery_model_id=?1)",
            params![id],
            |row| row.get(0),
        )?)
    }

    pub fn model_is_archived(&self, id: &str) -> Result<bool> {
        let archived: Option<i32> = self
            .conn()?
            .query_row(
                "SELECT archived FROM delivery_models WHERE id=?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        archived
            .map(|a| a != 0)
            .ok_or_else(|| RastroError::NotFound(format!("delivery model {id}")))
    }

    /// System models plus the owner's live models.
    pub fn list_models(&self, owner_id: &str) -> Result<Vec<DeliveryModel>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{MODEL_SELECT} WHERE archived=0 AND (owner_id IS NULL OR owner_id=?1)
             ORDER BY owner_id IS NOT NULL, exact_delivery_days, name"
        ))?;
        let models = stmt
            .query_map(params![owner_id], row_to_model)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(models)
    }

    pub fn update_model(&self, model: &DeliveryModel) -> Result<()> {
        let levels = levels_json(&model.used_levels)?;
        let changed = self.conn()?.execute(
            "UPDATE delivery_models SET name=?1, exact_delivery_days=?2, event_count=?3, used_levels=?4
             WHERE id=?5 AND archived=0",
            params![
                model.name,
                model.exact_delivery_days,
                model.event_count,
                levels,
                model.id
            ],
        )?;
        require_row(changed, "delivery model", &model.id)
    }

    /// Retire `old_id` and insert its replacement in one step.
    pub fn replace_model(&self, old_id: &str, replacement: &DeliveryModel) -> Result<()> {
        self.immediate(|tx| {
            let changed = tx.execute(
                "UPDATE delivery_models SET archived=1 WHERE id=?1 AND archived=0",
                params![old_id],
            )?;
            require_row(changed, "delivery model", old_id)?;
            insert_model_in(tx, replacement)
        })
    }

    pub fn delete_model(&self, id: &str) -> Result<()> {
        let changed = self
            .conn()?
            .execute("DELETE FROM delivery_models WHERE id=?1", params![id])?;
        require_row(changed, "delivery model", id)
    }

    // ─── Automation settings ──────────────────────────────────────

    pub fn get_setting(&self, owner_id: &str, channel: Channel) -> Result<Option<AutomationSetting>> {
        get_setting_in(&*self.conn()?, owner_id, channel)
    }

    pub fn list_settings(&self, owner_id: &str) -> Result<Vec<AutomationSetting>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{SETTING_SELECT} WHERE owner_id=?1 ORDER BY channel"))?;
        let settings = stmt
            .query_map(params![owner_id], row_to_setting)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(settings)
    }
}

// ─── Transaction-scoped helpers ──────────────────────────────────────

pub(crate) fn require_row(changed: usize, what: &str, id: &str) -> Result<()> {
    if changed == 0 {
        Err(RastroError::NotFound(format!("{what} {id}")))
    } else {
        Ok(())
    }
}

fn levels_json(levels: &[u8]) -> Result<String> {
    serde_json::to_string(&ordered_levels(levels))
        .map_err(|e| RastroError::Storage(format!("Encode levels: {e}")))
}

pub(crate) fn get_user_in(conn: &Connection, id: &str) -> Result<UserProfile> {
    conn.query_row(&format!("{USER_SELECT} WHERE id=?1"), params![id], row_to_user)
        .optional()?
        .ok_or_else(|| RastroError::NotFound(format!("user {id}")))
}

pub(crate) fn get_model_in(conn: &Connection, id: &str) -> Result<DeliveryModel> {
    conn.query_row(&format!("{MODEL_SELECT} WHERE id=?1"), params![id], row_to_model)
        .optional()?
        .ok_or_else(|| RastroError::NotFound(format!("delivery model {id}")))
}

fn insert_model_in(conn: &Connection, model: &DeliveryModel) -> Result<()> {
    conn.execute(
        "INSERT INTO delivery_models (id,owner_id,name,exact_delivery_days,event_count,used_levels)
         VALUES (?1,?2,?3,?4,?5,?6)",
        params![
            model.id,
            model.owner_id,
            model.name,
            model.exact_delivery_days,
            model.event_count,
            levels_json(&model.used_levels)?
        ],
    )?;
    Ok(())
}

pub(crate) fn get_setting_in(
    conn: &Connection,
    owner_id: &str,
    channel: Channel,
) -> Result<Option<AutomationSetting>> {
    Ok(conn
        .query_row(
            &format!("{SETTING_SELECT} WHERE owner_id=?1 AND channel=?2"),
            params![owner_id, channel.as_str()],
            row_to_setting,
        )
        .optional()?)
}

pub(crate) fn upsert_setting_in(conn: &Connection, setting: &AutomationSetting, now: Instant) -> Result<()> {
    conn.execute(
        "INSERT INTO automation_settings
            (owner_id,channel,timing_type,timing_value,window_start,window_end,subject,message_template,is_active,updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
         ON CONFLICT(owner_id,channel) DO UPDATE SET
            timing_type=excluded.timing_type, timing_value=excluded.timing_value,
            window_start=excluded.window_start, window_end=excluded.window_end,
            subject=excluded.subject, message_template=excluded.message_template,
            is_active=excluded.is_active, updated_at=excluded.updated_at",
        params![
            setting.owner_id,
            setting.channel.as_str(),
            setting.timing_type.as_str(),
            setting.timing_value,
            setting.window_start.format("%H:%M:%S").to_string(),
            setting.window_end.format("%H:%M:%S").to_string(),
            setting.subject,
            setting.message_template,
            setting.is_active as i32,
            now.timestamp()
        ],
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveTime;
    use rastro_core::types::TimingType;

    pub(crate) fn brt() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    pub(crate) fn at(month: u32, day: u32, hour: u32) -> Instant {
        brt().with_ymd_and_hms(2026, month, day, hour, 0, 0).unwrap()
    }

    pub(crate) fn temp_db() -> PlatformDb {
        PlatformDb::open(Path::new(":memory:"), brt()).unwrap()
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let db = temp_db();
        db.migrate().unwrap();
        db.migrate().unwrap();
    }

    #[test]
    fn test_user_roundtrip_and_flags() {
        let db = temp_db();
        let id = db.create_user("ana@loja.com", "starter", at(10, 19, 10)).unwrap();
        let user = db.get_user(&id).unwrap();
        assert_eq!(user.plan, "starter");
        assert_eq!(user.tone_of_voice, ToneOfVoice::Formal);
        assert!(!user.has_seen_onboarding);

        db.mark_onboarding_seen(&id).unwrap();
        db.set_tone_of_voice(&id, ToneOfVoice::Friendly).unwrap();
        let user = db.get_user_by_email("ana@loja.com").unwrap().unwrap();
        assert!(user.has_seen_onboarding);
        assert_eq!(user.tone_of_voice, ToneOfVoice::Friendly);

        assert!(matches!(db.get_user("ghost"), Err(RastroError::NotFound(_))));
        assert!(matches!(db.mark_onboarding_seen("ghost"), Err(RastroError::NotFound(_))));
    }

    #[test]
    fn test_referral_credited_once() {
        let db = temp_db();
        let now = at(10, 19, 10);
        let referrer = db.create_user("a@loja.com", "free", now).unwrap();
        let referred = db.create_user("b@loja.com", "free", now).unwrap();

        assert!(db.record_referral(&referrer, &referred, now).unwrap());
        assert!(!db.record_referral(&referrer, &referred, now).unwrap());
        assert!(!db.record_referral(&referred, &referred, now).unwrap());
        assert_eq!(db.get_user(&referrer).unwrap().referral_credits, 1);
        assert!(matches!(
            db.record_referral(&referrer, "ghost", now),
            Err(RastroError::NotFound(_))
        ));
    }

    #[test]
    fn test_seed_system_models_once() {
        let db = temp_db();
        assert_eq!(db.seed_system_models().unwrap(), 3);
        assert_eq!(db.seed_system_models().unwrap(), 0);
        let owner = db.create_user("a@loja.com", "free", at(10, 19, 10)).unwrap();
        let models = db.list_models(&owner).unwrap();
        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Expresso", "Padrão", "Econômico"]);
        assert!(models.iter().all(|m| m.owner_id.is_none() && m.validate().is_ok()));
    }

    #[test]
    fn test_replace_model_archives_old() {
        let db = temp_db();
        let owner = db.create_user("a@loja.com", "pro", at(10, 19, 10)).unwrap();
        let model = DeliveryModel {
            id: "m1".into(),
            owner_id: Some(owner.clone()),
            name: "Rápido".into(),
            exact_delivery_days: 2,
            event_count: 4,
            used_levels: vec![4, 1, 2],
        };
        db.insert_model(&model).unwrap();
        assert_eq!(db.get_model("m1").unwrap().used_levels, vec![1, 2, 4]);

        let replacement = DeliveryModel {
            id: "m2".into(),
            exact_delivery_days: 3,
            ..model.clone()
        };
        db.replace_model("m1", &replacement).unwrap();
        assert!(db.model_is_archived("m1").unwrap());
        let live: Vec<String> = db.list_models(&owner).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(live, vec!["m2".to_string()]);
        // Archived models stay readable for the trackings that use them.
        assert_eq!(db.get_model("m1").unwrap().exact_delivery_days, 2);
    }

    #[test]
    fn test_setting_upsert() {
        let db = temp_db();
        let now = at(10, 19, 10);
        let owner = db.create_user("a@loja.com", "pro", now).unwrap();
        let mut setting = AutomationSetting {
            owner_id: owner.clone(),
            channel: Channel::WhatsApp,
            timing_type: TimingType::BusinessDays,
            timing_value: 2,
            window_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            window_end: NaiveTime::from_hms_opt(18, 30, 0).unwrap(),
            subject: String::new(),
            message_template: "Oi {nome_cliente}".into(),
            is_active: true,
        };
        upsert_setting_in(&db.conn().unwrap(), &setting, now).unwrap();
        setting.is_active = false;
        upsert_setting_in(&db.conn().unwrap(), &setting, now).unwrap();

        let stored = db.get_setting(&owner, Channel::WhatsApp).unwrap().unwrap();
        assert_eq!(stored, setting);
        assert_eq!(db.list_settings(&owner).unwrap().len(), 1);
        assert!(db.get_setting(&owner, Channel::Email).unwrap().is_none());
    }
}
