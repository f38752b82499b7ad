//! SQLite-backed notification queue.
//!
//! A claim is an `UPDATE … RETURNING` that stamps `lease_owner`/`lease_until` on the
//! earliest due row. `in_flight` marks the window between the liveness check and the
//! outcome; cancellation never touches an in-flight row, and an in-flight row whose lease
//! ran out is settled as failed instead of being handed to another worker.

use chrono::{Duration, FixedOffset};
use rastro_core::error::Result;
use rastro_core::types::{Channel, DispatchContext, Instant, ScheduledNotification};
use rastro_scheduler::queue::{DispatchGate, JobOutcome, NotificationQueue};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::db::{PlatformDb, get_setting_in, instant_col, parse_col};

const JOB_COLUMNS: &str = "id,tracking_id,owner_id,channel,target,due_at,status,attempts,last_error";

/// Recorded on jobs whose worker vanished mid-send.
pub const LEASE_EXPIRED_IN_FLIGHT: &str = "lease expired during send; delivery unknown";

fn row_to_job(row: &Row, offset: FixedOffset) -> rusqlite::Result<ScheduledNotification> {
    Ok(ScheduledNotification {
        id: row.get(0)?,
        tracking_id: row.get(1)?,
        owner_id: row.get(2)?,
        channel: parse_col(row, 3)?,
        target: row.get(4)?,
        due_at: instant_col(row, 5, offset)?,
        status: parse_col(row, 6)?,
        attempts: row.get(7)?,
        last_error: row.get(8)?,
    })
}

pub(crate) fn insert_notification_in(
    conn: &Connection,
    job: &ScheduledNotification,
    now: Instant,
) -> Result<()> {
    conn.execute(
        "INSERT INTO scheduled_notifications
            (id,tracking_id,owner_id,channel,target,due_at,status,attempts,last_error,updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
        params![
            job.id,
            job.tracking_id,
            job.owner_id,
            job.channel.as_str(),
            job.target,
            job.due_at.timestamp(),
            job.status.as_str(),
            job.attempts,
            job.last_error,
            now.timestamp()
        ],
    )?;
    Ok(())
}

/// Cancel every pending, not-yet-started job of a tracking. Returns the count.
pub(crate) fn cancel_for_tracking_in(conn: &Connection, tracking_id: &str, now: Instant) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE scheduled_notifications
         SET status='cancelled', lease_owner=NULL, lease_until=NULL, updated_at=?2
         WHERE tracking_id=?1 AND status='pending' AND in_flight=0",
        params![tracking_id, now.timestamp()],
    )?)
}

/// Cancel the owner's pending, not-yet-started jobs on `channel`. Returns the affected
/// tracking ids.
pub(crate) fn cancel_for_channel_in(
    conn: &Connection,
    owner_id: &str,
    channel: Channel,
    now: Instant,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "UPDATE scheduled_notifications
         SET status='cancelled', lease_owner=NULL, lease_until=NULL, updated_at=?3
         WHERE owner_id=?1 AND channel=?2 AND status='pending' AND in_flight=0
         RETURNING tracking_id",
    )?;
    let mut ids = stmt
        .query_map(params![owner_id, channel.as_str(), now.timestamp()], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    ids.sort();
    ids.dedup();
    Ok(ids)
}

impl PlatformDb {
    /// Every job of a tracking, by due time.
    pub fn list_notifications(&self, tracking_id: &str) -> Result<Vec<ScheduledNotification>> {
        let offset = self.offset();
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_notifications WHERE tracking_id=?1 ORDER BY due_at, id"
        ))?;
        let jobs = stmt
            .query_map(params![tracking_id], |row| row_to_job(row, offset))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Terminal failures for the owner to review, most recent first.
    pub fn list_failed_notifications(&self, owner_id: &str) -> Result<Vec<ScheduledNotification>> {
        let offset = self.offset();
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_notifications
             WHERE owner_id=?1 AND status='failed' ORDER BY updated_at DESC, id"
        ))?;
        let jobs = stmt
            .query_map(params![owner_id], |row| row_to_job(row, offset))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn count_pending_notifications(&self) -> Result<u32> {
        Ok(self.conn()?.query_row(
            "SELECT COUNT(*) FROM scheduled_notifications WHERE status='pending'",
            [],
            |row| row.get(0),
        )?)
    }

    fn cancel_job_in(conn: &Connection, job_id: &str, now: Instant) -> Result<()> {
        conn.execute(
            "UPDATE scheduled_notifications
             SET status='cancelled', lease_owner=NULL, lease_until=NULL, in_flight=0, updated_at=?2
             WHERE id=?1",
            params![job_id, now.timestamp()],
        )?;
        Ok(())
    }
}

impl NotificationQueue for PlatformDb {
    fn claim_due(
        &self,
        worker_id: &str,
        now: Instant,
        lease: Duration,
    ) -> Result<Option<ScheduledNotification>> {
        let offset = self.offset();
        let now_ts = now.timestamp();
        self.immediate(|tx| {
            let abandoned = tx.execute(
                "UPDATE scheduled_notifications
                 SET status='failed', in_flight=0, lease_owner=NULL, lease_until=NULL,
                     attempts=attempts+1, last_error=?2, updated_at=?1
                 WHERE status='pending' AND in_flight=1 AND lease_until<=?1",
                params![now_ts, LEASE_EXPIRED_IN_FLIGHT],
            )?;
            if abandoned > 0 {
                tracing::warn!("⚠️ {} notifications abandoned mid-send marked failed", abandoned);
            }

            let job = tx
                .query_row(
                    &format!(
                        "UPDATE scheduled_notifications
                         SET lease_owner=?1, lease_until=?2, updated_at=?3
                         WHERE id = (
                             SELECT id FROM scheduled_notifications
                             WHERE status='pending' AND in_flight=0 AND due_at<=?3
                               AND (lease_until IS NULL OR lease_until<=?3)
                             ORDER BY due_at, id LIMIT 1
                         )
                         RETURNING {JOB_COLUMNS}"
                    ),
                    params![worker_id, (now + lease).timestamp(), now_ts],
                    |row| row_to_job(row, offset),
                )
                .optional()?;
            Ok(job)
        })
    }

    fn begin_dispatch(&self, job_id: &str, worker_id: &str, now: Instant) -> Result<DispatchGate> {
        let now_ts = now.timestamp();
        self.immediate(|tx| {
            let row: Option<(String, Option<String>, Option<i64>, String, String, String)> = tx
                .query_row(
                    "SELECT status,lease_owner,lease_until,tracking_id,owner_id,channel
                     FROM scheduled_notifications WHERE id=?1",
                    params![job_id],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    },
                )
                .optional()?;

            let Some((status, lease_owner, lease_until, tracking_id, owner_id, channel)) = row else {
                return Ok(DispatchGate::Cancelled);
            };
            if status == "cancelled" {
                return Ok(DispatchGate::Cancelled);
            }
            let leased = status == "pending"
                && lease_owner.as_deref() == Some(worker_id)
                && lease_until.is_some_and(|until| until > now_ts);
            if !leased {
                return Ok(DispatchGate::LeaseLost);
            }

            let tracking: Option<(String, String)> = tx
                .query_row(
                    "SELECT customer_name,tracking_code FROM trackings WHERE id=?1",
                    params![tracking_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((customer_name, tracking_code)) = tracking else {
                Self::cancel_job_in(tx, job_id, now)?;
                return Ok(DispatchGate::Cancelled);
            };

            let channel: Channel = channel.parse()?;
            let setting = get_setting_in(tx, &owner_id, channel)?.filter(|s| s.is_active);
            let Some(setting) = setting else {
                Self::cancel_job_in(tx, job_id, now)?;
                return Ok(DispatchGate::Cancelled);
            };

            tx.execute(
                "UPDATE scheduled_notifications SET in_flight=1, updated_at=?2 WHERE id=?1",
                params![job_id, now_ts],
            )?;
            Ok(DispatchGate::Proceed(DispatchContext {
                customer_name,
                tracking_code,
                subject: setting.subject,
                message_template: setting.message_template,
                window_start: setting.window_start,
                window_end: setting.window_end,
            }))
        })
    }

    fn complete(&self, job_id: &str, worker_id: &str, outcome: &JobOutcome, now: Instant) -> Result<()> {
        let now_ts = now.timestamp();
        let conn = self.conn()?;
        let changed = match outcome {
            JobOutcome::Sent => conn.execute(
                "UPDATE scheduled_notifications
                 SET status='sent', attempts=attempts+1, last_error=NULL, in_flight=0,
                     lease_owner=NULL, lease_until=NULL, updated_at=?3
                 WHERE id=?1 AND lease_owner=?2",
                params![job_id, worker_id, now_ts],
            )?,
            JobOutcome::Retry { due_at, error } => conn.execute(
                "UPDATE scheduled_notifications
                 SET status='pending', attempts=attempts+1, last_error=?4, due_at=?5, in_flight=0,
                     lease_owner=NULL, lease_until=NULL, updated_at=?3
                 WHERE id=?1 AND lease_owner=?2",
                params![job_id, worker_id, now_ts, error, due_at.timestamp()],
            )?,
            JobOutcome::Failed { error } => conn.execute(
                "UPDATE scheduled_notifications
                 SET status='failed', attempts=attempts+1, last_error=?4, in_flight=0,
                     lease_owner=NULL, lease_until=NULL, updated_at=?3
                 WHERE id=?1 AND lease_owner=?2",
                params![job_id, worker_id, now_ts, error],
            )?,
        };
        if changed == 0 {
            tracing::warn!(
                "⚠️ [{}] outcome for {} dropped: lease no longer held",
                worker_id,
                job_id
            );
        }
        Ok(())
    }

    fn release(&self, worker_id: &str) -> Result<usize> {
        Ok(self.conn()?.execute(
            "UPDATE scheduled_notifications SET lease_owner=NULL, lease_until=NULL
             WHERE lease_owner=?1 AND in_flight=0 AND status='pending'",
            params![worker_id],
        )?)
    }

    fn purge_settled(&self, before: Instant) -> Result<usize> {
        Ok(self.conn()?.execute(
            "DELETE FROM scheduled_notifications WHERE status!='pending' AND updated_at<?1",
            params![before.timestamp()],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{at, temp_db};
    use crate::db::upsert_setting_in;
    use chrono::NaiveTime;
    use rastro_core::types::{AutomationSetting, NotificationStatus, TimingType};

    /// Store with one owner, an active e-mail setting and a bare tracking row.
    fn fixture() -> (PlatformDb, String) {
        let db = temp_db();
        let now = at(10, 19, 8);
        let owner = db.create_user("loja@example.com", "pro", now).unwrap();
        db.seed_system_models().unwrap();
        let model = db.list_models(&owner).unwrap().remove(0);
        {
            let conn = db.conn().unwrap();
            upsert_setting_in(
                &conn,
                &AutomationSetting {
                    owner_id: owner.clone(),
                    channel: Channel::Email,
                    timing_type: TimingType::Hours,
                    timing_value: 1,
                    window_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    window_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                    subject: "Pedido {nome_cliente}".into(),
                    message_template: "{link_rastreamento}".into(),
                    is_active: true,
                },
                now,
            )
            .unwrap();
            conn.execute(
                "INSERT INTO trackings (id,owner_id,delivery_model_id,customer_name,destination_city,
                    destination_state,tracking_code,created_at,current_status,last_updated_at)
                 VALUES ('t1',?1,?2,'Ana','Recife','PE','BRAAAAAAAAA',?3,'posted',?3)",
                params![owner, model.id, now.timestamp()],
            )
            .unwrap();
        }
        (db, owner)
    }

    fn job(id: &str, owner: &str, due_at: Instant) -> ScheduledNotification {
        ScheduledNotification {
            id: id.into(),
            tracking_id: "t1".into(),
            owner_id: owner.into(),
            channel: Channel::Email,
            target: "ana@example.com".into(),
            due_at,
            status: NotificationStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    fn push(db: &PlatformDb, job: &ScheduledNotification) {
        insert_notification_in(&db.conn().unwrap(), job, at(10, 19, 8)).unwrap();
    }

    fn status_of(db: &PlatformDb, id: &str) -> NotificationStatus {
        db.list_notifications("t1")
            .unwrap()
            .into_iter()
            .find(|j| j.id == id)
            .unwrap()
            .status
    }

    #[test]
    fn test_claim_is_exclusive_and_ordered() {
        let (db, owner) = fixture();
        push(&db, &job("late", &owner, at(10, 19, 11)));
        push(&db, &job("early", &owner, at(10, 19, 10)));
        push(&db, &job("future", &owner, at(10, 20, 10)));
        let now = at(10, 19, 12);
        let lease = Duration::seconds(60);

        let a = db.claim_due("w1", now, lease).unwrap().unwrap();
        let b = db.claim_due("w2", now, lease).unwrap().unwrap();
        assert_eq!(a.id, "early");
        assert_eq!(b.id, "late");
        assert!(db.claim_due("w3", now, lease).unwrap().is_none());
    }

    #[test]
    fn test_expired_lease_is_reclaimable() {
        let (db, owner) = fixture();
        push(&db, &job("j1", &owner, at(10, 19, 10)));
        let now = at(10, 19, 12);
        db.claim_due("w1", now, Duration::seconds(60)).unwrap().unwrap();
        assert!(db.claim_due("w2", now, Duration::seconds(60)).unwrap().is_none());

        let later = now + Duration::seconds(61);
        let again = db.claim_due("w2", later, Duration::seconds(60)).unwrap().unwrap();
        assert_eq!(again.id, "j1");
        // The first worker lost its lease.
        assert_eq!(db.begin_dispatch("j1", "w1", later).unwrap(), DispatchGate::LeaseLost);
    }

    #[test]
    fn test_in_flight_lease_expiry_fails_instead_of_resending() {
        let (db, owner) = fixture();
        push(&db, &job("j1", &owner, at(10, 19, 10)));
        let now = at(10, 19, 12);
        db.claim_due("w1", now, Duration::seconds(60)).unwrap().unwrap();
        assert!(matches!(
            db.begin_dispatch("j1", "w1", now).unwrap(),
            DispatchGate::Proceed(_)
        ));

        let later = now + Duration::seconds(120);
        assert!(db.claim_due("w2", later, Duration::seconds(60)).unwrap().is_none());
        let failed = db.list_failed_notifications(&owner).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some(LEASE_EXPIRED_IN_FLIGHT));
    }

    #[test]
    fn test_begin_dispatch_builds_context() {
        let (db, owner) = fixture();
        push(&db, &job("j1", &owner, at(10, 19, 10)));
        let now = at(10, 19, 12);
        db.claim_due("w1", now, Duration::seconds(60)).unwrap();
        let DispatchGate::Proceed(ctx) = db.begin_dispatch("j1", "w1", now).unwrap() else {
            panic!("expected proceed");
        };
        assert_eq!(ctx.customer_name, "Ana");
        assert_eq!(ctx.tracking_code, "BRAAAAAAAAA");
        assert_eq!(ctx.subject, "Pedido {nome_cliente}");
        assert_eq!(ctx.window_end, NaiveTime::from_hms_opt(18, 0, 0).unwrap());
    }

    #[test]
    fn test_inactive_setting_cancels_at_dispatch() {
        let (db, owner) = fixture();
        push(&db, &job("j1", &owner, at(10, 19, 10)));
        db.conn()
            .unwrap()
            .execute("UPDATE automation_settings SET is_active=0", [])
            .unwrap();
        let now = at(10, 19, 12);
        db.claim_due("w1", now, Duration::seconds(60)).unwrap();
        assert_eq!(db.begin_dispatch("j1", "w1", now).unwrap(), DispatchGate::Cancelled);
        assert_eq!(status_of(&db, "j1"), NotificationStatus::Cancelled);
    }

    #[test]
    fn test_outcomes_and_release() {
        let (db, owner) = fixture();
        push(&db, &job("sent", &owner, at(10, 19, 9)));
        push(&db, &job("retry", &owner, at(10, 19, 10)));
        push(&db, &job("held", &owner, at(10, 19, 11)));
        let now = at(10, 19, 12);
        let lease = Duration::seconds(60);

        db.claim_due("w1", now, lease).unwrap();
        db.begin_dispatch("sent", "w1", now).unwrap();
        db.complete("sent", "w1", &JobOutcome::Sent, now).unwrap();

        db.claim_due("w1", now, lease).unwrap();
        db.begin_dispatch("retry", "w1", now).unwrap();
        let retry_at = at(10, 19, 13);
        db.complete(
            "retry",
            "w1",
            &JobOutcome::Retry {
                due_at: retry_at,
                error: "503".into(),
            },
            now,
        )
        .unwrap();

        db.claim_due("w1", now, lease).unwrap();
        assert_eq!(db.release("w1").unwrap(), 1);

        let jobs = db.list_notifications("t1").unwrap();
        let by_id = |id: &str| jobs.iter().find(|j| j.id == id).unwrap().clone();
        assert_eq!(by_id("sent").status, NotificationStatus::Sent);
        assert_eq!(by_id("sent").attempts, 1);
        assert_eq!(by_id("retry").status, NotificationStatus::Pending);
        assert_eq!(by_id("retry").due_at, retry_at);
        assert_eq!(by_id("retry").last_error.as_deref(), Some("503"));
        // Released, so immediately claimable again.
        assert_eq!(db.claim_due("w2", now, lease).unwrap().unwrap().id, "held");
    }

    #[test]
    fn test_purge_only_settled() {
        let (db, owner) = fixture();
        push(&db, &job("j1", &owner, at(10, 19, 9)));
        push(&db, &job("j2", &owner, at(10, 19, 9)));
        let now = at(10, 19, 12);
        db.claim_due("w1", now, Duration::seconds(60)).unwrap();
        db.begin_dispatch("j1", "w1", now).unwrap();
        db.complete("j1", "w1", &JobOutcome::Sent, now).unwrap();

        assert_eq!(db.purge_settled(now).unwrap(), 0);
        assert_eq!(db.purge_settled(now + Duration::hours(1)).unwrap(), 1);
        let left: Vec<String> = db.list_notifications("t1").unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(left, vec!["j2".to_string()]);
    }
}
