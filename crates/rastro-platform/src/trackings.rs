//! Tracking and timeline rows.

use chrono::FixedOffset;
use rastro_core::error::{RastroError, Result};
use rastro_core::types::{Instant, Tracking, TrackingEvent};
use rastro_timeline::Projection;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::db::{PlatformDb, instant_col, parse_col, require_row};
use crate::quota::ReservationToken;

const TRACKING_SELECT: &str = "SELECT id,owner_id,delivery_model_id,customer_name,customer_email,customer_phone,destination_city,destination_state,tracking_code,created_at,current_status,current_event_index,is_completed,clicks,last_updated_at FROM trackings";

fn row_to_tracking(row: &Row, offset: FixedOffset) -> rusqlite::Result<Tracking> {
    Ok(Tracking {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        delivery_model_id: row.get(2)?,
        customer_name: row.get(3)?,
        customer_email: row.get(4)?,
        customer_phone: row.get(5)?,
        destination_city: row.get(6)?,
        destination_state: row.get(7)?,
        tracking_code: row.get(8)?,
        created_at: instant_col(row, 9, offset)?,
        current_status: parse_col(row, 10)?,
        current_event_index: row.get(11)?,
        is_completed: row.get::<_, i32>(12)? != 0,
        clicks: row.get::<_, i64>(13)?.max(0) as u64,
        last_updated_at: instant_col(row, 14, offset)?,
    })
}

fn row_to_event(row: &Row, offset: FixedOffset) -> rusqlite::Result<TrackingEvent> {
    Ok(TrackingEvent {
        id: row.get(0)?,
        tracking_id: row.get(1)?,
        order_in_timeline: row.get(2)?,
        simulated_datetime: instant_col(row, 3, offset)?,
        event_level: row.get(4)?,
        location_label: row.get(5)?,
        tone_of_voice_text: row.get(6)?,
    })
}

impl PlatformDb {
    pub fn get_tracking(&self, id: &str) -> Result<Tracking> {
        get_tracking_in(&*self.conn()?, id, self.offset())
    }

    pub fn get_tracking_by_code(&self, code: &str) -> Result<Option<Tracking>> {
        let offset = self.offset();
        Ok(self
            .conn()?
            .query_row(
                &format!("{TRACKING_SELECT} WHERE tracking_code=?1"),
                params![code],
                |row| row_to_tracking(row, offset),
            )
            .optional()?)
    }

    /// Newest first.
    pub fn list_trackings(&self, owner_id: &str) -> Result<Vec<Tracking>> {
        let offset = self.offset();
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{TRACKING_SELECT} WHERE owner_id=?1 ORDER BY created_at DESC, id"
        ))?;
        let trackings = stmt
            .query_map(params![owner_id], |row| row_to_tracking(row, offset))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trackings)
    }

    /// Timeline in `order_in_timeline` order.
    pub fn list_events(&self, tracking_id: &str) -> Result<Vec<TrackingEvent>> {
        let offset = self.offset();
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,tracking_id,order_in_timeline,simulated_at,event_level,location_label,tone_of_voice_text
             FROM tracking_events WHERE tracking_id=?1 ORDER BY order_in_timeline",
        )?;
        let events = stmt
            .query_map(params![tracking_id], |row| row_to_event(row, offset))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Record one public view: bump `clicks` and store the projection cache.
    /// Returns the updated tracking.
    pub fn record_view(&self, tracking_id: &str, projection: &Projection, now: Instant) -> Result<Tracking> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE trackings SET clicks = clicks + 1, current_status=?1, current_event_index=?2,
                is_completed=?3, last_updated_at=?4
             WHERE id=?5",
            params![
                projection.status.as_str(),
                projection.event_index,
                projection.is_completed as i32,
                now.timestamp(),
                tracking_id
            ],
        )?;
        require_row(changed, "tracking", tracking_id)?;
        get_tracking_in(&conn, tracking_id, self.offset())
    }
}

pub(crate) fn get_tracking_in(conn: &Connection, id: &str, offset: FixedOffset) -> Result<Tracking> {
    conn.query_row(
        &format!("{TRACKING_SELECT} WHERE id=?1"),
        params![id],
        |row| row_to_tracking(row, offset),
    )
    .optional()?
    .ok_or_else(|| RastroError::NotFound(format!("tracking {id}")))
}

pub(crate) fn tracking_code_taken_in(conn: &Connection, code: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM trackings WHERE tracking_code=?1)",
        params![code],
        |row| row.get(0),
    )?)
}

/// Insert a tracking and its full timeline. Requires a quota reservation taken in the
/// same transaction.
pub(crate) fn insert_tracking_in(
    conn: &Connection,
    _reservation: ReservationToken,
    tracking: &Tracking,
    events: &[TrackingEvent],
) -> Result<()> {
    conn.execute(
        "INSERT INTO trackings
            (id,owner_id,delivery_model_id,customer_name,customer_email,customer_phone,
             destination_city,destination_state,tracking_code,created_at,current_status,
             current_event_index,is_completed,clicks,last_updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
        params![
            tracking.id,
            tracking.owner_id,
            tracking.delivery_model_id,
            tracking.customer_name,
            tracking.customer_email,
            tracking.customer_phone,
            tracking.destination_city,
            tracking.destination_state,
            tracking.tracking_code,
            tracking.created_at.timestamp(),
            tracking.current_status.as_str(),
            tracking.current_event_index,
            tracking.is_completed as i32,
            tracking.clicks as i64,
            tracking.last_updated_at.timestamp()
        ],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO tracking_events
            (id,tracking_id,order_in_timeline,simulated_at,event_level,location_label,tone_of_voice_text)
         VALUES (?1,?2,?3,?4,?5,?6,?7)",
    )?;
    for event in events {
        stmt.execute(params![
            event.id,
            event.tracking_id,
            event.order_in_timeline,
            event.simulated_datetime.timestamp(),
            event.event_level,
            event.location_label,
            event.tone_of_voice_text
        ])?;
    }
    Ok(())
}

/// Count the owner's trackings created in `[start, end)`.
pub(crate) fn count_created_in(
    conn: &Connection,
    owner_id: &str,
    start: Instant,
    end: Instant,
) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM trackings WHERE owner_id=?1 AND created_at>=?2 AND created_at<?3",
        params![owner_id, start.timestamp(), end.timestamp()],
        |row| row.get(0),
    )?)
}

/// Delete a tracking; its events go with it.
pub(crate) fn delete_tracking_in(conn: &Connection, id: &str) -> Result<()> {
    let changed = conn.execute("DELETE FROM trackings WHERE id=?1", params![id])?;
    require_row(changed, "tracking", id)
}
