//! Status projection — maps "now" onto a generated timeline.

use rastro_core::types::{DeliveryModel, Instant, Tracking, TrackingEvent, TrackingStatus};
use serde::Serialize;

use crate::calendar;

/// Derived view of a tracking at one instant. Recomputable from `(events, now)` at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Projection {
    pub status: TrackingStatus,
    /// Index of the latest occurred event, `-1` when none has occurred yet.
    pub event_index: i32,
    pub is_completed: bool,
    pub progress_percent: u8,
}

impl Projection {
    /// Event index clamped for display.
    pub fn display_index(&self) -> u32 {
        self.event_index.max(0) as u32
    }
}

/// Project the tracking's state at `now`. Pure: never touches the tracking.
pub fn project(
    tracking: &Tracking,
    model: &DeliveryModel,
    events: &[TrackingEvent],
    now: Instant,
) -> Projection {
    let occurred_count = events.iter().filter(|e| e.simulated_datetime <= now).count();
    // Levels cycle, so the furthest level reached so far keeps the status from regressing.
    let furthest_level = events
        .iter()
        .filter(|e| e.simulated_datetime <= now)
        .map(|e| e.event_level)
        .max();

    let is_completed = events
        .iter()
        .map(|e| e.simulated_datetime)
        .max()
        .is_some_and(|last| now >= last);

    let status = if is_completed {
        TrackingStatus::Delivered
    } else {
        match furthest_level.map(TrackingStatus::from_level) {
            None => TrackingStatus::AwaitingPosting,
            // Only the final event delivers.
            Some(TrackingStatus::Delivered) => TrackingStatus::InTransit,
            Some(status) => status,
        }
    };

    let promised = model.exact_delivery_days.max(1);
    let elapsed = calendar::business_days_between(tracking.created_at, now, promised);
    let progress_percent = (100 * elapsed / promised).min(100) as u8;

    Projection {
        status,
        event_index: occurred_count as i32 - 1,
        is_completed,
        progress_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::generator::TimelineGenerator;
    use chrono::{Duration, FixedOffset, TimeZone};
    use rastro_core::types::ToneOfVoice;

    fn created() -> Instant {
        FixedOffset::west_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 19, 10, 0, 0)
            .unwrap()
    }

    fn fixture(levels: &[u8]) -> (Tracking, DeliveryModel, Vec<TrackingEvent>) {
        fixture_with(6, levels)
    }

    fn fixture_with(event_count: u32, levels: &[u8]) -> (Tracking, DeliveryModel, Vec<TrackingEvent>) {
        let model = DeliveryModel {
            id: "m".into(),
            owner_id: None,
            name: "Padrão".into(),
            exact_delivery_days: 5,
            event_count,
            used_levels: levels.to_vec(),
        };
        let tracking = Tracking {
            id: "t1".into(),
            owner_id: "u1".into(),
            delivery_model_id: "m".into(),
            customer_name: "Ana".into(),
            customer_email: None,
            customer_phone: None,
            destination_city: "Recife".into(),
            destination_state: "PE".into(),
            tracking_code: "BR123456789".into(),
            created_at: created(),
            current_status: TrackingStatus::AwaitingPosting,
            current_event_index: 0,
            is_completed: false,
            clicks: 0,
            last_updated_at: created(),
        };
        let catalog = StaticCatalog::new();
        let events = TimelineGenerator::new(&catalog)
            .generate(&model, created(), 9, ToneOfVoice::Formal)
            .unwrap()
            .into_iter()
            .map(|e| TrackingEvent {
                id: format!("e{}", e.order_in_timeline),
                tracking_id: "t1".into(),
                order_in_timeline: e.order_in_timeline,
                simulated_datetime: e.simulated_datetime,
                event_level: e.event_level,
                location_label: e.location_label,
                tone_of_voice_text: e.tone_of_voice_text,
            })
            .collect();
        (tracking, model, events)
    }

    #[test]
    fn test_before_creation() {
        let (t, m, events) = fixture(&[1, 2, 3, 4, 5]);
        let p = project(&t, &m, &events, created() - Duration::hours(1));
        assert_eq!(p.event_index, -1);
        assert_eq!(p.display_index(), 0);
        assert_eq!(p.status, TrackingStatus::AwaitingPosting);
        assert_eq!(p.progress_percent, 0);
        assert!(!p.is_completed);
    }

    #[test]
    fn test_at_creation_posted() {
        let (t, m, events) = fixture(&[1, 2, 3, 4, 5]);
        let p = project(&t, &m, &events, created());
        assert_eq!(p.event_index, 0);
        assert_eq!(p.status, TrackingStatus::Posted);
    }

    #[test]
    fn test_midway_in_transit() {
        let (t, m, events) = fixture(&[1, 2, 3, 4, 5]);
        let now = events[2].simulated_datetime;
        let p = project(&t, &m, &events, now);
        assert_eq!(p.event_index, 2);
        assert_eq!(p.status, TrackingStatus::InTransit);
        assert!(p.progress_percent < 100);
    }

    #[test]
    fn test_completion() {
        let (t, m, events) = fixture(&[1, 2, 3]);
        let last = events.last().unwrap().simulated_datetime;
        let just_before = project(&t, &m, &events, last - Duration::seconds(1));
        assert!(!just_before.is_completed);

        let done = project(&t, &m, &events, last);
        assert!(done.is_completed);
        // Cyclic levels end on 3, but a finished timeline always reads as delivered.
        assert_eq!(done.status, TrackingStatus::Delivered);
        assert_eq!(done.progress_percent, 100);
        assert_eq!(done.event_index, 5);
    }

    #[test]
    fn test_cyclic_levels_deliver_only_on_completion() {
        // Eight events over levels 1..=5: the fifth event carries level 5 mid-timeline.
        let (t, m, events) = fixture_with(8, &[1, 2, 3, 4, 5]);
        assert_eq!(events[4].event_level, 5);
        assert_eq!(events[5].event_level, 1);

        let mut previous = TrackingStatus::AwaitingPosting;
        for event in &events {
            let p = project(&t, &m, &events, event.simulated_datetime);
            assert_eq!(p.status == TrackingStatus::Delivered, p.is_completed);
            assert!(rank(p.status) >= rank(previous), "{previous:?} -> {:?}", p.status);
            previous = p.status;
        }
        assert_eq!(previous, TrackingStatus::Delivered);

        let after_top = project(&t, &m, &events, events[5].simulated_datetime);
        assert_eq!(after_top.status, TrackingStatus::InTransit);
    }

    fn rank(status: TrackingStatus) -> u8 {
        match status {
            TrackingStatus::AwaitingPosting => 0,
            TrackingStatus::Posted => 1,
            TrackingStatus::InTransit => 2,
            TrackingStatus::Delivered => 3,
        }
    }

    #[test]
    fn test_progress_monotonic() {
        let (t, m, events) = fixture(&[1, 2, 3, 4, 5]);
        let mut previous = 0;
        for hour in 0..(24 * 10) {
            let p = project(&t, &m, &events, created() + Duration::hours(hour));
            assert!(p.progress_percent >= previous);
            assert!(p.progress_percent <= 100);
            previous = p.progress_percent;
        }
        assert_eq!(previous, 100);
    }
}
