//! Notification scheduling — computes legal dispatch instants and renders messages.
//! No I/O: the caller persists the resulting job.

use chrono::Duration;
use rastro_core::error::{RastroError, Result};
use rastro_core::types::{
    AutomationSetting, DispatchContext, Instant, NotificationStatus, RenderedMessage,
    ScheduledNotification, TimingType, Tracking,
};
use rastro_timeline::calendar;

/// Template variable replaced by the public tracking URL.
pub const VAR_TRACKING_LINK: &str = "{link_rastreamento}";
/// Template variable replaced by the customer's name.
pub const VAR_CUSTOMER_NAME: &str = "{nome_cliente}";

/// Delay before the first notification, before window adjustment.
pub fn raw_due(created_at: Instant, setting: &AutomationSetting) -> Result<Instant> {
    setting.check_timing()?;
    let too_large = || RastroError::InvalidSetting("timing_value is too large".into());
    match setting.timing_type {
        TimingType::Hours => Duration::try_hours(setting.timing_value)
            .and_then(|delay| created_at.checked_add_signed(delay))
            .ok_or_else(too_large),
        TimingType::BusinessDays => u32::try_from(setting.timing_value)
            .ok()
            .and_then(|days| calendar::add_business_days(created_at, days))
            .ok_or_else(too_large),
    }
}

/// Final dispatch instant: never before `now`, always inside the send window.
pub fn due_at(created_at: Instant, setting: &AutomationSetting, now: Instant) -> Result<Instant> {
    let raw = raw_due(created_at, setting)?;
    let earliest = raw.max(now);
    Ok(calendar::next_time_in_window(
        earliest,
        setting.window_start,
        setting.window_end,
    ))
}

/// Build the job for `(tracking, setting)`.
///
/// Returns `Ok(None)` when the setting is inactive or the customer left no address for
/// the channel; nothing is enqueued in either case.
pub fn schedule(
    tracking: &Tracking,
    setting: &AutomationSetting,
    now: Instant,
) -> Result<Option<ScheduledNotification>> {
    setting.validate()?;
    if !setting.is_active {
        return Ok(None);
    }
    let Some(target) = tracking.target_for(setting.channel) else {
        tracing::debug!(
            "No {} address for tracking {}, skipping automation",
            setting.channel,
            tracking.tracking_code
        );
        return Ok(None);
    };

    let due = due_at(tracking.created_at, setting, now)?;
    tracing::debug!(
        "📅 {} notification for {} due at {}",
        setting.channel,
        tracking.tracking_code,
        due.to_rfc3339()
    );

    Ok(Some(ScheduledNotification {
        id: uuid::Uuid::new_v4().to_string(),
        tracking_id: tracking.id.clone(),
        owner_id: tracking.owner_id.clone(),
        channel: setting.channel,
        target: target.to_string(),
        due_at: due,
        status: NotificationStatus::Pending,
        attempts: 0,
        last_error: None,
    }))
}

/// Public page for a tracking code.
pub fn tracking_link(public_base_url: &str, tracking_code: &str) -> String {
    format!("{}/{}", public_base_url.trim_end_matches('/'), tracking_code)
}

/// Literal variable substitution. Unknown `{...}` placeholders stay verbatim.
pub fn render_template(template: &str, link: &str, customer_name: &str) -> String {
    template
        .replace(VAR_TRACKING_LINK, link)
        .replace(VAR_CUSTOMER_NAME, customer_name)
}

/// Render subject and body for a job.
pub fn render(context: &DispatchContext, public_base_url: &str) -> RenderedMessage {
    let link = tracking_link(public_base_url, &context.tracking_code);
    RenderedMessage {
        subject: render_template(&context.subject, &link, &context.customer_name),
        body: render_template(&context.message_template, &link, &context.customer_name),
    }
}
