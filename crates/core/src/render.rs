//! Outbound message text. Pure functions; sending lives in `dispatch` and `restart`.

use std::fmt::Write;

use chrono::{DateTime, FixedOffset, Utc};

use crate::model::{Diff, Item};

/// Change notification: a header, then one section per non-empty bucket.
pub fn render_diff(label: &str, diff: &Diff) -> String {
    let mut msg = format!("⚠️ *CHANGES in {label}!*\n\n");

    if !diff.added.is_empty() {
        let _ = writeln!(msg, "+ *Added ({})*:", diff.added.len());
        for item in &diff.added {
            push_item(&mut msg, item);
        }
    }
    if !diff.removed.is_empty() {
        let _ = writeln!(msg, "- *Removed ({})*:", diff.removed.len());
        for item in &diff.removed {
            push_item(&mut msg, item);
        }
    }
    if !diff.changed.is_empty() {
        let _ = writeln!(msg, "~ *Changed ({})*:", diff.changed.len());
        for c in &diff.changed {
            let _ = write!(
                msg,
                "• {}\n  Before: {} | {}\n  Now: {} | {}\n\n",
                c.id, c.before.date, c.before.title, c.after.date, c.after.title
            );
        }
    }

    msg
}

fn push_item(msg: &mut String, item: &Item) {
    let _ = write!(msg, "• {} - {}\n{}\n\n", item.date, item.title, item.id);
}

/// Reply to a status query.
///
/// `last_check` is `None` until a detection cycle has fetched successfully.
pub fn render_status(
    last_check: Option<DateTime<Utc>>,
    last_item: Option<&Item>,
    display_offset: FixedOffset,
) -> String {
    let Some(checked_at) = last_check else {
        return "📊 Monitoring status:\nNo check has completed yet.".to_string();
    };

    let mut msg = String::from("📊 *Monitoring status*\n\n");
    let local = checked_at.with_timezone(&display_offset);
    let _ = writeln!(msg, "• Last check: {}", local.format("%d/%m/%Y %H:%M:%S"));

    match last_item {
        Some(item) => {
            let date = if item.date.is_empty() { "not provided" } else { item.date.as_str() };
            let _ = writeln!(msg, "• Latest document: {}", item.title);
            let _ = writeln!(msg, "• Document date: {date}");
            let _ = writeln!(msg, "• Link: {}", item.id);
        }
        None => msg.push_str("• Latest document: not found\n"),
    }
    msg
}

/// First part of the restart announcement.
pub fn render_restart_announcement(reason: &str) -> String {
    format!("⚠️ Update detected ({reason}). Going offline for a moment to restart.")
}

/// Second part of the restart announcement.
pub fn render_restarting_now() -> String {
    "🔁 Restarting now...".to_string()
}
