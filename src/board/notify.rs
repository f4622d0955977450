//! User notifications: ownership hand-overs and due-date reminders.
//!
//! Delivery is out of scope; rows are written to `notifications` and read
//! back through the API. Card-scoped kinds are unique per
//! `(user, card, kind)` so the due-date scan can run any number of times.

use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{Connection, Row, params};
use serde::Serialize;

use super::db::{self, BoardDb};
use super::models::{CardStatus, Notification, NotificationKind, Project, User};
use crate::errors::{EngineError, EngineResult};

/// Counts of rows created by one [`generate_due_notifications`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueScan {
    pub due_soon: usize,
    pub overdue: usize,
}

/// Parse a card due date: RFC 3339, or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

pub fn notify_ownership_transfer(
    conn: &Connection,
    project: &Project,
    from: &User,
    to: &User,
) -> EngineResult<Notification> {
    let notification = Notification {
        id: db::new_id(),
        user_id: to.id.clone(),
        card_id: None,
        kind: NotificationKind::OwnershipTransferred,
        message: format!(
            "{} transferred ownership of project '{}' to you",
            from.name, project.name
        ),
        read: false,
        created_at: db::now_rfc3339(),
    };
    conn.execute(
        "INSERT INTO notifications (id, user_id, card_id, kind, message, read, created_at)
         VALUES (?1, ?2, NULL, ?3, ?4, 0, ?5)",
        params![
            notification.id,
            notification.user_id,
            notification.kind.as_str(),
            notification.message,
            notification.created_at
        ],
    )?;
    Ok(notification)
}

/// End of the due-soon window, or `Validation` when it falls past the
/// representable calendar.
pub fn due_horizon(now: DateTime<Utc>, due_soon_days: u32) -> EngineResult<DateTime<Utc>> {
    Duration::try_days(i64::from(due_soon_days))
        .and_then(|window| now.checked_add_signed(window))
        .ok_or_else(|| {
            EngineError::validation(
                "due_soon_days",
                format!("a {} day window is out of range", due_soon_days),
            )
        })
}

/// Scan assigned, unfinished cards with a due date and upsert reminders.
/// The whole scan commits as one transaction.
pub fn generate_due_notifications(
    db: &BoardDb,
    now: DateTime<Utc>,
    due_soon_days: u32,
) -> EngineResult<DueScan> {
    let horizon = due_horizon(now, due_soon_days)?;
    let tx = db.begin()?;
    let mut scan = DueScan::default();
    {
        let mut stmt = tx.prepare(
            "SELECT id, title, assigned_user_id, due_date FROM cards
             WHERE assigned_user_id IS NOT NULL AND due_date IS NOT NULL AND status != ?1",
        )?;
        let rows = stmt.query_map(params![CardStatus::Done.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut insert = tx.prepare(
            "INSERT INTO notifications (id, user_id, card_id, kind, message, read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
             ON CONFLICT (user_id, card_id, kind) WHERE card_id IS NOT NULL DO NOTHING",
        )?;
        for row in rows {
            let (card_id, title, user_id, raw_due) = row?;
            let Some(due) = parse_due_date(&raw_due) else {
                tracing::warn!(card_id, due_date = %raw_due, "skipping card with unparseable due date");
                continue;
            };
            let (kind, message) = if due < now {
                (
                    NotificationKind::Overdue,
                    format!("Card '{}' is overdue since {}", title, raw_due),
                )
            } else if due <= horizon {
                (
                    NotificationKind::DueSoon,
                    format!("Card '{}' is due on {}", title, raw_due),
                )
            } else {
                continue;
            };
            let created = insert.execute(params![
                db::new_id(),
                user_id,
                card_id,
                kind.as_str(),
                message,
                db::now_rfc3339()
            ])?;
            match (kind, created) {
                (_, 0) => {}
                (NotificationKind::Overdue, _) => scan.overdue += 1,
                _ => scan.due_soon += 1,
            }
        }
    }
    tx.commit()?;

    tracing::info!(due_soon = scan.due_soon, overdue = scan.overdue, "due-date scan complete");
    Ok(scan)
}

/// A user's notifications, newest first.
pub fn list_notifications(
    conn: &Connection,
    user_id: &str,
    unread_only: bool,
) -> EngineResult<Vec<Notification>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, card_id, kind, message, read, created_at FROM notifications
         WHERE user_id = ?1 AND (?2 = 0 OR read = 0)
         ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt.query_map(params![user_id, unread_only], notification_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        let (mut notification, kind) = row?;
        notification.kind = NotificationKind::from_str(&kind)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse notification kind")?;
        out.push(notification);
    }
    Ok(out)
}

/// Mark one of the user's notifications as read.
pub fn mark_read(conn: &Connection, notification_id: &str, user_id: &str) -> EngineResult<()> {
    let changed = conn.execute(
        "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
        params![notification_id, user_id],
    )?;
    if changed == 0 {
        return Err(EngineError::not_found("Notification", notification_id));
    }
    Ok(())
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<(Notification, String)> {
    Ok((
        Notification {
            id: row.get(0)?,
            user_id: row.get(1)?,
            card_id: row.get(2)?,
            kind: NotificationKind::OwnershipTransferred,
            message: row.get(4)?,
            read: row.get(5)?,
            created_at: row.get(6)?,
        },
        row.get(3)?,
    ))
}
