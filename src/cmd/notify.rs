//! Due-date notification scan (`quadro notify`).

use std::path::Path;

use anyhow::Result;
use quadro::board::notify;
use quadro::config::QuadroConfig;

pub fn cmd_notify(project_dir: &Path, config: &QuadroConfig, due_soon_days: Option<u32>) -> Result<()> {
    let days = due_soon_days.unwrap_or(config.notifications.due_soon_days);
    let db = super::open_db(project_dir, config)?;
    let scan = notify::generate_due_notifications(&db, chrono::Utc::now(), days)?;
    println!(
        "Notifications created: {} due soon, {} overdue (window {} day(s))",
        scan.due_soon, scan.overdue, days
    );
    Ok(())
}
