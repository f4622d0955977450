//! Transfer audit trail.
//!
//! `log` is called inside the same transaction as the mutation it records, so
//! a rolled-back transfer never leaves a row behind. Rows are append-only;
//! the schema rejects UPDATE and DELETE on `transfer_logs` with a trigger.

use std::str::FromStr;

use anyhow::Context;
use rusqlite::{Connection, Row, params};

use super::db;
use super::models::{EntityType, TransferLog, TransferType};
use crate::errors::EngineResult;

/// One side of a transfer: a container or user, with a title snapshot.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub entity_type: EntityType,
    pub id: String,
    pub title: String,
}

impl Endpoint {
    pub fn new(entity_type: EntityType, id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
            title: title.into(),
        }
    }
}

/// Everything needed to write one TransferLog row.
#[derive(Debug, Clone)]
pub struct TransferEntry {
    pub transfer_type: TransferType,
    pub entity: Endpoint,
    /// For clones, the card the new entity was copied from.
    pub source_entity_id: Option<String>,
    pub from: Endpoint,
    pub to: Endpoint,
    pub user_id: String,
}

const LOG_FIELDS: &str = "id, type, entity_type, entity_id, entity_title, source_entity_id, from_type, from_id, from_title, to_type, to_id, to_title, user_id, created_at";

pub fn log(conn: &Connection, entry: TransferEntry) -> EngineResult<TransferLog> {
    let row = TransferLog {
        id: db::new_id(),
        transfer_type: entry.transfer_type,
        entity_type: entry.entity.entity_type,
        entity_id: entry.entity.id,
        entity_title: entry.entity.title,
        source_entity_id: entry.source_entity_id,
        from_type: entry.from.entity_type,
        from_id: entry.from.id,
        from_title: entry.from.title,
        to_type: entry.to.entity_type,
        to_id: entry.to.id,
        to_title: entry.to.title,
        user_id: entry.user_id,
        created_at: db::now_rfc3339(),
    };
    conn.execute(
        &format!(
            "INSERT INTO transfer_logs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            LOG_FIELDS
        ),
        params![
            row.id,
            row.transfer_type.as_str(),
            row.entity_type.as_str(),
            row.entity_id,
            row.entity_title,
            row.source_entity_id,
            row.from_type.as_str(),
            row.from_id,
            row.from_title,
            row.to_type.as_str(),
            row.to_id,
            row.to_title,
            row.user_id,
            row.created_at
        ],
    )?;
    tracing::debug!(
        log_id = %row.id,
        kind = row.transfer_type.as_str(),
        entity = %row.entity_id,
        "transfer logged"
    );
    Ok(row)
}

/// Transfers performed by `user_id`, newest first.
pub fn history_for_user(
    conn: &Connection,
    user_id: &str,
    limit: u32,
    offset: u32,
) -> EngineResult<Vec<TransferLog>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transfer_logs WHERE user_id = ?1
         ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
        LOG_FIELDS
    ))?;
    let rows = stmt.query_map(params![user_id, limit, offset], LogRow::from_row)?;
    collect(rows)
}

/// Every transfer that touched an entity, newest first. Clones are found by
/// their source card as well as by the clone itself.
pub fn history_for_entity(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
) -> EngineResult<Vec<TransferLog>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transfer_logs
         WHERE entity_type = ?1 AND (entity_id = ?2 OR source_entity_id = ?2)
         ORDER BY created_at DESC, rowid DESC",
        LOG_FIELDS
    ))?;
    let rows = stmt.query_map(params![entity_type.as_str(), entity_id], LogRow::from_row)?;
    collect(rows)
}

fn collect(
    rows: impl Iterator<Item = rusqlite::Result<LogRow>>,
) -> EngineResult<Vec<TransferLog>> {
    let mut logs = Vec::new();
    for row in rows {
        logs.push(row?.into_log()?);
    }
    Ok(logs)
}

/// Raw row before the enum columns are parsed.
struct LogRow {
    id: String,
    transfer_type: String,
    entity_type: String,
    entity_id: String,
    entity_title: String,
    source_entity_id: Option<String>,
    from_type: String,
    from_id: String,
    from_title: String,
    to_type: String,
    to_id: String,
    to_title: String,
    user_id: String,
    created_at: String,
}

impl LogRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            transfer_type: row.get(1)?,
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
            entity_title: row.get(4)?,
            source_entity_id: row.get(5)?,
            from_type: row.get(6)?,
            from_id: row.get(7)?,
            from_title: row.get(8)?,
            to_type: row.get(9)?,
            to_id: row.get(10)?,
            to_title: row.get(11)?,
            user_id: row.get(12)?,
            created_at: row.get(13)?,
        })
    }

    fn into_log(self) -> EngineResult<TransferLog> {
        let entity_type = |s: &str| {
            EntityType::from_str(s)
                .map_err(|e| anyhow::anyhow!(e))
                .context("Failed to parse transfer log entity type")
        };
        Ok(TransferLog {
            transfer_type: TransferType::from_str(&self.transfer_type)
                .map_err(|e| anyhow::anyhow!(e))
                .context("Failed to parse transfer type")?,
            entity_type: entity_type(&self.entity_type)?,
            from_type: entity_type(&self.from_type)?,
            to_type: entity_type(&self.to_type)?,
            id: self.id,
            entity_id: self.entity_id,
            entity_title: self.entity_title,
            source_entity_id: self.source_entity_id,
            from_id: self.from_id,
            from_title: self.from_title,
            to_id: self.to_id,
            to_title: self.to_title,
            user_id: self.user_id,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::BoardDb;
    use anyhow::Result;

    fn board_move(user: &str, board: &str, from: &str, to: &str) -> TransferEntry {
        TransferEntry {
            transfer_type: TransferType::BoardMove,
            entity: Endpoint::new(EntityType::Board, board, "Sprint"),
            source_entity_id: None,
            from: Endpoint::new(EntityType::Project, from, "From"),
            to: Endpoint::new(EntityType::Project, to, "To"),
            user_id: user.to_string(),
        }
    }

    #[test]
    fn test_history_is_newest_first_and_paged() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        for i in 0..5 {
            log(db.conn(), board_move("u1", &format!("b{}", i), "p1", "p2"))?;
        }
        log(db.conn(), board_move("u2", "bx", "p1", "p2"))?;

        let page = history_for_user(db.conn(), "u1", 2, 0)?;
        let ids: Vec<_> = page.iter().map(|l| l.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["b4", "b3"]);

        let next = history_for_user(db.conn(), "u1", 2, 2)?;
        let ids: Vec<_> = next.iter().map(|l| l.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["b2", "b1"]);
        Ok(())
    }

    #[test]
    fn test_history_for_entity_includes_clone_source() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        log(
            db.conn(),
            TransferEntry {
                transfer_type: TransferType::CardClone,
                entity: Endpoint::new(EntityType::Card, "clone-1", "Task (cópia)"),
                source_entity_id: Some("card-1".into()),
                from: Endpoint::new(EntityType::Board, "b1", "One"),
                to: Endpoint::new(EntityType::Board, "b2", "Two"),
                user_id: "u1".into(),
            },
        )?;

        let by_source = history_for_entity(db.conn(), EntityType::Card, "card-1")?;
        assert_eq!(by_source.len(), 1);
        assert_eq!(by_source[0].entity_id, "clone-1");
        assert_eq!(by_source[0].transfer_type, TransferType::CardClone);

        assert_eq!(history_for_entity(db.conn(), EntityType::Card, "clone-1")?.len(), 1);
        assert!(history_for_entity(db.conn(), EntityType::Board, "card-1")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_logs_are_append_only() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let row = log(db.conn(), board_move("u1", "b1", "p1", "p2"))?;

        let update = db.conn().execute(
            "UPDATE transfer_logs SET to_title = 'edited' WHERE id = ?1",
            params![row.id],
        );
        assert!(update.is_err());
        let delete = db
            .conn()
            .execute("DELETE FROM transfer_logs WHERE id = ?1", params![row.id]);
        assert!(delete.is_err());

        let stored = history_for_user(db.conn(), "u1", 10, 0)?;
        assert_eq!(stored, vec![row]);
        Ok(())
    }
}
