//! Cross-container transfers.
//!
//! Each operation checks permissions, mutates, and writes exactly one
//! transfer log row inside a single transaction. Ownership transfers then
//! emit a notification after commit; a failure there is logged and dropped.

use super::access;
use super::audit::{self, Endpoint, TransferEntry};
use super::db::{self, BoardDb};
use super::models::*;
use super::notify;
use super::position::{self, Placement};
use super::repo::{self, Container};
use crate::errors::{EngineError, EngineResult};

/// Suffix appended to a cloned card's title.
pub const CLONE_SUFFIX: &str = " (cópia)";

#[derive(Debug, Clone, Copy, Default)]
pub struct CloneOptions {
    /// Recreate the source card's tags (by name) in the target project.
    pub copy_tags: bool,
}

/// Hand a project to another user. Only the current owner may do this.
pub fn transfer_project_ownership(
    db: &BoardDb,
    user_id: &str,
    project_id: &str,
    new_owner_id: &str,
) -> EngineResult<Project> {
    let tx = db.begin()?;

    let project = repo::get_project(&tx, project_id)?;
    access::require_owner(user_id, &project, "transfer ownership")?;
    let new_owner = repo::get_user(&tx, new_owner_id)?;
    if new_owner.id == user_id {
        return Err(EngineError::BadRequest(
            "cannot transfer ownership to yourself".into(),
        ));
    }
    let old_owner = repo::get_user(&tx, user_id)?;

    repo::set_project_owner(&tx, &project.id, user_id, &new_owner.id)?;
    audit::log(
        &tx,
        TransferEntry {
            transfer_type: TransferType::OwnershipTransfer,
            entity: Endpoint::new(EntityType::Project, &project.id, &project.name),
            source_entity_id: None,
            from: Endpoint::new(EntityType::User, &old_owner.id, &old_owner.name),
            to: Endpoint::new(EntityType::User, &new_owner.id, &new_owner.name),
            user_id: user_id.to_string(),
        },
    )?;
    let updated = repo::get_project(&tx, &project.id)?;
    tx.commit()?;

    tracing::info!(
        project_id = %updated.id,
        from = %old_owner.id,
        to = %new_owner.id,
        "project ownership transferred"
    );

    if let Err(e) = notify::notify_ownership_transfer(db.conn(), &updated, &old_owner, &new_owner)
    {
        tracing::warn!(project_id = %updated.id, error = %e, "ownership notification failed");
    }
    Ok(updated)
}

/// Re-parent a board under another project the caller can reach.
pub fn move_board(
    db: &BoardDb,
    user_id: &str,
    board_id: &str,
    target_project_id: &str,
) -> EngineResult<Board> {
    let tx = db.begin()?;

    let BoardAncestry { board, project } = repo::get_board_ancestry(&tx, board_id)?;
    access::require_owner(user_id, &project, "move its boards")?;
    let target = repo::get_project(&tx, target_project_id)?;
    access::require_access(&tx, user_id, &target)?;
    if target.id == project.id {
        return Err(EngineError::BadRequest(
            "board is already in this project".into(),
        ));
    }

    repo::relocate_board(&tx, &board.id, &target.id)?;
    audit::log(
        &tx,
        TransferEntry {
            transfer_type: TransferType::BoardMove,
            entity: Endpoint::new(EntityType::Board, &board.id, &board.name),
            source_entity_id: None,
            from: Endpoint::new(EntityType::Project, &project.id, &project.name),
            to: Endpoint::new(EntityType::Project, &target.id, &target.name),
            user_id: user_id.to_string(),
        },
    )?;
    let moved = repo::get_board(&tx, &board.id)?;
    tx.commit()?;

    tracing::info!(board_id = %moved.id, from = %project.id, to = %target.id, "board moved");
    Ok(moved)
}

/// Move a card to the end of a column on another (or the same) board.
pub fn move_card(
    db: &BoardDb,
    user_id: &str,
    card_id: &str,
    target_board_id: &str,
    target_column_id: Option<&str>,
) -> EngineResult<Card> {
    let tx = db.begin()?;

    let source = repo::get_card_ancestry(&tx, card_id)?;
    let (target, column) = resolve_destination(&tx, user_id, &source, target_board_id, target_column_id)?;
    if column.id == source.card.column_id {
        return Err(EngineError::BadRequest(
            "card is already in this column".into(),
        ));
    }

    let (_, dest_cards) = repo::get_column_with_cards(&tx, &column.id)?;
    let value = position::allocate(&dest_cards, None).value;
    let (_, source_cards) = repo::get_column_with_cards(&tx, &source.column.id)?;
    let remaining: Vec<Card> = source_cards
        .into_iter()
        .filter(|c| c.id != source.card.id)
        .collect();
    let gap: Vec<Placement> = position::resequence(&remaining);

    repo::relocate_card(&tx, &source.card.id, &column, value)?;
    repo::write_placements(&tx, Container::Column(&source.column.id), &gap)?;
    repo::validate_unique(&tx, Container::Column(&source.column.id))?;
    repo::validate_unique(&tx, Container::Column(&column.id))?;

    audit::log(
        &tx,
        TransferEntry {
            transfer_type: TransferType::CardMove,
            entity: Endpoint::new(EntityType::Card, &source.card.id, &source.card.title),
            source_entity_id: None,
            from: Endpoint::new(EntityType::Board, &source.board.id, &source.board.name),
            to: Endpoint::new(EntityType::Board, &target.board.id, &target.board.name),
            user_id: user_id.to_string(),
        },
    )?;
    let moved = repo::get_card(&tx, &source.card.id)?;
    tx.commit()?;

    tracing::info!(
        card_id = %moved.id,
        from_board = %source.board.id,
        to_board = %moved.board_id,
        "card transferred"
    );
    Ok(moved)
}

/// Copy a card to the end of a destination column. The source is untouched.
pub fn clone_card(
    db: &BoardDb,
    user_id: &str,
    card_id: &str,
    target_board_id: &str,
    target_column_id: Option<&str>,
    options: CloneOptions,
) -> EngineResult<Card> {
    let tx = db.begin()?;

    let source = repo::get_card_ancestry(&tx, card_id)?;
    let (target, column) = resolve_destination(&tx, user_id, &source, target_board_id, target_column_id)?;
    let source_tags = db::card_tags(&tx, &source.card.id)?;

    let (_, dest_cards) = repo::get_column_with_cards(&tx, &column.id)?;
    let now = db::now_rfc3339();
    let clone = Card {
        id: db::new_id(),
        board_id: target.board.id.clone(),
        column_id: column.id.clone(),
        title: format!("{}{}", source.card.title, CLONE_SUFFIX),
        description: source.card.description.clone(),
        position: position::allocate(&dest_cards, None).value,
        status: CardStatus::Backlog,
        priority: source.card.priority,
        reporter_id: Some(user_id.to_string()),
        assigned_user_id: None,
        due_date: source.card.due_date.clone(),
        created_at: now.clone(),
        updated_at: now,
    };
    db::insert_card(&tx, &clone)?;
    repo::validate_unique(&tx, Container::Column(&column.id))?;

    if options.copy_tags {
        for tag in &source_tags {
            let copy = db::find_or_create_tag(&tx, &target.project.id, &tag.name, &tag.color)?;
            tx.execute(
                "INSERT OR IGNORE INTO card_tags (card_id, tag_id) VALUES (?1, ?2)",
                rusqlite::params![clone.id, copy.id],
            )?;
        }
    } else if !source_tags.is_empty() {
        tracing::debug!(card_id, tags = source_tags.len(), "clone skips source tags");
    }

    audit::log(
        &tx,
        TransferEntry {
            transfer_type: TransferType::CardClone,
            entity: Endpoint::new(EntityType::Card, &clone.id, &clone.title),
            source_entity_id: Some(source.card.id.clone()),
            from: Endpoint::new(EntityType::Board, &source.board.id, &source.board.name),
            to: Endpoint::new(EntityType::Board, &target.board.id, &target.board.name),
            user_id: user_id.to_string(),
        },
    )?;
    tx.commit()?;

    tracing::info!(source = %source.card.id, clone = %clone.id, "card cloned");
    Ok(clone)
}

/// Check access on both ends and pick the destination column.
fn resolve_destination(
    conn: &rusqlite::Connection,
    user_id: &str,
    source: &CardAncestry,
    target_board_id: &str,
    target_column_id: Option<&str>,
) -> EngineResult<(BoardAncestry, Column)> {
    access::require_access(conn, user_id, &source.project)?;
    let target = repo::get_board_ancestry(conn, target_board_id)?;
    access::require_access(conn, user_id, &target.project)?;

    let column = match target_column_id {
        Some(id) => {
            let column = repo::get_column(conn, id)?;
            if column.board_id != target.board.id {
                return Err(EngineError::not_found("Column", id));
            }
            column
        }
        None => repo::first_column(conn, &target.board.id)?.ok_or_else(|| {
            EngineError::BadRequest("target board has no columns".into())
        })?,
    };
    Ok((target, column))
}

/// Destinations the caller may pick for a transfer of `entity_type`.
pub fn list_targets(
    db: &BoardDb,
    user_id: &str,
    entity_type: EntityType,
) -> EngineResult<Vec<TransferTarget>> {
    let conn = db.conn();
    match entity_type {
        EntityType::Project => {
            let me = repo::get_user(conn, user_id)?;
            let Some(company_id) = me.company_id else {
                return Ok(Vec::new());
            };
            let mut stmt = conn.prepare(
                "SELECT id, name, email FROM users
                 WHERE company_id = ?1 AND id != ?2 ORDER BY name, id",
            )?;
            let rows = stmt.query_map(rusqlite::params![company_id, user_id], |row| {
                Ok(TransferTarget::User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                })
            })?;
            let mut targets = Vec::new();
            for row in rows {
                targets.push(row?);
            }
            Ok(targets)
        }
        EntityType::Board => Ok(access::accessible_projects(conn, user_id)?
            .into_iter()
            .map(|p| TransferTarget::Project {
                id: p.id,
                name: p.name,
            })
            .collect()),
        EntityType::Card => {
            let mut targets = Vec::new();
            for project in access::accessible_projects(conn, user_id)? {
                for board in db.list_boards(&project.id)? {
                    let (_, columns) = repo::get_board_with_columns(conn, &board.id)?;
                    targets.push(TransferTarget::Board {
                        id: board.id,
                        name: board.name,
                        project_id: project.id.clone(),
                        project_name: project.name.clone(),
                        columns,
                    });
                }
            }
            Ok(targets)
        }
        other => Err(EngineError::validation(
            "entityType",
            format!("no transfer targets for {}", other),
        )),
    }
}
