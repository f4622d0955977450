//! Container repository facade.
//!
//! Free functions over a borrowed `Connection` so the same calls work on a
//! plain connection or inside a `Transaction` (which derefs to one). Services
//! open the transaction, call into this module and commit.

use rusqlite::{Connection, OptionalExtension, params};

use super::db::{
    self, CARD_FIELDS, CardRow, PROJECT_FIELDS, USER_FIELDS, board_from_row, column_from_row,
    project_from_row, user_from_row,
};
use super::models::*;
use super::position::Placement;
use crate::errors::{EngineError, EngineResult};

/// An ordered sibling list: the cards of a column or the columns of a board.
#[derive(Debug, Clone, Copy)]
pub enum Container<'a> {
    Column(&'a str),
    Board(&'a str),
}

impl Container<'_> {
    fn label(&self) -> &'static str {
        match self {
            Self::Column(_) => "column",
            Self::Board(_) => "board",
        }
    }

    fn id(&self) -> &str {
        match self {
            Self::Column(id) | Self::Board(id) => id,
        }
    }
}

// ── Single-entity lookups ─────────────────────────────────────────────

pub fn get_user(conn: &Connection, id: &str) -> EngineResult<User> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_FIELDS),
        params![id],
        user_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("User", id))
}

pub fn get_project(conn: &Connection, id: &str) -> EngineResult<Project> {
    conn.query_row(
        &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_FIELDS),
        params![id],
        project_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("Project", id))
}

pub fn get_board(conn: &Connection, id: &str) -> EngineResult<Board> {
    conn.query_row(
        "SELECT id, project_id, name, created_at FROM boards WHERE id = ?1",
        params![id],
        board_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("Board", id))
}

pub fn get_column(conn: &Connection, id: &str) -> EngineResult<Column> {
    conn.query_row(
        "SELECT id, board_id, title, sort_order FROM board_columns WHERE id = ?1",
        params![id],
        column_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("Column", id))
}

pub fn get_card(conn: &Connection, id: &str) -> EngineResult<Card> {
    conn.query_row(
        &format!("SELECT {} FROM cards WHERE id = ?1", CARD_FIELDS),
        params![id],
        CardRow::from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("Card", id))?
    .into_card()
}

// ── Containers with siblings ──────────────────────────────────────────

/// Load a column and its cards ordered by position.
pub fn get_column_with_cards(conn: &Connection, column_id: &str) -> EngineResult<(Column, Vec<Card>)> {
    let column = get_column(conn, column_id)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM cards WHERE column_id = ?1 ORDER BY position, created_at",
        CARD_FIELDS
    ))?;
    let rows = stmt.query_map(params![column_id], CardRow::from_row)?;
    let mut cards = Vec::new();
    for row in rows {
        cards.push(row?.into_card()?);
    }
    Ok((column, cards))
}

/// Load a board and its columns ordered by `order`.
pub fn get_board_with_columns(conn: &Connection, board_id: &str) -> EngineResult<(Board, Vec<Column>)> {
    let board = get_board(conn, board_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, board_id, title, sort_order FROM board_columns
         WHERE board_id = ?1 ORDER BY sort_order, id",
    )?;
    let rows = stmt.query_map(params![board_id], column_from_row)?;
    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok((board, columns))
}

/// First column of a board by `order`, if it has any.
pub fn first_column(conn: &Connection, board_id: &str) -> EngineResult<Option<Column>> {
    let (_, columns) = get_board_with_columns(conn, board_id)?;
    Ok(columns.into_iter().next())
}

// ── Writes ────────────────────────────────────────────────────────────

/// Write new order values for siblings of `container`.
///
/// Every row must still belong to `container`; a row that moved away since
/// it was read fails the write with `Conflict`. After writing, the
/// container's order values are re-checked for duplicates. Callers run this
/// inside a transaction so a failure leaves nothing behind.
pub fn persist_reorder(
    conn: &Connection,
    container: Container<'_>,
    placements: &[Placement],
) -> EngineResult<()> {
    write_placements(conn, container, placements)?;
    validate_unique(conn, container)
}

/// The write half of [`persist_reorder`], for callers that touch several
/// containers and validate each one once all writes are done.
pub fn write_placements(
    conn: &Connection,
    container: Container<'_>,
    placements: &[Placement],
) -> EngineResult<()> {
    let now = db::now_rfc3339();
    for placement in placements {
        let changed = match container {
            Container::Column(column_id) => conn.execute(
                "UPDATE cards SET position = ?1, updated_at = ?2 WHERE id = ?3 AND column_id = ?4",
                params![placement.position, now, placement.id, column_id],
            )?,
            Container::Board(board_id) => conn.execute(
                "UPDATE board_columns SET sort_order = ?1 WHERE id = ?2 AND board_id = ?3",
                params![placement.position, placement.id, board_id],
            )?,
        };
        if changed == 0 {
            return Err(EngineError::Conflict(format!(
                "{} no longer belongs to {} {}",
                placement.id,
                container.label(),
                container.id()
            )));
        }
    }
    Ok(())
}

/// Fail with `Conflict` if two siblings of `container` share an order value.
pub fn validate_unique(conn: &Connection, container: Container<'_>) -> EngineResult<()> {
    let sql = match container {
        Container::Column(_) => {
            "SELECT position FROM cards WHERE column_id = ?1
             GROUP BY position HAVING COUNT(*) > 1 LIMIT 1"
        }
        Container::Board(_) => {
            "SELECT sort_order FROM board_columns WHERE board_id = ?1
             GROUP BY sort_order HAVING COUNT(*) > 1 LIMIT 1"
        }
    };
    let duplicate: Option<i32> = conn
        .query_row(sql, params![container.id()], |row| row.get(0))
        .optional()?;
    match duplicate {
        Some(value) => Err(EngineError::Conflict(format!(
            "concurrent modification: {} {} has two entries at {}",
            container.label(),
            container.id(),
            value
        ))),
        None => Ok(()),
    }
}

/// Move a card under a new column (and that column's board) at `position`.
pub fn relocate_card(
    conn: &Connection,
    card_id: &str,
    column: &Column,
    position: i32,
) -> EngineResult<()> {
    let changed = conn.execute(
        "UPDATE cards SET column_id = ?1, board_id = ?2, position = ?3, updated_at = ?4
         WHERE id = ?5",
        params![column.id, column.board_id, position, db::now_rfc3339(), card_id],
    )?;
    if changed == 0 {
        return Err(EngineError::not_found("Card", card_id));
    }
    Ok(())
}

/// Re-parent a board under another project.
pub fn relocate_board(conn: &Connection, board_id: &str, project_id: &str) -> EngineResult<()> {
    let changed = conn.execute(
        "UPDATE boards SET project_id = ?1 WHERE id = ?2",
        params![project_id, board_id],
    )?;
    if changed == 0 {
        return Err(EngineError::not_found("Board", board_id));
    }
    Ok(())
}

/// Replace a project's owner, guarded on the expected current owner.
pub fn set_project_owner(
    conn: &Connection,
    project_id: &str,
    expected_owner: &str,
    new_owner: &str,
) -> EngineResult<()> {
    let changed = conn.execute(
        "UPDATE projects SET owner_user_id = ?1 WHERE id = ?2 AND owner_user_id = ?3",
        params![new_owner, project_id, expected_owner],
    )?;
    if changed == 0 {
        return Err(EngineError::Conflict(format!(
            "owner of project {} changed concurrently",
            project_id
        )));
    }
    Ok(())
}

// ── Ancestry ──────────────────────────────────────────────────────────

pub fn get_card_ancestry(conn: &Connection, card_id: &str) -> EngineResult<CardAncestry> {
    let card = get_card(conn, card_id)?;
    let column = get_column(conn, &card.column_id)?;
    let BoardAncestry { board, project } = get_board_ancestry(conn, &card.board_id)?;
    Ok(CardAncestry {
        card,
        column,
        board,
        project,
    })
}

pub fn get_board_ancestry(conn: &Connection, board_id: &str) -> EngineResult<BoardAncestry> {
    let board = get_board(conn, board_id)?;
    let project = get_project(conn, &board.project_id)?;
    Ok(BoardAncestry { board, project })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::BoardDb;
    use anyhow::Result;

    fn column_of(db: &BoardDb, titles: &[&str]) -> Result<(Board, Column, Vec<Card>)> {
        let owner = db.create_user("Ana", "ana@example.com", Role::Member, None)?;
        let project = db.create_project("Alpha", &owner.id, None, None)?;
        let board = db.create_board(&project.id, "Main")?;
        let column = db.create_column(&board.id, "To Do")?;
        let mut cards = Vec::new();
        for title in titles {
            cards.push(db.create_card(
                &column.id,
                None,
                &NewCard {
                    title: title.to_string(),
                    ..Default::default()
                },
            )?);
        }
        Ok((board, column, cards))
    }

    #[test]
    fn test_get_column_with_cards_orders_by_position() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (_, column, cards) = column_of(&db, &["A", "B", "C"])?;
        db.conn().execute(
            "UPDATE cards SET position = 5 WHERE id = ?1",
            params![cards[0].id],
        )?;

        let (_, loaded) = get_column_with_cards(db.conn(), &column.id)?;
        let titles: Vec<_> = loaded.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "C", "A"]);
        Ok(())
    }

    #[test]
    fn test_missing_containers_are_not_found() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        assert!(matches!(
            get_column_with_cards(db.conn(), "nope"),
            Err(EngineError::NotFound { entity: "Column", .. })
        ));
        assert!(matches!(
            get_board_with_columns(db.conn(), "nope"),
            Err(EngineError::NotFound { entity: "Board", .. })
        ));
        assert!(matches!(
            get_card_ancestry(db.conn(), "nope"),
            Err(EngineError::NotFound { entity: "Card", .. })
        ));
        Ok(())
    }

    #[test]
    fn test_persist_reorder_rejects_rows_from_other_container() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (board, column, cards) = column_of(&db, &["A", "B"])?;
        let other = db.create_column(&board.id, "Done")?;

        let tx = db.begin()?;
        let err = persist_reorder(
            &tx,
            Container::Column(&other.id),
            &[Placement::new(cards[0].id.clone(), 0)],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        drop(tx);

        let (_, still) = get_column_with_cards(db.conn(), &column.id)?;
        assert_eq!(still.len(), 2);
        Ok(())
    }

    #[test]
    fn test_persist_reorder_detects_duplicate_positions() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (_, column, cards) = column_of(&db, &["A", "B", "C"])?;

        let tx = db.begin()?;
        let err = persist_reorder(
            &tx,
            Container::Column(&column.id),
            &[Placement::new(cards[0].id.clone(), 1)],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        drop(tx);

        // Rolled back: A is still at 0.
        assert_eq!(get_card(db.conn(), &cards[0].id)?.position, 0);
        Ok(())
    }

    #[test]
    fn test_persist_reorder_writes_columns() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (board, first, _) = column_of(&db, &[])?;
        let second = db.create_column(&board.id, "Done")?;

        persist_reorder(
            db.conn(),
            Container::Board(&board.id),
            &[
                Placement::new(second.id.clone(), 0),
                Placement::new(first.id.clone(), 1),
            ],
        )?;
        let (_, columns) = get_board_with_columns(db.conn(), &board.id)?;
        assert_eq!(columns[0].id, second.id);
        assert_eq!(columns[1].id, first.id);
        Ok(())
    }

    #[test]
    fn test_relocate_card_updates_board_and_column_together() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (board, _, cards) = column_of(&db, &["A"])?;
        let project = get_project(db.conn(), &board.project_id)?;
        let other_board = db.create_board(&project.id, "Other")?;
        let target = db.create_column(&other_board.id, "Inbox")?;

        relocate_card(db.conn(), &cards[0].id, &target, 0)?;
        let moved = get_card(db.conn(), &cards[0].id)?;
        assert_eq!(moved.column_id, target.id);
        assert_eq!(moved.board_id, other_board.id);
        Ok(())
    }

    #[test]
    fn test_set_project_owner_guards_expected_owner() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (board, _, _) = column_of(&db, &[])?;
        let project = get_project(db.conn(), &board.project_id)?;
        let bia = db.create_user("Bia", "bia@example.com", Role::Member, None)?;

        let err = set_project_owner(db.conn(), &project.id, &bia.id, &bia.id).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        set_project_owner(db.conn(), &project.id, &project.owner_user_id, &bia.id)?;
        assert_eq!(get_project(db.conn(), &project.id)?.owner_user_id, bia.id);
        Ok(())
    }

    #[test]
    fn test_card_ancestry_walks_to_project() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (board, column, cards) = column_of(&db, &["A"])?;
        let ancestry = get_card_ancestry(db.conn(), &cards[0].id)?;
        assert_eq!(ancestry.column.id, column.id);
        assert_eq!(ancestry.board.id, board.id);
        assert_eq!(ancestry.project.id, board.project_id);
        Ok(())
    }
}
