//! Intra-board moves: a card to a column at an index, or a full column order.

use serde::Deserialize;

use super::access;
use super::db::BoardDb;
use super::models::{Card, Column};
use super::position::{self, Placement};
use super::repo::{self, Container};
use crate::errors::{EngineError, EngineResult};

/// One entry of a column-order payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnOrder {
    pub id: String,
    pub order: i32,
}

/// Column ids sorted by the client-supplied `order`. Ties keep payload order.
pub fn ordered_ids(entries: &[ColumnOrder]) -> Vec<String> {
    let mut sorted: Vec<&ColumnOrder> = entries.iter().collect();
    sorted.sort_by_key(|e| e.order);
    sorted.into_iter().map(|e| e.id.clone()).collect()
}

/// Move a card of `board_id` into `target_column_id` at `target_index`
/// (appending when `None`), renumbering both the source and target columns.
pub fn move_card(
    db: &BoardDb,
    user_id: &str,
    board_id: &str,
    card_id: &str,
    target_column_id: &str,
    target_index: Option<usize>,
) -> EngineResult<Card> {
    let tx = db.begin()?;

    let card = repo::get_card(&tx, card_id)?;
    if card.board_id != board_id {
        return Err(EngineError::not_found("Card", card_id));
    }
    let ancestry = repo::get_board_ancestry(&tx, board_id)?;
    access::require_access(&tx, user_id, &ancestry.project)?;

    let (target, cards) = repo::get_column_with_cards(&tx, target_column_id)?;
    if target.board_id != board_id {
        return Err(EngineError::not_found("Column", target_column_id));
    }

    let siblings: Vec<Card> = cards.into_iter().filter(|c| c.id != card.id).collect();
    let alloc = position::allocate(&siblings, target_index);

    let same_column = card.column_id == target.id;
    if same_column && alloc.affected.is_empty() && card.position == alloc.value {
        tx.commit()?;
        return Ok(card);
    }

    let source_gap: Vec<Placement> = if same_column {
        Vec::new()
    } else {
        let (_, source_cards) = repo::get_column_with_cards(&tx, &card.column_id)?;
        let remaining: Vec<Card> = source_cards
            .into_iter()
            .filter(|c| c.id != card.id)
            .collect();
        position::resequence(&remaining)
    };

    repo::relocate_card(&tx, &card.id, &target, alloc.value)?;
    repo::write_placements(&tx, Container::Column(&target.id), &alloc.affected)?;
    repo::write_placements(&tx, Container::Column(&card.column_id), &source_gap)?;
    repo::validate_unique(&tx, Container::Column(&target.id))?;
    if !same_column {
        repo::validate_unique(&tx, Container::Column(&card.column_id))?;
    }

    let moved = repo::get_card(&tx, &card.id)?;
    tx.commit()?;

    tracing::info!(
        card_id = %moved.id,
        from_column = %card.column_id,
        to_column = %moved.column_id,
        position = moved.position,
        "card moved"
    );
    Ok(moved)
}

/// Set the board's column order to `requested`, which must be a permutation
/// of the board's current columns.
pub fn reorder_columns(
    db: &BoardDb,
    user_id: &str,
    board_id: &str,
    requested: &[String],
) -> EngineResult<Vec<Column>> {
    let tx = db.begin()?;

    let ancestry = repo::get_board_ancestry(&tx, board_id)?;
    access::require_access(&tx, user_id, &ancestry.project)?;

    let (_, columns) = repo::get_board_with_columns(&tx, board_id)?;
    let plan = position::plan_permutation(&columns, requested)
        .map_err(|e| EngineError::validation("columns", e.to_string()))?;
    repo::persist_reorder(&tx, Container::Board(board_id), &plan)?;

    let (_, reordered) = repo::get_board_with_columns(&tx, board_id)?;
    tx.commit()?;

    tracing::info!(board_id, columns = reordered.len(), changed = plan.len(), "columns reordered");
    Ok(reordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::{Board, NewCard, Role, User};
    use crate::board::transfer;
    use anyhow::Result;
    use proptest::prelude::*;

    struct Fixture {
        db: BoardDb,
        owner: User,
        board: Board,
        columns: Vec<Column>,
    }

    fn fixture(column_titles: &[&str]) -> Result<Fixture> {
        let db = BoardDb::new_in_memory()?;
        let owner = db.create_user("Ana", "ana@example.com", Role::Member, None)?;
        let project = db.create_project("Alpha", &owner.id, None, None)?;
        let board = db.create_board(&project.id, "Main")?;
        let mut columns = Vec::new();
        for title in column_titles {
            columns.push(db.create_column(&board.id, title)?);
        }
        Ok(Fixture {
            db,
            owner,
            board,
            columns,
        })
    }

    fn add_card(db: &BoardDb, column: &Column, title: &str) -> Result<Card> {
        Ok(db.create_card(
            &column.id,
            None,
            &NewCard {
                title: title.to_string(),
                ..Default::default()
            },
        )?)
    }

    fn column_state(db: &BoardDb, column: &Column) -> Result<Vec<(String, i32)>> {
        let (_, cards) = repo::get_column_with_cards(db.conn(), &column.id)?;
        Ok(cards.into_iter().map(|c| (c.title, c.position)).collect())
    }

    #[test]
    fn test_move_first_card_to_end_of_same_column() -> Result<()> {
        let f = fixture(&["To Do"])?;
        let todo = &f.columns[0];
        let a = add_card(&f.db, todo, "A")?;
        add_card(&f.db, todo, "B")?;
        add_card(&f.db, todo, "C")?;

        let moved = move_card(&f.db, &f.owner.id, &f.board.id, &a.id, &todo.id, Some(2))?;
        assert_eq!(moved.position, 2);
        assert_eq!(
            column_state(&f.db, todo)?,
            vec![("B".into(), 0), ("C".into(), 1), ("A".into(), 2)]
        );
        Ok(())
    }

    #[test]
    fn test_move_across_columns_keeps_both_dense() -> Result<()> {
        let f = fixture(&["To Do", "Done"])?;
        let (todo, done) = (&f.columns[0], &f.columns[1]);
        add_card(&f.db, todo, "A")?;
        let b = add_card(&f.db, todo, "B")?;
        add_card(&f.db, todo, "C")?;
        add_card(&f.db, done, "X")?;
        add_card(&f.db, done, "Y")?;

        let moved = move_card(&f.db, &f.owner.id, &f.board.id, &b.id, &done.id, Some(1))?;
        assert_eq!(moved.column_id, done.id);
        assert_eq!(
            column_state(&f.db, todo)?,
            vec![("A".into(), 0), ("C".into(), 1)]
        );
        assert_eq!(
            column_state(&f.db, done)?,
            vec![("X".into(), 0), ("B".into(), 1), ("Y".into(), 2)]
        );
        Ok(())
    }

    #[test]
    fn test_move_without_index_appends() -> Result<()> {
        let f = fixture(&["To Do", "Done"])?;
        let a = add_card(&f.db, &f.columns[0], "A")?;
        add_card(&f.db, &f.columns[1], "X")?;

        let moved = move_card(&f.db, &f.owner.id, &f.board.id, &a.id, &f.columns[1].id, None)?;
        assert_eq!(moved.position, 1);
        Ok(())
    }

    #[test]
    fn test_move_into_empty_column_lands_at_zero() -> Result<()> {
        let f = fixture(&["To Do", "Empty"])?;
        let a = add_card(&f.db, &f.columns[0], "A")?;
        let moved =
            move_card(&f.db, &f.owner.id, &f.board.id, &a.id, &f.columns[1].id, Some(7))?;
        assert_eq!(moved.position, 0);
        Ok(())
    }

    #[test]
    fn test_move_card_from_other_board_is_not_found() -> Result<()> {
        let f = fixture(&["To Do"])?;
        let a = add_card(&f.db, &f.columns[0], "A")?;
        let other = f.db.create_board(&f.board.project_id, "Other")?;
        let foreign_col = f.db.create_column(&other.id, "Foreign")?;

        let err = move_card(&f.db, &f.owner.id, &other.id, &a.id, &foreign_col.id, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "Card", .. }));

        let err = move_card(&f.db, &f.owner.id, &f.board.id, &a.id, &foreign_col.id, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "Column", .. }));
        assert_eq!(repo::get_card(f.db.conn(), &a.id)?.column_id, f.columns[0].id);
        Ok(())
    }

    #[test]
    fn test_move_by_stranger_is_forbidden() -> Result<()> {
        let f = fixture(&["To Do"])?;
        let a = add_card(&f.db, &f.columns[0], "A")?;
        add_card(&f.db, &f.columns[0], "B")?;
        let stranger = f.db.create_user("Eve", "eve@example.com", Role::Member, None)?;

        let err = move_card(&f.db, &stranger.id, &f.board.id, &a.id, &f.columns[0].id, Some(1))
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        assert_eq!(
            column_state(&f.db, &f.columns[0])?,
            vec![("A".into(), 0), ("B".into(), 1)]
        );
        Ok(())
    }

    #[test]
    fn test_reapplying_move_is_idempotent() -> Result<()> {
        let f = fixture(&["To Do", "Done"])?;
        let a = add_card(&f.db, &f.columns[0], "A")?;
        add_card(&f.db, &f.columns[1], "X")?;
        add_card(&f.db, &f.columns[1], "Y")?;

        move_card(&f.db, &f.owner.id, &f.board.id, &a.id, &f.columns[1].id, Some(1))?;
        let first = column_state(&f.db, &f.columns[1])?;
        let again = move_card(&f.db, &f.owner.id, &f.board.id, &a.id, &f.columns[1].id, Some(1))?;
        assert_eq!(again.position, 1);
        assert_eq!(column_state(&f.db, &f.columns[1])?, first);
        Ok(())
    }

    #[test]
    fn test_reorder_columns_rotates() -> Result<()> {
        let f = fixture(&["A", "B", "C"])?;
        let ids = |cols: &[Column]| cols.iter().map(|c| c.id.clone()).collect::<Vec<_>>();
        let requested = vec![
            f.columns[2].id.clone(),
            f.columns[0].id.clone(),
            f.columns[1].id.clone(),
        ];

        let reordered = reorder_columns(&f.db, &f.owner.id, &f.board.id, &requested)?;
        assert_eq!(ids(&reordered), requested);
        let orders: Vec<_> = reordered.iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_reorder_columns_rejects_non_permutations() -> Result<()> {
        let f = fixture(&["A", "B"])?;
        let a = f.columns[0].id.clone();
        let b = f.columns[1].id.clone();

        for bad in [
            vec![a.clone()],
            vec![a.clone(), a.clone()],
            vec![a.clone(), b.clone(), "ghost".to_string()],
        ] {
            let err = reorder_columns(&f.db, &f.owner.id, &f.board.id, &bad).unwrap_err();
            match err {
                EngineError::Validation { field, .. } => assert_eq!(field, "columns"),
                other => panic!("Expected Validation, got {:?}", other),
            }
        }

        let (_, columns) = repo::get_board_with_columns(f.db.conn(), &f.board.id)?;
        assert_eq!(columns[0].id, a);
        assert_eq!(columns[1].id, b);
        Ok(())
    }

    #[test]
    fn test_ordered_ids_sorts_stably_by_order() {
        let entries = vec![
            ColumnOrder { id: "c".into(), order: 0 },
            ColumnOrder { id: "a".into(), order: 2 },
            ColumnOrder { id: "b".into(), order: 2 },
        ];
        assert_eq!(ordered_ids(&entries), vec!["c", "a", "b"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_random_moves_keep_every_column_dense(
            moves in prop::collection::vec((0usize..6, 0usize..3, prop::option::of(0usize..8)), 1..12)
        ) {
            let f = fixture(&["A", "B", "C"]).unwrap();
            let mut cards = Vec::new();
            for i in 0..6 {
                cards.push(add_card(&f.db, &f.columns[i % 3], &format!("card{}", i)).unwrap());
            }

            for (card, column, index) in moves {
                move_card(
                    &f.db,
                    &f.owner.id,
                    &f.board.id,
                    &cards[card].id,
                    &f.columns[column].id,
                    index,
                )
                .unwrap();
            }

            let mut total = 0;
            for column in &f.columns {
                let positions: Vec<i32> =
                    column_state(&f.db, column).unwrap().into_iter().map(|(_, p)| p).collect();
                total += positions.len();
                prop_assert!(position::is_dense(&positions));
            }
            prop_assert_eq!(total, 6);
        }

        #[test]
        fn prop_mixed_operations_keep_every_column_dense(
            ops in prop::collection::vec(column_op(), 1..24)
        ) {
            let f = fixture(&["A", "B"]).unwrap();
            let other = f.db.create_board(&f.board.project_id, "Other").unwrap();
            let mut columns = f.columns.clone();
            columns.push(f.db.create_column(&other.id, "C").unwrap());
            columns.push(f.db.create_column(&other.id, "D").unwrap());

            let mut live: Vec<String> = Vec::new();
            let mut created = 0;
            for op in ops {
                match op {
                    ColumnOp::Create(column) => {
                        let card = add_card(&f.db, &columns[column], &format!("card{}", created)).unwrap();
                        created += 1;
                        live.push(card.id);
                    }
                    ColumnOp::Delete(pick) => {
                        if live.is_empty() {
                            continue;
                        }
                        let id = live.remove(pick % live.len());
                        f.db.delete_card(&id).unwrap();
                    }
                    ColumnOp::Reorder(pick, slot, index) => {
                        if live.is_empty() {
                            continue;
                        }
                        let card = repo::get_card(f.db.conn(), &live[pick % live.len()]).unwrap();
                        let same_board: Vec<&Column> =
                            columns.iter().filter(|c| c.board_id == card.board_id).collect();
                        let target = same_board[slot % same_board.len()];
                        move_card(&f.db, &f.owner.id, &card.board_id, &card.id, &target.id, index)
                            .unwrap();
                    }
                    ColumnOp::Transfer(pick, column) => {
                        if live.is_empty() {
                            continue;
                        }
                        let card = repo::get_card(f.db.conn(), &live[pick % live.len()]).unwrap();
                        let target = &columns[column];
                        if target.id == card.column_id {
                            continue;
                        }
                        transfer::move_card(
                            &f.db,
                            &f.owner.id,
                            &card.id,
                            &target.board_id,
                            Some(&target.id),
                        )
                        .unwrap();
                    }
                }
            }

            let mut total = 0;
            for column in &columns {
                let positions: Vec<i32> =
                    column_state(&f.db, column).unwrap().into_iter().map(|(_, p)| p).collect();
                total += positions.len();
                prop_assert!(position::is_dense(&positions));
            }
            prop_assert_eq!(total, live.len());
        }
    }

    #[derive(Debug, Clone)]
    enum ColumnOp {
        Create(usize),
        Delete(usize),
        Reorder(usize, usize, Option<usize>),
        Transfer(usize, usize),
    }

    fn column_op() -> impl Strategy<Value = ColumnOp> {
        prop_oneof![
            (0usize..4).prop_map(ColumnOp::Create),
            (0usize..32).prop_map(ColumnOp::Delete),
            (0usize..32, 0usize..2, prop::option::of(0usize..8))
                .prop_map(|(card, slot, index)| ColumnOp::Reorder(card, slot, index)),
            (0usize..32, 0usize..4).prop_map(|(card, column)| ColumnOp::Transfer(card, column)),
        ]
    }
}
