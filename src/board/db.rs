use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use uuid::Uuid;

use super::models::*;
use super::notify;
use super::position::{self, Ordered};
use super::repo::{self, Container};
use crate::errors::{EngineError, EngineResult};

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads. The handle is created once by the process
/// entry point and passed to every request through the router state.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> EngineResult<R>
    where
        F: FnOnce(&BoardDb) -> EngineResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| EngineError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| EngineError::Other(anyhow::anyhow!("DB task panicked: {}", e)))?
    }

    /// Acquire the database mutex synchronously. Used by CLI commands,
    /// startup initialization and tests; never from a request handler.
    pub fn lock_sync(&self) -> EngineResult<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner.lock().map_err(|_| EngineError::LockPoisoned)
    }
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS companies (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    role TEXT NOT NULL DEFAULT 'member',
                    company_id TEXT REFERENCES companies(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS groups (
                    id TEXT PRIMARY KEY,
                    company_id TEXT REFERENCES companies(id) ON DELETE CASCADE,
                    name TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS group_members (
                    group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    PRIMARY KEY (group_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    owner_user_id TEXT NOT NULL REFERENCES users(id),
                    company_id TEXT REFERENCES companies(id) ON DELETE SET NULL,
                    group_id TEXT REFERENCES groups(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS project_members (
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    PRIMARY KEY (project_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS boards (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS board_columns (
                    id TEXT PRIMARY KEY,
                    board_id TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    sort_order INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS cards (
                    id TEXT PRIMARY KEY,
                    board_id TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    column_id TEXT NOT NULL REFERENCES board_columns(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    position INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'backlog',
                    priority TEXT NOT NULL DEFAULT 'medium',
                    reporter_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                    assigned_user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                    due_date TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tags (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    color TEXT NOT NULL DEFAULT '#808080',
                    UNIQUE (project_id, name)
                );

                CREATE TABLE IF NOT EXISTS card_tags (
                    card_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                    tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                    PRIMARY KEY (card_id, tag_id)
                );

                CREATE TABLE IF NOT EXISTS transfer_logs (
                    id TEXT PRIMARY KEY,
                    type TEXT NOT NULL,
                    entity_type TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    entity_title TEXT NOT NULL,
                    source_entity_id TEXT,
                    from_type TEXT NOT NULL,
                    from_id TEXT NOT NULL,
                    from_title TEXT NOT NULL,
                    to_type TEXT NOT NULL,
                    to_id TEXT NOT NULL,
                    to_title TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TRIGGER IF NOT EXISTS transfer_logs_no_update
                BEFORE UPDATE ON transfer_logs
                BEGIN
                    SELECT RAISE(ABORT, 'transfer_logs is append-only');
                END;

                CREATE TRIGGER IF NOT EXISTS transfer_logs_no_delete
                BEFORE DELETE ON transfer_logs
                BEGIN
                    SELECT RAISE(ABORT, 'transfer_logs is append-only');
                END;

                CREATE TABLE IF NOT EXISTS notifications (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    card_id TEXT REFERENCES cards(id) ON DELETE CASCADE,
                    kind TEXT NOT NULL,
                    message TEXT NOT NULL,
                    read INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS collaborators (
                    id TEXT PRIMARY KEY,
                    company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                    registration TEXT NOT NULL,
                    name TEXT NOT NULL,
                    email TEXT,
                    job_title TEXT,
                    department TEXT,
                    document TEXT,
                    imported_at TEXT NOT NULL,
                    UNIQUE (company_id, registration)
                );

                CREATE INDEX IF NOT EXISTS idx_boards_project ON boards(project_id);
                CREATE INDEX IF NOT EXISTS idx_columns_board ON board_columns(board_id, sort_order);
                CREATE INDEX IF NOT EXISTS idx_cards_column ON cards(column_id, position);
                CREATE INDEX IF NOT EXISTS idx_cards_due ON cards(due_date) WHERE due_date IS NOT NULL;
                CREATE INDEX IF NOT EXISTS idx_transfer_logs_user ON transfer_logs(user_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_transfer_logs_entity ON transfer_logs(entity_type, entity_id);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_card_kind
                    ON notifications(user_id, card_id, kind) WHERE card_id IS NOT NULL;
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction. Dropping it without `commit` rolls back.
    // Safety: DbHandle's Mutex already guarantees single-threaded access.
    pub(crate) fn begin(&self) -> EngineResult<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // ── Companies, users, groups ──────────────────────────────────────

    pub fn create_company(&self, name: &str) -> EngineResult<Company> {
        let company = Company {
            id: new_id(),
            name: name.to_string(),
            created_at: now_rfc3339(),
        };
        self.conn.execute(
            "INSERT INTO companies (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![company.id, company.name, company.created_at],
        )?;
        Ok(company)
    }

    pub fn create_user(
        &self,
        name: &str,
        email: &str,
        role: Role,
        company_id: Option<&str>,
    ) -> EngineResult<User> {
        if let Some(company_id) = company_id {
            self.conn
                .query_row(
                    "SELECT id FROM companies WHERE id = ?1",
                    params![company_id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .ok_or_else(|| EngineError::not_found("Company", company_id))?;
        }
        let user = User {
            id: new_id(),
            name: name.to_string(),
            email: email.trim().to_lowercase(),
            role,
            company_id: company_id.map(str::to_string),
            created_at: now_rfc3339(),
        };
        self.conn
            .execute(
                "INSERT INTO users (id, name, email, role, company_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id,
                    user.name,
                    user.email,
                    user.role.as_str(),
                    user.company_id,
                    user.created_at
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    EngineError::Conflict(format!("email {} is already registered", user.email))
                }
                other => other.into(),
            })?;
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> EngineResult<User> {
        repo::get_user(&self.conn, id)
    }

    pub fn create_group(&self, company_id: Option<&str>, name: &str) -> EngineResult<Group> {
        let group = Group {
            id: new_id(),
            company_id: company_id.map(str::to_string),
            name: name.to_string(),
        };
        self.conn.execute(
            "INSERT INTO groups (id, company_id, name) VALUES (?1, ?2, ?3)",
            params![group.id, group.company_id, group.name],
        )?;
        Ok(group)
    }

    pub fn add_group_member(&self, group_id: &str, user_id: &str) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
            params![group_id, user_id],
        )?;
        Ok(())
    }

    // ── Projects & boards ─────────────────────────────────────────────

    pub fn create_project(
        &self,
        name: &str,
        owner_user_id: &str,
        company_id: Option<&str>,
        group_id: Option<&str>,
    ) -> EngineResult<Project> {
        repo::get_user(&self.conn, owner_user_id)?;
        let project = Project {
            id: new_id(),
            name: name.to_string(),
            owner_user_id: owner_user_id.to_string(),
            company_id: company_id.map(str::to_string),
            group_id: group_id.map(str::to_string),
            created_at: now_rfc3339(),
        };
        self.conn.execute(
            "INSERT INTO projects (id, name, owner_user_id, company_id, group_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project.id,
                project.name,
                project.owner_user_id,
                project.company_id,
                project.group_id,
                project.created_at
            ],
        )?;
        Ok(project)
    }

    pub fn get_project(&self, id: &str) -> EngineResult<Project> {
        repo::get_project(&self.conn, id)
    }

    pub fn add_project_member(&self, project_id: &str, user_id: &str) -> EngineResult<()> {
        repo::get_project(&self.conn, project_id)?;
        repo::get_user(&self.conn, user_id)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO project_members (project_id, user_id) VALUES (?1, ?2)",
            params![project_id, user_id],
        )?;
        Ok(())
    }

    pub fn create_board(&self, project_id: &str, name: &str) -> EngineResult<Board> {
        repo::get_project(&self.conn, project_id)?;
        let board = Board {
            id: new_id(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            created_at: now_rfc3339(),
        };
        self.conn.execute(
            "INSERT INTO boards (id, project_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![board.id, board.project_id, board.name, board.created_at],
        )?;
        Ok(board)
    }

    pub fn get_board(&self, id: &str) -> EngineResult<Board> {
        repo::get_board(&self.conn, id)
    }

    pub fn list_boards(&self, project_id: &str) -> EngineResult<Vec<Board>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, name, created_at FROM boards
             WHERE project_id = ?1 ORDER BY created_at, name",
        )?;
        let rows = stmt.query_map(params![project_id], board_from_row)?;
        let mut boards = Vec::new();
        for row in rows {
            boards.push(row?);
        }
        Ok(boards)
    }

    // ── Columns ───────────────────────────────────────────────────────

    /// Append a column at the end of the board's order.
    pub fn create_column(&self, board_id: &str, title: &str) -> EngineResult<Column> {
        let tx = self.begin()?;
        let (_, columns) = repo::get_board_with_columns(&tx, board_id)?;
        let column = Column {
            id: new_id(),
            board_id: board_id.to_string(),
            title: title.to_string(),
            order: position::allocate(&columns, None).value,
        };
        tx.execute(
            "INSERT INTO board_columns (id, board_id, title, sort_order) VALUES (?1, ?2, ?3, ?4)",
            params![column.id, column.board_id, column.title, column.order],
        )?;
        tx.commit()?;
        Ok(column)
    }

    /// Remove an empty column and close the gap it leaves in the board order.
    pub fn delete_column(&self, column_id: &str) -> EngineResult<()> {
        let tx = self.begin()?;
        let (column, cards) = repo::get_column_with_cards(&tx, column_id)?;
        if !cards.is_empty() {
            return Err(EngineError::BadRequest(format!(
                "column '{}' still holds {} card(s)",
                column.title,
                cards.len()
            )));
        }
        tx.execute("DELETE FROM board_columns WHERE id = ?1", params![column_id])?;
        let (_, remaining) = repo::get_board_with_columns(&tx, &column.board_id)?;
        repo::persist_reorder(
            &tx,
            Container::Board(&column.board_id),
            &position::resequence(&remaining),
        )?;
        tx.commit()?;
        Ok(())
    }

    // ── Cards ─────────────────────────────────────────────────────────

    /// Append a new card at the end of `column_id`.
    pub fn create_card(
        &self,
        column_id: &str,
        reporter_id: Option<&str>,
        new: &NewCard,
    ) -> EngineResult<Card> {
        if new.title.trim().is_empty() {
            return Err(EngineError::validation("title", "must not be empty"));
        }
        if let Some(due) = &new.due_date {
            if notify::parse_due_date(due).is_none() {
                return Err(EngineError::validation(
                    "dueDate",
                    format!("'{}' is not a date (YYYY-MM-DD or RFC 3339)", due),
                ));
            }
        }
        let tx = self.begin()?;
        let (column, cards) = repo::get_column_with_cards(&tx, column_id)?;
        let now = now_rfc3339();
        let card = Card {
            id: new_id(),
            board_id: column.board_id.clone(),
            column_id: column.id.clone(),
            title: new.title.trim().to_string(),
            description: new.description.clone(),
            position: position::allocate(&cards, None).value,
            status: new.status,
            priority: new.priority,
            reporter_id: reporter_id.map(str::to_string),
            assigned_user_id: new.assigned_user_id.clone(),
            due_date: new.due_date.clone(),
            created_at: now.clone(),
            updated_at: now,
        };
        insert_card(&tx, &card)?;
        tx.commit()?;
        Ok(card)
    }

    pub fn get_card(&self, id: &str) -> EngineResult<Card> {
        repo::get_card(&self.conn, id)
    }

    /// Delete a card and renumber what is left of its column.
    pub fn delete_card(&self, card_id: &str) -> EngineResult<Card> {
        let tx = self.begin()?;
        let card = repo::get_card(&tx, card_id)?;
        tx.execute("DELETE FROM cards WHERE id = ?1", params![card_id])?;
        let (_, remaining) = repo::get_column_with_cards(&tx, &card.column_id)?;
        repo::persist_reorder(
            &tx,
            Container::Column(&card.column_id),
            &position::resequence(&remaining),
        )?;
        tx.commit()?;
        Ok(card)
    }

    // ── Tags ──────────────────────────────────────────────────────────

    pub fn create_tag(&self, project_id: &str, name: &str, color: &str) -> EngineResult<Tag> {
        repo::get_project(&self.conn, project_id)?;
        find_or_create_tag(&self.conn, project_id, name, color)
    }

    pub fn tag_card(&self, card_id: &str, tag_id: &str) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO card_tags (card_id, tag_id) VALUES (?1, ?2)",
            params![card_id, tag_id],
        )?;
        Ok(())
    }

    pub fn card_tags(&self, card_id: &str) -> EngineResult<Vec<Tag>> {
        card_tags(&self.conn, card_id)
    }

    // ── Board view ────────────────────────────────────────────────────

    pub fn get_board_view(&self, board_id: &str) -> EngineResult<BoardView> {
        let (board, columns) = repo::get_board_with_columns(&self.conn, board_id)?;
        let mut views = Vec::with_capacity(columns.len());
        for column in columns {
            let (column, cards) = repo::get_column_with_cards(&self.conn, &column.id)?;
            let mut card_views = Vec::with_capacity(cards.len());
            for card in cards {
                let tags = card_tags(&self.conn, card.id())?
                    .into_iter()
                    .map(|t| t.name)
                    .collect();
                card_views.push(CardView { card, tags });
            }
            views.push(ColumnView {
                column,
                cards: card_views,
            });
        }
        Ok(BoardView {
            board,
            columns: views,
        })
    }
}

// ── Shared helpers ────────────────────────────────────────────────────

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fixed-width UTC timestamp so lexical order in SQLite matches time order.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn insert_card(conn: &Connection, card: &Card) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO cards (id, board_id, column_id, title, description, position, status, priority,
                            reporter_id, assigned_user_id, due_date, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            card.id,
            card.board_id,
            card.column_id,
            card.title,
            card.description,
            card.position,
            card.status.as_str(),
            card.priority.as_str(),
            card.reporter_id,
            card.assigned_user_id,
            card.due_date,
            card.created_at,
            card.updated_at
        ],
    )?;
    Ok(())
}

pub(crate) fn card_tags(conn: &Connection, card_id: &str) -> EngineResult<Vec<Tag>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.project_id, t.name, t.color
         FROM tags t JOIN card_tags ct ON ct.tag_id = t.id
         WHERE ct.card_id = ?1 ORDER BY t.name",
    )?;
    let rows = stmt.query_map(params![card_id], |row| {
        Ok(Tag {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            color: row.get(3)?,
        })
    })?;
    let mut tags = Vec::new();
    for row in rows {
        tags.push(row?);
    }
    Ok(tags)
}

pub(crate) fn find_or_create_tag(
    conn: &Connection,
    project_id: &str,
    name: &str,
    color: &str,
) -> EngineResult<Tag> {
    let existing = conn
        .query_row(
            "SELECT id, project_id, name, color FROM tags WHERE project_id = ?1 AND name = ?2",
            params![project_id, name],
            |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    name: row.get(2)?,
                    color: row.get(3)?,
                })
            },
        )
        .optional()?;
    if let Some(tag) = existing {
        return Ok(tag);
    }
    let tag = Tag {
        id: new_id(),
        project_id: project_id.to_string(),
        name: name.to_string(),
        color: color.to_string(),
    };
    conn.execute(
        "INSERT INTO tags (id, project_id, name, color) VALUES (?1, ?2, ?3, ?4)",
        params![tag.id, tag.project_id, tag.name, tag.color],
    )?;
    Ok(tag)
}

// ── Internal row helpers ──────────────────────────────────────────────

pub(crate) const CARD_FIELDS: &str = "id, board_id, column_id, title, description, position, status, priority, reporter_id, assigned_user_id, due_date, created_at, updated_at";

pub(crate) const PROJECT_FIELDS: &str =
    "id, name, owner_user_id, company_id, group_id, created_at";

/// Intermediate row struct for reading cards from SQLite before converting
/// status / priority strings into typed values.
pub(crate) struct CardRow {
    id: String,
    board_id: String,
    column_id: String,
    title: String,
    description: String,
    position: i32,
    status: String,
    priority: String,
    reporter_id: Option<String>,
    assigned_user_id: Option<String>,
    due_date: Option<String>,
    created_at: String,
    updated_at: String,
}

impl CardRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            board_id: row.get(1)?,
            column_id: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            position: row.get(5)?,
            status: row.get(6)?,
            priority: row.get(7)?,
            reporter_id: row.get(8)?,
            assigned_user_id: row.get(9)?,
            due_date: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    pub(crate) fn into_card(self) -> EngineResult<Card> {
        let status = CardStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse card status")?;
        let priority = Priority::from_str(&self.priority)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse card priority")?;
        Ok(Card {
            id: self.id,
            board_id: self.board_id,
            column_id: self.column_id,
            title: self.title,
            description: self.description,
            position: self.position,
            status,
            priority,
            reporter_id: self.reporter_id,
            assigned_user_id: self.assigned_user_id,
            due_date: self.due_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(crate) fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_user_id: row.get(2)?,
        company_id: row.get(3)?,
        group_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub(crate) fn board_from_row(row: &Row<'_>) -> rusqlite::Result<Board> {
    Ok(Board {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

pub(crate) fn column_from_row(row: &Row<'_>) -> rusqlite::Result<Column> {
    Ok(Column {
        id: row.get(0)?,
        board_id: row.get(1)?,
        title: row.get(2)?,
        order: row.get(3)?,
    })
}

pub(crate) const USER_FIELDS: &str = "id, name, email, role, company_id, created_at";

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(3)?;
    let role = Role::from_str(&role).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role,
        company_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn seed(db: &BoardDb) -> Result<(User, Project, Board)> {
        let owner = db.create_user("Ana", "ana@example.com", Role::Member, None)?;
        let project = db.create_project("Alpha", &owner.id, None, None)?;
        let board = db.create_board(&project.id, "Sprint 1")?;
        Ok((owner, project, board))
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = BoardDb::new_in_memory()?;

        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
             ('projects', 'boards', 'board_columns', 'cards', 'transfer_logs', 'notifications')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 6, "Expected 6 core tables to exist");

        let index_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name IN
             ('idx_cards_column', 'idx_columns_board', 'idx_transfer_logs_user')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(index_count, 3, "Expected 3 indexes to exist");

        Ok(())
    }

    #[test]
    fn test_migrations_are_idempotent() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        db.run_migrations()?;
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_create_project_requires_existing_owner() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db.create_project("Ghost", "nobody", None, None).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "User", .. }));
        Ok(())
    }

    #[test]
    fn test_duplicate_email_is_conflict() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        db.create_user("Ana", "ana@example.com", Role::Member, None)?;
        let err = db
            .create_user("Other Ana", "ANA@example.com", Role::Member, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        Ok(())
    }

    #[test]
    fn test_create_columns_appends_in_order() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (_, _, board) = seed(&db)?;

        let a = db.create_column(&board.id, "To Do")?;
        let b = db.create_column(&board.id, "Doing")?;
        let c = db.create_column(&board.id, "Done")?;
        assert_eq!((a.order, b.order, c.order), (0, 1, 2));
        Ok(())
    }

    #[test]
    fn test_create_card_appends_to_column() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (owner, _, board) = seed(&db)?;
        let column = db.create_column(&board.id, "To Do")?;

        let first = db.create_card(
            &column.id,
            Some(&owner.id),
            &NewCard {
                title: "First".into(),
                ..Default::default()
            },
        )?;
        let second = db.create_card(
            &column.id,
            Some(&owner.id),
            &NewCard {
                title: "Second".into(),
                ..Default::default()
            },
        )?;
        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);
        assert_eq!(second.board_id, board.id);
        assert_eq!(second.status, CardStatus::Backlog);
        assert_eq!(second.reporter_id.as_deref(), Some(owner.id.as_str()));
        Ok(())
    }

    #[test]
    fn test_create_card_rejects_blank_title() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (_, _, board) = seed(&db)?;
        let column = db.create_column(&board.id, "To Do")?;
        let err = db
            .create_card(&column.id, None, &NewCard::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
        Ok(())
    }

    #[test]
    fn test_delete_card_resequences_column() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (_, _, board) = seed(&db)?;
        let column = db.create_column(&board.id, "To Do")?;
        let mut ids = Vec::new();
        for title in ["A", "B", "C", "D"] {
            let card = db.create_card(
                &column.id,
                None,
                &NewCard {
                    title: title.into(),
                    ..Default::default()
                },
            )?;
            ids.push(card.id);
        }

        db.delete_card(&ids[1])?;

        let (_, cards) = repo::get_column_with_cards(db.conn(), &column.id)?;
        let titles: Vec<_> = cards.iter().map(|c| c.title.as_str()).collect();
        let positions: Vec<_> = cards.iter().map(|c| c.position).collect();
        assert_eq!(titles, vec!["A", "C", "D"]);
        assert_eq!(positions, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_delete_column_refuses_non_empty_and_resequences() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (_, _, board) = seed(&db)?;
        let a = db.create_column(&board.id, "A")?;
        let b = db.create_column(&board.id, "B")?;
        let c = db.create_column(&board.id, "C")?;
        db.create_card(
            &c.id,
            None,
            &NewCard {
                title: "keep".into(),
                ..Default::default()
            },
        )?;

        let err = db.delete_column(&c.id).unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));

        db.delete_column(&a.id)?;
        let (_, columns) = repo::get_board_with_columns(db.conn(), &board.id)?;
        let ids: Vec<_> = columns.iter().map(|c| (c.id.clone(), c.order)).collect();
        assert_eq!(ids, vec![(b.id, 0), (c.id, 1)]);
        Ok(())
    }

    #[test]
    fn test_board_view_orders_columns_and_cards_with_tags() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (_, project, board) = seed(&db)?;
        let todo = db.create_column(&board.id, "To Do")?;
        let done = db.create_column(&board.id, "Done")?;
        let card = db.create_card(
            &todo.id,
            None,
            &NewCard {
                title: "Tagged".into(),
                ..Default::default()
            },
        )?;
        let tag = db.create_tag(&project.id, "bug", "#ff0000")?;
        db.tag_card(&card.id, &tag.id)?;

        let view = db.get_board_view(&board.id)?;
        assert_eq!(view.columns.len(), 2);
        assert_eq!(view.columns[0].column.id, todo.id);
        assert_eq!(view.columns[1].column.id, done.id);
        assert_eq!(view.columns[0].cards[0].tags, vec!["bug".to_string()]);
        assert!(view.columns[1].cards.is_empty());
        Ok(())
    }

    #[test]
    fn test_create_tag_is_idempotent_per_project() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let (_, project, _) = seed(&db)?;
        let first = db.create_tag(&project.id, "ux", "#00ff00")?;
        let again = db.create_tag(&project.id, "ux", "#000000")?;
        assert_eq!(first.id, again.id);
        assert_eq!(again.color, "#00ff00");
        Ok(())
    }

    #[tokio::test]
    async fn test_db_handle_call_runs_closure() -> Result<()> {
        let handle = DbHandle::new(BoardDb::new_in_memory()?);
        let user = handle
            .call(|db| db.create_user("Bia", "bia@example.com", Role::Admin, None))
            .await?;
        let fetched = handle.call(move |db| db.get_user(&user.id)).await?;
        assert_eq!(fetched.role, Role::Admin);
        Ok(())
    }
}
