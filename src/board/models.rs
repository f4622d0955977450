use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[default]
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub company_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub company_id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub owner_user_id: String,
    pub company_id: Option<String>,
    pub group_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: String,
    pub board_id: String,
    pub title: String,
    pub order: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    #[default]
    Backlog,
    Todo,
    InProgress,
    Review,
    Done,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }
}

impl FromStr for CardStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(Self::Backlog),
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid card status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub board_id: String,
    pub column_id: String,
    pub title: String,
    pub description: String,
    pub position: i32,
    pub status: CardStatus,
    pub priority: Priority,
    pub reporter_id: Option<String>,
    pub assigned_user_id: Option<String>,
    pub due_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub color: String,
}

/// Fields accepted when a card is created.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCard {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: CardStatus,
    #[serde(default)]
    pub priority: Priority,
    pub assigned_user_id: Option<String>,
    pub due_date: Option<String>,
}

// ── Transfer log ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    OwnershipTransfer,
    BoardMove,
    CardMove,
    CardClone,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OwnershipTransfer => "ownership_transfer",
            Self::BoardMove => "board_move",
            Self::CardMove => "card_move",
            Self::CardClone => "card_clone",
        }
    }
}

impl FromStr for TransferType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ownership_transfer" => Ok(Self::OwnershipTransfer),
            "board_move" => Ok(Self::BoardMove),
            "card_move" => Ok(Self::CardMove),
            "card_clone" => Ok(Self::CardClone),
            _ => Err(format!("Invalid transfer type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Project,
    Board,
    Column,
    Card,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
            Self::Board => "board",
            Self::Column => "column",
            Self::Card => "card",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "project" => Ok(Self::Project),
            "board" => Ok(Self::Board),
            "column" => Ok(Self::Column),
            "card" => Ok(Self::Card),
            _ => Err(format!("Invalid entity type: {}", s)),
        }
    }
}

/// One immutable row of the transfer audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferLog {
    pub id: String,
    #[serde(rename = "type")]
    pub transfer_type: TransferType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_title: String,
    pub source_entity_id: Option<String>,
    pub from_type: EntityType,
    pub from_id: String,
    pub from_title: String,
    pub to_type: EntityType,
    pub to_id: String,
    pub to_title: String,
    pub user_id: String,
    pub created_at: String,
}

// ── Notifications ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OwnershipTransferred,
    DueSoon,
    Overdue,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OwnershipTransferred => "ownership_transferred",
            Self::DueSoon => "due_soon",
            Self::Overdue => "overdue",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ownership_transferred" => Ok(Self::OwnershipTransferred),
            "due_soon" => Ok(Self::DueSoon),
            "overdue" => Ok(Self::Overdue),
            _ => Err(format!("Invalid notification kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub card_id: Option<String>,
    pub kind: NotificationKind,
    pub message: String,
    pub read: bool,
    pub created_at: String,
}

// ── Ancestry (permission checks) ──────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CardAncestry {
    pub card: Card,
    pub column: Column,
    pub board: Board,
    pub project: Project,
}

#[derive(Debug, Clone)]
pub struct BoardAncestry {
    pub board: Board,
    pub project: Project,
}

// API view types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardView {
    pub board: Board,
    pub columns: Vec<ColumnView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnView {
    #[serde(flatten)]
    pub column: Column,
    pub cards: Vec<CardView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardView {
    #[serde(flatten)]
    pub card: Card,
    pub tags: Vec<String>,
}

/// A candidate destination offered by `GET /transfers/targets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferTarget {
    User {
        id: String,
        name: String,
        email: String,
    },
    Project {
        id: String,
        name: String,
    },
    Board {
        id: String,
        name: String,
        project_id: String,
        project_name: String,
        columns: Vec<Column>,
    },
}
