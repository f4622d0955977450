//! Board engine: ordering and cross-container transfers for a
//! multi-tenant Kanban service.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (handlers, Actor, envelope)        │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         v                                        │
//!                       │  reorder.rs   moves within a board               │
//!                       │  transfer.rs  moves/clones across containers     │
//!                       │         │                                        │
//!                       │         v                                        │
//!                       │  position.rs  (pure allocator)                   │
//!                       │  repo.rs      (reads, placements, validation)    │
//!                       │  audit.rs     (transfer_logs, append-only)       │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                            |
//! |------------|-----------------------------------------------------------|
//! | `models`   | Shared types: `Card`, `Column`, `Board`, `TransferLog`    |
//! | `db`       | SQLite access via `DbHandle`, migrations, ordinary CRUD   |
//! | `access`   | Owner / member / group / company-admin checks             |
//! | `notify`   | Ownership and due-date notifications                      |
//! | `import`   | Collaborator import from Senior and TOTVS exports         |
//! | `ws`       | `WsMessage` enum + `broadcast_message()` helper           |
//!
//! ## Typical Request Flow (move a card)
//!
//! 1. `PATCH /projects/{p}/boards/{b}/cards/{c}/move` → `api::move_card()`
//! 2. The handler checks the board sits under the project and that the
//!    caller can reach it, then calls `reorder::move_card()` on the
//!    blocking pool.
//! 3. Inside one transaction the service re-reads the target column,
//!    asks `position::allocate()` for a slot and writes the card with its
//!    shifted siblings. Both columns are checked for duplicate positions
//!    before commit.
//! 4. After commit the handler broadcasts `CardMoved` over the WebSocket.

pub mod access;
pub mod api;
pub mod audit;
pub mod db;
pub mod import;
pub mod models;
pub mod notify;
pub mod position;
pub mod reorder;
pub mod repo;
pub mod server;
pub mod transfer;
pub mod ws;
