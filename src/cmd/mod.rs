//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `init`          | `Init`                                             |
//! | `serve`         | `Serve`                                            |
//! | `directory`     | `Company`, `User`, `Project`, `Board`              |
//! | `import`        | `Import`                                           |
//! | `notify`        | `Notify`                                           |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod directory;
pub mod import;
pub mod init;
pub mod notify;
pub mod serve;

pub use config::cmd_config;
pub use directory::{cmd_board, cmd_company, cmd_project, cmd_user};
pub use import::cmd_import;
pub use init::cmd_init;
pub use notify::cmd_notify;
pub use serve::{ServeOverrides, cmd_serve};

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quadro::board::db::BoardDb;
use quadro::config::QuadroConfig;

/// Database path from the config, anchored at the project directory when relative.
pub fn db_path(project_dir: &Path, config: &QuadroConfig) -> PathBuf {
    if config.database.path.is_absolute() {
        config.database.path.clone()
    } else {
        project_dir.join(&config.database.path)
    }
}

/// Open the project database, creating its directory on first use.
pub fn open_db(project_dir: &Path, config: &QuadroConfig) -> Result<BoardDb> {
    let path = db_path(project_dir, config);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    BoardDb::new(&path).with_context(|| format!("Failed to open database {}", path.display()))
}
