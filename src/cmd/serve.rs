//! HTTP server command (`quadro serve`).

use std::path::{Path, PathBuf};

use anyhow::Result;
use quadro::board::server::{ServerConfig, start_server};
use quadro::config::QuadroConfig;

/// Flags that override the file and environment settings.
pub struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub dev: bool,
}

pub async fn cmd_serve(
    project_dir: &Path,
    mut config: QuadroConfig,
    overrides: ServeOverrides,
) -> Result<()> {
    if let Some(host) = overrides.host {
        config.server.host = host;
    }
    if let Some(port) = overrides.port {
        config.server.port = port;
    }
    if let Some(path) = overrides.db_path {
        config.database.path = path;
    }
    if overrides.dev {
        config.server.dev_mode = true;
    }
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let mut server = ServerConfig::from(&config);
    server.db_path = super::db_path(project_dir, &config);
    start_server(server, config).await
}
