use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use quadro::config::QuadroConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "quadro")]
#[command(version, about = "Kanban ordering and transfer engine")]
pub struct Cli {
    /// Log at debug level (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding `.quadro/` (defaults to the current directory)
    #[arg(long, global = true, env = "QUADRO_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default quadro.toml and create the database
    Init {
        /// Overwrite an existing quadro.toml
        #[arg(long)]
        force: bool,
    },
    /// Serve the HTTP and WebSocket API
    Serve {
        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS for a local frontend)
        #[arg(long)]
        dev: bool,
    },
    /// Manage companies
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },
    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Manage boards and their columns
    Board {
        #[command(subcommand)]
        command: BoardCommands,
    },
    /// Import collaborators from an HR export
    Import {
        /// Company receiving the collaborators
        #[arg(long)]
        company: String,

        /// Source layout: senior or totvs
        #[arg(long)]
        format: String,

        /// Field delimiter; detected from the header line when omitted
        #[arg(long)]
        delimiter: Option<char>,

        /// CSV file to read
        file: PathBuf,
    },
    /// Generate due-soon and overdue notifications
    Notify {
        /// Window for due-soon notifications (overrides quadro.toml)
        #[arg(long)]
        due_soon_days: Option<u32>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum CompanyCommands {
    /// Create a company
    Add {
        #[arg(long)]
        name: String,
    },
    /// List a company's imported collaborators
    Collaborators {
        #[arg(long)]
        company: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum UserCommands {
    /// Create a user
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// admin or member
        #[arg(long, default_value = "member")]
        role: String,
        #[arg(long)]
        company: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ProjectCommands {
    /// Create a project
    Add {
        #[arg(long)]
        name: String,
        /// Owning user id
        #[arg(long)]
        owner: String,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        group: Option<String>,
    },
    /// Grant a user access to a project
    AddMember {
        #[arg(long)]
        project: String,
        #[arg(long)]
        user: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum BoardCommands {
    /// Create a board, optionally with columns
    Add {
        #[arg(long)]
        project: String,
        #[arg(long)]
        name: String,
        /// Column titles, left to right
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config = QuadroConfig::resolve(&project_dir)?;
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.filter = "quadro=debug,tower_http=debug".to_string();
    }
    let _log_guard = quadro::logging::init_tracing(&logging)?;

    match cli.command {
        Commands::Init { force } => cmd::cmd_init(&project_dir, force)?,
        Commands::Serve {
            host,
            port,
            db_path,
            dev,
        } => {
            let overrides = cmd::ServeOverrides {
                host,
                port,
                db_path,
                dev,
            };
            cmd::cmd_serve(&project_dir, config, overrides).await?;
        }
        Commands::Company { command } => cmd::cmd_company(&project_dir, &config, command)?,
        Commands::User { command } => cmd::cmd_user(&project_dir, &config, command)?,
        Commands::Project { command } => cmd::cmd_project(&project_dir, &config, command)?,
        Commands::Board { command } => cmd::cmd_board(&project_dir, &config, command)?,
        Commands::Import {
            company,
            format,
            delimiter,
            file,
        } => cmd::cmd_import(&project_dir, &config, &company, &format, delimiter, &file)?,
        Commands::Notify { due_soon_days } => {
            cmd::cmd_notify(&project_dir, &config, due_soon_days)?
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, &config, command)?,
    }

    Ok(())
}
