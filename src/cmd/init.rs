//! Project initialization (`quadro init`).

use std::path::Path;

use anyhow::{Context, Result};
use quadro::config::{CONFIG_FILE, QUADRO_DIR, QuadroConfig};

pub fn cmd_init(project_dir: &Path, force: bool) -> Result<()> {
    let quadro_dir = project_dir.join(QUADRO_DIR);
    std::fs::create_dir_all(&quadro_dir)
        .with_context(|| format!("Failed to create {}", quadro_dir.display()))?;

    let config_path = quadro_dir.join(CONFIG_FILE);
    let config = if config_path.exists() && !force {
        println!("{} already exists; keeping it.", config_path.display());
        QuadroConfig::load(&config_path)?
    } else {
        let config = QuadroConfig::default();
        config.save(&config_path)?;
        println!("Created {}", config_path.display());
        config
    };

    super::open_db(project_dir, &config)?;
    println!(
        "Database ready at {}",
        super::db_path(project_dir, &config).display()
    );
    println!();
    println!("Next steps:");
    println!("  1. `quadro company add --name <name>`");
    println!("  2. `quadro user add --name <name> --email <email> --company <id>`");
    println!("  3. `quadro serve`");

    Ok(())
}
