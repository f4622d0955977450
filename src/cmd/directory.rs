//! Tenant bootstrap commands (`quadro company|user|project|board`).

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use quadro::board::import;
use quadro::board::models::Role;
use quadro::config::QuadroConfig;

use super::super::{BoardCommands, CompanyCommands, ProjectCommands, UserCommands};

pub fn cmd_company(project_dir: &Path, config: &QuadroConfig, command: CompanyCommands) -> Result<()> {
    let db = super::open_db(project_dir, config)?;
    match command {
        CompanyCommands::Add { name } => {
            let company = db.create_company(&name)?;
            println!("Company created: {}", company.id);
        }
        CompanyCommands::Collaborators { company } => {
            let collaborators = import::list_collaborators(&db, &company)?;
            for c in &collaborators {
                println!(
                    "  {}  {}  {}",
                    c.registration,
                    c.name,
                    c.email.as_deref().unwrap_or("-")
                );
            }
            println!("{} collaborator(s)", collaborators.len());
        }
    }
    Ok(())
}

pub fn cmd_user(project_dir: &Path, config: &QuadroConfig, command: UserCommands) -> Result<()> {
    match command {
        UserCommands::Add {
            name,
            email,
            role,
            company,
        } => {
            let role = Role::from_str(&role).map_err(anyhow::Error::msg)?;
            let db = super::open_db(project_dir, config)?;
            let user = db.create_user(&name, &email, role, company.as_deref())?;
            println!("User created: {}", user.id);
        }
    }
    Ok(())
}

pub fn cmd_project(project_dir: &Path, config: &QuadroConfig, command: ProjectCommands) -> Result<()> {
    let db = super::open_db(project_dir, config)?;
    match command {
        ProjectCommands::Add {
            name,
            owner,
            company,
            group,
        } => {
            let project = db.create_project(&name, &owner, company.as_deref(), group.as_deref())?;
            println!("Project created: {}", project.id);
        }
        ProjectCommands::AddMember { project, user } => {
            db.add_project_member(&project, &user)?;
            println!("Added {} to project {}", user, project);
        }
    }
    Ok(())
}

pub fn cmd_board(project_dir: &Path, config: &QuadroConfig, command: BoardCommands) -> Result<()> {
    let db = super::open_db(project_dir, config)?;
    match command {
        BoardCommands::Add {
            project,
            name,
            columns,
        } => {
            let board = db.create_board(&project, &name)?;
            println!("Board created: {}", board.id);
            for title in columns.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
                let column = db.create_column(&board.id, title)?;
                println!("  column {} '{}' at {}", column.id, column.title, column.order);
            }
        }
    }
    Ok(())
}
