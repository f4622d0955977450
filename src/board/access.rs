//! Project access rules.
//!
//! A user reaches a project when any of these holds: they own it, they are a
//! direct member, they belong to the project's group, or they are an admin
//! of the project's company. Ownership is narrower and only the first rule.

use rusqlite::{Connection, OptionalExtension, params};

use super::db::{PROJECT_FIELDS, project_from_row};
use super::models::{EntityType, Project, TransferLog};
use crate::errors::{EngineError, EngineResult};

/// SQL predicate over a `projects` row aliased `p`; `?1` is the user id.
const ACCESS_PREDICATE: &str = "(
    p.owner_user_id = ?1
    OR EXISTS (SELECT 1 FROM project_members m WHERE m.project_id = p.id AND m.user_id = ?1)
    OR (p.group_id IS NOT NULL AND EXISTS (
        SELECT 1 FROM group_members g WHERE g.group_id = p.group_id AND g.user_id = ?1))
    OR EXISTS (
        SELECT 1 FROM users u
        WHERE u.id = ?1 AND u.role = 'admin'
          AND u.company_id IS NOT NULL AND u.company_id = p.company_id)
)";

pub fn has_project_access(conn: &Connection, user_id: &str, project_id: &str) -> EngineResult<bool> {
    let hit: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM projects p WHERE p.id = ?2 AND {}",
            ACCESS_PREDICATE
        ),
        params![user_id, project_id],
        |row| row.get(0),
    )?;
    Ok(hit > 0)
}

pub fn is_project_owner(user_id: &str, project: &Project) -> bool {
    project.owner_user_id == user_id
}

/// `Forbidden` unless the user owns the project. `action` completes
/// "only the project owner can ...".
pub fn require_owner(user_id: &str, project: &Project, action: &str) -> EngineResult<()> {
    if is_project_owner(user_id, project) {
        Ok(())
    } else {
        Err(EngineError::Forbidden(format!(
            "only the project owner can {}",
            action
        )))
    }
}

/// `Forbidden` unless the user can reach the project.
pub fn require_access(conn: &Connection, user_id: &str, project: &Project) -> EngineResult<()> {
    if has_project_access(conn, user_id, &project.id)? {
        Ok(())
    } else {
        Err(EngineError::Forbidden(format!(
            "no access to project '{}'",
            project.name
        )))
    }
}

/// Every project the user can reach, by name.
pub fn accessible_projects(conn: &Connection, user_id: &str) -> EngineResult<Vec<Project>> {
    let fields = PROJECT_FIELDS
        .split(", ")
        .map(|f| format!("p.{}", f))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM projects p WHERE {} ORDER BY p.name, p.id",
        fields, ACCESS_PREDICATE
    ))?;
    let rows = stmt.query_map(params![user_id], project_from_row)?;
    let mut projects = Vec::new();
    for row in rows {
        projects.push(row?);
    }
    Ok(projects)
}

/// Whether a transfer log row may be shown to `user_id`: they performed it,
/// they are a party to an ownership transfer, or they can reach a project on
/// either side of the move (a board counts through its current project).
pub fn can_view_log(conn: &Connection, user_id: &str, log: &TransferLog) -> EngineResult<bool> {
    if log.user_id == user_id {
        return Ok(true);
    }
    let sides = [
        (log.from_type, &log.from_id),
        (log.to_type, &log.to_id),
        (log.entity_type, &log.entity_id),
    ];
    for (entity_type, id) in sides {
        let project_id = match entity_type {
            EntityType::User if id == user_id => return Ok(true),
            EntityType::Project => Some(id.clone()),
            EntityType::Board => conn
                .query_row(
                    "SELECT project_id FROM boards WHERE id = ?1",
                    params![id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?,
            _ => None,
        };
        if let Some(project_id) = project_id {
            if has_project_access(conn, user_id, &project_id)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::BoardDb;
    use crate::board::models::Role;
    use anyhow::Result;

    #[test]
    fn test_access_rules() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let acme = db.create_company("Acme")?;
        let other_co = db.create_company("Other")?;
        let owner = db.create_user("Owner", "owner@acme.com", Role::Member, Some(&acme.id))?;
        let member = db.create_user("Member", "member@acme.com", Role::Member, Some(&acme.id))?;
        let grouped = db.create_user("Grouped", "grouped@acme.com", Role::Member, Some(&acme.id))?;
        let admin = db.create_user("Admin", "admin@acme.com", Role::Admin, Some(&acme.id))?;
        let foreign_admin =
            db.create_user("Foreign", "admin@other.com", Role::Admin, Some(&other_co.id))?;
        let stranger = db.create_user("Stranger", "x@acme.com", Role::Member, Some(&acme.id))?;

        let group = db.create_group(Some(&acme.id), "Design")?;
        db.add_group_member(&group.id, &grouped.id)?;
        let project = db.create_project("Alpha", &owner.id, Some(&acme.id), Some(&group.id))?;
        db.add_project_member(&project.id, &member.id)?;

        let conn = db.conn();
        for user in [&owner, &member, &grouped, &admin] {
            assert!(has_project_access(conn, &user.id, &project.id)?, "{}", user.name);
        }
        assert!(!has_project_access(conn, &foreign_admin.id, &project.id)?);
        assert!(!has_project_access(conn, &stranger.id, &project.id)?);

        assert!(is_project_owner(&owner.id, &project));
        assert!(!is_project_owner(&admin.id, &project));
        let err = require_owner(&admin.id, &project, "move its boards").unwrap_err();
        assert!(err.to_string().contains("only the project owner can move its boards"));
        Ok(())
    }

    #[test]
    fn test_require_access_is_forbidden_for_strangers() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let owner = db.create_user("Owner", "owner@example.com", Role::Member, None)?;
        let stranger = db.create_user("Stranger", "s@example.com", Role::Member, None)?;
        let project = db.create_project("Alpha", &owner.id, None, None)?;

        let err = require_access(db.conn(), &stranger.id, &project).unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        require_access(db.conn(), &owner.id, &project)?;
        Ok(())
    }

    #[test]
    fn test_accessible_projects_lists_only_reachable() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ana = db.create_user("Ana", "ana@example.com", Role::Member, None)?;
        let bia = db.create_user("Bia", "bia@example.com", Role::Member, None)?;
        let beta = db.create_project("Beta", &ana.id, None, None)?;
        let alpha = db.create_project("Alpha", &bia.id, None, None)?;
        db.create_project("Hidden", &bia.id, None, None)?;
        db.add_project_member(&alpha.id, &ana.id)?;

        let names: Vec<_> = accessible_projects(db.conn(), &ana.id)?
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(names, vec![alpha.id, beta.id]);
        Ok(())
    }

    #[test]
    fn test_log_visibility_follows_project_access() -> Result<()> {
        use crate::board::audit::{self, Endpoint, TransferEntry};
        use crate::board::models::TransferType;

        let db = BoardDb::new_in_memory()?;
        let ana = db.create_user("Ana", "ana@example.com", Role::Member, None)?;
        let bia = db.create_user("Bia", "bia@example.com", Role::Member, None)?;
        let eve = db.create_user("Eve", "eve@example.com", Role::Member, None)?;
        let secret = db.create_project("Secret", &ana.id, None, None)?;
        let shared = db.create_project("Shared", &ana.id, None, None)?;
        db.add_project_member(&shared.id, &bia.id)?;
        let board = db.create_board(&secret.id, "Layoffs")?;

        let moved = audit::log(
            db.conn(),
            TransferEntry {
                transfer_type: TransferType::BoardMove,
                entity: Endpoint::new(EntityType::Board, &board.id, &board.name),
                source_entity_id: None,
                from: Endpoint::new(EntityType::Project, &shared.id, &shared.name),
                to: Endpoint::new(EntityType::Project, &secret.id, &secret.name),
                user_id: ana.id.clone(),
            },
        )?;
        let handed = audit::log(
            db.conn(),
            TransferEntry {
                transfer_type: TransferType::OwnershipTransfer,
                entity: Endpoint::new(EntityType::Project, &secret.id, &secret.name),
                source_entity_id: None,
                from: Endpoint::new(EntityType::User, &eve.id, &eve.name),
                to: Endpoint::new(EntityType::User, &ana.id, &ana.name),
                user_id: eve.id.clone(),
            },
        )?;

        let conn = db.conn();
        assert!(can_view_log(conn, &ana.id, &moved)?);
        assert!(can_view_log(conn, &bia.id, &moved)?);
        assert!(!can_view_log(conn, &eve.id, &moved)?);

        assert!(can_view_log(conn, &eve.id, &handed)?);
        assert!(can_view_log(conn, &ana.id, &handed)?);
        assert!(!can_view_log(conn, &bia.id, &handed)?);
        Ok(())
    }
}
