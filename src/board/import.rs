//! Collaborator import from HR exports.
//!
//! Two payroll systems export the same facts under different headers. Each
//! [`ImportFormat`] names a fixed [`Layout`]; [`normalize`] maps one raw row
//! through it into a [`CanonicalCollaborator`].

use std::collections::HashMap;
use std::io::Read;
use std::str::FromStr;

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use super::db::{self, BoardDb};
use crate::errors::{EngineError, EngineResult};

/// One CSV row: lower-cased header to trimmed value.
pub type RawRow = HashMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImportFormat {
    Senior,
    Totvs,
}

impl ImportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Senior => "senior",
            Self::Totvs => "totvs",
        }
    }

    pub fn layout(&self) -> &'static Layout {
        match self {
            Self::Senior => &SENIOR,
            Self::Totvs => &TOTVS,
        }
    }
}

impl FromStr for ImportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "senior" => Ok(Self::Senior),
            "totvs" => Ok(Self::Totvs),
            _ => Err(format!("Invalid import format: {} (expected senior or totvs)", s)),
        }
    }
}

/// Source header for each canonical field.
#[derive(Debug)]
pub struct Layout {
    pub registration: &'static str,
    pub name: &'static str,
    pub email: &'static str,
    pub job_title: &'static str,
    pub department: &'static str,
    pub document: &'static str,
}

const SENIOR: Layout = Layout {
    registration: "numcad",
    name: "nomfun",
    email: "emacom",
    job_title: "titcar",
    department: "nomloc",
    document: "numcpf",
};

const TOTVS: Layout = Layout {
    registration: "RA_MAT",
    name: "RA_NOME",
    email: "RA_EMAIL",
    job_title: "RJ_DESC",
    department: "QB_DESCRIC",
    document: "RA_CIC",
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalCollaborator {
    pub registration: String,
    pub name: String,
    pub email: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub document: Option<String>,
}

fn field(raw: &RawRow, header: &str) -> Option<String> {
    raw.get(&header.to_ascii_lowercase())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(raw: &RawRow, header: &str) -> EngineResult<String> {
    field(raw, header).ok_or_else(|| EngineError::validation(header, "is required"))
}

/// Map a raw row through the format's layout.
pub fn normalize(raw: &RawRow, format: ImportFormat) -> EngineResult<CanonicalCollaborator> {
    let layout = format.layout();
    Ok(CanonicalCollaborator {
        registration: required(raw, layout.registration)?,
        name: required(raw, layout.name)?,
        email: field(raw, layout.email).map(|e| e.to_lowercase()),
        job_title: field(raw, layout.job_title),
        department: field(raw, layout.department),
        document: field(raw, layout.document)
            .map(|d| d.chars().filter(char::is_ascii_digit).collect::<String>())
            .filter(|d| !d.is_empty()),
    })
}

/// `;` when the header line has one, `,` otherwise.
pub fn detect_delimiter(sample: &str) -> u8 {
    let header = sample.lines().next().unwrap_or_default();
    if header.contains(';') { b';' } else { b',' }
}

/// Read a headed CSV into raw rows.
pub fn read_csv<R: Read>(reader: R, delimiter: u8) -> anyhow::Result<Vec<RawRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers: Vec<String> = rdr
        .headers()
        .context("Failed to read CSV header row")?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_ascii_lowercase())
        .collect();

    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read CSV record {}", i + 1))?;
        let row: RawRow = headers
            .iter()
            .cloned()
            .zip(record.iter().map(str::to_string))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// File line number (the header is line 1).
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub updated: usize,
    pub rejected: Vec<Rejection>,
}

/// Upsert every valid row by `(company, registration)`. Invalid rows are
/// reported, not fatal.
pub fn import_collaborators(
    db: &BoardDb,
    company_id: &str,
    format: ImportFormat,
    rows: &[RawRow],
) -> EngineResult<ImportReport> {
    let tx = db.begin()?;
    ensure_company(&tx, company_id)?;

    let mut report = ImportReport::default();
    let now = db::now_rfc3339();
    for (i, raw) in rows.iter().enumerate() {
        let line = i + 2;
        let person = match normalize(raw, format) {
            Ok(p) => p,
            Err(e) => {
                report.rejected.push(Rejection {
                    line,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let updated = tx.execute(
            "UPDATE collaborators
             SET name = ?1, email = ?2, job_title = ?3, department = ?4, document = ?5, imported_at = ?6
             WHERE company_id = ?7 AND registration = ?8",
            params![
                person.name,
                person.email,
                person.job_title,
                person.department,
                person.document,
                now,
                company_id,
                person.registration
            ],
        )?;
        if updated > 0 {
            report.updated += 1;
            continue;
        }
        tx.execute(
            "INSERT INTO collaborators
             (id, company_id, registration, name, email, job_title, department, document, imported_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                db::new_id(),
                company_id,
                person.registration,
                person.name,
                person.email,
                person.job_title,
                person.department,
                person.document,
                now
            ],
        )?;
        report.imported += 1;
    }
    tx.commit()?;

    tracing::info!(
        company_id,
        format = format.as_str(),
        imported = report.imported,
        updated = report.updated,
        rejected = report.rejected.len(),
        "collaborator import finished"
    );
    Ok(report)
}

/// Collaborators of a company by registration.
pub fn list_collaborators(db: &BoardDb, company_id: &str) -> EngineResult<Vec<CanonicalCollaborator>> {
    ensure_company(db.conn(), company_id)?;
    let mut stmt = db.conn().prepare(
        "SELECT registration, name, email, job_title, department, document
         FROM collaborators WHERE company_id = ?1 ORDER BY registration",
    )?;
    let rows = stmt.query_map(params![company_id], |row| {
        Ok(CanonicalCollaborator {
            registration: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            job_title: row.get(3)?,
            department: row.get(4)?,
            document: row.get(5)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn ensure_company(conn: &Connection, company_id: &str) -> EngineResult<()> {
    conn.query_row(
        "SELECT id FROM companies WHERE id = ?1",
        params![company_id],
        |row| row.get::<_, String>(0),
    )
    .optional()?
    .map(|_| ())
    .ok_or_else(|| EngineError::not_found("Company", company_id))
}
