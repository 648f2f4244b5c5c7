//! SQLite database layer

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};

use crate::error::{PackError, Result};
use crate::registry::model::{
    Skill, SkillVersion, Verification, VerificationChecks, VersionStatus,
};
use crate::storage::migrations;

pub const DATABASE_FILE: &str = "registry.db";

/// Open a configured, migrated connection.
pub fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    configure_pragmas(&conn)?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}

pub fn open_memory_connection() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}

fn configure_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(())
}

/// Registry database. All access goes through one locked connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("schema_version", &migrations::SCHEMA_VERSION)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_connection(path.as_ref())?),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_memory_connection()?),
        })
    }

    /// Run `f` inside an IMMEDIATE transaction; commit on `Ok`, roll back on `Err`.
    pub fn with_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run a read-only closure against the connection.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }
}

// =============================================================================
// Skills
// =============================================================================

const SKILL_COLUMNS: &str =
    "id, slug, name, owner_id, visibility, storage_mode, default_version_id, created_at";

pub fn insert_skill(conn: &Connection, skill: &Skill) -> Result<()> {
    conn.execute(
        "INSERT INTO skills (id, slug, name, owner_id, visibility, storage_mode,
             default_version_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            skill.id,
            skill.slug,
            skill.name,
            skill.owner_id,
            skill.visibility.as_str(),
            skill.storage_mode.as_str(),
            skill.default_version_id,
            skill.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_skill(conn: &Connection, id: &str) -> Result<Option<Skill>> {
    let sql = format!("SELECT {SKILL_COLUMNS} FROM skills WHERE id = ?");
    Ok(conn.query_row(&sql, [id], skill_from_row).optional()?)
}

pub fn get_skill_by_slug(conn: &Connection, slug: &str) -> Result<Option<Skill>> {
    let sql = format!("SELECT {SKILL_COLUMNS} FROM skills WHERE slug = ?");
    Ok(conn.query_row(&sql, [slug], skill_from_row).optional()?)
}

pub fn slug_exists(conn: &Connection, slug: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM skills WHERE slug = ?)",
        [slug],
        |row| row.get(0),
    )?)
}

pub fn delete_skill(conn: &Connection, id: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM skills WHERE id = ?", [id])?)
}

/// Set the default pointer unconditionally.
pub fn set_default_version(conn: &Connection, skill_id: &str, version_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE skills SET default_version_id = ? WHERE id = ?",
        params![version_id, skill_id],
    )?;
    Ok(())
}

/// Set the default pointer only when none is set. Returns whether it changed.
pub fn set_default_if_unset(conn: &Connection, skill_id: &str, version_id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE skills SET default_version_id = ? WHERE id = ? AND default_version_id IS NULL",
        params![version_id, skill_id],
    )?;
    Ok(changed == 1)
}

/// Clear the default pointer if it references `version_id`. Returns whether it changed.
pub fn clear_default_if(conn: &Connection, skill_id: &str, version_id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE skills SET default_version_id = NULL WHERE id = ? AND default_version_id = ?",
        params![skill_id, version_id],
    )?;
    Ok(changed == 1)
}

// =============================================================================
// Versions
// =============================================================================

const VERSION_COLUMNS: &str = "id, skill_id, version, changelog, storage_key, content_hash, \
     size_bytes, manifest_json, published_by, status, verification_id, published_at";

pub fn insert_version(conn: &Connection, version: &SkillVersion) -> Result<()> {
    conn.execute(
        "INSERT INTO skill_versions (id, skill_id, version, changelog, storage_key, content_hash,
             size_bytes, manifest_json, published_by, status, verification_id, published_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            version.id,
            version.skill_id,
            version.version,
            version.changelog,
            version.storage_key,
            version.content_hash,
            version.size_bytes as i64,
            version.manifest_json,
            version.published_by,
            version.status.as_str(),
            version.verification_id,
            version.published_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn version_exists(conn: &Connection, skill_id: &str, version: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM skill_versions WHERE skill_id = ? AND version = ?)",
        params![skill_id, version],
        |row| row.get(0),
    )?)
}

pub fn get_version(conn: &Connection, id: &str) -> Result<Option<SkillVersion>> {
    let sql = format!("SELECT {VERSION_COLUMNS} FROM skill_versions WHERE id = ?");
    Ok(conn.query_row(&sql, [id], version_from_row).optional()?)
}

pub fn get_version_by_string(
    conn: &Connection,
    skill_id: &str,
    version: &str,
) -> Result<Option<SkillVersion>> {
    let sql =
        format!("SELECT {VERSION_COLUMNS} FROM skill_versions WHERE skill_id = ? AND version = ?");
    Ok(conn
        .query_row(&sql, params![skill_id, version], version_from_row)
        .optional()?)
}

pub fn list_versions(conn: &Connection, skill_id: &str) -> Result<Vec<SkillVersion>> {
    let sql = format!("SELECT {VERSION_COLUMNS} FROM skill_versions WHERE skill_id = ?");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([skill_id], version_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list_versions_with_status(
    conn: &Connection,
    skill_id: &str,
    status: VersionStatus,
) -> Result<Vec<SkillVersion>> {
    let sql =
        format!("SELECT {VERSION_COLUMNS} FROM skill_versions WHERE skill_id = ? AND status = ?");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![skill_id, status.as_str()], version_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Oldest pending versions first, at most `limit`.
pub fn pending_version_ids(conn: &Connection, limit: usize) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM skill_versions WHERE status = 'pending'
         ORDER BY published_at ASC, rowid ASC LIMIT ?",
    )?;
    let ids = stmt
        .query_map([limit as i64], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Move a version from `from` to `to`. Returns false when its status was not `from`.
pub fn transition_status(
    conn: &Connection,
    version_id: &str,
    from: VersionStatus,
    to: VersionStatus,
    verification_id: Option<&str>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE skill_versions
         SET status = ?, verification_id = COALESCE(?, verification_id)
         WHERE id = ? AND status = ?",
        params![to.as_str(), verification_id, version_id, from.as_str()],
    )?;
    Ok(changed == 1)
}

pub fn reset_to_pending(conn: &Connection, version_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE skill_versions SET status = 'pending' WHERE id = ?",
        [version_id],
    )?;
    Ok(())
}

// =============================================================================
// Verifications
// =============================================================================

fn errors_json(errors: &[String]) -> Result<Option<String>> {
    if errors.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(errors)?))
    }
}

pub fn insert_verification(conn: &Connection, verification: &Verification) -> Result<()> {
    let errors_json = errors_json(&verification.errors)?;
    conn.execute(
        "INSERT INTO verifications (id, version_id, status, checks_json, errors_json,
             started_at, completed_at, seq)
         VALUES (?, ?, ?, ?, ?, ?, ?,
             (SELECT COALESCE(MAX(seq), 0) + 1 FROM verifications WHERE version_id = ?))",
        params![
            verification.id,
            verification.version_id,
            verification.status.as_str(),
            serde_json::to_string(&verification.checks)?,
            errors_json,
            verification.started_at.to_rfc3339(),
            verification.completed_at.map(|t| t.to_rfc3339()),
            verification.version_id,
        ],
    )?;
    Ok(())
}

/// Write the final state of a `running` verification. Returns false when the
/// record was already completed.
pub fn complete_verification(conn: &Connection, verification: &Verification) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE verifications
         SET status = ?, checks_json = ?, errors_json = ?, completed_at = ?
         WHERE id = ? AND status = 'running'",
        params![
            verification.status.as_str(),
            serde_json::to_string(&verification.checks)?,
            errors_json(&verification.errors)?,
            verification.completed_at.map(|t| t.to_rfc3339()),
            verification.id,
        ],
    )?;
    Ok(changed == 1)
}

pub fn list_verifications(conn: &Connection, version_id: &str) -> Result<Vec<Verification>> {
    let mut stmt = conn.prepare(
        "SELECT id, version_id, status, checks_json, errors_json, started_at, completed_at
         FROM verifications WHERE version_id = ? ORDER BY seq ASC",
    )?;
    let rows = stmt
        .query_map([version_id], verification_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// =============================================================================
// Row mapping
// =============================================================================

fn skill_from_row(row: &Row<'_>) -> rusqlite::Result<Skill> {
    Ok(Skill {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        owner_id: row.get(3)?,
        visibility: parse_column(row, 4)?,
        storage_mode: parse_column(row, 5)?,
        default_version_id: row.get(6)?,
        created_at: parse_time(row, 7)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<SkillVersion> {
    let size: i64 = row.get(6)?;
    Ok(SkillVersion {
        id: row.get(0)?,
        skill_id: row.get(1)?,
        version: row.get(2)?,
        changelog: row.get(3)?,
        storage_key: row.get(4)?,
        content_hash: row.get(5)?,
        size_bytes: u64::try_from(size).unwrap_or(0),
        manifest_json: row.get(7)?,
        published_by: row.get(8)?,
        status: parse_column(row, 9)?,
        verification_id: row.get(10)?,
        published_at: parse_time(row, 11)?,
    })
}

fn verification_from_row(row: &Row<'_>) -> rusqlite::Result<Verification> {
    let checks_json: String = row.get(3)?;
    let checks: VerificationChecks = serde_json::from_str(&checks_json)
        .map_err(|e| conversion_error(3, e))?;
    let errors_json: Option<String> = row.get(4)?;
    let errors = match errors_json {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| conversion_error(4, e))?,
        None => Vec::new(),
    };
    let completed_at = match row.get::<_, Option<String>>(6)? {
        Some(raw) => Some(parse_rfc3339(&raw).map_err(|e| conversion_error(6, e))?),
        None => None,
    };
    Ok(Verification {
        id: row.get(0)?,
        version_id: row.get(1)?,
        status: parse_column(row, 2)?,
        checks,
        errors,
        started_at: parse_time(row, 5)?,
        completed_at,
    })
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_rfc3339(&raw).map_err(|e| conversion_error(idx, e))
}

fn parse_rfc3339(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

/// Map a UNIQUE violation on the version pair to `DuplicateVersion`.
pub fn map_unique_violation(err: PackError, skill: &str, version: &str) -> PackError {
    match err {
        PackError::Database(rusqlite::Error::SqliteFailure(code, _))
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            PackError::DuplicateVersion {
                skill: skill.to_string(),
                version: version.to_string(),
            }
        }
        other => other,
    }
}
