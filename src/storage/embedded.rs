//! SQLite backend. One connection per call, opened on a blocking thread and
//! dropped when the call returns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{ToSqlOutput, Type, Value, ValueRef};
use rusqlite::{
    params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row, ToSql,
    TransactionBehavior,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::query::{self, Placeholder, SqlParams, SqlValue};
use super::{
    next_updated_at, round2, success_rate, CompanyCount, EntityCounts, ListQuery, Page,
    SalaryRange, Statistics, StorageAdapter, StorageKind, Timestamps, TOP_COMPANIES,
};
use crate::error::{Result, StorageError};
use crate::models::{
    Application, ApplicationPatch, Followup, Interview, InterviewPatch, NewApplication,
    NewFollowup, NewInterview, ParseEnumError,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS applications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_name TEXT NOT NULL,
    job_title TEXT NOT NULL,
    job_url TEXT UNIQUE,
    description TEXT,
    location TEXT,
    salary_min INTEGER,
    salary_max INTEGER,
    currency TEXT NOT NULL DEFAULT 'USD',
    job_type TEXT CHECK (job_type IN ('full_time', 'part_time', 'contract', 'internship', 'temporary', 'freelance')),
    remote_type TEXT CHECK (remote_type IN ('onsite', 'remote', 'hybrid')),
    application_date TEXT,
    deadline TEXT,
    status TEXT NOT NULL DEFAULT 'applied' CHECK (status IN ('applied', 'reviewing', 'phone_screen', 'technical_interview', 'onsite_interview', 'final_round', 'offer', 'accepted', 'rejected', 'withdrawn')),
    priority TEXT NOT NULL DEFAULT 'medium' CHECK (priority IN ('low', 'medium', 'high')),
    notes TEXT,
    referral_source TEXT,
    contact_name TEXT,
    contact_email TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS followups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    application_id INTEGER NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
    interaction_type TEXT NOT NULL CHECK (interaction_type IN ('application', 'email', 'phone_call', 'interview', 'follow_up', 'networking', 'other')),
    title TEXT NOT NULL,
    description TEXT,
    interaction_date TEXT NOT NULL,
    old_status TEXT,
    new_status TEXT,
    outcome TEXT,
    follow_up_needed INTEGER NOT NULL DEFAULT 0,
    follow_up_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS interviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    application_id INTEGER NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
    interview_type TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    interview_date TEXT NOT NULL,
    interview_time TEXT,
    duration_minutes INTEGER,
    location TEXT,
    is_virtual INTEGER NOT NULL DEFAULT 0,
    meeting_link TEXT,
    interviewer_names TEXT,
    interviewer_roles TEXT,
    round_number INTEGER NOT NULL DEFAULT 1,
    total_rounds INTEGER,
    outcome TEXT,
    feedback TEXT,
    status TEXT NOT NULL DEFAULT 'scheduled' CHECK (status IN ('scheduled', 'completed', 'cancelled', 'rescheduled')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status);
CREATE INDEX IF NOT EXISTS idx_followups_application ON followups(application_id);
CREATE INDEX IF NOT EXISTS idx_interviews_application ON interviews(application_id);
"#;

const APPLICATION_COLUMNS: &str = "id, company_name, job_title, job_url, description, location, \
     salary_min, salary_max, currency, job_type, remote_type, application_date, deadline, status, \
     priority, notes, referral_source, contact_name, contact_email, created_at, updated_at";

const FOLLOWUP_COLUMNS: &str = "id, application_id, interaction_type, title, description, \
     interaction_date, old_status, new_status, outcome, follow_up_needed, follow_up_date, \
     created_at, updated_at";

const INTERVIEW_COLUMNS: &str = "id, application_id, interview_type, title, description, \
     interview_date, interview_time, duration_minutes, location, is_virtual, meeting_link, \
     interviewer_names, interviewer_roles, round_number, total_rounds, outcome, feedback, status, \
     created_at, updated_at";

/// Fixed-width UTC timestamp, so text order matches time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlValue::Text(v) => v.to_sql(),
            SqlValue::Int(v) => v.to_sql(),
            SqlValue::Date(v) => v.to_sql(),
            SqlValue::Time(v) => v.to_sql(),
            SqlValue::Timestamp(Some(ts)) => Ok(ToSqlOutput::from(format_timestamp(*ts))),
            SqlValue::Timestamp(None) => Ok(ToSqlOutput::from(rusqlite::types::Null)),
        }
    }
}

/// SQLite-backed adapter. Holds only the file path; every call opens its own
/// connection.
pub struct EmbeddedAdapter {
    path: PathBuf,
    connected: AtomicBool,
}

impl EmbeddedAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            connected: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Runs `f` against a fresh connection on the blocking pool. The
    /// connection is dropped when `f` returns, on success or error.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&path)?;
            f(&mut conn)
        })
        .await?
    }

    /// Reads every row of the three tables without interpreting values.
    /// Tables missing from an older file read as empty. The file is opened
    /// read-only and needs no prior `connect()`.
    pub async fn extract_all(&self) -> Result<RawExtract> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| StorageError::Connection(format!("{}: {e}", path.display())))?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            Ok(RawExtract {
                applications: read_raw(&conn, "applications")?,
                followups: read_raw(&conn, "followups")?,
                interviews: read_raw(&conn, "interviews")?,
            })
        })
        .await?
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| StorageError::Connection(format!("{}: {e}", path.display())))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.create_scalar_function(
        "lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        unicode_lower,
    )?;
    Ok(conn)
}

/// Replaces SQLite's ASCII-only `lower()` so text filters fold case the way
/// PostgreSQL does. Non-text values pass through unchanged.
fn unicode_lower(ctx: &Context<'_>) -> rusqlite::Result<Value> {
    Ok(match ctx.get_raw(0) {
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).to_lowercase()),
        other => other.into(),
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn duplicate_url(url: &Option<String>) -> StorageError {
    StorageError::Duplicate {
        field: "job_url",
        value: url.clone().unwrap_or_default(),
    }
}

fn parse_text<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_text<T>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn row_to_application(row: &Row) -> rusqlite::Result<Application> {
    Ok(Application {
        id: row.get(0)?,
        company_name: row.get(1)?,
        job_title: row.get(2)?,
        job_url: row.get(3)?,
        description: row.get(4)?,
        location: row.get(5)?,
        salary_min: row.get(6)?,
        salary_max: row.get(7)?,
        currency: row.get(8)?,
        job_type: parse_opt_text(row, 9)?,
        remote_type: parse_opt_text(row, 10)?,
        application_date: row.get(11)?,
        deadline: row.get(12)?,
        status: parse_text(row, 13)?,
        priority: parse_text(row, 14)?,
        notes: row.get(15)?,
        referral_source: row.get(16)?,
        contact_name: row.get(17)?,
        contact_email: row.get(18)?,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

fn row_to_followup(row: &Row) -> rusqlite::Result<Followup> {
    Ok(Followup {
        id: row.get(0)?,
        application_id: row.get(1)?,
        interaction_type: parse_text(row, 2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        interaction_date: row.get(5)?,
        old_status: parse_opt_text(row, 6)?,
        new_status: parse_opt_text(row, 7)?,
        outcome: row.get(8)?,
        follow_up_needed: row.get(9)?,
        follow_up_date: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn row_to_interview(row: &Row) -> rusqlite::Result<Interview> {
    Ok(Interview {
        id: row.get(0)?,
        application_id: row.get(1)?,
        interview_type: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        interview_date: row.get(5)?,
        interview_time: row.get(6)?,
        duration_minutes: row.get(7)?,
        location: row.get(8)?,
        is_virtual: row.get(9)?,
        meeting_link: row.get(10)?,
        interviewer_names: row.get(11)?,
        interviewer_roles: row.get(12)?,
        round_number: row.get(13)?,
        total_rounds: row.get(14)?,
        outcome: row.get(15)?,
        feedback: row.get(16)?,
        status: parse_text(row, 17)?,
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

fn query_application(conn: &Connection, id: i64) -> Result<Option<Application>> {
    conn.query_row(
        &format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"),
        [id],
        row_to_application,
    )
    .optional()
    .map_err(Into::into)
}

fn query_interview(conn: &Connection, id: i64) -> Result<Option<Interview>> {
    conn.query_row(
        &format!("SELECT {INTERVIEW_COLUMNS} FROM interviews WHERE id = ?1"),
        [id],
        row_to_interview,
    )
    .optional()
    .map_err(Into::into)
}

fn delete_by_id(conn: &Connection, table: &str, id: i64) -> Result<bool> {
    let affected = conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), [id])?;
    Ok(affected > 0)
}

/// `'a', 'b'` for a set of static enum names.
fn quoted(values: impl Iterator<Item = &'static str>) -> String {
    values.map(|v| format!("'{v}'")).collect::<Vec<_>>().join(", ")
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// One row read without interpretation; every value rendered as text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub values: BTreeMap<String, Option<String>>,
}

impl RawRow {
    /// Value of `column`, `None` when NULL or absent.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_deref())
    }

    pub fn set(&mut self, column: &str, value: Option<&str>) {
        self.values
            .insert(column.to_string(), value.map(str::to_string));
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawExtract {
    pub applications: Vec<RawRow>,
    pub followups: Vec<RawRow>,
    pub interviews: Vec<RawRow>,
}

fn value_to_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

fn read_raw(conn: &Connection, table: &str) -> Result<Vec<RawRow>> {
    if !table_exists(conn, table)? {
        debug!(table, "table missing from source, treating as empty");
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!("SELECT * FROM {table} ORDER BY id"))?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let rows = stmt.query_map([], |row| {
        let mut raw = RawRow::default();
        for (idx, name) in names.iter().enumerate() {
            raw.values.insert(name.clone(), value_to_text(row.get_ref(idx)?));
        }
        Ok(raw)
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

#[async_trait]
impl StorageAdapter for EmbeddedAdapter {
    fn kind(&self) -> StorageKind {
        StorageKind::Embedded
    }

    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Connection(format!("{}: {e}", parent.display())))?;
        }
        self.with_conn(|conn| {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(journal_mode = %mode, "sqlite connection verified");
            Ok(())
        })
        .await?;
        self.connected.store(true, Ordering::SeqCst);
        info!(path = %self.path.display(), "embedded storage ready");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        // No handles outlive a call, so there is nothing to release.
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn create_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        info!(path = %self.path.display(), "embedded schema ensured");
        Ok(())
    }

    async fn insert_application(&self, new: &NewApplication, stamps: Timestamps) -> Result<i64> {
        new.validate()?;
        let new = new.clone();
        self.with_conn(move |conn| {
            let created_at = format_timestamp(stamps.created_at);
            let updated_at = format_timestamp(stamps.updated_at);
            let inserted = conn.execute(
                "INSERT INTO applications (company_name, job_title, job_url, description, location,
                    salary_min, salary_max, currency, job_type, remote_type, application_date, deadline,
                    status, priority, notes, referral_source, contact_name, contact_email,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                params![
                    new.company_name,
                    new.job_title,
                    new.job_url,
                    new.description,
                    new.location,
                    new.salary_min,
                    new.salary_max,
                    new.currency,
                    new.job_type.map(|t| t.as_str()),
                    new.remote_type.map(|t| t.as_str()),
                    new.application_date,
                    new.deadline,
                    new.status.as_str(),
                    new.priority.as_str(),
                    new.notes,
                    new.referral_source,
                    new.contact_name,
                    new.contact_email,
                    created_at,
                    updated_at,
                ],
            );
            match inserted {
                Ok(_) => {
                    let id = conn.last_insert_rowid();
                    debug!(id, company = %new.company_name, "application created");
                    Ok(id)
                }
                Err(e) if is_unique_violation(&e) => Err(duplicate_url(&new.job_url)),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get_application(&self, id: i64) -> Result<Option<Application>> {
        self.with_conn(move |conn| query_application(conn, id)).await
    }

    async fn list_applications(&self, list: &ListQuery) -> Result<Page<Application>> {
        let list = list.clone();
        self.with_conn(move |conn| {
            let mut params = SqlParams::new(Placeholder::Numbered);
            let where_sql = query::where_clause(&list.filter, &mut params);

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM applications{where_sql}"),
                params_from_iter(params.values()),
                |row| row.get(0),
            )?;

            let (limit, offset) = list.limit_offset();
            let limit_p = params.push(SqlValue::Int(Some(limit)));
            let offset_p = params.push(SqlValue::Int(Some(offset)));
            let sql = format!(
                "SELECT {APPLICATION_COLUMNS} FROM applications{where_sql}{} LIMIT {limit_p} OFFSET {offset_p}",
                query::order_by(list.sort_field, list.sort_dir)
            );

            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(params_from_iter(params.values()), row_to_application)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Page::new(items, total, &list))
        })
        .await
    }

    async fn update_application(&self, id: i64, patch: &ApplicationPatch) -> Result<bool> {
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(current) = query_application(&tx, id)? else {
                return Ok(false);
            };
            if patch.is_empty() {
                return Ok(true);
            }

            let mut merged = current.to_new();
            patch.apply_to(&mut merged);
            merged.validate()?;

            let (sql, values) = query::update_statement(
                "applications",
                query::application_assignments(&patch),
                next_updated_at(current.updated_at),
                id,
                Placeholder::Numbered,
            );
            match tx.execute(&sql, params_from_iter(values.iter())) {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => return Err(duplicate_url(&merged.job_url)),
                Err(e) => return Err(e.into()),
            }
            tx.commit()?;
            debug!(id, "application updated");
            Ok(true)
        })
        .await
    }

    async fn delete_application(&self, id: i64) -> Result<bool> {
        self.with_conn(move |conn| delete_by_id(conn, "applications", id))
            .await
    }

    async fn insert_followup(&self, new: &NewFollowup, stamps: Timestamps) -> Result<i64> {
        new.validate()?;
        let new = new.clone();
        self.with_conn(move |conn| {
            let created_at = format_timestamp(stamps.created_at);
            let updated_at = format_timestamp(stamps.updated_at);
            conn.execute(
                "INSERT INTO followups (application_id, interaction_type, title, description,
                    interaction_date, old_status, new_status, outcome, follow_up_needed,
                    follow_up_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    new.application_id,
                    new.interaction_type.as_str(),
                    new.title,
                    new.description,
                    format_timestamp(new.interaction_date),
                    new.old_status.map(|s| s.as_str()),
                    new.new_status.map(|s| s.as_str()),
                    new.outcome,
                    new.follow_up_needed,
                    new.follow_up_date,
                    created_at,
                    updated_at,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_followup(&self, id: i64) -> Result<Option<Followup>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {FOLLOWUP_COLUMNS} FROM followups WHERE id = ?1"),
                [id],
                row_to_followup,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }

    async fn list_followups(&self, application_id: i64) -> Result<Vec<Followup>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FOLLOWUP_COLUMNS} FROM followups WHERE application_id = ?1
                 ORDER BY interaction_date ASC, id ASC"
            ))?;
            let rows = stmt.query_map([application_id], row_to_followup)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
        .await
    }

    async fn delete_followup(&self, id: i64) -> Result<bool> {
        self.with_conn(move |conn| delete_by_id(conn, "followups", id))
            .await
    }

    async fn insert_interview(&self, new: &NewInterview, stamps: Timestamps) -> Result<i64> {
        new.validate()?;
        let new = new.clone();
        self.with_conn(move |conn| {
            let created_at = format_timestamp(stamps.created_at);
            let updated_at = format_timestamp(stamps.updated_at);
            conn.execute(
                "INSERT INTO interviews (application_id, interview_type, title, description,
                    interview_date, interview_time, duration_minutes, location, is_virtual,
                    meeting_link, interviewer_names, interviewer_roles, round_number, total_rounds,
                    outcome, feedback, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                params![
                    new.application_id,
                    new.interview_type,
                    new.title,
                    new.description,
                    new.interview_date,
                    new.interview_time,
                    new.duration_minutes,
                    new.location,
                    new.is_virtual,
                    new.meeting_link,
                    new.interviewer_names,
                    new.interviewer_roles,
                    new.round_number,
                    new.total_rounds,
                    new.outcome,
                    new.feedback,
                    new.status.as_str(),
                    created_at,
                    updated_at,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_interview(&self, id: i64) -> Result<Option<Interview>> {
        self.with_conn(move |conn| query_interview(conn, id)).await
    }

    async fn list_interviews(&self, application_id: i64) -> Result<Vec<Interview>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INTERVIEW_COLUMNS} FROM interviews WHERE application_id = ?1
                 ORDER BY round_number ASC, interview_date ASC, id ASC"
            ))?;
            let rows = stmt.query_map([application_id], row_to_interview)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
        .await
    }

    async fn update_interview(&self, id: i64, patch: &InterviewPatch) -> Result<bool> {
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(current) = query_interview(&tx, id)? else {
                return Ok(false);
            };
            if patch.is_empty() {
                return Ok(true);
            }

            let mut merged = current.to_new();
            patch.apply_to(&mut merged);
            merged.validate()?;

            let (sql, values) = query::update_statement(
                "interviews",
                query::interview_assignments(&patch),
                next_updated_at(current.updated_at),
                id,
                Placeholder::Numbered,
            );
            tx.execute(&sql, params_from_iter(values.iter()))?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn delete_interview(&self, id: i64) -> Result<bool> {
        self.with_conn(move |conn| delete_by_id(conn, "interviews", id))
            .await
    }

    async fn get_statistics(&self) -> Result<Statistics> {
        self.with_conn(|conn| {
            let (total, successes, active): (i64, i64, i64) = conn.query_row(
                &format!(
                    "SELECT COUNT(*),
                            COALESCE(SUM(CASE WHEN status IN ({}) THEN 1 ELSE 0 END), 0),
                            COALESCE(SUM(CASE WHEN status IN ({}) THEN 1 ELSE 0 END), 0)
                     FROM applications",
                    quoted(super::success_statuses()),
                    quoted(super::active_statuses()),
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM applications GROUP BY status")?;
            let count_by_status = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

            let mut stmt = conn.prepare(
                "SELECT substr(COALESCE(application_date, created_at), 1, 7) AS month, COUNT(*)
                 FROM applications GROUP BY month",
            )?;
            let count_by_month = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

            let mut stmt = conn.prepare(
                "SELECT company_name, COUNT(*) AS n FROM applications
                 GROUP BY company_name ORDER BY n DESC, company_name ASC LIMIT ?1",
            )?;
            let top_companies = stmt
                .query_map([TOP_COMPANIES], |row| {
                    Ok(CompanyCount {
                        company_name: row.get(0)?,
                        count: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let salary_range = conn.query_row(
                "SELECT MIN(salary_min), MAX(salary_max),
                        AVG(CASE WHEN salary_min IS NOT NULL AND salary_max IS NOT NULL
                                 THEN (CAST(salary_min AS REAL) + salary_max) / 2.0
                                 ELSE COALESCE(salary_min, salary_max) END)
                 FROM applications",
                [],
                |row| {
                    Ok(SalaryRange {
                        min: row.get(0)?,
                        max: row.get(1)?,
                        avg: row.get::<_, Option<f64>>(2)?.map(round2),
                    })
                },
            )?;

            Ok(Statistics {
                total_count: total,
                count_by_status,
                count_by_month,
                success_rate: success_rate(successes, total),
                active_count: active,
                top_companies,
                salary_range,
            })
        })
        .await
    }

    async fn entity_counts(&self) -> Result<EntityCounts> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT (SELECT COUNT(*) FROM applications),
                        (SELECT COUNT(*) FROM followups),
                        (SELECT COUNT(*) FROM interviews)",
                [],
                |row| {
                    Ok(EntityCounts {
                        applications: row.get(0)?,
                        followups: row.get(1)?,
                        interviews: row.get(2)?,
                    })
                },
            )
            .map_err(Into::into)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ApplicationStatus;

    fn temp_adapter() -> (tempfile::TempDir, EmbeddedAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let adapter = EmbeddedAdapter::new(dir.path().join("jobs.db"));
        (dir, adapter)
    }

    #[test]
    fn test_format_timestamp_is_fixed_width() {
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(ts), "2026-01-02T03:04:05.000000Z");
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(ValueRef::Null), None);
        assert_eq!(value_to_text(ValueRef::Integer(42)), Some("42".to_string()));
        assert_eq!(value_to_text(ValueRef::Text(b"offer")), Some("offer".to_string()));
    }

    #[tokio::test]
    async fn test_corrupt_enum_is_a_hard_error() {
        let (_dir, adapter) = temp_adapter();
        adapter.create_schema().await.unwrap();
        let id = adapter
            .create_application(&NewApplication::new("Acme", "Engineer"))
            .await
            .unwrap();

        let conn = Connection::open(adapter.path()).unwrap();
        conn.pragma_update(None, "ignore_check_constraints", "ON").unwrap();
        conn.execute("UPDATE applications SET status = 'ghosted' WHERE id = ?1", [id])
            .unwrap();
        drop(conn);

        let err = adapter.get_application(id).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_extract_all_reads_raw_text() {
        let (_dir, adapter) = temp_adapter();
        adapter.create_schema().await.unwrap();
        let mut new = NewApplication::new("Acme", "Engineer");
        new.status = ApplicationStatus::Offer;
        new.salary_min = Some(90_000);
        adapter.create_application(&new).await.unwrap();

        let raw = adapter.extract_all().await.unwrap();
        assert_eq!(raw.applications.len(), 1);
        assert!(raw.followups.is_empty());
        let row = &raw.applications[0];
        assert_eq!(row.get("status"), Some("offer"));
        assert_eq!(row.get("salary_min"), Some("90000"));
        assert_eq!(row.get("job_url"), None);
    }

    #[tokio::test]
    async fn test_extract_all_tolerates_missing_tables() {
        let (_dir, adapter) = temp_adapter();
        let conn = Connection::open(adapter.path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE applications (id INTEGER PRIMARY KEY, company_name TEXT, job_title TEXT);
             INSERT INTO applications VALUES (1, 'Acme', 'Engineer');",
        )
        .unwrap();
        drop(conn);

        let raw = adapter.extract_all().await.unwrap();
        assert_eq!(raw.applications.len(), 1);
        assert!(raw.interviews.is_empty());
    }

    #[tokio::test]
    async fn test_extract_all_leaves_journal_mode_alone() {
        let (_dir, adapter) = temp_adapter();
        let conn = Connection::open(adapter.path()).unwrap();
        conn.execute_batch("CREATE TABLE applications (id INTEGER PRIMARY KEY, company_name TEXT);")
            .unwrap();
        drop(conn);

        adapter.extract_all().await.unwrap();

        let conn = Connection::open(adapter.path()).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "delete");
    }

    #[tokio::test]
    async fn test_lower_folds_non_ascii() {
        let (_dir, adapter) = temp_adapter();
        adapter.create_schema().await.unwrap();
        let folded: String = adapter
            .with_conn(|conn| Ok(conn.query_row("SELECT lower('ÉMILE Ça')", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(folded, "émile ça");
    }
}
