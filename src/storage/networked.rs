//! PostgreSQL backend over a bounded `sqlx` pool.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use std::collections::BTreeMap;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::query::{self, Placeholder, SqlParams, SqlValue};
use super::{
    next_updated_at, round2, success_rate, CompanyCount, EntityCounts, ListQuery, Page,
    SalaryRange, Statistics, StorageAdapter, StorageKind, Timestamps, TOP_COMPANIES,
};
use crate::config::NetworkSettings;
use crate::error::{Result, StorageError};
use crate::models::{
    Application, ApplicationPatch, Followup, Interview, InterviewPatch, NewApplication,
    NewFollowup, NewInterview, ParseEnumError,
};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS applications (
        id BIGSERIAL PRIMARY KEY,
        company_name TEXT NOT NULL,
        job_title TEXT NOT NULL,
        job_url TEXT UNIQUE,
        description TEXT,
        location TEXT,
        salary_min BIGINT,
        salary_max BIGINT,
        currency TEXT NOT NULL DEFAULT 'USD',
        job_type TEXT CHECK (job_type IN ('full_time', 'part_time', 'contract', 'internship', 'temporary', 'freelance')),
        remote_type TEXT CHECK (remote_type IN ('onsite', 'remote', 'hybrid')),
        application_date DATE,
        deadline DATE,
        status TEXT NOT NULL DEFAULT 'applied' CHECK (status IN ('applied', 'reviewing', 'phone_screen', 'technical_interview', 'onsite_interview', 'final_round', 'offer', 'accepted', 'rejected', 'withdrawn')),
        priority TEXT NOT NULL DEFAULT 'medium' CHECK (priority IN ('low', 'medium', 'high')),
        notes TEXT,
        referral_source TEXT,
        contact_name TEXT,
        contact_email TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS followups (
        id BIGSERIAL PRIMARY KEY,
        application_id BIGINT NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
        interaction_type TEXT NOT NULL CHECK (interaction_type IN ('application', 'email', 'phone_call', 'interview', 'follow_up', 'networking', 'other')),
        title TEXT NOT NULL,
        description TEXT,
        interaction_date TIMESTAMPTZ NOT NULL,
        old_status TEXT,
        new_status TEXT,
        outcome TEXT,
        follow_up_needed BOOLEAN NOT NULL DEFAULT FALSE,
        follow_up_date DATE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS interviews (
        id BIGSERIAL PRIMARY KEY,
        application_id BIGINT NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
        interview_type TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT,
        interview_date DATE NOT NULL,
        interview_time TIME,
        duration_minutes INTEGER,
        location TEXT,
        is_virtual BOOLEAN NOT NULL DEFAULT FALSE,
        meeting_link TEXT,
        interviewer_names TEXT,
        interviewer_roles TEXT,
        round_number INTEGER NOT NULL DEFAULT 1,
        total_rounds INTEGER,
        outcome TEXT,
        feedback TEXT,
        status TEXT NOT NULL DEFAULT 'scheduled' CHECK (status IN ('scheduled', 'completed', 'cancelled', 'rescheduled')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status)",
    "CREATE INDEX IF NOT EXISTS idx_applications_company ON applications(company_name)",
    "CREATE INDEX IF NOT EXISTS idx_applications_date ON applications(application_date)",
    "CREATE INDEX IF NOT EXISTS idx_followups_application ON followups(application_id)",
    "CREATE INDEX IF NOT EXISTS idx_interviews_application ON interviews(application_id)",
];

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

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

fn bind_value<'q>(q: PgQuery<'q>, value: &'q SqlValue) -> PgQuery<'q> {
    match value {
        SqlValue::Text(v) => q.bind(v.as_deref()),
        SqlValue::Int(v) => q.bind(*v),
        SqlValue::Date(v) => q.bind(*v),
        SqlValue::Time(v) => q.bind(*v),
        SqlValue::Timestamp(v) => q.bind(*v),
    }
}

fn bind_all<'q>(sql: &'q str, values: &'q [SqlValue]) -> PgQuery<'q> {
    values
        .iter()
        .fold(sqlx::query(sql), |q, value| bind_value(q, value))
}

fn parse_enum<T>(raw: String) -> Result<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    raw.parse()
        .map_err(|e: ParseEnumError| StorageError::Corrupt(e.to_string()))
}

fn parse_opt_enum<T>(raw: Option<String>) -> Result<Option<T>>
where
    T: FromStr<Err = ParseEnumError>,
{
    raw.map(parse_enum).transpose()
}

fn row_to_application(row: &PgRow) -> Result<Application> {
    Ok(Application {
        id: row.try_get("id")?,
        company_name: row.try_get("company_name")?,
        job_title: row.try_get("job_title")?,
        job_url: row.try_get("job_url")?,
        description: row.try_get("description")?,
        location: row.try_get("location")?,
        salary_min: row.try_get("salary_min")?,
        salary_max: row.try_get("salary_max")?,
        currency: row.try_get("currency")?,
        job_type: parse_opt_enum(row.try_get("job_type")?)?,
        remote_type: parse_opt_enum(row.try_get("remote_type")?)?,
        application_date: row.try_get("application_date")?,
        deadline: row.try_get("deadline")?,
        status: parse_enum(row.try_get("status")?)?,
        priority: parse_enum(row.try_get("priority")?)?,
        notes: row.try_get("notes")?,
        referral_source: row.try_get("referral_source")?,
        contact_name: row.try_get("contact_name")?,
        contact_email: row.try_get("contact_email")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_followup(row: &PgRow) -> Result<Followup> {
    Ok(Followup {
        id: row.try_get("id")?,
        application_id: row.try_get("application_id")?,
        interaction_type: parse_enum(row.try_get("interaction_type")?)?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        interaction_date: row.try_get("interaction_date")?,
        old_status: parse_opt_enum(row.try_get("old_status")?)?,
        new_status: parse_opt_enum(row.try_get("new_status")?)?,
        outcome: row.try_get("outcome")?,
        follow_up_needed: row.try_get("follow_up_needed")?,
        follow_up_date: row.try_get("follow_up_date")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_interview(row: &PgRow) -> Result<Interview> {
    Ok(Interview {
        id: row.try_get("id")?,
        application_id: row.try_get("application_id")?,
        interview_type: row.try_get("interview_type")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        interview_date: row.try_get("interview_date")?,
        interview_time: row.try_get("interview_time")?,
        duration_minutes: row.try_get("duration_minutes")?,
        location: row.try_get("location")?,
        is_virtual: row.try_get("is_virtual")?,
        meeting_link: row.try_get("meeting_link")?,
        interviewer_names: row.try_get("interviewer_names")?,
        interviewer_roles: row.try_get("interviewer_roles")?,
        round_number: row.try_get("round_number")?,
        total_rounds: row.try_get("total_rounds")?,
        outcome: row.try_get("outcome")?,
        feedback: row.try_get("feedback")?,
        status: parse_enum(row.try_get("status")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn duplicate_url(url: &Option<String>) -> StorageError {
    StorageError::Duplicate {
        field: "job_url",
        value: url.clone().unwrap_or_default(),
    }
}

/// PostgreSQL-backed adapter. The pool is created by `connect()` and owned
/// by this instance alone.
pub struct NetworkedAdapter {
    settings: NetworkSettings,
    pool: RwLock<Option<PgPool>>,
}

impl NetworkedAdapter {
    pub fn new(settings: NetworkSettings) -> Self {
        Self {
            settings,
            pool: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    async fn pool(&self) -> Result<PgPool> {
        self.pool.read().await.clone().ok_or(StorageError::NotConnected)
    }

    fn connect_options(&self) -> Result<PgConnectOptions> {
        let options = PgConnectOptions::from_str(&self.settings.url)
            .map_err(|e| StorageError::Connection(format!("invalid connection string: {e}")))?;
        let statement_ms = self.settings.statement_timeout.as_millis().to_string();
        Ok(options.options([("statement_timeout", statement_ms)]))
    }

    async fn delete_by_id(&self, table: &str, id: i64) -> Result<bool> {
        let pool = self.pool().await?;
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
            .bind(id)
            .execute(&pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl StorageAdapter for NetworkedAdapter {
    fn kind(&self) -> StorageKind {
        StorageKind::Networked
    }

    async fn connect(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }
        let pool = PgPoolOptions::new()
            .min_connections(self.settings.min_connections)
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.acquire_timeout)
            .idle_timeout(Some(self.settings.idle_timeout))
            .max_lifetime(Some(self.settings.max_lifetime))
            .test_before_acquire(true)
            .connect_with(self.connect_options()?)
            .await?;
        info!(
            min = self.settings.min_connections,
            max = self.settings.max_connections,
            "networked storage pool established"
        );
        *guard = Some(pool);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            info!("networked storage pool closed");
        }
        Ok(())
    }

    async fn create_schema(&self) -> Result<()> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!("networked schema ensured");
        Ok(())
    }

    async fn insert_application(&self, new: &NewApplication, stamps: Timestamps) -> Result<i64> {
        new.validate()?;
        let pool = self.pool().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO applications (company_name, job_title, job_url, description, location,
                salary_min, salary_max, currency, job_type, remote_type, application_date, deadline,
                status, priority, notes, referral_source, contact_name, contact_email,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            RETURNING id
            "#,
        )
        .bind(&new.company_name)
        .bind(&new.job_title)
        .bind(&new.job_url)
        .bind(&new.description)
        .bind(&new.location)
        .bind(new.salary_min)
        .bind(new.salary_max)
        .bind(&new.currency)
        .bind(new.job_type.map(|t| t.as_str()))
        .bind(new.remote_type.map(|t| t.as_str()))
        .bind(new.application_date)
        .bind(new.deadline)
        .bind(new.status.as_str())
        .bind(new.priority.as_str())
        .bind(&new.notes)
        .bind(&new.referral_source)
        .bind(&new.contact_name)
        .bind(&new.contact_email)
        .bind(stamps.created_at)
        .bind(stamps.updated_at)
        .fetch_one(&pool)
        .await;

        match inserted {
            Ok(row) => {
                let id: i64 = row.try_get("id")?;
                debug!(id, company = %new.company_name, "application created");
                Ok(id)
            }
            Err(e) if is_unique_violation(&e) => Err(duplicate_url(&new.job_url)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_application(&self, id: i64) -> Result<Option<Application>> {
        let pool = self.pool().await?;
        let row = sqlx::query(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&pool)
        .await?;
        row.as_ref().map(row_to_application).transpose()
    }

    async fn list_applications(&self, list: &ListQuery) -> Result<Page<Application>> {
        let pool = self.pool().await?;
        let mut params = SqlParams::new(Placeholder::Dollar);
        let where_sql = query::where_clause(&list.filter, &mut params);

        let count_sql = format!("SELECT COUNT(*) AS total FROM applications{where_sql}");
        let total: i64 = bind_all(&count_sql, params.values())
            .fetch_one(&pool)
            .await?
            .try_get("total")?;

        let (limit, offset) = list.limit_offset();
        let limit_p = params.push(SqlValue::Int(Some(limit)));
        let offset_p = params.push(SqlValue::Int(Some(offset)));
        let sql = format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications{where_sql}{} LIMIT {limit_p} OFFSET {offset_p}",
            query::order_by(list.sort_field, list.sort_dir)
        );

        let rows = bind_all(&sql, params.values()).fetch_all(&pool).await?;
        let items = rows
            .iter()
            .map(row_to_application)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(items, total, list))
    }

    async fn update_application(&self, id: i64, patch: &ApplicationPatch) -> Result<bool> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(current) = row.as_ref().map(row_to_application).transpose()? else {
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
            query::application_assignments(patch),
            next_updated_at(current.updated_at),
            id,
            Placeholder::Dollar,
        );
        match bind_all(&sql, &values).execute(&mut *tx).await {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(duplicate_url(&merged.job_url)),
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;
        debug!(id, "application updated");
        Ok(true)
    }

    async fn delete_application(&self, id: i64) -> Result<bool> {
        self.delete_by_id("applications", id).await
    }

    async fn insert_followup(&self, new: &NewFollowup, stamps: Timestamps) -> Result<i64> {
        new.validate()?;
        let pool = self.pool().await?;
        let row = sqlx::query(
            r#"
            INSERT INTO followups (application_id, interaction_type, title, description,
                interaction_date, old_status, new_status, outcome, follow_up_needed,
                follow_up_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(new.application_id)
        .bind(new.interaction_type.as_str())
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.interaction_date)
        .bind(new.old_status.map(|s| s.as_str()))
        .bind(new.new_status.map(|s| s.as_str()))
        .bind(&new.outcome)
        .bind(new.follow_up_needed)
        .bind(new.follow_up_date)
        .bind(stamps.created_at)
        .bind(stamps.updated_at)
        .fetch_one(&pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn get_followup(&self, id: i64) -> Result<Option<Followup>> {
        let pool = self.pool().await?;
        let row = sqlx::query(&format!(
            "SELECT {FOLLOWUP_COLUMNS} FROM followups WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&pool)
        .await?;
        row.as_ref().map(row_to_followup).transpose()
    }

    async fn list_followups(&self, application_id: i64) -> Result<Vec<Followup>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(&format!(
            "SELECT {FOLLOWUP_COLUMNS} FROM followups WHERE application_id = $1
             ORDER BY interaction_date ASC, id ASC"
        ))
        .bind(application_id)
        .fetch_all(&pool)
        .await?;
        rows.iter().map(row_to_followup).collect()
    }

    async fn delete_followup(&self, id: i64) -> Result<bool> {
        self.delete_by_id("followups", id).await
    }

    async fn insert_interview(&self, new: &NewInterview, stamps: Timestamps) -> Result<i64> {
        new.validate()?;
        let pool = self.pool().await?;
        let row = sqlx::query(
            r#"
            INSERT INTO interviews (application_id, interview_type, title, description,
                interview_date, interview_time, duration_minutes, location, is_virtual,
                meeting_link, interviewer_names, interviewer_roles, round_number, total_rounds,
                outcome, feedback, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING id
            "#,
        )
        .bind(new.application_id)
        .bind(&new.interview_type)
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.interview_date)
        .bind(new.interview_time)
        .bind(new.duration_minutes)
        .bind(&new.location)
        .bind(new.is_virtual)
        .bind(&new.meeting_link)
        .bind(&new.interviewer_names)
        .bind(&new.interviewer_roles)
        .bind(new.round_number)
        .bind(new.total_rounds)
        .bind(&new.outcome)
        .bind(&new.feedback)
        .bind(new.status.as_str())
        .bind(stamps.created_at)
        .bind(stamps.updated_at)
        .fetch_one(&pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn get_interview(&self, id: i64) -> Result<Option<Interview>> {
        let pool = self.pool().await?;
        let row = sqlx::query(&format!(
            "SELECT {INTERVIEW_COLUMNS} FROM interviews WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&pool)
        .await?;
        row.as_ref().map(row_to_interview).transpose()
    }

    async fn list_interviews(&self, application_id: i64) -> Result<Vec<Interview>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(&format!(
            "SELECT {INTERVIEW_COLUMNS} FROM interviews WHERE application_id = $1
             ORDER BY round_number ASC, interview_date ASC, id ASC"
        ))
        .bind(application_id)
        .fetch_all(&pool)
        .await?;
        rows.iter().map(row_to_interview).collect()
    }

    async fn update_interview(&self, id: i64, patch: &InterviewPatch) -> Result<bool> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {INTERVIEW_COLUMNS} FROM interviews WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(current) = row.as_ref().map(row_to_interview).transpose()? else {
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
            query::interview_assignments(patch),
            next_updated_at(current.updated_at),
            id,
            Placeholder::Dollar,
        );
        bind_all(&sql, &values).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_interview(&self, id: i64) -> Result<bool> {
        self.delete_by_id("interviews", id).await
    }

    async fn get_statistics(&self) -> Result<Statistics> {
        let pool = self.pool().await?;
        let successes: Vec<String> = super::success_statuses().map(str::to_string).collect();
        let active: Vec<String> = super::active_statuses().map(str::to_string).collect();

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = ANY($1)) AS successes,
                   COUNT(*) FILTER (WHERE status = ANY($2)) AS active
            FROM applications
            "#,
        )
        .bind(&successes)
        .bind(&active)
        .fetch_one(&pool)
        .await?;
        let total: i64 = row.try_get("total")?;
        let success_count: i64 = row.try_get("successes")?;
        let active_count: i64 = row.try_get("active")?;

        let count_by_status = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM applications GROUP BY status",
        )
        .fetch_all(&pool)
        .await?
        .iter()
        .map(|r| -> Result<(String, i64)> { Ok((r.try_get("status")?, r.try_get("n")?)) })
        .collect::<Result<BTreeMap<_, _>>>()?;

        let count_by_month = sqlx::query(
            r#"
            SELECT to_char(
                       date_trunc('month', COALESCE(application_date, (created_at AT TIME ZONE 'UTC')::date)::timestamp),
                       'YYYY-MM') AS month,
                   COUNT(*) AS n
            FROM applications
            GROUP BY month
            "#,
        )
        .fetch_all(&pool)
        .await?
        .iter()
        .map(|r| -> Result<(String, i64)> { Ok((r.try_get("month")?, r.try_get("n")?)) })
        .collect::<Result<BTreeMap<_, _>>>()?;

        let top_companies = sqlx::query(
            r#"
            SELECT company_name, COUNT(*) AS n FROM applications
            GROUP BY company_name ORDER BY n DESC, company_name ASC LIMIT $1
            "#,
        )
        .bind(TOP_COMPANIES)
        .fetch_all(&pool)
        .await?
        .iter()
        .map(|r| -> Result<CompanyCount> {
            Ok(CompanyCount {
                company_name: r.try_get("company_name")?,
                count: r.try_get("n")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let row = sqlx::query(
            r#"
            SELECT MIN(salary_min) AS min_salary,
                   MAX(salary_max) AS max_salary,
                   AVG(CASE WHEN salary_min IS NOT NULL AND salary_max IS NOT NULL
                            THEN (salary_min::NUMERIC + salary_max) / 2
                            ELSE COALESCE(salary_min, salary_max)::NUMERIC END)::FLOAT8 AS avg_salary
            FROM applications
            "#,
        )
        .fetch_one(&pool)
        .await?;
        let salary_range = SalaryRange {
            min: row.try_get("min_salary")?,
            max: row.try_get("max_salary")?,
            avg: row.try_get::<Option<f64>, _>("avg_salary")?.map(round2),
        };

        Ok(Statistics {
            total_count: total,
            count_by_status,
            count_by_month,
            success_rate: success_rate(success_count, total),
            active_count,
            top_companies,
            salary_range,
        })
    }

    async fn entity_counts(&self) -> Result<EntityCounts> {
        let pool = self.pool().await?;
        let row = sqlx::query(
            r#"
            SELECT (SELECT COUNT(*) FROM applications) AS applications,
                   (SELECT COUNT(*) FROM followups) AS followups,
                   (SELECT COUNT(*) FROM interviews) AS interviews
            "#,
        )
        .fetch_one(&pool)
        .await?;
        Ok(EntityCounts {
            applications: row.try_get("applications")?,
            followups: row.try_get("followups")?,
            interviews: row.try_get("interviews")?,
        })
    }
}
