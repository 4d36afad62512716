//! Storage contract shared by every backend.
//!
//! Callers hold a `Box<dyn StorageAdapter>` from [`create_adapter`] and never
//! branch on which engine sits behind it.

pub mod embedded;
pub mod networked;
pub mod query;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::StorageConfig;
use crate::error::Result;
use crate::models::{
    Application, ApplicationPatch, ApplicationStatus, Followup, Interview, InterviewPatch,
    JobType, NewApplication, NewFollowup, NewInterview, Priority, RemoteType,
};

pub use embedded::EmbeddedAdapter;
pub use networked::NetworkedAdapter;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Embedded,
    Networked,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Embedded => "embedded",
            StorageKind::Networked => "networked",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application filter. Empty lists and `None` mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationFilter {
    #[serde(default)]
    pub statuses: Vec<ApplicationStatus>,
    /// Case-insensitive substring of company_name.
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_types: Vec<JobType>,
    #[serde(default)]
    pub remote_types: Vec<RemoteType>,
    #[serde(default)]
    pub priorities: Vec<Priority>,
    /// Lower bound on the application's salary_min.
    #[serde(default)]
    pub salary_min: Option<i64>,
    /// Upper bound on the application's salary_max.
    #[serde(default)]
    pub salary_max: Option<i64>,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    /// Free text matched against company, title, notes and description.
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    ApplicationDate,
    Deadline,
    CompanyName,
    JobTitle,
    Status,
    Priority,
    SalaryMin,
    SalaryMax,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::ApplicationDate => "application_date",
            SortField::Deadline => "deadline",
            SortField::CompanyName => "company_name",
            SortField::JobTitle => "job_title",
            SortField::Status => "status",
            SortField::Priority => "priority",
            SortField::SalaryMin => "salary_min",
            SortField::SalaryMax => "salary_max",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let field = match s {
            "created_at" => SortField::CreatedAt,
            "updated_at" => SortField::UpdatedAt,
            "application_date" => SortField::ApplicationDate,
            "deadline" => SortField::Deadline,
            "company_name" | "company" => SortField::CompanyName,
            "job_title" | "title" => SortField::JobTitle,
            "status" => SortField::Status,
            "priority" => SortField::Priority,
            "salary_min" => SortField::SalaryMin,
            "salary_max" => SortField::SalaryMax,
            _ => return Err(format!("unknown sort field '{s}'")),
        };
        Ok(field)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

impl SortDir {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

impl FromStr for SortDir {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDir::Asc),
            "desc" => Ok(SortDir::Desc),
            _ => Err(format!("unknown sort direction '{s}'")),
        }
    }
}

/// Arguments of `list_applications`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub filter: ApplicationFilter,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
    #[serde(default)]
    pub sort_field: SortField,
    #[serde(default)]
    pub sort_dir: SortDir,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filter: ApplicationFilter::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_field: SortField::default(),
            sort_dir: SortDir::default(),
        }
    }
}

impl ListQuery {
    pub fn filtered(filter: ApplicationFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Page and page size clamped into their valid ranges.
    pub fn bounds(&self) -> (u32, u32) {
        (self.page.max(1), self.page_size.clamp(1, MAX_PAGE_SIZE))
    }

    /// (limit, offset) for the clamped page.
    pub fn limit_offset(&self) -> (i64, i64) {
        let (page, size) = self.bounds();
        (i64::from(size), i64::from(page - 1) * i64::from(size))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_count: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, query: &ListQuery) -> Self {
        let (page, size) = query.bounds();
        let total_u = u64::try_from(total).unwrap_or(0);
        let page_count = u32::try_from(total_u.div_ceil(u64::from(size))).unwrap_or(u32::MAX);
        Self {
            items,
            total,
            page,
            page_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyCount {
    pub company_name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub avg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_count: i64,
    pub count_by_status: BTreeMap<String, i64>,
    /// Keyed by `YYYY-MM` of application_date, falling back to created_at.
    pub count_by_month: BTreeMap<String, i64>,
    pub success_rate: f64,
    pub active_count: i64,
    pub top_companies: Vec<CompanyCount>,
    pub salary_range: SalaryRange,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub applications: i64,
    pub followups: i64,
    pub interviews: i64,
}

pub const TOP_COMPANIES: i64 = 5;

/// Percentage of successful applications, rounded to one decimal.
pub fn success_rate(successes: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (successes as f64 / total as f64 * 1000.0).round() / 10.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Statuses counted as active, as text for SQL membership tests.
pub fn active_statuses() -> impl Iterator<Item = &'static str> {
    ApplicationStatus::ALL
        .iter()
        .filter(|s| s.is_active())
        .map(|s| s.as_str())
}

pub fn success_statuses() -> impl Iterator<Item = &'static str> {
    ApplicationStatus::ALL
        .iter()
        .filter(|s| s.is_success())
        .map(|s| s.as_str())
}

/// Current time at the microsecond precision both engines store.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Next `updated_at` for a row last touched at `previous`: strictly later,
/// even if the clock has not advanced.
pub fn next_updated_at(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_micros();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

/// Creation and last-modification times written with a new row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Timestamps {
    pub fn now() -> Self {
        let now = now_micros();
        Self {
            created_at: now,
            updated_at: now,
        }
    }

    /// Carries existing times over at stored precision. `updated_at` is
    /// never earlier than `created_at`.
    pub fn preserved(created_at: DateTime<Utc>, updated_at: Option<DateTime<Utc>>) -> Self {
        let created_at = created_at.trunc_subsecs(6);
        let updated_at = updated_at
            .map(|ts| ts.trunc_subsecs(6))
            .filter(|ts| *ts >= created_at)
            .unwrap_or(created_at);
        Self {
            created_at,
            updated_at,
        }
    }
}

/// The capability contract every backend implements.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Idempotent.
    async fn connect(&self) -> Result<()>;

    /// Idempotent. Releases pools and handles.
    async fn disconnect(&self) -> Result<()>;

    /// Creates missing tables and indices. Never drops data.
    async fn create_schema(&self) -> Result<()>;

    /// Returns the new id. A taken `job_url` yields `StorageError::Duplicate`.
    async fn create_application(&self, new: &NewApplication) -> Result<i64> {
        self.insert_application(new, Timestamps::now()).await
    }

    /// Like `create_application`, with caller-supplied timestamps.
    async fn insert_application(&self, new: &NewApplication, stamps: Timestamps) -> Result<i64>;

    async fn get_application(&self, id: i64) -> Result<Option<Application>>;

    async fn list_applications(&self, query: &ListQuery) -> Result<Page<Application>>;

    /// `Ok(false)` when no application has this id.
    async fn update_application(&self, id: i64, patch: &ApplicationPatch) -> Result<bool>;

    /// Deletes the application and its followups and interviews.
    async fn delete_application(&self, id: i64) -> Result<bool>;

    async fn create_followup(&self, new: &NewFollowup) -> Result<i64> {
        self.insert_followup(new, Timestamps::now()).await
    }

    async fn insert_followup(&self, new: &NewFollowup, stamps: Timestamps) -> Result<i64>;

    async fn get_followup(&self, id: i64) -> Result<Option<Followup>>;

    /// Followups of one application, oldest interaction first.
    async fn list_followups(&self, application_id: i64) -> Result<Vec<Followup>>;

    async fn delete_followup(&self, id: i64) -> Result<bool>;

    async fn create_interview(&self, new: &NewInterview) -> Result<i64> {
        self.insert_interview(new, Timestamps::now()).await
    }

    async fn insert_interview(&self, new: &NewInterview, stamps: Timestamps) -> Result<i64>;

    async fn get_interview(&self, id: i64) -> Result<Option<Interview>>;

    /// Interviews of one application ordered by round, then date.
    async fn list_interviews(&self, application_id: i64) -> Result<Vec<Interview>>;

    async fn update_interview(&self, id: i64, patch: &InterviewPatch) -> Result<bool>;

    async fn delete_interview(&self, id: i64) -> Result<bool>;

    async fn get_statistics(&self) -> Result<Statistics>;

    async fn entity_counts(&self) -> Result<EntityCounts>;
}

/// Builds the adapter selected by `config`. Nothing is opened yet; call
/// `connect()` on the result.
pub fn create_adapter(config: &StorageConfig) -> Box<dyn StorageAdapter> {
    match config {
        StorageConfig::Embedded { path } => Box::new(EmbeddedAdapter::new(path.clone())),
        StorageConfig::Networked(settings) => Box::new(NetworkedAdapter::new(settings.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_rounding() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(1, 3), 33.3);
        assert_eq!(success_rate(2, 3), 66.7);
        assert_eq!(success_rate(3, 3), 100.0);
    }

    #[test]
    fn test_active_statuses_include_offer() {
        let active: Vec<&str> = active_statuses().collect();
        assert!(active.contains(&"offer"));
        assert!(active.contains(&"applied"));
        assert!(!active.contains(&"accepted"));
        assert!(!active.contains(&"rejected"));
        assert!(!active.contains(&"withdrawn"));
        assert_eq!(active.len(), 7);
    }

    #[test]
    fn test_query_bounds_are_clamped() {
        let query = ListQuery {
            page: 0,
            page_size: 1_000,
            ..ListQuery::default()
        };
        assert_eq!(query.bounds(), (1, MAX_PAGE_SIZE));
        assert_eq!(query.limit_offset(), (100, 0));

        let query = ListQuery {
            page: 3,
            page_size: 10,
            ..ListQuery::default()
        };
        assert_eq!(query.limit_offset(), (10, 20));
    }

    #[test]
    fn test_page_count() {
        let query = ListQuery {
            page_size: 10,
            ..ListQuery::default()
        };
        assert_eq!(Page::<()>::new(vec![], 0, &query).page_count, 0);
        assert_eq!(Page::<()>::new(vec![], 10, &query).page_count, 1);
        assert_eq!(Page::<()>::new(vec![], 11, &query).page_count, 2);
    }

    #[test]
    fn test_next_updated_at_strictly_increases() {
        let future = Utc::now() + Duration::seconds(60);
        let next = next_updated_at(future);
        assert!(next > future);
        assert_eq!(next - future, Duration::microseconds(1));
    }

    #[test]
    fn test_preserved_timestamps_never_run_backwards() {
        let created = Utc::now() - Duration::days(30);
        let stamps = Timestamps::preserved(created, Some(created - Duration::days(1)));
        assert_eq!(stamps.updated_at, stamps.created_at);

        let later = created + Duration::days(2);
        let stamps = Timestamps::preserved(created, Some(later));
        assert_eq!(stamps.updated_at, later.trunc_subsecs(6));
        assert_eq!(stamps.created_at, created.trunc_subsecs(6));

        assert_eq!(Timestamps::preserved(created, None).updated_at, stamps.created_at);
    }

    #[test]
    fn test_sort_field_parsing() {
        assert_eq!("company".parse::<SortField>().unwrap(), SortField::CompanyName);
        assert_eq!("DESC".parse::<SortDir>().unwrap(), SortDir::Desc);
        assert!("password".parse::<SortField>().is_err());
    }
}
