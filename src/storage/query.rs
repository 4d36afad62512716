//! SQL fragments shared by both adapters.
//!
//! Filter, sort and patch composition lives here once so the embedded and
//! networked backends cannot drift apart; the only difference between them
//! is the placeholder style.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use super::{ApplicationFilter, SortDir, SortField};
use crate::models::{ApplicationPatch, ApplicationStatus, InterviewPatch, Priority};

/// Placeholder syntax of the target engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// SQLite `?1`, `?2`, ...
    Numbered,
    /// PostgreSQL `$1`, `$2`, ...
    Dollar,
}

/// A typed bind parameter. Nulls keep their type so PostgreSQL can infer
/// the parameter's column type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Int(Option<i64>),
    Date(Option<NaiveDate>),
    Time(Option<NaiveTime>),
    Timestamp(Option<DateTime<Utc>>),
}

impl SqlValue {
    pub fn text(s: impl Into<String>) -> Self {
        SqlValue::Text(Some(s.into()))
    }
}

/// Accumulates bind parameters and hands out their placeholders.
#[derive(Debug)]
pub struct SqlParams {
    style: Placeholder,
    values: Vec<SqlValue>,
}

impl SqlParams {
    pub fn new(style: Placeholder) -> Self {
        Self {
            style,
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        let n = self.values.len();
        match self.style {
            Placeholder::Numbered => format!("?{n}"),
            Placeholder::Dollar => format!("${n}"),
        }
    }

    /// `column IN (p1, p2, ...)`
    pub fn membership(&mut self, column: &str, values: impl IntoIterator<Item = SqlValue>) -> String {
        let placeholders: Vec<String> = values.into_iter().map(|v| self.push(v)).collect();
        format!("{column} IN ({})", placeholders.join(", "))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

/// Escapes LIKE wildcards and wraps the lowercased needle in `%...%`.
pub fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn contains(column: &str, placeholder: &str) -> String {
    format!("LOWER({column}) LIKE {placeholder} ESCAPE '\\'")
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Builds ` WHERE ...` (or an empty string) for an application filter,
/// pushing its parameters onto `params`.
pub fn where_clause(filter: &ApplicationFilter, params: &mut SqlParams) -> String {
    let mut conditions: Vec<String> = Vec::new();

    if !filter.statuses.is_empty() {
        conditions.push(params.membership(
            "status",
            filter.statuses.iter().map(|s| SqlValue::text(s.as_str())),
        ));
    }

    if let Some(company) = non_blank(&filter.company) {
        let p = params.push(SqlValue::text(like_pattern(company)));
        conditions.push(contains("company_name", &p));
    }

    if !filter.job_types.is_empty() {
        conditions.push(params.membership(
            "job_type",
            filter.job_types.iter().map(|t| SqlValue::text(t.as_str())),
        ));
    }

    if !filter.remote_types.is_empty() {
        conditions.push(params.membership(
            "remote_type",
            filter.remote_types.iter().map(|t| SqlValue::text(t.as_str())),
        ));
    }

    if !filter.priorities.is_empty() {
        conditions.push(params.membership(
            "priority",
            filter.priorities.iter().map(|p| SqlValue::text(p.as_str())),
        ));
    }

    if let Some(bound) = filter.salary_min {
        let p = params.push(SqlValue::Int(Some(bound)));
        conditions.push(format!("salary_min >= {p}"));
    }

    if let Some(bound) = filter.salary_max {
        let p = params.push(SqlValue::Int(Some(bound)));
        conditions.push(format!("salary_max <= {p}"));
    }

    if let Some(from) = filter.date_from {
        let p = params.push(SqlValue::Date(Some(from)));
        conditions.push(format!("application_date >= {p}"));
    }

    if let Some(to) = filter.date_to {
        let p = params.push(SqlValue::Date(Some(to)));
        conditions.push(format!("application_date <= {p}"));
    }

    if let Some(search) = non_blank(&filter.search) {
        let p = params.push(SqlValue::text(like_pattern(search)));
        let any = ["company_name", "job_title", "notes", "description"]
            .iter()
            .map(|column| contains(column, &p))
            .collect::<Vec<_>>()
            .join(" OR ");
        conditions.push(format!("({any})"));
    }

    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

/// `CASE column WHEN 'a' THEN 0 ... END` in declaration order.
fn rank_expr(column: &str, values: &[&str]) -> String {
    let arms: String = values
        .iter()
        .enumerate()
        .map(|(i, v)| format!(" WHEN '{v}' THEN {i}"))
        .collect();
    format!("CASE {column}{arms} END")
}

fn sort_expr(field: SortField) -> String {
    match field {
        SortField::Status => {
            let names: Vec<&str> = ApplicationStatus::ALL.iter().map(|s| s.as_str()).collect();
            rank_expr("status", &names)
        }
        SortField::Priority => {
            let names: Vec<&str> = Priority::ALL.iter().map(|p| p.as_str()).collect();
            rank_expr("priority", &names)
        }
        other => other.column().to_string(),
    }
}

/// ` ORDER BY ...` with NULLs last and id as tie-breaker.
pub fn order_by(field: SortField, dir: SortDir) -> String {
    let dir = dir.keyword();
    format!(" ORDER BY {} {dir} NULLS LAST, id {dir}", sort_expr(field))
}

fn opt_text(v: &Option<String>) -> SqlValue {
    SqlValue::Text(v.clone())
}

/// Column assignments for the fields present in a patch. The patch struct
/// is the allow-list: no other column can ever be written.
pub fn application_assignments(patch: &ApplicationPatch) -> Vec<(&'static str, SqlValue)> {
    let mut out = Vec::new();
    if let Some(v) = &patch.company_name {
        out.push(("company_name", SqlValue::text(v.as_str())));
    }
    if let Some(v) = &patch.job_title {
        out.push(("job_title", SqlValue::text(v.as_str())));
    }
    if let Some(v) = &patch.job_url {
        out.push(("job_url", opt_text(v)));
    }
    if let Some(v) = &patch.description {
        out.push(("description", opt_text(v)));
    }
    if let Some(v) = &patch.location {
        out.push(("location", opt_text(v)));
    }
    if let Some(v) = patch.salary_min {
        out.push(("salary_min", SqlValue::Int(v)));
    }
    if let Some(v) = patch.salary_max {
        out.push(("salary_max", SqlValue::Int(v)));
    }
    if let Some(v) = &patch.currency {
        out.push(("currency", SqlValue::text(v.as_str())));
    }
    if let Some(v) = patch.job_type {
        out.push(("job_type", SqlValue::Text(v.map(|t| t.as_str().to_string()))));
    }
    if let Some(v) = patch.remote_type {
        out.push(("remote_type", SqlValue::Text(v.map(|t| t.as_str().to_string()))));
    }
    if let Some(v) = patch.application_date {
        out.push(("application_date", SqlValue::Date(v)));
    }
    if let Some(v) = patch.deadline {
        out.push(("deadline", SqlValue::Date(v)));
    }
    if let Some(v) = patch.status {
        out.push(("status", SqlValue::text(v.as_str())));
    }
    if let Some(v) = patch.priority {
        out.push(("priority", SqlValue::text(v.as_str())));
    }
    if let Some(v) = &patch.notes {
        out.push(("notes", opt_text(v)));
    }
    if let Some(v) = &patch.referral_source {
        out.push(("referral_source", opt_text(v)));
    }
    if let Some(v) = &patch.contact_name {
        out.push(("contact_name", opt_text(v)));
    }
    if let Some(v) = &patch.contact_email {
        out.push(("contact_email", opt_text(v)));
    }
    out
}

pub fn interview_assignments(patch: &InterviewPatch) -> Vec<(&'static str, SqlValue)> {
    let mut out = Vec::new();
    if let Some(v) = patch.status {
        out.push(("status", SqlValue::text(v.as_str())));
    }
    if let Some(v) = patch.interview_date {
        out.push(("interview_date", SqlValue::Date(Some(v))));
    }
    if let Some(v) = patch.interview_time {
        out.push(("interview_time", SqlValue::Time(v)));
    }
    if let Some(v) = &patch.outcome {
        out.push(("outcome", opt_text(v)));
    }
    if let Some(v) = &patch.feedback {
        out.push(("feedback", opt_text(v)));
    }
    out
}

/// Builds `UPDATE table SET a = p1, ..., updated_at = <expr> WHERE id = pN`.
/// `updated_at` is bound as the last-but-one parameter.
pub fn update_statement(
    table: &str,
    assignments: Vec<(&'static str, SqlValue)>,
    updated_at: DateTime<Utc>,
    id: i64,
    style: Placeholder,
) -> (String, Vec<SqlValue>) {
    let mut params = SqlParams::new(style);
    let mut sets: Vec<String> = assignments
        .into_iter()
        .map(|(column, value)| format!("{column} = {}", params.push(value)))
        .collect();
    sets.push(format!(
        "updated_at = {}",
        params.push(SqlValue::Timestamp(Some(updated_at)))
    ));
    let id_p = params.push(SqlValue::Int(Some(id)));
    (
        format!("UPDATE {table} SET {} WHERE id = {id_p}", sets.join(", ")),
        params.into_values(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobType, RemoteType};

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("Acme"), "%acme%");
        assert_eq!(like_pattern("100%_off\\"), "%100\\%\\_off\\\\%");
    }

    #[test]
    fn test_empty_filter_has_no_where() {
        let mut params = SqlParams::new(Placeholder::Numbered);
        assert_eq!(where_clause(&ApplicationFilter::default(), &mut params), "");
        assert!(params.is_empty());
    }

    #[test]
    fn test_filter_numbered_placeholders() {
        let filter = ApplicationFilter {
            statuses: vec![ApplicationStatus::Applied, ApplicationStatus::Offer],
            company: Some("acme".to_string()),
            salary_min: Some(50_000),
            ..ApplicationFilter::default()
        };
        let mut params = SqlParams::new(Placeholder::Numbered);
        let sql = where_clause(&filter, &mut params);
        assert_eq!(
            sql,
            " WHERE status IN (?1, ?2) AND LOWER(company_name) LIKE ?3 ESCAPE '\\' AND salary_min >= ?4"
        );
        assert_eq!(params.len(), 4);
        assert_eq!(params.values()[2], SqlValue::text("%acme%"));
    }

    #[test]
    fn test_filter_dollar_placeholders_and_search() {
        let filter = ApplicationFilter {
            job_types: vec![JobType::Contract],
            remote_types: vec![RemoteType::Remote, RemoteType::Hybrid],
            search: Some("Rust".to_string()),
            ..ApplicationFilter::default()
        };
        let mut params = SqlParams::new(Placeholder::Dollar);
        let sql = where_clause(&filter, &mut params);
        assert!(sql.contains("job_type IN ($1)"));
        assert!(sql.contains("remote_type IN ($2, $3)"));
        assert_eq!(sql.matches("LIKE $4").count(), 4);
        assert!(sql.contains("LOWER(description) LIKE $4"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_blank_text_filters_are_ignored() {
        let filter = ApplicationFilter {
            company: Some("   ".to_string()),
            search: Some(String::new()),
            ..ApplicationFilter::default()
        };
        let mut params = SqlParams::new(Placeholder::Dollar);
        assert_eq!(where_clause(&filter, &mut params), "");
    }

    #[test]
    fn test_order_by_ranks_enums() {
        let sql = order_by(SortField::Priority, SortDir::Desc);
        assert_eq!(
            sql,
            " ORDER BY CASE priority WHEN 'low' THEN 0 WHEN 'medium' THEN 1 WHEN 'high' THEN 2 END DESC NULLS LAST, id DESC"
        );
        let sql = order_by(SortField::CompanyName, SortDir::Asc);
        assert_eq!(sql, " ORDER BY company_name ASC NULLS LAST, id ASC");
    }

    #[test]
    fn test_assignments_only_cover_supplied_fields() {
        let patch = ApplicationPatch {
            status: Some(ApplicationStatus::Rejected),
            notes: Some(None),
            ..ApplicationPatch::default()
        };
        let sets = application_assignments(&patch);
        let columns: Vec<&str> = sets.iter().map(|(c, _)| *c).collect();
        assert_eq!(columns, vec!["status", "notes"]);
        assert_eq!(sets[1].1, SqlValue::Text(None));
    }

    #[test]
    fn test_update_statement_layout() {
        let now = Utc::now();
        let (sql, values) = update_statement(
            "applications",
            vec![("status", SqlValue::text("offer"))],
            now,
            7,
            Placeholder::Dollar,
        );
        assert_eq!(
            sql,
            "UPDATE applications SET status = $1, updated_at = $2 WHERE id = $3"
        );
        assert_eq!(values.len(), 3);
        assert_eq!(values[2], SqlValue::Int(Some(7)));
    }
}
