//! Coercion of raw source rows into typed payloads.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::str::FromStr;
use thiserror::Error;

use crate::models::{
    InteractionType, NewApplication, NewFollowup, NewInterview, ParseEnumError, DEFAULT_CURRENCY,
};
use crate::storage::embedded::RawRow;
use crate::storage::Timestamps;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("missing required column '{0}'")]
    Missing(&'static str),

    #[error("column '{column}' has unparsable value '{value}' (expected {expected})")]
    Invalid {
        column: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Enum(#[from] ParseEnumError),

    /// The row is dropped and reported rather than coerced to a catch-all.
    #[error("unknown interaction type '{0}'")]
    UnknownInteraction(String),
}

type Result<T> = std::result::Result<T, TransformError>;

/// Source primary key, if the row carries a readable one.
pub fn source_id(row: &RawRow) -> Option<i64> {
    row.get("id").and_then(|v| v.trim().parse().ok())
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| value.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

/// RFC 3339, or a naive `YYYY-MM-DD[ T]HH:MM:SS[.f]` taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| parse_date(value).and_then(|d| d.and_hms_opt(0, 0, 0)))
        .map(|naive| naive.and_utc())
}

pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" => Some(true),
        "0" | "false" | "f" | "no" => Some(false),
        _ => None,
    }
}

fn text(row: &RawRow, column: &str) -> Option<String> {
    row.get(column)
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

fn required(row: &RawRow, column: &'static str) -> Result<String> {
    text(row, column).ok_or(TransformError::Missing(column))
}

fn convert<T>(
    row: &RawRow,
    column: &'static str,
    expected: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>> {
    match row.get(column).filter(|v| !v.trim().is_empty()) {
        None => Ok(None),
        Some(raw) => parse(raw).map(Some).ok_or_else(|| TransformError::Invalid {
            column,
            value: raw.to_string(),
            expected,
        }),
    }
}

fn int<T: FromStr>(row: &RawRow, column: &'static str) -> Result<Option<T>> {
    convert(row, column, "an integer", |v| v.trim().parse().ok())
}

fn enum_value<T>(row: &RawRow, column: &'static str) -> Result<Option<T>>
where
    T: FromStr<Err = ParseEnumError>,
{
    text(row, column).map(|v| v.parse::<T>()).transpose().map_err(Into::into)
}

fn parent_id(row: &RawRow) -> Result<i64> {
    int(row, "application_id")?.ok_or(TransformError::Missing("application_id"))
}

pub fn application(row: &RawRow) -> Result<NewApplication> {
    let mut new = NewApplication::new(
        required(row, "company_name")?,
        required(row, "job_title")?,
    );
    new.job_url = text(row, "job_url");
    new.description = text(row, "description");
    new.location = text(row, "location");
    new.salary_min = int(row, "salary_min")?;
    new.salary_max = int(row, "salary_max")?;
    new.currency = text(row, "currency").unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    new.job_type = enum_value(row, "job_type")?;
    new.remote_type = enum_value(row, "remote_type")?;
    new.application_date = convert(row, "application_date", "a date", parse_date)?;
    new.deadline = convert(row, "deadline", "a date", parse_date)?;
    if let Some(status) = enum_value(row, "status")? {
        new.status = status;
    }
    if let Some(priority) = enum_value(row, "priority")? {
        new.priority = priority;
    }
    new.notes = text(row, "notes");
    new.referral_source = text(row, "referral_source");
    new.contact_name = text(row, "contact_name");
    new.contact_email = text(row, "contact_email");
    Ok(new)
}

/// Source `created_at`/`updated_at`. A row without `created_at` is stamped
/// with the current time.
pub fn timestamps(row: &RawRow) -> Result<Timestamps> {
    let updated_at = convert(row, "updated_at", "a timestamp", parse_timestamp)?;
    Ok(match convert(row, "created_at", "a timestamp", parse_timestamp)? {
        Some(created_at) => Timestamps::preserved(created_at, updated_at),
        None => Timestamps::now(),
    })
}

/// `application_id` still holds the source parent id.
pub fn followup(row: &RawRow) -> Result<NewFollowup> {
    let raw_type = required(row, "interaction_type")?;
    let interaction_type = raw_type
        .parse::<InteractionType>()
        .map_err(|_| TransformError::UnknownInteraction(raw_type))?;
    let interaction_date = convert(row, "interaction_date", "a timestamp", parse_timestamp)?
        .ok_or(TransformError::Missing("interaction_date"))?;

    let mut new = NewFollowup::new(
        parent_id(row)?,
        interaction_type,
        required(row, "title")?,
        interaction_date,
    );
    new.description = text(row, "description");
    new.old_status = enum_value(row, "old_status")?;
    new.new_status = enum_value(row, "new_status")?;
    new.outcome = text(row, "outcome");
    new.follow_up_needed = convert(row, "follow_up_needed", "a boolean", parse_bool)?.unwrap_or(false);
    new.follow_up_date = convert(row, "follow_up_date", "a date", parse_date)?;
    Ok(new)
}

/// `application_id` still holds the source parent id.
pub fn interview(row: &RawRow) -> Result<NewInterview> {
    let interview_date = convert(row, "interview_date", "a date", parse_date)?
        .ok_or(TransformError::Missing("interview_date"))?;
    let mut new = NewInterview::new(
        parent_id(row)?,
        required(row, "interview_type")?,
        required(row, "title")?,
        interview_date,
    );
    new.description = text(row, "description");
    new.interview_time = convert(row, "interview_time", "a time", parse_time)?;
    new.duration_minutes = int(row, "duration_minutes")?;
    new.location = text(row, "location");
    new.is_virtual = convert(row, "is_virtual", "a boolean", parse_bool)?.unwrap_or(false);
    new.meeting_link = text(row, "meeting_link");
    new.interviewer_names = text(row, "interviewer_names");
    new.interviewer_roles = text(row, "interviewer_roles");
    if let Some(round) = int(row, "round_number")? {
        new.round_number = round;
    }
    new.total_rounds = int(row, "total_rounds")?;
    new.outcome = text(row, "outcome");
    new.feedback = text(row, "feedback");
    if let Some(status) = enum_value(row, "status")? {
        new.status = status;
    }
    Ok(new)
}
