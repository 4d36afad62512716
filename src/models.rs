use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{Result, StorageError};

/// Failed to parse a closed-domain enum from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a closed enum stored as lowercase snake_case text.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal {
        $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
    }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ParseEnumError { kind: $kind, value: s.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(
    /// Workflow state of an application.
    #[derive(Default)]
    ApplicationStatus, "status" {
        #[default]
        Applied => "applied",
        Reviewing => "reviewing",
        PhoneScreen => "phone_screen",
        TechnicalInterview => "technical_interview",
        OnsiteInterview => "onsite_interview",
        FinalRound => "final_round",
        Offer => "offer",
        Accepted => "accepted",
        Rejected => "rejected",
        Withdrawn => "withdrawn",
    }
);

impl ApplicationStatus {
    /// Still in flight. An open offer counts as active.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            ApplicationStatus::Accepted | ApplicationStatus::Rejected | ApplicationStatus::Withdrawn
        )
    }

    /// Counted towards the success rate.
    pub fn is_success(&self) -> bool {
        matches!(self, ApplicationStatus::Offer | ApplicationStatus::Accepted)
    }
}

text_enum!(JobType, "job_type" {
    FullTime => "full_time",
    PartTime => "part_time",
    Contract => "contract",
    Internship => "internship",
    Temporary => "temporary",
    Freelance => "freelance",
});

text_enum!(RemoteType, "remote_type" {
    Onsite => "onsite",
    Remote => "remote",
    Hybrid => "hybrid",
});

text_enum!(#[derive(Default)] Priority, "priority" {
    Low => "low",
    #[default]
    Medium => "medium",
    High => "high",
});

text_enum!(InteractionType, "interaction_type" {
    Application => "application",
    Email => "email",
    PhoneCall => "phone_call",
    Interview => "interview",
    FollowUp => "follow_up",
    Networking => "networking",
    Other => "other",
});

text_enum!(#[derive(Default)] InterviewStatus, "interview_status" {
    #[default]
    Scheduled => "scheduled",
    Completed => "completed",
    Cancelled => "cancelled",
    Rescheduled => "rescheduled",
});

pub const DEFAULT_CURRENCY: &str = "USD";

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_round() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub company_name: String,
    pub job_title: String,
    pub job_url: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub currency: String,
    pub job_type: Option<JobType>,
    pub remote_type: Option<RemoteType>,
    pub application_date: Option<NaiveDate>,
    pub deadline: Option<NaiveDate>,
    pub status: ApplicationStatus,
    pub priority: Priority,
    pub notes: Option<String>,
    pub referral_source: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// The user-supplied fields, without id and timestamps.
    pub fn to_new(&self) -> NewApplication {
        NewApplication {
            company_name: self.company_name.clone(),
            job_title: self.job_title.clone(),
            job_url: self.job_url.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
            salary_min: self.salary_min,
            salary_max: self.salary_max,
            currency: self.currency.clone(),
            job_type: self.job_type,
            remote_type: self.remote_type,
            application_date: self.application_date,
            deadline: self.deadline,
            status: self.status,
            priority: self.priority,
            notes: self.notes.clone(),
            referral_source: self.referral_source.clone(),
            contact_name: self.contact_name.clone(),
            contact_email: self.contact_email.clone(),
        }
    }
}

/// Payload for creating an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewApplication {
    pub company_name: String,
    pub job_title: String,
    #[serde(default)]
    pub job_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub salary_min: Option<i64>,
    #[serde(default)]
    pub salary_max: Option<i64>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub job_type: Option<JobType>,
    #[serde(default)]
    pub remote_type: Option<RemoteType>,
    #[serde(default)]
    pub application_date: Option<NaiveDate>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub status: ApplicationStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub referral_source: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
}

static CURRENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").expect("static regex"));
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"));

impl NewApplication {
    pub fn new(company_name: impl Into<String>, job_title: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            job_title: job_title.into(),
            job_url: None,
            description: None,
            location: None,
            salary_min: None,
            salary_max: None,
            currency: default_currency(),
            job_type: None,
            remote_type: None,
            application_date: None,
            deadline: None,
            status: ApplicationStatus::default(),
            priority: Priority::default(),
            notes: None,
            referral_source: None,
            contact_name: None,
            contact_email: None,
        }
    }

    /// Boundary checks shared by create and update on every backend.
    pub fn validate(&self) -> Result<()> {
        if self.company_name.trim().is_empty() {
            return Err(StorageError::validation("company_name must not be blank"));
        }
        if self.job_title.trim().is_empty() {
            return Err(StorageError::validation("job_title must not be blank"));
        }
        if let Some(min) = self.salary_min {
            if min < 0 {
                return Err(StorageError::validation("salary_min must not be negative"));
            }
        }
        if let Some(max) = self.salary_max {
            if max < 0 {
                return Err(StorageError::validation("salary_max must not be negative"));
            }
        }
        if let (Some(min), Some(max)) = (self.salary_min, self.salary_max) {
            if max <= min {
                return Err(StorageError::validation(format!(
                    "salary_max ({max}) must be greater than salary_min ({min})"
                )));
            }
        }
        if !CURRENCY_RE.is_match(&self.currency) {
            return Err(StorageError::validation(format!(
                "currency '{}' is not a 3-letter uppercase code",
                self.currency
            )));
        }
        if let (Some(applied), Some(deadline)) = (self.application_date, self.deadline) {
            if deadline < applied {
                return Err(StorageError::validation(format!(
                    "deadline {deadline} is before application_date {applied}"
                )));
            }
        }
        if let Some(email) = &self.contact_email {
            if !EMAIL_RE.is_match(email) {
                return Err(StorageError::validation(format!(
                    "contact_email '{email}' is not a valid address"
                )));
            }
        }
        Ok(())
    }

    /// Names of the fields whose values differ between two payloads.
    pub fn diff_fields(&self, other: &NewApplication) -> Vec<&'static str> {
        let (left, right) = (self, other);
        let mut diffs = Vec::new();
        macro_rules! cmp {
            ($($field:ident),+) => {
                $(if left.$field != right.$field { diffs.push(stringify!($field)); })+
            };
        }
        cmp!(
            company_name,
            job_title,
            job_url,
            description,
            location,
            salary_min,
            salary_max,
            currency,
            job_type,
            remote_type,
            application_date,
            deadline,
            status,
            priority,
            notes,
            referral_source,
            contact_name,
            contact_email
        );
        diffs
    }
}

/// Deserializes a present-but-null field as `Some(None)` so patches can clear values.
fn double_option<'de, T, D>(de: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Partial update. `None` leaves a field untouched; for nullable columns
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationPatch {
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub job_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub location: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub salary_min: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub salary_max: Option<Option<i64>>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub job_type: Option<Option<JobType>>,
    #[serde(default, deserialize_with = "double_option")]
    pub remote_type: Option<Option<RemoteType>>,
    #[serde(default, deserialize_with = "double_option")]
    pub application_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub deadline: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub status: Option<ApplicationStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub referral_source: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub contact_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub contact_email: Option<Option<String>>,
}

impl ApplicationPatch {
    pub fn status(status: ApplicationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the supplied fields onto `target`.
    pub fn apply_to(&self, target: &mut NewApplication) {
        let patch = self;
        macro_rules! set {
            ($($field:ident),+) => {
                $(if let Some(v) = &patch.$field { target.$field = v.clone(); })+
            };
        }
        set!(
            company_name,
            job_title,
            job_url,
            description,
            location,
            salary_min,
            salary_max,
            currency,
            job_type,
            remote_type,
            application_date,
            deadline,
            status,
            priority,
            notes,
            referral_source,
            contact_name,
            contact_email
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Followup {
    pub id: i64,
    pub application_id: i64,
    pub interaction_type: InteractionType,
    pub title: String,
    pub description: Option<String>,
    pub interaction_date: DateTime<Utc>,
    pub old_status: Option<ApplicationStatus>,
    pub new_status: Option<ApplicationStatus>,
    pub outcome: Option<String>,
    pub follow_up_needed: bool,
    pub follow_up_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFollowup {
    pub application_id: i64,
    pub interaction_type: InteractionType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub interaction_date: DateTime<Utc>,
    #[serde(default)]
    pub old_status: Option<ApplicationStatus>,
    #[serde(default)]
    pub new_status: Option<ApplicationStatus>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub follow_up_needed: bool,
    #[serde(default)]
    pub follow_up_date: Option<NaiveDate>,
}

impl NewFollowup {
    pub fn new(
        application_id: i64,
        interaction_type: InteractionType,
        title: impl Into<String>,
        interaction_date: DateTime<Utc>,
    ) -> Self {
        Self {
            application_id,
            interaction_type,
            title: title.into(),
            description: None,
            interaction_date,
            old_status: None,
            new_status: None,
            outcome: None,
            follow_up_needed: false,
            follow_up_date: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(StorageError::validation("followup title must not be blank"));
        }
        if self.follow_up_date.is_some() && !self.follow_up_needed {
            return Err(StorageError::validation(
                "follow_up_date requires follow_up_needed",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interview {
    pub id: i64,
    pub application_id: i64,
    pub interview_type: String,
    pub title: String,
    pub description: Option<String>,
    pub interview_date: NaiveDate,
    pub interview_time: Option<NaiveTime>,
    pub duration_minutes: Option<i32>,
    pub location: Option<String>,
    pub is_virtual: bool,
    pub meeting_link: Option<String>,
    pub interviewer_names: Option<String>,
    pub interviewer_roles: Option<String>,
    pub round_number: i32,
    pub total_rounds: Option<i32>,
    pub outcome: Option<String>,
    pub feedback: Option<String>,
    pub status: InterviewStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInterview {
    pub application_id: i64,
    pub interview_type: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub interview_date: NaiveDate,
    #[serde(default)]
    pub interview_time: Option<NaiveTime>,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub meeting_link: Option<String>,
    #[serde(default)]
    pub interviewer_names: Option<String>,
    #[serde(default)]
    pub interviewer_roles: Option<String>,
    #[serde(default = "default_round")]
    pub round_number: i32,
    #[serde(default)]
    pub total_rounds: Option<i32>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub status: InterviewStatus,
}

impl NewInterview {
    pub fn new(
        application_id: i64,
        interview_type: impl Into<String>,
        title: impl Into<String>,
        interview_date: NaiveDate,
    ) -> Self {
        Self {
            application_id,
            interview_type: interview_type.into(),
            title: title.into(),
            description: None,
            interview_date,
            interview_time: None,
            duration_minutes: None,
            location: None,
            is_virtual: false,
            meeting_link: None,
            interviewer_names: None,
            interviewer_roles: None,
            round_number: default_round(),
            total_rounds: None,
            outcome: None,
            feedback: None,
            status: InterviewStatus::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(StorageError::validation("interview title must not be blank"));
        }
        if self.interview_type.trim().is_empty() {
            return Err(StorageError::validation("interview_type must not be blank"));
        }
        if self.round_number < 1 {
            return Err(StorageError::validation("round_number must be at least 1"));
        }
        if let Some(total) = self.total_rounds {
            if total < self.round_number {
                return Err(StorageError::validation(format!(
                    "total_rounds ({total}) is less than round_number ({})",
                    self.round_number
                )));
            }
        }
        if let Some(minutes) = self.duration_minutes {
            if minutes <= 0 {
                return Err(StorageError::validation("duration_minutes must be positive"));
            }
        }
        Ok(())
    }
}

impl Interview {
    pub fn to_new(&self) -> NewInterview {
        NewInterview {
            application_id: self.application_id,
            interview_type: self.interview_type.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            interview_date: self.interview_date,
            interview_time: self.interview_time,
            duration_minutes: self.duration_minutes,
            location: self.location.clone(),
            is_virtual: self.is_virtual,
            meeting_link: self.meeting_link.clone(),
            interviewer_names: self.interviewer_names.clone(),
            interviewer_roles: self.interviewer_roles.clone(),
            round_number: self.round_number,
            total_rounds: self.total_rounds,
            outcome: self.outcome.clone(),
            feedback: self.feedback.clone(),
            status: self.status,
        }
    }
}

/// Partial update for an interview: outcome tracking after it happens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterviewPatch {
    #[serde(default)]
    pub status: Option<InterviewStatus>,
    #[serde(default)]
    pub interview_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "double_option")]
    pub interview_time: Option<Option<NaiveTime>>,
    #[serde(default, deserialize_with = "double_option")]
    pub outcome: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub feedback: Option<Option<String>>,
}

impl InterviewPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, target: &mut NewInterview) {
        if let Some(status) = self.status {
            target.status = status;
        }
        if let Some(date) = self.interview_date {
            target.interview_date = date;
        }
        if let Some(time) = self.interview_time {
            target.interview_time = time;
        }
        if let Some(outcome) = &self.outcome {
            target.outcome = outcome.clone();
        }
        if let Some(feedback) = &self.feedback {
            target.feedback = feedback.clone();
        }
    }
}
