use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;

use super::MigrationPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    Migrate,
    ValidateOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Application,
    Followup,
    Interview,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Application => "application",
            Entity::Followup => "followup",
            Entity::Interview => "interview",
        })
    }
}

/// Row tallies for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub total: usize,
    pub migrated: usize,
    pub failed: usize,
    /// Rows dropped on purpose, e.g. an interaction type outside the known set.
    pub skipped: usize,
}

impl EntityReport {
    /// Rows the destination should hold once the run completes.
    pub fn expected(&self) -> usize {
        self.total.saturating_sub(self.failed + self.skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    pub entity: Entity,
    pub source_id: Option<i64>,
    pub cause: String,
}

/// Audit record of one migration run. Serialized as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub mode: MigrationMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
    /// Last phase entered.
    pub phase: MigrationPhase,
    pub applications: EntityReport,
    pub followups: EntityReport,
    pub interviews: EntityReport,
    pub checks: Vec<CheckResult>,
    pub errors: Vec<RowError>,
    pub fatal_error: Option<String>,
}

impl MigrationReport {
    pub fn new(mode: MigrationMode) -> Self {
        Self {
            mode,
            started_at: Utc::now(),
            finished_at: None,
            elapsed_secs: 0.0,
            phase: MigrationPhase::Init,
            applications: EntityReport::default(),
            followups: EntityReport::default(),
            interviews: EntityReport::default(),
            checks: Vec::new(),
            errors: Vec::new(),
            fatal_error: None,
        }
    }

    pub fn entity(&self, entity: Entity) -> &EntityReport {
        match entity {
            Entity::Application => &self.applications,
            Entity::Followup => &self.followups,
            Entity::Interview => &self.interviews,
        }
    }

    pub fn entity_mut(&mut self, entity: Entity) -> &mut EntityReport {
        match entity {
            Entity::Application => &mut self.applications,
            Entity::Followup => &mut self.followups,
            Entity::Interview => &mut self.interviews,
        }
    }

    pub fn record_failure(&mut self, entity: Entity, source_id: Option<i64>, cause: impl Into<String>) {
        self.entity_mut(entity).failed += 1;
        self.errors.push(RowError {
            entity,
            source_id,
            cause: cause.into(),
        });
    }

    pub fn record_skip(&mut self, entity: Entity, source_id: Option<i64>, cause: impl Into<String>) {
        self.entity_mut(entity).skipped += 1;
        self.errors.push(RowError {
            entity,
            source_id,
            cause: cause.into(),
        });
    }

    pub fn finish(&mut self) {
        let now = Utc::now();
        self.elapsed_secs = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.finished_at = Some(now);
    }

    pub fn failed_rows(&self) -> usize {
        self.applications.failed + self.followups.failed + self.interviews.failed
    }

    pub fn checks_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// 0 when no row failed, 2 when at least one did, 1 when the run aborted.
    /// Check outcomes are reported but do not change the code.
    pub fn exit_code(&self) -> u8 {
        if self.fatal_error.is_some() {
            1
        } else if self.failed_rows() > 0 {
            2
        } else {
            0
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize migration report")
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write report to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let mut report = MigrationReport::new(MigrationMode::Migrate);
        assert_eq!(report.exit_code(), 0);

        report.record_skip(Entity::Followup, Some(4), "unknown interaction type");
        assert_eq!(report.exit_code(), 0);

        report.record_failure(Entity::Application, Some(3), "invalid status");
        assert_eq!(report.exit_code(), 2);

        report.fatal_error = Some("connection refused".to_string());
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_failed_check_alone_keeps_exit_zero() {
        let mut report = MigrationReport::new(MigrationMode::ValidateOnly);
        report.checks.push(CheckResult::pass("count_parity", "ok"));
        report.checks.push(CheckResult::fail("probe", "insert failed"));
        assert!(!report.checks_passed());
        assert_eq!(report.exit_code(), 0);

        report.record_failure(Entity::Interview, Some(9), "parent application not migrated");
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn test_expected_excludes_failed_and_skipped() {
        let tally = EntityReport {
            total: 10,
            migrated: 7,
            failed: 2,
            skipped: 1,
        };
        assert_eq!(tally.expected(), 7);
    }

    #[test]
    fn test_report_json_is_always_writable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");
        let mut report = MigrationReport::new(MigrationMode::Migrate);
        report.fatal_error = Some("boom".to_string());
        report.finish();
        report.write_json(&path).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["mode"], "migrate");
        assert_eq!(parsed["phase"], "init");
        assert_eq!(parsed["fatal_error"], "boom");
        assert_eq!(parsed["applications"]["total"], 0);
    }
}
