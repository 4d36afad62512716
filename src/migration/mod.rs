//! One-shot copy of an embedded database into another backend.
//!
//! The run extracts every row from the source file, coerces it, loads
//! applications first while recording old-id to new-id, rewrites child
//! foreign keys through that map and finally checks the destination. Source
//! creation and modification times are carried over. Row
//! failures are recorded and the batch continues.

pub mod report;
pub mod transform;
pub mod validate;

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{error, info, warn};

use crate::error::{Result, StorageError};
use crate::models::{NewApplication, NewFollowup, NewInterview};
use crate::storage::embedded::{RawExtract, RawRow};
use crate::storage::{EmbeddedAdapter, StorageAdapter, Timestamps};
use report::{CheckResult, Entity, MigrationMode, MigrationReport};
use transform::TransformError;

pub const DEFAULT_SAMPLE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Init,
    Extract,
    SchemaCreate,
    MigrateApplications,
    MigrateFollowups,
    MigrateInterviews,
    Validate,
    Done,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPhase::Init => "init",
            MigrationPhase::Extract => "extract",
            MigrationPhase::SchemaCreate => "schema_create",
            MigrationPhase::MigrateApplications => "migrate_applications",
            MigrationPhase::MigrateFollowups => "migrate_followups",
            MigrationPhase::MigrateInterviews => "migrate_interviews",
            MigrationPhase::Validate => "validate",
            MigrationPhase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Skip loading and only check an already populated destination.
    pub validate_only: bool,
    pub sample_size: usize,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            validate_only: false,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

/// A coerced source row together with its source primary key and times.
#[derive(Debug, Clone, PartialEq)]
pub struct Staged<T> {
    pub source_id: Option<i64>,
    pub record: T,
    pub stamps: Timestamps,
}

fn coerce<T>(
    row: &RawRow,
    record: impl Fn(&RawRow) -> std::result::Result<T, TransformError>,
) -> std::result::Result<Staged<T>, TransformError> {
    Ok(Staged {
        source_id: transform::source_id(row),
        record: record(row)?,
        stamps: transform::timestamps(row)?,
    })
}

#[derive(Debug, Default)]
struct StagedRows {
    applications: Vec<Staged<NewApplication>>,
    followups: Vec<Staged<NewFollowup>>,
    interviews: Vec<Staged<NewInterview>>,
}

const ORPHAN_CAUSE: &str = "parent application not migrated";

pub struct MigrationOrchestrator<'a> {
    source: &'a EmbeddedAdapter,
    target: &'a dyn StorageAdapter,
    options: MigrationOptions,
    /// Source application id to destination id, for this run only.
    id_map: HashMap<i64, i64>,
    report: MigrationReport,
}

impl<'a> MigrationOrchestrator<'a> {
    pub fn new(
        source: &'a EmbeddedAdapter,
        target: &'a dyn StorageAdapter,
        options: MigrationOptions,
    ) -> Self {
        let mode = if options.validate_only {
            MigrationMode::ValidateOnly
        } else {
            MigrationMode::Migrate
        };
        Self {
            source,
            target,
            options,
            id_map: HashMap::new(),
            report: MigrationReport::new(mode),
        }
    }

    /// Runs to completion. Never fails: an aborted run is described by
    /// `fatal_error` in the returned report.
    pub async fn run(mut self) -> MigrationReport {
        if let Err(e) = self.execute().await {
            error!(phase = %self.report.phase, error = %e, "migration aborted");
            self.report.fatal_error = Some(e.to_string());
        }
        self.report.finish();
        info!(
            applications = self.report.applications.migrated,
            followups = self.report.followups.migrated,
            interviews = self.report.interviews.migrated,
            failed = self.report.failed_rows(),
            elapsed_secs = self.report.elapsed_secs,
            "migration finished"
        );
        self.report
    }

    fn enter(&mut self, phase: MigrationPhase) {
        info!(%phase, "migration phase");
        self.report.phase = phase;
    }

    async fn execute(&mut self) -> Result<()> {
        if !self.source.path().exists() {
            return Err(StorageError::Connection(format!(
                "source database {} does not exist",
                self.source.path().display()
            )));
        }
        self.target.connect().await?;

        self.enter(MigrationPhase::Extract);
        let extract = self.source.extract_all().await?;
        info!(
            applications = extract.applications.len(),
            followups = extract.followups.len(),
            interviews = extract.interviews.len(),
            "source extracted"
        );
        let staged = self.stage(&extract);

        if !self.options.validate_only {
            self.enter(MigrationPhase::SchemaCreate);
            self.target.create_schema().await?;
            let existing = self.target.entity_counts().await?;
            if existing.applications > 0 {
                warn!(
                    existing = existing.applications,
                    "destination already holds applications; counts will not reconcile"
                );
            }

            self.enter(MigrationPhase::MigrateApplications);
            self.load_applications(&staged.applications).await;
            self.enter(MigrationPhase::MigrateFollowups);
            self.load_followups(staged.followups).await;
            self.enter(MigrationPhase::MigrateInterviews);
            self.load_interviews(staged.interviews).await;
        }

        self.enter(MigrationPhase::Validate);
        self.validate(&staged.applications).await;

        self.enter(MigrationPhase::Done);
        Ok(())
    }

    fn fail(&mut self, entity: Entity, source_id: Option<i64>, cause: impl fmt::Display) {
        warn!(%entity, source_id, %cause, "row not migrated");
        self.report.record_failure(entity, source_id, cause.to_string());
    }

    /// Coerces every raw row and records the ones that cannot be carried over.
    /// Children whose parent failed coercion are failed here as well.
    fn stage(&mut self, extract: &RawExtract) -> StagedRows {
        let mut staged = StagedRows::default();
        self.report.applications.total = extract.applications.len();
        self.report.followups.total = extract.followups.len();
        self.report.interviews.total = extract.interviews.len();

        for row in &extract.applications {
            match coerce(row, transform::application) {
                Ok(record) => staged.applications.push(record),
                Err(e) => self.fail(Entity::Application, transform::source_id(row), e),
            }
        }

        let parents: HashSet<i64> = staged
            .applications
            .iter()
            .filter_map(|s| s.source_id)
            .collect();

        for row in &extract.followups {
            if let Some(record) = self.stage_child(Entity::Followup, row, transform::followup, &parents) {
                staged.followups.push(record);
            }
        }
        for row in &extract.interviews {
            if let Some(record) = self.stage_child(Entity::Interview, row, transform::interview, &parents) {
                staged.interviews.push(record);
            }
        }
        staged
    }

    fn stage_child<T, F>(
        &mut self,
        entity: Entity,
        row: &RawRow,
        record: F,
        parents: &HashSet<i64>,
    ) -> Option<Staged<T>>
    where
        F: Fn(&RawRow) -> std::result::Result<T, TransformError>,
        T: ChildRecord,
    {
        let source_id = transform::source_id(row);
        match coerce(row, record) {
            Ok(staged) if parents.contains(&staged.record.application_id()) => Some(staged),
            Ok(_) => {
                self.fail(entity, source_id, ORPHAN_CAUSE);
                None
            }
            Err(e @ TransformError::UnknownInteraction(_)) => {
                warn!(%entity, source_id, cause = %e, "row skipped");
                self.report.record_skip(entity, source_id, e.to_string());
                None
            }
            Err(e) => {
                self.fail(entity, source_id, e);
                None
            }
        }
    }

    async fn load_applications(&mut self, rows: &[Staged<NewApplication>]) {
        for staged in rows {
            match self.target.insert_application(&staged.record, staged.stamps).await {
                Ok(new_id) => {
                    if let Some(old_id) = staged.source_id {
                        self.id_map.insert(old_id, new_id);
                    }
                    self.report.applications.migrated += 1;
                }
                Err(e) => self.fail(Entity::Application, staged.source_id, e),
            }
        }
    }

    async fn load_followups(&mut self, rows: Vec<Staged<NewFollowup>>) {
        for mut staged in rows {
            let Some(&parent) = self.id_map.get(&staged.record.application_id) else {
                self.fail(Entity::Followup, staged.source_id, ORPHAN_CAUSE);
                continue;
            };
            staged.record.application_id = parent;
            match self.target.insert_followup(&staged.record, staged.stamps).await {
                Ok(_) => self.report.followups.migrated += 1,
                Err(e) => self.fail(Entity::Followup, staged.source_id, e),
            }
        }
    }

    async fn load_interviews(&mut self, rows: Vec<Staged<NewInterview>>) {
        for mut staged in rows {
            let Some(&parent) = self.id_map.get(&staged.record.application_id) else {
                self.fail(Entity::Interview, staged.source_id, ORPHAN_CAUSE);
                continue;
            };
            staged.record.application_id = parent;
            match self.target.insert_interview(&staged.record, staged.stamps).await {
                Ok(_) => self.report.interviews.migrated += 1,
                Err(e) => self.fail(Entity::Interview, staged.source_id, e),
            }
        }
    }

    async fn validate(&mut self, applications: &[Staged<NewApplication>]) {
        let sample_len = self.options.sample_size.min(applications.len());
        let sample = &applications[..sample_len];

        let checks = [
            (validate::COUNT_PARITY, validate::count_parity(self.target, &self.report).await),
            (validate::SAMPLE_FIELDS, validate::sample_fields(self.target, sample).await),
            (validate::PROBE, validate::probe(self.target).await),
        ];
        for (name, outcome) in checks {
            let check = outcome.unwrap_or_else(|e| CheckResult::fail(name, e.to_string()));
            if check.passed {
                info!(check = %check.name, detail = %check.detail, "validation passed");
            } else {
                warn!(check = %check.name, detail = %check.detail, "validation failed");
            }
            self.report.checks.push(check);
        }
    }
}

/// Child payloads carry their parent's id.
trait ChildRecord {
    fn application_id(&self) -> i64;
}

impl ChildRecord for NewFollowup {
    fn application_id(&self) -> i64 {
        self.application_id
    }
}

impl ChildRecord for NewInterview {
    fn application_id(&self) -> i64 {
        self.application_id
    }
}

/// Convenience wrapper over [`MigrationOrchestrator`].
pub async fn migrate(
    source: &EmbeddedAdapter,
    target: &dyn StorageAdapter,
    options: MigrationOptions,
) -> MigrationReport {
    MigrationOrchestrator::new(source, target, options).run().await
}
