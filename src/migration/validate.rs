//! Post-load integrity checks against the destination.

use tracing::{debug, warn};

use super::report::{CheckResult, Entity, MigrationReport};
use super::Staged;
use crate::error::Result;
use crate::models::NewApplication;
use crate::storage::{ApplicationFilter, ListQuery, SortDir, SortField, StorageAdapter, MAX_PAGE_SIZE};

pub const COUNT_PARITY: &str = "count_parity";
pub const SAMPLE_FIELDS: &str = "sample_fields";
pub const PROBE: &str = "probe";

/// Destination row count per table equals the rows that should have landed.
pub async fn count_parity(target: &dyn StorageAdapter, report: &MigrationReport) -> Result<CheckResult> {
    let counts = target.entity_counts().await?;
    let mut mismatches = Vec::new();
    for (entity, actual) in [
        (Entity::Application, counts.applications),
        (Entity::Followup, counts.followups),
        (Entity::Interview, counts.interviews),
    ] {
        let expected = report.entity(entity).expected();
        debug!(%entity, expected, actual, "count parity");
        if usize::try_from(actual).ok() != Some(expected) {
            mismatches.push(format!("{entity}: expected {expected}, found {actual}"));
        }
    }
    Ok(if mismatches.is_empty() {
        CheckResult::pass(
            COUNT_PARITY,
            format!(
                "applications={}, followups={}, interviews={}",
                counts.applications, counts.followups, counts.interviews
            ),
        )
    } else {
        CheckResult::fail(COUNT_PARITY, mismatches.join("; "))
    })
}

/// Looks each sampled application up by exact company and title and compares
/// every user-supplied field plus both timestamps.
pub async fn sample_fields(
    target: &dyn StorageAdapter,
    sample: &[Staged<NewApplication>],
) -> Result<CheckResult> {
    let mut problems = Vec::new();
    for staged in sample {
        let source = &staged.record;
        let query = ListQuery {
            filter: ApplicationFilter {
                company: Some(source.company_name.clone()),
                ..ApplicationFilter::default()
            },
            page: 1,
            page_size: MAX_PAGE_SIZE,
            sort_field: SortField::CreatedAt,
            sort_dir: SortDir::Asc,
        };
        let page = target.list_applications(&query).await?;
        let candidates: Vec<Vec<&'static str>> = page
            .items
            .iter()
            .filter(|a| a.company_name == source.company_name && a.job_title == source.job_title)
            .map(|a| {
                let mut diffs = source.diff_fields(&a.to_new());
                if a.created_at != staged.stamps.created_at {
                    diffs.push("created_at");
                }
                if a.updated_at != staged.stamps.updated_at {
                    diffs.push("updated_at");
                }
                diffs
            })
            .collect();

        let label = match staged.source_id {
            Some(id) => format!("#{id} {} / {}", source.company_name, source.job_title),
            None => format!("{} / {}", source.company_name, source.job_title),
        };
        if candidates.is_empty() {
            problems.push(format!("{label}: not found"));
        } else if !candidates.iter().any(|diffs| diffs.is_empty()) {
            let fewest = candidates.iter().min_by_key(|d| d.len()).cloned().unwrap_or_default();
            problems.push(format!("{label}: differs in {}", fewest.join(", ")));
        }
    }

    Ok(if problems.is_empty() {
        CheckResult::pass(
            SAMPLE_FIELDS,
            format!("{} sampled applications match", sample.len()),
        )
    } else {
        warn!(count = problems.len(), "sampled applications differ");
        CheckResult::fail(SAMPLE_FIELDS, problems.join("; "))
    })
}

/// Create, read back and delete a throwaway application. Once created the
/// row is deleted whatever the read-back returned.
pub async fn probe(target: &dyn StorageAdapter) -> Result<CheckResult> {
    let mut new = NewApplication::new("jobtrack migration probe", "probe");
    new.job_url = Some(format!("https://probe.invalid/{:016x}", rand::random::<u64>()));

    let id = target.create_application(&new).await?;
    let read_back = target.get_application(id).await;
    let deleted = target.delete_application(id).await;
    let read_back = read_back?;
    let deleted = deleted?;
    let gone = target.get_application(id).await?.is_none();

    let round_trip = read_back.as_ref().map(|a| a.to_new() == new).unwrap_or(false);
    Ok(match (round_trip, deleted && gone) {
        (true, true) => CheckResult::pass(PROBE, format!("created, read and deleted id {id}")),
        (false, _) => CheckResult::fail(PROBE, format!("id {id} did not read back as written")),
        (true, false) => CheckResult::fail(PROBE, format!("id {id} still present after delete")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::error::StorageError;
    use crate::models::{
        Application, ApplicationPatch, Followup, Interview, InterviewPatch, NewFollowup,
        NewInterview,
    };
    use crate::storage::{EntityCounts, Page, Statistics, StorageKind, Timestamps};

    /// Accepts inserts, fails every read, and records deletes.
    #[derive(Default)]
    struct UnreadableStore {
        deleted: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl StorageAdapter for UnreadableStore {
        fn kind(&self) -> StorageKind {
            StorageKind::Embedded
        }
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn create_schema(&self) -> Result<()> {
            Ok(())
        }
        async fn insert_application(&self, _: &NewApplication, _: Timestamps) -> Result<i64> {
            Ok(41)
        }
        async fn get_application(&self, _: i64) -> Result<Option<Application>> {
            Err(StorageError::Connection("read timed out".to_string()))
        }
        async fn list_applications(&self, _: &ListQuery) -> Result<Page<Application>> {
            Err(StorageError::Connection("read timed out".to_string()))
        }
        async fn update_application(&self, _: i64, _: &ApplicationPatch) -> Result<bool> {
            Ok(false)
        }
        async fn delete_application(&self, id: i64) -> Result<bool> {
            self.deleted.lock().unwrap().push(id);
            Ok(true)
        }
        async fn insert_followup(&self, _: &NewFollowup, _: Timestamps) -> Result<i64> {
            Ok(1)
        }
        async fn get_followup(&self, _: i64) -> Result<Option<Followup>> {
            Ok(None)
        }
        async fn list_followups(&self, _: i64) -> Result<Vec<Followup>> {
            Ok(Vec::new())
        }
        async fn delete_followup(&self, _: i64) -> Result<bool> {
            Ok(false)
        }
        async fn insert_interview(&self, _: &NewInterview, _: Timestamps) -> Result<i64> {
            Ok(1)
        }
        async fn get_interview(&self, _: i64) -> Result<Option<Interview>> {
            Ok(None)
        }
        async fn list_interviews(&self, _: i64) -> Result<Vec<Interview>> {
            Ok(Vec::new())
        }
        async fn update_interview(&self, _: i64, _: &InterviewPatch) -> Result<bool> {
            Ok(false)
        }
        async fn delete_interview(&self, _: i64) -> Result<bool> {
            Ok(false)
        }
        async fn get_statistics(&self) -> Result<Statistics> {
            Err(StorageError::Connection("read timed out".to_string()))
        }
        async fn entity_counts(&self) -> Result<EntityCounts> {
            Err(StorageError::Connection("read timed out".to_string()))
        }
    }

    #[tokio::test]
    async fn test_throwaway_row_is_deleted_when_read_back_fails() {
        let store = UnreadableStore::default();
        let err = probe(&store).await.unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)));
        assert_eq!(*store.deleted.lock().unwrap(), vec![41]);
    }
}
