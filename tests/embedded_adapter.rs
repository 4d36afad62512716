use chrono::{NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use jobtrack::models::{
    ApplicationPatch, ApplicationStatus, InteractionType, InterviewPatch, InterviewStatus, JobType,
    NewApplication, NewFollowup, NewInterview, Priority, RemoteType,
};
use jobtrack::storage::{
    ApplicationFilter, ListQuery, SortDir, SortField, StorageAdapter, StorageKind, Timestamps,
};
use jobtrack::{create_adapter, EmbeddedAdapter, StorageConfig, StorageError};

async fn open_store() -> (TempDir, EmbeddedAdapter) {
    let dir = tempfile::tempdir().unwrap();
    let store = EmbeddedAdapter::new(dir.path().join("jobs.db"));
    store.connect().await.unwrap();
    store.create_schema().await.unwrap();
    (dir, store)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn app(company: &str, title: &str, status: ApplicationStatus) -> NewApplication {
    let mut new = NewApplication::new(company, title);
    new.status = status;
    new
}

#[tokio::test]
async fn test_round_trip_preserves_every_field() {
    let (_dir, store) = open_store().await;

    let mut new = NewApplication::new("Acme", "Platform Engineer");
    new.job_url = Some("https://acme.example/jobs/42".to_string());
    new.description = Some("Rust services".to_string());
    new.location = Some("Berlin".to_string());
    new.salary_min = Some(90_000);
    new.salary_max = Some(120_000);
    new.currency = "EUR".to_string();
    new.job_type = Some(JobType::FullTime);
    new.remote_type = Some(RemoteType::Hybrid);
    new.application_date = Some(date(2026, 3, 1));
    new.deadline = Some(date(2026, 3, 31));
    new.status = ApplicationStatus::PhoneScreen;
    new.priority = Priority::High;
    new.notes = Some("Referred by Sam".to_string());
    new.referral_source = Some("Sam".to_string());
    new.contact_name = Some("Robin".to_string());
    new.contact_email = Some("robin@acme.example".to_string());

    let id = store.create_application(&new).await.unwrap();
    let stored = store.get_application(id).await.unwrap().unwrap();

    assert_eq!(stored.id, id);
    assert_eq!(stored.to_new(), new);
    assert_eq!(stored.created_at, stored.updated_at);
}

#[tokio::test]
async fn test_partial_update_changes_only_supplied_fields() {
    let (_dir, store) = open_store().await;

    let mut new = NewApplication::new("Acme", "Engineer");
    new.notes = Some("first call went well".to_string());
    new.location = Some("Remote".to_string());
    let id = store.create_application(&new).await.unwrap();
    let before = store.get_application(id).await.unwrap().unwrap();

    let patch = ApplicationPatch {
        status: Some(ApplicationStatus::TechnicalInterview),
        location: Some(None),
        ..ApplicationPatch::default()
    };
    assert!(store.update_application(id, &patch).await.unwrap());

    let after = store.get_application(id).await.unwrap().unwrap();
    assert_eq!(after.status, ApplicationStatus::TechnicalInterview);
    assert_eq!(after.location, None);
    assert_eq!(after.notes, before.notes);
    assert_eq!(after.company_name, before.company_name);
    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at > before.updated_at);

    // A second immediate update still moves updated_at forward.
    assert!(store
        .update_application(id, &ApplicationPatch::status(ApplicationStatus::FinalRound))
        .await
        .unwrap());
    let again = store.get_application(id).await.unwrap().unwrap();
    assert!(again.updated_at > after.updated_at);
}

#[tokio::test]
async fn test_update_edge_cases() {
    let (_dir, store) = open_store().await;
    let id = store
        .create_application(&NewApplication::new("Acme", "Engineer"))
        .await
        .unwrap();
    let before = store.get_application(id).await.unwrap().unwrap();

    assert!(!store
        .update_application(9_999, &ApplicationPatch::status(ApplicationStatus::Offer))
        .await
        .unwrap());

    assert!(store
        .update_application(id, &ApplicationPatch::default())
        .await
        .unwrap());
    let unchanged = store.get_application(id).await.unwrap().unwrap();
    assert_eq!(unchanged.updated_at, before.updated_at);

    let bad = ApplicationPatch {
        company_name: Some("   ".to_string()),
        ..ApplicationPatch::default()
    };
    let err = store.update_application(id, &bad).await.unwrap_err();
    assert!(matches!(err, StorageError::Validation(_)));
}

#[tokio::test]
async fn test_acme_scenario_cascades_on_delete() {
    let (_dir, store) = open_store().await;

    let id = store
        .create_application(&app("Acme", "Engineer", ApplicationStatus::Applied))
        .await
        .unwrap();
    assert_eq!(id, 1);

    let followup = NewFollowup::new(id, InteractionType::PhoneCall, "Recruiter call", Utc::now());
    let followup_id = store.create_followup(&followup).await.unwrap();
    assert_eq!(followup_id, 1);

    let interview = NewInterview::new(id, "technical", "Pairing", date(2026, 4, 2));
    let interview_id = store.create_interview(&interview).await.unwrap();

    assert!(store.delete_application(id).await.unwrap());
    assert!(store.get_application(id).await.unwrap().is_none());
    assert!(store.get_followup(followup_id).await.unwrap().is_none());
    assert!(store.get_interview(interview_id).await.unwrap().is_none());
    assert!(store.list_followups(id).await.unwrap().is_empty());

    let counts = store.entity_counts().await.unwrap();
    assert_eq!((counts.applications, counts.followups, counts.interviews), (0, 0, 0));

    assert!(!store.delete_application(id).await.unwrap());
}

#[tokio::test]
async fn test_child_for_unknown_parent_is_rejected() {
    let (_dir, store) = open_store().await;
    let followup = NewFollowup::new(77, InteractionType::Email, "Ping", Utc::now());
    let err = store.create_followup(&followup).await.unwrap_err();
    assert!(matches!(err, StorageError::Validation(_)));
}

#[tokio::test]
async fn test_schema_creation_is_idempotent() {
    let (_dir, store) = open_store().await;
    let id = store
        .create_application(&NewApplication::new("Acme", "Engineer"))
        .await
        .unwrap();

    store.create_schema().await.unwrap();
    store.create_schema().await.unwrap();

    assert!(store.get_application(id).await.unwrap().is_some());
    assert_eq!(store.entity_counts().await.unwrap().applications, 1);
}

#[tokio::test]
async fn test_duplicate_job_url() {
    let (_dir, store) = open_store().await;
    let mut new = NewApplication::new("Acme", "Engineer");
    new.job_url = Some("https://acme.example/jobs/1".to_string());
    store.create_application(&new).await.unwrap();

    let mut again = NewApplication::new("Acme", "Senior Engineer");
    again.job_url = new.job_url.clone();
    let err = store.create_application(&again).await.unwrap_err();
    match err {
        StorageError::Duplicate { field, value } => {
            assert_eq!(field, "job_url");
            assert_eq!(value, "https://acme.example/jobs/1");
        }
        other => panic!("expected duplicate, got {other:?}"),
    }

    // Applications without a URL never collide.
    store.create_application(&NewApplication::new("Initech", "Analyst")).await.unwrap();
    store.create_application(&NewApplication::new("Initech", "Analyst")).await.unwrap();
}

#[tokio::test]
async fn test_validation_rejects_malformed_input() {
    let (_dir, store) = open_store().await;
    let mut new = NewApplication::new("Acme", "Engineer");
    new.salary_min = Some(150_000);
    new.salary_max = Some(100_000);
    let err = store.create_application(&new).await.unwrap_err();
    assert!(matches!(err, StorageError::Validation(_)));
    assert_eq!(store.entity_counts().await.unwrap().applications, 0);
}

async fn seed(store: &EmbeddedAdapter) {
    let rows = [
        ("Acme", "Backend Engineer", ApplicationStatus::Applied, Priority::High, Some((100_000, 130_000)), date(2026, 1, 10)),
        ("acme labs", "Data Engineer", ApplicationStatus::Offer, Priority::Medium, Some((90_000, 110_000)), date(2026, 1, 20)),
        ("Globex", "SRE", ApplicationStatus::Rejected, Priority::Low, None, date(2026, 2, 5)),
        ("Initech", "Rust Developer", ApplicationStatus::Accepted, Priority::High, Some((120_000, 160_000)), date(2026, 2, 15)),
        ("100%_Remote Co", "Engineer", ApplicationStatus::PhoneScreen, Priority::Medium, None, date(2026, 3, 1)),
    ];
    for (company, title, status, priority, salary, applied) in rows {
        let mut new = app(company, title, status);
        new.priority = priority;
        if let Some((min, max)) = salary {
            new.salary_min = Some(min);
            new.salary_max = Some(max);
        }
        new.application_date = Some(applied);
        store.create_application(&new).await.unwrap();
    }
}

#[tokio::test]
async fn test_filters() {
    let (_dir, store) = open_store().await;
    seed(&store).await;

    let by = |filter: ApplicationFilter| ListQuery::filtered(filter);

    let page = store
        .list_applications(&by(ApplicationFilter {
            company: Some("ACME".to_string()),
            ..ApplicationFilter::default()
        }))
        .await
        .unwrap();
    assert_eq!(page.total, 2);

    let page = store
        .list_applications(&by(ApplicationFilter {
            statuses: vec![ApplicationStatus::Offer, ApplicationStatus::Accepted],
            ..ApplicationFilter::default()
        }))
        .await
        .unwrap();
    assert_eq!(page.total, 2);

    let page = store
        .list_applications(&by(ApplicationFilter {
            salary_min: Some(95_000),
            ..ApplicationFilter::default()
        }))
        .await
        .unwrap();
    let companies: Vec<&str> = page.items.iter().map(|a| a.company_name.as_str()).collect();
    assert_eq!(page.total, 2);
    assert!(companies.contains(&"Acme") && companies.contains(&"Initech"));

    let page = store
        .list_applications(&by(ApplicationFilter {
            date_from: Some(date(2026, 1, 20)),
            date_to: Some(date(2026, 2, 15)),
            ..ApplicationFilter::default()
        }))
        .await
        .unwrap();
    assert_eq!(page.total, 3);

    // Wildcards in user text match literally.
    let page = store
        .list_applications(&by(ApplicationFilter {
            search: Some("100%_".to_string()),
            ..ApplicationFilter::default()
        }))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].company_name, "100%_Remote Co");

    let page = store
        .list_applications(&by(ApplicationFilter {
            search: Some("rust".to_string()),
            priorities: vec![Priority::High],
            ..ApplicationFilter::default()
        }))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].company_name, "Initech");
}

#[tokio::test]
async fn test_company_filter_folds_non_ascii() {
    let (_dir, store) = open_store().await;
    store
        .create_application(&NewApplication::new("Émile Studios", "Designer"))
        .await
        .unwrap();
    let mut other = NewApplication::new("Globex", "Engineer");
    other.notes = Some("Met the ÉQUIPE at a meetup".to_string());
    store.create_application(&other).await.unwrap();

    for needle in ["Émile", "émile", "ÉMILE", "studios"] {
        let page = store
            .list_applications(&ListQuery::filtered(ApplicationFilter {
                company: Some(needle.to_string()),
                ..ApplicationFilter::default()
            }))
            .await
            .unwrap();
        assert_eq!(page.total, 1, "company filter {needle:?}");
        assert_eq!(page.items[0].company_name, "Émile Studios");
    }

    let page = store
        .list_applications(&ListQuery::filtered(ApplicationFilter {
            search: Some("équipe".to_string()),
            ..ApplicationFilter::default()
        }))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].company_name, "Globex");
}

#[tokio::test]
async fn test_insert_keeps_supplied_timestamps() {
    let (_dir, store) = open_store().await;
    let created = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let updated = Utc.with_ymd_and_hms(2024, 5, 20, 16, 30, 0).unwrap();

    let id = store
        .insert_application(
            &NewApplication::new("Acme", "Engineer"),
            Timestamps::preserved(created, Some(updated)),
        )
        .await
        .unwrap();
    let stored = store.get_application(id).await.unwrap().unwrap();
    assert_eq!(stored.created_at, created);
    assert_eq!(stored.updated_at, updated);

    let stats = store.get_statistics().await.unwrap();
    assert_eq!(stats.count_by_month["2024-05"], 1);
}

#[tokio::test]
async fn test_sorting_and_pagination() {
    let (_dir, store) = open_store().await;
    seed(&store).await;

    let query = ListQuery {
        page: 1,
        page_size: 2,
        sort_field: SortField::CompanyName,
        sort_dir: SortDir::Asc,
        ..ListQuery::default()
    };
    let first = store.list_applications(&query).await.unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(first.page_count, 3);
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].company_name, "100%_Remote Co");

    let last = store
        .list_applications(&ListQuery { page: 3, ..query.clone() })
        .await
        .unwrap();
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].company_name, "acme labs");

    let beyond = store
        .list_applications(&ListQuery { page: 9, ..query.clone() })
        .await
        .unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total, 5);

    // Salary sorts put missing values last in either direction.
    for dir in [SortDir::Asc, SortDir::Desc] {
        let page = store
            .list_applications(&ListQuery {
                sort_field: SortField::SalaryMin,
                sort_dir: dir,
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert!(page.items[3].salary_min.is_none());
        assert!(page.items[4].salary_min.is_none());
    }

    let by_priority = store
        .list_applications(&ListQuery {
            sort_field: SortField::Priority,
            sort_dir: SortDir::Desc,
            ..ListQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(by_priority.items[0].priority, Priority::High);
    assert_eq!(by_priority.items[4].priority, Priority::Low);
}

#[tokio::test]
async fn test_statistics() {
    let (_dir, store) = open_store().await;

    let empty = store.get_statistics().await.unwrap();
    assert_eq!(empty.total_count, 0);
    assert_eq!(empty.success_rate, 0.0);
    assert!(empty.salary_range.avg.is_none());

    seed(&store).await;
    let mut withdrawn = app("Acme", "Frontend Engineer", ApplicationStatus::Withdrawn);
    withdrawn.application_date = Some(date(2026, 4, 2));
    store.create_application(&withdrawn).await.unwrap();

    let stats = store.get_statistics().await.unwrap();
    assert_eq!(stats.total_count, 6);
    assert_eq!(stats.count_by_status.values().sum::<i64>(), 6);
    assert_eq!(stats.count_by_status["offer"], 1);
    // 2 of 6 in {offer, accepted}
    assert_eq!(stats.success_rate, 33.3);
    // applied, offer, phone_screen
    assert_eq!(stats.active_count, 3);
    assert_eq!(stats.count_by_month["2026-01"], 2);
    assert_eq!(stats.count_by_month["2026-02"], 2);
    assert_eq!(stats.count_by_month["2026-04"], 1);
    assert_eq!(stats.count_by_month.values().sum::<i64>(), 6);

    assert_eq!(stats.top_companies[0].company_name, "Acme");
    assert_eq!(stats.top_companies[0].count, 2);
    assert_eq!(stats.top_companies.len(), 5);

    assert_eq!(stats.salary_range.min, Some(90_000));
    assert_eq!(stats.salary_range.max, Some(160_000));
    // midpoints 115k, 100k, 140k
    assert_eq!(stats.salary_range.avg, Some(118_333.33));
}

#[tokio::test]
async fn test_salary_average_with_very_large_bounds() {
    let (_dir, store) = open_store().await;
    let mut new = NewApplication::new("Hooli", "Chief Everything Officer");
    new.salary_min = Some(i64::MAX / 2);
    new.salary_max = Some(i64::MAX / 2 + 2);
    store.create_application(&new).await.unwrap();

    let stats = store.get_statistics().await.unwrap();
    assert_eq!(stats.salary_range.max, Some(i64::MAX / 2 + 2));
    let avg = stats.salary_range.avg.unwrap();
    assert!((avg - (i64::MAX / 2) as f64).abs() / avg < 1e-9, "avg {avg}");
}

#[tokio::test]
async fn test_children_listing_and_interview_update() {
    let (_dir, store) = open_store().await;
    let id = store
        .create_application(&NewApplication::new("Acme", "Engineer"))
        .await
        .unwrap();

    let later = Utc.with_ymd_and_hms(2026, 3, 5, 9, 0, 0).unwrap();
    let earlier = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
    store
        .create_followup(&NewFollowup::new(id, InteractionType::Email, "Thanks", later))
        .await
        .unwrap();
    let mut first = NewFollowup::new(id, InteractionType::Application, "Applied", earlier);
    first.follow_up_needed = true;
    first.follow_up_date = Some(date(2026, 3, 8));
    store.create_followup(&first).await.unwrap();

    let followups = store.list_followups(id).await.unwrap();
    assert_eq!(followups.len(), 2);
    assert_eq!(followups[0].title, "Applied");
    assert_eq!(followups[0].interaction_date, earlier);
    assert_eq!(followups[0].follow_up_date, Some(date(2026, 3, 8)));

    let mut second_round = NewInterview::new(id, "onsite", "Onsite loop", date(2026, 3, 20));
    second_round.round_number = 2;
    second_round.total_rounds = Some(2);
    store.create_interview(&second_round).await.unwrap();
    let screen_id = store
        .create_interview(&NewInterview::new(id, "phone", "Screen", date(2026, 3, 10)))
        .await
        .unwrap();

    let interviews = store.list_interviews(id).await.unwrap();
    assert_eq!(interviews[0].round_number, 1);
    assert_eq!(interviews[1].round_number, 2);

    let patch = InterviewPatch {
        status: Some(InterviewStatus::Completed),
        feedback: Some(Some("strong".to_string())),
        ..InterviewPatch::default()
    };
    assert!(store.update_interview(screen_id, &patch).await.unwrap());
    let screen = store.get_interview(screen_id).await.unwrap().unwrap();
    assert_eq!(screen.status, InterviewStatus::Completed);
    assert_eq!(screen.feedback.as_deref(), Some("strong"));
    assert_eq!(screen.title, "Screen");
    assert!(screen.updated_at > screen.created_at);

    assert!(store.delete_interview(screen_id).await.unwrap());
    assert_eq!(store.list_interviews(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_factory_builds_embedded_adapter() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::Embedded {
        path: dir.path().join("nested/dir/jobs.db"),
    };
    let store = create_adapter(&config);
    assert_eq!(store.kind(), StorageKind::Embedded);

    store.connect().await.unwrap();
    store.connect().await.unwrap();
    store.create_schema().await.unwrap();
    let id = store
        .create_application(&NewApplication::new("Acme", "Engineer"))
        .await
        .unwrap();
    assert!(store.get_application(id).await.unwrap().is_some());
    store.disconnect().await.unwrap();
    store.disconnect().await.unwrap();
}
