use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use jobtrack::migration::report::{MigrationMode, MigrationReport};
use jobtrack::migration::{MigrationOptions, MigrationOrchestrator, DEFAULT_SAMPLE_SIZE};
use jobtrack::models::{
    ApplicationPatch, ApplicationStatus, InteractionType, InterviewPatch, InterviewStatus, JobType,
    NewApplication, NewFollowup, NewInterview, Priority, RemoteType,
};
use jobtrack::storage::{
    ApplicationFilter, ListQuery, SortDir, SortField, StorageAdapter, DEFAULT_PAGE_SIZE,
};
use jobtrack::{create_adapter, EmbeddedAdapter, NetworkSettings, StorageConfig};

#[derive(Parser)]
#[command(name = "jobtrack")]
#[command(version)]
#[command(about = "Track job applications on SQLite or PostgreSQL storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create tables and indices
    Init,

    /// Add an application
    Add {
        /// Company name
        company: String,

        /// Job title
        title: String,

        #[command(flatten)]
        fields: ApplicationFields,
    },

    /// List applications
    List {
        /// Filter by status (repeat or comma-separate)
        #[arg(short, long, value_delimiter = ',')]
        status: Vec<ApplicationStatus>,

        /// Company name contains
        #[arg(short, long)]
        company: Option<String>,

        #[arg(long, value_delimiter = ',')]
        job_type: Vec<JobType>,

        #[arg(long, value_delimiter = ',')]
        remote: Vec<RemoteType>,

        #[arg(short, long, value_delimiter = ',')]
        priority: Vec<Priority>,

        /// Minimum salary_min
        #[arg(long)]
        salary_min: Option<i64>,

        /// Maximum salary_max
        #[arg(long)]
        salary_max: Option<i64>,

        /// Applied on or after (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Applied on or before (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Text searched in company, title, notes and description
        #[arg(short = 'q', long)]
        search: Option<String>,

        #[arg(long, default_value = "1")]
        page: u32,

        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: u32,

        /// Sort field (created_at, updated_at, application_date, deadline,
        /// company, title, status, priority, salary_min, salary_max)
        #[arg(long, default_value = "created_at")]
        sort: SortField,

        /// Sort ascending instead of descending
        #[arg(long)]
        asc: bool,
    },

    /// Print an application with its followups and interviews as JSON
    Show {
        /// Application ID
        id: i64,
    },

    /// Change fields of an application
    Update {
        /// Application ID
        id: i64,

        #[arg(long)]
        company: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[command(flatten)]
        fields: ApplicationFields,

        /// Clear optional fields (e.g. --clear notes,deadline)
        #[arg(long, value_delimiter = ',')]
        clear: Vec<String>,
    },

    /// Delete an application and everything attached to it
    Delete {
        /// Application ID
        id: i64,
    },

    /// Manage followups
    Followup {
        #[command(subcommand)]
        command: FollowupCommands,
    },

    /// Manage interviews
    Interview {
        #[command(subcommand)]
        command: InterviewCommands,
    },

    /// Print statistics as JSON
    Stats,

    /// Copy an embedded database into another backend
    Migrate {
        /// Source SQLite file
        #[arg(long)]
        source: PathBuf,

        /// Destination PostgreSQL URL (or a SQLite file path)
        #[arg(long)]
        dest: String,

        /// Only run the validation checks against an existing destination
        #[arg(long)]
        validate_only: bool,

        /// Where to write the JSON report
        #[arg(long)]
        report: Option<PathBuf>,

        /// Number of applications compared field by field
        #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
        sample_size: usize,
    },
}

#[derive(Args)]
struct ApplicationFields {
    #[arg(long)]
    url: Option<String>,

    #[arg(long)]
    location: Option<String>,

    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    salary_min: Option<i64>,

    #[arg(long)]
    salary_max: Option<i64>,

    /// Three-letter currency code
    #[arg(long)]
    currency: Option<String>,

    #[arg(long)]
    job_type: Option<JobType>,

    #[arg(long)]
    remote: Option<RemoteType>,

    /// Date applied (YYYY-MM-DD)
    #[arg(long)]
    date: Option<NaiveDate>,

    #[arg(long)]
    deadline: Option<NaiveDate>,

    #[arg(short, long)]
    status: Option<ApplicationStatus>,

    #[arg(short, long)]
    priority: Option<Priority>,

    #[arg(short, long)]
    notes: Option<String>,

    #[arg(long)]
    referral: Option<String>,

    #[arg(long)]
    contact_name: Option<String>,

    #[arg(long)]
    contact_email: Option<String>,
}

#[derive(Subcommand)]
enum FollowupCommands {
    /// Record an interaction
    Add {
        /// Application ID
        application_id: i64,

        /// Short summary
        title: String,

        /// Interaction type (email, phone_call, interview, networking, ...)
        #[arg(short = 't', long = "type", default_value = "follow_up")]
        interaction_type: InteractionType,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        outcome: Option<String>,

        /// Schedule another followup on this date
        #[arg(long)]
        follow_up_date: Option<NaiveDate>,
    },

    /// List followups of an application
    List {
        /// Application ID
        application_id: i64,
    },

    /// Delete a followup
    Delete {
        /// Followup ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum InterviewCommands {
    /// Schedule an interview
    Add {
        /// Application ID
        application_id: i64,

        /// Interview type (phone, technical, onsite, ...)
        interview_type: String,

        /// Short summary
        title: String,

        /// Interview date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Start time (HH:MM)
        #[arg(long, value_parser = parse_time)]
        time: Option<NaiveTime>,

        #[arg(long)]
        duration: Option<i32>,

        #[arg(long)]
        location: Option<String>,

        #[arg(long = "virtual")]
        is_virtual: bool,

        #[arg(long)]
        meeting_link: Option<String>,

        #[arg(long, default_value = "1")]
        round: i32,

        #[arg(long)]
        total_rounds: Option<i32>,
    },

    /// Record how an interview went
    Update {
        /// Interview ID
        id: i64,

        #[arg(short, long)]
        status: Option<InterviewStatus>,

        #[arg(short, long)]
        outcome: Option<String>,

        #[arg(short, long)]
        feedback: Option<String>,
    },

    /// List interviews of an application
    List {
        /// Application ID
        application_id: i64,
    },

    /// Delete an interview
    Delete {
        /// Interview ID
        id: i64,
    },
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| format!("invalid time '{s}', expected HH:MM"))
}

impl ApplicationFields {
    fn apply_to_new(self, app: &mut NewApplication) {
        app.job_url = self.url;
        app.location = self.location;
        app.description = self.description;
        app.salary_min = self.salary_min;
        app.salary_max = self.salary_max;
        if let Some(currency) = self.currency {
            app.currency = currency;
        }
        app.job_type = self.job_type;
        app.remote_type = self.remote;
        app.application_date = self.date;
        app.deadline = self.deadline;
        if let Some(status) = self.status {
            app.status = status;
        }
        if let Some(priority) = self.priority {
            app.priority = priority;
        }
        app.notes = self.notes;
        app.referral_source = self.referral;
        app.contact_name = self.contact_name;
        app.contact_email = self.contact_email;
    }

    fn into_patch(self, patch: &mut ApplicationPatch) {
        patch.job_url = self.url.map(Some);
        patch.location = self.location.map(Some);
        patch.description = self.description.map(Some);
        patch.salary_min = self.salary_min.map(Some);
        patch.salary_max = self.salary_max.map(Some);
        patch.currency = self.currency;
        patch.job_type = self.job_type.map(Some);
        patch.remote_type = self.remote.map(Some);
        patch.application_date = self.date.map(Some);
        patch.deadline = self.deadline.map(Some);
        patch.status = self.status;
        patch.priority = self.priority;
        patch.notes = self.notes.map(Some);
        patch.referral_source = self.referral.map(Some);
        patch.contact_name = self.contact_name.map(Some);
        patch.contact_email = self.contact_email.map(Some);
    }
}

fn clear_field(patch: &mut ApplicationPatch, field: &str) -> Result<()> {
    match field.trim() {
        "url" | "job_url" => patch.job_url = Some(None),
        "location" => patch.location = Some(None),
        "description" => patch.description = Some(None),
        "salary_min" => patch.salary_min = Some(None),
        "salary_max" => patch.salary_max = Some(None),
        "job_type" => patch.job_type = Some(None),
        "remote" | "remote_type" => patch.remote_type = Some(None),
        "date" | "application_date" => patch.application_date = Some(None),
        "deadline" => patch.deadline = Some(None),
        "notes" => patch.notes = Some(None),
        "referral" | "referral_source" => patch.referral_source = Some(None),
        "contact_name" => patch.contact_name = Some(None),
        "contact_email" => patch.contact_email = Some(None),
        other => bail!("Field '{}' cannot be cleared", other),
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobtrack=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate {
            source,
            dest,
            validate_only,
            report,
            sample_size,
        } => {
            let options = MigrationOptions {
                validate_only,
                sample_size,
            };
            run_migration(source, &dest, options, report).await
        }
        command => {
            let config = StorageConfig::from_env().context("Invalid storage configuration")?;
            let store = create_adapter(&config);
            store
                .connect()
                .await
                .with_context(|| format!("Failed to connect to {} storage", store.kind()))?;

            let outcome = run(store.as_ref(), command).await;
            store.disconnect().await?;
            outcome?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(store: &dyn StorageAdapter, command: Commands) -> Result<()> {
    store.create_schema().await.context("Failed to prepare schema")?;

    match command {
        Commands::Init => {
            println!("{} storage initialized", store.kind());
        }

        Commands::Add {
            company,
            title,
            fields,
        } => {
            let mut app = NewApplication::new(company, title);
            fields.apply_to_new(&mut app);
            let id = store.create_application(&app).await?;
            println!("Added application #{}", id);
        }

        Commands::List {
            status,
            company,
            job_type,
            remote,
            priority,
            salary_min,
            salary_max,
            from,
            to,
            search,
            page,
            page_size,
            sort,
            asc,
        } => {
            let query = ListQuery {
                filter: ApplicationFilter {
                    statuses: status,
                    company,
                    job_types: job_type,
                    remote_types: remote,
                    priorities: priority,
                    salary_min,
                    salary_max,
                    date_from: from,
                    date_to: to,
                    search,
                },
                page,
                page_size,
                sort_field: sort,
                sort_dir: if asc { SortDir::Asc } else { SortDir::Desc },
            };
            let result = store.list_applications(&query).await?;
            if result.items.is_empty() {
                println!("No applications found.");
            } else {
                println!(
                    "{:<6} {:<20} {:<24} {:<28} {:<8} {:>12}",
                    "ID", "STATUS", "COMPANY", "TITLE", "PRIORITY", "SALARY"
                );
                println!("{}", "-".repeat(102));
                for app in &result.items {
                    println!(
                        "{:<6} {:<20} {:<24} {:<28} {:<8} {:>12}",
                        app.id,
                        app.status,
                        truncate(&app.company_name, 22),
                        truncate(&app.job_title, 26),
                        app.priority,
                        salary_range(app.salary_min, app.salary_max)
                    );
                }
                println!(
                    "\nPage {} of {} ({} total)",
                    result.page,
                    result.page_count.max(1),
                    result.total
                );
            }
        }

        Commands::Show { id } => match store.get_application(id).await? {
            Some(application) => {
                let detail = serde_json::json!({
                    "application": application,
                    "followups": store.list_followups(id).await?,
                    "interviews": store.list_interviews(id).await?,
                });
                println!("{}", serde_json::to_string_pretty(&detail)?);
            }
            None => {
                println!("Application #{} not found.", id);
            }
        },

        Commands::Update {
            id,
            company,
            title,
            fields,
            clear,
        } => {
            let mut patch = ApplicationPatch::default();
            fields.into_patch(&mut patch);
            patch.company_name = company;
            patch.job_title = title;
            for field in &clear {
                clear_field(&mut patch, field)?;
            }
            if patch.is_empty() {
                bail!("Nothing to update; pass at least one field");
            }
            if store.update_application(id, &patch).await? {
                println!("Updated application #{}", id);
            } else {
                println!("Application #{} not found.", id);
            }
        }

        Commands::Delete { id } => {
            if store.delete_application(id).await? {
                println!("Deleted application #{}", id);
            } else {
                println!("Application #{} not found.", id);
            }
        }

        Commands::Followup { command } => match command {
            FollowupCommands::Add {
                application_id,
                title,
                interaction_type,
                description,
                outcome,
                follow_up_date,
            } => {
                let mut followup = NewFollowup::new(application_id, interaction_type, title, Utc::now());
                followup.description = description;
                followup.outcome = outcome;
                followup.follow_up_needed = follow_up_date.is_some();
                followup.follow_up_date = follow_up_date;
                let id = store.create_followup(&followup).await?;
                println!("Added followup #{} to application #{}", id, application_id);
            }

            FollowupCommands::List { application_id } => {
                for f in store.list_followups(application_id).await? {
                    println!(
                        "#{} {} [{}] {}",
                        f.id,
                        f.interaction_date.format("%Y-%m-%d"),
                        f.interaction_type,
                        f.title
                    );
                }
            }

            FollowupCommands::Delete { id } => {
                if store.delete_followup(id).await? {
                    println!("Deleted followup #{}", id);
                } else {
                    println!("Followup #{} not found.", id);
                }
            }
        },

        Commands::Interview { command } => match command {
            InterviewCommands::Add {
                application_id,
                interview_type,
                title,
                date,
                time,
                duration,
                location,
                is_virtual,
                meeting_link,
                round,
                total_rounds,
            } => {
                let mut interview = NewInterview::new(application_id, interview_type, title, date);
                interview.interview_time = time;
                interview.duration_minutes = duration;
                interview.location = location;
                interview.is_virtual = is_virtual;
                interview.meeting_link = meeting_link;
                interview.round_number = round;
                interview.total_rounds = total_rounds;
                let id = store.create_interview(&interview).await?;
                println!("Added interview #{} to application #{}", id, application_id);
            }

            InterviewCommands::Update {
                id,
                status,
                outcome,
                feedback,
            } => {
                let patch = InterviewPatch {
                    status,
                    outcome: outcome.map(Some),
                    feedback: feedback.map(Some),
                    ..InterviewPatch::default()
                };
                if patch.is_empty() {
                    bail!("Nothing to update; pass --status, --outcome or --feedback");
                }
                if store.update_interview(id, &patch).await? {
                    println!("Updated interview #{}", id);
                } else {
                    println!("Interview #{} not found.", id);
                }
            }

            InterviewCommands::List { application_id } => {
                for i in store.list_interviews(application_id).await? {
                    println!(
                        "#{} round {} on {} - {} ({})",
                        i.id, i.round_number, i.interview_date, i.title, i.status
                    );
                }
            }

            InterviewCommands::Delete { id } => {
                if store.delete_interview(id).await? {
                    println!("Deleted interview #{}", id);
                } else {
                    println!("Interview #{} not found.", id);
                }
            }
        },

        Commands::Stats => {
            let stats = store.get_statistics().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Migrate { .. } => bail!("migrate manages its own connections"),
    }

    Ok(())
}

async fn run_migration(
    source: PathBuf,
    dest: &str,
    options: MigrationOptions,
    report_path: Option<PathBuf>,
) -> Result<ExitCode> {
    let report_path = report_path.unwrap_or_else(|| {
        PathBuf::from(format!(
            "migration_report_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S")
        ))
    });

    let target_config = if dest.starts_with("postgres://") || dest.starts_with("postgresql://") {
        NetworkSettings::new(dest).map(StorageConfig::Networked)
    } else {
        Ok(StorageConfig::Embedded {
            path: PathBuf::from(dest),
        })
    };

    let report = match target_config {
        Ok(config) => {
            let source = EmbeddedAdapter::new(source);
            let target = create_adapter(&config);
            let report = MigrationOrchestrator::new(&source, target.as_ref(), options)
                .run()
                .await;
            target.disconnect().await.ok();
            report
        }
        Err(e) => {
            let mode = if options.validate_only {
                MigrationMode::ValidateOnly
            } else {
                MigrationMode::Migrate
            };
            let mut report = MigrationReport::new(mode);
            report.fatal_error = Some(e.to_string());
            report.finish();
            report
        }
    };

    report.write_json(&report_path)?;
    print_report(&report);
    println!("\nReport written to {}", report_path.display());

    Ok(ExitCode::from(report.exit_code()))
}

fn print_report(report: &MigrationReport) {
    println!("Migration ({:?}) reached phase '{}'", report.mode, report.phase);
    println!("{:<14} {:>8} {:>10} {:>8} {:>8}", "ENTITY", "TOTAL", "MIGRATED", "FAILED", "SKIPPED");
    println!("{}", "-".repeat(52));
    for (name, tally) in [
        ("applications", &report.applications),
        ("followups", &report.followups),
        ("interviews", &report.interviews),
    ] {
        println!(
            "{:<14} {:>8} {:>10} {:>8} {:>8}",
            name, tally.total, tally.migrated, tally.failed, tally.skipped
        );
    }

    if !report.checks.is_empty() {
        println!("\nChecks:");
        for check in &report.checks {
            let mark = if check.passed { "PASS" } else { "FAIL" };
            println!("  [{}] {}: {}", mark, check.name, check.detail);
        }
    }

    if !report.errors.is_empty() {
        println!("\nRow errors ({}):", report.errors.len());
        for err in report.errors.iter().take(20) {
            let id = err
                .source_id
                .map(|id| format!("#{id}"))
                .unwrap_or_else(|| "?".to_string());
            println!("  {} {}: {}", err.entity, id, err.cause);
        }
        if report.errors.len() > 20 {
            println!("  ... and {} more (see report)", report.errors.len() - 20);
        }
    }

    if let Some(fatal) = &report.fatal_error {
        eprintln!("\nMigration aborted: {}", fatal);
    }
}

fn salary_range(min: Option<i64>, max: Option<i64>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("{}k-{}k", min / 1000, max / 1000),
        (Some(min), None) => format!("{}k+", min / 1000),
        (None, Some(max)) => format!("<{}k", max / 1000),
        (None, None) => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("Acme", 10), "Acme");
        assert_eq!(truncate("Zürich Versicherung", 8), "Züric...");
    }

    #[test]
    fn test_clear_field() {
        let mut patch = ApplicationPatch::default();
        clear_field(&mut patch, "notes").unwrap();
        clear_field(&mut patch, "remote").unwrap();
        assert_eq!(patch.notes, Some(None));
        assert_eq!(patch.remote_type, Some(None));
        assert!(clear_field(&mut patch, "company_name").is_err());
    }

    #[test]
    fn test_cli_parses_list_filters() {
        let cli = Cli::try_parse_from([
            "jobtrack", "list", "--status", "applied,offer", "--sort", "company", "--asc",
        ])
        .unwrap();
        match cli.command {
            Commands::List {
                status, sort, asc, ..
            } => {
                assert_eq!(status, vec![ApplicationStatus::Applied, ApplicationStatus::Offer]);
                assert_eq!(sort, SortField::CompanyName);
                assert!(asc);
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_salary_range_display() {
        assert_eq!(salary_range(Some(100_000), Some(150_000)), "100k-150k");
        assert_eq!(salary_range(None, None), "-");
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(Cli::try_parse_from(["jobtrack", "list", "--status", "ghosted"]).is_err());
    }
}
