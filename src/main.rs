use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use admissions_pipeline::attention::attention_for_session;
use admissions_pipeline::dedup::DuplicateAction;
use admissions_pipeline::import::ColumnOverrides;
use admissions_pipeline::intake::IntakeOutcome;
use admissions_pipeline::lifecycle::{ContactChannel, StatusChange};
use admissions_pipeline::models::{EntryChannel, LeadStatus, NewLead, Role};
use admissions_pipeline::sync::SyncQueue;
use admissions_pipeline::{db, report, seed, Config, LeadEngine, Session, Store};

const SYNC_QUEUE_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(name = "admissions-pipeline")]
#[command(about = "Lead lifecycle and assignment for the Group Scholar admissions office", long_about = None)]
struct Cli {
    /// Local state snapshot
    #[arg(long, global = true, default_value = "admissions-state.json")]
    state: PathBuf,
    /// JSON file with organisation settings and tuning
    #[arg(long, global = true, env = "ADMISSIONS_CONFIG")]
    config: Option<PathBuf>,
    /// Act as the staff member with this email
    #[arg(long = "as", global = true)]
    actor: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the replica database schema
    InitDb,
    /// Load demo programs, staff and leads
    Seed,
    /// Add a staff member
    AddStaff {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// super_admin, key_master, case_worker, data_entry or reports_only
        #[arg(long, default_value = "case_worker")]
        role: String,
    },
    /// Register an inquiry, checking for duplicates first
    #[command(group(
        ArgGroup::new("duplicate_choice")
            .args(["merge", "force"])
            .multiple(false)
    ))]
    AddLead {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// form, manual, staff_entry or import
        #[arg(long)]
        channel: Option<String>,
        /// Staff email to assign directly
        #[arg(long)]
        assign_to: Option<String>,
        /// Merge into this existing lead when duplicates are found
        #[arg(long)]
        merge: Option<Uuid>,
        /// Create even when duplicates are found
        #[arg(long)]
        force: bool,
    },
    /// Move a lead to another status
    Status {
        #[arg(long)]
        lead: Uuid,
        #[arg(long)]
        to: String,
        /// RFC 3339 exam date, for exam_scheduled
        #[arg(long)]
        exam_date: Option<DateTime<Utc>>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Change the primary program, or confirm contact about a change
    Interest {
        #[arg(long)]
        lead: Uuid,
        #[arg(long, required_unless_present = "confirm")]
        program: Option<String>,
        #[arg(long)]
        confirm: bool,
    },
    /// Assign a lead to a staff member
    Assign {
        #[arg(long)]
        lead: Uuid,
        /// Staff email
        #[arg(long)]
        to: String,
    },
    /// Overwrite a lead's notes
    Note {
        #[arg(long)]
        lead: Uuid,
        #[arg(long)]
        text: String,
    },
    /// Set when the lead should next be contacted
    Schedule {
        #[arg(long)]
        lead: Uuid,
        /// RFC 3339 timestamp
        #[arg(long)]
        at: DateTime<Utc>,
    },
    /// Log an outreach attempt or its result
    Contact {
        #[arg(long)]
        lead: Uuid,
        /// call, whatsapp, email, copy_phone or copy_email
        #[arg(long, default_value = "call")]
        channel: String,
        #[arg(long)]
        result: Option<String>,
    },
    /// Leads needing contact today
    Attention {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Leads waiting for assignment
    Queue,
    /// Assign queued leads to available case workers
    DrainQueue,
    /// Due reminders, or answer one
    Reminders {
        #[arg(long, requires = "outcome")]
        respond: Option<Uuid>,
        #[arg(long)]
        outcome: Option<String>,
    },
    /// Flag leads without progress
    Sweep,
    /// Recompute case worker metrics
    RefreshMetrics,
    /// Move every lead from one staff member to another
    Migrate {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Start a new lead from a rejected one
    Reactivate {
        #[arg(long)]
        lead: Uuid,
    },
    /// Import leads from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Use this header for a field instead of guessing, e.g. name=Alumno
        #[arg(long = "map", value_name = "FIELD=HEADER")]
        map: Vec<String>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Permanently delete a lead
    Purge {
        #[arg(long)]
        lead: Uuid,
    },
}

async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

fn resolve_session(engine: &LeadEngine, actor: Option<&str>) -> anyhow::Result<Session> {
    match actor {
        None => Ok(Session::system()),
        Some(email) => {
            let user = engine
                .store()
                .staff_by_email(email)
                .with_context(|| format!("no staff member with email {email}"))?;
            if !user.active {
                bail!("{} is inactive", user.name);
            }
            Ok(Session::for_user(user))
        }
    }
}

fn staff_id(engine: &LeadEngine, email: &str) -> anyhow::Result<Uuid> {
    engine
        .store()
        .staff_by_email(email)
        .map(|user| user.id)
        .with_context(|| format!("no staff member with email {email}"))
}

fn open_engine(state: &Path, config: Option<&Path>) -> anyhow::Result<LeadEngine> {
    let config = Config::load(config).context("failed to load configuration")?;
    let store = Store::open(state)
        .with_context(|| format!("failed to open state at {}", state.display()))?;
    Ok(LeadEngine::new(store, config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL").ok();

    if let Commands::InitDb = cli.command {
        let database_url = database_url
            .context("DATABASE_URL must be set to a production Postgres instance")?;
        let pool = connect(&database_url).await?;
        db::init_db(&pool).await?;
        println!("Schema ready.");
        return Ok(());
    }

    let mut engine = open_engine(&cli.state, cli.config.as_deref())?;
    if let Some(database_url) = database_url.as_deref() {
        let pool = connect(database_url).await?;
        let queue = SyncQueue::spawn(db::PgRemote::new(pool), SYNC_QUEUE_CAPACITY);
        engine = engine.with_sync(queue);
    }
    let session = resolve_session(&engine, cli.actor.as_deref())?;

    let outcome = run(&mut engine, &session, cli.command);

    if let Some(queue) = engine.take_sync() {
        queue.flush().await;
        if queue.failed() > 0 {
            eprintln!(
                "Replication: {} applied, {} dropped.",
                queue.applied(),
                queue.failed()
            );
        }
        queue.shutdown().await;
    }

    outcome
}

fn run(engine: &mut LeadEngine, session: &Session, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {}
        Commands::Seed => {
            let summary = seed::seed_demo(engine)?;
            println!(
                "Seeded {} programs, {} staff, {} leads.",
                summary.programs, summary.staff_added, summary.leads_added
            );
        }
        Commands::AddStaff { name, email, role } => {
            let role: Role = role.parse()?;
            let user = engine.add_staff(session, &name, &email, role)?;
            println!("Added {} ({}) as {}: {}", user.name, user.email, role.as_str(), user.id);
        }
        Commands::AddLead {
            name,
            email,
            phone,
            program,
            notes,
            channel,
            assign_to,
            merge,
            force,
        } => {
            let channel = channel.as_deref().map(str::parse::<EntryChannel>).transpose()?;
            let assigned_to = assign_to
                .as_deref()
                .map(|email| staff_id(engine, email))
                .transpose()?;
            let new = NewLead {
                name,
                email,
                phone,
                program_id: program,
                notes,
                channel,
                assigned_to,
            };
            let action = match (merge, force) {
                (Some(lead_id), _) => Some(DuplicateAction::Merge { lead_id }),
                (None, true) => Some(DuplicateAction::CreateAnyway),
                (None, false) => None,
            };

            match engine.intake(session, new, action)? {
                IntakeOutcome::Created(created) => {
                    let owner = match created.lead.assigned_to {
                        Some(id) => engine
                            .store()
                            .staff(id)
                            .map(|user| user.name.clone())
                            .unwrap_or_else(|| id.to_string()),
                        None => "the wait queue".to_string(),
                    };
                    println!("Created lead {} for {}.", created.lead.id, owner);
                }
                IntakeOutcome::Merged { lead } => {
                    println!(
                        "Merged into {} ({}), now interested in {} programs.",
                        lead.name,
                        lead.id,
                        lead.programs_of_interest.len()
                    );
                }
                IntakeOutcome::Duplicates { matches } => {
                    println!("Possible duplicates found; rerun with --merge <id> or --force:");
                    for found in matches.iter() {
                        let signals: Vec<String> = found
                            .signals
                            .iter()
                            .map(|signal| format!("{signal:?}").to_lowercase())
                            .collect();
                        println!(
                            "- {} ({}) score {} on {}",
                            found.name,
                            found.lead_id,
                            found.score,
                            signals.join(", ")
                        );
                    }
                }
                IntakeOutcome::Cancelled => println!("Nothing created."),
            }
        }
        Commands::Status {
            lead,
            to,
            exam_date,
            reason,
        } => {
            let status: LeadStatus = to.parse()?;
            let updated = engine.change_status(
                session,
                lead,
                StatusChange {
                    status: Some(status),
                    exam_date,
                    rejection_reason: reason,
                },
            )?;
            println!("{} is now {}.", updated.name, updated.status);
        }
        Commands::Interest {
            lead,
            program,
            confirm,
        } => {
            let updated = if confirm {
                engine.confirm_interest_contacted(session, lead)?
            } else {
                let program = program.context("--program is required")?;
                engine.change_interest(session, lead, &program)?
            };
            println!(
                "{} interested in {} (new interest pending: {}).",
                updated.name,
                engine.store().program_name(updated.program_id.as_deref()),
                updated.new_interest
            );
        }
        Commands::Assign { lead, to } => {
            let to = staff_id(engine, &to)?;
            let queued = engine.store().require_lead(lead)?.queued;
            let updated = if queued {
                engine.assign_from_queue(session, lead, to)?
            } else {
                engine.reassign(session, lead, to)?
            };
            let owner = engine
                .store()
                .staff(to)
                .map(|user| user.name.clone())
                .unwrap_or_else(|| to.to_string());
            println!("{} assigned to {}.", updated.name, owner);
        }
        Commands::Note { lead, text } => {
            let updated = engine.update_notes(session, lead, &text)?;
            println!("Notes saved for {}.", updated.name);
        }
        Commands::Schedule { lead, at } => {
            let updated = engine.schedule_next_contact(session, lead, at)?;
            println!(
                "Next contact with {} set for {}.",
                updated.name,
                at.format("%Y-%m-%d %H:%M")
            );
        }
        Commands::Contact {
            lead,
            channel,
            result,
        } => match result {
            Some(result) => {
                let settled = engine.record_contact_result(session, lead, &result)?;
                println!("Result logged; {} follow-up reminders settled.", settled.len());
            }
            None => {
                let channel: ContactChannel = channel.parse()?;
                let updated = engine.record_contact_attempt(session, lead, channel)?;
                println!("Contact attempt logged for {}.", updated.name);
            }
        },
        Commands::Attention { limit } => {
            let items =
                attention_for_session(engine.now(), engine.store(), session, &engine.config().tuning);
            if items.is_empty() {
                println!("No leads need attention right now.");
                return Ok(());
            }
            println!("Leads needing contact today:");
            for item in items.iter().take(limit) {
                println!(
                    "- {} ({}, {}) {:?}{} last touched {}",
                    item.name,
                    item.lead_id,
                    item.status,
                    item.reason,
                    if item.overdue { " OVERDUE" } else { "" },
                    item.last_touch.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Commands::Queue => {
            let store = engine.store();
            let entries = store.queue_ordered();
            if entries.is_empty() {
                println!("The wait queue is empty.");
                return Ok(());
            }
            println!(
                "{} leads waiting (oldest {} hours):",
                entries.len(),
                engine.oldest_queue_wait_hours().unwrap_or(0)
            );
            for entry in entries {
                let name = store
                    .lead(entry.lead_id)
                    .map(|lead| lead.name.as_str())
                    .unwrap_or("unknown lead");
                println!(
                    "- {} ({}) priority {} since {}",
                    name,
                    entry.lead_id,
                    entry.priority,
                    entry.enqueued_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Commands::DrainQueue => {
            let assigned = engine.drain_queue(session)?;
            println!(
                "Assigned {} leads; {} still waiting.",
                assigned.len(),
                engine.store().queue_len()
            );
        }
        Commands::Reminders { respond, outcome } => {
            if let (Some(reminder), Some(outcome)) = (respond, outcome) {
                let answered = engine.respond_reminder(session, reminder, &outcome)?;
                println!("Reminder {} closed: {}.", answered.id, outcome);
                return Ok(());
            }
            let user = if session.capabilities.can_view_all {
                None
            } else {
                session.user_id
            };
            let store = engine.store();
            let due = store.due_reminders(engine.now(), user);
            if due.is_empty() {
                println!("No reminders due.");
            }
            for reminder in due {
                let name = store
                    .lead(reminder.lead_id)
                    .map(|lead| lead.name.as_str())
                    .unwrap_or("unknown lead");
                println!(
                    "- [{}] {} for {}: {} ({})",
                    reminder.kind.as_str(),
                    reminder.id,
                    name,
                    reminder.description,
                    reminder.fire_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Commands::Sweep => {
            let flagged = engine.sweep_stalled_leads()?;
            println!("Flagged {} leads without progress.", flagged.len());
            for stalled in flagged.iter() {
                println!("- {} idle for {} days", stalled.name, stalled.idle_days);
            }
        }
        Commands::RefreshMetrics => {
            for user in engine.refresh_staff_metrics()? {
                match user.metrics {
                    Some(metrics) => println!(
                        "- {}: {} received, {} enrolled, conversion {:.0}%",
                        user.name,
                        metrics.leads_received,
                        metrics.leads_enrolled,
                        metrics.conversion_rate.unwrap_or(0.0) * 100.0
                    ),
                    None => println!("- {}: no leads in the last 30 days", user.name),
                }
            }
        }
        Commands::Migrate { from, to } => {
            let from = staff_id(engine, &from)?;
            let to = staff_id(engine, &to)?;
            let migrated = engine.migrate_leads(session, from, to)?;
            println!(
                "Moved {} leads ({} open).",
                migrated.lead_ids.len(),
                migrated.counts.total() - migrated.counts.enrolled - migrated.counts.rejected
            );
        }
        Commands::Reactivate { lead } => {
            let created = engine.reactivate(session, lead)?;
            println!("Reactivated as {}.", created.lead.id);
        }
        Commands::Import { csv, map } => {
            let text = std::fs::read_to_string(&csv)
                .with_context(|| format!("failed to read {}", csv.display()))?;
            let mut overrides = ColumnOverrides::default();
            for pair in map.iter() {
                overrides.set(pair)?;
            }
            let record = engine.import_csv_with(session, &text, &overrides)?;
            println!(
                "Imported {} of {} rows from {} ({} duplicates, {} errors).",
                record.imported,
                record.rows_processed,
                csv.display(),
                record.duplicates,
                record.errors
            );
            for message in record.error_preview.iter() {
                println!("- {message}");
            }
        }
        Commands::Report { out } => {
            session.require(session.capabilities.can_view_reports, "view reports")?;
            let attention =
                attention_for_session(engine.now(), engine.store(), session, &engine.config().tuning);
            let report = report::build_report(engine.store(), engine.now(), &attention);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Purge { lead } => {
            let removed = engine.purge_lead(session, lead)?;
            println!("Deleted {} and its history.", removed.name);
        }
    }

    Ok(())
}
