use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use companion_store::config::AppConfig;
use companion_store::logging::{init_from_config, OperationTimer};
use companion_store::models::{Contact, NewMedicationSchedule};
use companion_store::validation::InputValidator;
use companion_store::{CompanionServices, StoreError, SyncError};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file; defaults to config/default, config/local and companion.*
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage contacts
    Contacts {
        #[command(subcommand)]
        action: ContactAction,
    },
    /// Manage medication schedules
    Medications {
        #[command(subcommand)]
        action: MedicationAction,
    },
    /// Show or update the daily routine
    Routines {
        #[command(subcommand)]
        action: RoutineAction,
    },
    /// Privacy settings and retention
    Privacy {
        #[command(subcommand)]
        action: PrivacyAction,
    },
    /// Stored crash reports
    Crashes {
        #[command(subcommand)]
        action: CrashAction,
    },
    /// Push pending changes to the backend
    Sync {
        /// Simulate lost connectivity; changes stay queued
        #[arg(long)]
        offline: bool,
    },
    /// Rewrite legacy community records
    Migrate,
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ContactAction {
    /// List contacts
    List {
        /// Only emergency contacts
        #[arg(long)]
        emergency: bool,
    },
    /// Add a contact
    Add {
        /// Display name
        #[arg(short, long)]
        name: String,

        /// Phone number
        #[arg(short, long)]
        phone: Option<String>,

        /// Email address
        #[arg(short, long)]
        email: Option<String>,

        /// Relationship, e.g. "Daughter"
        #[arg(short, long)]
        relationship: Option<String>,

        /// Mark as an emergency contact
        #[arg(long)]
        emergency: bool,
    },
}

#[derive(Subcommand)]
enum MedicationAction {
    /// List schedules
    List {
        #[arg(short, long, default_value = "local")]
        user: String,
    },
    /// Add a schedule
    Add {
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Medication name
        #[arg(short, long)]
        name: String,

        /// Dose, e.g. "10mg"
        #[arg(short, long)]
        dosage: String,

        /// Free-form frequency
        #[arg(short, long, default_value = "daily")]
        frequency: String,

        /// Reminder times as HH:MM, repeatable
        #[arg(short, long = "time", required = true)]
        times: Vec<String>,
    },
    /// Show duplicate groups without changing anything
    Duplicates {
        #[arg(short, long, default_value = "local")]
        user: String,
    },
    /// Remove duplicate schedules, keeping the newest of each name
    Dedup {
        #[arg(short, long, default_value = "local")]
        user: String,
    },
}

#[derive(Subcommand)]
enum RoutineAction {
    /// List routine items
    List,
    /// Mark a routine item done
    Complete {
        /// Routine item id
        id: String,

        /// Mark as not done instead
        #[arg(long)]
        undo: bool,
    },
}

#[derive(Subcommand)]
enum PrivacyAction {
    /// Prune logs and reports past the retention window
    Cleanup,
    /// Set the retention window in days
    Retention {
        /// Days to keep logs and reports
        days: u32,
    },
}

#[derive(Subcommand)]
enum CrashAction {
    /// List stored reports
    List {
        /// Only emergency-related reports
        #[arg(long)]
        emergency: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
}

/// Write `value` to stdout as pretty JSON
fn emit<T: Serialize>(value: &T) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value).context("Failed to write output")?;
    writeln!(out)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    // Initialize logging; the guard flushes the log file on exit
    let _log_guard = init_from_config(&config.logging)?;

    info!("Starting companion-store");

    if let Commands::Config { action: ConfigAction::Show } = &cli.command {
        std::io::stdout().lock().write_all(config.to_yaml()?.as_bytes())?;
        return Ok(());
    }

    let services = CompanionServices::open(config).context("Failed to open companion store")?;

    match cli.command {
        Commands::Contacts { action } => run_contacts(&services, action).await?,
        Commands::Medications { action } => run_medications(&services, action).await?,
        Commands::Routines { action } => run_routines(&services, action).await?,
        Commands::Privacy { action } => run_privacy(&services, action).await?,
        Commands::Crashes { action } => run_crashes(&services, action).await?,
        Commands::Sync { offline } => run_sync(&services, offline).await?,
        Commands::Migrate => {
            let report = services.migrate().await.context("Migration failed")?;
            info!(
                records = report.records_found,
                legacy = report.legacy_records,
                skipped = report.skipped,
                rewritten = report.rewritten,
                "Migration finished"
            );
        },
        Commands::Config { .. } => {},
    }

    Ok(())
}

async fn run_contacts(services: &CompanionServices, action: ContactAction) -> Result<()> {
    match action {
        ContactAction::List { emergency } => {
            let contacts = if emergency {
                services.communication.emergency_contacts().await?
            } else {
                services.communication.contacts().await?
            };
            info!("Found {} contacts", contacts.len());
            emit(&contacts)
        },
        ContactAction::Add {
            name,
            phone,
            email,
            relationship,
            emergency,
        } => {
            let mut contact = Contact::new(InputValidator::sanitize_input(&name));
            contact.phone = phone;
            contact.email = email;
            contact.relationship = relationship;
            contact.is_emergency_contact = emergency;

            let saved = services
                .communication
                .save_contact(contact)
                .await
                .context("Failed to save contact")?;
            info!(id = %saved.id, "Contact saved");
            emit(&saved)
        },
    }
}

async fn run_medications(services: &CompanionServices, action: MedicationAction) -> Result<()> {
    match action {
        MedicationAction::List { user } => emit(&services.get_medication_schedules(&user).await?),
        MedicationAction::Add {
            user,
            name,
            dosage,
            frequency,
            times,
        } => {
            let created = services
                .create_medication_schedule(NewMedicationSchedule {
                    user_id: user,
                    medication_name: name,
                    dosage,
                    frequency,
                    times,
                    instructions: None,
                })
                .await
                .context("Failed to create medication schedule")?;
            emit(&created)
        },
        MedicationAction::Duplicates { user } => {
            let summary = services.deduplicator.duplicate_summary(&user).await?;
            info!(
                "{} schedules, {} would be removed",
                summary.total_medications,
                summary.duplicate_count()
            );
            emit(&summary)
        },
        MedicationAction::Dedup { user } => {
            let summary = services.cleanup_duplicate_medications(&user).await?;
            if summary.failed_removals > 0 {
                warn!("{} duplicates could not be removed", summary.failed_removals);
            }
            emit(&summary)
        },
    }
}

async fn run_routines(services: &CompanionServices, action: RoutineAction) -> Result<()> {
    match action {
        RoutineAction::List => emit(&services.routines.routines().await?),
        RoutineAction::Complete { id, undo } => {
            let routine = services
                .routines
                .set_routine_completed(&id, !undo)
                .await
                .with_context(|| format!("Failed to update routine {id}"))?;
            emit(&routine)
        },
    }
}

async fn run_privacy(services: &CompanionServices, action: PrivacyAction) -> Result<()> {
    match action {
        PrivacyAction::Cleanup => {
            let report = services.cleanup_old_data().await?;
            info!(
                audit = report.audit_entries_removed,
                crashes = report.crash_reports_removed,
                medication_logs = report.medication_logs_removed,
                "Removed {} expired entries",
                report.total()
            );
            Ok(())
        },
        PrivacyAction::Retention { days } => emit(&services.privacy.set_retention_days(days).await?),
    }
}

async fn run_crashes(services: &CompanionServices, action: CrashAction) -> Result<()> {
    match action {
        CrashAction::List { emergency } => {
            let reports = if emergency {
                services.crash_reports.emergency_reports().await?
            } else {
                services.crash_reports.reports().await?
            };
            emit(&reports)
        },
    }
}

async fn run_sync(services: &CompanionServices, offline: bool) -> Result<()> {
    let timer = OperationTimer::new("sync");

    if offline {
        services.sync.set_online(false).await?;
    }

    match services.sync.sync_all().await {
        Ok(report) => info!("Pushed {} aggregates", report.pushed.len()),
        Err(StoreError::Sync(SyncError::Offline)) => {
            let pending = services.pending_changes().await?;
            warn!("Offline, {} aggregates stay queued: {:?}", pending.len(), pending);
        },
        Err(e) => return Err(e).context("Sync failed"),
    }

    let status = services.sync.status().await?;
    info!(
        state = %status.state,
        pending = status.pending.len(),
        last_sync = ?status.last_sync_time,
        "Sync status"
    );
    timer.finish();
    Ok(())
}
