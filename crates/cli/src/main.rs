use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trial_core::{
    CohortReport, CoreConfig, DashboardView, DocumentStore, ExportFormat, InMemoryStore,
    RecordView, outcomes,
};
use trial_types::{ClinicianId, PatientId};

#[derive(Parser)]
#[command(name = "trial")]
#[command(about = "Trial intake patient status CLI")]
struct Cli {
    /// Seed file for the in-memory store (defaults to TRIAL_SEED_FILE)
    #[arg(long, global = true)]
    seed: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List a clinician's patients with their workflow status
    List {
        /// Clinician id
        clinician: String,
    },
    /// Show one patient's status and, once completed, their outcomes
    Status {
        /// Clinician id
        clinician: String,
        /// Patient id
        patient: String,
    },
    /// Export a patient's case record form
    Export {
        /// Clinician id
        clinician: String,
        /// Patient id
        patient: String,
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Pdf)]
        format: Format,
        /// Output path (defaults to the suggested file name)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write the cohort CSV of a clinician's completed patients
    Report {
        /// Clinician id
        clinician: String,
        /// Output path (defaults to trial-data-<date>.csv)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Csv,
    Pdf,
}

impl From<Format> for ExportFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Csv => ExportFormat::Csv,
            Format::Pdf => ExportFormat::Pdf,
        }
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("trial=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("No command provided. Use --help for usage information.");
        return Ok(());
    };

    let config = Arc::new(CoreConfig::from_env_values(
        std::env::var("TRIAL_IN_FILTER_LIMIT").ok(),
        std::env::var("TRIAL_LOADING_TIMEOUT_MS").ok(),
        std::env::var("TRIAL_PAGE_SIZE").ok(),
        std::env::var("TRIAL_SEED_FILE").ok(),
    )?);

    let seed = cli
        .seed
        .or_else(|| config.seed_file().map(PathBuf::from))
        .context("no seed file: pass --seed or set TRIAL_SEED_FILE")?;
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::from_seed_file(&seed)?);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(command, store, config))
}

async fn run(
    command: Commands,
    store: Arc<dyn DocumentStore>,
    config: Arc<CoreConfig>,
) -> anyhow::Result<()> {
    match command {
        Commands::List { clinician } => {
            let handle = DashboardView::start(store, config, ClinicianId::new(&clinician)?).await;
            let state = handle.settled().await;
            if let Some(error) = &state.error {
                anyhow::bail!("failed to load patients: {error}");
            }

            if state.patients.is_empty() {
                println!("No patients found.");
                return Ok(());
            }
            for row in &state.patients {
                let status = row.status();
                println!(
                    "ID: {}, Code: {}, Status: {}, Next: {}",
                    row.patient.id, row.patient.patient_code, status.label, status.action
                );
            }
            let counts = state.counts();
            println!(
                "{} patients: {} awaiting baseline, {} awaiting follow-up, {} completed",
                counts.total, counts.awaiting, counts.in_progress, counts.completed
            );
            for kind in &state.degraded {
                println!("warning: {kind} status could not be checked and is shown as pending");
            }
        }
        Commands::Status { clinician, patient } => {
            let handle =
                RecordView::start(store, ClinicianId::new(&clinician)?, PatientId::new(&patient)?)
                    .await;
            let state = handle.settled().await;
            if let Some(error) = &state.error {
                anyhow::bail!("failed to load patient: {error}");
            }
            let record = state.record;
            let Some(found) = &record.patient else {
                anyhow::bail!("patient {patient} not found");
            };

            let status =
                trial_core::derive_status(record.baseline.is_some(), record.follow_up.is_some());
            println!("Patient: {} ({})", found.patient_code, found.id);
            println!("Status: {}", status.label);
            println!("Next: {}", status.action);

            if let (Some(baseline), Some(follow_up)) = (&record.baseline, &record.follow_up) {
                let outcomes =
                    outcomes::calculate(&baseline.measurements, &follow_up.measurements);
                for line in outcomes.summary() {
                    println!("  {line}");
                }
            }
        }
        Commands::Export {
            clinician,
            patient,
            format,
            out,
        } => {
            let handle =
                RecordView::start(store, ClinicianId::new(&clinician)?, PatientId::new(&patient)?)
                    .await;
            let state = handle.settled().await;
            if let Some(error) = &state.error {
                anyhow::bail!("failed to load patient: {error}");
            }

            let renderer = ExportFormat::from(format).renderer();
            let rendered = handle.export(renderer.as_ref()).await?;
            let path = out.unwrap_or_else(|| PathBuf::from(&rendered.file_name));
            std::fs::write(&path, &rendered.bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Exported {} ({} bytes)", path.display(), rendered.bytes.len());
        }
        Commands::Report { clinician, out } => {
            let report =
                CohortReport::for_clinician(store, config, ClinicianId::new(&clinician)?).await?;
            let path = out.unwrap_or_else(|| PathBuf::from(CohortReport::todays_file_name()));
            std::fs::write(&path, report.to_csv())
                .with_context(|| format!("failed to write {}", path.display()))?;

            println!("Wrote {} completed patients to {}", report.rows.len(), path.display());
            if report.skipped > 0 {
                println!("warning: {} completed patients had unreadable assessments", report.skipped);
            }
            for kind in &report.degraded {
                println!("warning: {kind} status could not be checked; completed patients may be missing");
            }
        }
    }

    Ok(())
}
