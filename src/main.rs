use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use student_roster_reconcile::config::PipelineConfig;
use student_roster_reconcile::models::Situation;
use student_roster_reconcile::pipeline::{self, UploadRequest};
use student_roster_reconcile::store::ResultStore;
use student_roster_reconcile::{db, export, report, validate};

#[derive(Parser)]
#[command(name = "roster-reconcile")]
#[command(about = "Reconcile enrollment, grade and progress exports into one student roster", long_about = None)]
struct Cli {
    /// Pipeline settings file (TOML)
    #[arg(long, global = true, env = "ROSTER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the roster schema
    InitDb,
    /// Reconcile the three uploaded exports
    Process {
        #[arg(long)]
        enrollments: PathBuf,
        #[arg(long)]
        grades: PathBuf,
        #[arg(long)]
        progress: PathBuf,
        /// Field delimiter; detected per file when omitted
        #[arg(long)]
        delimiter: Option<char>,
        #[arg(long)]
        passing_grade: Option<f64>,
        /// Write the workbook of valid students and rejected rows
        #[arg(long)]
        out: Option<PathBuf>,
        /// Leave the error sheets out of the workbook
        #[arg(long)]
        no_errors: bool,
        /// Write the preview document as JSON
        #[arg(long)]
        preview_json: Option<PathBuf>,
        /// Write a markdown summary
        #[arg(long)]
        report: Option<PathBuf>,
        /// Save valid students into the roster
        #[arg(long)]
        save: bool,
    },
    /// List roster students, optionally filtered by name or email
    Students {
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Edit one roster student
    Update {
        identity: String,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Birth date as dd/mm/yyyy or yyyy-mm-dd
        #[arg(long)]
        birth_date: Option<String>,
        #[arg(long)]
        grade: Option<f64>,
        #[arg(long)]
        progress: Option<f64>,
        #[arg(long)]
        situation: Option<Situation>,
    },
    /// Export roster students as a workbook
    Download {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the roster Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn read_upload(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn parse_date_arg(value: &str, config: &PipelineConfig) -> anyhow::Result<NaiveDate> {
    validate::parse_date(value.trim(), &config.date_formats)
        .with_context(|| format!("'{value}' does not match any accepted date format"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Process {
            enrollments,
            grades,
            progress,
            delimiter,
            passing_grade,
            out,
            no_errors,
            preview_json,
            report: report_path,
            save,
        } => {
            if delimiter.is_some() {
                config.delimiter = delimiter;
            }
            if let Some(passing_grade) = passing_grade {
                config.passing_grade = passing_grade;
            }
            config.validate()?;

            let upload = UploadRequest {
                enrollments: read_upload(&enrollments)?,
                grades: read_upload(&grades)?,
                progress: read_upload(&progress)?,
            };

            let store = ResultStore::new(config.result_ttl());
            let result = pipeline::process(&upload, &config)?;
            let id = Uuid::new_v4();
            store.put(id, result)?;
            info!(request = %id, "processing request stored");

            let request = store.get(id)?;
            let result = &request.result;

            println!("Request {id}");
            for summary in &result.summaries {
                println!(
                    "- {}: {} rows, {} accepted, {} rejected",
                    summary.source, summary.total, summary.accepted, summary.rejected
                );
            }
            println!("{} valid students.", result.valid_students.len());

            if let Some(path) = preview_json {
                let json = serde_json::to_vec_pretty(&request.preview())?;
                std::fs::write(&path, json)?;
                println!("Preview written to {}.", path.display());
            }

            if let Some(path) = out {
                let sheets = export::result_sheets(result, !no_errors);
                let bytes = export::write_workbook(&sheets)?;
                std::fs::write(&path, bytes)?;
                println!("Workbook written to {} ({}).", path.display(), export::SPREADSHEET_CONTENT_TYPE);
            }

            if let Some(path) = report_path {
                std::fs::write(&path, report::build_report(&request))?;
                println!("Report written to {}.", path.display());
            }

            if save {
                let pool = connect().await?;
                let summary = db::save_students(&pool, &result.valid_students).await?;
                for conflict in &summary.conflicts {
                    warn!(
                        identity = %conflict.identity,
                        email = %conflict.email,
                        existing = %conflict.existing_identity,
                        "email already used by another student"
                    );
                }
                println!(
                    "Roster saved: {} inserted, {} updated, {} email conflicts.",
                    summary.inserted,
                    summary.updated,
                    summary.conflicts.len()
                );
            }

            store.discard(id);
        }
        Commands::Students { search } => {
            let pool = connect().await?;
            let students = db::search_students(&pool, &search).await?;

            if students.is_empty() {
                println!("No students found.");
                return Ok(());
            }

            for student in &students {
                let grade = student.grade.map_or_else(|| "-".to_string(), |grade| format!("{grade:.1}"));
                let progress = student
                    .progress
                    .map_or_else(|| "-".to_string(), |progress| format!("{progress:.0}%"));
                println!(
                    "- {} {} <{}> grade {} progress {} ({})",
                    student.identity, student.full_name, student.email, grade, progress, student.situation
                );
            }
        }
        Commands::Update {
            identity,
            full_name,
            email,
            birth_date,
            grade,
            progress,
            situation,
        } => {
            let update = db::StudentUpdate {
                full_name,
                email,
                birth_date: birth_date
                    .as_deref()
                    .map(|value| parse_date_arg(value, &config))
                    .transpose()?,
                grade,
                progress,
                situation,
            };
            if update.is_empty() {
                anyhow::bail!("nothing to update for {identity}");
            }
            update.validate(&config)?;

            let pool = connect().await?;
            match db::update_student(&pool, &identity, &update, config.passing_grade).await? {
                Some(student) => println!("Updated {} ({}).", student.identity, student.situation),
                None => anyhow::bail!("student {identity} not found"),
            }
        }
        Commands::Download { search, out } => {
            let pool = connect().await?;
            let students = db::search_students(&pool, &search).await?;
            if students.is_empty() {
                anyhow::bail!("no students found for download");
            }

            let out = out.unwrap_or_else(|| {
                PathBuf::from(format!(
                    "registered_students_{}.xlsx",
                    chrono::Local::now().format("%d-%m-%Y")
                ))
            });
            let sheet = export::student_sheet("Registered Students", &students);
            std::fs::write(&out, export::write_workbook(&[sheet])?)?;
            println!("{} students written to {}.", students.len(), out.display());
        }
    }

    Ok(())
}
