use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use recordlink_core::{
    CoreConfig, IssuedToken, PatientSummaryFields, RecordSummary, ScanReport, SharingService,
};
use recordlink_types::NonEmptyText;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "recordlink")]
#[command(about = "Share patient records through scannable access tokens")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file and print its reference
    Store {
        /// File to store
        path: PathBuf,
    },
    /// Issue a link token over stored files
    IssueLink {
        /// File references (hashes printed by `store`)
        #[arg(required = true)]
        references: Vec<String>,
        #[arg(long)]
        patient_id: String,
        /// Lifetime in seconds (defaults to RECORDLINK_LINK_TTL_SECS)
        #[arg(long)]
        ttl: Option<u64>,
        /// Write the QR code PNG here (a directory gets the suggested filename)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Issue a data token embedding record summaries
    IssueData {
        #[arg(long)]
        patient_id: String,
        #[arg(long, default_value = "")]
        patient_name: String,
        /// JSON file holding an array of records
        #[arg(long)]
        records: PathBuf,
        /// Lifetime in seconds (the token never expires when omitted)
        #[arg(long)]
        ttl: Option<u64>,
        /// Write the QR code PNG here (a directory gets the suggested filename)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Issue a patient summary token
    IssueSummary {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// Date of birth (YYYY-MM-DD)
        #[arg(long)]
        dob: Option<String>,
        #[arg(long)]
        blood_type: Option<String>,
        /// Repeat for each allergy
        #[arg(long = "allergy")]
        allergies: Vec<String>,
        #[arg(long)]
        emergency_contact: Option<String>,
        /// Repeat for each diagnosis
        #[arg(long = "diagnosis")]
        diagnoses: Vec<String>,
        /// Repeat for each medication
        #[arg(long = "medication")]
        medications: Vec<String>,
        /// Write the QR code PNG here (a directory gets the suggested filename)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Decode scanned text and report what it is
    Decode {
        /// Text read from the code
        text: String,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("recordlink=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Decoding needs no configuration, so it works without a signing key.
    let service = || -> anyhow::Result<SharingService> {
        let cfg = CoreConfig::from_lookup(|name| std::env::var(name).ok())?;
        Ok(SharingService::new(cfg)?)
    };

    match cli.command {
        Commands::Store { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let metadata = service()?.store_file(name, &bytes)?;
            println!("Stored {} as {}", metadata.original_filename, metadata.hash);
        }
        Commands::IssueLink {
            references,
            patient_id,
            ttl,
            out,
        } => {
            let service = service()?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let issued = runtime.block_on(service.issue_link(&references, &patient_id, ttl))?;
            finish(&service, &issued, out.as_deref())?;
        }
        Commands::IssueData {
            patient_id,
            patient_name,
            records,
            ttl,
            out,
        } => {
            let records = read_records(&records)?;
            let service = service()?;
            let issued = service.issue_data(&patient_id, &patient_name, records, ttl)?;
            finish(&service, &issued, out.as_deref())?;
        }
        Commands::IssueSummary {
            id,
            name,
            dob,
            blood_type,
            allergies,
            emergency_contact,
            diagnoses,
            medications,
            out,
        } => {
            let patient = PatientSummaryFields {
                id: NonEmptyText::new(&id).context("--id cannot be empty")?,
                name,
                date_of_birth: dob,
                blood_type,
                allergies,
                emergency_contact,
                recent_diagnoses: diagnoses,
                current_medications: medications,
            };
            let service = service()?;
            let issued = service.issue_summary(patient)?;
            finish(&service, &issued, out.as_deref())?;
        }
        Commands::Decode { text } => {
            let report = recordlink_core::inspect(&text, Utc::now());
            println!("{}", serde_json::to_string_pretty(&report_json(report))?);
        }
    }

    Ok(())
}

fn read_records(path: &Path) -> anyhow::Result<Vec<RecordSummary>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid records in {}", path.display()))
}

/// Writes the PNG when `out` is given, then prints the issued token.
fn finish(
    service: &SharingService,
    issued: &IssuedToken,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let image = match out {
        Some(out) => {
            let path = png_path(out, issued);
            let png = service.render_png(issued)?;
            std::fs::write(&path, png)
                .with_context(|| format!("failed to write {}", path.display()))?;
            Some(path)
        }
        None => None,
    };
    println!("{}", serde_json::to_string_pretty(&issued_json(issued, image.as_deref()))?);
    Ok(())
}

fn png_path(out: &Path, issued: &IssuedToken) -> PathBuf {
    if out.is_dir() {
        out.join(issued.filename())
    } else {
        out.to_path_buf()
    }
}

fn issued_json(issued: &IssuedToken, image: Option<&Path>) -> serde_json::Value {
    json!({
        "token": issued.token,
        "scanText": issued.scan_text,
        "filename": issued.filename(),
        "image": image.map(|p| p.display().to_string()),
        "render": issued.render,
        "payload": issued.payload,
    })
}

fn report_json(report: ScanReport) -> serde_json::Value {
    match report {
        ScanReport::Valid { payload, encoding } => {
            json!({ "status": "valid", "encoding": encoding, "payload": payload })
        }
        ScanReport::Expired {
            payload,
            expired_at,
        } => json!({ "status": "expired", "expiredAt": expired_at, "payload": payload }),
        ScanReport::Unrecognized { reason } => {
            json!({ "status": "unrecognized", "reason": reason.to_string() })
        }
        ScanReport::Unreadable => json!({ "status": "unreadable" }),
    }
}
