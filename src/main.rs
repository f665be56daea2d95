use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use convertd::analyzer::probe_subtitle_tracks;
use convertd::config::AppConfig;
use convertd::settings::EncodingSettings;
use convertd::store::TaskRecord;
use convertd::utils::{DependencyStatus, init_logging};
use convertd::{ConversionService, JobSubmission};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Media conversion task runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a conversion task for a file
    Submit {
        file: PathBuf,
        /// Encoding settings as JSON
        #[arg(long)]
        settings: Option<String>,
        /// External subtitle file to burn or mux
        #[arg(long)]
        subtitle: Option<PathBuf>,
        /// Owner token stored on the task
        #[arg(long)]
        owner: Option<String>,
        /// Run the conversion now and wait for it
        #[arg(long)]
        wait: bool,
    },
    /// Print a task record
    Status { id: String },
    /// List subtitle tracks of a file
    Probe { file: PathBuf },
    /// Delete artifacts of expired tasks once
    Sweep,
    /// Resume tasks left queued and run the cleanup scheduler until Ctrl-C
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => AppConfig::load(),
    };
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    let _log_guard = init_logging(&config.logging);

    let deps = DependencyStatus::check(&config.encoding);
    if !deps.ffmpeg {
        warn!("{} is not available; conversions will fail", config.encoding.ffmpeg);
    }
    if !deps.ffprobe {
        warn!("{} is not available; subtitle probing will report no streams", config.encoding.ffprobe);
    }

    let service = ConversionService::new(&config);
    service
        .initialize()
        .context("Failed to create storage directories")?;

    match args.command {
        Command::Submit {
            file,
            settings,
            subtitle,
            owner,
            wait,
        } => submit(&service, &file, settings, subtitle, owner, wait).await,
        Command::Status { id } => {
            let record = service.read_job(&id).await?;
            print_record(&record)
        }
        Command::Probe { file } => {
            let tracks = probe_subtitle_tracks(&config.encoding.ffprobe, &file).await?;
            if tracks.is_empty() {
                println!("No subtitle tracks in {}", file.display());
            }
            for track in tracks {
                println!("{}", track.display_name());
            }
            Ok(())
        }
        Command::Sweep => {
            let report = service.sweep().await;
            println!(
                "Scanned {}, expired {}, cleaned {}, errors {}",
                report.scanned, report.expired, report.cleaned, report.errors
            );
            Ok(())
        }
        Command::Serve => serve(&service).await,
    }
}

async fn submit(
    service: &ConversionService,
    file: &Path,
    settings: Option<String>,
    subtitle: Option<PathBuf>,
    owner: Option<String>,
    wait: bool,
) -> Result<()> {
    if !file.is_file() {
        bail!("Not a file: {}", file.display());
    }
    let settings: EncodingSettings = match settings {
        Some(json) => EncodingSettings::from_json(&json)?,
        None => EncodingSettings::default(),
    };
    let original_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    // The service takes ownership of staged files; hand it copies
    let (source, subtitle) = service
        .stage_copies(file, subtitle.as_deref())
        .await
        .with_context(|| format!("Failed to stage {}", file.display()))?;

    let record = service
        .create_job(JobSubmission {
            source,
            original_name,
            settings,
            owner_token: owner,
            subtitle,
        })
        .await?;
    println!("{}", record.id);

    if !wait {
        info!("Task {} queued; run `convertd serve` to process it", record.id);
        return Ok(());
    }

    service.submit(&record.id).await?;
    print_record(&service.read_job(&record.id).await?)
}

async fn serve(service: &ConversionService) -> Result<()> {
    let handles = service.recover().await?;
    info!("Resumed {} queued task(s)", handles.len());
    service.start_cleanup();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down ({:?})", service.queue_status());
    service.stop_cleanup().await;
    Ok(())
}

fn print_record(record: &TaskRecord) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}
