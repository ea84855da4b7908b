pub mod shutdown;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, level_filters::LevelFilter};

use crate::{
    capture::{GenericScreenshotProvider, ScreenshotProvider},
    fs::{BaseDirectory, LocalFileSystem},
    scheduler::{
        pipeline::{CapturePipeline, StorageConfig, TickOutcome},
        CaptureScheduler, FirstTick, SchedulerConfig, DEFAULT_CAPTURE_INTERVAL,
    },
    utils::{
        clock::{Clock, DefaultClock},
        dir::{create_application_default_path, APPLICATION_DIR_NAME},
        logging::{enable_logging, LOG_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "trackono", version, long_about = None)]
#[command(about = "Periodically captures the screen into a local folder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Mirror logs to the console")]
    log: bool,
    /// Overrides RUST_LOG. Defaults to trace when --log is passed.
    #[arg(long = "log-filter")]
    log_filter: Option<LevelFilter>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Capture the first display every interval until interrupted")]
    Serve {
        #[arg(
            long = "interval-ms",
            default_value_t = DEFAULT_CAPTURE_INTERVAL.as_millis() as u64,
            value_parser = clap::value_parser!(u64).range(1..),
            help = "Pause between the end of one capture and the start of the next"
        )]
        interval_ms: u64,
        #[arg(long, help = "Take the first capture right away instead of after one interval")]
        immediate: bool,
        #[command(flatten)]
        storage: StorageArgs,
    },
    #[command(about = "Capture the first display once")]
    Capture {
        #[command(flatten)]
        storage: StorageArgs,
    },
    #[command(about = "List displays that can be captured")]
    Targets {
        #[arg(long, help = "Print as json")]
        json: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BaseArg {
    Document,
    Picture,
    AppData,
    AppLocalData,
}

#[derive(clap::Args, Debug)]
struct StorageArgs {
    #[arg(long, value_enum, default_value_t = BaseArg::Picture)]
    base: BaseArg,
    #[arg(long, help = "Use this directory as the base instead of --base")]
    dir: Option<PathBuf>,
    #[arg(
        long,
        help = "Directory under the base that receives the captures. Defaults to trackono/screenshots"
    )]
    subdir: Option<PathBuf>,
    #[arg(long, default_value = "png")]
    ext: String,
}

impl From<StorageArgs> for StorageConfig {
    fn from(args: StorageArgs) -> Self {
        let base = match (args.dir, args.base) {
            (Some(dir), _) => BaseDirectory::Custom(dir),
            (None, BaseArg::Document) => BaseDirectory::Document,
            (None, BaseArg::Picture) => BaseDirectory::Picture,
            (None, BaseArg::AppData) => BaseDirectory::AppData,
            (None, BaseArg::AppLocalData) => BaseDirectory::AppLocalData,
        };
        StorageConfig {
            base,
            subdirectory: args
                .subdir
                .unwrap_or_else(|| PathBuf::from(APPLICATION_DIR_NAME).join("screenshots")),
            extension: args.ext,
        }
    }
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    let logging_level = cli
        .log_filter
        .or_else(|| cli.log.then_some(LevelFilter::TRACE));
    let app_dir = create_application_default_path()?;
    enable_logging(LOG_PREFIX, &app_dir, logging_level, cli.log)?;

    match cli.commands {
        Commands::Serve {
            interval_ms,
            immediate,
            storage,
        } => {
            let first_tick = if immediate {
                FirstTick::Immediate
            } else {
                FirstTick::AfterInterval
            };
            serve(Duration::from_millis(interval_ms), first_tick, storage.into()).await
        }
        Commands::Capture { storage } => capture(storage.into()).await,
        Commands::Targets { json } => print_targets(json).await,
    }
}

fn create_pipeline(storage: StorageConfig, clock: Arc<dyn Clock>) -> Result<CapturePipeline> {
    storage.validate()?;
    let provider = GenericScreenshotProvider::new()?;
    Ok(CapturePipeline::new(
        Arc::new(provider),
        Arc::new(LocalFileSystem::new()),
        clock,
        storage,
    ))
}

async fn serve(interval: Duration, first_tick: FirstTick, storage: StorageConfig) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let pipeline = create_pipeline(storage, clock.clone())?;
    let scheduler = CaptureScheduler::new(Arc::new(pipeline), clock, SchedulerConfig { first_tick });

    scheduler.start(interval)?;
    println!("Capturing every {interval:?}, press Ctrl-C to stop");

    shutdown::detect_shutdown().await?;
    info!("Shutdown requested");
    scheduler.shutdown().await?;
    println!("Stopped");
    Ok(())
}

async fn capture(storage: StorageConfig) -> Result<()> {
    let pipeline = create_pipeline(storage, Arc::new(DefaultClock))?;
    match pipeline.capture_once().await? {
        TickOutcome::Persisted(path) => {
            let base = pipeline.storage().base.resolve()?;
            println!("{}", base.join(path).display());
        }
        TickOutcome::NoTargets => println!("No displays available to capture"),
    }
    Ok(())
}

async fn print_targets(json: bool) -> Result<()> {
    let targets = GenericScreenshotProvider::new()?.list_targets().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&targets)?);
        return Ok(());
    }

    for (index, target) in targets.iter().enumerate() {
        let name = target.name.as_deref().unwrap_or("-");
        let primary = if target.primary { " (primary)" } else { "" };
        match target.bounds {
            Some(b) => println!(
                "{index}: {} {name} {}x{} at {},{}{primary}",
                target.id, b.width, b.height, b.x, b.y
            ),
            None => println!("{index}: {} {name}{primary}", target.id),
        }
    }
    Ok(())
}
