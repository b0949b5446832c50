use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use diarserve::config::{EngineArgs, ServeArgs, StoreBackend, CONFIG};
use diarserve::engine::{CommandDiarizer, SerializedEngine};
use diarserve::processor::{Pipeline, Runner, WorkerPool};
use diarserve::recovery::recover_all;
use diarserve::validate::{validate, Verdict};
use diarserve::web::{start_web_server, AppState};
use diarserve::{DataDir, FileJobStore, JobStore, MemoryJobStore};

#[derive(Parser, Debug)]
#[command(version, about = "Speaker diarization job service")]
struct Cli {
    /// Log every processing step.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept uploads over HTTP and process them in the background.
    Serve(ServeArgs),
    /// Diarize one file and write `<stem>.csv` next to it.
    Process(ProcessArgs),
}

#[derive(Args, Debug)]
struct ProcessArgs {
    file: PathBuf,

    #[command(flatten)]
    engine: EngineArgs,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn engine(args: &EngineArgs) -> SerializedEngine {
    SerializedEngine::new(Arc::new(CommandDiarizer::new(
        args.engine.clone(),
        args.engine_args.clone(),
    )))
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let data_dir = DataDir::new(&args.data_dir);
    data_dir
        .create_all()
        .with_context(|| format!("Failed to prepare data directory {}", args.data_dir.display()))?;

    let store: Arc<dyn JobStore> = match args.store {
        StoreBackend::File => Arc::new(FileJobStore::open(data_dir.clone())?),
        StoreBackend::Memory => {
            warn!("in-memory job store: job state is lost on restart");
            Arc::new(MemoryJobStore::new())
        }
    };

    let runner = Runner::new(Pipeline::new(engine(&args.engine)), store.clone(), data_dir.clone());
    let pool = WorkerPool::start(Arc::new(runner), args.workers, args.queue_capacity)?;
    info!(
        "Started {} workers, queue capacity {}",
        args.workers.max(1),
        args.queue_capacity.max(1)
    );

    recover_all(&data_dir, &store, &pool.dispatcher(), &CONFIG.requirements).context("Recovery scan failed")?;

    let state = AppState {
        store,
        dispatcher: pool.dispatcher(),
        data_dir,
        requirements: CONFIG.requirements,
    };

    start_web_server(state, args.bind_address()).await?;

    info!("Web server stopped, unfinished jobs resume on next start");
    Ok(())
}

fn process(args: ProcessArgs) -> anyhow::Result<()> {
    if !args.file.exists() {
        anyhow::bail!("The file at the specified path does not exist.");
    }

    let verdict = Verdict::from(&validate(&args.file, &CONFIG.requirements));
    if !verdict.accepted {
        anyhow::bail!("{}: {}", args.file.display(), verdict.reason);
    }
    info!("{}: {}", args.file.display(), verdict.reason);

    let result_path = args.file.with_extension("csv");
    let analysis = Pipeline::new(engine(&args.engine)).analyze(&args.file, &result_path)?;

    println!("{}", result_path.display());
    println!("{} speakers", analysis.speaker_count);
    Ok(())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Process(args) => process(args),
    }
}
