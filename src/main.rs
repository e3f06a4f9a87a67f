use planet_dumper::{
    cli::{Cli, Commands, CreateArgs, PgDumpArgs, RunArgs},
    config::{self, Config},
    notifications::{ActionTracker, DumpServerClient, HttpActionTracker},
    pipeline::{
        CommandBuilder, CreateRequest, PgDumpRequest, PipelineCoordinator, PublishTarget,
    },
    sequence::SequenceStateResolver,
    storage::{CannedAcl, ObjectStore, S3ObjectStore, UploadOptions},
    upstream::http_client,
};
use planet_dumper_common::{Error, ExitCode};
use planet_dumper_exec::{
    check_tools, ProcessRegistry, SystemProcessRunner, TerminationSignal, WorkspaceManager,
};

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

fn main() {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "planet_dumper=debug,planet_dumper_exec=debug,planet_dumper_common=debug".to_string()
        } else {
            "planet_dumper=info,planet_dumper_exec=info".to_string()
        }
    });

    // stdout carries the command's result only
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli) {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("planet-dumper: {e:#}");
            code
        }
    };

    std::process::exit(code.code());
}

fn run(cli: Cli) -> Result<()> {
    let config = config::load_config_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Create(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(create(config, args))
        }
        Commands::PgDump(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(pg_dump(config, args))
        }
        Commands::CheckTools => check_external_tools(&config),
    }
}

/// Typed pipeline errors keep their category, everything else is general.
fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    err.downcast_ref::<Error>()
        .map(Error::exit_code)
        .unwrap_or(ExitCode::GeneralError)
}

/// Pieces of a coordinator shared by every dumping command.
struct DumpContext {
    coordinator: PipelineCoordinator,
    registry: Arc<ProcessRegistry>,
}

async fn build_context(
    config: &Config,
    args: &RunArgs,
    store: Arc<dyn ObjectStore>,
) -> Result<DumpContext> {
    let http = http_client(&config.http_client);
    let registry = Arc::new(ProcessRegistry::new());
    let runner = Arc::new(SystemProcessRunner::new(Arc::clone(&registry)));

    let resolver = SequenceStateResolver::new(args.state_source.clone(), http.clone())
        .with_object_store(Arc::clone(&store));
    let workdir = args.workdir.clone().unwrap_or_else(|| config.workdir.clone());
    let workdir = shellexpand::tilde(&workdir.to_string_lossy()).into_owned();

    let upload = UploadOptions {
        acl: configured_acl(config)?,
        concurrency: config.s3.upload.concurrency,
        part_size: config.s3.upload.part_size_bytes,
    };

    let mut coordinator = PipelineCoordinator::new(
        resolver,
        WorkspaceManager::new(workdir),
        runner,
        Arc::new(CommandBuilder::from_config(config)),
    )
    .with_registry(Arc::clone(&registry))
    .with_object_store(store, upload, config.s3.upload.log_progress);

    let tracker_config = &config.action_tracker;
    if let (true, Some(endpoint)) = (tracker_config.enabled, tracker_config.endpoint.as_deref()) {
        let tracker: Arc<dyn ActionTracker> =
            Arc::new(HttpActionTracker::new(http, endpoint, tracker_config.service_id));
        coordinator = coordinator.with_action_tracker(tracker);
    }

    Ok(DumpContext { coordinator, registry })
}

fn configured_acl(config: &Config) -> Result<Option<CannedAcl>> {
    config
        .s3
        .acl
        .as_deref()
        .map(|acl| acl.parse::<CannedAcl>().map_err(Error::config))
        .transpose()
        .map_err(Into::into)
}

async fn s3_store(config: &Config, args: &RunArgs) -> Arc<dyn ObjectStore> {
    Arc::new(S3ObjectStore::from_config(&config.s3, args.s3_endpoint.as_deref()).await)
}

/// Forward SIGINT and SIGTERM to running children. A second signal exits
/// at once without waiting for the pipeline to unwind.
fn spawn_signal_handler(
    registry: Arc<ProcessRegistry>,
    force_kill_after: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut signals = match TerminationSignals::new() {
            Ok(signals) => signals,
            Err(e) => {
                tracing::warn!("Failed to listen for termination signals: {}", e);
                return;
            }
        };

        signals.recv().await;
        tracing::warn!("Received termination signal, stopping child processes");
        let report = registry.terminate_all(TerminationSignal::Interrupt, Some(force_kill_after));
        tracing::info!(
            "Signalled {} of {} child processes",
            report.signalled.len(),
            report.pre_termination.len()
        );

        signals.recv().await;
        tracing::warn!("Received second termination signal, exiting");
        std::process::exit(ExitCode::Terminated.code());
    })
}

/// SIGINT and SIGTERM, registered once so no signal is missed between waits.
#[cfg(unix)]
struct TerminationSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

#[cfg(not(unix))]
struct TerminationSignals;

#[cfg(not(unix))]
impl TerminationSignals {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

async fn create(config: Config, args: CreateArgs) -> Result<()> {
    let store = s3_store(&config, &args.run).await;
    let DumpContext { coordinator, registry } = build_context(&config, &args.run, store).await?;

    let coordinator = match args.dump_server_endpoint.as_deref() {
        Some(endpoint) => {
            let mut client = DumpServerClient::new(http_client(&config.http_client), endpoint);
            if let Some(token) = config.dump_server.token.bearer() {
                client = client.with_bearer_token(token);
            }
            for (name, value) in &args.dump_server_headers {
                client = client.with_header(name, value);
            }
            coordinator.with_dump_server(client)
        }
        None => coordinator,
    };

    let request = CreateRequest {
        output_format: args.run.output_format.clone(),
        cleanup_mode: args.run.cleanup_mode,
        resume: args.run.resume,
        collect_info: args.info,
        lock_bucket: args.run.lock_bucket.clone(),
        target: PublishTarget {
            bucket: args.s3_bucket_name.clone(),
            acl: args.s3_acl,
        },
        description: args.description.clone(),
    };

    let force_kill_after = Duration::from_millis(config.termination.force_kill_after_ms);
    let signals = spawn_signal_handler(registry, force_kill_after);
    let result = coordinator.create(&request).await;
    signals.abort();

    let outcome = result?;
    if let Some(metadata) = &outcome.metadata {
        println!("{}", serde_json::to_string(metadata)?);
    }
    Ok(())
}

async fn pg_dump(config: Config, args: PgDumpArgs) -> Result<()> {
    let store = s3_store(&config, &args.run).await;
    let DumpContext { coordinator, registry } = build_context(&config, &args.run, store).await?;

    let request = PgDumpRequest {
        output_format: args.run.output_format.clone(),
        cleanup_mode: args.run.cleanup_mode,
        resume: args.run.resume,
        lock_bucket: args.run.lock_bucket.clone(),
    };

    let force_kill_after = Duration::from_millis(config.termination.force_kill_after_ms);
    let signals = spawn_signal_handler(registry, force_kill_after);
    let result = coordinator.pg_dump(&request).await;
    signals.abort();

    let outcome = result?;
    println!("{}", outcome.artifact.display());
    Ok(())
}

fn check_external_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = check_tools(
        &config.pg_dump.executable,
        &config.planet_dump_ng.executable,
        &config.info.executable,
    );
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them before running a dump.");
    }

    Ok(())
}
