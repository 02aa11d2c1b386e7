use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tessel_engine::{vm, Engine, HostApi, MemoryWorld, StartParams, TesselConfig};
use tessel_events::{spawn_consumer, LoggingConsumer};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use tessel_cli::console::{self, Command as ConsoleCommand, Reply};
use tessel_cli::logging::init_logging;
use tessel_cli::reload::setup_reload_signal;
use tessel_cli::scanner::{ScanResult, ScriptScanner};
use tessel_cli::sources::{DirectorySources, CONSOLE_OBJECT, CONSOLE_OWNER};

#[derive(Parser)]
#[command(name = "tessel", version, about = "Run and check tessel guest scripts")]
struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write logs under the data directory
    #[arg(long, global = true)]
    log_file: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a script and report errors and warnings
    Compile {
        path: PathBuf,

        /// Print the generated host module
        #[arg(long)]
        emit: bool,
    },
    /// Run scripts in a console object and read commands from stdin
    Run {
        files: Vec<PathBuf>,

        /// Directory of scripts to run; defaults to the configured script dir
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Pick up added, changed and removed scripts in the directory
        #[arg(long)]
        watch: bool,

        /// Restore saved script state where the source is unchanged
        #[arg(long)]
        restore: bool,
    },
    /// Print the effective configuration
    CheckConfig { path: Option<PathBuf> },
}

fn load_config(path: Option<&Path>) -> Result<TesselConfig> {
    let config = match path {
        Some(path) => TesselConfig::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TesselConfig::load_or_default()?,
    };
    Ok(config)
}

fn compile(path: &Path, emit: bool) -> Result<()> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let generated = match tessel_codegen::compile_source(&source, &HostApi::standard()) {
        Ok(generated) => generated,
        Err(e) => bail!("{}: {}", path.display(), e),
    };
    for warning in &generated.warnings {
        eprintln!("{}: {}", path.display(), warning);
    }
    vm::assemble(&generated.host_source, generated.positions.clone())
        .with_context(|| format!("{}: generated module did not assemble", path.display()))?;

    if emit {
        print!("{}", generated.host_source);
    } else {
        println!(
            "{}: ok ({} warning(s), {} continuation point(s))",
            path.display(),
            generated.warnings.len(),
            generated.continuation_points
        );
    }
    Ok(())
}

fn apply_changes(engine: &Engine, sources: &DirectorySources, changes: &ScanResult) {
    for path in &changes.changed {
        let item = sources.item_for(path);
        let result = sources
            .load(path)
            .and_then(|source| Ok(engine.update(item, &source.source)?));
        match result {
            Ok(()) => info!(target: "scripting", "Reloaded {}", path.display()),
            Err(e) => warn!(target: "scripting", "Reload of {} failed: {:#}", path.display(), e),
        }
    }
    for path in &changes.added {
        let result = sources
            .load(path)
            .and_then(|source| Ok(engine.start(source, StartParams::default())?));
        match result {
            Ok(item) => info!(target: "scripting", "Started {} as {}", path.display(), item),
            Err(e) => warn!(target: "scripting", "Start of {} failed: {:#}", path.display(), e),
        }
    }
    for path in &changes.removed {
        if engine.stop(sources.item_for(path)) {
            info!(target: "scripting", "Stopped {}", path.display());
        }
    }
}

async fn run(
    config: TesselConfig,
    files: Vec<PathBuf>,
    dir: Option<PathBuf>,
    watch: bool,
    restore: bool,
) -> Result<()> {
    let dir = dir.or_else(|| files.is_empty().then(|| config.scripting.script_dir()));
    let sources = Arc::new(DirectorySources::new(dir.clone(), files));

    let world = Arc::new(MemoryWorld::echoing());
    world.add_object(CONSOLE_OBJECT, "console", CONSOLE_OWNER);

    let engine = Arc::new(
        Engine::builder()
            .with_config(&config)
            .with_world(world)
            .with_sources(sources.clone())
            .build()?,
    );
    let _consumer = spawn_consumer(engine.notification_bus(), Box::new(LoggingConsumer));

    let params = StartParams {
        restore_state: restore,
        ..StartParams::default()
    };
    let mut started = 0;
    for path in sources.paths() {
        match sources
            .load(&path)
            .and_then(|source| Ok(engine.start(source, params.clone())?))
        {
            Ok(_) => started += 1,
            Err(e) => warn!(target: "scripting", "{}: {:#}", path.display(), e),
        }
    }
    info!(target: "scripting", "Started {} script(s); type 'help' for commands", started);

    let mut scanner = match &dir {
        Some(dir) if watch && config.scripting.hot_reload => Some(ScriptScanner::with_interval(
            dir.clone(),
            Duration::from_millis(config.scripting.hot_reload_interval_ms),
        )),
        _ => None,
    };
    let mut scan_tick = tokio::time::interval(
        scanner
            .as_ref()
            .map_or(Duration::from_secs(3600), |s| s.scan_interval()),
    );
    let mut reload_rx = setup_reload_signal();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut reload_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ConsoleCommand>() {
                    Ok(command) => match console::execute(&engine, &sources, command) {
                        Ok(Reply::Text(text)) => println!("{}", text),
                        Ok(Reply::Quit) => break,
                        Err(e) => eprintln!("error: {:#}", e),
                    },
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            _ = scan_tick.tick(), if scanner.is_some() => {
                if let Some(scanner) = scanner.as_mut() {
                    if scanner.should_scan() {
                        let changes = scanner.scan_changes();
                        if changes.has_changes() {
                            apply_changes(&engine, &sources, &changes);
                        }
                    }
                }
            }
            changed = reload_rx.changed(), if reload_open => {
                if changed.is_err() {
                    reload_open = false;
                    continue;
                }
                engine.restart_all();
            }
            _ = tokio::signal::ctrl_c() => {
                info!(target: "scripting", "Interrupted");
                break;
            }
        }
    }

    let shutdown = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || shutdown.shutdown()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let component = match &cli.command {
        Commands::Compile { .. } => "compile",
        Commands::Run { .. } => "run",
        Commands::CheckConfig { .. } => "check-config",
    };
    let _guard = init_logging(component, cli.log_file, cli.verbose)?;

    match cli.command {
        Commands::Compile { path, emit } => compile(&path, emit),
        Commands::Run {
            files,
            dir,
            watch,
            restore,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run(config, files, dir, watch, restore).await
        }
        Commands::CheckConfig { path } => {
            let config = load_config(path.as_deref().or(cli.config.as_deref()))?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
