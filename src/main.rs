use anyhow::Result;
use chatboot::services::{Collaborators, ProcessEnv};
use chatboot::{BootOrchestrator, StartupConfig};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "chatboot")]
#[command(about = "Deterministic startup orchestrator for the chat and agent backend")]
#[command(version)]
#[command(long_about = "Brings up the database, cache, credentials, LLM providers, WebSocket \
pipeline and agent supervisor in dependency order with timeouts, retries and circuit \
breakers, validates the assembled service end to end, and only then reports ready.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "chatboot.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - start everything, then shut down immediately
    #[arg(long, help = "Run the full startup sequence, then shut down without serving")]
    dry_run: bool,

    /// Print the status snapshot as JSON once startup finished
    #[arg(long, help = "Print component status as JSON after startup")]
    status_json: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting chatboot v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match StartupConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let services = Collaborators::local(Arc::new(ProcessEnv), &config);
    let orchestrator = BootOrchestrator::new(config, services);

    let started = orchestrator.start().await;

    if args.status_json {
        println!("{}", serde_json::to_string_pretty(&orchestrator.handle().report())?);
    }

    if let Err(e) = started {
        error!("{}", e);
        eprintln!("✗ {}", e);
        orchestrator.shutdown().await;
        std::process::exit(1);
    }

    if args.dry_run {
        info!("Dry run mode - startup succeeded, shutting down");
        let exit_code = orchestrator.shutdown().await;
        println!("✓ Dry run completed successfully - all phases passed");
        std::process::exit(exit_code);
    }

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("chatboot exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chatboot={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# chatboot configuration file");
    println!("# Every value can be overridden with CHATBOOT_<SECTION>__<KEY>");
    println!();
    println!("{}", StartupConfig::default().to_toml()?);
    Ok(())
}
