//! Modlink CLI binary.
//!
//! Hosts one mediated session between a front end and a back end.
//!
//! # Commands
//!
//! - `run` - Connect an interface to a model and relay until either side ends
//! - `list` - List registered and configured modules
//! - `check` - Print the compatibility verdict for a pairing

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use modlink::{
    config::LoggingConfig, negotiate, BackEnd, CompatibilityVerdict, Config, Controller, FrontEnd,
    ModuleRegistry, VERSION,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "modlink")]
#[command(version = VERSION)]
#[command(about = "Modlink - capability-negotiating relay between interfaces and models", long_about = None)]
struct Cli {
    /// Config file (default: the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect an interface to a model and relay messages
    Run {
        /// Interface (front end) id
        #[arg(short, long, default_value = "stdio")]
        interface: String,

        /// Model (back end) id
        #[arg(short, long, default_value = "echo")]
        model: String,

        /// Connect even when only partially compatible
        #[arg(short, long)]
        yes: bool,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// List available interfaces and models
    List,

    /// Check whether an interface and a model can be paired
    Check {
        /// Interface (front end) id
        #[arg(short, long)]
        interface: String,

        /// Model (back end) id
        #[arg(short, long)]
        model: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            interface,
            model,
            yes,
            verbose,
        } => cmd_run(config, &interface, &model, yes, verbose),

        Commands::List => cmd_list(&config),

        Commands::Check { interface, model } => cmd_check(&config, &interface, &model),
    }
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.is_json() {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn cmd_run(
    config: Config,
    interface: &str,
    model: &str,
    yes: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    init_tracing(&config.logging, verbose);

    let registry = ModuleRegistry::with_builtins();
    let front = registry.create_interface(interface)?;
    let back = registry.create_model(model)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run_session(config, front, back, yes));
    // A terminal read may still be parked on a blocking thread
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run_session(
    config: Config,
    front: Box<dyn FrontEnd>,
    back: Box<dyn BackEnd>,
    yes: bool,
) -> anyhow::Result<()> {
    let mut controller = Controller::new(config);
    let verdict = controller.connect(front, back).await?;

    if let CompatibilityVerdict::PartiallyCompatible(missing) = &verdict {
        if !yes {
            eprintln!(
                "Modules are only partially compatible (missing optional: {}).",
                missing.join(", ")
            );
            eprintln!("Re-run with --yes to connect anyway.");
            controller.close().await;
            anyhow::bail!("partial compatibility not confirmed");
        }
    }

    if let Err(e) = controller.start() {
        controller.close().await;
        return Err(e.into());
    }
    eprintln!("Connected ({verdict}). Type 'exit' or 'quit' to end the session.");

    tokio::select! {
        reason = controller.wait() => {
            if let Some(reason) = reason {
                info!(reason = %reason, "Session ended");
            }
        },
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Could not listen for Ctrl-C");
            }
            info!("Interrupted, closing session");
        },
    }
    controller.close().await;

    for outcome in controller.outcomes() {
        info!(
            direction = %outcome.direction,
            forwarded = outcome.stats.forwarded,
            passthrough = outcome.stats.passthrough,
            dropped = outcome.stats.dropped,
            transient_errors = outcome.stats.transient_errors,
            "Relay summary"
        );
    }
    Ok(())
}

fn cmd_list(config: &Config) -> anyhow::Result<()> {
    let registry = ModuleRegistry::with_builtins();

    println!("Interfaces:");
    for id in registry.interface_ids() {
        println!("  {id:<16} (built-in)");
    }
    for descriptor in &config.interfaces {
        println!(
            "  {:<16} {} - required: [{}] optional: [{}]",
            descriptor.id,
            descriptor.name,
            descriptor.required_capabilities.join(", "),
            descriptor.optional_capabilities.join(", ")
        );
    }

    println!();
    println!("Models:");
    for id in registry.model_ids() {
        println!("  {id:<16} (built-in)");
    }
    for descriptor in &config.models {
        let supported: Vec<&str> = descriptor
            .capabilities
            .iter()
            .filter(|(_, supported)| *supported)
            .map(|(name, _)| name)
            .collect();
        println!(
            "  {:<16} {} - supports: [{}]",
            descriptor.id,
            descriptor.name,
            supported.join(", ")
        );
    }
    Ok(())
}

fn cmd_check(config: &Config, interface: &str, model: &str) -> anyhow::Result<()> {
    let verdict = match (config.interface(interface), config.model(model)) {
        (Some(interface), Some(model)) => ModuleRegistry::check_descriptors(interface, model),
        _ => {
            let registry = ModuleRegistry::with_builtins();
            let mut front = registry.create_interface(interface)?;
            let back = registry.create_model(model)?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let requirements = runtime.block_on(front.capabilities());
            negotiate(requirements.as_ref(), &back.capabilities())
        },
    };

    println!("{interface} -> {model}: {verdict}");
    if !verdict.allows_mediation() {
        std::process::exit(1);
    }
    Ok(())
}
