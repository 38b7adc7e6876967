//! Filing Coordinator - Main Entry Point
//!
//! Runs a dispatcher or a processor instance, or issues operator commands
//! against a running dispatcher.

use clap::{Parser, Subcommand};
use filing_coordinator::config::CoordinatorConfig;
use filing_coordinator::dispatcher::{server as dispatcher_server, Dispatcher, DispatcherClient, HttpProcessorConnector};
use filing_coordinator::observability::{init_default_logging, Logger};
use filing_coordinator::processor::{
    initialize_rule_set, server as processor_server, MarketCatalog, ProcessorWorker,
    SummaryReportWriter,
};
use filing_coordinator::protocol::messages::{
    BatchDetailExportRequest, BatchExportRequest, MarketId, ReportFormat,
};
use filing_coordinator::rules::{DeclarativeRuleEngine, RulesRepository};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Dispatcher and processor workers for rule-driven filing processing
#[derive(Parser)]
#[command(name = "filing-coordinator")]
#[command(about = "Dispatcher and processor workers for rule-driven filing processing")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Dispatcher base URI for operator commands (defaults to the
    /// processor's dispatcher_url from the configuration)
    #[arg(long, env = "FILING_DISPATCHER_URL", value_name = "URI")]
    dispatcher: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatcher
    Dispatcher,
    /// Run a processor worker
    Processor {
        /// Stay registered on shutdown so owned markets survive a planned
        /// restart
        #[arg(long)]
        keep_registration: bool,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Rule set maintenance
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    /// Register a processor with the dispatcher
    Register {
        #[arg(long)]
        server_key: String,
        #[arg(long)]
        uri: String,
    },
    /// Remove a processor registration
    Unregister {
        #[arg(long)]
        server_key: String,
    },
    /// Assign a market to a processor
    Assign {
        #[arg(long)]
        server_key: String,
        #[arg(long)]
        market: MarketId,
    },
    /// List registered processors
    Processors {
        /// Only processors that own no market
        #[arg(long)]
        unassigned: bool,
    },
    /// Show which processor owns a market
    Owner {
        #[arg(long)]
        market: MarketId,
    },
    /// Ask a processor to load a taxonomy
    LoadTaxonomy {
        #[arg(long)]
        server_key: String,
        #[arg(long)]
        path: String,
    },
    /// Check that a processor can read and write a folder
    FolderAccess {
        #[arg(long)]
        server_key: String,
        #[arg(long)]
        path: String,
    },
    /// Export the report for one batch detail
    ExportDetail {
        #[arg(long)]
        market: MarketId,
        #[arg(long)]
        batch_detail: i64,
        #[arg(long, default_value_t = 0)]
        doc_id: i64,
        #[arg(long, default_value = "en")]
        lang: String,
        #[arg(long, default_value = "html")]
        format: ReportFormat,
        /// Overwrite an existing report
        #[arg(long)]
        replace: bool,
    },
    /// Export the reports for every filing of a batch
    ExportBatch {
        #[arg(long)]
        market: MarketId,
        #[arg(long)]
        batch: i64,
        #[arg(long, default_value = "en")]
        lang: String,
        #[arg(long, default_value = "html")]
        format: ReportFormat,
        #[arg(long)]
        replace: bool,
    },
}

#[derive(Subcommand)]
enum RulesCommand {
    /// Load the rule manifest, or scan the rule directory and save one
    Init,
    /// Rescan the rule directory and overwrite the manifest
    Rescan,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!(
        "Starting filing coordinator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let result = match cli.command {
        Commands::Dispatcher => match load_configuration(&cli.config) {
            Ok(config) => run_dispatcher(config).await,
            Err(e) => Err(e),
        },
        Commands::Processor { keep_registration } => match load_configuration(&cli.config) {
            Ok(config) => run_processor(config, keep_registration).await,
            Err(e) => Err(e),
        },
        Commands::Config { show } => match load_configuration(&cli.config) {
            Ok(config) => handle_config_command(config, show),
            Err(e) => Err(e),
        },
        Commands::Rules { command } => match load_configuration(&cli.config) {
            Ok(config) => handle_rules_command(config, command),
            Err(e) => Err(e),
        },
        command => match operator_client(&cli.config, cli.dispatcher) {
            Ok(client) => handle_operator_command(client, command).await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> CliResult<CoordinatorConfig> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(CoordinatorConfig::load_from_file(path)?)
        }
        None => {
            // Try default locations
            let default_paths = ["coordinator.toml", "config/coordinator.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(CoordinatorConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create coordinator.toml".into())
        }
    }
}

fn logger(config: &CoordinatorConfig, component: &str) -> Logger {
    Logger::new(component, config.logging.excluded_categories.clone())
}

async fn run_dispatcher(config: CoordinatorConfig) -> CliResult<()> {
    let section = config.require_dispatcher()?.clone();
    let connector = Arc::new(HttpProcessorConnector::new(
        section.request_timeout(),
        section.retry_attempts,
    ));
    let dispatcher = Arc::new(Dispatcher::new(connector, logger(&config, "dispatcher")));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(dispatcher_server::serve(
        dispatcher,
        section.bind_address,
        shutdown_signal(shutdown_rx),
    ));

    wait_for_termination().await?;
    info!("Dispatcher shutdown initiated");
    let _ = shutdown_tx.send(true);
    server.await??;
    Ok(())
}

async fn run_processor(config: CoordinatorConfig, keep_registration: bool) -> CliResult<()> {
    let section = config.require_processor()?.clone();
    let log = logger(&config, "processor");

    let mut rules = RulesRepository::new(
        section.rules.name.clone(),
        section.rules.directory.clone(),
        Arc::new(DeclarativeRuleEngine::new()),
        log.for_component("rules"),
    );
    let rule_count = initialize_rule_set(&mut rules)?;
    info!(rule_set = %section.rules.name, rules = rule_count, "Rule set loaded");

    let database = Arc::new(MarketCatalog::from_config(&section.markets));
    let worker = Arc::new(ProcessorWorker::new(
        &section,
        rules,
        database,
        Arc::new(SummaryReportWriter),
        log,
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(processor_server::serve(
        worker.clone(),
        section.bind_address,
        shutdown_signal(shutdown_rx.clone()),
    ));

    let dispatcher = DispatcherClient::new(
        section.dispatcher_url.clone(),
        section.request_timeout(),
        2,
    );
    dispatcher
        .register_processor(&section.public_uri, &section.server_key)
        .await?;
    info!(server_key = %section.server_key, dispatcher = %section.dispatcher_url, "Registered with dispatcher");

    // A re-registration keeps the markets this key owned before a restart.
    for market_id in dispatcher.get_processor_markets(&section.server_key).await? {
        if let Err(e) = worker.assign_market_to_processor(market_id).await {
            warn!(market_id, error = %e, "Could not restore market");
        }
    }

    let poller = tokio::spawn(worker.clone().run(shutdown_rx));

    wait_for_termination().await?;
    info!("Processor shutdown initiated");

    if section.should_unregister_on_shutdown(keep_registration) {
        if let Err(e) = dispatcher.unregister_processor(&section.server_key).await {
            warn!(error = %e, "Could not unregister from dispatcher");
        }
    } else {
        info!(server_key = %section.server_key, "Keeping dispatcher registration and markets");
    }
    let _ = shutdown_tx.send(true);
    poller.await?;
    server.await??;
    Ok(())
}

/// Resolves once the shutdown flag flips or its sender is dropped
async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

async fn wait_for_termination() -> CliResult<()> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    Ok(())
}

fn handle_config_command(config: CoordinatorConfig, show: bool) -> CliResult<()> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

fn handle_rules_command(config: CoordinatorConfig, command: RulesCommand) -> CliResult<()> {
    let section = config.require_processor()?;
    let mut rules = RulesRepository::new(
        section.rules.name.clone(),
        section.rules.directory.clone(),
        Arc::new(DeclarativeRuleEngine::new()),
        logger(&config, "rules"),
    );

    let count = match command {
        RulesCommand::Init => initialize_rule_set(&mut rules)?,
        RulesCommand::Rescan => {
            let count = rules.try_load_new_rules_list()?;
            rules.try_save_rules_list()?;
            count
        }
    };

    println!("{} rules in {}", count, rules.manifest_path().display());
    for rule in rules.rules() {
        println!(
            "  {:<32} required={:<5} enabled={}",
            rule.friendly_name, rule.is_required, rule.enabled
        );
    }
    Ok(())
}

fn operator_client(
    config_path: &Option<PathBuf>,
    dispatcher: Option<String>,
) -> CliResult<DispatcherClient> {
    let (base_uri, timeout) = match dispatcher {
        Some(uri) => (uri, Duration::from_secs(10)),
        None => {
            let config = load_configuration(config_path)?;
            let section = config.require_processor()?;
            (section.dispatcher_url.clone(), section.request_timeout())
        }
    };
    Ok(DispatcherClient::new(base_uri, timeout, 2))
}

async fn handle_operator_command(client: DispatcherClient, command: Commands) -> CliResult<()> {
    match command {
        Commands::Register { server_key, uri } => {
            client.register_processor(&uri, &server_key).await?;
            println!("Registered {server_key} at {uri}");
        }
        Commands::Unregister { server_key } => {
            let orphaned = client.unregister_processor(&server_key).await?;
            println!("Unregistered {server_key}; unassigned markets: {orphaned:?}");
        }
        Commands::Assign { server_key, market } => {
            client.assign_market(&server_key, market).await?;
            println!("Market {market} assigned to {server_key}");
        }
        Commands::Processors { unassigned } => {
            let processors = if unassigned {
                client.get_unassigned_processors().await?
            } else {
                client.get_processors().await?
            };
            for processor in processors {
                println!(
                    "{:<24} {:<32} markets={:?}",
                    processor.server_key, processor.uri, processor.markets
                );
            }
        }
        Commands::Owner { market } => match client.get_processor(market).await? {
            Some(server_key) => println!("Market {market} is owned by {server_key}"),
            None => println!("Market {market} is not assigned"),
        },
        Commands::LoadTaxonomy { server_key, path } => {
            client.load_taxonomy(&server_key, &path).await?;
            println!("{server_key} loaded {path}");
        }
        Commands::FolderAccess { server_key, path } => {
            client.can_processor_access_folder(&server_key, &path).await?;
            println!("{server_key} can access {path}");
        }
        Commands::ExportDetail {
            market,
            batch_detail,
            doc_id,
            lang,
            format,
            replace,
        } => {
            let request = BatchDetailExportRequest {
                market_id: market,
                batch_detail_id: batch_detail,
                doc_id,
                lang,
                format,
                replace,
            };
            println!("{}", client.create_batch_detail_export_file(&request).await?);
        }
        Commands::ExportBatch {
            market,
            batch,
            lang,
            format,
            replace,
        } => {
            let request = BatchExportRequest {
                market_id: market,
                batch_id: batch,
                lang,
                format,
                replace,
            };
            for path in client.create_batch_export_files(&request).await? {
                println!("{path}");
            }
        }
        Commands::Dispatcher
        | Commands::Processor { .. }
        | Commands::Config { .. }
        | Commands::Rules { .. } => {
            return Err("not an operator command".into());
        }
    }
    Ok(())
}
