//! IoRelay CLI - Command-line interface
//!
//! Runs the relay against a serial controller and exposes the routing
//! engine, checksum and address tools for scripting.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use iorelay_core::cli::{
    format_error, format_frame, format_readings, hex_string, parse_hex, print_exit_codes,
    CliResult, ExitCodes, HexLines, OutputFormat,
};
use iorelay_core::config::{AppConfig, ConfigError, LoggingSettings};
use iorelay_core::core::protocol::checksum::append_crc16;
use iorelay_core::core::protocol::{crc16, resolve, AddressError, CrcOrder, FrameError};
use iorelay_core::core::relay::{RelayError, RelayEvent, RelaySession};
use iorelay_core::core::routing::{RoutingEngine, RoutingError, RoutingFileError, RoutingTable};
use iorelay_core::core::signals::{SignalConfig, SignalConfigError, SignalMonitor};
use iorelay_core::core::transport::{list_ports, SerialTransport, TransportError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// IoRelay CLI
#[derive(Parser, Debug)]
#[command(
    name = "iorelay",
    version,
    about = "I/O bit routing relay for serial I/O controllers",
    long_about = None
)]
struct Cli {
    /// Output format (hex, json)
    #[arg(short, long, global = true, default_value = "hex")]
    format: OutputFormat,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true, env = "IORELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Relay between a serial controller and the routing table
    Run(RunArgs),

    /// Route hex status frames from arguments or stdin
    Convert {
        /// Status frames as hex (reads stdin lines when absent)
        frames: Vec<String>,

        /// Routing table file
        #[arg(short, long)]
        routing: Option<PathBuf>,

        /// Checksum byte order (high, low)
        #[arg(long)]
        crc_order: Option<CrcOrder>,
    },

    /// Compute the CRC-16 of hex data
    Crc {
        /// Data as hex
        #[arg(required = true)]
        data: Vec<String>,

        /// Byte order of the appended checksum (high, low)
        #[arg(long)]
        crc_order: Option<CrcOrder>,
    },

    /// Resolve input addresses such as I3.5 or I71
    Resolve {
        /// Addresses
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Evaluate the signal monitor against a status frame
    Signals {
        /// Status frame as hex
        frame: String,

        /// Signal configuration file (native or legacy JSON)
        #[arg(short, long)]
        signals: Option<PathBuf>,
    },

    /// Routing table management
    Routing {
        /// Routing table file
        #[arg(short, long)]
        routing: Option<PathBuf>,

        #[command(subcommand)]
        action: RoutingAction,
    },

    /// Print the exit code table
    ExitCodes,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Serial port name (e.g., COM3, /dev/ttyUSB0)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Routing table file
    #[arg(short, long)]
    routing: Option<PathBuf>,

    /// Signal configuration file
    #[arg(short, long)]
    signals: Option<PathBuf>,

    /// Resend the latest control frame every N ms
    #[arg(long)]
    repeat_ms: Option<u64>,

    /// Route frames without answering them
    #[arg(long)]
    no_auto_respond: bool,

    /// Checksum byte order (high, low)
    #[arg(long)]
    crc_order: Option<CrcOrder>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum RoutingAction {
    /// Write an identity table with every bit disabled
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show the table
    Show {
        /// Include disabled entries
        #[arg(short, long)]
        all: bool,
    },
    /// Change one entry
    Set {
        /// Input bit (0..191)
        input: usize,

        /// Output bit (0..191)
        #[arg(short, long)]
        output: Option<usize>,

        /// Enable the entry
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Disable the entry
        #[arg(long)]
        disable: bool,

        /// Latch mode (true, false)
        #[arg(long)]
        latch: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    let _guard = match init_logging(&cli, &app_config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(ExitCodes::ERROR);
        }
    };

    let result = match execute(&cli, &app_config).await {
        Ok(result) => result,
        Err(e) => classify(&e),
    };

    if let Some(msg) = result.message() {
        if result.is_success() {
            if !cli.quiet {
                eprintln!("{msg}");
            }
        } else {
            eprintln!("Error: {msg}");
        }
    }
    result.to_exit_code()
}

fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
}

fn init_logging(cli: &Cli, settings: &LoggingSettings) -> anyhow::Result<Option<WorkerGuard>> {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => settings.level.as_str(),
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let log_file = cli
        .log_file
        .clone()
        .or_else(|| settings.directory.as_ref().map(|d| d.join("iorelay.log")));

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .with_context(|| format!("Invalid log file path: {}", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Could not create log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

/// Map an error chain onto an exit code
fn classify(err: &anyhow::Error) -> CliResult {
    let code = if let Some(e) = err.downcast_ref::<TransportError>() {
        ExitCodes::for_transport(e)
    } else if let Some(e) = err.downcast_ref::<RelayError>() {
        ExitCodes::for_relay(e)
    } else if let Some(e) = err.downcast_ref::<RoutingFileError>() {
        ExitCodes::for_routing_file(e)
    } else if let Some(e) = err.downcast_ref::<SignalConfigError>() {
        ExitCodes::for_signal_config(e)
    } else if err.downcast_ref::<RoutingError>().is_some() {
        ExitCodes::VALIDATION_FAILED
    } else if err.downcast_ref::<FrameError>().is_some() {
        ExitCodes::PROTOCOL_ERROR
    } else if err.downcast_ref::<AddressError>().is_some()
        || err.downcast_ref::<hex::FromHexError>().is_some()
    {
        ExitCodes::INVALID_ARGS
    } else if let Some(e) = err.downcast_ref::<std::io::Error>() {
        ExitCodes::for_io(e)
    } else {
        ExitCodes::ERROR
    };
    CliResult::error(code, format!("{err:#}"))
}

async fn execute(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::ListPorts { detailed } => cmd_list_ports(cli, *detailed),
        Commands::Run(args) => cmd_run(cli, config, args).await,
        Commands::Convert {
            frames,
            routing,
            crc_order,
        } => {
            let order = crc_order.unwrap_or(config.relay.crc_order);
            let table = load_table(routing.clone().or_else(|| config.routing_path()).as_deref())?;
            cmd_convert(cli, RoutingEngine::new(table).with_crc_order(order), frames)
        }
        Commands::Crc { data, crc_order } => {
            cmd_crc(cli, &data.join(" "), crc_order.unwrap_or(config.relay.crc_order))
        }
        Commands::Resolve { addresses } => cmd_resolve(cli, addresses),
        Commands::Signals { frame, signals } => {
            cmd_signals(cli, frame, signals.clone().or_else(|| config.signals_path()).as_deref())
        }
        Commands::Routing { routing, action } => {
            let path = routing
                .clone()
                .or_else(|| config.routing_path())
                .context("No routing file given and no config directory available")?;
            cmd_routing(cli, &path, action)
        }
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
    }
}

/// Load a routing table, falling back to the all-disabled table when absent
fn load_table(path: Option<&Path>) -> anyhow::Result<RoutingTable> {
    match path {
        Some(path) if path.exists() => Ok(RoutingTable::load(path)?),
        Some(path) => {
            tracing::warn!("No routing table at {}, all bits disabled", path.display());
            Ok(RoutingTable::new())
        }
        None => Ok(RoutingTable::new()),
    }
}

fn load_signals(path: Option<&Path>) -> anyhow::Result<SignalConfig> {
    match path {
        Some(path) if path.exists() => Ok(SignalConfig::load(path)?),
        _ => Ok(SignalConfig::default()),
    }
}

// ============ Commands ============

fn cmd_list_ports(cli: &Cli, detailed: bool) -> anyhow::Result<CliResult> {
    let ports = list_ports()?;

    if ports.is_empty() {
        return Ok(CliResult::success_with_message("No serial ports found."));
    }

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Hex => {
            for port in &ports {
                if detailed {
                    println!("{} [{:?}]", port.port_name, port.port_type);
                } else {
                    println!("{}", port.port_name);
                }
            }
        }
    }

    Ok(CliResult::success())
}

async fn cmd_run(cli: &Cli, config: &AppConfig, args: &RunArgs) -> anyhow::Result<CliResult> {
    let mut serial = config.serial.clone();
    if let Some(port) = &args.port {
        serial.port.clone_from(port);
    }
    if let Some(baud) = args.baud {
        serial.baud_rate = baud;
    }

    let mut relay = config.relay.clone();
    if args.repeat_ms.is_some() {
        relay.repeat_interval_ms = args.repeat_ms;
    }
    if args.no_auto_respond {
        relay.auto_respond = false;
    }
    if let Some(order) = args.crc_order {
        relay.crc_order = order;
    }

    let table = load_table(args.routing.clone().or_else(|| config.routing_path()).as_deref())?;
    let monitor = SignalMonitor::new(&load_signals(
        args.signals.clone().or_else(|| config.signals_path()).as_deref(),
    )?);
    let engine = RoutingEngine::new(table).with_crc_order(relay.crc_order);

    let session = RelaySession::start(
        Box::new(SerialTransport::new(serial)),
        engine,
        relay.relay_config(),
    )
    .await?;
    let mut events = session.subscribe();

    if !cli.quiet {
        eprintln!("Relaying. Press Ctrl+C to exit.");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut selection: Vec<Option<String>> = Vec::new();
    let mut lost = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break;
            }
            () = &mut deadline => break,
            event = events.recv() => match event {
                Ok(RelayEvent::FrameRouted { inbound, outbound }) => {
                    if !cli.quiet {
                        println!("{}", format_frame(&outbound, relay.crc_order, cli.format));
                    }
                    let readings = monitor.evaluate(inbound.as_bytes());
                    let current: Vec<Option<String>> =
                        readings.iter().map(|g| g.selected.clone()).collect();
                    if current != selection {
                        let summary = format_readings(&readings, OutputFormat::Hex);
                        tracing::info!("{}", summary.replace('\n', "; "));
                        selection = current;
                    }
                }
                Ok(RelayEvent::TransportError(e)) => tracing::warn!("Transport: {}", e),
                Ok(RelayEvent::Stopped) | Err(RecvError::Closed) => {
                    lost = true;
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!("Dropped {} relay events", n),
            }
        }
    }

    let snapshot = session.snapshot();
    let stats = session.shutdown().await;
    let summary = format!(
        "{} frames routed, {} responses, {} bytes discarded ({} in / {} out)",
        snapshot.frames_routed,
        snapshot.responses_sent,
        snapshot.bytes_discarded,
        stats.bytes_received,
        stats.bytes_sent
    );

    if lost {
        Ok(CliResult::error(
            ExitCodes::CONNECTION_FAILED,
            format!("Connection lost after {summary}"),
        ))
    } else {
        Ok(CliResult::success_with_message(summary))
    }
}

fn cmd_convert(
    cli: &Cli,
    mut engine: RoutingEngine,
    frames: &[String],
) -> anyhow::Result<CliResult> {
    let order = engine.crc_order();
    let mut failures = 0usize;

    let mut route = |line: usize, text: &str| {
        let routed = parse_hex(text)
            .map_err(|e| e.to_string())
            .and_then(|raw| engine.process_bytes(&raw).map_err(|e| e.to_string()));
        match routed {
            Ok(outbound) => println!("{}", format_frame(&outbound, order, cli.format)),
            Err(e) => {
                failures += 1;
                println!("{}", format_error(line, &e, cli.format));
            }
        }
    };

    if frames.is_empty() {
        for line in HexLines::new(std::io::stdin().lock()) {
            let (line_no, text) = line?;
            route(line_no, &text);
        }
    } else {
        for (i, text) in frames.iter().enumerate() {
            route(i + 1, text);
        }
    }

    if failures > 0 {
        Ok(CliResult::error(
            ExitCodes::PROTOCOL_ERROR,
            format!("{failures} frame(s) rejected"),
        ))
    } else {
        Ok(CliResult::success())
    }
}

fn cmd_crc(cli: &Cli, data: &str, order: CrcOrder) -> anyhow::Result<CliResult> {
    let mut bytes = parse_hex(data)?;
    let crc = crc16(&bytes);
    append_crc16(&mut bytes, order);

    match cli.format {
        OutputFormat::Hex => println!("0x{:04X}  {}", crc, hex_string(&bytes)),
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "crc": format!("0x{crc:04X}"), "framed": hex_string(&bytes) })
        ),
    }
    Ok(CliResult::success())
}

fn cmd_resolve(cli: &Cli, addresses: &[String]) -> anyhow::Result<CliResult> {
    for text in addresses {
        let address = resolve(text)?;
        match cli.format {
            OutputFormat::Hex => println!(
                "{} -> byte {} bit {} (flat {}, mask 0x{:02X})",
                text.trim(),
                address.byte_index,
                address.bit_index,
                address.flat().map_or_else(|| "-".to_string(), |n| n.to_string()),
                address.mask()
            ),
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({
                    "address": text.trim(),
                    "byte": address.byte_index,
                    "bit": address.bit_index,
                    "flat": address.flat(),
                })
            ),
        }
    }
    Ok(CliResult::success())
}

fn cmd_signals(cli: &Cli, frame: &str, path: Option<&Path>) -> anyhow::Result<CliResult> {
    let raw = parse_hex(frame)?;
    let monitor = SignalMonitor::new(&load_signals(path)?);
    println!("{}", format_readings(&monitor.evaluate(&raw), cli.format));
    Ok(CliResult::success())
}

fn cmd_routing(cli: &Cli, path: &Path, action: &RoutingAction) -> anyhow::Result<CliResult> {
    match action {
        RoutingAction::Init { force } => {
            if path.exists() && !force {
                return Ok(CliResult::error(
                    ExitCodes::ERROR,
                    format!("{} exists, use --force to overwrite", path.display()),
                ));
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            RoutingTable::new().save(path)?;
            Ok(CliResult::success_with_message(format!("Wrote {}", path.display())))
        }
        RoutingAction::Show { all } => {
            let table = load_table(Some(path))?;
            match cli.format {
                OutputFormat::Json => println!("{}", table.to_json()?),
                OutputFormat::Hex => {
                    for entry in table.entries().iter().filter(|e| *all || e.enabled) {
                        println!(
                            "{:>3} -> {:>3}{}{}",
                            entry.input_bit,
                            entry.output_bit,
                            if entry.enabled { "" } else { "  (disabled)" },
                            if entry.latch { "  latch" } else { "" }
                        );
                    }
                }
            }
            Ok(CliResult::success())
        }
        RoutingAction::Set {
            input,
            output,
            enable,
            disable,
            latch,
        } => {
            let mut table = load_table(Some(path))?;
            if let Some(output) = output {
                table.set_output(*input, *output)?;
            }
            if *enable || *disable {
                table.set_enabled(*input, *enable)?;
            }
            if let Some(latch) = latch {
                table.set_latch(*input, *latch)?;
            }
            table.save(path)?;
            let entry = table.entry(*input)?;
            Ok(CliResult::success_with_message(format!(
                "{} -> {} enabled={} latch={}",
                entry.input_bit, entry.output_bit, entry.enabled, entry.latch
            )))
        }
    }
}
