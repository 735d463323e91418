//! Trigger Router CLI
//!
//! Runs the trigger classification pipeline and offers a few offline tools on
//! top of the can-signal-decoder library:
//! - `run`: worker pools and scheduled tasks until Ctrl-C
//! - `scan`: print the per-timestamp table of selected signals
//! - `parse`: decode a whole capture as JSON
//! - `inspect`: summarize a DBC file
//! - `enqueue`: push trigger records into the default queue

use anyhow::{bail, Context, Result};
use can_signal_decoder::{Decoder, DecoderConfig};
use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trigger_router::config::{load_config, StorageBackend};
use trigger_router::{app, Shutdown, TriggerRecord};

/// Trigger Router - classify vehicle trigger records by CAN signal thresholds
#[derive(Parser, Debug)]
#[command(name = "trigger-router")]
#[command(about = "Route vehicle trigger records through CAN-based classification queues", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker pools and scheduled tasks until interrupted
    Run {
        /// Path to configuration file (config.toml)
        #[arg(short, long, value_name = "FILE", default_value = "configs/config.toml")]
        config: PathBuf,
    },

    /// Scan a capture log for selected signals
    Scan {
        #[command(flatten)]
        dbc: DbcArg,

        /// Capture log to scan
        #[arg(short, long, value_name = "FILE")]
        log: PathBuf,

        /// Signal to extract (can be repeated)
        #[arg(short, long = "signal", value_name = "NAME", required = true)]
        signals: Vec<String>,
    },

    /// Decode every frame of a capture file and print JSON
    Parse {
        #[command(flatten)]
        dbc: DbcArg,

        /// Capture file (.bin for binary records, anything else for a text log)
        #[arg(long, value_name = "FILE")]
        capture: PathBuf,

        #[arg(long, default_value = "")]
        vehicle_id: String,

        #[arg(long, default_value = "")]
        vehicle_type: String,

        /// Only keep frames from these buses (can be repeated)
        #[arg(long, value_name = "BUS")]
        bus: Vec<String>,

        /// Only keep these CAN IDs, hex with or without 0x (can be repeated)
        #[arg(long = "message-id", value_name = "ID")]
        message_ids: Vec<String>,

        /// Output file (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Summarize the messages and signals of a DBC file
    Inspect {
        #[command(flatten)]
        dbc: DbcArg,
    },

    /// Push trigger records (JSON array or one object per line) into the default queue
    Enqueue {
        #[arg(short, long, value_name = "FILE", default_value = "configs/config.toml")]
        config: PathBuf,

        /// File with trigger records
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Target queue (default: the configured default queue)
        #[arg(long)]
        queue: Option<String>,
    },
}

#[derive(Args, Debug)]
struct DbcArg {
    /// Path to DBC file
    #[arg(short, long, value_name = "FILE")]
    dbc: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);
    log::debug!("Trigger Router v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using decoder library v{}", can_signal_decoder::VERSION);

    match cli.command {
        Command::Run { config } => run(&config).await,
        Command::Scan { dbc, log, signals } => scan(&dbc.dbc, &log, &signals),
        Command::Parse {
            dbc,
            capture,
            vehicle_id,
            vehicle_type,
            bus,
            message_ids,
            output,
        } => {
            let filter = decoder_filter(bus, &message_ids)?;
            parse(&dbc.dbc, &capture, &vehicle_id, &vehicle_type, &filter, output.as_deref())
        }
        Command::Inspect { dbc } => inspect(&dbc.dbc),
        Command::Enqueue {
            config,
            input,
            queue,
        } => enqueue(&config, &input, queue).await,
    }
}

async fn run(config_path: &Path) -> Result<()> {
    log::info!("Loading configuration from: {:?}", config_path);
    let config = load_config(config_path)?;

    let decoder = Decoder::from_dbc(&config.decoder.dbc_path)
        .with_context(|| format!("Failed to load DBC {:?}", config.decoder.dbc_path))?;
    let stats = decoder.stats();
    log::info!(
        "Signal dictionary: {} messages, {} signals",
        stats.num_messages,
        stats.num_signals
    );

    let shutdown = Shutdown::new();
    let storage = app::open_storage(&config.storage).await?;
    let ctx = Arc::new(app::context(&config, &storage, shutdown.signal()));
    let source = app::can_file_source(&config)?;

    let pipeline = app::build_pipeline(&config, ctx.clone(), Arc::new(decoder), source)?;
    let mut tasks = app::build_tasks(&config, ctx)?;

    let running = pipeline.start();
    let (started, last_err) = tasks.start_all();
    if let Some(e) = last_err {
        log::warn!("Started {} tasks; last failure: {:#}", started, e);
    }
    log::info!("Running {} workers; press Ctrl-C to stop", running.worker_count());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    log::info!("Shutdown requested");

    shutdown.trigger();
    let clean = running.join().await;
    tasks.stop_all().await;

    if !clean {
        log::warn!("Some workers did not stop within the grace period");
    }
    log::info!("Stopped");
    Ok(())
}

fn scan(dbc_path: &Path, log_path: &Path, signals: &[String]) -> Result<()> {
    let decoder = Decoder::from_dbc(dbc_path)?;
    let table = decoder
        .scan_log(log_path, signals)
        .with_context(|| format!("Failed to scan {:?}", log_path))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write!(out, "timestamp")?;
    for signal in signals {
        write!(out, "\t{}", signal)?;
    }
    writeln!(out)?;

    for (timestamp, values) in table.rows() {
        write!(out, "{}", timestamp)?;
        for signal in signals {
            match values.get(signal) {
                Some(value) => write!(out, "\t{}", value)?,
                None => write!(out, "\t-")?,
            }
        }
        writeln!(out)?;
    }

    log::info!("{} timestamps", table.len());
    Ok(())
}

fn decoder_filter(buses: Vec<String>, message_ids: &[String]) -> Result<DecoderConfig> {
    let mut config = DecoderConfig::default();
    if !buses.is_empty() {
        config = config.with_bus_filter(buses);
    }
    if !message_ids.is_empty() {
        let ids = message_ids
            .iter()
            .map(|id| {
                let digits = id.trim_start_matches("0x").trim_start_matches("0X");
                u32::from_str_radix(digits, 16).with_context(|| format!("Invalid CAN ID '{}'", id))
            })
            .collect::<Result<Vec<_>>>()?;
        config = config.with_message_filter(ids);
    }
    Ok(config)
}

fn parse(
    dbc_path: &Path,
    capture: &Path,
    vehicle_id: &str,
    vehicle_type: &str,
    filter: &DecoderConfig,
    output: Option<&Path>,
) -> Result<()> {
    let decoder = Decoder::from_dbc(dbc_path)?;
    let records = decoder
        .parse_capture_with(capture, vehicle_id, vehicle_type, filter)
        .with_context(|| format!("Failed to parse capture {:?}", capture))?;
    log::info!("Decoded {} frames from {:?}", records.len(), capture);

    match output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {:?}", path))?;
            serde_json::to_writer_pretty(io::BufWriter::new(file), &records)?;
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            serde_json::to_writer_pretty(&mut out, &records)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn inspect(dbc_path: &Path) -> Result<()> {
    let decoder = Decoder::from_dbc(dbc_path)?;
    let database = decoder.database();
    let stats = decoder.stats();

    println!("{:?}", dbc_path);
    println!("  Messages: {}", stats.num_messages);
    println!("  Signals:  {}", stats.num_signals);

    for id in database.all_can_ids() {
        let Some(message) = database.get_message(id) else {
            continue;
        };
        println!(
            "\n0x{:03X} {} (dlc {}, sender {})",
            message.id, message.name, message.dlc, message.sender
        );
        for signal in &message.signals {
            println!(
                "  {:<24} {:>2}|{:<2} {:?} {:?} ({}, {}) {}",
                signal.name,
                signal.start_bit,
                signal.length,
                signal.byte_order,
                signal.value_type,
                signal.factor,
                signal.offset,
                signal.unit
            );
        }
    }
    Ok(())
}

async fn enqueue(config_path: &Path, input: &Path, queue: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    if config.storage.backend != StorageBackend::Sqlite {
        bail!("enqueue needs a persistent store; set [storage] backend = \"sqlite\"");
    }

    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {:?}", input))?;
    let records = parse_records(&content)
        .with_context(|| format!("Failed to parse trigger records in {:?}", input))?;

    let shutdown = Shutdown::new();
    let storage = app::open_storage(&config.storage).await?;
    let ctx = app::context(&config, &storage, shutdown.signal());
    let queue = queue.unwrap_or_else(|| config.queues.default.clone());

    let mut queued = 0;
    for mut record in records {
        let transition = ctx.advance(&mut record, &queue).await?;
        transition.log_audit(&record);
        queued += 1;
    }
    log::info!("Queued {} records on {}", queued, queue);
    Ok(())
}

/// A JSON array, or one JSON object per non-empty line
fn parse_records(content: &str) -> Result<Vec<TriggerRecord>> {
    if content.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(content)?);
    }
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}", index + 1))
        })
        .collect()
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
