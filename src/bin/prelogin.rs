//! prelogin — TDS PreLogin packet tool
//!
//! # Usage
//!
//! ```bash
//! # Print the packet this server advertises
//! prelogin encode --instance MSSQLSERVER
//!
//! # Break a captured packet down into its options
//! prelogin inspect "$(prelogin encode)"
//!
//! # Answer client PreLogin packets on a port
//! prelogin serve --listen 127.0.0.1:11433
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tds_prelogin::config::{CliOverrides, ServerConfig};
use tds_prelogin::prelude::*;

#[derive(Parser)]
#[command(name = "prelogin")]
#[command(version)]
#[command(about = "TDS PreLogin packet encoder", long_about = None)]
#[command(after_help = "EXAMPLES:
    prelogin encode
    prelogin encode --instance sql01 --format table
    prelogin inspect 12010009000000 00ff
    prelogin serve --listen 0.0.0.0:1433")]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, global = true, env = tds_prelogin::config::CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Hex,
    Raw,
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the server PreLogin packet
    Encode {
        /// Instance name advertised in INSTOPT
        #[arg(short, long)]
        instance: Option<String>,

        #[arg(short, long, value_enum, default_value = "hex")]
        format: OutputFormat,
    },
    /// Decode a hex-encoded PreLogin packet
    Inspect {
        /// Packet bytes as hex; whitespace and a leading 0x are ignored
        packet: String,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Answer client PreLogin packets
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        listen: Option<String>,

        /// Instance name advertised in INSTOPT
        #[arg(short, long)]
        instance: Option<String>,
    },
}

#[derive(Serialize)]
struct PacketReport {
    packet_type: u8,
    status: u8,
    length: u16,
    options: Vec<OptionReport>,
}

#[derive(Serialize)]
struct OptionReport {
    kind: String,
    code: u8,
    offset: u16,
    length: u16,
    value: String,
}

/// Logs every packet the encoder assembles.
struct PacketDump;

impl PacketObserver for PacketDump {
    fn observe(&self, packet: &Packet) {
        info!(len = packet.len(), packet = %packet.to_hex(), "prelogin packet");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "tds_prelogin=debug,prelogin=debug"
    } else {
        "tds_prelogin=info,prelogin=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Encode { ref instance, format } => {
            let config = load_config(&cli, instance.clone(), None)?;
            let options = config.option_set()?;
            let packet = encoder_for(&config).encode(&options)?;
            print_packet(&packet, format)
        }
        Commands::Inspect { ref packet, format } => {
            let bytes = parse_hex(packet)?;
            let decoded = decode(&bytes).context("not a PreLogin packet")?;
            match format {
                OutputFormat::Hex => println!("{}", hex::encode(&bytes)),
                OutputFormat::Raw => {
                    let mut stdout = io::stdout().lock();
                    io::Write::write_all(&mut stdout, &bytes)?;
                }
                OutputFormat::Table => print_table(&decoded),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report(&decoded))?),
            }
            Ok(())
        }
        Commands::Serve {
            ref listen,
            ref instance,
        } => {
            let config = load_config(&cli, instance.clone(), listen.clone())?;
            let encoder = encoder_for(&config);
            tds_prelogin::server::serve(config, encoder).await?;
            Ok(())
        }
    }
}

fn load_config(
    cli: &Cli,
    instance_name: Option<String>,
    listen_addr: Option<String>,
) -> anyhow::Result<ServerConfig> {
    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        instance_name,
        listen_addr,
        debug: cli.verbose,
    };
    ServerConfig::from_cli(&overrides).context("loading config")
}

fn encoder_for(config: &ServerConfig) -> PreLoginEncoder {
    let encoder = PreLoginEncoder::new();
    if config.debug {
        encoder.with_observer(Arc::new(PacketDump))
    } else {
        encoder
    }
}

fn print_packet(packet: &Packet, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Hex => println!("{}", packet.to_hex()),
        OutputFormat::Raw => {
            let mut stdout = io::stdout().lock();
            transmit(packet, &mut stdout)?;
        }
        OutputFormat::Table => print_table(&decode(packet.as_bytes())?),
        OutputFormat::Json => {
            let decoded = decode(packet.as_bytes())?;
            println!("{}", serde_json::to_string_pretty(&report(&decoded))?);
        }
    }
    Ok(())
}

fn parse_hex(input: &str) -> anyhow::Result<Vec<u8>> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let cleaned: String = digits
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    hex::decode(&cleaned).with_context(|| format!("invalid hex packet '{}'", input))
}

fn report(decoded: &DecodedPacket) -> PacketReport {
    PacketReport {
        packet_type: decoded.header.packet_type,
        status: decoded.header.status,
        length: decoded.header.length,
        options: decoded
            .descriptors
            .iter()
            .map(|d| OptionReport {
                kind: kind_name(d.kind),
                code: d.kind,
                offset: d.offset,
                length: d.length,
                value: option_hex(decoded, d.kind),
            })
            .collect(),
    }
}

fn kind_name(code: u8) -> String {
    OptionKind::try_from(code)
        .map(|k| k.name().to_string())
        .unwrap_or_else(|_| format!("0x{:02X}", code))
}

fn option_hex(decoded: &DecodedPacket, code: u8) -> String {
    OptionKind::try_from(code)
        .ok()
        .and_then(|k| decoded.options.get(k))
        .map(hex::encode)
        .unwrap_or_default()
}

fn print_table(decoded: &DecodedPacket) {
    let header = &decoded.header;
    println!("{}", "PreLogin Packet".cyan().bold());
    println!(
        "  {} 0x{:02X}  {} 0x{:02X}  {} {}",
        "Type:".dimmed(),
        header.packet_type,
        "Status:".dimmed(),
        header.status,
        "Length:".dimmed(),
        header.length.to_string().white()
    );
    println!();

    println!(
        "{:16} {:>6} {:>6} {}",
        "Option".white().bold(),
        "Offset".white().bold(),
        "Length".white().bold(),
        "Value".white().bold()
    );
    println!("{}", "─".repeat(60).dimmed());

    for d in &decoded.descriptors {
        println!(
            "{:16} {:>6} {:>6} {}",
            kind_name(d.kind).cyan(),
            d.offset,
            d.length,
            option_hex(decoded, d.kind).yellow()
        );
    }

    println!();
    println!("{} option(s)", decoded.descriptors.len().to_string().cyan());
}
