//! DCC Trace Reader CLI Application
//!
//! Command-line front end for the dcc-decoder library. Reads a CSV edge
//! capture, configures the decoder from flags or a TOML config file, and
//! renders the annotation stream to stdout as text or JSON lines.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use dcc_decoder::{parse_byte_term, Decoder, DecoderConfig, SpeedStepMode};

mod config;
mod edges;
mod render;

use edges::CsvEdgeSource;
use render::{OutputFormat, RenderSink};

/// DCC Trace Reader - decode NMRA/RCN DCC command streams from edge captures
#[derive(Parser, Debug)]
#[command(name = "dcc-cli")]
#[command(about = "Decode DCC command streams from logic-level edge captures", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the CSV edge capture (lines of "sample,level")
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Capture sample rate in Hz
    #[arg(short, long, value_name = "HZ")]
    samplerate: Option<u64>,

    /// Interpret address bytes 112-127 as service-mode packets
    #[arg(long)]
    service_mode: bool,

    /// Speed-step convention: 14 or 28 (28 also covers 128-step)
    #[arg(long, value_name = "STEPS", default_value = "28")]
    speed_steps: u8,

    /// Signed offset added to accessory (turnout) addresses
    #[arg(long, value_name = "N", default_value = "0", allow_hyphen_values = true)]
    accessory_offset: i32,

    /// Merge interfering pulses shorter than 4 us
    #[arg(long)]
    ignore_short_pulses: bool,

    /// Search for a multi-function decoder address
    #[arg(long, value_name = "ADDR")]
    find_address: Option<u16>,

    /// Search for an accessory (turnout) address
    #[arg(long, value_name = "ADDR")]
    find_accessory: Option<u16>,

    /// Search for a CV address
    #[arg(long, value_name = "CV")]
    find_cv: Option<u32>,

    /// Search for a raw byte value (decimal, 0x.. hex, or 0b.. binary)
    #[arg(long, value_name = "BYTE")]
    find_byte: Option<String>,

    /// Emit annotations as JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Path to a TOML configuration file (replaces the flags above)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("DCC Trace Reader CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", dcc_decoder::VERSION);

    if let Some(config_path) = &args.config {
        let app = config::load_config(config_path)?;
        log::debug!("configuration loaded from {:?}", config_path);
        let format = if app.output.json || args.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        };
        decode_capture(&app.input.file, app.input.samplerate, app.decoder, format)
    } else if let Some(input) = &args.input {
        let decoder_config = decoder_config_from_args(&args)?;
        let Some(samplerate) = args.samplerate else {
            bail!("--samplerate is required when decoding without a config file");
        };
        let format = if args.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        };
        decode_capture(input, samplerate, decoder_config, format)
    } else {
        println!("DCC Trace Reader - no input specified");
        println!("\nQuick start:");
        println!("  dcc-cli --input capture.csv --samplerate 1000000");
        println!("  dcc-cli --input capture.csv --samplerate 1000000 --find-cv 23");
        println!("\nOr with a config file:");
        println!("  dcc-cli --config decode.toml");
        println!("\nUse --help for all options");
        Ok(())
    }
}

/// Build the decoder configuration from command-line flags
fn decoder_config_from_args(args: &Args) -> Result<DecoderConfig> {
    let speed_steps = match args.speed_steps {
        14 => SpeedStepMode::Steps14,
        28 | 128 => SpeedStepMode::Steps28,
        other => bail!("unsupported speed-step count: {} (use 14 or 28)", other),
    };

    let mut config = DecoderConfig::new()
        .with_speed_steps(speed_steps)
        .with_service_mode(args.service_mode)
        .with_accessory_offset(args.accessory_offset)
        .with_short_pulse_filter(args.ignore_short_pulses);

    if let Some(addr) = args.find_address {
        config = config.find_decoder_address(addr);
    }
    if let Some(addr) = args.find_accessory {
        config = config.find_accessory_address(addr);
    }
    if let Some(cv) = args.find_cv {
        config = config.find_cv_address(cv);
    }
    if let Some(term) = &args.find_byte {
        config = config.find_byte(parse_byte_term(term)?);
    }

    Ok(config)
}

/// Decode one capture file and render annotations to stdout
fn decode_capture(
    input: &std::path::Path,
    samplerate: u64,
    config: DecoderConfig,
    format: OutputFormat,
) -> Result<()> {
    log::info!("decoding capture {:?} at {} Hz", input, samplerate);

    let mut source = CsvEdgeSource::open(input)?;
    let stdout = std::io::stdout().lock();
    let mut sink = RenderSink::new(std::io::BufWriter::new(stdout), format);

    Decoder::new(config).run(samplerate, &mut source, &mut sink)?;

    let count = sink.finish()?;
    log::info!("emitted {} annotations", count);
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
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
