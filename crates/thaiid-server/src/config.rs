//! Command line and environment configuration

use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use thaiid_card::{AutoProbe, PhotoOptions, ReadOptions};

#[derive(Debug, Parser)]
#[command(name = "thaiid-server")]
#[command(about = "Thai ID card reader - pushes card reads to WebSocket subscribers")]
#[command(version)]
pub struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(
        long,
        global = true,
        env = "SMARTCARD_DEBUG",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Server options when no subcommand is given
    #[command(flatten)]
    pub serve: ServeArgs,
}

impl Cli {
    /// The subcommand to run; `serve` when none was given
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch the reader and push events to WebSocket subscribers
    Serve(ServeArgs),
    /// Read the card in the first reader once and print it as JSON
    Read(ReadArgs),
    /// List attached card readers
    Readers,
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "WS_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "WS_PORT", default_value_t = 8765)]
    pub port: u16,

    #[command(flatten)]
    pub read: ReadArgs,
}

impl ServeArgs {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PhotoMethod {
    /// Fixed 20-part table first
    Parts,
    /// Skip the part table
    #[value(name = "none")]
    Skip,
}

/// Card read tuning shared by `serve` and `read`
#[derive(Debug, Clone, Args)]
pub struct ReadArgs {
    /// Seconds to wait after selecting the applet
    #[arg(long, env = "SMARTCARD_SETTLE_DELAY", default_value = "0.25", value_parser = parse_seconds)]
    pub settle_delay: Duration,

    /// Extra attempts per field on communication errors
    #[arg(long, env = "SMARTCARD_FIELD_RETRIES", default_value_t = 2)]
    pub field_retries: u32,

    #[arg(
        long,
        env = "READ_PHOTO",
        action = ArgAction::Set,
        default_value_t = true,
        value_parser = BoolishValueParser::new()
    )]
    pub read_photo: bool,

    #[arg(long, env = "PHOTO_METHOD", value_enum, default_value_t = PhotoMethod::Parts)]
    pub photo_method: PhotoMethod,

    /// Photo start offset P1 (hex); used together with --photo-start-low
    #[arg(long, env = "PHOTO_START_OFFSET_HIGH", value_parser = parse_hex_u8)]
    pub photo_start_high: Option<u8>,

    /// Photo start offset P2 (hex)
    #[arg(long, env = "PHOTO_START_OFFSET_LOW", value_parser = parse_hex_u8)]
    pub photo_start_low: Option<u8>,

    #[arg(long, env = "PHOTO_MAX_CHUNKS", default_value_t = 40)]
    pub photo_max_chunks: u32,

    /// Bytes per photo read (hex)
    #[arg(long, env = "PHOTO_CHUNK_LEN", default_value = "0xFF", value_parser = parse_chunk_len)]
    pub photo_chunk_len: u8,

    /// Probe for the photo start when the other methods find nothing
    #[arg(
        long,
        env = "ENABLE_PHOTO_SCAN",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub photo_scan: bool,

    #[arg(long, env = "SCAN_P1_START", default_value = "0x15", value_parser = parse_hex_u8)]
    pub scan_p1_start: u8,

    #[arg(long, env = "SCAN_P1_END", default_value = "0x20", value_parser = parse_hex_u8)]
    pub scan_p1_end: u8,

    #[arg(long, env = "SCAN_STEP", default_value = "0x20", value_parser = parse_chunk_len)]
    pub scan_step: u8,

    #[arg(long, env = "SCAN_PROBE_LEN", default_value = "0x40", value_parser = parse_chunk_len)]
    pub scan_probe_len: u8,
}

impl ReadArgs {
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            settle_delay: self.settle_delay,
            field_retries: self.field_retries,
            photo: self.photo_options(),
            ..ReadOptions::default()
        }
    }

    pub fn photo_options(&self) -> PhotoOptions {
        let probe = self.photo_scan.then(|| AutoProbe {
            p1_start: self.scan_p1_start,
            p1_end: self.scan_p1_end,
            p2_step: self.scan_step,
            probe_len: self.scan_probe_len,
            chunk_len: self.photo_chunk_len,
            max_chunks: self.photo_max_chunks,
        });

        PhotoOptions {
            enabled: self.read_photo,
            fixed_parts: self.photo_method == PhotoMethod::Parts,
            start_offset: self.photo_start_high.zip(self.photo_start_low),
            chunk_len: self.photo_chunk_len,
            max_chunks: self.photo_max_chunks,
            probe,
        }
    }
}

/// Parse a byte written in hex, with or without a `0x` prefix
fn parse_hex_u8(value: &str) -> Result<u8, String> {
    let digits = value
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");

    u8::from_str_radix(digits, 16).map_err(|err| format!("invalid hex byte {value:?}: {err}"))
}

fn parse_chunk_len(value: &str) -> Result<u8, String> {
    match parse_hex_u8(value)? {
        0 => Err("length must be non-zero".to_string()),
        len => Ok(len),
    }
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|err| format!("invalid number of seconds {value:?}: {err}"))?;

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("seconds must be a non-negative number, got {value}"));
    }

    Ok(Duration::from_secs_f64(seconds))
}
