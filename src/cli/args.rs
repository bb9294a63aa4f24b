//! Command-line argument definitions

use std::path::PathBuf;

use clap::Args;

/// Arguments for the trim command
#[derive(Args, Debug)]
pub struct TrimArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Start time (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(short, long)]
    pub start: String,

    /// End time (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(short, long)]
    pub end: String,

    /// Output file path (default: auto-generated next to the input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output frame rate
    #[arg(long)]
    pub fps: Option<u32>,

    /// Audio bitrate in bits per second
    #[arg(long)]
    pub audio_bitrate: Option<u64>,

    /// Audio codec preference, comma separated (e.g. "aac,mp3")
    #[arg(long, value_delimiter = ',')]
    pub audio_codecs: Option<Vec<String>>,

    /// Only use software encoders
    #[arg(long)]
    pub software: bool,

    /// Print progress events as JSON lines on stdout
    #[arg(long)]
    pub json_progress: bool,

    /// Print the run summary as JSON when done
    #[arg(long)]
    pub summary_json: bool,

    /// Overwrite the output file if it exists
    #[arg(long)]
    pub overwrite: bool,
}

/// Arguments for the probe command
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
