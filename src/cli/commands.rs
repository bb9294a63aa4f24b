//! Command implementations

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::info;

use crate::app::{AppContainer, TrimSummary};
use crate::cli::{Cli, Commands, ProbeArgs, TrimArgs};
use crate::config::ConfigFile;
use crate::domain::model::{AudioCodec, TimeSpec};
use crate::engine::{TrimProgress, TrimStatus};
use crate::utils::logging::{LogFormat, LogLevel};

/// Layer the config file, `TRIMX_*` variables and command-line flags, in that order
pub fn resolve_config(cli: &Cli) -> Result<ConfigFile> {
    let mut config = match &cli.config {
        Some(path) => ConfigFile::load(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => ConfigFile::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    apply_cli_overrides(&mut config, cli)?;
    config
        .pipeline
        .validate()
        .context("Invalid pipeline configuration")?;
    Ok(config)
}

/// Apply flags given on the command line on top of `config`
pub fn apply_cli_overrides(config: &mut ConfigFile, cli: &Cli) -> Result<()> {
    if let Some(level) = &cli.log_level {
        config.logging.level = LogLevel::parse(level).context("Invalid --log-level")?;
    }
    if cli.log_json {
        config.logging.format = LogFormat::Json;
    }

    if let Commands::Trim(args) = &cli.command {
        if let Some(fps) = args.fps {
            config.pipeline.output_fps = fps;
        }
        if let Some(bitrate) = args.audio_bitrate {
            config.pipeline.audio_bitrate = bitrate;
        }
        if let Some(codecs) = &args.audio_codecs {
            config.pipeline.audio_codec_preference = codecs
                .iter()
                .map(|name| AudioCodec::parse(name))
                .collect::<Result<Vec<_>, _>>()
                .context("Invalid --audio-codecs")?;
        }
        if args.software {
            config.pipeline.prefer_hardware_acceleration = false;
        }
    }
    Ok(())
}

/// Execute the trim command
pub async fn trim(args: &TrimArgs, container: &dyn AppContainer) -> Result<TrimSummary> {
    let start = TimeSpec::parse(&args.start)
        .with_context(|| format!("Invalid start time '{}'", args.start))?;
    let end = TimeSpec::parse(&args.end)
        .with_context(|| format!("Invalid end time '{}'", args.end))?;

    let output_path = match &args.output {
        Some(path) => path.clone(),
        None => generate_output_filename(&args.input, start.as_seconds(), end.as_seconds())?,
    };
    if output_path.exists() && !args.overwrite {
        bail!(
            "Output file already exists: {} (pass --overwrite to replace it)",
            output_path.display()
        );
    }

    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read input file {}", args.input.display()))?;
    info!(
        input = %args.input.display(),
        output = %output_path.display(),
        start = %start,
        end = %end,
        "Starting trim"
    );

    let printer = progress_printer(args.json_progress);
    let media = container
        .trim_interactor()
        .trim(Arc::from(bytes), start.as_seconds(), end.as_seconds(), &printer)
        .await
        .context("Trim failed")?;

    tokio::fs::write(&output_path, &media.data)
        .await
        .with_context(|| format!("Failed to write output file {}", output_path.display()))?;

    if args.summary_json {
        let summary = serde_json::to_string_pretty(&media.summary)
            .context("Failed to serialize trim summary to JSON")?;
        println!("{}", summary);
    } else if !args.json_progress {
        display_summary(&output_path, &media.summary);
    }

    info!(output = %output_path.display(), bytes = media.data.len(), "Trim command completed");
    Ok(media.summary)
}

/// Execute the probe command
pub async fn probe(args: &ProbeArgs, container: &dyn AppContainer) -> Result<()> {
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read input file {}", args.input.display()))?;

    let interactor = container.trim_interactor();
    let report = interactor
        .probe(Arc::from(bytes))
        .await
        .context("Failed to probe input file")?;
    let encoder_supported = interactor.check_encoder_support().await;
    let metadata = &report.metadata;

    if args.json {
        let value = json!({
            "file": args.input.display().to_string(),
            "codec": report.track.codec,
            "width": metadata.width,
            "height": metadata.height,
            "rotation": metadata.rotation,
            "bitrate": metadata.bitrate,
            "duration": metadata.duration,
            "encoder_supported": encoder_supported,
        });
        let json = serde_json::to_string_pretty(&value).context("Failed to serialize probe result to JSON")?;
        println!("{}", json);
    } else {
        println!("Video Metadata");
        println!("==============");
        println!("File: {}", args.input.display());
        println!("Codec: {}", report.track.codec);
        println!("Encoder size: {}x{}", metadata.width, metadata.height);
        println!("Rotation: {} degrees", metadata.rotation.degrees());
        println!("Bit Rate: {:.0} bps", metadata.bitrate);
        println!("Duration: {:.3}s", metadata.duration);
        println!("Encoder available: {}", if encoder_supported { "yes" } else { "no" });
    }
    Ok(())
}

/// Progress sink for the console: JSON lines on stdout, or a status line on stderr
pub fn progress_printer(json: bool) -> impl Fn(&TrimProgress) + Send + Sync {
    move |progress: &TrimProgress| {
        if json {
            if let Ok(line) = serde_json::to_string(progress) {
                println!("{}", line);
            }
            return;
        }

        let mut stderr = std::io::stderr().lock();
        let _ = match progress.status {
            TrimStatus::Complete | TrimStatus::Error => {
                writeln!(stderr, "\r\x1b[2K[{:5.1}%] {}", progress.percent, progress.message)
            }
            _ => write!(stderr, "\r\x1b[2K[{:5.1}%] {}", progress.percent, progress.message),
        };
        let _ = stderr.flush();
    }
}

/// Generate output filename based on input and time range
pub fn generate_output_filename(input_path: &Path, start_time: f64, end_time: f64) -> Result<PathBuf> {
    let stem = input_path
        .file_stem()
        .ok_or_else(|| anyhow::anyhow!("Invalid input file path: {}", input_path.display()))?
        .to_string_lossy();

    let file_name = format!(
        "{}_clip_{}_{}.mp4",
        stem,
        format_time_short(start_time),
        format_time_short(end_time)
    );
    Ok(input_path.with_file_name(file_name))
}

/// Format time as short string for filename
fn format_time_short(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_seconds = total_ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}h{:02}m{:02}s{:03}ms", hours, minutes, secs, ms)
    } else if minutes > 0 {
        format!("{:02}m{:02}s{:03}ms", minutes, secs, ms)
    } else {
        format!("{:02}s{:03}ms", secs, ms)
    }
}

fn display_summary(output_path: &Path, summary: &TrimSummary) {
    println!("Trim Summary");
    println!("============");
    println!("Output: {}", output_path.display());
    println!("Window: {:.3}s - {:.3}s", summary.window.start, summary.window.end);
    println!(
        "Video: {}x{} @ {} fps, {} ({} bps)",
        summary.profile.width,
        summary.profile.height,
        summary.profile.frame_rate,
        summary.profile.codec_string(),
        summary.profile.bitrate
    );
    println!(
        "Frames: {} written, {} dropped ({:.3}s)",
        summary.frames_written, summary.frames_dropped, summary.output_duration
    );
    match summary.audio_codec {
        Some(codec) if summary.has_audio => {
            println!("Audio: {} ({} samples)", codec, summary.audio_samples)
        }
        _ => println!("Audio: none"),
    }
    println!("Size: {} bytes", summary.output_bytes);
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::adapters::synthetic::{SyntheticAudioTrack, SyntheticMedia, SyntheticOutput, SyntheticVideoTrack};
    use crate::app::DefaultAppContainer;

    fn write_media(dir: &Path, name: &str, media: &SyntheticMedia) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, media.to_bytes().unwrap().as_ref()).unwrap();
        path
    }

    fn trim_args(input: PathBuf, output: Option<PathBuf>) -> TrimArgs {
        TrimArgs {
            input,
            start: "0:01".to_string(),
            end: "3.5".to_string(),
            output,
            fps: None,
            audio_bitrate: None,
            audio_codecs: None,
            software: false,
            json_progress: true,
            summary_json: false,
            overwrite: false,
        }
    }

    #[test]
    fn test_generate_output_filename() {
        let path = generate_output_filename(Path::new("/videos/talk.mov"), 62.5, 3725.0).unwrap();
        assert_eq!(path, PathBuf::from("/videos/talk_clip_01m02s500ms_01h02m05s000ms.mp4"));
    }

    #[test]
    fn test_cli_overrides_trim_flags() {
        let cli = Cli::try_parse_from([
            "clipper",
            "--log-level",
            "debug",
            "trim",
            "-i",
            "in.mp4",
            "-s",
            "0",
            "-e",
            "1",
            "--fps",
            "24",
            "--audio-codecs",
            "mp3,aac",
            "--software",
        ])
        .unwrap();

        let mut config = ConfigFile::default();
        apply_cli_overrides(&mut config, &cli).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.pipeline.output_fps, 24);
        assert_eq!(config.pipeline.audio_codec_preference, vec![AudioCodec::Mp3, AudioCodec::Aac]);
        assert!(!config.pipeline.prefer_hardware_acceleration);
    }

    #[test]
    fn test_cli_rejects_unknown_codec() {
        let cli = Cli::try_parse_from([
            "clipper", "trim", "-i", "in.mp4", "-s", "0", "-e", "1", "--audio-codecs", "flac",
        ])
        .unwrap();
        let mut config = ConfigFile::default();
        assert!(apply_cli_overrides(&mut config, &cli).is_err());
    }

    #[test]
    fn test_resolve_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trimx.toml");
        std::fs::write(&path, "[pipeline]\noutput_fps = 25\n").unwrap();
        let config_arg = path.to_str().unwrap();

        let cli = Cli::try_parse_from(["clipper", "--config", config_arg, "probe", "-i", "in.mp4"]).unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.pipeline.output_fps, 25);
    }

    #[tokio::test]
    async fn test_trim_command_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let media = SyntheticMedia::new()
            .with_video(SyntheticVideoTrack::new(640, 360, 30.0, 5.0))
            .with_audio(SyntheticAudioTrack::new(48_000, 2, 5.0));
        let input = write_media(dir.path(), "source.json", &media);
        let container = DefaultAppContainer::synthetic(Default::default()).unwrap();

        let summary = trim(&trim_args(input.clone(), None), &container).await.unwrap();

        let expected = dir.path().join("source_clip_01s000ms_03s500ms.mp4");
        let output = SyntheticOutput::from_bytes(&std::fs::read(&expected).unwrap()).unwrap();
        assert_eq!(output.frames().len() as u64, summary.frames_written);
        assert_eq!(summary.frames_written, 75);
        assert!(summary.has_audio);
    }

    #[tokio::test]
    async fn test_trim_command_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let media = SyntheticMedia::new().with_video(SyntheticVideoTrack::new(640, 360, 30.0, 5.0));
        let input = write_media(dir.path(), "source.json", &media);
        let output = dir.path().join("existing.mp4");
        std::fs::write(&output, b"keep").unwrap();
        let container = DefaultAppContainer::synthetic(Default::default()).unwrap();

        let result = trim(&trim_args(input, Some(output.clone())), &container).await;
        assert!(result.is_err());
        assert_eq!(std::fs::read(&output).unwrap(), b"keep");
    }

    #[tokio::test]
    async fn test_probe_command_reports_missing_file() {
        let container = DefaultAppContainer::synthetic(Default::default()).unwrap();
        let args = ProbeArgs {
            input: PathBuf::from("/nonexistent/source.json"),
            json: true,
        };
        assert!(probe(&args, &container).await.is_err());
    }
}
