//! Pipeline configuration: defaults, TOML file, environment overrides

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::model::AudioCodec;
use crate::error::{TrimError, TrimResult};
use crate::utils::logging::{LogFormat, LogLevel, LoggingConfig};

/// Policy constants of the trim pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Output frame grid rate
    pub output_fps: u32,
    /// One keyframe every this many seconds of output
    pub keyframe_interval_secs: f64,
    /// Video bitrate floor in bits per second
    pub default_bitrate: u64,
    /// Frames above this pixel count use the high codec level
    pub baseline_pixel_limit: u64,
    pub fallback_width: u32,
    pub fallback_height: u32,
    /// Audio target bitrate in bits per second
    pub audio_bitrate: u64,
    /// First encodable codec wins
    pub audio_codec_preference: Vec<AudioCodec>,
    /// Emit a frame progress event every this many written frames
    pub progress_frame_interval: u64,
    pub prefer_hardware_acceleration: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_fps: 60,
            keyframe_interval_secs: 1.0,
            default_bitrate: 8_000_000,
            baseline_pixel_limit: 1920 * 1080,
            fallback_width: 1920,
            fallback_height: 1080,
            audio_bitrate: 128_000,
            audio_codec_preference: vec![AudioCodec::Aac, AudioCodec::Mp3],
            progress_frame_interval: 10,
            prefer_hardware_acceleration: true,
        }
    }
}

/// On-disk layout: `[pipeline]` and `[logging]` tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

impl ConfigFile {
    pub fn from_toml_str(content: &str) -> TrimResult<Self> {
        toml::from_str(content).map_err(|e| TrimError::Config {
            message: format!("Failed to parse TOML config: {}", e),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> TrimResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| TrimError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> TrimResult<String> {
        toml::to_string_pretty(self).map_err(|e| TrimError::Config {
            message: format!("Failed to serialize config: {}", e),
        })
    }

    /// Apply `TRIMX_*` variables from the process environment
    pub fn apply_env_overrides(&mut self) -> TrimResult<usize> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup; returns how many were applied
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> TrimResult<usize>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = 0;

        if let Some(value) = lookup("TRIMX_OUTPUT_FPS") {
            self.pipeline.output_fps = parse_var("TRIMX_OUTPUT_FPS", &value)?;
            applied += 1;
        }
        if let Some(value) = lookup("TRIMX_KEYFRAME_INTERVAL") {
            self.pipeline.keyframe_interval_secs = parse_var("TRIMX_KEYFRAME_INTERVAL", &value)?;
            applied += 1;
        }
        if let Some(value) = lookup("TRIMX_DEFAULT_BITRATE") {
            self.pipeline.default_bitrate = parse_var("TRIMX_DEFAULT_BITRATE", &value)?;
            applied += 1;
        }
        if let Some(value) = lookup("TRIMX_AUDIO_BITRATE") {
            self.pipeline.audio_bitrate = parse_var("TRIMX_AUDIO_BITRATE", &value)?;
            applied += 1;
        }
        if let Some(value) = lookup("TRIMX_HARDWARE_ACCELERATION") {
            self.pipeline.prefer_hardware_acceleration =
                parse_var("TRIMX_HARDWARE_ACCELERATION", &value)?;
            applied += 1;
        }
        if let Some(value) = lookup("TRIMX_LOG_LEVEL") {
            self.logging.level = LogLevel::parse(&value).map_err(|e| TrimError::Config {
                message: e.to_string(),
            })?;
            applied += 1;
        }
        if let Some(value) = lookup("TRIMX_LOG_JSON") {
            let json: bool = parse_var("TRIMX_LOG_JSON", &value)?;
            if json {
                self.logging.format = LogFormat::Json;
            } else if self.logging.format == LogFormat::Json {
                self.logging.format = LogFormat::Compact;
            }
            applied += 1;
        }

        if applied > 0 {
            debug!("Applied {} environment variable overrides", applied);
        }
        Ok(applied)
    }
}

fn parse_var<T>(key: &str, value: &str) -> TrimResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| TrimError::Config {
        message: format!("Invalid value for {}: {} ({})", key, value, e),
    })
}

impl PipelineConfig {
    pub fn validate(&self) -> TrimResult<()> {
        if self.output_fps == 0 {
            return Err(config_error("output_fps must be positive"));
        }
        if !self.keyframe_interval_secs.is_finite() || self.keyframe_interval_secs <= 0.0 {
            return Err(config_error("keyframe_interval_secs must be a positive number"));
        }
        if self.audio_bitrate == 0 {
            return Err(config_error("audio_bitrate must be positive"));
        }
        if self.audio_codec_preference.is_empty() {
            return Err(config_error("audio_codec_preference cannot be empty"));
        }
        if self.progress_frame_interval == 0 {
            return Err(config_error("progress_frame_interval must be positive"));
        }
        if self.fallback_width < 2 || self.fallback_height < 2 {
            return Err(config_error("fallback dimensions must be at least 2"));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> TrimError {
    TrimError::Config {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_match_policy_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.output_fps, 60);
        assert_eq!(config.keyframe_interval_secs, 1.0);
        assert_eq!(config.default_bitrate, 8_000_000);
        assert_eq!(config.baseline_pixel_limit, 2_073_600);
        assert_eq!((config.fallback_width, config.fallback_height), (1920, 1080));
        assert_eq!(config.audio_bitrate, 128_000);
        assert_eq!(config.audio_codec_preference, vec![AudioCodec::Aac, AudioCodec::Mp3]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let file = ConfigFile::from_toml_str(
            "[pipeline]\noutput_fps = 30\naudio_codec_preference = [\"opus\", \"aac\"]\n\n[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();
        assert_eq!(file.pipeline.output_fps, 30);
        assert_eq!(file.pipeline.default_bitrate, 8_000_000);
        assert_eq!(
            file.pipeline.audio_codec_preference,
            vec![AudioCodec::Opus, AudioCodec::Aac]
        );
        assert_eq!(file.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = ConfigFile::from_toml_str("[pipeline]\noutput_fps = \"fast\"").unwrap_err();
        assert!(matches!(err, TrimError::Config { .. }));
    }

    #[test]
    fn test_load_and_round_trip_file() {
        let mut original = ConfigFile::default();
        original.pipeline.keyframe_interval_secs = 2.0;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", original.to_toml_string().unwrap()).unwrap();

        let loaded = ConfigFile::load(file.path()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ConfigFile::load("/definitely/not/here/trimx.toml").unwrap_err();
        assert!(matches!(err, TrimError::Config { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TRIMX_OUTPUT_FPS", "30"),
            ("TRIMX_HARDWARE_ACCELERATION", "false"),
            ("TRIMX_LOG_LEVEL", "debug"),
            ("TRIMX_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = ConfigFile::default();
        let applied = config
            .apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(applied, 4);
        assert_eq!(config.pipeline.output_fps, 30);
        assert!(!config.pipeline.prefer_hardware_acceleration);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_log_json_false_switches_file_json_back_to_text() {
        let mut config =
            ConfigFile::from_toml_str("[logging]\nformat = \"json\"\n").unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);

        config
            .apply_overrides_from(|key| (key == "TRIMX_LOG_JSON").then(|| "false".to_string()))
            .unwrap();
        assert_eq!(config.logging.format, LogFormat::Compact);

        let mut pretty = ConfigFile::default();
        pretty.logging.format = LogFormat::Pretty;
        pretty
            .apply_overrides_from(|key| (key == "TRIMX_LOG_JSON").then(|| "false".to_string()))
            .unwrap();
        assert_eq!(pretty.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_bad_env_override() {
        let mut config = ConfigFile::default();
        let err = config
            .apply_overrides_from(|key| (key == "TRIMX_DEFAULT_BITRATE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("TRIMX_DEFAULT_BITRATE"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_fps = PipelineConfig {
            output_fps: 0,
            ..PipelineConfig::default()
        };
        assert!(zero_fps.validate().is_err());

        let nan_keyframe = PipelineConfig {
            keyframe_interval_secs: f64::NAN,
            ..PipelineConfig::default()
        };
        assert!(nan_keyframe.validate().is_err());

        let no_codecs = PipelineConfig {
            audio_codec_preference: Vec::new(),
            ..PipelineConfig::default()
        };
        assert!(no_codecs.validate().is_err());
    }
}
