//! Configuration for encoding, streaming and playback.
//!
//! Every section uses `#[serde(default)]`, so a settings file only needs the
//! values it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::util::{Error, Result};

/// Settings for the entropy-coded codec.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Position and motion vector quantization step, in scene units.
    pub vertex_precision: f32,
    /// Bits per UV axis over the fixed `[0, 1]` range.
    pub uv_bits: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            vertex_precision: 0.01,
            uv_bits: 10,
        }
    }
}

impl EncoderConfig {
    /// Check values the quantizers cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.vertex_precision > 0.0 && self.vertex_precision.is_finite()) {
            return Err(Error::other(format!(
                "vertex_precision must be positive, got {}",
                self.vertex_precision
            )));
        }
        if !(1..=24).contains(&self.uv_bits) {
            return Err(Error::other(format!("uv_bits must be in 1..=24, got {}", self.uv_bits)));
        }
        Ok(())
    }
}

/// Settings for the chunk streaming service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Window loaded synchronously when a consumer attaches, in seconds.
    pub prefetch_window: f32,
    /// Limit for the synchronous prefetch, in seconds.
    pub prefetch_timeout: f32,
    /// Limit for draining outstanding reads on shutdown, in seconds.
    pub shutdown_timeout: f32,
    /// Worker threads of the file reader.
    pub reader_threads: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            prefetch_window: 0.5,
            prefetch_timeout: 5.0,
            shutdown_timeout: 10.0,
            reader_threads: 2,
        }
    }
}

impl StreamingConfig {
    pub fn prefetch_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.prefetch_timeout.max(0.0))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.shutdown_timeout.max(0.0))
    }
}

/// Settings for track playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// How far ahead of the play head chunks are kept resident, in seconds.
    pub lookahead: f32,
    /// Blend between neighbouring frames when topology allows.
    pub interpolate_frames: bool,
    pub looping: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            lookahead: 1.0,
            interpolate_frames: true,
            looping: true,
        }
    }
}

/// All settings, as stored in a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub encoder: EncoderConfig,
    pub streaming: StreamingConfig,
    pub playback: PlaybackConfig,
}

impl Settings {
    /// Parse settings from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.encoder.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Save settings as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.encoder.vertex_precision, 0.01);
        assert_eq!(s.encoder.uv_bits, 10);
        assert_eq!(s.streaming.reader_threads, 2);
        assert!(s.playback.interpolate_frames);
    }

    #[test]
    fn test_partial_json() {
        let s = Settings::from_json(r#"{ "encoder": { "uv_bits": 12 }, "playback": { "looping": false } }"#)
            .expect("parse");
        assert_eq!(s.encoder.uv_bits, 12);
        assert_eq!(s.encoder.vertex_precision, 0.01);
        assert!(!s.playback.looping);
        assert_eq!(s.playback.lookahead, 1.0);
    }

    #[test]
    fn test_invalid_values() {
        assert!(Settings::from_json(r#"{ "encoder": { "vertex_precision": 0.0 } }"#).is_err());
        assert!(matches!(Settings::from_json("{ nope"), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let mut s = Settings::default();
        s.streaming.prefetch_window = 2.0;
        s.save(&path).expect("save");
        assert_eq!(Settings::load(&path).expect("load"), s);
        assert!(matches!(
            Settings::load(dir.path().join("missing.json")),
            Err(Error::FileNotFound(_))
        ));
    }
}
