//! Configuration for discovery, tracking and rendering.
//!
//! Every struct has sensible defaults; [`ReframeConfig::from_env`] overlays
//! `LOCKFRAME_*` environment variables on top of them.

use lockframe_models::{AspectRatio, PERSON_CLASS_ID};
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};

/// Settings for the sampled subject discovery pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Analyze every Nth frame (default: 20)
    pub sample_rate: u64,

    /// Minimum detector confidence to consider a detection (default: 0.35)
    pub conf_threshold: f64,

    /// Maximum number of ranked subjects returned (default: 5)
    pub max_subjects: usize,

    /// IoU a detection must exceed to join an existing track (default: 0.3)
    pub match_iou: f64,

    /// Scan stops after frame index `sample_rate * max_samples` (default: 50)
    pub max_samples: u64,

    /// Detector class to discover (default: 0, person)
    pub class_id: usize,

    /// Longest side of enhanced thumbnails in pixels (default: 256)
    pub thumbnail_size: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            sample_rate: 20,
            conf_threshold: 0.35,
            max_subjects: 5,
            match_iou: 0.3,
            max_samples: 50,
            class_id: PERSON_CLASS_ID,
            thumbnail_size: 256,
        }
    }
}

impl DiscoveryConfig {
    /// Last frame index the discovery pass may scan.
    pub fn scan_cap(&self) -> u64 {
        self.sample_rate.saturating_mul(self.max_samples)
    }

    /// Reject settings that would make the scan meaningless.
    pub fn validate(&self) -> MediaResult<()> {
        if self.sample_rate == 0 {
            return Err(MediaError::invalid_config("sample_rate must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.conf_threshold) {
            return Err(MediaError::invalid_config("conf_threshold must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.match_iou) {
            return Err(MediaError::invalid_config("match_iou must be in [0, 1]"));
        }
        Ok(())
    }
}

/// Settings for the locked single-subject tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Minimum detector confidence to consider a detection (default: 0.4)
    pub conf_threshold: f64,

    /// Dead zone as a fraction of frame width (default: 0.02)
    pub dead_zone_ratio: f64,

    /// Detector class to follow (default: 0, person)
    pub class_id: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.4,
            dead_zone_ratio: 0.02,
            class_id: PERSON_CLASS_ID,
        }
    }
}

/// FFmpeg encoder settings for the intermediate and final outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeSettings {
    /// Video codec (default: "libx264")
    pub video_codec: String,

    /// Encoder preset (default: "fast")
    pub preset: String,

    /// Constant Rate Factor (default: 18)
    pub crf: u8,

    /// Audio codec for the remuxed output (default: "aac")
    pub audio_codec: String,

    /// Audio bitrate (default: "128k")
    pub audio_bitrate: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "fast".to_string(),
            crf: 18,
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

/// Top-level configuration for one reframing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReframeConfig {
    pub discovery: DiscoveryConfig,
    pub tracker: TrackerConfig,

    /// Output aspect ratio (default: 9:16)
    pub aspect_ratio: AspectRatio,

    /// EMA alpha applied to the tracked center before cropping (default: off)
    pub center_smoothing: Option<f64>,

    pub encode: EncodeSettings,
}

impl ReframeConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let d = &mut config.discovery;
        d.sample_rate = env_or("LOCKFRAME_SAMPLE_RATE", d.sample_rate);
        d.conf_threshold = env_or("LOCKFRAME_DISCOVERY_CONF", d.conf_threshold);
        d.max_subjects = env_or("LOCKFRAME_MAX_SUBJECTS", d.max_subjects);
        d.thumbnail_size = env_or("LOCKFRAME_THUMBNAIL_SIZE", d.thumbnail_size);

        let t = &mut config.tracker;
        t.conf_threshold = env_or("LOCKFRAME_TRACKER_CONF", t.conf_threshold);
        t.dead_zone_ratio = env_or("LOCKFRAME_DEAD_ZONE_RATIO", t.dead_zone_ratio);

        config.aspect_ratio = env_or("LOCKFRAME_ASPECT_RATIO", config.aspect_ratio);
        config.center_smoothing = std::env::var("LOCKFRAME_CENTER_SMOOTHING")
            .ok()
            .and_then(|s| s.parse().ok());

        let e = &mut config.encode;
        e.preset = std::env::var("LOCKFRAME_PRESET").unwrap_or_else(|_| e.preset.clone());
        e.crf = env_or("LOCKFRAME_CRF", e.crf);

        config
    }

    /// Validate every section.
    pub fn validate(&self) -> MediaResult<()> {
        self.discovery.validate()?;
        if !(0.0..=1.0).contains(&self.tracker.conf_threshold) {
            return Err(MediaError::invalid_config("tracker conf_threshold must be in [0, 1]"));
        }
        if !(self.tracker.dead_zone_ratio >= 0.0 && self.tracker.dead_zone_ratio.is_finite()) {
            return Err(MediaError::invalid_config("dead_zone_ratio must be a non-negative number"));
        }
        if let Some(alpha) = self.center_smoothing {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(MediaError::invalid_config("center_smoothing must be in (0, 1]"));
            }
        }
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReframeConfig::default();
        assert_eq!(config.discovery.sample_rate, 20);
        assert_eq!(config.discovery.scan_cap(), 1000);
        assert_eq!(config.discovery.max_subjects, 5);
        assert!((config.tracker.conf_threshold - 0.4).abs() < f64::EPSILON);
        assert!((config.tracker.dead_zone_ratio - 0.02).abs() < f64::EPSILON);
        assert_eq!(config.aspect_ratio, AspectRatio::PORTRAIT);
        assert!(config.center_smoothing.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sample_rate() {
        let mut config = ReframeConfig::default();
        config.discovery.sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_alpha() {
        let mut config = ReframeConfig::default();
        config.center_smoothing = Some(0.0);
        assert!(config.validate().is_err());
        config.center_smoothing = Some(1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_thresholds() {
        let mut config = ReframeConfig::default();
        config.tracker.conf_threshold = 1.5;
        assert!(matches!(config.validate(), Err(MediaError::InvalidConfig(_))));

        let mut config = ReframeConfig::default();
        config.discovery.match_iou = -0.1;
        assert!(config.validate().is_err());

        let mut config = ReframeConfig::default();
        config.discovery.conf_threshold = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nan_dead_zone() {
        let mut config = ReframeConfig::default();
        config.tracker.dead_zone_ratio = f64::NAN;
        assert!(config.validate().is_err());
        config.tracker.dead_zone_ratio = -0.01;
        assert!(config.validate().is_err());
        config.tracker.dead_zone_ratio = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_aspect_ratio_never_reaches_a_config() {
        let mut value = serde_json::to_value(ReframeConfig::default()).unwrap();
        value["aspect_ratio"] = serde_json::json!({"width": 9, "height": 0});
        assert!(serde_json::from_value::<ReframeConfig>(value.clone()).is_err());

        value["aspect_ratio"] = serde_json::json!("9:0");
        assert!(serde_json::from_value::<ReframeConfig>(value.clone()).is_err());

        value["aspect_ratio"] = serde_json::json!("4:5");
        let config: ReframeConfig = serde_json::from_value(value).unwrap();
        assert_eq!(config.aspect_ratio.to_string(), "4:5");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = ReframeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ReframeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.discovery.sample_rate, config.discovery.sample_rate);
        assert_eq!(parsed.encode.video_codec, "libx264");
    }
}
