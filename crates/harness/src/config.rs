use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the decode harness
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// ffmpeg binary, either a path or a bare name looked up on PATH
    pub ffmpeg_bin: PathBuf,
    /// Directory where decoded artifacts are written
    pub artifact_dir: PathBuf,
    /// Keep r2r iteration outputs instead of purging them after verification
    pub keep_artifacts: bool,
    /// Where the JSON suite report is written (none = no report)
    pub report_path: Option<PathBuf>,
    /// Platform under test
    pub platform: Platform,
}

/// Platform and driver capabilities the harness validates cases against
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Platform {
    pub name: String,
    pub driver: String,
    /// DRM render node handed to `-init_hw_device`
    pub render_device: String,
    /// Driver features available on this platform (e.g. "hevc_10bit")
    pub features: BTreeSet<String>,
    /// Decode capabilities keyed by codec name
    pub caps: HashMap<String, Capabilities>,
    /// hwaccel methods offered by the ffmpeg binary; filled in at startup
    #[serde(skip)]
    pub hwaccels: Option<Vec<String>>,
}

/// Decode capabilities of one codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Maximum supported resolution as [width, height]
    pub maxres: (u32, u32),
    /// Logical formats the hardware can output
    pub fmts: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            driver: "unknown".to_string(),
            render_device: "/dev/dri/renderD128".to_string(),
            features: BTreeSet::new(),
            caps: HashMap::new(),
            hwaccels: None,
        }
    }
}

impl Platform {
    /// Capabilities declared for `codec`, if any
    pub fn caps_for(&self, codec: &str) -> Option<&Capabilities> {
        self.caps.get(codec)
    }

    /// Required features this platform does not provide, in request order
    pub fn missing_features<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|f| !self.features.contains(f.as_str()))
            .map(|f| f.as_str())
            .collect()
    }

    /// Whether ffmpeg offers `hwaccel`. Unknown (not probed) counts as available.
    pub fn has_hwaccel(&self, hwaccel: &str) -> bool {
        match &self.hwaccels {
            Some(list) => list.iter().any(|h| h == hwaccel),
            None => true,
        }
    }
}

impl HarnessConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            artifact_dir: PathBuf::from("/tmp/hwdec-artifacts"),
            keep_artifacts: false,
            report_path: None,
            platform: Platform::default(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            } else {
                log::warn!("Config file {} not found, using defaults", config_path.display());
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.platform.render_device.is_empty() {
            anyhow::bail!("platform.render_device must not be empty");
        }
        for (codec, caps) in &self.platform.caps {
            if caps.fmts.iter().any(|f| f.is_empty()) {
                anyhow::bail!("platform.caps.{}: empty format name", codec);
            }
        }
        Ok(())
    }
}
