use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::metrics::MetricSpec;

fn default_hwaccel() -> String {
    "vaapi".to_string()
}

/// Properties of one decode case, as written in a suite file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseProps {
    /// Case name, used in artifact names and reports
    #[serde(rename = "name")]
    pub case: String,
    /// Codec key into the platform capability table
    pub codec: String,
    /// Encoded input stream
    pub source: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Logical output format (e.g. "NV12")
    pub format: String,
    /// Number of frames to decode
    pub frames: u32,
    #[serde(default = "default_hwaccel")]
    pub hwaccel: String,
    /// Explicit ffmpeg decoder (e.g. "h264_qsv")
    #[serde(default)]
    pub ffdecoder: Option<String>,
    /// Range for the scale filter ("tv", "pc", ...)
    #[serde(default)]
    pub ffscale_range: Option<String>,
    /// Repeat-to-repeat count; present switches the case to determinism mode
    #[serde(default)]
    pub r2r: Option<RepeatCount>,
    /// Per-call timeout in seconds; absent or 0 means unlimited
    #[serde(default)]
    pub call_timeout: Option<u64>,
    /// Platform features the case requires
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub metric: Option<MetricSpec>,
}

/// Raw r2r value as written in the suite.
///
/// Anything other than an integer is kept so the case can fail on it
/// instead of the whole suite failing to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepeatCount {
    Count(i64),
    Invalid(serde_json::Value),
}

impl RepeatCount {
    /// Number of decodes to run, if the value is an integer greater than 1
    pub fn count(&self) -> Option<u32> {
        match self {
            RepeatCount::Count(n) if *n > 1 => u32::try_from(*n).ok(),
            _ => None,
        }
    }
}

impl CaseProps {
    /// Output artifact base name: `{case}_{width}x{height}_{format}`, plus
    /// `_r2r` in repeat mode
    pub fn artifact_name(&self) -> String {
        let mut name = format!("{}_{}x{}_{}", self.case, self.width, self.height, self.format);
        if self.r2r.is_some() {
            name.push_str("_r2r");
        }
        name
    }

    fn validate(&self) -> Result<()> {
        if self.case.is_empty() {
            anyhow::bail!("case name must not be empty");
        }
        for (field, value) in [("codec", &self.codec), ("format", &self.format), ("hwaccel", &self.hwaccel)] {
            if value.is_empty() {
                anyhow::bail!("case {}: {} must not be empty", self.case, field);
            }
        }
        if self.frames == 0 {
            anyhow::bail!("case {}: frames must be positive", self.case);
        }
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("case {}: resolution must be non-zero", self.case);
        }
        // a single decode is only judged by its metric
        if self.r2r.is_none() && self.metric.is_none() {
            anyhow::bail!("case {}: a metric is required unless r2r is set", self.case);
        }
        Ok(())
    }
}

/// A suite file: a list of `[[case]]` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecodeSuite {
    #[serde(rename = "case", default)]
    pub cases: Vec<CaseProps>,
}

impl DecodeSuite {
    /// Load a suite from TOML (by extension) or JSON
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read suite file: {}", path.display()))?;

        let suite: DecodeSuite = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML suite: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON suite: {}", path.display()))?
        };

        for case in &suite.cases {
            case.validate()
                .with_context(|| format!("Invalid case in {}", path.display()))?;
        }

        Ok(suite)
    }

    /// Cases whose name contains `filter` (all cases when no filter is given)
    pub fn filtered<'a>(&'a self, filter: Option<&'a str>) -> impl Iterator<Item = &'a CaseProps> + 'a {
        self.cases
            .iter()
            .filter(move |c| filter.map(|f| c.case.contains(f)).unwrap_or(true))
    }
}

#[cfg(test)]
pub(crate) fn sample_props() -> CaseProps {
    CaseProps {
        case: "conformance".to_string(),
        codec: "avc".to_string(),
        source: PathBuf::from("/media/avc/1080p.h264"),
        width: 1920,
        height: 1080,
        format: "NV12".to_string(),
        frames: 10,
        hwaccel: "vaapi".to_string(),
        ffdecoder: None,
        ffscale_range: None,
        r2r: None,
        call_timeout: None,
        features: Vec::new(),
        metric: None,
    }
}
