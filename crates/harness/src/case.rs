//! One decode test case: capability validation, decode, and verification.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use log::{debug, info};
use crate::artifacts::ArtifactStore;
use crate::config::Platform;
use crate::decoder::DecodeConfiguration;
use crate::error::{check, CaseError};
use crate::ffmpeg::CommandRunner;
use crate::formats::{FormatInfo, FormatTable};
use crate::metrics::{self, FrameGeometry, TestDetails};
use crate::props::CaseProps;

/// Signature ffmpeg prints when the accelerator could not be set up and it
/// silently fell back to software decoding
pub const HWACCEL_INIT_ERROR: &str = "hwaccel initialisation returned error";

/// Where a case is in its run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CaseState {
    Constructed,
    CapabilityValidated,
    Decoded,
    Checked,
}

/// Additional validation run after the built-in capability checks
pub trait ExtraValidation {
    fn validate(&self, props: &CaseProps, decoder: &DecodeConfiguration) -> Result<(), CaseError>;
}

/// Default strategy: nothing extra to validate
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExtraValidation;

impl ExtraValidation for NoExtraValidation {
    fn validate(&self, _props: &CaseProps, _decoder: &DecodeConfiguration) -> Result<(), CaseError> {
        Ok(())
    }
}

/// Skips cases whose source media is not present on this machine
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireSource;

impl ExtraValidation for RequireSource {
    fn validate(&self, props: &CaseProps, _decoder: &DecodeConfiguration) -> Result<(), CaseError> {
        if !props.source.is_file() {
            return Err(CaseError::skip(format!("source {} not found", props.source.display())));
        }
        Ok(())
    }
}

/// Fail when ffmpeg reports it could not initialize the accelerator
pub fn check_output(output: &str) -> Result<(), CaseError> {
    check!(!output.lines().any(|l| l.contains(HWACCEL_INIT_ERROR)), "Failed to use hardware decode");
    Ok(())
}

/// Skip when the platform lacks a required feature or ffmpeg lacks the hwaccel
fn skip_if_missing_features(props: &CaseProps, platform: &Platform) -> Result<(), CaseError> {
    let missing = platform.missing_features(&props.features);
    if !missing.is_empty() {
        return Err(CaseError::skip(format!("missing features: {}", missing.join(", "))));
    }
    if !platform.has_hwaccel(&props.hwaccel) {
        return Err(CaseError::skip(format!("{} hwaccel not available in ffmpeg", props.hwaccel)));
    }
    Ok(())
}

/// A decode test case
pub struct DecodeTestCase<'a, R: CommandRunner> {
    props: &'a CaseProps,
    platform: &'a Platform,
    formats: &'a dyn FormatTable,
    runner: &'a R,
    artifacts: &'a ArtifactStore,
    extra: Box<dyn ExtraValidation + 'a>,
    state: CaseState,
    timeout: Option<Duration>,
    decoder: Option<DecodeConfiguration>,
    output: String,
    decoded: Option<PathBuf>,
    details: TestDetails,
}

impl<'a, R: CommandRunner> DecodeTestCase<'a, R> {
    pub fn new(
        props: &'a CaseProps,
        platform: &'a Platform,
        formats: &'a dyn FormatTable,
        runner: &'a R,
        artifacts: &'a ArtifactStore,
    ) -> Self {
        DecodeTestCase {
            props,
            platform,
            formats,
            runner,
            artifacts,
            extra: Box::new(NoExtraValidation),
            state: CaseState::Constructed,
            timeout: None,
            decoder: None,
            output: String::new(),
            decoded: None,
            details: TestDetails::new(),
        }
    }

    /// Replace the extra validation strategy
    pub fn with_validation(mut self, extra: impl ExtraValidation + 'a) -> Self {
        self.extra = Box::new(extra);
        self
    }

    pub fn state(&self) -> CaseState {
        self.state
    }

    pub fn decoder(&self) -> Option<&DecodeConfiguration> {
        self.decoder.as_ref()
    }

    /// Output kept for verification in single-decode mode
    pub fn decoded(&self) -> Option<&Path> {
        self.decoded.as_deref()
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn details(&self) -> &TestDetails {
        &self.details
    }

    pub fn into_details(self) -> TestDetails {
        self.details
    }

    /// Build the decode configuration and check the platform can run it
    pub fn validate_caps(&mut self) -> Result<(), CaseError> {
        let props = self.props;
        let platform = self.platform;

        let caps = platform.caps_for(&props.codec).ok_or_else(|| {
            CaseError::skip(format!("{}.{} has no {} decode support", platform.name, platform.driver, props.codec))
        })?;

        let decoder = DecodeConfiguration::new(props, &caps.fmts, &platform.render_device, self.formats);
        let unsupported = decoder.format.is_none() || decoder.hwformat.is_none();
        self.decoder = Some(decoder);
        if unsupported {
            return Err(CaseError::skip(format!("{} format not supported", props.format)));
        }

        let (maxw, maxh) = caps.maxres;
        if props.width > maxw || props.height > maxh {
            return Err(CaseError::skip(format!(
                "{}.{}.{}x{} not supported",
                platform.name, platform.driver, props.width, props.height
            )));
        }

        skip_if_missing_features(props, platform)?;

        if let Some(decoder) = &self.decoder {
            self.extra.validate(props, decoder)?;
        }

        self.state = CaseState::CapabilityValidated;
        Ok(())
    }

    /// Run the case: validate, decode, then verify determinism (r2r) or correctness
    pub async fn decode(&mut self) -> Result<(), CaseError> {
        self.validate_caps()?;

        let props = self.props;
        // 0 or absent means no limit
        self.timeout = props.call_timeout.filter(|s| *s > 0).map(Duration::from_secs);

        let name = props.artifact_name();
        let first = self.artifacts.test_artifact(&format!("{}.yuv", name))?;
        self.output = self.run_decode(first).await?;
        self.state = CaseState::Decoded;

        match &props.r2r {
            Some(r2r) => {
                // an r2r value that cannot drive the loop is a broken case
                let count = r2r.count().ok_or_else(|| CaseError::fail("invalid r2r value"))?;
                self.check_repeatability(&name, count).await?;
            }
            None => {
                self.decoded = self.decoder.as_ref().map(|d| d.decoded.clone());
                self.check_output()?;
                self.check_metrics()?;
            }
        }

        self.state = CaseState::Checked;
        Ok(())
    }

    async fn run_decode(&mut self, output_path: PathBuf) -> Result<String, CaseError> {
        let timeout = self.timeout;
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("decode requested before capability validation"))?;
        decoder.update_decoded(output_path);

        let started = Instant::now();
        let output = decoder.decode(self.runner, timeout).await?;
        let elapsed = started.elapsed().as_secs_f64();

        let key = "time.ffmpeg-decode".to_string();
        let total = self.details.get(&key).and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0) + elapsed;
        self.details.insert(key, format!("{:.3}", total));
        Ok(output)
    }

    fn current_output_path(&self) -> Result<PathBuf, CaseError> {
        self.decoder
            .as_ref()
            .map(|d| d.decoded.clone())
            .ok_or_else(|| anyhow::anyhow!("no decode configuration").into())
    }

    /// Decode `count - 1` more times and compare every output's md5 with the first
    async fn check_repeatability(&mut self, name: &str, count: u32) -> Result<(), CaseError> {
        let md5ref = metrics::md5_file(&self.current_output_path()?)?;
        self.details.insert("md5_ref".to_string(), md5ref.clone());

        for i in 1..count {
            let path = self.artifacts.test_artifact(&format!("{}_{}.yuv", name, i))?;
            self.run_decode(path).await?;

            let decoded = self.current_output_path()?;
            let result = metrics::md5_file(&decoded)?;
            self.details.insert(format!("md5_{:03}", i), result.clone());
            debug!("r2r iteration {}: {} (ref {})", i, result, md5ref);
            check!(result == md5ref, "r2r md5 mismatch");

            self.artifacts.purge(&decoded)?;
        }

        info!("{}: {} decodes produced identical output", self.props.case, count);
        Ok(())
    }

    /// Fail when the decode fell back from hardware
    pub fn check_output(&self) -> Result<(), CaseError> {
        check_output(&self.output)
    }

    /// Judge the retained output against the case metric
    pub fn check_metrics(&mut self) -> Result<(), CaseError> {
        let decoded = self
            .decoded
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no decoded output to check"))?;
        let format = FormatInfo::lookup(&self.props.format)
            .ok_or_else(|| anyhow::anyhow!("unknown format {}", self.props.format))?;
        let geometry = FrameGeometry { width: self.props.width, height: self.props.height, format };
        metrics::check_metric(self.props.metric.as_ref(), &decoded, &geometry, &mut self.details)
    }
}
