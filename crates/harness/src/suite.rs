use std::time::Instant;
use chrono::Utc;
use log::{error, info, warn};
use crate::artifacts::ArtifactStore;
use crate::case::{DecodeTestCase, ExtraValidation};
use crate::config::Platform;
use crate::error::CaseError;
use crate::ffmpeg::CommandRunner;
use crate::formats::FormatTable;
use crate::props::DecodeSuite;
use crate::report::{CaseReport, CaseStatus, SuiteReport};

/// Everything a case needs besides its own properties
pub struct SuiteContext<'a, R: CommandRunner> {
    pub platform: &'a Platform,
    pub formats: &'a dyn FormatTable,
    pub runner: &'a R,
    pub artifacts: &'a ArtifactStore,
}

impl<'a, R: CommandRunner> SuiteContext<'a, R> {
    /// Run every case matching `filter`, one after another
    pub async fn run<V>(&self, suite: &DecodeSuite, filter: Option<&str>, validation: V) -> SuiteReport
    where
        V: ExtraValidation + Clone + 'a,
    {
        let mut report = SuiteReport::new(&self.platform.name, &self.platform.driver);

        for props in suite.filtered(filter) {
            info!("▶ {}", props.case);
            let started = Instant::now();

            let mut case = DecodeTestCase::new(props, self.platform, self.formats, self.runner, self.artifacts)
                .with_validation(validation.clone());
            let result = case.decode().await;
            let elapsed = started.elapsed().as_secs_f64();

            let entry = CaseReport::from_result(&props.case, result, elapsed, case.into_details());
            match entry.status {
                CaseStatus::Passed => info!("✅ {} passed ({:.1}s)", entry.name, elapsed),
                CaseStatus::Skipped => info!("⏭️  {} skipped: {}", entry.name, entry.reason.as_deref().unwrap_or("")),
                CaseStatus::Failed => warn!("❌ {} failed: {}", entry.name, entry.reason.as_deref().unwrap_or("")),
                CaseStatus::Error => error!("💥 {} error: {}", entry.name, entry.reason.as_deref().unwrap_or("")),
            }
            report.cases.push(entry);
        }

        report.finished_at = Some(Utc::now());
        info!("Suite complete: {}", report.summary());
        report
    }

    /// Command line each matching case would run, or the reason it would not run
    pub fn plan<V>(&self, suite: &DecodeSuite, filter: Option<&str>, validation: V) -> Vec<(String, Result<String, CaseError>)>
    where
        V: ExtraValidation + Clone + 'a,
    {
        suite
            .filtered(filter)
            .map(|props| {
                let mut case = DecodeTestCase::new(props, self.platform, self.formats, self.runner, self.artifacts)
                    .with_validation(validation.clone());
                let line = case.validate_caps().and_then(|()| {
                    let mut decoder = case
                        .decoder()
                        .cloned()
                        .ok_or_else(|| anyhow::anyhow!("no decode configuration"))?;
                    decoder.update_decoded(self.artifacts.dir().join(format!("{}.yuv", props.artifact_name())));
                    Ok(decoder.command_line(self.runner.program())?)
                });
                (props.case.clone(), line)
            })
            .collect()
    }
}
