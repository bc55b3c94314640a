use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use anyhow::{anyhow, Result};
use crate::ffmpeg::CommandRunner;

/// Stands in for ffmpeg: records every call and writes canned bytes to the
/// output path (the last argument)
pub(crate) struct FakeRunner {
    program: PathBuf,
    output: String,
    failure: Option<String>,
    payloads: Mutex<VecDeque<Vec<u8>>>,
    calls: Mutex<Vec<(Vec<String>, Option<Duration>)>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        FakeRunner {
            program: PathBuf::from("ffmpeg"),
            output: "Output #0, rawvideo, to 'out.yuv'".to_string(),
            failure: None,
            payloads: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_output(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }

    /// Bytes written by successive calls; once exhausted every call writes "frame"
    pub(crate) fn with_payloads(self, payloads: Vec<Vec<u8>>) -> Self {
        *self.payloads.lock().unwrap() = payloads.into();
        self
    }

    pub(crate) fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().iter().map(|c| c.0.clone()).collect()
    }

    pub(crate) fn timeouts(&self) -> Vec<Option<Duration>> {
        self.calls.lock().unwrap().iter().map(|c| c.1).collect()
    }
}

impl CommandRunner for FakeRunner {
    fn program(&self) -> &Path {
        &self.program
    }

    async fn run(&self, args: &[String], timeout: Option<Duration>) -> Result<String> {
        self.calls.lock().unwrap().push((args.to_vec(), timeout));

        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }

        let target = args.last().ok_or_else(|| anyhow!("no output path"))?;
        let payload = self.payloads.lock().unwrap().pop_front().unwrap_or_else(|| b"frame".to_vec());
        std::fs::write(target, payload)?;
        Ok(self.output.clone())
    }
}
