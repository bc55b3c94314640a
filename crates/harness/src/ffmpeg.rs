use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Lines of stderr kept in a failure message
const STDERR_TAIL_LINES: usize = 20;

/// Runs the decoder executable.
///
/// `args` excludes the program itself. Returns the captured output text;
/// a non-zero exit status, a spawn failure or an expired timeout is an error.
pub trait CommandRunner {
    fn program(&self) -> &Path;

    fn run(&self, args: &[String], timeout: Option<Duration>) -> impl Future<Output = Result<String>>;
}

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FFmpegVersion {
    /// `-fps_mode` needs 5.1 or later
    pub fn meets_requirement(&self) -> bool {
        (self.major, self.minor) >= (5, 1)
    }

    /// Parse version from FFmpeg version string
    /// Example: "ffmpeg version 6.1.1" -> FFmpegVersion { major: 6, minor: 1, patch: 1 }
    pub fn parse(version_str: &str) -> Result<Self> {
        // First token starting with a digit; distro builds append suffixes ("6.1.1-3ubuntu5")
        let version_part = version_str
            .split_whitespace()
            .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
            .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        let numeric: String = version_part
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let mut parts = numeric.split('.').filter(|p| !p.is_empty());

        let major = parts
            .next()
            .ok_or_else(|| anyhow!("Invalid version format: {}", version_str))?
            .parse::<u32>()
            .with_context(|| format!("Failed to parse major version from: {}", version_part))?;
        let minor = parts.next().map(|p| p.parse::<u32>()).transpose()
            .with_context(|| format!("Failed to parse minor version from: {}", version_part))?
            .unwrap_or(0);
        let patch = parts.next().map(|p| p.parse::<u32>()).transpose()
            .with_context(|| format!("Failed to parse patch version from: {}", version_part))?
            .unwrap_or(0);

        Ok(FFmpegVersion { major, minor, patch })
    }
}

/// Locate the decoder executable.
///
/// A path with a directory component must exist as given; a bare name is
/// searched on `PATH`. Not finding it is a configuration error.
pub fn resolve_binary(bin: &Path) -> Result<PathBuf> {
    if bin.components().count() > 1 || bin.is_absolute() {
        if bin.is_file() {
            return Ok(bin.to_path_buf());
        }
        return Err(anyhow!("Decoder executable not found: {}", bin.display()));
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| anyhow!("Decoder executable {} not found on PATH", bin.display()))
}

/// Parse the method list printed by `ffmpeg -hwaccels`
pub fn parse_hwaccels(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|l| !l.trim_start().starts_with("Hardware acceleration methods"))
        .skip(1)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// ffmpeg subprocess runner
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    pub ffmpeg_bin: PathBuf,
}

impl FfmpegRunner {
    /// Resolve the binary; fails when it cannot be found
    pub fn new(ffmpeg_bin: &Path) -> Result<Self> {
        let ffmpeg_bin = resolve_binary(ffmpeg_bin)?;
        info!("Using decoder executable {}", ffmpeg_bin.display());
        Ok(FfmpegRunner { ffmpeg_bin })
    }

    /// Detect FFmpeg version
    pub async fn detect_version(&self) -> Result<FFmpegVersion> {
        let output = self.run(&["-version".to_string()], Some(Duration::from_secs(30))).await?;
        let first_line = output
            .lines()
            .next()
            .ok_or_else(|| anyhow!("Empty output from FFmpeg -version"))?;
        FFmpegVersion::parse(first_line)
    }

    /// hwaccel methods compiled into the binary
    pub async fn detect_hwaccels(&self) -> Result<Vec<String>> {
        let args = ["-hide_banner".to_string(), "-hwaccels".to_string()];
        let output = self.run(&args, Some(Duration::from_secs(30))).await?;
        Ok(parse_hwaccels(&output))
    }
}

impl CommandRunner for FfmpegRunner {
    fn program(&self) -> &Path {
        &self.ffmpeg_bin
    }

    /// Spawn ffmpeg, capture stdout/stderr concurrently and wait with an optional timeout
    async fn run(&self, args: &[String], timeout: Option<Duration>) -> Result<String> {
        let cmd_str = format!("{} {}", self.ffmpeg_bin.display(), args.join(" "));
        debug!("Executing FFmpeg: {}", cmd_str);

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(args);
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn()
            .with_context(|| format!(
                "Failed to spawn FFmpeg process at: {}. Ensure FFmpeg is installed and accessible.",
                self.ffmpeg_bin.display()
            ))?;

        let stdout = child.stdout.take()
            .ok_or_else(|| anyhow!("Failed to capture FFmpeg stdout"))?;
        let stderr = child.stderr.take()
            .ok_or_else(|| anyhow!("Failed to capture FFmpeg stderr"))?;

        let stdout_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            let mut line_stream = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = line_stream.next_line().await {
                lines.push(line);
            }
            lines
        });
        let stderr_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            let mut line_stream = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = line_stream.next_line().await {
                lines.push(line);
            }
            lines
        });

        let status = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(result) => result.context("Failed to wait for FFmpeg process")?,
                Err(_) => {
                    child.kill().await.context("Failed to kill stuck FFmpeg process")?;
                    return Err(anyhow!(
                        "FFmpeg process timed out after {:?}. Process was killed.\nCommand: {}",
                        limit,
                        cmd_str
                    ));
                }
            },
            None => child.wait().await.context("Failed to wait for FFmpeg process")?,
        };

        let stdout = stdout_handle.await.context("Failed to read FFmpeg stdout")?;
        let stderr = stderr_handle.await.context("Failed to read FFmpeg stderr")?;

        if !status.success() {
            let tail = stderr[stderr.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return Err(anyhow!(
                "FFmpeg failed (exit code: {})\nCommand: {}\nSTDERR:\n{}",
                status.code().unwrap_or(-1),
                cmd_str,
                tail
            ));
        }

        Ok(stdout.into_iter().chain(stderr).collect::<Vec<_>>().join("\n"))
    }
}
