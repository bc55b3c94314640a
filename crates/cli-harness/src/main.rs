use anyhow::{Context, Result};
use clap::Parser;
use harness::{
    artifacts::ArtifactStore,
    config::HarnessConfig,
    ffmpeg::FfmpegRunner,
    formats::FfmpegFormats,
    props::DecodeSuite,
    suite::SuiteContext,
    CaseError, RequireSource,
};
use log::{info, warn};
use std::path::PathBuf;
use std::process::ExitCode;

/// Hardware video decode validation harness
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Suite file listing the decode cases (JSON or TOML)
    #[arg(short, long)]
    suite: PathBuf,

    /// Only run cases whose name contains this string
    #[arg(short, long)]
    filter: Option<String>,

    /// Write the JSON report here (overrides the config file)
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Print the ffmpeg command of each case without running it
    #[arg(long)]
    dry_run: bool,

    /// Remove stale raw outputs from the artifact directory first
    #[arg(long)]
    clean: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let mut cfg = HarnessConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if args.report.is_some() {
        cfg.report_path = args.report.clone();
    }

    info!("Configuration loaded:");
    info!("  Platform: {}.{}", cfg.platform.name, cfg.platform.driver);
    info!("  Render device: {}", cfg.platform.render_device);
    info!("  Artifact dir: {}", cfg.artifact_dir.display());

    let suite = DecodeSuite::load(&args.suite).context("Failed to load suite")?;
    info!("Loaded {} case(s) from {}", suite.cases.len(), args.suite.display());

    // A missing decoder is a configuration error, never a skip
    let runner = FfmpegRunner::new(&cfg.ffmpeg_bin).context("Failed to locate ffmpeg")?;

    let artifacts = ArtifactStore::new(cfg.artifact_dir.clone(), cfg.keep_artifacts);
    let formats = FfmpegFormats;

    if args.dry_run {
        let ctx = SuiteContext { platform: &cfg.platform, formats: &formats, runner: &runner, artifacts: &artifacts };
        for (name, line) in ctx.plan(&suite, args.filter.as_deref(), RequireSource) {
            match line {
                Ok(line) => println!("{}: {}", name, line),
                Err(CaseError::Skipped(reason)) => println!("{}: skip ({})", name, reason),
                Err(e) => println!("{}: {}", name, e),
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let version = runner.detect_version().await.context("Failed to query ffmpeg version")?;
    info!("ffmpeg {}.{}.{}", version.major, version.minor, version.patch);
    if !version.meets_requirement() {
        anyhow::bail!(
            "FFmpeg version {}.{}.{} does not meet requirement (>= 5.1)",
            version.major, version.minor, version.patch
        );
    }

    match runner.detect_hwaccels().await {
        Ok(hwaccels) => {
            info!("hwaccels: {}", hwaccels.join(", "));
            cfg.platform.hwaccels = Some(hwaccels);
        }
        Err(e) => warn!("Could not list ffmpeg hwaccels, assuming all are available: {:#}", e),
    }

    if args.clean {
        artifacts.sweep().context("Failed to clean artifact directory")?;
    }

    let ctx = SuiteContext { platform: &cfg.platform, formats: &formats, runner: &runner, artifacts: &artifacts };
    let report = ctx.run(&suite, args.filter.as_deref(), RequireSource).await;

    if let Some(path) = &cfg.report_path {
        report.save(path)?;
        info!("Report written to {}", path.display());
    }

    println!("{}", report.summary());
    Ok(if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
