//! Routeguard - route pattern risk analysis CLI
//!
//! ## Commands
//!
//! - `analyze`: score patterns, optionally gate CI, compare against a
//!   baseline and write remediated patterns
//! - `cache stats`: show the persistent compile manifest
//! - `cache clear`: empty the persistent compile manifest

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn, Level};

use routeguard_core::obs::AnalysisSpan;
use routeguard_core::{
    compare, default_fixed_path, evaluate, load_baseline, load_patterns, remediate_all,
    render_remediated, render_text_report, snapshot, write_baseline, write_remediated,
    write_report_json, Analyzer, CompilationCache, GateOutcome, PersistentCacheStore,
    RegexPatternCompiler, RiskLevel, RouteguardConfig, RunReport,
};

#[derive(Parser)]
#[command(name = "routeguard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Route pattern risk analysis and CI gating", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score route patterns for security risk
    Analyze(AnalyzeArgs),

    /// Inspect or reset the persistent compile cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,

        /// Cache directory (default: platform cache dir)
        #[arg(long, env = "ROUTEGUARD_CACHE_DIR", global = true)]
        cache_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show manifest size and entry ages
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every manifest entry
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(clap::Args, Debug)]
struct AnalyzeArgs {
    /// Patterns to analyze (in addition to --file)
    patterns: Vec<String>,

    /// Newline-delimited pattern file (`#` and `//` lines are comments)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Base URL relative patterns are joined onto
    #[arg(short, long, default_value = "")]
    base: String,

    /// Report format on stdout
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Exit non-zero when the gate or baseline check fails
    #[arg(long)]
    ci: bool,

    /// Lowest level that violates the gate
    #[arg(long, default_value = "high", value_parser = parse_threshold)]
    threshold: RiskLevel,

    /// Baseline snapshot to compare against
    #[arg(long)]
    baseline: Option<PathBuf>,

    /// Write the current snapshot as a new baseline
    #[arg(long)]
    save_baseline: Option<PathBuf>,

    /// Write remediated patterns
    #[arg(long)]
    fix: bool,

    /// Remediated output path (default: <file>.fixed.txt, or stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write the full JSON report here
    #[arg(long)]
    report: Option<PathBuf>,

    /// Bound the wait on each compile (milliseconds)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Keep the compile cache in memory only
    #[arg(long, env = "ROUTEGUARD_NO_CACHE")]
    no_cache: bool,

    /// Cache directory (default: platform cache dir)
    #[arg(long, env = "ROUTEGUARD_CACHE_DIR")]
    cache_dir: Option<PathBuf>,
}

fn parse_threshold(s: &str) -> std::result::Result<RiskLevel, String> {
    s.parse::<RiskLevel>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    routeguard_core::telemetry::init_tracing(cli.json_logs, level);

    let code = match cli.command {
        Commands::Analyze(args) => cmd_analyze(args).await?,
        Commands::Cache { action, cache_dir } => {
            let config = config_with_dir(cache_dir);
            match action {
                CacheAction::Stats { json } => cmd_cache_stats(&config, json)?,
                CacheAction::Clear => cmd_cache_clear(&config)?,
            }
            0
        }
    };
    Ok(ExitCode::from(code))
}

fn config_with_dir(cache_dir: Option<PathBuf>) -> RouteguardConfig {
    let config = RouteguardConfig::from_env();
    match cache_dir {
        Some(dir) => config.with_cache_dir(dir),
        None => config,
    }
}

fn collect_patterns(args: &AnalyzeArgs) -> Result<Vec<String>> {
    let mut patterns = args.patterns.clone();
    if let Some(file) = &args.file {
        patterns.extend(load_patterns(file).context("Failed to load pattern file")?);
    }
    if patterns.is_empty() {
        bail!("no patterns given: pass them as arguments or with --file");
    }
    Ok(patterns)
}

fn build_cache(config: &RouteguardConfig) -> CompilationCache {
    let compiler = Arc::new(RegexPatternCompiler);
    if !config.persist {
        return CompilationCache::new(compiler);
    }
    let store = PersistentCacheStore::open(&config.cache_dir, config.store_options());
    CompilationCache::with_store(compiler, Arc::new(Mutex::new(store)))
}

/// Run `analyze` and return the process exit code.
async fn cmd_analyze(args: AnalyzeArgs) -> Result<u8> {
    let patterns = collect_patterns(&args)?;

    let mut config = config_with_dir(args.cache_dir.clone());
    if args.no_cache {
        config = config.with_persist(false);
    }

    let mut analyzer = Analyzer::new(build_cache(&config));
    if let Some(ms) = args.timeout_ms {
        analyzer = analyzer.with_compile_timeout(Duration::from_millis(ms));
    }

    let analysis = analyzer.analyze(&patterns, &args.base).await;
    let _span = AnalysisSpan::enter(&analysis.run_id);
    let mut report = RunReport::new(analysis);

    let gating = args.ci || args.baseline.is_some() || args.save_baseline.is_some();
    if gating {
        let assessments = &report.analysis.assessments;
        let mut outcome = GateOutcome::new(evaluate(assessments, args.threshold));
        let current = snapshot(assessments, args.threshold);

        if let Some(path) = &args.baseline {
            match load_baseline(path) {
                Ok(baseline) => outcome = outcome.with_comparison(compare(&current, &baseline)),
                Err(e) => {
                    warn!(error = %e, "baseline unavailable; gating on threshold only");
                    outcome = outcome.with_baseline_error(e.to_string());
                }
            }
        }
        if let Some(path) = &args.save_baseline {
            write_baseline(path, &current)
                .with_context(|| format!("Failed to write baseline {:?}", path))?;
            info!(path = %path.display(), "baseline saved");
        }
        report = report.with_gate(outcome);
    }

    if args.fix {
        let results = remediate_all(&patterns);
        match fixed_output_path(&args) {
            Some(path) => {
                write_remediated(&path, &results)?;
                info!(path = %path.display(), "remediated patterns written");
            }
            None if args.format == OutputFormat::Text => print!("{}", render_remediated(&results)),
            None => {}
        }
        report = report.with_remediation(results);
    }

    if let Some(path) = &args.report {
        write_report_json(path, &report)?;
    }

    match args.format {
        OutputFormat::Text => print!("{}", render_text_report(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if let Some(ms) = args.timeout_ms {
        // compiles cut off by the deadline get one more window to reach the manifest
        analyzer
            .settle_timed_out(&report.analysis, Duration::from_millis(ms))
            .await;
    }

    let code = match (&report.gate, args.ci) {
        (Some(outcome), true) => outcome.exit_code(),
        _ => 0,
    };
    Ok(u8::try_from(code).unwrap_or(1))
}

fn fixed_output_path(args: &AnalyzeArgs) -> Option<PathBuf> {
    args.output
        .clone()
        .or_else(|| args.file.as_deref().map(default_fixed_path))
}

#[derive(Serialize)]
struct ClearOutput<'a> {
    path: &'a Path,
    cleared: usize,
}

fn cmd_cache_stats(config: &RouteguardConfig, json: bool) -> Result<()> {
    let store = PersistentCacheStore::open(&config.cache_dir, config.store_options());
    let stats = store.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Cache: {}", stats.path.display());
    println!("  entries:      {}", stats.entries);
    println!("  approx size:  {} bytes", stats.approx_bytes);
    match (stats.oldest_age_ms, stats.newest_age_ms) {
        (Some(oldest), Some(newest)) => {
            println!("  oldest entry: {}s ago", oldest / 1000);
            println!("  newest entry: {}s ago", newest / 1000);
        }
        _ => println!("  (empty)"),
    }
    Ok(())
}

fn cmd_cache_clear(config: &RouteguardConfig) -> Result<()> {
    let mut store = PersistentCacheStore::open(&config.cache_dir, config.store_options());
    let cleared = store.clear();
    let path = store.path();
    let out = ClearOutput {
        path: &path,
        cleared,
    };
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}
