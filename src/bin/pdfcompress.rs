//! CLI binary for convertmorph-compress.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `CompressorConfig`, shows progress and writes results.

use anyhow::{Context, Result};
use clap::Parser;
use convertmorph_compress::compress::write_atomic;
use convertmorph_compress::pipeline::input::{default_output_path, load_input};
use convertmorph_compress::{
    AbortController, CompressionError, CompressionLevel, CompressionProgressCallback, CompressionResult,
    Compressor, CompressorConfig, ExecutionMode, InputFile, LevelPolicy, ProgressCallback, ProgressEvent,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:>6.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(100);
        bar.set_style(style);
        bar.set_prefix("start");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    /// Remove the bar when no terminal 100% event will arrive.
    fn clear(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

fn mode_label(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::Local => "local",
        ExecutionMode::Remote => "server",
    }
}

impl CompressionProgressCallback for CliProgressCallback {
    fn on_progress(&self, event: &ProgressEvent) {
        self.bar.set_prefix(mode_label(event.mode));
        // A fallback attempt restarts from a lower percent.
        self.bar.set_position(event.percent as u64);
        match &event.estimated_time_remaining {
            Some(eta) => self.bar.set_message(format!("{}  {}", event.message, dim(&format!("~{eta} left")))),
            None => self.bar.set_message(event.message.clone()),
        }
        if event.percent == 100 {
            self.bar.finish_and_clear();
        }
    }

    fn on_fallback(&self, from: ExecutionMode, to: ExecutionMode, reason: &str) {
        self.bar.println(format!(
            "  {} {} compression failed, retrying {}: {}",
            cyan("⚠"),
            mode_label(from),
            mode_label(to),
            dim(reason)
        ));
        self.bar.reset_eta();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Compress next to the input (scan-compressed.pdf)
  pdfcompress scan.pdf

  # Explicit output and level
  pdfcompress scan.pdf -o small.pdf --level light

  # Large files go to the server
  pdfcompress --endpoint https://convertmorph.example/api/compress-pdf big.pdf

  # A batch, four at a time, into a directory, with a JSON report
  pdfcompress *.pdf --out-dir compressed/ --concurrency 4 --json

ROUTING:
  Files smaller than --threshold-mb (default 20) are compressed locally;
  larger ones are uploaded to --endpoint. If the first attempt fails the
  other mode is tried once, unless --no-fallback is given or a server
  failure hits a file larger than --max-local-mb.

ENVIRONMENT VARIABLES:
  CONVERTMORPH_ENDPOINT      Remote compression endpoint URL
  CONVERTMORPH_LEVEL         Default level (light, medium, strong)
  CONVERTMORPH_THRESHOLD_MB  Local/remote threshold in MiB
  RUST_LOG                   Log filter, overrides -v / -q
"#;

#[derive(Parser, Debug)]
#[command(
    name = "pdfcompress",
    version,
    about = "Compress PDF files locally or on a ConvertMorph server",
    long_about = "Compress PDF files by downsampling and re-encoding their images. Small files \
are processed on this machine; large ones are sent to a compression endpoint, with a single \
fallback into the other mode when the first attempt fails.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files or HTTP(S) URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Output file (single input only). Default: <stem>-compressed.pdf next to the input.
    #[arg(short, long, conflicts_with = "out_dir")]
    output: Option<PathBuf>,

    /// Directory for compressed files.
    #[arg(long, env = "CONVERTMORPH_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// Compression level.
    #[arg(short, long, env = "CONVERTMORPH_LEVEL", value_enum, default_value = "medium")]
    level: LevelArg,

    /// Remote compression endpoint.
    #[arg(long, env = "CONVERTMORPH_ENDPOINT")]
    endpoint: Option<String>,

    /// Files at or above this size (MiB) go to the server.
    #[arg(long, env = "CONVERTMORPH_THRESHOLD_MB", default_value_t = 20)]
    threshold_mb: u64,

    /// Largest file (MiB) that may fall back to local processing.
    #[arg(long, env = "CONVERTMORPH_MAX_LOCAL_MB", default_value_t = 50)]
    max_local_mb: u64,

    /// Never retry a failed attempt in the other mode.
    #[arg(long)]
    no_fallback: bool,

    /// Allow the `strong` level.
    #[arg(long, env = "CONVERTMORPH_ENABLE_STRONG")]
    enable_strong: bool,

    /// Files compressed at once in batch mode.
    #[arg(short, long, env = "CONVERTMORPH_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// Print a JSON report on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// HTTP download timeout for URL inputs, in seconds.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LevelArg {
    Light,
    Medium,
    Strong,
}

impl From<LevelArg> for CompressionLevel {
    fn from(v: LevelArg) -> Self {
        match v {
            LevelArg::Light => CompressionLevel::Light,
            LevelArg::Medium => CompressionLevel::Medium,
            LevelArg::Strong => CompressionLevel::Strong,
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    input: &'a str,
    output: Option<String>,
    #[serde(flatten)]
    result: Option<&'a CompressionResult>,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar provides all the feedback that matters while it is shown.
    let single = cli.inputs.len() == 1;
    let show_progress = single && !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    if cli.output.is_some() && !single {
        anyhow::bail!("--output needs exactly one input; use --out-dir for several");
    }

    let config = build_config(&cli)?;
    let level: CompressionLevel = cli.level.into();
    let compressor = Compressor::new(config);

    if single {
        run_single(&cli, &compressor, level, show_progress).await
    } else {
        run_batch(&cli, &compressor, level).await
    }
}

fn build_config(cli: &Cli) -> Result<CompressorConfig> {
    let mib = convertmorph_compress::config::MIB;
    let mut levels = LevelPolicy::default();
    if cli.enable_strong {
        levels = levels.enable(CompressionLevel::Strong);
    }

    let mut builder = CompressorConfig::builder()
        .local_threshold_bytes(cli.threshold_mb.saturating_mul(mib))
        .max_local_bytes(cli.max_local_mb.saturating_mul(mib))
        .fallback(!cli.no_fallback)
        .download_timeout_secs(cli.download_timeout)
        .levels(levels);
    if let Some(ref endpoint) = cli.endpoint {
        builder = builder.remote_endpoint(endpoint.clone());
    }
    builder.build().context("Invalid configuration")
}

fn output_path_for(cli: &Cli, input: &str) -> PathBuf {
    if let Some(ref out) = cli.output {
        return out.clone();
    }
    let default = default_output_path(input);
    match cli.out_dir {
        Some(ref dir) => dir.join(default.file_name().unwrap_or(default.as_os_str())),
        None => default,
    }
}

async fn run_single(cli: &Cli, compressor: &Compressor, level: CompressionLevel, show_progress: bool) -> Result<()> {
    let input = &cli.inputs[0];
    let file = load_input(input, cli.download_timeout)
        .await
        .with_context(|| format!("Failed to load {input}"))?;

    let controller = AbortController::new();
    let signal = controller.signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            controller.abort();
        }
    });

    let bar = show_progress.then(CliProgressCallback::new);
    let progress: Option<ProgressCallback> = bar
        .clone()
        .map(|b| b as Arc<dyn CompressionProgressCallback>);

    let outcome = compressor.compress_with_abort(&file, level, progress, signal).await;
    if let Some(ref bar) = bar {
        bar.clear();
    }
    let result = match outcome {
        Ok(r) => r,
        Err(CompressionError::Cancelled { .. }) => {
            eprintln!("{} cancelled", red("✘"));
            std::process::exit(130);
        }
        Err(e) => return Err(e).context("Compression failed"),
    };

    let output_path = output_path_for(cli, input);
    write_atomic(&output_path, &result.blob)
        .await
        .context("Failed to write output")?;

    if cli.json {
        let report = Report {
            input,
            output: Some(output_path.display().to_string()),
            result: Some(&result),
            error: None,
        };
        println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialise report")?);
    } else if !cli.quiet {
        print_summary(&result, &output_path);
    }
    Ok(())
}

async fn run_batch(cli: &Cli, compressor: &Compressor, level: CompressionLevel) -> Result<()> {
    let mut loaded: Vec<(&str, InputFile)> = Vec::new();
    let mut reports: Vec<Report<'_>> = Vec::new();
    let mut failures = 0usize;

    for input in &cli.inputs {
        match load_input(input, cli.download_timeout).await {
            Ok(file) => loaded.push((input.as_str(), file)),
            Err(e) => {
                failures += 1;
                if !cli.quiet && !cli.json {
                    eprintln!("  {} {}  {}", red("✗"), input, red(&e.to_string()));
                }
                reports.push(Report {
                    input,
                    output: None,
                    result: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let files: Vec<InputFile> = loaded.iter().map(|(_, f)| f.clone()).collect();
    let results = tokio::select! {
        r = compressor.compress_batch(&files, level, cli.concurrency) => r,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{} cancelled", red("✘"));
            std::process::exit(130);
        }
    };

    let mut outcomes: Vec<(&str, Option<PathBuf>, Result<CompressionResult, CompressionError>)> = Vec::new();
    for ((input, _), result) in loaded.iter().zip(results) {
        let outcome = match result {
            Ok(r) => {
                let path = output_path_for(cli, input);
                match write_atomic(&path, &r.blob).await {
                    Ok(()) => (*input, Some(path), Ok(r)),
                    Err(e) => (*input, None, Err(e)),
                }
            }
            Err(e) => (*input, None, Err(e)),
        };
        outcomes.push(outcome);
    }

    for (input, path, outcome) in &outcomes {
        match outcome {
            Ok(r) => {
                if !cli.quiet && !cli.json {
                    if let Some(p) = path {
                        print_summary(r, p);
                    }
                }
                reports.push(Report {
                    input,
                    output: path.as_ref().map(|p| p.display().to_string()),
                    result: Some(r),
                    error: None,
                });
            }
            Err(e) => {
                failures += 1;
                if !cli.quiet && !cli.json {
                    eprintln!("  {} {}  {}", red("✗"), input, red(&e.to_string()));
                }
                reports.push(Report {
                    input,
                    output: None,
                    result: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports).context("Failed to serialise report")?);
    } else if !cli.quiet {
        let ok = cli.inputs.len() - failures;
        eprintln!(
            "{} {}/{} files compressed",
            if failures == 0 { green("✔") } else { cyan("⚠") },
            bold(&ok.to_string()),
            cli.inputs.len()
        );
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} files failed", cli.inputs.len());
    }
    Ok(())
}

fn print_summary(result: &CompressionResult, output_path: &Path) {
    eprintln!(
        "{}  {} → {}  {}  {}  →  {}",
        green("✔"),
        human_size(result.original_size),
        human_size(result.compressed_size),
        bold(&ratio_phrase(result.ratio)),
        dim(&format!(
            "{}{} · {} · {}ms",
            mode_label(result.method),
            if result.fallback_used { " (fallback)" } else { "" },
            result.content_profile,
            result.processing_time_ms
        )),
        bold(&output_path.display().to_string()),
    );
}

/// "42.0% smaller", or "5.0% larger" when the output grew.
fn ratio_phrase(ratio: f64) -> String {
    if ratio < 0.0 {
        format!("{:.1}% larger", -ratio)
    } else {
        format!("{ratio:.1}% smaller")
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
