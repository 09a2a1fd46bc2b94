//! CLI binary for edgequake-ingest.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `IngestConfig`, runs one pipeline and writes its outputs.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_ingest::output::write_atomic;
use edgequake_ingest::{
    write_output, Capability, ChunkOptions, IngestConfig, Pipeline, PipelineProgressCallback, PipelineResult,
    ProgressCallback, WorkerSpec,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner until the page count is known, then a bar
/// with one log line per finished page.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Blocks that kept their placeholder content.
    block_errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Routing");
        bar.set_message("Classifying source…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            block_errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Analysing");
        self.bar.reset_eta();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, source: &str, kind: &str) {
        self.bar.set_prefix(match kind {
            "media" => "Transcribing",
            "stream" => "Fetching",
            _ => "Opening",
        });
        self.bar.set_message(source.to_string());
    }

    fn on_pages_discovered(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Analysing {total_pages} pages…"))
        ));
    }

    fn on_page_complete(&self, page: usize, total_pages: usize, blocks: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page,
            total_pages,
            dim(&format!("{blocks:>4} blocks")),
        ));
        self.bar.inc(1);
    }

    fn on_block_error(&self, block_id: &str, error: &str) {
        self.block_errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("    {} {}  {}", cyan("⚠"), block_id, dim(&msg)));
    }

    fn on_run_complete(&self, status: &str, error: Option<&str>) {
        self.bar.finish_and_clear();
        match error {
            None => {
                let skipped = self.block_errors.load(Ordering::SeqCst);
                if skipped == 0 {
                    eprintln!("{} {}", green("✔"), bold(status));
                } else {
                    eprintln!(
                        "{} {}  ({} blocks kept their placeholder)",
                        cyan("⚠"),
                        bold(status),
                        skipped
                    );
                }
            }
            Some(e) => eprintln!("{} {}  {}", red("✘"), bold(status), red(e)),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse a PDF with local detector workers
  ingest report.pdf \
    --worker recognize-text="python3 workers/ocr.py" \
    --worker detect-tables="python3 workers/tables.py"

  # Transcribe a recording, write chunks next to the output
  ingest interview.mp4 --worker transcribe-audio="python3 workers/asr.py" --chunks

  # Fetch a published transcript
  ingest "https://youtu.be/dQw4w9WgXcQ" \
    --transcript-endpoint "http://localhost:8080/transcripts/{id}"

  # JSON result on stdout, annotated page images in the output folder
  ingest slides.pptx --visualize --json > result.json

WORKER CAPABILITIES:
  recognize-text      page or crop image  → [{bbox, text, confidence}]
  detect-tables       page image          → [{bbox, confidence}]
  detect-handwriting  page image          → [{bbox, confidence}]
  reconstruct-table   table crop          → {markdown}
  describe-image      picture crop        → {description}
  transcribe-audio    audio file          → {language, duration, segments}

  Each worker is a long-lived process reading one JSON request per line on
  stdin and writing one JSON reply per line on stdout.

OUTPUT:
  <output-dir>/<name>/rag_ready_data.json   pages + blocks, or transcript
  <output-dir>/<name>/chunks.json           with --chunks, completed runs only
  <output-dir>/<name>/annotated_page_N.png  with --visualize (documents)

ENVIRONMENT VARIABLES:
  INGEST_WORKERS              ';'-separated CAP=CMD list (same as --worker)
  INGEST_OUTPUT_DIR           Output root (default: data_output)
  INGEST_TRANSCRIPT_ENDPOINT  Transcript URL template containing {id}
  PDFIUM_LIB_PATH             Directory holding libpdfium
  RUST_LOG                    Overrides the log filter
"#;

/// Turn documents, recordings and transcript streams into RAG-ready blocks.
#[derive(Parser, Debug)]
#[command(
    name = "ingest",
    version,
    about = "Turn documents, recordings and transcript streams into RAG-ready blocks",
    long_about = "Route a source to the document, media or stream path, reconcile layout \
detections into ordered blocks, fill tables, pictures and handwriting through model \
workers, and write rag_ready_data.json (plus optional chunks) per source.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file path or stream URL.
    source: String,

    /// Output root; results land in <DIR>/<name>/.
    #[arg(short, long, env = "INGEST_OUTPUT_DIR", default_value = "data_output")]
    output_dir: PathBuf,

    /// Worker launcher as CAPABILITY=COMMAND (repeatable).
    #[arg(
        long = "worker",
        value_name = "CAP=CMD",
        env = "INGEST_WORKERS",
        value_delimiter = ';'
    )]
    workers: Vec<String>,

    /// Seconds to wait for one worker reply.
    #[arg(long, env = "INGEST_WORKER_TIMEOUT", default_value_t = 300)]
    worker_timeout: u64,

    /// Rendering DPI for PDF pages (72–400).
    #[arg(long, env = "INGEST_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Longest rendered page side in pixels.
    #[arg(long, env = "INGEST_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// ffmpeg executable used to demux video.
    #[arg(long, env = "INGEST_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: String,

    /// Office converter executable (LibreOffice).
    #[arg(long, env = "INGEST_OFFICE", default_value = "soffice")]
    office: String,

    /// Skip office conversion and always use the structural fallback.
    #[arg(long)]
    no_office: bool,

    /// Seconds allowed for ffmpeg or the office converter.
    #[arg(long, env = "INGEST_EXTERNAL_TIMEOUT", default_value_t = 120)]
    external_timeout: u64,

    /// Transcript service URL template containing `{id}`.
    #[arg(long, env = "INGEST_TRANSCRIPT_ENDPOINT")]
    transcript_endpoint: Option<String>,

    /// Transcript fetch timeout in seconds.
    #[arg(long, env = "INGEST_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Directory holding libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "INGEST_PASSWORD")]
    password: Option<String>,

    /// File id stamped into chunk ids (default: the output name).
    #[arg(long)]
    file_id: Option<String>,

    /// Also write chunks.json for completed runs.
    #[arg(long)]
    chunks: bool,

    /// Target chunk size in characters.
    #[arg(long, default_value_t = 1000)]
    chunk_size: usize,

    /// Characters shared by neighbouring chunks.
    #[arg(long, default_value_t = 200)]
    chunk_overlap: usize,

    /// Write annotated page images next to the output.
    #[arg(long, env = "INGEST_VISUALIZE")]
    visualize: bool,

    /// Print the full result as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "INGEST_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INGEST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INGEST_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar replaces INFO logs while it is visible.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.quiet || show_progress {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = if cli.verbose { "debug" } else { filter };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run ──────────────────────────────────────────────────────────────
    let pipeline = Pipeline::new(config.clone()).context("Failed to start pipeline")?;
    let result = pipeline.run(&cli.source).await;
    pipeline.shutdown().await;

    let written = write_output(&result, &config.output_dir)
        .await
        .context("Failed to write rag_ready_data.json")?;

    let chunk_path = if cli.chunks && result.is_completed() {
        Some(write_chunks(&cli, &result, &config).await?)
    } else {
        None
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&result, written.as_ref(), chunk_path.as_ref());
    }

    if !result.is_completed() {
        bail!(
            "{} failed during {}: {}",
            result.source,
            result.stage.map(|s| s.to_string()).unwrap_or_else(|| "run".into()),
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Map CLI args to `IngestConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .dpi(cli.dpi)
        .max_rendered_pixels(cli.max_pixels)
        .worker_timeout(Duration::from_secs(cli.worker_timeout))
        .ffmpeg_program(cli.ffmpeg.clone())
        .office_program((!cli.no_office).then(|| cli.office.clone()))
        .external_timeout(Duration::from_secs(cli.external_timeout))
        .download_timeout_secs(cli.download_timeout)
        .output_dir(cli.output_dir.clone())
        .visualize(cli.visualize);

    for entry in &cli.workers {
        let (capability, spec) = parse_worker(entry)?;
        builder = builder.worker(capability, spec);
    }
    if let Some(ref endpoint) = cli.transcript_endpoint {
        builder = builder.transcript_endpoint(endpoint.clone());
    }
    if let Some(ref dir) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(dir.clone());
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse one `CAPABILITY=COMMAND` launcher.
fn parse_worker(entry: &str) -> Result<(Capability, WorkerSpec)> {
    let Some((cap, command)) = entry.split_once('=') else {
        bail!("worker must be CAPABILITY=COMMAND, got '{entry}'");
    };
    let capability = Capability::from_str(cap).map_err(anyhow::Error::msg)?;
    let spec = WorkerSpec::from_command_line(command)
        .with_context(|| format!("empty command for worker '{capability}'"))?;
    Ok((capability, spec))
}

async fn write_chunks(cli: &Cli, result: &PipelineResult, config: &IngestConfig) -> Result<PathBuf> {
    let options = ChunkOptions {
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
        ..ChunkOptions::default()
    };
    let file_id = cli.file_id.as_deref().unwrap_or(&result.name);
    let chunks = result.chunks(file_id, &options);
    let path = config.output_dir.join(&result.name).join("chunks.json");
    let json = serde_json::to_vec_pretty(&chunks).context("Failed to serialise chunks")?;
    write_atomic(&path, &json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn print_summary(result: &PipelineResult, written: Option<&PathBuf>, chunks: Option<&PathBuf>) {
    let s = &result.stats;
    let mark = if !result.is_completed() {
        red("✘")
    } else if s.recoverable_errors > 0 {
        cyan("⚠")
    } else {
        green("✔")
    };
    eprintln!(
        "{}  {}  {}  {}ms",
        mark,
        bold(&result.name),
        result.kind.as_deref().unwrap_or("unclassified"),
        s.duration_ms
    );
    if s.pages > 0 {
        eprintln!(
            "   {} pages  /  {} blocks  ({} enriched, {} dropped, {} kept placeholder)",
            s.pages,
            s.blocks,
            dim(&s.enriched_blocks.to_string()),
            dim(&s.dropped_blocks.to_string()),
            dim(&s.recoverable_errors.to_string()),
        );
    }
    if let Some(p) = written {
        eprintln!("   →  {}", bold(&p.display().to_string()));
    }
    if let Some(p) = chunks {
        eprintln!("   →  {}", bold(&p.display().to_string()));
    }
}
