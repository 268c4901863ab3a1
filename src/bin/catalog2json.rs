//! CLI binary for edgequake-catalog.
//!
//! A thin shim over the library crate: maps flags to `ExtractionConfig`,
//! drives a progress bar from the run's progress channel and prints the
//! records as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_catalog::extract::write_atomic;
use edgequake_catalog::pipeline::input::resolve_input;
use edgequake_catalog::{
    inspect, start_run, Brand, ExtractionConfig, LlmInference, PageSelection, PdfDocument,
    RecordBatch, RunResult,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
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

fn progress_bar(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold}  \
         [{bar:42.green/238}] {pos:>3}/{len} pages  \
         ⏱ {elapsed_precise}  ETA {eta_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(TICKS);
    bar.set_style(style);
    bar.set_prefix("Extracting");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Records as a JSON array on stdout
  catalog2json natura-c09.pdf --brand natura

  # Write to a file, stamping a campaign on every record
  catalog2json esika-c12.pdf --brand belcorp --campaign 202512 -o products.json

  # Records as JSON Lines while pages complete
  catalog2json catalog.pdf --stream > products.jsonl

  # Full report (records, per-page status, stats)
  catalog2json catalog.pdf --report -o report.json

  # Some pages only, fail the command if any page fails
  catalog2json catalog.pdf --pages 2-10 --strict

  # Page count and metadata (no API key needed)
  catalog2json --inspect-only catalog.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium when it is not on the library path
  CATALOG2JSON_*          Any flag, e.g. CATALOG2JSON_CONCURRENCY=2

Press Ctrl-C once to stop dispatching new pages; pages already running
finish and their records are still written.
"#;

/// Extract product listings from PDF catalogs using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "catalog2json",
    version,
    about = "Extract product listings from PDF catalogs using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "CATALOG2JSON_OUTPUT")]
    output: Option<PathBuf>,

    /// Catalog family: belcorp (esika, lbel, cyzone), natura, generic.
    #[arg(long, env = "CATALOG2JSON_BRAND", default_value = "generic")]
    brand: String,

    /// Campaign stamped on records that do not show one.
    #[arg(long, env = "CATALOG2JSON_CAMPAIGN")]
    campaign: Option<String>,

    /// Text file replacing the brand's built-in instructions.
    #[arg(long, env = "CATALOG2JSON_INSTRUCTIONS")]
    instructions: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-mini, gemini-2.0-flash).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Pages in flight at once.
    #[arg(short, long, env = "CATALOG2JSON_CONCURRENCY", default_value_t = 3)]
    concurrency: usize,

    /// Attempts per page, including the first.
    #[arg(long, env = "CATALOG2JSON_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Backoff unit in milliseconds; retry k waits base * 2^k.
    #[arg(long, env = "CATALOG2JSON_BASE_DELAY_MS", default_value_t = 1000)]
    base_delay_ms: u64,

    /// Render scale (0.5–4.0).
    #[arg(long, env = "CATALOG2JSON_SCALE", default_value_t = 1.5)]
    scale: f32,

    /// Cap on the longest rendered edge, in pixels.
    #[arg(long, env = "CATALOG2JSON_MAX_PIXELS", default_value_t = 2400)]
    max_pixels: u32,

    /// JPEG quality of page images (1–100).
    #[arg(long, env = "CATALOG2JSON_JPEG_QUALITY", default_value_t = 85)]
    jpeg_quality: u8,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "CATALOG2JSON_PAGES", default_value = "all")]
    pages: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "CATALOG2JSON_PASSWORD")]
    password: Option<String>,

    /// Max LLM output tokens per page.
    #[arg(long, env = "CATALOG2JSON_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "CATALOG2JSON_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Output the full report (records, pages, stats) instead of records only.
    #[arg(long, env = "CATALOG2JSON_REPORT")]
    report: bool,

    /// Print records as JSON Lines as soon as each page completes.
    #[arg(long, env = "CATALOG2JSON_STREAM", conflicts_with = "report")]
    stream: bool,

    /// Exit with an error if any page failed or was skipped.
    #[arg(long, env = "CATALOG2JSON_STRICT")]
    strict: bool,

    /// Disable progress bar.
    #[arg(long, env = "CATALOG2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CATALOG2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CATALOG2JSON_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "CATALOG2JSON_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "CATALOG2JSON_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose brings them back.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let info = inspect(&cli.input, cli.password.clone(), cli.download_timeout)
            .await
            .context("Failed to inspect PDF")?;
        println!("File:         {}", cli.input);
        if let Some(ref t) = info.title {
            println!("Title:        {}", t);
        }
        if let Some(ref a) = info.author {
            println!("Author:       {}", a);
        }
        println!("Pages:        {}", info.page_count);
        println!("PDF Version:  {}", info.pdf_version);
        if let Some(ref p) = info.producer {
            println!("Producer:     {}", p);
        }
        return Ok(());
    }

    let config = build_config(&cli).await?;

    // ── Open document and provider ───────────────────────────────────────
    let resolved = resolve_input(&cli.input, config.download_timeout_secs)
        .await
        .context("Failed to open input")?;
    let service = LlmInference::from_config(&config).context("No LLM provider")?;
    let document = PdfDocument::open(resolved, config.password.clone())
        .await
        .context("Failed to open PDF")?;

    let mut run = start_run(
        Arc::new(document),
        Arc::new(service),
        config.brand_instructions(),
        &config,
    )
    .context("Extraction could not start")?;

    // ── Ctrl-C stops dispatch ────────────────────────────────────────────
    let token = run.cancellation_token();
    let quiet = cli.quiet;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if !quiet {
                eprintln!("{} stopping after pages in flight…", cyan("◆"));
            }
            token.cancel();
        }
    });

    let bar = show_progress.then(|| progress_bar(run.total_pages()));
    if let Some(ref b) = bar {
        b.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Extracting {} pages ({})…",
                run.total_pages(),
                config.brand
            ))
        ));
    }

    // ── Drain progress and batches until the run closes both ─────────────
    let stdout = io::stdout();
    let mut progress_open = true;
    let mut batches_open = true;
    while progress_open || batches_open {
        tokio::select! {
            p = run.progress.recv(), if progress_open => match p {
                Some(p) => {
                    if let Some(ref b) = bar {
                        b.set_position(p.completed_pages as u64);
                    }
                }
                None => progress_open = false,
            },
            batch = run.batches.recv(), if batches_open => match batch {
                Some(batch) => {
                    if let Some(ref b) = bar {
                        b.println(format!(
                            "  {} Page {:>3}  {}",
                            green("✓"),
                            batch.page_number,
                            dim(&format!("{} products", batch.records.len())),
                        ));
                    }
                    if cli.stream {
                        write_jsonl(&mut stdout.lock(), &batch)?;
                    }
                }
                None => batches_open = false,
            },
        }
    }

    let result = run.finish().await.context("Extraction failed")?;
    if let Some(b) = bar {
        b.finish_and_clear();
    }

    // ── Output ───────────────────────────────────────────────────────────
    if !cli.stream {
        let json = if cli.report {
            serde_json::to_vec_pretty(&result)
        } else {
            serde_json::to_vec_pretty(&result.records)
        }
        .context("Failed to serialise output")?;

        match cli.output {
            Some(ref path) => write_atomic(path, &json)
                .await
                .context("Failed to write output")?,
            None => {
                let mut handle = stdout.lock();
                handle.write_all(&json).context("Failed to write to stdout")?;
                handle.write_all(b"\n").ok();
            }
        }
    }

    if !cli.quiet {
        print_summary(&result, cli.output.as_ref());
    }

    if cli.strict {
        result.ensure_complete().context("Strict mode")?;
    }

    Ok(())
}

/// One JSON object per line, one line per record.
fn write_jsonl(out: &mut impl Write, batch: &RecordBatch) -> Result<()> {
    for record in &batch.records {
        serde_json::to_writer(&mut *out, record).context("Failed to serialise record")?;
        out.write_all(b"\n").context("Failed to write to stdout")?;
    }
    out.flush().ok();
    Ok(())
}

fn print_summary(result: &RunResult, output: Option<&PathBuf>) {
    let s = &result.stats;

    for page in result.pages.iter().filter(|p| p.failed) {
        let msg = page
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default();
        let msg = if msg.chars().count() > 100 {
            format!("{}…", msg.chars().take(99).collect::<String>())
        } else {
            msg
        };
        eprintln!("  {} {}", red("✗"), red(&msg));
    }

    let mark = if s.failed_pages == 0 && s.skipped_pages == 0 {
        green("✔")
    } else if s.pages_with_records == 0 {
        red("✘")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{}  {} products from {}/{} pages  ({} failed, {} skipped)  {}ms{}",
        mark,
        bold(&s.total_records.to_string()),
        s.pages_with_records,
        s.total_pages,
        s.failed_pages,
        s.skipped_pages,
        s.total_duration_ms,
        output
            .map(|p| format!("  →  {}", bold(&p.display().to_string())))
            .unwrap_or_default(),
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&s.total_input_tokens.to_string()),
        dim(&s.total_output_tokens.to_string()),
    );
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli) -> Result<ExtractionConfig> {
    let brand: Brand = cli.brand.parse().map_err(anyhow::Error::msg)?;
    let pages = parse_pages(&cli.pages)?;

    let mut builder = ExtractionConfig::builder()
        .brand(brand)
        .concurrency(cli.concurrency)
        .max_attempts(cli.max_attempts)
        .base_delay_ms(cli.base_delay_ms)
        .scale(cli.scale)
        .max_rendered_pixels(cli.max_pixels)
        .jpeg_quality(cli.jpeg_quality)
        .pages(pages)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref path) = cli.instructions {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read instructions from {:?}", path))?;
        builder = builder.instructions(text);
    }
    if let Some(ref c) = cli.campaign {
        builder = builder.campaign(c.clone());
    }
    if let Some(ref m) = cli.model {
        builder = builder.model(m.clone());
    }
    if let Some(ref p) = cli.provider {
        builder = builder.provider_name(p.clone());
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }
        return Ok(PageSelection::Set(pages));
    }

    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}
