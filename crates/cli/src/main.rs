use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use uuid::Uuid;

use scan2doc_core::model::{ArtifactFormat, PageId, PageStatus};
use scan2doc_core::EngineConfig;
use scan2doc_server::ingest::{IncomingFile, IngestOpts};
use scan2doc_server::AppState;

#[derive(Parser)]
#[command(name = "scan2doc", version, about = "Document-processor page-lifecycle engine")]
struct Cli {
    /// Path to the SQLite database file backing the engine
    #[arg(long, global = true, default_value = "scan2doc.db")]
    db: PathBuf,

    /// Base URL of the remote OCR service
    #[arg(long, global = true, default_value = "http://localhost:8088")]
    ocr_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest images and PDFs, rendering each into pages
    Ingest(IngestArgs),
    /// Submit ready pages for OCR
    Ocr(OcrArgs),
    /// Export a document from OCR'd pages
    Export(ExportArgs),
    /// Run the HTTP + WebSocket API server
    Serve(ServeArgs),
}

#[derive(Parser)]
struct IngestArgs {
    /// Image or PDF files to ingest
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Wait for rendering to finish on every ingested page before exiting
    #[arg(long)]
    wait: bool,
}

#[derive(Parser)]
struct OcrArgs {
    /// Specific page ids to submit; if omitted, every `ready` page is submitted
    #[arg(long, value_delimiter = ',')]
    page_ids: Vec<Uuid>,

    /// Wait for every submitted page to reach a terminal OCR status before exiting
    #[arg(long)]
    wait: bool,
}

#[derive(Parser)]
struct ExportArgs {
    /// Page ids to include in the exported document
    #[arg(required = true, value_delimiter = ',')]
    page_ids: Vec<Uuid>,

    /// Output format
    #[arg(long, default_value = "pdf", value_parser = ["markdown", "docx", "pdf"])]
    format: String,

    /// Output file path
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Parser)]
struct ServeArgs {
    /// Bind address
    #[arg(long, default_value = "0.0.0.0:3000")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig::default();
    config.ocr_base_url = cli.ocr_url.clone();

    match cli.command {
        Commands::Ingest(args) => run_ingest(&cli.db, config, args).await?,
        Commands::Ocr(args) => run_ocr(&cli.db, config, args).await?,
        Commands::Export(args) => run_export(&cli.db, config, args).await?,
        Commands::Serve(args) => run_serve(&cli.db, config, args).await?,
    }

    Ok(())
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
    );
    bar.enable_steady_tick(Duration::from_millis(80));
    bar.set_message(message.to_string());
    bar
}

async fn run_ingest(db: &PathBuf, config: EngineConfig, args: IngestArgs) -> Result<()> {
    let state = AppState::bootstrap(db, config).await.context("failed to open engine store")?;

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let media_type = guess_media_type(path);
        files.push(IncomingFile { filename, media_type, bytes });
    }

    let bar = spinner(&format!("ingesting {} file(s)", files.len()));
    let result = state.ingestor.ingest_files(files, IngestOpts::default()).await;
    bar.finish_and_clear();

    println!("ingested {} page(s)", result.pages.len());
    if let Some(error) = &result.error {
        println!("warning: {error}");
    }

    if args.wait {
        let ids: Vec<PageId> = result.pages.iter().map(|p| p.id).collect();
        wait_for(&state, &ids, |status| {
            matches!(status, PageStatus::Ready | PageStatus::Error)
        })
        .await;
    }

    for page in &result.pages {
        println!("  {} {:?} — {}", page.id.0, page.status, page.filename);
    }

    Ok(())
}

async fn run_ocr(db: &PathBuf, config: EngineConfig, args: OcrArgs) -> Result<()> {
    let state = AppState::bootstrap(db, config).await.context("failed to open engine store")?;

    let ids: Vec<PageId> = if args.page_ids.is_empty() {
        state
            .pages
            .pages_by_status(PageStatus::Ready)
            .await
            .into_iter()
            .map(|p| p.id)
            .collect()
    } else {
        args.page_ids.into_iter().map(PageId).collect()
    };

    if ids.is_empty() {
        bail!("no pages are ready for OCR");
    }

    let bar = spinner(&format!("submitting {} page(s) for OCR", ids.len()));
    let outcome = state.ocr.submit_batch(&ids).await?;
    bar.finish_and_clear();

    println!("admitted {}, skipped {}", outcome.admitted, outcome.skipped);

    if args.wait {
        wait_for(&state, &ids, |status| {
            matches!(status, PageStatus::OcrSuccess | PageStatus::Error)
        })
        .await;
        for id in &ids {
            if let Some(page) = state.pages.get(*id).await {
                println!("  {} {:?}", page.id.0, page.status);
            }
        }
    }

    Ok(())
}

async fn run_export(db: &PathBuf, config: EngineConfig, args: ExportArgs) -> Result<()> {
    let state = AppState::bootstrap(db, config).await.context("failed to open engine store")?;

    let format = match args.format.as_str() {
        "markdown" => ArtifactFormat::Markdown,
        "docx" => ArtifactFormat::Docx,
        "pdf" => ArtifactFormat::Pdf,
        other => bail!("unknown format: {other}"),
    };
    let ids: Vec<PageId> = args.page_ids.into_iter().map(PageId).collect();

    let bar = spinner("generating document");
    let outcome = state.docgen.export_document(&ids, format).await?;
    bar.finish_and_clear();

    match outcome {
        scan2doc_server::docgen::ExportOutcome::Ready { bytes, filename, .. } => {
            tokio::fs::write(&args.output, &bytes)
                .await
                .with_context(|| format!("failed to write {}", args.output.display()))?;
            println!("wrote {} bytes to {} (source: {filename})", bytes.len(), args.output.display());
        }
        scan2doc_server::docgen::ExportOutcome::SomeNotReady { not_ready, total } => {
            bail!("{} of {total} page(s) are not ready for export", not_ready.len());
        }
    }

    Ok(())
}

async fn run_serve(db: &PathBuf, config: EngineConfig, args: ServeArgs) -> Result<()> {
    let state = AppState::bootstrap(db, config).await.context("failed to open engine store")?;
    let app = scan2doc_server::create_app(state);

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    println!("\n{}", "=".repeat(60));
    println!("Scan2Doc — API server");
    println!("  HTTP:      http://{}", args.bind);
    println!("  WebSocket: ws://{}/ws", args.bind);
    println!("{}\n", "=".repeat(60));

    axum::serve(listener, app).await?;
    Ok(())
}

async fn wait_for(state: &Arc<AppState>, ids: &[PageId], done: impl Fn(PageStatus) -> bool) {
    loop {
        let mut all_done = true;
        for id in ids {
            match state.pages.get(*id).await {
                Some(page) if done(page.status) => {}
                _ => {
                    all_done = false;
                    break;
                }
            }
        }
        if all_done {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn guess_media_type(path: &PathBuf) -> String {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("pdf") => "application/pdf".to_string(),
        Some("png") => "image/png".to_string(),
        Some("jpg") | Some("jpeg") => "image/jpeg".to_string(),
        Some("webp") => "image/webp".to_string(),
        Some("tif") | Some("tiff") => "image/tiff".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}
