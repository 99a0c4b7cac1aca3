use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use folio_core::config::project_dirs;
use folio_core::{
    Command, DocumentInfo, EngineConfig, FileStateStore, FlowPosition, HighlightColor,
    Location, MatchLocation, ReaderSession, Rect, RenderRequest, SearchMatch, Selection,
    SessionEvent, StateStore, WindowState,
};
use folio_render::FormatProvider;
use serde::Serialize;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "folio",
    version,
    about = "Search, outline and page-window queries over PDF and EPUB documents"
)]
struct Args {
    /// Engine configuration file (defaults to config.toml in the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Print document metadata
    Info { file: PathBuf },
    /// Find every occurrence of a query
    Search {
        file: PathBuf,
        query: String,
        /// Zoom used for the reported highlight rectangles
        #[arg(long, default_value_t = 1.0)]
        scale: f32,
    },
    /// Print the resolved table of contents
    Toc { file: PathBuf },
    /// Navigate to a page and print the materialized page window
    Window {
        file: PathBuf,
        /// 1-based page to navigate to
        #[arg(short = 'p', long)]
        page: usize,
        /// Show one page at a time instead of continuous scroll
        #[arg(long)]
        paged: bool,
    },
    /// Turn a selection into a highlight and print it
    Highlight {
        file: PathBuf,
        /// Page the rectangle was drawn on (fixed-page documents)
        #[arg(short = 'p', long, requires = "rect")]
        page: Option<usize>,
        /// Selection rectangle in viewport pixels: x,y,width,height
        #[arg(long, value_delimiter = ',')]
        rect: Option<Vec<f32>>,
        /// Zoom the rectangle was drawn at
        #[arg(long, default_value_t = 1.0)]
        scale: f32,
        /// Selection start in a reflowable document
        #[arg(long, requires = "focus", conflicts_with = "page")]
        anchor: Option<FlowPosition>,
        /// Selection end in a reflowable document
        #[arg(long)]
        focus: Option<FlowPosition>,
        /// Selected text; required for page selections
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        color: Option<HighlightColor>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Rasterize one page of a fixed-page document to PNG
    Render {
        file: PathBuf,
        /// 1-based page to render
        #[arg(short = 'p', long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 1.0)]
        scale: f32,
        #[arg(short = 'o', long)]
        out: PathBuf,
    },
}

impl CliCommand {
    fn file(&self) -> &Path {
        match self {
            CliCommand::Info { file }
            | CliCommand::Search { file, .. }
            | CliCommand::Toc { file }
            | CliCommand::Window { file, .. }
            | CliCommand::Highlight { file, .. }
            | CliCommand::Render { file, .. } => file,
        }
    }
}

#[derive(Debug, Serialize)]
struct InfoReport<'a> {
    info: &'a DocumentInfo,
    kind: &'static str,
    toc_entries: usize,
    failed_pages: Vec<usize>,
}

#[derive(Debug, Serialize)]
struct MatchReport {
    location: String,
    page: Option<usize>,
    before: String,
    matched: String,
    after: String,
    /// `[x, y, width, height]` in viewport pixels
    rect: Option<[f32; 4]>,
}

impl MatchReport {
    fn new(found: &SearchMatch, scale: f32) -> Self {
        let (before, matched, after) = found.preview();
        let location = match &found.location {
            MatchLocation::Page { page } => Location::page(*page).to_string(),
            MatchLocation::Flow { range } => range.to_string(),
        };
        Self {
            location,
            page: found.page(),
            before,
            matched,
            after,
            rect: found
                .viewport_rect(scale)
                .map(|rect| [rect.x, rect.y, rect.width, rect.height]),
        }
    }
}

#[derive(Debug, Serialize)]
struct TocLineReport {
    depth: usize,
    title: String,
    target: String,
    degraded: bool,
}

#[derive(Debug, Serialize)]
struct WindowReport {
    current_page: usize,
    pages: Vec<usize>,
    state: WindowState,
    progress: Option<f32>,
}

/// Builds the selection described by the `highlight` arguments.
fn selection_from_args(
    page: Option<usize>,
    rect: Option<Vec<f32>>,
    scale: f32,
    anchor: Option<FlowPosition>,
    focus: Option<FlowPosition>,
    text: Option<String>,
) -> Result<Selection> {
    match (page, rect, anchor, focus) {
        (Some(page), Some(rect), None, None) => {
            let [x, y, width, height] = rect[..] else {
                bail!("--rect takes exactly four values: x,y,width,height");
            };
            Ok(Selection::Page {
                page,
                rect: Rect::new(x, y, width, height),
                scale,
                text: text.unwrap_or_default(),
            })
        }
        (None, None, Some(anchor), Some(focus)) => Ok(Selection::Flow {
            anchor,
            focus,
            text,
        }),
        _ => bail!("pass either --page with --rect, or --anchor with --focus"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs =
        project_dirs().ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;
    let config = EngineConfig::load_or_default(args.config.as_deref())
        .context("failed to load engine configuration")?;
    let state_dir = project_dirs.data_local_dir().join("state");
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(state_dir)?);

    let provider = FormatProvider::new();
    let mut session =
        ReaderSession::open_with(&provider, args.command.file(), config, store).await?;

    let mut stdout = io::stdout();
    match args.command {
        CliCommand::Info { .. } => {
            let report = InfoReport {
                info: session.document().info(),
                kind: session.document().kind_name(),
                toc_entries: session.toc().flatten().len(),
                failed_pages: session
                    .text_index()
                    .map(|index| index.failed_pages())
                    .unwrap_or_default(),
            };
            write_json(&mut stdout, &report)?;
        }
        CliCommand::Search { query, scale, .. } => {
            session.apply(Command::SetScale { scale })?;
            session.apply(Command::RunSearch { query })?;
            let scale = session.state().scale;
            let report: Vec<MatchReport> = session
                .state()
                .search
                .matches
                .iter()
                .map(|found| MatchReport::new(found, scale))
                .collect();
            info!(matches = report.len(), "search finished");
            write_json(&mut stdout, &report)?;
        }
        CliCommand::Toc { .. } => {
            let report: Vec<TocLineReport> = session
                .toc()
                .flatten()
                .into_iter()
                .map(|line| TocLineReport {
                    depth: line.depth,
                    title: line.title.to_string(),
                    target: line.target.to_string(),
                    degraded: line.degraded,
                })
                .collect();
            write_json(&mut stdout, &report)?;
        }
        CliCommand::Window { page, paged, .. } => {
            session.apply(Command::SetContinuous { continuous: !paged })?;
            session.apply(Command::GoToPage { page })?;
            let window = session
                .window()
                .ok_or_else(|| anyhow!("page windows need a fixed-page document"))?;
            let report = WindowReport {
                current_page: window.current_page(),
                pages: window.pages(),
                state: window.state(),
                progress: session.persisted_state().progress,
            };
            write_json(&mut stdout, &report)?;
            session.persist()?;
        }
        CliCommand::Highlight {
            page,
            rect,
            scale,
            anchor,
            focus,
            text,
            color,
            note,
            ..
        } => {
            let selection = selection_from_args(page, rect, scale, anchor, focus, text)?;
            session.apply(Command::AddHighlight {
                selection,
                color,
                note,
            })?;
            let added = session.events().lock().iter().rev().find_map(|event| match event {
                SessionEvent::HighlightAdded(id) => Some(*id),
                _ => None,
            });
            let highlight = added
                .and_then(|id| session.annotations().get(id))
                .ok_or_else(|| anyhow!("highlight was not recorded"))?;
            write_json(&mut stdout, highlight)?;
        }
        CliCommand::Render {
            page, scale, out, ..
        } => {
            let document = session
                .document()
                .as_fixed()
                .ok_or_else(|| anyhow!("only fixed-page documents can be rasterized"))?;
            let image = document.render(RenderRequest { page, scale })?;
            let buffer = image::RgbaImage::from_raw(image.width, image.height, image.pixels)
                .ok_or_else(|| anyhow!("renderer returned a truncated bitmap"))?;
            buffer
                .save(&out)
                .with_context(|| format!("failed to write {:?}", out))?;
            info!(page, path = %out.display(), "rendered page");
        }
    }

    Ok(())
}

fn write_json<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, value)?;
    writeln!(writer)?;
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "folio.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // stdout carries the JSON reports
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
