use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use pdfedit_core::runs::RunMatch;
use pdfedit_core::style::{FontSlant, FontWeight, TextAlign, TextDecoration};
use pdfedit_core::{
    Annotation, AnnotationLayer, Color, CommitReport, CommitTier, EditorConfig, EditorSession,
    Point, RunEdit, TextFormat, TextRun,
};
use pdfedit_render::{write_image, PdfiumProvider};
use serde::Serialize;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "pdfedit",
    version,
    about = "Inspect and rewrite the text layer of PDF pages"
)]
struct Args {
    /// Config file to use instead of the one in the platform config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the text runs of a page
    Runs {
        file: PathBuf,
        /// Page index (0-based)
        #[arg(short, long, default_value_t = 0)]
        page: usize,
        #[arg(long)]
        json: bool,
    },
    /// Map a viewport pixel to the run and character under it
    Hit {
        file: PathBuf,
        #[arg(short, long, default_value_t = 0)]
        page: usize,
        #[arg(long)]
        x: f32,
        #[arg(long)]
        y: f32,
        #[arg(long, default_value_t = 1.0)]
        scale: f32,
    },
    /// Search runs for a string
    Find {
        file: PathBuf,
        #[arg(short, long)]
        query: String,
        /// Only search this page
        #[arg(short, long)]
        page: Option<usize>,
        #[arg(long)]
        case_sensitive: bool,
    },
    /// Replace the text of one run and write the edited document
    Edit(EditArgs),
    /// Rasterize a page to an image file
    Render {
        file: PathBuf,
        #[arg(short, long, default_value_t = 0)]
        page: usize,
        #[arg(long, default_value_t = 1.0)]
        scale: f32,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Debug, clap::Args)]
struct EditArgs {
    file: PathBuf,
    #[arg(short, long, default_value_t = 0)]
    page: usize,
    /// Run id as printed by `runs`, e.g. run-0-3
    #[arg(long)]
    run: String,
    #[arg(long)]
    text: String,
    #[arg(long)]
    font: Option<String>,
    #[arg(long)]
    size: Option<f32>,
    /// Hex colour such as #1a1a1a
    #[arg(long)]
    color: Option<Color>,
    #[arg(long)]
    bold: bool,
    #[arg(long)]
    italic: bool,
    #[arg(long)]
    underline: bool,
    #[arg(long, value_enum)]
    align: Option<Align>,
    /// Never touch page content; add a cover and a text annotation instead
    #[arg(long)]
    overlay_only: bool,
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Align {
    Left,
    Center,
    Right,
}

impl From<Align> for TextAlign {
    fn from(value: Align) -> Self {
        match value {
            Align::Left => TextAlign::Left,
            Align::Center => TextAlign::Center,
            Align::Right => TextAlign::Right,
        }
    }
}

impl EditArgs {
    fn format(&self) -> TextFormat {
        TextFormat {
            font_family: self.font.clone(),
            font_size: self.size,
            weight: self.bold.then_some(FontWeight::Bold),
            slant: self.italic.then_some(FontSlant::Italic),
            decoration: self.underline.then_some(TextDecoration::Underline),
            color: self.color,
            align: self.align.map(TextAlign::from),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("org", "pdfedit", "pdfedit")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let config = EditorConfig::load(&config_path)?;

    let provider = PdfiumProvider::new()?;
    let file = match &args.command {
        Command::Runs { file, .. }
        | Command::Hit { file, .. }
        | Command::Find { file, .. }
        | Command::Render { file, .. } => file,
        Command::Edit(edit) => &edit.file,
    };
    let mut session = EditorSession::open_with(&provider, file, config)
        .await
        .with_context(|| format!("failed to open {:?}", file))?;

    match args.command {
        Command::Runs { page, json, .. } => list_runs(&mut session, page, json),
        Command::Hit {
            page, x, y, scale, ..
        } => hit(&mut session, page, Point::new(x, y), scale),
        Command::Find {
            query,
            page,
            case_sensitive,
            ..
        } => find(&mut session, &query, page, case_sensitive),
        Command::Edit(edit) => run_edit(&mut session, &edit),
        Command::Render {
            page,
            scale,
            output,
            ..
        } => {
            let image = session.render_page(page, scale, &AnnotationLayer::new())?;
            write_image(&image, &output)?;
            info!(page, path = %output.display(), "page rendered");
            Ok(())
        }
    }
}

fn list_runs(session: &mut EditorSession, page: usize, json: bool) -> Result<()> {
    let runs = session.extract_runs(page)?;
    if json {
        println!("{}", serde_json::to_string_pretty(runs.runs())?);
        return Ok(());
    }
    for run in runs.iter() {
        println!("{}", describe_run(run));
    }
    Ok(())
}

fn describe_run(run: &TextRun) -> String {
    format!(
        "{}\t{:.1},{:.1}\t{:.1}x{:.1}\t{} {:.1}pt\t{}",
        run.id, run.x, run.y, run.width, run.height, run.font_name, run.font_size, run.text
    )
}

fn hit(session: &mut EditorSession, page: usize, point: Point, scale: f32) -> Result<()> {
    session.prepare_viewport(page, scale)?;
    session.extract_runs(page)?;
    match session.hit_test(page, point, None) {
        Some(hit) => println!("{}", serde_json::to_string_pretty(&hit)?),
        None => println!("no text near ({}, {})", point.x, point.y),
    }
    Ok(())
}

fn find(
    session: &mut EditorSession,
    query: &str,
    page: Option<usize>,
    case_sensitive: bool,
) -> Result<()> {
    let pages: Vec<usize> = match page {
        Some(page) => vec![page],
        None => (0..session.info().page_count).collect(),
    };
    for page in pages {
        session.extract_runs(page)?;
    }
    let matches: Vec<RunMatch> = session.find(query, case_sensitive);
    println!("{}", serde_json::to_string_pretty(&matches)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct EditSummary<'a> {
    run_id: &'a str,
    tier: Option<CommitTier>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommitSummary<'a> {
    page: usize,
    edits: Vec<EditSummary<'a>>,
    /// Present when at least one edit fell back to annotations.
    overlays: Vec<&'a Annotation>,
}

fn summarize<'a>(report: &'a CommitReport, layer: &'a AnnotationLayer) -> CommitSummary<'a> {
    CommitSummary {
        page: report.page,
        edits: report
            .outcomes
            .iter()
            .map(|outcome| EditSummary {
                run_id: outcome.run_id.as_str(),
                tier: outcome.tier(),
                error: outcome.error().map(|err| err.to_string()),
            })
            .collect(),
        overlays: layer.for_page(report.page),
    }
}

fn run_edit(session: &mut EditorSession, args: &EditArgs) -> Result<()> {
    let mut layer = AnnotationLayer::new();
    let edit = RunEdit::new(args.run.as_str(), args.text.as_str()).with_format(args.format());
    let mut options = session.config().commit_options();
    options.overlay_only = args.overlay_only;

    let report = session.commit_with_options(args.page, &[edit], &mut layer, options)?;
    println!("{}", serde_json::to_string_pretty(&summarize(&report, &layer))?);

    if report.committed() == 0 {
        return Err(anyhow!("no edit was committed"));
    }
    if !layer.is_empty() {
        warn!(
            overlays = layer.len(),
            "edit kept as overlay annotations; they are not part of the saved document"
        );
    }
    write_document(session, &args.output)
}

fn write_document(session: &EditorSession, output: &Path) -> Result<()> {
    let bytes = session.save()?;
    fs::write(output, bytes).with_context(|| format!("failed to write {:?}", output))?;
    info!(path = %output.display(), "document written");
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pdfedit.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // stdout carries command output
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_flags_build_a_text_format() {
        let args = Args::try_parse_from([
            "pdfedit",
            "edit",
            "in.pdf",
            "--run",
            "run-0-2",
            "--text",
            "Paid",
            "--bold",
            "--underline",
            "--color",
            "#cc0000",
            "--align",
            "center",
            "-o",
            "out.pdf",
        ])
        .unwrap();
        let Command::Edit(edit) = args.command else {
            panic!("expected edit subcommand");
        };
        let format = edit.format();
        assert_eq!(format.weight, Some(FontWeight::Bold));
        assert_eq!(format.slant, None);
        assert_eq!(format.decoration, Some(TextDecoration::Underline));
        assert_eq!(format.color, Some(Color::rgb(0xcc, 0, 0)));
        assert_eq!(format.align, Some(TextAlign::Center));
        assert!(!edit.overlay_only);
    }

    #[test]
    fn invalid_colour_is_rejected() {
        let result = Args::try_parse_from([
            "pdfedit", "edit", "in.pdf", "--run", "run-0-0", "--text", "x", "--color", "red",
            "-o", "out.pdf",
        ]);
        assert!(result.is_err());
    }
}
