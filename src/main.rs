use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use blocksnap::capture::CaptureMode;
use blocksnap::detect::{find_best_block, find_blocks_in_area, NodeSource};
use blocksnap::fixture::{FixtureOptions, FixturePage, FixtureSnapshotSource};
use blocksnap::handoff::{FileHandoff, HandoffStore};
use blocksnap::helper::{ClipboardSink, FileClipboard, MemoryClipboard};
use blocksnap::observer::PageHost;
use blocksnap::raster::compositor;
use blocksnap::{pipeline, DataUrl, Rect, Settings, Viewport};

#[derive(Parser)]
#[command(name = "blocksnap")]
#[command(about = "Semantic block detection and page capture over HTML fixtures", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON settings file (`detection` and `capture` blocks)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Viewport size in CSS px
    #[arg(long, global = true, default_value = "1280x720", value_parser = parse_viewport)]
    viewport: Viewport,

    /// Device pixel ratio of fixture pages
    #[arg(long, global = true, default_value_t = 1.0)]
    dpr: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the best block under a point
    Detect {
        html: PathBuf,
        #[arg(long)]
        x: f64,
        #[arg(long)]
        y: f64,
        /// Scroll the page before sampling
        #[arg(long, default_value_t = 0.0)]
        scroll: f64,
    },

    /// Grid-sample an area and list the distinct blocks
    Scan {
        html: PathBuf,
        /// x,y,width,height (defaults to the viewport)
        #[arg(long, value_parser = parse_rect)]
        area: Option<Rect>,
        #[arg(long, default_value_t = 50.0)]
        grid: f64,
    },

    /// Crop a PNG to a logical rectangle
    Crop {
        input: PathBuf,
        /// x,y,width,height in CSS px
        #[arg(long, value_parser = parse_rect)]
        rect: Rect,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Stitch viewport PNGs, top to bottom, into one image
    Stitch {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        total_height: f64,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run a capture session against a fixture page
    Capture {
        html: PathBuf,
        /// block, visible, region or fullpage
        #[arg(long, default_value = "block")]
        mode: CaptureMode,
        /// Pointer position for block mode
        #[arg(long, num_args = 2, value_names = ["X", "Y"])]
        at: Option<Vec<f64>>,
        /// Dragged rectangle for region mode, x,y,width,height
        #[arg(long, value_parser = parse_rect)]
        region: Option<Rect>,
        /// Directory holding the handoff slot
        #[arg(long, default_value = ".blocksnap")]
        handoff_dir: PathBuf,
        /// Also copy the captured PNG here, as the clipboard would
        #[arg(long)]
        clipboard: Option<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Where a capture should land, besides the handoff slot.
struct CaptureTarget {
    mode: CaptureMode,
    at: Option<Vec<f64>>,
    region: Option<Rect>,
}

fn parse_viewport(raw: &str) -> Result<Viewport, String> {
    let (w, h) = raw.split_once('x').ok_or_else(|| format!("expected WIDTHxHEIGHT, got {:?}", raw))?;
    let width = w.trim().parse::<f64>().map_err(|e| e.to_string())?;
    let height = h.trim().parse::<f64>().map_err(|e| e.to_string())?;
    Ok(Viewport { width, height })
}

fn parse_rect(raw: &str) -> Result<Rect, String> {
    let parts = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| e.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [x, y, w, h] => Ok(Rect::new(*x, *y, *w, *h)),
        _ => Err(format!("expected x,y,width,height, got {:?}", raw)),
    }
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            Ok(Settings::from_json(&raw)?)
        }
        None => Ok(Settings::default()),
    }
}

fn load_page(html: &Path, viewport: Viewport, dpr: f64) -> anyhow::Result<FixturePage> {
    let source = std::fs::read_to_string(html).with_context(|| format!("reading {}", html.display()))?;
    let options = FixtureOptions { viewport, device_pixel_ratio: dpr, url: format!("file://{}", html.display()) };
    Ok(FixturePage::parse_with(&source, options)?)
}

fn read_png(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Detect { html, x, y, scroll } => {
            let page = load_page(&html, cli.viewport, cli.dpr)?;
            page.scroll_to(scroll);
            let block = page
                .element_at_point(x, y)
                .and_then(|node| find_best_block(&node, page.viewport(), &settings.detection));
            println!("{}", serde_json::to_string_pretty(&block.map(|b| b.summary()))?);
        }
        Commands::Scan { html, area, grid } => {
            let page = load_page(&html, cli.viewport, cli.dpr)?;
            let area = area.unwrap_or(Rect::new(0.0, 0.0, cli.viewport.width, cli.viewport.height));
            let blocks: Vec<_> =
                find_blocks_in_area(&page, area, grid, &settings.detection).iter().map(|b| b.summary()).collect();
            println!("{}", serde_json::to_string_pretty(&blocks)?);
        }
        Commands::Crop { input, rect, output } => {
            let image = DataUrl::from_png(&read_png(&input)?).decode(cli.dpr)?;
            let cropped = compositor::crop(&image, rect, cli.dpr)?;
            std::fs::write(&output, cropped.to_png()?)?;
            log::info!("wrote {}x{} to {}", cropped.width(), cropped.height(), output.display());
        }
        Commands::Stitch { inputs, total_height, output } => {
            let tiles = inputs
                .iter()
                .map(|p| Ok(DataUrl::from_png(&read_png(p)?).decode(cli.dpr)?))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let stitched = compositor::stitch_with_overlap(
                &tiles,
                cli.viewport.height,
                total_height,
                cli.dpr,
                settings.capture.overlap,
            )?;
            std::fs::write(&output, stitched.to_png()?)?;
            log::info!("stitched {} tiles into {}", tiles.len(), output.display());
        }
        Commands::Capture { html, mode, at, region, handoff_dir, clipboard, output } => {
            let page = Arc::new(load_page(&html, cli.viewport, cli.dpr)?);
            let handoff = Arc::new(FileHandoff::new(handoff_dir));
            let validity = settings.capture.handoff_validity();
            let target = CaptureTarget { mode, at, region };
            match clipboard {
                Some(path) => run_capture(page, FileClipboard::new(path), handoff.clone(), settings, target).await?,
                None => run_capture(page, MemoryClipboard::new(), handoff.clone(), settings, target).await?,
            }

            let Some(record) = handoff.take(validity)? else {
                bail!("no capture was handed off");
            };
            std::fs::write(&output, record.image_data_url.to_bytes()?)?;
            println!("{}", serde_json::to_string_pretty(&record.metadata)?);
        }
    }
    Ok(())
}

async fn run_capture<C: ClipboardSink>(
    page: Arc<FixturePage>,
    clipboard: C,
    handoff: Arc<FileHandoff>,
    settings: Settings,
    target: CaptureTarget,
) -> anyhow::Result<()> {
    let snapshots = Arc::new(FixtureSnapshotSource::new(page.as_ref().clone()));
    let mut pipeline = pipeline::launch(page, snapshots, clipboard, handoff, settings);

    pipeline.activate(target.mode)?;
    match target.mode {
        CaptureMode::Block => {
            let Some([x, y]) = target.at.as_deref().and_then(|v| <[f64; 2]>::try_from(v).ok()) else {
                pipeline.shutdown().await;
                bail!("block mode needs --at X Y");
            };
            pipeline.pointer_move(x, y)?;
            pipeline.click()?;
        }
        CaptureMode::Region => {
            let Some(r) = target.region else {
                pipeline.shutdown().await;
                bail!("region mode needs --region x,y,width,height");
            };
            pipeline.select_region((r.x, r.y), (r.right(), r.bottom()))?;
        }
        CaptureMode::Visible | CaptureMode::FullPage => {}
    }

    let (result, _) = pipeline.wait_for_capture(Duration::from_secs(300)).await?;
    pipeline.shutdown().await;
    result.map_err(|message| anyhow::anyhow!(message))
}
