//! Mosaico CLI - inspect tile mosaics and their read plans

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use mosaico::{Mosaic, MosaicOptions, ReadPlan, Rect, Subsampling, TileFailure};

mod tiles;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "mosaico")]
#[command(author, version, about = "Tile-mosaic index and read planning", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON file with mosaic options (maxOpenHandles, leafFanout, ...)
    #[arg(short, long, global = true)]
    options: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show levels and index shape of a tile list
    Info {
        /// Tile list (JSON)
        tiles: PathBuf,
    },
    /// Print the read plan for a region
    Plan {
        /// Tile list (JSON)
        tiles: PathBuf,
        /// Region in full-resolution pixels: minx,miny,maxx,maxy
        #[arg(short, long, value_parser = parse_region, allow_hyphen_values = true)]
        region: Rect,
        /// Target subsampling: N or XxY
        #[arg(short, long, default_value = "1")]
        subsampling: Subsampling,
        /// Fail when the region is not fully covered
        #[arg(long)]
        strict: bool,
        /// Also open every planned source and report failures
        #[arg(long)]
        open: bool,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn parse_region(s: &str) -> std::result::Result<Rect, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(format!("region must be 'minx,miny,maxx,maxy', got: {s}"));
    }
    let mut v = [0i64; 4];
    for (slot, part) in v.iter_mut().zip(&parts) {
        *slot = part.parse().map_err(|e| format!("invalid coordinate '{part}': {e}"))?;
    }
    Rect::new(v[0], v[1], v[2], v[3]).map_err(|e| e.to_string())
}

fn load_options(path: Option<&Path>) -> Result<MosaicOptions> {
    let Some(path) = path else {
        return Ok(MosaicOptions::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read options {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid options {}", path.display()))
}

fn open_mosaic(list: &Path, options: MosaicOptions) -> Result<Mosaic> {
    let pb = spinner("Building index...");
    let start = Instant::now();
    let tiles = tiles::load(list)?;
    let mosaic = Mosaic::open_with(tiles, options).context("Failed to open mosaic")?;
    pb.finish_and_clear();
    info!("Indexed {} tiles in {:.2?}", mosaic.len(), start.elapsed());
    Ok(mosaic)
}

fn print_plan(plan: &ReadPlan) {
    println!(
        "Region {} at {} (requested {}), output {} x {}",
        plan.region, plan.selected, plan.requested, plan.output_size.0, plan.output_size.1
    );
    println!(
        "{:<24} {:>24} {:>12} {:>28}",
        "tile", "destination", "offset", "source window"
    );
    for e in plan {
        let w = &e.source_region;
        println!(
            "{:<24} {:>24} {:>12} {:>28}",
            e.tile_id.as_str(),
            e.destination.to_string(),
            format!("{},{}", e.destination_offset.0, e.destination_offset.1),
            format!("{},{} {}x{}", w.x, w.y, w.width, w.height)
        );
    }
    if plan.is_complete() {
        println!("Coverage: complete ({} entries)", plan.len());
    } else {
        println!(
            "Coverage: partial, {} px uncovered in {} rectangles",
            plan.uncovered_area(),
            plan.uncovered.len()
        );
    }
}

fn report_failures(failed: &[TileFailure]) {
    for f in failed {
        warn!("{}: {}", f.tile, f.error);
    }
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;
    let options = load_options(cli.options.as_deref())?;

    match cli.command {
        Commands::Info { tiles } => {
            let mosaic = open_mosaic(&tiles, options)?;
            let stats = mosaic.index_stats();

            println!("Tile list: {}", tiles.display());
            println!("Tiles: {}", mosaic.len());
            println!("Bounds: {}", mosaic.bounds());
            println!("Index: {} nodes, {} leaves, depth {}", stats.nodes, stats.leaves, stats.depth);
            println!("\nLevels:");
            for level in mosaic.levels() {
                let kind = match level.index() {
                    Some(index) if index.is_grid() => "grid",
                    Some(_) => "tree",
                    None => "shared",
                };
                println!("  {:>7}: {} tiles ({})", level.subsampling().to_string(), level.len(), kind);
            }
        }

        Commands::Plan {
            tiles,
            region,
            subsampling,
            strict,
            open,
            json,
        } => {
            let options = if strict { options.with_partial_coverage(false) } else { options };
            let mosaic = open_mosaic(&tiles, options)?;

            let start = Instant::now();
            let plan = if open {
                let result = mosaic.query(&region, subsampling)?;
                report_failures(&result.failed);
                info!(
                    "Opened {} of {} tiles",
                    result.handles.len(),
                    result.handles.len() + result.failed.len()
                );
                let plan = result.plan.clone();
                result.release();
                plan
            } else {
                mosaic.plan(&region, subsampling)?
            };
            info!("Planned in {:.2?}", start.elapsed());

            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }

            let report = mosaic.dispose()?;
            report_close_failures(&report.failures);
        }
    }

    Ok(())
}

fn report_close_failures(failures: &[(String, mosaico::Error)]) {
    for (source, e) in failures {
        warn!("closing {} failed: {}", source, e);
    }
}
