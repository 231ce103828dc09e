//! HexScan — background aerial-view and byte-statistics scans of a file.
//!
//! Thin binary entry point. All logic lives in the `hexscan-core` crate;
//! this opens one document, lets its workers run to completion and prints
//! or exports what they produced.

use anyhow::{bail, Context};
use clap::Parser;
use hexscan_core::colour::ColourTable;
use hexscan_core::report::StatsReport;
use hexscan_core::{DocNotice, Document, ScanOptions};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about = "Aerial-view and byte-statistics scans of a file.", long_about = None)]
struct Args {
    /// File to scan.
    #[arg(required = true)]
    file: PathBuf,

    /// Build the aerial view (default when neither scan is chosen).
    #[arg(long)]
    aerial: bool,

    /// Count byte frequencies (default when neither scan is chosen).
    #[arg(long)]
    stats: bool,

    /// Count bytes even on drives the options exclude.
    #[arg(long)]
    force_stats: bool,

    /// Write the byte statistics as CSV.
    #[arg(long, value_name = "PATH")]
    csv: Option<PathBuf>,

    /// Write the byte statistics as JSON.
    #[arg(long, value_name = "PATH")]
    json: Option<PathBuf>,

    /// Load scan options from a JSON file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save the effective scan options as JSON and continue.
    #[arg(long, value_name = "PATH")]
    save_config: Option<PathBuf>,

    /// Give up if the scans have not finished after this long.
    #[arg(long, value_name = "SECONDS", default_value_t = 600)]
    timeout: u64,

    /// Log worker commands as well as lifecycle events.
    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    tracing::info!("HexScan starting");

    let (want_aerial, want_stats) = match (args.aerial, args.stats) {
        (false, false) => (true, true),
        chosen => chosen,
    };

    let mut options = match &args.config {
        Some(path) => ScanOptions::load(path)
            .with_context(|| format!("loading options from {}", path.display()))?,
        None => ScanOptions::default(),
    };
    if args.force_stats {
        options.bg_stats = true;
        options.exclude_removable = false;
        options.exclude_network = false;
        options.exclude_optical = false;
        options.exclude_device = false;
    }
    if !want_stats {
        options.bg_stats = false;
    }
    if let Some(path) = &args.save_config {
        options
            .save(path)
            .with_context(|| format!("saving options to {}", path.display()))?;
    }

    let mut doc = Document::open(&args.file, options)
        .with_context(|| format!("opening {}", args.file.display()))?;
    if want_aerial {
        doc.add_aerial_view(ColourTable::default())
            .context("starting the aerial view")?;
    }
    if want_stats && !doc.has_stats() {
        tracing::warn!(
            "Statistics are disabled for this file ({} drive); use --force-stats to override",
            doc.file_class().drive.label()
        );
    }

    wait_for_scans(&doc, want_aerial, Duration::from_secs(args.timeout))?;

    if want_aerial {
        print_aerial(&doc);
    }
    if let Some(histogram) = doc.stats_counts() {
        let report = StatsReport::new(doc.path(), &histogram);
        print_stats(&report);
        if let Some(path) = &args.csv {
            let file = File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            report
                .write_csv(BufWriter::new(file))
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!("Wrote CSV to {}", path.display());
        }
        if let Some(path) = &args.json {
            std::fs::write(path, report.to_json()?)
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!("Wrote JSON to {}", path.display());
        }
    }

    // Dropping the document joins both workers.
    drop(doc);
    Ok(())
}

/// Block until every running scan has finished, a worker gives up on its
/// pass, or `timeout` elapses.
fn wait_for_scans(doc: &Document, want_aerial: bool, timeout: Duration) -> anyhow::Result<()> {
    let notices = doc.notices();
    let deadline = Instant::now() + timeout;
    let mut last_percent = None;

    loop {
        let aerial_done = !want_aerial || doc.aerial_finished();
        let stats_done = !doc.has_stats() || doc.stats_finished();
        if aerial_done && stats_done {
            return Ok(());
        }
        if want_aerial && !doc.aerial_finished() && !doc.aerial_scanning() {
            bail!("aerial scan stopped before reaching the end of the file");
        }
        if doc.has_stats() && !doc.stats_finished() && !doc.stats_active() {
            bail!("statistics scan stopped before reaching the end of the file");
        }
        if Instant::now() >= deadline {
            bail!("scans did not finish within {timeout:?}");
        }

        let percent = doc
            .stats_progress()
            .or_else(|| doc.aerial_progress())
            .map(|p| p.percent());
        if percent != last_percent {
            if let Some(percent) = percent {
                tracing::debug!("Scanning: {percent}%");
            }
            last_percent = percent;
        }

        // The aerial notice is best effort; the flags above decide.
        if let Ok(DocNotice::AerialFinished) = notices.recv_timeout(Duration::from_millis(100)) {
            tracing::debug!("Aerial view finished");
        }
    }
}

fn print_aerial(doc: &Document) {
    let (Some(geometry), Some(bitmap)) = (doc.aerial_geometry(), doc.aerial_bitmap()) else {
        return;
    };
    let pixels = geometry.pixels_for(doc.len());
    println!(
        "Aerial view: {} bytes per pixel, {} pixels in a {}x{} bitmap ({} bytes)",
        geometry.bpe,
        pixels,
        geometry.width,
        geometry.rows,
        bitmap.read().as_bytes().len()
    );
}

fn print_stats(report: &StatsReport) {
    println!(
        "Byte statistics: {} bytes, {} distinct values",
        report.length, report.distinct
    );
    let mut rows = report.rows();
    rows.retain(|row| row.count > 0);
    rows.sort_by(|a, b| b.count.cmp(&a.count).then(a.byte.cmp(&b.byte)));
    println!("  {:<6} {:>14} {:>8}", "byte", "count", "percent");
    for row in rows.iter().take(16) {
        println!("  0x{:<4} {:>14} {:>7.3}%", row.hex, row.count, row.percent);
    }
}
