//! Compute a spatial distribution function from an xtc trajectory.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sdfmap::config::{Center, HistRange, RuntimeConfig};
use sdfmap::histogram::{ChargeMeasure, CountMeasure, Measure, SpeciesMeasure};
use sdfmap::render::{json_mesh, RenderValue};
use sdfmap::scan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MeasureKind {
    Count,
    Charge,
    CountPerAtom,
}

fn measure_parser(s: &str) -> Result<MeasureKind, String> {
    match s {
        "count" => Ok(MeasureKind::Count),
        "charge" => Ok(MeasureKind::Charge),
        "count-per-atom" => Ok(MeasureKind::CountPerAtom),
        other => Err(format!(
            "invalid measure '{other}' (expected 'count', 'charge', or 'count-per-atom')"
        )),
    }
}

fn center_parser(s: &str) -> Result<Center, String> {
    s.parse()
        .map_err(|_| format!("invalid center '{s}' (expected 'anchor', 'x', or 'xy')"))
}

/// Build the spatial distribution around a configured atom basis and print
/// it as a JSON mesh.
#[derive(Parser)]
struct Args {
    /// Config file. Line-based by default; XML if the extension is `.xml`.
    input: PathBuf,

    /// Number of threads to use. Default: number of CPU cores.
    #[arg(short, long)]
    threads: Option<usize>,

    /// Cutoff distance for selecting nearby atoms, in trajectory units.
    /// Overrides the value from the config file for every basis.
    #[arg(short, long)]
    distance_cutoff: Option<f32>,

    /// Thickness of the projected slice, in trajectory units. Overrides the
    /// value from the config file for every basis.
    #[arg(short, long)]
    slice_thickness: Option<f32>,

    /// Number of histogram cells in each direction.
    #[arg(short, long)]
    resolution: Option<usize>,

    /// Size of the plotted window as a ratio of the box size. A ratio of 0.1
    /// over a 3x4 box gives a 0.3x0.4 window.
    #[arg(long, conflicts_with = "hist_range_abs")]
    hist_range: Option<f32>,

    /// Absolute size of the plotted window, in trajectory units.
    #[arg(long)]
    hist_range_abs: Option<f32>,

    /// Show a progress readout on stderr.
    #[arg(short, long)]
    progress: bool,

    /// Average the result over the number of frames.
    #[arg(short, long)]
    average: bool,

    /// Which basis atom the cutoff is measured from: 'anchor', 'x', or 'xy'.
    /// Overrides the config file for every basis.
    #[arg(long, value_parser = center_parser)]
    center: Option<Center>,

    /// Quantity to accumulate: 'count', 'charge', or 'count-per-atom'.
    #[arg(long, default_value = "count", value_parser = measure_parser)]
    measure: MeasureKind,
}

fn apply_overrides(config: &mut RuntimeConfig, args: &Args) {
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(resolution) = args.resolution {
        config.resolution = resolution;
    }
    if let Some(ratio) = args.hist_range {
        config.hist_range = HistRange::BoxRatio(ratio);
    }
    if let Some(size) = args.hist_range_abs {
        config.hist_range = HistRange::Absolute(size);
    }
    if args.average {
        config.average = true;
    }
    for basis in &mut config.bases {
        if let Some(cutoff) = args.distance_cutoff {
            basis.cutoff = cutoff;
        }
        if let Some(thickness) = args.slice_thickness {
            basis.slice_thickness = thickness;
        }
        if let Some(center) = args.center {
            basis.center = center;
        }
    }
}

fn scan_and_print<M>(config: &RuntimeConfig, measure: &M, progress: bool) -> anyhow::Result<()>
where
    M: Measure,
    M::Value: RenderValue,
{
    let bar = progress.then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {msg}")
                .expect("invalid template"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    });
    let report = bar.as_ref().map(|bar| {
        move |frames: usize| bar.set_message(format!("{frames} frames"))
    });
    let progress_fn = report
        .as_ref()
        .map(|report| report as &(dyn Fn(usize) + Sync));

    let histogram = scan::run(config, measure, progress_fn).context("scan failed")?;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    let mesh = json_mesh(&histogram, config.average);
    println!("{mesh:#}");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = RuntimeConfig::from_file(&args.input)
        .with_context(|| format!("cannot load config '{}'", args.input.display()))?;
    apply_overrides(&mut config, &args);

    match args.measure {
        MeasureKind::Count => scan_and_print(&config, &CountMeasure, args.progress),
        MeasureKind::Charge => {
            let measure = ChargeMeasure::new(config.charges.clone());
            scan_and_print(&config, &measure, args.progress)
        }
        MeasureKind::CountPerAtom => scan_and_print(&config, &SpeciesMeasure, args.progress),
    }
}
