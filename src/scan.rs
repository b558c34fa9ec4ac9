//! The two-pass scan driving a whole run.
//!
//! Pass 1 reads a single frame to validate every configured basis atom and
//! capture the marker positions, then reopens the trajectory. Pass 2 fans
//! the frames out over a fixed pool of threads. Shared mutable state is
//! exactly two mutexes: the trajectory cursor and the histogram. Everything
//! between claiming a frame and merging its deposits is worker-local.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use glam::Vec2;

use crate::config::{HistRange, RuntimeConfig};
use crate::error::{Error, Result};
use crate::histogram::{Histogram, Measure};
use crate::sdf::prepare_frame;
use crate::trajectory::{FrameView, Trajectory};
use crate::BoxVec;

/// Called with the number of frames claimed so far, after each claim. The
/// lifetime parameter lets callers pass closures borrowing local state.
pub type ProgressFn<'a> = dyn Fn(usize) + Sync + 'a;

fn window_half_extent(range: &HistRange, boxvec: &BoxVec) -> Vec2 {
    match *range {
        // The range is the full window size, so halve it. Only the x and y
        // box edges matter for the ratio form.
        HistRange::BoxRatio(ratio) => {
            Vec2::new(boxvec.x_axis.x, boxvec.y_axis.y) * (ratio * 0.5)
        }
        HistRange::Absolute(size) => Vec2::splat(size * 0.5),
    }
}

/// Runs a full scan and returns the built histogram.
///
/// Any format or configuration error aborts the run after all workers have
/// been joined; no partial histogram is returned. Atoms landing outside the
/// plotted window are dropped silently at the merge site.
pub fn run<M: Measure>(
    config: &RuntimeConfig,
    measure: &M,
    progress: Option<&ProgressFn<'_>>,
) -> Result<Histogram<M::Value>> {
    let mut trajectory = Trajectory::open(&config.xtc_path, &config.structure_path)?;

    // Pass 1: every basis atom must exist before any parallel work starts,
    // and the first frame provides the marker positions.
    if !trajectory.next_frame()? {
        return Err(Error::Truncated);
    }
    for basis in &config.bases {
        for id in [&basis.anchor, &basis.atom_x, &basis.atom_xy] {
            if !trajectory.has_atom(id) {
                return Err(Error::MissingAtom(id.clone()));
            }
        }
    }
    let first_basis = config
        .bases
        .first()
        .ok_or_else(|| Error::Config("no basis defined".into()))?;
    let reference = prepare_frame(first_basis, &trajectory)?;

    let half = window_half_extent(&config.hist_range, &trajectory.meta().boxvec);
    let mut histogram = Histogram::centered(half, config.resolution);
    for (id, pos) in &reference.markers {
        histogram.set_special(id.to_string(), Vec2::new(pos.x, pos.y));
    }

    trajectory.close();
    trajectory.reopen()?;

    // Pass 2.
    let cursor = Mutex::new(trajectory);
    let histogram = Mutex::new(histogram);
    let failed = AtomicBool::new(false);

    let worker = || -> Result<()> {
        loop {
            if failed.load(Ordering::Relaxed) {
                return Ok(());
            }
            // Claim the next frame under the cursor lock and copy it out.
            let (frame, claimed) = {
                let mut cursor = cursor.lock().unwrap();
                if !cursor.next_frame()? {
                    return Ok(());
                }
                (cursor.snapshot(), cursor.count_frames())
            };
            if let Some(progress) = progress {
                progress(claimed);
            }

            // All geometry and sample construction happens outside any lock.
            let mut deposits = Vec::new();
            for basis in &config.bases {
                let prepared = prepare_frame(basis, &frame)?;
                for i in 0..prepared.snapshot.size() {
                    let pos = prepared.snapshot.vec(i);
                    let sample = measure.sample(prepared.snapshot.atom_id(i));
                    deposits.push((Vec2::new(pos.x, pos.y), sample));
                }
            }

            let mut histogram = histogram.lock().unwrap();
            for (pos, sample) in &deposits {
                // Out-of-window deposits are uninteresting, not errors.
                histogram.delta(pos.x, pos.y, sample);
            }
        }
    };

    let result = std::thread::scope(|scope| {
        let threads = config.threads.max(1);
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(|| {
                    let result = worker();
                    if result.is_err() {
                        failed.store(true, Ordering::Relaxed);
                    }
                    result
                })
            })
            .collect();

        let mut first_error = None;
        for handle in handles {
            let joined = handle
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            if let Err(err) = joined {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    });
    result?;

    // The trajectory's own tally is authoritative; workers never count.
    let trajectory = cursor.into_inner().unwrap();
    let mut histogram = histogram.into_inner().unwrap();
    histogram.set_frame_count(trajectory.count_frames());
    Ok(histogram)
}
