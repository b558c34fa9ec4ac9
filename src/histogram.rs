//! A generic 2D accumulation grid and the value kinds deposited into it.
//!
//! The grid is parameterized over a [`CellValue`]: something with a zero
//! element and a commutative, associative merge. Three kinds are provided:
//! plain occurrence counts, signed per-species charges, and a per-species
//! count breakdown. A [`Measure`] maps an atom to the sample deposited for
//! it, which is how one scan loop serves all three kinds.

use std::collections::HashMap;

use glam::Vec2;

use crate::trajectory::AtomIdentifier;

/// A per-cell aggregate: starts from its `Default` zero and absorbs samples
/// through `merge`. Merging must be commutative and associative so deposits
/// can arrive in any interleaving across workers.
pub trait CellValue: Default + Clone + Send {
    fn merge(&mut self, sample: &Self);
}

/// Occurrence count. Each deposited sample counts as one; the sample value
/// itself carries no information.
impl CellValue for u64 {
    fn merge(&mut self, _sample: &Self) {
        *self += 1;
    }
}

/// Signed accumulated charge.
impl CellValue for i64 {
    fn merge(&mut self, sample: &Self) {
        *self += sample;
    }
}

/// Per-species occurrence counts, merged key-wise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeciesCounts(pub HashMap<String, u64>);

impl CellValue for SpeciesCounts {
    fn merge(&mut self, sample: &Self) {
        for (species, count) in &sample.0 {
            *self.0.entry(species.clone()).or_insert(0) += count;
        }
    }
}

/// Maps an atom to the sample value it deposits.
pub trait Measure: Sync {
    type Value: CellValue;

    fn sample(&self, id: &AtomIdentifier) -> Self::Value;
}

pub struct CountMeasure;

impl Measure for CountMeasure {
    type Value = u64;

    fn sample(&self, _id: &AtomIdentifier) -> u64 {
        0
    }
}

/// Looks the atom's species up in a configured charge table; unlisted
/// species deposit zero.
pub struct ChargeMeasure {
    charges: HashMap<String, i64>,
}

impl ChargeMeasure {
    pub fn new(charges: HashMap<String, i64>) -> Self {
        Self { charges }
    }
}

impl Measure for ChargeMeasure {
    type Value = i64;

    fn sample(&self, id: &AtomIdentifier) -> i64 {
        self.charges.get(&id.name).copied().unwrap_or(0)
    }
}

pub struct SpeciesMeasure;

impl Measure for SpeciesMeasure {
    type Value = SpeciesCounts;

    fn sample(&self, id: &AtomIdentifier) -> SpeciesCounts {
        SpeciesCounts(HashMap::from([(id.name.clone(), 1)]))
    }
}

/// A square 2D grid of aggregated values over the window `[low, high)`,
/// with named marker positions and a frame tally on the side.
#[derive(Debug, Clone)]
pub struct Histogram<V> {
    low: Vec2,
    high: Vec2,
    resolution: usize,
    cells: Vec<V>,
    specials: HashMap<String, Vec2>,
    frame_count: Option<usize>,
}

impl<V: CellValue> Histogram<V> {
    pub fn new(low: Vec2, high: Vec2, resolution: usize) -> Self {
        assert!(resolution > 0, "histogram resolution must be positive");
        assert!(
            low.x < high.x && low.y < high.y,
            "histogram window must have positive extent"
        );
        Self {
            low,
            high,
            resolution,
            cells: vec![V::default(); resolution * resolution],
            specials: HashMap::new(),
            frame_count: None,
        }
    }

    /// A window centered on the origin with half-extent `half` per axis.
    pub fn centered(half: Vec2, resolution: usize) -> Self {
        Self::new(-half, half, resolution)
    }

    pub fn low(&self) -> Vec2 {
        self.low
    }

    pub fn high(&self) -> Vec2 {
        self.high
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// The cell containing `(x, y)`, or `None` if the point lies outside
    /// `[low, high)` on either axis. The high edge is excluded; nothing is
    /// ever clamped into range.
    pub fn index(&self, x: f32, y: f32) -> Option<(usize, usize)> {
        if x < self.low.x || x >= self.high.x || y < self.low.y || y >= self.high.y {
            return None;
        }
        let nx = (x - self.low.x) / (self.high.x - self.low.x);
        let ny = (y - self.low.y) / (self.high.y - self.low.y);
        let n = self.resolution as f32;
        // Guard against float rounding pushing an in-window point onto the
        // high edge.
        let ix = ((nx * n) as usize).min(self.resolution - 1);
        let iy = ((ny * n) as usize).min(self.resolution - 1);
        Some((ix, iy))
    }

    /// Merges `sample` into the cell containing `(x, y)`. Returns false,
    /// leaving the grid untouched, when the point is out of window.
    pub fn delta(&mut self, x: f32, y: f32, sample: &V) -> bool {
        match self.index(x, y) {
            Some((ix, iy)) => {
                self.cells[ix * self.resolution + iy].merge(sample);
                true
            }
            None => false,
        }
    }

    /// Deposits a zero sample, which for the counting kind means "count one
    /// occurrence".
    pub fn add(&mut self, x: f32, y: f32) -> bool {
        self.delta(x, y, &V::default())
    }

    pub fn value(&self, ix: usize, iy: usize) -> Option<&V> {
        if ix >= self.resolution || iy >= self.resolution {
            return None;
        }
        Some(&self.cells[ix * self.resolution + iy])
    }

    pub fn set_special(&mut self, name: String, pos: Vec2) {
        self.specials.insert(name, pos);
    }

    pub fn specials(&self) -> &HashMap<String, Vec2> {
        &self.specials
    }

    /// Records the number of frames the scan delivered. Set exactly once,
    /// after the scan; never incremented during it.
    pub fn set_frame_count(&mut self, count: usize) {
        assert!(
            self.frame_count.is_none(),
            "frame count may only be set once"
        );
        self.frame_count = Some(count);
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count.unwrap_or(0)
    }
}
