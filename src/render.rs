//! Histogram output: a JSON mesh for plotting and a plain-text table.
//!
//! The JSON object holds `x` and `y` cell-edge arrays (resolution + 1
//! entries each), `c` as one row of cell values per y index, and `specials`
//! mapping marker names to `[x, y]`. That is exactly the shape a pcolormesh
//! plot consumes.

use serde_json::{json, Map, Value};

use crate::histogram::{CellValue, Histogram, SpeciesCounts};

/// How a cell value appears in the JSON mesh. `divisor` is the frame count
/// when frame-averaging is requested.
pub trait RenderValue: CellValue {
    fn to_json(&self, divisor: Option<f64>) -> Value;
}

impl RenderValue for u64 {
    fn to_json(&self, divisor: Option<f64>) -> Value {
        match divisor {
            Some(d) => json!(*self as f64 / d),
            None => json!(self),
        }
    }
}

impl RenderValue for i64 {
    fn to_json(&self, divisor: Option<f64>) -> Value {
        match divisor {
            Some(d) => json!(*self as f64 / d),
            None => json!(self),
        }
    }
}

impl RenderValue for SpeciesCounts {
    fn to_json(&self, divisor: Option<f64>) -> Value {
        let mut map = Map::new();
        for (species, count) in &self.0 {
            let value = match divisor {
                Some(d) => json!(*count as f64 / d),
                None => json!(count),
            };
            map.insert(species.clone(), value);
        }
        Value::Object(map)
    }
}

/// A cell value with a single numeric reading, for the text renderer.
pub trait ScalarValue: CellValue {
    fn scalar(&self) -> f64;
}

impl ScalarValue for u64 {
    fn scalar(&self) -> f64 {
        *self as f64
    }
}

impl ScalarValue for i64 {
    fn scalar(&self) -> f64 {
        *self as f64
    }
}

fn divisor<V: CellValue>(hist: &Histogram<V>, average: bool) -> Option<f64> {
    average.then(|| hist.frame_count().max(1) as f64)
}

fn edges(low: f32, high: f32, resolution: usize) -> Vec<f32> {
    let step = (high - low) / resolution as f32;
    (0..=resolution).map(|i| low + step * i as f32).collect()
}

/// Serializes the histogram as the plotting mesh.
pub fn json_mesh<V: RenderValue>(hist: &Histogram<V>, average: bool) -> Value {
    let n = hist.resolution();
    let divisor = divisor(hist, average);

    let rows: Vec<Value> = (0..n)
        .map(|iy| {
            let row: Vec<Value> = (0..n)
                .map(|ix| {
                    hist.value(ix, iy)
                        .map(|v| v.to_json(divisor))
                        .unwrap_or(Value::Null)
                })
                .collect();
            Value::Array(row)
        })
        .collect();

    let mut specials = Map::new();
    for (name, pos) in hist.specials() {
        specials.insert(name.clone(), json!([pos.x, pos.y]));
    }

    json!({
        "x": edges(hist.low().x, hist.high().x, n),
        "y": edges(hist.low().y, hist.high().y, n),
        "c": rows,
        "specials": Value::Object(specials),
    })
}

/// Serializes the histogram as `x y value` lines, one per cell at its
/// center, with a blank line between columns.
pub fn text_mesh<V: ScalarValue>(hist: &Histogram<V>, average: bool) -> String {
    let n = hist.resolution();
    let divisor = divisor(hist, average).unwrap_or(1.0);
    let step_x = (hist.high().x - hist.low().x) / n as f32;
    let step_y = (hist.high().y - hist.low().y) / n as f32;

    let mut out = String::new();
    for ix in 0..n {
        let x = hist.low().x + (ix as f32 + 0.5) * step_x;
        for iy in 0..n {
            let y = hist.low().y + (iy as f32 + 0.5) * step_y;
            let value = hist
                .value(ix, iy)
                .map(|v| v.scalar() / divisor)
                .unwrap_or(0.0);
            out.push_str(&format!("{x} {y} {value}\n"));
        }
        // Columns are separated by a blank line; the last one ends the table.
        if ix + 1 < n {
            out.push('\n');
        }
    }
    out
}
