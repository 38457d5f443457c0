//! Vertex position prediction shared by the encoder and decoder.
//!
//! Positions are visited in triangle order. Every corner, new or revisited,
//! pushes its reconstructed position into a history, so the corners of the
//! previous triangle sit at known ages while the current one is walked. A
//! newly seen vertex is predicted with one of [`PREDICTION_MODE_COUNT`] modes:
//!
//! - `0`, `1`, `2`: the position visited one, two or three corners ago
//! - `3`: the parallelogram `V + U - W`, where `V`, `U` are the ends of the
//!   edge the previous triangle shares with the current one and `W` is its
//!   opposite corner

use super::history::{History, POSITION_HISTORY};
use crate::util::IVec3;

/// Alphabet size of the prediction mode table.
pub const PREDICTION_MODE_COUNT: usize = 4;

/// Order the corners of `previous` as (shared, shared, opposite) when it
/// shares an edge with `triangle`.
///
/// ```text
/// previous = [3, 4, 5], triangle = [5, 6, 3]  ->  Some([2, 0, 1])
/// ```
pub fn shared_edge(previous: [u32; 3], triangle: &[u32]) -> Option<[usize; 3]> {
    match previous.map(|v| triangle.contains(&v)) {
        [true, true, _] => Some([0, 1, 2]),
        [_, true, true] => Some([1, 2, 0]),
        [true, _, true] => Some([2, 0, 1]),
        _ => None,
    }
}

/// Rough coding cost of a residual.
#[inline]
fn cost(residual: IVec3) -> u64 {
    residual.to_array().iter().map(|c| u64::from(c.unsigned_abs())).sum()
}

/// Reconstructed position history and triangle context.
#[derive(Debug, Clone)]
pub struct VertexPredictor {
    vertices: History<IVec3, POSITION_HISTORY>,
    indices: History<u32, POSITION_HISTORY>,
    previous: [u32; 3],
    rotation: [usize; 3],
}

impl Default for VertexPredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl VertexPredictor {
    pub fn new() -> Self {
        Self {
            vertices: History::new(IVec3::ZERO),
            indices: History::new(u32::MAX),
            previous: [0; 3],
            rotation: [0; 3],
        }
    }

    /// Enter `triangle`. A trailing partial triangle, or an empty slice for
    /// unreferenced vertices, has no previous-triangle context.
    pub fn begin_triangle(&mut self, triangle: &[u32]) {
        match *triangle {
            [a, b, c] => {
                self.rotation = shared_edge(self.previous, triangle).unwrap_or([0; 3]);
                self.previous = [a, b, c];
            }
            _ => self.rotation = [0; 3],
        }
    }

    /// Prediction for the vertex at `corner` of the current triangle.
    pub fn predict(&self, corner: usize, mode: u32) -> IVec3 {
        match mode {
            0..=2 => self.vertices.get(mode as usize),
            _ => {
                // The previous triangle's corner r was pushed 2 - r steps
                // before this triangle started.
                let [v, u, w] = self.rotation.map(|r| self.vertices.get(corner + 2 - r));
                v.wrapping_add(u).wrapping_sub(w)
            }
        }
    }

    /// Cheapest mode for `value` and its prediction. Ties keep the lower mode.
    pub fn best_mode(&self, corner: usize, value: IVec3) -> (u32, IVec3) {
        let mut best = (0, self.predict(corner, 0));
        let mut best_cost = cost(value.wrapping_sub(best.1));
        for mode in 1..PREDICTION_MODE_COUNT as u32 {
            let prediction = self.predict(corner, mode);
            let c = cost(value.wrapping_sub(prediction));
            if c < best_cost {
                best = (mode, prediction);
                best_cost = c;
            }
        }
        best
    }

    /// Record a newly coded vertex.
    pub fn push_new(&mut self, index: u32, value: IVec3) {
        self.vertices.push(value);
        self.indices.push(index);
    }

    /// Record a corner referencing an already coded vertex. Its position is
    /// replayed from the history, or the latest position stands in once it
    /// has aged out.
    pub fn push_revisit(&mut self, index: u32) {
        let value = (0..POSITION_HISTORY)
            .find(|&age| self.indices.get(age) == index)
            .map_or(self.vertices.latest(), |age| self.vertices.get(age));
        self.push_new(index, value);
    }
}
