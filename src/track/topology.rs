//! Frames at which mesh connectivity changes.

use crate::util::{Error, Result};

/// Whether `frame_a` and `frame_b` fall in the same topology bucket.
///
/// `ranges` is ascending; bucket `k` holds the frames with exactly `k`
/// range starts at or before them, so the first bucket is open below and
/// the last open above.
pub fn is_same_topology(ranges: &[u32], frame_a: u32, frame_b: u32) -> bool {
    let bucket = |frame: u32| ranges.partition_point(|&r| r <= frame);
    bucket(frame_a) == bucket(frame_b)
}

/// Ascending list of frame ids starting a new topology.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopologyRanges {
    starts: Vec<u32>,
}

impl TopologyRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a persisted list, checking it ascends.
    pub fn from_vec(starts: Vec<u32>) -> Result<Self> {
        if starts.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::invalid("topology ranges not strictly ascending"));
        }
        Ok(Self { starts })
    }

    /// Mark `frame` as the first frame of a new topology.
    pub fn push(&mut self, frame: u32) {
        if let Some(&last) = self.starts.last() {
            debug_assert!(frame > last, "topology range {frame} does not follow {last}");
        }
        self.starts.push(frame);
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.starts
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn is_same_topology(&self, frame_a: u32, frame_b: u32) -> bool {
        is_same_topology(&self.starts, frame_a, frame_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets() {
        assert!(is_same_topology(&[5, 10], 4, 4));
        assert!(!is_same_topology(&[5, 10], 4, 6));
        assert!(is_same_topology(&[5, 10], 5, 9));
        assert!(!is_same_topology(&[5, 10], 9, 10));
        assert!(is_same_topology(&[5, 10], 10, 1000));
        assert!(is_same_topology(&[], 0, 1000));
    }

    #[test]
    fn test_ranges() {
        let mut r = TopologyRanges::new();
        r.push(0);
        r.push(3);
        assert!(r.is_same_topology(1, 2));
        assert!(!r.is_same_topology(2, 3));
        assert!(TopologyRanges::from_vec(vec![3, 3]).is_err());
        assert_eq!(TopologyRanges::from_vec(vec![0, 3]).expect("ranges"), r);
    }
}
