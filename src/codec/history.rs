//! Rolling history of reconstructed values used for prediction.

/// Fixed-depth ring buffer; index 0 is the most recently pushed value.
#[derive(Debug, Clone)]
pub struct History<T: Copy, const N: usize> {
    values: [T; N],
    head: usize,
}

impl<T: Copy, const N: usize> History<T, N> {
    /// History with every slot set to `initial`.
    pub fn new(initial: T) -> Self {
        assert!(N > 0);
        Self {
            values: [initial; N],
            head: 0,
        }
    }

    /// Most recent value.
    #[inline]
    pub fn latest(&self) -> T {
        self.values[self.head]
    }

    /// Value pushed `age` steps ago (0 = latest).
    #[inline]
    pub fn get(&self, age: usize) -> T {
        debug_assert!(age < N);
        self.values[(self.head + N - age % N) % N]
    }

    #[inline]
    pub fn push(&mut self, value: T) {
        self.head = (self.head + 1) % N;
        self.values[self.head] = value;
    }
}

/// History depths per stream.
pub const INDEX_HISTORY: usize = 5;
/// Deep enough for the parallelogram corners of the previous triangle.
pub const POSITION_HISTORY: usize = 5;
pub const COLOR_HISTORY: usize = 4;
pub const NORMAL_HISTORY: usize = 4;
pub const UV_HISTORY: usize = 4;
pub const MOTION_VECTOR_HISTORY: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_order() {
        let mut h: History<u32, 3> = History::new(7);
        assert_eq!(h.latest(), 7);
        h.push(1);
        h.push(2);
        assert_eq!(h.get(0), 2);
        assert_eq!(h.get(1), 1);
        assert_eq!(h.get(2), 7);
        h.push(3);
        h.push(4);
        assert_eq!(h.latest(), 4);
        assert_eq!(h.get(2), 2);
    }
}
