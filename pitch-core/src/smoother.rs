//! Moving-average smoothing for live pitch readings.

/// Averages the last few valid readings to take the jitter out of a live
/// pitch stream.
///
/// A non-positive reading clears the whole window at once, so a released
/// note drops to silence immediately instead of trailing off.
#[derive(Debug, Clone)]
pub struct Smoother {
    buffer: Vec<f32>,
    cursor: usize,
}

impl Smoother {
    /// Creates a smoother over `size` readings (at least one).
    pub fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            cursor: 0,
        }
    }

    pub fn window(&self) -> usize {
        self.buffer.len()
    }

    pub fn smooth(&mut self, value: f32) -> f32 {
        if value <= 0.0 {
            self.reset();
            return 0.0;
        }

        self.buffer[self.cursor] = value;
        self.cursor = (self.cursor + 1) % self.buffer.len();

        let (sum, count) = self
            .buffer
            .iter()
            .filter(|&&v| v > 0.0)
            .fold((0.0f64, 0usize), |(sum, count), &v| (sum + v as f64, count + 1));

        if count == 0 {
            0.0
        } else {
            (sum / count as f64) as f32
        }
    }

    /// Zeroes every slot. The cursor keeps its position.
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
    }
}

impl Default for Smoother {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_clears_everything() {
        let mut s = Smoother::default();
        for v in [200.0, 210.0, 220.0] {
            s.smooth(v);
        }
        assert_eq!(s.smooth(0.0), 0.0);
        // Only the new reading survives the reset.
        assert_eq!(s.smooth(300.0), 300.0);
    }

    #[test]
    fn negative_counts_as_silence() {
        let mut s = Smoother::new(3);
        s.smooth(100.0);
        assert_eq!(s.smooth(-1.0), 0.0);
        assert_eq!(s.smooth(50.0), 50.0);
    }

    #[test]
    fn converges_to_constant_input() {
        let mut s = Smoother::default();
        for v in [180.0, 190.0, 400.0] {
            s.smooth(v);
        }
        let mut out = 0.0;
        for _ in 0..s.window() {
            out = s.smooth(261.63);
        }
        assert_eq!(out, 261.63);
    }

    #[test]
    fn averages_partial_window() {
        let mut s = Smoother::new(4);
        assert_eq!(s.smooth(100.0), 100.0);
        assert_eq!(s.smooth(200.0), 150.0);
        assert_eq!(s.smooth(300.0), 200.0);
    }

    #[test]
    fn window_slides() {
        let mut s = Smoother::new(2);
        s.smooth(100.0);
        s.smooth(200.0);
        // 100 is overwritten
        assert_eq!(s.smooth(400.0), 300.0);
    }

    #[test]
    fn reset_keeps_working() {
        let mut s = Smoother::new(3);
        s.smooth(100.0);
        s.smooth(100.0);
        s.reset();
        assert_eq!(s.smooth(220.0), 220.0);
        assert_eq!(s.window(), 3);
    }
}
