/// Last reported job percentage.
///
/// Every update overwrites the previous value, so a worker may move progress
/// backwards. Out-of-range reports are clamped into `0..=100` and fractional
/// values are rounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressTracker {
    percent: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u8 {
        self.percent
    }

    /// Overwrites the tracked value and returns what was stored. Non-finite
    /// reports leave the value untouched.
    pub fn set(&mut self, reported: f64) -> u8 {
        if reported.is_finite() {
            self.percent = reported.round().clamp(0.0, 100.0) as u8;
        }
        self.percent
    }

    pub fn reset(&mut self) {
        self.percent = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins_even_when_decreasing() {
        let mut progress = ProgressTracker::new();
        assert_eq!(progress.set(80.0), 80);
        assert_eq!(progress.set(35.0), 35);
        assert_eq!(progress.get(), 35);
    }

    #[test]
    fn clamps_and_rounds_reports() {
        let mut progress = ProgressTracker::new();
        assert_eq!(progress.set(142.0), 100);
        assert_eq!(progress.set(-3.0), 0);
        assert_eq!(progress.set(66.6), 67);
    }

    #[test]
    fn ignores_non_finite_values() {
        let mut progress = ProgressTracker::new();
        progress.set(12.0);
        assert_eq!(progress.set(f64::NAN), 12);
        assert_eq!(progress.set(f64::INFINITY), 12);
        progress.reset();
        assert_eq!(progress.get(), 0);
    }
}
