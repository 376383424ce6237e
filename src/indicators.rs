use std::collections::VecDeque;

/// Simple moving average over a fixed window, fed one close at a time.
/// Returns `None` until the window is full.
#[derive(Debug, Clone)]
pub struct RollingSma {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
}

impl RollingSma {
    pub fn new(period: usize) -> Self {
        RollingSma {
            period: period.max(1),
            window: VecDeque::new(),
            sum: 0.0,
        }
    }

    pub fn update(&mut self, price: f64) {
        self.window.push_back(price);
        self.sum += price;
        if self.window.len() > self.period {
            if let Some(dropped) = self.window.pop_front() {
                self.sum -= dropped;
            }
        }
    }

    pub fn value(&self) -> Option<f64> {
        if self.window.len() < self.period {
            None
        } else {
            Some(self.sum / self.window.len() as f64)
        }
    }
}

/// Population standard deviation over a fixed window.
#[derive(Debug, Clone)]
pub struct RollingStdDev {
    period: usize,
    window: VecDeque<f64>,
}

impl RollingStdDev {
    pub fn new(period: usize) -> Self {
        RollingStdDev {
            period: period.max(1),
            window: VecDeque::new(),
        }
    }

    pub fn update(&mut self, price: f64) {
        self.window.push_back(price);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
    }

    pub fn value(&self) -> Option<f64> {
        if self.window.len() < self.period {
            return None;
        }

        let n = self.window.len() as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let variance = self
            .window
            .iter()
            .map(|p| (p - mean) * (p - mean))
            .sum::<f64>()
            / n;
        Some(variance.sqrt())
    }
}

/// Tracks the sign of `fast - slow` and reports the bar on which it
/// flips: +1 on an upward cross, -1 on a downward cross, 0 otherwise.
#[derive(Debug, Clone, Default)]
pub struct CrossoverDetector {
    prev_diff: Option<f64>,
}

impl CrossoverDetector {
    pub fn new() -> Self {
        CrossoverDetector::default()
    }

    pub fn update(&mut self, fast: Option<f64>, slow: Option<f64>) -> i32 {
        let (fast, slow) = match (fast, slow) {
            (Some(f), Some(s)) => (f, s),
            _ => return 0,
        };

        let diff = fast - slow;
        let signal = match self.prev_diff {
            Some(prev) if prev <= 0.0 && diff > 0.0 => 1,
            Some(prev) if prev >= 0.0 && diff < 0.0 => -1,
            _ => 0,
        };
        self.prev_diff = Some(diff);
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_waits_for_full_window() {
        let mut sma = RollingSma::new(3);
        sma.update(1.0);
        sma.update(2.0);
        assert_eq!(sma.value(), None);
        sma.update(3.0);
        assert_eq!(sma.value(), Some(2.0));
        sma.update(5.0);
        assert!((sma.value().unwrap() - 10.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn std_dev_is_population_over_window() {
        let mut sd = RollingStdDev::new(4);
        for p in [2.0, 4.0, 4.0, 6.0] {
            sd.update(p);
        }
        // mean 4, variance (4+0+0+4)/4 = 2
        assert!((sd.value().unwrap() - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn crossover_fires_once_per_flip() {
        let mut cross = CrossoverDetector::new();
        assert_eq!(cross.update(Some(1.0), Some(2.0)), 0);
        assert_eq!(cross.update(Some(2.5), Some(2.0)), 1);
        assert_eq!(cross.update(Some(3.0), Some(2.0)), 0);
        assert_eq!(cross.update(Some(1.5), Some(2.0)), -1);
    }
}
