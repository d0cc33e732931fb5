//! Warmup adaptation: dual-averaging step size and windowed diagonal metric

/// Dual averaging of the log step size towards a target acceptance statistic
#[derive(Debug, Clone)]
pub(crate) struct StepSizeAdapter {
    target: f64,
    mu: f64,
    counter: f64,
    s_bar: f64,
    x_bar: f64,
}

impl StepSizeAdapter {
    const GAMMA: f64 = 0.05;
    const KAPPA: f64 = 0.75;
    const T0: f64 = 10.0;

    pub fn new(target: f64, initial_step: f64) -> Self {
        let mut adapter = Self {
            target,
            mu: 0.0,
            counter: 0.0,
            s_bar: 0.0,
            x_bar: 0.0,
        };
        adapter.restart(initial_step);
        adapter
    }

    /// Reset the averages and shrink towards `10·step`
    pub fn restart(&mut self, step: f64) {
        self.mu = (10.0 * step).ln();
        self.counter = 0.0;
        self.s_bar = 0.0;
        self.x_bar = 0.0;
    }

    /// Feed one acceptance statistic, returning the next step size
    pub fn learn(&mut self, accept_stat: f64) -> f64 {
        self.counter += 1.0;
        let accept_stat = accept_stat.min(1.0);

        let eta = 1.0 / (self.counter + Self::T0);
        self.s_bar = (1.0 - eta) * self.s_bar + eta * (self.target - accept_stat);

        let x = self.mu - self.s_bar * self.counter.sqrt() / Self::GAMMA;
        let x_eta = self.counter.powf(-Self::KAPPA);
        self.x_bar = (1.0 - x_eta) * self.x_bar + x_eta * x;

        x.exp()
    }

    /// Step size to use once warmup ends
    pub fn final_step(&self) -> f64 {
        self.x_bar.exp()
    }
}

/// Running mean and variance (Welford)
#[derive(Debug, Clone)]
struct Welford {
    n: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl Welford {
    fn new(dim: usize) -> Self {
        Self {
            n: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    fn add(&mut self, x: &[f64]) {
        self.n += 1;
        let n = self.n as f64;
        for ((m, m2), &v) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(x) {
            let delta = v - *m;
            *m += delta / n;
            *m2 += delta * (v - *m);
        }
    }

    fn variance(&self) -> Vec<f64> {
        let denom = (self.n.max(2) - 1) as f64;
        self.m2.iter().map(|m2| m2 / denom).collect()
    }

    fn restart(&mut self) {
        self.n = 0;
        self.mean.iter_mut().for_each(|v| *v = 0.0);
        self.m2.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Schedule of metric-adaptation windows over warmup
///
/// Fast initial buffer, a sequence of doubling slow windows, then a fast
/// terminal buffer. The last slow window stretches to meet the terminal
/// buffer.
#[derive(Debug, Clone)]
pub(crate) struct MetricAdapter {
    enabled: bool,
    warmup: usize,
    init_buffer: usize,
    term_buffer: usize,
    window_size: usize,
    next_window_end: usize,
    counter: usize,
    estimator: Welford,
}

impl MetricAdapter {
    const INIT_BUFFER: usize = 75;
    const TERM_BUFFER: usize = 50;
    const BASE_WINDOW: usize = 25;

    pub fn new(dim: usize, warmup: usize) -> Self {
        let (enabled, init_buffer, term_buffer, window_size) = if warmup < 20 {
            (false, 0, 0, 0)
        } else if Self::INIT_BUFFER + Self::BASE_WINDOW + Self::TERM_BUFFER > warmup {
            let init = (0.15 * warmup as f64) as usize;
            let term = (0.1 * warmup as f64) as usize;
            (true, init, term, warmup - (init + term))
        } else {
            (true, Self::INIT_BUFFER, Self::TERM_BUFFER, Self::BASE_WINDOW)
        };

        Self {
            enabled,
            warmup,
            init_buffer,
            term_buffer,
            window_size,
            next_window_end: (init_buffer + window_size).saturating_sub(1),
            counter: 0,
            estimator: Welford::new(dim),
        }
    }

    fn in_window(&self) -> bool {
        self.counter >= self.init_buffer
            && self.counter < self.warmup - self.term_buffer
            && self.counter != self.warmup
    }

    fn window_ends(&self) -> bool {
        self.counter == self.next_window_end && self.counter != self.warmup
    }

    fn compute_next_window(&mut self) {
        let last = self.warmup - self.term_buffer - 1;
        if self.next_window_end == last {
            return;
        }
        self.window_size *= 2;
        self.next_window_end = self.counter + self.window_size;
        if self.next_window_end != last {
            let boundary = self.next_window_end + 2 * self.window_size;
            if boundary >= self.warmup - self.term_buffer {
                self.next_window_end = last;
            }
        }
    }

    /// Record one warmup position; returns the new inverse metric at window ends
    pub fn learn(&mut self, position: &[f64]) -> Option<Vec<f64>> {
        if !self.enabled {
            return None;
        }
        if self.in_window() {
            self.estimator.add(position);
        }
        if self.window_ends() {
            self.compute_next_window();
            let n = self.estimator.n as f64;
            let metric = self
                .estimator
                .variance()
                .into_iter()
                .map(|v| (n / (n + 5.0)) * v + 1e-3 * (5.0 / (n + 5.0)))
                .collect();
            self.estimator.restart();
            self.counter += 1;
            return Some(metric);
        }
        self.counter += 1;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_dual_averaging_moves_towards_target() {
        let mut adapter = StepSizeAdapter::new(0.8, 1.0);
        // Always accepting: step grows
        let mut step = 1.0;
        for _ in 0..50 {
            step = adapter.learn(1.0);
        }
        assert!(step > 1.0);

        let mut adapter = StepSizeAdapter::new(0.8, 1.0);
        for _ in 0..50 {
            step = adapter.learn(0.0);
        }
        assert!(step < 1.0);
        assert!(adapter.final_step() < 1.0);
    }

    #[test]
    fn test_window_schedule_default_warmup() {
        let mut adapter = MetricAdapter::new(1, 1000);
        let mut ends = Vec::new();
        for i in 0..1000 {
            if adapter.learn(&[i as f64]).is_some() {
                ends.push(i);
            }
        }
        // 75 + 25, 50, 100, 200, stretched final window ending at 949
        assert_eq!(ends, vec![99, 149, 249, 449, 949]);
    }

    #[test]
    fn test_short_warmup_uses_proportional_buffers() {
        let mut adapter = MetricAdapter::new(2, 100);
        let mut updates = 0;
        for i in 0..100 {
            if let Some(metric) = adapter.learn(&[i as f64, 1.0]) {
                updates += 1;
                assert!(metric[0] > 0.0);
                // A constant coordinate is regularized towards 1e-3
                assert!(metric[1] > 0.0 && metric[1] <= 1e-3);
            }
        }
        assert_eq!(updates, 1);
    }

    #[test]
    fn test_tiny_warmup_disables_metric() {
        let mut adapter = MetricAdapter::new(1, 10);
        assert!((0..10).all(|i| adapter.learn(&[i as f64]).is_none()));
    }

    #[test]
    fn test_welford_variance() {
        let mut w = Welford::new(1);
        for v in [1.0, 2.0, 3.0, 4.0] {
            w.add(&[v]);
        }
        assert_abs_diff_eq!(w.variance()[0], 5.0 / 3.0, epsilon = 1e-12);
    }
}
