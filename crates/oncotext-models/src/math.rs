//! Small dense helpers for the forward passes.

use oncotext_eval::Tensor;

#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `x · w` for `x: [n]` and a row-major `w: [n, m]`, plus `bias: [m]`.
#[must_use]
pub fn affine(x: &[f32], w: &Tensor, bias: &Tensor) -> Vec<f32> {
    let cols = bias.len();
    let mut out = bias.data().to_vec();
    for (i, &xi) in x.iter().enumerate() {
        if xi == 0.0 {
            continue;
        }
        let row = &w.data()[i * cols..(i + 1) * cols];
        for (o, &wij) in out.iter_mut().zip(row) {
            *o += xi * wij;
        }
    }
    out
}

/// `ln(1 + e^x)` without overflow.
#[must_use]
pub fn softplus(x: f64) -> f64 {
    if x > 0.0 { x + (-x).exp().ln_1p() } else { x.exp().ln_1p() }
}

#[must_use]
pub fn log_softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let max = f64::from(max);
    let log_sum = logits.iter().map(|&l| (f64::from(l) - max).exp()).sum::<f64>().ln();
    logits.iter().map(|&l| f64::from(l) - max - log_sum).collect()
}

/// Index of the largest value; the first one wins ties.
#[must_use]
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Running mean over a whole pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingMean {
    total: f64,
    count: u64,
}

impl StreamingMean {
    pub fn add(&mut self, total: f64, count: u64) {
        self.total += total;
        self.count += count;
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total / self.count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softplus_is_stable() {
        assert!((softplus(0.0) - 2f64.ln()).abs() < 1e-12);
        assert!((softplus(1000.0) - 1000.0).abs() < 1e-9);
        assert!(softplus(-1000.0) >= 0.0);
    }

    #[test]
    fn test_log_softmax_of_equal_logits() {
        let out = log_softmax(&[0.0, 0.0, 0.0, 0.0]);
        for v in out {
            assert!((v + 4f64.ln()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_affine() {
        let w = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Tensor::new(vec![3], vec![0.5, 0.5, 0.5]).unwrap();
        assert_eq!(affine(&[1.0, 2.0], &w, &b), vec![9.5, 12.5, 15.5]);
    }

    #[test]
    fn test_argmax_first_wins_ties() {
        assert_eq!(argmax(&[0.0, 2.0, 2.0]), 1);
        assert_eq!(argmax(&[0.0, 0.0]), 0);
    }

    #[test]
    fn test_streaming_mean() {
        let mut mean = StreamingMean::default();
        assert_eq!(mean.value(), None);
        mean.add(3.0, 2);
        mean.add(1.0, 2);
        assert_eq!(mean.value(), Some(1.0));
        assert_eq!(mean.count(), 4);
    }
}
