//! Statistics helpers for `no_std` environments
//!
//! Uses `libm` for the transcendental functions so the same code runs on
//! targets without `std`.

/// Mean and population standard deviation over an iterator, in one pass.
///
/// Uses Welford's update, which stays stable for long histories of values
/// close to each other.
#[must_use]
pub fn mean_std<I: IntoIterator<Item = f64>>(values: I) -> (f64, f64) {
    let mut n = 0.0_f64;
    let mut mean = 0.0_f64;
    let mut m2 = 0.0_f64;

    for v in values {
        n += 1.0;
        let delta = v - mean;
        mean += delta / n;
        m2 += delta * (v - mean);
    }

    if n == 0.0 {
        (0.0, 0.0)
    } else {
        (mean, libm::sqrt(m2 / n))
    }
}

/// In-place numerically stable softmax.
pub fn softmax(logits: &mut [f64]) {
    let Some(max) = logits.iter().copied().reduce(f64::max) else {
        return;
    };

    let mut sum = 0.0;
    for v in logits.iter_mut() {
        *v = libm::exp(*v - max);
        sum += *v;
    }

    if sum > 0.0 {
        for v in logits.iter_mut() {
            *v /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_std() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let (m, s) = mean_std(v.iter().copied());
        assert!((m - 5.0).abs() < 1e-12);
        assert!((s - 2.0).abs() < 1e-12);
        assert_eq!(mean_std(core::iter::empty()), (0.0, 0.0));
    }

    #[test]
    fn test_mean_std_close_values() {
        // Two-pass reference for values close to each other
        let v = [0.1, 0.15, 0.12, 0.9, 0.11, 0.13];
        let n = v.len() as f64;
        let mean = v.iter().sum::<f64>() / n;
        let std = libm::sqrt(v.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n);

        let (m, s) = mean_std(v.iter().copied());
        assert!((m - mean).abs() < 1e-12);
        assert!((s - std).abs() < 1e-12);
    }

    #[test]
    fn test_softmax() {
        let mut logits = [1.0, 2.0, 3.0];
        softmax(&mut logits);
        let sum: f64 = logits.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(logits[2] > logits[1] && logits[1] > logits[0]);

        // Large logits must not overflow
        let mut big = [1000.0, 1000.0];
        softmax(&mut big);
        assert!((big[0] - 0.5).abs() < 1e-12);
    }
}
