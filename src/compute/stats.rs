//! Histograms and goodness-of-fit statistics for collected observables.

use serde::{Deserialize, Serialize};

/// Equal-width histogram over the observed range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Lower edge of the first bin.
    pub min: f64,
    /// Width of each bin.
    pub bin_width: f64,
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Bin `samples` into `bins` bins spanning `[min, max]` of the data.
    ///
    /// Integer observables with fewer distinct values than bins get one bin
    /// per value.
    pub fn from_samples(samples: &[u32], bins: usize) -> Self {
        let bins = bins.max(1);
        let (Some(&lo), Some(&hi)) = (samples.iter().min(), samples.iter().max()) else {
            return Self {
                min: 0.0,
                bin_width: 1.0,
                counts: vec![0; bins],
            };
        };
        let span = (hi - lo) as usize + 1;
        let (bins, bin_width) = if span <= bins {
            (span, 1.0)
        } else {
            (bins, span as f64 / bins as f64)
        };

        let mut counts = vec![0u64; bins];
        for &s in samples {
            let b = (((s - lo) as f64) / bin_width) as usize;
            counts[b.min(bins - 1)] += 1;
        }
        Self {
            min: lo as f64,
            bin_width,
            counts,
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Lower edge of bin `i`.
    pub fn bin_start(&self, i: usize) -> f64 {
        self.min + i as f64 * self.bin_width
    }

    /// Bin frequencies summing to one.
    pub fn frequencies(&self) -> Vec<f64> {
        let total = self.total().max(1) as f64;
        self.counts.iter().map(|&c| c as f64 / total).collect()
    }
}

/// Pearson chi-squared statistic. Bins with zero expectation are skipped.
pub fn chi_squared(observed: &[f64], expected: &[f64]) -> f64 {
    observed
        .iter()
        .zip(expected)
        .filter(|&(_, &e)| e > 0.0)
        .map(|(&o, &e)| (o - e) * (o - e) / e)
        .sum()
}

/// Two-sample Kolmogorov-Smirnov statistic: the largest gap between the
/// empirical distribution functions.
pub fn ks_statistic(a: &[u32], b: &[u32]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_unstable();
    b.sort_unstable();

    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0, 0);
    let mut d: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] == x {
            i += 1;
        }
        while j < b.len() && b[j] == x {
            j += 1;
        }
        d = d.max((i as f64 / na - j as f64 / nb).abs());
    }
    d
}

/// Critical value of the two-sample KS statistic at level `alpha`.
pub fn ks_critical(alpha: f64, n: usize, m: usize) -> f64 {
    let c = (-0.5 * (alpha / 2.0).ln()).sqrt();
    let (n, m) = (n as f64, m as f64);
    c * ((n + m) / (n * m)).sqrt()
}

/// Coefficients of the Gaussian binomial `[n choose k]_q` as a polynomial
/// in q. Coefficient i counts lattice paths with area i.
pub fn q_binomial_coefficients(n: usize, k: usize) -> Vec<u64> {
    if k > n {
        return vec![0];
    }
    // [n, k] = [n-1, k-1] + q^k [n-1, k]
    let mut table: Vec<Vec<Vec<u64>>> = vec![vec![Vec::new(); k + 1]; n + 1];
    for m in 0..=n {
        for j in 0..=k.min(m) {
            table[m][j] = if j == 0 || j == m {
                vec![1]
            } else {
                let left = &table[m - 1][j - 1];
                let right = &table[m - 1][j];
                let mut poly = vec![0u64; (j * (m - j)) + 1];
                for (i, &c) in left.iter().enumerate() {
                    poly[i] += c;
                }
                for (i, &c) in right.iter().enumerate() {
                    poly[i + j] += c;
                }
                poly
            };
        }
    }
    std::mem::take(&mut table[n][k])
}

/// `[n choose k]_q` evaluated at `q`.
pub fn q_binomial(n: usize, k: usize, q: f64) -> f64 {
    q_binomial_coefficients(n, k)
        .iter()
        .rev()
        .fold(0.0, |acc, &c| acc * q + c as f64)
}
