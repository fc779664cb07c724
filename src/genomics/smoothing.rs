use thiserror::Error;

/// Invalid smoothing parameters.
#[derive(Debug, Error, PartialEq)]
pub enum SmoothingError {
    /// Sigma must be a positive, finite number.
    #[error("gaussian sigma must be positive, got {0}")]
    InvalidSigma(f64),
    /// Window width must be at least one base.
    #[error("gaussian window width must be positive, got {0}")]
    InvalidWidth(usize),
}

/// Normalized 1D Gaussian kernel applied with reflect boundaries.
///
/// The kernel spans `2 * radius + 1` taps where `radius = (width - 1) / 2`.
/// Samples past either edge mirror the signal about the edge, including the
/// edge sample itself (`d c b a | a b c d | d c b a`), so a constant input is
/// returned unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianSmoother {
    sigma: f64,
    width: usize,
    weights: Vec<f64>,
}

impl GaussianSmoother {
    /// Build the kernel for `sigma` and `width`.
    pub fn new(sigma: f64, width: usize) -> Result<Self, SmoothingError> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(SmoothingError::InvalidSigma(sigma));
        }
        if width == 0 {
            return Err(SmoothingError::InvalidWidth(width));
        }

        let radius = ((width - 1) / 2) as i64;
        let denom = 2.0 * sigma * sigma;
        let mut weights: Vec<f64> = (-radius..=radius)
            .map(|x| (-((x * x) as f64) / denom).exp())
            .collect();
        let total: f64 = weights.iter().sum();
        weights.iter_mut().for_each(|w| *w /= total);

        Ok(Self {
            sigma,
            width,
            weights,
        })
    }

    /// Standard deviation of the kernel.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Requested window width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of taps on each side of the centre.
    pub fn radius(&self) -> usize {
        self.weights.len() / 2
    }

    /// Convolve `signal` with the kernel. Output has the input's length.
    pub fn smooth(&self, signal: &[f32]) -> Vec<f32> {
        let n = signal.len();
        if n == 0 {
            return Vec::new();
        }
        let radius = self.radius() as i64;
        (0..n as i64)
            .map(|i| {
                self.weights
                    .iter()
                    .enumerate()
                    .map(|(k, w)| w * signal[reflect(i + k as i64 - radius, n)] as f64)
                    .sum::<f64>() as f32
            })
            .collect()
    }
}

/// Map any integer index onto `0..n` by repeated half-sample mirroring.
fn reflect(idx: i64, n: usize) -> usize {
    let n = n as i64;
    let period = 2 * n;
    let m = idx.rem_euclid(period);
    if m < n {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Smooth `signal` with a Gaussian of `sigma` over `width` bases.
pub fn gaussian_smooth(signal: &[f32], sigma: f64, width: usize) -> Result<Vec<f32>, SmoothingError> {
    Ok(GaussianSmoother::new(sigma, width)?.smooth(signal))
}
