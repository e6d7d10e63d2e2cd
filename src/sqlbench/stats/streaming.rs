/// Running mean and variance over a stream of samples.
///
/// Uses Welford's method so a job of any length needs only three words of
/// state:
///
/// ```text
///     M_k = M_{k-1} + (x_k - M_{k-1}) / k
///     S_k = S_{k-1} + (x_k - M_{k-1})(x_k - M_k)
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingStats {
    count: u64,
    mean: f64,
    sum_square_deviation: f64,
}

impl StreamingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, x: f64) {
        self.count += 1;
        let old_mean = self.mean;
        self.mean += (x - old_mean) / self.count as f64;
        self.sum_square_deviation += (x - old_mean) * (x - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Unbiased sample variance; zero until there are two samples.
    pub fn sample_variance(&self) -> f64 {
        if self.count > 1 {
            self.sum_square_deviation / (self.count - 1) as f64
        } else {
            0.0
        }
    }

    pub fn sample_std_dev(&self) -> f64 {
        self.sample_variance().sqrt()
    }

    /// Half-width of the confidence interval around the mean at level
    /// `alpha` (e.g. 0.99).
    ///
    /// Below 30 samples the normal approximation is not trustworthy and
    /// this reports zero.
    // TODO(stats): use Student's t-distribution for small samples.
    pub fn confidence(&self, alpha: f64) -> f64 {
        if self.count < 30 {
            return 0.0;
        }

        let z_alpha = norm_inverse_cdf(1.0 - ((1.0 - alpha) / 2.0));
        z_alpha * self.sample_std_dev() / (self.count as f64).sqrt()
    }
}

/// Lower tail quantile for the standard normal distribution.
///
/// Given p, returns an approximation to the x satisfying
/// p = Pr{Z <= x} where Z is standard normal. Uses Peter Acklam's
/// minimax rational approximation; the relative error has absolute
/// value below 1.15e-9. See
/// <http://home.online.no/~pjacklam/notes/invnorm/>.
pub fn norm_inverse_cdf(p: f64) -> f64 {
    let q = p - 0.5;

    if q.abs() <= 0.47575 {
        // Rational approximation for the central region.
        let r = q * q;
        (((((-39.69683028665376 * r + 220.9460984245205) * r - 275.9285104469687) * r
            + 138.3577518672690)
            * r
            - 30.66479806614716)
            * r
            + 2.506628277459239)
            * q
            / (((((-54.47609879822406 * r + 161.5858368580409) * r - 155.6989798598866) * r
                + 66.80131188771972)
                * r
                - 13.28068155288572)
                * r
                + 1.0)
    } else {
        // Rational approximation for the tails; the upper tail maps onto
        // the lower one and the sign is swapped at the end.
        let tail_p = if q > 0.0 { 1.0 - p } else { p };

        let r = (-2.0 * tail_p.ln()).sqrt();
        let z = (((((-0.007784894002430293 * r - 0.3223964580411365) * r - 2.400758277161838)
            * r
            - 2.549732539343734)
            * r
            + 4.374664141464968)
            * r
            + 2.938163982698783)
            / ((((0.007784695709041462 * r + 0.3224671290700398) * r + 2.445134137142996) * r
                + 3.754408661907416)
                * r
                + 1.0);

        if q > 0.0 {
            -z
        } else {
            z
        }
    }
}
