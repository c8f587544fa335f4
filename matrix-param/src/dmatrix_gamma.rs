use crate::special::{digamma, ln_gamma};
use crate::traits::*;
use nalgebra::{DMatrix, DVector};
use rand::Rng;

/// Independent Gamma variational factors arranged as `K x N`, one column
/// per entity (document, term, user). All columns share the same K-vector
/// of rates, which is how every rate update of the Gamma-Poisson model
/// is structured.
#[derive(Debug, Clone)]
pub struct GammaMatrix {
    num_rows: usize,
    num_columns: usize,
    //////////////////////
    // hyper parameters //
    //////////////////////
    a0: f64,
    b0: f64,
    ///////////////////////////
    // variational factors  //
    ///////////////////////////
    shape: DMatrix<f64>,
    rate: DVector<f64>,
    ///////////////////////////
    // sufficient statistics //
    ///////////////////////////
    shape_stat: DMatrix<f64>,
    //////////////////////////
    // estimated parameters //
    //////////////////////////
    estimated_mean: DMatrix<f64>,
    estimated_log_mean: DMatrix<f64>,
}

impl GammaMatrix {
    /// Prior `(a0, b0)`
    pub fn prior(&self) -> (f64, f64) {
        (self.a0, self.b0)
    }

    pub fn shape(&self) -> &DMatrix<f64> {
        &self.shape
    }

    pub fn rate(&self) -> &DVector<f64> {
        &self.rate
    }

    /// Replace the shared rate and recalibrate
    pub fn set_rate(&mut self, rate: DVector<f64>) {
        debug_assert_eq!(rate.len(), self.num_rows);
        self.rate = rate;
        self.calibrate();
    }

    /// Replace shapes and rate together (e.g., read back from a device)
    pub fn set_params(&mut self, shape: DMatrix<f64>, rate: DVector<f64>) {
        debug_assert_eq!(shape.shape(), (self.num_rows, self.num_columns));
        debug_assert_eq!(rate.len(), self.num_rows);
        self.shape = shape;
        self.rate = rate;
        self.calibrate();
    }

    /// Break the symmetry between rows: shape = a0 + U(0,1)
    pub fn perturb_shape<R: Rng>(&mut self, rng: &mut R) {
        let a0 = self.a0;
        self.shape.apply(|x| *x = a0 + rng.random::<f64>());
        self.calibrate();
    }

    fn entry_elbo(&self, shape: f64, rate: f64, mean: f64, log_mean: f64) -> f64 {
        let (a0, b0) = (self.a0, self.b0);
        let log_prior = a0 * b0.ln() - ln_gamma(a0) + (a0 - 1.0) * log_mean - b0 * mean;
        let entropy = shape - rate.ln() + ln_gamma(shape) + (1.0 - shape) * digamma(shape);
        log_prior + entropy
    }
}

impl TwoStatParam for GammaMatrix {
    type Mat = DMatrix<f64>;
    type Vec = DVector<f64>;
    type Scalar = f64;

    fn new(dims: (usize, usize), a0: Self::Scalar, b0: Self::Scalar) -> Self {
        let (nrow, ncol) = dims;
        let shape = DMatrix::from_element(nrow, ncol, a0);
        let rate = DVector::from_element(nrow, b0);
        let mut ret = Self {
            num_rows: nrow,
            num_columns: ncol,
            a0,
            b0,
            shape,
            rate,
            shape_stat: DMatrix::zeros(nrow, ncol),
            estimated_mean: DMatrix::zeros(nrow, ncol),
            estimated_log_mean: DMatrix::zeros(nrow, ncol),
        };
        ret.calibrate();
        ret
    }

    fn add_stat_col(&mut self, col: usize, add_a: &Self::Vec) {
        let mut stat = self.shape_stat.column_mut(col);
        stat += add_a;
    }

    fn update_stat_col(&mut self, col: usize, update_a: &Self::Vec) {
        let a0 = self.a0;
        self.shape
            .column_mut(col)
            .copy_from(&update_a.map(|x| x + a0));
    }

    fn commit_stat(&mut self) {
        let a0 = self.a0;
        self.shape = self.shape_stat.map(|x| x + a0);
        self.reset_stat();
    }

    fn reset_stat(&mut self) {
        self.shape_stat.fill(0.0);
    }

    fn update_rate(&mut self, add_b: &Self::Vec) {
        let b0 = self.b0;
        self.rate = add_b.map(|x| x + b0);
    }

    fn calibrate(&mut self) {
        for col in 0..self.num_columns {
            self.calibrate_col(col);
        }
    }

    fn calibrate_col(&mut self, col: usize) {
        for k in 0..self.num_rows {
            let (a, b) = (self.shape[(k, col)], self.rate[k]);
            self.estimated_mean[(k, col)] = a / b;
            self.estimated_log_mean[(k, col)] = digamma(a) - b.ln();
        }
    }
}

impl Inference for GammaMatrix {
    type Mat = DMatrix<f64>;
    type Scalar = f64;

    fn posterior_mean(&self) -> &Self::Mat {
        &self.estimated_mean
    }

    fn posterior_log_mean(&self) -> &Self::Mat {
        &self.estimated_log_mean
    }

    fn nrows(&self) -> usize {
        self.num_rows
    }

    fn ncols(&self) -> usize {
        self.num_columns
    }

    fn elbo_prior_entropy(&self) -> f64 {
        (0..self.num_columns)
            .map(|col| self.elbo_prior_entropy_col(col))
            .sum()
    }

    fn elbo_prior_entropy_col(&self, col: usize) -> f64 {
        (0..self.num_rows)
            .map(|k| {
                self.entry_elbo(
                    self.shape[(k, col)],
                    self.rate[k],
                    self.estimated_mean[(k, col)],
                    self.estimated_log_mean[(k, col)],
                )
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_accumulate_and_commit() {
        let mut param = GammaMatrix::new((2, 3), 0.1, 0.1);
        param.add_stat_col(1, &DVector::from_vec(vec![1.0, 2.0]));
        param.add_stat_col(1, &DVector::from_vec(vec![1.0, 0.5]));
        param.commit_stat();
        param.update_rate(&DVector::from_vec(vec![0.9, 1.9]));
        param.calibrate();

        assert_abs_diff_eq!(param.shape()[(0, 1)], 2.1, epsilon = 1e-12);
        assert_abs_diff_eq!(param.shape()[(1, 1)], 2.6, epsilon = 1e-12);
        assert_abs_diff_eq!(param.shape()[(0, 0)], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(param.posterior_mean()[(0, 1)], 2.1, epsilon = 1e-12);
        assert_abs_diff_eq!(param.posterior_mean()[(1, 1)], 1.3, epsilon = 1e-12);

        // the statistic was cleared by the commit
        param.commit_stat();
        assert_abs_diff_eq!(param.shape()[(1, 1)], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_prior_matching_posterior_has_zero_kl() {
        // q = p => E[log p] - E[log q] = 0
        let param = GammaMatrix::new((3, 4), 2.5, 1.5);
        assert_abs_diff_eq!(param.elbo_prior_entropy(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_kl_is_negative_away_from_prior() {
        let mut param = GammaMatrix::new((2, 2), 0.3, 0.3);
        param.update_stat_col(0, &DVector::from_vec(vec![5.0, 1.0]));
        param.calibrate_col(0);
        assert!(param.elbo_prior_entropy_col(0) < 0.0);
        assert_abs_diff_eq!(param.elbo_prior_entropy_col(1), 0.0, epsilon = 1e-10);
    }
}
