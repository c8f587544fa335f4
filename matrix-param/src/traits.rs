/// Posterior summaries of a variational parameter array
pub trait Inference {
    type Mat;
    type Scalar;

    fn posterior_mean(&self) -> &Self::Mat;
    fn posterior_log_mean(&self) -> &Self::Mat;

    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;

    /// E[log p] - E[log q] summed over every entry
    fn elbo_prior_entropy(&self) -> Self::Scalar;

    /// E[log p] - E[log q] summed over one column
    fn elbo_prior_entropy_col(&self, col: usize) -> Self::Scalar;
}

/// A parameter matrix with two types of statistics
/// with hyper parameters a0 and b0
pub trait TwoStatParam {
    type Mat;
    type Vec;
    type Scalar;

    fn new(dims: (usize, usize), a0: Self::Scalar, b0: Self::Scalar) -> Self;

    /// accumulate into the pending shape statistic of one column
    fn add_stat_col(&mut self, col: usize, add_a: &Self::Vec);

    /// overwrite the shape of one column with `a0 + update_a`
    fn update_stat_col(&mut self, col: usize, update_a: &Self::Vec);

    /// shape = a0 + pending statistic; the statistic is cleared
    fn commit_stat(&mut self);

    /// clear the pending statistic
    fn reset_stat(&mut self);

    /// rate = b0 + add_b
    fn update_rate(&mut self, add_b: &Self::Vec);

    fn calibrate(&mut self);
    fn calibrate_col(&mut self, col: usize);
}
