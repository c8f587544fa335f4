use crate::common::*;
use matrix_param::dirichlet::sample_dirichlet;
use rand::Rng;

/// Topic-term probabilities (K x V, rows sum to one) together with the
/// zero-initialised buffer that documents scatter their weighted
/// assignments into during an epoch.
///
/// `finalize` turns the buffer into the new matrix; the replaced matrix is
/// kept as `previous` until the next `finalize`.
#[derive(Debug, Clone)]
pub struct TopicTermAccumulator {
    topics: Mat,
    log_topics: Mat,
    previous: Mat,
    stat: Mat,
}

impl TopicTermAccumulator {
    /// Each row drawn from a flat Dirichlet over `num_terms` terms
    pub fn random<R: Rng>(num_topics: usize, num_terms: usize, rng: &mut R) -> Self {
        let flat = DVec::from_element(num_terms, 1.0);
        let mut topics = Mat::zeros(num_topics, num_terms);
        if num_terms > 0 {
            for k in 0..num_topics {
                let row = sample_dirichlet(&flat, rng);
                topics.row_mut(k).copy_from(&row.transpose());
            }
        }
        Self::from_topics(topics)
    }

    /// Start from a given row-stochastic matrix
    pub fn from_topics(mut topics: Mat) -> Self {
        matrix_param::special::normalize_rows(&mut topics);
        let log_topics = topics.map(|x| x.ln());
        let (k, v) = topics.shape();
        Self {
            previous: topics.clone(),
            log_topics,
            topics,
            stat: Mat::zeros(k, v),
        }
    }

    /// K
    pub fn num_topics(&self) -> usize {
        self.topics.nrows()
    }

    /// V
    pub fn num_terms(&self) -> usize {
        self.topics.ncols()
    }

    /// Current topic-term probabilities
    pub fn topics(&self) -> &Mat {
        &self.topics
    }

    /// Elementwise log of `topics()`
    pub fn log_topics(&self) -> &Mat {
        &self.log_topics
    }

    /// The matrix before the last `finalize`
    pub fn previous(&self) -> &Mat {
        &self.previous
    }

    /// Add `weights` (length K) to the buffer column of term `w` (zero-based)
    pub fn add_column<S>(&mut self, w: usize, weights: &nalgebra::Matrix<f64, nalgebra::Dyn, nalgebra::U1, S>)
    where
        S: nalgebra::Storage<f64, nalgebra::Dyn, nalgebra::U1>,
    {
        let mut col = self.stat.column_mut(w);
        col += weights;
    }

    /// Row-normalise the buffer into the new topic-term matrix and clear it
    pub fn finalize(&mut self) {
        let (k, v) = self.stat.shape();
        let mut next = std::mem::replace(&mut self.stat, Mat::zeros(k, v));
        matrix_param::special::normalize_rows(&mut next);
        self.log_topics = next.map(|x| x.ln());
        self.previous = std::mem::replace(&mut self.topics, next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_rows_are_stochastic() {
        let mut rng = StdRng::seed_from_u64(1);
        let acc = TopicTermAccumulator::random(3, 7, &mut rng);
        for row in acc.topics().row_iter() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_finalize_keeps_previous() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut acc = TopicTermAccumulator::random(2, 3, &mut rng);
        let before = acc.topics().clone();

        acc.add_column(0, &DVec::from_vec(vec![3.0, 0.0]));
        acc.add_column(2, &DVec::from_vec(vec![1.0, 2.0]));
        acc.finalize();

        assert_eq!(acc.previous(), &before);
        assert_abs_diff_eq!(acc.topics()[(0, 0)], 0.75, epsilon = 1e-10);
        assert_abs_diff_eq!(acc.topics()[(0, 2)], 0.25, epsilon = 1e-10);
        assert_abs_diff_eq!(acc.topics()[(1, 2)], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(acc.log_topics()[(0, 0)], 0.75f64.ln(), epsilon = 1e-10);

        // an empty epoch leaves uniform rows behind
        acc.finalize();
        assert_abs_diff_eq!(acc.topics()[(1, 0)], 1.0 / 3.0, epsilon = 1e-10);
    }
}
