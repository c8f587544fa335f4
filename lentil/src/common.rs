pub use log::{debug, info, warn};
pub use std::sync::Arc;

pub use corpus_beans::{Corpus, Document, DocumentView};
pub use matrix_param::special::{additive_logistic_columns, EPSILON};

/// Dense column-major matrix
pub type Mat = nalgebra::DMatrix<f64>;
/// Dense vector
pub type DVec = nalgebra::DVector<f64>;

/// `x ln y`, zero whenever `x` is zero
pub fn xlogy(x: f64, y: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        x * y.ln()
    }
}

/// 1 / (1 + e^-x)
pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Counts of document `doc` as a vector
pub fn count_vector(doc: &DocumentView) -> DVec {
    DVec::from_iterator(doc.len(), doc.counts.iter().map(|&c| c as f64))
}

/// Ratings of document `doc` as a vector
pub fn rating_vector(doc: &DocumentView) -> DVec {
    DVec::from_iterator(doc.num_readers(), doc.ratings.iter().map(|&r| r as f64))
}

/// Indices of the `n` largest entries, largest first; ties go to the
/// smaller index
pub fn top_indices<'a, I>(values: I, n: usize) -> Vec<usize>
where
    I: IntoIterator<Item = &'a f64>,
{
    let mut order: Vec<(usize, f64)> = values.into_iter().copied().enumerate().collect();
    order.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    order.into_iter().take(n).map(|(i, _)| i).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_indices_breaks_ties_by_index() {
        let xx = [0.1, 0.5, 0.5, 0.2];
        assert_eq!(top_indices(&xx, 3), vec![1, 2, 3]);
        assert_eq!(top_indices(&xx, 10).len(), 4);
    }

    #[test]
    fn test_xlogy_at_zero() {
        assert_eq!(xlogy(0.0, 0.0), 0.0);
        assert!((xlogy(2.0, 1.0)).abs() < 1e-15);
    }
}
