use crate::ctpf::Ctpf;
use crate::train::VariationalModel;
use matrix_param::Inference;
use rayon::prelude::*;

fn ranked(mut scored: Vec<(usize, f64)>) -> Vec<usize> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.into_iter().map(|(i, _)| i).collect()
}

impl Ctpf {
    /// For every document, the users who have not rated it, best first.
    ///
    /// Indices are zero-based; ties go to the smaller user index. A
    /// document without readers is ranked from its content topics alone.
    pub fn document_recommendations(&self) -> Vec<Vec<usize>> {
        let corpus = self.corpus();
        let num_users = self.user_topic.ncols();
        (0..corpus.len())
            .into_par_iter()
            .map(|d| {
                let readers = corpus.document(d).readers;
                let scored = (0..num_users)
                    .filter(|&u| !readers.contains(&(u as u32 + 1)))
                    .map(|u| (u, self.score(d, u)))
                    .collect();
                ranked(scored)
            })
            .collect()
    }

    /// For every user, the documents outside its library, best first
    pub fn user_recommendations(&self) -> Vec<Vec<usize>> {
        let libraries = self.corpus().libraries();
        let num_docs = self.doc_content.ncols();
        libraries
            .par_iter()
            .enumerate()
            .map(|(u, library)| {
                let scored = (0..num_docs)
                    .filter(|d| library.binary_search(d).is_err())
                    .map(|d| (d, self.score(d, u)))
                    .collect();
                ranked(scored)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranked_order() {
        let order = ranked(vec![(0, 0.5), (1, 2.0), (2, 0.5), (3, -1.0)]);
        assert_eq!(order, vec![1, 0, 2, 3]);
    }
}
