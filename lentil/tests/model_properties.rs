mod common;

use common::block_corpus;
use lentil::corpus_beans::{Corpus, Document};
use lentil::validate::is_row_stochastic;
use lentil::*;
use std::sync::Arc;

fn quick_args(iter: usize) -> TrainArgs {
    TrainArgs {
        iter,
        tol: 0.0,
        viter: 20,
        ..Default::default()
    }
}

fn assert_stochastic<M: VariationalModel + Validate>(model: &M) {
    assert!(model.validate().is_ok(), "{} failed validation", model.name());
    assert!(is_row_stochastic(&model.topic_term()));
    for d in 0..model.corpus().len() {
        let theta = model.topic_dist(d);
        assert!(theta.iter().all(|x| x.is_finite() && *x >= 0.0));
        assert!((theta.sum() - 1.0).abs() < 1e-6);
    }
}

fn assert_monotone(summary: &TrainSummary, rel: f64) {
    assert!(summary.elbo_trace.len() > 1);
    for w in summary.elbo_trace.windows(2) {
        let slack = rel * w[0].elbo.abs().max(1.0);
        assert!(
            w[1].elbo >= w[0].elbo - slack,
            "{}: ELBO fell from {} to {} at epoch {}",
            summary.model,
            w[0].elbo,
            w[1].elbo,
            w[1].epoch
        );
    }
}

#[test]
fn fitted_models_are_stochastic_and_valid() -> anyhow::Result<()> {
    let corpus = block_corpus(12, 10, 4, 1);
    let args = quick_args(5);

    let mut lda = Lda::new(corpus.clone(), 3, 11)?;
    train(&mut lda, &args)?;
    assert_stochastic(&lda);

    let mut flda = Lda::filtered(corpus.clone(), 3, 12)?;
    train(&mut flda, &args)?;
    assert_stochastic(&flda);

    let mut ctm = Ctm::new(corpus.clone(), 3, 13)?;
    train(&mut ctm, &args)?;
    assert_stochastic(&ctm);

    let mut fctm = Ctm::filtered(corpus.clone(), 3, 14)?;
    train(&mut fctm, &args)?;
    assert_stochastic(&fctm);

    let mut ctpf = Ctpf::new(corpus, 3, 15)?;
    train(&mut ctpf, &args)?;
    assert_stochastic(&ctpf);
    Ok(())
}

#[test]
fn lda_elbo_never_decreases() -> anyhow::Result<()> {
    let mut lda = Lda::new(block_corpus(10, 10, 0, 2), 2, 21)?;
    let summary = train(&mut lda, &quick_args(15))?;
    assert_eq!(summary.epochs, 15);
    assert_monotone(&summary, 1e-6);
    Ok(())
}

#[test]
fn ctm_elbo_never_decreases() -> anyhow::Result<()> {
    let mut ctm = Ctm::new(block_corpus(10, 10, 0, 3), 2, 31)?;
    let summary = train(&mut ctm, &quick_args(10))?;
    assert_monotone(&summary, 1e-4);
    Ok(())
}

#[test]
fn flda_elbo_never_decreases() -> anyhow::Result<()> {
    let mut flda = Lda::filtered(block_corpus(10, 10, 0, 12), 2, 22)?;
    let summary = train(&mut flda, &quick_args(15))?;
    assert_eq!(summary.epochs, 15);
    assert_monotone(&summary, 1e-6);
    Ok(())
}

#[test]
fn fctm_elbo_never_decreases() -> anyhow::Result<()> {
    let mut fctm = Ctm::filtered(block_corpus(10, 10, 0, 13), 2, 32)?;
    let summary = train(&mut fctm, &quick_args(10))?;
    assert_monotone(&summary, 1e-4);
    Ok(())
}

#[test]
fn lda_recovers_generating_topics() -> anyhow::Result<()> {
    use lentil::common::Mat;
    use std::collections::HashSet;

    let (k, block) = (3, 4);
    let v = k * block;

    // every term of every block three times, so documents average 36 tokens
    let docs: Vec<_> = (0..6)
        .map(|_| Document::new((1..=v as u32).collect(), vec![3; v]))
        .collect();
    let source = Arc::new(Corpus::from_documents(docs).with_numeric_labels());

    let mut truth = Lda::new(source, k, 1)?;
    let beta = Mat::from_fn(k, v, |t, w| if w / block == t { 0.97 / block as f64 } else { 0.03 / (v - block) as f64 });
    truth.topic_terms = TopicTermAccumulator::from_topics(beta);
    truth.alpha.fill(0.1);

    let synthetic = Arc::new(gencorp(&truth, 200, 0.0, 7)?);
    let mut fitted = Lda::new(synthetic, k, 8)?;
    train(&mut fitted, &quick_args(60))?;

    let learned: Vec<HashSet<usize>> = (0..k).map(|t| fitted.top_terms(t, block).into_iter().collect()).collect();
    let mut used = HashSet::new();
    for t in 0..k {
        let expected: HashSet<usize> = (t * block..(t + 1) * block).collect();
        let matched = (0..k)
            .filter(|j| !used.contains(j))
            .find(|&j| learned[j].intersection(&expected).count() >= block - 1);
        match matched {
            Some(j) => {
                used.insert(j);
            }
            None => panic!("no fitted topic matches terms {:?}: {:?}", expected, learned),
        }
    }
    Ok(())
}

#[test]
fn ctpf_elbo_improves() -> anyhow::Result<()> {
    let mut ctpf = Ctpf::new(block_corpus(10, 10, 6, 4), 2, 41)?;
    let summary = train(&mut ctpf, &quick_args(10))?;
    let first = summary.elbo_trace.first().map(|x| x.elbo).unwrap_or(f64::NAN);
    let last = summary.last_elbo().unwrap_or(f64::NAN);
    assert!(last > first, "CTPF ELBO went from {} to {}", first, last);
    Ok(())
}

#[test]
fn identical_runs_agree() -> anyhow::Result<()> {
    let corpus = block_corpus(5, 10, 0, 5);
    let fit = || -> anyhow::Result<Lda> {
        let mut lda = Lda::new(corpus.clone(), 3, 51)?;
        train(&mut lda, &quick_args(20))?;
        Ok(lda)
    };
    let (a, b) = (fit()?, fit()?);
    for k in 0..3 {
        assert_eq!(a.top_terms(k, 1), b.top_terms(k, 1));
    }
    assert_eq!(a.topic_term(), b.topic_term());
    Ok(())
}

#[test]
fn tolerance_stops_training_early() -> anyhow::Result<()> {
    let mut lda = Lda::new(block_corpus(8, 10, 0, 6), 2, 61)?;
    let args = TrainArgs {
        iter: 500,
        tol: 1e3,
        ..Default::default()
    };
    let summary = train(&mut lda, &args)?;
    assert!(summary.converged);
    assert!(summary.epochs < 500);
    Ok(())
}

#[test]
fn never_checking_runs_every_epoch() -> anyhow::Result<()> {
    let mut ctm = Ctm::new(block_corpus(6, 8, 0, 7), 2, 71)?;
    let args = TrainArgs {
        iter: 4,
        check_elbo: CheckElbo::Never,
        ..Default::default()
    };
    let summary = train(&mut ctm, &args)?;
    assert_eq!(summary.epochs, 4);
    assert!(summary.elbo_trace.is_empty());
    assert!(!summary.converged);
    Ok(())
}

#[test]
fn generated_corpus_is_reproducible() -> anyhow::Result<()> {
    let corpus = block_corpus(10, 10, 4, 8);
    let mut ctpf = Ctpf::new(corpus.clone(), 2, 81)?;
    train(&mut ctpf, &quick_args(3))?;

    let a = gencorp(&ctpf, 6, 0.1, 99)?;
    let b = gencorp(&ctpf, 6, 0.1, 99)?;
    assert_eq!(a.len(), 6);
    assert!(a.check().is_ok());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.to_document(), y.to_document());
    }
    assert_eq!(a.vocab(), corpus.vocab());
    assert_eq!(a.users(), corpus.users());

    let mut flda = Lda::filtered(corpus, 2, 82)?;
    train(&mut flda, &quick_args(3))?;
    let c = gencorp(&flda, 4, 0.0, 5)?;
    let d = gencorp(&flda, 4, 0.0, 5)?;
    for (x, y) in c.iter().zip(d.iter()) {
        assert_eq!(x.to_document(), y.to_document());
    }
    Ok(())
}

#[test]
fn unread_document_ranks_every_user() -> anyhow::Result<()> {
    let mut docs: Vec<Document> = block_corpus(8, 10, 5, 9)
        .iter()
        .map(|doc| doc.to_document())
        .collect();
    docs.push(Document::new(vec![1, 2, 3], vec![2, 2, 1]));
    let corpus = Arc::new(
        Corpus::from_documents(docs)
            .with_users((1..=5).map(|u| Box::from(format!("u{}", u))).collect())
            .with_numeric_labels(),
    );
    let cold = corpus.len() - 1;

    let mut ctpf = Ctpf::new(corpus, 2, 91)?;
    train(&mut ctpf, &quick_args(5))?;

    let ranked = &ctpf.document_recommendations()[cold];
    assert_eq!(ranked.len(), 5);
    let mut sorted = ranked.clone();
    sorted.sort();
    assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    for w in ranked.windows(2) {
        assert!(ctpf.score(cold, w[0]) > ctpf.score(cold, w[1]));
    }

    // readers never recommend their own documents
    let libraries = ctpf.corpus().libraries();
    for (u, docs) in ctpf.user_recommendations().iter().enumerate() {
        assert!(docs.iter().all(|d| !libraries[u].contains(d)));
        assert_eq!(docs.len() + libraries[u].len(), ctpf.corpus().len());
    }
    Ok(())
}

#[test]
fn empty_corpus_runs_zero_epochs() -> anyhow::Result<()> {
    let corpus = Arc::new(Corpus::new().with_vocab(vec![Box::from("a"), Box::from("b")]));

    let mut lda = Lda::new(corpus.clone(), 2, 1)?;
    let before = lda.topic_term();
    let summary = train(&mut lda, &TrainArgs::default())?;
    assert_eq!(summary.epochs, 0);
    assert!(summary.elbo_trace.is_empty());
    assert_eq!(lda.topic_term(), before);

    let mut ctpf = Ctpf::new(corpus, 2, 1)?;
    let before = ctpf.term_topic.shape().clone();
    let summary = train(&mut ctpf, &TrainArgs::default())?;
    assert_eq!(summary.epochs, 0);
    assert_eq!(ctpf.term_topic.shape(), &before);
    Ok(())
}

#[test]
fn invalid_arguments_are_rejected() -> anyhow::Result<()> {
    let corpus = block_corpus(4, 6, 0, 10);
    assert!(matches!(Lda::new(corpus.clone(), 0, 1), Err(TopicError::InvalidArgument(_))));

    let mut lda = Lda::new(corpus, 2, 1)?;
    let before = lda.topic_term();
    let args = TrainArgs {
        viter: 0,
        ..Default::default()
    };
    assert!(matches!(train(&mut lda, &args), Err(TopicError::InvalidArgument(_))));
    assert_eq!(lda.topic_term(), before);

    let broken = Arc::new(Corpus::from_documents(vec![Document::new(vec![1, 1], vec![1, 1])]));
    assert!(matches!(Ctm::new(broken, 2, 1), Err(TopicError::InvalidCorpus)));
    Ok(())
}

#[test]
fn generated_docfile_reads_back() -> anyhow::Result<()> {
    use lentil::corpus_beans::io::{read_corpus, write_corpus};

    let mut lda = Lda::new(block_corpus(6, 8, 0, 11), 2, 111)?;
    train(&mut lda, &TrainArgs { iter: 0, ..Default::default() })?;
    let synthetic = gencorp(&lda, 5, 0.5, 3)?;

    let dir = tempfile::tempdir()?;
    let docfile = dir.path().join("synthetic.txt.gz");
    let docfile = docfile.to_str().unwrap_or_default();
    write_corpus(&synthetic, docfile, false)?;

    let loaded = read_corpus(docfile, None, None, false)?;
    assert_eq!(loaded.len(), synthetic.len());
    for (a, b) in synthetic.iter().zip(loaded.iter()) {
        assert_eq!(a.terms, b.terms);
        assert_eq!(a.counts, b.counts);
    }
    Ok(())
}
