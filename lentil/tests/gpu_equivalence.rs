mod common;

use approx::assert_abs_diff_eq;
use common::block_corpus;
use lentil::gpu::{train_gpu, GpuOptions};
use lentil::*;
use matrix_param::GammaMatrix;

fn assert_close(cpu: &GammaMatrix, gpu: &GammaMatrix) {
    assert_eq!(cpu.shape().shape(), gpu.shape().shape());
    for (a, b) in cpu.shape().iter().zip(gpu.shape().iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-8 * a.abs().max(1.0));
    }
    for (a, b) in cpu.rate().iter().zip(gpu.rate().iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-8 * a.abs().max(1.0));
    }
}

#[test]
fn one_epoch_matches_host() -> anyhow::Result<()> {
    let corpus = block_corpus(9, 12, 5, 3);
    let mut host = Ctpf::new(corpus, 3, 17)?;
    let mut device = host.clone();

    let args = TrainArgs {
        iter: 1,
        tol: 0.0,
        vtol: Some(0.0),
        check_elbo: CheckElbo::Never,
        ..Default::default()
    };
    train(&mut host, &args)?;
    train_gpu(&mut device, &args, &GpuOptions::default())?;

    assert_close(&host.term_topic, &device.term_topic);
    assert_close(&host.user_topic, &device.user_topic);
    assert_close(&host.doc_content, &device.doc_content);
    assert_close(&host.doc_feedback, &device.doc_feedback);
    Ok(())
}

#[test]
fn device_training_tracks_the_elbo() -> anyhow::Result<()> {
    let mut ctpf = Ctpf::new(block_corpus(8, 10, 4, 5), 2, 23)?;
    let args = TrainArgs {
        iter: 6,
        tol: 0.0,
        check_elbo: CheckElbo::Every(2),
        ..Default::default()
    };
    let summary = train_gpu(&mut ctpf, &args, &GpuOptions::default())?;
    assert_eq!(summary.epochs, 6);
    let epochs: Vec<usize> = summary.elbo_trace.iter().map(|x| x.epoch).collect();
    assert_eq!(epochs, vec![0, 2, 4, 6]);
    assert!(ctpf.validate().is_ok());

    // the last epoch was a check, so the host already holds its parameters
    let recorded = summary.last_elbo().unwrap_or(f64::NAN);
    assert_abs_diff_eq!(ctpf.update_elbo(), recorded, epsilon = 1e-8 * recorded.abs().max(1.0));
    Ok(())
}

#[test]
fn elbo_checks_leave_the_fit_unchanged() -> anyhow::Result<()> {
    let corpus = block_corpus(8, 10, 4, 7);
    let mut checked = Ctpf::new(corpus, 2, 31)?;
    let mut unchecked = checked.clone();

    // the last epoch falls between checks, so the final parameters come
    // from the closing download
    let args = TrainArgs {
        iter: 5,
        tol: 0.0,
        check_elbo: CheckElbo::Every(2),
        ..Default::default()
    };
    let summary = train_gpu(&mut checked, &args, &GpuOptions::default())?;
    assert_eq!(summary.elbo_trace.last().map(|x| x.epoch), Some(4));

    let args = TrainArgs {
        check_elbo: CheckElbo::Never,
        ..args
    };
    train_gpu(&mut unchecked, &args, &GpuOptions::default())?;

    assert_close(&checked.term_topic, &unchecked.term_topic);
    assert_close(&checked.user_topic, &unchecked.user_topic);
    assert_close(&checked.doc_content, &unchecked.doc_content);
    assert_close(&checked.doc_feedback, &unchecked.doc_feedback);
    Ok(())
}

#[test]
fn corpus_without_ratings_runs_on_device() -> anyhow::Result<()> {
    let mut ctpf = Ctpf::new(block_corpus(6, 8, 0, 6), 2, 29)?;
    let summary = train_gpu(&mut ctpf, &TrainArgs { iter: 2, ..Default::default() }, &GpuOptions::default())?;
    assert!(summary.epochs >= 1);
    assert!(ctpf.validate().is_ok());
    Ok(())
}
