use super::kernels::*;
use super::GpuOptions;
use crate::ctpf::{Ctpf, CtpfPriors};
use crate::train::{epoch_progress, nothing_to_fit, Convergence, TrainArgs, TrainSummary, VariationalModel};
use crate::validate::Validate;
use candle_core::{DType, Device, Tensor};
use corpus_beans::FlatCorpus;
use log::info;

struct RatingTensors {
    users: Tensor,
    docs: Tensor,
    /// r x 1
    values: Tensor,
    by_doc: DeviceSegments,
    by_user: DeviceSegments,
}

/// A CTPF model resident on a candle device.
pub struct GpuCtpf {
    device: Device,
    priors: CtpfPriors,
    num_users: usize,
    token_terms: Tensor,
    token_docs: Tensor,
    /// n x 1
    token_counts: Tensor,
    by_doc: DeviceSegments,
    by_term: DeviceSegments,
    ratings: Option<RatingTensors>,
    params: CtpfTensors,
}

impl GpuCtpf {
    /// Upload the flattened corpus, its segment indices and the model's
    /// current parameters.
    pub fn load(model: &Ctpf, device: &Device, dtype: DType) -> anyhow::Result<Self> {
        let flat = FlatCorpus::encode(model.corpus());
        if flat.num_tokens() == 0 {
            anyhow::bail!("the corpus has no tokens to upload");
        }
        let n = flat.num_tokens();

        let token_terms = upload_u32(&flat.token_terms, device)?;
        let token_docs = upload_u32(&flat.token_docs, device)?;
        let token_counts = upload_f64(&flat.token_counts, (n, 1), dtype, device)?;
        let by_doc = DeviceSegments::upload(&flat.doc_token_segments(), device)?;
        let by_term = DeviceSegments::upload(&flat.term_segments, device)?;

        let ratings = if flat.num_ratings() > 0 {
            Some(RatingTensors {
                users: upload_u32(&flat.rating_users, device)?,
                docs: upload_u32(&flat.rating_docs, device)?,
                values: upload_f64(&flat.rating_values, (flat.num_ratings(), 1), dtype, device)?,
                by_doc: DeviceSegments::upload(&flat.doc_rating_segments(), device)?,
                by_user: DeviceSegments::upload(&flat.user_segments, device)?,
            })
        } else {
            None
        };

        let user = if flat.num_users > 0 {
            Some(GammaTensors::upload(&model.user_topic, dtype, device)?)
        } else {
            None
        };
        let params = CtpfTensors {
            term: GammaTensors::upload(&model.term_topic, dtype, device)?,
            user,
            content: GammaTensors::upload(&model.doc_content, dtype, device)?,
            feedback: GammaTensors::upload(&model.doc_feedback, dtype, device)?,
        };

        info!(
            "loaded CTPF on {:?} ({:?}): {} tokens, {} ratings, {} x {} documents/topics, {} terms, {} users",
            device,
            dtype,
            n,
            flat.num_ratings(),
            flat.num_docs,
            model.num_topics(),
            flat.num_terms,
            flat.num_users
        );

        Ok(GpuCtpf {
            device: device.clone(),
            priors: *model.priors(),
            num_users: flat.num_users,
            token_terms,
            token_docs,
            token_counts,
            by_doc,
            by_term,
            ratings,
            params,
        })
    }

    /// One epoch: `viter` rounds of local updates over every document in
    /// parallel, then the corpus-level shapes and rates.
    pub fn epoch(&mut self, viter: usize) -> anyhow::Result<()> {
        let elog_term = self.params.term.log_mean()?;
        let elog_user = match &self.params.user {
            Some(user) => Some(user.log_mean()?),
            None => None,
        };

        let mut token_stat = None;
        let mut rating_stat = None;

        for _ in 0..viter {
            let elog_content = self.params.content.log_mean()?;
            let elog_feedback = self.params.feedback.log_mean()?;

            // (a) assignments weighted by counts and ratings
            let phi = token_topic_kernel(&elog_content, &elog_term, &self.token_docs, &self.token_terms)?;
            let phi_c = phi.broadcast_mul(&self.token_counts)?;
            let xi_r = match (&self.ratings, &elog_user) {
                (Some(r), Some(elog_user)) => {
                    let xi = rating_topic_kernel(&elog_content, &elog_feedback, elog_user, &r.docs, &r.users)?;
                    Some(xi.broadcast_mul(&r.values)?)
                }
                _ => None,
            };
            self.device.synchronize()?;

            // (b) document shapes
            let ratings = self.rating_stat(xi_r.as_ref());
            let (content, feedback) = doc_shape_kernels(&phi_c, &self.by_doc, ratings.as_ref(), &self.priors)?;
            self.params.content.shape = content;
            self.params.feedback.shape = feedback;
            self.device.synchronize()?;

            token_stat = Some(phi_c);
            rating_stat = xi_r;
        }

        // (d) term and user shapes from the last round's assignments
        let Some(token_stat) = token_stat else {
            return Ok(());
        };
        let ratings = self.rating_stat(rating_stat.as_ref());
        let (term, user) =
            term_user_shape_kernels(&token_stat, &self.by_term, ratings.as_ref(), self.num_users, &self.priors)?;
        self.params.term.shape = term;
        if let (Some(params), Some(shape)) = (self.params.user.as_mut(), user) {
            params.shape = shape;
        }
        self.device.synchronize()?;

        // (c) rates
        rate_kernels(&mut self.params, &self.priors)?;
        self.device.synchronize()?;
        Ok(())
    }

    fn rating_stat<'a>(&'a self, stat: Option<&'a Tensor>) -> Option<RatingStat<'a>> {
        match (stat, &self.ratings) {
            (Some(stat), Some(r)) => Some(RatingStat {
                stat,
                by_doc: &r.by_doc,
                by_user: &r.by_user,
            }),
            _ => None,
        }
    }

    /// Copy every parameter back into the host model
    pub fn sync_host(&self, model: &mut Ctpf) -> anyhow::Result<()> {
        self.params.term.download(&mut model.term_topic)?;
        if let Some(user) = &self.params.user {
            user.download(&mut model.user_topic)?;
        }
        self.params.content.download(&mut model.doc_content)?;
        self.params.feedback.download(&mut model.doc_feedback)?;
        Ok(())
    }
}

/// Fit `model` on a candle device.
///
/// Same contract as [`crate::train`]: the ELBO is evaluated on the host
/// after copying the parameters back, and `model` holds the final
/// parameters on return. Any kernel failure aborts the run.
pub fn train_gpu(model: &mut Ctpf, args: &TrainArgs, options: &GpuOptions) -> anyhow::Result<TrainSummary> {
    args.validate()?;
    model.validate()?;

    let mut summary = TrainSummary::start(model);
    summary.model = "GPU-CTPF".to_string();

    if nothing_to_fit(model.corpus()) {
        info!("GPU-CTPF: no tokens to fit, skipping training");
        return Ok(summary);
    }

    let mut gpu = GpuCtpf::load(model, &options.device, options.dtype)?;

    let mut conv = Convergence::new(args);
    if conv.wants_initial() {
        let elbo = model.update_elbo();
        conv.record(0, elbo);
    }

    let pb = epoch_progress(args);
    let mut epochs = 0;
    let mut synced = true;

    for epoch in 1..=args.iter {
        gpu.epoch(args.viter)?;
        epochs = epoch;
        synced = false;
        pb.inc(1);

        if conv.is_check_epoch(epoch) {
            // the host ELBO reads the means, log means and prior terms of all four factors
            gpu.sync_host(model)?;
            synced = true;
            if conv.record(epoch, model.update_elbo()) {
                info!("GPU-CTPF: converged after {} epochs", epoch);
                break;
            }
        }
    }
    pb.finish_and_clear();

    if !conv.converged() && epochs == args.iter {
        info!("GPU-CTPF: reached the epoch cap ({})", args.iter);
    }

    if !synced {
        gpu.sync_host(model)?;
    }
    conv.finish(&mut summary, epochs);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_beans::{Corpus, Document};
    use std::sync::Arc;

    #[test]
    fn test_load_rejects_tokenless_corpus() {
        let corpus = Arc::new(Corpus::from_documents(vec![Document::default()]));
        let ctpf = Ctpf::new(corpus, 2, 1).unwrap();
        assert!(GpuCtpf::load(&ctpf, &Device::Cpu, DType::F64).is_err());
    }

    #[test]
    fn test_sync_host_without_epochs_is_identity() {
        let corpus = Arc::new(
            Corpus::from_documents(vec![
                Document::new(vec![1, 2], vec![2, 1]).with_readers(vec![1], vec![2]),
                Document::new(vec![3], vec![4]),
            ])
            .with_numeric_labels(),
        );
        let mut ctpf = Ctpf::new(corpus, 2, 5).unwrap();
        let before = ctpf.clone();
        let gpu = GpuCtpf::load(&ctpf, &Device::Cpu, DType::F64).unwrap();
        gpu.sync_host(&mut ctpf).unwrap();
        assert_eq!(ctpf.term_topic.shape(), before.term_topic.shape());
        assert_eq!(ctpf.doc_content.shape(), before.doc_content.shape());
        assert_eq!(ctpf.user_topic.rate(), before.user_topic.rate());
    }
}
