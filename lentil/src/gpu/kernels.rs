//! CTPF update equations as candle tensor programs.
//!
//! Parameters live row-major, one row per entity (document, term, user)
//! and one column per topic; rates are `1 x K` rows broadcast over
//! entities. Flat token/rating arrays carry their owning document,
//! term and user ids as `u32` tensors.

use crate::ctpf::CtpfPriors;
use candle_core::{DType, Device, Result, Tensor, D};
use corpus_beans::SegmentIndex;
use matrix_param::GammaMatrix;
use nalgebra::{DMatrix, DVector};

/// ψ(x) elementwise: shift x by the recurrence ψ(x) = ψ(x+1) − 1/x until
/// it is at least 6 larger, then use the asymptotic series.
pub fn digamma(x: &Tensor) -> Result<Tensor> {
    let mut shift = x.zeros_like()?;
    for i in 0..6 {
        shift = (shift + (x + i as f64)?.recip()?)?;
    }
    let z = (x + 6.0)?;
    let iz = z.recip()?;
    let iz2 = iz.sqr()?;

    // 1/(12z²) − 1/(120z⁴) + 1/(252z⁶) − 1/(240z⁸) + 1/(132z¹⁰)
    let mut series = (&iz2 * (1.0 / 132.0))?;
    for c in [1.0 / 240.0, 1.0 / 252.0, 1.0 / 120.0, 1.0 / 12.0] {
        series = (&iz2 * series.affine(-1.0, c)?)?;
    }
    let half = (iz * 0.5)?;
    ((z.log()? - half)? - series)? - shift
}

/// E[log x] for x ~ Gamma(shape, rate)
pub fn expected_log_gamma(shape: &Tensor, rate: &Tensor) -> Result<Tensor> {
    digamma(shape)?.broadcast_sub(&rate.log()?)
}

/// E[x] for x ~ Gamma(shape, rate)
pub fn expected_gamma(shape: &Tensor, rate: &Tensor) -> Result<Tensor> {
    shape.broadcast_div(rate)
}

/// A [`SegmentIndex`] resident on the device.
pub struct DeviceSegments {
    /// sorted position -> original position (None when already sorted)
    permutation: Option<Tensor>,
    /// key of each sorted entry
    sorted_keys: Tensor,
    /// last sorted position of each segment (`len` when empty)
    last_positions: Tensor,
    len: usize,
    num_segments: usize,
}

impl DeviceSegments {
    /// Upload once at load time
    pub fn upload(index: &SegmentIndex, device: &Device) -> Result<Self> {
        let identity = index
            .permutation
            .iter()
            .enumerate()
            .all(|(i, &p)| p as usize == i);
        let permutation = if identity {
            None
        } else {
            Some(upload_u32(&index.permutation, device)?)
        };
        Ok(Self {
            permutation,
            sorted_keys: upload_u32(&index.sorted_keys, device)?,
            last_positions: upload_u32(&index.last_positions(), device)?,
            len: index.len(),
            num_segments: index.num_segments(),
        })
    }

    /// Number of segments
    pub fn num_segments(&self) -> usize {
        self.num_segments
    }
}

/// Copy a `u32` array to the device
pub fn upload_u32(xs: &[u32], device: &Device) -> Result<Tensor> {
    Tensor::from_slice(xs, xs.len(), device)
}

/// Copy an `f64` array to the device as `dtype`; the conversion happens on
/// the host since some backends have no f64 support
pub fn upload_f64(xs: &[f64], shape: (usize, usize), dtype: DType, device: &Device) -> Result<Tensor> {
    Tensor::from_slice(xs, shape, &Device::Cpu)?
        .to_dtype(dtype)?
        .to_device(device)
}

/// Copy a device array back as row-major `f64`
pub fn download_f64(xs: &Tensor) -> Result<Vec<f64>> {
    xs.to_device(&Device::Cpu)?
        .to_dtype(DType::F64)?
        .flatten_all()?
        .to_vec1::<f64>()
}

/// Segmented sum of `values` (`n x K`, original order) into one row per
/// segment.
///
/// Rows are permuted into segment order, then a Hillis–Steele inclusive
/// scan runs in log₂ n rounds: at stride s every row adds the row s above
/// it when both carry the same key. The last row of each segment then holds
/// the segment total and is gathered; empty segments gather an appended
/// zero row. No two rows ever write the same slot.
pub fn segment_sum(values: &Tensor, segments: &DeviceSegments) -> Result<Tensor> {
    let (n, k) = values.dims2()?;
    let (dtype, device) = (values.dtype(), values.device());
    if n == 0 || segments.len == 0 {
        return Tensor::zeros((segments.num_segments, k), dtype, device);
    }

    let mut acc = match &segments.permutation {
        Some(perm) => values.index_select(perm, 0)?,
        None => values.contiguous()?,
    };
    let keys = &segments.sorted_keys;

    let mut stride = 1;
    while stride < n {
        let head = Tensor::zeros((stride, k), dtype, device)?;
        let above = Tensor::cat(&[&head, &acc.narrow(0, 0, n - stride)?], 0)?;

        let pad = Tensor::full(u32::MAX, stride, device)?;
        let keys_above = Tensor::cat(&[&pad, &keys.narrow(0, 0, n - stride)?], 0)?;
        let same = keys_above.eq(keys)?.to_dtype(dtype)?.unsqueeze(1)?;

        acc = (acc + above.broadcast_mul(&same)?)?;
        stride *= 2;
    }

    let padded = Tensor::cat(&[&acc, &Tensor::zeros((1, k), dtype, device)?], 0)?;
    padded.index_select(&segments.last_positions, 0)
}

/// Token-topic assignments φ (n x K):
/// softmax over K of E[log θ_{doc}] + E[log β_{term}]
pub fn token_topic_kernel(
    elog_content: &Tensor,
    elog_term: &Tensor,
    token_docs: &Tensor,
    token_terms: &Tensor,
) -> Result<Tensor> {
    let logits = (elog_content.index_select(token_docs, 0)? + elog_term.index_select(token_terms, 0)?)?;
    candle_nn::ops::softmax(&logits, D::Minus1)
}

/// Rating-topic assignments ξ (r x 2K): softmax over
/// [E[log θ_{doc}] + E[log η_{user}], E[log ε_{doc}] + E[log η_{user}]]
pub fn rating_topic_kernel(
    elog_content: &Tensor,
    elog_feedback: &Tensor,
    elog_user: &Tensor,
    rating_docs: &Tensor,
    rating_users: &Tensor,
) -> Result<Tensor> {
    let user = elog_user.index_select(rating_users, 0)?;
    let content = (elog_content.index_select(rating_docs, 0)? + &user)?;
    let feedback = (elog_feedback.index_select(rating_docs, 0)? + &user)?;
    let logits = Tensor::cat(&[&content, &feedback], 1)?;
    candle_nn::ops::softmax(&logits, D::Minus1)
}

/// Column totals as a `1 x K` row
pub fn column_total(x: &Tensor) -> Result<Tensor> {
    x.sum_keepdim(0)
}

/// One Gamma factor on the device: `N x K` shapes, `1 x K` rate
pub struct GammaTensors {
    /// entity x topic shapes
    pub shape: Tensor,
    /// shared rate row
    pub rate: Tensor,
}

impl GammaTensors {
    /// Upload a `K x N` host factor; its column-major storage is already
    /// the row-major `N x K` layout
    pub fn upload(param: &GammaMatrix, dtype: DType, device: &Device) -> Result<Self> {
        let (k, n) = param.shape().shape();
        Ok(Self {
            shape: upload_f64(param.shape().as_slice(), (n, k), dtype, device)?,
            rate: upload_f64(param.rate().as_slice(), (1, k), dtype, device)?,
        })
    }

    /// Write shapes and rate back into the host factor
    pub fn download(&self, param: &mut GammaMatrix) -> Result<()> {
        let (k, n) = param.shape().shape();
        let shape = download_f64(&self.shape)?;
        let rate = download_f64(&self.rate)?;
        param.set_params(DMatrix::from_column_slice(k, n, &shape), DVector::from_vec(rate));
        Ok(())
    }

    /// E[x]
    pub fn mean(&self) -> Result<Tensor> {
        expected_gamma(&self.shape, &self.rate)
    }

    /// E[log x]
    pub fn log_mean(&self) -> Result<Tensor> {
        expected_log_gamma(&self.shape, &self.rate)
    }
}

/// Every CTPF factor on the device. `user` is absent when there are no
/// users at all.
pub struct CtpfTensors {
    /// β
    pub term: GammaTensors,
    /// η
    pub user: Option<GammaTensors>,
    /// θ
    pub content: GammaTensors,
    /// ε
    pub feedback: GammaTensors,
}

/// Weighted rating assignments ξ·r (`r x 2K`) with their segments
pub struct RatingStat<'a> {
    /// ξ·r, content half first
    pub stat: &'a Tensor,
    /// ratings grouped by document
    pub by_doc: &'a DeviceSegments,
    /// ratings grouped by user
    pub by_user: &'a DeviceSegments,
}

/// Document shapes from the weighted assignments:
///
/// content  = c + Σ_tokens φ·count + Σ_ratings ξ⁽¹⁾·r
/// feedback = g + Σ_ratings ξ⁽²⁾·r
pub fn doc_shape_kernels(
    token_stat: &Tensor,
    by_doc: &DeviceSegments,
    ratings: Option<&RatingStat>,
    priors: &CtpfPriors,
) -> Result<(Tensor, Tensor)> {
    let k = token_stat.dim(1)?;
    let mut content = segment_sum(token_stat, by_doc)?;
    let feedback = match ratings {
        Some(r) => {
            content = (content + segment_sum(&r.stat.narrow(1, 0, k)?, r.by_doc)?)?;
            segment_sum(&r.stat.narrow(1, k, k)?, r.by_doc)?
        }
        None => content.zeros_like()?,
    };
    Ok(((content + priors.content_shape)?, (feedback + priors.feedback_shape)?))
}

/// Term and user shapes: rows permuted into term (user) order, then
/// reduced per segment.
///
/// term = a + Σ φ·count,  user = e + Σ (ξ⁽¹⁾ + ξ⁽²⁾)·r
pub fn term_user_shape_kernels(
    token_stat: &Tensor,
    by_term: &DeviceSegments,
    ratings: Option<&RatingStat>,
    num_users: usize,
    priors: &CtpfPriors,
) -> Result<(Tensor, Option<Tensor>)> {
    let k = token_stat.dim(1)?;
    let term = (segment_sum(token_stat, by_term)? + priors.term_shape)?;
    if num_users == 0 {
        return Ok((term, None));
    }
    let user = match ratings {
        Some(r) => {
            let both = (r.stat.narrow(1, 0, k)? + r.stat.narrow(1, k, k)?)?;
            segment_sum(&both, r.by_user)?
        }
        None => Tensor::zeros((num_users, k), token_stat.dtype(), token_stat.device())?,
    };
    Ok((term, Some((user + priors.user_shape)?)))
}

/// Shared rates in the host order: β, η, then θ and ε from the refreshed
/// term and user means.
pub fn rate_kernels(params: &mut CtpfTensors, priors: &CtpfPriors) -> Result<()> {
    let theta_sum = column_total(&params.content.mean()?)?;
    let eps_sum = column_total(&params.feedback.mean()?)?;

    params.term.rate = (&theta_sum + priors.term_rate)?;
    if let Some(user) = params.user.as_mut() {
        user.rate = ((&theta_sum + &eps_sum)? + priors.user_rate)?;
    }

    let beta_sum = column_total(&params.term.mean()?)?;
    let eta_sum = match &params.user {
        Some(user) => column_total(&user.mean()?)?,
        None => beta_sum.zeros_like()?,
    };
    params.content.rate = ((&beta_sum + &eta_sum)? + priors.content_rate)?;
    params.feedback.rate = (&eta_sum + priors.feedback_rate)?;
    Ok(())
}
