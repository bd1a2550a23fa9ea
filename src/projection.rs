//! Shared fused-QKV projection front end composed by every attention variant.
//!
//! [`QkvProjection`] owns the fused query/key/value projection, the output
//! projection, the two dropout probabilities, and the execution-backend
//! decision. [`QkvProjection::project`] turns `[batch, seq_len, n_embd]`
//! hidden states into per-head `[batch, heads, seq_len, head_dim]` tensors;
//! variants then apply their own scoring and hand the merged context back to
//! [`QkvProjection::finish`].

use std::sync::OnceLock;

use candle_core::{DType, Device, Result as CandleResult, Tensor};
use candle_nn::ops::dropout;
use candle_nn::{Linear, Module};

use crate::core::{AttentionConfig, AttentionError, BackendSelection};
use crate::masks::build_causal_mask;

/// Execution backend resolved once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Fused flash-attention kernel.
    Fused,
    /// Portable path materializing an additive causal mask.
    Reference,
}

/// Whether the fused kernel can run on `device` in this build.
pub fn fused_kernel_available(device: &Device) -> bool {
    cfg!(feature = "flash-attn") && device.is_cuda()
}

static SLOW_PATH_WARNING: OnceLock<()> = OnceLock::new();

/// Result of one fused projection, split and reshaped per head.
///
/// `q` is shaped `[batch, n_head, seq_len, head_dim]`; `k` and `v` use the
/// configured number of K/V heads, which equals `n_head` unless grouped-query
/// attention narrowed it. The input geometry is echoed back so callers need
/// not re-derive it.
#[derive(Debug, Clone)]
pub struct ProjectedQkv {
    pub q: Tensor,
    pub k: Tensor,
    pub v: Tensor,
    pub batch: usize,
    pub seq_len: usize,
    pub channels: usize,
}

/// Fused QKV projection plus output projection and regularization knobs.
#[derive(Debug)]
pub struct QkvProjection {
    qkv_proj: Linear,
    out_proj: Linear,
    attn_dropout: f32,
    resid_dropout: f32,
    n_embd: usize,
    n_head: usize,
    kv_heads: usize,
    head_dim: usize,
    block_size: usize,
    backend: Backend,
    device: Device,
    // Lower-triangular additive mask, allocated only on the reference path.
    fallback_mask: Option<Tensor>,
}

impl QkvProjection {
    /// Validate the configuration and allocate the learned projections.
    pub fn new(config: &AttentionConfig) -> Result<Self, AttentionError> {
        config.validate()?;

        let n_embd = config.n_embd;
        let n_head = config.n_head;
        let kv_heads = config.kv_heads();
        let head_dim = config.head_dim();

        let backend = resolve_backend(config)?;
        let fallback_mask = match backend {
            Backend::Fused => None,
            Backend::Reference => Some(build_causal_mask(
                &config.device,
                config.block_size,
                config.block_size,
            )?),
        };

        // Q keeps one projection per head; K and V shrink with the K/V head
        // count. The full-MHA case yields the classic n_embd -> 3 * n_embd.
        let fused_out = (n_head + 2 * kv_heads) * head_dim;
        let qkv_proj = xavier_linear(n_embd, fused_out, config.bias, config.dtype, &config.device)?;
        let out_proj = xavier_linear(n_embd, n_embd, config.bias, config.dtype, &config.device)?;

        log::debug!(
            "qkv projection init n_embd={n_embd} n_head={n_head} kv_heads={kv_heads} backend={backend:?}"
        );

        Ok(Self {
            qkv_proj,
            out_proj,
            attn_dropout: config.dropout,
            resid_dropout: config.dropout,
            n_embd,
            n_head,
            kv_heads,
            head_dim,
            block_size: config.block_size,
            backend,
            device: config.device.clone(),
            fallback_mask,
        })
    }

    /// Project hidden states into per-head Q, K, and V tensors.
    ///
    /// Purely functional with respect to the stored parameters: identical
    /// input and weights always produce identical output.
    pub fn project(&self, hidden: &Tensor) -> Result<ProjectedQkv, AttentionError> {
        let (batch, seq_len, channels) =
            hidden.dims3().map_err(|_| AttentionError::ShapeMismatch {
                context: format!(
                    "expected input shaped [batch, seq_len, {}], got {:?}",
                    self.n_embd,
                    hidden.dims()
                ),
            })?;
        if channels != self.n_embd {
            return Err(AttentionError::ShapeMismatch {
                context: format!(
                    "input channel dimension {channels} does not match n_embd {}",
                    self.n_embd
                ),
            });
        }

        let qkv = self.qkv_proj.forward(hidden)?;

        let q_dim = self.n_head * self.head_dim;
        let kv_dim = self.kv_heads * self.head_dim;
        let q = qkv.narrow(2, 0, q_dim)?;
        let k = qkv.narrow(2, q_dim, kv_dim)?;
        let v = qkv.narrow(2, q_dim + kv_dim, kv_dim)?;

        let q = split_heads(&q, batch, seq_len, self.n_head, self.head_dim)?;
        let k = split_heads(&k, batch, seq_len, self.kv_heads, self.head_dim)?;
        let v = split_heads(&v, batch, seq_len, self.kv_heads, self.head_dim)?;

        Ok(ProjectedQkv {
            q,
            k,
            v,
            batch,
            seq_len,
            channels,
        })
    }

    /// Collapse `[batch, heads, seq_len, head_dim]` back to
    /// `[batch, seq_len, n_embd]`.
    pub fn merge_heads(&self, context: &Tensor) -> Result<Tensor, AttentionError> {
        let (batch, heads, seq_len, head_dim) =
            context.dims4().map_err(|_| AttentionError::ShapeMismatch {
                context: format!(
                    "expected context shaped [batch, heads, seq_len, head_dim], got {:?}",
                    context.dims()
                ),
            })?;
        if heads * head_dim != self.n_embd {
            return Err(AttentionError::ShapeMismatch {
                context: format!(
                    "context heads * head_dim = {} does not match n_embd {}",
                    heads * head_dim,
                    self.n_embd
                ),
            });
        }
        let merged = context
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, self.n_embd))?;
        Ok(merged)
    }

    /// Output projection followed by residual dropout.
    pub fn finish(&self, merged: &Tensor) -> Result<Tensor, AttentionError> {
        let projected = self.out_proj.forward(merged)?;
        self.apply_dropout(&projected, self.resid_dropout)
    }

    /// Dropout over attention weights, active only for positive probability.
    pub fn attn_dropout(&self, probs: &Tensor) -> Result<Tensor, AttentionError> {
        self.apply_dropout(probs, self.attn_dropout)
    }

    /// Additive causal mask for a `q_len` by `k_len` score matrix.
    ///
    /// On the reference path, square masks are sliced from the preallocated
    /// `block_size` buffer and sequences longer than `block_size` are
    /// rejected. Rectangular masks (K/V extended with a prefix) are built on
    /// demand.
    pub fn causal_mask(&self, q_len: usize, k_len: usize) -> Result<Tensor, AttentionError> {
        if q_len == k_len {
            if let Some(buffer) = &self.fallback_mask {
                if q_len > self.block_size {
                    return Err(AttentionError::ShapeMismatch {
                        context: format!(
                            "sequence length {q_len} exceeds block_size {}",
                            self.block_size
                        ),
                    });
                }
                return Ok(buffer.narrow(2, 0, q_len)?.narrow(3, 0, k_len)?);
            }
        }
        build_causal_mask(&self.device, q_len, k_len).map_err(Into::into)
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn n_head(&self) -> usize {
        self.n_head
    }

    pub fn kv_heads(&self) -> usize {
        self.kv_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    fn apply_dropout(&self, tensor: &Tensor, p: f32) -> Result<Tensor, AttentionError> {
        if p > 0.0 {
            Ok(dropout(tensor, p)?)
        } else {
            Ok(tensor.clone())
        }
    }
}

fn resolve_backend(config: &AttentionConfig) -> Result<Backend, AttentionError> {
    match config.backend {
        BackendSelection::ReferenceOnly => Ok(Backend::Reference),
        BackendSelection::FusedOnly => {
            if fused_kernel_available(&config.device) {
                Ok(Backend::Fused)
            } else {
                Err(AttentionError::InvalidConfig {
                    message: "fused attention kernel requested but not available on this device"
                        .to_string(),
                })
            }
        }
        BackendSelection::Auto => {
            if fused_kernel_available(&config.device) {
                Ok(Backend::Fused)
            } else {
                if SLOW_PATH_WARNING.set(()).is_ok() {
                    log::warn!(
                        "fused attention kernel unavailable, using the reference path with a materialized causal mask"
                    );
                }
                Ok(Backend::Reference)
            }
        }
    }
}

fn split_heads(
    tensor: &Tensor,
    batch: usize,
    seq_len: usize,
    heads: usize,
    head_dim: usize,
) -> CandleResult<Tensor> {
    tensor
        .contiguous()?
        .reshape((batch, seq_len, heads, head_dim))?
        .transpose(1, 2)?
        .contiguous()
}

fn xavier_linear(
    in_dim: usize,
    out_dim: usize,
    bias: bool,
    dtype: DType,
    device: &Device,
) -> CandleResult<Linear> {
    let bound = (6.0 / (in_dim + out_dim) as f64).sqrt() as f32;
    let weight = Tensor::rand(-bound, bound, (out_dim, in_dim), device)?.to_dtype(dtype)?;
    let bias = if bias {
        Some(Tensor::zeros(out_dim, dtype, device)?)
    } else {
        None
    };
    Ok(Linear::new(weight, bias))
}
