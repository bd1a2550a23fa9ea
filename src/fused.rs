//! Flash-attention wrapper, compiled in with the `flash-attn` feature.
//!
//! The backend resolver never selects [`Backend::Fused`](crate::Backend)
//! unless the feature is enabled and the device supports it, so the stub
//! below is unreachable in practice; it exists to keep call sites free of
//! `cfg` blocks.

use candle_core::Tensor;

use crate::core::AttentionError;

#[cfg(feature = "flash-attn")]
pub(crate) fn flash_attention(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    softmax_scale: f32,
) -> Result<Tensor, AttentionError> {
    // The kernel expects [batch, seq_len, heads, head_dim].
    let q = q.transpose(1, 2)?;
    let k = k.transpose(1, 2)?;
    let v = v.transpose(1, 2)?;
    let out = candle_flash_attn::flash_attn(&q, &k, &v, softmax_scale, true)?;
    Ok(out.transpose(1, 2)?.contiguous()?)
}

#[cfg(not(feature = "flash-attn"))]
pub(crate) fn flash_attention(
    _q: &Tensor,
    _k: &Tensor,
    _v: &Tensor,
    _softmax_scale: f32,
) -> Result<Tensor, AttentionError> {
    Err(AttentionError::Backend {
        message: "fused attention kernel not compiled into this build".to_string(),
    })
}
