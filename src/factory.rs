//! Construction-time dispatch from configuration tag to attention variant.

use crate::core::{AttentionConfig, AttentionError, AttentionLayer};
use crate::variants::{
    CausalSelfAttention, GroupedSelfAttention, MemoryAttention, MultiScaleRetention,
};

pub const CAUSAL: &str = "causal";
pub const GROUPED: &str = "grouped";
pub const RETENTION: &str = "retention";
pub const MEMORY: &str = "memory";
/// Legacy tag for [`MemoryAttention`], kept for old configurations.
pub const HKPROJ: &str = "hkproj";

/// Construct the attention variant named by `config.attention_type`.
///
/// Pure dispatch: the configuration is forwarded unchanged to the chosen
/// constructor and every call yields a fresh module with its own parameters.
/// An unrecognized tag returns [`AttentionError::UnknownVariant`] without
/// constructing anything.
pub fn create_attention(
    config: &AttentionConfig,
) -> Result<Box<dyn AttentionLayer>, AttentionError> {
    match config.attention_type.as_str() {
        CAUSAL => Ok(Box::new(CausalSelfAttention::new(config)?)),
        GROUPED => Ok(Box::new(GroupedSelfAttention::new(config)?)),
        RETENTION => Ok(Box::new(MultiScaleRetention::new(config)?)),
        MEMORY => Ok(Box::new(MemoryAttention::new(config)?)),
        HKPROJ => Ok(Box::new(MemoryAttention::new(config)?)),
        other => Err(AttentionError::UnknownVariant {
            tag: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tag: &str) -> AttentionConfig {
        AttentionConfig::new(tag, 16, 4)
    }

    #[test]
    fn every_tag_maps_to_its_variant() {
        for (tag, kind) in [
            (CAUSAL, "causal"),
            (GROUPED, "grouped"),
            (RETENTION, "retention"),
            (MEMORY, "memory"),
        ] {
            let module = create_attention(&config(tag)).unwrap();
            assert_eq!(module.kind(), kind, "tag {tag}");
        }
    }

    #[test]
    fn legacy_alias_selects_the_memory_variant() {
        let module = create_attention(&config(HKPROJ)).unwrap();
        assert_eq!(module.kind(), "memory");
    }

    #[test]
    fn unknown_tag_is_rejected_with_the_offending_name() {
        let err = create_attention(&config("unknown")).unwrap_err();
        match &err {
            AttentionError::UnknownVariant { tag } => assert_eq!(tag, "unknown"),
            other => panic!("expected UnknownVariant, got {other:?}"),
        }
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn constructions_are_independent() {
        let first = create_attention(&config(CAUSAL)).unwrap();
        let second = create_attention(&config(CAUSAL)).unwrap();
        let x = candle_core::Tensor::rand(-1f32, 1f32, (1, 4, 16), &candle_core::Device::Cpu)
            .unwrap();
        let a = first.forward(&x).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = second.forward(&x).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_ne!(a, b);
    }
}
