use anyhow::{Result, bail};
use candle_core::{DType, Tensor};

/// Mean of the hidden states over unmasked tokens, `[B,T,H] -> [B,H]`,
/// optionally scaled to unit L2 norm.
pub fn masked_mean(hidden: &Tensor, attention_mask: &Tensor, l2_normalize: bool) -> Result<Tensor> {
    let dims = hidden.dims();
    if dims.len() != 3 { bail!("hidden shape must be [B,T,H], got {:?}", dims); }
    let (batch, hidden_dim) = (dims[0], dims[2]);

    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let mask_3d = mask.unsqueeze(2)?;
    let mask_broadcast = mask_3d.broadcast_as(hidden.shape())?;
    let masked = (hidden * &mask_broadcast)?;
    let sum = masked.sum(1)?;
    // Fully padded rows would divide by zero.
    let lengths = mask.sum(1)?.unsqueeze(1)?.to_dtype(sum.dtype())?.clamp(1f32, f32::MAX)?;
    let mut mean = sum.broadcast_div(&lengths)?;
    if l2_normalize {
        let eps_val = match hidden.dtype() { DType::F16 => 1e-6f32, _ => 1e-12f32 };
        let eps = Tensor::new(&[eps_val], hidden.device())?.to_dtype(hidden.dtype())?.unsqueeze(0)?;
        let norm = mean.sqr()?.sum_keepdim(1)?.sqrt()?.broadcast_add(&eps)?;
        mean = mean.broadcast_div(&norm)?;
    }
    if mean.dims() != [batch, hidden_dim] { bail!("pooled shape {:?} != [{}, {}]", mean.dims(), batch, hidden_dim); }
    Ok(mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn masked_mean_l2_basic() {
        let dev = Device::Cpu;
        // Two tokens with hidden dim 4; second token is masked out.
        let h = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], (1, 2, 4), &dev).unwrap();
        let mask = Tensor::from_slice(&[1u32, 0u32], (1, 2), &dev).unwrap();
        let out: Vec<Vec<f32>> = masked_mean(&h, &mask, true).unwrap().to_vec2().unwrap();
        let norm: f32 = (1.0f32 + 4.0 + 9.0 + 16.0).sqrt();
        for (a, b) in out[0].iter().zip([1.0 / norm, 2.0 / norm, 3.0 / norm, 4.0 / norm]) {
            assert!((a - b).abs() < 1e-5, "a={} b={}", a, b);
        }
    }

    #[test]
    fn masked_mean_without_normalization_averages() {
        let dev = Device::Cpu;
        let h = Tensor::from_slice(&[1.0f32, 3.0, 3.0, 5.0], (1, 2, 2), &dev).unwrap();
        let mask = Tensor::from_slice(&[1u32, 1u32], (1, 2), &dev).unwrap();
        let out: Vec<Vec<f32>> = masked_mean(&h, &mask, false).unwrap().to_vec2().unwrap();
        assert_eq!(out[0], vec![2.0, 4.0]);
    }
}
