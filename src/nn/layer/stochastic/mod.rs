/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 随机采样层与概率损失层（VAE的编码器/解码器常用）
 */

mod bernoulli_loss;
mod bernoulli_sample;
mod gaussian_loss;
mod gaussian_sample;

pub use bernoulli_loss::BernoulliLossLayer;
pub use bernoulli_sample::BernoulliSampleLayer;
pub use gaussian_loss::GaussianLossLayer;
pub use gaussian_sample::GaussianSampleLayer;

use crate::tensor::Tensor;

/// 概率下限，避免log(0)与除零
pub(crate) const PROB_FLOOR: f32 = 0.01;

/// 按全局最大梯度绝对值裁剪：`cliplimit > 0`且最大值超过它时，
/// 所有梯度乘以`cliplimit / maxgrad`。返回实际使用的缩放系数
pub fn clip_gradients(grads: &mut [&mut Tensor], cliplimit: f32) -> f32 {
    if cliplimit <= 0.0 {
        return 1.0;
    }
    let maxgrad = grads.iter().map(|g| g.abs_max()).fold(0.0_f32, f32::max);
    if maxgrad <= cliplimit {
        return 1.0;
    }
    let factor = cliplimit / maxgrad;
    for g in grads.iter_mut() {
        g.scale(factor);
    }
    factor
}

/// 批大小N与每项元素数D
pub(crate) fn batch_dims(shape: &[usize]) -> (usize, usize) {
    let n = shape.first().copied().unwrap_or(1);
    let d = shape.iter().skip(1).product::<usize>();
    (n, d)
}
