/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 张量：基于ndarray的多维f32数组，作为Blob中data/diff两半的载体
 */

use ndarray::{Array, IxDyn};
use rand::Rng;
use rand::distributions::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::errors::TensorError;

mod ops;
mod property;
mod shape;

#[cfg(test)]
mod tests;

/// 定义张量的结构体。其可以是标量、向量、矩阵或更高维度的数组。
/// 注：内部数组始终保持标准（行优先、连续）内存布局，故可随时以切片方式访问
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    data: Array<f32, IxDyn>,
}

impl Tensor {
    /// 创建一个张量，若为标量，`shape`可以是[]、[1]、[1,1]...
    /// 注：`data`的长度必须和`shape`中所有元素的乘积相等，否则panic。
    pub fn new(data: &[f32], shape: &[usize]) -> Tensor {
        let expected = shape.iter().product::<usize>();
        assert!(
            data.len() == expected,
            "{}",
            TensorError::DataShapeMismatch {
                data_len: data.len(),
                shape: shape.to_vec(),
            }
        );
        Self::from_vec(data.to_vec(), shape)
    }

    /// 创建一个全零张量
    pub fn zeros(shape: &[usize]) -> Tensor {
        Tensor {
            data: Array::zeros(IxDyn(shape)),
        }
    }

    /// 创建一个所有元素均为`value`的张量
    pub fn filled(value: f32, shape: &[usize]) -> Tensor {
        Tensor {
            data: Array::from_elem(IxDyn(shape), value),
        }
    }

    /// 创建一个随机张量，其值在[min, max]的闭区间内均匀分布
    pub fn new_random<R: Rng + ?Sized>(min: f32, max: f32, shape: &[usize], rng: &mut R) -> Tensor {
        let uniform = Uniform::from(min..=max);
        let data = (0..shape.iter().product::<usize>())
            .map(|_| uniform.sample(rng))
            .collect::<Vec<_>>();
        Self::from_vec(data, shape)
    }

    /// 创建一个服从正态分布的随机张量
    pub fn new_normal<R: Rng + ?Sized>(mean: f32, std_dev: f32, shape: &[usize], rng: &mut R) -> Tensor {
        let data = (0..shape.iter().product::<usize>())
            .map(|_| mean + std_dev * standard_normal(rng))
            .collect::<Vec<_>>();
        Self::from_vec(data, shape)
    }

    pub(crate) fn from_vec(data: Vec<f32>, shape: &[usize]) -> Tensor {
        let data = Array::from_shape_vec(IxDyn(shape), data)
            .expect("数据长度已与形状核对，构造不应失败");
        Tensor { data }
    }

    pub(crate) fn from_array(data: Array<f32, IxDyn>) -> Tensor {
        Tensor {
            data: data.as_standard_layout().into_owned(),
        }
    }
}

/// Box-Muller变换采样一个标准正态数
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    // u1取(0, 1]，避免ln(0)
    let u1: f32 = 1.0 - rng.gen_range(0.0f32..1.0);
    let u2: f32 = rng.gen_range(0.0f32..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}
