/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 层计算中常用的就地运算与归约
 */

use super::Tensor;
use crate::errors::TensorError;

impl Tensor {
    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓就地运算↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// 所有元素乘以`factor`
    pub fn scale(&mut self, factor: f32) {
        self.data.mapv_inplace(|x| x * factor);
    }

    /// self += alpha * other，要求元素个数一致（形状可不同）
    pub fn axpy(&mut self, alpha: f32, other: &Tensor) {
        assert!(
            self.size() == other.size(),
            "{}",
            TensorError::IncompatibleShape(other.shape().to_vec(), self.shape().to_vec())
        );
        for (a, b) in self.as_slice_mut().iter_mut().zip(other.as_slice()) {
            *a += alpha * b;
        }
    }

    /// 按行优先顺序拷贝`other`的全部元素，保留自身形状；要求元素个数一致
    pub fn copy_from(&mut self, other: &Tensor) {
        assert!(
            self.size() == other.size(),
            "{}",
            TensorError::IncompatibleShape(other.shape().to_vec(), self.shape().to_vec())
        );
        self.as_slice_mut().copy_from_slice(other.as_slice());
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑就地运算↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓归约↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    pub fn sum(&self) -> f32 {
        self.data.sum()
    }

    /// 绝对值之和
    pub fn asum(&self) -> f32 {
        self.data.iter().map(|x| x.abs()).sum()
    }

    /// 绝对值的最大值；空张量返回0
    pub fn abs_max(&self) -> f32 {
        self.data.iter().fold(0.0f32, |m, x| m.max(x.abs()))
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑归约↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/
}
