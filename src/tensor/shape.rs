/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 张量的形状变换：变形、沿轴拼接与拆分、二维矩阵互转
 */

use ndarray::{Array2, Axis};

use super::Tensor;
use crate::errors::TensorError;

impl Tensor {
    /// 返回一个新形状的张量，元素个数必须保持不变，否则panic
    pub fn reshape(&self, shape: &[usize]) -> Tensor {
        let mut t = self.clone();
        t.reshape_mut(shape);
        t
    }

    /// 就地变形，元素个数必须保持不变，否则panic
    pub fn reshape_mut(&mut self, shape: &[usize]) {
        let total: usize = shape.iter().product();
        assert!(
            total == self.size(),
            "{}",
            TensorError::IncompatibleShape(self.shape().to_vec(), shape.to_vec())
        );
        let data = self.to_vec();
        *self = Tensor::from_vec(data, shape);
    }

    /// 沿`axis`拼接多个张量，除`axis`外其余维度必须一致
    pub fn concat(tensors: &[&Tensor], axis: usize) -> Tensor {
        assert!(!tensors.is_empty(), "{}", TensorError::EmptyList);
        let ndim = tensors[0].dimension();
        assert!(
            axis < ndim,
            "{}",
            TensorError::AxisOutOfRange { axis, ndim }
        );
        let views = tensors.iter().map(|t| t.data.view()).collect::<Vec<_>>();
        let data = ndarray::concatenate(Axis(axis), &views)
            .unwrap_or_else(|_| panic!("{}", TensorError::InconsitentShape));
        Tensor::from_array(data)
    }

    /// 沿`axis`按`sizes`拆分张量，`sizes`之和必须等于该轴长度
    pub fn split_along(&self, axis: usize, sizes: &[usize]) -> Vec<Tensor> {
        assert!(
            sizes.iter().sum::<usize>() == self.shape()[axis],
            "{}",
            TensorError::InconsitentShape
        );
        let mut start = 0;
        sizes
            .iter()
            .map(|&len| {
                let part = self
                    .data
                    .slice_axis(Axis(axis), ndarray::Slice::from(start..start + len))
                    .to_owned();
                start += len;
                Tensor::from_array(part)
            })
            .collect()
    }

    /// 按行优先顺序将数据视作`rows x cols`矩阵（拷贝）
    pub fn to_matrix(&self, rows: usize, cols: usize) -> Array2<f32> {
        assert!(
            rows * cols == self.size(),
            "{}",
            TensorError::IncompatibleShape(self.shape().to_vec(), vec![rows, cols])
        );
        Array2::from_shape_vec((rows, cols), self.to_vec())
            .expect("元素个数已核对，构造不应失败")
    }

    /// 由矩阵构造指定形状的张量
    pub fn from_matrix(matrix: Array2<f32>, shape: &[usize]) -> Tensor {
        let t = Tensor::from_array(matrix.into_dyn());
        t.reshape(shape)
    }
}
