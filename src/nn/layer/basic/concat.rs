use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::{ConcatParam, LayerDescriptor};
use crate::nn::layer::{Layer, check_blob_count};
use crate::tensor::Tensor;

/// 沿`axis`拼接所有bottom
#[derive(Debug)]
pub struct ConcatLayer {
    name: String,
    param: ConcatParam,
}

impl ConcatLayer {
    pub fn new(desc: &LayerDescriptor, param: ConcatParam) -> Self {
        Self {
            name: desc.name.clone(),
            param,
        }
    }

    pub fn along(name: &str, axis: usize) -> Self {
        Self {
            name: name.to_string(),
            param: ConcatParam { axis },
        }
    }
}

impl Layer for ConcatLayer {
    fn layer_type(&self) -> &'static str {
        "Concat"
    }

    fn setup(&mut self, _ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 1, usize::MAX)?;
        check_blob_count(&self.name, "top", top.len(), 1, 1)
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let axis = self.param.axis;
        let mut shape = ws.shape(bottom[0]);
        if axis >= shape.len() {
            return Err(NetError::Configuration(format!(
                "Concat层`{}`的axis={}超出输入维数{}",
                self.name,
                axis,
                shape.len()
            )));
        }
        for &b in &bottom[1..] {
            let other = ws.shape(b);
            let compatible = other.len() == shape.len()
                && other
                    .iter()
                    .zip(&shape)
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !compatible {
                return Err(NetError::ShapeMismatch {
                    expected: shape,
                    got: other,
                    message: format!("Concat层`{}`除拼接轴外各维须一致", self.name),
                });
            }
            shape[axis] += other[axis];
        }
        ws.reshape(top[0], &shape);
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let parts = bottom.iter().map(|&b| ws.data(b)).collect::<Vec<_>>();
        let value = Tensor::concat(&parts, self.param.axis);
        ws.set_data(top[0], &value);
        Ok(())
    }

    fn backward(
        &mut self,
        ws: &mut Workspace,
        top: &[BlobId],
        propagate_down: &[bool],
        bottom: &[BlobId],
    ) -> Result<(), NetError> {
        let axis = self.param.axis;
        let sizes = bottom.iter().map(|&b| ws.shape(b)[axis]).collect::<Vec<_>>();
        let grads = ws.diff(top[0]).split_along(axis, &sizes);
        for ((&b, grad), &down) in bottom.iter().zip(&grads).zip(propagate_down) {
            if down {
                ws.set_diff(b, grad);
            }
        }
        Ok(())
    }
}
