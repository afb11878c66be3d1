use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::LayerDescriptor;
use crate::nn::layer::{Layer, check_blob_count};
use crate::tensor::Tensor;

/// loss = Σ(a - b)² / (2N)，N为批大小
#[derive(Debug)]
pub struct EuclideanLossLayer {
    name: String,
    diff: Tensor,
}

impl EuclideanLossLayer {
    pub fn new(desc: &LayerDescriptor) -> Self {
        Self {
            name: desc.name.clone(),
            diff: Tensor::zeros(&[0]),
        }
    }
}

impl Layer for EuclideanLossLayer {
    fn layer_type(&self) -> &'static str {
        "EuclideanLoss"
    }

    fn setup(&mut self, _ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 2, 2)?;
        check_blob_count(&self.name, "top", top.len(), 1, 1)
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let (a, b) = (ws.shape(bottom[0]), ws.shape(bottom[1]));
        if ws.count(bottom[0]) != ws.count(bottom[1]) || a.first() != b.first() {
            return Err(NetError::ShapeMismatch {
                expected: a,
                got: b,
                message: format!("EuclideanLoss层`{}`的两个输入元素个数须一致", self.name),
            });
        }
        ws.reshape(top[0], &[1]);
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let mut diff = ws.data(bottom[0]).clone();
        diff.axpy(-1.0, ws.data(bottom[1]));
        let n = ws.shape(bottom[0]).first().copied().unwrap_or(1).max(1);
        let loss = diff.as_slice().iter().map(|d| d * d).sum::<f32>() / (2.0 * n as f32);
        ws.set_data(top[0], &Tensor::new(&[loss], &[1]));
        self.diff = diff;
        Ok(())
    }

    fn backward(
        &mut self,
        ws: &mut Workspace,
        top: &[BlobId],
        propagate_down: &[bool],
        bottom: &[BlobId],
    ) -> Result<(), NetError> {
        let n = ws.shape(bottom[0]).first().copied().unwrap_or(1).max(1);
        let weight = ws.diff(top[0]).as_slice()[0] / n as f32;
        for (i, &b) in bottom.iter().enumerate() {
            if propagate_down[i] {
                let sign = if i == 0 { 1.0 } else { -1.0 };
                let mut grad = self.diff.reshape(&ws.shape(b));
                grad.scale(sign * weight);
                ws.set_diff(b, &grad);
            }
        }
        Ok(())
    }
}
