use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::{ClipParam, LayerDescriptor};
use crate::nn::layer::stochastic::{PROB_FLOOR, batch_dims, clip_gradients};
use crate::nn::layer::{Layer, check_blob_count};
use crate::tensor::Tensor;

/// 伯努利负对数似然。bottom为概率y与观测x，top为平均损失[1]及可选的逐项分解(N,1)
#[derive(Debug)]
pub struct BernoulliLossLayer {
    name: String,
    cliplimit: f32,
}

impl BernoulliLossLayer {
    pub fn new(desc: &LayerDescriptor, param: ClipParam) -> Self {
        Self {
            name: desc.name.clone(),
            cliplimit: param.cliplimit,
        }
    }
}

impl Layer for BernoulliLossLayer {
    fn layer_type(&self) -> &'static str {
        "BernoulliLoss"
    }

    fn setup(&mut self, _ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 2, 2)?;
        check_blob_count(&self.name, "top", top.len(), 1, 2)
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let (y, x) = (ws.shape(bottom[0]), ws.shape(bottom[1]));
        if y.first() != x.first() || ws.count(bottom[0]) != ws.count(bottom[1]) {
            return Err(NetError::ShapeMismatch {
                expected: y,
                got: x,
                message: format!("BernoulliLoss层`{}`的x与y须有相同的批大小与元素数", self.name),
            });
        }
        ws.reshape(top[0], &[1]);
        if let Some(&breakdown) = top.get(1) {
            ws.reshape(breakdown, &[batch_dims(&y).0, 1]);
        }
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let (n, d) = batch_dims(&ws.shape(bottom[0]));
        let y = ws.data(bottom[0]).as_slice();
        let x = ws.data(bottom[1]).as_slice();
        let mut loss = 0.0;
        let mut breakdown = vec![0.0; n];
        for item in 0..n {
            let mut logprob = 0.0;
            for i in item * d..(item + 1) * d {
                logprob += x[i] * y[i].max(PROB_FLOOR).ln()
                    + (1.0 - x[i]) * (1.0 - y[i]).max(PROB_FLOOR).ln();
            }
            breakdown[item] = -logprob / n as f32;
            loss -= logprob / n as f32;
        }
        ws.set_data(top[0], &Tensor::new(&[loss], &[1]));
        if let Some(&t) = top.get(1) {
            ws.set_data(t, &Tensor::new(&breakdown, &[n, 1]));
        }
        Ok(())
    }

    fn backward(
        &mut self,
        ws: &mut Workspace,
        top: &[BlobId],
        propagate_down: &[bool],
        bottom: &[BlobId],
    ) -> Result<(), NetError> {
        if !propagate_down[0] {
            return Ok(());
        }
        let shape = ws.shape(bottom[0]);
        let (n, d) = batch_dims(&shape);
        let base = ws.diff(top[0]).as_slice()[0];
        let extra = top.get(1).map(|&t| ws.diff(t).to_vec());
        let y = ws.data(bottom[0]).as_slice();
        let x = ws.data(bottom[1]).as_slice();
        let mut dy = Tensor::zeros(&shape);
        let grad = dy.as_slice_mut();
        for item in 0..n {
            let w = base + extra.as_ref().map_or(0.0, |e| e[item]);
            for i in item * d..(item + 1) * d {
                grad[i] = -w
                    * (x[i] / y[i].max(PROB_FLOOR) - (1.0 - x[i]) / (1.0 - y[i]).max(PROB_FLOOR))
                    / n as f32;
            }
        }
        clip_gradients(&mut [&mut dy], self.cliplimit);
        ws.set_diff(bottom[0], &dy);
        Ok(())
    }
}
