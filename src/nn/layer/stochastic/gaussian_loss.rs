use std::f32::consts::PI;

use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::{ClipParam, LayerDescriptor};
use crate::nn::layer::stochastic::{PROB_FLOOR, batch_dims, clip_gradients};
use crate::nn::layer::{Layer, check_blob_count};
use crate::tensor::Tensor;

/// 高斯负对数似然
///
/// bottom：mu、sigma，可选观测x。
/// - 有x时：逐元素 -log N(x; mu, sigma²)
/// - 无x时：与标准正态的KL散度（VAE编码器的先验项）
///
/// top：按批平均的损失[1]，可选逐项分解(N,1)
#[derive(Debug)]
pub struct GaussianLossLayer {
    name: String,
    cliplimit: f32,
}

impl GaussianLossLayer {
    pub fn new(desc: &LayerDescriptor, param: ClipParam) -> Self {
        Self {
            name: desc.name.clone(),
            cliplimit: param.cliplimit,
        }
    }
}

fn floor_sigma(s: f32) -> f32 {
    s.abs().max(PROB_FLOOR)
}

impl Layer for GaussianLossLayer {
    fn layer_type(&self) -> &'static str {
        "GaussianLoss"
    }

    fn setup(&mut self, _ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 2, 3)?;
        check_blob_count(&self.name, "top", top.len(), 1, 2)
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let mu = ws.shape(bottom[0]);
        for &b in &bottom[1..] {
            let other = ws.shape(b);
            if other.first() != mu.first() || ws.count(b) != ws.count(bottom[0]) {
                return Err(NetError::ShapeMismatch {
                    expected: mu,
                    got: other,
                    message: format!("GaussianLoss层`{}`的各输入须有相同的批大小与元素数", self.name),
                });
            }
        }
        ws.reshape(top[0], &[1]);
        if let Some(&breakdown) = top.get(1) {
            ws.reshape(breakdown, &[batch_dims(&mu).0, 1]);
        }
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let (n, d) = batch_dims(&ws.shape(bottom[0]));
        let mu = ws.data(bottom[0]).as_slice();
        let sigma = ws.data(bottom[1]).as_slice();
        let x = bottom.get(2).map(|&b| ws.data(b).as_slice());
        let mut loss = 0.0;
        let mut breakdown = vec![0.0; n];
        for item in 0..n {
            let mut logprob = 0.0;
            for i in item * d..(item + 1) * d {
                let sig = floor_sigma(sigma[i]);
                let p = match x {
                    Some(x) => {
                        let r = x[i] - mu[i];
                        -(2.0 * PI * sig * sig).sqrt().ln() - r * r / (2.0 * sig * sig)
                    }
                    None => 0.5 * (1.0 + (sig * sig).ln() - mu[i] * mu[i] - sig * sig),
                };
                logprob -= p;
                breakdown[item] -= p / n as f32;
            }
            loss += logprob / n as f32;
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
        let shape = ws.shape(bottom[0]);
        let (n, d) = batch_dims(&shape);
        let base = ws.diff(top[0]).as_slice()[0];
        let extra = top.get(1).map(|&t| ws.diff(t).to_vec());
        let mut dmu = Tensor::zeros(&shape);
        let mut dsigma = Tensor::zeros(&shape);
        {
            let mu = ws.data(bottom[0]).as_slice();
            let sigma = ws.data(bottom[1]).as_slice();
            let x = bottom.get(2).map(|&b| ws.data(b).as_slice());
            let (gmu, gsig) = (dmu.as_slice_mut(), dsigma.as_slice_mut());
            let nf = n as f32;
            for item in 0..n {
                let w = base + extra.as_ref().map_or(0.0, |e| e[item]);
                for i in item * d..(item + 1) * d {
                    let sig = floor_sigma(sigma[i]);
                    match x {
                        Some(x) => {
                            let r = x[i] - mu[i];
                            gmu[i] = -w * r / (sig * sig) / nf;
                            gsig[i] = w * (1.0 / sig - r * r / (sig * sig * sig)) / nf;
                        }
                        None => {
                            gmu[i] = w * mu[i] / nf;
                            gsig[i] = -w * (1.0 / sig - sig) / nf;
                        }
                    }
                }
            }
        }
        clip_gradients(&mut [&mut dmu, &mut dsigma], self.cliplimit);
        if propagate_down[0] {
            ws.set_diff(bottom[0], &dmu);
        }
        if propagate_down[1] {
            ws.set_diff(bottom[1], &dsigma);
        }
        Ok(())
    }
}
