use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;

use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::context::NetContext;
use crate::nn::descriptor::{GaussianSampleParam, LayerDescriptor};
use crate::nn::layer::stochastic::{PROB_FLOOR, clip_gradients};
use crate::nn::layer::{Layer, check_blob_count};
use crate::tensor::{Tensor, standard_normal};

/// 重参数化高斯采样：sample = mu + sigma·ε，ε ~ N(0, 1)
///
/// bottom：mu，可选sigma（取绝对值，下限0.01）；缺省时用参数中的固定sigma。
/// top：sample，可选第二个top输出所用的sigma
#[derive(Debug)]
pub struct GaussianSampleLayer {
    name: String,
    sigma: f32,
    cliplimit: f32,
    rng: Rc<RefCell<StdRng>>,
}

impl GaussianSampleLayer {
    pub fn new(desc: &LayerDescriptor, param: GaussianSampleParam, ctx: &NetContext) -> Self {
        Self {
            name: desc.name.clone(),
            sigma: param.sigma.max(PROB_FLOOR),
            cliplimit: param.cliplimit,
            rng: ctx.rng().clone(),
        }
    }

    fn sigma_of(&self, ws: &Workspace, bottom: &[BlobId]) -> Tensor {
        match bottom.get(1) {
            Some(&s) => {
                let mut sig = ws.data(s).clone();
                sig.as_slice_mut()
                    .iter_mut()
                    .for_each(|v| *v = v.abs().max(PROB_FLOOR));
                sig
            }
            None => Tensor::filled(self.sigma, &ws.shape(bottom[0])),
        }
    }
}

impl Layer for GaussianSampleLayer {
    fn layer_type(&self) -> &'static str {
        "GaussianSample"
    }

    fn setup(&mut self, _ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 1, 2)?;
        check_blob_count(&self.name, "top", top.len(), 1, 2)
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        if let Some(&s) = bottom.get(1) {
            if ws.count(s) != ws.count(bottom[0]) {
                return Err(NetError::ShapeMismatch {
                    expected: ws.shape(bottom[0]),
                    got: ws.shape(s),
                    message: format!("GaussianSample层`{}`的mu与sigma元素数须一致", self.name),
                });
            }
        }
        for &t in top {
            ws.reshape_like(t, bottom[0]);
        }
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let sig = self.sigma_of(ws, bottom);
        let mut sample = ws.data(bottom[0]).clone();
        {
            let mut rng = self.rng.borrow_mut();
            for (v, s) in sample.as_slice_mut().iter_mut().zip(sig.as_slice()) {
                *v += s * standard_normal(&mut *rng);
            }
        }
        ws.set_data(top[0], &sample);
        if let Some(&t) = top.get(1) {
            match bottom.get(1) {
                Some(&s) => ws.copy_data(s, t),
                None => ws.data_mut(t).fill(self.sigma),
            }
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
        let mut dmu = ws.diff(top[0]).clone();
        let Some(&sigma_blob) = bottom.get(1) else {
            // 固定sigma时不裁剪
            if propagate_down[0] {
                ws.set_diff(bottom[0], &dmu);
            }
            return Ok(());
        };
        let sig = self.sigma_of(ws, bottom);
        let mut dsigma = dmu.clone();
        {
            let sample = ws.data(top[0]).as_slice();
            let mu = ws.data(bottom[0]).as_slice();
            for (i, g) in dsigma.as_slice_mut().iter_mut().enumerate() {
                *g *= (sample[i] - mu[i]) / sig.as_slice()[i];
            }
        }
        clip_gradients(&mut [&mut dmu, &mut dsigma], self.cliplimit);
        if propagate_down[0] {
            ws.set_diff(bottom[0], &dmu);
        }
        if propagate_down[1] {
            ws.set_diff(sigma_blob, &dsigma);
        }
        Ok(())
    }
}
