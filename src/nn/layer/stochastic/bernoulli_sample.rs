use std::cell::RefCell;
use std::rc::Rc;

use rand::Rng;
use rand::rngs::StdRng;

use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::context::NetContext;
use crate::nn::descriptor::LayerDescriptor;
use crate::nn::layer::{Layer, check_blob_count};

/// 以bottom为概率p，逐元素采样0/1（U(0,1) ≤ p 时取1）；不可导
#[derive(Debug)]
pub struct BernoulliSampleLayer {
    name: String,
    rng: Rc<RefCell<StdRng>>,
}

impl BernoulliSampleLayer {
    pub fn new(desc: &LayerDescriptor, ctx: &NetContext) -> Self {
        Self {
            name: desc.name.clone(),
            rng: ctx.rng().clone(),
        }
    }
}

impl Layer for BernoulliSampleLayer {
    fn layer_type(&self) -> &'static str {
        "BernoulliSample"
    }

    fn setup(&mut self, _ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 1, 1)?;
        check_blob_count(&self.name, "top", top.len(), 1, 1)
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        ws.reshape_like(top[0], bottom[0]);
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let mut sample = ws.data(bottom[0]).clone();
        let mut rng = self.rng.borrow_mut();
        for v in sample.as_slice_mut() {
            let u: f32 = rng.gen_range(0.0..1.0);
            *v = if u > *v { 0.0 } else { 1.0 };
        }
        ws.set_data(top[0], &sample);
        Ok(())
    }

    fn backward(
        &mut self,
        _ws: &mut Workspace,
        _top: &[BlobId],
        _propagate_down: &[bool],
        _bottom: &[BlobId],
    ) -> Result<(), NetError> {
        Ok(())
    }
}
