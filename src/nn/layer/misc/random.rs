use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;

use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::context::NetContext;
use crate::nn::descriptor::{LayerDescriptor, RandomParam};
use crate::nn::layer::{Layer, check_blob_count};
use crate::tensor::Tensor;

/// 每次前向输出固定形状、均匀分布于[range_min, range_max]的随机数
#[derive(Debug)]
pub struct RandomLayer {
    name: String,
    param: RandomParam,
    rng: Rc<RefCell<StdRng>>,
}

impl RandomLayer {
    pub fn new(desc: &LayerDescriptor, param: RandomParam, ctx: &NetContext) -> Self {
        Self {
            name: desc.name.clone(),
            param,
            rng: ctx.rng().clone(),
        }
    }
}

impl Layer for RandomLayer {
    fn layer_type(&self) -> &'static str {
        "Random"
    }

    fn setup(&mut self, _ws: &mut Workspace, _bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "top", top.len(), 1, 1)?;
        if self.param.shape.is_empty() {
            return Err(NetError::Configuration(format!("Random层`{}`须给出输出形状", self.name)));
        }
        if self.param.range_max < self.param.range_min {
            return Err(NetError::Configuration(format!(
                "Random层`{}`的取值范围[{}, {}]无效",
                self.name, self.param.range_min, self.param.range_max
            )));
        }
        Ok(())
    }

    fn reshape(&mut self, ws: &mut Workspace, _bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        ws.reshape(top[0], &self.param.shape);
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, _bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let RandomParam { shape, range_min, range_max } = &self.param;
        let value = if range_max > range_min {
            Tensor::new_random(*range_min, *range_max, shape, &mut *self.rng.borrow_mut())
        } else {
            Tensor::filled(*range_min, shape)
        };
        ws.set_data(top[0], &value);
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
