use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::{LayerDescriptor, PowerParam};
use crate::nn::layer::{Layer, check_blob_count};

/// y = (shift + scale * x) ^ power
#[derive(Debug)]
pub struct PowerLayer {
    name: String,
    param: PowerParam,
}

impl PowerLayer {
    pub fn new(desc: &LayerDescriptor, param: PowerParam) -> Self {
        Self {
            name: desc.name.clone(),
            param,
        }
    }
}

impl Layer for PowerLayer {
    fn layer_type(&self) -> &'static str {
        "Power"
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
        let PowerParam { power, scale, shift } = self.param;
        let mut y = ws.data(bottom[0]).clone();
        y.as_slice_mut().iter_mut().for_each(|v| {
            let base = shift + scale * *v;
            *v = if power == 1.0 { base } else { base.powf(power) };
        });
        ws.set_data(top[0], &y);
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
        let PowerParam { power, scale, shift } = self.param;
        let mut dx = ws.diff(top[0]).clone();
        for (d, x) in dx.as_slice_mut().iter_mut().zip(ws.data(bottom[0]).as_slice()) {
            let slope = if power == 1.0 {
                scale
            } else {
                power * scale * (shift + scale * x).powf(power - 1.0)
            };
            *d *= slope;
        }
        ws.set_diff(bottom[0], &dx);
        Ok(())
    }
}
