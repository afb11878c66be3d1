use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::LayerDescriptor;
use crate::nn::layer::{Layer, check_blob_count};

#[derive(Debug)]
pub struct SigmoidLayer {
    name: String,
}

impl SigmoidLayer {
    pub fn new(desc: &LayerDescriptor) -> Self {
        Self {
            name: desc.name.clone(),
        }
    }
}

impl Layer for SigmoidLayer {
    fn layer_type(&self) -> &'static str {
        "Sigmoid"
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
        let mut y = ws.data(bottom[0]).clone();
        y.as_slice_mut()
            .iter_mut()
            .for_each(|v| *v = 1.0 / (1.0 + (-*v).exp()));
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
        let mut dx = ws.diff(top[0]).clone();
        for (d, y) in dx.as_slice_mut().iter_mut().zip(ws.data(top[0]).as_slice()) {
            *d *= y * (1.0 - y);
        }
        ws.set_diff(bottom[0], &dx);
        Ok(())
    }
}
