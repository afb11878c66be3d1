use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::LayerDescriptor;
use crate::nn::layer::{Layer, check_blob_count};

/// 标量计数器加1
#[derive(Debug)]
pub struct IncrementLayer {
    name: String,
}

impl IncrementLayer {
    pub fn new(desc: &LayerDescriptor) -> Self {
        Self {
            name: desc.name.clone(),
        }
    }
}

impl Layer for IncrementLayer {
    fn layer_type(&self) -> &'static str {
        "Increment"
    }

    fn setup(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 1, 1)?;
        check_blob_count(&self.name, "top", top.len(), 1, 1)?;
        if ws.count(bottom[0]) != 1 {
            return Err(NetError::Configuration(format!(
                "Increment层`{}`的计数器须为标量",
                self.name
            )));
        }
        Ok(())
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        ws.reshape_like(top[0], bottom[0]);
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let value = ws.data(bottom[0]).as_slice()[0] + 1.0;
        ws.data_mut(top[0]).as_slice_mut()[0] = value;
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
