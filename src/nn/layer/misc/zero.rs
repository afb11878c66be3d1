use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::{LayerDescriptor, ZeroParam};
use crate::nn::layer::{Layer, check_blob_count};

/// 固定形状的全零输出（例如循环状态的初值）
#[derive(Debug)]
pub struct ZeroLayer {
    name: String,
    shape: Vec<usize>,
}

impl ZeroLayer {
    pub fn new(desc: &LayerDescriptor, param: ZeroParam) -> Self {
        Self {
            name: desc.name.clone(),
            shape: param.shape,
        }
    }
}

impl Layer for ZeroLayer {
    fn layer_type(&self) -> &'static str {
        "Zero"
    }

    fn setup(&mut self, _ws: &mut Workspace, _bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "top", top.len(), 1, 1)?;
        if self.shape.is_empty() {
            return Err(NetError::Configuration(format!("Zero层`{}`须给出输出形状", self.name)));
        }
        Ok(())
    }

    fn reshape(&mut self, ws: &mut Workspace, _bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        ws.reshape(top[0], &self.shape);
        ws.zero_data(top[0]);
        Ok(())
    }

    fn forward(&mut self, _ws: &mut Workspace, _bottom: &[BlobId], _top: &[BlobId]) -> Result<(), NetError> {
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
