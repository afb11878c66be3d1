use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::LayerDescriptor;
use crate::nn::layer::{Layer, check_blob_count};

/// 分流层：把一个blob复制给多个读取者，反向时把各读取者的梯度求和
#[derive(Debug)]
pub struct SplitLayer {
    name: String,
}

impl SplitLayer {
    pub fn new(desc: &LayerDescriptor) -> Self {
        Self {
            name: desc.name.clone(),
        }
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Layer for SplitLayer {
    fn layer_type(&self) -> &'static str {
        "Split"
    }

    fn setup(&mut self, _ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 1, 1)?;
        check_blob_count(&self.name, "top", top.len(), 1, usize::MAX)
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        for &t in top {
            ws.reshape_like(t, bottom[0]);
        }
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        for &t in top {
            ws.copy_data(bottom[0], t);
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
        let mut sum = ws.diff(top[0]).clone();
        for &t in &top[1..] {
            sum.axpy(1.0, ws.diff(t));
        }
        ws.set_diff(bottom[0], &sum);
        Ok(())
    }
}
