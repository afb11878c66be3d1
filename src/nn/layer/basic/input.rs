use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::{InputParam, LayerDescriptor};
use crate::nn::layer::{Layer, check_blob_count};

/// 输入适配层：只负责按配置的形状分配top，数值由外部写入
#[derive(Debug)]
pub struct InputLayer {
    name: String,
    param: InputParam,
}

impl InputLayer {
    pub fn new(desc: &LayerDescriptor, param: InputParam) -> Self {
        Self {
            name: desc.name.clone(),
            param,
        }
    }
}

impl Layer for InputLayer {
    fn layer_type(&self) -> &'static str {
        "Input"
    }

    fn setup(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 0, 0)?;
        let n = self.param.shape.len();
        if n != 0 && n != 1 && n != top.len() {
            return Err(NetError::Configuration(format!(
                "Input层`{}`须给出0个、1个或每个top一个形状，实际给了{}个",
                self.name, n
            )));
        }
        for (j, &t) in top.iter().enumerate() {
            if let Some(shape) = self.param.shape.get(if n == 1 { 0 } else { j }) {
                ws.reshape(t, shape);
            }
        }
        Ok(())
    }

    fn reshape(&mut self, _ws: &mut Workspace, _bottom: &[BlobId], _top: &[BlobId]) -> Result<(), NetError> {
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
