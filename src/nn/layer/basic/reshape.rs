use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::{LayerDescriptor, ReshapeParam};
use crate::nn::layer::{Layer, check_blob_count};

/// 变形层：数据不变，只改形状。目标维度为0时沿用输入对应维度，为-1时自动推断
#[derive(Debug)]
pub struct ReshapeLayer {
    name: String,
    param: ReshapeParam,
}

impl ReshapeLayer {
    pub fn new(desc: &LayerDescriptor, param: ReshapeParam) -> Self {
        Self {
            name: desc.name.clone(),
            param,
        }
    }

    /// 直接以目标形状构造（组合层内部使用）
    pub fn with_shape(name: &str, shape: Vec<i64>) -> Self {
        Self {
            name: name.to_string(),
            param: ReshapeParam { shape },
        }
    }

    fn target_shape(&self, input: &[usize]) -> Result<Vec<usize>, NetError> {
        let mut shape = Vec::with_capacity(self.param.shape.len());
        let mut infer = None;
        for (i, &d) in self.param.shape.iter().enumerate() {
            match d {
                0 => shape.push(*input.get(i).ok_or_else(|| {
                    NetError::Configuration(format!(
                        "Reshape层`{}`第{}维为0，但输入只有{}维",
                        self.name,
                        i,
                        input.len()
                    ))
                })?),
                -1 if infer.is_none() => {
                    infer = Some(i);
                    shape.push(1);
                }
                d if d > 0 => shape.push(d as usize),
                _ => {
                    return Err(NetError::Configuration(format!(
                        "Reshape层`{}`的目标形状{:?}非法",
                        self.name, self.param.shape
                    )));
                }
            }
        }
        let total: usize = input.iter().product();
        let known: usize = shape.iter().product();
        if let Some(i) = infer {
            if known == 0 || total % known != 0 {
                return Err(NetError::ShapeMismatch {
                    expected: shape,
                    got: input.to_vec(),
                    message: format!("Reshape层`{}`无法推断第{}维", self.name, i),
                });
            }
            shape[i] = total / known;
        } else if known != total {
            return Err(NetError::ShapeMismatch {
                expected: shape,
                got: input.to_vec(),
                message: format!("Reshape层`{}`元素个数不一致", self.name),
            });
        }
        Ok(shape)
    }
}

impl Layer for ReshapeLayer {
    fn layer_type(&self) -> &'static str {
        "Reshape"
    }

    fn setup(&mut self, _ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 1, 1)?;
        check_blob_count(&self.name, "top", top.len(), 1, 1)
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let shape = self.target_shape(&ws.shape(bottom[0]))?;
        ws.reshape(top[0], &shape);
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let value = ws.data(bottom[0]).reshape(&ws.shape(top[0]));
        ws.set_data(top[0], &value);
        Ok(())
    }

    fn backward(
        &mut self,
        ws: &mut Workspace,
        top: &[BlobId],
        propagate_down: &[bool],
        bottom: &[BlobId],
    ) -> Result<(), NetError> {
        if propagate_down[0] {
            let grad = ws.diff(top[0]).reshape(&ws.shape(bottom[0]));
            ws.set_diff(bottom[0], &grad);
        }
        Ok(())
    }
}
