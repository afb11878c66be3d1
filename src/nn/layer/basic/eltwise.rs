use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::{EltwiseOp, EltwiseParam, LayerDescriptor};
use crate::nn::layer::{Layer, check_blob_count};

/// 逐元素组合多个同形状bottom：加权求和或连乘
#[derive(Debug)]
pub struct EltwiseLayer {
    name: String,
    param: EltwiseParam,
}

impl EltwiseLayer {
    pub fn new(desc: &LayerDescriptor, param: EltwiseParam) -> Self {
        Self {
            name: desc.name.clone(),
            param,
        }
    }

    /// 加权求和（组合层内部使用）
    pub fn weighted_sum(name: &str, coeff: Vec<f32>) -> Self {
        Self {
            name: name.to_string(),
            param: EltwiseParam {
                operation: EltwiseOp::Sum,
                coeff,
            },
        }
    }

    fn coeff(&self, i: usize) -> f32 {
        self.param.coeff.get(i).copied().unwrap_or(1.0)
    }
}

impl Layer for EltwiseLayer {
    fn layer_type(&self) -> &'static str {
        "Eltwise"
    }

    fn setup(&mut self, _ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 2, usize::MAX)?;
        check_blob_count(&self.name, "top", top.len(), 1, 1)?;
        let n = self.param.coeff.len();
        if n != 0 && (self.param.operation != EltwiseOp::Sum || n != bottom.len()) {
            return Err(NetError::Configuration(format!(
                "Eltwise层`{}`仅SUM支持系数，且系数须与bottom一一对应",
                self.name
            )));
        }
        Ok(())
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let shape = ws.shape(bottom[0]);
        for &b in &bottom[1..] {
            let other = ws.shape(b);
            if other != shape {
                return Err(NetError::ShapeMismatch {
                    expected: shape,
                    got: other,
                    message: format!("Eltwise层`{}`的输入形状须一致", self.name),
                });
            }
        }
        ws.reshape(top[0], &shape);
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let mut out = ws.data(bottom[0]).clone();
        match self.param.operation {
            EltwiseOp::Sum => {
                out.scale(self.coeff(0));
                for (i, &b) in bottom.iter().enumerate().skip(1) {
                    out.axpy(self.coeff(i), ws.data(b));
                }
            }
            EltwiseOp::Prod => {
                for &b in &bottom[1..] {
                    for (o, v) in out.as_slice_mut().iter_mut().zip(ws.data(b).as_slice()) {
                        *o *= v;
                    }
                }
            }
        }
        ws.set_data(top[0], &out);
        Ok(())
    }

    fn backward(
        &mut self,
        ws: &mut Workspace,
        top: &[BlobId],
        propagate_down: &[bool],
        bottom: &[BlobId],
    ) -> Result<(), NetError> {
        let top_diff = ws.diff(top[0]).clone();
        for (i, &b) in bottom.iter().enumerate() {
            if !propagate_down[i] {
                continue;
            }
            let mut grad = top_diff.clone();
            match self.param.operation {
                EltwiseOp::Sum => grad.scale(self.coeff(i)),
                EltwiseOp::Prod => {
                    for (j, &other) in bottom.iter().enumerate() {
                        if j == i {
                            continue;
                        }
                        for (g, v) in grad.as_slice_mut().iter_mut().zip(ws.data(other).as_slice()) {
                            *g *= v;
                        }
                    }
                }
            }
            ws.set_diff(b, &grad);
        }
        Ok(())
    }
}
