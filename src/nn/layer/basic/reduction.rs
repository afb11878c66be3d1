use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::{LayerDescriptor, ReductionOp, ReductionParam};
use crate::nn::layer::{Layer, check_blob_count};
use crate::tensor::Tensor;

/// 把第`axis`维（含）之后的所有维度归约为一个数，结果乘以`coeff`
#[derive(Debug)]
pub struct ReductionLayer {
    name: String,
    param: ReductionParam,
    num: usize,
    dim: usize,
}

impl ReductionLayer {
    pub fn new(desc: &LayerDescriptor, param: ReductionParam) -> Self {
        Self {
            name: desc.name.clone(),
            param,
            num: 0,
            dim: 0,
        }
    }
}

impl Layer for ReductionLayer {
    fn layer_type(&self) -> &'static str {
        "Reduction"
    }

    fn setup(&mut self, _ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 1, 1)?;
        check_blob_count(&self.name, "top", top.len(), 1, 1)
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let shape = ws.shape(bottom[0]);
        let axis = self.param.axis;
        if axis > shape.len() {
            return Err(NetError::Configuration(format!(
                "Reduction层`{}`的axis={}超出输入维数{}",
                self.name,
                axis,
                shape.len()
            )));
        }
        self.num = shape[..axis].iter().product();
        self.dim = shape[axis..].iter().product();
        ws.reshape(top[0], &shape[..axis]);
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let x = ws.data(bottom[0]).as_slice();
        let coeff = self.param.coeff;
        let out = (0..self.num)
            .map(|i| {
                let row = &x[i * self.dim..(i + 1) * self.dim];
                let v: f32 = match self.param.operation {
                    ReductionOp::Sum => row.iter().sum(),
                    ReductionOp::Asum => row.iter().map(|v| v.abs()).sum(),
                    ReductionOp::Sumsq => row.iter().map(|v| v * v).sum(),
                    ReductionOp::Mean => row.iter().sum::<f32>() / self.dim.max(1) as f32,
                };
                v * coeff
            })
            .collect::<Vec<_>>();
        let shape = ws.shape(top[0]);
        ws.set_data(top[0], &Tensor::new(&out, &shape));
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
        let coeff = self.param.coeff;
        let dy = ws.diff(top[0]).to_vec();
        let mut dx = ws.data(bottom[0]).clone();
        for (i, row) in dx.as_slice_mut().chunks_mut(self.dim.max(1)).enumerate() {
            let g = dy.get(i).copied().unwrap_or(0.0) * coeff;
            for v in row.iter_mut() {
                *v = match self.param.operation {
                    ReductionOp::Sum => g,
                    ReductionOp::Asum if *v > 0.0 => g,
                    ReductionOp::Asum if *v < 0.0 => -g,
                    ReductionOp::Asum => 0.0,
                    ReductionOp::Sumsq => g * 2.0 * *v,
                    ReductionOp::Mean => g / self.dim as f32,
                };
            }
        }
        ws.set_diff(bottom[0], &dx);
        Ok(())
    }
}
