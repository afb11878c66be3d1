use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::{LayerDescriptor, ScalefacParam};
use crate::nn::layer::{Layer, check_blob_count};

/// 前向原样复制输入；反向时
/// `dx = λ · curriculum · (R - baseline) · dy`，
/// 其中奖励R与课程权重分别取自top[1]与top[2]的梯度（由下游的Reward层写入）
#[derive(Debug)]
pub struct ReinforcementScalefacLayer {
    name: String,
    lambda: f32,
}

impl ReinforcementScalefacLayer {
    pub fn new(desc: &LayerDescriptor, param: ScalefacParam) -> Self {
        Self {
            name: desc.name.clone(),
            lambda: param.lambda,
        }
    }
}

impl Layer for ReinforcementScalefacLayer {
    fn layer_type(&self) -> &'static str {
        "ReinforcementScalefac"
    }

    fn setup(&mut self, _ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 2, 2)?;
        check_blob_count(&self.name, "top", top.len(), 2, 3)
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let (input, baseline) = (ws.shape(bottom[0]), ws.shape(bottom[1]));
        if input.first() != baseline.first() || baseline.first().copied() != Some(ws.count(bottom[1])) {
            return Err(NetError::ShapeMismatch {
                expected: input.first().map(|&n| vec![n]).unwrap_or_default(),
                got: baseline,
                message: format!("ReinforcementScalefac层`{}`的基线须为(N)", self.name),
            });
        }
        ws.reshape_like(top[0], bottom[0]);
        for &t in &top[1..] {
            ws.reshape_like(t, bottom[1]);
        }
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        ws.copy_data(bottom[0], top[0]);
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
        let shape = ws.shape(bottom[0]);
        let n = shape.first().copied().unwrap_or(0);
        let per_item = shape.iter().skip(1).product::<usize>();
        let reward = ws.diff(top[1]).to_vec();
        let curriculum = top.get(2).map(|&t| ws.diff(t).to_vec());
        let baseline = ws.data(bottom[1]).to_vec();
        let mut grad = ws.diff(top[0]).reshape(&shape);
        for (item, chunk) in grad.as_slice_mut().chunks_mut(per_item.max(1)).enumerate().take(n) {
            let weight = curriculum.as_ref().map_or(1.0, |c| c[item]);
            let factor = self.lambda * weight * (reward[item] - baseline[item]);
            chunk.iter_mut().for_each(|g| *g *= factor);
        }
        ws.set_diff(bottom[0], &grad);
        Ok(())
    }
}
