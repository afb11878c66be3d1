use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::{LayerDescriptor, RewardParam};
use crate::nn::layer::{Layer, check_blob_count};
use crate::tensor::Tensor;

/// 奖励层
///
/// bottom：预测(N·M, C, T)、标签(N, t)、奖励缓冲(N·M, …, T)、可选课程缓冲（与奖励同元素数）。
/// top：准确率[1]、与奖励缓冲同形的正确性图。
///
/// 每个时间步取预测的argmax与标签比较，正确记1否则记0。
/// 课程权重：同一序列中第一次出错之后再出错的步记0，其余记1。
/// 反向时把正确性图写入奖励缓冲的值与梯度，课程权重写入课程缓冲的梯度
#[derive(Debug)]
pub struct RewardLayer {
    name: String,
    per_target_rewards: bool,
    correct: Tensor,
    curriculum: Tensor,
}

impl RewardLayer {
    pub fn new(desc: &LayerDescriptor, param: RewardParam) -> Self {
        Self {
            name: desc.name.clone(),
            per_target_rewards: param.per_target_rewards,
            correct: Tensor::zeros(&[0]),
            curriculum: Tensor::zeros(&[0]),
        }
    }

    fn mismatch(&self, expected: Vec<usize>, got: Vec<usize>, message: &str) -> NetError {
        NetError::ShapeMismatch {
            expected,
            got,
            message: format!("Reward层`{}`：{}", self.name, message),
        }
    }
}

fn targets_of(label_shape: &[usize]) -> usize {
    label_shape.get(1).copied().unwrap_or(1)
}

impl Layer for RewardLayer {
    fn layer_type(&self) -> &'static str {
        "Reward"
    }

    fn setup(&mut self, _ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 3, 4)?;
        check_blob_count(&self.name, "top", top.len(), 2, 2)
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let pred = ws.shape(bottom[0]);
        let label = ws.shape(bottom[1]);
        let reward = ws.shape(bottom[2]);
        if pred.len() != 3 || label.is_empty() || label[0] == 0 || pred[0] % label[0] != 0 {
            return Err(self.mismatch(pred, label, "预测须为(N·M, C, T)且批大小能被标签批大小整除"));
        }
        let t = targets_of(&label);
        if t == 0 || pred[2] % t != 0 {
            return Err(self.mismatch(pred, label, "时间步数T须能被目标数t整除"));
        }
        if reward.first() != Some(&pred[0]) || reward.last() != Some(&pred[2]) {
            return Err(self.mismatch(pred, reward, "奖励缓冲须与预测有相同的批大小与时间步数"));
        }
        if ws.count(bottom[2]) != pred[0] * pred[2] {
            return Err(self.mismatch(vec![pred[0], pred[2]], reward, "奖励缓冲每项须恰有T个元素"));
        }
        if let Some(&c) = bottom.get(3) {
            if ws.count(c) != ws.count(bottom[2]) {
                return Err(self.mismatch(reward, ws.shape(c), "课程缓冲须与奖励缓冲元素数一致"));
            }
        }
        ws.reshape(top[0], &[1]);
        ws.reshape(top[1], &reward);
        self.correct = Tensor::zeros(&reward);
        self.curriculum = Tensor::zeros(&reward);
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let pred_shape = ws.shape(bottom[0]);
        let label_shape = ws.shape(bottom[1]);
        let n = label_shape[0];
        let (c, steps) = (pred_shape[1], pred_shape[2]);
        let m = pred_shape[0] / n;
        let t = targets_of(&label_shape);
        let per_target = steps / t;
        let pred = ws.data(bottom[0]).as_slice();
        let label = ws.data(bottom[1]).as_slice();
        let correct = self.correct.as_slice_mut();
        let curriculum = self.curriculum.as_slice_mut();

        let (mut total, mut total_correct) = (0.0_f32, 0.0_f32);
        for i in 0..n {
            for im in 0..m {
                let idx = im * n + i;
                let mut curriculum_ok = true;
                for target in 0..t {
                    for step in 0..per_target {
                        let time = if self.per_target_rewards {
                            target * per_target + per_target - 1
                        } else {
                            target * per_target + step
                        };
                        let argmax = (0..c)
                            .map(|j| pred[(idx * c + j) * steps + time])
                            .enumerate()
                            .fold((0, f32::NEG_INFINITY), |best, (j, v)| {
                                if v > best.1 { (j, v) } else { best }
                            })
                            .0;
                        let offset = idx * steps + time;
                        correct[offset] = 0.0;
                        curriculum[offset] = 1.0;
                        if argmax as f32 == label[i * t + target] {
                            correct[offset] = 1.0;
                            total_correct += 1.0;
                        } else {
                            if !curriculum_ok {
                                curriculum[offset] = 0.0;
                            }
                            if !self.per_target_rewards || step == per_target - 1 {
                                curriculum_ok = false;
                            }
                        }
                        total += 1.0;
                    }
                }
            }
        }

        let accuracy = if total > 0.0 { total_correct / total } else { 0.0 };
        ws.set_data(top[0], &Tensor::new(&[accuracy], &[1]));
        ws.set_data(top[1], &self.correct);
        ws.set_diff(top[1], &self.correct);
        Ok(())
    }

    fn backward(
        &mut self,
        ws: &mut Workspace,
        _top: &[BlobId],
        _propagate_down: &[bool],
        bottom: &[BlobId],
    ) -> Result<(), NetError> {
        ws.set_diff(bottom[2], &self.correct);
        ws.set_data(bottom[2], &self.correct);
        if let Some(&c) = bottom.get(3) {
            ws.set_diff(c, &self.curriculum);
        }
        Ok(())
    }
}
