/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 强化学习（REINFORCE）相关层：按预测正确与否给出奖励，
 *                 并以(奖励 - 基线)缩放回传的梯度
 */

mod reinforcement_scalefac;
mod reward;

pub use reinforcement_scalefac::ReinforcementScalefacLayer;
pub use reward::RewardLayer;
