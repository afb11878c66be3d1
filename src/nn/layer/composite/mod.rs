/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 组合层：在一个层内嵌入完整的子网
 *                 （通用子网、时间展开、对抗训练对、变分自编码器）
 */

mod adversarial;
mod subnet;
mod unroll;
mod vae;

pub use adversarial::{AdversarialPhase, AdversarialSubnetPairLayer};
pub use subnet::SubnetLayer;
pub use unroll::UnrollLayer;
pub use vae::VaeLayer;

use crate::nn::descriptor::{NetState, Phase};

/// 子网的网络状态：强制测试阶段时用Test，否则沿用外层阶段；再追加可选的stage
pub(crate) fn subnet_state(outer: &NetState, force_test_phase: bool, stage: Option<&str>) -> NetState {
    let mut state = outer.clone();
    if force_test_phase {
        state.phase = Phase::Test;
    }
    if let Some(stage) = stage.filter(|s| !s.is_empty()) {
        state = state.with_stage(stage);
    }
    state
}
