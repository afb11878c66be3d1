/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 网络单元测试：构建、Split插入、参数共享、快照与别名
 */

mod params;
mod snapshot;

use crate::errors::NetError;
use crate::nn::blob::Workspace;
use crate::nn::context::NetContext;
use crate::nn::descriptor::{NetDescriptor, NetState, Phase};
use crate::nn::net::Net;

/// 由JSON描述以训练阶段构建网络
pub(super) fn build_net(json: &str, ws: &mut Workspace) -> Result<Net, NetError> {
    build_net_in(json, ws, Phase::Train)
}

pub(super) fn build_net_in(json: &str, ws: &mut Workspace, phase: Phase) -> Result<Net, NetError> {
    let desc = NetDescriptor::from_json(json).expect("测试用网络描述应合法");
    Net::new(&desc, ws, &NetContext::with_seed(7), NetState::new(phase))
}
