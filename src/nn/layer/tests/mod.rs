/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 层单元测试的公共工具：直接在Workspace上驱动单个层
 */

mod adversarial;
mod basic;
mod unroll;
mod vae;

use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::context::NetContext;
use crate::nn::descriptor::{LayerDescriptor, LayerKind, NetState, Phase};
use crate::nn::layer::{Layer, LayerEnum};
use crate::tensor::Tensor;

/// 分配一个带初值的blob
pub(super) fn blob(ws: &mut Workspace, data: &[f32], shape: &[usize]) -> BlobId {
    let id = ws.alloc(shape);
    ws.set_data(id, &Tensor::new(data, shape));
    id
}

/// 按类型标签构造层（训练阶段），bottom/top名仅用于描述
pub(super) fn make_layer(ctx: &NetContext, name: &str, kind: LayerKind, n_bottom: usize, n_top: usize) -> LayerEnum {
    let bottoms = (0..n_bottom).map(|i| format!("b{}", i)).collect::<Vec<_>>();
    let tops = (0..n_top).map(|i| format!("t{}", i)).collect::<Vec<_>>();
    let desc = LayerDescriptor::new(
        name,
        kind,
        &bottoms.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        &tops.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
    );
    LayerEnum::from_descriptor(&desc, ctx, &NetState::new(Phase::Train))
        .expect("层构造不应失败")
}

/// setup + reshape
pub(super) fn prepare(layer: &mut LayerEnum, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
    layer.setup(ws, bottom, top)?;
    layer.reshape(ws, bottom, top)
}

/// 分配n个空blob
pub(super) fn empties(ws: &mut Workspace, n: usize) -> Vec<BlobId> {
    (0..n).map(|_| ws.alloc_empty()).collect()
}

/// 以给定的bottom/top名构造层（组合层需要名字与子网描述对应）
pub(super) fn make_named(ctx: &NetContext, name: &str, kind: LayerKind, bottoms: &[&str], tops: &[&str]) -> LayerEnum {
    let desc = LayerDescriptor::new(name, kind, bottoms, tops);
    LayerEnum::from_descriptor(&desc, ctx, &NetState::new(Phase::Train))
        .expect("层构造不应失败")
}

/// 测试用临时文件路径（按进程区分）
pub(super) fn temp_path(file: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("subnet_torch_{}_{}", std::process::id(), file))
}
