/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 层（Layer）契约及按类型标签分派的层枚举
 *                 每个层都实现 setup / reshape / forward / backward，
 *                 并可报告自身参数、诊断用中间blob与所拥有的子网
 */

pub mod basic;
pub mod composite;
pub mod data;
pub mod misc;
pub mod reinforce;
pub mod stochastic;

use enum_dispatch::enum_dispatch;

pub use basic::{
    ConcatLayer, EltwiseLayer, EuclideanLossLayer, InnerProductLayer, InputLayer, PowerLayer,
    ReductionLayer, ReshapeLayer, SigmoidLayer, SplitLayer,
};
pub use composite::{
    AdversarialPhase, AdversarialSubnetPairLayer, SubnetLayer, UnrollLayer, VaeLayer,
};
pub use data::TwoInstanceEmbedDataLayer;
pub use misc::{GlimpseCroppingLayer, IncrementLayer, RandomLayer, ZeroLayer};
pub use reinforce::{ReinforcementScalefacLayer, RewardLayer};
pub use stochastic::{
    BernoulliLossLayer, BernoulliSampleLayer, GaussianLossLayer, GaussianSampleLayer,
    clip_gradients,
};

use super::blob::{BlobId, Workspace};
use super::context::NetContext;
use super::descriptor::{LayerDescriptor, LayerKind, NetState};
use super::net::Net;
use crate::errors::NetError;

#[cfg(test)]
mod tests;

/// 层对外公布的一个参数
#[derive(Debug, Clone, PartialEq)]
pub struct ParamBlob {
    /// 限定名（组合层会逐级加上前缀）；空串表示由网络按层名生成
    pub name: String,
    pub blob: BlobId,
    pub lr_mult: f32,
    pub decay_mult: f32,
}

impl ParamBlob {
    pub fn new(blob: BlobId) -> Self {
        Self {
            name: String::new(),
            blob,
            lr_mult: 1.0,
            decay_mult: 1.0,
        }
    }
}

#[enum_dispatch]
#[derive(Debug)]
pub enum LayerEnum {
    Input(InputLayer),
    InnerProduct(InnerProductLayer),
    Power(PowerLayer),
    Sigmoid(SigmoidLayer),
    Split(SplitLayer),
    Reshape(ReshapeLayer),
    Concat(ConcatLayer),
    Eltwise(EltwiseLayer),
    Reduction(ReductionLayer),
    EuclideanLoss(EuclideanLossLayer),
    BernoulliSample(BernoulliSampleLayer),
    BernoulliLoss(BernoulliLossLayer),
    GaussianSample(GaussianSampleLayer),
    GaussianLoss(GaussianLossLayer),
    Reward(RewardLayer),
    ReinforcementScalefac(ReinforcementScalefacLayer),
    GlimpseCropping(GlimpseCroppingLayer),
    Increment(IncrementLayer),
    Random(RandomLayer),
    Zero(ZeroLayer),
    TwoInstanceEmbedData(TwoInstanceEmbedDataLayer),
    Subnet(SubnetLayer),
    Unroll(UnrollLayer),
    AdversarialSubnetPair(AdversarialSubnetPairLayer),
    Vae(VaeLayer),
}

#[enum_dispatch(LayerEnum)]
pub trait Layer {
    fn layer_type(&self) -> &'static str;

    /// 一次性配置：检查bottom/top数目、分配参数与内部缓冲、构建子网
    fn setup(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId])
    -> Result<(), NetError>;

    /// 按当前bottom形状调整top（及内部缓冲）的形状
    fn reshape(
        &mut self,
        ws: &mut Workspace,
        bottom: &[BlobId],
        top: &[BlobId],
    ) -> Result<(), NetError>;

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId])
    -> Result<(), NetError>;

    /// 由top的梯度计算bottom的梯度（覆写）与参数梯度（累加）；
    /// 不可导的层直接返回
    fn backward(
        &mut self,
        ws: &mut Workspace,
        top: &[BlobId],
        propagate_down: &[bool],
        bottom: &[BlobId],
    ) -> Result<(), NetError>;

    /// 可学习参数
    fn params(&self) -> Vec<ParamBlob> {
        Vec::new()
    }

    /// 将第`index`个参数改为共享`blob`的存储
    fn share_param(&mut self, index: usize, _blob: BlobId) -> Result<(), NetError> {
        Err(NetError::Configuration(format!(
            "{}层不支持共享第{}个参数",
            self.layer_type(),
            index
        )))
    }

    /// 诊断用的中间blob（限定名, blob）
    fn intermediates(&self) -> Vec<(String, BlobId)> {
        Vec::new()
    }

    /// 本层直接拥有的子网
    fn subnets(&self) -> Vec<&Net> {
        Vec::new()
    }

    fn subnets_mut(&mut self) -> Vec<&mut Net> {
        Vec::new()
    }
}

impl LayerEnum {
    /// 按`type`标签构造层
    pub fn from_descriptor(
        desc: &LayerDescriptor,
        ctx: &NetContext,
        state: &NetState,
    ) -> Result<Self, NetError> {
        let layer: LayerEnum = match &desc.kind {
            LayerKind::Input(p) => InputLayer::new(desc, p.clone()).into(),
            LayerKind::InnerProduct(p) => InnerProductLayer::new(desc, p.clone(), ctx).into(),
            LayerKind::Power(p) => PowerLayer::new(desc, p.clone()).into(),
            LayerKind::Sigmoid => SigmoidLayer::new(desc).into(),
            LayerKind::Split => SplitLayer::new(desc).into(),
            LayerKind::Reshape(p) => ReshapeLayer::new(desc, p.clone()).into(),
            LayerKind::Concat(p) => ConcatLayer::new(desc, p.clone()).into(),
            LayerKind::Eltwise(p) => EltwiseLayer::new(desc, p.clone()).into(),
            LayerKind::Reduction(p) => ReductionLayer::new(desc, p.clone()).into(),
            LayerKind::EuclideanLoss => EuclideanLossLayer::new(desc).into(),
            LayerKind::BernoulliSample => BernoulliSampleLayer::new(desc, ctx).into(),
            LayerKind::BernoulliLoss(p) => BernoulliLossLayer::new(desc, p.clone()).into(),
            LayerKind::GaussianSample(p) => GaussianSampleLayer::new(desc, p.clone(), ctx).into(),
            LayerKind::GaussianLoss(p) => GaussianLossLayer::new(desc, p.clone()).into(),
            LayerKind::Reward(p) => RewardLayer::new(desc, p.clone()).into(),
            LayerKind::ReinforcementScalefac(p) => {
                ReinforcementScalefacLayer::new(desc, p.clone()).into()
            }
            LayerKind::GlimpseCropping(p) => GlimpseCroppingLayer::new(desc, p.clone()).into(),
            LayerKind::Increment => IncrementLayer::new(desc).into(),
            LayerKind::Random(p) => RandomLayer::new(desc, p.clone(), ctx).into(),
            LayerKind::Zero(p) => ZeroLayer::new(desc, p.clone()).into(),
            LayerKind::TwoInstanceEmbedData(p) => {
                TwoInstanceEmbedDataLayer::new(desc, p.clone(), ctx).into()
            }
            LayerKind::Subnet(p) => SubnetLayer::new(desc, p.clone(), ctx, state).into(),
            LayerKind::Unroll(p) => UnrollLayer::new(desc, p.clone(), ctx, state).into(),
            LayerKind::AdversarialSubnetPair(p) => {
                AdversarialSubnetPairLayer::new(desc, p.clone(), ctx, state).into()
            }
            LayerKind::Vae(p) => VaeLayer::new(desc, p.clone(), ctx, state).into(),
        };
        Ok(layer)
    }
}

/// 检查bottom/top数目是否落在[min, max]内
pub(crate) fn check_blob_count(
    layer_name: &str,
    what: &str,
    got: usize,
    min: usize,
    max: usize,
) -> Result<(), NetError> {
    if got < min || got > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{}到{}", min, max)
        };
        return Err(NetError::Configuration(format!(
            "层`{}`的{}数目应为{}，实际为{}",
            layer_name, what, expected, got
        )));
    }
    Ok(())
}
