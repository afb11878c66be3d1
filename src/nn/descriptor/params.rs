/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 各层类型的专有参数；JSON中与层公共字段平铺在同一对象里，由`type`标签区分
 */

use serde::{Deserialize, Serialize};

/// 层类型描述（包含类型特定参数）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerKind {
    // 基础层
    Input(InputParam),
    InnerProduct(InnerProductParam),
    Power(PowerParam),
    Sigmoid,
    Split,
    Reshape(ReshapeParam),
    Concat(ConcatParam),
    Eltwise(EltwiseParam),
    Reduction(ReductionParam),
    EuclideanLoss,
    // 采样与似然损失
    BernoulliSample,
    BernoulliLoss(ClipParam),
    GaussianSample(GaussianSampleParam),
    GaussianLoss(ClipParam),
    // 强化学习
    Reward(RewardParam),
    ReinforcementScalefac(ScalefacParam),
    // 杂项
    GlimpseCropping(GlimpseCroppingParam),
    Increment,
    Random(RandomParam),
    Zero(ZeroParam),
    TwoInstanceEmbedData(TwoInstanceEmbedDataParam),
    // 组合层
    Subnet(SubnetParam),
    Unroll(UnrollParam),
    AdversarialSubnetPair(AdversarialPairParam),
    #[serde(rename = "VAE")]
    Vae(VaeParam),
}

impl LayerKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            LayerKind::Input(_) => "Input",
            LayerKind::InnerProduct(_) => "InnerProduct",
            LayerKind::Power(_) => "Power",
            LayerKind::Sigmoid => "Sigmoid",
            LayerKind::Split => "Split",
            LayerKind::Reshape(_) => "Reshape",
            LayerKind::Concat(_) => "Concat",
            LayerKind::Eltwise(_) => "Eltwise",
            LayerKind::Reduction(_) => "Reduction",
            LayerKind::EuclideanLoss => "EuclideanLoss",
            LayerKind::BernoulliSample => "BernoulliSample",
            LayerKind::BernoulliLoss(_) => "BernoulliLoss",
            LayerKind::GaussianSample(_) => "GaussianSample",
            LayerKind::GaussianLoss(_) => "GaussianLoss",
            LayerKind::Reward(_) => "Reward",
            LayerKind::ReinforcementScalefac(_) => "ReinforcementScalefac",
            LayerKind::GlimpseCropping(_) => "GlimpseCropping",
            LayerKind::Increment => "Increment",
            LayerKind::Random(_) => "Random",
            LayerKind::Zero(_) => "Zero",
            LayerKind::TwoInstanceEmbedData(_) => "TwoInstanceEmbedData",
            LayerKind::Subnet(_) => "Subnet",
            LayerKind::Unroll(_) => "Unroll",
            LayerKind::AdversarialSubnetPair(_) => "AdversarialSubnetPair",
            LayerKind::Vae(_) => "VAE",
        }
    }

    /// 损失层的第一个top默认带权重1
    pub fn is_loss(&self) -> bool {
        matches!(
            self,
            LayerKind::EuclideanLoss | LayerKind::BernoulliLoss(_) | LayerKind::GaussianLoss(_)
        )
    }
}

fn one() -> f32 {
    1.0
}

fn one_usize() -> usize {
    1
}

fn yes() -> bool {
    true
}

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓基础层↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputParam {
    /// 为空、只有一个（所有top共用）或每个top一个
    pub shape: Vec<Vec<usize>>,
}

/// 参数初始化方式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filler {
    Constant {
        #[serde(default)]
        value: f32,
    },
    Uniform {
        min: f32,
        max: f32,
    },
    Gaussian {
        #[serde(default)]
        mean: f32,
        std: f32,
    },
}

impl Default for Filler {
    fn default() -> Self {
        Filler::Constant { value: 0.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerProductParam {
    pub num_output: usize,
    #[serde(default = "yes")]
    pub bias_term: bool,
    #[serde(default = "one_usize")]
    pub axis: usize,
    #[serde(default)]
    pub weight_filler: Filler,
    #[serde(default)]
    pub bias_filler: Filler,
}

/// y = (shift + scale * x) ^ power
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerParam {
    pub power: f32,
    pub scale: f32,
    pub shift: f32,
}

impl Default for PowerParam {
    fn default() -> Self {
        Self {
            power: 1.0,
            scale: 1.0,
            shift: 0.0,
        }
    }
}

/// 目标形状：0表示沿用输入对应维度，-1表示由其余维度推断
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReshapeParam {
    pub shape: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcatParam {
    pub axis: usize,
}

impl Default for ConcatParam {
    fn default() -> Self {
        Self { axis: 1 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EltwiseOp {
    Prod,
    #[default]
    Sum,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EltwiseParam {
    pub operation: EltwiseOp,
    /// 仅SUM使用；为空时全为1
    pub coeff: Vec<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReductionOp {
    #[default]
    Sum,
    Asum,
    Sumsq,
    Mean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionParam {
    pub operation: ReductionOp,
    /// 从该轴（含）起的所有维度被归约
    pub axis: usize,
    pub coeff: f32,
}

impl Default for ReductionParam {
    fn default() -> Self {
        Self {
            operation: ReductionOp::Sum,
            axis: 0,
            coeff: 1.0,
        }
    }
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑基础层↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓采样、损失与强化学习↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
/// 梯度裁剪：`cliplimit > 0`且本次最大梯度绝对值超过它时，整体等比缩放
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipParam {
    pub cliplimit: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussianSampleParam {
    /// 未提供sigma输入时使用的固定标准差
    pub sigma: f32,
    pub cliplimit: f32,
}

impl Default for GaussianSampleParam {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            cliplimit: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardParam {
    pub per_target_rewards: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalefacParam {
    pub lambda: f32,
}

impl Default for ScalefacParam {
    fn default() -> Self {
        Self { lambda: 1.0 }
    }
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑采样、损失与强化学习↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓杂项与数据↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlimpseCroppingParam {
    /// 方形窗口边长
    pub window: usize,
    /// 是否追加一组2倍降采样的通道
    #[serde(default)]
    pub do_downsamp: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomParam {
    pub shape: Vec<usize>,
    #[serde(default)]
    pub range_min: f32,
    #[serde(default = "one")]
    pub range_max: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroParam {
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoInstanceEmbedDataParam {
    /// DatumDb文件路径
    pub source: String,
    pub batch_size: usize,
    #[serde(default = "default_canvas")]
    pub canvas_size: usize,
    /// 同一批数据重复输出的次数（0表示每次取新批）
    #[serde(default)]
    pub repeat_inputs: usize,
}

fn default_canvas() -> usize {
    100
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑杂项与数据↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓组合层↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
/// 子网前向的执行条件
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardMode {
    #[default]
    Always,
    OnlyIfCounterZero,
    OnlyIfCounterNonzero,
    Never,
}

/// 子网反向的执行条件；最后两种总会执行反向，之后按计数器条件清零本层参数梯度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackwardMode {
    #[default]
    Always,
    OnlyIfCounterZero,
    OnlyIfCounterNonzero,
    Never,
    ZeroParamDiffsIfCounterNonzero,
    ZeroParamDiffsIfCounterZero,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetParam {
    /// 子网描述的路径或已登记的资源名
    pub net_file: String,
    /// 每个bottom是否以别名方式共享（为空表示全不共享）
    #[serde(default)]
    pub shared_inputs: Vec<bool>,
    /// 阶段计数器键，小于0表示不计数
    #[serde(default = "no_counter")]
    pub phase_counter_index: i32,
    /// 计数器达到此值即归零
    #[serde(default)]
    pub phase_counter_reset: i32,
    /// 在前向（而非反向）时推进计数器
    #[serde(default)]
    pub increment_on_forward: bool,
    #[serde(default)]
    pub forward_mode: ForwardMode,
    #[serde(default)]
    pub backward_mode: BackwardMode,
    /// 预训练参数快照路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretrained_constants: Option<String>,
    /// 快照中以此前缀开头的层名会去掉该前缀
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_pretrained_constants_prefix: Option<String>,
    #[serde(default)]
    pub force_test_phase: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default)]
    pub debug_info: bool,
}

fn no_counter() -> i32 {
    -1
}

impl SubnetParam {
    pub fn new(net_file: &str) -> Self {
        Self {
            net_file: net_file.to_string(),
            shared_inputs: Vec::new(),
            phase_counter_index: -1,
            phase_counter_reset: 0,
            increment_on_forward: false,
            forward_mode: ForwardMode::Always,
            backward_mode: BackwardMode::Always,
            pretrained_constants: None,
            strip_pretrained_constants_prefix: None,
            force_test_phase: false,
            stage: None,
            debug_info: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnrollParam {
    pub net_file: String,
    pub num_timesteps: usize,
    /// 循环状态名r：子网以`r_in`为输入、`r_out`为输出
    #[serde(default)]
    pub recurrent_input: Vec<String>,
    #[serde(default)]
    pub force_test_phase: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdversarialPairParam {
    /// 生成器子网描述
    pub subnet1: String,
    /// 判别器子网描述
    pub subnet2: String,
    /// 每训练subnet1这么多次后训练subnet2一次
    #[serde(default = "one_usize")]
    pub subnet2_k: usize,
    /// 训练subnet1时将其参数梯度取反
    #[serde(default = "yes")]
    pub reverse_subnet1_gradient: bool,
    /// 是否另有外部真实数据输入
    #[serde(default)]
    pub external_data: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaeParam {
    pub encoder: String,
    pub decoder: String,
    #[serde(default = "one")]
    pub encoder_loss_weight: f32,
    #[serde(default)]
    pub decoder_only: bool,
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑组合层↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/
