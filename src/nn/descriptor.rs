/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 网络描述符（Net Descriptor）
 *                 以JSON描述的有序层列表，既用于从文件加载网络，
 *                 也供组合层（子网、展开、对抗对、VAE）在代码中合成内部连线
 */

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::NetError;

mod params;
pub use params::*;

/// 网络的可序列化描述
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetDescriptor {
    /// 网络名称
    #[serde(default)]
    pub name: String,
    /// 按执行顺序排列的层
    #[serde(default)]
    pub layers: Vec<LayerDescriptor>,
}

/// 单个层的描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub name: String,
    #[serde(default)]
    pub bottom: Vec<String>,
    #[serde(default)]
    pub top: Vec<String>,
    /// 各top的损失权重；缺省时损失层的第一个top为1，其余为0
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loss_weight: Vec<f32>,
    /// 各参数blob的共享名与学习率/衰减倍率
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub param: Vec<ParamSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<NetStateRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<NetStateRule>,
    /// 层类型（`type`标签）及其专有参数
    #[serde(flatten)]
    pub kind: LayerKind,
    /// 插入Split前声明的bottom名，仅由网络构建时填写；为空表示与`bottom`相同
    #[serde(skip)]
    pub declared_bottom: Vec<String>,
}

/// 参数blob的共享与优化配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamSpec {
    /// 非空时，同名参数在网络内共享同一存储
    pub name: String,
    pub lr_mult: f32,
    pub decay_mult: f32,
}

impl Default for ParamSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            lr_mult: 1.0,
            decay_mult: 1.0,
        }
    }
}

/// 运行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Train,
    Test,
}

/// 网络状态：决定哪些层被纳入网络
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetState {
    pub phase: Phase,
    pub stages: Vec<String>,
}

impl NetState {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            stages: Vec::new(),
        }
    }

    pub fn with_stage(mut self, stage: &str) -> Self {
        self.stages.push(stage.to_string());
        self
    }
}

/// 层的纳入/排除规则
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetStateRule {
    pub phase: Option<Phase>,
    /// 须全部出现在网络状态中的stage
    pub stage: Vec<String>,
    /// 须全部不出现在网络状态中的stage
    pub not_stage: Vec<String>,
}

impl NetStateRule {
    pub fn matches(&self, state: &NetState) -> bool {
        if let Some(phase) = self.phase {
            if phase != state.phase {
                return false;
            }
        }
        self.stage.iter().all(|s| state.stages.contains(s))
            && !self.not_stage.iter().any(|s| state.stages.contains(s))
    }
}

impl LayerDescriptor {
    /// 以代码合成层描述（组合层内部连线用）
    pub fn new(name: &str, kind: LayerKind, bottom: &[&str], top: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            bottom: bottom.iter().map(|s| s.to_string()).collect(),
            top: top.iter().map(|s| s.to_string()).collect(),
            loss_weight: Vec::new(),
            param: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            kind,
            declared_bottom: Vec::new(),
        }
    }

    /// 描述中写明的bottom名（不受自动插入的Split改名影响）
    pub fn declared_bottom(&self) -> &[String] {
        if self.declared_bottom.is_empty() {
            &self.bottom
        } else {
            &self.declared_bottom
        }
    }

    pub fn with_loss_weight(mut self, weights: &[f32]) -> Self {
        self.loss_weight = weights.to_vec();
        self
    }

    /// 该层在给定网络状态下是否被纳入
    pub fn is_included(&self, state: &NetState) -> bool {
        if self.include.is_empty() {
            !self.exclude.iter().any(|r| r.matches(state))
        } else {
            self.include.iter().any(|r| r.matches(state))
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

impl NetDescriptor {
    pub fn new(name: &str, layers: Vec<LayerDescriptor>) -> Self {
        Self {
            name: name.to_string(),
            layers,
        }
    }

    /// 按网络状态过滤层
    pub fn filtered(&self, state: &NetState) -> Self {
        Self {
            name: self.name.clone(),
            layers: self
                .layers
                .iter()
                .filter(|l| l.is_included(state))
                .cloned()
                .collect(),
        }
    }

    /// 转换为 JSON 字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// 从 JSON 字符串解析
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// 从文件加载，读取或解析失败时报配置错误
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, NetError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            NetError::Configuration(format!("无法读取网络描述文件{}：{}", path.display(), e))
        })?;
        Self::from_json(&json).map_err(|e| {
            NetError::Configuration(format!("网络描述文件{}解析失败：{}", path.display(), e))
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), NetError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
