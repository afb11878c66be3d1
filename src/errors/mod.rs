/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 全库错误类型：张量层面的 TensorError，网络/层层面的 NetError
 */

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TensorError {
    #[error("轴{axis}超出张量维数{ndim}")]
    AxisOutOfRange { axis: usize, ndim: usize },
    #[error("张量列表为空")]
    EmptyList,
    #[error("张量形状不一致")]
    InconsitentShape,
    #[error("张量形状不兼容：{0:?}无法变为{1:?}")]
    IncompatibleShape(Vec<usize>, Vec<usize>),
    #[error("数据长度{data_len}与形状{shape:?}不符")]
    DataShapeMismatch { data_len: usize, shape: Vec<usize> },
}

/// 网络构建与执行期间的错误。
/// 所有错误均为致命错误：发生后对应操作立即失败，不重试，也不会留下半构建的对象
#[derive(Error, Debug)]
pub enum NetError {
    /// 网络描述有误或前后矛盾（首层类型不对、输入输出名不符、bottom/top数目不对、层参数非法等）
    #[error("配置错误：{0}")]
    Configuration(String),

    /// 声明的blob名在（子）网络中不存在
    #[error("名称解析失败：{context}中找不到blob`{name}`")]
    NameResolution { name: String, context: String },

    /// 形状不匹配
    #[error("形状不匹配：预期{expected:?}，实际{got:?}，{message}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
        message: String,
    },

    /// 在不允许的模式下调用了某操作（如VAE仅解码模式下反向传播）
    #[error("模式违例：{0}")]
    ModeViolation(String),

    /// 数据管线错误（预取线程已退出、数据源不可读等）
    #[error("数据错误：{0}")]
    Data(String),

    /// 文件读写错误
    #[error("IO错误：{0}")]
    Io(#[from] std::io::Error),

    /// 描述文件或参数快照的（反）序列化错误
    #[error("序列化错误：{0}")]
    Serialization(String),
}

impl From<serde_json::Error> for NetError {
    fn from(e: serde_json::Error) -> Self {
        NetError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for NetError {
    fn from(e: bincode::Error) -> Self {
        NetError::Serialization(e.to_string())
    }
}
