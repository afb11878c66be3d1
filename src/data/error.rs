//! 数据加载错误类型定义

use std::path::PathBuf;
use thiserror::Error;

use crate::errors::NetError;

/// 数据加载相关错误
#[derive(Debug, Error)]
pub enum DataError {
    /// 文件未找到
    #[error("文件未找到: {0}")]
    FileNotFound(PathBuf),

    /// IO 错误
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 格式错误（无法解码、记录与声明的尺寸不符等）
    #[error("格式错误: {0}")]
    FormatError(String),

    /// 数据库中没有任何记录
    #[error("数据库为空: {0}")]
    EmptyDatabase(PathBuf),

    /// 队列的生产者已退出，再也等不到数据
    #[error("{0}")]
    QueueClosed(String),
}

impl From<bincode::Error> for DataError {
    fn from(e: bincode::Error) -> Self {
        DataError::FormatError(e.to_string())
    }
}

impl From<DataError> for NetError {
    fn from(e: DataError) -> Self {
        NetError::Data(e.to_string())
    }
}
