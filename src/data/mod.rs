//! 数据加载模块
//!
//! 为数据层提供记录库与后台预取。
//!
//! # 主要组件
//!
//! - [`Datum`] / [`DatumDb`]: 带标签的8位图像记录及其bincode文件
//! - [`Cursor`]: 循环遍历记录库的游标
//! - [`BlockingQueue`]: 阻塞队列（crossbeam-channel）
//! - [`Prefetcher`]: 后台预取线程
//! - [`DataError`]: 数据加载错误类型

mod datum;
pub mod error;
mod queue;

#[cfg(test)]
mod tests;

pub use datum::{Cursor, Datum, DatumDb, PIXEL_SCALE};
pub use error::DataError;
pub use queue::{BlockingQueue, PREFETCH_COUNT, Prefetcher};
