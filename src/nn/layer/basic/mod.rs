/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 子网描述中常用的基础层
 */

mod concat;
mod eltwise;
mod euclidean_loss;
mod inner_product;
mod input;
mod power;
mod reduction;
mod reshape;
mod sigmoid;
mod split;

pub use concat::ConcatLayer;
pub use eltwise::EltwiseLayer;
pub use euclidean_loss::EuclideanLossLayer;
pub use inner_product::InnerProductLayer;
pub use input::InputLayer;
pub use power::PowerLayer;
pub use reduction::ReductionLayer;
pub use reshape::ReshapeLayer;
pub use sigmoid::SigmoidLayer;
pub use split::SplitLayer;
