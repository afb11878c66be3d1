//! # Subnet Torch
//!
//! `subnet_torch`是一个层式（Caffe风格）的训练框架，重点在于“把整张网络当作一个层”：
//! 子网层（Subnet）、时间展开层（Unroll）、对抗训练对（AdversarialSubnetPair）与
//! 变分自编码器层（VAE）都在内部嵌入并驱动完整的子网，且可任意嵌套。
//!
//! 所有blob存放在同一个[`nn::blob::Workspace`]中，以索引句柄访问；
//! 子网通过别名与整表重绑定共享或切换存储。
//!

pub mod data;
pub mod errors;
pub mod nn;
pub mod tensor;
pub mod utils;
