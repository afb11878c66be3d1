/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 集成测试公共工具：读取tests/nets下的网络描述、简单的SGD更新
 */
#![allow(dead_code)]

use std::path::PathBuf;

use subnet_torch::errors::NetError;
use subnet_torch::nn::{Net, NetContext, NetDescriptor, Workspace};

pub fn net_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("nets")
        .join(format!("{}.json", name))
}

pub fn load_desc(name: &str) -> Result<NetDescriptor, NetError> {
    NetDescriptor::load(net_path(name))
}

/// 固定种子的上下文，并按名登记各子网描述
pub fn context_with(subnets: &[&str]) -> Result<NetContext, NetError> {
    let ctx = NetContext::with_seed(42);
    for &name in subnets {
        ctx.descriptors().register(name, load_desc(name)?);
    }
    Ok(ctx)
}

/// 对所有可学习参数做一步`w -= lr * dw`，然后清零梯度
pub fn sgd_step(net: &Net, ws: &mut Workspace, lr: f32) {
    for p in net.learnable_params() {
        let grad = ws.diff(p.blob).clone();
        ws.data_mut(p.blob).axpy(-lr, &grad);
    }
    net.clear_param_diffs(ws);
}

pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("subnet_torch_it_{}_{}", std::process::id(), name))
}
