use approx::assert_abs_diff_eq;

use super::{blob, make_named, prepare};
use crate::assert_err;
use crate::errors::NetError;
use crate::nn::blob::Workspace;
use crate::nn::context::NetContext;
use crate::nn::descriptor::{LayerKind, UnrollParam};
use crate::nn::layer::{Layer, LayerEnum};
use crate::tensor::Tensor;

/// h_out = h_in + 1
const ADD_ONE_NET: &str = r#"{
    "name": "add_one",
    "layers": [
        {"name": "in", "type": "Input", "top": ["h_in"]},
        {"name": "step", "type": "Power", "bottom": ["h_in"], "top": ["h_out"], "shift": 1.0}
    ]
}"#;

/// h_out = h_in + x，x在每一步广播
const ACCUMULATE_NET: &str = r#"{
    "name": "accumulate",
    "layers": [
        {"name": "in", "type": "Input", "top": ["h_in", "x"]},
        {"name": "sum", "type": "Eltwise", "bottom": ["h_in", "x"], "top": ["h_out"], "operation": "SUM"}
    ]
}"#;

/// 除循环状态外再输出p = 2 * h_out
const PRODUCT_NET: &str = r#"{
    "name": "add_one_product",
    "layers": [
        {"name": "in", "type": "Input", "top": ["h_in"]},
        {"name": "step", "type": "Power", "bottom": ["h_in"], "top": ["h_out"], "shift": 1.0},
        {"name": "emit", "type": "Power", "bottom": ["h_out"], "top": ["p"], "scale": 2.0}
    ]
}"#;

/// y = W·x，W初值为2
const FC_NET: &str = r#"{
    "name": "fc1",
    "layers": [
        {"name": "in", "type": "Input", "top": ["x"]},
        {"name": "fc", "type": "InnerProduct", "bottom": ["x"], "top": ["y"],
         "num_output": 1, "bias_term": false,
         "weight_filler": {"type": "constant", "value": 2.0}}
    ]
}"#;

/// 每一步再嵌套一个子网：h_out = W·h_in
const NESTED_STEP_NET: &str = r#"{
    "name": "nested_step",
    "layers": [
        {"name": "in", "type": "Input", "top": ["h_in"]},
        {"name": "inner", "type": "Subnet", "bottom": ["h_in"], "top": ["h_out"], "net_file": "fc1"}
    ]
}"#;

fn context() -> NetContext {
    let ctx = NetContext::with_seed(3);
    ctx.descriptors().register_json("add_one", ADD_ONE_NET).unwrap();
    ctx.descriptors().register_json("accumulate", ACCUMULATE_NET).unwrap();
    ctx.descriptors().register_json("add_one_product", PRODUCT_NET).unwrap();
    ctx.descriptors().register_json("fc1", FC_NET).unwrap();
    ctx.descriptors().register_json("nested_step", NESTED_STEP_NET).unwrap();
    ctx
}

fn unroll_param(net_file: &str, num_timesteps: usize, recurrent: &[&str]) -> LayerKind {
    LayerKind::Unroll(UnrollParam {
        net_file: net_file.to_string(),
        num_timesteps,
        recurrent_input: recurrent.iter().map(|s| s.to_string()).collect(),
        force_test_phase: false,
        stage: None,
    })
}

// ==================== 前向 ====================

/// 测试输出沿末尾时间轴拼接，第t步的值为h0+t+1
#[test]
fn test_unroll_forward_concat() -> Result<(), NetError> {
    let ctx = context();
    let mut ws = Workspace::new();
    let h0 = blob(&mut ws, &[0.0, 10.0], &[2]);
    let seq = ws.alloc_empty();
    let mut layer = make_named(&ctx, "rnn", unroll_param("add_one", 3, &["h"]), &["h0"], &["h_seq"]);
    prepare(&mut layer, &mut ws, &[h0], &[seq])?;
    assert_eq!(ws.shape(seq), vec![2, 3]);

    layer.forward(&mut ws, &[h0], &[seq])?;
    assert_eq!(ws.data(seq).to_vec(), vec![1.0, 2.0, 3.0, 11.0, 12.0, 13.0]);

    let LayerEnum::Unroll(unroll) = &layer else { unreachable!() };
    assert_eq!(unroll.num_timesteps(), 3);
    assert!(layer.params().is_empty());
    let names = layer.intermediates().into_iter().map(|(n, _)| n).collect::<Vec<_>>();
    assert!(names.iter().any(|n| n.ends_with("::h_out::time_0")));
    assert!(names.iter().any(|n| n.ends_with("::h_out::time_2")));
    assert!(!names.iter().any(|n| n.ends_with("::time_3")));
    Ok(())
}

/// 测试每个时间步使用独立存储：重复前向结果不变
#[test]
fn test_unroll_repeated_forward() -> Result<(), NetError> {
    let ctx = context();
    let mut ws = Workspace::new();
    let h0 = blob(&mut ws, &[5.0], &[1]);
    let seq = ws.alloc_empty();
    let mut layer = make_named(&ctx, "rnn", unroll_param("add_one", 4, &["h"]), &["h0"], &["h_seq"]);
    prepare(&mut layer, &mut ws, &[h0], &[seq])?;
    layer.forward(&mut ws, &[h0], &[seq])?;
    layer.forward(&mut ws, &[h0], &[seq])?;
    assert_eq!(ws.data(seq).to_vec(), vec![6.0, 7.0, 8.0, 9.0]);
    Ok(())
}

// ==================== 反向 ====================

/// 测试沿时间反向传播：只在最后一步给梯度时初值梯度为1，每步都给1时为T
#[test]
fn test_unroll_backward_through_time() -> Result<(), NetError> {
    for steps in [1usize, 2, 5] {
        let ctx = context();
        let mut ws = Workspace::new();
        let h0 = blob(&mut ws, &[0.0, 10.0], &[2]);
        let seq = ws.alloc_empty();
        let mut layer = make_named(&ctx, "rnn", unroll_param("add_one", steps, &["h"]), &["h0"], &["h_seq"]);
        prepare(&mut layer, &mut ws, &[h0], &[seq])?;
        layer.forward(&mut ws, &[h0], &[seq])?;

        let mut last_only = vec![0.0; 2 * steps];
        last_only[steps - 1] = 1.0;
        last_only[2 * steps - 1] = 1.0;
        ws.set_diff(seq, &Tensor::new(&last_only, &[2, steps]));
        layer.backward(&mut ws, &[seq], &[true], &[h0])?;
        assert_eq!(ws.diff(h0).to_vec(), vec![1.0, 1.0]);

        layer.forward(&mut ws, &[h0], &[seq])?;
        ws.diff_mut(seq).fill(1.0);
        layer.backward(&mut ws, &[seq], &[true], &[h0])?;
        for &g in ws.diff(h0).as_slice() {
            assert_abs_diff_eq!(g, steps as f32, epsilon = 1e-6);
        }
    }
    Ok(())
}

/// 测试广播输入的梯度在各时间步间累加
#[test]
fn test_unroll_broadcast_gradient_accumulates() -> Result<(), NetError> {
    let ctx = context();
    let mut ws = Workspace::new();
    let h0 = blob(&mut ws, &[0.0], &[1]);
    let x = blob(&mut ws, &[1.0], &[1]);
    let seq = ws.alloc_empty();
    let mut layer = make_named(&ctx, "acc", unroll_param("accumulate", 3, &["h"]), &["h0", "x"], &["h_seq"]);
    prepare(&mut layer, &mut ws, &[h0, x], &[seq])?;
    layer.forward(&mut ws, &[h0, x], &[seq])?;
    assert_eq!(ws.data(seq).to_vec(), vec![1.0, 2.0, 3.0]);

    ws.diff_mut(seq).fill(1.0);
    layer.backward(&mut ws, &[seq], &[true, true], &[h0, x])?;
    assert_abs_diff_eq!(ws.diff(h0).as_slice()[0], 3.0, epsilon = 1e-6);
    assert_abs_diff_eq!(ws.diff(x).as_slice()[0], 6.0, epsilon = 1e-6);
    Ok(())
}

/// 测试非循环的产物输出：同样沿时间轴拼接，梯度经循环状态传回初值
#[test]
fn test_unroll_product_output() -> Result<(), NetError> {
    let ctx = context();
    let mut ws = Workspace::new();
    let h0 = blob(&mut ws, &[0.0], &[1]);
    let tops = [ws.alloc_empty(), ws.alloc_empty()];
    let kind = unroll_param("add_one_product", 3, &["h"]);
    let mut layer = make_named(&ctx, "rnn", kind, &["h0"], &["h_seq", "p"]);
    prepare(&mut layer, &mut ws, &[h0], &tops)?;
    assert_eq!(ws.shape(tops[1]), vec![1, 3]);

    layer.forward(&mut ws, &[h0], &tops)?;
    assert_eq!(ws.data(tops[0]).to_vec(), vec![1.0, 2.0, 3.0]);
    assert_eq!(ws.data(tops[1]).to_vec(), vec![2.0, 4.0, 6.0]);

    // 只在产物上给梯度：每步dp/dh0 = 2
    ws.diff_mut(tops[0]).fill(0.0);
    ws.diff_mut(tops[1]).fill(1.0);
    layer.backward(&mut ws, &tops, &[true], &[h0])?;
    assert_abs_diff_eq!(ws.diff(h0).as_slice()[0], 6.0, epsilon = 1e-6);
    Ok(())
}

/// 测试时间步内再嵌套子网：梯度与参数穿过两层嵌套，且只有一份共享参数
#[test]
fn test_unroll_nested_subnet() -> Result<(), NetError> {
    let ctx = context();
    let mut ws = Workspace::new();
    let h0 = blob(&mut ws, &[1.0], &[1, 1]);
    let seq = ws.alloc_empty();
    let mut layer = make_named(&ctx, "rnn", unroll_param("nested_step", 3, &["h"]), &["h0"], &["h_seq"]);
    prepare(&mut layer, &mut ws, &[h0], &[seq])?;

    let params = layer.params();
    assert_eq!(params.len(), 1);
    assert!(params[0].name.ends_with("fc::0"));
    let w = params[0].blob;
    ws.zero_diff(w);

    layer.forward(&mut ws, &[h0], &[seq])?;
    assert_eq!(ws.data(seq).to_vec(), vec![2.0, 4.0, 8.0]);

    // h_3 = W^3·h0：dh0 = W^3 = 8，dW = 3·W^2·h0 = 12
    ws.set_diff(seq, &Tensor::new(&[0.0, 0.0, 1.0], &[1, 1, 3]));
    layer.backward(&mut ws, &[seq], &[true], &[h0])?;
    assert_abs_diff_eq!(ws.diff(h0).as_slice()[0], 8.0, epsilon = 1e-5);
    assert_abs_diff_eq!(ws.diff(w).as_slice()[0], 12.0, epsilon = 1e-5);
    Ok(())
}

// ==================== 配置错误 ====================

#[test]
fn test_unroll_zero_timesteps() {
    let ctx = context();
    let mut ws = Workspace::new();
    let h0 = blob(&mut ws, &[0.0], &[1]);
    let seq = ws.alloc_empty();
    let mut layer = make_named(&ctx, "rnn", unroll_param("add_one", 0, &["h"]), &["h0"], &["h_seq"]);
    assert_err!(layer.setup(&mut ws, &[h0], &[seq]), NetError::Configuration(_));
}

/// 测试子网输入未以`<r>_in`开头时报配置错误
#[test]
fn test_unroll_recurrent_name_mismatch() {
    let ctx = context();
    let mut ws = Workspace::new();
    let h0 = blob(&mut ws, &[0.0], &[1]);
    let seq = ws.alloc_empty();
    let mut layer = make_named(&ctx, "rnn", unroll_param("add_one", 2, &["c"]), &["c0"], &["c_seq"]);
    assert_err!(
        layer.setup(&mut ws, &[h0], &[seq]),
        NetError::Configuration(msg) if msg.contains("c_in")
    );
}
