use approx::assert_abs_diff_eq;

use super::{blob, empties, make_layer, prepare};
use crate::assert_err;
use crate::errors::NetError;
use crate::nn::blob::Workspace;
use crate::nn::context::NetContext;
use crate::nn::descriptor::{
    ConcatParam, EltwiseOp, EltwiseParam, Filler, InnerProductParam, InputParam, LayerKind,
    PowerParam, ReductionOp, ReductionParam, ReshapeParam,
};
use crate::nn::layer::Layer;

// ==================== Input / Reshape / Split ====================

/// 测试 Input 层按参数设定top形状
#[test]
fn test_input_shapes() -> Result<(), NetError> {
    let ctx = NetContext::with_seed(1);
    let mut ws = Workspace::new();
    let tops = empties(&mut ws, 2);
    let mut layer = make_layer(
        &ctx,
        "data",
        LayerKind::Input(InputParam { shape: vec![vec![2, 3], vec![4]] }),
        0,
        2,
    );
    prepare(&mut layer, &mut ws, &[], &tops)?;
    assert_eq!(ws.shape(tops[0]), vec![2, 3]);
    assert_eq!(ws.shape(tops[1]), vec![4]);
    Ok(())
}

/// 测试 Reshape 的0与-1
#[test]
fn test_reshape_copy_and_infer() -> Result<(), NetError> {
    let ctx = NetContext::with_seed(1);
    let mut ws = Workspace::new();
    let x = blob(&mut ws, &[1., 2., 3., 4., 5., 6.], &[2, 3]);
    let y = ws.alloc_empty();
    let mut layer = make_layer(&ctx, "r", LayerKind::Reshape(ReshapeParam { shape: vec![0, -1, 1] }), 1, 1);
    prepare(&mut layer, &mut ws, &[x], &[y])?;
    assert_eq!(ws.shape(y), vec![2, 3, 1]);
    layer.forward(&mut ws, &[x], &[y])?;
    assert_eq!(ws.data(y).to_vec(), vec![1., 2., 3., 4., 5., 6.]);

    let mut bad = make_layer(&ctx, "bad", LayerKind::Reshape(ReshapeParam { shape: vec![4] }), 1, 1);
    assert_err!(prepare(&mut bad, &mut ws, &[x], &[y]), NetError::ShapeMismatch { .. });
    Ok(())
}

/// 测试 Split 反向时对各路梯度求和
#[test]
fn test_split_sums_gradients() -> Result<(), NetError> {
    let ctx = NetContext::with_seed(1);
    let mut ws = Workspace::new();
    let x = blob(&mut ws, &[1., 2.], &[2]);
    let tops = empties(&mut ws, 3);
    let mut layer = make_layer(&ctx, "s", LayerKind::Split, 1, 3);
    prepare(&mut layer, &mut ws, &[x], &tops)?;
    layer.forward(&mut ws, &[x], &tops)?;
    for (k, &t) in tops.iter().enumerate() {
        assert_eq!(ws.data(t).to_vec(), vec![1., 2.]);
        ws.diff_mut(t).fill(k as f32 + 1.0);
    }
    layer.backward(&mut ws, &tops, &[true], &[x])?;
    assert_eq!(ws.diff(x).to_vec(), vec![6., 6.]);
    Ok(())
}

// ==================== 运算层 ====================

/// 测试 InnerProduct 前向与反向
#[test]
fn test_inner_product_forward_backward() -> Result<(), NetError> {
    let ctx = NetContext::with_seed(1);
    let mut ws = Workspace::new();
    let x = blob(&mut ws, &[1., 2., 3., 4.], &[2, 2]);
    let y = ws.alloc_empty();
    let param = InnerProductParam {
        num_output: 1,
        bias_term: true,
        axis: 1,
        weight_filler: Filler::Constant { value: 0.5 },
        bias_filler: Filler::Constant { value: 1.0 },
    };
    let mut layer = make_layer(&ctx, "fc", LayerKind::InnerProduct(param), 1, 1);
    prepare(&mut layer, &mut ws, &[x], &[y])?;
    assert_eq!(ws.shape(y), vec![2, 1]);
    assert_eq!(layer.params().len(), 2);

    layer.forward(&mut ws, &[x], &[y])?;
    assert_abs_diff_eq!(ws.data(y).as_slice(), &[2.5f32, 4.5][..], epsilon = 1e-6);

    ws.diff_mut(y).fill(1.0);
    layer.backward(&mut ws, &[y], &[true], &[x])?;
    assert_abs_diff_eq!(ws.diff(x).as_slice(), &[0.5f32, 0.5, 0.5, 0.5][..], epsilon = 1e-6);
    let params = layer.params();
    // dW = Σ dy·x，db = Σ dy
    assert_abs_diff_eq!(ws.diff(params[0].blob).as_slice(), &[4.0f32, 6.0][..], epsilon = 1e-6);
    assert_abs_diff_eq!(ws.diff(params[1].blob).as_slice(), &[2.0f32][..], epsilon = 1e-6);
    Ok(())
}

/// 测试 Power：y = (shift + scale·x)^power
#[test]
fn test_power() -> Result<(), NetError> {
    let ctx = NetContext::with_seed(1);
    let mut ws = Workspace::new();
    let x = blob(&mut ws, &[1., 2.], &[2]);
    let y = ws.alloc_empty();
    let param = PowerParam { power: 2.0, scale: 2.0, shift: 1.0 };
    let mut layer = make_layer(&ctx, "p", LayerKind::Power(param), 1, 1);
    prepare(&mut layer, &mut ws, &[x], &[y])?;
    layer.forward(&mut ws, &[x], &[y])?;
    assert_abs_diff_eq!(ws.data(y).as_slice(), &[9.0f32, 25.0][..], epsilon = 1e-5);
    ws.diff_mut(y).fill(1.0);
    layer.backward(&mut ws, &[y], &[true], &[x])?;
    // dy/dx = power·scale·(shift + scale·x)^(power-1)
    assert_abs_diff_eq!(ws.diff(x).as_slice(), &[12.0f32, 20.0][..], epsilon = 1e-4);
    Ok(())
}

/// 测试 Sigmoid 前向与反向
#[test]
fn test_sigmoid() -> Result<(), NetError> {
    let ctx = NetContext::with_seed(1);
    let mut ws = Workspace::new();
    let x = blob(&mut ws, &[0.0], &[1]);
    let y = ws.alloc_empty();
    let mut layer = make_layer(&ctx, "sig", LayerKind::Sigmoid, 1, 1);
    prepare(&mut layer, &mut ws, &[x], &[y])?;
    layer.forward(&mut ws, &[x], &[y])?;
    assert_abs_diff_eq!(ws.data(y).as_slice()[0], 0.5, epsilon = 1e-6);
    ws.diff_mut(y).fill(1.0);
    layer.backward(&mut ws, &[y], &[true], &[x])?;
    assert_abs_diff_eq!(ws.diff(x).as_slice()[0], 0.25, epsilon = 1e-6);
    Ok(())
}

/// 测试 Concat 沿末轴拼接及反向拆分
#[test]
fn test_concat_last_axis() -> Result<(), NetError> {
    let ctx = NetContext::with_seed(1);
    let mut ws = Workspace::new();
    let a = blob(&mut ws, &[1., 2.], &[2, 1]);
    let b = blob(&mut ws, &[3., 4.], &[2, 1]);
    let y = ws.alloc_empty();
    let mut layer = make_layer(&ctx, "c", LayerKind::Concat(ConcatParam { axis: 1 }), 2, 1);
    prepare(&mut layer, &mut ws, &[a, b], &[y])?;
    assert_eq!(ws.shape(y), vec![2, 2]);
    layer.forward(&mut ws, &[a, b], &[y])?;
    assert_eq!(ws.data(y).to_vec(), vec![1., 3., 2., 4.]);

    ws.set_diff(y, &crate::tensor::Tensor::new(&[10., 30., 20., 40.], &[2, 2]));
    layer.backward(&mut ws, &[y], &[true, true], &[a, b])?;
    assert_eq!(ws.diff(a).to_vec(), vec![10., 20.]);
    assert_eq!(ws.diff(b).to_vec(), vec![30., 40.]);
    Ok(())
}

/// 测试 Eltwise 加权求和与系数数目校验
#[test]
fn test_eltwise_weighted_sum() -> Result<(), NetError> {
    let ctx = NetContext::with_seed(1);
    let mut ws = Workspace::new();
    let a = blob(&mut ws, &[3.0], &[1]);
    let b = blob(&mut ws, &[5.0], &[1]);
    let y = ws.alloc_empty();
    let param = EltwiseParam { operation: EltwiseOp::Sum, coeff: vec![0.1, 1.0] };
    let mut layer = make_layer(&ctx, "e", LayerKind::Eltwise(param), 2, 1);
    prepare(&mut layer, &mut ws, &[a, b], &[y])?;
    layer.forward(&mut ws, &[a, b], &[y])?;
    assert_abs_diff_eq!(ws.data(y).as_slice()[0], 5.3, epsilon = 1e-6);

    ws.diff_mut(y).fill(2.0);
    layer.backward(&mut ws, &[y], &[true, true], &[a, b])?;
    assert_abs_diff_eq!(ws.diff(a).as_slice()[0], 0.2, epsilon = 1e-6);
    assert_abs_diff_eq!(ws.diff(b).as_slice()[0], 2.0, epsilon = 1e-6);

    let bad = EltwiseParam { operation: EltwiseOp::Prod, coeff: vec![1.0, 1.0] };
    let mut layer = make_layer(&ctx, "bad", LayerKind::Eltwise(bad), 2, 1);
    assert_err!(layer.setup(&mut ws, &[a, b], &[y]), NetError::Configuration(_));
    Ok(())
}

/// 测试 Reduction：axis之后的维度被归约
#[test]
fn test_reduction() -> Result<(), NetError> {
    let ctx = NetContext::with_seed(1);
    let mut ws = Workspace::new();
    let x = blob(&mut ws, &[1., -2., 3., -4.], &[2, 2]);
    let y = ws.alloc_empty();
    let param = ReductionParam { operation: ReductionOp::Asum, axis: 1, coeff: 2.0 };
    let mut layer = make_layer(&ctx, "red", LayerKind::Reduction(param), 1, 1);
    prepare(&mut layer, &mut ws, &[x], &[y])?;
    assert_eq!(ws.shape(y), vec![2]);
    layer.forward(&mut ws, &[x], &[y])?;
    assert_eq!(ws.data(y).to_vec(), vec![6., 14.]);
    ws.diff_mut(y).fill(1.0);
    layer.backward(&mut ws, &[y], &[true], &[x])?;
    assert_eq!(ws.diff(x).to_vec(), vec![2., -2., 2., -2.]);

    // axis为0时归约为标量
    let mut layer = make_layer(&ctx, "sum", LayerKind::Reduction(ReductionParam::default()), 1, 1);
    prepare(&mut layer, &mut ws, &[x], &[y])?;
    assert_eq!(ws.count(y), 1);
    layer.forward(&mut ws, &[x], &[y])?;
    assert_abs_diff_eq!(ws.data(y).sum(), -2.0, epsilon = 1e-6);
    Ok(())
}

/// 测试 EuclideanLoss = Σ(a-b)²/(2N)
#[test]
fn test_euclidean_loss() -> Result<(), NetError> {
    let ctx = NetContext::with_seed(1);
    let mut ws = Workspace::new();
    let a = blob(&mut ws, &[1., 2., 3., 4.], &[2, 2]);
    let b = blob(&mut ws, &[0., 2., 3., 2.], &[2, 2]);
    let y = ws.alloc_empty();
    let mut layer = make_layer(&ctx, "loss", LayerKind::EuclideanLoss, 2, 1);
    prepare(&mut layer, &mut ws, &[a, b], &[y])?;
    layer.forward(&mut ws, &[a, b], &[y])?;
    assert_abs_diff_eq!(ws.data(y).as_slice()[0], 1.25, epsilon = 1e-6);
    ws.diff_mut(y).fill(1.0);
    layer.backward(&mut ws, &[y], &[true, true], &[a, b])?;
    assert_abs_diff_eq!(ws.diff(a).as_slice(), &[0.5f32, 0.0, 0.0, 1.0][..], epsilon = 1e-6);
    assert_abs_diff_eq!(ws.diff(b).as_slice(), &[-0.5f32, 0.0, 0.0, -1.0][..], epsilon = 1e-6);
    Ok(())
}
