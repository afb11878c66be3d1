use approx::assert_abs_diff_eq;

use super::{blob, empties, make_named, prepare};
use crate::assert_err;
use crate::errors::NetError;
use crate::nn::blob::Workspace;
use crate::nn::context::NetContext;
use crate::nn::descriptor::{LayerKind, VaeParam};
use crate::nn::layer::{Layer, LayerEnum};

/// 编码器：loss = ΣX，sample = X + 1
const ENCODER_NET: &str = r#"{
    "name": "encoder",
    "layers": [
        {"name": "in", "type": "Input", "top": ["X"]},
        {"name": "kl", "type": "Reduction", "bottom": ["X"], "top": ["loss"]},
        {"name": "shift", "type": "Power", "bottom": ["X"], "top": ["sample"], "shift": 1.0}
    ]
}"#;

/// 解码器：loss = Σlatent
const DECODER_NET: &str = r#"{
    "name": "decoder",
    "layers": [
        {"name": "in", "type": "Input", "top": ["latent", "X"]},
        {"name": "nll", "type": "Reduction", "bottom": ["latent"], "top": ["loss"]}
    ]
}"#;

fn context() -> NetContext {
    let ctx = NetContext::with_seed(9);
    ctx.descriptors().register_json("encoder", ENCODER_NET).unwrap();
    ctx.descriptors().register_json("decoder", DECODER_NET).unwrap();
    ctx
}

fn vae_param(decoder_only: bool) -> LayerKind {
    LayerKind::Vae(VaeParam {
        encoder: "encoder".to_string(),
        decoder: "decoder".to_string(),
        encoder_loss_weight: 0.1,
        decoder_only,
    })
}

// ==================== 编码-解码 ====================

/// 测试总损失为编码器损失加权与解码器损失之和，隐变量采样原样输出
#[test]
fn test_vae_forward() -> Result<(), NetError> {
    let ctx = context();
    let mut ws = Workspace::new();
    let x = blob(&mut ws, &[1.0, 2.0], &[2]);
    let tops = empties(&mut ws, 2);
    let mut layer = make_named(&ctx, "vae", vae_param(false), &["X"], &["loss", "latent"]);
    prepare(&mut layer, &mut ws, &[x], &tops)?;
    assert_eq!(ws.shape(tops[1]), vec![2]);

    layer.forward(&mut ws, &[x], &tops)?;
    assert_abs_diff_eq!(ws.data(tops[0]).sum(), 5.3, epsilon = 1e-5);
    assert_eq!(ws.data(tops[1]).to_vec(), vec![2.0, 3.0]);

    let LayerEnum::Vae(vae) = &layer else { unreachable!() };
    assert!(!vae.is_decoder_only());
    assert!(vae.encoder()?.net()?.layer_names().iter().any(|n| n == "vae_encoder::kl"));
    assert!(vae.decoder()?.net()?.layer_names().iter().any(|n| n == "vae_decoder::nll"));
    assert_eq!(layer.subnets().len(), 2);
    Ok(())
}

/// 测试X的梯度为编码器与解码器两路之和
#[test]
fn test_vae_backward() -> Result<(), NetError> {
    let ctx = context();
    let mut ws = Workspace::new();
    let x = blob(&mut ws, &[1.0, 2.0], &[2]);
    let tops = empties(&mut ws, 2);
    let mut layer = make_named(&ctx, "vae", vae_param(false), &["X"], &["loss", "latent"]);
    prepare(&mut layer, &mut ws, &[x], &tops)?;
    layer.forward(&mut ws, &[x], &tops)?;

    ws.diff_mut(tops[0]).fill(1.0);
    ws.zero_diff(tops[1]);
    layer.backward(&mut ws, &tops, &[true], &[x])?;
    for &g in ws.diff(x).as_slice() {
        assert_abs_diff_eq!(g, 1.1, epsilon = 1e-5);
    }

    // 隐变量输出上的外层梯度同样流回X
    layer.forward(&mut ws, &[x], &tops)?;
    ws.zero_diff(tops[0]);
    ws.diff_mut(tops[1]).fill(2.0);
    layer.backward(&mut ws, &tops, &[true], &[x])?;
    for &g in ws.diff(x).as_slice() {
        assert_abs_diff_eq!(g, 2.0, epsilon = 1e-5);
    }
    Ok(())
}

// ==================== 仅解码 ====================

/// 测试仅解码模式：隐变量直接取bottom，编码器损失记为0，反向报错
#[test]
fn test_vae_decoder_only() -> Result<(), NetError> {
    let ctx = context();
    let mut ws = Workspace::new();
    let latent = blob(&mut ws, &[2.0, 3.0], &[2]);
    let x = blob(&mut ws, &[1.0, 2.0], &[2]);
    let tops = empties(&mut ws, 2);
    let mut layer = make_named(&ctx, "vae", vae_param(true), &["latent", "X"], &["loss", "latent_out"]);
    prepare(&mut layer, &mut ws, &[latent, x], &tops)?;

    layer.forward(&mut ws, &[latent, x], &tops)?;
    assert_abs_diff_eq!(ws.data(tops[0]).sum(), 5.0, epsilon = 1e-5);
    assert_eq!(ws.data(tops[1]).to_vec(), vec![2.0, 3.0]);

    ws.diff_mut(tops[0]).fill(1.0);
    assert_err!(
        layer.backward(&mut ws, &tops, &[true, true], &[latent, x]),
        NetError::ModeViolation(_)
    );
    Ok(())
}

/// 测试bottom数目与模式不符
#[test]
fn test_vae_bottom_count() {
    let ctx = context();
    let mut ws = Workspace::new();
    let x = blob(&mut ws, &[1.0, 2.0], &[2]);
    let tops = empties(&mut ws, 2);
    let mut layer = make_named(&ctx, "vae", vae_param(true), &["X"], &["loss", "latent"]);
    assert_err!(layer.setup(&mut ws, &[x], &tops), NetError::Configuration(_));
}
