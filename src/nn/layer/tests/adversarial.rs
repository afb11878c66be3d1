use super::{blob, make_named, prepare};
use crate::assert_err;
use crate::errors::NetError;
use crate::nn::blob::Workspace;
use crate::nn::context::NetContext;
use crate::nn::descriptor::{AdversarialPairParam, LayerKind};
use crate::nn::layer::{AdversarialPhase, Layer, LayerEnum};

/// 生成器：gen = z·[1, 1]ᵀ
const GENERATOR_NET: &str = r#"{
    "name": "generator",
    "layers": [
        {"name": "in", "type": "Input", "top": ["z"]},
        {"name": "fc1", "type": "InnerProduct", "bottom": ["z"], "top": ["gen"],
         "num_output": 1, "bias_term": false,
         "weight_filler": {"type": "constant", "value": 1.0}}
    ]
}"#;

/// 判别器：loss = 2·gen
const DISCRIMINATOR_NET: &str = r#"{
    "name": "discriminator",
    "layers": [
        {"name": "in", "type": "Input", "top": ["gen"]},
        {"name": "fc2", "type": "InnerProduct", "bottom": ["gen"], "top": ["loss"],
         "num_output": 1, "bias_term": false,
         "weight_filler": {"type": "constant", "value": 2.0}}
    ]
}"#;

/// 带真实数据标签的判别器：loss = 2·gen + label
const LABELED_DISCRIMINATOR_NET: &str = r#"{
    "name": "labeled_discriminator",
    "layers": [
        {"name": "in", "type": "Input", "top": ["gen", "adv_is_real_data"]},
        {"name": "fc2", "type": "InnerProduct", "bottom": ["gen"], "top": ["score"],
         "num_output": 1, "bias_term": false,
         "weight_filler": {"type": "constant", "value": 2.0}},
        {"name": "plus_label", "type": "Eltwise", "bottom": ["score", "adv_is_real_data"],
         "top": ["loss"], "operation": "SUM"}
    ]
}"#;

fn context() -> NetContext {
    let ctx = NetContext::with_seed(5);
    ctx.descriptors().register_json("generator", GENERATOR_NET).unwrap();
    ctx.descriptors().register_json("discriminator", DISCRIMINATOR_NET).unwrap();
    ctx.descriptors().register_json("labeled_discriminator", LABELED_DISCRIMINATOR_NET).unwrap();
    ctx
}

fn pair_param(subnet2: &str, k: usize, external_data: bool) -> LayerKind {
    LayerKind::AdversarialSubnetPair(AdversarialPairParam {
        subnet1: "generator".to_string(),
        subnet2: subnet2.to_string(),
        subnet2_k: k,
        reverse_subnet1_gradient: true,
        external_data,
    })
}

fn phase_of(layer: &LayerEnum) -> AdversarialPhase {
    match layer {
        LayerEnum::AdversarialSubnetPair(pair) => pair.phase(),
        _ => unreachable!(),
    }
}

// ==================== 阶段交替 ====================

/// 测试阶段按K次训练subnet1、1次训练subnet2交替，且各阶段参数梯度符合预期
#[test]
fn test_adversarial_phase_schedule() -> Result<(), NetError> {
    let ctx = context();
    let mut ws = Workspace::new();
    let z = blob(&mut ws, &[1.0, 2.0], &[1, 2]);
    let tops = [ws.alloc_empty(), ws.alloc_empty(), ws.alloc_empty()];
    let mut layer = make_named(
        &ctx,
        "adv",
        pair_param("discriminator", 3, false),
        &["z"],
        &["gen", "score_fake", "score_real"],
    );
    prepare(&mut layer, &mut ws, &[z], &tops)?;
    assert_eq!(ws.shape(tops[0]), vec![1, 1]);
    assert_eq!(ws.shape(tops[2]), ws.shape(tops[1]));

    let params = layer.params();
    assert_eq!(params.len(), 2);
    assert!(params[0].name.starts_with("adv::subnet1::"));
    assert!(params[1].name.starts_with("adv::subnet2::"));
    let (w1, w2) = (params[0].blob, params[1].blob);

    let mut phases = Vec::new();
    for _ in 0..8 {
        ws.zero_diff(w1);
        ws.zero_diff(w2);
        let phase = phase_of(&layer);
        phases.push(phase);

        // 外层损失权重作用于生成数据的得分
        ws.diff_mut(tops[1]).fill(1.0);
        layer.forward(&mut ws, &[z], &tops)?;
        assert_eq!(ws.data(tops[0]).to_vec(), vec![3.0]);
        assert_eq!(ws.data(tops[1]).to_vec(), vec![6.0]);
        match phase {
            AdversarialPhase::TrainSubnet1 => {
                assert_eq!(ws.diff(w2).to_vec(), vec![0.0]);
                assert_eq!(ws.diff(w1).to_vec(), vec![2.0, 4.0]);
            }
            AdversarialPhase::TrainSubnet2 => {
                assert_eq!(ws.diff(w2).to_vec(), vec![3.0]);
                assert_eq!(ws.diff(w1).to_vec(), vec![0.0, 0.0]);
            }
        }

        layer.backward(&mut ws, &tops, &[true], &[z])?;
        if phase == AdversarialPhase::TrainSubnet1 {
            assert_eq!(ws.diff(w1).to_vec(), vec![-2.0, -4.0]);
        }
    }
    use AdversarialPhase::{TrainSubnet1 as G, TrainSubnet2 as D};
    assert_eq!(phases, vec![G, G, G, D, G, G, G, D]);
    Ok(())
}

/// 测试没有外部数据时真实数据得分每次前向都被置0
#[test]
fn test_adversarial_real_score_zero_without_external_data() -> Result<(), NetError> {
    let ctx = context();
    let mut ws = Workspace::new();
    let z = blob(&mut ws, &[1.0, 2.0], &[1, 2]);
    let tops = [ws.alloc_empty(), ws.alloc_empty(), ws.alloc_empty()];
    let mut layer = make_named(
        &ctx,
        "adv",
        pair_param("discriminator", 1, false),
        &["z"],
        &["gen", "score_fake", "score_real"],
    );
    prepare(&mut layer, &mut ws, &[z], &tops)?;
    for _ in 0..2 {
        ws.data_mut(tops[2]).fill(7.0);
        layer.forward(&mut ws, &[z], &tops)?;
        assert_eq!(ws.data(tops[1]).to_vec(), vec![6.0]);
        assert_eq!(ws.data(tops[2]).to_vec(), vec![0.0]);
        layer.backward(&mut ws, &tops, &[true], &[z])?;
    }
    Ok(())
}

/// 测试外部数据模式：判别器在真实数据上再跑一遍，梯度与生成数据上的累加
#[test]
fn test_adversarial_external_data() -> Result<(), NetError> {
    let ctx = context();
    let mut ws = Workspace::new();
    let z = blob(&mut ws, &[1.0, 2.0], &[1, 2]);
    let real = blob(&mut ws, &[5.0], &[1, 1]);
    let tops = [ws.alloc_empty(), ws.alloc_empty(), ws.alloc_empty()];
    let mut layer = make_named(
        &ctx,
        "adv",
        pair_param("labeled_discriminator", 1, true),
        &["z", "real"],
        &["gen", "score_fake", "score_real"],
    );
    prepare(&mut layer, &mut ws, &[z, real], &tops)?;
    let w2 = layer.params()[1].blob;

    // 第一轮训练生成器
    ws.diff_mut(tops[1]).fill(1.0);
    layer.forward(&mut ws, &[z, real], &tops)?;
    assert_eq!(ws.data(tops[1]).to_vec(), vec![6.0]);
    layer.backward(&mut ws, &tops, &[true, true], &[z, real])?;
    assert_eq!(phase_of(&layer), AdversarialPhase::TrainSubnet2);

    // 第二轮训练判别器：生成数据的标签为0，真实数据的标签为1
    ws.zero_diff(w2);
    ws.diff_mut(tops[1]).fill(1.0);
    ws.diff_mut(tops[2]).fill(1.0);
    layer.forward(&mut ws, &[z, real], &tops)?;
    assert_eq!(ws.data(tops[1]).to_vec(), vec![6.0]);
    assert_eq!(ws.data(tops[2]).to_vec(), vec![11.0]);
    assert_eq!(ws.diff(w2).to_vec(), vec![8.0]);
    Ok(())
}

// ==================== 配置错误 ====================

#[test]
fn test_adversarial_too_few_tops() {
    let ctx = context();
    let mut ws = Workspace::new();
    let z = blob(&mut ws, &[1.0, 2.0], &[1, 2]);
    let score = ws.alloc_empty();
    let mut layer = make_named(&ctx, "adv", pair_param("discriminator", 1, false), &["z"], &["score"]);
    assert_err!(layer.setup(&mut ws, &[z], &[score]), NetError::Configuration(_));
}

/// 测试外部数据模式下缺少真实数据输入
#[test]
fn test_adversarial_missing_real_data() {
    let ctx = context();
    let mut ws = Workspace::new();
    let z = blob(&mut ws, &[1.0, 2.0], &[1, 2]);
    let tops = [ws.alloc_empty(), ws.alloc_empty(), ws.alloc_empty()];
    let mut layer = make_named(
        &ctx,
        "adv",
        pair_param("labeled_discriminator", 1, true),
        &["z"],
        &["gen", "score_fake", "score_real"],
    );
    assert_err!(layer.setup(&mut ws, &[z], &tops), NetError::Configuration(_));
}

/// 测试条件输入与真实数据的批大小不一致
#[test]
fn test_adversarial_batch_mismatch() {
    let ctx = context();
    let mut ws = Workspace::new();
    let z = blob(&mut ws, &[1.0, 2.0], &[1, 2]);
    let real = blob(&mut ws, &[5.0, 6.0], &[2, 1]);
    let tops = [ws.alloc_empty(), ws.alloc_empty(), ws.alloc_empty()];
    let mut layer = make_named(
        &ctx,
        "adv",
        pair_param("labeled_discriminator", 1, true),
        &["z", "real"],
        &["gen", "score_fake", "score_real"],
    );
    assert_err!(layer.setup(&mut ws, &[z, real], &tops), NetError::ShapeMismatch { .. });
}
