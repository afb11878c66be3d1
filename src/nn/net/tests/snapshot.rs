use super::build_net;
use crate::assert_err;
use crate::errors::NetError;
use crate::nn::blob::Workspace;
use crate::nn::snapshot::ParamSnapshot;
use crate::tensor::Tensor;

const FC_NET: &str = r#"{
    "name": "fc_net",
    "layers": [
        {"name": "in", "type": "Input", "top": ["x"], "shape": [[1, 2]]},
        {"name": "fc", "type": "InnerProduct", "bottom": ["x"], "top": ["y"],
         "num_output": 1,
         "weight_filler": {"type": "constant", "value": 1.0}}
    ]
}"#;

// ==================== 快照 ====================

/// 测试快照只含有参数的层，写盘读回后可载入另一个网络
#[test]
fn test_snapshot_round_trip() -> Result<(), NetError> {
    let mut ws = Workspace::new();
    let trained = build_net(FC_NET, &mut ws)?;
    let (w, b) = (trained.params()[0].blob, trained.params()[1].blob);
    ws.set_data(w, &Tensor::new(&[0.5, -1.5], &[1, 2]));
    ws.set_data(b, &Tensor::new(&[4.0], &[1]));

    let snapshot = trained.snapshot(&ws);
    assert_eq!(snapshot.layers.len(), 1);
    assert_eq!(snapshot.layers[0].name, "fc");
    assert!(snapshot.layer("in").is_none());

    let path = std::env::temp_dir().join(format!("subnet_torch_{}_net_snapshot.bin", std::process::id()));
    snapshot.save(&path)?;
    let loaded = ParamSnapshot::load(&path)?;
    std::fs::remove_file(&path).ok();

    let fresh = build_net(FC_NET, &mut ws)?;
    fresh.copy_trained_layers_from(&mut ws, &loaded)?;
    assert_eq!(ws.data(fresh.params()[0].blob).to_vec(), vec![0.5, -1.5]);
    assert_eq!(ws.data(fresh.params()[1].blob).to_vec(), vec![4.0]);
    Ok(())
}

/// 测试快照中网络没有的层被跳过
#[test]
fn test_copy_skips_unknown_layers() -> Result<(), NetError> {
    let mut ws = Workspace::new();
    let net = build_net(FC_NET, &mut ws)?;
    let mut snapshot = ParamSnapshot::new();
    snapshot.push("elsewhere", vec![Tensor::zeros(&[3])]);
    net.copy_trained_layers_from(&mut ws, &snapshot)?;
    assert_eq!(ws.data(net.params()[0].blob).to_vec(), vec![1.0, 1.0]);
    Ok(())
}

/// 测试参数个数或形状不符
#[test]
fn test_copy_mismatches() -> Result<(), NetError> {
    let mut ws = Workspace::new();
    let net = build_net(FC_NET, &mut ws)?;

    let mut too_few = ParamSnapshot::new();
    too_few.push("fc", vec![Tensor::zeros(&[1, 2])]);
    assert_err!(net.copy_trained_layers_from(&mut ws, &too_few), NetError::Configuration(_));

    let mut wrong_shape = ParamSnapshot::new();
    wrong_shape.push("fc", vec![Tensor::zeros(&[2, 1]), Tensor::zeros(&[1])]);
    assert_err!(
        net.copy_trained_layers_from(&mut ws, &wrong_shape),
        NetError::ShapeMismatch { expected, got, .. } if expected == &vec![1, 2] && got == &vec![2, 1]
    );
    Ok(())
}

/// 测试组合层载入时的改名：给定前缀只改写以之开头的条目，否则一律加上限定前缀
#[test]
fn test_rebased_names() {
    let mut snapshot = ParamSnapshot::new();
    snapshot.push("model::sub::fc", vec![]);
    snapshot.push("other::fc", vec![]);
    let stripped = snapshot.clone().rebased(Some("model::"), "sub");
    let names = stripped.layers.iter().map(|l| l.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, ["sub::fc", "other::fc"]);

    let qualified = snapshot.rebased(None, "sub");
    let names = qualified.layers.iter().map(|l| l.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, ["sub::model::sub::fc", "sub::other::fc"]);
}
