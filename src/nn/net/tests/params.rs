use super::build_net;
use crate::assert_err;
use crate::errors::NetError;
use crate::nn::blob::Workspace;
use crate::tensor::Tensor;

fn shared_fc_net(second_outputs: usize) -> String {
    format!(
        r#"{{
        "name": "shared",
        "layers": [
            {{"name": "in", "type": "Input", "top": ["x"], "shape": [[1, 2]]}},
            {{"name": "fc1", "type": "InnerProduct", "bottom": ["x"], "top": ["y1"],
              "num_output": 1, "bias_term": false,
              "weight_filler": {{"type": "constant", "value": 1.0}},
              "param": [{{"name": "w", "lr_mult": 2.0}}]}},
            {{"name": "fc2", "type": "InnerProduct", "bottom": ["x"], "top": ["y2"],
              "num_output": {}, "bias_term": false,
              "weight_filler": {{"type": "constant", "value": 3.0}},
              "param": [{{"name": "w", "decay_mult": 0.0}}]}}
        ]
    }}"#,
        second_outputs
    )
}

// ==================== 参数共享 ====================

/// 测试同名参数共享同一存储，只有所有者计入可学习参数
#[test]
fn test_named_params_are_shared() -> Result<(), NetError> {
    let mut ws = Workspace::new();
    let mut net = build_net(&shared_fc_net(1), &mut ws)?;
    let params = net.params();
    assert_eq!(params.len(), 2);
    assert_eq!(params[0].blob, params[1].blob);
    assert_eq!(net.param_owners(), [None, Some(0)]);
    assert_eq!(net.param_display_names(), ["fc1::0", "fc2::0"]);
    assert_eq!(net.params_lr(), vec![2.0, 1.0]);
    assert_eq!(net.params_weight_decay(), vec![1.0, 0.0]);
    assert_eq!(net.learnable_params().len(), 1);

    // fc2使用fc1的权重
    let x = net.blob_by_name("x")?;
    ws.set_data(x, &Tensor::new(&[1.0, 2.0], &[1, 2]));
    net.forward(&mut ws)?;
    assert_eq!(ws.data(net.blob_by_name("y1")?).to_vec(), vec![3.0]);
    assert_eq!(ws.data(net.blob_by_name("y2")?).to_vec(), vec![3.0]);

    // 两个使用者的梯度累加到同一存储
    let w = net.params()[0].blob;
    ws.diff_mut(net.blob_by_name("y1")?).fill(1.0);
    ws.diff_mut(net.blob_by_name("y2")?).fill(1.0);
    net.backward(&mut ws)?;
    assert_eq!(ws.diff(w).to_vec(), vec![2.0, 4.0]);

    net.clear_param_diffs(&mut ws);
    assert_eq!(ws.diff(w).to_vec(), vec![0.0, 0.0]);
    Ok(())
}

/// 测试共享参数形状不一致时报错
#[test]
fn test_shared_param_shape_mismatch() {
    let mut ws = Workspace::new();
    assert_err!(build_net(&shared_fc_net(2), &mut ws), NetError::ShapeMismatch { .. });
}
