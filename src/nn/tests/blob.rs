use crate::nn::blob::{BlobSlot, Workspace};
use crate::tensor::Tensor;

/// 测试变形：元素数不变时保留数值，否则清零
#[test]
fn test_reshape_keeps_or_clears() {
    let mut ws = Workspace::new();
    let id = ws.alloc(&[2, 3]);
    ws.data_mut(id).fill(1.5);
    ws.reshape(id, &[3, 2]);
    assert_eq!(ws.shape(id), vec![3, 2]);
    assert_eq!(ws.data(id).sum(), 9.0);

    ws.reshape(id, &[4]);
    assert_eq!(ws.count(id), 4);
    assert_eq!(ws.data(id).sum(), 0.0);
    assert_eq!(ws.diff(id).shape(), &[4]);
}

#[test]
fn test_alloc_empty_and_like() {
    let mut ws = Workspace::new();
    let empty = ws.alloc_empty();
    assert_eq!(ws.count(empty), 0);
    let src = ws.alloc(&[2, 2]);
    let like = ws.alloc_like(src);
    assert_eq!(ws.shape(like), vec![2, 2]);
    assert_eq!(ws.len(), 3);
}

/// 测试拷贝值与梯度时目标随之变形
#[test]
fn test_copy_reshapes_destination() {
    let mut ws = Workspace::new();
    let src = ws.alloc(&[2]);
    ws.set_data(src, &Tensor::new(&[1.0, 2.0], &[2]));
    ws.set_diff(src, &Tensor::new(&[3.0, 4.0], &[2]));
    let dst = ws.alloc_empty();
    ws.copy_data(src, dst);
    ws.copy_diff(src, dst);
    assert_eq!(ws.data(dst).to_vec(), vec![1.0, 2.0]);
    assert_eq!(ws.diff(dst).to_vec(), vec![3.0, 4.0]);

    ws.zero_diff(dst);
    assert_eq!(ws.diff(dst).to_vec(), vec![0.0, 0.0]);
    assert_eq!(ws.data(dst).to_vec(), vec![1.0, 2.0]);
}

#[test]
fn test_blob_slot_resolution() {
    let mut ws = Workspace::new();
    let own = ws.alloc(&[1]);
    let source = ws.alloc(&[1]);
    let owned = BlobSlot::Owned(own);
    assert_eq!(owned.resolve(), own);
    assert!(!owned.is_aliased());

    let aliased = BlobSlot::Aliased { own, source };
    assert_eq!(aliased.resolve(), source);
    assert_eq!(aliased.own(), own);
    assert!(aliased.is_aliased());
}
