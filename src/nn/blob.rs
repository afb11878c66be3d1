/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : Blob（值/梯度双张量）、全局Blob仓库（Workspace）及网络中的具名槽位（BlobSlot）
 *                 所有Blob由Workspace统一持有，各处仅保存BlobId索引，
 *                 故子网、时间展开等组合层可以随时改指存储而不会产生悬垂引用
 */

use crate::tensor::Tensor;

/// Workspace中Blob的索引句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId(usize);

impl BlobId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// 值（data）与梯度（diff）形状始终一致的一对张量
#[derive(Debug, Clone)]
pub struct Blob {
    data: Tensor,
    diff: Tensor,
}

impl Blob {
    pub fn new(shape: &[usize]) -> Self {
        Self {
            data: Tensor::zeros(shape),
            diff: Tensor::zeros(shape),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn count(&self) -> usize {
        self.data.size()
    }

    pub fn data(&self) -> &Tensor {
        &self.data
    }

    pub fn diff(&self) -> &Tensor {
        &self.diff
    }

    pub fn data_mut(&mut self) -> &mut Tensor {
        &mut self.data
    }

    pub fn diff_mut(&mut self) -> &mut Tensor {
        &mut self.diff
    }

    /// 同时可变借用两半
    pub fn data_diff_mut(&mut self) -> (&mut Tensor, &mut Tensor) {
        (&mut self.data, &mut self.diff)
    }

    /// 变形：元素个数不变时保留数值，否则两半均重新分配为全零
    pub fn reshape(&mut self, shape: &[usize]) {
        if self.shape() == shape {
            return;
        }
        if shape.iter().product::<usize>() == self.count() {
            self.data.reshape_mut(shape);
            self.diff.reshape_mut(shape);
        } else {
            self.data = Tensor::zeros(shape);
            self.diff = Tensor::zeros(shape);
        }
    }
}

/// 一个网络层级（外层网络、各子网及合成缓冲）共享的Blob仓库
#[derive(Debug, Default)]
pub struct Workspace {
    blobs: Vec<Blob>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    // ========== 创建 ==========

    /// 分配一个指定形状的全零Blob
    pub fn alloc(&mut self, shape: &[usize]) -> BlobId {
        self.blobs.push(Blob::new(shape));
        BlobId(self.blobs.len() - 1)
    }

    /// 分配一个尚未定形的Blob（形状为[0]）
    pub fn alloc_empty(&mut self) -> BlobId {
        self.alloc(&[0])
    }

    /// 分配一个与`other`同形状的全零Blob
    pub fn alloc_like(&mut self, other: BlobId) -> BlobId {
        let shape = self.shape(other);
        self.alloc(&shape)
    }

    // ========== 访问 ==========

    pub fn blob(&self, id: BlobId) -> &Blob {
        &self.blobs[id.0]
    }

    pub fn blob_mut(&mut self, id: BlobId) -> &mut Blob {
        &mut self.blobs[id.0]
    }

    pub fn data(&self, id: BlobId) -> &Tensor {
        self.blobs[id.0].data()
    }

    pub fn diff(&self, id: BlobId) -> &Tensor {
        self.blobs[id.0].diff()
    }

    pub fn data_mut(&mut self, id: BlobId) -> &mut Tensor {
        self.blobs[id.0].data_mut()
    }

    pub fn diff_mut(&mut self, id: BlobId) -> &mut Tensor {
        self.blobs[id.0].diff_mut()
    }

    pub fn shape(&self, id: BlobId) -> Vec<usize> {
        self.blobs[id.0].shape().to_vec()
    }

    pub fn count(&self, id: BlobId) -> usize {
        self.blobs[id.0].count()
    }

    // ========== 修改 ==========

    pub fn reshape(&mut self, id: BlobId, shape: &[usize]) {
        self.blobs[id.0].reshape(shape);
    }

    pub fn reshape_like(&mut self, id: BlobId, other: BlobId) {
        let shape = self.shape(other);
        self.reshape(id, &shape);
    }

    /// 覆写值：先变形为`value`的形状再拷贝
    pub fn set_data(&mut self, id: BlobId, value: &Tensor) {
        let blob = &mut self.blobs[id.0];
        blob.reshape(value.shape());
        blob.data_mut().copy_from(value);
    }

    pub fn set_diff(&mut self, id: BlobId, value: &Tensor) {
        let blob = &mut self.blobs[id.0];
        blob.reshape(value.shape());
        blob.diff_mut().copy_from(value);
    }

    /// 将`src`的值拷贝到`dst`（`dst`随之变形）
    pub fn copy_data(&mut self, src: BlobId, dst: BlobId) {
        if src == dst {
            return;
        }
        let value = self.blobs[src.0].data().clone();
        self.set_data(dst, &value);
    }

    /// 将`src`的梯度拷贝到`dst`（`dst`随之变形）
    pub fn copy_diff(&mut self, src: BlobId, dst: BlobId) {
        if src == dst {
            return;
        }
        let grad = self.blobs[src.0].diff().clone();
        self.set_diff(dst, &grad);
    }

    pub fn zero_diff(&mut self, id: BlobId) {
        self.blobs[id.0].diff_mut().fill(0.0);
    }

    pub fn zero_data(&mut self, id: BlobId) {
        self.blobs[id.0].data_mut().fill(0.0);
    }
}

/// 网络blob表中的一个具名槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobSlot {
    /// 使用自有存储
    Owned(BlobId),
    /// 别名：逻辑上指向`source`（另一组件的存储），`own`为断开别名后的自有存储
    Aliased { own: BlobId, source: BlobId },
}

impl BlobSlot {
    /// 解析为当前实际读写的存储
    pub fn resolve(&self) -> BlobId {
        match *self {
            BlobSlot::Owned(id) => id,
            BlobSlot::Aliased { source, .. } => source,
        }
    }

    /// 自有存储
    pub fn own(&self) -> BlobId {
        match *self {
            BlobSlot::Owned(id) => id,
            BlobSlot::Aliased { own, .. } => own,
        }
    }

    pub fn is_aliased(&self) -> bool {
        matches!(self, BlobSlot::Aliased { .. })
    }
}
