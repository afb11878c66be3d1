/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 网络（Net）：按序执行的层流水线。
 *                 负责按网络状态过滤层、自动插入Split、逐层setup、参数归属去重，
 *                 并提供整网前向、从某层起反向、按名查找blob等操作。
 *                 网络只保存blob槽位表，所有存储都在外部传入的Workspace中
 */

mod insert_splits;

use std::collections::HashMap;
use std::ops::Range;

use tracing::{debug, warn};

pub use insert_splits::{insert_splits, split_blob_name, split_layer_name, top_loss_weight};

use super::blob::{BlobId, BlobSlot, Workspace};
use super::context::NetContext;
use super::descriptor::{LayerDescriptor, NetDescriptor, NetState};
use super::layer::{Layer, LayerEnum, ParamBlob};
use super::snapshot::ParamSnapshot;
use crate::errors::NetError;

#[cfg(test)]
mod tests;

#[derive(Debug)]
pub struct Net {
    name: String,
    state: NetState,
    layers: Vec<LayerEnum>,
    layer_names: Vec<String>,
    layer_types: Vec<&'static str>,
    layer_index: HashMap<String, usize>,
    // 各层bottom/top在blob槽位表中的下标
    bottom_vecs: Vec<Vec<usize>>,
    top_vecs: Vec<Vec<usize>>,
    loss_weights: Vec<Vec<f32>>,
    blob_names: Vec<String>,
    blob_slots: Vec<BlobSlot>,
    blob_index: HashMap<String, usize>,
    // 参数：含共享引用；owner为None者为所有者
    params: Vec<ParamBlob>,
    param_owners: Vec<Option<usize>>,
    param_ranges: Vec<Range<usize>>,
    param_name_index: HashMap<String, usize>,
    debug_info: bool,
}

impl Net {
    // ========== 创建 ==========

    /// 由描述构建网络：过滤、插入Split，再逐层setup
    pub fn new(
        desc: &NetDescriptor,
        ws: &mut Workspace,
        ctx: &NetContext,
        state: NetState,
    ) -> Result<Self, NetError> {
        let desc = insert_splits(&desc.filtered(&state));
        let mut net = Net {
            name: desc.name.clone(),
            state,
            layers: Vec::new(),
            layer_names: Vec::new(),
            layer_types: Vec::new(),
            layer_index: HashMap::new(),
            bottom_vecs: Vec::new(),
            top_vecs: Vec::new(),
            loss_weights: Vec::new(),
            blob_names: Vec::new(),
            blob_slots: Vec::new(),
            blob_index: HashMap::new(),
            params: Vec::new(),
            param_owners: Vec::new(),
            param_ranges: Vec::new(),
            param_name_index: HashMap::new(),
            debug_info: false,
        };
        for layer_desc in &desc.layers {
            net.append_layer(layer_desc, ws, ctx)?;
        }
        debug!(
            net = %net.name,
            layers = net.layers.len(),
            blobs = net.blob_slots.len(),
            params = net.params.len(),
            "网络构建完成"
        );
        Ok(net)
    }

    fn append_layer(
        &mut self,
        desc: &LayerDescriptor,
        ws: &mut Workspace,
        ctx: &NetContext,
    ) -> Result<(), NetError> {
        if self.layer_index.contains_key(&desc.name) {
            return Err(NetError::Configuration(format!(
                "网络`{}`中层名`{}`重复",
                self.name, desc.name
            )));
        }
        if desc.loss_weight.len() > desc.top.len() {
            return Err(NetError::Configuration(format!(
                "层`{}`的loss_weight数目多于top数目",
                desc.name
            )));
        }

        let mut bottom_idx = Vec::with_capacity(desc.bottom.len());
        for name in &desc.bottom {
            let idx = self.blob_slot_index(name).ok_or_else(|| NetError::NameResolution {
                name: name.clone(),
                context: format!("网络`{}`的层`{}`", self.name, desc.name),
            })?;
            bottom_idx.push(idx);
        }

        let mut top_idx = Vec::with_capacity(desc.top.len());
        for (j, name) in desc.top.iter().enumerate() {
            if let Some(idx) = self.blob_slot_index(name) {
                // 就地计算：top与同位置的bottom同名
                if desc.bottom.get(j) == Some(name) {
                    top_idx.push(idx);
                    continue;
                }
                return Err(NetError::Configuration(format!(
                    "网络`{}`中blob`{}`被层`{}`重复产生",
                    self.name, name, desc.name
                )));
            }
            let id = ws.alloc_empty();
            top_idx.push(self.push_blob(name, id));
        }

        let mut layer = LayerEnum::from_descriptor(desc, ctx, &self.state)?;
        let bottoms = self.resolve(&bottom_idx);
        let tops = self.resolve(&top_idx);
        layer.setup(ws, &bottoms, &tops)?;
        layer.reshape(ws, &bottoms, &tops)?;

        let weights = (0..tops.len())
            .map(|j| top_loss_weight(desc, j))
            .collect::<Vec<_>>();
        for (&t, &w) in tops.iter().zip(&weights) {
            if w != 0.0 {
                ws.diff_mut(t).fill(w);
            }
        }

        let layer_id = self.layers.len();
        let start = self.params.len();
        for (j, mut p) in layer.params().into_iter().enumerate() {
            let spec = desc.param.get(j);
            if let Some(spec) = spec {
                p.lr_mult = spec.lr_mult;
                p.decay_mult = spec.decay_mult;
            }
            if p.name.is_empty() {
                p.name = format!("{}::{}", desc.name, j);
            }
            let shared_name = spec.map(|s| s.name.clone()).filter(|n| !n.is_empty());
            let owner = shared_name
                .as_ref()
                .and_then(|n| self.param_name_index.get(n).copied());
            match owner {
                Some(owner) => {
                    let owner_blob = self.params[owner].blob;
                    let (expected, got) = (ws.shape(owner_blob), ws.shape(p.blob));
                    if expected != got {
                        return Err(NetError::ShapeMismatch {
                            expected,
                            got,
                            message: format!("层`{}`共享参数`{}`时形状不一致", desc.name, p.name),
                        });
                    }
                    layer.share_param(j, owner_blob)?;
                    p.blob = owner_blob;
                    self.params.push(p);
                    self.param_owners.push(Some(owner));
                }
                None => {
                    if let Some(n) = shared_name {
                        self.param_name_index.insert(n, self.params.len());
                    }
                    self.params.push(p);
                    self.param_owners.push(None);
                }
            }
        }
        self.param_ranges.push(start..self.params.len());

        self.layer_index.insert(desc.name.clone(), layer_id);
        self.layer_names.push(desc.name.clone());
        self.layer_types.push(layer.layer_type());
        self.layers.push(layer);
        self.bottom_vecs.push(bottom_idx);
        self.top_vecs.push(top_idx);
        self.loss_weights.push(weights);
        Ok(())
    }

    fn push_blob(&mut self, name: &str, id: BlobId) -> usize {
        let idx = self.blob_slots.len();
        self.blob_names.push(name.to_string());
        self.blob_slots.push(BlobSlot::Owned(id));
        self.blob_index.insert(name.to_string(), idx);
        idx
    }

    fn resolve(&self, slots: &[usize]) -> Vec<BlobId> {
        slots.iter().map(|&i| self.blob_slots[i].resolve()).collect()
    }

    // ========== 执行 ==========

    /// 整网前向，返回加权损失之和
    pub fn forward(&mut self, ws: &mut Workspace) -> Result<f32, NetError> {
        match self.layers.len() {
            0 => Ok(0.0),
            n => self.forward_from_to(ws, 0, n - 1),
        }
    }

    /// 执行第`start`到`end`（含）层的前向，返回这些层的加权损失之和
    pub fn forward_from_to(
        &mut self,
        ws: &mut Workspace,
        start: usize,
        end: usize,
    ) -> Result<f32, NetError> {
        let mut loss = 0.0;
        for i in start..=end {
            let bottoms = self.resolve(&self.bottom_vecs[i]);
            let tops = self.resolve(&self.top_vecs[i]);
            self.layers[i].forward(ws, &bottoms, &tops)?;
            for (&t, &w) in tops.iter().zip(&self.loss_weights[i]) {
                if w != 0.0 {
                    loss += w * ws.data(t).sum();
                }
            }
            if self.debug_info {
                for (j, &t) in tops.iter().enumerate() {
                    let data = ws.data(t);
                    let mean_abs = data.asum() / data.size().max(1) as f32;
                    debug!(
                        net = %self.name,
                        layer = %self.layer_names[i],
                        top = %self.blob_names[self.top_vecs[i][j]],
                        mean_abs,
                        "前向数据"
                    );
                }
            }
        }
        Ok(loss)
    }

    /// 整网反向：先重置损失top的梯度为其权重
    pub fn backward(&mut self, ws: &mut Workspace) -> Result<(), NetError> {
        self.apply_loss_weights(ws);
        match self.layers.len() {
            0 => Ok(()),
            n => self.backward_from(ws, n - 1),
        }
    }

    /// 从第`start`层（含）反向执行到第0层，不触碰损失梯度
    pub fn backward_from(&mut self, ws: &mut Workspace, start: usize) -> Result<(), NetError> {
        for i in (0..=start).rev() {
            let bottoms = self.resolve(&self.bottom_vecs[i]);
            let tops = self.resolve(&self.top_vecs[i]);
            let propagate_down = vec![true; bottoms.len()];
            self.layers[i].backward(ws, &tops, &propagate_down, &bottoms)?;
            if self.debug_info {
                for (j, &b) in bottoms.iter().enumerate() {
                    let diff = ws.diff(b);
                    let mean_abs = diff.asum() / diff.size().max(1) as f32;
                    debug!(
                        net = %self.name,
                        layer = %self.layer_names[i],
                        bottom = %self.blob_names[self.bottom_vecs[i][j]],
                        mean_abs,
                        "反向梯度"
                    );
                }
            }
        }
        Ok(())
    }

    /// 逐层重新计算形状
    pub fn reshape(&mut self, ws: &mut Workspace) -> Result<(), NetError> {
        for i in 0..self.layers.len() {
            let bottoms = self.resolve(&self.bottom_vecs[i]);
            let tops = self.resolve(&self.top_vecs[i]);
            self.layers[i].reshape(ws, &bottoms, &tops)?;
        }
        self.apply_loss_weights(ws);
        Ok(())
    }

    fn apply_loss_weights(&self, ws: &mut Workspace) {
        for (tops, weights) in self.top_vecs.iter().zip(&self.loss_weights) {
            for (&t, &w) in tops.iter().zip(weights) {
                if w != 0.0 {
                    ws.diff_mut(self.blob_slots[t].resolve()).fill(w);
                }
            }
        }
    }

    pub fn set_debug_info(&mut self, on: bool) {
        self.debug_info = on;
    }

    // ========== blob查找 ==========

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &NetState {
        &self.state
    }

    pub fn has_blob(&self, name: &str) -> bool {
        self.blob_index.contains_key(name)
    }

    pub fn blob_slot_index(&self, name: &str) -> Option<usize> {
        self.blob_index.get(name).copied()
    }

    /// 按名查找blob的当前存储
    pub fn blob_by_name(&self, name: &str) -> Result<BlobId, NetError> {
        self.blob_slot_index(name)
            .map(|i| self.blob_slots[i].resolve())
            .ok_or_else(|| NetError::NameResolution {
                name: name.to_string(),
                context: format!("网络`{}`", self.name),
            })
    }

    pub fn blob_names(&self) -> &[String] {
        &self.blob_names
    }

    pub fn blob_slot(&self, index: usize) -> BlobSlot {
        self.blob_slots[index]
    }

    /// 各槽位当前实际读写的存储
    pub fn blob_ids(&self) -> Vec<BlobId> {
        self.blob_slots.iter().map(|s| s.resolve()).collect()
    }

    /// 各槽位的自有存储（忽略别名）
    pub fn owned_blob_ids(&self) -> Vec<BlobId> {
        self.blob_slots.iter().map(|s| s.own()).collect()
    }

    pub fn num_blobs(&self) -> usize {
        self.blob_slots.len()
    }

    // ========== 别名与存储重绑定 ==========

    /// 让槽位成为`source`的别名；自有存储先变形为`source`的形状
    pub fn alias_blob(&mut self, ws: &mut Workspace, index: usize, source: BlobId) {
        let own = self.blob_slots[index].own();
        if own == source {
            self.blob_slots[index] = BlobSlot::Owned(own);
            return;
        }
        ws.reshape_like(own, source);
        self.blob_slots[index] = BlobSlot::Aliased { own, source };
    }

    /// 断开别名：将源存储的值和梯度拷回自有存储
    pub fn unalias_blob(&mut self, ws: &mut Workspace, index: usize) {
        if let BlobSlot::Aliased { own, source } = self.blob_slots[index] {
            ws.copy_data(source, own);
            ws.copy_diff(source, own);
            self.blob_slots[index] = BlobSlot::Owned(own);
        }
    }

    /// 整表替换为给定的自有存储（时间展开时逐步切换各时间步的缓冲）
    pub fn reset_blobs(&mut self, ids: &[BlobId]) -> Result<(), NetError> {
        if ids.len() != self.blob_slots.len() {
            return Err(NetError::Configuration(format!(
                "网络`{}`有{}个blob，重置时却给了{}个",
                self.name,
                self.blob_slots.len(),
                ids.len()
            )));
        }
        for (slot, &id) in self.blob_slots.iter_mut().zip(ids) {
            *slot = BlobSlot::Owned(id);
        }
        Ok(())
    }

    // ========== 层 ==========

    pub fn layers(&self) -> &[LayerEnum] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [LayerEnum] {
        &mut self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_names(&self) -> &[String] {
        &self.layer_names
    }

    pub fn layer_types(&self) -> &[&'static str] {
        &self.layer_types
    }

    pub fn layer_index(&self, name: &str) -> Option<usize> {
        self.layer_index.get(name).copied()
    }

    pub fn layer_by_name(&self, name: &str) -> Option<&LayerEnum> {
        self.layer_index(name).map(|i| &self.layers[i])
    }

    pub fn layer_by_name_mut(&mut self, name: &str) -> Option<&mut LayerEnum> {
        self.layer_index(name).map(move |i| &mut self.layers[i])
    }

    /// 第`index`层的bottom名
    pub fn layer_bottom_names(&self, index: usize) -> Vec<&str> {
        self.bottom_vecs[index]
            .iter()
            .map(|&i| self.blob_names[i].as_str())
            .collect()
    }

    pub fn layer_top_names(&self, index: usize) -> Vec<&str> {
        self.top_vecs[index]
            .iter()
            .map(|&i| self.blob_names[i].as_str())
            .collect()
    }

    /// 各层的诊断中间blob
    pub fn layer_intermediates(&self) -> Vec<(String, BlobId)> {
        self.layers.iter().flat_map(|l| l.intermediates()).collect()
    }

    // ========== 子网 ==========

    /// 各层所嵌子网（深度优先，递归）
    pub fn subnets(&self) -> Vec<&Net> {
        let mut out = Vec::new();
        for layer in &self.layers {
            for net in layer.subnets() {
                out.push(net);
                out.extend(net.subnets());
            }
        }
        out
    }

    /// 自身及所有嵌套子网（深度优先），与`for_each_net_mut`顺序一致
    pub fn all_nets(&self) -> Vec<&Net> {
        let mut out = vec![self];
        out.extend(self.subnets());
        out
    }

    /// 依`all_nets`的顺序访问自身及所有嵌套子网
    pub fn for_each_net_mut(
        &mut self,
        f: &mut dyn FnMut(&mut Net) -> Result<(), NetError>,
    ) -> Result<(), NetError> {
        f(self)?;
        for layer in &mut self.layers {
            for net in layer.subnets_mut() {
                net.for_each_net_mut(f)?;
            }
        }
        Ok(())
    }

    // ========== 参数 ==========

    /// 全部参数（含共享引用）
    pub fn params(&self) -> &[ParamBlob] {
        &self.params
    }

    pub fn param_owners(&self) -> &[Option<usize>] {
        &self.param_owners
    }

    pub fn param_display_names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn params_lr(&self) -> Vec<f32> {
        self.params.iter().map(|p| p.lr_mult).collect()
    }

    pub fn params_weight_decay(&self) -> Vec<f32> {
        self.params.iter().map(|p| p.decay_mult).collect()
    }

    /// 仅所有者参数（不含重复）
    pub fn learnable_params(&self) -> Vec<&ParamBlob> {
        self.params
            .iter()
            .zip(&self.param_owners)
            .filter(|(_, owner)| owner.is_none())
            .map(|(p, _)| p)
            .collect()
    }

    /// 清零所有参数梯度
    pub fn clear_param_diffs(&self, ws: &mut Workspace) {
        for p in self.learnable_params() {
            ws.zero_diff(p.blob);
        }
    }

    // ========== 快照 ==========

    /// 按层名导出各层参数
    pub fn snapshot(&self, ws: &Workspace) -> ParamSnapshot {
        let mut snapshot = ParamSnapshot::new();
        for (name, range) in self.layer_names.iter().zip(&self.param_ranges) {
            if range.is_empty() {
                continue;
            }
            let blobs = self.params[range.clone()]
                .iter()
                .map(|p| ws.data(p.blob).clone())
                .collect();
            snapshot.push(name, blobs);
        }
        snapshot
    }

    /// 按层名导入参数；快照中找不到对应层的条目被跳过
    pub fn copy_trained_layers_from(
        &self,
        ws: &mut Workspace,
        snapshot: &ParamSnapshot,
    ) -> Result<(), NetError> {
        for entry in &snapshot.layers {
            let Some(i) = self.layer_index(&entry.name) else {
                warn!(net = %self.name, layer = %entry.name, "快照中的层在网络中不存在，已跳过");
                continue;
            };
            let range = self.param_ranges[i].clone();
            if range.len() != entry.blobs.len() {
                return Err(NetError::Configuration(format!(
                    "层`{}`有{}个参数，快照中却有{}个",
                    entry.name,
                    range.len(),
                    entry.blobs.len()
                )));
            }
            for (p, value) in self.params[range].iter().zip(&entry.blobs) {
                let expected = ws.shape(p.blob);
                if expected.as_slice() != value.shape() {
                    return Err(NetError::ShapeMismatch {
                        expected,
                        got: value.shape().to_vec(),
                        message: format!("载入层`{}`的参数`{}`", entry.name, p.name),
                    });
                }
                ws.data_mut(p.blob).copy_from(value);
            }
            debug!(net = %self.name, layer = %entry.name, "已载入参数");
        }
        Ok(())
    }
}
