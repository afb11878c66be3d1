/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 自动插入分流（Split）层：一个blob被多个层读取（或兼作损失输出）时，
 *                 在其产生者之后插入Split，让每个读取者拿到独立的副本，反向时梯度在Split处求和
 */

use std::collections::HashMap;

use crate::nn::descriptor::{LayerDescriptor, LayerKind, NetDescriptor};

pub fn split_layer_name(blob: &str, layer: &str, top_index: usize) -> String {
    format!("{}_{}_{}_split", blob, layer, top_index)
}

pub fn split_blob_name(blob: &str, layer: &str, top_index: usize, split_index: usize) -> String {
    format!("{}_{}_{}_split_{}", blob, layer, top_index, split_index)
}

/// 返回插入Split层后的描述
pub fn insert_splits(desc: &NetDescriptor) -> NetDescriptor {
    // blob名 -> 当前产生者 (层下标, top下标)
    let mut producer: HashMap<&str, (usize, usize)> = HashMap::new();
    // (层下标, top下标) -> 读取者数目
    let mut consumers: HashMap<(usize, usize), usize> = HashMap::new();
    // (层下标, bottom下标) -> 所读blob的产生者
    let mut bottom_source: HashMap<(usize, usize), (usize, usize)> = HashMap::new();
    // 带损失权重的top
    let mut loss_tops: HashMap<(usize, usize), f32> = HashMap::new();

    for (i, layer) in desc.layers.iter().enumerate() {
        for (j, name) in layer.bottom.iter().enumerate() {
            if let Some(&src) = producer.get(name.as_str()) {
                bottom_source.insert((i, j), src);
                *consumers.entry(src).or_insert(0) += 1;
            }
        }
        for (j, name) in layer.top.iter().enumerate() {
            producer.insert(name.as_str(), (i, j));
            let weight = top_loss_weight(layer, j);
            if weight != 0.0 {
                loss_tops.insert((i, j), weight);
                *consumers.entry((i, j)).or_insert(0) += 1;
            }
        }
    }

    let mut split_used: HashMap<(usize, usize), usize> = HashMap::new();
    let mut layers = Vec::with_capacity(desc.layers.len());
    for (i, layer) in desc.layers.iter().enumerate() {
        let mut layer = layer.clone();
        for j in 0..layer.bottom.len() {
            let Some(&src) = bottom_source.get(&(i, j)) else {
                continue;
            };
            if consumers.get(&src).copied().unwrap_or(0) > 1 {
                if layer.declared_bottom.is_empty() {
                    layer.declared_bottom = layer.bottom.clone();
                }
                let used = split_used.entry(src).or_insert(0);
                let producer_name = &desc.layers[src.0].name;
                layer.bottom[j] = split_blob_name(&layer.bottom[j], producer_name, src.1, *used);
                *used += 1;
            }
        }

        let mut splits = Vec::new();
        for j in 0..layer.top.len() {
            let count = consumers.get(&(i, j)).copied().unwrap_or(0);
            if count <= 1 {
                continue;
            }
            let blob = layer.top[j].clone();
            let tops = (0..count)
                .map(|k| split_blob_name(&blob, &layer.name, j, k))
                .collect::<Vec<_>>();
            let mut split = LayerDescriptor::new(
                &split_layer_name(&blob, &layer.name, j),
                LayerKind::Split,
                &[blob.as_str()],
                &tops.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            );
            // 损失权重移到Split的最后一个top上
            if let Some(&w) = loss_tops.get(&(i, j)) {
                let mut weights = vec![0.0; count];
                weights[count - 1] = w;
                split = split.with_loss_weight(&weights);
                let mut own = (0..layer.top.len())
                    .map(|k| top_loss_weight(&layer, k))
                    .collect::<Vec<_>>();
                own[j] = 0.0;
                layer.loss_weight = own;
            }
            splits.push(split);
        }
        layers.push(layer);
        layers.extend(splits);
    }

    NetDescriptor::new(&desc.name, layers)
}

/// top的实际损失权重：显式给出者为准，否则损失层的第一个top为1
pub fn top_loss_weight(layer: &LayerDescriptor, top_index: usize) -> f32 {
    match layer.loss_weight.get(top_index) {
        Some(&w) => w,
        None if layer.loss_weight.is_empty() && top_index == 0 && layer.kind.is_loss() => 1.0,
        None => 0.0,
    }
}
