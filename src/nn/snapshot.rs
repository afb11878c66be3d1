/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 参数快照：按层名保存各层参数张量的二进制文件（bincode）
 *
 * 文件内容依次为：
 * - magic: [u8; 4] = b"STPS"
 * - version: u32
 * - layers: [{ name, blobs: [Tensor] }]
 */

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::NetError;
use crate::tensor::Tensor;

const SNAPSHOT_MAGIC: [u8; 4] = *b"STPS";
const SNAPSHOT_VERSION: u32 = 1;

/// 单层的参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSnapshot {
    pub name: String,
    pub blobs: Vec<Tensor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSnapshot {
    magic: [u8; 4],
    version: u32,
    pub layers: Vec<LayerSnapshot>,
}

impl Default for ParamSnapshot {
    fn default() -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            layers: Vec::new(),
        }
    }
}

impl ParamSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, blobs: Vec<Tensor>) {
        self.layers.push(LayerSnapshot {
            name: name.to_string(),
            blobs,
        });
    }

    pub fn layer(&self, name: &str) -> Option<&LayerSnapshot> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// 调整层名以对上子网内部的层名：
    /// 给定`strip_prefix`时，以它开头的层名去掉该前缀，其余不变；
    /// 否则所有层名加上`<qualifier>::`前缀
    pub fn rebased(mut self, strip_prefix: Option<&str>, qualifier: &str) -> Self {
        for layer in &mut self.layers {
            match strip_prefix {
                Some(prefix) => {
                    if let Some(rest) = layer.name.strip_prefix(prefix) {
                        layer.name = rest.to_string();
                    }
                }
                None => layer.name = format!("{}::{}", qualifier, layer.name),
            }
        }
        self
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), NetError> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, NetError> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: ParamSnapshot = bincode::deserialize_from(reader)?;
        if snapshot.magic != SNAPSHOT_MAGIC {
            return Err(NetError::Serialization("无效的参数快照文件格式".to_string()));
        }
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(NetError::Serialization(format!(
                "不支持的参数快照版本: {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }
}
