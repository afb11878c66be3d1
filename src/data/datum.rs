/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 图像记录（Datum）、记录库（DatumDb）及循环游标（Cursor）
 *
 * 记录库以bincode存为单个文件；游标读到末尾时回到开头继续
 */

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::DataError;

/// 像素值缩放到[0, 1)
pub const PIXEL_SCALE: f32 = 1.0 / 256.0;

/// 一张带标签的8位图像，像素按(C, H, W)排列
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datum {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<u8>,
    pub label: i32,
}

impl Datum {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<u8>, label: i32) -> Self {
        Self {
            channels,
            height,
            width,
            data,
            label,
        }
    }

    /// 像素数据长度是否与声明的尺寸一致
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.channels * self.height * self.width
    }

    /// 缩放后的像素值
    pub fn pixel(&self, channel: usize, y: usize, x: usize) -> f32 {
        self.data[(channel * self.height + y) * self.width + x] as f32 * PIXEL_SCALE
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatumDb {
    records: Vec<Datum>,
}

impl DatumDb {
    pub fn new(records: Vec<Datum>) -> Self {
        Self { records }
    }

    pub fn push(&mut self, datum: Datum) {
        self.records.push(datum);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Datum] {
        &self.records
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DataError> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    /// 读取记录库，并检查每条记录的像素长度
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DataError::FileNotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        let db: DatumDb = bincode::deserialize_from(reader)?;
        if let Some(i) = db.records.iter().position(|d| !d.is_consistent()) {
            return Err(DataError::FormatError(format!(
                "{:?}的第{}条记录像素长度与尺寸不符",
                path, i
            )));
        }
        Ok(db)
    }
}

/// 在记录库上循环前进的游标
#[derive(Debug)]
pub struct Cursor {
    db: DatumDb,
    source: PathBuf,
    position: usize,
}

impl Cursor {
    /// 空库报错，因为游标永远无法给出记录
    pub fn new(db: DatumDb, source: impl Into<PathBuf>) -> Result<Self, DataError> {
        let source = source.into();
        if db.is_empty() {
            return Err(DataError::EmptyDatabase(source));
        }
        Ok(Self {
            db,
            source,
            position: 0,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let db = DatumDb::load(path.as_ref())?;
        Self::new(db, path.as_ref())
    }

    pub fn value(&self) -> &Datum {
        &self.db.records[self.position]
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// 前进一条；越过末尾则回到开头
    pub fn next(&mut self) {
        self.position += 1;
        if self.position >= self.db.len() {
            info!(source = ?self.source, "数据读完，从头开始预取");
            self.position = 0;
        }
    }
}
