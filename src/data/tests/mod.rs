
use std::path::PathBuf;

use crate::data::{Datum, DatumDb};

/// 测试用的临时文件路径（按进程号区分，避免并行测试互相覆盖）
pub(crate) fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("subnet_torch_{}_{}", std::process::id(), name))
}

/// 3条2×2单通道记录，像素值依次为记录序号
pub(crate) fn small_db() -> DatumDb {
    DatumDb::new(
        (0..3)
            .map(|i| Datum::new(1, 2, 2, vec![i as u8; 4], i))
            .collect(),
    )
}
