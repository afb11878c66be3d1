use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::data::{Cursor, DataError, Datum, PREFETCH_COUNT, Prefetcher};
use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::context::NetContext;
use crate::nn::descriptor::{LayerDescriptor, TwoInstanceEmbedDataParam};
use crate::nn::layer::{Layer, check_blob_count};
use crate::tensor::Tensor;

/// 一个预取批次：画布图像(N, C, S, S)、标签(N, 2)、位置真值(N, 4)
#[derive(Debug, Clone)]
pub struct EmbedBatch {
    pub data: Tensor,
    pub labels: Tensor,
    pub locations: Tensor,
}

impl EmbedBatch {
    fn new(batch_size: usize, channels: usize, canvas: usize) -> Self {
        Self {
            data: Tensor::zeros(&[batch_size, channels, canvas, canvas]),
            labels: Tensor::zeros(&[batch_size, 2]),
            locations: Tensor::zeros(&[batch_size, 4]),
        }
    }
}

/// 双实例嵌入数据层
///
/// 每项取一条记录，把它的两份拷贝放到空白画布上的随机位置（第二份可覆盖第一份）。
/// 位置真值为两份拷贝左上角(x1, y1, x2, y2)相对可移动范围的比例，且x1 ≤ x2。
/// `repeat_inputs > 0`时整批只用一条记录，并且同一批输出`repeat_inputs`次
#[derive(Debug)]
pub struct TwoInstanceEmbedDataLayer {
    name: String,
    param: TwoInstanceEmbedDataParam,
    rng: Rc<RefCell<StdRng>>,
    prefetcher: Option<Prefetcher<EmbedBatch>>,
    current: Option<EmbedBatch>,
    passes: usize,
}

impl TwoInstanceEmbedDataLayer {
    pub fn new(desc: &LayerDescriptor, param: TwoInstanceEmbedDataParam, ctx: &NetContext) -> Self {
        Self {
            name: desc.name.clone(),
            param,
            rng: ctx.rng().clone(),
            prefetcher: None,
            current: None,
            passes: 0,
        }
    }

    fn fetch(&mut self) -> Result<(), NetError> {
        let prefetcher = self.prefetcher.as_ref().ok_or_else(|| {
            NetError::Configuration(format!("数据层`{}`尚未setup", self.name))
        })?;
        let batch = prefetcher.pop("Data layer prefetch queue empty")?;
        if let Some(old) = self.current.replace(batch) {
            prefetcher.recycle(old);
        }
        Ok(())
    }
}

/// 把两份`datum`放到第`item`张画布上，返回位置真值
fn embed_pair<R: Rng>(datum: &Datum, item: usize, canvas: usize, data: &mut [f32], rng: &mut R) -> [f32; 4] {
    let x_range = canvas - datum.width;
    let y_range = canvas - datum.height;
    let offset = |range: usize, u: f32| (range as f32 * u) as usize;
    let mut x1 = offset(x_range, rng.gen_range(0.0..1.0));
    let y1 = offset(y_range, rng.gen_range(0.0..1.0));
    let mut x2 = offset(x_range, rng.gen_range(0.0..1.0));
    let y2 = offset(y_range, rng.gen_range(0.0..1.0));
    if x1 > x2 {
        std::mem::swap(&mut x1, &mut x2);
    }
    for (ox, oy) in [(x1, y1), (x2, y2)] {
        for c in 0..datum.channels {
            for y in 0..datum.height {
                for x in 0..datum.width {
                    let index = ((item * datum.channels + c) * canvas + oy + y) * canvas + ox + x;
                    data[index] = datum.pixel(c, y, x);
                }
            }
        }
    }
    let ratio = |v: usize, range: usize| if range == 0 { 0.0 } else { v as f32 / range as f32 };
    [
        ratio(x1, x_range),
        ratio(y1, y_range),
        ratio(x2, x_range),
        ratio(y2, y_range),
    ]
}

impl Layer for TwoInstanceEmbedDataLayer {
    fn layer_type(&self) -> &'static str {
        "TwoInstanceEmbedData"
    }

    fn setup(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 0, 0)?;
        check_blob_count(&self.name, "top", top.len(), 1, 3)?;
        let TwoInstanceEmbedDataParam {
            source,
            batch_size,
            canvas_size,
            repeat_inputs,
        } = self.param.clone();
        if batch_size == 0 {
            return Err(NetError::Configuration(format!("数据层`{}`的batch_size须大于0", self.name)));
        }

        let cursor = Cursor::open(&source)?;
        let first = cursor.value().clone();
        if first.width > canvas_size || first.height > canvas_size {
            return Err(NetError::Configuration(format!(
                "数据层`{}`的记录尺寸{}×{}大于画布{}",
                self.name, first.height, first.width, canvas_size
            )));
        }
        let channels = first.channels;
        ws.reshape(top[0], &[batch_size, channels, canvas_size, canvas_size]);
        if let Some(&t) = top.get(1) {
            ws.reshape(t, &[batch_size, 2]);
        }
        if let Some(&t) = top.get(2) {
            ws.reshape(t, &[batch_size, 4]);
        }
        info!(
            layer = %self.name,
            shape = ?[batch_size, channels, canvas_size, canvas_size],
            "数据层输出形状"
        );

        let seed = self.rng.borrow_mut().gen_range(0..u64::MAX);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut cursor = cursor;
        let batches = (0..PREFETCH_COUNT)
            .map(|_| EmbedBatch::new(batch_size, channels, canvas_size))
            .collect();
        self.prefetcher = Some(Prefetcher::spawn(batches, move |batch: &mut EmbedBatch| {
            batch.data.fill(0.0);
            let mut datum = cursor.value().clone();
            cursor.next();
            for item in 0..batch_size {
                if repeat_inputs == 0 && item > 0 {
                    datum = cursor.value().clone();
                    cursor.next();
                }
                if datum.channels != channels || datum.width > canvas_size || datum.height > canvas_size {
                    return Err(DataError::FormatError(format!(
                        "记录尺寸({}, {}, {})与画布不兼容",
                        datum.channels, datum.height, datum.width
                    )));
                }
                let truth = embed_pair(&datum, item, canvas_size, batch.data.as_slice_mut(), &mut rng);
                let label = datum.label as f32;
                batch.labels.as_slice_mut()[item * 2..item * 2 + 2].copy_from_slice(&[label, label]);
                batch.locations.as_slice_mut()[item * 4..item * 4 + 4].copy_from_slice(&truth);
            }
            Ok(())
        }));
        self.current = None;
        self.passes = 0;
        Ok(())
    }

    fn reshape(&mut self, _ws: &mut Workspace, _bottom: &[BlobId], _top: &[BlobId]) -> Result<(), NetError> {
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, _bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let repeat = self.param.repeat_inputs;
        if repeat == 0 || self.passes == 0 || self.current.is_none() {
            self.fetch()?;
        }
        if repeat > 0 {
            self.passes = (self.passes + 1) % repeat;
        }
        let Some(batch) = self.current.as_ref() else {
            return Err(NetError::Data(format!("数据层`{}`没有可用批次", self.name)));
        };
        ws.set_data(top[0], &batch.data);
        if let Some(&t) = top.get(1) {
            ws.set_data(t, &batch.labels);
        }
        if let Some(&t) = top.get(2) {
            ws.set_data(t, &batch.locations);
        }
        Ok(())
    }

    fn backward(
        &mut self,
        _ws: &mut Workspace,
        _top: &[BlobId],
        _propagate_down: &[bool],
        _bottom: &[BlobId],
    ) -> Result<(), NetError> {
        Ok(())
    }
}
