use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::descriptor::{GlimpseCroppingParam, LayerDescriptor};
use crate::nn::layer::{Layer, check_blob_count};
use crate::tensor::Tensor;

/// 注视窗口裁剪
///
/// bottom：图像(N, C, H, W)、相对位置(N, 2)（取值[0, 1]，超出者截断），
/// 可选的嵌入边界(N, 2)（每张图实际内容的高与宽）。
/// top：(N, C, window, window)；开启降采样时通道翻倍，后C个通道为
/// 2倍窗口区域的2×2均值
#[derive(Debug)]
pub struct GlimpseCroppingLayer {
    name: String,
    window: usize,
    do_downsamp: bool,
}

impl GlimpseCroppingLayer {
    pub fn new(desc: &LayerDescriptor, param: GlimpseCroppingParam) -> Self {
        Self {
            name: desc.name.clone(),
            window: param.window,
            do_downsamp: param.do_downsamp,
        }
    }

    /// 窗口左上角：`loc * (extent - span)`，extent不足span时报错
    fn origin(&self, loc: f32, extent: usize, span: usize) -> Result<usize, NetError> {
        if extent < span {
            return Err(NetError::Data(format!(
                "GlimpseCropping层`{}`：图像边长{}小于裁剪跨度{}",
                self.name, extent, span
            )));
        }
        Ok((loc.clamp(0.0, 1.0) * (extent - span) as f32) as usize)
    }
}

impl Layer for GlimpseCroppingLayer {
    fn layer_type(&self) -> &'static str {
        "GlimpseCropping"
    }

    fn setup(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 2, 3)?;
        check_blob_count(&self.name, "top", top.len(), 1, 1)?;
        let shape = ws.shape(bottom[0]);
        if shape.len() != 4 {
            return Err(NetError::Configuration(format!(
                "GlimpseCropping层`{}`的输入须为(N, C, H, W)，实际为{:?}",
                self.name, shape
            )));
        }
        if self.window == 0 || self.window >= shape[2] || self.window >= shape[3] {
            return Err(NetError::Configuration(format!(
                "GlimpseCropping层`{}`的窗口{}须大于0且小于图像高宽{:?}",
                self.name,
                self.window,
                &shape[2..]
            )));
        }
        Ok(())
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let shape = ws.shape(bottom[0]);
        let loc = ws.shape(bottom[1]);
        if loc.get(1) != Some(&2) || loc.first() != shape.first() {
            return Err(NetError::ShapeMismatch {
                expected: vec![shape.first().copied().unwrap_or(0), 2],
                got: loc,
                message: format!("GlimpseCropping层`{}`的位置输入须为(N, 2)", self.name),
            });
        }
        let channels = if self.do_downsamp { shape[1] * 2 } else { shape[1] };
        ws.reshape(top[0], &[shape[0], channels, self.window, self.window]);
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let shape = ws.shape(bottom[0]);
        let (n, c, height, width) = (shape[0], shape[1], shape[2], shape[3]);
        let w = self.window;
        let image = ws.data(bottom[0]).as_slice();
        let loc = ws.data(bottom[1]).as_slice();
        let bounds = bottom.get(2).map(|&b| ws.data(b).as_slice());
        let out_c = if self.do_downsamp { 2 * c } else { c };
        let mut glimpse = Tensor::zeros(&[n, out_c, w, w]);
        let out = glimpse.as_slice_mut();
        let at = |i: usize, ch: usize, y: usize, x: usize| ((i * c + ch) * height + y) * width + x;

        for i in 0..n {
            let (h, wd) = match bounds {
                Some(b) => (b[2 * i] as usize, b[2 * i + 1] as usize),
                None => (height, width),
            };
            if h > height || wd > width {
                return Err(NetError::Data(format!(
                    "GlimpseCropping层`{}`：第{}项的嵌入边界({}, {})超出图像({}, {})",
                    self.name, i, h, wd, height, width
                )));
            }
            let y0 = self.origin(loc[2 * i], h, w)?;
            let x0 = self.origin(loc[2 * i + 1], wd, w)?;
            let ds = if self.do_downsamp {
                Some((self.origin(loc[2 * i], h, 2 * w)?, self.origin(loc[2 * i + 1], wd, 2 * w)?))
            } else {
                None
            };
            for ch in 0..c {
                for y in 0..w {
                    for x in 0..w {
                        out[((i * out_c + ch) * w + y) * w + x] = image[at(i, ch, y0 + y, x0 + x)];
                        if let Some((dy, dx)) = ds {
                            let (yy, xx) = (dy + 2 * y, dx + 2 * x);
                            let mean = (image[at(i, ch, yy, xx)]
                                + image[at(i, ch, yy, xx + 1)]
                                + image[at(i, ch, yy + 1, xx)]
                                + image[at(i, ch, yy + 1, xx + 1)])
                                / 4.0;
                            out[((i * out_c + ch + c) * w + y) * w + x] = mean;
                        }
                    }
                }
            }
        }
        ws.set_data(top[0], &glimpse);
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
