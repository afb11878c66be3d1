use tracing::debug;

use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::context::NetContext;
use crate::nn::descriptor::{LayerDescriptor, LayerKind, NetState, SubnetParam, VaeParam};
use crate::nn::layer::composite::SubnetLayer;
use crate::nn::layer::{EltwiseLayer, Layer, ParamBlob, SplitLayer, check_blob_count};
use crate::nn::net::Net;

/// VAE内部各部件与缓冲
#[derive(Debug)]
struct VaeParts {
    encoder: SubnetLayer,
    decoder: SubnetLayer,
    latent_split: SplitLayer,
    x_split: SplitLayer,
    loss_combination: EltwiseLayer,
    encoder_loss: BlobId,
    encoder_sample: BlobId,
    decoder_loss: BlobId,
    /// 送入解码器的隐变量副本
    decoder_latent: BlobId,
    /// X分给编码器、解码器的两路
    x_encoder: BlobId,
    x_decoder: BlobId,
}

/// 变分自编码器层：编码器子网产生损失与隐变量采样，解码器子网以隐变量和原始数据为输入
/// 产生重构损失（及可选的重构样本），两项损失按`[w, 1]`加权求和作为top[0]
///
/// 编码-解码模式：bottom为`[X]`，top为`[loss, 隐变量采样, (重构)]`。
/// 仅解码模式：bottom为`[latent, X]`，只跑解码器，不允许反向
#[derive(Debug)]
pub struct VaeLayer {
    name: String,
    param: VaeParam,
    ctx: NetContext,
    state: NetState,
    parts: Option<VaeParts>,
    params: Vec<ParamBlob>,
    intermediates: Vec<(String, BlobId)>,
}

impl VaeLayer {
    pub fn new(desc: &LayerDescriptor, param: VaeParam, ctx: &NetContext, state: &NetState) -> Self {
        Self {
            name: desc.name.clone(),
            param,
            ctx: ctx.clone(),
            state: state.clone(),
            parts: None,
            params: Vec::new(),
            intermediates: Vec::new(),
        }
    }

    pub fn is_decoder_only(&self) -> bool {
        self.param.decoder_only
    }

    pub fn encoder(&self) -> Result<&SubnetLayer, NetError> {
        self.parts
            .as_ref()
            .map(|p| &p.encoder)
            .ok_or_else(|| NetError::Configuration(format!("VAE层`{}`尚未setup", self.name)))
    }

    pub fn decoder(&self) -> Result<&SubnetLayer, NetError> {
        self.parts
            .as_ref()
            .map(|p| &p.decoder)
            .ok_or_else(|| NetError::Configuration(format!("VAE层`{}`尚未setup", self.name)))
    }

    fn parts_mut(&mut self) -> Result<&mut VaeParts, NetError> {
        match self.parts.as_mut() {
            Some(parts) => Ok(parts),
            None => Err(NetError::Configuration(format!("VAE层`{}`尚未setup", self.name))),
        }
    }

    fn build_subnet(&self, suffix: &str, net_file: &str, bottom: &[&str], top: &[&str]) -> SubnetLayer {
        let param = SubnetParam::new(net_file);
        let desc = LayerDescriptor::new(
            &format!("{}_{}", self.name, suffix),
            LayerKind::Subnet(param.clone()),
            bottom,
            top,
        );
        SubnetLayer::new(&desc, param, &self.ctx, &self.state)
    }
}

impl VaeParts {
    fn encoder_io(&self) -> ([BlobId; 1], [BlobId; 2]) {
        ([self.x_encoder], [self.encoder_loss, self.encoder_sample])
    }

    /// 解码器的bottom与top；`reconstruction`为可选的第3个外层top
    fn decoder_io(&self, latent: BlobId, reconstruction: Option<BlobId>) -> ([BlobId; 2], Vec<BlobId>) {
        let mut top = vec![self.decoder_loss];
        top.extend(reconstruction);
        ([latent, self.x_decoder], top)
    }

    fn loss_bottoms(&self) -> [BlobId; 2] {
        [self.encoder_loss, self.decoder_loss]
    }
}

impl Layer for VaeLayer {
    fn layer_type(&self) -> &'static str {
        "VAE"
    }

    fn setup(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let decoder_only = self.param.decoder_only;
        let n_bottom = if decoder_only { 2 } else { 1 };
        check_blob_count(&self.name, "bottom", bottom.len(), n_bottom, n_bottom)?;
        check_blob_count(&self.name, "top", top.len(), 2, 3)?;
        let x = bottom[n_bottom - 1];
        let reconstruction = top.get(2).copied();

        // X分成两路
        let x_encoder = ws.alloc_empty();
        let x_decoder = ws.alloc_empty();
        let mut x_split = SplitLayer::named(&format!("{}_x_split", self.name));
        x_split.setup(ws, &[x], &[x_encoder, x_decoder])?;
        x_split.reshape(ws, &[x], &[x_encoder, x_decoder])?;

        let encoder_loss = ws.alloc_empty();
        let encoder_sample = ws.alloc_empty();
        let mut encoder = self.build_subnet("encoder", &self.param.encoder, &["X"], &["loss", "sample"]);
        encoder.setup(ws, &[x_encoder], &[encoder_loss, encoder_sample])?;
        encoder.reshape(ws, &[x_encoder], &[encoder_loss, encoder_sample])?;

        let decoder_latent = ws.alloc_empty();
        let mut latent_split = SplitLayer::named(&format!("{}_encsample_split", self.name));
        if !decoder_only {
            latent_split.setup(ws, &[encoder_sample], &[top[1], decoder_latent])?;
            latent_split.reshape(ws, &[encoder_sample], &[top[1], decoder_latent])?;
        }

        let decoder_loss = ws.alloc_empty();
        let latent = if decoder_only { bottom[0] } else { decoder_latent };
        let mut decoder_top = vec![decoder_loss];
        decoder_top.extend(reconstruction);
        let decoder_top_names: &[&str] = if reconstruction.is_some() {
            &["loss", "sample"]
        } else {
            &["loss"]
        };
        let mut decoder = self.build_subnet("decoder", &self.param.decoder, &["latent", "X"], decoder_top_names);
        decoder.setup(ws, &[latent, x_decoder], &decoder_top)?;
        decoder.reshape(ws, &[latent, x_decoder], &decoder_top)?;
        if decoder_only {
            ws.reshape_like(top[1], bottom[0]);
            ws.reshape_like(encoder_loss, decoder_loss);
        }

        let mut loss_combination = EltwiseLayer::weighted_sum(
            &format!("{}_loss_combination", self.name),
            vec![self.param.encoder_loss_weight, 1.0],
        );
        loss_combination.setup(ws, &[encoder_loss, decoder_loss], &[top[0]])?;
        loss_combination.reshape(ws, &[encoder_loss, decoder_loss], &[top[0]])?;

        self.params = encoder
            .params()
            .into_iter()
            .map(|p| ParamBlob {
                name: format!("{}::encoder::{}", self.name, p.name),
                ..p
            })
            .chain(decoder.params().into_iter().map(|p| ParamBlob {
                name: format!("{}::decoder::{}", self.name, p.name),
                ..p
            }))
            .collect();
        self.intermediates = encoder
            .intermediates()
            .into_iter()
            .chain(decoder.intermediates())
            .collect();
        self.parts = Some(VaeParts {
            encoder,
            decoder,
            latent_split,
            x_split,
            loss_combination,
            encoder_loss,
            encoder_sample,
            decoder_loss,
            decoder_latent,
            x_encoder,
            x_decoder,
        });
        debug!(
            layer = %self.name,
            decoder_only,
            encoder_loss_weight = self.param.encoder_loss_weight,
            params = self.params.len(),
            "VAE层setup完成"
        );
        Ok(())
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let decoder_only = self.param.decoder_only;
        let x = bottom[bottom.len() - 1];
        let reconstruction = top.get(2).copied();
        let parts = self.parts_mut()?;

        parts.x_split.reshape(ws, &[x], &[parts.x_encoder, parts.x_decoder])?;
        let (enc_bottom, enc_top) = parts.encoder_io();
        parts.encoder.reshape(ws, &enc_bottom, &enc_top)?;
        let latent = if decoder_only {
            bottom[0]
        } else {
            parts
                .latent_split
                .reshape(ws, &[parts.encoder_sample], &[top[1], parts.decoder_latent])?;
            parts.decoder_latent
        };
        let (dec_bottom, dec_top) = parts.decoder_io(latent, reconstruction);
        parts.decoder.reshape(ws, &dec_bottom, &dec_top)?;
        if decoder_only {
            ws.reshape_like(top[1], bottom[0]);
            ws.reshape_like(parts.encoder_loss, parts.decoder_loss);
        }
        let losses = parts.loss_bottoms();
        parts.loss_combination.reshape(ws, &losses, &[top[0]])
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let decoder_only = self.param.decoder_only;
        let x = bottom[bottom.len() - 1];
        let reconstruction = top.get(2).copied();
        let parts = self.parts_mut()?;

        parts.x_split.forward(ws, &[x], &[parts.x_encoder, parts.x_decoder])?;
        let latent = if decoder_only {
            ws.copy_data(bottom[0], top[1]);
            ws.zero_data(parts.encoder_loss);
            bottom[0]
        } else {
            let (enc_bottom, enc_top) = parts.encoder_io();
            parts.encoder.forward(ws, &enc_bottom, &enc_top)?;
            parts
                .latent_split
                .forward(ws, &[parts.encoder_sample], &[top[1], parts.decoder_latent])?;
            parts.decoder_latent
        };
        let (dec_bottom, dec_top) = parts.decoder_io(latent, reconstruction);
        parts.decoder.forward(ws, &dec_bottom, &dec_top)?;
        let losses = parts.loss_bottoms();
        parts.loss_combination.forward(ws, &losses, &[top[0]])
    }

    fn backward(
        &mut self,
        ws: &mut Workspace,
        top: &[BlobId],
        _propagate_down: &[bool],
        bottom: &[BlobId],
    ) -> Result<(), NetError> {
        if self.param.decoder_only {
            return Err(NetError::ModeViolation(format!(
                "VAE层`{}`处于仅解码模式，不能反向传播",
                self.name
            )));
        }
        let reconstruction = top.get(2).copied();
        let parts = self.parts_mut()?;

        let losses = parts.loss_bottoms();
        parts.loss_combination.backward(ws, &[top[0]], &[true, true], &losses)?;
        let (dec_bottom, dec_top) = parts.decoder_io(parts.decoder_latent, reconstruction);
        parts.decoder.backward(ws, &dec_top, &[true, true], &dec_bottom)?;
        parts
            .latent_split
            .backward(ws, &[top[1], parts.decoder_latent], &[true], &[parts.encoder_sample])?;
        let (enc_bottom, enc_top) = parts.encoder_io();
        parts.encoder.backward(ws, &enc_top, &[true], &enc_bottom)?;
        parts
            .x_split
            .backward(ws, &[parts.x_encoder, parts.x_decoder], &[true], &[bottom[0]])
    }

    fn params(&self) -> Vec<ParamBlob> {
        self.params.clone()
    }

    fn intermediates(&self) -> Vec<(String, BlobId)> {
        self.intermediates.clone()
    }

    fn subnets(&self) -> Vec<&Net> {
        match &self.parts {
            Some(parts) => {
                let mut nets = parts.encoder.subnets();
                nets.extend(parts.decoder.subnets());
                nets
            }
            None => Vec::new(),
        }
    }

    fn subnets_mut(&mut self) -> Vec<&mut Net> {
        match &mut self.parts {
            Some(parts) => {
                let mut nets = parts.encoder.subnets_mut();
                nets.extend(parts.decoder.subnets_mut());
                nets
            }
            None => Vec::new(),
        }
    }
}
