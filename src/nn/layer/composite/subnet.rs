use tracing::{debug, info};

use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::context::NetContext;
use crate::nn::descriptor::{
    BackwardMode, ForwardMode, InputParam, LayerDescriptor, LayerKind, NetDescriptor, NetState,
    ReductionParam, SubnetParam,
};
use crate::nn::layer::composite::subnet_state;
use crate::nn::layer::{Layer, ParamBlob};
use crate::nn::net::Net;
use crate::nn::snapshot::ParamSnapshot;

/// 子网层：把一份独立的网络描述嵌入为外层网络中的一个节点
///
/// 子网的层名统一加上`<本层名>::`前缀。每个top对应追加一个伪损失层
/// （Reduction，损失权重1），反向只从伪损失之前的最后一层开始，伪损失本身从不反向。
///
/// 前向/反向是否执行由阶段计数器和`forward_mode`/`backward_mode`共同决定；
/// 判定使用推进前的计数值，即使本次被跳过计数器也照常推进
#[derive(Debug)]
pub struct SubnetLayer {
    name: String,
    param: SubnetParam,
    ctx: NetContext,
    state: NetState,
    bottom_names: Vec<String>,
    top_names: Vec<String>,
    shared: Vec<bool>,
    net: Option<Net>,
    last_layer_index: usize,
    params: Vec<ParamBlob>,
    intermediates: Vec<(String, BlobId)>,
}

fn pseudo_loss_name(top: &str) -> String {
    format!("{}_pseudoloss", top)
}

impl SubnetLayer {
    pub fn new(desc: &LayerDescriptor, param: SubnetParam, ctx: &NetContext, state: &NetState) -> Self {
        Self {
            name: desc.name.clone(),
            param,
            ctx: ctx.clone(),
            state: state.clone(),
            bottom_names: desc.declared_bottom().to_vec(),
            top_names: desc.top.clone(),
            shared: Vec::new(),
            net: None,
            last_layer_index: 0,
            params: Vec::new(),
            intermediates: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn not_ready(&self) -> NetError {
        NetError::Configuration(format!("子网层`{}`尚未setup", self.name))
    }

    /// 内嵌的子网
    pub fn net(&self) -> Result<&Net, NetError> {
        self.net.as_ref().ok_or_else(|| self.not_ready())
    }

    pub fn net_mut(&mut self) -> Result<&mut Net, NetError> {
        match self.net.as_mut() {
            Some(net) => Ok(net),
            None => Err(NetError::Configuration(format!("子网层`{}`尚未setup", self.name))),
        }
    }

    /// 伪损失层之前最后一个真实层的下标
    pub fn last_layer_index(&self) -> usize {
        self.last_layer_index
    }

    /// 本层阶段计数器的当前值；未启用计数时为None
    pub fn phase_counter_value(&self) -> Option<i32> {
        self.ctx.phase_counters().get(self.param.phase_counter_index)
    }

    pub fn is_shared_input(&self, index: usize) -> bool {
        self.shared.get(index).copied().unwrap_or(false)
    }

    /// 计数器启用且有正的归零阈值时推进一次
    fn advance_counter(&self) {
        if self.param.phase_counter_reset > 0 {
            self.ctx
                .phase_counters()
                .advance(self.param.phase_counter_index, self.param.phase_counter_reset);
        }
    }

    fn should_forward(&self, counter: Option<i32>) -> bool {
        match (self.param.forward_mode, counter) {
            (ForwardMode::Never, _) => false,
            (ForwardMode::OnlyIfCounterZero, Some(c)) => c == 0,
            (ForwardMode::OnlyIfCounterNonzero, Some(c)) => c != 0,
            _ => true,
        }
    }

    fn should_backward(&self, counter: Option<i32>) -> bool {
        match (self.param.backward_mode, counter) {
            (BackwardMode::Never, _) => false,
            (BackwardMode::OnlyIfCounterZero, Some(c)) => c == 0,
            (BackwardMode::OnlyIfCounterNonzero, Some(c)) => c != 0,
            _ => true,
        }
    }

    /// 加载描述、核对Input层、追加伪损失并给层名加前缀
    fn build_descriptor(
        &self,
        ws: &Workspace,
        bottom: &[BlobId],
        state: &NetState,
    ) -> Result<NetDescriptor, NetError> {
        let mut desc = self.ctx.descriptors().load(&self.param.net_file)?.filtered(state);

        if !bottom.is_empty() {
            let Some(first) = desc.layers.first_mut() else {
                return Err(NetError::Configuration(format!(
                    "子网层`{}`有输入，但子网`{}`没有任何层",
                    self.name, self.param.net_file
                )));
            };
            match &first.kind {
                LayerKind::Input(p) if p.shape.is_empty() => {}
                LayerKind::Input(_) => {
                    return Err(NetError::Configuration(format!(
                        "子网层`{}`：子网的Input层不得写死形状，形状由外层输入决定",
                        self.name
                    )));
                }
                _ => {
                    return Err(NetError::Configuration(format!(
                        "子网层`{}`有输入，子网的第一层须为Input，实际为`{}`",
                        self.name,
                        first.type_name()
                    )));
                }
            }
            if first.top != self.bottom_names {
                return Err(NetError::Configuration(format!(
                    "子网层`{}`：子网Input层的输出{:?}须与本层的输入{:?}一致",
                    self.name, first.top, self.bottom_names
                )));
            }
            first.kind = LayerKind::Input(InputParam {
                shape: bottom.iter().map(|&b| ws.shape(b)).collect(),
            });
        }

        for top in &self.top_names {
            let loss = pseudo_loss_name(top);
            desc.layers.push(
                LayerDescriptor::new(
                    &loss,
                    LayerKind::Reduction(ReductionParam::default()),
                    &[top.as_str()],
                    &[loss.as_str()],
                )
                .with_loss_weight(&[1.0]),
            );
        }

        for layer in &mut desc.layers {
            layer.name = format!("{}::{}", self.name, layer.name);
        }
        Ok(desc)
    }

    /// 子网中第`index`个输入的当前存储；共享输入先重新设为外层bottom的别名
    fn bind_inputs(&mut self, ws: &mut Workspace, bottom: &[BlobId]) -> Result<Vec<BlobId>, NetError> {
        let shared = self.shared.clone();
        let names = self.bottom_names.clone();
        let net = self.net_mut()?;
        let mut inputs = Vec::with_capacity(bottom.len());
        for (i, &b) in bottom.iter().enumerate() {
            let slot = net.blob_slot_index(&names[i]).ok_or_else(|| NetError::NameResolution {
                name: names[i].clone(),
                context: format!("子网`{}`", net.name()),
            })?;
            if shared[i] {
                net.alias_blob(ws, slot, b);
            }
            inputs.push(net.blob_slot(slot).resolve());
        }
        Ok(inputs)
    }

    fn outputs(&self) -> Result<Vec<BlobId>, NetError> {
        let net = self.net()?;
        self.top_names.iter().map(|t| net.blob_by_name(t)).collect()
    }

    /// 反向时接收外层梯度的存储：优先用伪损失层实际读取的（可能是Split改名后的）blob
    fn output_grad_targets(&self) -> Result<Vec<BlobId>, NetError> {
        let net = self.net()?;
        self.top_names
            .iter()
            .enumerate()
            .map(|(i, top)| {
                let loss_index = self.last_layer_index + 1 + i;
                let fed = net
                    .layer_bottom_names(loss_index)
                    .first()
                    .map(|s| s.to_string())
                    .filter(|n| net.has_blob(n));
                match fed {
                    Some(name) => net.blob_by_name(&name),
                    None => net.blob_by_name(top),
                }
            })
            .collect()
    }

    fn collect_published(&mut self) -> Result<(), NetError> {
        let net = self.net()?;
        let params = net.learnable_params().into_iter().cloned().collect::<Vec<_>>();
        let mut intermediates = net
            .blob_names()
            .iter()
            .zip(net.owned_blob_ids())
            .map(|(blob, id)| (format!("{}::{}", self.name, blob), id))
            .collect::<Vec<_>>();
        intermediates.extend(net.layer_intermediates());
        self.params = params;
        self.intermediates = intermediates;
        Ok(())
    }
}

impl Layer for SubnetLayer {
    fn layer_type(&self) -> &'static str {
        "Subnet"
    }

    fn setup(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        self.shared = match self.param.shared_inputs.len() {
            0 => vec![false; bottom.len()],
            n if n == bottom.len() => self.param.shared_inputs.clone(),
            n => {
                return Err(NetError::Configuration(format!(
                    "子网层`{}`有{}个输入，shared_inputs却给了{}项",
                    self.name,
                    bottom.len(),
                    n
                )));
            }
        };
        if bottom.len() != self.bottom_names.len() || top.len() != self.top_names.len() {
            return Err(NetError::Configuration(format!(
                "子网层`{}`的bottom/top数目与描述不符",
                self.name
            )));
        }
        if self.param.phase_counter_index >= 0 {
            self.ctx.phase_counters().register(self.param.phase_counter_index);
        }

        let state = subnet_state(
            &self.state,
            self.param.force_test_phase,
            self.param.stage.as_deref(),
        );
        let desc = self.build_descriptor(ws, bottom, &state)?;
        let mut net = Net::new(&desc, ws, &self.ctx, state)?;
        net.set_debug_info(self.param.debug_info);

        if let Some(path) = &self.param.pretrained_constants {
            let snapshot = ParamSnapshot::load(path)?
                .rebased(self.param.strip_pretrained_constants_prefix.as_deref(), &self.name);
            net.copy_trained_layers_from(ws, &snapshot)?;
            info!(layer = %self.name, path = %path, "已载入预训练参数");
        }

        let names = net.layer_names();
        let Some(last) = names.len().checked_sub(1 + self.top_names.len()) else {
            return Err(NetError::Configuration(format!(
                "子网层`{}`的子网层数不足",
                self.name
            )));
        };
        for (j, top_name) in self.top_names.iter().enumerate() {
            let expected = format!("{}::{}", self.name, pseudo_loss_name(top_name));
            if names[names.len() - self.top_names.len() + j] != expected {
                return Err(NetError::Configuration(format!(
                    "子网层`{}`的子网末尾应为伪损失层`{}`",
                    self.name, expected
                )));
            }
        }
        self.last_layer_index = last;
        self.net = Some(net);

        // 名称解析：任一输入/输出找不到即失败
        self.bind_inputs(ws, bottom)?;
        let outputs = self.outputs()?;

        self.net_mut()?.reshape(ws)?;
        self.collect_published()?;
        for (&out, &t) in outputs.iter().zip(top) {
            ws.reshape_like(t, out);
        }
        for out in self.output_grad_targets()? {
            ws.zero_diff(out);
        }
        info!(
            layer = %self.name,
            params = self.params.len(),
            last_layer = self.last_layer_index,
            "子网层setup完成，已向外层发布参数"
        );
        Ok(())
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let inputs = self.bind_inputs(ws, bottom)?;
        for (i, (&b, &input)) in bottom.iter().zip(&inputs).enumerate() {
            if !self.is_shared_input(i) {
                ws.reshape_like(input, b);
            }
        }
        self.net_mut()?.reshape(ws)?;
        for (&out, &t) in self.outputs()?.iter().zip(top) {
            ws.reshape_like(t, out);
        }
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let counter = self.phase_counter_value();
        let run = self.should_forward(counter);
        if self.param.increment_on_forward {
            self.advance_counter();
        }
        debug!(
            layer = %self.name,
            counter = ?counter,
            mode = ?self.param.forward_mode,
            run,
            "子网前向门控"
        );
        if !run {
            return Ok(());
        }

        let inputs = self.bind_inputs(ws, bottom)?;
        for id in self.net()?.blob_ids() {
            ws.zero_diff(id);
        }
        for (i, (&b, &input)) in bottom.iter().zip(&inputs).enumerate() {
            if !self.is_shared_input(i) {
                ws.copy_data(b, input);
            }
        }
        self.net_mut()?.forward(ws)?;
        for (&out, &t) in self.outputs()?.iter().zip(top) {
            ws.copy_data(out, t);
        }
        Ok(())
    }

    fn backward(
        &mut self,
        ws: &mut Workspace,
        top: &[BlobId],
        propagate_down: &[bool],
        bottom: &[BlobId],
    ) -> Result<(), NetError> {
        let counter = self.phase_counter_value();
        let run = self.should_backward(counter);
        if !self.param.increment_on_forward {
            self.advance_counter();
        }
        debug!(
            layer = %self.name,
            counter = ?counter,
            mode = ?self.param.backward_mode,
            run,
            "子网反向门控"
        );
        if !run {
            return Ok(());
        }

        let inputs = self.bind_inputs(ws, bottom)?;
        for (&t, out) in top.iter().zip(self.output_grad_targets()?) {
            ws.copy_diff(t, out);
            ws.copy_data(t, out);
        }
        let start = self.last_layer_index;
        self.net_mut()?.backward_from(ws, start)?;
        for (i, (&b, &input)) in bottom.iter().zip(&inputs).enumerate() {
            if !self.is_shared_input(i) && propagate_down.get(i).copied().unwrap_or(true) {
                ws.copy_diff(input, b);
                ws.copy_data(input, b);
            }
        }

        let zero_params = match (self.param.backward_mode, self.phase_counter_value()) {
            (BackwardMode::ZeroParamDiffsIfCounterNonzero, Some(c)) => c > 0,
            (BackwardMode::ZeroParamDiffsIfCounterZero, Some(c)) => c == 0,
            _ => false,
        };
        if zero_params {
            debug!(layer = %self.name, "按计数器清零子网参数梯度");
            for p in &self.params {
                ws.zero_diff(p.blob);
            }
        }
        Ok(())
    }

    fn params(&self) -> Vec<ParamBlob> {
        self.params.clone()
    }

    fn intermediates(&self) -> Vec<(String, BlobId)> {
        self.intermediates.clone()
    }

    fn subnets(&self) -> Vec<&Net> {
        self.net.iter().collect()
    }

    fn subnets_mut(&mut self) -> Vec<&mut Net> {
        self.net.iter_mut().collect()
    }
}
