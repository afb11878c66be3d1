use tracing::info;

use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::context::NetContext;
use crate::nn::descriptor::{AdversarialPairParam, LayerDescriptor, LayerKind, NetState, SubnetParam};
use crate::nn::layer::composite::SubnetLayer;
use crate::nn::layer::{Layer, ParamBlob};
use crate::nn::net::Net;

/// 对抗训练的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdversarialPhase {
    /// 训练生成器（subnet1），判别器梯度算完即丢弃
    TrainSubnet1,
    /// 训练判别器（subnet2），不反向到生成器
    TrainSubnet2,
}

/// 对抗子网对：subnet1生成样本，subnet2对其打分
///
/// top依次为N_gen个生成结果、生成数据的得分、真实数据的得分；
/// bottom为subnet1的N_cond个条件输入，外部数据模式下再跟每个生成结果对应的一份真实数据。
/// 没有外部数据时真实数据得分恒为0（形状同生成数据得分）。
/// 两个子网的反向都在前向里完成，本层的反向只负责（可选地）翻转生成器梯度并推进阶段
#[derive(Debug)]
pub struct AdversarialSubnetPairLayer {
    name: String,
    param: AdversarialPairParam,
    ctx: NetContext,
    state: NetState,
    bottom_names: Vec<String>,
    top_names: Vec<String>,
    subnet1: Option<SubnetLayer>,
    subnet2: Option<SubnetLayer>,
    phase: AdversarialPhase,
    pass_counter: usize,
    num_conditioning: usize,
    num_generated: usize,
    is_real: Option<BlobId>,
    is_not_real: Option<BlobId>,
    params: Vec<ParamBlob>,
    intermediates: Vec<(String, BlobId)>,
}

impl AdversarialSubnetPairLayer {
    pub fn new(
        desc: &LayerDescriptor,
        param: AdversarialPairParam,
        ctx: &NetContext,
        state: &NetState,
    ) -> Self {
        Self {
            name: desc.name.clone(),
            param,
            ctx: ctx.clone(),
            state: state.clone(),
            bottom_names: desc.declared_bottom().to_vec(),
            top_names: desc.top.clone(),
            subnet1: None,
            subnet2: None,
            phase: AdversarialPhase::TrainSubnet1,
            pass_counter: 0,
            num_conditioning: 0,
            num_generated: 0,
            is_real: None,
            is_not_real: None,
            params: Vec::new(),
            intermediates: Vec::new(),
        }
    }

    pub fn phase(&self) -> AdversarialPhase {
        self.phase
    }

    /// 当前阶段已完成的反向次数
    pub fn pass_counter(&self) -> usize {
        self.pass_counter
    }

    fn not_ready(&self) -> NetError {
        NetError::Configuration(format!("对抗子网对`{}`尚未setup", self.name))
    }

    pub fn subnet1(&self) -> Result<&SubnetLayer, NetError> {
        self.subnet1.as_ref().ok_or_else(|| self.not_ready())
    }

    pub fn subnet2(&self) -> Result<&SubnetLayer, NetError> {
        self.subnet2.as_ref().ok_or_else(|| self.not_ready())
    }

    /// “真实”与“非真实”标签缓冲
    fn labels(&self) -> Result<(BlobId, BlobId), NetError> {
        match (self.is_real, self.is_not_real) {
            (Some(real), Some(fake)) => Ok((real, fake)),
            _ => Err(self.not_ready()),
        }
    }

    fn subnet_pair_mut(&mut self) -> Result<(&mut SubnetLayer, &mut SubnetLayer), NetError> {
        match (self.subnet1.as_mut(), self.subnet2.as_mut()) {
            (Some(s1), Some(s2)) => Ok((s1, s2)),
            _ => Err(NetError::Configuration(format!(
                "对抗子网对`{}`尚未setup",
                self.name
            ))),
        }
    }

    /// 生成器描述中Input层的top数即条件输入数
    fn count_conditioning_inputs(&self) -> Result<usize, NetError> {
        let desc = self.ctx.descriptors().load(&self.param.subnet1)?.filtered(&self.state);
        Ok(match desc.layers.first() {
            Some(first) if matches!(first.kind, LayerKind::Input(_)) => first.top.len(),
            _ => 0,
        })
    }

    /// 判别器在生成数据上的输入；外部数据模式下追加“非真实”标签
    fn generated_bottoms(&self, top: &[BlobId], is_not_real: BlobId) -> Vec<BlobId> {
        let mut ids = top[..self.num_generated].to_vec();
        if self.param.external_data {
            ids.push(is_not_real);
        }
        ids
    }

    /// 判别器在真实数据上的输入
    fn real_bottoms(&self, bottom: &[BlobId], is_real: BlobId) -> Vec<BlobId> {
        let mut ids = bottom[self.num_conditioning..].to_vec();
        ids.push(is_real);
        ids
    }

    fn build_subnet(&self, suffix: &str, net_file: &str, bottom: &[String], top: &[String]) -> SubnetLayer {
        let param = SubnetParam::new(net_file);
        let desc = LayerDescriptor::new(
            &format!("{}_{}", self.name, suffix),
            LayerKind::Subnet(param.clone()),
            &bottom.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            &top.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        );
        SubnetLayer::new(&desc, param, &self.ctx, &self.state)
    }

    fn advance_phase(&mut self) {
        self.pass_counter += 1;
        let switch = match self.phase {
            AdversarialPhase::TrainSubnet1 => self.pass_counter >= self.param.subnet2_k,
            AdversarialPhase::TrainSubnet2 => self.pass_counter >= 1,
        };
        if switch {
            self.phase = match self.phase {
                AdversarialPhase::TrainSubnet1 => AdversarialPhase::TrainSubnet2,
                AdversarialPhase::TrainSubnet2 => AdversarialPhase::TrainSubnet1,
            };
            self.pass_counter = 0;
            info!(layer = %self.name, phase = ?self.phase, "对抗训练切换阶段");
        }
    }
}

impl Layer for AdversarialSubnetPairLayer {
    fn layer_type(&self) -> &'static str {
        "AdversarialSubnetPair"
    }

    fn setup(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let Some(num_generated) = top.len().checked_sub(2) else {
            return Err(NetError::Configuration(format!(
                "对抗子网对`{}`至少要有2个top（两个得分），实际为{}",
                self.name,
                top.len()
            )));
        };
        self.num_generated = num_generated;
        self.num_conditioning = self.count_conditioning_inputs()?;
        let expected_bottoms = if self.param.external_data {
            self.num_conditioning + num_generated
        } else {
            self.num_conditioning
        };
        if bottom.len() != expected_bottoms {
            return Err(NetError::Configuration(format!(
                "对抗子网对`{}`应有{}个bottom（{}个条件输入{}），实际为{}",
                self.name,
                expected_bottoms,
                self.num_conditioning,
                if self.param.external_data { "加每个生成结果一份真实数据" } else { "" },
                bottom.len()
            )));
        }
        if let Some(&first) = bottom.first() {
            let batch = ws.shape(first).first().copied().unwrap_or(1);
            for &b in &bottom[1..] {
                let shape = ws.shape(b);
                if shape.first().copied().unwrap_or(1) != batch {
                    return Err(NetError::ShapeMismatch {
                        expected: vec![batch],
                        got: shape,
                        message: format!("对抗子网对`{}`的各bottom第0维须一致", self.name),
                    });
                }
            }
        }

        let cond_names = self.bottom_names[..self.num_conditioning].to_vec();
        let gen_names = self.top_names[..num_generated].to_vec();
        let mut subnet1 = self.build_subnet("subnet1", &self.param.subnet1, &cond_names, &gen_names);
        subnet1.setup(ws, &bottom[..self.num_conditioning], &top[..num_generated])?;
        subnet1.reshape(ws, &bottom[..self.num_conditioning], &top[..num_generated])?;

        let batch = match (bottom.first(), top.first()) {
            (Some(&b), _) => ws.shape(b).first().copied().unwrap_or(1),
            (None, Some(&t)) if num_generated > 0 => ws.shape(t).first().copied().unwrap_or(1),
            _ => 1,
        };
        let is_real = ws.alloc(&[batch, 1]);
        ws.data_mut(is_real).fill(1.0);
        let is_not_real = ws.alloc(&[batch, 1]);

        let mut disc_names = gen_names.clone();
        if self.param.external_data {
            disc_names.push(format!("{}_is_real_data", self.name));
        }
        let mut subnet2 =
            self.build_subnet("subnet2", &self.param.subnet2, &disc_names, &["loss".to_string()]);
        let generated = self.generated_bottoms(top, is_not_real);
        subnet2.setup(ws, &generated, &[top[num_generated]])?;
        subnet2.reshape(ws, &generated, &[top[num_generated]])?;
        if self.param.external_data {
            let real = self.real_bottoms(bottom, is_real);
            subnet2.reshape(ws, &real, &[top[num_generated + 1]])?;
        } else {
            ws.reshape_like(top[num_generated + 1], top[num_generated]);
        }

        self.params = subnet1
            .params()
            .into_iter()
            .map(|p| ParamBlob {
                name: format!("{}::subnet1::{}", self.name, p.name),
                ..p
            })
            .chain(subnet2.params().into_iter().map(|p| ParamBlob {
                name: format!("{}::subnet2::{}", self.name, p.name),
                ..p
            }))
            .collect();
        self.intermediates = subnet1
            .intermediates()
            .into_iter()
            .chain(subnet2.intermediates())
            .collect();

        self.subnet1 = Some(subnet1);
        self.subnet2 = Some(subnet2);
        self.is_real = Some(is_real);
        self.is_not_real = Some(is_not_real);
        self.phase = AdversarialPhase::TrainSubnet1;
        self.pass_counter = 0;
        info!(
            layer = %self.name,
            conditioning = self.num_conditioning,
            generated = num_generated,
            external = self.param.external_data,
            k = self.param.subnet2_k,
            "对抗子网对setup完成"
        );
        Ok(())
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let (n_cond, n_gen, external) = (
            self.num_conditioning,
            self.num_generated,
            self.param.external_data,
        );
        let (is_real, is_not_real) = self.labels()?;
        let generated = self.generated_bottoms(top, is_not_real);
        let real = self.real_bottoms(bottom, is_real);
        let (subnet1, subnet2) = self.subnet_pair_mut()?;
        subnet1.reshape(ws, &bottom[..n_cond], &top[..n_gen])?;
        subnet2.reshape(ws, &generated, &[top[n_gen]])?;
        if external {
            subnet2.reshape(ws, &real, &[top[n_gen + 1]])?;
        } else {
            ws.reshape_like(top[n_gen + 1], top[n_gen]);
        }
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let (n_cond, n_gen, external, phase) = (
            self.num_conditioning,
            self.num_generated,
            self.param.external_data,
            self.phase,
        );
        let (is_real, is_not_real) = self.labels()?;
        let generated = self.generated_bottoms(top, is_not_real);
        let real = self.real_bottoms(bottom, is_real);
        let gen_down = vec![true; generated.len()];
        let (subnet1, subnet2) = self.subnet_pair_mut()?;

        subnet1.forward(ws, &bottom[..n_cond], &top[..n_gen])?;
        subnet2.forward(ws, &generated, &[top[n_gen]])?;
        subnet2.backward(ws, &[top[n_gen]], &gen_down, &generated)?;

        match phase {
            AdversarialPhase::TrainSubnet1 => {
                let cond_down = vec![true; n_cond];
                subnet1.backward(ws, &top[..n_gen], &cond_down, &bottom[..n_cond])?;
                subnet2.net_mut()?.for_each_net_mut(&mut |net| {
                    net.clear_param_diffs(ws);
                    Ok(())
                })?;
            }
            AdversarialPhase::TrainSubnet2 if external => {
                // 与生成数据上的梯度累加
                let real_down = vec![true; real.len()];
                subnet2.forward(ws, &real, &[top[n_gen + 1]])?;
                subnet2.backward(ws, &[top[n_gen + 1]], &real_down, &real)?;
            }
            AdversarialPhase::TrainSubnet2 => {}
        }
        if !external {
            ws.zero_data(top[n_gen + 1]);
        }
        Ok(())
    }

    fn backward(
        &mut self,
        ws: &mut Workspace,
        _top: &[BlobId],
        _propagate_down: &[bool],
        _bottom: &[BlobId],
    ) -> Result<(), NetError> {
        if self.phase == AdversarialPhase::TrainSubnet1 && self.param.reverse_subnet1_gradient {
            for p in self.subnet1()?.params() {
                ws.diff_mut(p.blob).scale(-1.0);
            }
        }
        self.advance_phase();
        Ok(())
    }

    fn params(&self) -> Vec<ParamBlob> {
        self.params.clone()
    }

    fn intermediates(&self) -> Vec<(String, BlobId)> {
        self.intermediates.clone()
    }

    fn subnets(&self) -> Vec<&Net> {
        self.subnet1
            .iter()
            .chain(self.subnet2.iter())
            .flat_map(|s| s.subnets())
            .collect()
    }

    fn subnets_mut(&mut self) -> Vec<&mut Net> {
        self.subnet1
            .iter_mut()
            .chain(self.subnet2.iter_mut())
            .flat_map(|s| s.subnets_mut())
            .collect()
    }
}
