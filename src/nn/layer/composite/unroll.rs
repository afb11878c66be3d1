use tracing::debug;

use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::context::NetContext;
use crate::nn::descriptor::{LayerDescriptor, LayerKind, NetState, SubnetParam, UnrollParam};
use crate::nn::layer::composite::{SubnetLayer, subnet_state};
use crate::nn::layer::{ConcatLayer, Layer, ParamBlob, ReshapeLayer, SplitLayer};
use crate::nn::net::Net;
use crate::tensor::Tensor;

/// 单个时间步的缓冲与内部连线
#[derive(Debug)]
struct TimeStep {
    /// 子网各输出
    outputs: Vec<BlobId>,
    /// 每个循环输出一个Split：(供拼接, 供下一步)
    splits: Vec<SplitLayer>,
    split_tops: Vec<(BlobId, BlobId)>,
    /// 每个输出一个Reshape，追加末尾的单例时间轴
    reshapes: Vec<ReshapeLayer>,
    reshaped: Vec<BlobId>,
    /// 本步子网（及其嵌套子网）的blob表，顺序同`Net::all_nets`
    blob_tables: Vec<Vec<BlobId>>,
}

/// 时间展开层：同一个子网沿T个时间步重复执行
///
/// 前R个bottom是循环状态`<r>_in`的初值，其余bottom在每一步原样广播给子网。
/// 第t步的`<r>_out`经Split分成两路：一路作为第t+1步的`<r>_in`，一路参与拼接。
/// 每个输出（循环的或产物）都在末尾追加时间轴后沿该轴拼接成`<原形状, T>`。
/// 所有时间步共用一个子网层对象（也即一套参数），每步执行前切换其blob表
#[derive(Debug)]
pub struct UnrollLayer {
    name: String,
    param: UnrollParam,
    ctx: NetContext,
    state: NetState,
    top_names: Vec<String>,
    subnet: Option<SubnetLayer>,
    steps: Vec<TimeStep>,
    concats: Vec<ConcatLayer>,
    params: Vec<ParamBlob>,
    intermediates: Vec<(String, BlobId)>,
}

impl UnrollLayer {
    pub fn new(desc: &LayerDescriptor, param: UnrollParam, ctx: &NetContext, state: &NetState) -> Self {
        Self {
            name: desc.name.clone(),
            param,
            ctx: ctx.clone(),
            state: state.clone(),
            top_names: desc.top.clone(),
            subnet: None,
            steps: Vec::new(),
            concats: Vec::new(),
            params: Vec::new(),
            intermediates: Vec::new(),
        }
    }

    pub fn num_timesteps(&self) -> usize {
        self.param.num_timesteps
    }

    /// 各时间步共用的子网层
    pub fn subnet(&self) -> Result<&SubnetLayer, NetError> {
        self.subnet
            .as_ref()
            .ok_or_else(|| NetError::Configuration(format!("展开层`{}`尚未setup", self.name)))
    }

    fn subnet_mut(&mut self) -> Result<&mut SubnetLayer, NetError> {
        match self.subnet.as_mut() {
            Some(subnet) => Ok(subnet),
            None => Err(NetError::Configuration(format!("展开层`{}`尚未setup", self.name))),
        }
    }

    fn num_recurrent(&self) -> usize {
        self.param.recurrent_input.len()
    }

    /// 第t步子网的输入：循环状态在t=0取外层bottom，否则取上一步Split的“供下一步”输出
    fn step_bottoms(&self, t: usize, bottom: &[BlobId]) -> Vec<BlobId> {
        let r = self.num_recurrent();
        let mut ids = Vec::with_capacity(bottom.len());
        for (i, &b) in bottom.iter().enumerate() {
            if i < r && t > 0 {
                ids.push(self.steps[t - 1].split_tops[i].1);
            } else {
                ids.push(b);
            }
        }
        ids
    }

    fn install_step(&mut self, t: usize) -> Result<(), NetError> {
        let tables = &self.steps[t].blob_tables;
        match self.subnet.as_mut() {
            Some(subnet) => install_tables(subnet, tables),
            None => Err(NetError::Configuration(format!("展开层`{}`尚未setup", self.name))),
        }
    }

    /// 从子描述的Input层读出各输入名，核对循环状态在前
    fn subnet_input_names(&self) -> Result<Vec<String>, NetError> {
        let state = subnet_state(&self.state, self.param.force_test_phase, self.param.stage.as_deref());
        let desc = self.ctx.descriptors().load(&self.param.net_file)?.filtered(&state);
        let inputs = match desc.layers.first() {
            Some(first) if matches!(first.kind, LayerKind::Input(_)) => first.top.clone(),
            _ => {
                return Err(NetError::Configuration(format!(
                    "展开层`{}`：子网`{}`的第一层须为Input",
                    self.name, self.param.net_file
                )));
            }
        };
        for (i, r) in self.param.recurrent_input.iter().enumerate() {
            let expected = format!("{}_in", r);
            if inputs.get(i) != Some(&expected) {
                return Err(NetError::Configuration(format!(
                    "展开层`{}`：子网第{}个输入应为`{}`",
                    self.name, i, expected
                )));
            }
        }
        Ok(inputs)
    }

    /// 子网第k个输出的名字：先是各`<r>_out`，再是本层R之后的top名
    fn output_name(&self, k: usize) -> String {
        let r = self.num_recurrent();
        if k < r {
            format!("{}_out", self.param.recurrent_input[k])
        } else {
            self.top_names[k].clone()
        }
    }

    /// 搭建第t步的Split与Reshape；子网输出须已具有正确形状
    fn build_step_wiring(&self, ws: &mut Workspace, t: usize, step: &mut TimeStep) -> Result<(), NetError> {
        for (i, r) in self.param.recurrent_input.iter().enumerate() {
            let tops = (ws.alloc_empty(), ws.alloc_empty());
            let mut split = SplitLayer::named(&format!("{}_{}_split_{}", self.name, r, t));
            split.setup(ws, &[step.outputs[i]], &[tops.0, tops.1])?;
            split.reshape(ws, &[step.outputs[i]], &[tops.0, tops.1])?;
            step.splits.push(split);
            step.split_tops.push(tops);
        }
        for k in 0..step.outputs.len() {
            let input = self.reshape_input(step, k);
            let ndim = ws.shape(input).len();
            let mut shape = vec![0i64; ndim];
            shape.push(1);
            let out = ws.alloc_empty();
            let mut reshape =
                ReshapeLayer::with_shape(&format!("{}_{}_reshape_{}", self.name, self.output_name(k), t), shape);
            reshape.setup(ws, &[input], &[out])?;
            reshape.reshape(ws, &[input], &[out])?;
            step.reshapes.push(reshape);
            step.reshaped.push(out);
        }
        Ok(())
    }

    /// 第k个Reshape的输入：循环输出取Split的“供拼接”路，产物直接取子网输出
    fn reshape_input(&self, step: &TimeStep, k: usize) -> BlobId {
        if k < self.num_recurrent() {
            step.split_tops[k].0
        } else {
            step.outputs[k]
        }
    }

    fn concat_bottoms(&self, k: usize) -> Vec<BlobId> {
        self.steps.iter().map(|s| s.reshaped[k]).collect()
    }

    fn collect_published(&mut self) -> Result<(), NetError> {
        let subnet = self.subnet()?;
        let params = subnet.params();
        let nets = subnet.net()?.all_nets();
        let mut intermediates = Vec::new();
        for (t, step) in self.steps.iter().enumerate() {
            for (net, table) in nets.iter().zip(&step.blob_tables) {
                for (blob, &id) in net.blob_names().iter().zip(table) {
                    intermediates.push((format!("{}::{}::time_{}", net.name(), blob, t), id));
                }
            }
        }
        self.params = params;
        self.intermediates = intermediates;
        Ok(())
    }
}

/// 把一个时间步的blob表装入共用子网及其嵌套子网
fn install_tables(subnet: &mut SubnetLayer, tables: &[Vec<BlobId>]) -> Result<(), NetError> {
    let mut k = 0;
    subnet.net_mut()?.for_each_net_mut(&mut |net| {
        let ids = tables.get(k).ok_or_else(|| {
            NetError::Configuration(format!("子网`{}`的时间步blob表缺失", net.name()))
        })?;
        k += 1;
        net.reset_blobs(ids)
    })
}

impl Layer for UnrollLayer {
    fn layer_type(&self) -> &'static str {
        "Unroll"
    }

    fn setup(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let r = self.num_recurrent();
        let steps = self.param.num_timesteps;
        if steps == 0 {
            return Err(NetError::Configuration(format!(
                "展开层`{}`的num_timesteps须为正",
                self.name
            )));
        }
        if bottom.len() < r || top.len() < r {
            return Err(NetError::Configuration(format!(
                "展开层`{}`有{}个循环状态，bottom({})与top({})都不得少于此数",
                self.name,
                r,
                bottom.len(),
                top.len()
            )));
        }
        let inputs = self.subnet_input_names()?;
        if inputs.len() != bottom.len() {
            return Err(NetError::Configuration(format!(
                "展开层`{}`有{}个bottom，子网却有{}个输入",
                self.name,
                bottom.len(),
                inputs.len()
            )));
        }

        let outputs = (0..top.len()).map(|k| self.output_name(k)).collect::<Vec<_>>();
        let mut param = SubnetParam::new(&self.param.net_file);
        param.shared_inputs = (0..bottom.len()).map(|i| i >= r).collect();
        param.force_test_phase = self.param.force_test_phase;
        param.stage = self.param.stage.clone();
        let subnet_name = format!("{}_subnet", self.name);
        let desc = LayerDescriptor::new(
            &subnet_name,
            LayerKind::Subnet(param.clone()),
            &inputs.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            &outputs.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        );
        let mut subnet = SubnetLayer::new(&desc, param, &self.ctx, &self.state);

        // 第0步：子网沿用自己的存储
        let first_outputs = (0..top.len()).map(|_| ws.alloc_empty()).collect::<Vec<_>>();
        subnet.setup(ws, bottom, &first_outputs)?;
        let base_tables = subnet
            .net()?
            .all_nets()
            .iter()
            .map(|net| net.owned_blob_ids())
            .collect::<Vec<_>>();
        self.subnet = Some(subnet);

        self.steps.clear();
        for t in 0..steps {
            let mut step = TimeStep {
                outputs: Vec::new(),
                splits: Vec::new(),
                split_tops: Vec::new(),
                reshapes: Vec::new(),
                reshaped: Vec::new(),
                blob_tables: Vec::new(),
            };
            if t == 0 {
                step.outputs = first_outputs.clone();
                step.blob_tables = base_tables.clone();
            } else {
                step.outputs = (0..top.len()).map(|_| ws.alloc_empty()).collect();
                for table in &base_tables {
                    let mut fresh = Vec::with_capacity(table.len());
                    for &id in table {
                        let shape = ws.shape(id);
                        fresh.push(ws.alloc(&shape));
                    }
                    step.blob_tables.push(fresh);
                }
                install_tables(self.subnet_mut()?, &step.blob_tables)?;
                let sub_bottom = self.step_bottoms(t, bottom);
                self.subnet_mut()?.reshape(ws, &sub_bottom, &step.outputs)?;
            }
            self.build_step_wiring(ws, t, &mut step)?;
            self.steps.push(step);
        }

        self.concats.clear();
        for (k, &t) in top.iter().enumerate() {
            let bottoms = self.concat_bottoms(k);
            let axis = ws.shape(bottoms[0]).len() - 1;
            let mut concat = ConcatLayer::along(&format!("{}_{}_concat", self.name, self.output_name(k)), axis);
            concat.setup(ws, &bottoms, &[t])?;
            concat.reshape(ws, &bottoms, &[t])?;
            self.concats.push(concat);
        }

        self.install_step(0)?;
        self.collect_published()?;
        debug!(
            layer = %self.name,
            timesteps = steps,
            recurrent = r,
            params = self.params.len(),
            "展开层setup完成"
        );
        Ok(())
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        for t in 0..self.steps.len() {
            self.install_step(t)?;
            let sub_bottom = self.step_bottoms(t, bottom);
            let outputs = self.steps[t].outputs.clone();
            self.subnet_mut()?.reshape(ws, &sub_bottom, &outputs)?;
            let step = &mut self.steps[t];
            for (i, split) in step.splits.iter_mut().enumerate() {
                let (a, b) = step.split_tops[i];
                split.reshape(ws, &[step.outputs[i]], &[a, b])?;
            }
        }
        for t in 0..self.steps.len() {
            for k in 0..self.steps[t].reshapes.len() {
                let input = self.reshape_input(&self.steps[t], k);
                let step = &mut self.steps[t];
                let out = step.reshaped[k];
                step.reshapes[k].reshape(ws, &[input], &[out])?;
            }
        }
        for k in 0..self.concats.len() {
            let bottoms = self.concat_bottoms(k);
            self.concats[k].reshape(ws, &bottoms, &[top[k]])?;
        }
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        for t in 0..self.steps.len() {
            {
                let step = &self.steps[t];
                for &id in step.outputs.iter().chain(&step.reshaped) {
                    ws.zero_diff(id);
                }
                for &(a, b) in &step.split_tops {
                    ws.zero_diff(a);
                    ws.zero_diff(b);
                }
            }
            self.install_step(t)?;
            let sub_bottom = self.step_bottoms(t, bottom);
            let outputs = self.steps[t].outputs.clone();
            self.subnet_mut()?.forward(ws, &sub_bottom, &outputs)?;

            for k in 0..self.steps[t].splits.len() {
                let step = &mut self.steps[t];
                let (a, b) = step.split_tops[k];
                step.splits[k].forward(ws, &[step.outputs[k]], &[a, b])?;
            }
            for k in 0..self.steps[t].reshapes.len() {
                let input = self.reshape_input(&self.steps[t], k);
                let step = &mut self.steps[t];
                let out = step.reshaped[k];
                step.reshapes[k].forward(ws, &[input], &[out])?;
            }
        }
        for k in 0..self.concats.len() {
            let bottoms = self.concat_bottoms(k);
            self.concats[k].forward(ws, &bottoms, &[top[k]])?;
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
        let r = self.num_recurrent();
        for k in 0..self.concats.len() {
            let bottoms = self.concat_bottoms(k);
            let down = vec![true; bottoms.len()];
            self.concats[k].backward(ws, &[top[k]], &down, &bottoms)?;
        }

        // 广播输入在每一步都贡献梯度，逐步累加
        let mut broadcast_grads = bottom[r..]
            .iter()
            .map(|&b| Tensor::zeros(&ws.shape(b)))
            .collect::<Vec<_>>();

        for t in (0..self.steps.len()).rev() {
            for k in 0..self.steps[t].reshapes.len() {
                let input = self.reshape_input(&self.steps[t], k);
                let step = &mut self.steps[t];
                let out = step.reshaped[k];
                step.reshapes[k].backward(ws, &[out], &[true], &[input])?;
            }
            for k in 0..self.steps[t].splits.len() {
                let step = &mut self.steps[t];
                let (a, b) = step.split_tops[k];
                step.splits[k].backward(ws, &[a, b], &[true], &[step.outputs[k]])?;
            }

            for &b in &bottom[r..] {
                ws.zero_diff(b);
            }
            self.install_step(t)?;
            let sub_bottom = self.step_bottoms(t, bottom);
            let outputs = self.steps[t].outputs.clone();
            let down = (0..sub_bottom.len())
                .map(|i| propagate_down.get(i).copied().unwrap_or(true) || (i < r && t > 0))
                .collect::<Vec<_>>();
            self.subnet_mut()?.backward(ws, &outputs, &down, &sub_bottom)?;
            for (grad, &b) in broadcast_grads.iter_mut().zip(&bottom[r..]) {
                grad.axpy(1.0, ws.diff(b));
            }
        }

        for (grad, &b) in broadcast_grads.iter().zip(&bottom[r..]) {
            ws.set_diff(b, grad);
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
        match &self.subnet {
            Some(subnet) => subnet.subnets(),
            None => Vec::new(),
        }
    }

    fn subnets_mut(&mut self) -> Vec<&mut Net> {
        match &mut self.subnet {
            Some(subnet) => subnet.subnets_mut(),
            None => Vec::new(),
        }
    }
}
