use std::cell::RefCell;
use std::rc::Rc;

use ndarray::Axis;
use rand::rngs::StdRng;

use crate::errors::NetError;
use crate::nn::blob::{BlobId, Workspace};
use crate::nn::context::NetContext;
use crate::nn::descriptor::{Filler, InnerProductParam, LayerDescriptor};
use crate::nn::layer::{Layer, ParamBlob, check_blob_count};
use crate::tensor::Tensor;

/// 全连接层：把bottom从第`axis`维起展平为K维特征，输出`num_output`维
#[derive(Debug)]
pub struct InnerProductLayer {
    name: String,
    param: InnerProductParam,
    rng: Rc<RefCell<StdRng>>,
    weight: Option<BlobId>,
    bias: Option<BlobId>,
    // 批数M与特征数K
    m: usize,
    k: usize,
}

impl InnerProductLayer {
    pub fn new(desc: &LayerDescriptor, param: InnerProductParam, ctx: &NetContext) -> Self {
        Self {
            name: desc.name.clone(),
            param,
            rng: ctx.rng().clone(),
            weight: None,
            bias: None,
            m: 0,
            k: 0,
        }
    }

    fn weight(&self) -> Result<BlobId, NetError> {
        self.weight
            .ok_or_else(|| NetError::Configuration(format!("InnerProduct层`{}`尚未setup", self.name)))
    }
}

/// 按初始化方式生成参数值
pub(crate) fn fill(filler: &Filler, shape: &[usize], rng: &mut StdRng) -> Tensor {
    match *filler {
        Filler::Constant { value } => Tensor::filled(value, shape),
        Filler::Uniform { min, max } => Tensor::new_random(min, max, shape, rng),
        Filler::Gaussian { mean, std } => Tensor::new_normal(mean, std, shape, rng),
    }
}

impl Layer for InnerProductLayer {
    fn layer_type(&self) -> &'static str {
        "InnerProduct"
    }

    fn setup(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        check_blob_count(&self.name, "bottom", bottom.len(), 1, 1)?;
        check_blob_count(&self.name, "top", top.len(), 1, 1)?;
        if self.param.num_output == 0 {
            return Err(NetError::Configuration(format!(
                "InnerProduct层`{}`的num_output须大于0",
                self.name
            )));
        }
        let shape = ws.shape(bottom[0]);
        if self.param.axis > shape.len() {
            return Err(NetError::Configuration(format!(
                "InnerProduct层`{}`的axis={}超出输入维数{}",
                self.name,
                self.param.axis,
                shape.len()
            )));
        }
        self.k = shape[self.param.axis..].iter().product();
        let n = self.param.num_output;
        let mut rng = self.rng.borrow_mut();
        let weight = ws.alloc(&[n, self.k]);
        ws.set_data(weight, &fill(&self.param.weight_filler, &[n, self.k], &mut rng));
        self.weight = Some(weight);
        if self.param.bias_term {
            let bias = ws.alloc(&[n]);
            ws.set_data(bias, &fill(&self.param.bias_filler, &[n], &mut rng));
            self.bias = Some(bias);
        }
        Ok(())
    }

    fn reshape(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let shape = ws.shape(bottom[0]);
        let axis = self.param.axis.min(shape.len());
        let k: usize = shape[axis..].iter().product();
        if k != self.k {
            return Err(NetError::ShapeMismatch {
                expected: vec![self.k],
                got: vec![k],
                message: format!("InnerProduct层`{}`的输入特征数与权重不符", self.name),
            });
        }
        self.m = shape[..axis].iter().product();
        let mut top_shape = shape[..axis].to_vec();
        top_shape.push(self.param.num_output);
        ws.reshape(top[0], &top_shape);
        Ok(())
    }

    fn forward(&mut self, ws: &mut Workspace, bottom: &[BlobId], top: &[BlobId]) -> Result<(), NetError> {
        let n = self.param.num_output;
        let x = ws.data(bottom[0]).to_matrix(self.m, self.k);
        let w = ws.data(self.weight()?).to_matrix(n, self.k);
        let mut y = x.dot(&w.t());
        if let Some(bias) = self.bias {
            let b = ws.data(bias).to_matrix(1, n);
            y += &b;
        }
        let top_shape = ws.shape(top[0]);
        ws.set_data(top[0], &Tensor::from_matrix(y, &top_shape));
        Ok(())
    }

    fn backward(
        &mut self,
        ws: &mut Workspace,
        top: &[BlobId],
        propagate_down: &[bool],
        bottom: &[BlobId],
    ) -> Result<(), NetError> {
        let n = self.param.num_output;
        let weight = self.weight()?;
        let dy = ws.diff(top[0]).to_matrix(self.m, n);
        let x = ws.data(bottom[0]).to_matrix(self.m, self.k);

        // 参数梯度累加
        let dw = dy.t().dot(&x);
        ws.diff_mut(weight).axpy(1.0, &Tensor::from_matrix(dw, &[n, self.k]));
        if let Some(bias) = self.bias {
            let db = dy.sum_axis(Axis(0));
            ws.diff_mut(bias).axpy(1.0, &Tensor::from_matrix(db.insert_axis(Axis(0)), &[n]));
        }

        if propagate_down.first().copied().unwrap_or(false) {
            let w = ws.data(weight).to_matrix(n, self.k);
            let dx = dy.dot(&w);
            let shape = ws.shape(bottom[0]);
            ws.diff_mut(bottom[0]).copy_from(&Tensor::from_matrix(dx, &shape));
        }
        Ok(())
    }

    fn params(&self) -> Vec<ParamBlob> {
        self.weight
            .into_iter()
            .chain(self.bias)
            .map(ParamBlob::new)
            .collect()
    }

    fn share_param(&mut self, index: usize, blob: BlobId) -> Result<(), NetError> {
        match (index, self.bias) {
            (0, _) => self.weight = Some(blob),
            (1, Some(_)) => self.bias = Some(blob),
            _ => {
                return Err(NetError::Configuration(format!(
                    "InnerProduct层`{}`没有第{}个参数",
                    self.name, index
                )));
            }
        }
        Ok(())
    }
}
