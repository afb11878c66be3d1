/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 网络上下文：构建时注入每一层的共享状态
 *                 （阶段计数器表、网络描述仓库、随机数生成器）
 *                 克隆上下文只是复制句柄，所有克隆共享同一份状态
 */

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

use super::descriptor::NetDescriptor;
use crate::errors::NetError;

/// 以小整数为键的阶段计数器表，供各个子网协调多阶段训练
#[derive(Debug, Clone, Default)]
pub struct PhaseCounters {
    counters: Rc<RefCell<Vec<i32>>>,
}

impl PhaseCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个键并将其计数器置0；负键忽略
    pub fn register(&self, key: i32) {
        let Ok(index) = usize::try_from(key) else {
            return;
        };
        let mut counters = self.counters.borrow_mut();
        if counters.len() <= index {
            counters.resize(index + 1, 0);
        }
        counters[index] = 0;
    }

    /// 读取计数器；负键或未登记的键返回None
    pub fn get(&self, key: i32) -> Option<i32> {
        let index = usize::try_from(key).ok()?;
        self.counters.borrow().get(index).copied()
    }

    pub fn set(&self, key: i32, value: i32) {
        if let Ok(index) = usize::try_from(key) {
            if let Some(c) = self.counters.borrow_mut().get_mut(index) {
                *c = value;
            }
        }
    }

    /// 计数器加1，达到`reset`即归零；返回推进后的值
    pub fn advance(&self, key: i32, reset: i32) -> Option<i32> {
        let index = usize::try_from(key).ok()?;
        let mut counters = self.counters.borrow_mut();
        let c = counters.get_mut(index)?;
        *c += 1;
        if reset > 0 && *c >= reset {
            *c = 0;
        }
        Some(*c)
    }
}

/// 网络描述仓库：先查内存中登记的描述，再查文件系统
#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    registered: Rc<RefCell<HashMap<String, NetDescriptor>>>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以资源名登记一个描述
    pub fn register(&self, name: &str, desc: NetDescriptor) {
        self.registered.borrow_mut().insert(name.to_string(), desc);
    }

    /// 以资源名登记一段JSON描述，解析失败报配置错误
    pub fn register_json(&self, name: &str, json: &str) -> Result<(), NetError> {
        let desc = NetDescriptor::from_json(json)
            .map_err(|e| NetError::Configuration(format!("网络描述`{}`解析失败：{}", name, e)))?;
        self.register(name, desc);
        Ok(())
    }

    /// 加载描述（解析失败即报错）
    pub fn load(&self, name: &str) -> Result<NetDescriptor, NetError> {
        if let Some(desc) = self.registered.borrow().get(name) {
            debug!(resource = name, "使用已登记的网络描述");
            return Ok(desc.clone());
        }
        NetDescriptor::load(Path::new(name))
    }
}

/// 构建网络时注入每一层的上下文
#[derive(Debug, Clone)]
pub struct NetContext {
    phase_counters: PhaseCounters,
    descriptors: DescriptorStore,
    rng: Rc<RefCell<StdRng>>,
}

impl Default for NetContext {
    fn default() -> Self {
        Self::new()
    }
}

impl NetContext {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// 固定随机种子，便于复现
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            phase_counters: PhaseCounters::new(),
            descriptors: DescriptorStore::new(),
            rng: Rc::new(RefCell::new(rng)),
        }
    }

    pub fn phase_counters(&self) -> &PhaseCounters {
        &self.phase_counters
    }

    pub fn descriptors(&self) -> &DescriptorStore {
        &self.descriptors
    }

    pub fn rng(&self) -> &Rc<RefCell<StdRng>> {
        &self.rng
    }
}
