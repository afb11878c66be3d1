/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 负责神经网络（neural network）的构建：
 *                 blob工作区、网络描述、层、网络本身以及参数快照
 */

pub mod blob;
pub mod context;
pub mod descriptor;
pub mod layer;
pub mod net;
pub mod snapshot;

pub use blob::{Blob, BlobId, BlobSlot, Workspace};
pub use context::{DescriptorStore, NetContext, PhaseCounters};
pub use descriptor::{LayerDescriptor, LayerKind, NetDescriptor, NetState, Phase};
pub use layer::{Layer, LayerEnum, ParamBlob};
pub use net::Net;
pub use snapshot::ParamSnapshot;

#[cfg(test)]
mod tests;
