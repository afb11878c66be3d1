/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 数据层
 */

mod two_instance_embed_data;

pub use two_instance_embed_data::{EmbedBatch, TwoInstanceEmbedDataLayer};
