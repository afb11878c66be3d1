/*
 * @Author       : 老董
 * @Date         : 2026-01-27
 * @Description  : 不可导的辅助层：注视窗口裁剪、计数器自增、随机/全零源
 */

mod glimpse_cropping;
mod increment;
mod random;
mod zero;

pub use glimpse_cropping::GlimpseCroppingLayer;
pub use increment::IncrementLayer;
pub use random::RandomLayer;
pub use zero::ZeroLayer;
