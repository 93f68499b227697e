//! 滑动窗口推理配置.

use crate::consts::{DEFAULT_BATCH_SIZE, DEFAULT_STRIDE, DEFAULT_Z_SIZE};
use crate::error::ConfigError;
use crate::LevelSelection;

/// 滑动窗口推理配置.
///
/// 推理设备不在此处配置, 而是作为显式参数传给 [`crate::eval::Evaluator::new`].
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlidingConfig {
    /// 窗口高度, 即每个窗口沿 z 轴包含的切片数. 同时也是窗口起点相对标志的最大偏移.
    pub z_size: usize,

    /// 相邻窗口起点之间的距离.
    pub stride: usize,

    /// 每批送入模型的最大窗口数.
    pub batch_size: usize,

    /// 需要评估的层面.
    pub levels: LevelSelection,

    /// 模型是否需要额外的层面指示输入.
    pub level_node: bool,
}

impl Default for SlidingConfig {
    fn default() -> Self {
        Self {
            z_size: DEFAULT_Z_SIZE,
            stride: DEFAULT_STRIDE,
            batch_size: DEFAULT_BATCH_SIZE,
            levels: LevelSelection::default(),
            level_node: false,
        }
    }
}

impl SlidingConfig {
    /// 校验配置. 所有整数参数都必须为正.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.z_size == 0 {
            return Err(ConfigError::InvalidZSize);
        }
        if self.stride == 0 {
            return Err(ConfigError::InvalidStride);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        Ok(())
    }
}
