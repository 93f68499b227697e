//! 通用常量.

/// 评分层面 (level) 的个数. 每个 3D CT 扫描最多标注 5 个层面.
pub const LEVEL_COUNT: usize = 5;

/// 各层面在结果文件表头中的名称, 按层面编号升序排列.
pub const LEVEL_HEADERS: [&str; LEVEL_COUNT] = ["L1", "L2", "L3", "L4", "L5"];

/// 每个模式 (train/valid/test) 下, 前多少个样本会额外保存逐窗口的诊断结果.
pub const DIAGNOSTIC_SAMPLES: usize = 5;

/// 利用率探针的采样次数.
pub const PROBE_SAMPLES: u32 = 5;

/// 利用率探针两次采样的间隔, 以毫秒为单位.
pub const PROBE_INTERVAL_MS: u64 = 1000;

/// 默认窗口高度 (沿 z 轴的切片数).
pub const DEFAULT_Z_SIZE: usize = 16;

/// 默认滑动步长.
pub const DEFAULT_STRIDE: usize = 1;

/// 默认批大小.
pub const DEFAULT_BATCH_SIZE: usize = 4;
