#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 在 3D 胸部 CT 扫描中定位肺部评分层面 (L1-L5).
//!
//! 给定一个层面的近似位置, 在其附近沿 z 轴截取一系列相互重叠的窗口, 交给窗口级模型推理,
//! 再把每个窗口的相对坐标还原到扫描坐标和物理坐标, 最后跨窗口聚合为单个估计.
//!
//! 模型本身、强度归一化、数据增强、训练流程以及统计图表都不属于本 crate.
//!
//! # 注意
//!
//! 1. 所有扫描均按 `(z, h, w)` 访问, 第 0 维是切片方向.
//! 2. 所有操作对给定输入都是确定性的, 错误一律向上传递, 不做重试.
//!
//! # 开发计划
//!
//! ### 滑动窗口生成 ✅
//!
//! 以近似标志为中心确定窗口起点范围, 按步长截取窗口并按批组织.
//! 越过扫描末端的窗口用边缘值填充.
//!
//! 实现位于 `ssc-locator/src/sliding`.
//!
//! ### 坐标重建与聚合 ✅
//!
//! `image = patch + start`, `world = image * spacing + origin`.
//! 聚合取算术平均, 整数结果向零截断.
//!
//! 实现位于 `ssc-locator/src/reconcile.rs`.
//!
//! ### 评估流程 ✅
//!
//! 逐样本、逐层面地串联上述两步, 并把结果交给 [`emit::ResultSink`].
//! 第一个样本评估时会在后台采样一次设备利用率.
//!
//! 实现位于 `ssc-locator/src/eval.rs`.
//!
//! ### nii 扫描加载与层面标志表 ✅
//!
//! 实现位于 `ssc-locator/src/data/nii.rs` 与 `ssc-locator/src/dataset`.
//!
//! ### 结果持久化 ✅
//!
//! 按模式、按结果种类追加写入 CSV.
//!
//! 实现位于 `ssc-locator/src/emit.rs`.
//!
//! ### 二阶段推理 ✅
//!
//! 读回前一次实验的预测世界坐标, 以其为中心再做一次滑动窗口推理.
//!
//! 实现位于 `ssc-locator/src/prior.rs`.

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

pub mod config;
pub mod consts;
pub mod data;
pub mod dataset;
pub mod device;
pub mod emit;
pub mod error;
pub mod eval;
mod level;
pub mod prior;
pub mod reconcile;
pub mod scorer;
pub mod sliding;

pub use config::SlidingConfig;
pub use data::{Sample, Volume, VolumeAccessor};
pub use device::Device;
pub use error::LocateError;
pub use eval::Evaluator;
pub use level::{header_for, Level, LevelSelection};
pub use reconcile::{reconcile, AggregatedResult, Reconciler};
pub use scorer::PatchScorer;
pub use sliding::{SlidingWindows, StartBatches, WindowBatch};

pub mod prelude;
