//! 滑动窗口生成.
//!
//! 在近似标志附近沿 z 轴截取固定高度的窗口, 并按批组织成模型输入.

use crate::config::SlidingConfig;
use crate::data::window::Window;
use crate::data::Volume;
use crate::error::LocateError;
use crate::Level;
use ndarray::{s, Array1, Array2, Array5};

mod starts;

pub use starts::StartBatches;

/// 一批窗口.
///
/// `patches` 的形状为 `(n, 1, z_size, h, w)`, 第二维是通道.
/// `labels_in_patch[i]` 与 `starts[i]` 分别是第 `i` 个窗口的相对标志位置和起点.
#[derive(Clone, Debug)]
pub struct WindowBatch {
    /// 该批窗口所属的层面.
    pub level: Level,

    /// 窗口数据.
    pub patches: Array5<f32>,

    /// 近似标志相对各窗口起点的位置.
    pub labels_in_patch: Array1<f64>,

    /// 各窗口在扫描 z 轴上的起点.
    pub starts: Vec<usize>,
}

impl WindowBatch {
    fn from_windows(level: Level, windows: Vec<Window>) -> Self {
        debug_assert!(!windows.is_empty());
        let (z, h, w) = windows[0].data().dim();

        let mut patches = Array5::zeros((windows.len(), 1, z, h, w));
        let mut labels_in_patch = Array1::zeros(windows.len());
        let mut starts = Vec::with_capacity(windows.len());
        for (i, win) in windows.into_iter().enumerate() {
            labels_in_patch[i] = win.label_in_patch();
            starts.push(win.start());
            patches
                .slice_mut(s![i, 0, .., .., ..])
                .assign(&win.into_data());
        }

        Self {
            level,
            patches,
            labels_in_patch,
            starts,
        }
    }

    /// 窗口个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    /// 是否为空批次. 生成器不会产出空批次.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// 层面指示输入, 形状为 `(n, 1)`, 每个元素都是层面编号.
    pub fn level_indicator(&self) -> Array2<f32> {
        Array2::from_elem((self.len(), 1), self.level.get() as f32)
    }
}

/// 滑动窗口迭代器. 按生成顺序产出 [`WindowBatch`].
///
/// 迭代器是有限的, 且只能通过重新创建来重新开始.
#[derive(Debug)]
pub struct SlidingWindows<'a> {
    volume: &'a Volume,
    level: Level,
    label: usize,
    z_size: usize,
    starts: StartBatches,
}

impl<'a> SlidingWindows<'a> {
    /// 以 `volume` 中 `level` 的近似标志为中心创建滑动窗口.
    ///
    /// 层面标志缺失时返回 [`LocateError::MissingLandmark`]; 其余前置条件见 [`StartBatches::new`].
    ///
    /// 标志位于扫描起点之前 (索引为负) 时不产生任何窗口, 与标志位于第 0 层相同.
    pub fn new(volume: &'a Volume, level: Level, cfg: &SlidingConfig) -> Result<Self, LocateError> {
        let label = volume
            .landmark(level)
            .ok_or(LocateError::MissingLandmark(level))?;
        let label = usize::try_from(label).unwrap_or(0);
        Self::around(volume, level, label, cfg)
    }

    /// 以给定的近似标志索引 `label` 为中心创建滑动窗口.
    pub fn around(
        volume: &'a Volume,
        level: Level,
        label: usize,
        cfg: &SlidingConfig,
    ) -> Result<Self, LocateError> {
        let starts = StartBatches::new(
            volume.depth(),
            label,
            cfg.z_size,
            cfg.stride,
            cfg.batch_size,
        )?;
        tracing::debug!(
            %level,
            label,
            lower = starts.lower(),
            higher = starts.higher(),
            windows = starts.remaining_windows(),
            "sliding window range"
        );
        Ok(Self {
            volume,
            level,
            label,
            z_size: cfg.z_size,
            starts,
        })
    }

    /// 近似标志索引.
    #[inline]
    pub fn label(&self) -> usize {
        self.label
    }

    /// 尚未产出的窗口个数.
    #[inline]
    pub fn remaining_windows(&self) -> usize {
        self.starts.remaining_windows()
    }
}

impl Iterator for SlidingWindows<'_> {
    type Item = WindowBatch;

    fn next(&mut self) -> Option<Self::Item> {
        let starts = self.starts.next()?;
        let windows = starts
            .into_iter()
            .map(|start| Window::crop(self.volume, start, self.z_size, self.label))
            .collect();
        Some(WindowBatch::from_windows(self.level, windows))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.starts.size_hint()
    }
}

impl ExactSizeIterator for SlidingWindows<'_> {}
