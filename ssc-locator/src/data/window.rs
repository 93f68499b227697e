//! 窗口截取.

use super::Volume;
use ndarray::{s, Array3};

/// 沿 z 轴截取的连续窗口, 作为模型输入.
///
/// 窗口覆盖 `[start, start + height)`. 越过扫描末端的切片用 [`Volume::edge_value`] 填充,
/// 因此所有窗口的形状一致.
#[derive(Clone, Debug)]
pub struct Window {
    start: usize,
    label_in_patch: f64,
    data: Array3<f32>,
}

impl Window {
    /// 从 `volume` 的第 `start` 层开始截取高度为 `height` 的窗口.
    /// `label` 是近似标志的 z 轴索引, 窗口会记录其相对起点的位置.
    ///
    /// 当 `start` 越界时 panic.
    pub fn crop(volume: &Volume, start: usize, height: usize, label: usize) -> Self {
        let depth = volume.depth();
        assert!(start < depth, "窗口起点 {start} 越界 (z = {depth})");

        let (_, h, w) = volume.shape();
        let end = depth.min(start + height);
        let mut data = Array3::from_elem((height, h, w), volume.edge_value());
        data.slice_mut(s![..end - start, .., ..])
            .assign(&volume.data().slice(s![start..end, .., ..]));

        Self {
            start,
            label_in_patch: label as f64 - start as f64,
            data,
        }
    }

    /// 窗口起点在扫描 z 轴上的索引.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// 近似标志相对窗口起点的位置.
    #[inline]
    pub fn label_in_patch(&self) -> f64 {
        self.label_in_patch
    }

    /// 窗口数据, 按 `(z, h, w)` 访问.
    #[inline]
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// 取出窗口数据.
    #[inline]
    pub fn into_data(self) -> Array3<f32> {
        self.data
    }
}
