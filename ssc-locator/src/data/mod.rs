//! 扫描体数据与样本.

use std::ops::Index;
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayView, Ix3};

use crate::consts::LEVEL_COUNT;
use crate::error::BoxedError;
use crate::{Idx3d, Level};

pub mod nii;
pub mod window;

pub use nii::NiftiAccessor;

/// 每个层面的近似标志 z 轴索引. 缺失的层面为 `None`.
///
/// 索引带符号: 落在扫描起点之前的标志为负, 越过末端的标志不小于扫描深度.
pub type Landmarks = [Option<i64>; LEVEL_COUNT];

/// 每个层面标志沿 z 轴的世界坐标 (毫米). 缺失的层面为 `None`.
pub type WorldLandmarks = [Option<f64>; LEVEL_COUNT];

/// 将 z 轴上的体素索引转换为世界坐标: `index * spacing0 + origin0`.
#[inline]
pub fn index_to_world(index: f64, origin0: f64, spacing0: f64) -> f64 {
    index * spacing0 + origin0
}

/// 将 z 轴上的世界坐标转换为体素索引, 结果向零截断.
///
/// 结果可能为负或越过扫描末端, 由调用方决定如何处理.
#[inline]
pub fn world_to_index(world: f64, origin0: f64, spacing0: f64) -> i64 {
    ((world - origin0) / spacing0) as i64
}

/// 3D CT 扫描体数据, 包括强度数组、物理原点和体素间距.
///
/// 数组按 `(z, h, w)` 访问, 第 0 维是切片方向. 原点与间距同样按 `(z, h, w)` 排列,
/// 每个轴独立满足 `world = index * spacing + origin`.
///
/// 扫描加载后只读. 层面标志只用于确定滑动窗口的搜索中心, 并不作为评估真值.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<f32>,
    origin: [f64; 3],
    spacing: [f64; 3],
    landmarks: Landmarks,
}

impl Index<Idx3d> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl Volume {
    /// 由 `(z, h, w)` 数组、原点和间距创建扫描. 初始时不带任何层面标志.
    pub fn new(data: Array3<f32>, origin: [f64; 3], spacing: [f64; 3]) -> Self {
        Self {
            data,
            origin,
            spacing,
            landmarks: [None; LEVEL_COUNT],
        }
    }

    /// 直接设置各层面的近似标志索引.
    #[inline]
    pub fn with_landmarks(mut self, landmarks: Landmarks) -> Self {
        self.landmarks = landmarks;
        self
    }

    /// 由各层面的世界坐标求近似标志索引. 只有缺失的层面记为 `None`,
    /// 落在 `[0, depth)` 之外的索引原样保留, 交给窗口生成时再判断.
    pub fn with_world_landmarks(mut self, world: &WorldLandmarks) -> Self {
        let (origin0, spacing0) = (self.origin[0], self.spacing[0]);
        for (slot, w) in self.landmarks.iter_mut().zip(world.iter()) {
            *slot = w.map(|w| world_to_index(w, origin0, spacing0));
        }
        self
    }

    /// 获取数据形状大小 `(z, h, w)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获取切片个数, 即 z 轴长度.
    #[inline]
    pub fn depth(&self) -> usize {
        self.data.dim().0
    }

    /// 物理原点, 按 `(z, h, w)` 排列.
    #[inline]
    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// 体素间距 (毫米), 按 `(z, h, w)` 排列.
    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// 获取 `level` 的近似标志 z 轴索引.
    #[inline]
    pub fn landmark(&self, level: Level) -> Option<i64> {
        self.landmarks[level.index()]
    }

    /// 获取全部层面的近似标志.
    #[inline]
    pub fn landmarks(&self) -> &Landmarks {
        &self.landmarks
    }

    /// z 轴体素索引 (可为小数) 对应的世界坐标.
    #[inline]
    pub fn index_to_world(&self, index: f64) -> f64 {
        index_to_world(index, self.origin[0], self.spacing[0])
    }

    /// z 轴世界坐标对应的体素索引, 向零截断.
    #[inline]
    pub fn world_to_index(&self, world: f64) -> i64 {
        world_to_index(world, self.origin[0], self.spacing[0])
    }

    /// 扫描边缘的强度值 (第一个体素). 窗口越过扫描末端时以该值填充.
    #[inline]
    pub fn edge_value(&self) -> f32 {
        self.data.iter().next().copied().unwrap_or_default()
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }
}

/// 待评估样本: 扫描路径与各层面标志的世界坐标 (真值).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    /// 病例编号.
    pub id: String,

    /// 扫描文件路径.
    pub path: PathBuf,

    /// 各层面标志沿 z 轴的世界坐标.
    pub world: WorldLandmarks,
}

impl Sample {
    /// 创建样本.
    pub fn new(id: impl Into<String>, path: impl AsRef<Path>, world: WorldLandmarks) -> Self {
        Self {
            id: id.into(),
            path: path.as_ref().to_owned(),
            world,
        }
    }
}

/// 扫描加载器. 负责读取强度数组、原点、间距, 并求出各层面的近似标志索引.
pub trait VolumeAccessor {
    /// 加载 `sample` 对应的扫描.
    fn load(&self, sample: &Sample) -> Result<Volume, BoxedError>;
}
