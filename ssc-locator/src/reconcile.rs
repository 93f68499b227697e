//! 坐标重建与跨窗口聚合.
//!
//! 模型给出的是相对窗口起点的坐标 (patch 坐标). 该模块将其还原为扫描 z 轴索引
//! (图像坐标) 和物理坐标 (世界坐标), 并对一个样本的所有窗口求平均.
//!
//! 三种坐标的关系:
//!
//! 1. `image = patch + start`;
//! 2. `world = image * spacing0 + origin0`.
//!
//! 重建过程不做任何截断或裁剪, 窗口的边界约束只在生成阶段施加.

use crate::data::index_to_world;
use crate::error::LocateError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// 模型对一批窗口的输出, 形状为 `(n_windows, k)`, `k` 为每个窗口预测的坐标个数.
pub type PredictionBatch = Array2<f64>;

/// 单个样本 (单个层面) 的重建结果.
///
/// 逐窗口的各种视图按窗口生成顺序排列, 下游统计需要它们, 不能只保留平均值.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AggregatedResult {
    /// 各窗口起点.
    pub starts: Vec<usize>,

    /// 模型原始输出 (patch 坐标), 形状 `(n_windows, k)`.
    pub pred_in_patch: Array2<f64>,

    /// 各窗口预测的图像坐标, 形状 `(n_windows, k)`.
    pub pred_in_image: Array2<f64>,

    /// 各窗口预测的世界坐标, 形状 `(n_windows, k)`.
    pub pred_in_world: Array2<f64>,

    /// 近似标志的图像坐标, 由各窗口的相对标志位置加上起点得到.
    /// 只包含携带了相对标志位置的窗口.
    pub label_in_image: Array1<f64>,

    /// 图像坐标的算术平均, 长度为 `k`.
    pub mean_in_image: Array1<f64>,

    /// 图像坐标平均值向零截断后的整数.
    pub mean_in_image_int: Array1<i64>,

    /// 平均图像坐标对应的世界坐标.
    pub mean_in_world: Array1<f64>,
}

impl AggregatedResult {
    /// 参与聚合的窗口数.
    #[inline]
    pub fn window_count(&self) -> usize {
        self.starts.len()
    }

    /// 每个窗口预测的坐标个数.
    #[inline]
    pub fn width(&self) -> usize {
        self.mean_in_image.len()
    }
}

/// 累积一个样本所有窗口的预测, 最终聚合为 [`AggregatedResult`].
///
/// 预测必须按窗口生成顺序推入. 平均值本身与顺序无关, 但逐窗口的视图需要保持顺序.
#[derive(Clone, Debug, Default)]
pub struct Reconciler {
    width: Option<usize>,
    starts: Vec<usize>,
    in_patch: Vec<f64>,
    in_image: Vec<f64>,
    label_in_image: Vec<f64>,
}

impl Reconciler {
    /// 创建空的累积器.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 已推入的窗口数.
    #[inline]
    pub fn window_count(&self) -> usize {
        self.starts.len()
    }

    /// 推入单个窗口的预测 `pred` (patch 坐标) 及其起点.
    ///
    /// 所有窗口的预测长度必须一致, 否则返回 [`LocateError::PredictionShape`].
    pub fn push_row(
        &mut self,
        pred: ArrayView1<f64>,
        start: usize,
        label_in_patch: Option<f64>,
    ) -> Result<(), LocateError> {
        let width = *self.width.get_or_insert(pred.len());
        if pred.len() != width || width == 0 {
            return Err(LocateError::PredictionShape {
                expected: format!("{width} value(s) per window"),
                found: format!("{}", pred.len()),
            });
        }

        let offset = start as f64;
        self.starts.push(start);
        self.in_patch.extend(pred.iter().copied());
        self.in_image.extend(pred.iter().map(|&p| p + offset));
        if let Some(label) = label_in_patch {
            self.label_in_image.push(label + offset);
        }
        Ok(())
    }

    /// 推入一批窗口的预测. `pred` 的行数必须与 `starts` 一致.
    ///
    /// 如果给出 `labels_in_patch`, 其长度也必须与 `starts` 一致.
    pub fn push(
        &mut self,
        pred: ArrayView2<f64>,
        starts: &[usize],
        labels_in_patch: Option<ArrayView1<f64>>,
    ) -> Result<(), LocateError> {
        let rows_ok = pred.nrows() == starts.len();
        let labels_ok = labels_in_patch.map_or(true, |l| l.len() == starts.len());
        if !rows_ok || !labels_ok {
            return Err(LocateError::PredictionShape {
                expected: format!("{} row(s)", starts.len()),
                found: format!("{:?}", pred.shape()),
            });
        }

        for (i, (row, &start)) in pred.outer_iter().zip(starts).enumerate() {
            self.push_row(row, start, labels_in_patch.map(|l| l[i]))?;
        }
        Ok(())
    }

    /// 聚合全部窗口. 没有任何窗口时返回 [`LocateError::EmptyAggregation`].
    pub fn finish(self, spacing0: f64, origin0: f64) -> Result<AggregatedResult, LocateError> {
        let width = match self.width {
            Some(w) if !self.starts.is_empty() => w,
            _ => return Err(LocateError::EmptyAggregation),
        };
        let n = self.starts.len();

        let pred_in_patch = into_rows(self.in_patch, n, width)?;
        let pred_in_image = into_rows(self.in_image, n, width)?;
        let pred_in_world = pred_in_image.mapv(|v| index_to_world(v, origin0, spacing0));

        let mean_in_image = pred_in_image
            .mean_axis(Axis(0))
            .ok_or(LocateError::EmptyAggregation)?;
        // `as` 向零截断.
        let mean_in_image_int = mean_in_image.mapv(|v| v as i64);
        let mean_in_world = mean_in_image.mapv(|v| index_to_world(v, origin0, spacing0));

        Ok(AggregatedResult {
            starts: self.starts,
            pred_in_patch,
            pred_in_image,
            pred_in_world,
            label_in_image: Array1::from_vec(self.label_in_image),
            mean_in_image,
            mean_in_image_int,
            mean_in_world,
        })
    }
}

fn into_rows(v: Vec<f64>, n: usize, width: usize) -> Result<Array2<f64>, LocateError> {
    let len = v.len();
    Array2::from_shape_vec((n, width), v).map_err(|_| LocateError::PredictionShape {
        expected: format!("({n}, {width})"),
        found: format!("{len} value(s)"),
    })
}

/// 对按顺序排列的 `(patch 坐标, 起点)` 序列做重建与聚合.
///
/// 等价于依次 [`Reconciler::push_row`] 后 [`Reconciler::finish`].
pub fn reconcile<I, P>(preds: I, spacing0: f64, origin0: f64) -> Result<AggregatedResult, LocateError>
where
    I: IntoIterator<Item = (P, usize)>,
    P: AsRef<[f64]>,
{
    let mut acc = Reconciler::new();
    for (pred, start) in preds {
        acc.push_row(ArrayView1::from(pred.as_ref()), start, None)?;
    }
    acc.finish(spacing0, origin0)
}
