//! 窗口评分模型接口.
//!
//! 模型本身 (网络结构、权重、推理后端) 不属于本 crate. 这里只规定一批窗口进,
//! 一批 patch 坐标出.

use crate::device::Device;
use crate::error::BoxedError;
use crate::reconcile::PredictionBatch;
use crate::sliding::WindowBatch;
use ndarray::{Array2, ArrayView2, ArrayView5};

/// 一次模型调用的输入.
#[derive(Copy, Clone, Debug)]
pub struct ScorerInput<'a> {
    /// 窗口数据, 形状 `(n, 1, z_size, h, w)`.
    pub patches: ArrayView5<'a, f32>,

    /// 层面指示, 形状 `(n, 1)`. 仅当模型需要层面输入时提供.
    pub levels: Option<ArrayView2<'a, f32>>,

    /// 推理设备. 整个进程只选择一次.
    pub device: Device,
}

impl ScorerInput<'_> {
    /// 批内窗口个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.patches.shape()[0]
    }

    /// 是否为空批次.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 窗口评分模型.
///
/// 每次调用都被视为同步、原子的操作: 要么返回整批 `(n, k)` 的 patch 坐标, 要么失败.
/// 失败会原样向上传递, 调用方不会重试.
pub trait PatchScorer {
    /// 对一批窗口做推理, 返回相对各窗口起点的坐标.
    fn score(&mut self, input: ScorerInput<'_>) -> Result<PredictionBatch, BoxedError>;
}

impl<F> PatchScorer for F
where
    F: FnMut(ScorerInput<'_>) -> Result<PredictionBatch, BoxedError>,
{
    #[inline]
    fn score(&mut self, input: ScorerInput<'_>) -> Result<PredictionBatch, BoxedError> {
        self(input)
    }
}

/// 对 `batch` 调用 `scorer`. `level_node` 为真时附带层面指示输入.
pub(crate) fn score_batch<S: PatchScorer + ?Sized>(
    scorer: &mut S,
    batch: &WindowBatch,
    level_node: bool,
    device: Device,
) -> Result<PredictionBatch, BoxedError> {
    let indicator: Option<Array2<f32>> = level_node.then(|| batch.level_indicator());
    scorer.score(ScorerInput {
        patches: batch.patches.view(),
        levels: indicator.as_ref().map(|a| a.view()),
        device,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Level;
    use ndarray::{Array1, Array5};

    fn batch() -> WindowBatch {
        WindowBatch {
            level: Level::new(2).unwrap(),
            patches: Array5::zeros((3, 1, 4, 2, 2)),
            labels_in_patch: Array1::from_vec(vec![3.0, 2.0, 1.0]),
            starts: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_closure_scorer() {
        let mut seen_levels = None;
        let mut scorer = |input: ScorerInput<'_>| -> Result<PredictionBatch, BoxedError> {
            seen_levels = input.levels.map(|l| l.to_owned());
            assert_eq!(input.device, Device::Cpu);
            Ok(Array2::zeros((input.len(), 1)))
        };
        let pred = score_batch(&mut scorer, &batch(), true, Device::Cpu).unwrap();
        assert_eq!(pred.dim(), (3, 1));
        let levels = seen_levels.unwrap();
        assert!(levels.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_no_level_input() {
        let mut scorer = |input: ScorerInput<'_>| -> Result<PredictionBatch, BoxedError> {
            assert!(input.levels.is_none());
            Ok(Array2::zeros((input.len(), 5)))
        };
        let pred = score_batch(&mut scorer, &batch(), false, Device::Cpu).unwrap();
        assert_eq!(pred.dim(), (3, 5));
    }

    #[test]
    fn test_scorer_error_passes_through() {
        let mut scorer = |_: ScorerInput<'_>| -> Result<PredictionBatch, BoxedError> {
            Err("device lost".into())
        };
        let err = score_batch(&mut scorer, &batch(), false, Device::Cpu).unwrap_err();
        assert_eq!(err.to_string(), "device lost");
    }
}
