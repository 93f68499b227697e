//! 滑动窗口评估.
//!
//! 对每个样本的每个层面: 生成窗口 -> 逐批推理 -> 坐标重建与聚合 -> 交给结果去向.
//! 样本之间互不共享状态, 严格按顺序处理; 同一样本内的批次按生成顺序处理.

use crate::config::SlidingConfig;
use crate::data::{Sample, Volume, VolumeAccessor};
use crate::device::{self, Device, UtilizationProbe};
use crate::emit::{Mode, ResultSink};
use crate::error::{ConfigError, EvalError, LocateError};
use crate::level::header_for;
use crate::reconcile::{AggregatedResult, Reconciler};
use crate::scorer::{score_batch, PatchScorer};
use crate::sliding::SlidingWindows;
use crate::Level;
use either::Either;
use std::path::PathBuf;

/// 单个层面的评估结果, 附带该层面的真值.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LevelRecord {
    /// 窗口所围绕的层面.
    pub level: Level,

    /// 结果表头, 与模型输出的列一一对应.
    pub header: Vec<&'static str>,

    /// 表头各层面的真值图像坐标. 样本缺少该层面时为 `None`.
    pub label_in_image: Vec<Option<i64>>,

    /// 表头各层面的真值世界坐标. 样本缺少该层面时为 `None`.
    pub world: Vec<Option<f64>>,

    /// 重建与聚合结果.
    pub result: AggregatedResult,
}

/// 单个样本的评估结果.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SampleRecord {
    /// 样本在当前模式中的序号.
    pub index: usize,

    /// 病例编号.
    pub id: String,

    /// 扫描路径.
    pub path: PathBuf,

    /// 各层面的结果, 按层面升序排列.
    pub levels: Vec<LevelRecord>,
}

/// 滑动窗口评估器.
///
/// 推理设备在构造时给定, 之后不再改变.
pub struct Evaluator<S, A> {
    scorer: S,
    accessor: A,
    cfg: SlidingConfig,
    device: Device,
    probe: Option<Box<dyn UtilizationProbe + Send>>,
}

impl<S: PatchScorer, A: VolumeAccessor> Evaluator<S, A> {
    /// 创建评估器. 配置不合法时返回 `Err`.
    pub fn new(
        scorer: S,
        accessor: A,
        cfg: SlidingConfig,
        device: Device,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            scorer,
            accessor,
            cfg,
            device,
            probe: None,
        })
    }

    /// 设置设备利用率探针. 探针只在评估第一个样本时于后台运行一次.
    pub fn with_probe<P: UtilizationProbe + Send + 'static>(mut self, probe: P) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &SlidingConfig {
        &self.cfg
    }

    /// 推理设备.
    #[inline]
    pub fn device(&self) -> Device {
        self.device
    }

    /// 对 `volume` 的单个层面做滑动窗口推理, 并聚合所有窗口的预测.
    pub fn evaluate_level(
        &mut self,
        volume: &Volume,
        level: Level,
    ) -> Result<AggregatedResult, LocateError> {
        let windows = SlidingWindows::new(volume, level, &self.cfg)?;
        let mut acc = Reconciler::new();

        for batch in windows {
            let pred = score_batch(&mut self.scorer, &batch, self.cfg.level_node, self.device)
                .map_err(LocateError::Scorer)?;
            tracing::trace!(%level, starts = ?batch.starts, "batch scored");
            acc.push(
                pred.view(),
                &batch.starts,
                Some(batch.labels_in_patch.view()),
            )?;
        }

        let [spacing0, ..] = volume.spacing();
        let [origin0, ..] = volume.origin();
        acc.finish(spacing0, origin0)
    }

    /// 评估单个样本的所有选中层面.
    pub fn evaluate_sample(
        &mut self,
        index: usize,
        sample: &Sample,
    ) -> Result<SampleRecord, LocateError> {
        if let Some(probe) = self.probe.take() {
            device::spawn_detached(probe);
        }

        tracing::info!(index, id = %sample.id, path = %sample.path.display(), "evaluating sample");
        let volume = self
            .accessor
            .load(sample)
            .map_err(|source| LocateError::Volume {
                path: sample.path.clone(),
                source,
            })?;

        let mut levels = Vec::new();
        for level in self.cfg.levels.levels() {
            let result = self.evaluate_level(&volume, level)?;
            let header =
                header_for(level, result.width()).ok_or_else(|| LocateError::PredictionShape {
                    expected: "1 or 5 value(s) per window".to_string(),
                    found: result.width().to_string(),
                })?;

            let world: Vec<Option<f64>> = header_levels(level, header.len())
                .map(|l| sample.world[l.index()])
                .collect();
            let label_in_image: Vec<Option<i64>> = world
                .iter()
                .map(|w| w.map(|w| volume.world_to_index(w)))
                .collect();

            tracing::info!(
                %level,
                windows = result.window_count(),
                pred = ?result.mean_in_image.to_vec(),
                label = ?label_in_image,
                "level aggregated"
            );
            levels.push(LevelRecord {
                level,
                header,
                label_in_image,
                world,
                result,
            });
        }

        Ok(SampleRecord {
            index,
            id: sample.id.clone(),
            path: sample.path.clone(),
            levels,
        })
    }

    /// 依次评估 `samples`, 并把每个样本的结果交给 `sink`.
    ///
    /// 任何样本失败都会立即中止并返回错误, 错误中标明了出错的样本.
    pub fn run<I, K>(
        &mut self,
        mode: Mode,
        samples: I,
        sink: &mut K,
    ) -> Result<Vec<SampleRecord>, EvalError>
    where
        I: IntoIterator<Item = Sample>,
        K: ResultSink + ?Sized,
    {
        tracing::info!(
            %mode,
            device = %self.device,
            accelerated = self.device.is_accelerator(),
            "start sliding window evaluation"
        );
        let mut records = Vec::new();
        for (index, sample) in samples.into_iter().enumerate() {
            let record =
                self.evaluate_sample(index, &sample)
                    .map_err(|source| EvalError::Sample {
                        index,
                        path: sample.path.clone(),
                        source,
                    })?;
            sink.emit(mode, &record)?;
            records.push(record);
        }
        Ok(records)
    }
}

/// 模型输出列对应的层面: 单输出时为 `level` 本身, 五输出时为全部层面.
fn header_levels(level: Level, width: usize) -> impl Iterator<Item = Level> {
    if width == 1 {
        Either::Left(std::iter::once(level))
    } else {
        Either::Right(Level::all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceUsage;
    use crate::emit::{CsvEmitter, ResultPaths};
    use crate::error::BoxedError;
    use crate::reconcile::PredictionBatch;
    use crate::scorer::ScorerInput;
    use crate::LevelSelection;
    use ndarray::{Array2, Array3};
    use std::collections::HashMap;
    use std::fs;
    use std::sync::mpsc;
    use std::time::Duration;

    /// 内存中的扫描集合, 按病例编号索引.
    #[derive(Default)]
    struct MemAccessor(HashMap<String, Volume>);

    impl VolumeAccessor for MemAccessor {
        fn load(&self, sample: &Sample) -> Result<Volume, BoxedError> {
            self.0
                .get(&sample.id)
                .cloned()
                .ok_or_else(|| format!("unknown sample {}", sample.id).into())
        }
    }

    /// 第 z 层切片的所有体素值均为 z, 因此窗口第一个体素就是窗口起点.
    fn ramp(depth: usize, origin0: f64, spacing0: f64, landmarks: [Option<i64>; 5]) -> Volume {
        let data = Array3::from_shape_fn((depth, 2, 2), |(z, _, _)| z as f32);
        Volume::new(data, [origin0, 0.0, 0.0], [spacing0, 1.0, 1.0]).with_landmarks(landmarks)
    }

    /// 完美预测器: 对每个窗口输出 `truth - start`.
    fn perfect(
        truth: [f64; 5],
        width: usize,
    ) -> impl FnMut(ScorerInput<'_>) -> Result<PredictionBatch, BoxedError> {
        move |input: ScorerInput<'_>| -> Result<PredictionBatch, BoxedError> {
            let n = input.len();
            let level = input.levels.map(|l| l[(0, 0)] as usize);
            Ok(Array2::from_shape_fn((n, width), |(i, j)| {
                let start = input.patches[(i, 0, 0, 0, 0)] as f64;
                let t = match (width, level) {
                    (1, Some(l)) => truth[l - 1],
                    (1, None) => truth[0],
                    _ => truth[j],
                };
                t - start
            }))
        }
    }

    fn cfg(levels: LevelSelection, level_node: bool) -> SlidingConfig {
        SlidingConfig {
            z_size: 5,
            stride: 1,
            batch_size: 2,
            levels,
            level_node,
        }
    }

    fn l1() -> LevelSelection {
        LevelSelection::Single(Level::new(1).unwrap())
    }

    #[test]
    fn test_concrete_scenario() {
        let mut sizes = Vec::new();
        let mut inner = perfect([50.0; 5], 1);
        let scorer = |input: ScorerInput<'_>| {
            sizes.push(input.len());
            inner(input)
        };
        let mut acc = MemAccessor::default();
        acc.0.insert("a".into(), ramp(100, 0.0, 1.0, [Some(50), None, None, None, None]));

        let mut ev = Evaluator::new(scorer, acc, cfg(l1(), false), Device::Cpu).unwrap();
        let sample = Sample::new("a", "a.nii.gz", [Some(50.0), None, None, None, None]);
        let rec = ev.evaluate_sample(0, &sample).unwrap();
        drop(ev);

        assert_eq!(sizes, vec![2, 2, 1]);
        let lv = &rec.levels[0];
        assert_eq!(lv.header, vec!["L1"]);
        assert_eq!(lv.result.starts, vec![45, 46, 47, 48, 49]);
        assert_eq!(lv.result.mean_in_image.to_vec(), vec![50.0]);
        assert_eq!(lv.result.mean_in_world.to_vec(), vec![50.0]);
        assert_eq!(lv.result.mean_in_image_int.to_vec(), vec![50]);
        assert_eq!(lv.result.label_in_image.to_vec(), vec![50.0; 5]);
        assert_eq!(lv.label_in_image, vec![Some(50)]);
        assert_eq!(lv.world, vec![Some(50.0)]);
    }

    #[test]
    fn test_world_coordinates() {
        let mut acc = MemAccessor::default();
        acc.0.insert("a".into(), ramp(60, -100.0, 2.5, [Some(40), None, None, None, None]));
        let mut ev = Evaluator::new(perfect([41.0; 5], 1), acc, cfg(l1(), false), Device::Cpu)
            .unwrap();
        let sample = Sample::new("a", "a.nii.gz", [Some(0.0), None, None, None, None]);
        let rec = ev.evaluate_sample(0, &sample).unwrap();

        let res = &rec.levels[0].result;
        assert_eq!(res.mean_in_image.to_vec(), vec![41.0]);
        assert_eq!(res.mean_in_world.to_vec(), vec![41.0 * 2.5 - 100.0]);
        // 真值 0.0 mm 对应第 40 层.
        assert_eq!(rec.levels[0].label_in_image, vec![Some(40)]);
    }

    #[test]
    fn test_all_levels_with_level_node() {
        let truth = [10.0, 20.0, 30.0, 40.0, 50.0];
        let landmarks = [Some(10), Some(20), Some(30), Some(40), Some(50)];
        let mut acc = MemAccessor::default();
        acc.0.insert("a".into(), ramp(80, 0.0, 1.0, landmarks));

        let mut ev = Evaluator::new(
            perfect(truth, 1),
            acc,
            cfg(LevelSelection::All, true),
            Device::Cpu,
        )
        .unwrap();
        let sample = Sample::new("a", "a.nii.gz", truth.map(Some));
        let rec = ev.evaluate_sample(0, &sample).unwrap();

        assert_eq!(rec.levels.len(), 5);
        for (lv, t) in rec.levels.iter().zip(truth) {
            assert_eq!(lv.header, vec![lv.level.header()]);
            assert_eq!(lv.result.mean_in_image.to_vec(), vec![t]);
        }
    }

    #[test]
    fn test_five_output_model() {
        let truth = [10.0, 20.0, 30.0, 40.0, 50.0];
        let landmarks = [Some(10), Some(20), Some(30), Some(40), Some(50)];
        let mut acc = MemAccessor::default();
        acc.0.insert("a".into(), ramp(80, 0.0, 1.0, landmarks));

        let sel = LevelSelection::Single(Level::new(3).unwrap());
        let mut ev = Evaluator::new(perfect(truth, 5), acc, cfg(sel, false), Device::Cpu).unwrap();
        let sample = Sample::new("a", "a.nii.gz", [Some(10.0), Some(20.0), None, Some(40.0), Some(50.0)]);
        let rec = ev.evaluate_sample(0, &sample).unwrap();

        let lv = &rec.levels[0];
        assert_eq!(lv.header, vec!["L1", "L2", "L3", "L4", "L5"]);
        assert_eq!(lv.result.mean_in_image.to_vec(), truth.to_vec());
        assert_eq!(lv.label_in_image[2], None);
        assert_eq!(lv.label_in_image[4], Some(50));
    }

    #[test]
    fn test_empty_aggregation_is_surfaced() {
        let mut acc = MemAccessor::default();
        acc.0.insert("a".into(), ramp(30, 0.0, 1.0, [Some(0), None, None, None, None]));
        let mut ev = Evaluator::new(perfect([0.0; 5], 1), acc, cfg(l1(), false), Device::Cpu)
            .unwrap();
        let samples = vec![Sample::new("a", "a.nii.gz", [Some(0.0), None, None, None, None])];

        let err = ev.run(Mode::Valid, samples, &mut ()).unwrap_err();
        assert!(matches!(
            err,
            EvalError::Sample {
                index: 0,
                source: LocateError::EmptyAggregation,
                ..
            }
        ));
    }

    #[test]
    fn test_short_volume_fails() {
        let mut acc = MemAccessor::default();
        acc.0.insert("a".into(), ramp(5, 0.0, 1.0, [Some(3), None, None, None, None]));
        let mut ev = Evaluator::new(perfect([3.0; 5], 1), acc, cfg(l1(), false), Device::Cpu)
            .unwrap();
        let sample = Sample::new("a", "a.nii.gz", [Some(3.0), None, None, None, None]);
        assert!(matches!(
            ev.evaluate_sample(0, &sample),
            Err(LocateError::InsufficientVolumeDepth { depth: 5, z_size: 5 })
        ));
    }

    #[test]
    fn test_landmark_outside_volume() {
        let mut acc = MemAccessor::default();
        let before = ramp(40, 0.0, 1.0, [None; 5]).with_world_landmarks(&[Some(-3.0), None, None, None, None]);
        let after = ramp(40, 0.0, 1.0, [None; 5]).with_world_landmarks(&[Some(45.0), None, None, None, None]);
        acc.0.insert("before".into(), before);
        acc.0.insert("after".into(), after);
        let mut ev = Evaluator::new(perfect([0.0; 5], 1), acc, cfg(l1(), false), Device::Cpu)
            .unwrap();

        // 标志在扫描起点之前: 没有窗口可以聚合, 而不是标志缺失.
        let sample = Sample::new("before", "before.nii.gz", [Some(-3.0), None, None, None, None]);
        assert!(matches!(
            ev.evaluate_sample(0, &sample),
            Err(LocateError::EmptyAggregation)
        ));

        let sample = Sample::new("after", "after.nii.gz", [Some(45.0), None, None, None, None]);
        assert!(matches!(
            ev.evaluate_sample(1, &sample),
            Err(LocateError::LabelOutOfRange { label: 45, depth: 40 })
        ));
    }

    #[test]
    fn test_scorer_error_not_retried() {
        let mut calls = 0;
        let scorer = |_: ScorerInput<'_>| -> Result<PredictionBatch, BoxedError> {
            calls += 1;
            Err("out of memory".into())
        };
        let mut acc = MemAccessor::default();
        acc.0.insert("a".into(), ramp(100, 0.0, 1.0, [Some(50), None, None, None, None]));
        let mut ev = Evaluator::new(scorer, acc, cfg(l1(), false), Device::Cpu).unwrap();
        let sample = Sample::new("a", "a.nii.gz", [Some(50.0), None, None, None, None]);
        let err = ev.evaluate_sample(0, &sample).unwrap_err();
        drop(ev);

        assert!(matches!(err, LocateError::Scorer(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_missing_volume() {
        let mut ev = Evaluator::new(
            perfect([0.0; 5], 1),
            MemAccessor::default(),
            cfg(l1(), false),
            Device::Cpu,
        )
        .unwrap();
        let sample = Sample::new("x", "x.nii.gz", [None; 5]);
        assert!(matches!(
            ev.evaluate_sample(0, &sample),
            Err(LocateError::Volume { .. })
        ));
    }

    #[test]
    fn test_invalid_config() {
        let bad = SlidingConfig {
            stride: 0,
            ..SlidingConfig::default()
        };
        assert!(matches!(
            Evaluator::new(perfect([0.0; 5], 1), MemAccessor::default(), bad, Device::Cpu),
            Err(ConfigError::InvalidStride)
        ));
    }

    #[test]
    fn test_run_writes_results() {
        let mut acc = MemAccessor::default();
        let mut samples = Vec::new();
        for i in 0..7 {
            let id = format!("p{i}");
            let label = 20 + i;
            acc.0.insert(id.clone(), ramp(60, 0.0, 1.0, [Some(label as i64), None, None, None, None]));
            samples.push(Sample::new(id, format!("p{i}.nii.gz"), [Some(label as f64), None, None, None, None]));
        }

        // 预测值恒为窗口起点之后 3 层, 因此平均值与窗口分布有关.
        let scorer = |input: ScorerInput<'_>| -> Result<PredictionBatch, BoxedError> {
            Ok(Array2::from_elem((input.len(), 1), 3.0))
        };
        let dir = tempfile::tempdir().unwrap();
        let paths = ResultPaths::create(dir.path(), 1, true).unwrap();
        let mut sink = CsvEmitter::new(paths.clone());
        let mut ev = Evaluator::new(scorer, acc, cfg(l1(), false), Device::Cpu).unwrap();

        let records = ev.run(Mode::Test, samples, &mut sink).unwrap();
        assert_eq!(records.len(), 7);

        let pred = fs::read_to_string(paths.pred(Mode::Test)).unwrap();
        let lines: Vec<&str> = pred.lines().collect();
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "L1");
        // 标志 20, 窗口起点 15..=19, 平均起点 17, 预测 20.
        assert_eq!(lines[1], "20");

        let label = fs::read_to_string(paths.label(Mode::Test)).unwrap();
        assert_eq!(label.lines().nth(1), Some("20"));

        for idx in 0..5 {
            assert!(paths.window_pred(Mode::Test, idx, None).is_file());
            assert!(paths.window_pred_world(Mode::Test, idx, None).is_file());
        }
        assert!(!paths.window_pred(Mode::Test, 5, None).exists());

        let windows = fs::read_to_string(paths.window_pred_in_patch(Mode::Test, 0, None)).unwrap();
        assert_eq!(windows, "L1\n3\n3\n3\n3\n3\n");
        let labels = fs::read_to_string(paths.window_label_in_patch(Mode::Test, 0, None)).unwrap();
        assert_eq!(labels, "L1\n20\n20\n20\n20\n20\n");
    }

    struct Probe(mpsc::Sender<()>);

    impl UtilizationProbe for Probe {
        fn sample(&mut self) -> Result<DeviceUsage, BoxedError> {
            let _ = self.0.send(());
            Err("nvml unavailable".into())
        }
    }

    #[test]
    fn test_probe_only_on_first_sample() {
        let mut acc = MemAccessor::default();
        acc.0.insert("a".into(), ramp(40, 0.0, 1.0, [Some(20), None, None, None, None]));
        let samples: Vec<Sample> = (0..3)
            .map(|_| Sample::new("a", "a.nii.gz", [Some(20.0), None, None, None, None]))
            .collect();

        let (tx, rx) = mpsc::channel();
        let mut ev = Evaluator::new(perfect([20.0; 5], 1), acc, cfg(l1(), false), Device::Cpu)
            .unwrap()
            .with_probe(Probe(tx));
        let records = ev.run(Mode::Train, samples, &mut ()).unwrap();
        assert_eq!(records.len(), 3);

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        drop(ev);
        // 探针已被取走, 发送端全部释放后不会再有消息.
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());
    }
}
