//! 二阶段推理.
//!
//! 读取前一次实验保存的样本列表与预测世界坐标, 用预测结果代替原有的近似标志,
//! 以其为中心重新做一次滑动窗口推理. 真值仍然来自样本本身.

use crate::consts::LEVEL_HEADERS;
use crate::data::{Sample, Volume, VolumeAccessor, WorldLandmarks};
use crate::emit::{Mode, ResultPaths, DATA_COLUMNS};
use crate::error::{BoxedError, PriorError};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// 前一次实验对每个样本的预测世界坐标, 按扫描路径索引.
#[derive(Clone, Debug, Default)]
pub struct PriorPredictions {
    by_path: HashMap<PathBuf, WorldLandmarks>,
}

impl PriorPredictions {
    /// 从前一次实验的 `{mode}_data.csv` 与 `{mode}_pred_world.csv` 读取.
    ///
    /// 两个文件逐行对应. 预测文件中缺少的层面列记为 `None`;
    /// 同名的列出现多次时 (多层面、五输出模型) 取第一次出现的列.
    pub fn load(paths: &ResultPaths, mode: Mode) -> Result<Self, PriorError> {
        let samples = read_sample_paths(&paths.data(mode))?;
        let preds = read_pred_world(&paths.pred_world(mode))?;
        if samples.len() != preds.len() {
            return Err(PriorError::RowCount {
                samples: samples.len(),
                preds: preds.len(),
            });
        }
        tracing::debug!(
            %mode,
            dir = %paths.dir().display(),
            samples = samples.len(),
            "prior predictions loaded"
        );
        Ok(Self {
            by_path: samples.into_iter().zip(preds).collect(),
        })
    }

    /// 查找扫描 `path` 的预测世界坐标.
    #[inline]
    pub fn get(&self, path: &Path) -> Option<&WorldLandmarks> {
        self.by_path.get(path)
    }

    /// 样本个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

fn open(path: &Path) -> Result<(csv::Reader<File>, csv::StringRecord), PriorError> {
    let csv_err = |source| PriorError::Csv {
        path: path.to_owned(),
        source,
    };
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;
    let headers = rdr.headers().map_err(csv_err)?.clone();
    Ok((rdr, headers))
}

fn read_sample_paths(path: &Path) -> Result<Vec<PathBuf>, PriorError> {
    let (mut rdr, headers) = open(path)?;
    let column = DATA_COLUMNS[1];
    let col = headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| PriorError::MissingColumn {
            path: path.to_owned(),
            column,
        })?;

    let mut ans = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|source| PriorError::Csv {
            path: path.to_owned(),
            source,
        })?;
        ans.push(PathBuf::from(record.get(col).unwrap_or_default()));
    }
    Ok(ans)
}

fn read_pred_world(path: &Path) -> Result<Vec<WorldLandmarks>, PriorError> {
    let (mut rdr, headers) = open(path)?;
    let cols = LEVEL_HEADERS.map(|name| headers.iter().position(|h| h == name));
    if cols.iter().all(Option::is_none) {
        return Err(PriorError::MissingColumn {
            path: path.to_owned(),
            column: LEVEL_HEADERS[0],
        });
    }

    let mut ans = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record.map_err(|source| PriorError::Csv {
            path: path.to_owned(),
            source,
        })?;
        let mut world = WorldLandmarks::default();
        for ((slot, col), column) in world.iter_mut().zip(cols).zip(LEVEL_HEADERS) {
            let value = match col.and_then(|c| record.get(c)) {
                Some(v) if !v.is_empty() => v,
                _ => continue,
            };
            *slot = Some(value.parse().map_err(|_| PriorError::InvalidValue {
                row,
                column,
                value: value.to_string(),
            })?);
        }
        ans.push(world);
    }
    Ok(ans)
}

/// 以前一次实验的预测结果作为近似标志的扫描加载器.
///
/// 扫描本身由 `inner` 加载; 前一次实验有预测的层面使用预测位置,
/// 其余层面保留 `inner` 给出的标志. 前一次实验中没有的样本视为加载失败.
#[derive(Clone, Debug)]
pub struct RefinedAccessor<A> {
    inner: A,
    prior: PriorPredictions,
}

impl<A> RefinedAccessor<A> {
    /// 创建.
    pub fn new(inner: A, prior: PriorPredictions) -> Self {
        Self { inner, prior }
    }

    /// 前一次实验的预测.
    #[inline]
    pub fn prior(&self) -> &PriorPredictions {
        &self.prior
    }
}

impl<A: VolumeAccessor> VolumeAccessor for RefinedAccessor<A> {
    fn load(&self, sample: &Sample) -> Result<Volume, BoxedError> {
        let prior = self
            .prior
            .get(&sample.path)
            .ok_or_else(|| format!("no prior prediction for `{}`", sample.path.display()))?;
        let volume = self.inner.load(sample)?;

        let mut landmarks = *volume.landmarks();
        for (slot, w) in landmarks.iter_mut().zip(prior) {
            if let Some(w) = w {
                *slot = Some(volume.world_to_index(*w));
            }
        }
        Ok(volume.with_landmarks(landmarks))
    }
}
