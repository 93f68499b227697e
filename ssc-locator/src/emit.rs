//! 结果持久化.
//!
//! 每个模式 (train/valid/test)、每种结果各对应一个 CSV 文件, 结果按行追加.
//! 文件第一次创建时写入表头.

use crate::consts::DIAGNOSTIC_SAMPLES;
use crate::error::EmitError;
use crate::eval::{LevelRecord, SampleRecord};
use crate::Level;
use itertools::Itertools;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// 样本列表文件 (`{mode}_data.csv`) 的列: 病例编号与扫描路径.
pub const DATA_COLUMNS: [&str; 2] = ["PatID", "fpath"];

/// 数据集划分模式.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// 训练集.
    Train,

    /// 验证集.
    Valid,

    /// 测试集.
    Test,
}

impl Mode {
    /// 用于文件名的小写名称.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Valid => "valid",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 向 `path` 追加若干行. 文件不存在 (或为空) 时先写入 `header`.
///
/// 不同文件的行宽可以不同, 同一文件内不做行宽检查.
pub fn append_rows<P, I, R, T>(path: P, rows: I, header: &[&str]) -> Result<(), EmitError>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = T>,
    T: ToString,
{
    let path = path.as_ref();
    let csv_err = |source| EmitError::Csv {
        path: path.to_owned(),
        source,
    };

    let is_new = fs::metadata(path).map_or(true, |m| m.len() == 0);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| EmitError::Io {
            path: path.to_owned(),
            source,
        })?;
    let mut w = csv::WriterBuilder::new().flexible(true).from_writer(file);

    if is_new && !header.is_empty() {
        w.write_record(header).map_err(csv_err)?;
    }
    for row in rows {
        w.write_record(row.into_iter().map(|v| v.to_string()))
            .map_err(csv_err)?;
    }
    w.flush().map_err(|source| EmitError::Io {
        path: path.to_owned(),
        source,
    })
}

/// 一次实验的结果文件路径, 全部位于 `{model_dir}/{id}` 下.
#[derive(Clone, Debug)]
pub struct ResultPaths {
    dir: PathBuf,
}

impl ResultPaths {
    /// 直接使用 `dir` 作为结果目录, 不触碰文件系统.
    pub fn at(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_owned(),
        }
    }

    /// 在 `model_dir` 下创建实验 `id` 的结果目录.
    ///
    /// `fresh` 为真时要求该目录此前不存在, 否则返回 [`EmitError::DirectoryExists`].
    /// 评估已有实验时应传入 `false`.
    pub fn create(model_dir: impl AsRef<Path>, id: u32, fresh: bool) -> Result<Self, EmitError> {
        let dir = model_dir.as_ref().join(id.to_string());
        if fresh && dir.is_dir() {
            return Err(EmitError::DirectoryExists(dir));
        }
        fs::create_dir_all(&dir).map_err(|source| EmitError::Io {
            path: dir.clone(),
            source,
        })?;
        tracing::debug!(dir = %dir.display(), "result directory ready");
        Ok(Self { dir })
    }

    /// 结果目录.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, name: String) -> PathBuf {
        self.dir.join(name)
    }

    /// 已评估样本的列表, 与其余聚合文件逐行对应.
    pub fn data(&self, mode: Mode) -> PathBuf {
        self.file(format!("{mode}_data.csv"))
    }

    /// 真值标志的图像坐标.
    pub fn label(&self, mode: Mode) -> PathBuf {
        self.file(format!("{mode}_label.csv"))
    }

    /// 平均后的预测图像坐标.
    pub fn pred(&self, mode: Mode) -> PathBuf {
        self.file(format!("{mode}_pred.csv"))
    }

    /// 平均后的预测图像坐标 (截断为整数).
    pub fn pred_int(&self, mode: Mode) -> PathBuf {
        self.file(format!("{mode}_pred_int.csv"))
    }

    /// 平均后的预测世界坐标.
    pub fn pred_world(&self, mode: Mode) -> PathBuf {
        self.file(format!("{mode}_pred_world.csv"))
    }

    /// 真值标志的世界坐标.
    pub fn world(&self, mode: Mode) -> PathBuf {
        self.file(format!("{mode}_world.csv"))
    }

    /// 第 `idx` 个样本逐窗口的预测图像坐标.
    pub fn window_pred(&self, mode: Mode, idx: usize, level: Option<Level>) -> PathBuf {
        self.file(format!("{mode}_pred_{idx}{}.csv", level_suffix(level)))
    }

    /// 第 `idx` 个样本逐窗口的模型原始输出.
    pub fn window_pred_in_patch(&self, mode: Mode, idx: usize, level: Option<Level>) -> PathBuf {
        self.file(format!("{mode}_pred_{idx}_in_patch{}.csv", level_suffix(level)))
    }

    /// 第 `idx` 个样本逐窗口的近似标志 (加上窗口起点后).
    pub fn window_label_in_patch(&self, mode: Mode, idx: usize, level: Option<Level>) -> PathBuf {
        self.file(format!("{mode}_label_{idx}_in_patch{}.csv", level_suffix(level)))
    }

    /// 第 `idx` 个样本逐窗口的预测世界坐标.
    pub fn window_pred_world(&self, mode: Mode, idx: usize, level: Option<Level>) -> PathBuf {
        self.file(format!("{mode}_pred_{idx}_world{}.csv", level_suffix(level)))
    }
}

fn level_suffix(level: Option<Level>) -> String {
    level.map_or_else(String::new, |l| format!("_{l}"))
}

/// 样本结果的去向.
pub trait ResultSink {
    /// 保存一个样本的结果. 样本按评估顺序依次到达.
    fn emit(&mut self, mode: Mode, record: &SampleRecord) -> Result<(), EmitError>;
}

/// 丢弃所有结果.
impl ResultSink for () {
    #[inline]
    fn emit(&mut self, _: Mode, _: &SampleRecord) -> Result<(), EmitError> {
        Ok(())
    }
}

/// 把样本结果逐行追加到 [`ResultPaths`] 下的 CSV 文件.
///
/// 每个样本在聚合文件中占一行, 多个层面的结果按层面顺序拼接在同一行.
/// 每个模式下前 [`DIAGNOSTIC_SAMPLES`] 个样本另外保存逐窗口的结果;
/// 样本包含多个层面的结果时, 逐窗口文件名带有层面后缀.
#[derive(Clone, Debug)]
pub struct CsvEmitter {
    paths: ResultPaths,
}

impl CsvEmitter {
    /// 创建.
    pub fn new(paths: ResultPaths) -> Self {
        Self { paths }
    }

    /// 结果路径.
    #[inline]
    pub fn paths(&self) -> &ResultPaths {
        &self.paths
    }

    fn emit_windows(
        &self,
        mode: Mode,
        idx: usize,
        rec: &LevelRecord,
        suffixed: bool,
    ) -> Result<(), EmitError> {
        let level = suffixed.then_some(rec.level);
        let header = rec.header.as_slice();
        let res = &rec.result;

        append_rows(
            self.paths.window_pred(mode, idx, level),
            res.pred_in_image.outer_iter(),
            header,
        )?;
        append_rows(
            self.paths.window_pred_in_patch(mode, idx, level),
            res.pred_in_patch.outer_iter(),
            header,
        )?;
        append_rows(
            self.paths.window_label_in_patch(mode, idx, level),
            res.label_in_image.iter().map(std::iter::once),
            &[rec.level.header()],
        )?;
        append_rows(
            self.paths.window_pred_world(mode, idx, level),
            res.pred_in_world.outer_iter(),
            header,
        )
    }
}

fn cell<T: ToString>(v: &Option<T>) -> String {
    v.as_ref().map_or_else(String::new, T::to_string)
}

impl ResultSink for CsvEmitter {
    fn emit(&mut self, mode: Mode, record: &SampleRecord) -> Result<(), EmitError> {
        if record.index < DIAGNOSTIC_SAMPLES {
            let suffixed = record.levels.len() > 1;
            for rec in record.levels.iter() {
                self.emit_windows(mode, record.index, rec, suffixed)?;
            }
        }

        let header = record
            .levels
            .iter()
            .flat_map(|r| r.header.iter().copied())
            .collect_vec();
        let levels = &record.levels;

        let label = levels.iter().flat_map(|r| r.label_in_image.iter().map(cell));
        let pred = levels.iter().flat_map(|r| r.result.mean_in_image.iter());
        let pred_int = levels.iter().flat_map(|r| r.result.mean_in_image_int.iter());
        let pred_world = levels.iter().flat_map(|r| r.result.mean_in_world.iter());
        let world = levels.iter().flat_map(|r| r.world.iter().map(cell));

        append_rows(
            self.paths.data(mode),
            [[record.id.clone(), record.path.display().to_string()]],
            &DATA_COLUMNS,
        )?;
        append_rows(self.paths.label(mode), [label], &header)?;
        append_rows(self.paths.pred(mode), [pred], &header)?;
        append_rows(self.paths.pred_int(mode), [pred_int], &header)?;
        append_rows(self.paths.pred_world(mode), [pred_world], &header)?;
        append_rows(self.paths.world(mode), [world], &header)?;

        tracing::debug!(
            %mode,
            index = record.index,
            id = %record.id,
            "sample results appended"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::reconcile;
    use ndarray::arr2;

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_append_rows_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("valid_pred.csv");

        append_rows(&p, [[50.5]], &["L1"]).unwrap();
        append_rows(&p, [[49.0]], &["L1"]).unwrap();
        assert_eq!(read(&p), "L1\n50.5\n49\n");
    }

    #[test]
    fn test_append_rows_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("m.csv");
        let m = arr2(&[[1.0, 2.5], [3.0, -4.0]]);
        append_rows(&p, m.outer_iter(), &["L1", "L2"]).unwrap();
        assert_eq!(read(&p), "L1,L2\n1,2.5\n3,-4\n");
    }

    #[test]
    fn test_append_rows_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("n.csv");
        append_rows(&p, [[1i64, 2]], &[]).unwrap();
        assert_eq!(read(&p), "1,2\n");
    }

    #[test]
    fn test_result_paths() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ResultPaths::create(dir.path(), 7, true).unwrap();
        assert!(paths.dir().is_dir());
        assert!(paths.pred(Mode::Valid).ends_with("7/valid_pred.csv"));
        assert!(paths.pred_int(Mode::Test).ends_with("7/test_pred_int.csv"));
        assert!(paths
            .window_pred_in_patch(Mode::Train, 3, None)
            .ends_with("train_pred_3_in_patch.csv"));
        let l2 = Level::new(2);
        assert!(paths
            .window_label_in_patch(Mode::Valid, 0, l2)
            .ends_with("valid_label_0_in_patch_L2.csv"));
        assert!(paths
            .window_pred_world(Mode::Valid, 1, l2)
            .ends_with("valid_pred_1_world_L2.csv"));

        assert!(matches!(
            ResultPaths::create(dir.path(), 7, true),
            Err(EmitError::DirectoryExists(_))
        ));
        assert!(ResultPaths::create(dir.path(), 7, false).is_ok());
        assert!(paths.data(Mode::Valid).ends_with("7/valid_data.csv"));
    }

    fn level_record(level: u8, pred: f64) -> LevelRecord {
        let level = Level::new(level).unwrap();
        LevelRecord {
            level,
            header: vec![level.header()],
            label_in_image: vec![Some(pred as i64)],
            world: vec![None],
            result: reconcile([([pred - 1.0], 1), ([pred - 2.0], 2)], 1.0, 0.0).unwrap(),
        }
    }

    fn sample_record(index: usize, levels: Vec<LevelRecord>) -> SampleRecord {
        SampleRecord {
            index,
            id: format!("p{index}"),
            path: PathBuf::from(format!("/scans/p{index}.nii.gz")),
            levels,
        }
    }

    #[test]
    fn test_single_level_windows_unsuffixed() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ResultPaths::at(dir.path());
        let mut sink = CsvEmitter::new(paths.clone());
        sink.emit(Mode::Valid, &sample_record(0, vec![level_record(2, 30.0)]))
            .unwrap();

        assert!(paths.window_pred(Mode::Valid, 0, None).is_file());
        assert!(!paths.window_pred(Mode::Valid, 0, Level::new(2)).exists());
        assert_eq!(read(&paths.pred(Mode::Valid)), "L2
30
");
        assert_eq!(read(&paths.label(Mode::Valid)), "L2
30
");
        assert_eq!(read(&paths.world(Mode::Valid)), "L2
\"\"
");
        assert_eq!(
            read(&paths.data(Mode::Valid)),
            "PatID,fpath
p0,/scans/p0.nii.gz
"
        );
    }

    #[test]
    fn test_multi_level_windows_suffixed() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ResultPaths::at(dir.path());
        let mut sink = CsvEmitter::new(paths.clone());
        let levels = vec![level_record(1, 10.0), level_record(2, 20.0)];
        sink.emit(Mode::Test, &sample_record(0, levels)).unwrap();

        assert!(!paths.window_pred(Mode::Test, 0, None).exists());
        assert_eq!(
            read(&paths.window_pred(Mode::Test, 0, Level::new(1))),
            "L1
10
10
"
        );
        assert_eq!(
            read(&paths.window_pred(Mode::Test, 0, Level::new(2))),
            "L2
20
20
"
        );
        assert_eq!(read(&paths.pred(Mode::Test)), "L1,L2
10,20
");
    }

    #[test]
    fn test_diagnostics_only_for_first_samples() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ResultPaths::at(dir.path());
        let mut sink = CsvEmitter::new(paths.clone());
        let record = sample_record(DIAGNOSTIC_SAMPLES, vec![level_record(1, 10.0)]);
        sink.emit(Mode::Train, &record).unwrap();

        assert!(!paths.window_pred(Mode::Train, DIAGNOSTIC_SAMPLES, None).exists());
        assert_eq!(read(&paths.pred_world(Mode::Train)), "L1
10
");
    }
}
