//! 运行时错误.

use crate::Level;
use std::path::PathBuf;
use thiserror::Error;

/// 装箱的外部错误 (模型推理、数据加载等由协作方抛出的错误).
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 滑动窗口定位流程中的运行时错误.
///
/// 所有操作对给定输入都是确定性的, 因此任何错误都不应重试.
#[derive(Error, Debug)]
pub enum LocateError {
    /// 扫描的 z 轴长度不足以在标志附近放置一个窗口.
    ///
    /// 该错误对当前样本是致命的, 必须上报给调用方, 不允许静默跳过.
    #[error("volume depth {depth} must be greater than window size {z_size}")]
    InsufficientVolumeDepth {
        /// 扫描沿 z 轴的切片数.
        depth: usize,
        /// 窗口高度.
        z_size: usize,
    },

    /// 窗口生成阶段没有产生任何窗口, 无法求平均.
    #[error("no window was generated, nothing to aggregate")]
    EmptyAggregation,

    /// 近似标志位置不在扫描的 z 轴范围内.
    #[error("approximate label {label} is outside of volume depth {depth}")]
    LabelOutOfRange {
        /// 近似标志的 z 轴索引 (可能为负).
        label: i64,
        /// 扫描沿 z 轴的切片数.
        depth: usize,
    },

    /// 样本缺少某个层面的标志位置.
    #[error("landmark of level {0} is missing")]
    MissingLandmark(Level),

    /// 模型输出的形状与窗口批次不匹配.
    #[error("prediction shape mismatch: expected {expected}, found {found}")]
    PredictionShape {
        /// 期望的形状描述.
        expected: String,
        /// 实际的形状描述.
        found: String,
    },

    /// 配置参数不合法.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 模型推理错误. 原样向上传递, 不做本地恢复.
    #[error("patch scorer failed")]
    Scorer(#[source] BoxedError),

    /// 扫描加载错误.
    #[error("failed to load volume `{}`", path.display())]
    Volume {
        /// 扫描文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: BoxedError,
    },
}

/// 配置参数校验错误.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum ConfigError {
    /// 窗口高度必须大于 0.
    #[error("z_size must be greater than 0")]
    InvalidZSize,

    /// 滑动步长必须大于 0.
    #[error("stride must be greater than 0")]
    InvalidStride,

    /// 批大小必须大于 0.
    #[error("batch size must be greater than 0")]
    InvalidBatchSize,
}

/// 结果持久化错误.
#[derive(Error, Debug)]
pub enum EmitError {
    /// 底层 I/O 错误.
    #[error("I/O error on `{}`", path.display())]
    Io {
        /// 出错的文件或目录.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// CSV 编码错误.
    #[error("failed to write csv `{}`", path.display())]
    Csv {
        /// 出错的文件.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: csv::Error,
    },

    /// 同一结果目录已经存在.
    #[error("result directory `{}` already exists", .0.display())]
    DirectoryExists(PathBuf),
}

/// 评估流程错误. 标明出错的样本, 以便调用方定位.
#[derive(Error, Debug)]
pub enum EvalError {
    /// 某个样本的定位失败.
    #[error("sample #{index} (`{}`) failed", path.display())]
    Sample {
        /// 样本在当前模式中的序号.
        index: usize,
        /// 样本扫描路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: LocateError,
    },

    /// 结果持久化失败.
    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// 层面标志表读取错误.
#[derive(Error, Debug)]
pub enum LandmarkError {
    /// CSV 解析错误.
    #[error("failed to read landmark table")]
    Csv(#[from] csv::Error),

    /// 缺少必需的列.
    #[error("landmark table has no column `{0}`")]
    MissingColumn(&'static str),

    /// 无法解析为数值的单元格.
    #[error("invalid value `{value}` in column `{column}` of row {row}")]
    InvalidValue {
        /// 数据行号 (不含表头, 从 0 开始).
        row: usize,
        /// 列名.
        column: &'static str,
        /// 原始文本.
        value: String,
    },

    /// 表中没有该病例.
    #[error("patient `{0}` is not in the landmark table")]
    UnknownPatient(String),
}

/// 读取前一次实验结果时的错误.
#[derive(Error, Debug)]
pub enum PriorError {
    /// 文件打开或 CSV 解析错误.
    #[error("failed to read `{}`", path.display())]
    Csv {
        /// 出错的文件.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: csv::Error,
    },

    /// 缺少必需的列.
    #[error("`{}` has no column `{column}`", path.display())]
    MissingColumn {
        /// 出错的文件.
        path: PathBuf,
        /// 列名.
        column: &'static str,
    },

    /// 无法解析为数值的单元格.
    #[error("invalid value `{value}` in column `{column}` of row {row}")]
    InvalidValue {
        /// 数据行号 (不含表头, 从 0 开始).
        row: usize,
        /// 列名.
        column: &'static str,
        /// 原始文本.
        value: String,
    },

    /// 样本列表与预测结果的行数不一致.
    #[error("{samples} sample row(s) but {preds} prediction row(s)")]
    RowCount {
        /// 样本列表行数.
        samples: usize,
        /// 预测结果行数.
        preds: usize,
    },
}
