//! 数据集操作.

use std::env;
use std::path::{Path, PathBuf};

pub mod generic;
mod landmark;

pub use generic::{full_sample_loader, sample_loader, SampleLoader};
pub use landmark::{LandmarkTable, ID_COLUMN, POS_COLUMNS};

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 获取扫描数据集目录.
///
/// 1. 若环境变量 `$SSC_DATA_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/SSc`.
pub fn data_dir_from_env_or_home() -> Option<PathBuf> {
    from_env_or("SSC_DATA_DIR", home_dataset_dir_with(["SSc"]))
}

/// 获取层面标志表路径.
///
/// 1. 若环境变量 `$SSC_LANDMARK_FILE` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/SSc/landmarks.csv`.
pub fn landmark_file_from_env_or_home() -> Option<PathBuf> {
    from_env_or(
        "SSC_LANDMARK_FILE",
        home_dataset_dir_with(["SSc", "landmarks.csv"]),
    )
}

fn from_env_or(key: &str, fallback: Option<PathBuf>) -> Option<PathBuf> {
    match env::var(key) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => fallback,
    }
}
