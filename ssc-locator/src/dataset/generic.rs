//! 通用样本加载器.
//!
//! 提供迭代器风格的数据集获取模式.

use super::LandmarkTable;
use crate::data::Sample;
use crate::error::LandmarkError;
use std::path::{Path, PathBuf};

/// 文件名构造器. 接受病例编号, 获得扫描文件相对数据集目录的路径.
pub type FilenameBuilder = fn(&str) -> PathBuf;

/// 默认的扫描文件布局: `{id}/CTimage.nii.gz`.
pub fn ct_image_nii(id: &str) -> PathBuf {
    [id, "CTimage.nii.gz"].iter().collect()
}

/// 从指定病例、路径、标志表和文件名构造器创建样本加载器.
///
/// # 注意
///
/// 1. `path` 必须是目录, 否则程序 panic.
/// 2. `ids` 中不在 `table` 里的病例会在迭代时返回 [`LandmarkError::UnknownPatient`].
///   扫描文件本身直到评估时才会读取.
pub fn sample_loader<'t, I, S, P>(
    ids: I,
    path: P,
    table: &'t LandmarkTable,
    builder: FilenameBuilder,
) -> SampleLoader<'t>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    P: AsRef<Path>,
{
    let path = path.as_ref().to_owned();
    assert!(path.is_dir());

    let mut ids: Vec<String> = ids.into_iter().map(Into::into).collect();
    ids.reverse();

    SampleLoader {
        path,
        ids_rev: ids,
        table,
        builder,
    }
}

/// 按标志表中的顺序加载全部病例, 使用默认文件布局.
pub fn full_sample_loader<P: AsRef<Path>>(path: P, table: &LandmarkTable) -> SampleLoader<'_> {
    sample_loader(table.ids(), path, table, ct_image_nii)
}

/// 样本加载器, 并在内部自动转换文件名.
#[derive(Debug)]
pub struct SampleLoader<'t> {
    path: PathBuf,
    ids_rev: Vec<String>,
    table: &'t LandmarkTable,
    builder: FilenameBuilder,
}

impl Iterator for SampleLoader<'_> {
    type Item = Result<Sample, LandmarkError>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids_rev.pop()?;
        let Some(world) = self.table.get(&id) else {
            return Some(Err(LandmarkError::UnknownPatient(id)));
        };
        let path = self.path.join((self.builder)(&id));
        Some(Ok(Sample::new(id, path, *world)))
    }
}

impl ExactSizeIterator for SampleLoader<'_> {
    #[inline]
    fn len(&self) -> usize {
        self.ids_rev.len()
    }
}
