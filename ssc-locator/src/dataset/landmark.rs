//! 层面标志表.
//!
//! 表格每行对应一个病例, 记录 5 个层面标志沿 z 轴的世界坐标:
//!
//! ```text
//! PatID,L1_pos,L2_pos,L3_pos,L4_pos,L5_pos
//! Pat_001,-120.5,-160.0,-201.25,-240.0,-281.5
//! ```
//!
//! 空单元格表示该层面缺失.

use crate::consts::LEVEL_COUNT;
use crate::data::WorldLandmarks;
use crate::error::LandmarkError;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// 病例编号所在列.
pub const ID_COLUMN: &str = "PatID";

/// 各层面世界坐标所在列.
pub const POS_COLUMNS: [&str; LEVEL_COUNT] = ["L1_pos", "L2_pos", "L3_pos", "L4_pos", "L5_pos"];

/// 层面标志表. 保留文件中的行顺序.
#[derive(Clone, Debug, Default)]
pub struct LandmarkTable {
    rows: Vec<(String, WorldLandmarks)>,
    index: HashMap<String, usize>,
}

impl LandmarkTable {
    /// 从 CSV 文件读取.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, LandmarkError> {
        let rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path.as_ref())?;
        Self::from_csv_reader(rdr)
    }

    /// 从任意 CSV 数据源读取.
    pub fn from_reader<R: Read>(r: R) -> Result<Self, LandmarkError> {
        let rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(r);
        Self::from_csv_reader(rdr)
    }

    fn from_csv_reader<R: Read>(mut rdr: csv::Reader<R>) -> Result<Self, LandmarkError> {
        let headers = rdr.headers()?.clone();
        let find = |name: &'static str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or(LandmarkError::MissingColumn(name))
        };
        let id_col = find(ID_COLUMN)?;
        let mut pos_cols = [0usize; LEVEL_COUNT];
        for (slot, name) in pos_cols.iter_mut().zip(POS_COLUMNS) {
            *slot = find(name)?;
        }

        let mut table = Self::default();
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            let id = record.get(id_col).unwrap_or_default().to_string();

            let mut world = [None; LEVEL_COUNT];
            for ((slot, &col), column) in world.iter_mut().zip(pos_cols.iter()).zip(POS_COLUMNS) {
                let value = record.get(col).unwrap_or_default();
                if value.is_empty() {
                    continue;
                }
                *slot = Some(value.parse().map_err(|_| LandmarkError::InvalidValue {
                    row,
                    column,
                    value: value.to_string(),
                })?);
            }
            table.push(id, world);
        }
        Ok(table)
    }

    /// 追加一行. 重复的病例编号以后者为准.
    pub fn push(&mut self, id: impl Into<String>, world: WorldLandmarks) {
        let id = id.into();
        match self.index.get(&id) {
            Some(&i) => self.rows[i].1 = world,
            None => {
                self.index.insert(id.clone(), self.rows.len());
                self.rows.push((id, world));
            }
        }
    }

    /// 查找病例的层面标志.
    #[inline]
    pub fn get(&self, id: &str) -> Option<&WorldLandmarks> {
        self.index.get(id).map(|&i| &self.rows[i].1)
    }

    /// 按文件顺序迭代病例编号.
    pub fn ids(&self) -> impl ExactSizeIterator<Item = &str> {
        self.rows.iter().map(|(id, _)| id.as_str())
    }

    /// 病例个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 是否为空表.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
