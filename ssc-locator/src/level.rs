//! 评分层面.

use crate::consts::{LEVEL_COUNT, LEVEL_HEADERS};
use std::fmt;

/// 评分层面, 取值为 1 到 5. 每个层面对应一个解剖学标志区域.
///
/// 该结构是只读的. 只能通过 [`Level::new`] 或 [`Level::all`] 构造合法实例.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct Level(u8);

impl Level {
    /// 构建层面. `value` 必须位于 `1..=5` 内, 否则返回 `None`.
    #[inline]
    pub const fn new(value: u8) -> Option<Level> {
        if value >= 1 && value as usize <= LEVEL_COUNT {
            Some(Self(value))
        } else {
            None
        }
    }

    /// 按升序迭代全部 5 个层面.
    #[inline]
    pub fn all() -> impl ExactSizeIterator<Item = Level> {
        (1..=LEVEL_COUNT as u8).map(Self)
    }

    /// 层面编号 (1-based).
    #[inline]
    pub const fn get(&self) -> u8 {
        self.0
    }

    /// 层面在按层面排列的数组中的位置 (0-based).
    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize - 1
    }

    /// 结果文件表头中该层面的名称, 如 `"L3"`.
    #[inline]
    pub const fn header(&self) -> &'static str {
        LEVEL_HEADERS[self.index()]
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

impl TryFrom<u8> for Level {
    type Error = u8;

    #[inline]
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(value)
    }
}

impl From<Level> for u8 {
    #[inline]
    fn from(value: Level) -> Self {
        value.0
    }
}

/// 一次评估需要处理的层面集合.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LevelSelection {
    /// 只评估一个层面.
    Single(Level),

    /// 评估全部 5 个层面, 每个层面各自进行一次滑动窗口推理.
    All,
}

impl LevelSelection {
    /// 按升序列出选中的层面.
    pub fn levels(&self) -> Vec<Level> {
        match self {
            Self::Single(level) => vec![*level],
            Self::All => Level::all().collect(),
        }
    }

    /// 是否选中了多个层面.
    #[inline]
    pub fn is_multiple(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl Default for LevelSelection {
    fn default() -> Self {
        Self::All
    }
}

/// 根据模型单个窗口输出的列数确定结果表头.
///
/// 单输出模型只预测 `level` 本身; 五输出模型一次预测全部层面. 其他列数返回 `None`.
pub fn header_for(level: Level, width: usize) -> Option<Vec<&'static str>> {
    match width {
        1 => Some(vec![level.header()]),
        LEVEL_COUNT => Some(LEVEL_HEADERS.to_vec()),
        _ => None,
    }
}
