use crate::error::{ConfigError, LocateError};

/// 窗口起点的分批迭代器. 只做索引运算, 不接触体数据.
///
/// 起点从 `lower = max(0, label - z_size)` 开始, 以 `stride` 递增, 且始终满足
/// `start < label` 与 `start < higher`, 其中 `higher = min(depth, label + z_size)`.
/// 每批最多 `batch_size` 个起点; 起点用尽时剩余的不完整批次同样会被产出.
///
/// # 注意
///
/// 窗口只出现在近似标志 **之下**. `higher` 一侧的范围永远不会被覆盖,
/// 这一非对称行为是有意保留的.
#[derive(Clone, Debug)]
pub struct StartBatches {
    next: usize,
    lower: usize,
    label: usize,
    higher: usize,
    stride: usize,
    batch_size: usize,
}

impl StartBatches {
    /// 创建起点迭代器. 所有前置条件都在产出任何窗口之前检查.
    ///
    /// - `depth <= z_size` 时返回 [`LocateError::InsufficientVolumeDepth`];
    /// - `label >= depth` 时返回 [`LocateError::LabelOutOfRange`];
    /// - `z_size`, `stride`, `batch_size` 为 0 时返回 [`LocateError::Config`].
    pub fn new(
        depth: usize,
        label: usize,
        z_size: usize,
        stride: usize,
        batch_size: usize,
    ) -> Result<Self, LocateError> {
        if z_size == 0 {
            return Err(ConfigError::InvalidZSize.into());
        }
        if stride == 0 {
            return Err(ConfigError::InvalidStride.into());
        }
        if batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize.into());
        }
        if depth <= z_size {
            return Err(LocateError::InsufficientVolumeDepth { depth, z_size });
        }
        if label >= depth {
            return Err(LocateError::LabelOutOfRange {
                label: label as i64,
                depth,
            });
        }

        let lower = label.saturating_sub(z_size);
        let higher = depth.min(label.saturating_add(z_size));
        Ok(Self {
            next: lower,
            lower,
            label,
            higher,
            stride,
            batch_size,
        })
    }

    /// 起点下界 (含).
    #[inline]
    pub fn lower(&self) -> usize {
        self.lower
    }

    /// 起点上界 (不含).
    #[inline]
    pub fn higher(&self) -> usize {
        self.higher
    }

    /// 尚未产出的起点个数.
    pub fn remaining_windows(&self) -> usize {
        let bound = self.label.min(self.higher);
        if self.next >= bound {
            0
        } else {
            (bound - self.next - 1) / self.stride + 1
        }
    }

    #[inline]
    fn has_next(&self) -> bool {
        self.next < self.label && self.next < self.higher
    }
}

impl Iterator for StartBatches {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        let mut batch = Vec::with_capacity(self.batch_size.min(self.remaining_windows()));
        while self.has_next() {
            batch.push(self.next);
            // 溢出时起点必然越过上界.
            self.next = self.next.checked_add(self.stride).unwrap_or(self.higher);
            if batch.len() >= self.batch_size || self.next >= self.higher {
                break;
            }
        }
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = match self.remaining_windows() {
            0 => 0,
            r => (r - 1) / self.batch_size + 1,
        };
        (n, Some(n))
    }
}

impl ExactSizeIterator for StartBatches {}
