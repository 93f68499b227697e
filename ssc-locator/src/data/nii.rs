//! nii 格式 3D CT 扫描加载.

use super::{Sample, Volume, VolumeAccessor};
use crate::error::BoxedError;
use crate::Idx3d;
use ndarray::Array3;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 体素间距, 按 (z, H, W) 排列.
#[inline]
fn get_spacing_from_header(h: &NiftiHeader) -> [f64; 3] {
    let [_, w, h, z, ..] = h.pixdim;
    [z as f64, h as f64, w as f64]
}

/// 物理原点, 按 (z, H, W) 排列.
///
/// `sform_code > 0` 时使用 sform 仿射矩阵的平移列 `srow_*[3]`,
/// 否则使用 qform 偏移 `quatern_{x,y,z}`.
fn get_origin_from_header(h: &NiftiHeader) -> [f64; 3] {
    if h.sform_code > 0 {
        [h.srow_z[3] as f64, h.srow_y[3] as f64, h.srow_x[3] as f64]
    } else {
        [h.quatern_z as f64, h.quatern_y as f64, h.quatern_x as f64]
    }
}

/// 打开 nii (或 nii.gz) 格式的 3D CT 扫描, 不带层面标志.
pub fn open_volume<P: AsRef<Path>>(path: P) -> Result<Volume, BoxedError> {
    let obj = ReaderOptions::new().read_file(path.as_ref())?;
    let header = obj.header().clone();

    // [W, H, z] -> [z, H, W].
    let data = obj
        .into_volume()
        .into_ndarray::<f32>()?
        .permuted_axes([2, 1, 0].as_slice());

    // The nature of nifti data field layout.
    debug_assert!(data.is_standard_layout());

    let data =
        Array3::<f32>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())?;

    Ok(Volume::new(
        data,
        get_origin_from_header(&header),
        get_spacing_from_header(&header),
    ))
}

/// 基于 nifti 文件的扫描加载器.
///
/// 层面标志由样本携带的世界坐标换算而来, 越界的索引原样保留.
#[derive(Copy, Clone, Debug, Default)]
pub struct NiftiAccessor;

impl VolumeAccessor for NiftiAccessor {
    fn load(&self, sample: &Sample) -> Result<Volume, BoxedError> {
        tracing::debug!(path = %sample.path.display(), "loading nifti volume");
        let volume = open_volume(&sample.path)?;
        Ok(volume.with_world_landmarks(&sample.world))
    }
}
