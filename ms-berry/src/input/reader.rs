//! 切片文件读取协作者.
//!
//! 体数据的文件级解码不属于本 crate 的职责: 输入阶段只通过
//! [`SliceRead`] 这个窄接口获取已解码的 2D 切片. 这里提供两个
//! 具体实现: npy 格式 ([`NpySliceReader`]) 与灰度图像格式
//! ([`ImageSliceReader`]).

use std::fs::File;
use std::path::Path;

use ndarray::Array2;
use ndarray_npy::ReadNpyExt;

/// 读取单张切片时的错误.
#[derive(Debug)]
pub enum SliceReadError {
    /// 底层 I/O 错误 (文件不存在, 权限不足等).
    Io(std::io::Error),

    /// 文件内容无法按期望的体素类型/维度解码.
    Decode(String),
}

impl std::fmt::Display for SliceReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "slice I/O error: {e}"),
            Self::Decode(msg) => write!(f, "slice decode error: {msg}"),
        }
    }
}

impl std::error::Error for SliceReadError {}

impl From<std::io::Error> for SliceReadError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// 已解码 2D 切片的提供者.
///
/// 实现者负责把一个文件路径变成行优先的 `(h, w)` 数组;
/// 路径不存在或内容不符合期望时返回 [`SliceReadError`].
pub trait SliceRead {
    /// 读取一张扫描切片 (标量强度).
    fn read_scan_slice(&self, path: &Path) -> Result<Array2<f32>, SliceReadError>;

    /// 读取一张标签切片 (整数标签).
    fn read_label_slice(&self, path: &Path) -> Result<Array2<u8>, SliceReadError>;

    /// 该读取器期望的文件名后缀 (含点, 如 `".npy"`).
    fn suffix(&self) -> &'static str;
}

/// 从 `.npy` 文件读取切片.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpySliceReader;

impl SliceRead for NpySliceReader {
    fn read_scan_slice(&self, path: &Path) -> Result<Array2<f32>, SliceReadError> {
        let file = File::open(path)?;
        Array2::<f32>::read_npy(file).map_err(|e| SliceReadError::Decode(e.to_string()))
    }

    fn read_label_slice(&self, path: &Path) -> Result<Array2<u8>, SliceReadError> {
        let file = File::open(path)?;
        Array2::<u8>::read_npy(file).map_err(|e| SliceReadError::Decode(e.to_string()))
    }

    #[inline]
    fn suffix(&self) -> &'static str {
        ".npy"
    }
}

/// 从灰度图像文件 (png 等) 读取切片.
///
/// 扫描切片按 16-bit 灰度解码后转为 `f32`; 标签切片按 8-bit 灰度解码,
/// 像素值即标签值.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageSliceReader;

impl ImageSliceReader {
    fn open(path: &Path) -> Result<image::DynamicImage, SliceReadError> {
        image::open(path).map_err(|e| match e {
            image::ImageError::IoError(io) => SliceReadError::Io(io),
            other => SliceReadError::Decode(other.to_string()),
        })
    }
}

impl SliceRead for ImageSliceReader {
    fn read_scan_slice(&self, path: &Path) -> Result<Array2<f32>, SliceReadError> {
        let img = Self::open(path)?.to_luma16();
        let (w, h) = img.dimensions();
        Ok(Array2::from_shape_fn(
            (h as usize, w as usize),
            |(r, c)| img.get_pixel(c as u32, r as u32).0[0] as f32,
        ))
    }

    fn read_label_slice(&self, path: &Path) -> Result<Array2<u8>, SliceReadError> {
        let img = Self::open(path)?.to_luma8();
        let (w, h) = img.dimensions();
        Ok(Array2::from_shape_fn(
            (h as usize, w as usize),
            |(r, c)| img.get_pixel(c as u32, r as u32).0[0],
        ))
    }

    #[inline]
    fn suffix(&self) -> &'static str {
        ".png"
    }
}
