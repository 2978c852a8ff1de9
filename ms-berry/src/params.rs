//! 流水线运行参数.
//!
//! 一次运行的全部标量/字符串参数在运行前一次性构建并校验
//! ([`ParameterSet::builder`]), 此后保持不可变. 不存在 "部分配置" 状态.

use std::fmt;
use std::path::PathBuf;

use crate::consts::{DEFAULT_ERROR_TOLERANCE, DEFAULT_MAX_ITERATIONS, DEFAULT_SMOOTHING_FACTOR};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 切片范围: 起始切片号 + 切片个数.
///
/// 起始切片号允许为负 (文件编号约定由数据集决定).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SliceRange {
    /// 起始切片号.
    pub start: i64,

    /// 切片个数.
    pub count: usize,
}

impl SliceRange {
    /// 构建切片范围.
    #[inline]
    pub const fn new(start: i64, count: usize) -> Self {
        Self { start, count }
    }

    /// 按升序迭代范围内的所有切片号.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = i64> {
        self.start..self.start + self.count as i64
    }
}

/// 参数构建时的校验错误.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamError {
    /// 未提供任何通道扩展名.
    NoChannels,

    /// 声明的通道个数与扩展名个数不一致. (声明数, 扩展名数)
    ChannelCountMismatch(usize, usize),

    /// 病人 ID 为空.
    EmptyPatientId,

    /// 图像或分割切片范围的切片个数为 0.
    EmptySliceRange,

    /// 邻域半径为负数.
    NegativeRadius(i64),

    /// 平滑因子非有限或为负.
    InvalidSmoothingFactor(f64),

    /// 收敛容差非有限或为负.
    InvalidErrorTolerance(f64),

    /// 迭代次数上限为 0.
    ZeroIterationCap,

    /// 真值标签集合为空.
    EmptyTruthLabels,

    /// 真值标签超出 `[0, number_of_classes)` 范围.
    TruthLabelOutOfRange(u8),
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoChannels => write!(f, "no channel file extensions given"),
            Self::ChannelCountMismatch(n, e) => {
                write!(f, "{n} channels declared but {e} file extensions given")
            }
            Self::EmptyPatientId => write!(f, "patient ID is empty"),
            Self::EmptySliceRange => write!(f, "slice range contains zero slices"),
            Self::NegativeRadius(r) => write!(f, "neighborhood radius {r} is negative"),
            Self::InvalidSmoothingFactor(v) => write!(f, "invalid smoothing factor {v}"),
            Self::InvalidErrorTolerance(v) => write!(f, "invalid error tolerance {v}"),
            Self::ZeroIterationCap => write!(f, "maximum number of iterations is zero"),
            Self::EmptyTruthLabels => write!(f, "truth label set is empty"),
            Self::TruthLabelOutOfRange(l) => {
                write!(f, "truth label {l} is outside the valid class range")
            }
        }
    }
}

impl std::error::Error for ParamError {}

/// 一次验证运行的完整参数记录.
///
/// 通过 [`ParameterSet::builder`] 构建; `build()` 成功后即不可变,
/// 所有字段只能读取.
///
/// # 注意
///
/// 类别个数是否足够 (`>= 2`) 属于算法层约束, 由分类引擎负责检查;
/// 这里只保证记录自身的一致性.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterSet {
    pub(crate) patient_id: String,
    pub(crate) image_dir: PathBuf,
    pub(crate) seg_dir: PathBuf,
    pub(crate) file_extensions: Vec<String>,
    pub(crate) truth_extension: String,
    pub(crate) image_slices: SliceRange,
    pub(crate) seg_slices: SliceRange,
    pub(crate) num_classes: u8,
    pub(crate) truth_labels: Vec<u8>,
    pub(crate) smoothing_factor: f64,
    pub(crate) neighborhood_radius: u32,
    pub(crate) max_iterations: u32,
    pub(crate) error_tolerance: f64,
    pub(crate) output_file: PathBuf,
    pub(crate) append_output: bool,
}

impl ParameterSet {
    /// 创建参数构建器. 算法相关字段带有与原始应用一致的默认值
    /// (迭代上限 50, 容差 0.2, 平滑因子 1.0, 邻域半径 1).
    #[inline]
    pub fn builder() -> ParameterSetBuilder {
        ParameterSetBuilder::default()
    }

    /// 病人 ID.
    #[inline]
    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    /// 图像数据目录.
    #[inline]
    pub fn image_dir(&self) -> &PathBuf {
        &self.image_dir
    }

    /// 真值分割数据目录.
    #[inline]
    pub fn seg_dir(&self) -> &PathBuf {
        &self.seg_dir
    }

    /// 每通道一个的文件扩展名列表. 其长度即通道个数.
    #[inline]
    pub fn file_extensions(&self) -> &[String] {
        &self.file_extensions
    }

    /// 真值分割的文件扩展名.
    #[inline]
    pub fn truth_extension(&self) -> &str {
        &self.truth_extension
    }

    /// 通道个数.
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.file_extensions.len()
    }

    /// 图像切片范围.
    #[inline]
    pub fn image_slices(&self) -> SliceRange {
        self.image_slices
    }

    /// 真值分割切片范围.
    #[inline]
    pub fn seg_slices(&self) -> SliceRange {
        self.seg_slices
    }

    /// 类别个数.
    #[inline]
    pub fn num_classes(&self) -> u8 {
        self.num_classes
    }

    /// 真值标签集合 (病灶/感兴趣组织的标签值).
    #[inline]
    pub fn truth_labels(&self) -> &[u8] {
        &self.truth_labels
    }

    /// MRF 平滑因子.
    #[inline]
    pub fn smoothing_factor(&self) -> f64 {
        self.smoothing_factor
    }

    /// 邻域半径 (Chebyshev 距离, 以体素为单位).
    #[inline]
    pub fn neighborhood_radius(&self) -> u32 {
        self.neighborhood_radius
    }

    /// ICM 迭代次数上限.
    #[inline]
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// 收敛容差 (每轮扫描中标签发生变化的体素比例).
    #[inline]
    pub fn error_tolerance(&self) -> f64 {
        self.error_tolerance
    }

    /// 结果文件路径.
    #[inline]
    pub fn output_file(&self) -> &PathBuf {
        &self.output_file
    }

    /// 结果文件是追加还是覆盖?
    #[inline]
    pub fn append_output(&self) -> bool {
        self.append_output
    }
}

/// [`ParameterSet`] 的构建器.
#[derive(Clone, Debug)]
pub struct ParameterSetBuilder {
    patient_id: String,
    image_dir: PathBuf,
    seg_dir: PathBuf,
    num_channels: Option<usize>,
    file_extensions: Vec<String>,
    truth_extension: String,
    image_slices: SliceRange,
    seg_slices: SliceRange,
    num_classes: u8,
    truth_labels: Vec<u8>,
    smoothing_factor: f64,
    neighborhood_radius: i64,
    max_iterations: u32,
    error_tolerance: f64,
    output_file: PathBuf,
    append_output: bool,
}

impl Default for ParameterSetBuilder {
    fn default() -> Self {
        Self {
            patient_id: String::new(),
            image_dir: PathBuf::new(),
            seg_dir: PathBuf::new(),
            num_channels: None,
            file_extensions: vec![],
            truth_extension: String::new(),
            image_slices: SliceRange::new(0, 0),
            seg_slices: SliceRange::new(0, 0),
            num_classes: 0,
            truth_labels: vec![],
            smoothing_factor: DEFAULT_SMOOTHING_FACTOR,
            neighborhood_radius: 1,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            error_tolerance: DEFAULT_ERROR_TOLERANCE,
            output_file: PathBuf::new(),
            append_output: true,
        }
    }
}

impl ParameterSetBuilder {
    /// 设置病人 ID.
    pub fn patient_id<S: Into<String>>(mut self, id: S) -> Self {
        self.patient_id = id.into();
        self
    }

    /// 设置图像数据目录.
    pub fn image_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.image_dir = dir.into();
        self
    }

    /// 设置真值分割数据目录.
    pub fn seg_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.seg_dir = dir.into();
        self
    }

    /// 显式声明通道个数. 可选; 声明后会在 `build()` 时与扩展名个数核对.
    pub fn num_channels(mut self, n: usize) -> Self {
        self.num_channels = Some(n);
        self
    }

    /// 追加一个通道文件扩展名.
    pub fn add_file_extension<S: Into<String>>(mut self, ext: S) -> Self {
        self.file_extensions.push(ext.into());
        self
    }

    /// 设置真值分割文件扩展名.
    pub fn truth_extension<S: Into<String>>(mut self, ext: S) -> Self {
        self.truth_extension = ext.into();
        self
    }

    /// 设置图像切片范围.
    pub fn image_slices(mut self, range: SliceRange) -> Self {
        self.image_slices = range;
        self
    }

    /// 设置真值分割切片范围.
    pub fn seg_slices(mut self, range: SliceRange) -> Self {
        self.seg_slices = range;
        self
    }

    /// 设置类别个数.
    pub fn num_classes(mut self, n: u8) -> Self {
        self.num_classes = n;
        self
    }

    /// 设置真值标签集合.
    pub fn truth_labels<I: IntoIterator<Item = u8>>(mut self, labels: I) -> Self {
        self.truth_labels = labels.into_iter().collect();
        self
    }

    /// 设置 MRF 平滑因子.
    pub fn smoothing_factor(mut self, beta: f64) -> Self {
        self.smoothing_factor = beta;
        self
    }

    /// 设置邻域半径. 负值会在 `build()` 时被拒绝.
    pub fn neighborhood_radius(mut self, radius: i64) -> Self {
        self.neighborhood_radius = radius;
        self
    }

    /// 设置 ICM 迭代次数上限.
    pub fn max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    /// 设置收敛容差.
    pub fn error_tolerance(mut self, tol: f64) -> Self {
        self.error_tolerance = tol;
        self
    }

    /// 设置结果文件路径.
    pub fn output_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output_file = path.into();
        self
    }

    /// 设置结果文件是追加 (`true`) 还是覆盖 (`false`).
    pub fn append_output(mut self, append: bool) -> Self {
        self.append_output = append;
        self
    }

    /// 校验并产出不可变参数记录.
    pub fn build(self) -> Result<ParameterSet, ParamError> {
        if self.file_extensions.is_empty() {
            return Err(ParamError::NoChannels);
        }
        if let Some(n) = self.num_channels {
            if n != self.file_extensions.len() {
                return Err(ParamError::ChannelCountMismatch(
                    n,
                    self.file_extensions.len(),
                ));
            }
        }
        if self.patient_id.is_empty() {
            return Err(ParamError::EmptyPatientId);
        }
        if self.image_slices.count == 0 || self.seg_slices.count == 0 {
            return Err(ParamError::EmptySliceRange);
        }
        if self.neighborhood_radius < 0 {
            return Err(ParamError::NegativeRadius(self.neighborhood_radius));
        }
        if !self.smoothing_factor.is_finite() || self.smoothing_factor < 0.0 {
            return Err(ParamError::InvalidSmoothingFactor(self.smoothing_factor));
        }
        if !self.error_tolerance.is_finite() || self.error_tolerance < 0.0 {
            return Err(ParamError::InvalidErrorTolerance(self.error_tolerance));
        }
        if self.max_iterations == 0 {
            return Err(ParamError::ZeroIterationCap);
        }
        if self.truth_labels.is_empty() {
            return Err(ParamError::EmptyTruthLabels);
        }
        if let Some(bad) = self
            .truth_labels
            .iter()
            .find(|l| **l as u16 >= self.num_classes as u16)
        {
            return Err(ParamError::TruthLabelOutOfRange(*bad));
        }

        Ok(ParameterSet {
            patient_id: self.patient_id,
            image_dir: self.image_dir,
            seg_dir: self.seg_dir,
            file_extensions: self.file_extensions,
            truth_extension: self.truth_extension,
            image_slices: self.image_slices,
            seg_slices: self.seg_slices,
            num_classes: self.num_classes,
            truth_labels: self.truth_labels,
            smoothing_factor: self.smoothing_factor,
            neighborhood_radius: self.neighborhood_radius as u32,
            max_iterations: self.max_iterations,
            error_tolerance: self.error_tolerance,
            output_file: self.output_file,
            append_output: self.append_output,
        })
    }
}
