//! 输出阶段: 病灶体积验证与结果持久化.
//!
//! 统计计算标签体中属于真值标签集合的体素个数, 乘以体素物理体积得到
//! 估计病灶体积, 与真值体积求绝对/相对误差, 并把记录写入结果文件.
//!
//! 结果文件是一张运行日志表: 追加模式在表尾添加一行, 覆盖模式清空
//! 文件后写入表头和一行. 持久化失败只影响落盘: 算好的记录仍随错误
//! 一并返回给调用方.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use either::Either;
use log::debug;

use crate::params::ParameterSet;
use crate::pipeline::OutputStage;
use crate::{McLabel, VolumeGeometry};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 结果文件覆盖模式下写入的表头.
const HEADER: &str = "# patient  estimated_mm3  true_mm3  abs_error_mm3  rel_error";

/// 输出阶段错误. 仅持久化失败是错误; 体积计算本身不会失败.
#[derive(Debug)]
pub enum OutputError {
    /// 结果文件写入失败. 计算完成的记录仍附在错误中.
    Persist(ValidationRecord, io::Error),
}

impl OutputError {
    /// 取回随错误保留的验证记录.
    #[inline]
    pub fn record(&self) -> &ValidationRecord {
        match self {
            Self::Persist(r, _) => r,
        }
    }
}

impl std::fmt::Display for OutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persist(r, e) => {
                write!(f, "failed to persist record for patient {}: {e}", r.patient_id)
            }
        }
    }
}

impl std::error::Error for OutputError {}

/// 一次验证运行的结果记录.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ValidationRecord {
    /// 病人 ID.
    pub patient_id: String,

    /// 估计病灶体积, 以立方毫米为单位.
    pub estimated_mm3: f64,

    /// 真值病灶体积, 以立方毫米为单位.
    pub true_mm3: f64,

    /// 绝对误差, 以立方毫米为单位.
    pub absolute_error_mm3: f64,

    /// 相对误差. 真值体积为 0 时无定义.
    pub relative_error: Option<f64>,
}

impl ValidationRecord {
    /// 生成结果文件中的一行.
    pub fn to_row(&self) -> String {
        format!(
            "{}  {:.6}  {:.6}  {:.6}  {}",
            self.patient_id,
            self.estimated_mm3,
            self.true_mm3,
            self.absolute_error_mm3,
            f64_to_display(self.relative_error),
        )
    }
}

/// `Option<f64>` 的展示形式. 无定义的值展示为 `/`.
#[inline]
fn f64_to_display(f: Option<f64>) -> String {
    match f {
        Some(f) => format!("{f:.6}"),
        None => "/".to_string(),
    }
}

/// 计算标签体中属于 `truth_labels` 集合的体素所占的物理体积 (立方毫米).
pub fn lesion_volume_mm3(label: &McLabel, truth_labels: &[u8]) -> f64 {
    #[cfg(feature = "rayon")]
    let count = label.par_count_in(truth_labels);
    #[cfg(not(feature = "rayon"))]
    let count = label.count_in(truth_labels);

    count as f64 * label.voxel()
}

/// 对比计算标签体与真值, 产出验证记录.
///
/// 真值有两种形态: 真值标签体 (按相同口径统计体积),
/// 或预先给定的真值体积标量 (立方毫米).
pub fn validate(
    patient_id: &str,
    computed: &McLabel,
    truth: Either<&McLabel, f64>,
    truth_labels: &[u8],
) -> ValidationRecord {
    let estimated = lesion_volume_mm3(computed, truth_labels);
    let true_mm3 = match truth {
        Either::Left(vol) => lesion_volume_mm3(vol, truth_labels),
        Either::Right(v) => v,
    };

    let absolute = (estimated - true_mm3).abs();
    let relative = (true_mm3 > 0.0).then(|| absolute / true_mm3);
    ValidationRecord {
        patient_id: patient_id.to_owned(),
        estimated_mm3: estimated,
        true_mm3,
        absolute_error_mm3: absolute,
        relative_error: relative,
    }
}

/// 把记录写入结果文件.
///
/// `append` 为 `true` 时在文件尾追加一行 (不扰动已有内容);
/// 为 `false` 时清空文件, 写入表头与一行.
pub fn write_record(path: &Path, append: bool, record: &ValidationRecord) -> io::Result<()> {
    let mut file = if append {
        OpenOptions::new().create(true).append(true).open(path)?
    } else {
        File::create(path)?
    };
    if !append {
        writeln!(file, "{HEADER}")?;
    }
    writeln!(file, "{}", record.to_row())
}

/// 真值取自流水线装配的真值标签体.
#[derive(Debug, Clone, Copy)]
pub struct TruthFromVolume;

/// 病灶体积验证输出阶段.
#[derive(Debug, Clone)]
pub struct LesionLoadOutput {
    // 注: 真值来源只有两种形态, 直接用 `Either` 建模.
    manner: Either<TruthFromVolume, f64>,
}

impl Default for LesionLoadOutput {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl LesionLoadOutput {
    /// 创建输出阶段, 真值体积从流水线传入的真值标签体统计.
    #[inline]
    pub fn new() -> Self {
        Self {
            manner: Either::Left(TruthFromVolume),
        }
    }

    /// 创建输出阶段, 真值体积取预先已知的标量 (立方毫米).
    #[inline]
    pub fn with_true_volume(mm3: f64) -> Self {
        Self {
            manner: Either::Right(mm3),
        }
    }

    /// 产出验证记录并按参数持久化.
    ///
    /// 持久化失败返回 [`OutputError::Persist`], 记录附在错误中.
    pub fn emit(
        &self,
        params: &ParameterSet,
        computed: &McLabel,
        truth: &McLabel,
    ) -> Result<ValidationRecord, OutputError> {
        let source = match self.manner {
            Either::Left(TruthFromVolume) => Either::Left(truth),
            Either::Right(v) => Either::Right(v),
        };
        let record = validate(
            params.patient_id(),
            computed,
            source,
            params.truth_labels(),
        );
        debug!(
            "patient {}: estimated {:.3} mm3, true {:.3} mm3",
            record.patient_id, record.estimated_mm3, record.true_mm3
        );

        match write_record(params.output_file(), params.append_output(), &record) {
            Ok(()) => Ok(record),
            Err(e) => Err(OutputError::Persist(record, e)),
        }
    }
}

impl OutputStage for LesionLoadOutput {
    #[inline]
    fn emit(
        &mut self,
        params: &ParameterSet,
        computed: &McLabel,
        truth: &McLabel,
    ) -> Result<ValidationRecord, OutputError> {
        LesionLoadOutput::emit(self, params, computed, truth)
    }
}
