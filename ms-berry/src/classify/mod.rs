//! 统计分类引擎: Gaussian 参数估计 + MRF/ICM 松弛.
//!
//! 引擎契约: 输入多通道扫描与参数记录 (以及可选的初始标签估计),
//! 产出同尺寸的标签体和一份收敛报告. 未收敛是报告内容而非错误.
//!
//! 算法变体 (为可复现性在此声明): 标签采用同步更新 (每轮只读上一轮
//! 快照), Gaussian 参数每轮扫描后重估.

mod gaussian;
mod icm;

pub use gaussian::{estimate_models, DegenerateModelError, GaussianClassModel};
pub use icm::IcmReport;

use log::{debug, warn};
use ndarray::Array3;

use crate::params::ParameterSet;
use crate::pipeline::ClassifierStage;
use crate::{Idx3d, McLabel, McScan, VolumeGeometry};

/// 分类引擎错误.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationError {
    /// 类别个数不足 (至少需要 2 类).
    TooFewClasses(u8),

    /// 参数记录声明的通道个数与扫描实际通道个数不一致. (声明数, 实际数)
    ChannelMismatch(usize, usize),

    /// 外部提供的初始标签与扫描不在同一体素网格上. (扫描形状, 标签形状)
    InitialGridMismatch(Idx3d, Idx3d),

    /// 外部提供的初始标签含有超出 `[0, num_classes)` 的值.
    InitialLabelOutOfRange(u8),

    /// Gaussian 参数估计退化.
    Degenerate(DegenerateModelError),
}

impl From<DegenerateModelError> for ClassificationError {
    #[inline]
    fn from(e: DegenerateModelError) -> Self {
        Self::Degenerate(e)
    }
}

impl std::fmt::Display for ClassificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewClasses(k) => {
                write!(f, "classification needs at least 2 classes, got {k}")
            }
            Self::ChannelMismatch(want, got) => {
                write!(f, "parameter set declares {want} channels but scan has {got}")
            }
            Self::InitialGridMismatch(scan, init) => write!(
                f,
                "initial labels shaped {init:?} do not match scan shaped {scan:?}"
            ),
            Self::InitialLabelOutOfRange(l) => {
                write!(f, "initial label {l} is outside the class range")
            }
            Self::Degenerate(e) => write!(f, "degenerate class model: {e}"),
        }
    }
}

impl std::error::Error for ClassificationError {}

/// MRF 正则化的 Gaussian 统计分类器.
///
/// ICM 迭代上限默认为 50 次 (见 [`crate::consts::DEFAULT_MAX_ITERATIONS`]),
/// 实际值取自参数记录.
#[derive(Debug, Clone, Default)]
pub struct MrfGaussianClassifier {
    initial: Option<McLabel>,
}

impl MrfGaussianClassifier {
    /// 创建分类器. 初始标签将由无监督等宽分箱自动生成.
    #[inline]
    pub fn new() -> Self {
        Self { initial: None }
    }

    /// 创建分类器, 并使用外部提供的初始标签估计引导参数估计.
    #[inline]
    pub fn with_initial(initial: McLabel) -> Self {
        Self {
            initial: Some(initial),
        }
    }

    /// 对多通道扫描执行分类.
    ///
    /// # 返回值
    ///
    /// 与扫描同网格的标签体, 以及 ICM 收敛报告. 达到迭代上限而未收敛
    /// 不是错误, 由报告的 `converged` 字段说明.
    pub fn classify(
        &self,
        params: &ParameterSet,
        scan: &McScan,
    ) -> Result<(McLabel, IcmReport), ClassificationError> {
        let k = params.num_classes();
        if k <= 1 {
            return Err(ClassificationError::TooFewClasses(k));
        }
        if params.num_channels() != scan.num_channels() {
            return Err(ClassificationError::ChannelMismatch(
                params.num_channels(),
                scan.num_channels(),
            ));
        }

        let seed = match self.initial.as_ref() {
            Some(init) => {
                if init.shape() != scan.shape() {
                    return Err(ClassificationError::InitialGridMismatch(
                        scan.shape(),
                        init.shape(),
                    ));
                }
                if let Some(bad) = init.data().iter().find(|l| **l >= k) {
                    return Err(ClassificationError::InitialLabelOutOfRange(*bad));
                }
                init.data().to_owned()
            }
            None => seed_labels(scan, k),
        };

        let cfg = icm::IcmConfig {
            num_classes: k,
            beta: params.smoothing_factor(),
            radius: params.neighborhood_radius(),
            max_iterations: params.max_iterations(),
            tolerance: params.error_tolerance(),
        };
        debug!(
            "running ICM: {} classes, beta {}, radius {}, cap {}",
            k, cfg.beta, cfg.radius, cfg.max_iterations
        );

        let (labels, report) = icm::relax(scan, seed, &cfg)?;
        if !report.converged {
            warn!(
                "ICM stopped at iteration cap {} with change fraction {:.6}",
                report.iterations, report.final_change_fraction
            );
        }
        Ok((McLabel::new(labels, scan.spacing()), report))
    }
}

impl ClassifierStage for MrfGaussianClassifier {
    #[inline]
    fn classify(
        &mut self,
        params: &ParameterSet,
        scan: &McScan,
    ) -> Result<(McLabel, IcmReport), ClassificationError> {
        MrfGaussianClassifier::classify(self, params, scan)
    }
}

/// 无监督初始划分: 将跨通道平均强度按等宽区间分箱, 箱号即初始类别.
///
/// 所有体素强度相同时, 全部落入类 0 (后续参数估计会以
/// [`DegenerateModelError::EmptyClass`] 报告退化).
fn seed_labels(scan: &McScan, num_classes: u8) -> Array3<u8> {
    let shape = scan.shape();
    let mut mean = Array3::<f64>::zeros(shape);
    for (pos, m) in mean.indexed_iter_mut() {
        *m = scan.mean_intensity(pos);
    }

    let (mut lo, mut hi) = (f64::MAX, f64::MIN);
    for v in mean.iter().copied() {
        if v < lo {
            lo = v;
        }
        if v > hi {
            hi = v;
        }
    }

    let k = num_classes as usize;
    if hi <= lo {
        return Array3::zeros(shape);
    }
    let width = (hi - lo) / k as f64;
    mean.mapv(|m| {
        let bin = ((m - lo) / width) as usize;
        bin.min(k - 1) as u8
    })
}
