//! 每类 Gaussian 模型的估计与似然计算.

use ndarray::{Array1, Array2, ArrayView3};
use once_cell::sync::Lazy;

use crate::consts::VARIANCE_FLOOR;
use crate::McScan;

/// `ln(2π)`.
static LN_2PI: Lazy<f64> = Lazy::new(|| (2.0 * std::f64::consts::PI).ln());

/// Gaussian 参数估计的退化错误.
///
/// 该错误对当前一次分类尝试是致命的; 调用方可换一组初始标签或参数后重试.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegenerateModelError {
    /// 类内没有任何体素, 无法估计均值.
    EmptyClass(u8),

    /// 类内体素不足以估计方差.
    ///
    /// 第一个参数代表类别, 第二个参数代表目前类内体素个数 (最少需要 2 个).
    TooFewSamples(u8, usize),

    /// 估计出的方差结构退化 (出现非有限值).
    SingularVariance(u8),
}

impl std::fmt::Display for DegenerateModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyClass(k) => write!(f, "class {k} has no assigned voxels"),
            Self::TooFewSamples(k, n) => {
                write!(f, "class {k} has {n} voxels, need at least 2 to estimate variance")
            }
            Self::SingularVariance(k) => write!(f, "class {k} variance estimate is degenerate"),
        }
    }
}

impl std::error::Error for DegenerateModelError {}

/// 单个类别的 Gaussian 模型: 均值向量 + 每通道方差.
///
/// 方差结构取对角形式 (通道间独立). 零方差会被抬升到
/// [`VARIANCE_FLOOR`], 以容忍完全无噪声的类别.
#[derive(Debug, Clone)]
pub struct GaussianClassModel {
    mean: Array1<f64>,
    variance: Array1<f64>,

    // 0.5 * Σ_c ln(2π σ_c²). 每轮估计后缓存, 避免在体素循环里重复计算.
    log_norm: f64,
}

impl GaussianClassModel {
    /// 由均值与方差直接构建模型. 方差会被抬升到 [`VARIANCE_FLOOR`].
    ///
    /// 两个向量的长度必须一致, 否则 panic.
    pub fn new(mean: Array1<f64>, variance: Array1<f64>) -> Self {
        assert_eq!(mean.len(), variance.len());
        let variance = variance.mapv(|v| v.max(VARIANCE_FLOOR));
        let log_norm = 0.5 * variance.iter().map(|v| *LN_2PI + v.ln()).sum::<f64>();
        Self {
            mean,
            variance,
            log_norm,
        }
    }

    /// 均值向量.
    #[inline]
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// 每通道方差.
    #[inline]
    pub fn variance(&self) -> &Array1<f64> {
        &self.variance
    }

    /// 计算强度向量 `x` 在该模型下的负对数似然.
    ///
    /// `x` 的长度必须等于通道个数, 否则 panic.
    pub fn nll(&self, x: &[f64]) -> f64 {
        debug_assert_eq!(x.len(), self.mean.len());
        let mut q = 0.0;
        for ((xi, mi), vi) in x.iter().zip(self.mean.iter()).zip(self.variance.iter()) {
            let d = xi - mi;
            q += d * d / vi;
        }
        self.log_norm + 0.5 * q
    }
}

/// 按 `labels` 给出的当前类别划分, 对每个类别估计一个 Gaussian 模型.
///
/// `labels` 的取值必须全部落在 `[0, num_classes)` 内, 否则程序 panic
/// (debug 模式下) 或行为未定义.
///
/// # 返回值
///
/// 长度为 `num_classes` 的模型数组, 下标即类别.
pub fn estimate_models(
    scan: &McScan,
    labels: &ArrayView3<'_, u8>,
    num_classes: u8,
) -> Result<Vec<GaussianClassModel>, DegenerateModelError> {
    let k = num_classes as usize;
    let d = scan.num_channels();
    let chans: Vec<_> = (0..d).map(|c| scan.channel(c)).collect();

    let mut count = vec![0usize; k];
    let mut sum = Array2::<f64>::zeros((k, d));
    let mut sumsq = Array2::<f64>::zeros((k, d));

    for (pos, &lab) in labels.indexed_iter() {
        debug_assert!((lab as usize) < k);
        let li = lab as usize;
        count[li] += 1;
        for (c, chan) in chans.iter().enumerate() {
            let v = chan[pos] as f64;
            sum[(li, c)] += v;
            sumsq[(li, c)] += v * v;
        }
    }

    let mut models = Vec::with_capacity(k);
    for li in 0..k {
        let n = count[li];
        match n {
            0 => return Err(DegenerateModelError::EmptyClass(li as u8)),
            1 => return Err(DegenerateModelError::TooFewSamples(li as u8, n)),
            _ => {}
        }

        let nf = n as f64;
        let mean = Array1::from_shape_fn(d, |c| sum[(li, c)] / nf);
        // 样本方差 (n - 1 分母). 浮点误差可能产生轻微负值, 统一由下限兜底.
        let variance =
            Array1::from_shape_fn(d, |c| (sumsq[(li, c)] - sum[(li, c)].powi(2) / nf) / (nf - 1.0));

        if mean.iter().chain(variance.iter()).any(|v| !v.is_finite()) {
            return Err(DegenerateModelError::SingularVariance(li as u8));
        }
        models.push(GaussianClassModel::new(mean, variance));
    }
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{McScan, VoxelSpacing};
    use ndarray::{arr1, Array3};

    /// 一通道 2x2x2 扫描: 前一半体素强度在 10 附近, 后一半在 0 附近.
    fn two_class_scan() -> (McScan, Array3<u8>) {
        let mut chan = Array3::<f32>::zeros((2, 2, 2));
        let mut labels = Array3::<u8>::zeros((2, 2, 2));
        for ((z, h, w), v) in chan.indexed_iter_mut() {
            if z == 0 {
                *v = 10.0 + (h * 2 + w) as f32 * 0.1;
                labels[(z, h, w)] = 1;
            } else {
                *v = (h * 2 + w) as f32 * 0.1;
            }
        }
        let scan = McScan::from_channels(vec![chan], VoxelSpacing::isotropic_1mm()).unwrap();
        (scan, labels)
    }

    #[test]
    fn test_estimate_two_classes() {
        let (scan, labels) = two_class_scan();
        let models = estimate_models(&scan, &labels.view(), 2).unwrap();
        assert_eq!(models.len(), 2);

        // 每类 4 个样本: {0.0, 0.1, 0.2, 0.3} 与 {10.0, 10.1, 10.2, 10.3}.
        assert!((models[0].mean()[0] - 0.15).abs() < 1e-5);
        assert!((models[1].mean()[0] - 10.15).abs() < 1e-5);
        assert!(models[0].variance()[0] > 0.0);

        // 低强度体素更贴近类 0.
        assert!(models[0].nll(&[0.1]) < models[1].nll(&[0.1]));
        assert!(models[1].nll(&[10.2]) < models[0].nll(&[10.2]));
    }

    #[test]
    fn test_estimate_empty_class() {
        let (scan, mut labels) = two_class_scan();
        labels.fill(0);
        let err = estimate_models(&scan, &labels.view(), 2).unwrap_err();
        assert_eq!(err, DegenerateModelError::EmptyClass(1));
    }

    #[test]
    fn test_estimate_too_few_samples() {
        let (scan, mut labels) = two_class_scan();
        labels.fill(0);
        labels[(0, 0, 0)] = 1;
        let err = estimate_models(&scan, &labels.view(), 2).unwrap_err();
        assert_eq!(err, DegenerateModelError::TooFewSamples(1, 1));
    }

    #[test]
    fn test_variance_floor_keeps_model_usable() {
        // 两类强度完全恒定 (无噪声), 样本方差为 0, 由下限兜底.
        let mut chan = Array3::<f32>::zeros((2, 2, 2));
        let mut labels = Array3::<u8>::zeros((2, 2, 2));
        for ((z, h, w), v) in chan.indexed_iter_mut() {
            if z == 1 {
                *v = 10.0;
                labels[(z, h, w)] = 1;
            }
        }
        let scan = McScan::from_channels(vec![chan], VoxelSpacing::isotropic_1mm()).unwrap();

        let models = estimate_models(&scan, &labels.view(), 2).unwrap();
        assert!(models[0].variance()[0] >= crate::consts::VARIANCE_FLOOR);
        assert!(models[0].nll(&[0.0]).is_finite());
        assert!(models[0].nll(&[0.0]) < models[1].nll(&[0.0]));
        assert!(models[1].nll(&[10.0]) < models[0].nll(&[10.0]));
    }

    #[test]
    fn test_model_new_checks_len() {
        let m = GaussianClassModel::new(arr1(&[1.0, 2.0]), arr1(&[0.5, 0.5]));
        assert!(m.nll(&[1.0, 2.0]) < m.nll(&[3.0, 4.0]));
    }
}
