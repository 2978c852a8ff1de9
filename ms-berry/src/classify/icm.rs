//! ICM (Iterated Conditional Modes) 松弛.
//!
//! 本实现采用 **同步更新** 变体: 每轮扫描只读取上一轮的标签快照,
//! 新标签写入独立缓冲区, 因此结果与体素访问顺序无关, 并行与串行
//! 执行逐位一致. Gaussian 参数在 **每轮扫描后** 由最新标签重新估计.
//!
//! 邻域按体素索引空间的 Chebyshev 距离定义 (半径为 `r` 的立方体去掉
//! 中心). 边界体素只使用界内邻居, 且不一致计数按实际邻居个数归一化,
//! 避免边界偏置.

use itertools::iproduct;
use log::debug;
use ndarray::{Array3, Zip};
use ordered_float::NotNan;

use super::gaussian::{estimate_models, DegenerateModelError, GaussianClassModel};
use crate::McScan;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 引擎内部的算法配置. 由外部参数记录萃取而来, 字段均已经过校验.
#[derive(Copy, Clone, Debug)]
pub(crate) struct IcmConfig {
    pub num_classes: u8,
    pub beta: f64,
    pub radius: u32,
    pub max_iterations: u32,
    pub tolerance: f64,
}

/// 一次 ICM 松弛的收敛报告.
///
/// 未收敛不是错误: 标签体照常产出, 由该报告说明停止原因.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IcmReport {
    /// 实际执行的扫描轮数.
    pub iterations: u32,

    /// 最后一轮扫描中标签发生变化的体素比例.
    pub final_change_fraction: f64,

    /// 是否在迭代上限内达到收敛容差.
    pub converged: bool,
}

/// 邻域偏移集: Chebyshev 距离不超过 `radius` 的整数向量, 去掉原点.
fn neighborhood_offsets(radius: u32) -> Vec<(i64, i64, i64)> {
    let r = radius as i64;
    iproduct!(-r..=r, -r..=r, -r..=r)
        .filter(|&o| o != (0, 0, 0))
        .collect()
}

/// 统计 `pos` 的界内邻居中各标签的出现次数.
///
/// # 返回值
///
/// (每标签出现次数, 界内邻居总数).
fn neighbor_label_counts(
    prev: &Array3<u8>,
    pos: (usize, usize, usize),
    offsets: &[(i64, i64, i64)],
    num_classes: u8,
) -> (Vec<u32>, u32) {
    let (nz, nh, nw) = prev.dim();
    let (z, h, w) = (pos.0 as i64, pos.1 as i64, pos.2 as i64);

    let mut counts = vec![0u32; num_classes as usize];
    let mut total = 0u32;
    for (dz, dh, dw) in offsets.iter() {
        let (qz, qh, qw) = (z + dz, h + dh, w + dw);
        if qz < 0 || qh < 0 || qw < 0 {
            continue;
        }
        let (qz, qh, qw) = (qz as usize, qh as usize, qw as usize);
        if qz >= nz || qh >= nh || qw >= nw {
            continue;
        }
        counts[prev[(qz, qh, qw)] as usize] += 1;
        total += 1;
    }
    (counts, total)
}

/// 对单个体素求能量最小的候选类别.
///
/// 能量 = 负对数似然 + beta * (邻居不一致个数 / 界内邻居总数).
/// 能量并列时选择类别下标最小者.
fn decide(
    scan: &McScan,
    prev: &Array3<u8>,
    models: &[GaussianClassModel],
    beta: f64,
    offsets: &[(i64, i64, i64)],
    pos: (usize, usize, usize),
) -> u8 {
    let mut x = vec![0.0f64; scan.num_channels()];
    scan.intensity_into(pos, &mut x);

    let (counts, total) = neighbor_label_counts(prev, pos, offsets, models.len() as u8);

    let best = models
        .iter()
        .enumerate()
        .map(|(k, m)| {
            let mut e = m.nll(&x);
            if total > 0 {
                let disagree = (total - counts[k]) as f64;
                e += beta * disagree / total as f64;
            }
            // 有限输入下能量必为有限值.
            (NotNan::<f64>::new(e).unwrap(), k)
        })
        .min_by_key(|(e, _)| *e);

    // models 非空, min 必然存在.
    best.unwrap().1 as u8
}

/// 执行一轮同步扫描, 返回新标签缓冲区.
fn sweep(
    scan: &McScan,
    prev: &Array3<u8>,
    models: &[GaussianClassModel],
    cfg: &IcmConfig,
    offsets: &[(i64, i64, i64)],
) -> Array3<u8> {
    let mut next = Array3::<u8>::zeros(prev.dim());

    #[cfg(feature = "rayon")]
    Zip::indexed(next.view_mut()).par_for_each(|pos, out| {
        *out = decide(scan, prev, models, cfg.beta, offsets, pos);
    });

    #[cfg(not(feature = "rayon"))]
    Zip::indexed(next.view_mut()).for_each(|pos, out| {
        *out = decide(scan, prev, models, cfg.beta, offsets, pos);
    });

    next
}

/// 从初始标签出发运行 ICM 松弛, 直至收敛或达到迭代上限.
///
/// 无论是否收敛, 最终标签都会被产出; 停止原因见 [`IcmReport`].
pub(crate) fn relax(
    scan: &McScan,
    seed: Array3<u8>,
    cfg: &IcmConfig,
) -> Result<(Array3<u8>, IcmReport), DegenerateModelError> {
    let offsets = neighborhood_offsets(cfg.radius);
    let size = seed.len();

    let mut prev = seed;
    let mut report = IcmReport {
        iterations: 0,
        final_change_fraction: f64::INFINITY,
        converged: false,
    };

    for it in 1..=cfg.max_iterations {
        let models = estimate_models(scan, &prev.view(), cfg.num_classes)?;
        let next = sweep(scan, &prev, &models, cfg, &offsets);

        let changed = prev
            .iter()
            .zip(next.iter())
            .filter(|(a, b)| a != b)
            .count();
        let fraction = changed as f64 / size as f64;
        debug!("icm sweep {it}: {changed}/{size} voxels changed (fraction {fraction:.6})");

        prev = next;
        report.iterations = it;
        report.final_change_fraction = fraction;
        if fraction <= cfg.tolerance {
            report.converged = true;
            break;
        }
    }
    Ok((prev, report))
}
