//! 通用常量.

/// 组织标签值.
pub mod tissue {
    /// 背景体素的标签值.
    pub const BACKGROUND: u8 = 0;

    /// 脑脊液 (CSF) 体素的标签值.
    pub const CSF: u8 = 1;

    /// 灰质体素的标签值.
    pub const GRAY_MATTER: u8 = 2;

    /// 白质体素的标签值.
    pub const WHITE_MATTER: u8 = 3;

    /// 病灶 (lesion) 体素的标签值.
    pub const LESION: u8 = 4;

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }

    /// 体素是否是病灶?
    #[inline]
    pub const fn is_lesion(p: u8) -> bool {
        matches!(p, LESION)
    }

    /// 体素是否是脑组织 (灰质或白质)?
    #[inline]
    pub const fn is_brain_tissue(p: u8) -> bool {
        matches!(p, GRAY_MATTER | WHITE_MATTER)
    }
}

/// ICM 迭代次数上限的默认值.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;

/// ICM 收敛容差 (每轮扫描中标签发生变化的体素比例) 的默认值.
pub const DEFAULT_ERROR_TOLERANCE: f64 = 0.2;

/// MRF 平滑因子的默认值.
pub const DEFAULT_SMOOTHING_FACTOR: f64 = 1.0;

/// 每通道方差的下限. 对完全无噪声的类别, 样本方差会退化为 0;
/// 低于该值的方差会被抬升到该值.
pub const VARIANCE_FLOOR: f64 = 1e-10;
