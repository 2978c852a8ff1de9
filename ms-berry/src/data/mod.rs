use std::ops::{Index, IndexMut};

use ndarray::{Array3, ArrayView, ArrayView3, ArrayViewMut, Axis, Ix2, Ix3};

use crate::{Idx2d, Idx3d};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 单体素的物理分辨率, 以毫米为单位, 按 (空间方向, 高, 宽) 顺序存储.
///
/// 该结构是只读的. 若要修改分辨率参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VoxelSpacing {
    z: f64,
    h: f64,
    w: f64,
}

impl VoxelSpacing {
    /// 构建体素分辨率.
    ///
    /// 三个分量必须为正且有限, 否则返回 `None`.
    pub fn new(z: f64, h: f64, w: f64) -> Option<VoxelSpacing> {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        (ok(z) && ok(h) && ok(w)).then_some(Self { z, h, w })
    }

    /// 构建三方向均为 1 毫米的各向同性分辨率.
    #[inline]
    pub const fn isotropic_1mm() -> VoxelSpacing {
        Self {
            z: 1.0,
            h: 1.0,
            w: 1.0,
        }
    }

    /// 获取空间方向 (相邻 2D 切片的方向) 体素分辨率, 以毫米为单位.
    #[inline]
    pub fn z_mm(&self) -> f64 {
        self.z
    }

    /// 获取 height 方向 (自然 2D 图像的垂直方向) 体素分辨率, 以毫米为单位.
    #[inline]
    pub fn height_mm(&self) -> f64 {
        self.h
    }

    /// 获取 width 方向 (自然 2D 图像的水平方向) 体素分辨率, 以毫米为单位.
    #[inline]
    pub fn width_mm(&self) -> f64 {
        self.w
    }

    /// 体素分辨率在三个维度上是否是各向同的?
    #[inline]
    pub fn is_isotropic(&self) -> bool {
        self.z == self.h && self.z == self.w
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    pub fn voxel(&self) -> f64 {
        self.z * self.h * self.w
    }

    /// 获取水平切片方向的像素实际面积值, 以平方毫米为单位.
    #[inline]
    pub fn slice_pixel(&self) -> f64 {
        self.h * self.w
    }
}

/// 3D 体数据的共用几何属性.
pub trait VolumeGeometry {
    /// 获取数据形状大小, 按 (z, h, w) 顺序.
    fn shape(&self) -> Idx3d;

    /// 获取体素物理分辨率.
    fn spacing(&self) -> VoxelSpacing;

    /// 获取数据水平切片形状大小.
    #[inline]
    fn slice_shape(&self) -> Idx2d {
        let (_, h, w) = self.shape();
        (h, w)
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.spacing().voxel()
    }

    /// 判断两个体数据是否定义在同一个体素网格上 (形状与分辨率均一致).
    #[inline]
    fn same_grid<G: VolumeGeometry>(&self, other: &G) -> bool {
        self.shape() == other.shape() && self.spacing() == other.spacing()
    }
}

/// 多通道 3D 扫描. 每个通道是一份与其余通道配准的标量体数据,
/// 体素值以 `f32` 保存.
///
/// 该结构一经组装即不可变: 不提供任何通道数据的可变访问.
/// 所有通道共享同一形状与体素分辨率, 由构造函数保证.
#[derive(Debug, Clone)]
pub struct McScan {
    channels: Vec<Array3<f32>>,
    spacing: VoxelSpacing,
}

impl VolumeGeometry for McScan {
    #[inline]
    fn shape(&self) -> Idx3d {
        self.channels[0].dim()
    }

    #[inline]
    fn spacing(&self) -> VoxelSpacing {
        self.spacing
    }
}

impl McScan {
    /// 由各通道体数据组装多通道扫描.
    ///
    /// `channels` 必须非空且所有通道形状一致, 否则返回 `None`.
    pub fn from_channels(channels: Vec<Array3<f32>>, spacing: VoxelSpacing) -> Option<Self> {
        let first = channels.first()?.dim();
        channels
            .iter()
            .all(|c| c.dim() == first)
            .then_some(Self { channels, spacing })
    }

    /// 获取通道个数.
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// 获取第 `c` 个通道的不可变视图.
    ///
    /// 当 `c` 越界时 panic.
    #[inline]
    pub fn channel(&self, c: usize) -> ArrayView3<'_, f32> {
        self.channels[c].view()
    }

    /// 将 `pos` 处的各通道强度依次收集进 `out`.
    ///
    /// `out` 的长度必须等于通道个数; `pos` 越界时 panic.
    #[inline]
    pub fn intensity_into(&self, pos: Idx3d, out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.num_channels());
        for (slot, chan) in out.iter_mut().zip(self.channels.iter()) {
            *slot = chan[pos] as f64;
        }
    }

    /// 获取 `pos` 处各通道强度的平均值.
    ///
    /// 当 `pos` 越界时 panic.
    pub fn mean_intensity(&self, pos: Idx3d) -> f64 {
        let sum: f64 = self.channels.iter().map(|c| c[pos] as f64).sum();
        sum / self.num_channels() as f64
    }
}

/// 3D 标签体, 标签值以 `u8` 保存.
///
/// 一次流水线运行会存在两个实例: 真值标签 (加载后只读)
/// 和分类引擎产出的计算标签.
#[derive(Debug, Clone)]
pub struct McLabel {
    data: Array3<u8>,
    spacing: VoxelSpacing,
}

impl VolumeGeometry for McLabel {
    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    #[inline]
    fn spacing(&self) -> VoxelSpacing {
        self.spacing
    }
}

impl Index<Idx3d> for McLabel {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for McLabel {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl McLabel {
    /// 由裸标签数据和体素分辨率直接创建标签体.
    #[inline]
    pub fn new(data: Array3<u8>, spacing: VoxelSpacing) -> Self {
        Self { data, spacing }
    }

    /// 创建一个以 `value` 填满的标签体.
    #[inline]
    pub fn filled((z, h, w): Idx3d, spacing: VoxelSpacing, value: u8) -> Self {
        Self {
            data: Array3::from_elem((z, h, w), value),
            spacing,
        }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, u8, Ix3> {
        self.data.view_mut()
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_data(self) -> Array3<u8> {
        self.data
    }

    /// 获取 z 空间第 `z_index` 层切片的不可变视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ArrayView<'_, u8, Ix2> {
        self.data.index_axis(Axis(0), z_index)
    }

    /// 获取标签体中值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 获取标签体中值属于 `labels` 集合的体素个数.
    pub fn count_in(&self, labels: &[u8]) -> usize {
        let mut member = [false; 256];
        for l in labels {
            member[*l as usize] = true;
        }
        self.data.iter().filter(|p| member[**p as usize]).count()
    }

    /// 获取每个标签值的出现次数. 下标即标签值.
    pub fn histogram(&self) -> [usize; 256] {
        let mut ans = [0usize; 256];
        for p in self.data.iter() {
            ans[*p as usize] += 1;
        }
        ans
    }

    /// 将标签体中值为 `old` 的体素全部替换为 `new`.
    ///
    /// 返回总共成功替换的个数.
    pub fn replace(&mut self, old: u8, new: u8) -> usize {
        let mut cnt = 0usize;
        self.data
            .iter_mut()
            .filter(|pix| **pix == old)
            .for_each(|p| {
                cnt += 1;
                *p = new;
            });
        cnt
    }

    /// 标签体中的最大标签值. 空数据返回 `None`.
    #[inline]
    pub fn max_label(&self) -> Option<u8> {
        self.data.iter().copied().max()
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 并发操作部分
#[cfg(feature = "rayon")]
impl McLabel {
    /// 借助 `rayon`, 并行地获取标签体中值属于 `labels` 集合的体素个数.
    pub fn par_count_in(&self, labels: &[u8]) -> usize {
        let mut member = [false; 256];
        for l in labels {
            member[*l as usize] = true;
        }

        let cnt = AtomicUsize::new(0);
        self.data
            .axis_iter(Axis(0))
            .into_par_iter()
            .for_each(|sli| {
                let local = sli.iter().filter(|p| member[**p as usize]).count();
                cnt.fetch_add(local, Ordering::Release);
            });

        cnt.load(Ordering::Acquire)
    }
}
