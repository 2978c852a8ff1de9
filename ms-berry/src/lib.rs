#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供多通道脑部 MR 扫描的统计组织分类 (Gaussian 参数估计 +
//! MRF/ICM 松弛) 与病灶体积验证的完整流水线.
//!
//! 该 crate 目前仅提供 `safe` 接口. 在非期望情况下, 程序会直接 panic,
//! 而不会导致内存错误. As what Rust promises.
//!
//! # 结构总览
//!
//! ### 体数据容器 ✅
//!
//! 多通道扫描 ([`McScan`]) 与标签体 ([`McLabel`]), 以及公共几何属性
//! ([`VolumeGeometry`], [`VoxelSpacing`]).
//!
//! 实现位于 `ms-berry/src/data`.
//!
//! ### 输入解析 ✅
//!
//! 按照 `<病人 ID><通道扩展名>.<切片号>` 约定解析各通道的切片文件序列,
//! 堆叠为 3D 体数据并合并通道; 真值分割按自己的切片范围加载并对齐到
//! 图像坐标系.
//!
//! 实现位于 `ms-berry/src/input`.
//!
//! ### 分类引擎 ✅
//!
//! 每类一个 Gaussian 模型 (均值向量 + 每通道方差), 叠加 MRF 邻域
//! 一致性约束, 通过 ICM 迭代求局部最优标签. 收敛由变化体素比例与
//! 迭代上限共同控制.
//!
//! 实现位于 `ms-berry/src/classify`.
//!
//! ### 体积验证与结果输出 ✅
//!
//! 统计真值标签集合内的体素个数, 乘以体素物理体积得到病灶体积,
//! 与真值体积比较并把记录写入结果文件 (追加或覆盖).
//!
//! 实现位于 `ms-berry/src/validate`.
//!
//! ### 流水线编排 ✅
//!
//! 三个可替换阶段 (解析 / 分类 / 输出) 由 trait 约定,
//! [`Pipeline`](pipeline::Pipeline) 按严格顺序执行并原样转发首个错误.
//!
//! 实现位于 `ms-berry/src/pipeline.rs`.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 3D 体数据基础结构.
mod data;

pub use data::{McLabel, McScan, VolumeGeometry, VoxelSpacing};

pub mod consts;

pub mod classify;
pub mod input;
pub mod params;
pub mod pipeline;
pub mod prelude;
pub mod validate;

pub use params::{ParamError, ParameterSet, SliceRange};
