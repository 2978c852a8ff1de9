//! 输入阶段: 解析并装配多通道扫描与真值标签.
//!
//! 文件命名约定: 病人 `P` 的通道 `E` 第 `i` 张切片位于
//! `<图像目录>/<P><E>.<i><后缀>`; 真值分割使用自己的目录、扩展名与
//! 切片范围. 真值切片号与图像切片号的偏移在装配时统一到图像坐标系:
//! 真值未覆盖的图像切片记为背景, 真值落到图像范围之外则视为错误.

use std::path::{Path, PathBuf};

use log::debug;
use ndarray::{Array3, Axis};

use crate::consts::tissue::BACKGROUND;
use crate::params::{ParameterSet, SliceRange};
use crate::pipeline::{InputStage, PipelineInput};
use crate::{Idx2d, Idx3d, McLabel, McScan, VolumeGeometry, VoxelSpacing};

pub mod reader;

pub use reader::{ImageSliceReader, NpySliceReader, SliceRead, SliceReadError};

/// 输入阶段错误. 对一次运行是致命的, 核心内部不做重试.
#[derive(Debug)]
pub enum InputError {
    /// 某通道扩展名没有匹配到任何切片文件.
    EmptySequence(String),

    /// 切片序列不完整: 给定路径处缺少文件.
    MissingSlice(PathBuf),

    /// 读取协作者报告的错误.
    Read(PathBuf, SliceReadError),

    /// 切片的平面形状与本次运行已确定的形状不一致. (期望, 实际)
    SliceShapeMismatch(PathBuf, Idx2d, Idx2d),

    /// 偏移对齐后, 真值分割的范围无法放入图像范围. (图像范围, 分割范围)
    ExtentMismatch(SliceRange, SliceRange),
}

impl std::fmt::Display for InputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySequence(ext) => {
                write!(f, "channel extension {ext:?} matched no slice files")
            }
            Self::MissingSlice(p) => write!(f, "missing slice file {}", p.display()),
            Self::Read(p, e) => write!(f, "failed to read {}: {e}", p.display()),
            Self::SliceShapeMismatch(p, want, got) => write!(
                f,
                "slice {} shaped {got:?}, expected {want:?}",
                p.display()
            ),
            Self::ExtentMismatch(img, seg) => write!(
                f,
                "segmentation slices {}..{} do not fit image slices {}..{}",
                seg.start,
                seg.start + seg.count as i64,
                img.start,
                img.start + img.count as i64
            ),
        }
    }
}

impl std::error::Error for InputError {}

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 验证流水线的输入解析器.
///
/// 除产出一个 [`McScan`] 和一个真值 [`McLabel`] 外没有任何副作用,
/// 也不会修改参数记录.
#[derive(Debug, Clone)]
pub struct ValidationInputParser<R> {
    reader: R,
    spacing: VoxelSpacing,
}

impl<R: SliceRead> ValidationInputParser<R> {
    /// 创建解析器. `spacing` 为数据集的体素物理分辨率
    /// (切片文件自身不携带该元信息).
    #[inline]
    pub fn new(reader: R, spacing: VoxelSpacing) -> Self {
        Self { reader, spacing }
    }

    /// 按参数记录装配多通道扫描与真值标签.
    pub fn parse(&self, params: &ParameterSet) -> Result<PipelineInput, InputError> {
        let mut slice_shape: Option<Idx2d> = None;
        let mut channels = Vec::with_capacity(params.num_channels());
        for ext in params.file_extensions() {
            channels.push(self.load_scan_stack(params, ext, &mut slice_shape)?);
        }

        // 所有通道形状已通过 slice_shape 对齐, 组装必然成功.
        let Some(scan) = McScan::from_channels(channels, self.spacing) else {
            unreachable!()
        };
        debug!(
            "assembled {}-channel scan shaped {:?} for patient {}",
            scan.num_channels(),
            scan.shape(),
            params.patient_id()
        );

        let truth = self.load_truth(params, scan.shape())?;
        Ok(PipelineInput { scan, truth })
    }

    /// 组合一张切片文件的路径.
    fn slice_path(&self, dir: &Path, patient: &str, ext: &str, index: i64) -> PathBuf {
        dir.join(format!("{patient}{ext}.{index}{}", self.reader.suffix()))
    }

    /// 解析一个切片文件序列, 核对存在性.
    fn resolve_sequence(
        &self,
        dir: &Path,
        patient: &str,
        ext: &str,
        range: SliceRange,
    ) -> Result<Vec<PathBuf>, InputError> {
        let paths: Vec<_> = range
            .iter()
            .map(|i| self.slice_path(dir, patient, ext, i))
            .collect();

        if !paths.iter().any(|p| p.is_file()) {
            return Err(InputError::EmptySequence(ext.to_owned()));
        }
        if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
            return Err(InputError::MissingSlice(missing.clone()));
        }
        Ok(paths)
    }

    /// 加载一个通道的全部切片并堆叠为 3D 体数据.
    ///
    /// `slice_shape` 在第一张切片处确定, 此后所有切片 (跨通道) 必须一致.
    fn load_scan_stack(
        &self,
        params: &ParameterSet,
        ext: &str,
        slice_shape: &mut Option<Idx2d>,
    ) -> Result<Array3<f32>, InputError> {
        let range = params.image_slices();
        let paths =
            self.resolve_sequence(params.image_dir(), params.patient_id(), ext, range)?;

        let mut volume: Option<Array3<f32>> = None;
        for (i, path) in paths.iter().enumerate() {
            let slice = self
                .reader
                .read_scan_slice(path)
                .map_err(|e| InputError::Read(path.clone(), e))?;

            let dim = slice.dim();
            match *slice_shape {
                None => *slice_shape = Some(dim),
                Some(want) if want == dim => {}
                Some(want) => {
                    return Err(InputError::SliceShapeMismatch(path.clone(), want, dim))
                }
            }

            let vol = volume
                .get_or_insert_with(|| Array3::zeros((range.count, dim.0, dim.1)));
            vol.index_axis_mut(Axis(0), i).assign(&slice);
        }

        // resolve_sequence 保证序列非空.
        let Some(vol) = volume else { unreachable!() };
        Ok(vol)
    }

    /// 加载真值分割并对齐到图像坐标系.
    fn load_truth(
        &self,
        params: &ParameterSet,
        image_shape: Idx3d,
    ) -> Result<McLabel, InputError> {
        let img = params.image_slices();
        let seg = params.seg_slices();

        let offset = seg.start - img.start;
        if offset < 0 || offset as usize + seg.count > image_shape.0 {
            return Err(InputError::ExtentMismatch(img, seg));
        }
        let offset = offset as usize;

        let paths = self.resolve_sequence(
            params.seg_dir(),
            params.patient_id(),
            params.truth_extension(),
            seg,
        )?;

        let want = (image_shape.1, image_shape.2);
        let mut truth = McLabel::filled(image_shape, self.spacing, BACKGROUND);
        for (i, path) in paths.iter().enumerate() {
            let slice = self
                .reader
                .read_label_slice(path)
                .map_err(|e| InputError::Read(path.clone(), e))?;
            if slice.dim() != want {
                return Err(InputError::SliceShapeMismatch(
                    path.clone(),
                    want,
                    slice.dim(),
                ));
            }
            truth
                .data_mut()
                .index_axis_mut(Axis(0), offset + i)
                .assign(&slice);
        }
        debug!(
            "loaded truth segmentation at image frame offset {offset} for patient {}",
            params.patient_id()
        );
        Ok(truth)
    }
}

impl<R: SliceRead> InputStage for ValidationInputParser<R> {
    #[inline]
    fn produce(&mut self, params: &ParameterSet) -> Result<PipelineInput, InputError> {
        self.parse(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use ndarray_npy::WriteNpyExt;
    use std::fs::{self, File};

    struct TempTree(PathBuf);

    impl TempTree {
        fn new(case: &str) -> Self {
            let mut p = std::env::temp_dir();
            p.push(format!("ms-berry-input-{}-{case}", std::process::id()));
            fs::create_dir_all(&p).unwrap();
            Self(p)
        }

        fn dir(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempTree {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn write_scan_slice(dir: &Path, name: &str, fill: f32, shape: Idx2d) {
        let arr = Array2::<f32>::from_elem(shape, fill);
        arr.write_npy(File::create(dir.join(name)).unwrap()).unwrap();
    }

    fn write_label_slice(dir: &Path, name: &str, fill: u8, shape: Idx2d) {
        let arr = Array2::<u8>::from_elem(shape, fill);
        arr.write_npy(File::create(dir.join(name)).unwrap()).unwrap();
    }

    fn params_in(dir: &Path) -> ParameterSet {
        ParameterSet::builder()
            .patient_id("p01")
            .image_dir(dir)
            .seg_dir(dir)
            .add_file_extension("_t1")
            .add_file_extension("_t2")
            .truth_extension("_seg")
            .image_slices(SliceRange::new(1, 3))
            .seg_slices(SliceRange::new(2, 2))
            .num_classes(2)
            .truth_labels([1])
            .output_file(dir.join("out.txt"))
            .build()
            .unwrap()
    }

    fn parser() -> ValidationInputParser<NpySliceReader> {
        ValidationInputParser::new(NpySliceReader, VoxelSpacing::isotropic_1mm())
    }

    /// 写出一套完整的双通道数据与真值.
    fn populate(dir: &Path) {
        for i in 1..=3 {
            write_scan_slice(dir, &format!("p01_t1.{i}.npy"), i as f32, (2, 2));
            write_scan_slice(dir, &format!("p01_t2.{i}.npy"), 10.0 * i as f32, (2, 2));
        }
        for i in 2..=3 {
            write_label_slice(dir, &format!("p01_seg.{i}.npy"), 1, (2, 2));
        }
    }

    #[test]
    fn test_parse_assembles_scan_and_truth() {
        let tmp = TempTree::new("ok");
        populate(tmp.dir());

        let input = parser().parse(&params_in(tmp.dir())).unwrap();
        assert_eq!(input.scan.shape(), (3, 2, 2));
        assert_eq!(input.scan.num_channels(), 2);
        assert_eq!(input.scan.channel(0)[(0, 0, 0)], 1.0);
        assert_eq!(input.scan.channel(1)[(2, 1, 1)], 30.0);

        // 分割从切片号 2 开始, 图像从 1 开始: 帧偏移为 1.
        assert_eq!(input.truth.shape(), (3, 2, 2));
        assert_eq!(input.truth[(0, 0, 0)], BACKGROUND);
        assert_eq!(input.truth[(1, 0, 0)], 1);
        assert_eq!(input.truth[(2, 1, 1)], 1);
    }

    #[test]
    fn test_empty_sequence() {
        let tmp = TempTree::new("empty");
        let err = parser().parse(&params_in(tmp.dir())).unwrap_err();
        assert!(matches!(err, InputError::EmptySequence(ext) if ext == "_t1"));
    }

    #[test]
    fn test_missing_slice() {
        let tmp = TempTree::new("missing");
        populate(tmp.dir());
        fs::remove_file(tmp.dir().join("p01_t2.2.npy")).unwrap();

        let err = parser().parse(&params_in(tmp.dir())).unwrap_err();
        assert!(matches!(err, InputError::MissingSlice(p) if p.ends_with("p01_t2.2.npy")));
    }

    #[test]
    fn test_slice_shape_mismatch_across_channels() {
        let tmp = TempTree::new("shape");
        populate(tmp.dir());
        write_scan_slice(tmp.dir(), "p01_t2.3.npy", 0.0, (3, 2));

        let err = parser().parse(&params_in(tmp.dir())).unwrap_err();
        assert!(matches!(
            err,
            InputError::SliceShapeMismatch(_, (2, 2), (3, 2))
        ));
    }

    #[test]
    fn test_truth_out_of_frame() {
        let tmp = TempTree::new("frame");
        populate(tmp.dir());
        for i in 0..=1 {
            write_label_slice(tmp.dir(), &format!("p01_seg.{i}.npy"), 1, (2, 2));
        }

        // 分割起始号 0 早于图像起始号 1: 无法对齐.
        let p = ParameterSet::builder()
            .patient_id("p01")
            .image_dir(tmp.dir())
            .seg_dir(tmp.dir())
            .add_file_extension("_t1")
            .add_file_extension("_t2")
            .truth_extension("_seg")
            .image_slices(SliceRange::new(1, 3))
            .seg_slices(SliceRange::new(0, 2))
            .num_classes(2)
            .truth_labels([1])
            .output_file(tmp.dir().join("out.txt"))
            .build()
            .unwrap();
        let err = parser().parse(&p).unwrap_err();
        assert!(matches!(err, InputError::ExtentMismatch(_, _)));
    }

    #[test]
    fn test_decode_failure_is_read_error() {
        let tmp = TempTree::new("decode");
        populate(tmp.dir());
        // 用标签类型的文件顶替扫描切片: 读取协作者应报解码错误.
        write_label_slice(tmp.dir(), "p01_t1.2.npy", 3, (2, 2));

        let err = parser().parse(&params_in(tmp.dir())).unwrap_err();
        assert!(matches!(
            err,
            InputError::Read(_, SliceReadError::Decode(_))
        ));
    }
}
