//! 🫐欢迎光临🫐
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::{McLabel, McScan, VolumeGeometry, VoxelSpacing};

pub use crate::classify::{
    ClassificationError, DegenerateModelError, GaussianClassModel, IcmReport,
    MrfGaussianClassifier,
};

pub use crate::consts::tissue::{BACKGROUND, CSF, GRAY_MATTER, LESION, WHITE_MATTER};
pub use crate::consts::{
    DEFAULT_ERROR_TOLERANCE, DEFAULT_MAX_ITERATIONS, DEFAULT_SMOOTHING_FACTOR,
};

pub use crate::input::{
    self, ImageSliceReader, InputError, NpySliceReader, SliceRead, ValidationInputParser,
};

pub use crate::params::{ParamError, ParameterSet, SliceRange};

pub use crate::pipeline::{
    ClassifierStage, InputStage, OutputStage, Pipeline, PipelineError, PipelineInput,
    PipelineState, RunOutcome,
};

pub use crate::validate::{
    lesion_volume_mm3, validate, LesionLoadOutput, OutputError, ValidationRecord,
};
