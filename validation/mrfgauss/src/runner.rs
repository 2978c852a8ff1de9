//! 程序运行函数.

use std::env;
use std::str::FromStr;

use log::warn;
use ms_berry::prelude::*;
use utils::loader;

/// 读取环境变量并解析; 未设置或解析失败时返回默认值.
fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("cannot parse ${key}={raw:?}, falling back to default");
            default
        }),
        Err(_) => default,
    }
}

/// 读取形如 `"a,b,c"` 的环境变量列表; 未设置时返回默认列表.
fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(raw) => raw.split(',').map(|s| s.trim().to_owned()).collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// 读取形如 `"start,count"` 的切片范围.
fn env_range(key: &str, default: SliceRange) -> SliceRange {
    let Ok(raw) = env::var(key) else {
        return default;
    };
    let parts: Vec<_> = raw.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [start, count] => match (start.parse(), count.parse()) {
            (Ok(start), Ok(count)) => SliceRange::new(start, count),
            _ => {
                warn!("cannot parse ${key}={raw:?}, falling back to default");
                default
            }
        },
        _ => {
            warn!("cannot parse ${key}={raw:?}, falling back to default");
            default
        }
    }
}

/// 从环境装配参数记录.
///
/// 必填项: `$MS_PATIENT_ID`. 其余均有默认值 (五类脑组织模型,
/// 病灶标签为 4, 算法参数取库默认).
fn params_from_env() -> ParameterSet {
    let patient = env::var("MS_PATIENT_ID").expect("$MS_PATIENT_ID must be set");

    let image_slices = env_range("MS_IMAGE_SLICES", SliceRange::new(1, 20));
    let seg_slices = env_range("MS_SEG_SLICES", image_slices);

    let truth_labels: Vec<u8> = env_list("MS_TRUTH_LABELS", &["4"])
        .iter()
        .map(|s| s.parse().expect("$MS_TRUTH_LABELS must be u8 values"))
        .collect();

    let mut builder = ParameterSet::builder()
        .patient_id(patient)
        .image_dir(loader::image_dir_from_env_or_home())
        .seg_dir(loader::seg_dir_from_env_or_home())
        .truth_extension(env::var("MS_TRUTH_EXT").unwrap_or_else(|_| "_seg".to_owned()))
        .image_slices(image_slices)
        .seg_slices(seg_slices)
        .num_classes(env_or("MS_NUM_CLASSES", 5u8))
        .truth_labels(truth_labels)
        .smoothing_factor(env_or("MS_BETA", DEFAULT_SMOOTHING_FACTOR))
        .neighborhood_radius(env_or("MS_RADIUS", 1i64))
        .max_iterations(env_or("MS_MAX_ITERS", DEFAULT_MAX_ITERATIONS))
        .error_tolerance(env_or("MS_TOLERANCE", DEFAULT_ERROR_TOLERANCE))
        .output_file(loader::result_file_from_env_or_cwd())
        .append_output(env_or("MS_APPEND", true));

    for ext in env_list("MS_CHANNEL_EXTS", &["_t1", "_t2"]) {
        builder = builder.add_file_extension(ext);
    }

    builder.build().expect("Parameter validation error")
}

/// 数据集的体素物理分辨率, 形如 `"z,h,w"` (毫米).
fn spacing_from_env() -> VoxelSpacing {
    let Ok(raw) = env::var("MS_VOXEL_MM") else {
        return VoxelSpacing::isotropic_1mm();
    };
    let parts: Vec<f64> = raw
        .split(',')
        .map(|s| s.trim().parse().expect("$MS_VOXEL_MM must be three floats"))
        .collect();
    match parts.as_slice() {
        [z, h, w] => VoxelSpacing::new(*z, *h, *w).expect("$MS_VOXEL_MM must be positive"),
        _ => panic!("$MS_VOXEL_MM must be three comma separated floats"),
    }
}

/// 实际运行.
pub fn run() -> Result<RunOutcome, PipelineError> {
    let params = params_from_env();

    // 短路判断
    assert!(
        params.image_dir().is_dir(),
        "Image directory {} does not exist",
        params.image_dir().display()
    );
    assert!(
        params.seg_dir().is_dir(),
        "Segmentation directory {} does not exist",
        params.seg_dir().display()
    );

    println!(
        "Validating patient {} with {} worker cores available...",
        params.patient_id(),
        utils::cpus()
    );

    let mut pipeline = Pipeline::new(params);
    pipeline.initialize_parser(ValidationInputParser::new(NpySliceReader, spacing_from_env()))?;
    pipeline.initialize_classifier(MrfGaussianClassifier::new())?;
    pipeline.initialize_output(LesionLoadOutput::new())?;
    pipeline.execute()
}
