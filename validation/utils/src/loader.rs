//! 数据集目录解析. 提供环境变量优先、主目录兜底的路径约定.

use std::env;
use std::path::PathBuf;

use ms_berry::input::home_dataset_dir_with;

/// 获取多通道 MR 图像数据基本路径.
///
/// 1. 若环境变量 `$MS_IMAGE_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/ms/image`.
pub fn image_dir_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("MS_IMAGE_DIR") {
        PathBuf::from(d)
    } else {
        home_dataset_dir_with(["ms", "image"]).unwrap()
    }
}

/// 获取真值分割数据基本路径.
///
/// 1. 若环境变量 `$MS_SEG_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/ms/seg`.
pub fn seg_dir_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("MS_SEG_DIR") {
        PathBuf::from(d)
    } else {
        home_dataset_dir_with(["ms", "seg"]).unwrap()
    }
}

/// 获取结果文件路径.
///
/// 1. 若环境变量 `$MS_RESULT_FILE` 非空, 则返回其值;
/// 2. 否则, 返回当前目录下的 `ms_validation.txt`.
pub fn result_file_from_env_or_cwd() -> PathBuf {
    if let Ok(d) = env::var("MS_RESULT_FILE") {
        PathBuf::from(d)
    } else {
        PathBuf::from("ms_validation.txt")
    }
}
