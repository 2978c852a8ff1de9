//! MRF Gaussian 组织分类验证程序.
//!
//! 从环境变量装配参数记录 (参数文件/命令行解析不属于本程序),
//! 对一个病人的多通道 MR 数据执行 输入 -> 分类 -> 输出 流水线,
//! 并在标准输出给出结果摘要.

mod result;
mod runner;

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .expect("Logger initialization error");

    println!("Running MRF Gaussian classification validation...");
    match runner::run() {
        Ok(outcome) => result::analyze(&outcome),
        Err(e) => {
            eprintln!("Pipeline failed: {e}");
            std::process::exit(1);
        }
    }
}
