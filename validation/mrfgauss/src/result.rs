//! 运行结果摘要.

use std::io::{self, Write};

use ms_berry::prelude::*;

/// 将 `outcome` 的结果写进 `w` 中.
fn describe_into<W: Write>(outcome: &RunOutcome, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f64_to_display(f: Option<f64>) -> String {
        match f {
            Some(f) => format!("{f:.6}"),
            None => "/".to_string(),
        }
    }

    let record = &outcome.record;
    let report = &outcome.report;

    writeln!(w, "Validation `{}`:", record.patient_id)?;
    writeln!(w, "{S4}Estimated lesion volume: {:.6} mm3", record.estimated_mm3)?;
    writeln!(w, "{S4}True lesion volume: {:.6} mm3", record.true_mm3)?;
    writeln!(w, "{S4}Absolute error: {:.6} mm3", record.absolute_error_mm3)?;
    writeln!(
        w,
        "{S4}Relative error: {}",
        f64_to_display(record.relative_error)
    )?;
    writeln!(w, "{S4}ICM iterations: {}", report.iterations)?;
    writeln!(
        w,
        "{S4}Final change fraction: {:.6}",
        report.final_change_fraction
    )?;
    writeln!(w, "{S4}Converged: {}", report.converged)?;

    // 每类体素占用统计.
    let histogram = outcome.labels().histogram();
    let max = outcome.labels().max_label().unwrap_or(0);
    for label in 0..=max {
        writeln!(
            w,
            "{S4}Class {label} voxels: {}",
            histogram[label as usize]
        )?;
    }
    Ok(())
}

/// 分析并打印运行结果.
pub fn analyze(outcome: &RunOutcome) {
    utils::sep();
    let mut buf = Vec::with_capacity(512);
    describe_into(outcome, &mut buf).unwrap();
    println!("{}", std::str::from_utf8(&buf).unwrap());
    utils::sep();
}
