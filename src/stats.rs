//! Statistics over repeated runs of the same test case.

use crate::model::{AggregatedResult, RunResult, RunStatus, TimingStats};

/// Summarise the runs of one test case, in execution order.
pub fn aggregate(results: &[RunResult]) -> AggregatedResult {
    let mut passed = 0;
    let mut failed = 0;
    let mut errors = 0;
    let mut skipped = 0;

    for result in results {
        match result.status {
            RunStatus::Passed => passed += 1,
            RunStatus::Failed => failed += 1,
            RunStatus::Error => errors += 1,
            RunStatus::Skipped => skipped += 1,
        }
    }

    let status = if errors > 0 {
        RunStatus::Error
    } else if failed > 0 {
        RunStatus::Failed
    } else if passed > 0 {
        RunStatus::Passed
    } else {
        RunStatus::Skipped
    };

    let executed = passed + failed + errors;
    let rate = |count: usize| {
        (executed > 0).then(|| round_to_2(count as f64 * 100.0 / executed as f64))
    };

    let samples: Vec<f64> = results
        .iter()
        .filter_map(|r| r.elapsed_ms)
        .filter(|ms| ms.is_finite())
        .collect();

    AggregatedResult {
        runs: results.len(),
        passed,
        failed,
        errors,
        skipped,
        timing: timing_stats(&samples),
        success_rate: rate(passed),
        failure_rate: rate(failed + errors),
        status,
        last_status: results.last().map(|r| r.status),
    }
}

/// Min/max/mean/median/sample standard deviation; `None` for no
/// samples.
pub fn timing_stats(samples: &[f64]) -> Option<TimingStats> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let count = sorted.len();
    let mean = sorted.iter().sum::<f64>() / count as f64;
    let median = if count % 2 == 1 {
        sorted[count / 2]
    } else {
        (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
    };
    let stdev = if count < 2 {
        0.0
    } else {
        let m2: f64 = sorted.iter().map(|x| (x - mean).powi(2)).sum();
        (m2 / (count as f64 - 1.0)).sqrt()
    };

    Some(TimingStats {
        samples: count,
        min: sorted[0],
        max: sorted[count - 1],
        mean,
        median,
        stdev,
    })
}

/// `"66.67%"`, or `"N/A"` when there is no rate.
pub fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{r:.2}%"),
        None => "N/A".to_string(),
    }
}

/// `"12.34 ms"`, or `"N/A"`.
pub fn format_ms(ms: Option<f64>) -> String {
    match ms {
        Some(v) => format!("{v:.2} ms"),
        None => "N/A".to_string(),
    }
}

fn round_to_2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
