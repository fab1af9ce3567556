use std::sync::LazyLock;

use prometheus::*;

static METRIC_IMAGES_EXTRACTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("casedup_images_extracted", "count of the images extracted from archives")
        .unwrap()
});

static METRIC_IMAGES_CLASSIFIED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "casedup_images_classified",
        "count of the images marked as the target class"
    )
    .unwrap()
});

static METRIC_GROUPS_FOUND: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("casedup_groups_found", "count of the duplicate groups found").unwrap()
});

static METRIC_JOBS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("casedup_jobs", "count of the finished jobs", &["result"]).unwrap()
});

pub fn inc_images_extracted(n: u64) {
    METRIC_IMAGES_EXTRACTED.inc_by(n);
}

pub fn inc_images_classified(n: u64) {
    METRIC_IMAGES_CLASSIFIED.inc_by(n);
}

pub fn inc_groups_found(n: u64) {
    METRIC_GROUPS_FOUND.inc_by(n);
}

/// `result` 为 `done` 或 `error`
pub fn inc_job(result: &str) {
    METRIC_JOBS.with_label_values(&[result]).inc();
}

/// 以文本格式导出所有指标
pub fn gather_text() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    Ok(encoder.encode_to_string(&prometheus::gather())?)
}
