//! Worker metrics, recorded through the `metrics` facade.

use std::time::Duration;

use metrics::{counter, histogram};

pub mod names {
    /// Finished jobs by kind and disposition.
    pub const JOBS_TOTAL: &str = "vpipe_worker_jobs_total";

    /// Wall-clock time per job attempt in seconds.
    pub const JOB_DURATION_SECONDS: &str = "vpipe_worker_job_duration_seconds";

    /// Follow-up jobs by reason (`retry`, `escalate`).
    pub const FOLLOW_UPS_TOTAL: &str = "vpipe_worker_follow_ups_total";
}

pub fn record_job(kind: &'static str, disposition: &'static str, elapsed: Duration) {
    counter!(names::JOBS_TOTAL, "kind" => kind, "disposition" => disposition).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "kind" => kind).record(elapsed.as_secs_f64());
}

pub fn record_follow_up(kind: &'static str, reason: &'static str) {
    counter!(names::FOLLOW_UPS_TOTAL, "kind" => kind, "reason" => reason).increment(1);
}
