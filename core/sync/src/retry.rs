//! Bounded retry and eviction policy for queued jobs.
//!
//! There is no backoff between attempts. Each queue run attempts every job
//! that has not used up its attempts, and the caller decides how often runs
//! happen.

use crate::queue::PendingExport;

/// Failed attempts after which a job is evicted instead of attempted.
pub const MAX_RETRY_COUNT: u32 = 3;

/// Check if a job has used up its attempts.
pub fn has_exceeded_max_retries(job: &PendingExport) -> bool {
    job.retry_count >= MAX_RETRY_COUNT
}

/// Message reported once when a job is evicted.
pub fn eviction_message(job: &PendingExport) -> String {
    format!(
        "Export {} dropped after {} failed attempts: {}",
        job.id,
        job.retry_count,
        job.last_error.as_deref().unwrap_or("unknown error")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use healthsync_common::HealthData;

    fn job(retry_count: u32, last_error: Option<&str>) -> PendingExport {
        PendingExport {
            id: "job-1".to_string(),
            created_at: Utc::now(),
            health_data: HealthData::default(),
            selected_tags: Default::default(),
            sync_date_range: None,
            retry_count,
            last_error: last_error.map(String::from),
        }
    }

    #[test]
    fn test_threshold() {
        assert!(!has_exceeded_max_retries(&job(0, None)));
        assert!(!has_exceeded_max_retries(&job(2, None)));
        assert!(has_exceeded_max_retries(&job(3, None)));
        assert!(has_exceeded_max_retries(&job(10, None)));
    }

    #[test]
    fn test_eviction_message_carries_last_error() {
        let message = eviction_message(&job(3, Some("Network error: timeout")));
        assert!(message.contains("job-1"));
        assert!(message.contains("Network error: timeout"));
    }
}
