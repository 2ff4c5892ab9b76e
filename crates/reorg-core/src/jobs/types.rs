//! Maintenance job records.

use crate::error::Error;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rkyv::{Archive, Deserialize, Serialize};
use std::fmt;

/// What a maintenance job does.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Refresh optimizer statistics.
    Statistics,
    /// Rebuild the object's indexes.
    IndexRebuild,
    /// Create or retire partitions.
    PartitionMaintenance,
    /// Remove data past retention.
    Cleanup,
}

impl JobType {
    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Statistics => "STATISTICS",
            JobType::IndexRebuild => "INDEX_REBUILD",
            JobType::PartitionMaintenance => "PARTITION_MAINTENANCE",
            JobType::Cleanup => "CLEANUP",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a job is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize, serde::Deserialize)]
pub enum Schedule {
    /// Fixed interval after the previous run.
    Every {
        /// Interval in seconds.
        secs: u64,
    },
    /// Once a day at a UTC wall-clock time.
    Daily {
        /// Hour, 0-23.
        hour: u8,
        /// Minute, 0-59.
        minute: u8,
    },
}

impl Schedule {
    /// Check field ranges.
    pub fn validate(&self) -> Result<(), Error> {
        match *self {
            Schedule::Every { secs: 0 } => {
                Err(Error::InvalidConfig("schedule interval must be positive".to_string()))
            }
            Schedule::Daily { hour, minute } if hour > 23 || minute > 59 => Err(
                Error::InvalidConfig(format!("invalid daily schedule {hour:02}:{minute:02}")),
            ),
            _ => Ok(()),
        }
    }

    /// First due time strictly after `now` (microseconds since epoch).
    pub fn next_after(&self, now: u64) -> u64 {
        match *self {
            Schedule::Every { secs } => now.saturating_add(secs.max(1).saturating_mul(1_000_000)),
            Schedule::Daily { hour, minute } => {
                let now_dt = Utc
                    .timestamp_micros(now as i64)
                    .single()
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                let today = now_dt
                    .date_naive()
                    .and_hms_opt(u32::from(hour.min(23)), u32::from(minute.min(59)), 0)
                    .map(|naive| naive.and_utc());
                match today {
                    Some(at) if at > now_dt => at.timestamp_micros() as u64,
                    Some(at) => (at + Duration::days(1)).timestamp_micros() as u64,
                    None => now.saturating_add(86_400 * 1_000_000),
                }
            }
        }
    }
}

/// Outcome of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum JobStatus {
    /// The handler completed.
    Success,
    /// The handler failed or no handler was available.
    Failed,
    /// The job was not run.
    Skipped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Resource caps for a job.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Archive, Serialize, Deserialize, serde::Deserialize,
)]
pub struct ResourceLimits {
    /// Cap on the tuned parallel degree.
    pub max_parallel_degree: Option<u32>,
    /// Runs longer than this are reported.
    pub max_duration_secs: Option<u64>,
}

/// A persisted maintenance job.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct MaintenanceJob {
    /// Job ID.
    pub job_id: u64,
    /// Object the job maintains.
    pub target_object: String,
    /// What the job does.
    pub job_type: JobType,
    /// When the job is due.
    pub schedule: Schedule,
    /// Jobs whose last run must have succeeded.
    pub depends_on: Vec<u64>,
    /// Last run time (microseconds since epoch).
    pub last_run: Option<u64>,
    /// Last run outcome.
    pub last_status: Option<JobStatus>,
    /// Last run message.
    pub last_message: Option<String>,
    /// Next due time (microseconds since epoch).
    pub next_run: u64,
    /// Number of runs, skips included.
    pub execution_count: u64,
    /// Resource caps.
    pub resource_limits: ResourceLimits,
    /// Whether the job may run.
    pub enabled: bool,
    /// Creation time (microseconds since epoch).
    pub created_at: u64,
}

impl MaintenanceJob {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Whether the job is enabled and due at `now`.
    pub fn is_due(&self, now: u64) -> bool {
        self.enabled && self.next_run <= now
    }
}

/// Definition of a job to create.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct NewJob {
    /// Object the job maintains.
    pub target_object: String,
    /// What the job does.
    pub job_type: JobType,
    /// When the job is due.
    pub schedule: Schedule,
    /// Dependencies.
    #[serde(default)]
    pub depends_on: Vec<u64>,
    /// Resource caps.
    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

impl NewJob {
    /// Create a job definition.
    pub fn new(target_object: impl Into<String>, job_type: JobType, schedule: Schedule) -> Self {
        Self {
            target_object: target_object.into(),
            job_type,
            schedule,
            depends_on: Vec::new(),
            resource_limits: ResourceLimits::default(),
        }
    }

    /// Add a dependency.
    pub fn depends_on(mut self, job_id: u64) -> Self {
        self.depends_on.push(job_id);
        self
    }

    /// Set resource caps.
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn micros(dt: DateTime<Utc>) -> u64 {
        dt.timestamp_micros() as u64
    }

    #[test]
    fn test_every_schedule() {
        let schedule = Schedule::Every { secs: 60 };
        assert_eq!(schedule.next_after(1_000_000), 61_000_000);
    }

    #[test]
    fn test_daily_schedule() {
        let schedule = Schedule::Daily { hour: 2, minute: 30 };

        let before = Utc.with_ymd_and_hms(2024, 3, 10, 1, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 10, 2, 30, 0).unwrap();
        assert_eq!(schedule.next_after(micros(before)), micros(expected));

        let after = Utc.with_ymd_and_hms(2024, 3, 10, 2, 30, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 11, 2, 30, 0).unwrap();
        assert_eq!(schedule.next_after(micros(after)), micros(expected));
    }

    #[test]
    fn test_schedule_validation() {
        assert!(Schedule::Every { secs: 0 }.validate().is_err());
        assert!(Schedule::Daily { hour: 24, minute: 0 }.validate().is_err());
        assert!(Schedule::Daily { hour: 23, minute: 59 }.validate().is_ok());
    }

    #[test]
    fn test_job_serialization() {
        let job = MaintenanceJob {
            job_id: 4,
            target_object: "SALES".to_string(),
            job_type: JobType::IndexRebuild,
            schedule: Schedule::Daily { hour: 3, minute: 0 },
            depends_on: vec![1, 2],
            last_run: Some(10),
            last_status: Some(JobStatus::Skipped),
            last_message: None,
            next_run: 20,
            execution_count: 3,
            resource_limits: ResourceLimits {
                max_parallel_degree: Some(4),
                max_duration_secs: None,
            },
            enabled: true,
            created_at: 1,
        };
        let restored = MaintenanceJob::from_bytes(&job.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, job);
        assert!(restored.is_due(20));
        assert!(!restored.is_due(19));
    }

    #[test]
    fn test_new_job_from_json() {
        let job: NewJob = serde_json::from_str(
            r#"{"target_object": "SALES", "job_type": "STATISTICS", "schedule": {"Every": {"secs": 3600}}}"#,
        )
        .unwrap();
        assert_eq!(job.job_type, JobType::Statistics);
        assert_eq!(job.schedule, Schedule::Every { secs: 3600 });
        assert!(job.depends_on.is_empty());
    }
}
