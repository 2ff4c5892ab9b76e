//! Persistent maintenance job definitions.

use super::types::{MaintenanceJob, NewJob};
use crate::error::Error;
use crate::storage::current_timestamp;
use sled::{Db, Tree};
use tracing::debug;

/// Tree holding jobs keyed by big-endian job ID.
pub(crate) const JOBS_TREE: &str = "jobs:definitions";

/// Store for [`MaintenanceJob`] records.
pub struct JobStore {
    db: Db,
    tree: Tree,
}

impl JobStore {
    /// Open or create the store in the given database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        Ok(Self {
            db: db.clone(),
            tree: db.open_tree(JOBS_TREE)?,
        })
    }

    /// Create a job. It is enabled and first due one schedule period from now.
    ///
    /// Every dependency must already exist.
    pub fn create(&self, new_job: NewJob) -> Result<MaintenanceJob, Error> {
        new_job.schedule.validate()?;
        for dep in &new_job.depends_on {
            if !self.tree.contains_key(dep.to_be_bytes())? {
                return Err(Error::JobNotFound { job_id: *dep });
            }
        }

        let now = current_timestamp();
        let job = MaintenanceJob {
            job_id: self.db.generate_id()? + 1,
            target_object: new_job.target_object.trim().to_ascii_uppercase(),
            job_type: new_job.job_type,
            schedule: new_job.schedule,
            depends_on: new_job.depends_on,
            last_run: None,
            last_status: None,
            last_message: None,
            next_run: new_job.schedule.next_after(now),
            execution_count: 0,
            resource_limits: new_job.resource_limits,
            enabled: true,
            created_at: now,
        };
        self.save(&job)?;

        debug!(job_id = job.job_id, job_type = %job.job_type, object = %job.target_object, "Maintenance job created");
        Ok(job)
    }

    /// Fetch a job.
    pub fn get(&self, job_id: u64) -> Result<MaintenanceJob, Error> {
        match self.tree.get(job_id.to_be_bytes())? {
            Some(bytes) => MaintenanceJob::from_bytes(&bytes),
            None => Err(Error::JobNotFound { job_id }),
        }
    }

    /// Write a job back.
    pub fn save(&self, job: &MaintenanceJob) -> Result<(), Error> {
        self.tree.insert(job.job_id.to_be_bytes(), job.to_bytes()?)?;
        Ok(())
    }

    /// All jobs in ID order.
    pub fn list(&self) -> Result<Vec<MaintenanceJob>, Error> {
        self.tree
            .iter()
            .map(|item| {
                let (_, bytes) = item?;
                MaintenanceJob::from_bytes(&bytes)
            })
            .collect()
    }

    /// Enabled jobs due at `now`.
    pub fn due(&self, now: u64) -> Result<Vec<MaintenanceJob>, Error> {
        Ok(self.list()?.into_iter().filter(|j| j.is_due(now)).collect())
    }

    /// Enable or disable a job.
    pub fn set_enabled(&self, job_id: u64, enabled: bool) -> Result<MaintenanceJob, Error> {
        let mut job = self.get(job_id)?;
        job.enabled = enabled;
        self.save(&job)?;
        Ok(job)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }
}
