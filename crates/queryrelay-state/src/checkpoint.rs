//! Per-job checkpoint persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use queryrelay_core::fsatomic::{read_json_opt, remove_if_exists, write_json_atomic};
use queryrelay_core::{ConnectionId, JobId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub job_id: JobId,
    pub started_at_ms: u64,
    pub completed_connection_ids: Vec<ConnectionId>,
    pub failed_connection_ids: Vec<ConnectionId>,
}

impl Checkpoint {
    pub fn new(job_id: JobId, started_at_ms: u64) -> Self {
        Self {
            job_id,
            started_at_ms,
            completed_connection_ids: Vec::new(),
            failed_connection_ids: Vec::new(),
        }
    }

    fn path(dir: &Path, job_id: &JobId) -> PathBuf {
        dir.join(format!("{job_id}.json"))
    }

    pub fn load(dir: &Path, job_id: &JobId) -> std::io::Result<Option<Self>> {
        read_json_opt(&Self::path(dir, job_id))
    }

    pub fn save(&self, dir: &Path) -> std::io::Result<()> {
        write_json_atomic(&Self::path(dir, &self.job_id), self)
    }

    pub fn delete(dir: &Path, job_id: &JobId) -> std::io::Result<()> {
        remove_if_exists(&Self::path(dir, job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = JobId::from("job-1");
        let mut cp = Checkpoint::new(job_id.clone(), 1000);
        cp.completed_connection_ids.push(ConnectionId::from("c1"));

        cp.save(dir.path()).unwrap();
        let loaded = Checkpoint::load(dir.path(), &job_id).unwrap().unwrap();
        assert_eq!(loaded, cp);
    }

    #[test]
    fn missing_checkpoint_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = JobId::from("job-none");
        assert_eq!(Checkpoint::load(dir.path(), &job_id).unwrap(), None);
    }

    #[test]
    fn delete_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = JobId::from("job-1");
        Checkpoint::new(job_id.clone(), 1000)
            .save(dir.path())
            .unwrap();

        Checkpoint::delete(dir.path(), &job_id).unwrap();
        assert_eq!(Checkpoint::load(dir.path(), &job_id).unwrap(), None);
    }
}
