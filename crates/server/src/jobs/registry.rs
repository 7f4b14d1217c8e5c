// crates/server/src/jobs/registry.rs
//! Process-wide index of jobs keyed by id.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bidsify_core::{JobAction, JobDetail, JobError, JobId, JobSummary};

use super::state::{JobEntry, JobRecord};
use super::types::JobSnapshot;

/// Jobs kept before finished ones start being evicted.
pub const DEFAULT_MAX_JOBS: usize = 256;

#[derive(Default)]
struct RegistryIndex {
    by_id: HashMap<JobId, Arc<JobEntry>>,
    /// Insertion order, oldest first.
    order: VecDeque<JobId>,
}

/// Thread-safe job table.
///
/// The index lock is only held to look up or insert entries. Mutations take
/// the per-job lock, so updates to different jobs never contend.
pub struct JobRegistry {
    index: RwLock<RegistryIndex>,
    max_jobs: usize,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    /// Registry that retains at most `max_jobs` entries, evicting the oldest
    /// finished jobs first. Queued and running jobs are never evicted.
    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            index: RwLock::new(RegistryIndex::default()),
            max_jobs: max_jobs.max(1),
        }
    }

    fn read_index(&self) -> RwLockReadGuard<'_, RegistryIndex> {
        match self.index.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("RwLock poisoned reading job registry");
                poisoned.into_inner()
            }
        }
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, RegistryIndex> {
        match self.index.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("RwLock poisoned writing job registry");
                poisoned.into_inner()
            }
        }
    }

    /// Register a new queued job and return its fresh id.
    pub fn create(&self, action: JobAction) -> JobId {
        let id = JobId::generate();
        let entry = Arc::new(JobEntry::new(id.clone(), action));

        let mut index = self.write_index();
        let evicted = evict_finished(&mut index, self.max_jobs);
        index.order.push_back(id.clone());
        index.by_id.insert(id.clone(), entry);
        drop(index);

        if evicted > 0 {
            tracing::debug!(evicted, "Evicted finished jobs from registry");
        }
        tracing::debug!(job_id = %id, action = %action, "Registered job");
        id
    }

    /// Shared handle to a job's entry.
    pub fn entry(&self, id: &JobId) -> Result<Arc<JobEntry>, JobError> {
        self.read_index()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(id.clone()))
    }

    pub fn get(&self, id: &JobId) -> Result<JobSnapshot, JobError> {
        Ok(self.entry(id)?.snapshot())
    }

    pub fn detail(&self, id: &JobId) -> Result<JobDetail, JobError> {
        Ok(self.get(id)?.detail())
    }

    /// Summaries of all jobs, oldest first.
    pub fn list(&self) -> Vec<JobSummary> {
        let entries: Vec<Arc<JobEntry>> = {
            let index = self.read_index();
            index
                .order
                .iter()
                .filter_map(|id| index.by_id.get(id).cloned())
                .collect()
        };
        entries.iter().map(|e| e.summary()).collect()
    }

    /// Apply `f` to the job's record under its lock.
    pub fn update<R>(
        &self,
        id: &JobId,
        f: impl FnOnce(&mut JobRecord) -> R,
    ) -> Result<R, JobError> {
        Ok(self.entry(id)?.with_record(f))
    }

    /// Path of the `index`-th artifact of a job.
    pub fn artifact(&self, id: &JobId, index: usize) -> Result<PathBuf, JobError> {
        self.update(id, |record| {
            let artifacts = record.artifacts();
            artifacts
                .get(index)
                .cloned()
                .ok_or(JobError::ArtifactIndexOutOfRange {
                    index,
                    len: artifacts.len(),
                })
        })?
    }

    pub fn len(&self) -> usize {
        self.read_index().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop the oldest terminal jobs until there is room for one more entry.
fn evict_finished(index: &mut RegistryIndex, max_jobs: usize) -> usize {
    let mut evicted = 0;
    while index.by_id.len() >= max_jobs {
        let victim = index.order.iter().position(|id| {
            index
                .by_id
                .get(id)
                .is_some_and(|entry| entry.status().is_terminal())
        });
        let Some(pos) = victim else {
            break;
        };
        if let Some(id) = index.order.remove(pos) {
            index.by_id.remove(&id);
            evicted += 1;
        }
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::Termination;
    use bidsify_core::{JobStatus, LogRecord};

    fn finish(registry: &JobRegistry, id: &JobId, code: i32) {
        registry.update(id, |r| r.mark_running(id)).unwrap().unwrap();
        registry
            .update(id, |r| r.finish(id, &Termination::Exited(code)))
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_create_and_get() {
        let registry = JobRegistry::new();
        let id = registry.create(JobAction::Analyse);

        let snap = registry.get(&id).unwrap();
        assert_eq!(snap.id, id);
        assert_eq!(snap.status, JobStatus::Queued);
        assert_eq!(snap.action, JobAction::Analyse);
        assert!(snap.logs.is_empty());
        assert!(snap.artifacts.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = JobRegistry::new();
        let a = registry.create(JobAction::Run);
        let b = registry.create(JobAction::Run);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unknown_job() {
        let registry = JobRegistry::new();
        let missing = JobId::from("nope");
        assert!(matches!(registry.get(&missing), Err(JobError::NotFound(_))));
        assert!(matches!(
            registry.update(&missing, |_| ()),
            Err(JobError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_in_creation_order() {
        let registry = JobRegistry::new();
        let ids: Vec<JobId> = (0..3).map(|_| registry.create(JobAction::Run)).collect();
        let listed: Vec<JobId> = registry.list().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_update_is_visible() {
        let registry = JobRegistry::new();
        let id = registry.create(JobAction::Report);
        registry
            .update(&id, |r| {
                r.mark_running(&id).unwrap();
                r.append_log(LogRecord::stdout("hello"))
            })
            .unwrap();
        let detail = registry.detail(&id).unwrap();
        assert_eq!(detail.status, JobStatus::Running);
        assert_eq!(detail.logs_count, 1);
    }

    #[test]
    fn test_artifact_lookup() {
        let registry = JobRegistry::new();
        let id = registry.create(JobAction::Analyse);
        registry
            .update(&id, |r| {
                r.set_artifacts(vec![PathBuf::from("/a.tsv"), PathBuf::from("/b.json")])
            })
            .unwrap();

        assert_eq!(registry.artifact(&id, 1).unwrap(), PathBuf::from("/b.json"));
        assert!(matches!(
            registry.artifact(&id, 5),
            Err(JobError::ArtifactIndexOutOfRange { index: 5, len: 2 })
        ));
    }

    #[test]
    fn test_eviction_skips_active_jobs() {
        let registry = JobRegistry::with_capacity(2);
        let active = registry.create(JobAction::Run);
        let done = registry.create(JobAction::Run);
        finish(&registry, &done, 0);

        let newest = registry.create(JobAction::Run);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&active).is_ok());
        assert!(registry.get(&newest).is_ok());
        assert!(matches!(registry.get(&done), Err(JobError::NotFound(_))));
    }

    #[test]
    fn test_no_eviction_when_everything_active() {
        let registry = JobRegistry::with_capacity(1);
        let a = registry.create(JobAction::Run);
        let b = registry.create(JobAction::Run);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&a).is_ok());
        assert!(registry.get(&b).is_ok());
    }
}
