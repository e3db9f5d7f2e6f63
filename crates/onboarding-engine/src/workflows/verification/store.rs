use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::domain::{ProviderRef, SubjectId, TaskId, TaskKind, VerificationTask};

/// Persistence seam for verification tasks, keyed by `(subject_id, kind)`.
///
/// Implementations must reject a second row for the same pair with
/// [`StoreError::Conflict`] and reject stale writes with
/// [`StoreError::VersionMismatch`]. Seeding is built on top of those two
/// guarantees so callers never observe an insert race.
pub trait TaskStore: Send + Sync {
    fn insert(&self, task: VerificationTask) -> Result<VerificationTask, StoreError>;

    fn get(&self, subject_id: &SubjectId) -> Result<Vec<VerificationTask>, StoreError>;

    fn get_by_kind(
        &self,
        subject_id: &SubjectId,
        kind: &TaskKind,
    ) -> Result<Option<VerificationTask>, StoreError>;

    fn find_by_provider_ref(
        &self,
        reference: &ProviderRef,
    ) -> Result<Option<VerificationTask>, StoreError>;

    /// Replaces one row when `task.version` matches the stored version,
    /// returning the stored row with its version bumped.
    fn save(&self, task: VerificationTask) -> Result<VerificationTask, StoreError>;

    /// Subjects that still own at least one non-terminal task.
    fn open_subjects(&self) -> Result<Vec<SubjectId>, StoreError>;

    /// Idempotent seeding: existing kinds are returned untouched and missing
    /// kinds are created as `pending`. Duplicate-insert races are absorbed by
    /// re-reading the winner's row.
    fn ensure_tasks(
        &self,
        subject_id: &SubjectId,
        kinds: &[TaskKind],
    ) -> Result<Vec<VerificationTask>, StoreError> {
        let mut tasks = Vec::with_capacity(kinds.len());
        let mut seen = BTreeSet::new();

        for kind in kinds {
            if !seen.insert(kind.clone()) {
                continue;
            }

            if let Some(existing) = self.get_by_kind(subject_id, kind)? {
                tasks.push(existing);
                continue;
            }

            match self.insert(VerificationTask::pending(subject_id.clone(), kind.clone())) {
                Ok(created) => tasks.push(created),
                Err(StoreError::Conflict) => {
                    debug!(%subject_id, %kind, "lost seeding race, reusing stored task");
                    let winner = self
                        .get_by_kind(subject_id, kind)?
                        .ok_or(StoreError::Conflict)?;
                    tasks.push(winner);
                }
                Err(other) => return Err(other),
            }
        }

        Ok(tasks)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a task already exists for this subject and kind")]
    Conflict,
    #[error("stale write: expected version {expected}, stored version is {found}")]
    VersionMismatch { expected: u64, found: u64 },
    #[error("task not found")]
    NotFound,
    #[error("task store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Default)]
struct Rows {
    tasks: HashMap<TaskId, VerificationTask>,
    by_subject_kind: HashMap<(SubjectId, TaskKind), TaskId>,
    by_provider_ref: HashMap<ProviderRef, TaskId>,
}

/// Process-local store. A single mutex makes every row write atomic and the
/// `(subject, kind)` index plays the role of a unique constraint.
#[derive(Default)]
pub struct InMemoryTaskStore {
    rows: Mutex<Rows>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<MutexGuard<'_, Rows>, StoreError> {
        self.rows
            .lock()
            .map_err(|_| StoreError::Unavailable("task store mutex poisoned".to_string()))
    }
}

impl TaskStore for InMemoryTaskStore {
    fn insert(&self, mut task: VerificationTask) -> Result<VerificationTask, StoreError> {
        let mut rows = self.rows()?;
        let key = (task.subject_id.clone(), task.kind.clone());
        if rows.by_subject_kind.contains_key(&key) || rows.tasks.contains_key(&task.id) {
            return Err(StoreError::Conflict);
        }

        task.version = 1;
        rows.by_subject_kind.insert(key, task.id.clone());
        if let Some(reference) = &task.provider_ref {
            rows.by_provider_ref
                .insert(reference.clone(), task.id.clone());
        }
        rows.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    fn get(&self, subject_id: &SubjectId) -> Result<Vec<VerificationTask>, StoreError> {
        let rows = self.rows()?;
        let mut tasks: Vec<VerificationTask> = rows
            .tasks
            .values()
            .filter(|task| &task.subject_id == subject_id)
            .cloned()
            .collect();
        tasks.sort_by(|left, right| left.kind.cmp(&right.kind));
        Ok(tasks)
    }

    fn get_by_kind(
        &self,
        subject_id: &SubjectId,
        kind: &TaskKind,
    ) -> Result<Option<VerificationTask>, StoreError> {
        let rows = self.rows()?;
        let task = rows
            .by_subject_kind
            .get(&(subject_id.clone(), kind.clone()))
            .and_then(|id| rows.tasks.get(id))
            .cloned();
        Ok(task)
    }

    fn find_by_provider_ref(
        &self,
        reference: &ProviderRef,
    ) -> Result<Option<VerificationTask>, StoreError> {
        let rows = self.rows()?;
        Ok(rows
            .by_provider_ref
            .get(reference)
            .and_then(|id| rows.tasks.get(id))
            .cloned())
    }

    fn save(&self, mut task: VerificationTask) -> Result<VerificationTask, StoreError> {
        let mut rows = self.rows()?;
        let stored = rows.tasks.get(&task.id).ok_or(StoreError::NotFound)?;
        if stored.version != task.version {
            return Err(StoreError::VersionMismatch {
                expected: task.version,
                found: stored.version,
            });
        }

        let previous_ref = stored.provider_ref.clone();
        task.version += 1;

        if previous_ref != task.provider_ref {
            if let Some(old) = previous_ref {
                rows.by_provider_ref.remove(&old);
            }
            if let Some(new) = &task.provider_ref {
                rows.by_provider_ref.insert(new.clone(), task.id.clone());
            }
        }

        rows.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    fn open_subjects(&self) -> Result<Vec<SubjectId>, StoreError> {
        let rows = self.rows()?;
        let subjects: BTreeSet<SubjectId> = rows
            .tasks
            .values()
            .filter(|task| !task.is_terminal())
            .map(|task| task.subject_id.clone())
            .collect();
        Ok(subjects.into_iter().collect())
    }
}
