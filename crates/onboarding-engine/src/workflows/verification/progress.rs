use std::collections::BTreeMap;

use serde::Serialize;

use super::domain::{
    SubjectId, TaskCategory, TaskId, TaskKind, TaskResult, TaskState, TaskView, VerificationTask,
};

/// Roll-up counters over a subject's task set.
///
/// `completed` counts `state = completed` only; tasks the engine gave up on
/// (`state = failed`) are terminal but not completed. `passed` and `failed`
/// count results.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub completed: usize,
    pub passed: usize,
    pub failed: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub terminal: usize,
}

impl ProgressSummary {
    /// Pure O(n) count over `tasks`.
    pub fn summarize<'a, I>(tasks: I) -> Self
    where
        I: IntoIterator<Item = &'a VerificationTask>,
    {
        let mut summary = Self::default();
        for task in tasks {
            summary.total += 1;
            match task.state {
                TaskState::Pending => summary.pending += 1,
                TaskState::InProgress => summary.in_progress += 1,
                TaskState::Completed => {
                    summary.completed += 1;
                    summary.terminal += 1;
                }
                TaskState::Failed => summary.terminal += 1,
            }
            match task.result {
                TaskResult::Passed => summary.passed += 1,
                TaskResult::Failed => summary.failed += 1,
                TaskResult::Pending => {}
            }
        }
        summary
    }

    /// The completion gate: every task completed and passed. An empty task
    /// set never satisfies it.
    pub fn gate_satisfied(&self) -> bool {
        self.total > 0 && self.completed == self.total && self.passed == self.total
    }

    pub fn percent_complete(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let percent = (self.terminal * 100 + self.total / 2) / self.total;
        percent.min(100) as u8
    }

    pub fn status(&self) -> SubjectStatus {
        if self.total == 0 || self.pending == self.total {
            SubjectStatus::NotStarted
        } else if self.gate_satisfied() {
            SubjectStatus::Verified
        } else if self.failed > 0 && self.terminal == self.total {
            SubjectStatus::Failed
        } else {
            SubjectStatus::InProgress
        }
    }
}

/// Overall verification status reported to the onboarding record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    NotStarted,
    InProgress,
    Verified,
    Failed,
}

impl SubjectStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "Not Started",
            Self::InProgress => "In Progress",
            Self::Verified => "Verified",
            Self::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryProgress {
    pub category: TaskCategory,
    pub category_label: &'static str,
    pub summary: ProgressSummary,
    pub status: SubjectStatus,
}

/// Problem observed for one task during the last pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskIssue {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub issue: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectProgress {
    pub subject_id: SubjectId,
    pub summary: ProgressSummary,
    pub status: SubjectStatus,
    pub status_label: &'static str,
    pub percent_complete: u8,
    pub complete: bool,
    pub categories: Vec<CategoryProgress>,
    pub tasks: Vec<TaskView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<TaskIssue>,
}

impl SubjectProgress {
    pub fn from_tasks(
        subject_id: SubjectId,
        tasks: &[VerificationTask],
        issues: Vec<TaskIssue>,
    ) -> Self {
        let summary = ProgressSummary::summarize(tasks);

        let mut grouped: BTreeMap<TaskCategory, Vec<&VerificationTask>> = BTreeMap::new();
        for task in tasks {
            grouped.entry(task.kind.category()).or_default().push(task);
        }

        let categories = TaskCategory::ordered()
            .into_iter()
            .filter_map(|category| {
                grouped.get(&category).map(|members| {
                    let summary = ProgressSummary::summarize(members.iter().copied());
                    CategoryProgress {
                        category,
                        category_label: category.label(),
                        summary,
                        status: summary.status(),
                    }
                })
            })
            .collect();

        let status = summary.status();
        Self {
            subject_id,
            summary,
            status,
            status_label: status.label(),
            percent_complete: summary.percent_complete(),
            complete: summary.gate_satisfied(),
            categories,
            tasks: tasks.iter().map(VerificationTask::to_view).collect(),
            issues,
        }
    }

    pub fn stale_tasks(&self) -> impl Iterator<Item = &TaskIssue> {
        self.issues.iter().filter(|issue| issue.issue == STALE_ISSUE)
    }
}

pub(crate) const STALE_ISSUE: &str = "stale";
