use std::collections::{BTreeSet, HashMap};

use super::domain::{SubjectType, TaskKind};
use super::provider::ConfigurationError;
use crate::config::RequirementsConfig;

/// Required task kinds per subject type, supplied by configuration.
#[derive(Debug, Clone, Default)]
pub struct RequirementCatalog {
    profiles: HashMap<SubjectType, Vec<TaskKind>>,
}

impl RequirementCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a profile, dropping duplicate kinds while keeping order.
    pub fn with_profile(
        mut self,
        subject_type: SubjectType,
        kinds: impl IntoIterator<Item = TaskKind>,
    ) -> Result<Self, ConfigurationError> {
        let mut seen = BTreeSet::new();
        let kinds: Vec<TaskKind> = kinds
            .into_iter()
            .filter(|kind| seen.insert(kind.clone()))
            .collect();

        if kinds.is_empty() {
            return Err(ConfigurationError::EmptyRequirements {
                subject_type: subject_type.label(),
            });
        }

        self.profiles.insert(subject_type, kinds);
        Ok(self)
    }

    pub fn from_config(config: &RequirementsConfig) -> Result<Self, ConfigurationError> {
        Self::new()
            .with_profile(SubjectType::Employee, config.employee_kinds.iter().cloned())?
            .with_profile(SubjectType::Contractor, config.contractor_kinds.iter().cloned())
    }

    pub fn kinds_for(&self, subject_type: SubjectType) -> Option<&[TaskKind]> {
        self.profiles.get(&subject_type).map(Vec::as_slice)
    }

    pub fn all_kinds(&self) -> BTreeSet<TaskKind> {
        self.profiles.values().flatten().cloned().collect()
    }
}
