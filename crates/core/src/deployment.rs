use crate::cycle::CycleId;
use crate::fix::FixId;
use crate::DomainError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub type DeploymentId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    Pending,
    Live,
    Reverted,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Live => "live",
            DeploymentStatus::Reverted => "reverted",
        }
    }
}

/// Record of a fix's promotion to production.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub fix_id: FixId,
    pub file_path: PathBuf,
    pub status: DeploymentStatus,
    pub production_error_count: u32,
    pub cycle_id: CycleId,
}

impl Deployment {
    pub fn new(fix_id: FixId, file_path: impl Into<PathBuf>, cycle_id: CycleId) -> Self {
        Self {
            id: Uuid::new_v4(),
            fix_id,
            file_path: file_path.into(),
            status: DeploymentStatus::Pending,
            production_error_count: 0,
            cycle_id,
        }
    }

    /// Promotion is only legal from `Pending` (after verification passed).
    pub fn go_live(&mut self) -> Result<(), DomainError> {
        if self.status != DeploymentStatus::Pending {
            return Err(DomainError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: DeploymentStatus::Live.as_str().to_string(),
            });
        }
        self.status = DeploymentStatus::Live;
        Ok(())
    }

    pub fn revert(&mut self) -> Result<(), DomainError> {
        if self.status != DeploymentStatus::Live {
            return Err(DomainError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: DeploymentStatus::Reverted.as_str().to_string(),
            });
        }
        self.status = DeploymentStatus::Reverted;
        Ok(())
    }

    pub fn record_error_signal(&mut self) {
        self.production_error_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let mut dep = Deployment::new(Uuid::new_v4(), "src/api.rs", Uuid::new_v4());
        assert_eq!(dep.status, DeploymentStatus::Pending);
        dep.go_live().expect("pending->live");
        dep.record_error_signal();
        dep.revert().expect("live->reverted");
        assert_eq!(dep.production_error_count, 1);
        // Cannot go live again from reverted
        assert!(dep.go_live().is_err());
    }
}
