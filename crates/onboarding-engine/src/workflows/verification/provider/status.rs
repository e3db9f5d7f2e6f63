//! Vendor status vocabularies and their mapping onto advance outcomes.
//!
//! Pushed updates (vendor callbacks) and polling adapters share these
//! mappings so a status means the same thing on either path.

use serde::{Deserialize, Serialize};

use super::{AdvanceOutcome, ProviderError};
use crate::workflows::verification::domain::{ProviderRef, Verdict};

/// Status reported by a background-check vendor for a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pending,
    InProgress,
    Verified,
    Failed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckVerdict {
    Pass,
    Fail,
    Pending,
}

impl CheckStatus {
    pub fn to_outcome(
        self,
        verdict: Option<CheckVerdict>,
        reason: Option<&str>,
    ) -> Result<AdvanceOutcome, ProviderError> {
        match (self, verdict) {
            (CheckStatus::Rejected, _) => Err(ProviderError::Permanent(
                reason.unwrap_or("check rejected by vendor").to_string(),
            )),
            (CheckStatus::Failed, _) | (_, Some(CheckVerdict::Fail)) => {
                Ok(AdvanceOutcome::Concluded(Verdict::Failed))
            }
            (CheckStatus::Verified, Some(CheckVerdict::Pass)) => {
                Ok(AdvanceOutcome::Concluded(Verdict::Passed))
            }
            _ => Ok(AdvanceOutcome::InFlight),
        }
    }
}

/// Lifecycle of an e-signature request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Draft,
    Sent,
    Viewed,
    Signed,
    Completed,
    Declined,
    Expired,
    Recalled,
}

impl SignatureStatus {
    pub fn to_outcome(self, reason: Option<&str>) -> Result<AdvanceOutcome, ProviderError> {
        match self {
            SignatureStatus::Signed | SignatureStatus::Completed => {
                Ok(AdvanceOutcome::Concluded(Verdict::Passed))
            }
            SignatureStatus::Declined | SignatureStatus::Expired => {
                Ok(AdvanceOutcome::Concluded(Verdict::Failed))
            }
            SignatureStatus::Recalled => Err(ProviderError::Permanent(
                reason.unwrap_or("signature request recalled").to_string(),
            )),
            SignatureStatus::Draft | SignatureStatus::Sent | SignatureStatus::Viewed => {
                Ok(AdvanceOutcome::InFlight)
            }
        }
    }
}

/// Status pushed by a vendor for a task it already accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum ProviderUpdate {
    BackgroundCheck {
        provider_ref: ProviderRef,
        status: CheckStatus,
        #[serde(default)]
        result: Option<CheckVerdict>,
        #[serde(default)]
        reason: Option<String>,
    },
    Signature {
        provider_ref: ProviderRef,
        status: SignatureStatus,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ProviderUpdate {
    pub fn provider_ref(&self) -> &ProviderRef {
        match self {
            ProviderUpdate::BackgroundCheck { provider_ref, .. }
            | ProviderUpdate::Signature { provider_ref, .. } => provider_ref,
        }
    }

    pub fn outcome(&self) -> Result<AdvanceOutcome, ProviderError> {
        match self {
            ProviderUpdate::BackgroundCheck {
                status,
                result,
                reason,
                ..
            } => status.to_outcome(*result, reason.as_deref()),
            ProviderUpdate::Signature { status, reason, .. } => {
                status.to_outcome(reason.as_deref())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verified_check_needs_pass_verdict() {
        assert_eq!(
            CheckStatus::Verified.to_outcome(Some(CheckVerdict::Pass), None),
            Ok(AdvanceOutcome::Concluded(Verdict::Passed))
        );
        assert_eq!(
            CheckStatus::Verified.to_outcome(None, None),
            Ok(AdvanceOutcome::InFlight)
        );
        assert_eq!(
            CheckStatus::InProgress.to_outcome(Some(CheckVerdict::Fail), None),
            Ok(AdvanceOutcome::Concluded(Verdict::Failed))
        );
    }

    #[test]
    fn rejected_check_is_permanent() {
        match CheckStatus::Rejected.to_outcome(None, Some("invalid document")) {
            Err(ProviderError::Permanent(detail)) => assert_eq!(detail, "invalid document"),
            other => panic!("expected permanent error, got {other:?}"),
        }
    }

    #[test]
    fn signature_statuses_map_to_outcomes() {
        assert_eq!(
            SignatureStatus::Completed.to_outcome(None),
            Ok(AdvanceOutcome::Concluded(Verdict::Passed))
        );
        assert_eq!(
            SignatureStatus::Expired.to_outcome(None),
            Ok(AdvanceOutcome::Concluded(Verdict::Failed))
        );
        assert_eq!(
            SignatureStatus::Viewed.to_outcome(None),
            Ok(AdvanceOutcome::InFlight)
        );
        assert!(SignatureStatus::Recalled.to_outcome(None).is_err());
    }

    #[test]
    fn update_payload_deserializes_by_channel() {
        let update: ProviderUpdate = serde_json::from_str(
            r#"{"channel":"signature","provider_ref":"sig-9","status":"declined"}"#,
        )
        .expect("payload parses");

        assert_eq!(update.provider_ref(), &ProviderRef::new("sig-9"));
        assert_eq!(
            update.outcome(),
            Ok(AdvanceOutcome::Concluded(Verdict::Failed))
        );
    }
}
