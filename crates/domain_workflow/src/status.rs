//! Workflow statuses and variants

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::Role;
use crate::error::WorkflowError;

/// Workflow variant an application (or a stage of it) runs through
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowVariant {
    /// RSBSA farmer registration
    Registration,
    /// Role-based verification of an insurance application up to policy issuance
    Verification,
    /// PCIC field inspection
    Inspection,
    /// Claim payout against an issued policy
    Claims,
}

impl WorkflowVariant {
    pub const ALL: [WorkflowVariant; 4] = [
        WorkflowVariant::Registration,
        WorkflowVariant::Verification,
        WorkflowVariant::Inspection,
        WorkflowVariant::Claims,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowVariant::Registration => "REGISTRATION",
            WorkflowVariant::Verification => "VERIFICATION",
            WorkflowVariant::Inspection => "INSPECTION",
            WorkflowVariant::Claims => "CLAIMS",
        }
    }
}

impl fmt::Display for WorkflowVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowVariant {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowVariant::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| WorkflowError::UnknownVariant(s.to_string()))
    }
}

/// Application status
///
/// One closed enumeration shared by every variant. Each variant's table uses
/// the subset relevant to it, so services never drift apart on the meaning of
/// a status name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Submitted,
    ProcessingByAew,
    VerifiedByAew,
    RejectedByAew,
    CancelledByAew,
    ProcessingByMa,
    VerifiedByMa,
    RejectedByMa,
    CancelledByMa,
    ProcessingByPcic,
    ApprovedByPcic,
    RejectedByPcic,
    ApprovedByDa,
    RejectedByDa,
    PolicyIssued,
    ClaimFiled,
    ProcessingByAdjuster,
    ClaimApproved,
    InspectionPending,
    InspectionCompleted,
    Rejected,
    Cancelled,
    CancelledByUser,
}

impl Status {
    pub const ALL: [Status; 23] = [
        Status::Submitted,
        Status::ProcessingByAew,
        Status::VerifiedByAew,
        Status::RejectedByAew,
        Status::CancelledByAew,
        Status::ProcessingByMa,
        Status::VerifiedByMa,
        Status::RejectedByMa,
        Status::CancelledByMa,
        Status::ProcessingByPcic,
        Status::ApprovedByPcic,
        Status::RejectedByPcic,
        Status::ApprovedByDa,
        Status::RejectedByDa,
        Status::PolicyIssued,
        Status::ClaimFiled,
        Status::ProcessingByAdjuster,
        Status::ClaimApproved,
        Status::InspectionPending,
        Status::InspectionCompleted,
        Status::Rejected,
        Status::Cancelled,
        Status::CancelledByUser,
    ];

    /// Returns the wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Submitted => "SUBMITTED",
            Status::ProcessingByAew => "PROCESSING_BY_AEW",
            Status::VerifiedByAew => "VERIFIED_BY_AEW",
            Status::RejectedByAew => "REJECTED_BY_AEW",
            Status::CancelledByAew => "CANCELLED_BY_AEW",
            Status::ProcessingByMa => "PROCESSING_BY_MA",
            Status::VerifiedByMa => "VERIFIED_BY_MA",
            Status::RejectedByMa => "REJECTED_BY_MA",
            Status::CancelledByMa => "CANCELLED_BY_MA",
            Status::ProcessingByPcic => "PROCESSING_BY_PCIC",
            Status::ApprovedByPcic => "APPROVED_BY_PCIC",
            Status::RejectedByPcic => "REJECTED_BY_PCIC",
            Status::ApprovedByDa => "APPROVED_BY_DA",
            Status::RejectedByDa => "REJECTED_BY_DA",
            Status::PolicyIssued => "POLICY_ISSUED",
            Status::ClaimFiled => "CLAIM_FILED",
            Status::ProcessingByAdjuster => "PROCESSING_BY_ADJUSTER",
            Status::ClaimApproved => "CLAIM_APPROVED",
            Status::InspectionPending => "INSPECTION_PENDING",
            Status::InspectionCompleted => "INSPECTION_COMPLETED",
            Status::Rejected => "REJECTED",
            Status::Cancelled => "CANCELLED",
            Status::CancelledByUser => "CANCELLED_BY_USER",
        }
    }

    /// The role whose verification stage owns this status, if it is role-scoped
    pub fn owner_role(&self) -> Option<Role> {
        use Status::*;
        match self {
            ProcessingByAew | VerifiedByAew | RejectedByAew | CancelledByAew => Some(Role::Aew),
            ProcessingByMa | VerifiedByMa | RejectedByMa | CancelledByMa => Some(Role::Ma),
            ProcessingByPcic | ApprovedByPcic | RejectedByPcic | ProcessingByAdjuster => {
                Some(Role::Pcic)
            }
            ApprovedByDa | RejectedByDa => Some(Role::Da),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| WorkflowError::UnknownStatus(s.to_string()))
    }
}
