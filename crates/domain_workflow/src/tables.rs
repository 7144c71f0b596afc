//! Canonical transition tables, one per workflow variant
//!
//! Adding a workflow step means adding a row here. The registry checks the
//! tables when it loads them.

use core_kernel::Role;
use crate::event::EventType;
use crate::status::{Status, WorkflowVariant};

use EventType as E;
use Role as R;
use Status as S;

/// Statuses a transition row applies from
#[derive(Debug, Clone, Copy)]
pub enum Source {
    Exact(&'static [Status]),
    /// Every status of the table that is not terminal
    AnyNonTerminal,
}

/// Row creating a projection
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub event: EventType,
    pub roles: &'static [Role],
    pub status: Status,
}

/// Row `(from, event, roles) -> to`, staging `emits` when applied
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub from: Source,
    pub event: EventType,
    pub roles: &'static [Role],
    pub to: Status,
    pub emits: &'static [EventType],
}

#[derive(Debug, Clone, Copy)]
pub struct WorkflowTable {
    pub variant: WorkflowVariant,
    pub entries: &'static [Entry],
    pub transitions: &'static [Transition],
    pub terminal: &'static [Status],
}

impl WorkflowTable {
    /// The canonical table for a variant
    pub fn canonical(variant: WorkflowVariant) -> &'static WorkflowTable {
        match variant {
            WorkflowVariant::Registration => &REGISTRATION,
            WorkflowVariant::Verification => &VERIFICATION,
            WorkflowVariant::Inspection => &INSPECTION,
            WorkflowVariant::Claims => &CLAIMS,
        }
    }
}

const fn row(
    from: &'static [Status],
    event: EventType,
    roles: &'static [Role],
    to: Status,
    emits: &'static [EventType],
) -> Transition {
    Transition {
        from: Source::Exact(from),
        event,
        roles,
        to,
        emits,
    }
}

const REJECTED: &[EventType] = &[E::ApplicationRejected];
const NONE: &[EventType] = &[];

pub static REGISTRATION: WorkflowTable = WorkflowTable {
    variant: WorkflowVariant::Registration,
    entries: &[Entry {
        event: E::RegistrationSubmitted,
        roles: &[R::Farmer, R::Aew],
        status: S::Submitted,
    }],
    transitions: &[
        row(&[S::Submitted], E::RegistrationAewVerified, &[R::Aew], S::VerifiedByAew, NONE),
        row(&[S::Submitted], E::RegistrationAewRejected, &[R::Aew], S::Rejected, REJECTED),
        row(&[S::VerifiedByAew], E::RegistrationMaVerified, &[R::Ma], S::VerifiedByMa, NONE),
        row(&[S::VerifiedByAew], E::RegistrationMaRejected, &[R::Ma], S::Rejected, REJECTED),
        row(
            &[S::VerifiedByMa],
            E::RegistrationDaApproved,
            &[R::Da],
            S::ApprovedByDa,
            &[E::RegistrationApproved],
        ),
        row(&[S::VerifiedByMa], E::RegistrationDaRejected, &[R::Da], S::Rejected, REJECTED),
        Transition {
            from: Source::AnyNonTerminal,
            event: E::RegistrationCancelledByUser,
            roles: &[R::Farmer],
            to: S::CancelledByUser,
            emits: NONE,
        },
    ],
    terminal: &[S::ApprovedByDa, S::Rejected, S::CancelledByUser],
};

pub static VERIFICATION: WorkflowTable = WorkflowTable {
    variant: WorkflowVariant::Verification,
    entries: &[Entry {
        event: E::ApplicationSubmitted,
        roles: &[R::Farmer, R::Aew],
        status: S::Submitted,
    }],
    transitions: &[
        // AEW stage
        row(&[S::Submitted], E::AewReviewStarted, &[R::Aew], S::ProcessingByAew, NONE),
        row(
            &[S::Submitted, S::ProcessingByAew],
            E::AewVerified,
            &[R::Aew],
            S::VerifiedByAew,
            &[E::ReadyForMaReview],
        ),
        row(&[S::Submitted, S::ProcessingByAew], E::AewRejected, &[R::Aew], S::RejectedByAew, REJECTED),
        row(&[S::Submitted, S::ProcessingByAew], E::AewCancelled, &[R::Aew], S::CancelledByAew, NONE),
        // MA stage
        row(&[S::VerifiedByAew], E::MaReviewStarted, &[R::Ma], S::ProcessingByMa, NONE),
        row(
            &[S::VerifiedByAew, S::ProcessingByMa],
            E::MaVerified,
            &[R::Ma],
            S::VerifiedByMa,
            &[E::ReadyForPcicReview],
        ),
        row(&[S::VerifiedByAew, S::ProcessingByMa], E::MaRejected, &[R::Ma], S::RejectedByMa, REJECTED),
        row(&[S::VerifiedByAew, S::ProcessingByMa], E::MaCancelled, &[R::Ma], S::CancelledByMa, NONE),
        // PCIC / DA decision
        row(&[S::VerifiedByMa], E::PcicReviewStarted, &[R::Pcic], S::ProcessingByPcic, NONE),
        row(
            &[S::VerifiedByMa, S::ProcessingByPcic],
            E::PcicApproved,
            &[R::Pcic],
            S::ApprovedByPcic,
            &[E::ApplicationApproved],
        ),
        row(&[S::VerifiedByMa, S::ProcessingByPcic], E::PcicRejected, &[R::Pcic], S::RejectedByPcic, REJECTED),
        row(&[S::VerifiedByMa], E::DaApproved, &[R::Da], S::ApprovedByDa, &[E::ApplicationApproved]),
        row(&[S::VerifiedByMa], E::DaRejected, &[R::Da], S::RejectedByDa, REJECTED),
        row(
            &[S::ApprovedByPcic, S::ApprovedByDa],
            E::PolicyIssued,
            &[R::Pcic],
            S::PolicyIssued,
            &[E::PolicyIssuedEvent],
        ),
        Transition {
            from: Source::AnyNonTerminal,
            event: E::ApplicationCancelledByUser,
            roles: &[R::Farmer],
            to: S::CancelledByUser,
            emits: NONE,
        },
    ],
    terminal: &[
        S::RejectedByAew,
        S::CancelledByAew,
        S::RejectedByMa,
        S::CancelledByMa,
        S::RejectedByPcic,
        S::RejectedByDa,
        S::PolicyIssued,
        S::CancelledByUser,
    ],
};

pub static INSPECTION: WorkflowTable = WorkflowTable {
    variant: WorkflowVariant::Inspection,
    entries: &[Entry {
        event: E::InspectionScheduled,
        roles: &[R::Pcic, R::System],
        status: S::InspectionPending,
    }],
    transitions: &[
        row(
            &[S::InspectionPending],
            E::InspectionCompleted,
            &[R::Pcic],
            S::InspectionCompleted,
            &[E::InspectionCompletedEvent],
        ),
        row(&[S::InspectionPending], E::InspectionRejected, &[R::Pcic], S::Rejected, NONE),
        row(&[S::InspectionPending], E::InspectionCancelled, &[R::Pcic], S::Cancelled, NONE),
    ],
    terminal: &[S::InspectionCompleted, S::Rejected, S::Cancelled],
};

pub static CLAIMS: WorkflowTable = WorkflowTable {
    variant: WorkflowVariant::Claims,
    entries: &[Entry {
        event: E::PolicyIssuedEvent,
        roles: &[R::System, R::Pcic],
        status: S::PolicyIssued,
    }],
    transitions: &[
        row(&[S::PolicyIssued], E::ClaimFiled, &[R::Farmer], S::ClaimFiled, NONE),
        row(&[S::ClaimFiled], E::AdjusterReviewStarted, &[R::Pcic], S::ProcessingByAdjuster, NONE),
        row(
            &[S::ClaimFiled, S::ProcessingByAdjuster],
            E::ClaimApproved,
            &[R::Pcic],
            S::ClaimApproved,
            &[E::ClaimApprovedEvent],
        ),
        row(&[S::ClaimFiled, S::ProcessingByAdjuster], E::ClaimRejected, &[R::Pcic], S::Rejected, REJECTED),
        row(
            &[S::ClaimFiled, S::ProcessingByAdjuster],
            E::ClaimCancelledByUser,
            &[R::Farmer],
            S::CancelledByUser,
            NONE,
        ),
    ],
    terminal: &[S::ClaimApproved, S::Rejected, S::CancelledByUser],
};
