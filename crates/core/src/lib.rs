pub mod audit;
pub mod chain;
pub mod complaints;
pub mod config;
pub mod domain;
pub mod errors;
pub mod notify;
pub mod roles;
pub mod session;
pub mod validation;

pub use chain::{audit_transition, ApprovalEngine, ChainDefinition, ChainEntry, ChainTable, TransitionOutcome};
pub use complaints::ComplaintCategory;
pub use domain::history::{AuditRecord, Decision, ReviewDecision};
pub use domain::identity::{IdentityRecord, ReviewerAssignment, StudentProfile};
pub use domain::request::{
    AttachmentRef, ComplaintStatus, Request, RequestId, RequestKind, RequestPayload,
    RequestStatus, Requester, ResidenceType, Stage, StoredRequest,
};
pub use domain::stats::{DashboardStats, StageCount};
pub use errors::{
    ApplicationError, FieldViolation, InterfaceError, LifecycleError, ValidationError,
};
pub use notify::{
    DecisionDocument, DecisionNotice, InMemoryNotifier, NoticeOutcome, Notifier, TracingNotifier,
};
pub use roles::{
    Actor, InchargeActor, Jurisdiction, ReviewerActor, ReviewerRole, Role, RoleResolver,
    StudentActor,
};
pub use session::{SessionClaims, SessionError, SessionIssuer};
pub use validation::{EligibilityPolicy, SubmissionSummary, SubmissionValidator};

pub use chrono;
