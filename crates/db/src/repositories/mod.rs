use async_trait::async_trait;
use thiserror::Error;

use campusflow_core::complaints::ComplaintCategory;
use campusflow_core::domain::history::AuditRecord;
use campusflow_core::domain::identity::IdentityRecord;
use campusflow_core::domain::request::{Request, RequestId, ResidenceType};
use campusflow_core::domain::stats::StageCount;
use campusflow_core::errors::{ApplicationError, ValidationError};
use campusflow_core::roles::{Jurisdiction, ReviewerRole, Role};

pub mod identity;
pub mod memory;
pub mod request;

pub use identity::SqlIdentityRepository;
pub use memory::{InMemoryIdentityRepository, InMemoryRequestRepository};
pub use request::SqlRequestRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("request {request_id} changed concurrently (expected version {expected})")]
    VersionConflict { request_id: RequestId, expected: u32 },
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("submission refused: {0}")]
    Refused(ValidationError),
}

impl RepositoryError {
    /// Storage failures worth retrying: pool exhaustion, I/O, and SQLite busy/locked.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::PoolTimedOut)
            | Self::Database(sqlx::Error::PoolClosed)
            | Self::Database(sqlx::Error::Io(_)) => true,
            Self::Database(sqlx::Error::Database(error)) => {
                matches!(error.code().as_deref(), Some("5") | Some("6") | Some("517"))
            }
            _ => false,
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        if let RepositoryError::Refused(violations) = value {
            return violations.into();
        }
        if value.is_transient() {
            ApplicationError::Transient(value.to_string())
        } else {
            ApplicationError::Persistence(value.to_string())
        }
    }
}

/// Which slice of the request store a pending queue reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingFilter {
    pub role: Role,
    pub residence: Option<ResidenceType>,
    pub complaint_category: Option<ComplaintCategory>,
    /// Limits the queue to the reviewer's students.
    pub jurisdiction: Option<Jurisdiction>,
}

impl PendingFilter {
    pub fn for_role(role: Role) -> Self {
        Self { role, residence: None, complaint_category: None, jurisdiction: None }
    }
}

/// Requests a dashboard aggregates over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestScope {
    /// Requests whose chain includes the reviewer role, narrowed to a
    /// jurisdiction when one is given.
    Chain { role: ReviewerRole, jurisdiction: Option<Jurisdiction> },
    /// Complaints routed to a department.
    Complaints(ComplaintCategory),
    /// A student's own requests.
    Requester(String),
}

/// Decides whether a new request may join the requester's existing ones.
pub type Admission<'a> = &'a (dyn Fn(&[Request]) -> Result<(), ValidationError> + Send + Sync);

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn insert(&self, request: &Request) -> Result<(), RepositoryError>;

    /// Inserts `request` only if `admit` accepts the requester's stored
    /// requests, newest first. The read and the insert hold one write lock,
    /// so two submissions from the same student cannot both pass a check
    /// that each would fail against the other. A refusal is
    /// [`RepositoryError::Refused`].
    async fn insert_admitted(
        &self,
        request: &Request,
        admit: Admission<'_>,
    ) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError>;

    /// Persists the stage change and its history record atomically, only if
    /// the stored version still equals `expected_version`.
    async fn commit_transition(
        &self,
        request: &Request,
        record: &AuditRecord,
        expected_version: u32,
    ) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn list_for_requester(&self, requester_id: &str) -> Result<Vec<Request>, RepositoryError>;

    /// Oldest first.
    async fn list_pending(&self, filter: &PendingFilter) -> Result<Vec<Request>, RepositoryError>;

    /// Requests bearing a history record by `actor_id`, most recent action first.
    async fn list_acted_by(&self, actor_id: &str) -> Result<Vec<Request>, RepositoryError>;

    /// Request counts grouped by kind and stage.
    async fn stage_counts(&self, scope: &RequestScope) -> Result<Vec<StageCount>, RepositoryError>;
}

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn find_by_actor_id(
        &self,
        actor_id: &str,
    ) -> Result<Option<IdentityRecord>, RepositoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>, RepositoryError>;

    async fn save(&self, identity: IdentityRecord) -> Result<(), RepositoryError>;
}
