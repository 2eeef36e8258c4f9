pub mod attachments;
pub mod connection;
pub mod fixtures;
pub mod lifecycle;
pub mod migrations;
pub mod projections;
pub mod repositories;

pub use attachments::{
    AttachmentError, AttachmentPolicy, AttachmentStore, FsAttachmentStore, InMemoryAttachmentStore,
    StoredAttachment,
};
pub use connection::{connect, connect_with_settings, is_in_memory, DbPool};
pub use fixtures::{SeedDataset, SeedResult, SeededIdentity, VerificationResult};
pub use lifecycle::{LifecycleService, RequestContext, Submission};
pub use projections::QueryService;
