pub mod config;
pub mod error;
pub mod filter;
pub mod memory;
pub mod models;
pub mod service;
pub mod sync;
pub mod workflow;

// Re-export commonly used types
pub use config::{Config, State};
pub use error::{Orphan, SyncError};
pub use memory::InMemoryService;
pub use models::{
    Application, ApplicationStatus, Document, Entity, Faq, Project, RecordKey, Validate,
};
pub use service::{ChangeEvent, ChangeKind, OrderBy, Query, RemoteService, Subscription};
pub use sync::{
    ApplicationSync, CollectionSync, Direction, DocumentSync, FaqSync, ProjectSync, Snapshot,
    SyncPhase,
};
pub use workflow::{Attachment, SubmitReceipt, UploadSettings, WorkflowFailure};
