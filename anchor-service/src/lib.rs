//! The Anchor Service pipeline and its supporting components (§2, §4.5,
//! §4.10): conflict resolution, the Metadata Service, the Ready Scheduler,
//! the core batch-anchoring pipeline, anchor-trigger queue producers, and
//! the generic periodic-task scheduler they all run under.

mod anchor_service;
mod conflict;
mod metadata;
mod pubsub_lookup;
mod queue;
mod ready;
mod scheduler;

pub use anchor_service::{AnchorRunOutcome, AnchorService};
pub use metadata::MetadataService;
pub use pubsub_lookup::PgRecentAnchorLookup;
pub use queue::{AnchorTrigger, NullTrigger, WebhookTrigger};
pub use ready::ReadyRunner;
pub use scheduler::Scheduler;
