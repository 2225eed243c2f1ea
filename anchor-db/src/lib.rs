//! Postgres repositories (§4.4 Request Repository, §4.2 Metadata
//! Repository, §2 Anchor Repository) and the cross-process advisory-lock
//! mutex (§4.10) they share. Grounded on the teacher's
//! `dataverse-pgsql-store` crate: same Diesel + r2d2 stack, same
//! `models::Row <-> domain type` `TryFrom` conversion pattern, generalized
//! from one `streams`/`events` pair of tables into the three-table anchor
//! request lifecycle.

mod error;
mod models;
mod mutex;
mod pool;
mod schema;
mod util;

pub mod anchor_repo;
pub mod metadata_repo;
pub mod request_repo;

pub use anchor_repo::AnchorRepository;
pub use metadata_repo::MetadataRepository;
pub use mutex::{acquire as acquire_mutex, MutexGuard};
pub use pool::{build_pool, PgPool, PgPooledConnection};
pub use request_repo::{RequestRepository, RequestTiming};
