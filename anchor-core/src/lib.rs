//! Codecs, data model, request parser, and error taxonomy shared by the
//! rest of the Ceramic Anchor Service workspace. Grounded on
//! `dataverse-os-network-crates`'s `ceramic`/`types` crates: the same CID,
//! StreamID and CommitID decode machinery, generalized from "decode one
//! Ceramic stream reference" into "decode and validate an anchor request".

pub mod codec;
pub mod commit;
pub mod config;
pub mod error;
pub mod model;
pub mod parser;

pub use config::AnchorConfig;
pub use error::{Error, Result, CONFLICT_RESOLUTION_MESSAGE};
