use thiserror::Error;

/// The error taxonomy the core pipeline distinguishes. Every fallible
/// operation in this workspace ultimately resolves into one of these
/// variants so callers (HTTP handlers, schedulers, workers) can react
/// uniformly instead of matching on ad-hoc string messages.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid genesis commit at {path}: {reason}")]
    InvalidGenesis { path: String, reason: String },

    #[error("metadata service unavailable: {0}")]
    MetadataServiceUnavailable(String),

    #[error("request not found: {0}")]
    RequestNotFound(String),

    #[error("request rejected by conflict resolution")]
    ConflictResolutionRejection,

    #[error("blockchain transaction failed: {0}")]
    TransactionFailure(String),

    #[error("merkle tree exceeds depth limit ({leaves} leaves > 2^{depth_limit})")]
    MerkleDepthError { leaves: usize, depth_limit: u32 },

    #[error("failed to acquire cross-process mutex after {attempts} attempts")]
    MutexAcquisitionFailed { attempts: u32 },

    #[error("invalid witness CAR: {0}")]
    InvalidWitnessCar(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Sentinel message stored on FAILED rows rejected by conflict resolution.
/// Request rows carrying this exact message are excluded from the
/// `FAILURE_RETRY_WINDOW` retry candidate set (§4.4).
pub const CONFLICT_RESOLUTION_MESSAGE: &str = "Request has failed due to conflict resolution";

impl Error {
    /// HTTP status code the API layer should map this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) | Self::InvalidGenesis { .. } => 400,
            Self::MetadataServiceUnavailable(_) => 503,
            Self::RequestNotFound(_) => 404,
            Self::ConflictResolutionRejection => 409,
            Self::TransactionFailure(_) => 502,
            Self::MerkleDepthError { .. } => 500,
            Self::MutexAcquisitionFailed { .. } => 503,
            Self::InvalidWitnessCar(_) => 422,
            Self::Other(_) => 500,
        }
    }

    /// Stable machine-readable code, independent of the Display message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::InvalidGenesis { .. } => "INVALID_GENESIS",
            Self::MetadataServiceUnavailable(_) => "METADATA_SERVICE_UNAVAILABLE",
            Self::RequestNotFound(_) => "REQUEST_NOT_FOUND",
            Self::ConflictResolutionRejection => "CONFLICT_RESOLUTION_REJECTION",
            Self::TransactionFailure(_) => "TRANSACTION_FAILURE",
            Self::MerkleDepthError { .. } => "MERKLE_DEPTH_ERROR",
            Self::MutexAcquisitionFailed { .. } => "MUTEX_ACQUISITION_FAILED",
            Self::InvalidWitnessCar(_) => "INVALID_WITNESS_CAR",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
