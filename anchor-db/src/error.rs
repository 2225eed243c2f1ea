use anchor_core::Error;

/// Every repository method ultimately resolves a `diesel::result::Error`
/// into the shared `anchor_core::Error` taxonomy so callers never match on
/// a Diesel-specific type.
pub(crate) fn map_diesel(err: diesel::result::Error) -> Error {
    Error::Other(err.into())
}

pub(crate) fn map_pool(err: diesel::r2d2::PoolError) -> Error {
    Error::Other(err.into())
}

pub(crate) fn map_join(err: tokio::task::JoinError) -> Error {
    Error::Other(err.into())
}
