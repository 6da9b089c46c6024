//! Error type shared by every decoder in the crate.

use std::io;

use thiserror::Error;

/// Everything that can go wrong while resolving objects or reconstructing streams.
///
/// `Io`, `Zip` and `Turtle` are failures of the layers underneath the decoders
/// (container access and metadata parsing). The other variants describe the
/// evidence itself.
#[derive(Debug, Error)]
pub enum Aff4Error {
    /// A blob or an object identifier is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The on-disk structures contradict themselves (ordering, record size, encoding).
    #[error("corrupted container: {0}")]
    Corruption(String),

    /// An extent points at a target that is neither a fill value nor a dependent stream.
    #[error("unresolved map target '{0}'")]
    UnresolvedTarget(String),

    /// A dependent stream ran dry before an extent was satisfied.
    #[error("short read from '{target}': expected {expected} bytes, got {actual}")]
    ShortRead {
        target: String,
        expected: u64,
        actual: u64,
    },

    /// An object was asked to act as a stream but declares no stream type we know.
    #[error("object '{uri}' has no supported stream type (declared: {types:?})")]
    UnknownType { uri: String, types: Vec<String> },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("zip container error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("turtle metadata error: {0}")]
    Turtle(#[from] rio_turtle::TurtleError),
}

pub type Result<T> = std::result::Result<T, Aff4Error>;

impl Aff4Error {
    pub fn corruption(msg: impl Into<String>) -> Self {
        Aff4Error::Corruption(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Aff4Error::NotFound(what.into())
    }
}

impl From<Aff4Error> for io::Error {
    fn from(err: Aff4Error) -> Self {
        let kind = match &err {
            Aff4Error::NotFound(_) => io::ErrorKind::NotFound,
            Aff4Error::Corruption(_) => io::ErrorKind::InvalidData,
            Aff4Error::ShortRead { .. } => io::ErrorKind::UnexpectedEof,
            Aff4Error::Io(e) => e.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kind_mapping() {
        let err: io::Error = Aff4Error::corruption("bad offset").into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err: io::Error = Aff4Error::ShortRead {
            target: "aff4://x".into(),
            expected: 10,
            actual: 4,
        }
        .into();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let err: io::Error = Aff4Error::UnresolvedTarget("aff4://nope".into()).into();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_inner_error_survives_conversion() {
        let err: io::Error = Aff4Error::not_found("aff4://gone").into();
        let inner = err
            .into_inner()
            .and_then(|e| e.downcast::<Aff4Error>().ok())
            .unwrap();
        assert!(matches!(*inner, Aff4Error::NotFound(ref s) if s == "aff4://gone"));
    }
}
