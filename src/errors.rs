//! Error types you might see while proxying an image fetch

use crate::image::ContentDigest;
use thiserror::Error;

/// Errors from the image client: references, registries, digests, blobs
#[derive(Error, Debug)]
pub enum ImageError {
    /// invalid image reference format
    #[error("invalid image reference format: {0:?}")]
    InvalidReferenceFormat(String),

    /// unsupported image reference transport
    #[error("unsupported image reference transport: {0:?}")]
    UnknownTransport(String),

    /// storage io error
    #[error("storage io error: {0}")]
    Storage(#[from] std::io::Error),

    /// json error
    #[error("json error: {0}")]
    JSON(#[from] serde_json::Error),

    /// network request error
    #[error("network request error: {0}")]
    NetworkRequest(#[from] reqwest::Error),

    /// registry server replied with an unexpected status
    #[error("registry server returned status {status} for {url}")]
    RegistryStatus { status: u16, url: String },

    /// registry server requested an unsupported type of authentication
    #[error("registry server requested an unsupported type of authentication: {0:?}")]
    UnsupportedAuthentication(String),

    /// digest format we can parse but not compute
    #[error("digest format {0:?} is not supported for verification")]
    UnsupportedDigestAlgorithm(String),

    /// unsupported type for image config
    #[error("unsupported type for image config, {0:?}")]
    UnsupportedConfigType(String),

    /// unsupported type for image layer
    #[error("unsupported type for image layer, {0:?}")]
    UnsupportedLayerType(String),

    /// blob ended at the wrong byte count
    #[error("Expected {expected} bytes in blob, got {found}")]
    UnexpectedBlobSize { expected: u64, found: u64 },

    /// blob content does not hash to the digest that named it
    #[error("corrupted blob, expecting {0}")]
    CorruptedBlob(ContentDigest),

    /// calculated digest of downloaded content is not what we asked for
    #[error("calculated digest of downloaded content is not what we asked for, expected {expected}, found {found}")]
    ContentDigestMismatch {
        expected: ContentDigest,
        found: ContentDigest,
    },
}

/// Errors in the control protocol and its transport
#[derive(Error, Debug)]
pub enum ProxyError {
    /// io error
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),

    /// system call error
    #[error("os error: {0}")]
    Os(#[from] nix::Error),

    /// json error
    #[error("json error: {0}")]
    JSON(#[from] serde_json::Error),

    /// request packet that did not decode
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// request packet larger than the protocol allows
    #[error("request packet over the {0} byte limit")]
    OversizedPacket(usize),

    /// reply datagram only partially transmitted
    #[error("short write on the control socket")]
    ShortWrite,

    #[error("Must invoke Initialize")]
    NotInitialized,

    #[error("already initialized")]
    AlreadyInitialized,

    #[error("invalid request, expecting {expected} arguments, found {found}")]
    WrongArgumentCount { expected: usize, found: usize },

    #[error("Expecting {expected}, not {found}")]
    WrongArgumentType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Out of range integer for numeric {0}")]
    OutOfRangeInteger(f64),

    #[error("No image {0}")]
    UnknownImage(u32),

    #[error("no active pipe {0}")]
    UnknownPipe(u32),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// docker schema 1, rejected by the wire contract
    #[error("Unsupported legacy manifest MIME type: {0}")]
    LegacyManifestType(String),

    #[error("Unsupported manifest MIME type: {0}")]
    UnsupportedManifestType(String),

    /// streaming worker died without reporting a result
    #[error("streaming worker failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// container image error
    #[error("container image error: {0}")]
    Image(#[from] ImageError),
}
