//! Error types for the upload-pack negotiation engine

use std::path::PathBuf;

/// Result type alias for upload-pack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error category, matching the error taxonomy clients and callers
/// are expected to branch on. Individual [`Error`] variants are more
/// granular; `kind()` collapses them onto one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed packet-line or protocol syntax
    ProtocolSyntax,
    /// A request was denied by the reachability/policy engine
    PolicyDenied,
    /// An object or reference could not be resolved
    ObjectResolution,
    /// Shallow/deepen frontier computation failed
    Shallow,
    /// Object filter parsing or application failed
    Filter,
    /// Pack generation or streaming failed
    PackGeneration,
    /// I/O, transport, or configuration failure
    Io,
}

/// Comprehensive error type for upload-pack operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Repository access error
    #[error("repository error: {0}")]
    Repository(#[from] gix::open::Error),

    /// Object database error
    #[error("object database error: {0}")]
    Odb(String),

    /// Reference error
    #[error("reference error: {0}")]
    Reference(String),

    /// Pack generation error
    #[error("pack generation error: {0}")]
    Pack(String),

    /// Protocol handshake error
    #[error("protocol error: {0}")]
    Protocol(#[from] gix_protocol::handshake::Error),

    /// Protocol parsing error
    #[error("protocol parsing error: {0}")]
    ProtocolParsing(String),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] gix_transport::client::Error),

    /// Packet-line encode error
    #[error("packet-line error: {0}")]
    Packetline(#[from] gix_packetline::encode::Error),

    /// Packet-line decode error
    #[error("packet-line decode error: {0}")]
    PacketlineDecode(#[from] gix_packetline::decode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reference packed-buffer error
    #[error("reference packed-buffer error: {0}")]
    RefPackedBuffer(#[from] gix_ref::packed::buffer::open::Error),

    /// Reference iterator error
    #[error("reference iterator error: {0}")]
    RefIterInit(#[from] gix::reference::iter::init::Error),

    /// Generic boxed error
    #[error("{0}")]
    Boxed(#[from] Box<dyn std::error::Error + Send + Sync>),

    /// Object commit error
    #[error("object commit error: {0}")]
    ObjectCommit(#[from] gix::object::commit::Error),

    /// Object decode error
    #[error("object decode error: {0}")]
    ObjectDecode(#[from] gix_object::decode::Error),

    /// Revision walk error
    #[error("revision walk error: {0}")]
    RevisionWalk(#[from] gix::revision::walk::Error),

    /// Invalid object ID syntax
    #[error("invalid object id: {oid}")]
    InvalidObjectId { oid: String },

    /// Requested object does not exist in the object database
    #[error("object not found: {oid}")]
    ObjectNotFound { oid: gix_hash::ObjectId },

    /// Malformed reference name
    #[error("invalid reference: {name}")]
    InvalidReference { name: String },

    /// Named reference does not exist (e.g. `want-ref` target)
    #[error("reference not found: {name}")]
    ReferenceNotFound { name: String },

    /// A capability the client requires is not supported
    #[error("capability not supported: {capability}")]
    UnsupportedCapability { capability: String },

    /// An unrecognized V2 command was requested
    #[error("unsupported command: {command}")]
    UnsupportedCommand { command: String },

    /// An unsupported hash algorithm / object format was requested
    #[error("unsupported object format: {format}")]
    UnsupportedObjectFormat { format: String },

    /// Client and server capabilities are mutually incompatible
    #[error("capability mismatch: {message}")]
    CapabilityMismatch { message: String },

    /// A `want` was rejected by the reachability/policy engine
    #[error("want rejected by policy: {oid}")]
    PolicyDenied { oid: gix_hash::ObjectId },

    /// Invalid filter specification
    #[error("invalid filter: {message}")]
    InvalidFilter { message: String },

    /// A syntactically valid `filter=<spec>` was rejected by server config
    /// (`uploadpack.allowFilter`/the per-kind toggles/`uploadpack.allowFilter=<prefix>`)
    #[error("filter '{spec}' not allowed")]
    FilterNotAllowed { spec: String },

    /// Invalid or unsupported protocol version string
    #[error("invalid protocol version: {version}")]
    InvalidProtocolVersion { version: u8 },

    /// Shallow/deepen frontier computation error
    #[error("shallow error: {message}")]
    Shallow { message: String },

    /// Object filter application error
    #[error("filter error: {message}")]
    Filter { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Hook execution error
    #[error("hook execution failed: {hook} at {path}")]
    Hook { hook: String, path: PathBuf },

    /// Permission denied
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// Repository format version not supported
    #[error("repository format version {version} not supported")]
    UnsupportedRepositoryFormat { version: u32 },

    /// Custom error for extensibility
    #[error("{message}")]
    Custom { message: String },

    /// Path error
    #[error("path error: {0}")]
    Path(#[from] gix::path::relative_path::Error),
}

impl Error {
    /// Create a custom error with a message
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }

    /// Collapse this error onto its coarse [`ErrorKind`]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PacketlineDecode(_) | Self::ProtocolParsing(_) | Self::InvalidProtocolVersion { .. } => {
                ErrorKind::ProtocolSyntax
            }
            Self::PolicyDenied { .. }
            | Self::UnsupportedCapability { .. }
            | Self::CapabilityMismatch { .. }
            | Self::PermissionDenied { .. } => ErrorKind::PolicyDenied,
            Self::InvalidObjectId { .. }
            | Self::ObjectNotFound { .. }
            | Self::InvalidReference { .. }
            | Self::ReferenceNotFound { .. }
            | Self::Reference(_)
            | Self::RefPackedBuffer(_)
            | Self::RefIterInit(_)
            | Self::ObjectCommit(_)
            | Self::ObjectDecode(_)
            | Self::RevisionWalk(_)
            | Self::UnsupportedObjectFormat { .. } => ErrorKind::ObjectResolution,
            Self::Shallow { .. } => ErrorKind::Shallow,
            Self::Filter { .. } | Self::InvalidFilter { .. } | Self::FilterNotAllowed { .. } => ErrorKind::Filter,
            Self::Pack(_) | Self::UnsupportedCommand { .. } => ErrorKind::PackGeneration,
            Self::Repository(_)
            | Self::Odb(_)
            | Self::Protocol(_)
            | Self::Transport(_)
            | Self::Packetline(_)
            | Self::Io(_)
            | Self::Boxed(_)
            | Self::Config { .. }
            | Self::Hook { .. }
            | Self::UnsupportedRepositoryFormat { .. }
            | Self::Custom { .. }
            | Self::Path(_) => ErrorKind::Io,
        }
    }

    /// Whether a client retry (e.g. reconnect) is plausible for this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Transport(_) | Self::Packetline(_))
    }

    /// Whether this error is safe/expected to report back to the client
    /// (as opposed to an internal failure that should just close the
    /// connection).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProtocolSyntax
                | ErrorKind::PolicyDenied
                | ErrorKind::ObjectResolution
                | ErrorKind::Shallow
                | ErrorKind::Filter
        )
    }

    /// Render the exact text to send on an `ERR`/side-band-3 line. A few
    /// variants have wire wording native git clients pattern-match on
    /// (`want <oid> not valid`, `No commits selected for shallow request`);
    /// everything else falls back to its `Display` form.
    pub fn wire_message(&self) -> String {
        match self {
            Self::PolicyDenied { oid } => format!("want {oid} not valid"),
            Self::Shallow { message } => message.clone(),
            other => other.to_string(),
        }
    }
}
