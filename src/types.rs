//! Common types and structures used throughout the upload-pack negotiation engine

use bstr::BString;
use gix_hash::ObjectId;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

// Re-export transport types
pub use gix_transport::client::Capabilities;
pub use gix_transport::Protocol as ProtocolVersion;

// Re-export protocol types for gradual migration
pub use gix_protocol::fetch::response::Acknowledgement;
pub use gix_protocol::handshake::Ref as ProtocolRef;
pub use gix_packetline::Channel as SideBandChannel;
pub use gix_protocol::Command;
pub use gix_shallow::Update as ShallowUpdate;

// Use ProtocolRef directly as our Reference type
pub type Reference = ProtocolRef;

/// Wire-format literals for the ACK/NAK negotiation responses (protocol v0/v1,
/// `git-protocol-common(5)`). Kept in one place since every dialect and every
/// packet writer needs to agree on them.
pub mod protocol {
    /// Prefix of an ACK line: `ACK <oid>`.
    pub const ACK_PREFIX: &str = "ACK ";
    /// Suffix appended to an ACK line in `multi_ack`/`multi_ack_detailed`
    /// mode to indicate negotiation continues: `ACK <oid> continue`.
    pub const ACK_CONTINUE_SUFFIX: &str = " continue";
    /// Suffix appended in `multi_ack_detailed` mode while acknowledging a
    /// common object that does not yet make the server ready: `ACK <oid> common`.
    pub const ACK_COMMON_SUFFIX: &str = " common";
    /// Suffix appended in protocol v2 / `no-done` mode once a common base
    /// is found: `ACK <oid> ready`.
    pub const ACK_READY_SUFFIX: &str = " ready";
    /// The full NAK line, sent when no common object has been found yet.
    pub const NAK: &[u8] = b"NAK\n";
}

/// Helper trait for working with protocol references
pub trait ProtocolRefExt {
    /// Get the reference name
    fn ref_name(&self) -> &BString;
    /// Get the target object ID
    fn target_oid(&self) -> ObjectId;
    /// Get the peeled object ID if this is a peeled ref
    fn peeled_oid(&self) -> Option<ObjectId>;
    /// Check if this is a symbolic reference
    fn is_symbolic_ref(&self) -> bool;
    /// Check if this is an unborn reference
    fn is_unborn_ref(&self) -> bool;
}

impl ProtocolRefExt for ProtocolRef {
    fn ref_name(&self) -> &BString {
        match self {
            ProtocolRef::Peeled { full_ref_name, .. } => full_ref_name,
            ProtocolRef::Direct { full_ref_name, .. } => full_ref_name,
            ProtocolRef::Symbolic { full_ref_name, .. } => full_ref_name,
            ProtocolRef::Unborn { full_ref_name, .. } => full_ref_name,
        }
    }

    fn target_oid(&self) -> ObjectId {
        match self {
            ProtocolRef::Peeled { object, .. } => *object,
            ProtocolRef::Direct { object, .. } => *object,
            ProtocolRef::Symbolic { object, .. } => *object,
            ProtocolRef::Unborn { .. } => ObjectId::null(gix_hash::Kind::Sha1),
        }
    }

    fn peeled_oid(&self) -> Option<ObjectId> {
        match self {
            ProtocolRef::Peeled { object, .. } => Some(*object),
            _ => None,
        }
    }

    fn is_symbolic_ref(&self) -> bool {
        matches!(self, ProtocolRef::Symbolic { .. })
    }

    fn is_unborn_ref(&self) -> bool {
        matches!(self, ProtocolRef::Unborn { .. })
    }
}

/// Multi-ack modes for negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiAckMode {
    /// No multi-ack support
    #[default]
    None,
    /// Basic multi-ack
    Basic,
    /// Detailed multi-ack with more granular responses
    Detailed,
}

/// Side-band modes for multiplexed communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SideBandMode {
    /// No side-band support
    #[default]
    None,
    /// Basic side-band (up to 1000 bytes)
    Basic,
    /// Side-band 64k (up to 65520 bytes)
    SideBand64k,
}

impl SideBandMode {
    /// Recognize a client-advertised capability token as a side-band mode.
    pub fn from_capability_string(cap: &str) -> Option<Self> {
        match cap {
            "side-band" => Some(Self::Basic),
            "side-band-64k" => Some(Self::SideBand64k),
            _ => None,
        }
    }

    /// Maximum payload size (excluding the band byte and length prefix) that
    /// may be sent in a single side-band packet, or `None` when side-band is
    /// disabled entirely.
    pub fn max_data_size(&self) -> Option<usize> {
        match self {
            Self::None => None,
            // 1000-byte packet limit minus 4-byte length prefix minus 1 band byte.
            Self::Basic => Some(995),
            // 65520-byte packet limit minus 4-byte length prefix minus 1 band byte.
            Self::SideBand64k => Some(65515),
        }
    }

    /// V1 capability-advertisement tokens for this mode.
    pub fn to_capability_strings(&self) -> &'static [&'static str] {
        match self {
            Self::None => &[],
            Self::Basic => &["side-band"],
            Self::SideBand64k => &["side-band-64k"],
        }
    }

    /// V2 `fetch=` sub-capability tokens for this mode (V2 only knows one
    /// side-band flavor, negotiated via `sideband-all`).
    pub fn to_v2_capability_strings(&self) -> &'static [&'static str] {
        match self {
            Self::None => &[],
            _ => &["sideband-all"],
        }
    }
}

/// Server configuration for capability management
#[derive(Debug, Clone)]
pub struct ServerCapabilities {
    /// Multi-ack support level
    pub multi_ack: MultiAckMode,
    /// Thin-pack support
    pub thin_pack: bool,
    /// Side-band support
    pub side_band: SideBandMode,
    /// Offset delta support
    pub ofs_delta: bool,
    /// Include tag support
    pub include_tag: bool,
    /// Shallow support
    pub shallow: bool,
    /// Deepen-since support
    pub deepen_since: bool,
    /// Deepen-not support
    pub deepen_not: bool,
    /// Deepen-relative support
    pub deepen_relative: bool,
    /// No-progress support
    pub no_progress: bool,
    /// Filter support
    pub filter: bool,
    /// Allow tip SHA1 in want
    pub allow_tip_sha1_in_want: bool,
    /// Allow reachable SHA1 in want
    pub allow_reachable_sha1_in_want: bool,
    /// Allow any SHA1 in want
    pub allow_any_sha1_in_want: bool,
    /// No-done support (protocol v2)
    pub no_done: bool,
    /// Agent string
    pub agent: BString,
    /// Supported object formats
    pub object_format: SmallVec<[gix_hash::Kind; 2]>,
    /// Session ID for tracing
    pub session_id: Option<BString>,
    /// Packfile URIs support (protocol v2)
    pub packfile_uris: bool,
    /// Wait for done support (protocol v2)
    pub wait_for_done: bool,
    /// Object info support (protocol v2) - disabled by default
    pub object_info: bool,
    /// `want-ref` support (protocol v2)
    pub ref_in_want: bool,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            multi_ack: MultiAckMode::Detailed,
            thin_pack: true,
            side_band: SideBandMode::SideBand64k,
            ofs_delta: true,
            include_tag: true,
            shallow: true,
            deepen_since: true,
            deepen_not: true,
            deepen_relative: true,
            no_progress: true,
            filter: false,
            allow_tip_sha1_in_want: false,
            allow_reachable_sha1_in_want: false,
            allow_any_sha1_in_want: false,
            no_done: true,
            agent: format!("git/gitoxide-{}", crate::VERSION).into(),
            object_format: smallvec::smallvec![gix_hash::Kind::Sha1],
            session_id: None,
            packfile_uris: false,
            wait_for_done: true,
            object_info: false,
            ref_in_want: false,
        }
    }
}

/// Client capabilities parsed from the wire protocol
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCapabilities {
    /// Multi-ack capability level
    pub multi_ack: MultiAckMode,
    /// Support for thin-pack
    pub thin_pack: bool,
    /// Support for side-band
    pub side_band: SideBandMode,
    /// Support for offset deltas
    pub ofs_delta: bool,
    /// Include tags in pack
    pub include_tag: bool,
    /// Suppress progress information
    pub no_progress: bool,
    /// Allow tip SHA1 in want
    pub allow_tip_sha1_in_want: bool,
    /// Allow reachable SHA1 in want
    pub allow_reachable_sha1_in_want: bool,
    /// Allow any SHA1 in want
    pub allow_any_sha1_in_want: bool,
    /// Deepen capability
    pub deepen_relative: bool,
    /// Shallow capability
    pub shallow: bool,
    /// Filter capability with spec
    pub filter: Option<FilterSpec>,
    /// Session ID for tracing
    pub session_id: Option<BString>,
    /// Agent string
    pub agent: Option<BString>,
    /// Object format (hash algorithm)
    pub object_format: Option<gix_hash::Kind>,
}

/// A parsed `filter=<spec>` value (SPEC_FULL §4.5). Object filters narrow a
/// pack to a subset of reachable objects; `blob:limit` and `tree` are
/// context-sensitive (the same object can be included or excluded depending
/// on *why* the traversal reached it) and are therefore not deduplicated
/// across traversal contexts the way ordinary pack objects are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSpec {
    /// `blob:none` — omit all blob objects.
    BlobNone,
    /// `blob:limit=<n>` — omit blobs larger than `n` bytes.
    BlobLimit(u64),
    /// `tree:<depth>` — omit trees (and their blob contents) beyond `depth`
    /// levels from the root tree of each traversal root.
    TreeDepth(u32),
}

impl FilterSpec {
    /// Parse a `filter=<spec>` value's payload (the part after `filter=`).
    pub fn parse(spec: &str) -> crate::Result<Self> {
        match spec {
            "blob:none" => Ok(Self::BlobNone),
            _ if spec.starts_with("blob:limit=") => {
                let raw = &spec["blob:limit=".len()..];
                let limit = parse_size(raw)
                    .ok_or_else(|| crate::Error::InvalidFilter { message: format!("bad blob:limit value: {raw}") })?;
                Ok(Self::BlobLimit(limit))
            }
            _ if spec.starts_with("tree:") => {
                let raw = &spec["tree:".len()..];
                let depth: u32 = raw
                    .parse()
                    .map_err(|_| crate::Error::InvalidFilter { message: format!("bad tree depth: {raw}") })?;
                Ok(Self::TreeDepth(depth))
            }
            other => Err(crate::Error::InvalidFilter {
                message: format!("unsupported filter spec: {other}"),
            }),
        }
    }

    /// Render back to the wire form used after `filter=`.
    pub fn to_spec_string(&self) -> String {
        match self {
            Self::BlobNone => "blob:none".to_string(),
            Self::BlobLimit(n) => format!("blob:limit={n}"),
            Self::TreeDepth(d) => format!("tree:{d}"),
        }
    }
}

/// Accepts sizes with an optional `k`/`m`/`g` suffix (as native git does for
/// `blob:limit`), or a bare byte count.
fn parse_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Some(n) = raw.strip_suffix(['k', 'K']) {
        n.parse::<u64>().ok().map(|v| v * 1024)
    } else if let Some(n) = raw.strip_suffix(['m', 'M']) {
        n.parse::<u64>().ok().map(|v| v * 1024 * 1024)
    } else if let Some(n) = raw.strip_suffix(['g', 'G']) {
        n.parse::<u64>().ok().map(|v| v * 1024 * 1024 * 1024)
    } else {
        raw.parse::<u64>().ok()
    }
}

/// Reachability policy controlling which objects a client may name directly
/// in a `want`/`want-ref` line (SPEC_FULL §4.3). Resolved once per session
/// from [`crate::config::ServerOptions`] by `policy::RequestPolicy::from_options`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestPolicy {
    /// Only objects at the tip of an advertised reference may be wanted.
    #[default]
    Advertised,
    /// Any object reachable from an advertised tip may be wanted.
    ReachableCommit,
    /// Any advertised tip may be wanted, even if not itself a commit.
    Tip,
    /// Any object reachable from an advertised tip, or any advertised tip
    /// itself, may be wanted.
    ReachableCommitTip,
    /// Any object in the repository may be wanted, regardless of
    /// reachability from an advertised ref. Dangerous: permits probing for
    /// object existence and fetching dangling/private objects.
    Any,
}

/// Request from client during negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    /// Client wants this object
    Want {
        /// Object ID requested
        oid: ObjectId,
        /// Capabilities (only on first want)
        capabilities: Option<ClientCapabilities>,
    },
    /// Client wants the tip of a named reference (protocol v2 `want-ref`)
    WantRef {
        /// The reference name as sent by the client
        name: BString,
    },
    /// Client has this object
    Have {
        /// Object ID the client has
        oid: ObjectId,
    },
    /// Client indicates end of negotiation
    Done,
    /// Client requests deepen by count
    Deepen {
        /// Depth to deepen to
        depth: u32,
    },
    /// Client requests deepen since timestamp
    DeepenSince {
        /// Timestamp to deepen since
        timestamp: gix_date::Time,
    },
    /// Client requests deepen not from refs
    DeepenNot {
        /// Reference patterns to exclude
        refs: Vec<BString>,
    },
    /// Client sends shallow commits
    Shallow {
        /// Shallow commit OID
        oid: ObjectId,
    },
    /// Custom extension for protocol v2
    Extension {
        /// Extension name
        name: BString,
        /// Extension value
        value: Option<BString>,
    },
}

/// Server response during negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerResponse {
    /// Acknowledgment response (includes Common, Ready, Nak variants)
    Ack(Acknowledgement),
    /// Shallow commit information
    Shallow {
        /// Shallow commit OID
        oid: ObjectId,
    },
    /// Unshallow commit information
    Unshallow {
        /// Unshallowed commit OID
        oid: ObjectId,
    },
    /// Error message
    Error {
        /// Error message to client
        message: BString,
    },
}

/// Status of acknowledgment during negotiation (server-side perspective).
/// More granular than the client-facing [`Acknowledgement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Simple acknowledgment: bare `ACK <oid>`, used in plain (`None`)
    /// mode and for the final ACK after `done`.
    Common,
    /// `multi_ack_detailed` intermediate acknowledgment of a common object
    /// that does not yet make the server ready: `ACK <oid> common`.
    DetailedCommon,
    /// Ready to receive more (multi-ack mode)
    Continue,
    /// Ready to send pack
    Ready,
}

impl AckStatus {
    /// Convert to the client-facing [`Acknowledgement`] when possible.
    pub fn to_acknowledgement(self, oid: ObjectId) -> Option<Acknowledgement> {
        match self {
            AckStatus::Common | AckStatus::DetailedCommon => Some(Acknowledgement::Common(oid)),
            AckStatus::Ready => Some(Acknowledgement::Ready),
            AckStatus::Continue => None,
        }
    }
}

/// Negotiation state tracking
#[derive(Debug, Default)]
pub struct NegotiationState {
    /// Objects the client wants
    pub wants: HashSet<ObjectId>,
    /// `want-ref` name -> resolved tip, for the `wanted-refs` response section
    pub wanted_refs: HashMap<BString, ObjectId>,
    /// Objects the client has
    pub haves: HashSet<ObjectId>,
    /// Common objects found
    pub common: HashSet<ObjectId>,
    /// Shallow commits already known to the client
    pub shallow: HashSet<ObjectId>,
    /// Whether negotiation is complete
    pub done: bool,
    /// Deepen specification
    pub deepen: Option<DeepenSpec>,
    /// Filter specification
    pub filter: Option<FilterSpec>,
}

/// Specification for deepening shallow clones
#[derive(Debug, Clone)]
pub enum DeepenSpec {
    /// Deepen by commit count
    Depth(u32),
    /// Deepen since timestamp
    Since(gix_date::Time),
    /// Deepen excluding refs
    Not(Vec<BString>),
}

/// Statistics about pack generation
#[derive(Debug, Default)]
pub struct PackStats {
    /// Number of objects in pack
    pub objects: u32,
    /// Total pack size in bytes
    pub size: u64,
    /// Number of deltified objects
    pub deltas: u32,
    /// Time taken to generate pack
    pub generation_time: std::time::Duration,
}

/// Upload pack session context
#[derive(Debug)]
pub struct SessionContext {
    /// Client capabilities
    pub capabilities: ClientCapabilities,
    /// Server capabilities
    pub server_capabilities: Option<ServerCapabilities>,
    /// Negotiation state
    pub negotiation: NegotiationState,
    /// Protocol version being used
    pub protocol_version: ProtocolVersion,
    /// Whether this is a stateless RPC session
    pub stateless_rpc: bool,
    /// Session start time
    pub start_time: std::time::Instant,
    /// Repository being served
    pub repository_path: std::path::PathBuf,
}

impl SessionContext {
    /// Create a new session context
    pub fn new(repository_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            capabilities: ClientCapabilities::default(),
            server_capabilities: None,
            negotiation: NegotiationState::default(),
            protocol_version: ProtocolVersion::default(),
            stateless_rpc: false,
            start_time: std::time::Instant::now(),
            repository_path: repository_path.into(),
        }
    }

    /// Get session duration
    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_spec_round_trips() {
        for spec in ["blob:none", "blob:limit=1024", "tree:0", "tree:3"] {
            let parsed = FilterSpec::parse(spec).unwrap();
            assert_eq!(parsed.to_spec_string(), spec);
        }
    }

    #[test]
    fn filter_spec_accepts_unit_suffixes() {
        assert_eq!(FilterSpec::parse("blob:limit=1k").unwrap(), FilterSpec::BlobLimit(1024));
        assert_eq!(
            FilterSpec::parse("blob:limit=2m").unwrap(),
            FilterSpec::BlobLimit(2 * 1024 * 1024)
        );
    }

    #[test]
    fn filter_spec_rejects_unknown() {
        assert!(FilterSpec::parse("bogus:thing").is_err());
    }

    #[test]
    fn sideband_max_sizes_are_well_formed() {
        assert_eq!(SideBandMode::None.max_data_size(), None);
        assert!(SideBandMode::Basic.max_data_size().unwrap() < 1000);
        assert!(SideBandMode::SideBand64k.max_data_size().unwrap() < 65520);
    }
}
