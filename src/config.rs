//! Configuration for the upload-pack negotiation engine

use crate::{types::ProtocolVersion, Error, Result, ServerCapabilities};
use bstr::{BString, ByteSlice};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration options for the upload-pack server
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Whether to advertise refs (for stateless protocols)
    pub advertise_refs: bool,

    /// Whether this is a stateless RPC connection
    pub stateless_rpc: bool,

    /// Timeout for client operations
    pub timeout: Option<Duration>,

    /// Whether to enable strict mode
    pub strict: bool,

    /// Server capabilities to advertise
    pub capabilities: ServerCapabilities,

    /// Maximum pack size to generate (in bytes)
    pub max_pack_size: Option<u64>,

    /// Enable keep-alive packets
    pub keepalive: Option<Duration>,

    /// Custom upload-pack hook path
    pub upload_pack_hook: Option<PathBuf>,

    /// Custom pack-objects hook path
    pub pack_objects_hook: Option<PathBuf>,

    /// Pre-upload-pack hook path
    pub pre_upload_pack_hook: Option<PathBuf>,

    /// Post-upload-pack hook path
    pub post_upload_pack_hook: Option<PathBuf>,

    /// Hidden refs patterns (`transfer.hideRefs`)
    pub hidden_refs: Vec<BString>,

    /// Allowed filter specs (`uploadpack.allowFilter`'s allow-list)
    pub allowed_filters: Vec<BString>,

    /// Maximum tree filter depth
    pub max_tree_filter_depth: Option<u32>,

    /// Enable shallow clone support
    pub allow_shallow: bool,

    /// Enable filter support
    pub allow_filter: bool,

    /// Allow any SHA1 in want (dangerous: `RequestPolicy::Any`)
    pub allow_any_sha1_in_want: bool,

    /// Allow reachable SHA1 in want (`RequestPolicy::ReachableCommitTip`)
    pub allow_reachable_sha1_in_want: bool,

    /// Allow tip SHA1 in want (`RequestPolicy::Tip`)
    pub allow_tip_sha1_in_want: bool,

    /// Allow resolving `want-ref` against advertised refs (protocol v2)
    pub allow_ref_in_want: bool,

    /// Advertise `ref-in-want` support to clients (protocol v2)
    pub advertise_ref_in_want: bool,

    /// Allow deepen-relative
    pub allow_deepen_relative: bool,

    /// Allow packfile URIs (protocol v2)
    pub allow_packfile_uris: bool,

    /// Enable session ID support
    pub enable_session_id: bool,

    /// Enable SHA-256 support
    pub enable_sha256: bool,

    /// Enable object-info command (protocol v2)
    pub enable_object_info: bool,

    /// Allow blob filtering
    pub allow_blob_filter: bool,

    /// Allow tree filtering
    pub allow_tree_filter: bool,

    /// Maximum shallow depth a client may request
    pub max_shallow_depth: Option<u32>,

    /// Enable sideband-all support
    pub allow_sideband_all: bool,

    /// Custom user agent string
    pub user_agent: Option<BString>,

    /// Supported hash algorithms
    pub hash_algorithms: Vec<gix_hash::Kind>,

    /// Pin the protocol version (`protocol.version`), bypassing `GIT_PROTOCOL`
    /// sniffing. `None` means auto-detect (V0 unless the client opts into V2).
    pub protocol_version: Option<ProtocolVersion>,

    /// Custom configuration values
    pub custom_config: std::collections::HashMap<String, String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            advertise_refs: false,
            stateless_rpc: false,
            timeout: Some(Duration::from_secs(900)), // 15 minutes
            strict: false,
            capabilities: ServerCapabilities::default(),
            max_pack_size: None,
            keepalive: Some(Duration::from_secs(5)),
            upload_pack_hook: None,
            pack_objects_hook: None,
            pre_upload_pack_hook: None,
            post_upload_pack_hook: None,
            hidden_refs: Vec::new(),
            allowed_filters: vec!["blob:none".into(), "blob:limit=1k".into(), "tree:0".into()],
            max_tree_filter_depth: Some(u32::MAX),
            allow_shallow: true,
            allow_filter: true,
            allow_any_sha1_in_want: false,
            allow_reachable_sha1_in_want: false,
            allow_tip_sha1_in_want: false,
            allow_ref_in_want: false,
            advertise_ref_in_want: false,
            allow_deepen_relative: true,
            allow_packfile_uris: false,
            enable_session_id: true,
            enable_sha256: false,
            enable_object_info: false,
            allow_blob_filter: true,
            allow_tree_filter: true,
            max_shallow_depth: None,
            allow_sideband_all: true,
            user_agent: None,
            hash_algorithms: vec![gix_hash::Kind::Sha1],
            protocol_version: None,
            custom_config: std::collections::HashMap::new(),
        }
    }
}

impl ServerOptions {
    /// Create new server options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable ref advertisement
    pub fn with_advertise_refs(mut self, advertise: bool) -> Self {
        self.advertise_refs = advertise;
        self
    }

    /// Set stateless RPC mode
    pub fn with_stateless_rpc(mut self, stateless: bool) -> Self {
        self.stateless_rpc = stateless;
        self
    }

    /// Set timeout duration
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set strict mode
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set server capabilities
    pub fn with_capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set maximum pack size
    pub fn with_max_pack_size(mut self, max_size: u64) -> Self {
        self.max_pack_size = Some(max_size);
        self
    }

    /// Set keepalive interval
    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = Some(keepalive);
        self
    }

    /// Add hidden ref pattern
    pub fn with_hidden_ref(mut self, pattern: impl Into<BString>) -> Self {
        self.hidden_refs.push(pattern.into());
        self
    }

    /// Set allowed filters
    pub fn with_allowed_filters(mut self, filters: Vec<BString>) -> Self {
        self.allowed_filters = filters;
        self
    }

    /// Enable/disable shallow support
    pub fn with_shallow_support(mut self, allow: bool) -> Self {
        self.allow_shallow = allow;
        self
    }

    /// Enable/disable filter support
    pub fn with_filter_support(mut self, allow: bool) -> Self {
        self.allow_filter = allow;
        self
    }

    /// Set custom user agent
    pub fn with_user_agent(mut self, agent: impl Into<BString>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Pin the protocol version explicitly
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = Some(version);
        self
    }

    /// Add custom configuration
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_config.insert(key.into(), value.into());
        self
    }

    /// Load configuration from a Git repository's effective config
    pub fn from_repository(repo: &gix::Repository) -> Result<Self> {
        let mut options = Self::default();
        let config = repo.config_snapshot();

        if let Some(value) = config.boolean("uploadpack.allowAnySHA1InWant") {
            options.allow_any_sha1_in_want = value;
        }
        if let Some(value) = config.boolean("uploadpack.allowReachableSHA1InWant") {
            options.allow_reachable_sha1_in_want = value;
        }
        if let Some(value) = config.boolean("uploadpack.allowTipSHA1InWant") {
            options.allow_tip_sha1_in_want = value;
        }
        if let Some(value) = config.boolean("uploadpack.allowRefInWant") {
            options.allow_ref_in_want = value;
            options.advertise_ref_in_want = value;
        }
        if let Some(value) = config.boolean("uploadpack.allowFilter") {
            options.allow_filter = value;
        }
        if let Some(value) = config.integer("uploadpack.keepAlive") {
            options.keepalive = if value > 0 { Some(Duration::from_secs(value as u64)) } else { None };
        }
        if let Some(value) = config.string("uploadpack.packObjectsHook") {
            options.pack_objects_hook = Some(PathBuf::from(value.to_string()));
        }
        if let Some(value) = config.string("protocol.version") {
            options.protocol_version = match value.as_ref() {
                b"0" => Some(ProtocolVersion::V0),
                b"2" => Some(ProtocolVersion::V2),
                _ => None,
            };
        }

        // transfer.hideRefs is a multi-valued key; load it exactly once via
        // the multi-value accessor (a single-value `config.string()` lookup
        // alongside it would silently duplicate the first entry).
        if let Some(values) = config.strings("transfer.hideRefs") {
            for value in values {
                options.hidden_refs.push(BString::from(value.into_owned()));
            }
        }

        if let Some(value) = config.boolean("transfer.advertiseObjectInfo") {
            options.enable_object_info = value;
        }

        Ok(options)
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if let Some(hook_path) = &self.upload_pack_hook {
            if !hook_path.exists() {
                return Err(Error::Hook {
                    hook: "upload-pack".to_string(),
                    path: hook_path.clone(),
                });
            }
        }
        if let Some(hook_path) = &self.pack_objects_hook {
            if !hook_path.exists() {
                return Err(Error::Hook {
                    hook: "pack-objects".to_string(),
                    path: hook_path.clone(),
                });
            }
        }
        for filter in &self.allowed_filters {
            if filter.is_empty() {
                return Err(Error::Config {
                    message: "empty filter specification not allowed".to_string(),
                });
            }
        }
        if let Some(timeout) = self.timeout {
            if timeout.as_secs() == 0 {
                return Err(Error::Config {
                    message: "timeout cannot be zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Check if a reference should be hidden (`transfer.hideRefs`)
    pub fn is_ref_hidden(&self, ref_name: &str) -> bool {
        for pattern in &self.hidden_refs {
            if let Ok(pattern) = gix_pathspec::Pattern::from_bytes(pattern, gix_pathspec::Defaults::default()) {
                if let Ok(pattern_str) = std::str::from_utf8(pattern.path()) {
                    if ref_name.contains(pattern_str) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Check if a `filter=<spec>` value is allowed by the configured
    /// allow-list and the relevant per-kind toggle.
    pub fn is_filter_allowed(&self, filter: &crate::types::FilterSpec) -> bool {
        if !self.allow_filter {
            return false;
        }
        match filter {
            crate::types::FilterSpec::BlobNone | crate::types::FilterSpec::BlobLimit(_) if !self.allow_blob_filter => {
                return false
            }
            crate::types::FilterSpec::TreeDepth(_) if !self.allow_tree_filter => return false,
            _ => {}
        }
        let spec = filter.to_spec_string();
        self.allowed_filters
            .iter()
            .any(|allowed| spec.starts_with(&*allowed.to_str_lossy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_validate() {
        ServerOptions::default().validate().unwrap();
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let opts = ServerOptions::default().with_timeout(Duration::from_secs(0));
        assert!(opts.validate().is_err());
    }

    #[test]
    fn filter_allow_list_matches_prefix() {
        let opts = ServerOptions::default();
        assert!(opts.is_filter_allowed(&crate::types::FilterSpec::BlobNone));
        assert!(!opts.is_filter_allowed(&crate::types::FilterSpec::TreeDepth(5)));
    }
}
