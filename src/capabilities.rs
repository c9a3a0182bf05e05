//! Capability advertisement and parsing.
//!
//! Consolidates what used to be five-plus independent capability
//! format/parse implementations in the teacher tree
//! (`protocol/v1.rs::format_capabilities`/`parse_capabilities`,
//! `protocol/v2.rs::advertise_capabilities`,
//! `server/capabilities.rs::build_v1_capabilities_from_features`/
//! `build_v2_capabilities_with_commands`/`parse_client_capabilities`,
//! `server/handshake.rs::format_capabilities_v1`/`write_v2_capabilities`)
//! into this single module, grounded primarily on `server/capabilities.rs`
//! since it is the only one that derives default per-command features from
//! `gix_protocol::Command` rather than hand-rolling the list.

use crate::{
    config::ServerOptions,
    error::{Error, Result},
    types::*,
};
use bstr::ByteSlice;
use gix::Repository;
use gix_protocol::Command;
use gix_transport::client::Capabilities;

/// Capability manager for advertising and parsing protocol capabilities
pub struct CapabilityManager<'a> {
    repository: &'a Repository,
    options: &'a ServerOptions,
}

impl<'a> CapabilityManager<'a> {
    /// Create a new capability manager
    pub fn new(repository: &'a Repository, options: &'a ServerOptions) -> Self {
        Self { repository, options }
    }

    /// Build the server capabilities this session should advertise, seeded
    /// from configuration.
    pub fn default_server_capabilities(&self) -> ServerCapabilities {
        let mut caps = ServerCapabilities::default();
        caps.filter = self.options.allow_filter;
        caps.allow_tip_sha1_in_want = self.options.allow_tip_sha1_in_want;
        caps.allow_reachable_sha1_in_want = self.options.allow_reachable_sha1_in_want;
        caps.allow_any_sha1_in_want = self.options.allow_any_sha1_in_want;
        caps.ref_in_want = self.options.advertise_ref_in_want;
        caps.object_info = self.options.enable_object_info;
        caps.packfile_uris = self.options.allow_packfile_uris;
        caps.deepen_relative = self.options.allow_deepen_relative;
        caps.shallow = self.options.allow_shallow;
        if !self.options.allow_sideband_all {
            caps.side_band = SideBandMode::None;
        }
        if let Some(agent) = &self.options.user_agent {
            caps.agent = agent.clone();
        }
        caps
    }

    /// Build capabilities via `gix-protocol`'s default-feature derivation,
    /// used when validating V2 command arguments against the transport
    /// crate's own `Capabilities` type.
    pub fn build_server_capabilities(&self, protocol_version: ProtocolVersion) -> Result<Capabilities> {
        match protocol_version {
            ProtocolVersion::V0 | ProtocolVersion::V1 => {
                let fetch_command = Command::Fetch;
                let default_features = fetch_command.default_features(protocol_version, &Capabilities::default());
                let caps_string = self.build_v1_capabilities_from_features(&default_features);
                let full_string = format!("\0{caps_string}");
                Capabilities::from_bytes(full_string.as_bytes())
                    .map(|(caps, _)| caps)
                    .map_err(|e| Error::ProtocolParsing(format!("failed to parse V1 capabilities: {e}")))
            }
            ProtocolVersion::V2 => {
                let capabilities_string = self.build_v2_capabilities_with_commands();
                let full_string = format!("version 2\n{capabilities_string}");
                Capabilities::from_lines(full_string.into())
                    .map_err(|e| Error::ProtocolParsing(format!("failed to parse V2 capabilities: {e}")))
            }
        }
    }

    fn build_v1_capabilities_from_features(
        &self,
        features: &[(&str, Option<std::borrow::Cow<'static, str>>)],
    ) -> String {
        let mut cap_strings = Vec::new();
        for (feature, value) in features {
            if let Some(val) = value {
                cap_strings.push(format!("{feature}={val}"));
            } else {
                cap_strings.push(feature.to_string());
            }
        }
        if self.options.allow_filter {
            cap_strings.push("filter".to_string());
        }
        if self.options.allow_tip_sha1_in_want {
            cap_strings.push("allow-tip-sha1-in-want".to_string());
        }
        if self.options.allow_reachable_sha1_in_want {
            cap_strings.push("allow-reachable-sha1-in-want".to_string());
        }
        cap_strings.push(format!("agent=git/gitoxide-{}", crate::VERSION));
        cap_strings.join(" ")
    }

    fn build_v2_capabilities_with_commands(&self) -> String {
        let mut caps = Vec::new();
        caps.push(format!("agent=git/gitoxide-{}", crate::VERSION));
        caps.push("object-format=sha1".to_string());

        let default_caps = Capabilities::default();

        let fetch_command = Command::Fetch;
        let fetch_features = fetch_command.default_features(ProtocolVersion::V2, &default_caps);
        let mut fetch_cap_strings = Vec::new();
        for (feature, _) in &fetch_features {
            if *feature != "fetch" {
                fetch_cap_strings.push(feature.to_string());
            }
        }
        if self.options.allow_filter && !fetch_cap_strings.iter().any(|c| c == "filter") {
            fetch_cap_strings.push("filter".to_string());
        }
        if self.options.advertise_ref_in_want && !fetch_cap_strings.iter().any(|c| c == "ref-in-want") {
            fetch_cap_strings.push("ref-in-want".to_string());
        }
        caps.push(format!("fetch={}", fetch_cap_strings.join(" ")));

        let ls_refs_command = Command::LsRefs;
        let ls_refs_features = ls_refs_command.default_features(ProtocolVersion::V2, &default_caps);
        let mut ls_refs_cap_strings = vec!["symrefs".to_string(), "peel".to_string(), "unborn".to_string()];
        for (feature, _) in &ls_refs_features {
            if *feature != "ls-refs" && !ls_refs_cap_strings.iter().any(|c| c == feature) {
                ls_refs_cap_strings.push(feature.to_string());
            }
        }
        caps.push(format!("ls-refs={}", ls_refs_cap_strings.join(" ")));

        caps.join("\n")
    }

    /// Parse a client's V1 capability string (the null-separated tail of the
    /// first `want`/ref-advertisement line).
    pub fn parse_client_capabilities(&self, caps_str: &str) -> Result<ClientCapabilities> {
        let mut capabilities = ClientCapabilities::default();

        for cap in caps_str.split_whitespace() {
            match cap {
                "multi_ack" => capabilities.multi_ack = MultiAckMode::Basic,
                "multi_ack_detailed" => capabilities.multi_ack = MultiAckMode::Detailed,
                "thin-pack" => capabilities.thin_pack = true,
                cap if SideBandMode::from_capability_string(cap).is_some() => {
                    capabilities.side_band = SideBandMode::from_capability_string(cap).unwrap();
                }
                "ofs-delta" => capabilities.ofs_delta = true,
                "include-tag" => capabilities.include_tag = true,
                "no-progress" => capabilities.no_progress = true,
                "allow-tip-sha1-in-want" => capabilities.allow_tip_sha1_in_want = true,
                "allow-reachable-sha1-in-want" => capabilities.allow_reachable_sha1_in_want = true,
                "allow-any-sha1-in-want" => capabilities.allow_any_sha1_in_want = true,
                "deepen-relative" => capabilities.deepen_relative = true,
                "shallow" => capabilities.shallow = true,
                cap if cap.starts_with("filter=") => {
                    capabilities.filter = Some(FilterSpec::parse(&cap["filter=".len()..])?);
                }
                cap if cap.starts_with("agent=") => {
                    capabilities.agent = Some(cap["agent=".len()..].into());
                }
                cap if cap.starts_with("session-id=") => {
                    capabilities.session_id = Some(cap["session-id=".len()..].into());
                }
                cap if cap.starts_with("object-format=") => {
                    let format_name = &cap["object-format=".len()..];
                    match format_name {
                        "sha1" => capabilities.object_format = Some(gix_hash::Kind::Sha1),
                        other => {
                            return Err(Error::UnsupportedObjectFormat {
                                format: other.to_string(),
                            })
                        }
                    }
                }
                unknown => {
                    tracing::debug!(capability = unknown, "ignoring unknown client capability");
                }
            }
        }

        Ok(capabilities)
    }

    /// V1 capability tokens, in Git's conventional advertisement order.
    pub fn get_v1_capability_strings(&self, caps: &ServerCapabilities) -> Vec<String> {
        let mut cap_strings = Vec::new();

        match caps.multi_ack {
            MultiAckMode::None => {}
            MultiAckMode::Basic | MultiAckMode::Detailed => cap_strings.push("multi_ack".to_string()),
        }
        if caps.thin_pack {
            cap_strings.push("thin-pack".to_string());
        }
        cap_strings.extend(caps.side_band.to_capability_strings().iter().map(|s| s.to_string()));
        if caps.ofs_delta {
            cap_strings.push("ofs-delta".to_string());
        }
        if caps.shallow {
            cap_strings.push("shallow".to_string());
        }
        if caps.deepen_since {
            cap_strings.push("deepen-since".to_string());
        }
        if caps.deepen_not {
            cap_strings.push("deepen-not".to_string());
        }
        if caps.deepen_relative {
            cap_strings.push("deepen-relative".to_string());
        }
        if caps.no_progress {
            cap_strings.push("no-progress".to_string());
        }
        if caps.include_tag {
            cap_strings.push("include-tag".to_string());
        }
        if caps.multi_ack == MultiAckMode::Detailed {
            cap_strings.push("multi_ack_detailed".to_string());
        }
        if caps.no_done {
            cap_strings.push("no-done".to_string());
        }
        if caps.filter {
            cap_strings.push("filter".to_string());
        }
        if caps.allow_tip_sha1_in_want {
            cap_strings.push("allow-tip-sha1-in-want".to_string());
        }
        if caps.allow_reachable_sha1_in_want {
            cap_strings.push("allow-reachable-sha1-in-want".to_string());
        }
        if caps.allow_any_sha1_in_want {
            cap_strings.push("allow-any-sha1-in-want".to_string());
        }

        if let Ok(head) = self.repository.head() {
            if let gix::head::Kind::Symbolic(target_ref) = head.kind {
                cap_strings.push(format!("symref=HEAD:{}", target_ref.name.as_bstr().to_str_lossy()));
            }
        }

        if !caps.object_format.is_empty() {
            cap_strings.push("object-format=sha1".to_string());
        }
        cap_strings.push(format!("agent={}", caps.agent.to_str_lossy()));
        if let Some(session_id) = &caps.session_id {
            cap_strings.push(format!("session-id={}", session_id.to_str_lossy()));
        }

        cap_strings
    }

    /// Render V1 capability tokens as a single space-joined string.
    pub fn server_capabilities_to_v1_string(&self, caps: &ServerCapabilities) -> String {
        self.get_v1_capability_strings(caps).join(" ")
    }

    /// V2 capability-advertisement lines (everything after `version 2`).
    pub fn get_v2_capability_lines(&self, capabilities: &ServerCapabilities) -> Vec<String> {
        let mut lines = vec!["version 2".to_string()];
        lines.push(format!("agent={}", capabilities.agent.to_str_lossy()));
        for format in &capabilities.object_format {
            lines.push(format!("object-format={format}"));
        }

        let mut ls_refs_caps = vec!["unborn".to_string()];
        let fetch_line = {
            let mut fetch_caps = Vec::new();
            if capabilities.shallow {
                fetch_caps.push("shallow".to_string());
            }
            if capabilities.filter {
                fetch_caps.push("filter".to_string());
            }
            if capabilities.ref_in_want {
                fetch_caps.push("ref-in-want".to_string());
            }
            for cap in capabilities.side_band.to_v2_capability_strings() {
                fetch_caps.push(cap.to_string());
            }
            if capabilities.packfile_uris {
                fetch_caps.push("packfile-uris".to_string());
            }
            if capabilities.wait_for_done {
                fetch_caps.push("wait-for-done".to_string());
            }
            if fetch_caps.is_empty() {
                "fetch".to_string()
            } else {
                format!("fetch={}", fetch_caps.join(" "))
            }
        };
        lines.push(format!("ls-refs={}", ls_refs_caps.join(" ")));
        ls_refs_caps.clear(); // ls-refs has no further sub-caps today; kept for symmetry with fetch.
        lines.push(fetch_line);
        lines.push("server-option".to_string());
        if capabilities.object_info {
            lines.push("object-info".to_string());
        }
        if let Some(ref session_id) = capabilities.session_id {
            lines.push(format!("session-id={}", session_id.to_str_lossy()));
        }
        lines
    }

    /// Check compatibility between what the client asked for and what the
    /// server is willing to serve.
    pub fn validate_client_capabilities(
        &self,
        client_caps: &ClientCapabilities,
        server_caps: &ServerCapabilities,
    ) -> Result<()> {
        if let Some(client_format) = client_caps.object_format {
            if !server_caps.object_format.contains(&client_format) {
                return Err(Error::UnsupportedObjectFormat {
                    format: client_format.to_string(),
                });
            }
        }
        if let Some(ref filter) = client_caps.filter {
            if !server_caps.filter {
                return Err(Error::UnsupportedCapability {
                    capability: format!("filter={}", filter.to_spec_string()),
                });
            }
            if !self.options.is_filter_allowed(filter) {
                return Err(Error::FilterNotAllowed {
                    spec: filter.to_spec_string(),
                });
            }
        }
        if client_caps.shallow && !server_caps.shallow {
            return Err(Error::UnsupportedCapability {
                capability: "shallow".to_string(),
            });
        }
        if client_caps.deepen_relative && !server_caps.deepen_relative {
            return Err(Error::UnsupportedCapability {
                capability: "deepen-relative".to_string(),
            });
        }
        Ok(())
    }
}
