//! Protocol V2: a stateless `command` dispatch (`ls-refs`, `fetch`,
//! `object-info`) instead of V0's single fixed advertise/negotiate/send-pack
//! sequence.
//!
//! The request framing is `command` + capability-list, a `delim-pkt`, then
//! command-specific argument lines, terminated by a `flush-pkt`. Reused
//! `CapabilityManager`/`ReferenceManager`/`NegotiationEngine`/`shallow` the
//! same way `protocol::v1` does, rather than duplicating ref collection and
//! capability-string formatting a second time as this file previously did.
//! The previous shape also had no way to tell where the capability-list
//! ended and the command arguments began, since it only ever configured the
//! packet-line reader to stop at `flush-pkt` -- it never told
//! `StreamingPeekableIter` about `delim-pkt`, so the first fetch-parameter
//! line it encountered while scanning for capabilities got silently
//! swallowed. Configuring `PacketReader` with the actual delimiters the wire
//! format uses removes the ambiguity instead of working around it.

use crate::{
    capabilities::CapabilityManager,
    config::ServerOptions,
    error::{Error, Result},
    negotiation::NegotiationEngine,
    pack::PackGenerator,
    packet_io::{PacketReader, ResponseWriter},
    protocol::ProtocolHandler,
    references::ReferenceManager,
    shallow,
    types::{AckStatus, DeepenSpec, FilterSpec, ProtocolRefExt, ServerCapabilities, SessionContext, SideBandMode},
};
use bstr::{ByteSlice, BString};
use gix::Repository;
use gix_packetline::PacketLineRef;
use std::{
    collections::HashSet,
    io::{Read, Write},
};

/// Protocol V2 handler.
pub struct Handler<'a> {
    repository: &'a Repository,
    options: &'a ServerOptions,
}

/// The command named by the request's `command=` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestedCommand {
    LsRefs,
    Fetch,
    ObjectInfo,
    ServerInfo,
}

impl std::str::FromStr for RequestedCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ls-refs" => Ok(Self::LsRefs),
            "fetch" => Ok(Self::Fetch),
            "object-info" => Ok(Self::ObjectInfo),
            "server-info" => Ok(Self::ServerInfo),
            _ => Err(Error::UnsupportedCommand { command: s.to_string() }),
        }
    }
}

impl<'a> Handler<'a> {
    pub fn new(repository: &'a Repository, options: &'a ServerOptions) -> Self {
        Self { repository, options }
    }

    fn advertise_capabilities<W: Write>(
        &self,
        output: &mut W,
        cap_manager: &CapabilityManager<'_>,
        server_caps: &ServerCapabilities,
    ) -> Result<()> {
        let mut writer = ResponseWriter::new(output, SideBandMode::None);
        for line in cap_manager.get_v2_capability_lines(server_caps) {
            writer.send_line(&line)?;
        }
        writer.send_flush()
    }

    /// `ls-refs`'s arguments are verb/value lines (`ref-prefix <prefix>`) and
    /// bare flags (`symrefs`, `peel`, `unborn`), not the `key=value` shape of
    /// the capability-list; collecting them all before acting matches how
    /// `handle_fetch` reads its own argument block.
    fn handle_ls_refs<R: Read, W: Write>(
        &self,
        reader: &mut PacketReader<R>,
        output: &mut W,
        ref_manager: &ReferenceManager<'_>,
    ) -> Result<()> {
        let raw_lines = reader.read_until_flush()?;
        let mut symrefs = false;
        let mut peel = false;
        let mut unborn = false;
        let mut prefixes = Vec::new();

        for line in &raw_lines {
            let text = std::str::from_utf8(line)
                .map_err(|_| Error::custom("invalid UTF-8 in ls-refs argument"))?
                .trim();
            match text {
                "symrefs" => symrefs = true,
                "peel" => peel = true,
                "unborn" => unborn = true,
                _ if text.starts_with("ref-prefix ") => prefixes.push(text["ref-prefix ".len()..].to_string()),
                other => tracing::debug!(line = other, "ignoring unrecognized ls-refs argument"),
            }
        }

        let refs = ref_manager.collect_references_with_prefixes(&prefixes)?;
        let mut writer = ResponseWriter::new(output, SideBandMode::None);
        for line in ref_manager.format_v2_ls_refs(&refs, symrefs, peel) {
            writer.send_line(&line)?;
        }
        if unborn {
            self.send_unborn_head(&mut writer)?;
        }
        writer.send_flush()
    }

    fn send_unborn_head<W: Write>(&self, writer: &mut ResponseWriter<'_, W>) -> Result<()> {
        if let Ok(head) = self.repository.head() {
            if let gix::head::Kind::Unborn(_) = head.kind {
                writer.send_unborn(b"HEAD".as_bstr())?;
            }
        }
        Ok(())
    }

    /// Read the `fetch` argument block and drive one round of negotiation,
    /// policy validation, shallow-frontier computation, and pack generation.
    /// Response sections follow SPEC_FULL's fixed order:
    /// `acknowledgments -> shallow-info -> wanted-refs -> packfile`, each
    /// preceded by a `delim-pkt` once a prior section was actually sent.
    #[allow(clippy::too_many_arguments)]
    fn handle_fetch<R: Read, W: Write>(
        &self,
        reader: &mut PacketReader<R>,
        output: &mut W,
        session: &mut SessionContext,
        ref_manager: &ReferenceManager<'_>,
        cap_manager: &CapabilityManager<'_>,
        server_caps: &ServerCapabilities,
        negotiation_engine: &NegotiationEngine<'_>,
    ) -> Result<()> {
        let raw_lines = reader.read_until_flush()?;
        let mut have_oids = Vec::new();
        let mut wanted_ref_order: Vec<(BString, gix_hash::ObjectId)> = Vec::new();

        for line in &raw_lines {
            let text = std::str::from_utf8(line)
                .map_err(|_| Error::custom("invalid UTF-8 in fetch argument"))?
                .trim_end();

            if let Some(rest) = text.strip_prefix("want ") {
                let oid = parse_oid(rest)?;
                if !self.repository.objects.contains(&oid) {
                    return Err(Error::ObjectNotFound { oid });
                }
                session.negotiation.wants.insert(oid);
            } else if let Some(rest) = text.strip_prefix("want-ref ") {
                let name = rest.trim();
                let oid = ref_manager.resolve(name)?;
                session.negotiation.wants.insert(oid);
                session.negotiation.wanted_refs.insert(name.into(), oid);
                wanted_ref_order.push((name.into(), oid));
            } else if let Some(rest) = text.strip_prefix("have ") {
                have_oids.push(parse_oid(rest)?);
            } else if text == "done" {
                if session.negotiation.wants.is_empty() {
                    return Err(Error::ProtocolParsing(
                        "'done' received without any preceding 'want'".to_string(),
                    ));
                }
                session.negotiation.done = true;
                break;
            } else if let Some(rest) = text.strip_prefix("shallow ") {
                session.negotiation.shallow.insert(parse_oid(rest)?);
            } else if let Some(rest) = text.strip_prefix("deepen ") {
                let depth: u32 = rest
                    .trim()
                    .parse()
                    .map_err(|_| Error::custom(format!("invalid deepen depth: {rest}")))?;
                if depth < 1 {
                    return Err(Error::Shallow {
                        message: format!("deepen depth must be >= 1, got {depth}"),
                    });
                }
                session.negotiation.deepen = Some(DeepenSpec::Depth(depth));
            } else if let Some(rest) = text.strip_prefix("deepen-since ") {
                let timestamp: i64 = rest
                    .trim()
                    .parse()
                    .map_err(|_| Error::custom(format!("invalid deepen-since timestamp: {rest}")))?;
                session.negotiation.deepen = Some(DeepenSpec::Since(gix_date::Time::new(timestamp, 0)));
            } else if let Some(rest) = text.strip_prefix("deepen-not ") {
                match &mut session.negotiation.deepen {
                    Some(DeepenSpec::Not(refs)) => refs.push(rest.trim().into()),
                    _ => session.negotiation.deepen = Some(DeepenSpec::Not(vec![rest.trim().into()])),
                }
            } else if let Some(rest) = text.strip_prefix("filter ") {
                let spec = FilterSpec::parse(rest.trim())?;
                if !self.options.is_filter_allowed(&spec) {
                    return Err(Error::FilterNotAllowed {
                        spec: spec.to_spec_string(),
                    });
                }
                session.negotiation.filter = Some(spec);
            } else if let Some(rest) = text.strip_prefix("packfile-uris ") {
                tracing::debug!(uris = rest, "ignoring unsupported packfile-uris request");
            } else {
                match text {
                    "thin-pack" => session.capabilities.thin_pack = true,
                    "no-progress" => session.capabilities.no_progress = true,
                    "include-tag" => session.capabilities.include_tag = true,
                    "ofs-delta" => session.capabilities.ofs_delta = true,
                    "deepen-relative" => session.capabilities.deepen_relative = true,
                    "sideband-all" => session.capabilities.side_band = SideBandMode::SideBand64k,
                    "wait-for-done" => {}
                    other => tracing::debug!(line = other, "ignoring unrecognized fetch argument"),
                }
            }
        }
        session.capabilities.filter = session.negotiation.filter.clone();

        tracing::info!(
            wants = session.negotiation.wants.len(),
            haves = have_oids.len(),
            "v2 fetch parsed"
        );

        // Everything until the packfile section begins is pre-pack: report
        // failures as a framed ERR line, as protocol v0 does, since no
        // side-band channel exists yet to carry one.
        let mut control_writer = ResponseWriter::new(output, SideBandMode::None);

        if !session.negotiation.wanted_refs.is_empty() && !server_caps.ref_in_want {
            let err = Error::UnsupportedCapability {
                capability: "ref-in-want".to_string(),
            };
            control_writer.send_error(&err.wire_message())?;
            return Err(err);
        }
        if session.negotiation.deepen.is_some() && !self.options.allow_shallow {
            let err = Error::UnsupportedCapability {
                capability: "shallow".to_string(),
            };
            control_writer.send_error(&err.wire_message())?;
            return Err(err);
        }
        if let Err(err) = cap_manager.validate_client_capabilities(&session.capabilities, server_caps) {
            control_writer.send_error(&err.wire_message())?;
            return Err(err);
        }

        let advertised: HashSet<gix_hash::ObjectId> = ref_manager
            .collect_advertised_references()?
            .iter()
            .map(ProtocolRefExt::target_oid)
            .collect();
        let all_tips = ref_manager.all_tip_oids()?;
        if let Err(err) = negotiation_engine.validate_wants(&session.negotiation, &advertised, &all_tips) {
            control_writer.send_error(&err.wire_message())?;
            return Err(err);
        }

        let shallow_plan = match shallow::compute_shallow_plan(self.repository, &session.negotiation) {
            Ok(plan) => plan,
            Err(err) => {
                control_writer.send_error(&err.wire_message())?;
                return Err(err);
            }
        };
        session.negotiation.shallow = shallow_plan.shallow.clone();
        control_writer.flush_buffer_if_needed()?;
        drop(control_writer);

        let mut response_writer =
            ResponseWriter::with_progress_control(output, session.capabilities.side_band, session.capabilities.no_progress);

        let mut section_open = self.acknowledge_haves(&mut response_writer, &have_oids, session)?;

        if !shallow_plan.new_shallows.is_empty() || !shallow_plan.unshallows.is_empty() {
            if section_open {
                response_writer.send_delimiter()?;
            }
            response_writer.send_section("shallow-info")?;
            for oid in &shallow_plan.new_shallows {
                response_writer.send_shallow(oid)?;
            }
            for oid in &shallow_plan.unshallows {
                response_writer.send_unshallow(oid)?;
            }
            section_open = true;
        }

        if !wanted_ref_order.is_empty() {
            if section_open {
                response_writer.send_delimiter()?;
            }
            response_writer.send_section("wanted-refs")?;
            for (name, oid) in &wanted_ref_order {
                response_writer.send_line(&format!("{} {}", oid.to_hex(), name))?;
            }
            section_open = true;
        }

        if section_open {
            response_writer.send_delimiter()?;
        }
        response_writer.send_section("packfile")?;

        let pack_generator = PackGenerator::new(self.repository, self.options);
        match pack_generator.generate_pack(&mut response_writer, session) {
            Ok(stats) => {
                tracing::info!(objects = stats.objects, size = stats.size, "v2 pack sent");
                Ok(())
            }
            Err(err) => {
                response_writer.send_error(&err.wire_message())?;
                Err(err)
            }
        }
    }

    /// `acknowledgments` is omitted entirely when the client sent no `have`
    /// lines (the common first-clone case: only `want`s and `done`).
    /// Protocol v2's ack-line carries no `continue`/`ready` suffix the way
    /// v0's `multi_ack` does; a separate `ready` line follows once a common
    /// base lets pack generation start.
    fn acknowledge_haves<W: Write>(
        &self,
        writer: &mut ResponseWriter<'_, W>,
        have_oids: &[gix_hash::ObjectId],
        session: &mut SessionContext,
    ) -> Result<bool> {
        if have_oids.is_empty() {
            return Ok(false);
        }
        writer.send_section("acknowledgments")?;

        const MAX_CONSECUTIVE_UNKNOWNS: u32 = 256;
        let mut consecutive_unknowns = 0u32;
        let mut ready = false;
        for &oid in have_oids {
            if self.repository.objects.contains(&oid) {
                session.negotiation.common.insert(oid);
                writer.send_ack(&oid, AckStatus::Common)?;
                ready = true;
                break;
            }
            session.negotiation.haves.insert(oid);
            consecutive_unknowns += 1;
            if consecutive_unknowns > MAX_CONSECUTIVE_UNKNOWNS {
                break;
            }
        }

        if ready {
            writer.send_line("ready")?;
        } else {
            writer.send_nak()?;
        }
        Ok(true)
    }

    fn handle_object_info<R: Read, W: Write>(&self, reader: &mut PacketReader<R>, output: &mut W) -> Result<()> {
        let raw_lines = reader.read_until_flush()?;
        let mut want_size = false;
        let mut oids = Vec::new();
        for line in &raw_lines {
            let text = std::str::from_utf8(line)
                .map_err(|_| Error::custom("invalid UTF-8 in object-info argument"))?
                .trim();
            if text == "size" {
                want_size = true;
            } else if let Some(rest) = text.strip_prefix("oid ") {
                oids.push(parse_oid(rest)?);
            }
        }

        let mut writer = ResponseWriter::new(output, SideBandMode::None);
        if want_size {
            writer.send_line("size")?;
            for oid in &oids {
                let size = self.repository.find_object(*oid).map(|obj| obj.data.len() as u64).unwrap_or(0);
                writer.send_line(&format!("{} {size}", oid.to_hex()))?;
            }
        }
        writer.send_flush()
    }
}

fn parse_oid(text: &str) -> Result<gix_hash::ObjectId> {
    let text = text.trim();
    gix_hash::ObjectId::from_hex(text.as_bytes()).map_err(|_| Error::InvalidObjectId { oid: text.to_string() })
}

impl<'a> ProtocolHandler for Handler<'a> {
    fn handle_session<R: Read, W: Write>(&mut self, input: R, mut output: W, session: &mut SessionContext) -> Result<()> {
        let cap_manager = CapabilityManager::new(self.repository, self.options);
        let ref_manager = ReferenceManager::new(self.repository, self.options);
        let negotiation_engine = NegotiationEngine::new(self.repository, self.options);

        let server_caps = cap_manager.default_server_capabilities();
        session.server_capabilities = Some(server_caps.clone());

        // A stateless-RPC continuation call already received the
        // capability advertisement on a prior request; only the initial
        // connection gets one.
        if !session.stateless_rpc {
            self.advertise_capabilities(&mut output, &cap_manager, &server_caps)?;
        }

        let mut reader = PacketReader::with_delimiters(input, &[PacketLineRef::Delimiter]);
        let mut command = None;
        loop {
            match reader.read_packet()? {
                None | Some(PacketLineRef::Flush) | Some(PacketLineRef::Delimiter) => break,
                Some(PacketLineRef::Data(data)) => {
                    let text = std::str::from_utf8(data.trim_ascii())
                        .map_err(|_| Error::custom("invalid UTF-8 in v2 request preamble"))?;
                    if let Some(cmd) = text.strip_prefix("command=") {
                        command = Some(cmd.parse::<RequestedCommand>()?);
                    } else {
                        tracing::debug!(capability = text, "ignoring v2 request capability");
                    }
                }
                Some(_) => {}
            }
        }
        // The capability-list ended at the delim-pkt; command arguments now
        // run up to the closing flush-pkt.
        reader.reset_with_delimiters(&[PacketLineRef::Flush]);

        let command = match command {
            Some(command) => command,
            // A bare capability probe with no command is a legitimate no-op.
            None => return Ok(()),
        };
        tracing::info!(?command, "v2 command dispatched");

        match command {
            RequestedCommand::LsRefs => self.handle_ls_refs(&mut reader, &mut output, &ref_manager),
            RequestedCommand::Fetch => self.handle_fetch(
                &mut reader,
                &mut output,
                session,
                &ref_manager,
                &cap_manager,
                &server_caps,
                &negotiation_engine,
            ),
            RequestedCommand::ObjectInfo => self.handle_object_info(&mut reader, &mut output),
            RequestedCommand::ServerInfo => Err(Error::UnsupportedCommand {
                command: "server-info".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        gix::init(dir.path()).unwrap();
        let repo = gix::open(dir.path()).unwrap();
        (dir, repo)
    }

    /// `done` with no preceding `want` line must be rejected as a protocol
    /// error, the same way V0's `collect_wants` rejects an empty want set
    /// (`protocol::v1`), instead of silently proceeding into negotiation with
    /// nothing requested.
    #[test]
    fn fetch_done_without_want_is_rejected() {
        let (_dir, repo) = repo();
        let options = ServerOptions::default();
        let handler = Handler::new(&repo, &options);
        let ref_manager = ReferenceManager::new(&repo, &options);
        let cap_manager = CapabilityManager::new(&repo, &options);
        let negotiation_engine = NegotiationEngine::new(&repo, &options);
        let server_caps = cap_manager.default_server_capabilities();
        let mut session = SessionContext::new(repo.path().to_path_buf());

        let mut reader = PacketReader::new(Cursor::new(b"0009done\n0000".to_vec()));
        let mut output = Vec::new();

        let result = handler.handle_fetch(
            &mut reader,
            &mut output,
            &mut session,
            &ref_manager,
            &cap_manager,
            &server_caps,
            &negotiation_engine,
        );

        assert!(matches!(result, Err(Error::ProtocolParsing(_))));
    }
}
