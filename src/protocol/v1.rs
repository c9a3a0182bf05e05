//! Protocol V0/V1: ref advertisement with inline capability suffixes,
//! `have`-line negotiation, then a single packfile.
//!
//! Grounded on this file's own prior shape (`ProtocolHandler::handle_session`'s
//! advertise/negotiate/send-pack dispatch and the `advertise_refs`-only
//! early exit used by `git ls-remote`/smart-HTTP `info/refs`), with the
//! hand-rolled ref formatting, capability strings, want/have parsing, and
//! ACK/NAK loop all replaced by calls into `references`, `capabilities`,
//! `command`, and `negotiation` — this file previously duplicated all four.

use crate::{
    capabilities::CapabilityManager,
    command::CommandParser,
    config::ServerOptions,
    error::{Error, Result},
    negotiation::NegotiationEngine,
    packet_io::{PacketReader, ResponseWriter},
    pack::PackGenerator,
    protocol::ProtocolHandler,
    references::ReferenceManager,
    shallow,
    types::*,
};
use gix::Repository;
use gix_packetline::PacketLineRef;
use std::{
    collections::HashSet,
    io::{Read, Write},
};

/// Drives one V0 upload-pack session.
pub struct Handler<'a> {
    repository: &'a Repository,
    options: &'a ServerOptions,
}

impl<'a> Handler<'a> {
    pub fn new(repository: &'a Repository, options: &'a ServerOptions) -> Self {
        Self { repository, options }
    }

    /// Read `want`/`shallow`/`deepen*` lines up to the terminating flush,
    /// parsing the first want's capability suffix into `session.capabilities`.
    fn collect_wants<R: Read>(
        &self,
        reader: &mut PacketReader<R>,
        command_parser: &CommandParser<'_>,
        cap_manager: &CapabilityManager<'_>,
        session: &mut SessionContext,
    ) -> Result<()> {
        let mut first_want = true;
        loop {
            match reader.read_packet()? {
                None | Some(PacketLineRef::Flush) => break,
                Some(PacketLineRef::Data(data)) => {
                    if let Some(rest) = data.strip_prefix(b"want ") {
                        let capability_str = command_parser.parse_want_line(rest, session)?;
                        if first_want {
                            if let Some(caps_str) = capability_str {
                                session.capabilities = cap_manager.parse_client_capabilities(caps_str)?;
                            }
                            first_want = false;
                        }
                    } else if let Some(rest) = data.strip_prefix(b"shallow ") {
                        command_parser.parse_shallow_line(rest, session)?;
                    } else if let Some(rest) = data.strip_prefix(b"deepen ") {
                        command_parser.parse_deepen_line(rest, session)?;
                    } else if let Some(rest) = data.strip_prefix(b"deepen-since ") {
                        command_parser.parse_deepen_since_line(rest, session)?;
                    } else if let Some(rest) = data.strip_prefix(b"deepen-not ") {
                        command_parser.parse_deepen_not_line(rest, session)?;
                    } else {
                        tracing::debug!(line = %String::from_utf8_lossy(data), "ignoring unrecognized line during want collection");
                    }
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

impl<'a> ProtocolHandler for Handler<'a> {
    fn handle_session<R: Read, W: Write>(&mut self, reader: R, mut writer: W, session: &mut SessionContext) -> Result<()> {
        let cap_manager = CapabilityManager::new(self.repository, self.options);
        let ref_manager = ReferenceManager::new(self.repository, self.options);
        let command_parser = CommandParser::new(self.repository);

        let server_caps = cap_manager.default_server_capabilities();
        let refs = ref_manager.collect_advertised_references()?;
        let advertised: HashSet<gix_hash::ObjectId> = refs.iter().map(ProtocolRefExt::target_oid).collect();

        {
            let mut advertise_writer = ResponseWriter::new(&mut writer, SideBandMode::None);
            let caps_string = cap_manager.server_capabilities_to_v1_string(&server_caps);
            for line in ref_manager.format_v1_advertisement(&refs, &caps_string) {
                advertise_writer.send_line(&line)?;
            }
            advertise_writer.send_flush()?;
        }
        session.server_capabilities = Some(server_caps.clone());
        tracing::info!(ref_count = refs.len(), "advertised references");

        if self.options.advertise_refs {
            return Ok(());
        }

        let mut packet_reader = PacketReader::new(reader);
        self.collect_wants(&mut packet_reader, &command_parser, &cap_manager, session)?;

        if session.negotiation.wants.is_empty() {
            tracing::debug!("session ended with no wants after advertisement");
            return Ok(());
        }

        // Everything from here until the packfile begins is pre-pack: any
        // failure is reported as a framed ERR line, never over side-band.
        let mut control_writer = ResponseWriter::new(&mut writer, SideBandMode::None);

        if let Err(err) = cap_manager.validate_client_capabilities(&session.capabilities, &server_caps) {
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

        let negotiation_engine = NegotiationEngine::new(self.repository, self.options);
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
        for oid in &shallow_plan.new_shallows {
            control_writer.send_shallow(oid)?;
        }
        for oid in &shallow_plan.unshallows {
            control_writer.send_unshallow(oid)?;
        }
        session.negotiation.shallow = shallow_plan.shallow;

        let negotiation_stats = negotiation_engine.negotiate_haves(
            &mut packet_reader,
            &mut control_writer,
            &mut session.negotiation,
            &session.capabilities,
        )?;
        tracing::info!(
            have_count = negotiation_stats.have_count,
            common_count = negotiation_stats.common_count,
            "negotiation complete"
        );
        control_writer.flush_buffer_if_needed()?;
        drop(control_writer);

        let pack_generator = PackGenerator::new(self.repository, self.options);
        let mut pack_writer =
            ResponseWriter::with_progress_control(&mut writer, session.capabilities.side_band, session.capabilities.no_progress);
        match pack_generator.generate_pack(&mut pack_writer, session) {
            Ok(stats) => {
                tracing::info!(objects = stats.objects, size = stats.size, "pack sent");
                Ok(())
            }
            Err(err) => {
                pack_writer.send_error(&err.wire_message())?;
                Err(err)
            }
        }
    }
}
