//! Want/have negotiation: the ACK/NAK/ready dispatch driven by the client's
//! negotiated `multi_ack` mode. Object enumeration for the pack itself is
//! `pack.rs`'s job; this module only tracks which objects are common and
//! tells the caller when enough has been established to start streaming.

use crate::{
    config::ServerOptions,
    error::{Error, Result},
    packet_io::{PacketReader, ResponseWriter},
    policy::RequestPolicy,
    reachability::WalkOracle,
    types::*,
};
use gix::Repository;
use gix_packetline::PacketLineRef;
use std::{
    collections::HashSet,
    io::{Read, Write},
};

/// Statistics about one negotiation exchange, surfaced for logging.
#[derive(Debug, Default)]
pub struct NegotiationStats {
    /// Number of `have` lines processed.
    pub have_count: u32,
    /// Number of objects found to be common with the client.
    pub common_count: u32,
    /// Wall-clock time spent in the have/ACK loop.
    pub negotiation_time: std::time::Duration,
}

/// Drives the have/ACK/NAK exchange and validates `want`/`want-ref` targets
/// against the session's reachability policy.
pub struct NegotiationEngine<'a> {
    repository: &'a Repository,
    options: &'a ServerOptions,
}

impl<'a> NegotiationEngine<'a> {
    pub fn new(repository: &'a Repository, options: &'a ServerOptions) -> Self {
        Self { repository, options }
    }

    /// Validate every `want`/`want-ref` target against the resolved
    /// [`RequestPolicy`]. `advertised` is the set of tip oids the client was
    /// shown during ref advertisement; `all_tips` is every ref tip in the
    /// repository regardless of `transfer.hideRefs`, used by the
    /// `Tip`/`ReachableCommitTip` variants.
    pub fn validate_wants(
        &self,
        state: &NegotiationState,
        advertised: &HashSet<gix_hash::ObjectId>,
        all_tips: &HashSet<gix_hash::ObjectId>,
    ) -> Result<()> {
        let policy = RequestPolicy::from_options(self.options);
        let oracle = WalkOracle::new(self.repository);
        for &want in &state.wants {
            policy.validate(want, advertised, all_tips, &oracle)?;
        }
        for &want in state.wanted_refs.values() {
            policy.validate(want, advertised, all_tips, &oracle)?;
        }
        Ok(())
    }

    /// Process `have`/`done` lines until flush or `done`, sending ACK/NAK
    /// responses per `capabilities.multi_ack`. Mirrors native git's
    /// `multi_ack`/`multi_ack_detailed`/legacy negotiation loop: legacy and
    /// detailed modes stop sending ACKs as soon as a common base lets pack
    /// generation start; basic mode keeps acknowledging every have so the
    /// client can keep narrowing its next batch.
    pub fn negotiate_haves<R: Read, W: Write>(
        &self,
        reader: &mut PacketReader<R>,
        writer: &mut ResponseWriter<'_, W>,
        state: &mut NegotiationState,
        capabilities: &ClientCapabilities,
    ) -> Result<NegotiationStats> {
        let start = std::time::Instant::now();
        let mut stats = NegotiationStats::default();
        // Git's own cutoff for giving up on a client that keeps offering
        // haves we don't recognize.
        const MAX_CONSECUTIVE_UNKNOWNS: u32 = 256;
        let mut consecutive_unknowns = 0u32;

        while let Some(line) = reader.read_packet()? {
            let data = match line {
                PacketLineRef::Flush => break,
                PacketLineRef::Data(data) => data,
                _ => continue,
            };

            if let Some(have_line) = data.strip_prefix(b"have ") {
                let oid = parse_oid(have_line)?;
                stats.have_count += 1;

                if self.repository.objects.contains(&oid) {
                    state.common.insert(oid);
                    stats.common_count += 1;
                    consecutive_unknowns = 0;

                    match capabilities.multi_ack {
                        MultiAckMode::None => {
                            if self.ready_to_send(state) {
                                writer.send_ack(&oid, AckStatus::Common)?;
                                break;
                            }
                        }
                        MultiAckMode::Basic => {
                            writer.send_ack(&oid, AckStatus::Continue)?;
                        }
                        MultiAckMode::Detailed => {
                            if self.ready_to_send(state) {
                                writer.send_ack(&oid, AckStatus::Ready)?;
                                break;
                            }
                            writer.send_ack(&oid, AckStatus::DetailedCommon)?;
                        }
                    }
                } else {
                    state.haves.insert(oid);
                    consecutive_unknowns += 1;
                    if consecutive_unknowns > MAX_CONSECUTIVE_UNKNOWNS {
                        break;
                    }
                }
            } else if data.trim_ascii() == b"done" {
                state.done = true;
                break;
            }
        }

        if state.done {
            if !state.common.is_empty() && self.ready_to_send(state) {
                if let Some(common_oid) = state.common.iter().next() {
                    writer.send_ack(common_oid, AckStatus::Common)?;
                }
            } else {
                writer.send_nak()?;
            }
        }

        stats.negotiation_time = start.elapsed();
        Ok(stats)
    }

    fn ready_to_send(&self, state: &NegotiationState) -> bool {
        !state.common.is_empty() || state.done
    }
}

fn parse_oid(line: &[u8]) -> Result<gix_hash::ObjectId> {
    let text = std::str::from_utf8(line.trim_ascii()).map_err(|_| Error::custom("invalid UTF-8 in have line"))?;
    gix_hash::ObjectId::from_hex(text.as_bytes()).map_err(|_| Error::InvalidObjectId { oid: text.to_string() })
}
