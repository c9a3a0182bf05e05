//! Shared `want`/`have`/`shallow`/`deepen` line parsing used by both protocol
//! dialects (`protocol::v1` handles the V0 wire, `protocol::v2` the V2 one).
//!
//! Grounded on `services/command_parser.rs`'s `CommandParser`, promoted to a
//! flat top-level module since both dialect drivers depend on it equally and
//! it was never actually a "service" distinct from the rest of the engine.
//! `want-ref` is handled separately by each dialect driver through
//! `ReferenceManager::resolve`, since it needs hidden-ref and ref-store
//! access this module has no reason to carry.

use crate::{
    error::{Error, Result},
    types::*,
};
use gix::Repository;

/// Parses the fetch-command argument lines common to V0 and V2.
pub struct CommandParser<'a> {
    repository: &'a Repository,
}

impl<'a> CommandParser<'a> {
    pub fn new(repository: &'a Repository) -> Self {
        Self { repository }
    }

    /// Parse a `want` line's payload (the `want ` prefix already stripped).
    /// The first `want` of a V0 session carries a NUL-separated capability
    /// string after the oid; when present, it is returned so the caller can
    /// hand it to [`crate::capabilities::CapabilityManager::parse_client_capabilities`].
    pub fn parse_want_line<'s>(&self, line: &'s [u8], session: &mut SessionContext) -> Result<Option<&'s str>> {
        let line_str = ascii_str(line)?;
        let (oid_str, capabilities) = match line_str.split_once('\0') {
            Some((oid, caps)) => (oid, Some(caps)),
            None => (line_str, None),
        };
        let oid = gix_hash::ObjectId::from_hex(oid_str.trim().as_bytes()).map_err(|_| Error::InvalidObjectId {
            oid: oid_str.to_string(),
        })?;
        if !self.repository.objects.contains(&oid) {
            return Err(Error::ObjectNotFound { oid });
        }
        session.negotiation.wants.insert(oid);
        Ok(capabilities)
    }

    /// Parse a `have` line, returning whether the object is one the server
    /// already has (a common base) or not.
    pub fn parse_have_line(&self, line: &[u8], session: &mut SessionContext) -> Result<bool> {
        let oid = parse_oid(line)?;
        if self.repository.objects.contains(&oid) {
            session.negotiation.common.insert(oid);
            Ok(true)
        } else {
            session.negotiation.haves.insert(oid);
            Ok(false)
        }
    }

    pub fn parse_shallow_line(&self, line: &[u8], session: &mut SessionContext) -> Result<()> {
        session.negotiation.shallow.insert(parse_oid(line)?);
        Ok(())
    }

    pub fn parse_deepen_line(&self, line: &[u8], session: &mut SessionContext) -> Result<()> {
        let text = ascii_str(line)?;
        let depth: u32 = text
            .parse()
            .map_err(|_| Error::custom(format!("invalid deepen depth: {text}")))?;
        if depth < 1 {
            return Err(Error::Shallow {
                message: format!("deepen depth must be >= 1, got {depth}"),
            });
        }
        session.negotiation.deepen = Some(DeepenSpec::Depth(depth));
        Ok(())
    }

    pub fn parse_deepen_since_line(&self, line: &[u8], session: &mut SessionContext) -> Result<()> {
        let text = ascii_str(line)?;
        let timestamp: i64 = text
            .parse()
            .map_err(|_| Error::custom(format!("invalid deepen-since timestamp: {text}")))?;
        session.negotiation.deepen = Some(DeepenSpec::Since(gix_date::Time::new(timestamp, 0)));
        Ok(())
    }

    pub fn parse_deepen_not_line(&self, line: &[u8], session: &mut SessionContext) -> Result<()> {
        let text = ascii_str(line)?;
        match &mut session.negotiation.deepen {
            Some(DeepenSpec::Not(refs)) => refs.push(text.into()),
            _ => session.negotiation.deepen = Some(DeepenSpec::Not(vec![text.into()])),
        }
        Ok(())
    }
}

fn ascii_str(line: &[u8]) -> Result<&str> {
    std::str::from_utf8(line.trim_ascii()).map_err(|_| Error::custom("invalid UTF-8 in packet line"))
}

fn parse_oid(line: &[u8]) -> Result<gix_hash::ObjectId> {
    let text = ascii_str(line)?;
    gix_hash::ObjectId::from_hex(text.as_bytes()).map_err(|_| Error::InvalidObjectId { oid: text.to_string() })
}
