//! Packet-line I/O: a streaming reader and a buffered, side-band-aware
//! response writer shared by both protocol dialects and by `pack.rs` for
//! streaming pack bytes without fragmenting them into undersized packets.

use crate::{
    error::{Error, Result},
    types::{protocol, AckStatus, ProtocolRefExt, Reference, SideBandChannel, SideBandMode},
};
use bstr::BStr;
use gix_packetline::{PacketLineRef, StreamingPeekableIter};
use std::io::{Read, Write};

/// Streaming packet-line reader. Every dialect reads want/have/command-argument
/// lines through one of these, stopping at a flush (or, in V2, a delimiter or
/// response-end).
pub struct PacketReader<R: Read> {
    inner: StreamingPeekableIter<R>,
}

impl<R: Read> PacketReader<R> {
    /// A reader that stops only at `flush-pkt`, the V1/V0 default.
    pub fn new(reader: R) -> Self {
        Self::with_delimiters(reader, &[PacketLineRef::Flush])
    }

    /// A reader that also stops at the given extra delimiters, e.g. V2's
    /// `delim-pkt`/`response-end-pkt`.
    pub fn with_delimiters(reader: R, delimiters: &'static [PacketLineRef<'static>]) -> Self {
        Self {
            inner: StreamingPeekableIter::new(reader, delimiters, false),
        }
    }

    /// Treat an `ERR` line from the client as a hard error instead of
    /// ordinary data.
    pub fn enable_error_detection(&mut self) {
        self.inner.fail_on_err_lines(true);
    }

    /// Read the next packet line.
    pub fn read_packet(&mut self) -> Result<Option<PacketLineRef<'_>>> {
        match self.inner.read_line() {
            Some(Ok(Ok(packet))) => Ok(Some(packet)),
            Some(Ok(Err(decode_error))) => Err(Error::PacketlineDecode(decode_error)),
            Some(Err(io_error)) => Err(Error::Io(io_error)),
            None => Ok(None),
        }
    }

    /// Read a data packet's payload as text. Returns `Ok(None)` on
    /// flush/delimiter/response-end or end of stream.
    pub fn read_data_line(&mut self) -> Result<Option<String>> {
        match self.read_packet()? {
            Some(PacketLineRef::Data(data)) => Ok(Some(
                std::str::from_utf8(data)
                    .map_err(|e| Error::custom(format!("invalid UTF-8 in packet: {e}")))?
                    .to_string(),
            )),
            _ => Ok(None),
        }
    }

    /// Peek at the next packet line without consuming it.
    pub fn peek_packet(&mut self) -> Result<Option<PacketLineRef<'_>>> {
        match self.inner.peek_line() {
            Some(Ok(Ok(packet))) => Ok(Some(packet)),
            Some(Ok(Err(decode_error))) => Err(Error::PacketlineDecode(decode_error)),
            Some(Err(io_error)) => Err(Error::Io(io_error)),
            None => Ok(None),
        }
    }

    /// Which delimiter the reader last stopped at, if any.
    pub fn stopped_at(&self) -> Option<PacketLineRef<'static>> {
        self.inner.stopped_at()
    }

    /// Swap in new stop delimiters for the next read (V2 moves between
    /// sections with different terminators).
    pub fn reset_with_delimiters(&mut self, delimiters: &'static [PacketLineRef<'static>]) {
        self.inner.reset_with(delimiters);
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }

    /// Buffer every data line up to the next flush and return their raw
    /// payloads. Used where a whole block of lines must be inspected before
    /// any of it can be classified (command arguments vs. fetch parameters),
    /// since a packet-line reader cannot push a line back once read.
    pub fn read_until_flush(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut lines = Vec::new();
        while let Some(line_result) = self.inner.read_line() {
            let line = line_result.map_err(Error::Io)?.map_err(Error::PacketlineDecode)?;
            if matches!(line, PacketLineRef::Flush) {
                break;
            }
            if let Some(data) = line.as_slice() {
                lines.push(data.to_vec());
            }
        }
        Ok(lines)
    }
}

/// Object metadata reported by `object-info` (protocol v2).
#[derive(Debug, Default, Clone)]
pub struct ObjectInfo {
    /// Size in bytes.
    pub size: Option<u64>,
    /// Object kind, e.g. `"blob"`.
    pub object_type: Option<String>,
}

/// Buffered, side-band-aware response writer. Wraps the session's output
/// stream and multiplexes ACKs, refs, progress, errors, and pack bytes onto
/// the negotiated side-band channel, buffering small writes into
/// near-maximum-size packets rather than emitting one tiny packet per call.
pub struct ResponseWriter<'a, W: Write> {
    writer: &'a mut W,
    side_band_mode: SideBandMode,
    no_progress: bool,
    buffer: Vec<u8>,
    optimal_chunk_size: usize,
}

impl<'a, W: Write> ResponseWriter<'a, W> {
    /// Create a writer for a session that has not disabled progress.
    pub fn new(writer: &'a mut W, side_band_mode: SideBandMode) -> Self {
        Self::with_progress_control(writer, side_band_mode, false)
    }

    /// Create a writer honoring the client's `no-progress` capability.
    pub fn with_progress_control(writer: &'a mut W, side_band_mode: SideBandMode, no_progress: bool) -> Self {
        Self {
            writer,
            side_band_mode,
            no_progress,
            buffer: Vec::new(),
            optimal_chunk_size: 8191,
        }
    }

    /// Send a data packet (or packets, if it exceeds one packet's capacity),
    /// routed through side-band channel 1 when negotiated.
    pub fn send_data(&mut self, data: &[u8]) -> Result<()> {
        match self.side_band_mode {
            SideBandMode::None => {
                for chunk in data.chunks(self.optimal_chunk_size) {
                    gix_packetline::encode::data_to_write(chunk, &mut *self.writer)?;
                }
                Ok(())
            }
            SideBandMode::Basic | SideBandMode::SideBand64k => self.send_side_band(SideBandChannel::Data, data),
        }
    }

    /// Send a progress line. A no-op when progress is suppressed or
    /// side-band was never negotiated, since there is no out-of-band channel
    /// to carry it without corrupting the pack stream.
    pub fn send_progress(&mut self, message: &str) -> Result<()> {
        if !self.supports_progress() {
            return Ok(());
        }
        // Native git terminates an in-progress line with `\r` so the client
        // overwrites it in place, and a final "done." message with `\n`.
        let line = if message.ends_with(", done.") {
            format!("{message}\n")
        } else {
            format!("{message}\r")
        };
        self.send_side_band(SideBandChannel::Progress, line.as_bytes())
    }

    /// Send an error message: a framed `ERR` line when side-band is off
    /// (what aborts the client's packet-line parser cleanly), or a message
    /// on the error channel otherwise.
    pub fn send_error(&mut self, error: &str) -> Result<()> {
        match self.side_band_mode {
            SideBandMode::None => {
                gix_packetline::encode::error_to_write(error.as_bytes(), &mut *self.writer)?;
                Ok(())
            }
            SideBandMode::Basic | SideBandMode::SideBand64k => {
                let line = format!("error: {error}\n");
                self.send_side_band(SideBandChannel::Error, line.as_bytes())
            }
        }
    }

    fn send_side_band(&mut self, channel: SideBandChannel, data: &[u8]) -> Result<()> {
        let max = self
            .side_band_mode
            .max_data_size()
            .expect("send_side_band called without side-band negotiated");
        for chunk in data.chunks(max.min(self.optimal_chunk_size)) {
            gix_packetline::encode::band_to_write(channel, chunk, &mut *self.writer)?;
        }
        Ok(())
    }

    pub fn send_flush(&mut self) -> Result<()> {
        self.flush_buffer()?;
        PacketLineRef::Flush.write_to(&mut *self.writer)?;
        Ok(())
    }

    /// V2's `delim-pkt`, separating sections within one response.
    pub fn send_delimiter(&mut self) -> Result<()> {
        self.flush_buffer()?;
        PacketLineRef::Delimiter.write_to(&mut *self.writer)?;
        Ok(())
    }

    pub fn send_response_end(&mut self) -> Result<()> {
        self.flush_buffer()?;
        PacketLineRef::ResponseEnd.write_to(&mut *self.writer)?;
        Ok(())
    }

    pub fn send_ack(&mut self, oid: &gix_hash::ObjectId, status: AckStatus) -> Result<()> {
        let suffix = match status {
            AckStatus::Common => "",
            AckStatus::DetailedCommon => protocol::ACK_COMMON_SUFFIX,
            AckStatus::Continue => protocol::ACK_CONTINUE_SUFFIX,
            AckStatus::Ready => protocol::ACK_READY_SUFFIX,
        };
        self.send_data(format!("{}{}{}\n", protocol::ACK_PREFIX, oid.to_hex(), suffix).as_bytes())
    }

    pub fn send_nak(&mut self) -> Result<()> {
        self.send_data(protocol::NAK)
    }

    pub fn send_shallow(&mut self, oid: &gix_hash::ObjectId) -> Result<()> {
        self.send_data(format!("shallow {}\n", oid.to_hex()).as_bytes())
    }

    pub fn send_unshallow(&mut self, oid: &gix_hash::ObjectId) -> Result<()> {
        self.send_data(format!("unshallow {}\n", oid.to_hex()).as_bytes())
    }

    /// Send a reference line for `ls-refs`/V1 advertisement, including its
    /// peeled target if one was recorded.
    pub fn send_ref(&mut self, reference: &Reference) -> Result<()> {
        let target = reference.target_oid();
        let mut line = format!("{} {}", target.to_hex(), reference.ref_name());
        if let Some(peeled) = reference.peeled_oid() {
            line.push_str(&format!(" peeled:{}", peeled.to_hex()));
        }
        line.push('\n');
        self.send_data(line.as_bytes())
    }

    pub fn send_symref(&mut self, name: &BStr, target: &BStr) -> Result<()> {
        self.send_data(format!("symref-target:{name} {target}\n").as_bytes())
    }

    pub fn send_unborn(&mut self, ref_name: &BStr) -> Result<()> {
        self.send_data(format!("unborn {ref_name}\n").as_bytes())
    }

    pub fn send_object_info(&mut self, oid: &gix_hash::ObjectId, info: &ObjectInfo) -> Result<()> {
        let mut line = oid.to_hex().to_string();
        if let Some(size) = info.size {
            line.push_str(&format!(" size {size}"));
        }
        if let Some(kind) = &info.object_type {
            line.push_str(&format!(" type {kind}"));
        }
        line.push('\n');
        self.send_data(line.as_bytes())
    }

    /// Send a V2 section header line (`acknowledgments`, `shallow-info`,
    /// `wanted-refs`, `packfile`).
    pub fn send_section(&mut self, name: &str) -> Result<()> {
        self.send_data(format!("{name}\n").as_bytes())
    }

    pub fn send_line(&mut self, line: &str) -> Result<()> {
        if line.ends_with('\n') {
            self.send_data(line.as_bytes())
        } else {
            self.send_data(format!("{line}\n").as_bytes())
        }
    }

    /// Largest payload a single packet line can carry in this mode.
    pub fn max_packet_size(&self) -> usize {
        match self.side_band_mode {
            SideBandMode::None => 65520,
            SideBandMode::Basic => 999,
            SideBandMode::SideBand64k => 65519,
        }
    }

    /// Whether a `send_progress` call actually reaches the client: side-band
    /// must be negotiated and the client must not have asked for
    /// `no-progress`.
    pub fn supports_progress(&self) -> bool {
        !self.no_progress && self.side_band_mode != SideBandMode::None
    }

    /// Whether the error side-band channel is available. Unlike progress,
    /// this does not depend on `no-progress`.
    pub fn supports_errors(&self) -> bool {
        self.side_band_mode != SideBandMode::None
    }

    /// Flush any buffered bytes now, e.g. once pack streaming is done.
    pub fn flush_buffer_if_needed(&mut self) -> Result<()> {
        self.flush_buffer()
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let data = std::mem::take(&mut self.buffer);
            self.write_through(&data)?;
        }
        Ok(())
    }

    fn write_through(&mut self, data: &[u8]) -> Result<()> {
        match self.side_band_mode {
            SideBandMode::None => self.writer.write_all(data).map_err(Error::Io),
            SideBandMode::Basic | SideBandMode::SideBand64k => self.send_side_band(SideBandChannel::Data, data),
        }
    }
}

/// Buffers writes so pack-byte streaming (one `write_all` call per pack
/// entry) coalesces into near-`optimal_chunk_size` side-band packets instead
/// of one tiny packet per entry.
impl<'a, W: Write> Write for ResponseWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= self.optimal_chunk_size {
            self.flush_buffer()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_buffer()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.writer.flush()
    }
}

/// Reports progress for a long-running operation (counting objects,
/// compressing, writing) at Git's own cadence: only on a percentage change
/// for known totals, or at most once a second for unknown ones.
pub struct ProgressReporter<'f, 'a, W: Write> {
    writer: &'f mut ResponseWriter<'a, W>,
    operation: String,
    total: Option<usize>,
    current: usize,
    last_report_time: std::time::Instant,
    report_interval: std::time::Duration,
    last_percent: Option<u32>,
}

impl<'f, 'a, W: Write> ProgressReporter<'f, 'a, W> {
    pub fn new(writer: &'f mut ResponseWriter<'a, W>, operation: impl Into<String>, total: Option<usize>) -> Self {
        Self {
            writer,
            operation: operation.into(),
            total,
            current: 0,
            last_report_time: std::time::Instant::now(),
            report_interval: std::time::Duration::from_millis(1000),
            last_percent: None,
        }
    }

    pub fn update(&mut self, current: usize) -> Result<()> {
        self.current = current;
        match self.total {
            Some(total) if total > 0 => {
                let percent = ((current * 100) / total) as u32;
                if self.last_percent != Some(percent) {
                    self.last_percent = Some(percent);
                    self.report()?;
                }
            }
            Some(_) => {}
            None => {
                let now = std::time::Instant::now();
                if now.duration_since(self.last_report_time) >= self.report_interval {
                    self.last_report_time = now;
                    self.report()?;
                }
            }
        }
        Ok(())
    }

    pub fn report(&mut self) -> Result<()> {
        if !self.writer.supports_progress() {
            return Ok(());
        }
        let message = match self.total {
            Some(total) => {
                let percent = if total > 0 { (self.current * 100) / total } else { 0 };
                format!("{}: {}% ({}/{})", self.operation, percent, self.current, total)
            }
            None => format!("{}: {}", self.operation, self.current),
        };
        self.writer.send_progress(&message)
    }

    /// Git-style completion line: `"Counting objects: 100% (45212/45212), done."`.
    pub fn finish(&mut self) -> Result<()> {
        if !self.writer.supports_progress() {
            return Ok(());
        }
        let message = match self.total {
            Some(total) => format!("{}: 100% ({total}/{total}), done.", self.operation),
            None => format!("{}: {}, done.", self.operation, self.current),
        };
        self.writer.send_progress(&message)
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reader_stops_at_flush() {
        let mut input = Vec::new();
        gix_packetline::encode::data_to_write(b"want deadbeef\n", &mut input).unwrap();
        gix_packetline::PacketLineRef::Flush.write_to(&mut input).unwrap();
        let mut reader = PacketReader::new(Cursor::new(input));
        let line = reader.read_data_line().unwrap();
        assert_eq!(line.as_deref(), Some("want deadbeef\n"));
        let next = reader.read_packet().unwrap();
        assert!(matches!(next, Some(PacketLineRef::Flush)));
    }

    #[test]
    fn writer_emits_plain_packets_without_sideband() {
        let mut output = Vec::new();
        {
            let mut writer = ResponseWriter::new(&mut output, SideBandMode::None);
            writer.send_ack(&gix_hash::ObjectId::null(gix_hash::Kind::Sha1), AckStatus::Common).unwrap();
            writer.send_flush().unwrap();
        }
        assert!(output.windows(3).any(|w| w == b"ACK"));
    }

    #[test]
    fn progress_is_suppressed_without_sideband() {
        let mut output = Vec::new();
        let mut writer = ResponseWriter::new(&mut output, SideBandMode::None);
        assert!(!writer.supports_progress());
        writer.send_progress("Counting objects: 50% (1/2)").unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn no_progress_capability_suppresses_progress_but_not_errors() {
        let mut output = Vec::new();
        let writer = ResponseWriter::with_progress_control(&mut output, SideBandMode::SideBand64k, true);
        assert!(!writer.supports_progress());
        assert!(writer.supports_errors());
    }
}
