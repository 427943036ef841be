//! File transfer over the bus: block streaming on the holder side,
//! verification and reassembly on the fetcher side.
//!
//! The fetcher opens a [`FileRx`] and asks for a file id with `GET_FILE`.
//! The holder opens a [`FileTx`] and streams one block: a `CHECKSUM` frame
//! carrying a [`BlockHeader`], then the numbered chunks. The fetcher answers
//! every block with `NEXT`, `RESEND` or `ERROR`. When the source is
//! exhausted the holder sends `STOP`.
//!
//! Each node has at most one transfer in each direction. Starting a new one
//! replaces the old.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use canlink_core::block::{self, BlockHeader, BLOCK_SIZE, CHUNK_SIZE};
use canlink_core::opcode::{ChunkArg, CHECKSUM, NOT_FOUND, STOP};
use canlink_core::wire::Message;
use canlink_core::{Opcode, TransferCode};

use crate::error::ProtocolError;
use crate::outbox::{NodeEvent, Outbox, Outgoing};

/// Block writes between two progress reports.
pub const WRITES_TO_UPDATE: u32 = 100;

/// Resends granted per block before a receive is abandoned.
pub const MAX_RESENDS: u32 = 5;

// ── Sending ───────────────────────────────────────────────────────────────────

pub enum ReadResult {
    Block(Bytes),
    EndOfSource,
}

/// Holder side of a transfer: an open source file and the block last read
/// from it.
pub struct FileTx {
    file_id: u8,
    path: PathBuf,
    file: File,
    block: Option<Bytes>,
    bytes_read: u64,
}

impl FileTx {
    pub fn open(file_id: u8, path: &Path) -> Result<Self, ProtocolError> {
        let file = match File::open(path) {
            Ok(f) if path.is_file() => f,
            _ => return Err(ProtocolError::SourceNotFound(path.to_path_buf())),
        };
        Ok(Self {
            file_id,
            path: path.to_path_buf(),
            file,
            block: None,
            bytes_read: 0,
        })
    }

    /// Read the next block. The block stays buffered for
    /// [`FileTx::current_block`] until the next call.
    pub fn advance(&mut self) -> Result<ReadResult, ProtocolError> {
        let mut buf = Vec::with_capacity(BLOCK_SIZE);
        (&mut self.file)
            .take(BLOCK_SIZE as u64)
            .read_to_end(&mut buf)?;
        if buf.is_empty() {
            self.block = None;
            return Ok(ReadResult::EndOfSource);
        }
        self.bytes_read += buf.len() as u64;
        let block = Bytes::from(buf);
        self.block = Some(block.clone());
        Ok(ReadResult::Block(block))
    }

    pub fn current_block(&self) -> Option<&Bytes> {
        self.block.as_ref()
    }

    pub fn file_id(&self) -> u8 {
        self.file_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

// ── Receiving ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// More chunks expected for this block.
    Pending,
    /// Block verified and written. `progress` is set every
    /// `writes_per_progress` writes.
    Written { progress: bool },
    /// Block failed verification; ask for it again.
    Rejected,
    /// Block failed verification too many times; give up.
    Exhausted,
}

/// Fetcher side of a transfer: the destination file and the block being
/// accumulated.
pub struct FileRx {
    file_id: u8,
    path: PathBuf,
    file: File,
    header: Option<BlockHeader>,
    chunks: Vec<Bytes>,
    writes: u32,
    failures: u32,
    bytes_written: u64,
    max_resends: u32,
    writes_per_progress: u32,
}

impl FileRx {
    /// Create (or truncate) the destination, making parent directories.
    pub fn create(
        file_id: u8,
        path: &Path,
        max_resends: u32,
        writes_per_progress: u32,
    ) -> Result<Self, ProtocolError> {
        let unwritable = |e| ProtocolError::DestinationUnwritable(path.to_path_buf(), e);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(unwritable)?;
        }
        let file = File::create(path).map_err(unwritable)?;
        Ok(Self {
            file_id,
            path: path.to_path_buf(),
            file,
            header: None,
            chunks: Vec::new(),
            writes: 0,
            failures: 0,
            bytes_written: 0,
            max_resends,
            writes_per_progress: writes_per_progress.max(1),
        })
    }

    /// Start a block: remember what it should hash to and drop anything
    /// accumulated so far.
    pub fn on_checksum(&mut self, header: BlockHeader) {
        self.header = Some(header);
        self.chunks.clear();
    }

    /// Accumulate chunk `seq`. Once the announced last chunk arrives the
    /// block is verified and either written or rejected.
    pub fn on_chunk(&mut self, seq: u8, data: &[u8]) -> Result<RxOutcome, ProtocolError> {
        let Some(header) = self.header else {
            tracing::debug!(seq, "chunk before checksum, ignored");
            return Ok(RxOutcome::Pending);
        };
        if data.len() > CHUNK_SIZE {
            return Ok(self.reject());
        }
        self.chunks.push(Bytes::copy_from_slice(data));
        if seq < header.chunk_count {
            return Ok(RxOutcome::Pending);
        }

        let block = block::reassemble(self.chunks.drain(..));
        self.header = None;
        let actual = block::checksum(&block);
        if actual != header.crc || seq != header.chunk_count {
            tracing::debug!(
                error = %ProtocolError::ChecksumMismatch { expected: header.crc, actual },
                "block rejected"
            );
            return Ok(self.reject());
        }

        self.file
            .write_all(&block)
            .map_err(|e| ProtocolError::DestinationUnwritable(self.path.clone(), e))?;
        self.writes += 1;
        self.failures = 0;
        self.bytes_written += block.len() as u64;
        Ok(RxOutcome::Written {
            progress: self.writes % self.writes_per_progress == 0,
        })
    }

    /// Count a failed block. Also used when the checksum frame itself is
    /// unreadable.
    pub fn reject(&mut self) -> RxOutcome {
        self.chunks.clear();
        self.header = None;
        self.failures += 1;
        if self.failures > self.max_resends {
            RxOutcome::Exhausted
        } else {
            RxOutcome::Rejected
        }
    }

    pub fn finish(mut self) -> Result<(PathBuf, u64), ProtocolError> {
        self.file
            .flush()
            .and_then(|_| self.file.sync_all())
            .map_err(|e| ProtocolError::DestinationUnwritable(self.path.clone(), e))?;
        Ok((self.path, self.bytes_written))
    }

    /// Close and delete the partial destination.
    pub fn discard(self) {
        let path = self.path;
        drop(self.file);
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::debug!(path = %path.display(), error = %e, "could not remove partial file");
        }
    }

    pub fn file_id(&self) -> u8 {
        self.file_id
    }

    pub fn writes(&self) -> u32 {
        self.writes
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

// ── Slots ─────────────────────────────────────────────────────────────────────

/// Owns at most one transfer.
pub struct TransferSlot<T> {
    inner: Option<T>,
}

impl<T> TransferSlot<T> {
    pub fn empty() -> Self {
        Self { inner: None }
    }

    /// Install `t`, returning whatever it replaced.
    pub fn begin(&mut self, t: T) -> Option<T> {
        self.inner.replace(t)
    }

    pub fn take(&mut self) -> Option<T> {
        self.inner.take()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.inner.as_mut()
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }
}

impl<T> Default for TransferSlot<T> {
    fn default() -> Self {
        Self::empty()
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Both transfer directions of one node, speaking the `GET_FILE`/`GET_BYTES`
/// sub-protocol. Independent of the node's role.
pub struct TransferEngine {
    tx: TransferSlot<FileTx>,
    rx: TransferSlot<FileRx>,
    max_resends: u32,
    writes_per_progress: u32,
}

impl TransferEngine {
    pub fn new(max_resends: u32, writes_per_progress: u32) -> Self {
        Self {
            tx: TransferSlot::empty(),
            rx: TransferSlot::empty(),
            max_resends,
            writes_per_progress,
        }
    }

    pub fn is_sending(&self) -> bool {
        self.tx.is_active()
    }

    pub fn is_receiving(&self) -> bool {
        self.rx.is_active()
    }

    /// Fetcher: open `dest` and ask the peer for `file_id`.
    pub fn fetch(&mut self, file_id: u8, dest: &Path, out: &mut Outbox) -> Result<(), ProtocolError> {
        let rx = FileRx::create(file_id, dest, self.max_resends, self.writes_per_progress)?;
        if let Some(old) = self.rx.begin(rx) {
            tracing::warn!(old = old.file_id(), new = file_id, "replacing active receive");
            old.discard();
        }
        tracing::info!(file_id, dest = %dest.display(), "fetch started");
        out.request(Message::new(Opcode::GetFile, file_id));
        Ok(())
    }

    /// Holder: a peer asked for `file_id`, stored at `source`.
    pub fn serve(&mut self, file_id: u8, source: &Path, out: &mut Outbox) {
        let tx = match FileTx::open(file_id, source) {
            Ok(tx) => tx,
            Err(e) => {
                tracing::warn!(file_id, error = %e, "cannot serve file");
                out.respond(Message::new(Opcode::GetFile, NOT_FOUND));
                return;
            }
        };
        if let Some(old) = self.tx.begin(tx) {
            tracing::warn!(old = old.file_id(), new = file_id, "replacing active send");
        }
        tracing::info!(file_id, source = %source.display(), "serving file");
        self.send_next(out);
    }

    /// Holder: the fetcher's verdict on the last block.
    pub fn on_bytes_request(&mut self, arg: u8, out: &mut Outbox) {
        match TransferCode::from_u8(arg) {
            Some(TransferCode::Next) => {
                if self.tx.is_active() {
                    self.send_next(out);
                } else {
                    tracing::warn!("NEXT with no active send");
                    out.respond(Message::new(Opcode::GetBytes, NOT_FOUND));
                }
            }
            Some(TransferCode::Resend) => self.resend_block(out),
            Some(TransferCode::Error) => {
                if let Some(tx) = self.tx.take() {
                    tracing::warn!(file_id = tx.file_id(), "peer abandoned transfer");
                }
            }
            _ => tracing::debug!(arg, "ignoring GET_BYTES request argument"),
        }
    }

    /// Replay the buffered block. Safe to call repeatedly.
    pub fn resend_block(&mut self, out: &mut Outbox) {
        let Some(tx) = self.tx.get_mut() else {
            tracing::warn!("RESEND with no active send");
            out.respond(Message::new(Opcode::GetBytes, NOT_FOUND));
            return;
        };
        match tx.current_block().cloned() {
            Some(block) => {
                tracing::debug!(file_id = tx.file_id(), len = block.len(), "resending block");
                stream_block(&block, out);
            }
            None => self.send_next(out),
        }
    }

    fn send_next(&mut self, out: &mut Outbox) {
        let Some(tx) = self.tx.get_mut() else {
            return;
        };
        match tx.advance() {
            Ok(ReadResult::Block(block)) => stream_block(&block, out),
            Ok(ReadResult::EndOfSource) => {
                let file_id = tx.file_id();
                let bytes = tx.bytes_read();
                self.tx.take();
                tracing::info!(file_id, bytes, "send complete");
                out.respond(Message::new(Opcode::GetBytes, STOP));
                out.event(NodeEvent::SendComplete { file_id, bytes });
            }
            Err(e) => {
                tracing::warn!(file_id = tx.file_id(), path = %tx.path().display(), error = %e, "read failed, aborting send");
                self.tx.take();
                out.respond(Message::new(Opcode::GetBytes, NOT_FOUND));
            }
        }
    }

    /// Fetcher: the holder's answer to `GET_FILE`. Only `NOT_FOUND` is sent
    /// this way; the data itself arrives as `GET_BYTES`.
    pub fn on_file_response(&mut self, arg: u8, out: &mut Outbox) {
        if arg != NOT_FOUND {
            tracing::debug!(arg, "ignoring GET_FILE response argument");
            return;
        }
        if let Some(rx) = self.rx.take() {
            let file_id = rx.file_id();
            tracing::warn!(file_id, "peer has no such file");
            rx.discard();
            out.event(NodeEvent::TransferFailed {
                file_id,
                reason: "not found on peer".into(),
            });
        }
    }

    /// Fetcher: a checksum, chunk, `STOP` or `NOT_FOUND` from the holder.
    pub fn on_bytes_response(&mut self, msg: &Message, out: &mut Outbox) -> Result<(), ProtocolError> {
        let arg = ChunkArg::classify(msg.arg);
        let Some(rx) = self.rx.get_mut() else {
            return match arg {
                ChunkArg::NotFound => Ok(()),
                _ => Err(ProtocolError::NoActiveTransfer),
            };
        };

        match arg {
            ChunkArg::Checksum => match BlockHeader::decode(&msg.payload) {
                Ok(header) => rx.on_checksum(header),
                Err(e) => {
                    tracing::warn!(error = %e, "bad block header");
                    let outcome = rx.reject();
                    self.apply(outcome, out);
                }
            },
            ChunkArg::Chunk(seq) => match rx.on_chunk(seq, &msg.payload) {
                Ok(outcome) => self.apply(outcome, out),
                Err(e) => self.fail(e.to_string(), out),
            },
            ChunkArg::Stop => {
                if let Some(rx) = self.rx.take() {
                    let file_id = rx.file_id();
                    match rx.finish() {
                        Ok((path, bytes)) => {
                            tracing::info!(file_id, bytes, path = %path.display(), "transfer complete");
                            out.event(NodeEvent::TransferComplete { file_id, path, bytes });
                        }
                        Err(e) => {
                            tracing::warn!(file_id, error = %e, "could not finalise transfer");
                            out.event(NodeEvent::TransferFailed {
                                file_id,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
            ChunkArg::NotFound => {
                if let Some(rx) = self.rx.take() {
                    let file_id = rx.file_id();
                    tracing::warn!(file_id, "holder has no active transfer");
                    rx.discard();
                    out.event(NodeEvent::TransferFailed {
                        file_id,
                        reason: "holder lost the transfer".into(),
                    });
                }
            }
            ChunkArg::Other(other) => tracing::debug!(arg = other, "ignoring GET_BYTES response"),
        }
        Ok(())
    }

    fn apply(&mut self, outcome: RxOutcome, out: &mut Outbox) {
        match outcome {
            RxOutcome::Pending => {}
            RxOutcome::Written { progress } => {
                out.request(Message::new(Opcode::GetBytes, TransferCode::Next.into()));
                if progress {
                    if let Some(rx) = self.rx.get_mut() {
                        tracing::info!(file_id = rx.file_id(), blocks = rx.writes(), "transfer progress");
                        out.event(NodeEvent::TransferProgress {
                            file_id: rx.file_id(),
                            bytes: rx.bytes_written(),
                        });
                    }
                }
            }
            RxOutcome::Rejected => {
                tracing::warn!("block checksum mismatch, requesting resend");
                out.request(Message::new(Opcode::GetBytes, TransferCode::Resend.into()));
            }
            RxOutcome::Exhausted => {
                let e = ProtocolError::RetriesExhausted(self.max_resends);
                self.fail(e.to_string(), out);
            }
        }
    }

    fn fail(&mut self, reason: String, out: &mut Outbox) {
        if let Some(rx) = self.rx.take() {
            let file_id = rx.file_id();
            tracing::warn!(file_id, reason = %reason, "aborting receive");
            rx.discard();
            out.request(Message::new(Opcode::GetBytes, TransferCode::Error.into()));
            out.event(NodeEvent::TransferFailed { file_id, reason });
        }
    }

    /// Drop the outgoing transfer without notifying the peer.
    pub fn cancel_send(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::info!(file_id = tx.file_id(), "send cancelled");
        }
    }

    /// Drop both directions without notifying the peer.
    pub fn abort_all(&mut self) {
        self.tx.take();
        if let Some(rx) = self.rx.take() {
            rx.discard();
        }
    }
}

/// Queue one block: its header, then every chunk numbered from 1.
pub fn stream_block(block: &[u8], out: &mut Outbox) {
    let header = BlockHeader::for_block(block);
    out.push(Outgoing::paced_response(Message::with_payload(
        Opcode::GetBytes,
        CHECKSUM,
        header.encode().to_vec(),
    )));
    for (i, chunk) in block::split_into_chunks(block).into_iter().enumerate() {
        out.push(Outgoing::paced_response(Message::with_payload(
            Opcode::GetBytes,
            (i + 1) as u8,
            chunk,
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canlink_core::opcode::MAX_CHUNKS;

    fn write_source(dir: &Path, len: usize) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
        let path = dir.join("src.bin");
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    /// Feed every GET_BYTES response from `from` into `engine` and collect
    /// what it sends back.
    fn deliver(engine: &mut TransferEngine, from: &Outbox) -> Outbox {
        let mut out = Outbox::new();
        for msg in from.responses() {
            engine.on_bytes_response(msg, &mut out).unwrap();
        }
        out
    }

    #[test]
    fn block_stream_is_header_then_numbered_chunks() {
        let block: Vec<u8> = (0..13).collect();
        let mut out = Outbox::new();
        stream_block(&block, &mut out);
        let msgs: Vec<_> = out.responses().cloned().collect();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].arg, CHECKSUM);
        assert_eq!(BlockHeader::decode(&msgs[0].payload).unwrap().chunk_count, 3);
        assert_eq!(msgs.iter().skip(1).map(|m| m.arg).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(out.frames.iter().all(|f| f.is_paced()));
    }

    #[test]
    fn two_full_blocks_then_stop() {
        let tmp = tempfile::tempdir().unwrap();
        let (src, data) = write_source(tmp.path(), 2 * BLOCK_SIZE);
        let dest = tmp.path().join("out").join("dest.bin");

        let mut holder = TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE);
        let mut fetcher = TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE);

        let mut out = Outbox::new();
        fetcher.fetch(7, &dest, &mut out).unwrap();
        assert_eq!(out.requests().next(), Some(&Message::new(Opcode::GetFile, 7)));

        let mut stream = Outbox::new();
        holder.serve(7, &src, &mut stream);
        assert_eq!(stream.responses().count(), 1 + MAX_CHUNKS as usize);

        let mut rounds = 0;
        loop {
            let reply = deliver(&mut fetcher, &stream);
            if !fetcher.is_receiving() {
                assert!(matches!(
                    reply.events.last(),
                    Some(NodeEvent::TransferComplete { file_id: 7, bytes, .. }) if *bytes == data.len() as u64
                ));
                break;
            }
            let verdict = reply.requests().next().unwrap().arg;
            assert_eq!(verdict, TransferCode::Next as u8);
            stream = Outbox::new();
            holder.on_bytes_request(verdict, &mut stream);
            rounds += 1;
            assert!(rounds < 5);
        }
        assert_eq!(rounds, 2);
        assert!(!holder.is_sending());
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[test]
    fn empty_source_sends_stop_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let (src, _) = write_source(tmp.path(), 0);
        let mut holder = TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE);
        let mut out = Outbox::new();
        holder.serve(1, &src, &mut out);
        let msgs: Vec<_> = out.responses().collect();
        assert_eq!(msgs, vec![&Message::new(Opcode::GetBytes, STOP)]);
        assert!(!holder.is_sending());
    }

    #[test]
    fn missing_source_replies_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let mut holder = TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE);
        let mut out = Outbox::new();
        holder.serve(4, &tmp.path().join("absent"), &mut out);
        assert_eq!(
            out.responses().next(),
            Some(&Message::new(Opcode::GetFile, NOT_FOUND))
        );
        assert!(!holder.is_sending());
    }

    #[test]
    fn resend_replays_identical_block() {
        let tmp = tempfile::tempdir().unwrap();
        let (src, _) = write_source(tmp.path(), 100);
        let mut holder = TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE);

        let mut first = Outbox::new();
        holder.serve(1, &src, &mut first);
        let mut again = Outbox::new();
        holder.on_bytes_request(TransferCode::Resend as u8, &mut again);
        let mut third = Outbox::new();
        holder.on_bytes_request(TransferCode::Resend as u8, &mut third);

        assert_eq!(first.frames, again.frames);
        assert_eq!(again.frames, third.frames);
    }

    #[test]
    fn next_without_transfer_is_not_found() {
        let mut holder = TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE);
        let mut out = Outbox::new();
        holder.on_bytes_request(TransferCode::Next as u8, &mut out);
        assert_eq!(
            out.responses().next(),
            Some(&Message::new(Opcode::GetBytes, NOT_FOUND))
        );
    }

    #[test]
    fn corrupted_chunk_triggers_resend_then_recovers() {
        let tmp = tempfile::tempdir().unwrap();
        let (src, data) = write_source(tmp.path(), 50);
        let dest = tmp.path().join("dest.bin");
        let mut holder = TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE);
        let mut fetcher = TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE);
        fetcher.fetch(1, &dest, &mut Outbox::new()).unwrap();

        let mut stream = Outbox::new();
        holder.serve(1, &src, &mut stream);

        let mut reply = Outbox::new();
        for (i, msg) in stream.responses().enumerate() {
            let mut msg = msg.clone();
            if i == 3 {
                let mut bytes = msg.payload.to_vec();
                bytes[0] ^= 0x01;
                msg.payload = Bytes::from(bytes);
            }
            fetcher.on_bytes_response(&msg, &mut reply).unwrap();
        }
        let verdict = reply.requests().next().unwrap().arg;
        assert_eq!(verdict, TransferCode::Resend as u8);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);

        let mut resent = Outbox::new();
        holder.on_bytes_request(verdict, &mut resent);
        let reply = deliver(&mut fetcher, &resent);
        assert_eq!(reply.requests().next().unwrap().arg, TransferCode::Next as u8);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[test]
    fn repeated_mismatch_exhausts_and_removes_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("dest.bin");
        let mut fetcher = TransferEngine::new(2, WRITES_TO_UPDATE);
        fetcher.fetch(9, &dest, &mut Outbox::new()).unwrap();

        let bad_header = BlockHeader {
            crc: 0,
            chunk_count: 1,
        };
        let mut verdicts = Vec::new();
        for _ in 0..3 {
            let mut out = Outbox::new();
            let hdr = Message::with_payload(Opcode::GetBytes, CHECKSUM, bad_header.encode().to_vec());
            fetcher.on_bytes_response(&hdr, &mut out).unwrap();
            let chunk = Message::with_payload(Opcode::GetBytes, 1, vec![1u8, 2, 3]);
            fetcher.on_bytes_response(&chunk, &mut out).unwrap();
            verdicts.push(out.requests().next().unwrap().arg);
            if let Some(NodeEvent::TransferFailed { file_id, .. }) = out.events.last() {
                assert_eq!(*file_id, 9);
            }
        }
        assert_eq!(
            verdicts,
            vec![
                TransferCode::Resend as u8,
                TransferCode::Resend as u8,
                TransferCode::Error as u8
            ]
        );
        assert!(!fetcher.is_receiving());
        assert!(!dest.exists());
    }

    #[test]
    fn holder_drops_send_on_error_verdict() {
        let tmp = tempfile::tempdir().unwrap();
        let (src, _) = write_source(tmp.path(), 10);
        let mut holder = TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE);
        holder.serve(2, &src, &mut Outbox::new());
        assert!(holder.is_sending());
        let mut out = Outbox::new();
        holder.on_bytes_request(TransferCode::Error as u8, &mut out);
        assert!(!holder.is_sending());
        assert!(out.frames.is_empty());
    }

    #[test]
    fn not_found_response_aborts_receive() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("x").join("snaps.db");
        let mut fetcher = TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE);
        fetcher.fetch(3, &dest, &mut Outbox::new()).unwrap();
        assert!(dest.exists());

        let mut out = Outbox::new();
        fetcher.on_file_response(NOT_FOUND, &mut out);
        assert!(!fetcher.is_receiving());
        assert!(!dest.exists());
        assert!(matches!(out.events[0], NodeEvent::TransferFailed { file_id: 3, .. }));
    }

    #[test]
    fn stray_chunk_without_receive_is_an_error() {
        let mut fetcher = TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE);
        let msg = Message::with_payload(Opcode::GetBytes, 1, vec![0u8]);
        assert!(matches!(
            fetcher.on_bytes_response(&msg, &mut Outbox::new()),
            Err(ProtocolError::NoActiveTransfer)
        ));
    }

    #[test]
    fn progress_reported_every_n_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let (src, _) = write_source(tmp.path(), 3 * BLOCK_SIZE);
        let dest = tmp.path().join("dest.bin");
        let mut holder = TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE);
        let mut fetcher = TransferEngine::new(MAX_RESENDS, 2);
        fetcher.fetch(1, &dest, &mut Outbox::new()).unwrap();

        let mut stream = Outbox::new();
        holder.serve(1, &src, &mut stream);
        let mut progress = Vec::new();
        while fetcher.is_receiving() {
            let reply = deliver(&mut fetcher, &stream);
            progress.extend(reply.events.iter().filter_map(|e| match e {
                NodeEvent::TransferProgress { bytes, .. } => Some(*bytes),
                _ => None,
            }));
            stream = Outbox::new();
            let verdict = reply.requests().next().map(|m| m.arg);
            if let Some(arg) = verdict {
                holder.on_bytes_request(arg, &mut stream);
            }
        }
        assert_eq!(progress, vec![2 * BLOCK_SIZE as u64]);
    }

    #[test]
    fn new_fetch_replaces_active_receive() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("a.bin");
        let second = tmp.path().join("b.bin");
        let mut fetcher = TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE);
        fetcher.fetch(1, &first, &mut Outbox::new()).unwrap();
        fetcher.fetch(2, &second, &mut Outbox::new()).unwrap();
        assert!(!first.exists());
        assert!(second.exists());
        assert!(fetcher.is_receiving());
    }
}
