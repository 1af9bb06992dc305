//! Growable in-memory byte buffer with single-pass replay
//!
//! [`StreamBuffer`] accumulates bytes in a queue of fixed-size chunks and
//! hands them back exactly once: reading consumes the data. It is what the
//! archive codec writes into and what cached entries are replayed from, so it
//! avoids both pre-sizing and the repeated copying of a growing `Vec<u8>`.
//!
//! Chunks are owned values that move from the write side, through the queue,
//! to the read side. Capacity starts at the initial chunk size and doubles for
//! every new chunk until it reaches the maximum.
//!
//! The buffer is not meant to be shared between a concurrent writer and reader.

use crate::{Error, Result};
use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Default capacity of the first chunk
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Upper bound on the capacity of a single chunk
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Clamp a size hint into `[DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE]`
#[must_use]
pub fn chunk_size_in_default_range(value: usize) -> usize {
    value.clamp(DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

/// Character sets understood by [`StreamBuffer::decode_as_text`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    /// UTF-8
    #[default]
    Utf8,
    /// UTF-16, little endian, no BOM handling
    Utf16Le,
    /// UTF-16, big endian, no BOM handling
    Utf16Be,
    /// ISO-8859-1; every byte maps to the code point of the same value
    Latin1,
    /// US-ASCII; bytes above 0x7F are unmappable
    Ascii,
}

impl Charset {
    fn decode_lossy(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Utf16Le => decode_utf16_lossy(bytes, u16::from_le_bytes),
            Self::Utf16Be => decode_utf16_lossy(bytes, u16::from_be_bytes),
            Self::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Self::Ascii => bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        char::from(b)
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
        }
    }
}

fn decode_utf16_lossy(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let pairs = bytes.chunks_exact(2);
    let dangling = !pairs.remainder().is_empty();
    let units = pairs.map(|pair| unit([pair[0], pair[1]]));
    let mut text: String = char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    if dangling {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}

/// One fixed-capacity block of buffered bytes
#[derive(Debug)]
struct Chunk {
    data: Box<[u8]>,
    /// Bytes written so far
    used: usize,
    /// Bytes already handed to a reader
    pos: usize,
}

impl Chunk {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            used: 0,
            pos: 0,
        }
    }

    const fn unread(&self) -> usize {
        self.used - self.pos
    }

    fn space_left(&self) -> usize {
        self.data.len() - self.used
    }

    fn is_full(&self) -> bool {
        self.space_left() == 0
    }

    fn append(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.space_left());
        self.data[self.used..self.used + n].copy_from_slice(&bytes[..n]);
        self.used += n;
        n
    }

    fn take_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.unread());
        out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    fn unread_slice(&self) -> &[u8] {
        &self.data[self.pos..self.used]
    }
}

/// In-memory byte queue that is written once and read once
#[derive(Debug)]
pub struct StreamBuffer {
    /// Chunk currently accepting writes
    write_chunk: Option<Chunk>,
    /// Full chunks waiting to be read, oldest first
    queue: VecDeque<Chunk>,
    /// Chunk currently being drained
    read_chunk: Option<Chunk>,
    /// Unread bytes held in `queue`, maintained at chunk boundaries
    queued_bytes: usize,
    initial_chunk_size: usize,
    next_chunk_size: usize,
    max_chunk_size: usize,
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBuffer {
    /// Create an empty buffer with the default chunk size
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create an empty buffer whose first chunk holds `chunk_size` bytes
    ///
    /// Growth is capped at [`MAX_CHUNK_SIZE`], or at `chunk_size` when that is
    /// larger. A size of zero is treated as one byte.
    #[must_use]
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self::with_chunk_limits(chunk_size, MAX_CHUNK_SIZE)
    }

    /// Create an empty buffer with explicit initial and maximum chunk sizes
    #[must_use]
    pub fn with_chunk_limits(initial: usize, max: usize) -> Self {
        let initial = initial.max(1);
        Self {
            write_chunk: None,
            queue: VecDeque::new(),
            read_chunk: None,
            queued_bytes: 0,
            initial_chunk_size: initial,
            next_chunk_size: initial,
            max_chunk_size: max.max(initial),
        }
    }

    /// Create a buffer sized for `size_hint` bytes
    #[must_use]
    pub fn with_size_hint(size_hint: usize) -> Self {
        Self::with_chunk_size(chunk_size_in_default_range(size_hint))
    }

    /// Drain `reader` into a new buffer
    ///
    /// `size_hint` is the expected length of the source, e.g. a file's size.
    /// It only picks the first chunk size, clamped to
    /// [`DEFAULT_CHUNK_SIZE`]..=[`MAX_CHUNK_SIZE`]; the whole source is read
    /// regardless.
    pub fn of(reader: &mut (impl Read + ?Sized), size_hint: usize) -> io::Result<Self> {
        let mut buffer = Self::with_size_hint(size_hint);
        buffer.read_fully(reader)?;
        Ok(buffer)
    }

    /// Read exactly `len` bytes from `reader` into a new buffer
    pub fn of_len(reader: &mut (impl Read + ?Sized), len: usize) -> io::Result<Self> {
        let mut buffer = Self::with_size_hint(len);
        buffer.read_from(reader, len)?;
        Ok(buffer)
    }

    /// Number of bytes written but not yet read
    #[must_use]
    pub fn total_bytes_unread(&self) -> usize {
        self.queued_bytes
            + self.read_chunk.as_ref().map_or(0, Chunk::unread)
            + self.write_chunk.as_ref().map_or(0, Chunk::unread)
    }

    /// Whether every written byte has been consumed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_bytes_unread() == 0
    }

    /// Number of chunks currently allocated
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.queue.len()
            + usize::from(self.read_chunk.is_some())
            + usize::from(self.write_chunk.is_some())
    }

    /// Capacity the next allocated chunk will have
    #[must_use]
    pub const fn next_chunk_size(&self) -> usize {
        self.next_chunk_size
    }

    /// Append `bytes` to the buffer
    ///
    /// An empty slice is a no-op and allocates nothing.
    pub fn write_bytes(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let mut chunk = self.take_write_chunk();
            let written = chunk.append(bytes);
            bytes = &bytes[written..];
            self.write_chunk = Some(chunk);
        }
    }

    /// Append a single byte
    pub fn write_byte(&mut self, byte: u8) {
        self.write_bytes(&[byte]);
    }

    /// Copy exactly `len` bytes from `reader` into the buffer
    pub fn read_from(&mut self, reader: &mut (impl Read + ?Sized), len: usize) -> io::Result<()> {
        let mut left = len;
        while left > 0 {
            let mut chunk = self.take_write_chunk();
            let limit = left.min(chunk.space_left());
            let end = chunk.used + limit;
            let read = match reader.read(&mut chunk.data[chunk.used..end]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
                Err(e) => {
                    self.write_chunk = Some(chunk);
                    return Err(e);
                }
            };
            chunk.used += read;
            self.write_chunk = Some(chunk);
            if read == 0 && limit > 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("unexpected end of stream, {left} of {len} bytes missing"),
                ));
            }
            left -= read;
        }
        Ok(())
    }

    /// Copy everything `reader` yields into the buffer
    pub fn read_fully(&mut self, reader: &mut (impl Read + ?Sized)) -> io::Result<u64> {
        let mut total = 0u64;
        loop {
            let mut chunk = self.take_write_chunk();
            let start = chunk.used;
            let result = reader.read(&mut chunk.data[start..]);
            if let Ok(n) = result {
                chunk.used += n;
            }
            self.write_chunk = Some(chunk);
            match result {
                Ok(0) => return Ok(total),
                Ok(n) => total += n as u64,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Read one byte; `None` once the buffer is exhausted
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read_into(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Read up to `out.len()` bytes, returning how many were copied
    ///
    /// Returns 0 when `out` is empty or when no data is left.
    pub fn read_into(&mut self, out: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while total < out.len() {
            if self.prepare_read()?.is_none() {
                break;
            }
            let Some(chunk) = self.read_chunk.as_mut() else {
                return Err(Error::buffer_state("no read chunk after prepare"));
            };
            total += chunk.take_into(&mut out[total..]);
        }
        Ok(total)
    }

    /// Drain all unread bytes into one vector
    pub fn read_as_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.total_bytes_unread()];
        let read = self.read_into(&mut out)?;
        if read != out.len() {
            return Err(Error::buffer_state(format!(
                "expected {} unread bytes, drained {read}",
                out.len()
            )));
        }
        Ok(out)
    }

    /// Drain all unread bytes and decode them as text
    ///
    /// Malformed or unmappable input becomes U+FFFD instead of an error.
    pub fn decode_as_text(&mut self, charset: Charset) -> Result<String> {
        if self.is_empty() {
            return Ok(String::new());
        }
        let bytes = self.read_as_bytes()?;
        Ok(charset.decode_lossy(&bytes))
    }

    /// Drain all unread bytes into `sink`, chunk by chunk
    pub fn write_to(&mut self, sink: &mut (impl Write + ?Sized)) -> Result<u64> {
        let mut written = 0u64;
        while self.prepare_read()?.is_some() {
            let Some(chunk) = self.read_chunk.as_mut() else {
                return Err(Error::buffer_state("no read chunk after prepare"));
            };
            let pending = chunk.unread_slice();
            sink.write_all(pending)
                .map_err(|e| Error::io_no_path(e, "write buffered bytes"))?;
            written += pending.len() as u64;
            chunk.pos = chunk.used;
        }
        Ok(written)
    }

    /// Drop all unread content and return to the freshly constructed state
    pub fn clear(&mut self) {
        self.queue.clear();
        self.read_chunk = None;
        self.write_chunk = None;
        self.queued_bytes = 0;
        self.next_chunk_size = self.initial_chunk_size;
    }

    fn take_write_chunk(&mut self) -> Chunk {
        match self.write_chunk.take() {
            Some(chunk) if !chunk.is_full() => chunk,
            Some(full) => {
                self.queued_bytes += full.unread();
                self.queue.push_back(full);
                self.allocate_chunk()
            }
            None => self.allocate_chunk(),
        }
    }

    fn allocate_chunk(&mut self) -> Chunk {
        let size = self.next_chunk_size;
        self.next_chunk_size = size.saturating_mul(2).min(self.max_chunk_size);
        Chunk::new(size)
    }

    /// Make sure `read_chunk` has unread bytes; `None` means end of data
    fn prepare_read(&mut self) -> Result<Option<usize>> {
        if let Some(unread) = self.read_chunk.as_ref().map(Chunk::unread)
            && unread > 0
        {
            return Ok(Some(unread));
        }
        self.read_chunk = None;

        if let Some(next) = self.queue.pop_front() {
            let unread = next.unread();
            self.queued_bytes = self.queued_bytes.checked_sub(unread).ok_or_else(|| {
                Error::buffer_state(format!(
                    "queued byte count {} is smaller than chunk of {unread}",
                    self.queued_bytes
                ))
            })?;
            self.read_chunk = Some(next);
            return Ok(Some(unread));
        }

        // Nothing queued: hand the partially filled write chunk to the reader.
        if self.write_chunk.as_ref().is_some_and(|c| c.unread() > 0) {
            let chunk = self.write_chunk.take();
            let unread = chunk.as_ref().map_or(0, Chunk::unread);
            self.read_chunk = chunk;
            return Ok(Some(unread));
        }

        if self.queued_bytes != 0 {
            return Err(Error::buffer_state(format!(
                "{} queued bytes with an empty queue",
                self.queued_bytes
            )));
        }
        Ok(None)
    }
}

impl Write for StreamBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf);
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_bytes(buf);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for StreamBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn new_buffer_is_empty_and_unallocated() {
        let buffer = StreamBuffer::new();
        assert_eq!(buffer.total_bytes_unread(), 0);
        assert_eq!(buffer.chunk_count(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn zero_length_write_never_allocates() {
        let mut buffer = StreamBuffer::new();
        buffer.write_bytes(&[]);
        assert_eq!(buffer.chunk_count(), 0);
        assert_eq!(buffer.next_chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn write_then_read_back_in_order() {
        let data = filled(10_000);
        let mut buffer = StreamBuffer::with_chunk_size(16);
        buffer.write_bytes(&data);
        assert_eq!(buffer.total_bytes_unread(), data.len());
        assert_eq!(buffer.read_as_bytes().unwrap(), data);
        assert!(buffer.is_empty());
    }

    #[test]
    fn chunk_sizes_double_up_to_max() {
        let mut buffer = StreamBuffer::with_chunk_limits(4, 16);
        buffer.write_bytes(&[1; 4]);
        assert_eq!(buffer.next_chunk_size(), 8);
        buffer.write_bytes(&[1; 8]);
        assert_eq!(buffer.next_chunk_size(), 16);
        buffer.write_bytes(&[1; 16]);
        assert_eq!(buffer.next_chunk_size(), 16);
        assert_eq!(buffer.chunk_count(), 3);
    }

    #[test]
    fn max_is_never_below_initial() {
        let mut buffer = StreamBuffer::with_chunk_limits(64, 8);
        buffer.write_bytes(&[0; 65]);
        assert_eq!(buffer.next_chunk_size(), 64);
    }

    #[test]
    fn unread_counts_track_partial_reads() {
        let mut buffer = StreamBuffer::with_chunk_size(8);
        buffer.write_bytes(&filled(100));
        let mut out = [0u8; 30];
        assert_eq!(buffer.read_into(&mut out).unwrap(), 30);
        assert_eq!(buffer.total_bytes_unread(), 70);
        assert_eq!(out.to_vec(), filled(30));
    }

    #[test]
    fn single_byte_reads_end_with_none() {
        let mut buffer = StreamBuffer::new();
        buffer.write_bytes(b"ab");
        assert_eq!(buffer.read_byte().unwrap(), Some(b'a'));
        assert_eq!(buffer.read_byte().unwrap(), Some(b'b'));
        assert_eq!(buffer.read_byte().unwrap(), None);
        assert_eq!(buffer.read_byte().unwrap(), None);
    }

    #[test]
    fn zero_length_read_has_no_side_effects() {
        let mut buffer = StreamBuffer::new();
        buffer.write_bytes(b"abc");
        assert_eq!(buffer.read_into(&mut []).unwrap(), 0);
        assert_eq!(buffer.total_bytes_unread(), 3);
    }

    #[test]
    fn read_at_end_returns_zero() {
        let mut buffer = StreamBuffer::new();
        let mut out = [0u8; 4];
        assert_eq!(buffer.read_into(&mut out).unwrap(), 0);
    }

    #[test]
    fn interleaved_writes_and_reads() {
        let mut buffer = StreamBuffer::with_chunk_size(4);
        buffer.write_bytes(b"hello");
        let mut out = [0u8; 3];
        buffer.read_into(&mut out).unwrap();
        assert_eq!(&out, b"hel");
        buffer.write_bytes(b" world");
        assert_eq!(buffer.total_bytes_unread(), 8);
        assert_eq!(buffer.read_as_bytes().unwrap(), b"lo world");
    }

    #[test]
    fn write_to_drains_everything() {
        let data = filled(5000);
        let mut buffer = StreamBuffer::with_chunk_size(100);
        buffer.write_bytes(&data);
        let mut sink = Vec::new();
        assert_eq!(buffer.write_to(&mut sink).unwrap(), 5000);
        assert_eq!(sink, data);
        assert_eq!(buffer.total_bytes_unread(), 0);
    }

    #[test]
    fn clear_resets_state() {
        let mut buffer = StreamBuffer::with_chunk_size(4);
        buffer.write_bytes(&filled(50));
        buffer.clear();
        assert_eq!(buffer.total_bytes_unread(), 0);
        assert_eq!(buffer.chunk_count(), 0);
        assert_eq!(buffer.next_chunk_size(), 4);
        buffer.write_bytes(b"again");
        assert_eq!(buffer.read_as_bytes().unwrap(), b"again");
    }

    #[test]
    fn decode_utf8_replaces_malformed_bytes() {
        let mut buffer = StreamBuffer::with_chunk_size(2);
        buffer.write_bytes(b"ok \xff\xfe done");
        let text = buffer.decode_as_text(Charset::Utf8).unwrap();
        assert!(text.starts_with("ok "));
        assert!(text.ends_with(" done"));
        assert!(text.contains(char::REPLACEMENT_CHARACTER));
    }

    #[test]
    fn decode_multibyte_split_across_chunks() {
        let mut buffer = StreamBuffer::with_chunk_size(1);
        buffer.write_bytes("grüße".as_bytes());
        assert_eq!(buffer.decode_as_text(Charset::Utf8).unwrap(), "grüße");
    }

    #[test]
    fn decode_empty_is_empty_string() {
        let mut buffer = StreamBuffer::new();
        assert_eq!(buffer.decode_as_text(Charset::Utf16Le).unwrap(), "");
    }

    #[test]
    fn decode_other_charsets() {
        let mut buffer = StreamBuffer::new();
        buffer.write_bytes(&[b'h', 0, b'i', 0]);
        assert_eq!(buffer.decode_as_text(Charset::Utf16Le).unwrap(), "hi");

        buffer.write_bytes(&[0, b'h', 0]);
        assert_eq!(
            buffer.decode_as_text(Charset::Utf16Be).unwrap(),
            format!("h{}", char::REPLACEMENT_CHARACTER)
        );

        buffer.write_bytes(&[0xe9]);
        assert_eq!(buffer.decode_as_text(Charset::Latin1).unwrap(), "é");

        buffer.write_bytes(&[b'a', 0xe9]);
        assert_eq!(
            buffer.decode_as_text(Charset::Ascii).unwrap(),
            format!("a{}", char::REPLACEMENT_CHARACTER)
        );
    }

    #[test]
    fn read_from_exact_length() {
        let data = filled(300);
        let mut buffer = StreamBuffer::of_len(&mut data.as_slice(), 300).unwrap();
        assert_eq!(buffer.total_bytes_unread(), 300);
        assert_eq!(buffer.read_as_bytes().unwrap(), data);
    }

    #[test]
    fn read_from_short_source_fails() {
        let data = filled(10);
        let err = StreamBuffer::of_len(&mut data.as_slice(), 20).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn of_reader_drains_source() {
        let data = filled(9000);
        let mut buffer = StreamBuffer::of(&mut data.as_slice(), data.len()).unwrap();
        assert_eq!(buffer.total_bytes_unread(), 9000);
        assert_eq!(buffer.read_as_bytes().unwrap(), data);
    }

    #[test]
    fn of_clamps_the_size_hint() {
        let data = filled(100);
        let small = StreamBuffer::of(&mut data.as_slice(), 0).unwrap();
        assert_eq!(small.chunk_count(), 1);
        assert_eq!(small.next_chunk_size(), DEFAULT_CHUNK_SIZE * 2);

        let huge = StreamBuffer::of(&mut data.as_slice(), usize::MAX).unwrap();
        assert_eq!(huge.next_chunk_size(), MAX_CHUNK_SIZE);
        assert_eq!(huge.total_bytes_unread(), 100);
    }

    #[test]
    fn io_traits_round_trip() {
        let mut buffer = StreamBuffer::with_chunk_size(3);
        buffer.write_all(b"through the traits").unwrap();
        let mut text = String::new();
        buffer.read_to_string(&mut text).unwrap();
        assert_eq!(text, "through the traits");
    }

    #[test]
    fn size_hint_is_clamped() {
        assert_eq!(chunk_size_in_default_range(0), DEFAULT_CHUNK_SIZE);
        assert_eq!(chunk_size_in_default_range(10_000), 10_000);
        assert_eq!(chunk_size_in_default_range(usize::MAX), MAX_CHUNK_SIZE);
    }
}
