//! Streaming compression wrappers (spec component C3).
//!
//! `CompressingReader` sits on the ingest path (plaintext in, optionally
//! zstd-compressed bytes out); `DecompressingReader` sits on the restore
//! path (optionally-compressed bytes in, plaintext out). Both track a
//! running content checksum over the *logical* (uncompressed) bytes as
//! they pass through, so `Regenerator` can authenticate without a second
//! pass over the data (spec §4.3, §4.6 step 4).

#![deny(unsafe_code)]

use std::io::{self, BufReader, Read};

use tardis_core::digest::RunningDigest;
use tardis_core::model::ChecksumAlgorithm;
use thiserror::Error;

/// Fixed zstd level used for all compression, so `compressed_size()` is a
/// deterministic function of the input (mirrors this workspace's
/// `blob_store`, which documents the same determinism guarantee).
pub const ZSTD_LEVEL: i32 = 19;

/// Errors from the compression layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying I/O or zstd framing failure.
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// A `Read` wrapper that counts bytes passed through and feeds them into a
/// running content hash.
struct HashingCounter<R> {
    inner: R,
    digest: RunningDigest,
    count: u64,
}

impl<R: Read> HashingCounter<R> {
    fn new(inner: R, algo: ChecksumAlgorithm) -> Self {
        Self { inner, digest: RunningDigest::new(algo), count: 0 }
    }
}

impl<R: Read> Read for HashingCounter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.digest.update(&buf[..n]);
            self.count += n as u64;
        }
        Ok(n)
    }
}

/// A `Read` wrapper that only counts bytes passed through (no hashing);
/// used to measure the compressed side of the pipe.
struct Counter<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for Counter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

enum CompressingInner<R: Read> {
    Plain(HashingCounter<R>),
    Zstd(Box<zstd::stream::read::Encoder<'static, BufReader<HashingCounter<R>>>>),
}

/// Wraps a plaintext reader, optionally zstd-compressing it, and tracks
/// logical size / compressed size / running checksum as bytes are pulled
/// through `read`.
pub struct CompressingReader<R: Read> {
    inner: CompressingInner<R>,
    compressed_count: u64,
    compress: bool,
}

impl<R: Read> CompressingReader<R> {
    /// Wrap `source`. When `compress` is false the reader is a pass-through
    /// (compression may be disabled per ingest, spec §4.3).
    pub fn new(source: R, algo: ChecksumAlgorithm, compress: bool) -> Result<Self, Error> {
        let hashing = HashingCounter::new(source, algo);
        let inner = if compress {
            let enc = zstd::stream::read::Encoder::new(BufReader::new(hashing), ZSTD_LEVEL)?;
            CompressingInner::Zstd(Box::new(enc))
        } else {
            CompressingInner::Plain(hashing)
        };
        Ok(Self { inner, compressed_count: 0, compress })
    }

    /// Total logical (source) bytes pulled through so far.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        match &self.inner {
            CompressingInner::Plain(h) => h.count,
            CompressingInner::Zstd(e) => e.get_ref().get_ref().count,
        }
    }

    /// Total output bytes produced so far.
    #[must_use]
    pub fn compressed_size(&self) -> u64 {
        self.compressed_count
    }

    /// Whether this reader is compressing its output.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    /// Running hex digest of the logical (source) bytes seen so far.
    #[must_use]
    pub fn checksum(&self) -> String {
        match &self.inner {
            CompressingInner::Plain(h) => h.digest.finalize_hex(),
            CompressingInner::Zstd(e) => e.get_ref().get_ref().digest.finalize_hex(),
        }
    }
}

impl<R: Read> Read for CompressingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match &mut self.inner {
            CompressingInner::Plain(h) => h.read(buf)?,
            CompressingInner::Zstd(e) => e.read(buf)?,
        };
        self.compressed_count += n as u64;
        Ok(n)
    }
}

enum DecompressingInner<R: Read> {
    Plain(Counter<R>),
    Zstd(Box<zstd::stream::read::Decoder<'static, BufReader<Counter<R>>>>),
}

/// Wraps a (possibly compressed) reader, optionally zstd-decompressing it,
/// and tracks logical size / compressed size / running checksum over the
/// decompressed bytes. The checksum is what `Regenerator` compares against
/// the recorded `CheckSum` for authentication.
pub struct DecompressingReader<R: Read> {
    inner: DecompressingInner<R>,
    digest: RunningDigest,
    total: u64,
    sink: Option<Box<dyn FnMut(&[u8]) + Send>>,
}

impl<R: Read> DecompressingReader<R> {
    /// Wrap `source`. `compressed` should match `CheckSum.compressed` for
    /// the blob being read.
    pub fn new(source: R, algo: ChecksumAlgorithm, compressed: bool) -> Result<Self, Error> {
        let counted = Counter { inner: source, count: 0 };
        let inner = if compressed {
            let dec = zstd::stream::read::Decoder::new(BufReader::new(counted))?;
            DecompressingInner::Zstd(Box::new(dec))
        } else {
            DecompressingInner::Plain(counted)
        };
        Ok(Self { inner, digest: RunningDigest::new(algo), total: 0, sink: None })
    }

    /// Register a callback invoked with every chunk of decompressed bytes
    /// as they're read. `Regenerator` uses this to feed a basis's content
    /// into `delta::Signature` incrementally while streaming it, rather
    /// than buffering the whole basis to hash it twice.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn FnMut(&[u8]) + Send>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Logical bytes produced so far.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total
    }

    /// Compressed bytes consumed from the source so far.
    #[must_use]
    pub fn compressed_size(&self) -> u64 {
        match &self.inner {
            DecompressingInner::Plain(c) => c.count,
            DecompressingInner::Zstd(d) => d.get_ref().get_ref().count,
        }
    }

    /// Running hex digest over the decompressed bytes seen so far.
    #[must_use]
    pub fn checksum(&self) -> String {
        self.digest.finalize_hex()
    }
}

impl<R: Read> Read for DecompressingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match &mut self.inner {
            DecompressingInner::Plain(c) => c.read(buf)?,
            DecompressingInner::Zstd(d) => d.read(buf)?,
        };
        if n > 0 {
            self.digest.update(&buf[..n]);
            self.total += n as u64;
            if let Some(sink) = &mut self.sink {
                sink(&buf[..n]);
            }
        }
        Ok(n)
    }
}
