//! A `Read + Seek` source that is either an on-disk file (the common case
//! for a full, unencrypted, uncompressed blob) or a temp file a basis was
//! materialized into (after decrypt/decompress/patch, which produce a
//! plain byte stream with no inherent seek support).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use tempfile::NamedTempFile;

/// See module docs.
pub enum SeekableSource {
    /// Backed directly by an open file handle.
    File(File),
    /// Backed by a temp file the content was streamed into.
    Materialized(NamedTempFile),
}

impl SeekableSource {
    /// Write `reader` fully into a fresh temp file (in `tempdir`, if
    /// given, else the system default) and return it rewound to the
    /// start.
    pub fn materialize(mut reader: impl Read, tempdir: Option<&Path>) -> io::Result<Self> {
        let mut tmp = match tempdir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        io::copy(&mut reader, &mut tmp)?;
        tmp.as_file_mut().flush()?;
        tmp.as_file_mut().seek(SeekFrom::Start(0))?;
        Ok(Self::Materialized(tmp))
    }
}

impl Read for SeekableSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SeekableSource::File(f) => f.read(buf),
            SeekableSource::Materialized(t) => t.as_file_mut().read(buf),
        }
    }
}

impl Seek for SeekableSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            SeekableSource::File(f) => f.seek(pos),
            SeekableSource::Materialized(t) => t.as_file_mut().seek(pos),
        }
    }
}
