//! rsync-style delta encoding against a basis blob (spec component C4).
//!
//! [`Signature`] is a weak (Adler-32) plus strong (dataset
//! `ChecksumAlgorithm`) checksum per fixed-size block of a basis file,
//! built without needing the new data. [`diff`] slides a window over the
//! new data, and for every weak-checksum hit that the strong checksum
//! confirms, emits a [`Instruction::Copy`] referencing the basis instead of
//! a [`Instruction::Literal`]. [`patch`] replays that instruction stream
//! against the basis to reconstruct the new data.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};

use adler::Adler32;
use tardis_core::digest::RunningDigest;
use tardis_core::model::ChecksumAlgorithm;
use thiserror::Error;

/// Smallest block size [`block_size_for`] will choose.
pub const MIN_BLOCK_SIZE: u32 = 512;
/// Largest block size [`block_size_for`] will choose.
pub const MAX_BLOCK_SIZE: u32 = 1 << 17; // 128 KiB

/// Errors from signature/delta/patch operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying I/O failure reading the basis or new data.
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// An instruction stream was truncated or had an unrecognized tag.
    #[error("malformed delta instruction stream: {0}")]
    MalformedDelta(String),
    /// A `Copy` instruction referenced bytes outside the basis.
    #[error("copy instruction [{offset}, {offset}+{len}) exceeds basis length {basis_len}")]
    BasisMismatch { offset: u64, len: u32, basis_len: u64 },
}

impl From<Error> for tardis_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => tardis_core::Error::Io(io),
            Error::MalformedDelta(msg) => tardis_core::Error::MalformedDelta(msg),
            Error::BasisMismatch { offset, len, basis_len } => tardis_core::Error::MalformedDelta(
                format!("copy [{offset}, {offset}+{len}) exceeds basis length {basis_len}"),
            ),
        }
    }
}

/// Pick a block size for a basis of `file_len` bytes, using rsync's
/// square-root heuristic (larger files get larger blocks, fewer of them),
/// clamped to `[MIN_BLOCK_SIZE, MAX_BLOCK_SIZE]`.
#[must_use]
pub fn block_size_for(file_len: u64) -> u32 {
    let sqrt = (file_len as f64).sqrt() as u32;
    sqrt.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE)
}

/// One block's pair of checksums in a [`Signature`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSum {
    /// Rolling (Adler-32) checksum, cheap to recompute incrementally.
    pub weak: u32,
    /// Strong per-block hash (hex), only consulted on a weak-checksum hit.
    pub strong: String,
    /// Byte length of this block (the final block of a basis may be short).
    pub len: u32,
}

/// A basis file's checksum table: enough to compute a delta against it
/// without holding the whole basis in memory.
#[derive(Debug, Clone)]
pub struct Signature {
    /// Block size used to build this signature (all blocks but the last).
    pub block_size: u32,
    /// Per-block checksums, in basis order.
    pub blocks: Vec<BlockSum>,
}

impl Signature {
    /// Build a signature for `basis` by reading it block-by-block.
    pub fn build<R: Read>(
        mut basis: R,
        block_size: u32,
        algo: ChecksumAlgorithm,
    ) -> Result<Self, Error> {
        let mut blocks = Vec::new();
        let mut buf = vec![0u8; block_size as usize];
        loop {
            let n = read_fill(&mut basis, &mut buf)?;
            if n == 0 {
                break;
            }
            let chunk = &buf[..n];
            let weak = Adler32::from_buf(chunk).checksum();
            let strong = tardis_core::digest::hash_hex(algo, chunk);
            blocks.push(BlockSum { weak, strong, len: n as u32 });
            if n < buf.len() {
                break;
            }
        }
        Ok(Self { block_size, blocks })
    }

    fn index(&self) -> HashMap<u32, Vec<usize>> {
        let mut index: HashMap<u32, Vec<usize>> = HashMap::new();
        for (i, b) in self.blocks.iter().enumerate() {
            index.entry(b.weak).or_default().push(i);
        }
        index
    }
}

/// Fill `buf` from `r`, returning the number of bytes actually read
/// (short only at EOF, like a basis block being the final partial one).
fn read_fill<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// One step of a delta instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Copy `len` bytes from the basis starting at `offset`.
    Copy {
        /// Byte offset into the basis.
        offset: u64,
        /// Number of bytes to copy.
        len: u32,
    },
    /// Literal bytes not found in the basis, emitted verbatim.
    Literal(Vec<u8>),
}

/// Compute a delta: the sequence of `Copy`/`Literal` instructions that
/// reconstruct `new_data` given `basis_signature`.
pub fn diff<R: Read>(basis_signature: &Signature, mut new_data: R, algo: ChecksumAlgorithm) -> Result<Vec<Instruction>, Error> {
    let block_size = basis_signature.block_size as usize;
    let index = basis_signature.index();

    let mut data = Vec::new();
    new_data.read_to_end(&mut data)?;

    let mut instructions = Vec::new();
    let mut literal = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let window_end = (pos + block_size).min(data.len());
        let window = &data[pos..window_end];
        let weak = Adler32::from_buf(window).checksum();

        let mut matched = None;
        if let Some(candidates) = index.get(&weak) {
            let strong = tardis_core::digest::hash_hex(algo, window);
            for &block_idx in candidates {
                let block = &basis_signature.blocks[block_idx];
                if block.len as usize == window.len() && block.strong == strong {
                    matched = Some(block_idx);
                    break;
                }
            }
        }

        if let Some(block_idx) = matched {
            if !literal.is_empty() {
                instructions.push(Instruction::Literal(std::mem::take(&mut literal)));
            }
            let offset = basis_signature.blocks[..block_idx]
                .iter()
                .map(|b| u64::from(b.len))
                .sum::<u64>();
            instructions.push(Instruction::Copy { offset, len: window.len() as u32 });
            pos += window.len();
        } else {
            literal.push(data[pos]);
            pos += 1;
        }
    }
    if !literal.is_empty() {
        instructions.push(Instruction::Literal(literal));
    }

    Ok(coalesce(instructions))
}

/// Merge adjacent `Copy` instructions that are contiguous in the basis,
/// and adjacent `Literal` instructions, to keep the encoded stream small.
fn coalesce(instructions: Vec<Instruction>) -> Vec<Instruction> {
    let mut out: Vec<Instruction> = Vec::with_capacity(instructions.len());
    for instr in instructions {
        match (out.last_mut(), instr) {
            (
                Some(Instruction::Copy { offset: prev_offset, len: prev_len }),
                Instruction::Copy { offset, len },
            ) if *prev_offset + u64::from(*prev_len) == offset => {
                *prev_len += len;
            }
            (Some(Instruction::Literal(prev)), Instruction::Literal(bytes)) => {
                prev.extend_from_slice(&bytes);
            }
            (_, instr) => out.push(instr),
        }
    }
    out
}

/// Replay `instructions` against `basis`, writing the reconstructed data
/// to `out`.
pub fn patch<B: Read + Seek, W: Write>(
    basis: &mut B,
    instructions: &[Instruction],
    out: &mut W,
) -> Result<(), Error> {
    let basis_len = basis.seek(SeekFrom::End(0))?;
    for instr in instructions {
        match instr {
            Instruction::Copy { offset, len } => {
                if *offset + u64::from(*len) > basis_len {
                    return Err(Error::BasisMismatch { offset: *offset, len: *len, basis_len });
                }
                basis.seek(SeekFrom::Start(*offset))?;
                let mut buf = vec![0u8; *len as usize];
                basis.read_exact(&mut buf)?;
                out.write_all(&buf)?;
            }
            Instruction::Literal(bytes) => out.write_all(bytes)?,
        }
    }
    Ok(())
}

/// Encode an instruction stream to bytes: a tag byte per instruction
/// (`0` = `Copy`, `1` = `Literal`), followed by LEB128 varints for offset
/// and length, or a varint length plus raw bytes for a literal.
#[must_use]
pub fn encode(instructions: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::new();
    for instr in instructions {
        match instr {
            Instruction::Copy { offset, len } => {
                out.push(0);
                write_varint(&mut out, *offset);
                write_varint(&mut out, u64::from(*len));
            }
            Instruction::Literal(bytes) => {
                out.push(1);
                write_varint(&mut out, bytes.len() as u64);
                out.extend_from_slice(bytes);
            }
        }
    }
    out
}

/// Decode the format produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Vec<Instruction>, Error> {
    let mut instructions = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        let tag = bytes[pos];
        pos += 1;
        match tag {
            0 => {
                let offset = read_varint(bytes, &mut pos)?;
                let len = read_varint(bytes, &mut pos)?;
                let len = u32::try_from(len)
                    .map_err(|_| Error::MalformedDelta("copy length overflows u32".into()))?;
                instructions.push(Instruction::Copy { offset, len });
            }
            1 => {
                let len = read_varint(bytes, &mut pos)? as usize;
                if pos + len > bytes.len() {
                    return Err(Error::MalformedDelta("literal length exceeds stream".into()));
                }
                instructions.push(Instruction::Literal(bytes[pos..pos + len].to_vec()));
                pos += len;
            }
            other => return Err(Error::MalformedDelta(format!("unknown instruction tag {other}"))),
        }
    }
    Ok(instructions)
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<u64, Error> {
    let mut value = 0u64;
    let mut shift = 0;
    loop {
        let byte = *bytes
            .get(*pos)
            .ok_or_else(|| Error::MalformedDelta("varint truncated".into()))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::MalformedDelta("varint too long".into()));
        }
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    proptest! {
        /// `patch(basis, diff(sig(basis), new_data))` reconstructs `new_data`
        /// for arbitrary basis/new-data byte buffers (spec §8 P1).
        #[test]
        fn diff_patch_round_trips(
            basis in proptest::collection::vec(any::<u8>(), 0..2000),
            new_data in proptest::collection::vec(any::<u8>(), 0..2000),
        ) {
            let block_size = block_size_for(basis.len() as u64).max(MIN_BLOCK_SIZE);
            let sig = Signature::build(Cursor::new(&basis), block_size, ChecksumAlgorithm::Sha256).unwrap();
            let instructions = diff(&sig, Cursor::new(&new_data), ChecksumAlgorithm::Sha256).unwrap();

            let mut basis_cursor = Cursor::new(&basis);
            let mut out = Vec::new();
            patch(&mut basis_cursor, &instructions, &mut out).unwrap();
            prop_assert_eq!(out, new_data);
        }

        /// `decode(encode(instructions))` is the identity for arbitrary
        /// instruction streams.
        #[test]
        fn encode_decode_round_trips_arbitrary_streams(
            ops in proptest::collection::vec(
                prop_oneof![
                    (any::<u64>(), any::<u32>()).prop_map(|(offset, len)| Instruction::Copy { offset, len }),
                    proptest::collection::vec(any::<u8>(), 0..64).prop_map(Instruction::Literal),
                ],
                0..50,
            ),
        ) {
            let bytes = encode(&ops);
            let decoded = decode(&bytes).unwrap();
            prop_assert_eq!(decoded, ops);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn block_size_heuristic_is_clamped() {
        assert_eq!(block_size_for(0), MIN_BLOCK_SIZE);
        assert_eq!(block_size_for(100), MIN_BLOCK_SIZE);
        assert!(block_size_for(10_000_000_000) <= MAX_BLOCK_SIZE);
    }

    #[test]
    fn identical_data_encodes_as_one_copy() {
        let basis = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let sig = Signature::build(Cursor::new(&basis), 64, ChecksumAlgorithm::Sha256).unwrap();
        let instructions =
            diff(&sig, Cursor::new(&basis), ChecksumAlgorithm::Sha256).unwrap();
        assert!(instructions.iter().all(|i| matches!(i, Instruction::Copy { .. })));

        let mut basis_cursor = Cursor::new(&basis);
        let mut out = Vec::new();
        patch(&mut basis_cursor, &instructions, &mut out).unwrap();
        assert_eq!(out, basis);
    }

    #[test]
    fn appended_tail_is_a_trailing_literal() {
        let basis = b"0123456789".repeat(50);
        let mut new_data = basis.clone();
        new_data.extend_from_slice(b"APPENDED TAIL");

        let sig = Signature::build(Cursor::new(&basis), 32, ChecksumAlgorithm::Md5).unwrap();
        let instructions = diff(&sig, Cursor::new(&new_data), ChecksumAlgorithm::Md5).unwrap();

        let mut basis_cursor = Cursor::new(&basis);
        let mut out = Vec::new();
        patch(&mut basis_cursor, &instructions, &mut out).unwrap();
        assert_eq!(out, new_data);
    }

    #[test]
    fn interior_edit_reuses_unchanged_blocks() {
        let mut basis = vec![0u8; 2000];
        for (i, b) in basis.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let mut new_data = basis.clone();
        new_data[900..910].copy_from_slice(&[0xffu8; 10]);

        let sig = Signature::build(Cursor::new(&basis), 64, ChecksumAlgorithm::Sha256).unwrap();
        let instructions =
            diff(&sig, Cursor::new(&new_data), ChecksumAlgorithm::Sha256).unwrap();

        assert!(instructions.iter().any(|i| matches!(i, Instruction::Copy { .. })));
        assert!(instructions.iter().any(|i| matches!(i, Instruction::Literal(_))));

        let mut basis_cursor = Cursor::new(&basis);
        let mut out = Vec::new();
        patch(&mut basis_cursor, &instructions, &mut out).unwrap();
        assert_eq!(out, new_data);
    }

    #[test]
    fn encode_decode_round_trips() {
        let instructions = vec![
            Instruction::Copy { offset: 0, len: 128 },
            Instruction::Literal(b"hello".to_vec()),
            Instruction::Copy { offset: 1_000_000, len: 4096 },
        ];
        let bytes = encode(&instructions);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, instructions);
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let bytes = vec![99u8];
        assert!(matches!(decode(&bytes), Err(Error::MalformedDelta(_))));
    }

    #[test]
    fn decode_rejects_truncated_literal() {
        let mut bytes = vec![1u8];
        write_varint(&mut bytes, 10);
        bytes.extend_from_slice(b"short");
        assert!(matches!(decode(&bytes), Err(Error::MalformedDelta(_))));
    }

    #[test]
    fn patch_rejects_copy_beyond_basis() {
        let basis = b"short basis".to_vec();
        let instructions = vec![Instruction::Copy { offset: 0, len: 1000 }];
        let mut basis_cursor = Cursor::new(&basis);
        let mut out = Vec::new();
        assert!(matches!(
            patch(&mut basis_cursor, &instructions, &mut out),
            Err(Error::BasisMismatch { .. })
        ));
    }
}
