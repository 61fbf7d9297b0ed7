//! On-disk encoding of a single generation.
//!
//! Layout:
//!
//! ```text
//! header (32 bytes)
//!   magic "QLOG" | version u16 | flags u16 | commit id u64 | added len u64 | removed len u64
//! added section   (N-Quads, zstd when FLAG_ZSTD)
//! removed section (N-Quads, zstd when FLAG_ZSTD)
//! footer (40 bytes)
//!   blake3 digest of everything before the footer | "QLOG_END"
//! ```
//!
//! Quads inside a section are written in a stable order so that the same
//! generation always encodes to the same bytes.

use crate::consts::{GENERATION_ENDMARK, GENERATION_MAGIC, GENERATION_VERSION};
use crate::generation::{CommitId, GenerationBody};
use crate::util::write_atomically;
use anyhow::{anyhow, bail, Result};
use oxigraph::io::{RdfFormat, RdfParser, RdfSerializer};
use oxigraph::model::Quad;
use std::collections::HashSet;
use std::path::Path;

const HEADER_LEN: usize = 32;
const FOOTER_LEN: usize = 40;
const FLAG_ZSTD: u16 = 1;
const FLAG_BASE: u16 = 1 << 1;

/// Options controlling generation emission.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Compress both sections using zstd.
    pub zstd: bool,
    /// fsync the file before it is renamed into place.
    pub sync: bool,
}

#[derive(Debug)]
pub struct DecodedGeneration {
    pub commit_id: CommitId,
    pub body: GenerationBody,
}

fn encode_section(quads: &HashSet<Quad>, zstd: bool) -> Result<Vec<u8>> {
    let mut ordered: Vec<&Quad> = quads.iter().collect();
    ordered.sort_by_cached_key(|q| q.to_string());
    let mut serializer = RdfSerializer::from_format(RdfFormat::NQuads).for_writer(Vec::new());
    for quad in ordered {
        serializer.serialize_quad(quad)?;
    }
    let raw = serializer.finish()?;
    if zstd {
        Ok(zstd::encode_all(&raw[..], 0)?)
    } else {
        Ok(raw)
    }
}

fn decode_section(bytes: &[u8], zstd: bool) -> Result<HashSet<Quad>> {
    let raw = if zstd {
        zstd::decode_all(bytes)?
    } else {
        bytes.to_vec()
    };
    let mut quads = HashSet::new();
    for quad in RdfParser::from_format(RdfFormat::NQuads).for_reader(raw.as_slice()) {
        quads.insert(quad?);
    }
    Ok(quads)
}

pub fn encode(commit_id: CommitId, body: &GenerationBody, zstd: bool) -> Result<Vec<u8>> {
    let empty = HashSet::new();
    let (added, removed, base) = match body {
        GenerationBody::Base(all) => (all, &empty, true),
        GenerationBody::Delta { added, removed } => (added, removed, false),
    };
    let added = encode_section(added, zstd)?;
    let removed = encode_section(removed, zstd)?;

    let mut flags: u16 = 0;
    if zstd {
        flags |= FLAG_ZSTD;
    }
    if base {
        flags |= FLAG_BASE;
    }

    let mut file = Vec::with_capacity(HEADER_LEN + added.len() + removed.len() + FOOTER_LEN);
    file.extend_from_slice(GENERATION_MAGIC);
    file.extend_from_slice(&GENERATION_VERSION.to_le_bytes());
    file.extend_from_slice(&flags.to_le_bytes());
    file.extend_from_slice(&commit_id.to_le_bytes());
    file.extend_from_slice(&(added.len() as u64).to_le_bytes());
    file.extend_from_slice(&(removed.len() as u64).to_le_bytes());
    file.extend_from_slice(&added);
    file.extend_from_slice(&removed);

    let digest = blake3::hash(&file);
    file.extend_from_slice(digest.as_bytes());
    file.extend_from_slice(GENERATION_ENDMARK);
    Ok(file)
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

pub fn decode(buf: &[u8]) -> Result<DecodedGeneration> {
    if buf.len() < HEADER_LEN + FOOTER_LEN {
        bail!("generation file is truncated ({} bytes)", buf.len());
    }
    if &buf[0..4] != GENERATION_MAGIC {
        bail!("bad generation magic");
    }
    let version = read_u16(buf, 4);
    if version != GENERATION_VERSION {
        bail!("unsupported generation version {}", version);
    }
    let flags = read_u16(buf, 6);
    let commit_id = read_u64(buf, 8);
    let added_len = usize::try_from(read_u64(buf, 16))?;
    let removed_len = usize::try_from(read_u64(buf, 24))?;

    let body_end = buf.len() - FOOTER_LEN;
    if &buf[body_end + 32..] != GENERATION_ENDMARK {
        bail!("generation end marker missing");
    }
    let expected = HEADER_LEN
        .checked_add(added_len)
        .and_then(|n| n.checked_add(removed_len))
        .ok_or_else(|| anyhow!("generation section lengths overflow"))?;
    if expected != body_end {
        bail!(
            "generation sections span {} bytes but the file holds {}",
            expected,
            body_end
        );
    }
    let digest = blake3::hash(&buf[..body_end]);
    if digest.as_bytes()[..] != buf[body_end..body_end + 32] {
        bail!("generation checksum mismatch");
    }

    let zstd = flags & FLAG_ZSTD != 0;
    let added = decode_section(&buf[HEADER_LEN..HEADER_LEN + added_len], zstd)?;
    let removed = decode_section(&buf[HEADER_LEN + added_len..body_end], zstd)?;
    let body = if flags & FLAG_BASE != 0 {
        GenerationBody::Base(added)
    } else {
        GenerationBody::Delta { added, removed }
    };
    Ok(DecodedGeneration { commit_id, body })
}

/// Encodes and atomically writes a generation file.
pub fn write_generation(
    path: &Path,
    commit_id: CommitId,
    body: &GenerationBody,
    opts: WriteOptions,
) -> Result<()> {
    let bytes = encode(commit_id, body, opts.zstd)?;
    write_atomically(path, &bytes, opts.sync)
}

pub fn read_generation(path: &Path) -> Result<DecodedGeneration> {
    let bytes = std::fs::read(path)?;
    decode(&bytes).map_err(|e| anyhow!("{}: {}", path.display(), e))
}
