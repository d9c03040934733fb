//! Zip writer and reader.
//!
//! Entries are deflated and streamed straight from disk; the local header's
//! CRC and sizes are patched in afterwards, so no data descriptors are
//! needed. Timestamps are pinned to 1980-01-01 00:00.
//!
//! Sizes, offsets and entry counts past the zip32 fields move into ZIP64
//! extra fields and a ZIP64 end-of-central-directory record.

use super::{ArchiveEntry, ENTRY_MODE, dir_target, safe_join};
use crate::{Error, Result};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc, CrcReader};
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_SIG: u32 = 0x0605_4b50;
const ZIP64_END_SIG: u32 = 0x0606_4b50;
const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;
const ZIP64_EXTRA_ID: u16 = 0x0001;

const LOCAL_HEADER_LEN: u64 = 30;
const END_OF_CENTRAL_LEN: u64 = 22;
const ZIP64_END_LEN: u64 = 56;
const ZIP64_LOCATOR_LEN: usize = 20;
const MAX_COMMENT_LEN: u64 = 0xFFFF;

const VERSION_NEEDED: u16 = 20;
const VERSION_ZIP64: u16 = 45;
/// Upper byte 3 marks unix attributes in the external attribute field.
const VERSION_MADE_BY: u16 = (3 << 8) | VERSION_ZIP64;
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
const DOS_TIME: u16 = 0;
const DOS_DATE: u16 = (1 << 5) | 1;
const FLAG_UTF8: u16 = 1 << 11;
const S_IFREG: u32 = 0o100_000;

/// Values at or above `value`, and entry counts at or above `entries`, are
/// written through ZIP64 records.
#[derive(Debug, Clone, Copy)]
struct Limits {
    value: u64,
    entries: u64,
}

const ZIP32_LIMITS: Limits = Limits {
    value: 0xFFFF_FFFF,
    entries: 0xFFFF,
};

struct CentralRecord {
    name: Vec<u8>,
    crc: u32,
    compressed: u64,
    size: u64,
    offset: u64,
}

fn put_u16<W: Write>(out: &mut W, v: u16) -> io::Result<()> {
    out.write_all(&v.to_le_bytes())
}

fn put_u32<W: Write>(out: &mut W, v: u32) -> io::Result<()> {
    out.write_all(&v.to_le_bytes())
}

fn put_u64<W: Write>(out: &mut W, v: u64) -> io::Result<()> {
    out.write_all(&v.to_le_bytes())
}

/// Whether an entry of `size` bytes needs ZIP64 sizes in its local header.
/// Deflate can expand incompressible input slightly, so leave headroom.
fn local_needs_zip64(size: u64, limits: Limits) -> bool {
    size.saturating_add(size / 1024 + 1024) >= limits.value
}

/// The zip32 form of `value`, pushing the full value onto `extra` when it
/// does not fit.
fn narrow(value: u64, limits: Limits, extra: &mut Vec<u8>) -> u32 {
    if value >= limits.value {
        extra.extend_from_slice(&value.to_le_bytes());
        u32::MAX
    } else {
        value as u32
    }
}

pub(super) fn write_zip<W: Write + Seek>(out: &mut W, entries: &[ArchiveEntry]) -> Result<()> {
    write_zip_with(out, entries, ZIP32_LIMITS)
}

fn write_zip_with<W: Write + Seek>(
    out: &mut W,
    entries: &[ArchiveEntry],
    limits: Limits,
) -> Result<()> {
    let mut records = Vec::with_capacity(entries.len());
    let mut buf = vec![0u8; 64 * 1024];

    for entry in entries {
        let name = entry.name.as_bytes().to_vec();
        let name_len = u16::try_from(name.len())
            .map_err(|_| Error::Archive(format!("zip entry name too long: {}", entry.name)))?;
        let mut source = File::open(&entry.source)?;
        let expected = source.metadata()?.len();
        let wide = local_needs_zip64(expected, limits);
        let offset = out.stream_position()?;

        put_u32(out, LOCAL_HEADER_SIG)?;
        put_u16(out, if wide { VERSION_ZIP64 } else { VERSION_NEEDED })?;
        put_u16(out, FLAG_UTF8)?;
        put_u16(out, METHOD_DEFLATED)?;
        put_u16(out, DOS_TIME)?;
        put_u16(out, DOS_DATE)?;
        put_u32(out, 0)?;
        put_u32(out, 0)?;
        put_u32(out, 0)?;
        put_u16(out, name_len)?;
        put_u16(out, if wide { 20 } else { 0 })?;
        out.write_all(&name)?;
        if wide {
            put_u16(out, ZIP64_EXTRA_ID)?;
            put_u16(out, 16)?;
            put_u64(out, 0)?;
            put_u64(out, 0)?;
        }

        let data_start = out.stream_position()?;
        let mut crc = Crc::new();
        let mut size: u64 = 0;
        let mut reader = (&mut source).take(expected);
        let mut encoder = DeflateEncoder::new(&mut *out, Compression::default());
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            crc.update(&buf[..n]);
            encoder.write_all(&buf[..n])?;
            size += n as u64;
        }
        encoder.finish()?;
        let data_end = out.stream_position()?;
        if size != expected {
            return Err(Error::Archive(format!(
                "{} shrank while archiving ({size} of {expected} bytes)",
                entry.source.display()
            )));
        }

        let record = CentralRecord {
            name,
            crc: crc.sum(),
            compressed: data_end - data_start,
            size,
            offset,
        };
        if !wide && record.compressed >= limits.value {
            return Err(Error::Archive(format!(
                "{} compressed past the zip32 limit",
                entry.source.display()
            )));
        }

        out.seek(SeekFrom::Start(offset + 14))?;
        put_u32(out, record.crc)?;
        if wide {
            put_u32(out, u32::MAX)?;
            put_u32(out, u32::MAX)?;
            out.seek(SeekFrom::Start(offset + LOCAL_HEADER_LEN + u64::from(name_len) + 4))?;
            put_u64(out, record.size)?;
            put_u64(out, record.compressed)?;
        } else {
            put_u32(out, record.compressed as u32)?;
            put_u32(out, record.size as u32)?;
        }
        out.seek(SeekFrom::Start(data_end))?;

        records.push(record);
    }

    let central_start = out.stream_position()?;
    for record in &records {
        let mut extra = Vec::new();
        let size = narrow(record.size, limits, &mut extra);
        let compressed = narrow(record.compressed, limits, &mut extra);
        let offset = narrow(record.offset, limits, &mut extra);
        let version = if extra.is_empty() { VERSION_NEEDED } else { VERSION_ZIP64 };

        put_u32(out, CENTRAL_HEADER_SIG)?;
        put_u16(out, VERSION_MADE_BY)?;
        put_u16(out, version)?;
        put_u16(out, FLAG_UTF8)?;
        put_u16(out, METHOD_DEFLATED)?;
        put_u16(out, DOS_TIME)?;
        put_u16(out, DOS_DATE)?;
        put_u32(out, record.crc)?;
        put_u32(out, compressed)?;
        put_u32(out, size)?;
        put_u16(out, record.name.len() as u16)?;
        put_u16(out, if extra.is_empty() { 0 } else { extra.len() as u16 + 4 })?;
        put_u16(out, 0)?;
        put_u16(out, 0)?;
        put_u16(out, 0)?;
        put_u32(out, (S_IFREG | ENTRY_MODE) << 16)?;
        put_u32(out, offset)?;
        out.write_all(&record.name)?;
        if !extra.is_empty() {
            put_u16(out, ZIP64_EXTRA_ID)?;
            put_u16(out, extra.len() as u16)?;
            out.write_all(&extra)?;
        }
    }
    let central_end = out.stream_position()?;

    let count = records.len() as u64;
    let central_len = central_end - central_start;
    let count_wide = count >= limits.entries;
    let len_wide = central_len >= limits.value;
    let start_wide = central_start >= limits.value;

    if count_wide || len_wide || start_wide {
        put_u32(out, ZIP64_END_SIG)?;
        put_u64(out, ZIP64_END_LEN - 12)?;
        put_u16(out, VERSION_MADE_BY)?;
        put_u16(out, VERSION_ZIP64)?;
        put_u32(out, 0)?;
        put_u32(out, 0)?;
        put_u64(out, count)?;
        put_u64(out, count)?;
        put_u64(out, central_len)?;
        put_u64(out, central_start)?;

        put_u32(out, ZIP64_LOCATOR_SIG)?;
        put_u32(out, 0)?;
        put_u64(out, central_end)?;
        put_u32(out, 1)?;
    }

    let count16 = if count_wide { u16::MAX } else { count as u16 };
    put_u32(out, END_OF_CENTRAL_SIG)?;
    put_u16(out, 0)?;
    put_u16(out, 0)?;
    put_u16(out, count16)?;
    put_u16(out, count16)?;
    put_u32(out, if len_wide { u32::MAX } else { central_len as u32 })?;
    put_u32(out, if start_wide { u32::MAX } else { central_start as u32 })?;
    put_u16(out, 0)?;
    Ok(())
}

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    u64::from(le_u32(buf, at)) | (u64::from(le_u32(buf, at + 4)) << 32)
}

fn corrupt() -> Error {
    Error::Archive("corrupt zip central directory".to_string())
}

struct DirectoryEntry {
    name: String,
    method: u16,
    crc: u32,
    compressed: u64,
    size: u64,
    offset: u64,
}

/// The 64-bit values carried in a ZIP64 extra field, in header order.
fn zip64_values(mut extra: &[u8]) -> impl Iterator<Item = u64> + '_ {
    let mut data: &[u8] = &[];
    while extra.len() >= 4 {
        let id = le_u16(extra, 0);
        let end = (4 + usize::from(le_u16(extra, 2))).min(extra.len());
        if id == ZIP64_EXTRA_ID {
            data = &extra[4..end];
            break;
        }
        extra = &extra[end..];
    }
    data.chunks_exact(8).map(|chunk| le_u64(chunk, 0))
}

/// Entry count, length and offset of the central directory from a ZIP64
/// end record.
fn read_zip64_end<R: Read + Seek>(input: &mut R, at: u64) -> Result<(u64, u64, u64)> {
    let mut record = [0u8; ZIP64_END_LEN as usize];
    input.seek(SeekFrom::Start(at))?;
    input.read_exact(&mut record)?;
    if le_u32(&record, 0) != ZIP64_END_SIG {
        return Err(Error::Archive("zip64 end-of-central-directory record not found".to_string()));
    }
    Ok((le_u64(&record, 32), le_u64(&record, 40), le_u64(&record, 48)))
}

/// Locate and parse the central directory.
fn read_directory<R: Read + Seek>(input: &mut R) -> Result<Vec<DirectoryEntry>> {
    let len = input.seek(SeekFrom::End(0))?;
    if len < END_OF_CENTRAL_LEN {
        return Err(Error::Archive("file too small to be a zip archive".to_string()));
    }
    let tail_len = len.min(END_OF_CENTRAL_LEN + MAX_COMMENT_LEN);
    input.seek(SeekFrom::Start(len - tail_len))?;
    let mut tail = vec![0u8; tail_len as usize];
    input.read_exact(&mut tail)?;

    let eocd = (0..=tail.len() - END_OF_CENTRAL_LEN as usize)
        .rev()
        .find(|&at| le_u32(&tail, at) == END_OF_CENTRAL_SIG)
        .ok_or_else(|| Error::Archive("zip end-of-central-directory record not found".to_string()))?;

    let locator = eocd.checked_sub(ZIP64_LOCATOR_LEN);
    let (count, central_len, central_start) = match locator {
        Some(at) if le_u32(&tail, at) == ZIP64_LOCATOR_SIG => {
            read_zip64_end(input, le_u64(&tail, at + 8))?
        }
        _ => (
            u64::from(le_u16(&tail, eocd + 10)),
            u64::from(le_u32(&tail, eocd + 12)),
            u64::from(le_u32(&tail, eocd + 16)),
        ),
    };
    if central_start.saturating_add(central_len) > len {
        return Err(corrupt());
    }

    input.seek(SeekFrom::Start(central_start))?;
    let mut central = vec![0u8; usize::try_from(central_len).map_err(|_| corrupt())?];
    input.read_exact(&mut central)?;

    let mut entries = Vec::new();
    let mut at = 0usize;
    for _ in 0..count {
        if at + 46 > central.len() || le_u32(&central, at) != CENTRAL_HEADER_SIG {
            return Err(corrupt());
        }
        let name_len = usize::from(le_u16(&central, at + 28));
        let extra_len = usize::from(le_u16(&central, at + 30));
        let comment_len = usize::from(le_u16(&central, at + 32));
        let name_end = at + 46 + name_len;
        let extra_end = name_end + extra_len;
        if extra_end > central.len() {
            return Err(corrupt());
        }

        let mut wide = zip64_values(&central[name_end..extra_end]);
        let mut widen = |value: u32| -> Result<u64> {
            if value == u32::MAX {
                wide.next().ok_or_else(corrupt)
            } else {
                Ok(u64::from(value))
            }
        };
        let size = widen(le_u32(&central, at + 24))?;
        let compressed = widen(le_u32(&central, at + 20))?;
        let offset = widen(le_u32(&central, at + 42))?;

        entries.push(DirectoryEntry {
            name: String::from_utf8_lossy(&central[at + 46..name_end]).into_owned(),
            method: le_u16(&central, at + 10),
            crc: le_u32(&central, at + 16),
            compressed,
            size,
            offset,
        });
        at = extra_end + comment_len;
    }
    Ok(entries)
}

pub(super) fn extract_zip<R: Read + Seek>(mut input: R, dest: &Path) -> Result<Vec<PathBuf>> {
    let entries = read_directory(&mut input)?;
    let mut written = Vec::with_capacity(entries.len());
    let mut local = [0u8; LOCAL_HEADER_LEN as usize];

    for entry in entries {
        if entry.name.ends_with('/') {
            match dir_target(dest, &entry.name)? {
                Some(dir) => std::fs::create_dir_all(dir)?,
                None => log::debug!("Skipping root directory entry {:?}", entry.name),
            }
            continue;
        }
        let target = safe_join(dest, &entry.name)?;

        input.seek(SeekFrom::Start(entry.offset))?;
        input.read_exact(&mut local)?;
        if le_u32(&local, 0) != LOCAL_HEADER_SIG {
            return Err(Error::Archive(format!("bad local header for {}", entry.name)));
        }
        let skip = u64::from(le_u16(&local, 26)) + u64::from(le_u16(&local, 28));
        input.seek(SeekFrom::Current(skip as i64))?;

        let raw = (&mut input).take(entry.compressed);
        let decoded: Box<dyn Read + '_> = match entry.method {
            METHOD_STORED => Box::new(raw),
            METHOD_DEFLATED => Box::new(DeflateDecoder::new(raw)),
            other => {
                return Err(Error::Archive(format!(
                    "unsupported compression method {other} for {}",
                    entry.name
                )));
            }
        };
        let mut reader = CrcReader::new(decoded);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(&target)?);
        let copied = io::copy(&mut reader, &mut out)?;
        out.flush()?;

        if copied != entry.size || reader.crc().sum() != entry.crc {
            return Err(Error::Archive(format!("zip entry {} is corrupt", entry.name)));
        }
        written.push(target);
    }
    Ok(written)
}
