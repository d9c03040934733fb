//! ustar writer and reader.
//!
//! Names longer than 100 bytes are carried in a preceding GNU `L` record.
//! Sizes beyond the 11-digit octal field use GNU base-256 encoding.
//!
//! The reader also honours pax extended headers (`x`) for `path` and `size`.
//! Global pax headers (`g`) are consumed but never applied.

use super::{ArchiveEntry, ENTRY_MODE, dir_target, safe_join};
use crate::{Error, Result};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub(super) const BLOCK_LEN: usize = 512;
const NAME_LEN: usize = 100;
const MAX_OCTAL_SIZE: u64 = 0o777_7777_7777;
const LONGNAME: &[u8] = b"././@LongLink";

const TYPE_REGULAR: u8 = b'0';
const TYPE_REGULAR_OLD: u8 = 0;
const TYPE_DIR: u8 = b'5';
const TYPE_GNU_LONGNAME: u8 = b'L';
const TYPE_PAX: u8 = b'x';
const TYPE_PAX_GLOBAL: u8 = b'g';

fn padding(size: u64) -> usize {
    let rem = (size % BLOCK_LEN as u64) as usize;
    if rem == 0 { 0 } else { BLOCK_LEN - rem }
}

pub(super) fn write_tar<W: Write>(out: &mut W, entries: &[ArchiveEntry]) -> Result<()> {
    let mut header = [0u8; BLOCK_LEN];
    let zeros = [0u8; BLOCK_LEN];

    for entry in entries {
        let name = entry.name.as_bytes();
        let mut file = File::open(&entry.source)?;
        let size = file.metadata()?.len();

        if name.len() > NAME_LEN {
            let mut long = name.to_vec();
            long.push(0);
            write_header(&mut header, LONGNAME, long.len() as u64, TYPE_GNU_LONGNAME);
            out.write_all(&header)?;
            out.write_all(&long)?;
            out.write_all(&zeros[..padding(long.len() as u64)])?;
        }

        write_header(&mut header, &name[..name.len().min(NAME_LEN)], size, TYPE_REGULAR);
        out.write_all(&header)?;

        let copied = io::copy(&mut (&mut file).take(size), out)?;
        if copied != size {
            return Err(Error::Archive(format!(
                "{} shrank while archiving ({copied} of {size} bytes)",
                entry.source.display()
            )));
        }
        out.write_all(&zeros[..padding(size)])?;
    }

    out.write_all(&zeros)?;
    out.write_all(&zeros)?;
    Ok(())
}

fn write_header(buf: &mut [u8; BLOCK_LEN], name: &[u8], size: u64, typeflag: u8) {
    buf.fill(0);
    buf[..name.len()].copy_from_slice(name);
    buf[100..108].copy_from_slice(format!("{ENTRY_MODE:07o}\0").as_bytes());
    buf[108..116].copy_from_slice(b"0000000\0");
    buf[116..124].copy_from_slice(b"0000000\0");
    write_size(&mut buf[124..136], size);
    buf[136..148].copy_from_slice(b"00000000000\0");
    buf[148..156].fill(b' ');
    buf[156] = typeflag;
    buf[257..263].copy_from_slice(b"ustar\0");
    buf[263..265].copy_from_slice(b"00");

    let sum: u32 = buf.iter().map(|&b| u32::from(b)).sum();
    buf[148..156].copy_from_slice(format!("{sum:06o}\0 ").as_bytes());
}

fn write_size(field: &mut [u8], size: u64) {
    if size <= MAX_OCTAL_SIZE {
        field.copy_from_slice(format!("{size:011o}\0").as_bytes());
    } else {
        field.fill(0);
        field[0] = 0x80;
        let len = field.len();
        field[len - 8..].copy_from_slice(&size.to_be_bytes());
    }
}

fn parse_size(field: &[u8]) -> Result<u64> {
    if field[0] & 0x80 != 0 {
        let mut value: u64 = 0;
        for &b in &field[1..] {
            value = value
                .checked_mul(256)
                .and_then(|v| v.checked_add(u64::from(b)))
                .ok_or_else(|| Error::Archive("tar entry size overflows".to_string()))?;
        }
        return Ok(value);
    }
    parse_octal(field)
}

fn parse_octal(field: &[u8]) -> Result<u64> {
    let text: String = field
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect();
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(text, 8)
        .map_err(|_| Error::Archive(format!("invalid octal field in tar header: {text:?}")))
}

fn verify_checksum(header: &[u8; BLOCK_LEN]) -> Result<()> {
    let stored = parse_octal(&header[148..156])?;
    let sum: u64 = header
        .iter()
        .enumerate()
        .map(|(idx, &b)| {
            if (148..156).contains(&idx) {
                u64::from(b' ')
            } else {
                u64::from(b)
            }
        })
        .sum();
    if sum == stored {
        Ok(())
    } else {
        Err(Error::Archive(format!(
            "tar header checksum mismatch (stored {stored}, computed {sum})"
        )))
    }
}

fn header_name(header: &[u8; BLOCK_LEN]) -> String {
    let field = |range: std::ops::Range<usize>| {
        let raw = &header[range];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    };
    let name = field(0..100);
    let prefix = if &header[257..262] == b"ustar" {
        field(345..500)
    } else {
        String::new()
    };
    if prefix.is_empty() {
        name
    } else {
        format!("{prefix}/{name}")
    }
}

fn skip<R: Read>(input: &mut R, len: u64) -> Result<()> {
    let skipped = io::copy(&mut input.take(len), &mut io::sink())?;
    if skipped == len {
        Ok(())
    } else {
        Err(Error::Archive("truncated tar stream".to_string()))
    }
}

/// Read a metadata record payload plus its block padding.
fn read_payload<R: Read>(input: &mut R, size: u64, pad: u64, what: &str) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    input.by_ref().take(size).read_to_end(&mut raw)?;
    if raw.len() as u64 != size {
        return Err(Error::Archive(format!("truncated tar {what}")));
    }
    skip(input, pad)?;
    Ok(raw)
}

/// Split a pax extended header into `key=value` records.
///
/// Each record reads `"<len> <key>=<value>\n"`, where `len` counts the whole
/// record including itself.
fn parse_pax(raw: &[u8]) -> Result<Vec<(String, String)>> {
    let malformed = || Error::Archive("malformed pax extended header".to_string());
    let mut records = Vec::new();
    let mut rest = raw;
    while !rest.is_empty() {
        if rest.iter().all(|&b| b == 0) {
            break;
        }
        let space = rest.iter().position(|&b| b == b' ').ok_or_else(malformed)?;
        let len: usize = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(malformed)?;
        if len <= space + 1 || len > rest.len() {
            return Err(malformed());
        }
        let record = &rest[space + 1..len];
        let record = record.strip_suffix(b"\n").unwrap_or(record);
        if let Some(eq) = record.iter().position(|&b| b == b'=') {
            records.push((
                String::from_utf8_lossy(&record[..eq]).into_owned(),
                String::from_utf8_lossy(&record[eq + 1..]).into_owned(),
            ));
        }
        rest = &rest[len..];
    }
    Ok(records)
}

pub(super) fn extract_tar<R: Read>(mut input: R, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    let mut header = [0u8; BLOCK_LEN];
    // Overrides for the next real entry only.
    let mut long_name: Option<String> = None;
    let mut pax_size: Option<u64> = None;

    loop {
        match input.read_exact(&mut header) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                log::warn!("Tar stream ended without an end-of-archive marker");
                break;
            }
            Err(err) => return Err(err.into()),
        }
        if header.iter().all(|&b| b == 0) {
            break;
        }
        verify_checksum(&header)?;

        let typeflag = header[156];
        let size = match typeflag {
            TYPE_GNU_LONGNAME | TYPE_PAX | TYPE_PAX_GLOBAL => parse_size(&header[124..136])?,
            _ => match pax_size.take() {
                Some(size) => size,
                None => parse_size(&header[124..136])?,
            },
        };
        let pad = padding(size) as u64;

        match typeflag {
            TYPE_GNU_LONGNAME => {
                let raw = read_payload(&mut input, size, pad, "long name")?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                long_name = Some(String::from_utf8_lossy(&raw[..end]).into_owned());
            }
            TYPE_PAX => {
                let raw = read_payload(&mut input, size, pad, "pax header")?;
                for (key, value) in parse_pax(&raw)? {
                    match key.as_str() {
                        "path" => long_name = Some(value),
                        "size" => {
                            let parsed = value.parse().map_err(|_| {
                                Error::Archive(format!("invalid pax size {value:?}"))
                            })?;
                            pax_size = Some(parsed);
                        }
                        _ => {}
                    }
                }
            }
            TYPE_PAX_GLOBAL => {
                log::debug!("Ignoring global pax header");
                skip(&mut input, size + pad)?;
            }
            TYPE_REGULAR | TYPE_REGULAR_OLD => {
                let name = long_name.take().unwrap_or_else(|| header_name(&header));
                let target = safe_join(dest, &name)?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut out = BufWriter::new(File::create(&target)?);
                let copied = io::copy(&mut (&mut input).take(size), &mut out)?;
                out.flush()?;
                if copied != size {
                    return Err(Error::Archive(format!("truncated tar entry {name}")));
                }
                skip(&mut input, pad)?;
                written.push(target);
            }
            TYPE_DIR => {
                let name = long_name.take().unwrap_or_else(|| header_name(&header));
                match dir_target(dest, &name)? {
                    Some(dir) => std::fs::create_dir_all(dir)?,
                    None => log::debug!("Skipping root directory entry {name:?}"),
                }
                skip(&mut input, size + pad)?;
            }
            other => {
                let name = long_name.take().unwrap_or_else(|| header_name(&header));
                log::debug!("Skipping tar entry {name} of type {:?}", other as char);
                skip(&mut input, size + pad)?;
            }
        }
    }

    Ok(written)
}
