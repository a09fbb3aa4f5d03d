//! Timezone (TZif) file verifier/carver, versions 0, 2 and 3.
//!
//! The format is documented in tzfile(5). Version 2+ files repeat the
//! structure with 64-bit transition times and append a POSIX-TZ style
//! string enclosed in newlines.

use crate::core::types::label_set;
use crate::unpack::{input_size, UnpackFailure, UnpackResult, Unpacked};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Minimum size of a TZif header.
const HEADER_SIZE: u64 = 44;

pub fn unpack(input: &Path, offset: u64, unpack_dir: &Path) -> UnpackResult {
    let filesize = input_size(input, offset)?;
    if filesize - offset < HEADER_SIZE {
        return Err(UnpackFailure::rejected(offset, "not enough bytes"));
    }

    let file = File::open(input)
        .map_err(|e| UnpackFailure::rejected(offset, format!("cannot open input: {e}")))?;
    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(|e| UnpackFailure::rejected(offset, e.to_string()))?;

    let mut pos = offset;
    let version = parse_block(&mut reader, &mut pos, true, 4)?;

    if version == 0 {
        return finish(&mut reader, offset, pos - offset, unpack_dir, filesize);
    }

    // Version 2/3: a second header with 64-bit transition times.
    if pos + HEADER_SIZE > filesize {
        return Err(UnpackFailure::rejected(pos, "not enough data for version 2 header"));
    }
    let second_version = parse_block(&mut reader, &mut pos, false, 8)?;
    if second_version != version {
        return Err(UnpackFailure::rejected(pos, "versions in headers don't match"));
    }

    // Trailing POSIX-TZ environment style string between newlines.
    let mut byte = [0u8; 1];
    read_exact(&mut reader, &mut byte, pos)?;
    if byte[0] != b'\n' {
        return Err(UnpackFailure::rejected(pos, "wrong value for POSIX TZ string"));
    }
    pos += 1;
    loop {
        read_exact(&mut reader, &mut byte, pos)?;
        pos += 1;
        if byte[0] == b'\n' {
            break;
        }
        if !is_tz_string_byte(byte[0]) {
            return Err(UnpackFailure::rejected(pos, "invalid character in POSIX TZ string"));
        }
    }

    finish(&mut reader, offset, pos - offset, unpack_dir, filesize)
}

/// Parse one TZif header plus its data block. Returns the version.
///
/// `first` selects which version byte values are acceptable; `time_size` is
/// the width of a transition time (4 bytes in the v1 block, 8 in the v2).
fn parse_block<R: Read + Seek>(
    reader: &mut R,
    pos: &mut u64,
    first: bool,
    time_size: u64,
) -> Result<u8, UnpackFailure> {
    let mut magic = [0u8; 4];
    read_exact(reader, &mut magic, *pos)?;
    if &magic != b"TZif" {
        return Err(UnpackFailure::rejected(*pos, "invalid magic"));
    }
    *pos += 4;

    let mut version_byte = [0u8; 1];
    read_exact(reader, &mut version_byte, *pos)?;
    let version = match version_byte[0] {
        0x00 if first => 0,
        0x32 => 2,
        0x33 => 3,
        _ => return Err(UnpackFailure::rejected(*pos, "invalid version")),
    };
    *pos += 1;

    let mut reserved = [0u8; 15];
    read_exact(reader, &mut reserved, *pos)?;
    if reserved != [0u8; 15] {
        return Err(UnpackFailure::rejected(*pos, "reserved bytes not 0"));
    }
    *pos += 15;

    let ut_indicators = read_be_u32(reader, pos)? as u64;
    let standard_indicators = read_be_u32(reader, pos)? as u64;
    let leap_count = read_be_u32(reader, pos)? as u64;
    let transition_times = read_be_u32(reader, pos)? as u64;
    let local_times = read_be_u32(reader, pos)? as u64;
    if local_times == 0 {
        return Err(UnpackFailure::rejected(*pos, "local time count of 0 not permitted"));
    }
    let abbreviation_bytes = read_be_u32(reader, pos)? as u64;

    // transition times
    skip(reader, pos, transition_times * time_size, "transition times")?;

    // transition time indexes into the ttinfo table
    for _ in 0..transition_times {
        let mut index = [0u8; 1];
        read_exact(reader, &mut index, *pos)
            .map_err(|_| UnpackFailure::rejected(*pos, "not enough data for transition index"))?;
        *pos += 1;
        if index[0] as u64 > local_times {
            return Err(UnpackFailure::rejected(*pos, "invalid index for transition time"));
        }
    }

    // ttinfo entries: UTC offset, DST flag, abbreviation index
    for _ in 0..local_times {
        skip(reader, pos, 4, "ttinfo GMT offsets")?;
        let mut dst = [0u8; 1];
        read_exact(reader, &mut dst, *pos)
            .map_err(|_| UnpackFailure::rejected(*pos, "not enough data for ttinfo DST flag"))?;
        if dst[0] > 1 {
            return Err(UnpackFailure::rejected(*pos, "invalid value for ttinfo DST flag"));
        }
        *pos += 1;
        let mut abbrev = [0u8; 1];
        read_exact(reader, &mut abbrev, *pos).map_err(|_| {
            UnpackFailure::rejected(*pos, "not enough data for abbreviation index")
        })?;
        if abbrev[0] as u64 > abbreviation_bytes {
            return Err(UnpackFailure::rejected(*pos, "invalid value for abbreviation index"));
        }
        *pos += 1;
    }

    skip(reader, pos, abbreviation_bytes, "abbreviation strings")?;
    // leap second entries: occurrence time + correction
    skip(reader, pos, leap_count * (time_size + 4), "leap seconds")?;
    skip(reader, pos, standard_indicators, "standard indicators")?;
    skip(reader, pos, ut_indicators, "UT indicators")?;

    Ok(version)
}

fn finish<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    unpacked_size: u64,
    unpack_dir: &Path,
    filesize: u64,
) -> UnpackResult {
    let mut result = Unpacked::new(unpacked_size);
    if offset == 0 && unpacked_size == filesize {
        result.labels = label_set(["timezone", "resource"]);
        return Ok(result);
    }

    let out_path = unpack_dir.join("unpacked-from-timezone");
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(|e| UnpackFailure::rejected(offset, e.to_string()))?;
    let out_file = File::create(&out_path)
        .map_err(|e| UnpackFailure::fatal(offset, format!("cannot create output: {e}")))?;
    let mut writer = std::io::BufWriter::new(out_file);
    let mut remaining = unpacked_size;
    let mut buf = vec![0u8; 64 * 1024];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        reader
            .read_exact(&mut buf[..want])
            .map_err(|_| UnpackFailure::rejected(offset, "not enough data"))?;
        writer
            .write_all(&buf[..want])
            .map_err(|e| UnpackFailure::fatal(offset, format!("write failed: {e}")))?;
        remaining -= want as u64;
    }
    writer
        .flush()
        .map_err(|e| UnpackFailure::fatal(offset, format!("write failed: {e}")))?;

    result
        .files
        .push((out_path, label_set(["timezone", "resource", "unpacked"])));
    Ok(result)
}

/// Characters allowed in a POSIX TZ string: printable, no whitespace.
fn is_tz_string_byte(byte: u8) -> bool {
    byte.is_ascii_graphic()
}

fn read_be_u32<R: Read>(reader: &mut R, pos: &mut u64) -> Result<u32, UnpackFailure> {
    let mut bytes = [0u8; 4];
    read_exact(reader, &mut bytes, *pos)?;
    *pos += 4;
    Ok(u32::from_be_bytes(bytes))
}

fn skip<R: Read + Seek>(
    reader: &mut R,
    pos: &mut u64,
    count: u64,
    what: &str,
) -> Result<(), UnpackFailure> {
    // read rather than seek so truncation is detected
    let mut remaining = count;
    let mut buf = [0u8; 4096];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..want]).map_err(|_| {
            UnpackFailure::rejected(*pos, format!("not enough data for {what}"))
        })?;
        remaining -= want as u64;
    }
    *pos += count;
    Ok(())
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], pos: u64) -> Result<(), UnpackFailure> {
    reader
        .read_exact(buf)
        .map_err(|_| UnpackFailure::rejected(pos, "not enough data"))
}
