//! RIFF container verifier/carver, specialized for WebP, WAV and ANI.
//!
//! All three formats are RIFF files distinguished by the application header
//! at byte 8 and by the chunk FourCCs they may contain.

use crate::core::types::{label_set, LabelSet};
use crate::unpack::{input_size, UnpackFailure, UnpackResult, Unpacked};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub fn unpack_webp(input: &Path, offset: u64, unpack_dir: &Path) -> UnpackResult {
    // valid WebP chunk FourCCs, including the deprecated FRGM
    const CHUNKS: &[&[u8; 4]] = &[
        b"ALPH", b"ANIM", b"ANMF", b"EXIF", b"FRGM", b"ICCP", b"VP8 ", b"VP8L", b"VP8X", b"XMP ",
    ];
    unpack_riff(
        input,
        offset,
        unpack_dir,
        CHUNKS,
        b"WEBP",
        "webp",
        &["webp", "graphics"],
    )
}

pub fn unpack_wav(input: &Path, offset: u64, unpack_dir: &Path) -> UnpackResult {
    const CHUNKS: &[&[u8; 4]] = &[
        b"LGWV", b"bext", b"cue ", b"data", b"fact", b"fmt ", b"inst", b"labl", b"list", b"ltxt",
        b"note", b"plst", b"smpl",
    ];
    unpack_riff(
        input,
        offset,
        unpack_dir,
        CHUNKS,
        b"WAVE",
        "wav",
        &["wav", "audio"],
    )
}

pub fn unpack_ani(input: &Path, offset: u64, unpack_dir: &Path) -> UnpackResult {
    const CHUNKS: &[&[u8; 4]] = &[
        b"IART", b"ICON", b"INAM", b"LIST", b"anih", b"rate", b"seq ",
    ];
    unpack_riff(
        input,
        offset,
        unpack_dir,
        CHUNKS,
        b"ACON",
        "ani",
        &["ani", "graphics"],
    )
}

fn unpack_riff(
    input: &Path,
    offset: u64,
    unpack_dir: &Path,
    valid_chunks: &[&[u8; 4]],
    app_header: &[u8; 4],
    app_name: &str,
    format_labels: &[&str],
) -> UnpackResult {
    let filesize = input_size(input, offset)?;
    // RIFF magic + length + application header
    if filesize - offset < 12 {
        return Err(UnpackFailure::rejected(offset, "less than 12 bytes"));
    }

    let file = File::open(input)
        .map_err(|e| UnpackFailure::rejected(offset, format!("cannot open input: {e}")))?;
    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(|e| UnpackFailure::rejected(offset, e.to_string()))?;

    let mut header = [0u8; 12];
    read_exact(&mut reader, &mut header, offset)?;
    if &header[0..4] != b"RIFF" {
        return Err(UnpackFailure::rejected(offset, "no valid RIFF header"));
    }
    let riff_length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;
    if offset + riff_length + 8 > filesize {
        return Err(UnpackFailure::rejected(offset + 4, "wrong length"));
    }
    if &header[8..12] != app_header {
        return Err(UnpackFailure::rejected(
            offset + 8,
            format!("no valid {app_name} header"),
        ));
    }
    let mut unpacked_size: u64 = 12;

    // walk the chunks up to the declared end
    while unpacked_size != riff_length + 8 {
        let mut fourcc = [0u8; 4];
        read_exact(&mut reader, &mut fourcc, offset + unpacked_size)?;
        if !valid_chunks.contains(&&fourcc) {
            return Err(UnpackFailure::rejected(
                offset + unpacked_size,
                format!("no valid chunk FourCC {:?}", fourcc),
            ));
        }
        unpacked_size += 4;

        let mut length_bytes = [0u8; 4];
        read_exact(&mut reader, &mut length_bytes, offset + unpacked_size)?;
        let mut chunk_length = u32::from_le_bytes(length_bytes) as u64;
        // chunks are padded to even lengths with a single NUL
        let has_padding = chunk_length % 2 != 0;
        if has_padding {
            chunk_length += 1;
        }
        unpacked_size += 4;
        if offset + unpacked_size + chunk_length > filesize {
            return Err(UnpackFailure::rejected(offset + unpacked_size, "wrong chunk length"));
        }

        if has_padding {
            reader
                .seek(SeekFrom::Current(chunk_length as i64 - 1))
                .map_err(|e| UnpackFailure::rejected(offset + unpacked_size, e.to_string()))?;
            let mut pad = [0u8; 1];
            read_exact(&mut reader, &mut pad, offset + unpacked_size)?;
            if pad[0] != 0 {
                return Err(UnpackFailure::rejected(
                    offset + unpacked_size,
                    "wrong value for padding byte",
                ));
            }
        } else {
            reader
                .seek(SeekFrom::Current(chunk_length as i64))
                .map_err(|e| UnpackFailure::rejected(offset + unpacked_size, e.to_string()))?;
        }
        unpacked_size += chunk_length;

        if unpacked_size > riff_length + 8 {
            return Err(UnpackFailure::rejected(
                offset,
                "unpacked size does not match declared size",
            ));
        }
    }

    let mut result = Unpacked::new(unpacked_size);
    if offset == 0 && unpacked_size == filesize {
        result.labels = label_set(["riff"]);
        for label in format_labels {
            result.labels.insert((*label).to_string());
        }
        return Ok(result);
    }

    // carve the region; it is anonymous, so just give it a name
    let out_path = unpack_dir.join(format!("unpacked-{app_name}"));
    carve(&mut reader, offset, unpacked_size, &out_path)?;
    let mut file_labels: LabelSet = label_set(["unpacked"]);
    for label in format_labels {
        file_labels.insert((*label).to_string());
    }
    result.files.push((out_path, file_labels));
    Ok(result)
}

fn carve<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    length: u64,
    out_path: &Path,
) -> Result<(), UnpackFailure> {
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(|e| UnpackFailure::rejected(offset, e.to_string()))?;
    let out_file = File::create(out_path)
        .map_err(|e| UnpackFailure::fatal(offset, format!("cannot create output: {e}")))?;
    let mut writer = std::io::BufWriter::new(out_file);
    let mut remaining = length;
    let mut buf = vec![0u8; 512 * 1024];
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
        .map_err(|e| UnpackFailure::fatal(offset, format!("write failed: {e}")))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64) -> Result<(), UnpackFailure> {
    reader
        .read_exact(buf)
        .map_err(|_| UnpackFailure::rejected(offset, "no valid chunk header"))
}
