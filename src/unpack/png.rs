//! PNG verifier/carver.
//!
//! Walks the chunk structure per the W3C PNG specification: IHDR must come
//! first, at least one IDAT must be present, IEND terminates, and every
//! chunk CRC is verified. APNG control chunks add the `animated`/`apng`
//! labels.

use crate::core::types::label_set;
use crate::unpack::{input_size, UnpackFailure, UnpackResult, Unpacked};
use flate2::Crc;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Smallest possible PNG: magic + IHDR + IDAT + IEND.
const MIN_PNG_SIZE: u64 = 57;

pub fn unpack(input: &Path, offset: u64, unpack_dir: &Path) -> UnpackResult {
    let filesize = input_size(input, offset)?;
    if filesize - offset < MIN_PNG_SIZE {
        return Err(UnpackFailure::rejected(offset, "file too small"));
    }

    let file = File::open(input)
        .map_err(|e| UnpackFailure::rejected(offset, format!("cannot open input: {e}")))?;
    let mut reader = BufReader::new(file);
    // skip over the magic header bytes
    reader
        .seek(SeekFrom::Start(offset + 8))
        .map_err(|e| UnpackFailure::rejected(offset, e.to_string()))?;
    let mut unpacked_size: u64 = 8;

    // The first chunk has to be a 13-byte IHDR.
    let mut ihdr = [0u8; 25];
    read_exact(&mut reader, &mut ihdr, offset + unpacked_size)?;
    if ihdr[0..4] != [0x00, 0x00, 0x00, 0x0d] {
        return Err(UnpackFailure::rejected(offset + unpacked_size, "no valid chunk length"));
    }
    if &ihdr[4..8] != b"IHDR" {
        return Err(UnpackFailure::rejected(offset + unpacked_size, "no IHDR header"));
    }
    if chunk_crc(&ihdr[4..21]) != u32::from_be_bytes([ihdr[21], ihdr[22], ihdr[23], ihdr[24]]) {
        return Err(UnpackFailure::rejected(offset + unpacked_size, "wrong CRC"));
    }
    unpacked_size += 25;

    let mut idat_seen = false;
    let mut chunk_names: HashSet<[u8; 4]> = HashSet::new();
    let mut chunk_data = Vec::new();
    loop {
        let mut length_bytes = [0u8; 4];
        read_exact(&mut reader, &mut length_bytes, offset + unpacked_size)?;
        let chunk_size = u32::from_be_bytes(length_bytes) as u64;
        if offset + unpacked_size + 4 + 4 + chunk_size + 4 > filesize {
            return Err(UnpackFailure::rejected(
                offset + unpacked_size,
                "PNG data bigger than file",
            ));
        }
        unpacked_size += 4;

        chunk_data.resize(4 + chunk_size as usize, 0);
        read_exact(&mut reader, &mut chunk_data, offset + unpacked_size)?;
        let mut chunk_type = [0u8; 4];
        chunk_type.copy_from_slice(&chunk_data[0..4]);
        unpacked_size += 4 + chunk_size;

        let mut crc_bytes = [0u8; 4];
        read_exact(&mut reader, &mut crc_bytes, offset + unpacked_size)?;
        if chunk_crc(&chunk_data) != u32::from_be_bytes(crc_bytes) {
            return Err(UnpackFailure::rejected(offset + unpacked_size, "wrong CRC"));
        }
        unpacked_size += 4;

        chunk_names.insert(chunk_type);
        match &chunk_type {
            b"IEND" => break,
            b"IDAT" => idat_seen = true,
            _ => {}
        }
    }

    if !idat_seen {
        return Err(UnpackFailure::rejected(offset, "no IDAT found"));
    }

    let animated = chunk_names.contains(b"acTL")
        && chunk_names.contains(b"fcTL")
        && chunk_names.contains(b"fdAT");

    let mut result = Unpacked::new(unpacked_size);
    if offset == 0 && unpacked_size == filesize {
        result.labels = label_set(["png", "graphics"]);
        if animated {
            result.labels.insert("animated".into());
            result.labels.insert("apng".into());
        }
        return Ok(result);
    }

    // Carve the region; the image is anonymous, so give it a fixed name.
    let out_path = unpack_dir.join("unpacked.png");
    carve(&mut reader, offset, unpacked_size, &out_path)?;
    let mut file_labels = label_set(["png", "graphics", "unpacked"]);
    if animated {
        file_labels.insert("animated".into());
        file_labels.insert("apng".into());
    }
    result.files.push((out_path, file_labels));
    Ok(result)
}

/// CRC-32 over chunk type + data, as stored in the chunk trailer.
fn chunk_crc(bytes: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(bytes);
    crc.sum()
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
        .map_err(|_| UnpackFailure::rejected(offset, "not enough data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unpack::test_fixtures::minimal_png;

    #[test]
    fn test_valid_png_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = minimal_png();
        let input = dir.path().join("image.png");
        std::fs::write(&input, &data).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let unpacked = unpack(&input, 0, &out_dir).unwrap();
        assert_eq!(unpacked.consumed, data.len() as u64);
        assert!(unpacked.labels.contains("png"));
        assert!(unpacked.labels.contains("graphics"));
        // whole-file verification produces no children
        assert!(unpacked.files.is_empty());
    }

    #[test]
    fn test_png_carved_from_larger_file() {
        let dir = tempfile::tempdir().unwrap();
        let png = minimal_png();
        let mut data = png.clone();
        data.extend_from_slice(b"trailing data after the image");
        let input = dir.path().join("blob.bin");
        std::fs::write(&input, &data).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let unpacked = unpack(&input, 0, &out_dir).unwrap();
        assert_eq!(unpacked.consumed, png.len() as u64);
        assert!(unpacked.labels.is_empty());
        assert_eq!(unpacked.files.len(), 1);
        let (path, labels) = &unpacked.files[0];
        assert!(path.ends_with("unpacked.png"));
        assert!(labels.contains("unpacked"));
        assert_eq!(std::fs::read(path).unwrap(), png);
    }

    #[test]
    fn test_png_with_bad_crc_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = minimal_png();
        let last = data.len() - 5;
        data[last] ^= 0xff;
        let input = dir.path().join("broken.png");
        std::fs::write(&input, &data).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let failure = unpack(&input, 0, &out_dir).unwrap_err();
        assert!(!failure.fatal);
    }

    #[test]
    fn test_truncated_png_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = minimal_png();
        let input = dir.path().join("short.png");
        std::fs::write(&input, &data[..data.len() - 8]).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        assert!(unpack(&input, 0, &out_dir).is_err());
    }
}
