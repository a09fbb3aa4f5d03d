//! gzip (RFC 1952) unpacker.
//!
//! The header is parsed by hand because the compressed member may be
//! followed by arbitrary trailing data, and the consumed length has to be
//! known exactly: magic, flags and the optional EXTRA/NAME/COMMENT/HCRC
//! fields, then raw DEFLATE, then the CRC-32/ISIZE trailer.

use crate::core::types::{label_set, LabelSet};
use crate::unpack::{input_size, UnpackFailure, UnpackResult, Unpacked};
use flate2::{Crc, Decompress, FlushDecompress, Status};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

const FLAG_FHCRC: u8 = 1 << 1;
const FLAG_FEXTRA: u8 = 1 << 2;
const FLAG_FNAME: u8 = 1 << 3;
const FLAG_FCOMMENT: u8 = 1 << 4;

/// I/O read/write buffer size.
const IO_CHUNK: usize = 512 * 1024;

pub fn unpack(input: &Path, offset: u64, unpack_dir: &Path) -> UnpackResult {
    let filesize = input_size(input, offset)?;
    // fixed header (10) plus CRC-32 and ISIZE (8)
    if filesize - offset < 18 {
        return Err(UnpackFailure::rejected(offset, "not enough data"));
    }

    let file = File::open(input)
        .map_err(|e| UnpackFailure::rejected(offset, format!("cannot open input: {e}")))?;
    let mut reader = BufReader::with_capacity(IO_CHUNK, file);
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(|e| UnpackFailure::rejected(offset, format!("seek failed: {e}")))?;

    let mut header = [0u8; 10];
    read_exact(&mut reader, &mut header, offset)?;
    if header[0] != 0x1f || header[1] != 0x8b || header[2] != 0x08 {
        return Err(UnpackFailure::rejected(offset, "no valid gzip header"));
    }
    let flags = header[3];
    if flags & 0xe0 != 0 {
        return Err(UnpackFailure::rejected(offset + 3, "reserved flag bits set"));
    }
    let mut unpacked_size: u64 = 10;

    if flags & FLAG_FEXTRA != 0 {
        let mut xlen_bytes = [0u8; 2];
        read_exact(&mut reader, &mut xlen_bytes, offset + unpacked_size)?;
        let xlen = u16::from_le_bytes(xlen_bytes) as u64;
        if offset + unpacked_size + 2 + xlen > filesize {
            return Err(UnpackFailure::rejected(
                offset + unpacked_size,
                "extra data outside of file",
            ));
        }
        reader
            .seek(SeekFrom::Current(xlen as i64))
            .map_err(|e| UnpackFailure::rejected(offset + unpacked_size, e.to_string()))?;
        unpacked_size += 2 + xlen;
    }

    let mut original_name = None;
    if flags & FLAG_FNAME != 0 {
        let name = read_null_terminated(&mut reader, offset + unpacked_size)?;
        unpacked_size += name.len() as u64 + 1;
        if !name.is_empty() {
            original_name = Some(name);
        }
    }

    if flags & FLAG_FCOMMENT != 0 {
        let comment = read_null_terminated(&mut reader, offset + unpacked_size)?;
        unpacked_size += comment.len() as u64 + 1;
    }

    if flags & FLAG_FHCRC != 0 {
        reader
            .seek(SeekFrom::Current(2))
            .map_err(|e| UnpackFailure::rejected(offset + unpacked_size, e.to_string()))?;
        unpacked_size += 2;
    }

    // Decide the output name the way gunzip would; a name recorded in the
    // header wins once decompression succeeds.
    let out_name = default_output_name(input);
    let out_path = unpack_dir.join(&out_name);
    let out_file = File::create(&out_path)
        .map_err(|e| UnpackFailure::fatal(offset + unpacked_size, format!("cannot create output: {e}")))?;
    let mut writer = BufWriter::new(out_file);

    // Raw DEFLATE follows; track consumed input so trailing data after the
    // member is not claimed.
    let mut decompressor = Decompress::new(false);
    let mut crc = Crc::new();
    let mut out_size: u64 = 0;
    let mut in_buf = vec![0u8; IO_CHUNK];
    let mut out_buf = vec![0u8; IO_CHUNK];
    let mut in_len = 0usize;
    let mut in_pos = 0usize;
    let mut hit_eof = false;

    loop {
        if in_pos == in_len && !hit_eof {
            in_len = reader
                .read(&mut in_buf)
                .map_err(|e| UnpackFailure::rejected(offset + unpacked_size, e.to_string()))?;
            in_pos = 0;
            hit_eof = in_len == 0;
        }
        let before_in = decompressor.total_in();
        let before_out = decompressor.total_out();
        let status = decompressor
            .decompress(&in_buf[in_pos..in_len], &mut out_buf, FlushDecompress::None)
            .map_err(|_| {
                UnpackFailure::rejected(offset + unpacked_size, "not a valid gzip file")
            })?;
        let used = (decompressor.total_in() - before_in) as usize;
        let produced = (decompressor.total_out() - before_out) as usize;
        in_pos += used;
        if produced > 0 {
            writer.write_all(&out_buf[..produced]).map_err(|e| {
                UnpackFailure::fatal(offset + unpacked_size, format!("write failed: {e}"))
            })?;
            crc.update(&out_buf[..produced]);
            out_size += produced as u64;
        }
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if used == 0 && produced == 0 && hit_eof {
                    return Err(UnpackFailure::rejected(
                        offset + unpacked_size,
                        "truncated gzip data",
                    ));
                }
            }
        }
    }
    writer
        .flush()
        .map_err(|e| UnpackFailure::fatal(offset + unpacked_size, format!("write failed: {e}")))?;
    unpacked_size += decompressor.total_in();

    // CRC-32 and ISIZE trailer (RFC 1952, section 2.3.1).
    if filesize - (offset + unpacked_size) < 8 {
        return Err(UnpackFailure::rejected(offset + unpacked_size, "no CRC and ISIZE"));
    }
    reader
        .seek(SeekFrom::Start(offset + unpacked_size))
        .map_err(|e| UnpackFailure::rejected(offset + unpacked_size, e.to_string()))?;
    let mut trailer = [0u8; 8];
    read_exact(&mut reader, &mut trailer, offset + unpacked_size)?;
    let stored_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let stored_isize = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
    unpacked_size += 8;

    if stored_crc != crc.sum() {
        return Err(UnpackFailure::rejected(offset + unpacked_size, "wrong CRC"));
    }
    if stored_isize != (out_size & 0xffff_ffff) as u32 {
        return Err(UnpackFailure::rejected(
            offset + unpacked_size,
            "wrong value for ISIZE",
        ));
    }

    // Prefer the name stored in the member, basename only.
    let mut final_path = out_path;
    if let Some(name) = original_name.as_deref().and_then(sanitize_member_name) {
        if name != out_name {
            let renamed = unpack_dir.join(&name);
            if std::fs::rename(&final_path, &renamed).is_ok() {
                final_path = renamed;
            }
        }
    }

    let mut result = Unpacked::new(unpacked_size);
    result.files.push((final_path, LabelSet::new()));
    if offset == 0 && unpacked_size == filesize {
        result.labels = label_set(["gzip", "compressed"]);
    }
    Ok(result)
}

fn default_output_name(input: &Path) -> String {
    match input.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.len() > 3 && name.ends_with(".gz") => {
            name[..name.len() - 3].to_string()
        }
        _ => "unpacked-from-gz".to_string(),
    }
}

/// Reduce a header-recorded file name to a safe basename.
fn sanitize_member_name(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let base = text.rsplit(['/', '\\']).next()?;
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64) -> Result<(), UnpackFailure> {
    reader
        .read_exact(buf)
        .map_err(|_| UnpackFailure::rejected(offset, "not enough data"))
}

fn read_null_terminated<R: Read>(reader: &mut R, offset: u64) -> Result<Vec<u8>, UnpackFailure> {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        read_exact(reader, &mut byte, offset)?;
        if byte[0] == 0 {
            return Ok(out);
        }
        out.push(byte[0]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn gzip_bytes(payload: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_unpack_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = gzip_bytes(b"hello gzip world");
        let input = dir.path().join("data.gz");
        std::fs::write(&input, &data).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let unpacked = unpack(&input, 0, &out_dir).unwrap();
        assert_eq!(unpacked.consumed, data.len() as u64);
        assert!(unpacked.labels.contains("gzip"));
        assert!(unpacked.labels.contains("compressed"));
        assert_eq!(unpacked.files.len(), 1);
        assert_eq!(
            std::fs::read(&unpacked.files[0].0).unwrap(),
            b"hello gzip world"
        );
        // `.gz` suffix stripped for the output name
        assert!(unpacked.files[0].0.ends_with("data"));
    }

    #[test]
    fn test_unpack_with_trailing_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let member = gzip_bytes(b"payload");
        let mut data = member.clone();
        data.extend_from_slice(b"GARBAGE AFTER THE STREAM");
        let input = dir.path().join("blob.bin");
        std::fs::write(&input, &data).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let unpacked = unpack(&input, 0, &out_dir).unwrap();
        assert_eq!(unpacked.consumed, member.len() as u64);
        // not the whole file: no parent labels
        assert!(unpacked.labels.is_empty());
        assert!(unpacked.files[0].0.ends_with("unpacked-from-gz"));
    }

    #[test]
    fn test_unpack_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let member = gzip_bytes(b"embedded");
        let mut data = vec![0xAAu8; 16];
        data.extend_from_slice(&member);
        let input = dir.path().join("blob.bin");
        std::fs::write(&input, &data).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let unpacked = unpack(&input, 16, &out_dir).unwrap();
        assert_eq!(unpacked.consumed, member.len() as u64);
        assert_eq!(std::fs::read(&unpacked.files[0].0).unwrap(), b"embedded");
    }

    #[test]
    fn test_reject_corrupt_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = gzip_bytes(b"soon to be broken payload data");
        let mid = data.len() / 2;
        data[mid] ^= 0xff;
        data[mid + 1] ^= 0xff;
        let input = dir.path().join("broken.gz");
        std::fs::write(&input, &data).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        assert!(unpack(&input, 0, &out_dir).is_err());
    }

    #[test]
    fn test_reject_truncated_stream() {
        let dir = tempfile::tempdir().unwrap();
        let data = gzip_bytes(b"some reasonably long payload for truncation");
        let input = dir.path().join("short.gz");
        std::fs::write(&input, &data[..data.len() - 12]).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        assert!(unpack(&input, 0, &out_dir).is_err());
    }

    #[test]
    fn test_sanitize_member_name() {
        assert_eq!(sanitize_member_name(b"file.txt"), Some("file.txt".into()));
        assert_eq!(
            sanitize_member_name(b"../../etc/passwd"),
            Some("passwd".into())
        );
        assert_eq!(sanitize_member_name(b"dir/"), None);
        assert_eq!(sanitize_member_name(b".."), None);
    }
}
