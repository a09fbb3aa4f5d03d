//! LZMA-alone and XZ unpackers.
//!
//! Both formats share one streaming decode loop; they differ only in the
//! decoder construction, the output naming and the header sanity checks.
//! LZMA has many false positives (the anchor is just the properties byte
//! plus two dictionary-size bytes), so the declared uncompressed size in
//! the 13-byte header is vetted before any decoding starts.

use crate::core::types::{label_set, LabelSet};
use crate::unpack::{input_size, UnpackFailure, UnpackResult, Unpacked};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use xz2::stream::{Action, Status, Stream};

/// I/O read/write buffer size.
const IO_CHUNK: usize = 512 * 1024;

/// XZ Utils cannot create or unpack files of 256 GiB or more.
const MAX_DECLARED_SIZE: u64 = 274_877_906_944;

pub fn unpack_lzma(input: &Path, offset: u64, unpack_dir: &Path) -> UnpackResult {
    let filesize = input_size(input, offset)?;
    if filesize - offset < 13 {
        return Err(UnpackFailure::rejected(offset, "not enough bytes"));
    }

    // The last 8 header bytes declare the uncompressed size; 0xff * 8 means
    // "streamed" with an end marker instead.
    let mut file = File::open(input)
        .map_err(|e| UnpackFailure::rejected(offset, format!("cannot open input: {e}")))?;
    file.seek(SeekFrom::Start(offset + 5))
        .map_err(|e| UnpackFailure::rejected(offset, e.to_string()))?;
    let mut size_bytes = [0u8; 8];
    file.read_exact(&mut size_bytes)
        .map_err(|_| UnpackFailure::rejected(offset, "not enough bytes"))?;

    let declared_size = if size_bytes == [0xff; 8] {
        None
    } else {
        let size = u64::from_le_bytes(size_bytes);
        if size == 0 {
            return Err(UnpackFailure::rejected(offset, "declared size 0"));
        }
        if size > MAX_DECLARED_SIZE {
            return Err(UnpackFailure::rejected(offset, "declared size too big"));
        }
        Some(size)
    };

    let stream = Stream::new_lzma_decoder(u64::MAX)
        .map_err(|e| UnpackFailure::rejected(offset, format!("decoder init failed: {e}")))?;
    let unpacked = decode_stream(input, offset, unpack_dir, stream, "lzma", ".lzma")?;

    if let Some(expected) = declared_size {
        let actual = unpacked
            .files
            .first()
            .and_then(|(path, _)| std::fs::metadata(path).ok())
            .map(|m| m.len());
        if actual != Some(expected) {
            return Err(UnpackFailure::rejected(
                offset,
                "length of unpacked LZMA data does not correspond with header",
            ));
        }
    }
    Ok(unpacked)
}

pub fn unpack_xz(input: &Path, offset: u64, unpack_dir: &Path) -> UnpackResult {
    let stream = Stream::new_stream_decoder(u64::MAX, 0)
        .map_err(|e| UnpackFailure::rejected(offset, format!("decoder init failed: {e}")))?;
    decode_stream(input, offset, unpack_dir, stream, "xz", ".xz")
}

fn decode_stream(
    input: &Path,
    offset: u64,
    unpack_dir: &Path,
    mut stream: Stream,
    format: &str,
    extension: &str,
) -> UnpackResult {
    let filesize = input_size(input, offset)?;
    let file = File::open(input)
        .map_err(|e| UnpackFailure::rejected(offset, format!("cannot open input: {e}")))?;
    let mut reader = BufReader::with_capacity(IO_CHUNK, file);
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(|e| UnpackFailure::rejected(offset, e.to_string()))?;

    let out_path = unpack_dir.join(output_name(input, format, extension));
    let out_file = File::create(&out_path)
        .map_err(|e| UnpackFailure::fatal(offset, format!("cannot create output: {e}")))?;
    let mut writer = BufWriter::new(out_file);

    let mut in_buf = vec![0u8; IO_CHUNK];
    let mut out_buf = vec![0u8; IO_CHUNK];
    let mut in_len = 0usize;
    let mut in_pos = 0usize;
    let mut hit_eof = false;
    let mut out_size: u64 = 0;

    loop {
        if in_pos == in_len && !hit_eof {
            in_len = reader
                .read(&mut in_buf)
                .map_err(|e| UnpackFailure::rejected(offset, e.to_string()))?;
            in_pos = 0;
            hit_eof = in_len == 0;
        }
        let action = if hit_eof && in_pos == in_len {
            Action::Finish
        } else {
            Action::Run
        };
        let before_in = stream.total_in();
        let before_out = stream.total_out();
        let status = stream
            .process(&in_buf[in_pos..in_len], &mut out_buf, action)
            .map_err(|_| UnpackFailure::rejected(offset, format!("not valid {format} data")))?;
        let used = (stream.total_in() - before_in) as usize;
        let produced = (stream.total_out() - before_out) as usize;
        in_pos += used;
        if produced > 0 {
            writer
                .write_all(&out_buf[..produced])
                .map_err(|e| UnpackFailure::fatal(offset, format!("write failed: {e}")))?;
            out_size += produced as u64;
        }
        match status {
            Status::StreamEnd => break,
            _ => {
                if used == 0 && produced == 0 && hit_eof && in_pos == in_len {
                    return Err(UnpackFailure::rejected(
                        offset,
                        format!("truncated {format} data"),
                    ));
                }
            }
        }
    }
    writer
        .flush()
        .map_err(|e| UnpackFailure::fatal(offset, format!("write failed: {e}")))?;

    // Decoders accept zero-length members; treat them as bogus data.
    if out_size == 0 {
        return Err(UnpackFailure::rejected(
            offset,
            format!("not a valid {format} file"),
        ));
    }

    let consumed = stream.total_in();
    let mut result = Unpacked::new(consumed);
    result.files.push((out_path, LabelSet::new()));
    if offset == 0 && consumed == filesize {
        result.labels = label_set([format, "compressed"]);
    }
    Ok(result)
}

fn output_name(input: &Path, format: &str, extension: &str) -> String {
    match input.file_name().and_then(|n| n.to_str()) {
        Some(name)
            if name.len() > extension.len()
                && name.to_lowercase().ends_with(extension) =>
        {
            name[..name.len() - extension.len()].to_string()
        }
        _ => format!("unpacked-from-{format}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xz2::stream::LzmaOptions;
    use xz2::write::XzEncoder;

    fn xz_bytes(payload: &[u8]) -> Vec<u8> {
        let mut encoder = XzEncoder::new(Vec::new(), 6);
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap()
    }

    fn lzma_bytes(payload: &[u8]) -> Vec<u8> {
        let options = LzmaOptions::new_preset(6).unwrap();
        let stream = Stream::new_lzma_encoder(&options).unwrap();
        let mut encoder = XzEncoder::new_stream(Vec::new(), stream);
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_xz_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = xz_bytes(b"xz payload");
        let input = dir.path().join("data.xz");
        std::fs::write(&input, &data).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let unpacked = unpack_xz(&input, 0, &out_dir).unwrap();
        assert_eq!(unpacked.consumed, data.len() as u64);
        assert!(unpacked.labels.contains("xz"));
        assert_eq!(std::fs::read(&unpacked.files[0].0).unwrap(), b"xz payload");
        assert!(unpacked.files[0].0.ends_with("data"));
    }

    #[test]
    fn test_lzma_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = lzma_bytes(b"lzma payload");
        // preset 6 yields the classic 0x5d properties byte
        assert_eq!(data[0], 0x5d);
        let input = dir.path().join("blob.bin");
        std::fs::write(&input, &data).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let unpacked = unpack_lzma(&input, 0, &out_dir).unwrap();
        assert_eq!(unpacked.consumed, data.len() as u64);
        assert!(unpacked.labels.contains("lzma"));
        assert_eq!(
            std::fs::read(&unpacked.files[0].0).unwrap(),
            b"lzma payload"
        );
        assert!(unpacked.files[0].0.ends_with("unpacked-from-lzma"));
    }

    #[test]
    fn test_xz_with_trailing_data() {
        let dir = tempfile::tempdir().unwrap();
        let member = xz_bytes(b"payload");
        let mut data = member.clone();
        data.extend_from_slice(b"trailing bytes");
        let input = dir.path().join("blob.bin");
        std::fs::write(&input, &data).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let unpacked = unpack_xz(&input, 0, &out_dir).unwrap();
        assert_eq!(unpacked.consumed, member.len() as u64);
        assert!(unpacked.labels.is_empty());
    }

    #[test]
    fn test_lzma_rejects_declared_size_zero() {
        let dir = tempfile::tempdir().unwrap();
        // properties + dict size, then an explicit zero size field
        let mut data = vec![0x5d, 0x00, 0x00, 0x80, 0x00];
        data.extend_from_slice(&[0u8; 8]);
        data.extend_from_slice(&[0x41u8; 32]);
        let input = dir.path().join("blob.bin");
        std::fs::write(&input, &data).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let failure = unpack_lzma(&input, 0, &out_dir).unwrap_err();
        assert!(failure.reason.contains("declared size 0"));
        assert!(!failure.fatal);
    }

    #[test]
    fn test_lzma_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = vec![0x5d, 0x00, 0x00];
        data.extend_from_slice(&[0xff; 8]);
        data.extend_from_slice(&[0x13, 0x37, 0x13, 0x37, 0x13, 0x37, 0x13, 0x37]);
        let input = dir.path().join("blob.bin");
        std::fs::write(&input, &data).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        assert!(unpack_lzma(&input, 0, &out_dir).is_err());
    }
}
