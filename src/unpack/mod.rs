//! Format unpackers and the contract they satisfy.
//!
//! Every handler has the same shape: given the input file, a candidate
//! offset, a fresh target directory and a scratch directory, it either
//! claims a byte range (and possibly writes extracted files into the target
//! directory) or reports why the candidate is not its format. Handlers never
//! modify the input file. On failure, partial output is left in place; the
//! dispatcher removes the attempt directory.

use crate::core::types::LabelSet;
use crate::signatures::UnpackerKind;
use std::path::{Path, PathBuf};

pub mod gzip;
pub mod lzma;
pub mod png;
pub mod riff;
pub mod tar;
pub mod tzfile;

/// A successful unpack: the claimed range and what came out of it.
#[derive(Debug)]
pub struct Unpacked {
    /// Bytes owned by this format, starting at the candidate offset.
    pub consumed: u64,
    /// Extracted files (absolute paths under the target directory) with the
    /// labels the handler attaches to each.
    pub files: Vec<(PathBuf, LabelSet)>,
    /// Labels contributed to the *parent* file. Only merged when the format
    /// spans the whole file from offset 0.
    pub labels: LabelSet,
}

impl Unpacked {
    pub fn new(consumed: u64) -> Self {
        Self {
            consumed,
            files: Vec::new(),
            labels: LabelSet::new(),
        }
    }
}

/// A rejected candidate.
#[derive(Debug)]
pub struct UnpackFailure {
    /// Offset at which the violation was detected.
    pub offset: u64,
    /// Human readable description.
    pub reason: String,
    /// True for environment errors (disk full and kin) as opposed to format
    /// violations. Recorded in the run log; does not abort the run.
    pub fatal: bool,
}

impl UnpackFailure {
    /// A format violation: the candidate is not this format.
    pub fn rejected(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
            fatal: false,
        }
    }

    /// An environment error encountered mid-unpack.
    pub fn fatal(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
            fatal: true,
        }
    }
}

/// The verdict every handler returns.
pub type UnpackResult = std::result::Result<Unpacked, UnpackFailure>;

/// Dispatch a candidate to the handler bound to its signature.
pub fn run_unpacker(
    kind: UnpackerKind,
    input: &Path,
    offset: u64,
    unpack_dir: &Path,
    _temp_dir: &Path,
) -> UnpackResult {
    match kind {
        UnpackerKind::Gzip => gzip::unpack(input, offset, unpack_dir),
        UnpackerKind::Lzma => lzma::unpack_lzma(input, offset, unpack_dir),
        UnpackerKind::Xz => lzma::unpack_xz(input, offset, unpack_dir),
        UnpackerKind::Png => png::unpack(input, offset, unpack_dir),
        UnpackerKind::Tar => tar::unpack(input, offset, unpack_dir),
        UnpackerKind::Timezone => tzfile::unpack(input, offset, unpack_dir),
        UnpackerKind::Webp => riff::unpack_webp(input, offset, unpack_dir),
        UnpackerKind::Wav => riff::unpack_wav(input, offset, unpack_dir),
        UnpackerKind::Ani => riff::unpack_ani(input, offset, unpack_dir),
    }
}

/// File size, or a rejection when the input cannot be stat'ed.
pub(crate) fn input_size(input: &Path, offset: u64) -> Result<u64, UnpackFailure> {
    std::fs::metadata(input)
        .map(|m| m.len())
        .map_err(|e| UnpackFailure::rejected(offset, format!("cannot stat input: {e}")))
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use flate2::write::ZlibEncoder;
    use flate2::{Compression, Crc};
    use std::io::Write;

    fn chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        let mut crc = Crc::new();
        crc.update(kind);
        crc.update(data);
        out.extend_from_slice(&crc.sum().to_be_bytes());
        out
    }

    /// A structurally valid 1x1 grayscale PNG.
    pub fn minimal_png() -> Vec<u8> {
        let mut out = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        // width 1, height 1, depth 8, grayscale, deflate, adaptive, no interlace
        let ihdr = [0, 0, 0, 1, 0, 0, 0, 1, 8, 0, 0, 0, 0];
        out.extend_from_slice(&chunk(b"IHDR", &ihdr));
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        // one scanline: filter byte + one pixel
        encoder.write_all(&[0u8, 0u8]).unwrap();
        let idat = encoder.finish().unwrap();
        out.extend_from_slice(&chunk(b"IDAT", &idat));
        out.extend_from_slice(&chunk(b"IEND", &[]));
        out
    }
}
