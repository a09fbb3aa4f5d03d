//! The signature registry: byte anchors mapped to format unpackers.
//!
//! Loaded once at startup and read-only afterwards, so workers share it
//! without synchronization.

use aho_corasick::AhoCorasick;

/// The format handlers a signature can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnpackerKind {
    Gzip,
    Lzma,
    Xz,
    Png,
    Tar,
    Timezone,
    Webp,
    Wav,
    Ani,
}

/// A named byte anchor.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    /// Unique registry key.
    pub key: &'static str,
    /// Literal byte pattern to search for.
    pub pattern: &'static [u8],
    /// Position of the pattern within a recognized file (e.g. 0x101 for
    /// tar's ustar magic).
    pub intra_offset: u64,
    /// Display name; several signatures may share one (the LZMA
    /// dictionary-size variants, the two tar flavours).
    pub name: &'static str,
    /// Bound format handler.
    pub unpacker: UnpackerKind,
}

/// Every known signature.
pub const SIGNATURES: &[Signature] = &[
    Signature {
        key: "ani",
        pattern: b"ACON",
        intra_offset: 8,
        name: "ani",
        unpacker: UnpackerKind::Ani,
    },
    Signature {
        key: "gzip",
        pattern: &[0x1f, 0x8b, 0x08],
        intra_offset: 0,
        name: "gzip",
        unpacker: UnpackerKind::Gzip,
    },
    Signature {
        key: "lzma_var1",
        pattern: &[0x5d, 0x00, 0x00],
        intra_offset: 0,
        name: "lzma",
        unpacker: UnpackerKind::Lzma,
    },
    Signature {
        key: "lzma_var2",
        pattern: &[0x6d, 0x00, 0x00],
        intra_offset: 0,
        name: "lzma",
        unpacker: UnpackerKind::Lzma,
    },
    Signature {
        key: "lzma_var3",
        pattern: &[0x6c, 0x00, 0x00],
        intra_offset: 0,
        name: "lzma",
        unpacker: UnpackerKind::Lzma,
    },
    Signature {
        key: "png",
        pattern: &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a],
        intra_offset: 0,
        name: "png",
        unpacker: UnpackerKind::Png,
    },
    Signature {
        key: "tar_gnu",
        pattern: &[b'u', b's', b't', b'a', b'r', 0x20, 0x20, 0x00],
        intra_offset: 0x101,
        name: "tar",
        unpacker: UnpackerKind::Tar,
    },
    Signature {
        key: "tar_posix",
        pattern: &[b'u', b's', b't', b'a', b'r', 0x00],
        intra_offset: 0x101,
        name: "tar",
        unpacker: UnpackerKind::Tar,
    },
    Signature {
        key: "timezone",
        pattern: b"TZif",
        intra_offset: 0,
        name: "timezone",
        unpacker: UnpackerKind::Timezone,
    },
    Signature {
        key: "wav",
        pattern: b"WAVE",
        intra_offset: 8,
        name: "wav",
        unpacker: UnpackerKind::Wav,
    },
    Signature {
        key: "webp",
        pattern: b"WEBP",
        intra_offset: 8,
        name: "webp",
        unpacker: UnpackerKind::Webp,
    },
    Signature {
        key: "xz",
        pattern: &[0xfd, b'7', b'z', b'X', b'Z', 0x00],
        intra_offset: 0,
        name: "xz",
        unpacker: UnpackerKind::Xz,
    },
];

/// Immutable signature catalogue plus the multi-pattern automaton and the
/// derived sliding-window constants.
pub struct SignatureRegistry {
    signatures: Vec<Signature>,
    automaton: AhoCorasick,
    max_pattern_len: usize,
    overlap: usize,
}

impl SignatureRegistry {
    /// Build the registry over the full signature set.
    pub fn new() -> Self {
        Self::with_signatures(SIGNATURES.to_vec())
    }

    /// Build the registry over a restricted signature set.
    pub fn with_signatures(signatures: Vec<Signature>) -> Self {
        assert!(!signatures.is_empty(), "registry needs at least one signature");
        let automaton = AhoCorasick::new(signatures.iter().map(|s| s.pattern))
            .expect("signature patterns are valid");
        let max_pattern_len = signatures.iter().map(|s| s.pattern.len()).max().unwrap_or(0);
        let max_intra_offset = signatures
            .iter()
            .map(|s| s.intra_offset as usize)
            .max()
            .unwrap_or(0);
        // A pattern at the deepest intra-offset must fit inside the overlap
        // region, or anchors straddling a chunk boundary are missed.
        let overlap = max_intra_offset + max_pattern_len;
        Self {
            signatures,
            automaton,
            max_pattern_len,
            overlap,
        }
    }

    /// Build the registry from a subset of keys of the full set.
    pub fn with_keys(keys: &[&str]) -> Self {
        Self::with_signatures(
            SIGNATURES
                .iter()
                .filter(|s| keys.contains(&s.key))
                .copied()
                .collect(),
        )
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn get(&self, index: usize) -> &Signature {
        &self.signatures[index]
    }

    pub fn max_pattern_len(&self) -> usize {
        self.max_pattern_len
    }

    /// Overlap carried between consecutive sliding-window chunks.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Every occurrence of every pattern in `chunk`, as
    /// `(signature index, chunk-local position)` pairs.
    pub fn find_anchors<'a>(
        &'a self,
        chunk: &'a [u8],
    ) -> impl Iterator<Item = (usize, usize)> + 'a {
        self.automaton
            .find_overlapping_iter(chunk)
            .map(|m| (m.pattern().as_usize(), m.start()))
    }
}

impl Default for SignatureRegistry {
    fn default() -> Self {
        Self::new()
    }
}
