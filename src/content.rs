//! Four-byte signature sniffing for extracted entries.

use serde::Serialize;

use crate::block::BLOCK_MAGIC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Tabular game data (`BDAT`).
    Bdat,
    Dds,
    Png,
    /// A nested xbc1 container.
    Block,
    Unknown,
    /// The entry claimed to be a block but could not be decoded.
    Failed,
}

const SIGNATURES: &[(&[u8; 4], ContentKind)] = &[
    (b"BDAT", ContentKind::Bdat),
    (b"DDS ", ContentKind::Dds),
    (b"\x89PNG", ContentKind::Png),
    (BLOCK_MAGIC, ContentKind::Block),
];

impl ContentKind {
    pub fn sniff(bytes: &[u8]) -> Self {
        SIGNATURES
            .iter()
            .find(|(sig, _)| bytes.starts_with(&sig[..]))
            .map(|&(_, kind)| kind)
            .unwrap_or(ContentKind::Unknown)
    }

    /// Extension used when naming output files.
    pub fn extension(self) -> &'static str {
        match self {
            ContentKind::Bdat    => "bdat",
            ContentKind::Dds     => "dds",
            ContentKind::Png     => "png",
            ContentKind::Block   => "xbc1",
            ContentKind::Unknown => "dec",
            ContentKind::Failed  => "failed",
        }
    }

    /// Parse a filter name; accepts the kind name or its extension.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim_start_matches('.').to_lowercase().as_str() {
            "bdat"               => Some(ContentKind::Bdat),
            "dds"                => Some(ContentKind::Dds),
            "png"                => Some(ContentKind::Png),
            "block" | "xbc1"     => Some(ContentKind::Block),
            "unknown" | "dec"    => Some(ContentKind::Unknown),
            "failed"             => Some(ContentKind::Failed),
            _                    => None,
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}
