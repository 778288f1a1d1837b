pub mod error;
pub mod codec;
pub mod block;
pub mod layout;
pub mod index;
pub mod content;
pub mod extract;
pub mod build;

pub use error::{ArchiveError, Result};
pub use codec::{Algorithm, CodecError};
pub use block::{BlockHeader, encode_block, decode_block, is_block};
pub use index::{ArchiveEntry, ArchiveIndex};
pub use content::ContentKind;
pub use extract::{Extractor, ExtractOptions, ExtractReport, EntrySink, DirectorySink};
pub use build::{build_archive, BuildOptions, BuildReport, SourceFile};
