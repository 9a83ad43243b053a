pub mod walker;
pub mod metadata;
pub mod frontmatter;
pub mod blocks;
pub mod incremental;
pub mod diff;
pub mod pipeline;

pub use walker::{FileMetadata, discover_files, is_document_path, relative_path};
pub use metadata::{compute_body_hash, compute_file_hash, slugify, canonical_url};
pub use frontmatter::{DocumentMeta, Frontmatter, split_frontmatter};
pub use blocks::{Block, BlockType, parse_document};
pub use incremental::{Classification, MatchKind};
pub use pipeline::{IngestReport, IngestRequest, IngestStatus, Ingester};
