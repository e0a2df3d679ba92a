mod builder;
mod entry;
mod extractor;
pub(crate) mod stream;

pub use builder::{ArchiveBuilder, BuildReport, SkipReason, SkippedItem};
pub use entry::{grouped_name, normalize_path, ArchiveEntry, ArchiveSource, CompressionMethod};
pub use extractor::{ArchiveExtractor, ExtractReport, ExtractedFile};

pub(crate) use entry::relative_path_problem;
