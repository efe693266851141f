pub mod chunker;
pub mod detector;
pub mod extractor;
pub mod tier1;

pub use chunker::Chunker;
pub use detector::{DocType, DocTypeDetector};
pub use extractor::{ContentExtractor, ExtractedContent, ExtractionStrategy};
