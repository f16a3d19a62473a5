mod error;
mod extractor;
mod registry;

pub use error::{ExtractionError, MedicationError};
pub use extractor::{AsyncExtractor, ExtractedDraft, ExtractorConfig, HttpExtractor, NoopExtractor};
pub use registry::MedicationRegistry;
