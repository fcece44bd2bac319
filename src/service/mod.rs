pub mod openai;
#[cfg(test)]
pub mod stub;

use async_trait::async_trait;

use crate::error::{ComparisonError, ExtractionError};
use crate::record::{ComparisonResult, Record, RecordSet};

pub use openai::OpenAiClient;

/// Pulls the record set out of one document's text.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        document_text: &str,
        label: &str,
        model: &str,
    ) -> Result<RecordSet, ExtractionError>;
}

/// Compares one matched pair. Callers own the fallback on failure.
#[async_trait]
pub trait Comparator: Send + Sync {
    async fn compare(
        &self,
        a: &Record,
        b: &Record,
        model: &str,
    ) -> Result<ComparisonResult, ComparisonError>;
}
