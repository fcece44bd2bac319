//! Deterministic in-process services for engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Comparator, Extractor};
use crate::error::{ComparisonError, ExtractionError, ServiceError};
use crate::record::{ComparisonResult, Record, RecordSet};

#[derive(Debug, Clone)]
pub enum ExtractStub {
    Records(Vec<Record>),
    Empty,
    Malformed,
    Unauthorized,
    Hang,
}

/// Answers per document text, so each side can be scripted independently.
#[derive(Default)]
pub struct StubExtractor {
    by_text: HashMap<String, ExtractStub>,
    calls: AtomicUsize,
}

impl StubExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, document_text: &str, outcome: ExtractStub) -> Self {
        self.by_text.insert(document_text.to_string(), outcome);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for StubExtractor {
    async fn extract(
        &self,
        document_text: &str,
        label: &str,
        _model: &str,
    ) -> Result<RecordSet, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.by_text.get(document_text) {
            Some(ExtractStub::Records(records)) => Ok(RecordSet::new(label, records.clone())),
            Some(ExtractStub::Empty) | None => Err(ExtractionError::EmptyResponse),
            Some(ExtractStub::Malformed) => {
                Err(ExtractionError::MalformedPayload("expected value at line 1".into()))
            }
            Some(ExtractStub::Unauthorized) => Err(ExtractionError::Service(ServiceError::Status {
                status: 401,
                body: "invalid api key".into(),
            })),
            Some(ExtractStub::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ExtractionError::EmptyResponse)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareStub {
    /// Service answers with no differences.
    Agree,
    EmptyResponse,
    Malformed,
    Unavailable,
    Hang,
    Panic,
}

pub struct StubComparator {
    default: CompareStub,
    per_key: HashMap<String, CompareStub>,
    key_field: String,
    /// Sleep a key-dependent few milliseconds to shuffle completion order.
    jitter: bool,
    calls: AtomicUsize,
}

impl StubComparator {
    pub fn new(default: CompareStub, key_field: &str) -> Self {
        StubComparator {
            default,
            per_key: HashMap::new(),
            key_field: key_field.to_string(),
            jitter: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn on(mut self, key: &str, mode: CompareStub) -> Self {
        self.per_key.insert(key.to_string(), mode);
        self
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Comparator for StubComparator {
    async fn compare(
        &self,
        a: &Record,
        b: &Record,
        _model: &str,
    ) -> Result<ComparisonResult, ComparisonError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = a.get(&self.key_field).unwrap_or("").to_string();

        if self.jitter {
            let spread = key.bytes().map(u64::from).sum::<u64>() % 7;
            tokio::time::sleep(Duration::from_millis(spread * 3)).await;
        }

        let mode = self.per_key.get(&key).copied().unwrap_or(self.default);
        match mode {
            CompareStub::Agree => Ok(ComparisonResult::matched(
                key,
                a.clone(),
                b.clone(),
                vec![],
                "configurations are consistent",
            )),
            CompareStub::EmptyResponse => Err(ComparisonError::EmptyResponse),
            CompareStub::Malformed => {
                Err(ComparisonError::MalformedPayload("missing field `differences`".into()))
            }
            CompareStub::Unavailable => Err(ComparisonError::Service(ServiceError::Status {
                status: 503,
                body: "overloaded".into(),
            })),
            CompareStub::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ComparisonError::EmptyResponse)
            }
            CompareStub::Panic => panic!("comparator blew up on {key}"),
        }
    }
}
