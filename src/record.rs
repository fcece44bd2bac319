use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder used when an attribute is absent from one side of a pair.
pub const MISSING_VALUE: &str = "N/A";

/// Comparable attributes of a system entry, in report order.
pub const DEFAULT_FIELDS: [&str; 16] = [
    "Amount",
    "Service",
    "Database",
    "Tier-Name",
    "Tier Type",
    "RAM",
    "No. of add HANA nodes",
    "No. of Standby nodes",
    "Storage Information",
    "OS",
    "SLA",
    "DR",
    "Add HW for DR",
    "Pacemaker Included",
    "Phase",
    "Server",
];

pub const DEFAULT_KEY_FIELD: &str = "System Name";

/// `s` cut to at most `max` characters, with `...` appended when cut.
pub fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

// ── Records ──

/// One extracted configuration entry: attribute name -> string value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    attributes: BTreeMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Record {
            attributes: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Attribute value, or [`MISSING_VALUE`] when absent.
    pub fn value_or_missing(&self, name: &str) -> &str {
        self.get(name).unwrap_or(MISSING_VALUE)
    }

    /// The match key, if present and non-blank.
    pub fn key<'a>(&'a self, key_field: &str) -> Option<&'a str> {
        self.get(key_field).filter(|k| !k.trim().is_empty())
    }
}

/// Ordered output of one extraction call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    pub label: String,
    pub records: Vec<Record>,
}

impl RecordSet {
    pub fn new(label: impl Into<String>, records: Vec<Record>) -> Self {
        RecordSet {
            label: label.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Which attribute keys a record and which attributes get compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub key_field: String,
    pub fields: Vec<String>,
}

impl FieldSchema {
    pub fn new(key_field: impl Into<String>, fields: Vec<String>) -> Self {
        FieldSchema {
            key_field: key_field.into(),
            fields,
        }
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        FieldSchema {
            key_field: DEFAULT_KEY_FIELD.to_string(),
            fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Display names of the two documents, used in prompts and analysis text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLabels {
    pub first: String,
    pub second: String,
}

impl Default for DocumentLabels {
    fn default() -> Self {
        DocumentLabels {
            first: "Version A".to_string(),
            second: "Version B".to_string(),
        }
    }
}

// ── Comparison results ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDifference {
    pub field_name: String,
    pub value_a: String,
    pub value_b: String,
    pub analysis: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Matched,
    OnlyInFirst,
    OnlyInSecond,
}

impl fmt::Display for ComparisonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Matched => "matched",
            Self::OnlyInFirst => "only_in_first",
            Self::OnlyInSecond => "only_in_second",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub key: String,
    pub status: ComparisonStatus,
    pub config_a: Option<Record>,
    pub config_b: Option<Record>,
    pub differences: Vec<FieldDifference>,
    pub analysis: String,
}

impl ComparisonResult {
    pub fn matched(
        key: impl Into<String>,
        a: Record,
        b: Record,
        differences: Vec<FieldDifference>,
        analysis: impl Into<String>,
    ) -> Self {
        ComparisonResult {
            key: key.into(),
            status: ComparisonStatus::Matched,
            config_a: Some(a),
            config_b: Some(b),
            differences,
            analysis: analysis.into(),
        }
    }

    pub fn only_in_first(key: impl Into<String>, a: Record, analysis: impl Into<String>) -> Self {
        ComparisonResult {
            key: key.into(),
            status: ComparisonStatus::OnlyInFirst,
            config_a: Some(a),
            config_b: None,
            differences: Vec::new(),
            analysis: analysis.into(),
        }
    }

    pub fn only_in_second(key: impl Into<String>, b: Record, analysis: impl Into<String>) -> Self {
        ComparisonResult {
            key: key.into(),
            status: ComparisonStatus::OnlyInSecond,
            config_a: None,
            config_b: Some(b),
            differences: Vec::new(),
            analysis: analysis.into(),
        }
    }

    /// Status/side/difference invariants hold.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            ComparisonStatus::Matched => self.config_a.is_some() && self.config_b.is_some(),
            ComparisonStatus::OnlyInFirst => {
                self.config_a.is_some() && self.config_b.is_none() && self.differences.is_empty()
            }
            ComparisonStatus::OnlyInSecond => {
                self.config_a.is_none() && self.config_b.is_some() && self.differences.is_empty()
            }
        }
    }
}

// ── Report ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub model: String,
    pub generated_at: DateTime<Utc>,
    pub record_set_a: RecordSet,
    pub record_set_b: RecordSet,
    /// Completion order; not meaningful.
    pub comparison_results: Vec<ComparisonResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub matched: usize,
    pub only_in_first: usize,
    pub only_in_second: usize,
    pub with_differences: usize,
}

impl AnalysisReport {
    pub fn summary(&self) -> ReportSummary {
        let mut s = ReportSummary::default();
        for r in &self.comparison_results {
            match r.status {
                ComparisonStatus::Matched => s.matched += 1,
                ComparisonStatus::OnlyInFirst => s.only_in_first += 1,
                ComparisonStatus::OnlyInSecond => s.only_in_second += 1,
            }
            if !r.differences.is_empty() {
                s.with_differences += 1;
            }
        }
        s
    }

    pub fn find(&self, key: &str) -> Option<&ComparisonResult> {
        self.comparison_results.iter().find(|r| r.key == key)
    }

    /// Results ordered by key, for display and stable diffs.
    pub fn sorted(mut self) -> Self {
        self.comparison_results.sort_by(|a, b| a.key.cmp(&b.key));
        self
    }

    /// Keep results whose key contains `needle`, ignoring case.
    pub fn filter_keys(mut self, needle: &str) -> Self {
        let needle = needle.to_lowercase();
        self.comparison_results
            .retain(|r| r.key.to_lowercase().contains(&needle));
        self
    }
}

// ── Tests ──
