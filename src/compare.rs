use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::ComparisonError;
use crate::matcher::ComparisonTask;
use crate::record::{ComparisonResult, DocumentLabels, FieldDifference, Record};
use crate::service::Comparator;

/// Read-only state every comparison task shares.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub model: String,
    /// Ordered attributes the local diff walks.
    pub fields: Vec<String>,
    pub labels: DocumentLabels,
    pub call_timeout: Option<Duration>,
}

/// Produce the result for one task.
///
/// Matched pairs go to the comparison service; any failure of that call
/// (empty or malformed reply, timeout, HTTP or transport error) falls back
/// to [`field_diff`]. One-sided tasks never reach the service.
pub async fn run_task(
    task: ComparisonTask,
    comparator: Arc<dyn Comparator>,
    ctx: Arc<TaskContext>,
) -> ComparisonResult {
    match task {
        ComparisonTask::Matched { key, a, b } => {
            match call_with_timeout(comparator.as_ref(), &a, &b, &ctx).await {
                // The service's own idea of key/status/sides is not trusted.
                Ok(reply) => {
                    ComparisonResult::matched(key, a, b, reply.differences, reply.analysis)
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "comparison call failed, using field diff");
                    fallback_result(key, a, b, &ctx.fields, &err)
                }
            }
        }
        ComparisonTask::OnlyInFirst { key, a } => {
            let analysis = format!(
                "System '{key}' exists in {} but is missing in {}.",
                ctx.labels.first, ctx.labels.second
            );
            ComparisonResult::only_in_first(key, a, analysis)
        }
        ComparisonTask::OnlyInSecond { key, b } => {
            let analysis = format!(
                "System '{key}' is new in {} (not present in {}).",
                ctx.labels.second, ctx.labels.first
            );
            ComparisonResult::only_in_second(key, b, analysis)
        }
    }
}

async fn call_with_timeout(
    comparator: &dyn Comparator,
    a: &Record,
    b: &Record,
    ctx: &TaskContext,
) -> Result<ComparisonResult, ComparisonError> {
    let call = comparator.compare(a, b, &ctx.model);
    match ctx.call_timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(ComparisonError::TimedOut(limit))),
        None => call.await,
    }
}

/// Matched result built locally after the service failed.
pub fn fallback_result(
    key: String,
    a: Record,
    b: Record,
    fields: &[String],
    error: &ComparisonError,
) -> ComparisonResult {
    let differences = field_diff(&a, &b, fields);
    let analysis = format!("Comparison completed with fallback method. Error: {error}");
    ComparisonResult::matched(key, a, b, differences, analysis)
}

/// Field-by-field string diff in `fields` order. Absent attributes read
/// as `N/A`; fields outside the list are ignored.
pub fn field_diff(a: &Record, b: &Record, fields: &[String]) -> Vec<FieldDifference> {
    fields
        .iter()
        .filter_map(|field| {
            let value_a = a.value_or_missing(field);
            let value_b = b.value_or_missing(field);
            (value_a != value_b).then(|| FieldDifference {
                field_name: field.clone(),
                value_a: value_a.to_string(),
                value_b: value_b.to_string(),
                analysis: format!("Field '{field}' changed from '{value_a}' to '{value_b}'."),
            })
        })
        .collect()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ComparisonStatus;
    use crate::service::stub::{CompareStub, StubComparator};

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn ctx(timeout_ms: Option<u64>) -> Arc<TaskContext> {
        Arc::new(TaskContext {
            model: "m".into(),
            fields: fields(&["amount", "ram"]),
            labels: DocumentLabels::default(),
            call_timeout: timeout_ms.map(Duration::from_millis),
        })
    }

    fn matched(amount_a: &str, amount_b: &str) -> ComparisonTask {
        ComparisonTask::Matched {
            key: "sys1".into(),
            a: Record::from_pairs([("name", "sys1"), ("amount", amount_a)]),
            b: Record::from_pairs([("name", "sys1"), ("amount", amount_b)]),
        }
    }

    fn stub(mode: CompareStub) -> Arc<dyn Comparator> {
        Arc::new(StubComparator::new(mode, "name"))
    }

    #[test]
    fn diff_follows_field_order_and_reads_missing_as_na() {
        let a = Record::from_pairs([("ram", "64"), ("amount", "10"), ("os", "SLES")]);
        let b = Record::from_pairs([("ram", "128"), ("amount", "20"), ("os", "RHEL")]);
        let diffs = field_diff(&a, &b, &fields(&["amount", "ram", "tier"]));
        let names: Vec<_> = diffs.iter().map(|d| d.field_name.as_str()).collect();
        assert_eq!(names, vec!["amount", "ram"]);
        assert_eq!(diffs[0].analysis, "Field 'amount' changed from '10' to '20'.");

        let only_a = Record::from_pairs([("tier", "gold")]);
        let diffs = field_diff(&only_a, &Record::new(), &fields(&["tier"]));
        assert_eq!(diffs[0].value_b, "N/A");
    }

    #[test]
    fn identical_records_have_no_diff() {
        let a = Record::from_pairs([("amount", "10"), ("ram", "64")]);
        assert!(field_diff(&a, &a.clone(), &fields(&["amount", "ram", "absent"])).is_empty());
    }

    #[test]
    fn diff_is_repeatable() {
        let a = Record::from_pairs([("amount", "10")]);
        let b = Record::from_pairs([("amount", "20"), ("ram", "1")]);
        let f = fields(&["amount", "ram"]);
        assert_eq!(field_diff(&a, &b, &f), field_diff(&a, &b, &f));
    }

    #[tokio::test]
    async fn empty_reply_falls_back_to_field_diff() {
        let r = run_task(matched("10", "20"), stub(CompareStub::EmptyResponse), ctx(None)).await;
        assert_eq!(r.status, ComparisonStatus::Matched);
        assert_eq!(r.differences.len(), 1);
        assert_eq!(r.differences[0].field_name, "amount");
        assert_eq!(
            r.analysis,
            "Comparison completed with fallback method. Error: empty response from comparison service"
        );
    }

    #[tokio::test]
    async fn malformed_reply_falls_back() {
        let r = run_task(matched("10", "10"), stub(CompareStub::Malformed), ctx(None)).await;
        assert!(r.differences.is_empty());
        assert!(r.analysis.starts_with("Comparison completed with fallback method."));
    }

    #[tokio::test]
    async fn hung_call_times_out_into_fallback() {
        let r = run_task(matched("10", "20"), stub(CompareStub::Hang), ctx(Some(20))).await;
        assert_eq!(r.differences.len(), 1);
        assert!(r.analysis.contains("timed out"));
    }

    #[tokio::test]
    async fn service_outage_falls_back_to_field_diff() {
        let r = run_task(matched("10", "20"), stub(CompareStub::Unavailable), ctx(None)).await;
        assert_eq!(r.status, ComparisonStatus::Matched);
        assert!(r.is_consistent());
        assert_eq!(r.differences.len(), 1);
        assert_eq!(
            (r.differences[0].value_a.as_str(), r.differences[0].value_b.as_str()),
            ("10", "20")
        );
        assert_eq!(
            r.analysis,
            "Comparison completed with fallback method. Error: service returned HTTP 503: overloaded"
        );
    }

    #[tokio::test]
    async fn one_sided_tasks_skip_the_service() {
        let comparator = Arc::new(StubComparator::new(CompareStub::Agree, "name"));
        let task = ComparisonTask::OnlyInFirst {
            key: "sys1".into(),
            a: Record::from_pairs([("name", "sys1")]),
        };
        let r = run_task(task, comparator.clone(), ctx(None)).await;
        assert_eq!(r.status, ComparisonStatus::OnlyInFirst);
        assert!(r.config_b.is_none());
        assert_eq!(
            r.analysis,
            "System 'sys1' exists in Version A but is missing in Version B."
        );

        let task = ComparisonTask::OnlyInSecond {
            key: "sys2".into(),
            b: Record::from_pairs([("name", "sys2")]),
        };
        let r = run_task(task, comparator.clone(), ctx(None)).await;
        assert_eq!(r.status, ComparisonStatus::OnlyInSecond);
        assert!(r.config_a.is_none());
        assert_eq!(comparator.calls(), 0);
    }
}
