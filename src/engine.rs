use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use itertools::{Either, Itertools};
use tracing::{info, warn};

use crate::compare::TaskContext;
use crate::error::{AnalysisError, ExtractionError, ServiceError, Warning};
use crate::matcher;
use crate::pool::{self, TaskOutcome, WorkerBounds};
use crate::record::{AnalysisReport, DocumentLabels, FieldSchema, RecordSet};
use crate::service::{Comparator, Extractor};
use crate::settings::Settings;

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub schema: FieldSchema,
    pub labels: DocumentLabels,
    pub worker_bounds: WorkerBounds,
    pub call_timeout: Option<Duration>,
    pub show_progress: bool,
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        EngineConfig {
            schema: settings.field_schema(),
            labels: settings.labels(),
            worker_bounds: settings.worker_bounds(),
            call_timeout: settings.call_timeout(),
            show_progress: true,
        }
    }
}

/// The report plus the non-fatal warnings raised while building it.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub report: AnalysisReport,
    pub warnings: Vec<Warning>,
}

/// Extract → match → compare orchestration over two documents.
pub struct Engine {
    extractor: Arc<dyn Extractor>,
    comparator: Arc<dyn Comparator>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        comparator: Arc<dyn Comparator>,
        config: EngineConfig,
    ) -> Self {
        Engine {
            extractor,
            comparator,
            config,
        }
    }

    /// Run one analysis.
    ///
    /// Fails only if either extraction fails. Comparison failures end up in
    /// fallback analysis text and panicked tasks in the outcome's warnings.
    /// `max_workers` is clamped to the configured bounds.
    pub async fn run_analysis(
        &self,
        document_a: &str,
        document_b: &str,
        model: &str,
        max_workers: usize,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let labels = &self.config.labels;

        // Phase 1: both extractions in flight, first error wins
        let t_extract = Instant::now();
        info!("Extracting records from {} and {}", labels.first, labels.second);
        let (set_a, set_b) = tokio::try_join!(
            self.extract(document_a, &labels.first, model),
            self.extract(document_b, &labels.second, model),
        )?;
        info!(
            "Extracted {} + {} records in {:.1}s",
            set_a.len(),
            set_b.len(),
            t_extract.elapsed().as_secs_f64()
        );
        for set in [&set_a, &set_b] {
            if set.is_empty() {
                warn!("No records extracted from {}", set.label);
            }
        }

        let plan = matcher::plan(&set_a, &set_b, &self.config.schema.key_field);
        info!(
            "Matched {} keys ({} in both)",
            plan.tasks.len(),
            plan.matched_count()
        );

        // Phase 2: bounded comparison fan-out
        let t_compare = Instant::now();
        let workers = self.config.worker_bounds.clamp(max_workers);
        let ctx = Arc::new(TaskContext {
            model: model.to_string(),
            fields: self.config.schema.fields.clone(),
            labels: labels.clone(),
            call_timeout: self.config.call_timeout,
        });
        let outcomes = pool::run(
            plan.tasks,
            Arc::clone(&self.comparator),
            ctx,
            workers,
            self.config.show_progress,
        )
        .await;
        info!("Comparison phase took {:.1}s", t_compare.elapsed().as_secs_f64());

        Ok(aggregate(model, set_a, set_b, plan.duplicates, outcomes))
    }

    async fn extract(
        &self,
        text: &str,
        label: &str,
        model: &str,
    ) -> Result<RecordSet, AnalysisError> {
        let call = self.extractor.extract(text, label, model);
        let result = match self.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(ExtractionError::Service(ServiceError::TimedOut(limit)))),
            None => call.await,
        };
        result.map_err(|source| AnalysisError::Extraction {
            label: label.to_string(),
            source,
        })
    }
}

/// Assemble the report. Failed outcomes become warnings after `warnings`.
pub fn aggregate(
    model: &str,
    record_set_a: RecordSet,
    record_set_b: RecordSet,
    mut warnings: Vec<Warning>,
    outcomes: Vec<TaskOutcome>,
) -> AnalysisOutcome {
    let (comparison_results, dropped): (Vec<_>, Vec<_>) =
        outcomes.into_iter().partition_map(|o| match o.result {
            Ok(result) => Either::Left(result),
            Err(e) => Either::Right(Warning::task_dropped(o.key, &e)),
        });
    warnings.extend(dropped);

    AnalysisOutcome {
        report: AnalysisReport {
            model: model.to_string(),
            generated_at: Utc::now(),
            record_set_a,
            record_set_b,
            comparison_results,
        },
        warnings,
    }
}

// ── Tests ──
