use crate::events::timestamp_now;
use crate::{
    Artifact, ChartError, ChartJob, ChromeLauncher, CoercionSummary, Dataset, LoadReport,
    PipelineConfig, PipelineEvent, PipelineEventKind, PipelineEventSink, PipelineStage,
    RenderingResult, SandboxLauncher, SandboxSession, SkippedRow, coerce_numeric_fields,
    inject_chart_runtime, load_csv, render_chart,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub output: PathBuf,
    pub chart_kind: String,
    pub records: usize,
    pub skipped_rows: Vec<SkippedRow>,
    pub coercion: CoercionSummary,
    pub bytes_written: usize,
}

/// Runs one [`ChartJob`] end to end: load, coerce, acquire a sandbox, inject the
/// chart runtime, render, normalize, persist, release.
///
/// A session, once acquired, is released exactly once whatever stage fails.
#[derive(Clone)]
pub struct ChartPipeline {
    launcher: Arc<dyn SandboxLauncher>,
    config: PipelineConfig,
    events: PipelineEventSink,
}

impl ChartPipeline {
    pub fn new(launcher: Arc<dyn SandboxLauncher>, config: PipelineConfig) -> Self {
        Self {
            launcher,
            config,
            events: PipelineEventSink::default(),
        }
    }

    pub fn chrome(config: PipelineConfig) -> Self {
        Self::new(Arc::new(ChromeLauncher), config)
    }

    pub fn with_events(mut self, events: PipelineEventSink) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(&self, job: &ChartJob) -> Result<PipelineReport, ChartError> {
        let mut recorder = StageRecorder::new(&self.events);
        let outcome = self.run_stages(job, &mut recorder).await;
        match &outcome {
            Ok(report) => {
                tracing::info!(
                    chart_kind = %report.chart_kind,
                    output = %report.output.display(),
                    records = report.records,
                    bytes = report.bytes_written,
                    "chart written"
                );
                recorder.emit(PipelineEventKind::PipelineCompleted {
                    chart_kind: report.chart_kind.clone(),
                    output: report.output.display().to_string(),
                    bytes_written: report.bytes_written,
                });
            }
            Err(error) => {
                tracing::error!(
                    chart_kind = %job.chart_kind,
                    kind = error.kind().as_str(),
                    error = %error,
                    "chart pipeline failed"
                );
                recorder.emit(PipelineEventKind::PipelineFailed {
                    chart_kind: job.chart_kind.clone(),
                    error_kind: error.kind().as_str().to_string(),
                    reason: error.to_string(),
                });
            }
        }
        outcome
    }

    async fn run_stages(
        &self,
        job: &ChartJob,
        recorder: &mut StageRecorder<'_>,
    ) -> Result<PipelineReport, ChartError> {
        job.validate()?;

        recorder.started(PipelineStage::Load);
        let LoadReport {
            mut dataset,
            skipped,
        } = recorder.finish(
            PipelineStage::Load,
            load_csv(&job.input, &self.config.loader),
        )?;

        recorder.started(PipelineStage::Coerce);
        let coercion = coerce_numeric_fields(&mut dataset, &job.numeric_fields);
        for field in job.mapping.referenced_fields() {
            if !dataset.has_column(&field) {
                tracing::warn!(field = %field, "mapped field is not a dataset column");
            }
        }
        recorder.finish(PipelineStage::Coerce, Ok(()))?;

        recorder.started(PipelineStage::Acquire);
        let mut session = recorder.finish(
            PipelineStage::Acquire,
            self.launcher.acquire(&self.config.effective_sandbox()).await,
        )?;

        let written = self
            .render_in_session(session.as_mut(), job, &dataset, recorder)
            .await;

        recorder.started(PipelineStage::Release);
        if let Err(error) = recorder.finish(PipelineStage::Release, session.release().await) {
            tracing::warn!(error = %error, "sandbox release failed");
        }

        let bytes_written = written?;
        Ok(PipelineReport {
            output: job.output.clone(),
            chart_kind: job.chart_kind.clone(),
            records: dataset.len(),
            skipped_rows: skipped,
            coercion,
            bytes_written,
        })
    }

    async fn render_in_session(
        &self,
        session: &mut dyn SandboxSession,
        job: &ChartJob,
        dataset: &Dataset,
        recorder: &mut StageRecorder<'_>,
    ) -> Result<usize, ChartError> {
        recorder.started(PipelineStage::Inject);
        let catalog = recorder.finish(
            PipelineStage::Inject,
            inject_chart_runtime(session, &self.config.scripts).await,
        )?;

        recorder.started(PipelineStage::Render);
        let rendered = render_chart(
            session,
            &catalog,
            &dataset.records,
            &job.mapping,
            &job.options,
            &job.chart_kind,
        )
        .await
        .and_then(RenderingResult::into_markup);
        let markup = recorder.finish(PipelineStage::Render, rendered)?;

        recorder.started(PipelineStage::Normalize);
        let artifact = Artifact::from_markup(&job.output, &markup);
        recorder.finish(PipelineStage::Normalize, Ok(()))?;

        recorder.started(PipelineStage::Persist);
        recorder.finish(PipelineStage::Persist, artifact.persist())?;
        Ok(artifact.size_bytes())
    }
}

struct StageRecorder<'a> {
    events: &'a PipelineEventSink,
    sequence_no: u64,
}

impl<'a> StageRecorder<'a> {
    fn new(events: &'a PipelineEventSink) -> Self {
        Self {
            events,
            sequence_no: 0,
        }
    }

    fn started(&mut self, stage: PipelineStage) {
        tracing::debug!(stage = stage.as_str(), "stage started");
        self.emit(PipelineEventKind::StageStarted { stage });
    }

    fn finish<T>(
        &mut self,
        stage: PipelineStage,
        result: Result<T, ChartError>,
    ) -> Result<T, ChartError> {
        match &result {
            Ok(_) => self.emit(PipelineEventKind::StageCompleted { stage }),
            Err(error) => self.emit(PipelineEventKind::StageFailed {
                stage,
                error_kind: error.kind().as_str().to_string(),
                reason: error.to_string(),
            }),
        }
        result
    }

    fn emit(&mut self, kind: PipelineEventKind) {
        self.sequence_no += 1;
        if !self.events.is_enabled() {
            return;
        }
        self.events.emit(PipelineEvent {
            sequence_no: self.sequence_no,
            timestamp: timestamp_now(),
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline_event_channel;

    #[test]
    fn stage_recorder_numbers_events_in_emission_order() {
        let (tx, mut rx) = pipeline_event_channel();
        let sink = PipelineEventSink::with_sender(tx);
        let mut recorder = StageRecorder::new(&sink);

        recorder.started(PipelineStage::Load);
        let failed: Result<(), ChartError> = recorder.finish(
            PipelineStage::Load,
            Err(ChartError::Parse {
                line: 3,
                message: "expected 2 fields, found 1".to_string(),
            }),
        );
        assert!(failed.is_err());

        let first = rx.try_recv().expect("started event");
        let second = rx.try_recv().expect("failed event");
        assert_eq!(first.sequence_no, 1);
        assert_eq!(second.sequence_no, 2);
        assert!(matches!(
            second.kind,
            PipelineEventKind::StageFailed {
                stage: PipelineStage::Load,
                ref error_kind,
                ..
            } if error_kind == "parse"
        ));
    }
}
