use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Load,
    Coerce,
    Acquire,
    Inject,
    Render,
    Normalize,
    Persist,
    Release,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Coerce => "coerce",
            Self::Acquire => "acquire",
            Self::Inject => "inject",
            Self::Render => "render",
            Self::Normalize => "normalize",
            Self::Persist => "persist",
            Self::Release => "release",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub sequence_no: u64,
    pub timestamp: String,
    pub kind: PipelineEventKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEventKind {
    StageStarted {
        stage: PipelineStage,
    },
    StageCompleted {
        stage: PipelineStage,
    },
    StageFailed {
        stage: PipelineStage,
        error_kind: String,
        reason: String,
    },
    PipelineCompleted {
        chart_kind: String,
        output: String,
        bytes_written: usize,
    },
    PipelineFailed {
        chart_kind: String,
        error_kind: String,
        reason: String,
    },
}

pub trait PipelineEventObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

impl<F> PipelineEventObserver for F
where
    F: Fn(&PipelineEvent) + Send + Sync,
{
    fn on_event(&self, event: &PipelineEvent) {
        self(event);
    }
}

pub type SharedPipelineEventObserver = Arc<dyn PipelineEventObserver>;
pub type PipelineEventSender = mpsc::UnboundedSender<PipelineEvent>;
pub type PipelineEventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

#[derive(Clone, Default)]
pub struct PipelineEventSink {
    observer: Option<SharedPipelineEventObserver>,
    sender: Option<PipelineEventSender>,
}

impl PipelineEventSink {
    pub fn with_observer(observer: SharedPipelineEventObserver) -> Self {
        Self {
            observer: Some(observer),
            sender: None,
        }
    }

    pub fn with_sender(sender: PipelineEventSender) -> Self {
        Self {
            observer: None,
            sender: Some(sender),
        }
    }

    pub fn observer(mut self, observer: SharedPipelineEventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn sender(mut self, sender: PipelineEventSender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.observer.is_some() || self.sender.is_some()
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(observer) = self.observer.as_ref() {
            observer.on_event(&event);
        }
        if let Some(sender) = self.sender.as_ref() {
            let _ = sender.send(event);
        }
    }
}

pub fn pipeline_event_channel() -> (PipelineEventSender, PipelineEventReceiver) {
    mpsc::unbounded_channel()
}

pub(crate) fn timestamp_now() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!(
        "{}.{:03}Z",
        since_epoch.as_secs(),
        since_epoch.subsec_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::sync::Mutex;

    #[test]
    fn pipeline_event_sink_closed_stream_expected_observer_still_sees_failure() {
        let disabled = PipelineEventSink::default();
        assert!(!disabled.is_enabled());
        disabled.emit(failed_event(ErrorKind::Io));

        let failures = Arc::new(Mutex::new(Vec::new()));
        let observer_failures = Arc::clone(&failures);
        let observer: SharedPipelineEventObserver = Arc::new(move |event: &PipelineEvent| {
            if let PipelineEventKind::PipelineFailed {
                chart_kind,
                error_kind,
                ..
            } = &event.kind
            {
                observer_failures
                    .lock()
                    .expect("observer mutex should lock")
                    .push(format!("{chart_kind}:{error_kind}"));
            }
        });
        let (tx, rx) = pipeline_event_channel();
        drop(rx);
        let sink = PipelineEventSink::with_sender(tx).observer(observer);
        assert!(sink.is_enabled());

        sink.emit(failed_event(ErrorKind::Timeout));

        assert_eq!(
            failures.lock().expect("observer mutex should lock").as_slice(),
            &["bubblechart:timeout".to_string()]
        );
    }

    fn failed_event(kind: ErrorKind) -> PipelineEvent {
        PipelineEvent {
            sequence_no: 9,
            timestamp: timestamp_now(),
            kind: PipelineEventKind::PipelineFailed {
                chart_kind: "bubblechart".to_string(),
                error_kind: kind.as_str().to_string(),
                reason: "sandbox call timed out".to_string(),
            },
        }
    }

    #[test]
    fn pipeline_event_serializes_with_kind_tag() {
        let event = PipelineEvent {
            sequence_no: 1,
            timestamp: "1.000Z".to_string(),
            kind: PipelineEventKind::StageFailed {
                stage: PipelineStage::Render,
                error_kind: "svg_not_found".to_string(),
                reason: "empty".to_string(),
            },
        };
        let value = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(value["kind"]["kind"], "stage_failed");
        assert_eq!(value["kind"]["stage"], "render");
    }
}
