//! Progress reporting. The pipeline emits one event per stage transition;
//! nothing is emitted unless progress is enabled.

use std::sync::Arc;

use serde::Serialize;

/// One stage transition in a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ProgressEvent {
    Listed { bucket: String, objects: usize },
    Discovered { studies: usize },
    Verifying { study: String },
    ManifestChecked { study: String, manifest: String, passed: bool },
    Classified { study: String, verdict: String },
    Archiving { study: String },
    Archived { study: String, archive: String, deleted: usize },
    ArchiveFailed { study: String, error: String },
    PassComplete { archived: usize, not_ready: usize, failed: usize },
}

/// Sink for progress events. Called from whichever task made progress.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Sink that writes each event as a JSON `tracing` record.
pub fn tracing_sink() -> ProgressSink {
    Arc::new(|event: ProgressEvent| {
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));
        tracing::info!(target: "yarra::progress", progress = %json);
    })
}

pub(crate) fn emit(sink: Option<&ProgressSink>, event: impl FnOnce() -> ProgressEvent) {
    if let Some(sink) = sink {
        sink(event());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn events_serialize_with_stage_tag() {
        let json = serde_json::to_value(ProgressEvent::Archived {
            study: "s/config.json".into(),
            archive: "s.zip".into(),
            deleted: 3,
        })
        .unwrap();
        assert_eq!(json["stage"], "archived");
        assert_eq!(json["deleted"], 3);
    }

    #[test]
    fn emit_is_lazy_without_sink() {
        emit(None, || panic!("must not build events without a sink"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: ProgressSink = {
            let seen = seen.clone();
            Arc::new(move |e| seen.lock().unwrap().push(e))
        };
        emit(Some(&sink), || ProgressEvent::Discovered { studies: 2 });
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ProgressEvent::Discovered { studies: 2 }]
        );
    }
}
