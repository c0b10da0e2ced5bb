use std::collections::HashMap;

use futures::StreamExt;
use serde::Deserialize;

use tci_core::{color, LogSink};

use crate::engine::{EngineError, PullStream};

/// Disambiguate short image references the way docker does: a bare
/// name is an official library image, a single `owner/name` lives on
/// the default registry, anything with more slashes already carries
/// its hostname.
pub fn normalize_image(image: &str) -> String {
    match image.matches('/').count() {
        0 => format!("docker.io/library/{image}"),
        1 => format!("docker.io/{image}"),
        _ => image.to_string(),
    }
}

/// One newline-delimited JSON event from docker's streaming pull
/// protocol. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullEvent {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "progressDetail")]
    pub progress_detail: Option<ProgressDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressDetail {
    #[serde(default)]
    pub current: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
}

impl PullEvent {
    /// Decode one line of the pull body.
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Accumulates per-layer download progress across pull events.
#[derive(Debug, Default)]
pub struct PullProgress {
    /// layer id → (current, total) bytes
    layers: HashMap<String, (f64, f64)>,
}

impl PullProgress {
    /// Fold one event in. Returns the overall percentage to render, or
    /// `None` when the event's status isn't part of the progress
    /// protocol.
    pub fn observe(&mut self, event: &PullEvent) -> Option<f64> {
        let status = event.status.as_deref().filter(|s| !s.is_empty())?;
        let completed = match status {
            "Pull complete" => true,
            "Downloading" => false,
            _ => return None,
        };

        if let Some(id) = event.id.as_deref().filter(|s| !s.is_empty()) {
            if completed {
                let pair = match self.layers.get(id) {
                    Some(&(_, total)) => (total, total),
                    None => (1.0, 1.0),
                };
                self.layers.insert(id.to_string(), pair);
            } else if let Some(detail) = &event.progress_detail {
                if detail.current.is_some() || detail.total.is_some() {
                    self.layers.insert(
                        id.to_string(),
                        (detail.current.unwrap_or(0.0), detail.total.unwrap_or(0.0)),
                    );
                }
            }
        }

        let current: f64 = self.layers.values().map(|(c, _)| c).sum();
        let total: f64 = self.layers.values().map(|(_, t)| t).sum();

        (total != 0.0).then(|| current / total * 100.0)
    }
}

/// Consume a pull stream, rendering running progress into the build
/// log. The completion banner prints on every path so the log always
/// shows where the pull ended.
pub(crate) async fn stream_pull(sink: &LogSink, mut events: PullStream) -> Result<(), EngineError> {
    sink.write_str("\n").await;

    let mut progress = PullProgress::default();
    let mut result = Ok(());

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                if let Some(percent) = progress.observe(&event) {
                    sink.write_str(&format!(
                        "\r{}{}Pulling Docker Image: {}{}{percent:.2}%{}",
                        color::HI_MAGENTA,
                        color::BOLD,
                        color::RESET,
                        color::HI_CYAN,
                        color::RESET,
                    ))
                    .await;
                }
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    sink.write_str(&format!(
        "\n{}Completed pull of docker image{}\n\n",
        color::GREEN,
        color::RESET
    ))
    .await;

    result
}
