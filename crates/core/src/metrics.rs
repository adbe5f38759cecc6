//! Lightweight metrics recorder (JSONL) for pipeline stages.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cg::SolverStatus;
use crate::newton::MinimizationStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub format: MetricsFormat,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output: None,
            format: MetricsFormat::JsonLines,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricsFormat {
    #[default]
    JsonLines,
}

pub struct MetricsRecorder {
    writer: Mutex<File>,
    format: MetricsFormat,
}

impl MetricsRecorder {
    pub fn new(path: &Path, format: MetricsFormat) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        Ok(Self {
            writer: Mutex::new(file),
            format,
        })
    }

    pub fn emit(&self, event: MetricsEvent<'_>) {
        if let Err(err) = self.write_event(event) {
            warn!("[metrics] failed to write event: {err}");
        }
    }

    fn write_event(&self, event: MetricsEvent<'_>) -> io::Result<()> {
        match self.format {
            MetricsFormat::JsonLines => {
                let envelope = EventEnvelope {
                    timestamp_ms: now_millis(),
                    event,
                };
                let mut guard = self.writer.lock();
                serde_json::to_writer(&mut *guard, &envelope)?;
                guard.write_all(b"\n")?;
                guard.flush()
            }
        }
    }
}

/// Emit to an optional recorder.
pub fn record(recorder: Option<&MetricsRecorder>, event: MetricsEvent<'_>) {
    if let Some(recorder) = recorder {
        recorder.emit(event);
    }
}

#[derive(Serialize)]
struct EventEnvelope<'a> {
    timestamp_ms: f64,
    #[serde(flatten)]
    event: MetricsEvent<'a>,
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MetricsEvent<'a> {
    PipelineStart {
        mode: &'a str,
        backend: &'a str,
        grid_nx: usize,
        grid_ny: usize,
        seed: u64,
        response: &'a str,
    },
    DataReady {
        source: &'a str,
        data_len: usize,
        duration_ms: f64,
    },
    SolverFinished {
        stage: &'a str,
        iterations: usize,
        residual_norm: f64,
        status: SolverStatus,
        duration_ms: f64,
    },
    SampleDrawn {
        index: usize,
        iterations: usize,
        status: SolverStatus,
    },
    KlIteration {
        iteration: usize,
        energy: f64,
        gradient_inf_norm: f64,
        newton_iterations: usize,
        newton_status: MinimizationStatus,
        samples: usize,
        unconverged_samples: usize,
        sampling_iterations: usize,
        duration_ms: f64,
    },
    PosteriorSampling {
        samples: usize,
        unconverged_samples: usize,
        sampling_iterations: usize,
        duration_ms: f64,
    },
    PipelineDone {
        mse_mean: Option<f64>,
        mse_data: Option<f64>,
        duration_ms: f64,
    },
}

fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

impl MetricsConfig {
    pub fn build_recorder(&self) -> io::Result<Option<MetricsRecorder>> {
        if !self.enabled {
            return Ok(None);
        }
        let path = self.output.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "metrics.output must be set when metrics are enabled",
            )
        })?;
        MetricsRecorder::new(path, self.format).map(Some)
    }
}
