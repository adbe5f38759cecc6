#![cfg(test)]

use std::{fs, path::PathBuf};

use super::_tests_support::TestBackend;
use super::io::JobConfig;
use super::metrics::{MetricsFormat, MetricsRecorder};
use super::reconstruction::{PipelineError, generate, run, run_with_metrics};
use super::storage::save_field;

const WIENER_JOB: &str = r#"
mode = "wiener"
seed = 7
samples = 3

[grid]
nx = 64

[spectrum]
kind = "inverse_power_law"
offset = 10.0
exponent = 2.5

[noise]
variance = 0.1

[output]
power_bins = 8
"#;

const KL_JOB: &str = r#"
mode = "kl"
seed = 11
nonlinearity = "exp"
posterior_samples = 3

[grid]
nx = 32

[spectrum]
kind = "inverse_power_law"
offset = 10.0
exponent = 2.5

[response]
kind = "checkerboard"
blocks = 4

[likelihood]
kind = "poisson"

[kl]
iterations = 2
samples = 2
sampling = { iteration_limit = 50, tol_abs_gradnorm = 1e-6 }
newton = { tol = 1e-5, iteration_limit = 5 }
"#;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sigrec-pipeline-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

#[test]
fn wiener_job_reports_mean_samples_and_power() {
    let job: JobConfig = WIENER_JOB.parse().unwrap();
    let result = run(TestBackend, &job).unwrap();
    assert_eq!(result.samples.len(), 3);
    assert_eq!(result.mean.len(), 64);
    assert_eq!(result.data.len(), 64);
    assert!(result.stddev.as_ref().unwrap().as_slice().iter().all(|&s| s > 0.0));
    assert!(!result.power.is_empty() && result.power.len() <= 8);
    let (mse_mean, mse_data) = (result.mse_mean().unwrap(), result.mse_data().unwrap());
    assert!(mse_mean < mse_data, "mse(mean)={mse_mean} mse(data)={mse_data}");
}

#[test]
fn runs_are_reproducible_and_match_generate() {
    let job: JobConfig = WIENER_JOB.parse().unwrap();
    let first = run(TestBackend, &job).unwrap();
    let second = run(TestBackend, &job).unwrap();
    assert_eq!(first.mean, second.mean);
    assert_eq!(first.samples, second.samples);

    let synthetic = generate(TestBackend, &job).unwrap();
    assert_eq!(Some(&synthetic.ground_truth), first.ground_truth.as_ref());
    assert_eq!(synthetic.data, first.data);

    let mut reseeded = job.clone();
    reseeded.set_seed(8);
    assert_ne!(generate(TestBackend, &reseeded).unwrap().data, synthetic.data);
}

#[test]
fn wiener_job_loads_data_from_file() {
    let dir = scratch_dir("data-file");
    let path = dir.join("data.bin");
    let job: JobConfig = WIENER_JOB.parse().unwrap();
    let synthetic = generate(TestBackend, &job).unwrap();
    save_field(&path, &synthetic.data).unwrap();

    let text = format!("data_file = {:?}\n{WIENER_JOB}", path.display().to_string());
    let from_file: JobConfig = text.parse().unwrap();
    let result = run(TestBackend, &from_file).unwrap();
    assert!(result.ground_truth.is_none());
    assert!(result.mse_mean().is_none());
    assert_eq!(result.data, synthetic.data);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn missing_data_file_is_a_storage_error() {
    let path = scratch_dir("missing").join("absent.bin");
    let text = format!("data_file = {:?}\n{WIENER_JOB}", path.display().to_string());
    let job: JobConfig = text.parse().unwrap();
    assert!(matches!(run(TestBackend, &job), Err(PipelineError::Storage(_))));
}

#[test]
fn kl_job_produces_finite_posterior_statistics() {
    let job: JobConfig = KL_JOB.parse().unwrap();
    let result = run(TestBackend, &job).unwrap();
    // Unmirrored unless the job asks for pairs.
    assert_eq!(result.samples.len(), 3);
    assert!(result.mean.is_finite());
    assert!(result.mean.as_slice().iter().all(|&rate| rate > 0.0));
    assert!(result.stddev.is_some());
    assert_eq!(result.data.len(), 16);
    assert_eq!(result.back_projected.len(), 32);
    assert!(result.ground_truth.is_some());
    // Fixed spectrum: model power only at the posterior position.
    assert_eq!(result.model_power.len(), result.power.len());
    assert!(result.power_samples.is_empty());
    assert!(result.power_law.is_none());
}

#[test]
fn mirrored_kl_job_reports_sample_pairs() {
    let text = KL_JOB.replace("samples = 2\n", "samples = 2\nmirror = true\n");
    let job: JobConfig = text.parse().unwrap();
    let result = run(TestBackend, &job).unwrap();
    assert_eq!(result.samples.len(), 6);
}

#[test]
fn learned_spectrum_reports_power_per_sample() {
    let text = KL_JOB.replace(
        "kind = \"inverse_power_law\"\noffset = 10.0\nexponent = 2.5\n",
        "kind = \"power_law\"\nslope = -2.0\nintercept = -2.0\n\n[amplitude]\nslope_std = 0.2\nintercept_std = 0.5\n",
    );
    let job: JobConfig = text.parse().unwrap();
    let result = run(TestBackend, &job).unwrap();
    assert_eq!(result.power_samples.len(), 3);
    for sample in &result.power_samples {
        assert_eq!(sample.len(), result.power.len());
        for (bin, reference) in sample.iter().zip(&result.power) {
            assert_eq!(bin.k, reference.k);
            assert_eq!(bin.modes, reference.modes);
            assert!(bin.power > 0.0 && bin.power.is_finite());
        }
    }
    let params = result.power_law.expect("learned power law");
    assert!(params.slope.is_finite() && params.intercept.is_finite());
}

#[test]
fn metrics_trace_the_pipeline() {
    let dir = scratch_dir("metrics");
    let path = dir.join("metrics.jsonl");
    let recorder = MetricsRecorder::new(&path, MetricsFormat::JsonLines).unwrap();
    let job: JobConfig = WIENER_JOB.parse().unwrap();
    run_with_metrics(TestBackend, &job, Some(&recorder)).unwrap();
    drop(recorder);

    let text = fs::read_to_string(&path).unwrap();
    let events: Vec<String> = text
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["event"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(events.first().map(String::as_str), Some("pipeline_start"));
    assert_eq!(events.last().map(String::as_str), Some("pipeline_done"));
    assert_eq!(events.iter().filter(|e| *e == "sample_drawn").count(), 3);
    assert!(events.iter().any(|e| e == "solver_finished"));
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn metrics_trace_the_final_posterior_batch() {
    let dir = scratch_dir("metrics-kl");
    let path = dir.join("metrics.jsonl");
    let recorder = MetricsRecorder::new(&path, MetricsFormat::JsonLines).unwrap();
    // A single CG step never meets the residual tolerance.
    let text = KL_JOB.replace(
        "sampling = { iteration_limit = 50, tol_abs_gradnorm = 1e-6 }",
        "sampling = { iteration_limit = 1 }",
    );
    let job: JobConfig = text.parse().unwrap();
    run_with_metrics(TestBackend, &job, Some(&recorder)).unwrap();
    drop(recorder);

    let text = fs::read_to_string(&path).unwrap();
    let events: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let kind = |event: &serde_json::Value| event["event"].as_str().unwrap().to_string();
    assert_eq!(events.iter().filter(|e| kind(e) == "kl_iteration").count(), 2);
    let posterior: Vec<_> = events
        .iter()
        .filter(|e| kind(e) == "posterior_sampling")
        .collect();
    assert_eq!(posterior.len(), 1);
    assert_eq!(posterior[0]["samples"], 3);
    assert_eq!(posterior[0]["unconverged_samples"], 3);
    assert_eq!(posterior[0]["sampling_iterations"], 3);
    // The posterior batch comes after the last outer iteration.
    let last_iteration = events.iter().rposition(|e| kind(e) == "kl_iteration").unwrap();
    let batch = events.iter().position(|e| kind(e) == "posterior_sampling").unwrap();
    assert!(batch > last_iteration);
    fs::remove_dir_all(&dir).unwrap();
}
