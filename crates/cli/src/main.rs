use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use log::info;
use sigrec_backend_cpu::CpuBackend;
use sigrec_core::{
    field::Field,
    io::JobConfig,
    reconstruction::{self, Reconstruction},
    spectrum::PowerBin,
    storage::save_field,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_OUTPUT_DIR: &str = "output";

#[derive(Parser, Debug)]
#[command(name = "sigrec", about = "Bayesian signal reconstruction on regular grids")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconstruct a signal (Wiener filter or KL) and write the results
    Run(JobArgs),
    /// Only draw the synthetic ground truth and data for a job
    Generate(JobArgs),
}

#[derive(Args, Debug)]
struct JobArgs {
    /// Path to a TOML job file
    #[arg(short, long)]
    config: PathBuf,
    /// Output directory (overrides `output.directory` in the job file)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,
    /// Only log warnings and errors (stderr)
    #[arg(long)]
    quiet: bool,
}

impl JobArgs {
    fn load(&self) -> Result<(JobConfig, PathBuf), Box<dyn std::error::Error>> {
        info!("[cli] loading config {}", self.config.display());
        let mut job = JobConfig::from_file(&self.config)?;
        if let Some(seed) = self.seed {
            info!("[cli] overriding seed with {seed}");
            job.set_seed(seed);
        }
        if let Some(dir) = &self.output_dir {
            job.output_mut().directory = Some(dir.clone());
        }
        let out_dir = job
            .output()
            .directory
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        fs::create_dir_all(&out_dir)?;
        Ok((job, out_dir))
    }
}

fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => {
            init_logging(args.quiet);
            run(&args)
        }
        Command::Generate(args) => {
            init_logging(args.quiet);
            generate(&args)
        }
    }
}

fn run(args: &JobArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (job, out_dir) = args.load()?;
    let metrics_recorder = job.metrics().build_recorder()?;
    let result = reconstruction::run_with_metrics(CpuBackend::new(), &job, metrics_recorder.as_ref())?;

    save_field(&out_dir.join("data.bin"), &result.data)?;
    save_field(&out_dir.join("mean.bin"), &result.mean)?;
    if let Some(truth) = &result.ground_truth {
        save_field(&out_dir.join("ground_truth.bin"), truth)?;
    }
    if let Some(stddev) = &result.stddev {
        save_field(&out_dir.join("stddev.bin"), stddev)?;
    }
    for (idx, sample) in result.samples.iter().enumerate() {
        save_field(&out_dir.join("samples").join(format!("sample_{idx:03}.bin")), sample)?;
    }
    emit_summary_csv(&result, &out_dir.join("summary.csv"))?;
    emit_power_csv(&result, &out_dir.join("power.csv"))?;
    info!(
        "[cli] wrote {} pixels and {} samples to {}",
        result.mean.len(),
        result.samples.len(),
        out_dir.display()
    );
    Ok(())
}

fn generate(args: &JobArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (job, out_dir) = args.load()?;
    let synthetic = reconstruction::generate(CpuBackend::new(), &job)?;
    save_field(&out_dir.join("ground_truth.bin"), &synthetic.ground_truth)?;
    save_field(&out_dir.join("data.bin"), &synthetic.data)?;
    if let Some(excitation) = &synthetic.excitation {
        save_field(&out_dir.join("excitation.bin"), excitation)?;
    }
    info!(
        "[cli] wrote ground truth ({} pixels) and data ({} values) to {}",
        synthetic.ground_truth.len(),
        synthetic.data.len(),
        out_dir.display()
    );
    Ok(())
}

/// One row per pixel; the data column holds `Rᵀd`.
fn emit_summary_csv(result: &Reconstruction, dest: &Path) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(dest)?);
    writeln!(writer, "index,ground_truth,data,mean,stddev")?;
    let column = |field: Option<&Field>, idx: usize| -> String {
        field
            .map(|f| f.as_slice()[idx].to_string())
            .unwrap_or_default()
    };
    for idx in 0..result.mean.len() {
        writeln!(
            writer,
            "{idx},{},{},{},{}",
            column(result.ground_truth.as_ref(), idx),
            result.back_projected.as_slice()[idx],
            result.mean.as_slice()[idx],
            column(result.stddev.as_ref(), idx)
        )?;
    }
    writer.flush()
}

/// Binned power of the posterior mean next to the model spectrum at the
/// posterior position and, when the spectrum is learned, at each sample.
fn emit_power_csv(result: &Reconstruction, dest: &Path) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(dest)?);
    write!(writer, "k,power,modes,model_power")?;
    for idx in 0..result.power_samples.len() {
        write!(writer, ",sample_{idx:03}")?;
    }
    writeln!(writer)?;
    let model_power = |bins: &[PowerBin], row: usize| -> String {
        bins.get(row).map(|bin| bin.power.to_string()).unwrap_or_default()
    };
    for (row, bin) in result.power.iter().enumerate() {
        write!(
            writer,
            "{},{},{},{}",
            bin.k,
            bin.power,
            bin.modes,
            model_power(&result.model_power, row)
        )?;
        for sample in &result.power_samples {
            write!(writer, ",{}", model_power(sample, row))?;
        }
        writeln!(writer)?;
    }
    writer.flush()
}
