use std::{path::PathBuf, process::ExitCode};

use clap::Parser;

use geoprep::{
    pipeline::{CameraProfile, Options, Orchestrator},
    PrepError,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON options file. Flags below override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory with source videos.
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Output directory.
    #[arg(short, long)]
    target: Option<PathBuf>,

    /// max_gen1, max_gen2 or hero. Inferred per file if not set.
    #[arg(short, long)]
    profile: Option<CameraProfile>,

    /// Overlay the nadir image on sampled frames.
    #[arg(long, default_value_t = false)]
    nadir: bool,

    /// Appended to output file names.
    #[arg(long)]
    suffix: Option<String>,

    /// Seconds a sample may lie beyond the first or last GPS fix.
    #[arg(long)]
    margin: Option<f64>,

    /// Parallel assets, 0 for available cores.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Write the effective options to this file and exit.
    #[arg(long)]
    save_config: Option<PathBuf>,

    #[arg(short, long, help = "Verbose logging.", default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn options(&self) -> Result<Options, PrepError> {
        let mut options = match self.config.as_ref() {
            Some(path) => Options::load(path)?,
            None => Options::default(),
        };
        if let Some(source) = self.source.as_ref() {
            options.source_dir = source.to_owned();
        }
        if let Some(target) = self.target.as_ref() {
            options.target_dir = target.to_owned();
        }
        if self.profile.is_some() {
            options.camera_profile = self.profile;
        }
        if self.nadir {
            options.enable_nadir_patch = true;
        }
        if let Some(suffix) = self.suffix.as_ref() {
            options.file_suffix = suffix.to_owned();
        }
        if let Some(margin) = self.margin {
            options.extrapolation_margin = margin;
        }
        if let Some(workers) = self.workers {
            options.workers = workers;
        }
        Ok(options)
    }
}

fn run(cli: &Cli) -> Result<bool, PrepError> {
    let options = cli.options()?;
    if let Some(path) = cli.save_config.as_ref() {
        options.save(path)?;
        log::info!("options written to '{}'", path.display());
        return Ok(true)
    }

    let orchestrator = Orchestrator::new(options)?;
    let report = orchestrator.run()?;
    println!("{report}");
    let ok = report.failures().next().is_none();
    Ok(ok)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        true => "debug",
        false => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(2)
        },
    }
}
