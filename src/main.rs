//! CLI entry point for spectro-daq
//!
//! Runs one operation against a spectrometer session and exits:
//! - `spectrum`: single-track acquisition binned into a calibrated spectrum
//! - `full-image`, `slit-image`: whole-sensor or slit-only frames
//! - `temperature`, `gratings`: device queries
//!
//! Devices are simulated (see `[simulation]` in the config file). Ctrl-C
//! aborts an acquisition in flight.
//!
//! # Usage
//!
//! ```bash
//! spectro-daq spectrum --wavelength 650 --exposure 0.5 --output data
//! spectro-daq --config config/spectrometer.toml slit-image --snapshot
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use spectro_daq::config::SpectrometerConfig;
use spectro_daq::export::{self, ExportHeader};
use spectro_daq::{logging, simulation, AcquisitionResult, AndorSpectrometer};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "spectro-daq")]
#[command(about = "Andor detector + Shamrock spectrograph acquisition", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = spectro_daq::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire a calibrated spectrum from a single track
    Spectrum {
        #[command(flatten)]
        optics: OpticsArgs,

        /// Explicit track rows (1-based, inclusive) instead of the slit-derived track
        #[arg(long, num_args = 2, value_names = ["START", "STOP"])]
        rows: Option<Vec<u32>>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Acquire the whole sensor
    FullImage {
        #[command(flatten)]
        optics: OpticsArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Acquire an undispersed image of the slit
    SlitImage {
        /// Restore wavelength, slit width and mode afterwards
        #[arg(long)]
        snapshot: bool,

        /// Exposure time in seconds
        #[arg(long)]
        exposure: Option<f64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Read the sensor temperature
    Temperature,

    /// List installed gratings
    Gratings,
}

#[derive(Args)]
struct OpticsArgs {
    /// Exposure time in seconds
    #[arg(long)]
    exposure: Option<f64>,

    /// Centre wavelength in nm
    #[arg(long)]
    wavelength: Option<f64>,

    /// Entrance slit width in µm
    #[arg(long)]
    slit: Option<f64>,

    /// Grating index (1-based)
    #[arg(long)]
    grating: Option<u32>,
}

#[derive(Args)]
struct OutputArgs {
    /// Write a CSV file into this directory (default: export.output_dir)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Do not write a file
    #[arg(long, conflicts_with = "output")]
    no_save: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SpectrometerConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_config(&config)?;
    tracing::info!(name = %config.application.name, "Starting");

    let session = Arc::new(simulation::open(&config).await?);
    let abort = {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                session.abort_acquisition();
            }
        })
    };

    let outcome = run(&session, &config, cli.command).await;
    abort.abort();
    session.close().await;
    outcome
}

async fn run(session: &AndorSpectrometer, config: &SpectrometerConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Spectrum {
            optics,
            rows,
            output,
        } => {
            apply_optics(session, &optics).await?;
            if let Some(rows) = rows {
                session.set_single_track(Some((rows[0], rows[1]))).await?;
            }
            let Some(spectrum) = session.take_spectrum().await? else {
                println!("Acquisition aborted");
                return Ok(());
            };
            if let Some(peak) = spectrum.peak_nm() {
                println!("{} points, peak at {:.2} nm", spectrum.len(), peak);
            }
            if let Some(dir) = output.target(config) {
                let frame = session.last_frame();
                let header = ExportHeader::new(
                    &config.application.name,
                    &session.state(),
                    frame.as_ref().map(|f| &f.metadata),
                );
                let path = export::save_spectrum(&dir, &header, &spectrum)?;
                println!("Saved {}", path.display());
            }
        }
        Commands::FullImage { optics, output } => {
            apply_optics(session, &optics).await?;
            let result = session.take_full_image().await?;
            save_frame(session, config, result, &output)?;
        }
        Commands::SlitImage {
            snapshot,
            exposure,
            output,
        } => {
            if let Some(seconds) = exposure {
                session.set_exposure_time(seconds).await?;
            }
            let result = if snapshot {
                session.take_slit_snapshot().await?
            } else {
                session.take_slit_image().await?
            };
            save_frame(session, config, result, &output)?;
        }
        Commands::Temperature => {
            let reading = session.temperature().await?;
            let note = if reading.is_stabilized() { "stabilized" } else { "not stabilized" };
            println!("{:.1} °C ({}, status {})", reading.celsius, note, reading.status);
        }
        Commands::Gratings => {
            let current = session.grating();
            for (index, grating) in session.gratings().await?.iter().enumerate() {
                let index = index as u32 + 1;
                let marker = if index == current { "*" } else { " " };
                println!(
                    "{} {}: {} l/mm, blaze {}, home {}, offset {}",
                    marker, index, grating.lines_per_mm, grating.blaze, grating.home, grating.offset
                );
            }
        }
    }
    Ok(())
}

async fn apply_optics(session: &AndorSpectrometer, optics: &OpticsArgs) -> Result<()> {
    if let Some(seconds) = optics.exposure {
        session.set_exposure_time(seconds).await?;
    }
    if let Some(grating) = optics.grating {
        session.set_grating(grating).await?;
    }
    if let Some(nm) = optics.wavelength {
        if let Some(range) = session.set_centre_wavelength(nm).await? {
            eprintln!("warning: {}", range);
        }
    }
    if let Some(width) = optics.slit {
        session.set_slit_width_um(width).await?;
    }
    Ok(())
}

fn save_frame(
    session: &AndorSpectrometer,
    config: &SpectrometerConfig,
    result: AcquisitionResult,
    output: &OutputArgs,
) -> Result<()> {
    let frame = match result {
        AcquisitionResult::Data(frame) => frame,
        AcquisitionResult::Aborted => {
            println!("Acquisition aborted");
            return Ok(());
        }
        AcquisitionResult::DeviceError(code) => bail!("detector reported status {}", code),
    };
    println!(
        "{}x{} frame, max {}",
        frame.width,
        frame.height,
        frame.max_value().unwrap_or_default()
    );
    if let Some(dir) = output.target(config) {
        let acquired = session.last_frame();
        let header = ExportHeader::new(
            &config.application.name,
            &session.state(),
            acquired.as_ref().map(|f| &f.metadata),
        );
        let path = export::save_frame(&dir, &header, &frame)?;
        println!("Saved {}", path.display());
    }
    Ok(())
}

impl OutputArgs {
    fn target(&self, config: &SpectrometerConfig) -> Option<PathBuf> {
        if self.no_save {
            None
        } else {
            Some(
                self.output
                    .clone()
                    .unwrap_or_else(|| config.export.output_dir.clone()),
            )
        }
    }
}
