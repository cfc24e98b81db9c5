use crate::util::{positive_parser, range_parser};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Matched-filter and Q-transform scans of detector strain data.")]
#[command(allow_negative_numbers = true)]
pub struct Cli {
    /// KDL configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Directory of <detector>-<gps_start>-<duration>.wav frames
    #[arg(long, global = true)]
    pub archive: Option<PathBuf>,
    /// Shared library exporting a waveform oracle
    #[arg(long, global = true)]
    pub plugin: Option<PathBuf>,
    /// Skip the PSD cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Event named in the config, or given explicitly.
#[derive(Args, Clone, Debug)]
pub struct EventArgs {
    #[arg(long, conflicts_with_all = ["gps", "mass1", "mass2"])]
    pub event: Option<String>,
    #[arg(long)]
    pub gps: Option<f64>,
    #[arg(long, value_parser = positive_parser)]
    pub mass1: Option<f64>,
    #[arg(long, value_parser = positive_parser)]
    pub mass2: Option<f64>,
    /// Luminosity distance in Mpc
    #[arg(long, value_parser = positive_parser, default_value_t = 100.0)]
    pub distance: f64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write seeded white noise, optionally with a chirp, into the archive
    Simulate {
        #[arg(long, default_value = "H1")]
        detector: String,
        #[arg(long)]
        gps_start: f64,
        #[arg(long, value_parser = positive_parser, default_value_t = 64.0)]
        duration: f64,
        #[arg(long, value_parser = positive_parser, default_value_t = 4096.0)]
        sample_rate: f64,
        /// Noise standard deviation
        #[arg(long, value_parser = positive_parser, default_value_t = 1.0)]
        sigma: f64,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[command(flatten)]
        inject: EventArgs,
        /// Optimal SNR of the injection in the simulated noise
        #[arg(long, value_parser = positive_parser)]
        snr: Option<f64>,
    },
    /// Estimate a PSD
    Psd {
        #[arg(long, default_value = "H1")]
        detector: String,
        #[arg(long)]
        start: f64,
        #[arg(long)]
        end: f64,
        /// Write `frequency psd` rows here instead of a summary
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Matched-filter SNR around an event
    Snr {
        #[arg(long, value_delimiter = ',', default_value = "H1")]
        detectors: Vec<String>,
        #[command(flatten)]
        event: EventArgs,
        /// Write `time |snr|` rows to <output>-<detector>.txt
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Dense Q-transform around a time
    Qtransform {
        #[arg(long, default_value = "H1")]
        detector: String,
        #[arg(long)]
        gps: f64,
        /// Output window length in seconds
        #[arg(long, value_parser = positive_parser, default_value_t = 0.5)]
        window: f64,
        #[arg(long, value_parser = range_parser)]
        qrange: Option<(f64, f64)>,
        #[arg(long, value_parser = range_parser)]
        frange: Option<(f64, f64)>,
        /// Write the map as bincode
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Tiles above an energy floor around a time
    Qgram {
        #[arg(long, value_delimiter = ',', default_value = "H1")]
        detectors: Vec<String>,
        #[arg(long)]
        gps: f64,
        #[arg(long, value_parser = positive_parser, default_value_t = 0.25)]
        half_width: f64,
        #[arg(long, value_parser = range_parser)]
        qrange: Option<(f64, f64)>,
        #[arg(long, value_parser = range_parser)]
        frange: Option<(f64, f64)>,
        #[arg(long)]
        mismatch: Option<f64>,
        #[arg(long)]
        energy_floor: Option<f64>,
        /// Tiles printed per detector
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snr() {
        let cli = Cli::try_parse_from([
            "gwscan", "--config", "c.kdl", "snr", "--detectors", "H1,L1", "--event", "GW150914",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.kdl")));
        match cli.command {
            Commands::Snr { detectors, event, .. } => {
                assert_eq!(detectors, vec!["H1", "L1"]);
                assert_eq!(event.event.as_deref(), Some("GW150914"));
            }
            _ => panic!("expected snr"),
        }
    }

    #[test]
    fn test_parse_qgram_ranges() {
        let cli = Cli::try_parse_from([
            "gwscan", "qgram", "--gps", "1126259462.4", "--qrange", "4,150", "--mismatch", "0.35",
        ])
        .unwrap();
        match cli.command {
            Commands::Qgram { qrange, mismatch, detectors, .. } => {
                assert_eq!(qrange, Some((4.0, 150.0)));
                assert_eq!(mismatch, Some(0.35));
                assert_eq!(detectors, vec!["H1"]);
            }
            _ => panic!("expected qgram"),
        }
        assert!(Cli::try_parse_from(["gwscan", "qgram", "--gps", "1", "--qrange", "9,4"]).is_err());
    }
}
