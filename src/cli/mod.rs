//! CLI Module
//!
//! Command-line interface for sigstream.

pub mod commands;

use crate::filter::FilterType;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Sigstream - streaming signal transforms and model inference
#[derive(Parser, Debug)]
#[command(name = "sigstream")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a resolved model descriptor
    #[command(name = "inspect")]
    Inspect {
        /// Path to the descriptor file
        descriptor: PathBuf,
    },

    /// List descriptor files under a directory
    #[command(name = "list")]
    List {
        /// Directory to search
        dir: PathBuf,
    },

    /// Design a Butterworth filter and print its sections
    #[command(name = "design")]
    Design {
        /// Filter type
        #[arg(short = 't', long = "type", value_enum, default_value = "low")]
        filter_type: FilterKind,

        /// Filter order
        #[arg(short, long, default_value_t = 2)]
        order: usize,

        /// Lower cutoff, normalised to Nyquist
        #[arg(short, long)]
        low: f64,

        /// Upper cutoff, normalised to Nyquist
        #[arg(long, default_value_t = 0.0)]
        high: f64,

        /// Number of frequency response points to print
        #[arg(short, long, default_value_t = 0)]
        points: usize,
    },

    /// Classify whitespace-separated sample rows with a trained model
    #[command(name = "classify")]
    Classify {
        /// Path to the descriptor file
        descriptor: PathBuf,

        /// Text file with one sample per line
        samples: PathBuf,

        /// Print every class probability
        #[arg(short, long)]
        probabilities: bool,
    },
}

/// Filter type as spelled on the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    Low,
    High,
    Band,
}

impl From<FilterKind> for FilterType {
    fn from(kind: FilterKind) -> Self {
        match kind {
            FilterKind::Low => FilterType::LowPass,
            FilterKind::High => FilterType::HighPass,
            FilterKind::Band => FilterType::BandPass,
        }
    }
}
