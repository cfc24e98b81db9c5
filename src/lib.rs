pub mod api;
pub mod archive;
pub mod args;
pub mod cache;
pub mod error;
pub mod filter;
pub mod fourier;
pub mod matched_filter;
pub mod noise;
pub mod pipeline;
pub mod psd;
pub mod qtransform;
pub mod series;
pub mod util;
pub mod waveform;

pub use error::{PipelineError, Result};
