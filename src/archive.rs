//! Sources of raw detector data.
//!
//! [`WavArchive`] reads a directory of frame files named
//! `<detector>-<gps_start>-<duration>.wav`, each a mono WAV whose sample
//! rate is the detector sampling rate. [`MemoryArchive`] serves series held
//! in memory.

use crate::error::{PipelineError, Result};
use crate::series::TimeSeries;
use anyhow::Context;
use log::{debug, info};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

/// Frame boundaries closer than this are treated as contiguous.
const BOUNDARY_TOLERANCE: f64 = 1e-6;

pub trait DataSource: Send + Sync {
    /// Samples of `detector` covering `[t_start, t_end)`.
    fn fetch(&self, detector: &str, t_start: f64, t_end: f64) -> Result<TimeSeries>;
}

fn unavailable(detector: &str, start: f64, end: f64, reason: impl Into<String>) -> PipelineError {
    PipelineError::DataUnavailable {
        detector: detector.to_string(),
        start,
        end,
        reason: reason.into(),
    }
}

fn crop_span(series: &TimeSeries, detector: &str, t_start: f64, t_end: f64) -> Result<TimeSeries> {
    let half = series.delta() / 2.0;
    if t_start < series.origin() - half || t_end > series.end() + half {
        return Err(unavailable(
            detector,
            t_start,
            t_end,
            format!("archived span is [{}, {})", series.origin(), series.end()),
        ));
    }
    series.crop(t_start, t_end)
}

#[derive(Default)]
pub struct MemoryArchive {
    series: HashMap<String, TimeSeries>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, detector: &str, series: TimeSeries) {
        self.series.insert(detector.to_string(), series);
    }

    pub fn with(mut self, detector: &str, series: TimeSeries) -> Self {
        self.insert(detector, series);
        self
    }
}

impl DataSource for MemoryArchive {
    fn fetch(&self, detector: &str, t_start: f64, t_end: f64) -> Result<TimeSeries> {
        let series = self
            .series
            .get(detector)
            .ok_or_else(|| unavailable(detector, t_start, t_end, "detector not archived"))?;
        crop_span(series, detector, t_start, t_end)
    }
}

/// One frame file on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub detector: String,
    pub gps_start: f64,
    pub duration: f64,
    pub path: PathBuf,
}

impl Frame {
    pub fn file_name(detector: &str, gps_start: f64, duration: f64) -> String {
        format!("{}-{}-{}.wav", detector, gps_start, duration)
    }

    /// `None` for files not following the frame naming scheme.
    pub fn parse(path: &Path) -> Option<Frame> {
        let ext = path.extension()?.to_str()?;
        if !ext.eq_ignore_ascii_case("wav") {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let mut parts = stem.rsplitn(3, '-');
        let duration: f64 = parts.next()?.parse().ok()?;
        let gps_start: f64 = parts.next()?.parse().ok()?;
        let detector = parts.next()?;
        if detector.is_empty() || !(duration > 0.0) || !gps_start.is_finite() {
            return None;
        }
        Some(Frame {
            detector: detector.to_string(),
            gps_start,
            duration,
            path: path.to_path_buf(),
        })
    }

    pub fn end(&self) -> f64 {
        self.gps_start + self.duration
    }
}

pub struct WavArchive {
    root: PathBuf,
}

impl WavArchive {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Frames of `detector`, earliest first.
    pub fn frames(&self, detector: &str) -> anyhow::Result<Vec<Frame>> {
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list archive {}", self.root.display()))?;
        let mut frames = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if let Some(frame) = Frame::parse(&path) {
                if frame.detector == detector {
                    frames.push(frame);
                }
            }
        }
        frames.sort_by(|a, b| a.gps_start.total_cmp(&b.gps_start));
        Ok(frames)
    }

    /// Writes `series` as a frame of `detector` and returns its path.
    pub fn store(&self, detector: &str, series: &TimeSeries) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create archive {}", self.root.display()))?;
        let path = self
            .root
            .join(Frame::file_name(detector, series.origin(), series.span()));
        let rate = series.sample_rate().round();
        if (rate - series.sample_rate()).abs() > 1e-6 {
            anyhow::bail!("sample rate {} Hz is not an integer", series.sample_rate());
        }
        write_float_wav(&path, series.data(), rate as u32)?;
        info!("Stored {} s of {} in {}", series.span(), detector, path.display());
        Ok(path)
    }
}

impl DataSource for WavArchive {
    fn fetch(&self, detector: &str, t_start: f64, t_end: f64) -> Result<TimeSeries> {
        if !(t_end > t_start) {
            return Err(PipelineError::InvalidInput(format!(
                "empty request [{}, {})",
                t_start, t_end
            )));
        }
        let frames = self
            .frames(detector)
            .map_err(|e| unavailable(detector, t_start, t_end, format!("{:#}", e)))?;
        let needed: Vec<&Frame> = frames
            .iter()
            .filter(|f| f.end() > t_start && f.gps_start < t_end)
            .collect();
        let first = needed
            .first()
            .ok_or_else(|| unavailable(detector, t_start, t_end, "no frame overlaps the request"))?;
        for pair in needed.windows(2) {
            if (pair[1].gps_start - pair[0].end()).abs() > BOUNDARY_TOLERANCE {
                return Err(unavailable(
                    detector,
                    t_start,
                    t_end,
                    format!("gap between {} and {}", pair[0].end(), pair[1].gps_start),
                ));
            }
        }
        debug!("Reading {} frames of {} for [{}, {})", needed.len(), detector, t_start, t_end);

        let mut samples = Vec::new();
        let mut rate = None;
        for frame in &needed {
            let (data, frame_rate) = load_frame(&frame.path)
                .map_err(|e| unavailable(detector, t_start, t_end, format!("{:#}", e)))?;
            if rate.is_some_and(|r| r != frame_rate) {
                return Err(unavailable(
                    detector,
                    t_start,
                    t_end,
                    format!("{} changes sample rate to {} Hz", frame.path.display(), frame_rate),
                ));
            }
            rate = Some(frame_rate);
            samples.extend(data);
        }
        let rate = rate.unwrap_or_default() as f64;
        if samples.is_empty() || rate <= 0.0 {
            return Err(unavailable(detector, t_start, t_end, "frames hold no samples"));
        }
        let series = TimeSeries::time(samples, 1.0 / rate, first.gps_start)?;
        crop_span(&series, detector, t_start, t_end)
    }
}

/// Decodes a mono frame into samples and its sample rate.
pub fn load_frame<P: AsRef<Path>>(path: P) -> anyhow::Result<(Vec<f64>, u32)> {
    let path = path.as_ref();
    debug!("Decoding frame {}", path.display());

    let file = File::open(path)
        .with_context(|| format!("Failed to open frame: {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(ReadOnlySource::new(BufReader::new(file))), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("wav");
    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();
    let probed = get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .with_context(|| format!("Failed to probe frame {}", path.display()))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .with_context(|| "No supported track in frame")?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .with_context(|| format!("Frame {} has no sample rate", path.display()))?;

    let dec_opts: DecoderOptions = Default::default();
    let mut decoder = get_codecs()
        .make(&track.codec_params, &dec_opts)
        .with_context(|| "Failed to create decoder")?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::ResetRequired) => continue,
            Err(_) => break,
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = decoder
            .decode(&packet)
            .with_context(|| format!("Failed to decode {}", path.display()))?;
        let spec = *decoded.spec();
        let frames = decoded.capacity() as u64;
        if frames == 0 {
            continue;
        }
        if spec.channels.count() != 1 {
            anyhow::bail!(
                "frame {} has {} channels, expected one",
                path.display(),
                spec.channels.count()
            );
        }
        let mut buf = SampleBuffer::<f64>::new(frames, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    debug!("Decoded {} samples at {} Hz", samples.len(), sample_rate);
    Ok((samples, sample_rate))
}

/// Mono 32-bit IEEE float WAV.
pub fn write_float_wav<P: AsRef<Path>>(path: P, samples: &[f64], sample_rate: u32) -> anyhow::Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create frame: {}", path.display()))?;
    let mut out = BufWriter::new(file);

    let num_channels = 1u16;
    let bits_per_sample = 32u16;
    let block_align = num_channels * (bits_per_sample / 8);
    let byte_rate = sample_rate * block_align as u32;
    let data_size = (samples.len() * block_align as usize) as u32;

    out.write_all(b"RIFF")?;
    out.write_all(&(36 + data_size).to_le_bytes())?;
    out.write_all(b"WAVE")?;

    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&3u16.to_le_bytes())?;
    out.write_all(&num_channels.to_le_bytes())?;
    out.write_all(&sample_rate.to_le_bytes())?;
    out.write_all(&byte_rate.to_le_bytes())?;
    out.write_all(&block_align.to_le_bytes())?;
    out.write_all(&bits_per_sample.to_le_bytes())?;

    out.write_all(b"data")?;
    out.write_all(&data_size.to_le_bytes())?;
    for &sample in samples {
        out.write_all(&(sample as f32).to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gwscan-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn ramp(n: usize, rate: f64, origin: f64, offset: f64) -> TimeSeries {
        let samples = (0..n).map(|i| offset + i as f64 * 0.25).collect();
        TimeSeries::time(samples, 1.0 / rate, origin).unwrap()
    }

    #[test]
    fn test_frame_names() {
        let name = Frame::file_name("H1", 1126259446.0, 32.0);
        assert_eq!(name, "H1-1126259446-32.wav");
        let frame = Frame::parse(Path::new(&name)).unwrap();
        assert_eq!(frame.detector, "H1");
        assert_eq!(frame.gps_start, 1126259446.0);
        assert_eq!(frame.end(), 1126259478.0);
        assert!(Frame::parse(Path::new("notes.txt")).is_none());
        assert!(Frame::parse(Path::new("H1-abc-32.wav")).is_none());
    }

    #[test]
    fn test_fetch_across_frames() {
        let dir = scratch("frames");
        let archive = WavArchive::new(&dir);
        archive.store("L1", &ramp(1024, 256.0, 100.0, 0.0)).unwrap();
        archive.store("L1", &ramp(1024, 256.0, 104.0, 256.0)).unwrap();

        let series = archive.fetch("L1", 102.0, 106.0).unwrap();
        assert_eq!(series.len(), 1024);
        assert_eq!(series.origin(), 102.0);
        assert_eq!(series.sample_rate(), 256.0);
        // samples continue across the frame boundary
        for (i, x) in series.data().iter().enumerate() {
            assert_eq!(*x, (512 + i) as f64 * 0.25);
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_spans_are_unavailable() {
        let dir = scratch("gaps");
        let archive = WavArchive::new(&dir);
        archive.store("V1", &ramp(1024, 256.0, 0.0, 0.0)).unwrap();
        archive.store("V1", &ramp(1024, 256.0, 8.0, 0.0)).unwrap();

        assert!(matches!(
            archive.fetch("V1", 2.0, 10.0),
            Err(PipelineError::DataUnavailable { .. })
        ));
        assert!(matches!(
            archive.fetch("V1", 2.0, 20.0),
            Err(PipelineError::DataUnavailable { .. })
        ));
        assert!(matches!(
            archive.fetch("H1", 0.0, 1.0),
            Err(PipelineError::DataUnavailable { .. })
        ));
        assert_eq!(archive.fetch("V1", 0.5, 3.5).unwrap().len(), 768);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_memory_archive() {
        let archive = MemoryArchive::new().with("H1", ramp(160, 16.0, 10.0, 0.0));
        let series = archive.fetch("H1", 12.0, 14.0).unwrap();
        assert_eq!(series.len(), 32);
        assert_eq!(series.data()[0], 8.0);
        assert!(matches!(
            archive.fetch("H1", 5.0, 12.0),
            Err(PipelineError::DataUnavailable { .. })
        ));
        assert!(matches!(
            archive.fetch("L1", 12.0, 14.0),
            Err(PipelineError::DataUnavailable { .. })
        ));
    }
}
