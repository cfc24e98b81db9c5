use anyhow::{bail, Context, Result};
use clap::Parser;
use gwscan::api::{GwscanConfig, OracleLoader};
use gwscan::archive::WavArchive;
use gwscan::args::{Cli, Commands, EventArgs};
use gwscan::cache::PsdCache;
use gwscan::matched_filter::sigma;
use gwscan::noise::{inject, GaussianNoise};
use gwscan::pipeline::{fan_out, Event, Pipeline};
use gwscan::qtransform::QGram;
use gwscan::series::PowerSpectralDensity;
use gwscan::waveform::{generate_template, NewtonianChirp, WaveformOracle, WaveformParams};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        log::error!("Error: {:#}", e);
        process::exit(1);
    }
}

fn resolve_event(config: &GwscanConfig, args: &EventArgs) -> Result<Option<Event>> {
    if let Some(name) = &args.event {
        let event = config
            .event(name)
            .with_context(|| format!("Event '{}' is not defined in the config", name))?;
        return Ok(Some(event));
    }
    match (args.gps, args.mass1, args.mass2) {
        (Some(gps), Some(mass1), Some(mass2)) => Ok(Some(Event {
            name: format!("{}", gps),
            gps,
            mass1,
            mass2,
            distance: args.distance,
        })),
        (None, None, None) => Ok(None),
        _ => bail!("--gps, --mass1 and --mass2 must be given together"),
    }
}

fn load_oracle(cli: &Cli, config: &GwscanConfig) -> Result<Arc<dyn WaveformOracle>> {
    let path = cli
        .plugin
        .clone()
        .or_else(|| config.plugin().map(PathBuf::from));
    match path {
        Some(path) => {
            let full_path = std::fs::canonicalize(&path)
                .with_context(|| format!("Failed to resolve plugin path: {}", path.display()))?;
            let loader = unsafe {
                OracleLoader::load(&full_path)
                    .with_context(|| format!("Failed to load plugin: {:?}", full_path))?
            };
            Ok(loader.oracle())
        }
        None => Ok(Arc::new(NewtonianChirp)),
    }
}

fn write_rows<P: AsRef<Path>>(path: P, rows: impl Iterator<Item = (f64, f64)>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for (x, y) in rows {
        writeln!(out, "{:.6}\t{:e}", x, y)?;
    }
    out.flush()?;
    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = GwscanConfig::locate(cli.config.as_deref())?;
    let settings = config.pipeline_settings().context("Invalid pipeline config")?;
    let archive_dir = cli
        .archive
        .clone()
        .or_else(|| config.archive().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("frames"));
    let archive = Arc::new(WavArchive::new(&archive_dir));
    let oracle = load_oracle(&cli, &config)?;

    let mut pipeline = Pipeline::new(archive.clone(), oracle.clone(), settings.clone());
    if !cli.no_cache && config.cache_enabled() {
        match PsdCache::platform() {
            Ok(cache) => pipeline = pipeline.with_cache(cache),
            Err(e) => log::warn!("PSD cache disabled: {:#}", e),
        }
    }
    let pipeline = Arc::new(pipeline);

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if config.threads() > 0 {
        builder.worker_threads(config.threads()).max_blocking_threads(config.threads());
    }
    let runtime = builder.enable_all().build().context("Failed to start runtime")?;

    match cli.command {
        Commands::Simulate {
            detector,
            gps_start,
            duration,
            sample_rate,
            sigma: noise_sigma,
            seed,
            inject: injection,
            snr,
        } => {
            let n = (duration * sample_rate).round() as usize;
            let mut data = GaussianNoise::new(seed).white(n, noise_sigma, sample_rate, gps_start)?;
            if let Some(event) = resolve_event(&config, &injection)? {
                let delta_f = 1.0 / (n as f64 / sample_rate);
                let params = WaveformParams {
                    approximant: settings.approximant.clone(),
                    mass1: event.mass1,
                    mass2: event.mass2,
                    distance: event.distance,
                    f_lower: settings.f_lower,
                    f_final: settings.f_final.min(sample_rate / 2.0),
                };
                let template = generate_template(oracle.as_ref(), &params, delta_f)?;
                let scale = match snr {
                    Some(target) => {
                        let level = 2.0 * noise_sigma * noise_sigma / sample_rate;
                        let flat = PowerSpectralDensity::frequency(vec![level; n / 2 + 1], delta_f, 0.0)?;
                        target / sigma(&template, &flat, params.f_lower, params.f_final)?
                    }
                    None => 1.0,
                };
                log::info!("Injecting {} at {} with scale {:e}", event.name, event.gps, scale);
                data = inject(&data, &template.series, event.gps, scale)?;
            }
            let path = archive.store(&detector, &data)?;
            println!("Wrote {}", path.display());
        }
        Commands::Psd {
            detector,
            start,
            end,
            output,
        } => {
            let psd = pipeline.psd(&detector, start, end)?;
            match output {
                Some(path) => {
                    write_rows(&path, psd.axis().into_iter().zip(psd.data().iter().copied()))?;
                    println!("Wrote {} bins to {}", psd.len(), path.display());
                }
                None => {
                    let mut sorted = psd.data().to_vec();
                    let median = gwscan::util::median(&mut sorted);
                    println!(
                        "{}: {} bins at {} Hz, median {:e} /Hz",
                        detector,
                        psd.len(),
                        psd.delta(),
                        median
                    );
                }
            }
        }
        Commands::Snr {
            detectors,
            event,
            output,
        } => {
            let event = resolve_event(&config, &event)?.context("An event (--event or --gps/--mass1/--mass2) is required")?;
            let job_event = event.clone();
            let results = runtime.block_on(fan_out(pipeline.clone(), &detectors, move |p, d| {
                p.matched_filter_snr(d, &job_event)
            }));
            for (detector, result) in results {
                match result {
                    Ok(report) => {
                        println!(
                            "{} {}: peak |SNR| {:.2} at {:.4}",
                            report.event, detector, report.peak.value, report.peak.position
                        );
                        if let Some(prefix) = &output {
                            let path = PathBuf::from(format!("{}-{}.txt", prefix.display(), detector));
                            let magnitudes = report.snr.magnitudes();
                            write_rows(&path, magnitudes.axis().into_iter().zip(magnitudes.data().iter().copied()))?;
                        }
                    }
                    Err(e) => println!("{} {}: failed: {:#}", event.name, detector, e),
                }
            }
        }
        Commands::Qtransform {
            detector,
            gps,
            window,
            qrange,
            frange,
            output,
        } => {
            let mut params = config.q_params()?;
            if let Some(q) = qrange {
                params = params.with_qrange(q);
            }
            if let Some(f) = frange {
                params = params.with_frange(f);
            }
            let map = pipeline.q_transform(&detector, gps, window, &params)?;
            let peak = map.peak();
            let (ntimes, nfreqs) = map.shape();
            println!(
                "{}: {}x{} map, peak energy {:.2} at {:.4} s, {:.1} Hz",
                detector, ntimes, nfreqs, peak.energy, peak.time, peak.frequency
            );
            if let Some(path) = output {
                let bin = bincode::serialize(&map)?;
                std::fs::write(&path, bin).with_context(|| format!("Failed to write {}", path.display()))?;
            }
        }
        Commands::Qgram {
            detectors,
            gps,
            half_width,
            qrange,
            frange,
            mismatch,
            energy_floor,
            limit,
        } => {
            let params = config.q_params()?;
            let qrange = qrange.unwrap_or(params.qrange);
            let mismatch = mismatch.unwrap_or(params.mismatch);
            let mut search = QGram::new()
                .with_frange(frange.unwrap_or(params.frange))
                .with_normalization(params.normalization);
            if let Some(floor) = energy_floor.or(config.energy_floor()) {
                search = search.with_energy_floor(floor);
            }
            let results = runtime.block_on(fan_out(pipeline.clone(), &detectors, move |p, d| {
                p.q_gram(d, gps, half_width, &search, qrange, mismatch)
            }));
            for (detector, result) in results {
                match result {
                    Ok(tiles) => {
                        println!("{}: {} tiles", detector, tiles.len());
                        for tile in tiles.iter().take(limit) {
                            println!(
                                "  t={:.4} dur={:.4} f={:.1} Q={:.1} E={:.2}",
                                tile.center_time(),
                                tile.duration,
                                tile.central_frequency,
                                tile.quality_factor,
                                tile.normalized_energy
                            );
                        }
                    }
                    Err(e) => println!("{}: failed: {:#}", detector, e),
                }
            }
        }
    }

    Ok(())
}
