use crate::error::Result;
use crate::waveform::{Polarizations, WaveformOracle, WaveformRequest};
use std::sync::Arc;

/// Symbol a plugin library exports to construct its oracle.
pub const ORACLE_SYMBOL: &[u8] = b"_gwscan_oracle_create";

/// Waveform oracle provided by a shared library.
///
/// The library stays loaded for as long as the oracle is reachable.
pub struct OracleLoader {
    oracle: Arc<dyn WaveformOracle>,
    _lib: Arc<libloading::Library>,
}

impl OracleLoader {
    /// # Safety
    ///
    /// The library must export [`ORACLE_SYMBOL`] as
    /// `fn() -> Box<dyn WaveformOracle>`, built with the same compiler and
    /// crate version as this binary.
    pub unsafe fn load<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let lib = libloading::Library::new(path.as_ref())?;

        let constructor: libloading::Symbol<fn() -> Box<dyn WaveformOracle>> = lib.get(ORACLE_SYMBOL)?;

        let oracle: Arc<dyn WaveformOracle> = Arc::from(constructor());
        log::info!("Loaded waveform oracle '{}' from {}", oracle.name(), path.as_ref().display());

        Ok(Self {
            oracle,
            _lib: Arc::new(lib),
        })
    }

    pub fn oracle(&self) -> Arc<dyn WaveformOracle> {
        Arc::new(PluginOracle {
            inner: self.oracle.clone(),
            _lib: self._lib.clone(),
        })
    }
}

/// Keeps the library mapped while the oracle is shared across workers.
struct PluginOracle {
    inner: Arc<dyn WaveformOracle>,
    _lib: Arc<libloading::Library>,
}

impl WaveformOracle for PluginOracle {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn generate(&self, request: &WaveformRequest) -> Result<Polarizations> {
        self.inner.generate(request)
    }
}
