//! Run configuration.
//!
//! [`SegmentConfig`] is built once and handed unchanged to every backend and
//! every worker, so threshold, modulus and convergence policy cannot drift
//! between them. It can be assembled with the `with_*` builder methods or
//! loaded from TOML:
//!
//! ```toml
//! threshold = 10
//! modulus = 256
//! policy = "min_swap"
//! backend = "distributed"
//! workers = 4
//! remainder = "drop"
//!
//! [convergence]
//! mode = "change_driven"
//! ```

use crate::core::error::ConfigError;
use crate::core::types::Threshold;
use crate::distributed::convergence::ConvergencePolicy;
use crate::distributed::partition::RemainderPolicy;
use crate::kernel::policy::UnificationPolicy;
use crate::kernel::{KernelKind, SweepMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Default projection modulus.
pub const DEFAULT_MODULUS: u32 = 256;

/// Largest modulus whose projected values still fit in one output byte.
pub const MAX_MODULUS: u32 = 256;

/// Execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// One worker, data-parallel merge to a true fixed point.
    SharedMemory,
    /// Row bands across message-passing workers with halo exchange.
    #[default]
    Distributed,
    /// Distributed coordination with the per-band merge offloaded to the GPU.
    Hybrid,
}

impl Backend {
    /// Kernel form used when the configuration does not override it.
    pub fn default_kernel(self) -> KernelKind {
        match self {
            Backend::SharedMemory => KernelKind::Parallel,
            Backend::Distributed => KernelKind::Sequential,
            Backend::Hybrid => KernelKind::Accelerator,
        }
    }

    /// Sweep mode used when the configuration does not override it.
    pub fn default_sweep(self) -> SweepMode {
        match self {
            Backend::SharedMemory | Backend::Distributed => SweepMode::ToFixedPoint,
            Backend::Hybrid => SweepMode::Single,
        }
    }

    /// Whether this backend coordinates several workers.
    pub fn is_multi_worker(self) -> bool {
        !matches!(self, Backend::SharedMemory)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::SharedMemory => "shared_memory",
            Backend::Distributed => "distributed",
            Backend::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" | "shared_memory" | "shared-memory" => Ok(Backend::SharedMemory),
            "distributed" => Ok(Backend::Distributed),
            "hybrid" => Ok(Backend::Hybrid),
            other => Err(ConfigError::Parse(format!("unknown backend '{}'", other))),
        }
    }
}

/// Configuration shared by every backend and worker of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Intensity-difference threshold `T`.
    pub threshold: Threshold,
    /// Modulus of the display projection.
    pub modulus: u32,
    /// How a unification rewrites labels.
    pub policy: UnificationPolicy,
    /// Number of workers (row bands).
    pub workers: usize,
    /// Execution strategy.
    pub backend: Backend,
    /// Kernel form override; `None` uses the backend default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelKind>,
    /// Per-round sweep mode override; `None` uses the backend default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepMode>,
    /// What to do with rows left over by `height / workers`.
    pub remainder: RemainderPolicy,
    /// Data-parallel pool size (0 = rayon default).
    pub threads: usize,
    /// When the distributed loop stops.
    pub convergence: ConvergencePolicy,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            threshold: Threshold::default(),
            modulus: DEFAULT_MODULUS,
            policy: UnificationPolicy::default(),
            workers: 1,
            backend: Backend::default(),
            kernel: None,
            sweep: None,
            remainder: RemainderPolicy::default(),
            threads: 0,
            convergence: ConvergencePolicy::default(),
        }
    }
}

impl SegmentConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Set the threshold.
    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the projection modulus.
    pub fn with_modulus(mut self, modulus: u32) -> Self {
        self.modulus = modulus;
        self
    }

    /// Set the unification policy.
    pub fn with_policy(mut self, policy: UnificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the convergence policy.
    pub fn with_convergence(mut self, convergence: ConvergencePolicy) -> Self {
        self.convergence = convergence;
        self
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the backend.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Override the kernel form.
    pub fn with_kernel(mut self, kernel: KernelKind) -> Self {
        self.kernel = Some(kernel);
        self
    }

    /// Override the per-round sweep mode.
    pub fn with_sweep(mut self, sweep: SweepMode) -> Self {
        self.sweep = Some(sweep);
        self
    }

    /// Set the remainder policy.
    pub fn with_remainder(mut self, remainder: RemainderPolicy) -> Self {
        self.remainder = remainder;
        self
    }

    /// Set the data-parallel pool size.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Kernel form actually used by this run.
    pub fn effective_kernel(&self) -> KernelKind {
        self.kernel.unwrap_or_else(|| self.backend.default_kernel())
    }

    /// Sweep mode actually used by this run.
    ///
    /// The shared-memory backend has no later round to re-converge in, so it
    /// always sweeps to a local fixed point.
    pub fn effective_sweep(&self) -> SweepMode {
        match self.backend {
            Backend::SharedMemory => SweepMode::ToFixedPoint,
            backend => self.sweep.unwrap_or_else(|| backend.default_sweep()),
        }
    }

    /// Check the configuration for values no backend can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold.value() == 0 {
            return Err(ConfigError::InvalidThreshold(0));
        }
        if self.modulus == 0 || self.modulus > MAX_MODULUS {
            return Err(ConfigError::InvalidModulus(self.modulus));
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        self.convergence.validate()?;
        if !self.backend.is_multi_worker() && self.workers > 1 {
            return Err(ConfigError::WorkersUnsupported {
                backend: self.backend.to_string(),
                workers: self.workers,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SegmentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threshold.value(), 10);
        assert_eq!(config.modulus, 256);
        assert_eq!(config.convergence, ConvergencePolicy::Fixed { rounds: 5 });
    }

    #[test]
    fn test_builder() {
        let config = SegmentConfig::new()
            .with_threshold(Threshold::new(4).unwrap())
            .with_workers(3)
            .with_policy(UnificationPolicy::FullPropagation)
            .with_convergence(ConvergencePolicy::change_driven());

        assert_eq!(config.threshold.value(), 4);
        assert_eq!(config.workers, 3);
        assert_eq!(config.policy, UnificationPolicy::FullPropagation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let config = SegmentConfig::new().with_modulus(1024);
        assert_eq!(config.validate(), Err(ConfigError::InvalidModulus(1024)));

        let config = SegmentConfig::new().with_workers(0);
        assert_eq!(config.validate(), Err(ConfigError::NoWorkers));

        let config = SegmentConfig::new()
            .with_backend(Backend::SharedMemory)
            .with_workers(2);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WorkersUnsupported { workers: 2, .. })
        ));
    }

    #[test]
    fn test_backend_defaults() {
        let hybrid = SegmentConfig::new().with_backend(Backend::Hybrid);
        assert_eq!(hybrid.effective_kernel(), KernelKind::Accelerator);
        assert_eq!(hybrid.effective_sweep(), SweepMode::Single);

        let shared = SegmentConfig::new()
            .with_backend(Backend::SharedMemory)
            .with_sweep(SweepMode::Single);
        assert_eq!(shared.effective_sweep(), SweepMode::ToFixedPoint);
    }

    #[test]
    fn test_toml_round_trip() {
        let text = r#"
            threshold = 4
            modulus = 128
            policy = "full_propagation"
            backend = "hybrid"
            workers = 2

            [convergence]
            mode = "change_driven"
        "#;
        let config = SegmentConfig::from_toml_str(text).unwrap();
        assert_eq!(config.threshold.value(), 4);
        assert_eq!(config.modulus, 128);
        assert_eq!(config.backend, Backend::Hybrid);
        assert_eq!(config.convergence, ConvergencePolicy::change_driven());

        let again = SegmentConfig::from_toml_str(&config.to_toml_string().unwrap()).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn test_toml_rejects_zero_threshold() {
        assert!(SegmentConfig::from_toml_str("threshold = 0").is_err());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("shared".parse::<Backend>().unwrap(), Backend::SharedMemory);
        assert_eq!("hybrid".parse::<Backend>().unwrap(), Backend::Hybrid);
        assert!("mpi".parse::<Backend>().is_err());
    }
}
