use crate::lookup::LookupStrategy;
use crate::partition::PartitionScheme;

#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Run the rewriting rule pipeline before translation.
    pub enable_rewriting: bool,
    pub enable_parallel: bool,
    /// Worker threads for the partition pool; `None` lets rayon decide.
    pub max_threads: Option<usize>,
    /// Number of partitions a top-level range is split into.
    pub cores: usize,
    pub partition_scheme: PartitionScheme,
    /// Force one lookup implementation instead of automatic selection.
    pub lookup_strategy: Option<LookupStrategy>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            enable_rewriting: true,
            enable_parallel: true,
            max_threads: None,
            cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            partition_scheme: PartitionScheme::Index,
            lookup_strategy: None,
        }
    }
}

impl ExecConfig {
    /// Single-partition, single-threaded configuration.
    pub fn sequential() -> Self {
        Self {
            enable_parallel: false,
            cores: 1,
            ..Self::default()
        }
    }

    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores.max(1);
        self
    }

    pub fn with_rewriting(mut self, enable: bool) -> Self {
        self.enable_rewriting = enable;
        self
    }

    pub fn with_lookup_strategy(mut self, strategy: LookupStrategy) -> Self {
        self.lookup_strategy = Some(strategy);
        self
    }

    pub fn with_partition_scheme(mut self, scheme: PartitionScheme) -> Self {
        self.partition_scheme = scheme;
        self
    }
}
