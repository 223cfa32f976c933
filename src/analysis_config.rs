//! Options that can tweak layout recovery.
//!
//! Constructed once at process start (usually from command-line flags) and passed by reference
//! into the analyses; there is deliberately no global store, so different runs in one process
//! may use different configurations.

/// Options controlling layout recovery. See [`Default`] for the stock configuration.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Collapse single-field wrapper structs after building each layout tree. Disabling this
    /// exposes the builder's raw output, which is occasionally useful when debugging the
    /// fold-in step.
    pub simplify_trivial_wrappers: bool,
    /// Snapshot recovered trees for GraphViz output.
    pub collect_graphviz: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            simplify_trivial_wrappers: true,
            collect_graphviz: false,
        }
    }
}

#[derive(clap::ArgEnum, Clone, Debug)]
/// Advanced configuration parameters
pub enum CommandLineAnalysisConfig {
    DisableTrivialStructureSimplification,
}

impl From<Vec<CommandLineAnalysisConfig>> for AnalysisConfig {
    fn from(v: Vec<CommandLineAnalysisConfig>) -> Self {
        use CommandLineAnalysisConfig::*;
        let mut r = AnalysisConfig::default();
        for v in v {
            match v {
                DisableTrivialStructureSimplification => {
                    r.simplify_trivial_wrappers = false;
                }
            }
        }
        r
    }
}
