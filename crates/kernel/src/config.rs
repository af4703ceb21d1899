use serde::{Deserialize, Serialize};

/// Kernel limits and checks, carried by a world and inherited by every
/// world baked from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Upper bound on commands popped in one transaction. Exceeding it is a
    /// `CascadeOverflow`, never a silent truncation.
    pub max_command_executions: usize,
    /// Upper bound on rewrite steps while settling a single command.
    pub max_rewrite_iterations: usize,
    /// Recompute touched voxels after each transaction and compare them with
    /// the incrementally maintained index. Only honoured in debug builds.
    pub verify_pathing: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_command_executions: 100_000,
            max_rewrite_iterations: 32,
            verify_pathing: true,
        }
    }
}

impl KernelConfig {
    /// Whether the pathing consistency check runs for this build.
    pub fn pathing_check_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.verify_pathing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: KernelConfig = serde_json::from_str(r#"{ "max_command_executions": 10 }"#).unwrap();
        assert_eq!(cfg.max_command_executions, 10);
        assert_eq!(cfg.max_rewrite_iterations, 32);
        assert!(cfg.verify_pathing);
    }
}
