//! Search limits and engine configuration.

use std::env;

/// Structural caps that bound every search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Candidate paths one top-level parse may create before aborting.
    pub max_candidates: usize,
    /// Ceiling for any repeat count, including counts read from other fields.
    pub max_repeat: usize,
    /// Maximum grammar nesting followed during a traversal.
    pub max_depth: usize,
    /// Maximum number of messages in one flow decomposition.
    pub max_flow_messages: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_candidates: 100_000,
            max_repeat: 1000,
            max_depth: 256,
            max_flow_messages: 4096,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub limits: Limits,
    /// Seed for reproducible specialization; `None` draws from entropy.
    pub seed: Option<u64>,
}

fn env_number(name: &str) -> Result<Option<u64>, String> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| format!("{}: invalid value '{}': {}", name, raw, e)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(format!("{}: {}", name, e)),
    }
}

impl EngineConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Defaults overridden by `PROTOSYNTH_SEED`, `PROTOSYNTH_MAX_CANDIDATES`,
    /// `PROTOSYNTH_MAX_REPEAT`, `PROTOSYNTH_MAX_DEPTH` and `PROTOSYNTH_MAX_FLOW_MESSAGES`.
    pub fn from_env() -> Result<Self, String> {
        let mut config = EngineConfig::default();
        if let Some(seed) = env_number("PROTOSYNTH_SEED")? {
            config.seed = Some(seed);
        }
        let limits = &mut config.limits;
        for (name, slot) in [
            ("PROTOSYNTH_MAX_CANDIDATES", &mut limits.max_candidates),
            ("PROTOSYNTH_MAX_REPEAT", &mut limits.max_repeat),
            ("PROTOSYNTH_MAX_DEPTH", &mut limits.max_depth),
            ("PROTOSYNTH_MAX_FLOW_MESSAGES", &mut limits.max_flow_messages),
        ] {
            if let Some(v) = env_number(name)? {
                *slot = usize::try_from(v).map_err(|_| format!("{}: invalid value '{}': out of range", name, v))?;
            }
        }
        Ok(config)
    }
}
