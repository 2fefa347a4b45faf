use std::env;
use std::time::Duration;

pub const DEFAULT_INSTRUCTION_LIMIT: u64 = 50_000_000;
pub const DEFAULT_HOOK_INTERVAL: u32 = 1_000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MEMORY_LIMIT: usize = 32 * 1024 * 1024;
pub const DEFAULT_MAX_OUTPUT_ENTRIES: usize = 10_000;

/// Execution caps applied to every chunk run and every exposed-function call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLimits {
    pub instruction_limit: u64,
    /// How often (in VM instructions) the budget hook runs.
    pub hook_interval: u32,
    pub timeout: Duration,
    pub memory_limit: usize,
    pub max_output_entries: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            instruction_limit: DEFAULT_INSTRUCTION_LIMIT,
            hook_interval: DEFAULT_HOOK_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            max_output_entries: DEFAULT_MAX_OUTPUT_ENTRIES,
        }
    }
}

impl SandboxLimits {
    /// Defaults overridden by `ESCAPE_SANDBOX_*` variables; unparsable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            instruction_limit: env_number("ESCAPE_SANDBOX_INSTRUCTIONS")
                .unwrap_or(defaults.instruction_limit),
            hook_interval: defaults.hook_interval,
            timeout: env_number("ESCAPE_SANDBOX_TIMEOUT_MS")
                .map_or(defaults.timeout, Duration::from_millis),
            memory_limit: env_number("ESCAPE_SANDBOX_MEMORY_BYTES")
                .and_then(|bytes| usize::try_from(bytes).ok())
                .unwrap_or(defaults.memory_limit),
            max_output_entries: env_number("ESCAPE_SANDBOX_MAX_OUTPUT")
                .and_then(|entries| usize::try_from(entries).ok())
                .unwrap_or(defaults.max_output_entries),
        }
    }

    #[must_use]
    pub fn with_instruction_limit(mut self, limit: u64) -> Self {
        self.instruction_limit = limit;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    #[must_use]
    pub fn with_max_output_entries(mut self, entries: usize) -> Self {
        self.max_output_entries = entries;
        self
    }
}

fn env_number(key: &str) -> Option<u64> {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}
