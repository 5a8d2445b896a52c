//! Typed configuration for the harvester, the executor and pacing.
//!
//! Defaults match the values the hosted list tolerates in practice;
//! [`CullerConfig::from_env`] overrides the operator-tunable subset.

use std::time::Duration;

use crate::error::AppError;

/// Host selectors shared by the core and the concrete host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selectors {
    /// Rendered list cells.
    pub cell: String,
    /// Confirm control of the confirmation prompt.
    pub confirm: String,
    /// Confirm control tried when `confirm` is absent.
    pub alt_confirm: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            cell: r#"[data-testid="cellInnerDiv"], [data-testid="UserCell"]"#.to_string(),
            confirm: r#"[data-testid="confirmationSheetConfirm"]"#.to_string(),
            alt_confirm: r#"[data-testid="unfollow"]"#.to_string(),
        }
    }
}

/// Sleep lengths between host interactions.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Wait after a descend probe (scroll to extent).
    pub probe_delay: Duration,
    /// Wait after an ordinary scroll step.
    pub scroll_delay: Duration,
    /// Wait after activating the action trigger.
    pub action_delay: Duration,
    /// Wait after activating the confirm control.
    pub confirm_delay: Duration,
    /// Wait after a regular lookup step.
    pub search_delay: Duration,
    /// Wait after a fast lookup step.
    pub fast_delay: Duration,
    /// Uniform random jitter added to every paced wait.
    pub jitter: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            probe_delay: Duration::from_millis(1500),
            scroll_delay: Duration::from_millis(800),
            action_delay: Duration::from_millis(800),
            confirm_delay: Duration::from_millis(1000),
            search_delay: Duration::from_millis(400),
            fast_delay: Duration::from_millis(250),
            jitter: Duration::from_millis(300),
        }
    }
}

impl PacingConfig {
    /// Every wait set to zero. Used by tests and dry runs against fakes.
    pub fn immediate() -> Self {
        Self {
            probe_delay: Duration::ZERO,
            scroll_delay: Duration::ZERO,
            action_delay: Duration::ZERO,
            confirm_delay: Duration::ZERO,
            search_delay: Duration::ZERO,
            fast_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

/// Harvester tuning.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Non-excluded entities kept in a result.
    pub cap: usize,
    /// Unchanged-extent probes that mark the bottom of the list.
    pub terminal_probes: u32,
    /// Identical visible-id sets that mark render stagnation.
    pub max_same_content: u32,
    /// Harvest step as a fraction of the viewport.
    pub step_fraction: f64,
    /// Scroll offset below which the list counts as at the top.
    pub near_top_px: f64,
    /// A step moving less than this counts as stuck.
    pub stuck_px: f64,
    /// Stuck steps in a row that count as reaching the end.
    pub stuck_limit: u32,
    /// Extra forward scrolls spent looking for excluded entities.
    pub backfill_scrolls: u32,
    /// Backfill step as a fraction of the viewport.
    pub backfill_fraction: f64,
    /// Emit harvest progress every this many new non-excluded entities.
    pub progress_every: usize,
    /// Bound on the wait for the first cell to render.
    pub render_timeout: Duration,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            cap: 100,
            terminal_probes: 10,
            max_same_content: 10,
            step_fraction: 0.9,
            near_top_px: 100.0,
            stuck_px: 50.0,
            stuck_limit: 2,
            backfill_scrolls: 5,
            backfill_fraction: 0.5,
            progress_every: 10,
            render_timeout: Duration::from_secs(10),
        }
    }
}

impl HarvestConfig {
    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_terminal_probes(mut self, probes: u32) -> Self {
        self.terminal_probes = probes;
        self
    }

    pub fn with_max_same_content(mut self, n: u32) -> Self {
        self.max_same_content = n;
        self
    }
}

/// A bounded scroll pass used by lookup and warm-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollPass {
    /// Step size in viewports.
    pub viewports: f64,
    pub max_steps: u32,
    /// Sweep every this many steps.
    pub check_every: u32,
    /// Unchanged extents that end the pass.
    pub unchanged_limit: u32,
}

/// Batch executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Lookup retries for the head entity before it is requeued.
    pub lookup_retries: u32,
    /// Empty cycles in a row before a long jump.
    pub stall_threshold: u32,
    /// Long jump distance in viewports.
    pub long_jump_viewports: f64,
    /// Pause after a rate-limit signal.
    pub cooldown: Duration,
    /// Bound on the wait for the confirmation prompt.
    pub confirm_timeout: Duration,
    /// Bound on the wait for the first cell to render.
    pub render_timeout: Duration,
    /// Warm-up runs when more than this many entities are pending.
    pub warmup_threshold: usize,
    pub warmup_rounds: u32,
    /// Warm-up ends early once it actioned more than this many.
    pub warmup_success_stop: usize,
    pub warmup_pass: ScrollPass,
    /// Fast lookup rounds before the regular pass.
    pub fast_rounds: u32,
    pub fast_pass: ScrollPass,
    /// Cursor sweep that resumes where the previous attempt stopped.
    pub regular_pass: ScrollPass,
    /// Transient failures in a row that halt the run.
    pub max_consecutive_errors: u32,
    /// Minimum spacing of heartbeat writes.
    pub heartbeat_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            lookup_retries: 2,
            stall_threshold: 3,
            long_jump_viewports: 6.0,
            cooldown: Duration::from_secs(300),
            confirm_timeout: Duration::from_millis(5000),
            render_timeout: Duration::from_secs(10),
            warmup_threshold: 10,
            warmup_rounds: 3,
            warmup_success_stop: 5,
            warmup_pass: ScrollPass {
                viewports: 4.0,
                max_steps: 30,
                check_every: 3,
                unchanged_limit: 5,
            },
            fast_rounds: 2,
            fast_pass: ScrollPass {
                viewports: 4.0,
                max_steps: 20,
                check_every: 3,
                unchanged_limit: 5,
            },
            regular_pass: ScrollPass {
                viewports: 0.9,
                max_steps: 10,
                check_every: 1,
                unchanged_limit: 8,
            },
            max_consecutive_errors: 10,
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

impl ExecutorConfig {
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn with_lookup_retries(mut self, retries: u32) -> Self {
        self.lookup_retries = retries;
        self
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct CullerConfig {
    /// Default harvest target (non-excluded entities).
    pub target_count: usize,
    pub selectors: Selectors,
    pub pacing: PacingConfig,
    pub harvest: HarvestConfig,
    pub executor: ExecutorConfig,
}

impl CullerConfig {
    pub fn new() -> Self {
        Self {
            target_count: 100,
            ..Default::default()
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `CULLER_TARGET_COUNT` (default 100)
    /// - `CULLER_COOLDOWN_SECS` (default 300)
    /// - `CULLER_PROBE_DELAY_MS` (default 1500)
    /// - `CULLER_ACTION_DELAY_MS` (default 800)
    /// - `CULLER_CONFIRM_TIMEOUT_MS` (default 5000)
    /// - `CULLER_JITTER_MS` (default 300)
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::new();

        config.target_count = env_u64("CULLER_TARGET_COUNT", 100)? as usize;
        if config.target_count == 0 {
            return Err(AppError::ConfigError(
                "CULLER_TARGET_COUNT must be at least 1".into(),
            ));
        }
        config.harvest.cap = config.target_count;

        config.executor.cooldown = Duration::from_secs(env_u64("CULLER_COOLDOWN_SECS", 300)?);
        config.pacing.probe_delay = Duration::from_millis(env_u64("CULLER_PROBE_DELAY_MS", 1500)?);
        config.pacing.action_delay =
            Duration::from_millis(env_u64("CULLER_ACTION_DELAY_MS", 800)?);

        let confirm_ms = env_u64("CULLER_CONFIRM_TIMEOUT_MS", 5000)?;
        if confirm_ms == 0 {
            return Err(AppError::ConfigError(
                "CULLER_CONFIRM_TIMEOUT_MS must be at least 1".into(),
            ));
        }
        config.executor.confirm_timeout = Duration::from_millis(confirm_ms);
        config.pacing.jitter = Duration::from_millis(env_u64("CULLER_JITTER_MS", 300)?);

        Ok(config)
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64, AppError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!(
                "Invalid {name} '{raw}': must be a non-negative integer"
            ))
        }),
    }
}
