//! Harvester: convergent discovery over the lazily-rendered list.
//!
//! Phases:
//! 1. descend to the bottom, detected by an extent that stays unchanged
//!    for `terminal_probes` consecutive probes;
//! 2. harvest upward in fractional-viewport steps until the target is met,
//!    the top is reached, or the visible id set stagnates;
//! 3. if the top was reached short of the target, harvest downward again;
//! 4. backfill excluded entities with a few short forward scrolls, then
//!    restore the scroll offset;
//! 5. cap and order the result.
//!
//! A stop at any probe boundary returns the partial result.

use std::collections::{BTreeSet, HashSet};

use crate::config::{HarvestConfig, PacingConfig, Selectors};
use crate::error::AppError;
use crate::models::{Entity, ExclusionSet, HarvestResult};
use crate::progress::{ObserverEvent, ProgressReporter, ProgressSnapshot, RunStatus};
use crate::scheduler::RunContext;
use crate::store::{keys, write_key};
use crate::traits::{CellParser, ObserverChannel, PersistentStore, RenderedListHost};

/// Why a harvest walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TargetMet,
    ReachedEnd,
    Stagnant,
}

/// Events emitted by the harvester for monitoring/logging.
#[derive(Debug, Clone)]
pub enum HarvestEvent {
    Started { target: usize, excluded: usize },
    Descending { extent: f64, unchanged: u32 },
    BottomReached { extent: f64 },
    Step { position: f64, found: usize, visible: usize },
    WalkEnded { upward: bool, reason: StopReason },
    Backfilled { found: usize, missing: usize },
    Finished { non_excluded: usize, excluded: usize, partial: bool },
}

/// Trait for receiving harvest events (decoupled logging).
pub trait HarvestReporter: Send + Sync {
    fn report(&self, event: HarvestEvent) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHarvestReporter;

impl HarvestReporter for TracingHarvestReporter {
    fn report(&self, event: HarvestEvent) {
        match event {
            HarvestEvent::Started { target, excluded } => {
                tracing::info!(%target, %excluded, "Harvest started");
            }
            HarvestEvent::Descending { extent, unchanged } => {
                tracing::debug!(%extent, %unchanged, "Descend probe");
            }
            HarvestEvent::BottomReached { extent } => {
                tracing::info!(%extent, "Reached bottom of list");
            }
            HarvestEvent::Step {
                position,
                found,
                visible,
            } => {
                tracing::debug!(%position, %found, %visible, "Harvest step");
            }
            HarvestEvent::WalkEnded { upward, reason } => {
                tracing::info!(%upward, ?reason, "Harvest walk ended");
            }
            HarvestEvent::Backfilled { found, missing } => {
                tracing::debug!(%found, %missing, "Exclusion backfill done");
            }
            HarvestEvent::Finished {
                non_excluded,
                excluded,
                partial,
            } => {
                tracing::info!(%non_excluded, %excluded, %partial, "Harvest finished");
            }
        }
    }
}

/// Entities discovered so far, in discovery order.
#[derive(Debug, Default)]
struct Accumulator {
    seen: HashSet<String>,
    discovered: Vec<Entity>,
    non_excluded: usize,
}

impl Accumulator {
    /// Returns true if `entity` is new and not excluded.
    fn absorb(&mut self, entity: Entity, exclusions: &ExclusionSet) -> bool {
        if !self.seen.insert(entity.id.clone()) {
            return false;
        }
        let counts = !exclusions.contains(&entity.id);
        if counts {
            self.non_excluded += 1;
        }
        self.discovered.push(entity);
        counts
    }

    fn excluded_seen(&self, exclusions: &ExclusionSet) -> usize {
        self.discovered
            .iter()
            .filter(|e| exclusions.contains(&e.id))
            .count()
    }
}

/// Per-call harvest state.
struct Walk<'a, S, O, R> {
    target: usize,
    exclusions: &'a ExclusionSet,
    ctx: &'a RunContext,
    progress: &'a ProgressReporter<S, O>,
    reporter: &'a R,
    acc: Accumulator,
    last_reported: usize,
}

impl<S, O, R> Walk<'_, S, O, R> {
    /// Excluded ids not observed yet.
    fn missing_excluded(&self) -> usize {
        self.exclusions
            .iter()
            .filter(|id| !self.acc.seen.contains(*id))
            .count()
    }
}

/// Drives a [`RenderedListHost`] to convergence and extracts entities.
#[derive(Debug, Clone)]
pub struct Harvester<H, P> {
    host: H,
    parser: P,
    selectors: Selectors,
    config: HarvestConfig,
    pacing: PacingConfig,
}

impl<H, P> Harvester<H, P>
where
    H: RenderedListHost,
    P: CellParser,
{
    pub fn new(
        host: H,
        parser: P,
        selectors: Selectors,
        config: HarvestConfig,
        pacing: PacingConfig,
    ) -> Self {
        Self {
            host,
            parser,
            selectors,
            config,
            pacing,
        }
    }

    /// Harvests up to `target` non-excluded entities (capped at the
    /// configured cap) plus every excluded entity seen on the way.
    ///
    /// The result is persisted under `harvestResult` at progress
    /// checkpoints and on return, including a partial result on stop.
    pub async fn harvest<S, O, R>(
        &self,
        target: usize,
        exclusions: &ExclusionSet,
        ctx: &RunContext,
        progress: &ProgressReporter<S, O>,
        reporter: &R,
    ) -> Result<HarvestResult, AppError>
    where
        S: PersistentStore,
        O: ObserverChannel,
        R: HarvestReporter,
    {
        reporter.report(HarvestEvent::Started {
            target,
            excluded: exclusions.len(),
        });
        progress
            .publish(ProgressSnapshot::new(RunStatus::Harvesting, 0, target, 0))
            .await;

        let mut walk = Walk {
            target,
            exclusions,
            ctx,
            progress,
            reporter,
            acc: Accumulator::default(),
            last_reported: 0,
        };

        let partial = match self.run_phases(&mut walk).await {
            Ok(()) => false,
            Err(AppError::Cancelled) => true,
            Err(e) => return Err(e),
        };

        let result = HarvestResult::assemble(
            walk.acc.discovered,
            exclusions,
            self.config.cap.min(target),
            partial,
        );
        write_key(progress.store(), keys::HARVEST_RESULT, &result).await?;

        progress
            .notify(ObserverEvent::HarvestProgress {
                found: result.non_excluded_count,
                target,
            })
            .await;
        progress
            .notify(ObserverEvent::HarvestComplete {
                found: result.non_excluded_count,
                excluded: result.excluded_count,
            })
            .await;
        let status = if partial {
            RunStatus::Stopped
        } else {
            RunStatus::Idle
        };
        progress
            .publish(ProgressSnapshot::new(
                status,
                result.entities.len(),
                target,
                0,
            ))
            .await;

        reporter.report(HarvestEvent::Finished {
            non_excluded: result.non_excluded_count,
            excluded: result.excluded_count,
            partial,
        });
        Ok(result)
    }

    /// Scrolls until the extent stops growing. Returns the final extent.
    pub async fn descend<R: HarvestReporter>(
        &self,
        ctx: &RunContext,
        reporter: &R,
    ) -> Result<f64, AppError> {
        let mut last = self.host.current_extent().await?;
        let mut unchanged = 0;

        while unchanged < self.config.terminal_probes {
            ctx.check()?;
            self.host.scroll_to(last).await?;
            ctx.sleep(self.pacing.probe_delay).await?;

            let extent = self.host.current_extent().await?;
            if (extent - last).abs() < 1.0 {
                unchanged += 1;
            } else {
                unchanged = 0;
                last = extent;
            }
            reporter.report(HarvestEvent::Descending { extent, unchanged });
        }

        reporter.report(HarvestEvent::BottomReached { extent: last });
        Ok(last)
    }

    async fn run_phases<S, O, R>(&self, walk: &mut Walk<'_, S, O, R>) -> Result<(), AppError>
    where
        S: PersistentStore,
        O: ObserverChannel,
        R: HarvestReporter,
    {
        self.host
            .wait_for(&self.selectors.cell, self.config.render_timeout)
            .await?;

        self.descend(walk.ctx, walk.reporter).await?;

        self.scan(walk).await?;
        let reason = self.traverse(walk, true).await?;
        walk.reporter
            .report(HarvestEvent::WalkEnded { upward: true, reason });

        if reason == StopReason::ReachedEnd && walk.acc.non_excluded < walk.target {
            let reason = self.traverse(walk, false).await?;
            walk.reporter
                .report(HarvestEvent::WalkEnded { upward: false, reason });
        }

        self.backfill(walk).await
    }

    /// One directional walk. Stops on target, end of list or stagnation.
    async fn traverse<S, O, R>(
        &self,
        walk: &mut Walk<'_, S, O, R>,
        upward: bool,
    ) -> Result<StopReason, AppError>
    where
        S: PersistentStore,
        O: ObserverChannel,
        R: HarvestReporter,
    {
        let viewport = self.host.viewport_height().await?;
        let step = viewport * self.config.step_fraction;
        let delta = if upward { -step } else { step };

        let mut previous_visible: BTreeSet<String> = BTreeSet::new();
        let mut same_content = 0;
        let mut stuck = 0;
        let mut previous = self.host.current_position().await?;

        loop {
            if walk.acc.non_excluded >= walk.target {
                return Ok(StopReason::TargetMet);
            }
            walk.ctx.check()?;

            self.host.scroll_by(delta).await?;
            walk.ctx.sleep(self.pacing.scroll_delay).await?;
            let position = self.host.current_position().await?;

            let visible = self.scan(walk).await?;
            walk.reporter.report(HarvestEvent::Step {
                position,
                found: walk.acc.non_excluded,
                visible: visible.len(),
            });

            if walk.acc.non_excluded >= walk.target {
                return Ok(StopReason::TargetMet);
            }

            if upward && position < self.config.near_top_px {
                return Ok(StopReason::ReachedEnd);
            }
            if !upward {
                let extent = self.host.current_extent().await?;
                if position + viewport >= extent - self.config.near_top_px {
                    return Ok(StopReason::ReachedEnd);
                }
            }

            if (position - previous).abs() < self.config.stuck_px {
                stuck += 1;
                if stuck >= self.config.stuck_limit {
                    return Ok(StopReason::ReachedEnd);
                }
            } else {
                stuck = 0;
                previous = position;
            }

            if !visible.is_empty() {
                if visible == previous_visible {
                    same_content += 1;
                    if same_content >= self.config.max_same_content {
                        return Ok(StopReason::Stagnant);
                    }
                } else {
                    same_content = 0;
                    previous_visible = visible;
                }
            }
        }
    }

    /// Short forward scrolls looking for excluded entities not yet seen,
    /// then a return to the exact starting offset.
    async fn backfill<S, O, R>(&self, walk: &mut Walk<'_, S, O, R>) -> Result<(), AppError>
    where
        S: PersistentStore,
        O: ObserverChannel,
        R: HarvestReporter,
    {
        if walk.missing_excluded() == 0 {
            return Ok(());
        }

        let origin = self.host.current_position().await?;
        let result = self.backfill_scrolls(walk).await;
        self.host.scroll_to(origin).await?;

        walk.reporter.report(HarvestEvent::Backfilled {
            found: walk.acc.excluded_seen(walk.exclusions),
            missing: walk.missing_excluded(),
        });
        result
    }

    async fn backfill_scrolls<S, O, R>(&self, walk: &mut Walk<'_, S, O, R>) -> Result<(), AppError>
    where
        S: PersistentStore,
        O: ObserverChannel,
        R: HarvestReporter,
    {
        let step = self.host.viewport_height().await? * self.config.backfill_fraction;
        self.scan_excluded(walk).await?;
        for _ in 0..self.config.backfill_scrolls {
            if walk.missing_excluded() == 0 {
                break;
            }
            walk.ctx.check()?;
            self.host.scroll_by(step).await?;
            walk.ctx.sleep(self.pacing.scroll_delay).await?;
            self.scan_excluded(walk).await?;
        }
        Ok(())
    }

    /// Absorbs every visible entity. Returns the visible id set.
    async fn scan<S, O, R>(
        &self,
        walk: &mut Walk<'_, S, O, R>,
    ) -> Result<BTreeSet<String>, AppError>
    where
        S: PersistentStore,
        O: ObserverChannel,
        R: HarvestReporter,
    {
        let cells = self.host.enumerate(&self.selectors.cell).await?;
        let mut visible = BTreeSet::new();
        for cell in &cells {
            let Some(entity) = self.parser.parse(cell) else {
                continue;
            };
            visible.insert(entity.id.clone());
            if self.parser.is_candidate(cell) {
                walk.acc.absorb(entity, walk.exclusions);
            }
        }
        self.checkpoint(walk).await;
        Ok(visible)
    }

    /// Absorbs visible excluded entities only.
    async fn scan_excluded<S, O, R>(&self, walk: &mut Walk<'_, S, O, R>) -> Result<(), AppError>
    where
        S: PersistentStore,
        O: ObserverChannel,
        R: HarvestReporter,
    {
        let cells = self.host.enumerate(&self.selectors.cell).await?;
        for cell in &cells {
            if let Some(entity) = self.parser.parse(cell) {
                if walk.exclusions.contains(&entity.id) && self.parser.is_candidate(cell) {
                    walk.acc.absorb(entity, walk.exclusions);
                }
            }
        }
        Ok(())
    }

    /// Every `progress_every` new entities: notify the observer and persist
    /// the partial result so a reload mid-harvest is recoverable.
    async fn checkpoint<S, O, R>(&self, walk: &mut Walk<'_, S, O, R>)
    where
        S: PersistentStore,
        O: ObserverChannel,
        R: HarvestReporter,
    {
        let every = self.config.progress_every.max(1);
        let found = walk.acc.non_excluded;
        if found / every == walk.last_reported / every {
            return;
        }
        walk.last_reported = found;

        walk.progress
            .notify(ObserverEvent::HarvestProgress {
                found: found.min(walk.target),
                target: walk.target,
            })
            .await;

        let partial = HarvestResult::assemble(
            walk.acc.discovered.clone(),
            walk.exclusions,
            self.config.cap.min(walk.target),
            true,
        );
        if let Err(e) = write_key(walk.progress.store(), keys::HARVEST_RESULT, &partial).await
        {
            tracing::warn!(error = %e, "Failed to persist partial harvest");
        }
    }
}
