//! The outer polling loop.
//!
//! Every `interval` the manager opens one short-lived session, asks for the
//! ensembles that still have actionable workflows and hands each one to an
//! [`EnsembleProcessor`]. All state mutation happens on this single task;
//! the only concurrency is the detached external processes the lifecycle
//! launches.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::repository::ensemble::{EnsembleSession, EnsembleStore};
use crate::workflow::context::{CycleContext, CyclePolicy, CycleReport};
use crate::workflow::lifecycle::LifecycleFactory;
use crate::workflow::processor::EnsembleProcessor;

/// Polls the store and advances every ensemble once per cycle.
pub struct EnsembleManager<S: EnsembleStore, F: LifecycleFactory> {
    store: S,
    factory: F,
    policy: CyclePolicy,
    interval: Duration,
    cycle: u64,
}

impl<S: EnsembleStore, F: LifecycleFactory> EnsembleManager<S, F> {
    pub fn new(store: S, factory: F, policy: CyclePolicy, interval: Duration) -> Self {
        Self {
            store,
            factory,
            policy,
            interval,
            cycle: 0,
        }
    }

    /// Number of cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Run exactly one cycle.
    ///
    /// Never fails: a session that cannot be opened or listed skips the
    /// cycle, and a broken ensemble is logged and skipped.
    pub async fn loop_once(&mut self) -> CycleReport {
        self.cycle += 1;
        let ctx = CycleContext::new(self.cycle, self.policy.clone());
        let span = info_span!("cycle", cycle = ctx.cycle);

        let report = process_cycle(&self.store, &self.factory, &ctx)
            .instrument(span)
            .await;

        if !report.is_quiet() {
            info!(
                cycle = report.cycle,
                ensembles = report.ensembles,
                transitions = report.transitions.len(),
                failures = report.failures.len(),
                "cycle complete"
            );
        }
        report
    }

    /// Run cycles until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between cycles and while sleeping, never in
    /// the middle of a transition.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "ensemble manager started");

        while !shutdown.is_cancelled() {
            self.loop_once().await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(cycles = self.cycle, "ensemble manager stopped");
    }
}

async fn process_cycle<S: EnsembleStore, F: LifecycleFactory>(
    store: &S,
    factory: &F,
    ctx: &CycleContext,
) -> CycleReport {
    let mut report = CycleReport {
        cycle: ctx.cycle,
        ..Default::default()
    };

    let mut session = match store.open_session().await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "unable to open database session, skipping cycle");
            return report;
        }
    };

    let ensembles = match session.list_actionable_ensembles().await {
        Ok(ensembles) => ensembles,
        Err(e) => {
            error!(error = %e, "unable to list ensembles, skipping cycle");
            if let Err(rb) = session.rollback().await {
                warn!(error = %rb, "rollback failed");
            }
            return report;
        }
    };

    for ensemble in ensembles {
        let span = info_span!("ensemble", name = %ensemble.name, id = ensemble.id);
        let name = ensemble.name.clone();
        let processor = EnsembleProcessor::new(ctx, &mut session, factory, ensemble);
        match processor.run().instrument(span).await {
            Ok(r) => report.merge(r),
            Err(e) => {
                error!(ensemble = %name, error = %e, "error processing ensemble");
                if let Err(rb) = session.rollback().await {
                    warn!(error = %rb, "rollback failed");
                }
            }
        }
    }

    // Release the read snapshot before sleeping.
    if let Err(e) = session.commit().await {
        warn!(error = %e, "unable to close session");
    }
    report
}
