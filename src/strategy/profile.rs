//! Opt-in wall-clock timing of the analysis passes.
//!
//! Timing is off unless [`PROFILE_ENV_VAR`] is set when the first analysis
//! runs. Totals accumulate across every run in the process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Environment variable that turns pass timing on.
pub const PROFILE_ENV_VAR: &str = "PLAN_CONVERT_PROFILE";

const PASS_COUNT: usize = 6;

/// Stage of [`crate::strategy::ConvertStrategy::analyze`] that is timed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Arena and tag table construction.
    Load,
    /// Convertibility propagation.
    Convertible,
    /// Stage-boundary finalization.
    Boundary,
    /// Ordering-requirement propagation.
    Ordering,
    /// Strategy assignment.
    Assign,
    /// Inefficiency elimination.
    Eliminate,
}

impl PassKind {
    /// Every pass, in execution order.
    pub const ALL: [PassKind; PASS_COUNT] = [
        PassKind::Load,
        PassKind::Convertible,
        PassKind::Boundary,
        PassKind::Ordering,
        PassKind::Assign,
        PassKind::Eliminate,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

/// Accumulated time of one pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassTiming {
    /// Total elapsed nanoseconds.
    pub nanos: u64,
    /// Number of timed runs.
    pub runs: u64,
}

/// Point-in-time copy of the pass timings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StrategyProfileSnapshot {
    passes: [PassTiming; PASS_COUNT],
}

impl StrategyProfileSnapshot {
    /// Timing of `kind`.
    pub fn pass(&self, kind: PassKind) -> PassTiming {
        self.passes[kind.slot()]
    }

    /// Sum over all passes.
    pub fn total_nanos(&self) -> u64 {
        self.passes
            .iter()
            .fold(0u64, |acc, timing| acc.saturating_add(timing.nanos))
    }

    /// `(pass, timing)` pairs in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (PassKind, PassTiming)> + '_ {
        PassKind::ALL.into_iter().map(|kind| (kind, self.pass(kind)))
    }
}

#[derive(Default)]
struct PassCounters {
    nanos: [AtomicU64; PASS_COUNT],
    runs: [AtomicU64; PASS_COUNT],
}

static COUNTERS: OnceLock<Option<PassCounters>> = OnceLock::new();

fn counters() -> Option<&'static PassCounters> {
    COUNTERS
        .get_or_init(|| std::env::var_os(PROFILE_ENV_VAR).map(|_| PassCounters::default()))
        .as_ref()
}

/// Runs `pass`, charging its elapsed time to `kind` when timing is on.
pub(crate) fn timed<T>(kind: PassKind, pass: impl FnOnce() -> T) -> T {
    let Some(counters) = counters() else {
        return pass();
    };
    let start = Instant::now();
    let out = pass();
    let nanos = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
    counters.nanos[kind.slot()].fetch_add(nanos, Ordering::Relaxed);
    counters.runs[kind.slot()].fetch_add(1, Ordering::Relaxed);
    out
}

/// Current pass timings, or `None` when timing is off.
///
/// With `reset` the counters are zeroed as they are read.
///
/// ```no_run
/// use plan_convert::strategy::profile::{profile_snapshot, PassKind};
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     let eliminate = snapshot.pass(PassKind::Eliminate);
///     println!("elimination: {}ns over {} runs", eliminate.nanos, eliminate.runs);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<StrategyProfileSnapshot> {
    let counters = counters()?;
    let read = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    let mut snapshot = StrategyProfileSnapshot::default();
    for kind in PassKind::ALL {
        snapshot.passes[kind.slot()] = PassTiming {
            nanos: read(&counters.nanos[kind.slot()]),
            runs: read(&counters.runs[kind.slot()]),
        };
    }
    Some(snapshot)
}
