//! End-to-end replication scenarios
//!
//! Runs a source and a sink over an in-process [`SessionPair`] and checks
//! that the mirror converges on the authoritative state:
//! - keys written before the sink attached are pulled on first read
//! - keys written afterwards are pushed
//! - the last write per key wins

use std::sync::Arc;
use std::time::{Duration, Instant};

use statecast_core::StatecastResult;
use statecast_state::KeyedStore;
use statecast_sync::{sink, source, SinkHandlers, SourceOptions};

use crate::harness::{resolves_within, settle, SessionPair};

/// Store type used by the scenarios
pub type ScenarioStore = KeyedStore<String, String, u64>;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConvergenceConfig {
    /// Namespace of the session
    pub namespace: String,
    /// Keys written before the sink attaches
    pub early_keys: usize,
    /// Keys written after the sink attaches
    pub live_keys: usize,
    /// Writes per live key
    pub rounds: usize,
    /// Longest wait for a single mirrored read
    pub read_timeout: Duration,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            namespace: "scenario".to_string(),
            early_keys: 4,
            live_keys: 4,
            rounds: 3,
            read_timeout: Duration::from_millis(500),
        }
    }
}

impl ConvergenceConfig {
    pub fn minimal() -> Self {
        Self {
            early_keys: 1,
            live_keys: 1,
            rounds: 1,
            ..Default::default()
        }
    }

    pub fn stress() -> Self {
        Self {
            early_keys: 64,
            live_keys: 64,
            rounds: 16,
            read_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }
}

// ============================================================================
// RESULT
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConvergenceResult {
    /// Keys whose mirrored value matched the source
    pub converged: usize,
    /// Keys that never resolved on the sink
    pub stalled: Vec<String>,
    /// Keys that resolved to a different value
    pub diverged: Vec<String>,
    pub elapsed: Duration,
}

impl ConvergenceResult {
    pub fn passed(&self) -> bool {
        self.stalled.is_empty() && self.diverged.is_empty()
    }
}

// ============================================================================
// RUNNER
// ============================================================================

fn early_key(i: usize) -> String {
    format!("early-{i}")
}

fn live_key(i: usize) -> String {
    format!("live-{i}")
}

/// Run one convergence scenario. Must be called from within a tokio runtime.
pub async fn run_convergence(config: &ConvergenceConfig) -> StatecastResult<ConvergenceResult> {
    let started = Instant::now();
    let pair = SessionPair::new();

    let authority = source(
        pair.source_channel(),
        Arc::new(ScenarioStore::new()),
        config.namespace.as_str(),
        SourceOptions::default(),
    )?;

    for i in 0..config.early_keys {
        authority.set(&early_key(i), i as u64);
    }

    let mirror = sink(
        pair.sink_channel(),
        Arc::new(ScenarioStore::new()),
        config.namespace.as_str(),
        SinkHandlers::default(),
    )?;

    for round in 0..config.rounds {
        for i in 0..config.live_keys {
            authority.set(&live_key(i), (round * config.live_keys + i) as u64);
        }
    }
    settle().await;

    let keys = (0..config.early_keys)
        .map(early_key)
        .chain((0..config.live_keys).map(live_key));

    let mut result = ConvergenceResult {
        converged: 0,
        stalled: Vec::new(),
        diverged: Vec::new(),
        elapsed: Duration::ZERO,
    };
    for key in keys {
        let expected = authority.peek(&key);
        match resolves_within(mirror.get_async(&key), config.read_timeout).await {
            None => result.stalled.push(key),
            Some(value) if expected.as_ref() == Some(&value) => result.converged += 1,
            Some(_) => result.diverged.push(key),
        }
    }
    result.elapsed = started.elapsed();

    tracing::debug!(
        converged = result.converged,
        stalled = result.stalled.len(),
        diverged = result.diverged.len(),
        "convergence scenario finished"
    );

    mirror.detach();
    authority.detach();
    Ok(result)
}
