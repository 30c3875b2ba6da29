//! Cluster gate
//!
//! In a cluster only the coordinator node reports usage. The gate decides
//! whether this node is the active collector and guarantees that the
//! collection start action succeeds at most once per process, however many
//! times coordinator election is signalled.
//!
//! ```text
//!   NotElected ──elected──▶ Elected ──CAS──▶ Starting ──Ok──▶ Started
//!        ▲                   │   ▲              │
//!        └─────demoted───────┘   └─────Err──────┘
//! ```
//!
//! `Started` is terminal: demotion after collection started does not stop
//! it. A failed start returns the gate to `Elected` so the next election
//! signal, or another `activate`, can try again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, info, warn};

/// View of the host's cluster membership.
pub trait ClusterMembership: Send + Sync {
    /// Whether clustering is enabled, or `None` if it cannot be determined
    fn is_clustering_enabled(&self) -> Option<bool>;

    /// Whether this node currently holds the coordinator role
    fn is_coordinator(&self) -> bool;
}

/// Election state of this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateState {
    NotElected = 0,
    Elected = 1,
    /// Start action in progress
    Starting = 2,
    Started = 3,
}

impl GateState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Elected,
            2 => Self::Starting,
            3 => Self::Started,
            _ => Self::NotElected,
        }
    }
}

/// Decides whether this node collects, and starts collection once.
pub struct ClusterGate {
    membership: Option<Arc<dyn ClusterMembership>>,
    state: AtomicU8,
}

impl ClusterGate {
    /// Gate for a node without cluster membership
    pub fn standalone() -> Self {
        Self {
            membership: None,
            state: AtomicU8::new(GateState::NotElected as u8),
        }
    }

    pub fn clustered(membership: Arc<dyn ClusterMembership>) -> Self {
        Self {
            membership: Some(membership),
            state: AtomicU8::new(GateState::NotElected as u8),
        }
    }

    /// Whether this node runs in a cluster.
    ///
    /// Undeterminable membership counts as standalone, so the node reports
    /// rather than staying silent.
    pub fn is_clustered(&self) -> bool {
        self.membership
            .as_ref()
            .and_then(|m| m.is_clustering_enabled())
            .unwrap_or(false)
    }

    /// True when standalone, or clustered and currently coordinator
    pub fn is_active_collector(&self) -> bool {
        match &self.membership {
            Some(m) if self.is_clustered() => m.is_coordinator(),
            _ => true,
        }
    }

    pub fn state(&self) -> GateState {
        GateState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// React to a coordinator election change.
    ///
    /// On election, runs `start` unless another caller is starting or has
    /// started collection, and returns its result; those other callers get
    /// `None`. The gate only becomes `Started` when `start` returns `Ok`.
    /// Demotion before start resets the election; demotion after start is
    /// ignored.
    pub fn on_coordinator_change<F, T, E>(&self, elected: bool, start: F) -> Option<Result<T, E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if !elected {
            if self.transition(GateState::Elected, GateState::NotElected) {
                debug!("coordinator role lost before collection started");
            }
            return None;
        }

        // Either we move NotElected -> Elected, or someone already did
        self.transition(GateState::NotElected, GateState::Elected);

        if !self.transition(GateState::Elected, GateState::Starting) {
            debug!(state = ?self.state(), "usage collection already started");
            return None;
        }

        info!(clustered = self.is_clustered(), "starting usage collection");
        let result = start();
        if result.is_ok() {
            self.state.store(GateState::Started as u8, Ordering::Release);
        } else {
            self.state.store(GateState::Elected as u8, Ordering::Release);
            warn!("usage collection failed to start, election kept for retry");
        }
        Some(result)
    }

    /// Start collection if this node is the active collector.
    ///
    /// Standalone nodes start immediately. Clustered nodes start only if
    /// they already hold the coordinator role; otherwise they wait for
    /// [`on_coordinator_change`](Self::on_coordinator_change).
    pub fn activate<F, T, E>(&self, start: F) -> Option<Result<T, E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if self.is_active_collector() {
            return self.on_coordinator_change(true, start);
        }
        debug!("not the cluster coordinator, waiting for election");
        None
    }

    fn transition(&self, from: GateState, to: GateState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for ClusterGate {
    fn default() -> Self {
        Self::standalone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;

    type Started = Result<usize, &'static str>;

    fn count(starts: &AtomicUsize) -> Started {
        Ok(starts.fetch_add(1, Ordering::SeqCst))
    }

    struct Membership {
        enabled: Option<bool>,
        coordinator: AtomicBool,
    }

    impl Membership {
        fn new(enabled: Option<bool>, coordinator: bool) -> Arc<Self> {
            Arc::new(Self {
                enabled,
                coordinator: AtomicBool::new(coordinator),
            })
        }
    }

    impl ClusterMembership for Membership {
        fn is_clustering_enabled(&self) -> Option<bool> {
            self.enabled
        }

        fn is_coordinator(&self) -> bool {
            self.coordinator.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_standalone_activates_immediately() {
        let gate = ClusterGate::standalone();
        assert!(gate.is_active_collector());
        assert_eq!(gate.activate(|| Ok::<_, ()>(7)), Some(Ok(7)));
        assert_eq!(gate.state(), GateState::Started);
    }

    #[test]
    fn test_clustered_follower_waits() {
        let gate = ClusterGate::clustered(Membership::new(Some(true), false));
        assert!(!gate.is_active_collector());
        assert!(gate.activate(|| Ok::<_, ()>(())).is_none());
        assert_eq!(gate.state(), GateState::NotElected);
    }

    #[test]
    fn test_clustered_coordinator_activates() {
        let gate = ClusterGate::clustered(Membership::new(Some(true), true));
        assert_eq!(gate.activate(|| Ok::<_, ()>(true)), Some(Ok(true)));
    }

    #[test]
    fn test_clustering_disabled_is_standalone() {
        let gate = ClusterGate::clustered(Membership::new(Some(false), false));
        assert!(!gate.is_clustered());
        assert!(gate.is_active_collector());
    }

    #[test]
    fn test_undeterminable_membership_runs_locally() {
        let gate = ClusterGate::clustered(Membership::new(None, false));
        assert!(gate.is_active_collector());
        assert!(gate.activate(|| Ok::<_, ()>(())).is_some());
    }

    #[test]
    fn test_double_election_starts_once() {
        let gate = ClusterGate::clustered(Membership::new(Some(true), false));
        let starts = AtomicUsize::new(0);

        gate.on_coordinator_change(true, || count(&starts));
        gate.on_coordinator_change(true, || count(&starts));

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(gate.state(), GateState::Started);
    }

    #[test]
    fn test_activate_after_election_does_not_restart() {
        let membership = Membership::new(Some(true), false);
        let gate = ClusterGate::clustered(membership.clone());
        let starts = AtomicUsize::new(0);

        gate.on_coordinator_change(true, || count(&starts));
        membership.coordinator.store(true, Ordering::SeqCst);
        gate.activate(|| count(&starts));

        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_demotion_after_start_is_ignored() {
        let gate = ClusterGate::standalone();
        gate.activate(|| Ok::<_, ()>(()));
        assert!(gate.on_coordinator_change(false, || Ok::<_, ()>(())).is_none());
        assert_eq!(gate.state(), GateState::Started);
    }

    #[test]
    fn test_concurrent_elections_start_once() {
        let gate = Arc::new(ClusterGate::clustered(Membership::new(Some(true), false)));
        let starts = Arc::new(AtomicUsize::new(0));

        thread::scope(|s| {
            for _ in 0..16 {
                let gate = Arc::clone(&gate);
                let starts = Arc::clone(&starts);
                s.spawn(move || {
                    gate.on_coordinator_change(true, || count(&starts));
                });
            }
        });

        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_start_can_be_retried() {
        let gate = ClusterGate::standalone();

        let first: Option<Started> = gate.activate(|| Err("no runtime"));
        assert_eq!(first, Some(Err("no runtime")));
        assert_eq!(gate.state(), GateState::Elected);

        let starts = AtomicUsize::new(0);
        assert_eq!(gate.activate(|| count(&starts)), Some(Ok(0)));
        assert_eq!(gate.state(), GateState::Started);
        assert!(gate.activate(|| count(&starts)).is_none());
    }

    #[test]
    fn test_failed_start_then_demotion_resets() {
        let gate = ClusterGate::clustered(Membership::new(Some(true), false));

        let failed: Option<Started> = gate.on_coordinator_change(true, || Err("boom"));
        assert!(matches!(failed, Some(Err(_))));
        gate.on_coordinator_change(false, || count(&AtomicUsize::new(0)));
        assert_eq!(gate.state(), GateState::NotElected);
    }

    #[test]
    fn test_election_during_start_is_ignored() {
        let gate = ClusterGate::standalone();
        let starts = AtomicUsize::new(0);

        let outer = gate.activate(|| {
            assert_eq!(gate.state(), GateState::Starting);
            assert!(gate.on_coordinator_change(true, || count(&starts)).is_none());
            count(&starts)
        });

        assert_eq!(outer, Some(Ok(0)));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }
}
