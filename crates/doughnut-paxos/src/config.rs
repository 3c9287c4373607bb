//! Tunables for one `PaxosServer`, in the `*Config` + `Default`-with-
//! documented-numbers style `StorageConfig`/`KademliaConfig` use.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PaxosConfig {
    /// How long a chosen removal's tombstone is kept in the acceptor state
    /// before it can be garbage collected. `None` retains it forever.
    /// Open Question 1 (SPEC_FULL.md §9): default is indefinite retention,
    /// preferring an explicit, observable knob over silent unbounded
    /// growth or silent deletion.
    pub tombstone_retention: Option<Duration>,

    /// Consecutive unreachable-acceptor failures before that member is
    /// proposed for removal from the quorum. Open Question 2: default 3,
    /// mirroring `qc-01-peer-discovery`'s ban-after-N-failures style.
    pub quorum_reconfig_after_misses: u32,

    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_retries: u32,
}

impl Default for PaxosConfig {
    fn default() -> Self {
        Self {
            tombstone_retention: None,
            quorum_reconfig_after_misses: 3,
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_secs(2),
            max_retries: 5,
        }
    }
}
