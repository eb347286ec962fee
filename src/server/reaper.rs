//! Periodic sweep that closes connections idle past the configured
//! read timeout, independent of whatever else the event loop is doing.

use crate::{limits::IdleLimits, server::connection::ConnectionRegistry};
use std::time::{Duration, Instant};

pub(crate) struct IdleReaper {
    interval: Duration,
    last_sweep: Instant,
}

impl IdleReaper {
    pub(crate) fn new(limits: &IdleLimits) -> Self {
        Self {
            interval: limits.reap_interval,
            last_sweep: Instant::now(),
        }
    }

    /// Returns the tokens of connections that should be closed, or an
    /// empty `Vec` if `reap_interval` hasn't elapsed yet since the last
    /// sweep.
    pub(crate) fn maybe_sweep(
        &mut self,
        registry: &ConnectionRegistry,
        read_timeout: Duration,
    ) -> Vec<usize> {
        if self.last_sweep.elapsed() < self.interval {
            return Vec::new();
        }
        self.last_sweep = Instant::now();
        registry.stale_tokens(read_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{limits::ReqLimits, server::connection::Connection};

    #[test]
    fn does_not_sweep_before_interval_elapses() {
        let registry = ConnectionRegistry::new();
        registry.insert(1, Connection::new(&ReqLimits::default().precalculate()));

        let mut reaper = IdleReaper::new(&IdleLimits {
            reap_interval: Duration::from_secs(60),
            _priv: (),
        });

        assert!(reaper.maybe_sweep(&registry, Duration::from_secs(0)).is_empty());
    }

    #[test]
    fn sweeps_immediately_with_zero_interval() {
        let registry = ConnectionRegistry::new();
        registry.insert(1, Connection::new(&ReqLimits::default().precalculate()));

        let mut reaper = IdleReaper::new(&IdleLimits {
            reap_interval: Duration::from_secs(0),
            _priv: (),
        });

        let stale = reaper.maybe_sweep(&registry, Duration::from_secs(0));
        assert_eq!(stale, vec![1]);
    }
}
