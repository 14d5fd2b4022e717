// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Refresh-ahead bookkeeping.
//!
//! When a `get_or_set` hit is older than the profile's refresh threshold,
//! the loader is re-run in the background and the fresh value written
//! through the normal set path, keeping hot entries from ever expiring
//! under read traffic. This module tracks which keys already have a
//! refresh in flight so reads never spawn duplicates.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;

pub(crate) struct RefreshAhead {
    threshold: Duration,
    in_flight: Mutex<HashSet<String>>,
}

impl RefreshAhead {
    pub(crate) fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Whether an entry of this age is due for a background reload.
    pub(crate) fn should_refresh(&self, age: Duration) -> bool {
        age >= self.threshold
    }

    /// Returns `true` if the key was marked in-flight by this call, i.e.
    /// no refresh was already running for it.
    pub(crate) fn try_start(&self, key: &str) -> bool {
        self.in_flight.lock().insert(key.to_string())
    }

    /// Clears the in-flight marker once the refresh finished, in either
    /// direction.
    pub(crate) fn finish(&self, key: &str) {
        self.in_flight.lock().remove(key);
    }
}

impl fmt::Debug for RefreshAhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshAhead")
            .field("threshold", &self.threshold)
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_gates_refresh() {
        let refresh = RefreshAhead::new(Duration::from_secs(60));
        assert!(!refresh.should_refresh(Duration::from_secs(59)));
        assert!(refresh.should_refresh(Duration::from_secs(60)));
        assert!(refresh.should_refresh(Duration::from_secs(61)));
    }

    #[test]
    fn one_refresh_per_key_at_a_time() {
        let refresh = RefreshAhead::new(Duration::from_secs(1));
        assert!(refresh.try_start("k"));
        assert!(!refresh.try_start("k"));
        assert!(refresh.try_start("other"));

        refresh.finish("k");
        assert!(refresh.try_start("k"));
    }

    #[test]
    fn finishing_an_unknown_key_is_harmless() {
        let refresh = RefreshAhead::new(Duration::from_secs(1));
        refresh.finish("never-started");
        assert!(refresh.try_start("never-started"));
    }
}
