use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Static key/value attributes advertised to the master (rack, zone, ...).
pub type Attributes = BTreeMap<String, String>;

/// A resource footprint: cpus are fractional, memory and disk are megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resources {
    pub cpus: f64,
    pub mem_mb: u64,
    pub disk_mb: u64,
}

impl Resources {
    pub const ZERO: Resources = Resources {
        cpus: 0.0,
        mem_mb: 0,
        disk_mb: 0,
    };

    pub fn new(cpus: f64, mem_mb: u64, disk_mb: u64) -> Self {
        Self {
            cpus,
            mem_mb,
            disk_mb,
        }
    }

    /// Component-wise `self >= other`.
    pub fn contains(&self, other: &Resources) -> bool {
        self.cpus >= other.cpus && self.mem_mb >= other.mem_mb && self.disk_mb >= other.disk_mb
    }

    pub fn add(&self, other: &Resources) -> Resources {
        Resources {
            cpus: self.cpus + other.cpus,
            mem_mb: self.mem_mb + other.mem_mb,
            disk_mb: self.disk_mb + other.disk_mb,
        }
    }

    /// Returns `None` if any component would go negative.
    pub fn checked_sub(&self, other: &Resources) -> Option<Resources> {
        if !self.contains(other) {
            return None;
        }
        Some(Resources {
            cpus: self.cpus - other.cpus,
            mem_mb: self.mem_mb - other.mem_mb,
            disk_mb: self.disk_mb - other.disk_mb,
        })
    }

    pub fn is_zero(&self) -> bool {
        self.cpus == 0.0 && self.mem_mb == 0 && self.disk_mb == 0
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpus:{};mem:{};disk:{}",
            self.cpus, self.mem_mb, self.disk_mb
        )
    }
}

/// Tracks total capacity against everything consumed by running tasks.
///
/// All access happens on the agent's single event-processing context, so
/// reads and writes need no synchronization. Over-release is a fatal
/// bookkeeping bug, not a recoverable error.
#[derive(Debug, Clone)]
pub struct ResourceLedger {
    total: Resources,
    allocated: Resources,
}

impl ResourceLedger {
    pub fn new(total: Resources) -> Self {
        Self {
            total,
            allocated: Resources::ZERO,
        }
    }

    pub fn total(&self) -> &Resources {
        &self.total
    }

    pub fn allocated(&self) -> &Resources {
        &self.allocated
    }

    pub fn available(&self) -> Resources {
        match self.total.checked_sub(&self.allocated) {
            Some(available) => available,
            None => panic!(
                "resource ledger corrupt: allocated {} exceeds total {}",
                self.allocated, self.total
            ),
        }
    }

    /// Admit a footprint. Returns false when capacity is insufficient; the
    /// caller must report the denial, never partially admit.
    pub fn reserve(&mut self, resources: &Resources) -> bool {
        if !self.available().contains(resources) {
            return false;
        }
        self.allocated = self.allocated.add(resources);
        true
    }

    /// Return a previously reserved footprint to the pool.
    pub fn release(&mut self, resources: &Resources) {
        match self.allocated.checked_sub(resources) {
            Some(remaining) => self.allocated = remaining,
            None => panic!(
                "resource ledger corrupt: releasing {} with only {} allocated",
                resources, self.allocated
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_is_component_wise() {
        let a = Resources::new(2.0, 1024, 4096);
        assert!(a.contains(&Resources::new(2.0, 1024, 4096)));
        assert!(a.contains(&Resources::new(0.5, 512, 0)));
        assert!(!a.contains(&Resources::new(2.5, 512, 0)));
        assert!(!a.contains(&Resources::new(0.5, 2048, 0)));
    }

    #[test]
    fn checked_sub_refuses_negative() {
        let a = Resources::new(1.0, 512, 0);
        assert_eq!(
            a.checked_sub(&Resources::new(0.5, 512, 0)),
            Some(Resources::new(0.5, 0, 0))
        );
        assert_eq!(a.checked_sub(&Resources::new(1.5, 0, 0)), None);
    }

    #[test]
    fn ledger_reserve_and_release() {
        let mut ledger = ResourceLedger::new(Resources::new(4.0, 4096, 0));
        assert!(ledger.reserve(&Resources::new(1.0, 1024, 0)));
        assert!(ledger.reserve(&Resources::new(3.0, 1024, 0)));
        assert_eq!(ledger.available(), Resources::new(0.0, 2048, 0));

        // Full on cpus.
        assert!(!ledger.reserve(&Resources::new(0.5, 0, 0)));

        ledger.release(&Resources::new(3.0, 1024, 0));
        assert!(ledger.reserve(&Resources::new(2.0, 0, 0)));
    }

    #[test]
    fn ledger_denial_leaves_allocation_untouched() {
        let mut ledger = ResourceLedger::new(Resources::new(1.0, 1024, 0));
        assert!(!ledger.reserve(&Resources::new(2.0, 0, 0)));
        assert_eq!(*ledger.allocated(), Resources::ZERO);
    }

    #[test]
    #[should_panic(expected = "resource ledger corrupt")]
    fn ledger_over_release_panics() {
        let mut ledger = ResourceLedger::new(Resources::new(1.0, 1024, 0));
        ledger.release(&Resources::new(0.5, 0, 0));
    }
}
