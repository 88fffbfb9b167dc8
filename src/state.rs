use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The manager's only mutable state: which pods are currently known on each
/// side of the cluster, and whether the one-time bulk provisioning has run.
///
/// All writes happen from the reconciler task; the web server only takes
/// read snapshots.
#[derive(Debug, Default)]
pub struct Membership {
    masters: BTreeSet<String>,
    workers: BTreeSet<String>,
    initially_provisioned: bool,
}

pub type SharedMembership = Arc<RwLock<Membership>>;

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pod name can only ever carry one role at a time, so inserting on
    /// one side evicts the name from the other.
    pub fn add_master(&mut self, name: &str) {
        self.workers.remove(name);
        self.masters.insert(name.to_owned());
    }

    pub fn add_worker(&mut self, name: &str) {
        self.masters.remove(name);
        self.workers.insert(name.to_owned());
    }

    /// Returns whether the pod was actually known. Removing an unknown pod
    /// is a no-op: DELETED events can arrive for pods this process never
    /// saw ADDED, e.g. after a manager restart.
    pub fn remove_master(&mut self, name: &str) -> bool {
        self.masters.remove(name)
    }

    pub fn remove_worker(&mut self, name: &str) -> bool {
        self.workers.remove(name)
    }

    pub fn masters(&self) -> Vec<String> {
        self.masters.iter().cloned().collect()
    }

    pub fn workers(&self) -> Vec<String> {
        self.workers.iter().cloned().collect()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn snapshot(&self) -> (Vec<String>, Vec<String>) {
        (self.masters(), self.workers())
    }

    pub fn initially_provisioned(&self) -> bool {
        self.initially_provisioned
    }

    /// One-shot transition. True on the first call only; the flag never
    /// goes back to false for the lifetime of the process.
    pub fn try_mark_initially_provisioned(&mut self) -> bool {
        if self.initially_provisioned {
            return false;
        }
        self.initially_provisioned = true;
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roles_are_exclusive() {
        let mut membership = Membership::new();
        membership.add_worker("pod-0");
        membership.add_master("pod-0");
        assert_eq!(membership.masters(), vec!["pod-0"]);
        assert!(membership.workers().is_empty());

        membership.add_worker("pod-0");
        assert!(membership.masters().is_empty());
        assert_eq!(membership.workers(), vec!["pod-0"]);
    }

    #[test]
    fn removing_unknown_pods_is_a_noop() {
        let mut membership = Membership::new();
        assert!(!membership.remove_worker("never-seen"));
        assert!(!membership.remove_master("never-seen"));

        membership.add_worker("w0");
        assert!(membership.remove_worker("w0"));
        assert!(!membership.remove_worker("w0"));
    }

    #[test]
    fn initial_provisioning_flips_once() {
        let mut membership = Membership::new();
        assert!(!membership.initially_provisioned());
        assert!(membership.try_mark_initially_provisioned());
        assert!(membership.initially_provisioned());
        assert!(!membership.try_mark_initially_provisioned());
        assert!(membership.initially_provisioned());
    }

    #[test]
    fn snapshot_is_sorted_and_duplicate_free() {
        let mut membership = Membership::new();
        membership.add_worker("w1");
        membership.add_worker("w0");
        membership.add_worker("w0");
        membership.add_master("m0");
        let (masters, workers) = membership.snapshot();
        assert_eq!(masters, vec!["m0"]);
        assert_eq!(workers, vec!["w0", "w1"]);
        assert_eq!(membership.worker_count(), 2);
    }
}
