/// Which side of the cluster a pod belongs to, derived from its `citusType`
/// label value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Master,
    Worker,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Deleted,
}

/// A pod lifecycle event that survived label and event-type filtering at
/// the watch boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodEvent {
    pub kind: EventKind,
    pub name: String,
    pub role: Role,
}

/// Everything the reconciler consumes, merged onto a single channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Pod(PodEvent),
    ProvisionChange(Role),
}
