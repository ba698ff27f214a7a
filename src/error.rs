use thiserror::Error;

/// Crate-wide error type.
///
/// `Structural` and `Precondition` are the only two variants a caller should
/// ever see propagate out of `?` in practice — both mean the input violated
/// an invariant this crate assumes holds, never a transient condition to
/// retry. Search outcomes (exhaustion, cancellation, node-cap) are
/// deliberately *not* errors; see [`crate::search::SearchOutcome`].
#[derive(Error, Debug)]
pub enum ClusterError {
    /// A `Configuration` (or a piece of topology referenced by one) violates
    /// one of the structural invariants of the data model: mismatched
    /// extents, primary == secondary, a dangling Dom0/Dom0Disk/PhysicalVolume
    /// reference, or a placement that does not actually separate primary and
    /// secondary physical volumes onto different hosts.
    #[error("structural invariant violated: {0}")]
    Structural(String),

    /// An analyzer rule found a payload that contradicts its own
    /// precondition — e.g. a Configuration that references a Dom0 not
    /// present in the Cluster being analyzed. This always indicates
    /// malformed input handed to `analyze`, not a transient failure.
    #[error("rule evaluation precondition violated: {0}")]
    Precondition(String),
}

impl ClusterError {
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
