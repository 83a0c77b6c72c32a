//! Common types for keelson: errors, phase names, force flags and cluster kinds

#![deny(missing_docs)]

pub mod error;
pub mod force;
pub mod kind;
pub mod phase;

pub use error::{display_value, Error, Violation, Violations};
pub use force::{ForceFlag, ForceFlags};
pub use kind::ClusterKind;
pub use phase::{Lifecycle, PhaseTarget, Stage, SubPhase};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace holding the persisted configuration and upgrade state
pub const STATE_NAMESPACE: &str = "kube-system";

/// Template data namespace under which reducers are injected
pub const REDUCERS_NAMESPACE: &str = "reducers";
