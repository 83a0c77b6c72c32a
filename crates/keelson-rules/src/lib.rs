//! Migration-safety rules for keelson
//!
//! Compares the previously applied cluster configuration with the requested
//! one and classifies every field-level change against a declarative rule
//! set:
//!
//! - [`diff`] produces the [`Changelog`] between two configuration trees
//! - [`path`] normalizes list indices so rules can target any element
//! - [`spec`] loads the per-kind rules file
//! - [`extractor`] finds immutable/unsupported violations and unsafe reducers
//! - [`reducer`] turns triggered reducer rules into template data

pub mod diff;
pub mod extractor;
pub mod path;
pub mod reducer;
pub mod spec;

pub use diff::{diff, Change, ChangeKind, Changelog};
pub use extractor::{Evaluation, RuleExtractor, RuleMatch};
pub use reducer::{Reducer, Reducers};
pub use spec::{
    NodeCondition, ReducerLifecycle, Rule, RuleReducer, RuleSpec, SafeCondition,
    UnsupportedCondition,
};
