//! rsrepeat: replicate repeater template subtrees inside a configuration tree
//!
//! A duplication run takes a [`domain::DuplicationPlan`], clones every planned
//! template subtree under a numeric suffix, rewires references so the copies point
//! at each other, isolates them from the originals and recalculates them from their
//! own inputs.

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod infrastructure;
pub mod util;
