//! Cost-based query planning (spec §4.8) and plan execution (spec §4.9):
//! turns a [`Query`] against a [`rlayer_core::Schema`] into a [`PlanNode`]
//! tree, and that tree into a running [`PlanCursor`] yielding primary-key
//! tuples one at a time.

mod executor;
mod plan;
mod planner;
mod predicate;

pub use executor::{build_cursor, PlanCursor};
pub use plan::PlanNode;
pub use planner::{IndexLocator, Planner, StatsProvider};
pub use predicate::{Predicate, Query};
