//! Admissions agent - one-pass plan, retrieve and answer
//!
//! - [`ActionPlanner`]: turns a question into an ordered list of actions
//! - [`AdmissionsAgent`]: runs the plan against the stores and synthesises the answer
//! - [`AdvisorContext`]: the collaborators every request shares

pub mod advisor;
pub mod context;
pub mod planner;

pub use advisor::{AdmissionsAgent, Answer};
pub use context::AdvisorContext;
pub use planner::{Action, ActionPlanner, PlanDecision, PlanOrigin, QueryPlan};
