mod models;
mod runner;
mod state;


pub use models::{StepSummary, TaskReport, TaskStatus};
pub use runner::AgentLoop;
pub use state::AgentState;
