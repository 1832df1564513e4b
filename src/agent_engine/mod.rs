pub mod context;
pub mod engine;
pub mod event_bus;
pub mod loop_control;
pub mod response;
pub mod state;

pub use engine::{AgentEngine, Collaborators};
