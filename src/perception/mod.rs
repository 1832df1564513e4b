pub mod crop;
pub mod geometry;
pub mod parser;
pub mod pipeline;
pub mod screenshot;
pub mod traits;
pub mod types;
pub mod ui_context;
