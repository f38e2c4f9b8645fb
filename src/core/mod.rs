pub mod bridge;
pub mod context;
pub mod expr;
pub mod pipeline;
pub mod planner;
pub mod regime;
pub mod sidequest;
pub mod state;
pub mod surface;
pub mod table;
