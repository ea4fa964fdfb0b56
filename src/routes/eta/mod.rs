pub mod handler;
pub mod model;

pub use handler::{get_directions, resolve_eta};
