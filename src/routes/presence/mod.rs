pub mod handler;
pub mod model;

pub use handler::{get_me, update_location};
