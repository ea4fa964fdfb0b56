pub mod handler;
pub mod model;

pub use handler::rank_nearby;
