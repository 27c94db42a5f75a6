mod handler;
mod model;

pub use handler::{create, feed, stats};
pub use model::Post;
