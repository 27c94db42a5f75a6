mod handler;
mod model;

pub use handler::{create, delete, list};
pub use model::Answer;
