mod handler;
mod model;

pub use handler::{ask, delete, list, vote};
pub use model::Question;
