mod handler;
mod model;

pub use handler::{cancel, checkout, current, payments};
