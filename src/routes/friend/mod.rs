mod handler;

pub use handler::{confirm, list, reject, remove, requests, send};
