mod handler;

pub use handler::billing_webhook;
