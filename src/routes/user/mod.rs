mod handler;
mod model;

pub use handler::{login, login_history, register, verify_otp};
pub use model::{LoginHistoryEntry, User};
