pub mod cancel;
pub mod error;
