//! Background services owned by the server.

pub mod autorun;

pub use autorun::Autorun;
