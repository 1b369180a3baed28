pub mod error;
pub mod oracle;
pub mod protocol;
pub mod state;
pub mod types;
pub mod ws;
