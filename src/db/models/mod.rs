//! Database models split into domain-specific modules.

pub mod account;
pub mod assignment;
pub mod billing;
pub mod bot;
pub mod issue;
pub mod message;

pub use account::*;
pub use assignment::*;
pub use billing::*;
pub use bot::*;
pub use issue::*;
pub use message::*;
