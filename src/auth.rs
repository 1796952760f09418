//! Auth-domain identifiers, redacted secrets, and access tokens.

pub mod id;
pub mod secret;
pub mod token;

pub use id::*;
pub use secret::*;
pub use token::*;
