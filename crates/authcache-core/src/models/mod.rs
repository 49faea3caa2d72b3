//! Data models shared by the session store and the API client.
//!
//! - `Identity`: the authenticated user's profile as issued by the server
//! - `Role`: the user's access level

pub mod identity;

pub use identity::{Identity, Role};
