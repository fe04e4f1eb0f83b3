//! Public types shared by the cache and session layers.

mod content;
mod key;
mod session;

pub use content::{ContentPart, Role, Turn};
pub use key::CacheKey;
pub use session::Session;
