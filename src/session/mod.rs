/*!
 * Session
 * Scoped ownership of one loaded and attached extension
 */

mod lifecycle;
mod types;

pub use lifecycle::Session;
pub use types::SessionState;
