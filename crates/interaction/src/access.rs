//! Access control hook applied to outbound messages.

use mal_transport::{Message, StandardError};

/// Checks, and possibly rewrites, every message before it is transmitted.
pub trait AccessControl: Send + Sync + 'static {
    /// Returns the message to transmit, or the error refusing it.
    fn check(&self, message: Message) -> Result<Message, StandardError>;
}

/// Lets every message through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn check(&self, message: Message) -> Result<Message, StandardError> {
        Ok(message)
    }
}
