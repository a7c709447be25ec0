//! WordPress REST API client and tool handlers.

pub mod client;
pub mod handlers;

pub use client::{WpClient, WpError};
pub use handlers::{dispatch, has_handler, HandlerContent, HandlerOutput};
