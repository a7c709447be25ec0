//! MCP server for the WordPress REST API.
//!
//! The server speaks MCP over two transports: stdio (one session bound to
//! the process lifetime) and streamable HTTP (many concurrent sessions
//! keyed by the `Mcp-Session-Id` header). Tools cover posts, categories,
//! tags, and users:
//!
//! - `list_posts`, `get_post`, `search_posts`
//! - `create_post`, `update_post`, `delete_post`
//! - `list_categories`, `list_tags`, `list_users`
//!
//! Transport selection and credentials come from the environment; see
//! [`config::Config`].

pub mod config;
pub mod error;
pub mod gateway;
pub mod mcp;
pub mod shutdown;
pub mod tools;
pub mod wp;

pub use config::{Config, TransportMode};
pub use gateway::ServerContext;
pub use shutdown::ShutdownCoordinator;
pub use tools::WpTools;
pub use wp::WpClient;
