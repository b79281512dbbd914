//! Session lifecycle for the MCP Streamable HTTP transport.
//!
//! A session groups the logically related exchanges between one MCP client and
//! this server, starting from the `initialize` handshake. The server assigns
//! each session an unguessable identifier, returned via the `mcp-session-id`
//! response header, and the client repeats that identifier on every subsequent
//! request. The [`SessionRegistry`] is the single source of truth for which
//! sessions are alive; each live session owns one [`SessionTransport`].

mod registry;
mod transport;

pub use registry::SessionRegistry;
pub use transport::SessionTransport;

/// HTTP header carrying the session identifier.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";
