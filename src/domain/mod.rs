//! Domain objects parsing and tool integrations
//!
//! Provides the memory tools exposed over the MCP protocol

pub mod tools;
