//! Stdio front end of the MCP bridge: argument handling and the
//! stdin → upstream → stdout loop.

pub mod bridge;
pub mod cli;
pub mod error;
