//! Tool implementations for the kbase MCP server
//!
//! Each tool returns `Result<String, ToolError>`; the server turns that into an MCP
//! call result, with errors serialized as JSON so clients can branch on the code.

pub mod knowledge_base;
