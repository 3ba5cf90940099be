use crate::tools::{self, knowledge_base::QueryRequest};
use anyhow::Result;
use kbase_retriever::{KnowledgeBaseTools, RetrievalEngine, ToolError};
use rmcp::{
    ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{CallToolResult, Content, ErrorData as McpError, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
};
use std::sync::Arc;
use tracing::{info, warn};

/// kbase MCP server exposing one knowledge base to agents
#[derive(Clone)]
pub struct KbaseMcpServer {
    tools: KnowledgeBaseTools,
    tool_router: ToolRouter<Self>,
}

/// Tool errors go back as an error result rather than a protocol error, so the agent
/// can read the code and message.
pub(crate) fn into_call_result(result: Result<String, ToolError>) -> CallToolResult {
    match result {
        Ok(text) => CallToolResult::success(vec![Content::text(text)]),
        Err(err) => {
            warn!("Tool call failed: {}", err);
            let body = serde_json::to_string(&err).unwrap_or_else(|_| err.to_string());
            CallToolResult::error(vec![Content::text(body)])
        }
    }
}

#[tool_router]
impl KbaseMcpServer {
    pub fn new(engine: Arc<RetrievalEngine>) -> Self {
        Self {
            tools: KnowledgeBaseTools::new(engine),
            tool_router: Self::tool_router(),
        }
    }

    pub fn tools(&self) -> &KnowledgeBaseTools {
        &self.tools
    }

    #[tool(
        description = "Search the shared knowledge base for passages relevant to a question. Returns the most similar passages, best first."
    )]
    async fn query_knowledge_base(
        &self,
        Parameters(request): Parameters<QueryRequest>,
    ) -> Result<CallToolResult, McpError> {
        Ok(into_call_result(
            tools::knowledge_base::query_knowledge_base(&self.tools, request).await,
        ))
    }

    #[tool(
        description = "Rebuild the knowledge base index from the current document. Call after editing the document."
    )]
    async fn trigger_update(&self) -> Result<CallToolResult, McpError> {
        Ok(into_call_result(
            tools::knowledge_base::trigger_update(&self.tools).await,
        ))
    }

    #[tool(description = "Show knowledge base status: index state, chunk count, model and storage")]
    async fn status(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(
            tools::knowledge_base::status(&self.tools),
        )]))
    }

    /// Serve the MCP server using stdio transport
    pub async fn serve_stdio(&self) -> Result<()> {
        info!("Starting MCP server with stdio transport");
        let server = self.clone().serve(stdio()).await?;
        let quit_reason = server.waiting().await?;
        info!("MCP server quit: {:?}", quit_reason);
        Ok(())
    }
}

#[tool_handler]
impl ServerHandler for KbaseMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "kbase MCP Server - semantic retrieval over a shared knowledge document".into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbase_retriever::ToolErrorCode;
    use tracing_test::traced_test;

    #[test]
    fn test_success_result() {
        let result = into_call_result(Ok("Relevant Context:\nabc".to_string()));
        assert_ne!(result.is_error, Some(true));
        assert_eq!(result.content.len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_error_result_is_flagged() {
        let result = into_call_result(Err(ToolError::new(
            ToolErrorCode::InvalidArgument,
            "question must not be empty",
        )));
        assert_eq!(result.is_error, Some(true));
        assert!(logs_contain("Tool call failed"));
    }
}
