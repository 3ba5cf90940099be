use kbase_retriever::{EngineStatus, KnowledgeBaseTools, ToolError};
use rmcp::schemars;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct QueryRequest {
    #[schemars(description = "Natural-language question to find relevant context for")]
    pub question: String,
}

pub async fn query_knowledge_base(
    tools: &KnowledgeBaseTools,
    request: QueryRequest,
) -> Result<String, ToolError> {
    info!("Processing knowledge base query: '{}'", request.question);
    tools.query_knowledge_base(&request.question).await
}

/// Rebuild now and answer with `{"status": "success", "chunk_count": n}`.
pub async fn trigger_update(tools: &KnowledgeBaseTools) -> Result<String, ToolError> {
    info!("Processing trigger_update");
    let response = tools.trigger_update().await?;
    Ok(serde_json::to_string(&response).unwrap_or_else(|_| {
        format!(
            r#"{{"status":"{}","chunk_count":{}}}"#,
            response.status, response.chunk_count
        )
    }))
}

pub fn status(tools: &KnowledgeBaseTools) -> String {
    format_status(&tools.status())
}

pub fn format_status(status: &EngineStatus) -> String {
    let mut report = format!(
        "kbase MCP Server Status\n\
        =======================\n\
        Server Version: {}\n\
        State: {}\n\
        Document: {}\n\
        Storage: {}\n\
        Model: {}\n\
        Strategy: {}\n",
        env!("CARGO_PKG_VERSION"),
        status.state,
        status.document,
        status.storage,
        status.model_id,
        status.strategy,
    );

    match status.chunk_count {
        Some(count) => report.push_str(&format!("Chunks: {count}\n")),
        None => report.push_str("Chunks: not indexed yet\n"),
    }
    if let Some(stamp) = status.source_stamp {
        report.push_str(&format!("Indexed Source: {stamp}\n"));
    }
    if let Some(built_at) = status.built_at {
        report.push_str(&format!("Built At: {}\n", built_at.to_rfc3339()));
    }
    report.push_str(&format!("Rebuilds This Session: {}\n", status.rebuild_count));
    if let Some(error) = &status.last_error {
        report.push_str(&format!("Last Error: {error}\n"));
    }
    report
}
