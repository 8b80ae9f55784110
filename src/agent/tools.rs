use crate::llm::{LlmManager, ToolSpec};
use crate::retrieval::{format_examples, ExampleIndex};
use crate::warehouse::Warehouse;
use async_trait::async_trait;
use serde_json::json;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
pub enum ToolError {
    InvalidInput(String),
    Failed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::InvalidInput(msg) => write!(f, "Invalid tool input: {}", msg),
            ToolError::Failed(msg) => write!(f, "Tool failed: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// A callable operation the planner can invoke. The input is the single
/// string argument the model supplies.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn call(&self, input: &str) -> Result<String, ToolError>;
}

fn string_input_schema(description: &str) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "input": {
                "type": "string",
                "description": description,
            }
        },
        "required": ["input"]
    })
}

/// Nearest-neighbor lookup over the embedded few-shot examples.
pub struct SimilarExamplesTool {
    llm: Arc<LlmManager>,
    index: Arc<ExampleIndex>,
    top_k: usize,
}

impl SimilarExamplesTool {
    pub fn new(llm: Arc<LlmManager>, index: Arc<ExampleIndex>, top_k: usize) -> Self {
        Self { llm, index, top_k }
    }
}

#[async_trait]
impl Tool for SimilarExamplesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "sql_get_similar_examples".to_string(),
            description: "This tool will help you understand similar examples to adapt them \
                          to the user question. Input to this tool should be the user question."
                .to_string(),
            parameters: string_input_schema("The user question"),
        }
    }

    async fn call(&self, input: &str) -> Result<String, ToolError> {
        if self.index.is_empty() {
            return Ok("No similar examples found.".to_string());
        }

        let embeddings = self
            .llm
            .embed(&[input.to_string()])
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        let query_embedding = embeddings
            .first()
            .ok_or_else(|| ToolError::Failed("Embedding provider returned nothing".to_string()))?;

        let hits = self.index.search(query_embedding, self.top_k);
        Ok(format_examples(&hits))
    }
}

/// Lists the tables the agent is allowed to query.
pub struct ListTablesTool {
    warehouse: Arc<dyn Warehouse + Send + Sync>,
}

impl ListTablesTool {
    pub fn new(warehouse: Arc<dyn Warehouse + Send + Sync>) -> Self {
        Self { warehouse }
    }
}

#[async_trait]
impl Tool for ListTablesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "sql_list_tables".to_string(),
            description: "Lists the tables available in the warehouse.".to_string(),
            parameters: string_input_schema("Ignored"),
        }
    }

    async fn call(&self, _input: &str) -> Result<String, ToolError> {
        let tables = self
            .warehouse
            .list_tables()
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        if tables.is_empty() {
            Ok("No tables available.".to_string())
        } else {
            Ok(tables.join("\n"))
        }
    }
}

/// Describes the schema (and a sample row) of one named table.
pub struct TableSchemaTool {
    warehouse: Arc<dyn Warehouse + Send + Sync>,
}

impl TableSchemaTool {
    pub fn new(warehouse: Arc<dyn Warehouse + Send + Sync>) -> Self {
        Self { warehouse }
    }
}

#[async_trait]
impl Tool for TableSchemaTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "sql_table_schema".to_string(),
            description: "Returns the schema and a sample row for a table. \
                          Input should be the table name."
                .to_string(),
            parameters: string_input_schema("The table name"),
        }
    }

    async fn call(&self, input: &str) -> Result<String, ToolError> {
        let table = input.trim();
        if table.is_empty() {
            return Err(ToolError::InvalidInput("table name is empty".to_string()));
        }

        self.warehouse
            .describe_table(table)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))
    }
}

/// Executes one SQL query and returns its result set as JSON.
pub struct ExecuteQueryTool {
    warehouse: Arc<dyn Warehouse + Send + Sync>,
}

impl ExecuteQueryTool {
    pub fn new(warehouse: Arc<dyn Warehouse + Send + Sync>) -> Self {
        Self { warehouse }
    }
}

#[async_trait]
impl Tool for ExecuteQueryTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "sql_execute_query".to_string(),
            description: "Executes a SQL query against the warehouse and returns the result \
                          as JSON with 'columns' and 'rows'. Input should be a complete SQL \
                          query."
                .to_string(),
            parameters: string_input_schema("The SQL query to execute"),
        }
    }

    async fn call(&self, input: &str) -> Result<String, ToolError> {
        let sql = input.trim().replace('`', "");
        if sql.is_empty() {
            return Err(ToolError::InvalidInput("query is empty".to_string()));
        }

        let result = self
            .warehouse
            .execute(&sql)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        serde_json::to_string(&result).map_err(|e| ToolError::Failed(e.to_string()))
    }
}

/// Assembles the agent's toolkit: retrieval first, then the warehouse tools.
pub fn build_toolkit(
    llm: Arc<LlmManager>,
    index: Arc<ExampleIndex>,
    warehouse: Arc<dyn Warehouse + Send + Sync>,
    top_k: usize,
) -> Vec<Box<dyn Tool + Send + Sync>> {
    vec![
        Box::new(SimilarExamplesTool::new(llm, index, top_k)),
        Box::new(ListTablesTool::new(warehouse.clone())),
        Box::new(TableSchemaTool::new(warehouse.clone())),
        Box::new(ExecuteQueryTool::new(warehouse)),
    ]
}
