//! Tool registry and adaptation onto the protocol engine.
//!
//! Descriptors are declared in one static table; a descriptor is only
//! advertised when a handler actually exists for it, so a half-landed
//! tool silently disappears from `tools/list` instead of failing at
//! call time.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::mcp::{CallToolParams, CallToolResult, ContentBlock, Tool, ToolDispatchError, ToolHandler};
use crate::wp::{self, WpClient};

pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    schema: fn() -> Value,
}

fn id_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "integer", "description": "Post ID" }
        },
        "required": ["id"]
    })
}

fn paging_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "per_page": { "type": "integer", "description": "Items per page (1-100)" },
            "page": { "type": "integer", "description": "Page number, starting at 1" }
        }
    })
}

fn list_posts_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "per_page": { "type": "integer", "description": "Items per page (1-100)" },
            "page": { "type": "integer", "description": "Page number, starting at 1" },
            "status": { "type": "string", "description": "Filter by post status (publish, draft, ...)" }
        }
    })
}

fn create_post_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string", "description": "Post title" },
            "content": { "type": "string", "description": "Post body (HTML allowed)" },
            "status": { "type": "string", "description": "publish, draft or pending (default draft)" }
        },
        "required": ["title", "content"]
    })
}

fn update_post_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "integer", "description": "Post ID" },
            "title": { "type": "string", "description": "New title" },
            "content": { "type": "string", "description": "New body" },
            "status": { "type": "string", "description": "New status" }
        },
        "required": ["id"]
    })
}

fn delete_post_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "integer", "description": "Post ID" },
            "force": { "type": "boolean", "description": "Bypass trash and delete permanently" }
        },
        "required": ["id"]
    })
}

fn search_posts_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": "Search term" },
            "per_page": { "type": "integer", "description": "Items per page (1-100)" },
            "page": { "type": "integer", "description": "Page number, starting at 1" }
        },
        "required": ["query"]
    })
}

pub static TOOL_DESCRIPTORS: &[ToolDescriptor] = &[
    ToolDescriptor {
        name: "list_posts",
        description: "List posts, optionally filtered by status, with pagination",
        schema: list_posts_schema,
    },
    ToolDescriptor {
        name: "get_post",
        description: "Fetch a single post by ID",
        schema: id_schema,
    },
    ToolDescriptor {
        name: "create_post",
        description: "Create a new post",
        schema: create_post_schema,
    },
    ToolDescriptor {
        name: "update_post",
        description: "Update the title, content or status of an existing post",
        schema: update_post_schema,
    },
    ToolDescriptor {
        name: "delete_post",
        description: "Delete a post (to trash, or permanently with force)",
        schema: delete_post_schema,
    },
    ToolDescriptor {
        name: "search_posts",
        description: "Full-text search across posts",
        schema: search_posts_schema,
    },
    ToolDescriptor {
        name: "list_categories",
        description: "List categories with pagination",
        schema: paging_schema,
    },
    ToolDescriptor {
        name: "list_tags",
        description: "List tags with pagination",
        schema: paging_schema,
    },
    ToolDescriptor {
        name: "list_users",
        description: "List users with pagination",
        schema: paging_schema,
    },
];

/// The WordPress tool set, shared across all sessions. Stateless apart
/// from the underlying HTTP client.
pub struct WpTools {
    client: WpClient,
}

impl WpTools {
    pub fn new(client: WpClient) -> Self {
        for d in TOOL_DESCRIPTORS {
            if !wp::has_handler(d.name) {
                warn!(tool = d.name, "descriptor has no handler, not advertising");
            }
        }
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for WpTools {
    fn tools(&self) -> Vec<Tool> {
        TOOL_DESCRIPTORS
            .iter()
            .filter(|d| wp::has_handler(d.name))
            .map(|d| Tool {
                name: d.name.to_string(),
                description: Some(d.description.to_string()),
                input_schema: (d.schema)(),
            })
            .collect()
    }

    async fn call(&self, params: CallToolParams) -> Result<CallToolResult, ToolDispatchError> {
        let args = params.arguments.unwrap_or(Value::Null);
        let output = wp::dispatch(&self.client, &params.name, &args)
            .await
            .ok_or_else(|| ToolDispatchError::UnknownTool(params.name.clone()))?;

        // Every handler item is surfaced as a text block, whatever its
        // native kind; structured payloads are already rendered to text.
        let content = output
            .items
            .into_iter()
            .map(|item| ContentBlock::Text { text: item.text })
            .collect();

        Ok(CallToolResult {
            content,
            is_error: Some(output.is_error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, TransportMode};
    use url::Url;

    fn tools() -> WpTools {
        let config = Config {
            api_url: Url::parse("http://127.0.0.1:9").unwrap(),
            username: None,
            app_password: None,
            api_token: None,
            mode: TransportMode::Stdio,
        };
        WpTools::new(WpClient::from_config(&config).unwrap())
    }

    #[test]
    fn every_descriptor_is_advertised() {
        let advertised = tools().tools();
        assert_eq!(advertised.len(), TOOL_DESCRIPTORS.len());
        for tool in &advertised {
            assert!(tool.input_schema.get("type").is_some());
        }
    }

    #[test]
    fn descriptor_names_are_unique() {
        let mut names: Vec<_> = TOOL_DESCRIPTORS.iter().map(|d| d.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), TOOL_DESCRIPTORS.len());
    }

    #[tokio::test]
    async fn unknown_tool_is_a_dispatch_error() {
        let err = tools()
            .call(CallToolParams {
                name: "no_such_tool".into(),
                arguments: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolDispatchError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn handler_errors_become_error_results_not_protocol_errors() {
        let result = tools()
            .call(CallToolParams {
                name: "get_post".into(),
                arguments: Some(serde_json::json!({})),
            })
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(matches!(result.content[0], ContentBlock::Text { .. }));
    }
}
