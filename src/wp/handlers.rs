//! Tool handlers for the WordPress REST API.
//!
//! Each handler parses the tool arguments, performs the API call and
//! renders the response as text items. API failures are reported as
//! error output rather than bubbling up, so a broken site never takes
//! a session down with it.

use serde_json::{json, Map, Value};
use tracing::debug;

use super::client::{WpClient, WpError};

/// Rendered output of one handler invocation. The adaptation layer maps
/// every item to a text content block regardless of `kind`.
pub struct HandlerOutput {
    pub items: Vec<HandlerContent>,
    pub is_error: bool,
}

pub struct HandlerContent {
    pub kind: &'static str,
    pub text: String,
}

impl HandlerOutput {
    fn text(value: &Value) -> Self {
        Self {
            items: vec![HandlerContent {
                kind: "json",
                text: serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
            }],
            is_error: false,
        }
    }

    fn fail(message: String) -> Self {
        Self {
            items: vec![HandlerContent {
                kind: "text",
                text: message,
            }],
            is_error: true,
        }
    }
}

/// Whether a handler exists for the named tool. The registry consults
/// this so descriptors without an implementation are never advertised.
pub fn has_handler(name: &str) -> bool {
    matches!(
        name,
        "list_posts"
            | "get_post"
            | "create_post"
            | "update_post"
            | "delete_post"
            | "search_posts"
            | "list_categories"
            | "list_tags"
            | "list_users"
    )
}

/// Dispatch a tool call to its handler. Returns `None` for unknown names.
pub async fn dispatch(client: &WpClient, name: &str, args: &Value) -> Option<HandlerOutput> {
    debug!(tool = name, "dispatching tool call");
    let output = match name {
        "list_posts" => list_posts(client, args).await,
        "get_post" => get_post(client, args).await,
        "create_post" => create_post(client, args).await,
        "update_post" => update_post(client, args).await,
        "delete_post" => delete_post(client, args).await,
        "search_posts" => search_posts(client, args).await,
        "list_categories" => list_collection(client, "categories", args).await,
        "list_tags" => list_collection(client, "tags", args).await,
        "list_users" => list_collection(client, "users", args).await,
        _ => return None,
    };
    Some(output.unwrap_or_else(|e| HandlerOutput::fail(e.to_string())))
}

#[derive(Debug, thiserror::Error)]
enum ArgError {
    #[error("missing required argument `{0}`")]
    Missing(&'static str),

    #[error("argument `{0}` has the wrong type")]
    WrongType(&'static str),
}

#[derive(Debug, thiserror::Error)]
enum HandlerError {
    #[error(transparent)]
    Args(#[from] ArgError),

    #[error(transparent)]
    Api(#[from] WpError),
}

fn require_u64(args: &Value, key: &'static str) -> Result<u64, ArgError> {
    match args.get(key) {
        Some(v) => v.as_u64().ok_or(ArgError::WrongType(key)),
        None => Err(ArgError::Missing(key)),
    }
}

fn require_str<'a>(args: &'a Value, key: &'static str) -> Result<&'a str, ArgError> {
    match args.get(key) {
        Some(v) => v.as_str().ok_or(ArgError::WrongType(key)),
        None => Err(ArgError::Missing(key)),
    }
}

fn optional_str<'a>(args: &'a Value, key: &'static str) -> Result<Option<&'a str>, ArgError> {
    match args.get(key) {
        Some(Value::Null) | None => Ok(None),
        Some(v) => v.as_str().map(Some).ok_or(ArgError::WrongType(key)),
    }
}

fn optional_u64(args: &Value, key: &'static str) -> Result<Option<u64>, ArgError> {
    match args.get(key) {
        Some(Value::Null) | None => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or(ArgError::WrongType(key)),
    }
}

/// Common pagination query parameters, clamped to the API's accepted range.
fn paging_query(args: &Value) -> Result<Vec<(&'static str, String)>, ArgError> {
    let mut query = Vec::new();
    if let Some(per_page) = optional_u64(args, "per_page")? {
        query.push(("per_page", per_page.clamp(1, 100).to_string()));
    }
    if let Some(page) = optional_u64(args, "page")? {
        query.push(("page", page.max(1).to_string()));
    }
    Ok(query)
}

async fn list_posts(client: &WpClient, args: &Value) -> Result<HandlerOutput, HandlerError> {
    let mut query = paging_query(args)?;
    if let Some(status) = optional_str(args, "status")? {
        query.push(("status", status.to_string()));
    }
    let value = client.get("posts", &query).await?;
    Ok(HandlerOutput::text(&value))
}

async fn get_post(client: &WpClient, args: &Value) -> Result<HandlerOutput, HandlerError> {
    let id = require_u64(args, "id")?;
    let value = client.get(&format!("posts/{id}"), &[]).await?;
    Ok(HandlerOutput::text(&value))
}

async fn create_post(client: &WpClient, args: &Value) -> Result<HandlerOutput, HandlerError> {
    let title = require_str(args, "title")?;
    let content = require_str(args, "content")?;
    let mut body = Map::new();
    body.insert("title".into(), json!(title));
    body.insert("content".into(), json!(content));
    body.insert(
        "status".into(),
        json!(optional_str(args, "status")?.unwrap_or("draft")),
    );
    let value = client.post("posts", &Value::Object(body)).await?;
    Ok(HandlerOutput::text(&value))
}

async fn update_post(client: &WpClient, args: &Value) -> Result<HandlerOutput, HandlerError> {
    let id = require_u64(args, "id")?;
    let mut body = Map::new();
    for key in ["title", "content", "status"] {
        if let Some(v) = args.get(key).filter(|v| !v.is_null()) {
            body.insert(key.into(), v.clone());
        }
    }
    if body.is_empty() {
        return Err(ArgError::Missing("title, content or status").into());
    }
    let value = client
        .post(&format!("posts/{id}"), &Value::Object(body))
        .await?;
    Ok(HandlerOutput::text(&value))
}

async fn delete_post(client: &WpClient, args: &Value) -> Result<HandlerOutput, HandlerError> {
    let id = require_u64(args, "id")?;
    let force = args.get("force").and_then(Value::as_bool).unwrap_or(false);
    let value = client
        .delete(&format!("posts/{id}"), &[("force", force.to_string())])
        .await?;
    Ok(HandlerOutput::text(&value))
}

async fn search_posts(client: &WpClient, args: &Value) -> Result<HandlerOutput, HandlerError> {
    let term = require_str(args, "query")?;
    let mut query = paging_query(args)?;
    query.push(("search", term.to_string()));
    let value = client.get("posts", &query).await?;
    Ok(HandlerOutput::text(&value))
}

async fn list_collection(
    client: &WpClient,
    path: &str,
    args: &Value,
) -> Result<HandlerOutput, HandlerError> {
    let query = paging_query(args)?;
    let value = client.get(path, &query).await?;
    Ok(HandlerOutput::text(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, TransportMode};
    use url::Url;

    fn dead_client() -> WpClient {
        // Port 9 (discard) is never listening; calls fail fast.
        let config = Config {
            api_url: Url::parse("http://127.0.0.1:9").unwrap(),
            username: None,
            app_password: None,
            api_token: None,
            mode: TransportMode::Stdio,
        };
        WpClient::from_config(&config).unwrap()
    }

    #[test]
    fn every_known_name_has_a_handler() {
        for name in [
            "list_posts",
            "get_post",
            "create_post",
            "update_post",
            "delete_post",
            "search_posts",
            "list_categories",
            "list_tags",
            "list_users",
        ] {
            assert!(has_handler(name), "missing handler for {name}");
        }
        assert!(!has_handler("no_such_tool"));
    }

    #[tokio::test]
    async fn unknown_tool_returns_none() {
        let client = dead_client();
        assert!(dispatch(&client, "no_such_tool", &json!({})).await.is_none());
    }

    #[tokio::test]
    async fn missing_argument_is_reported_as_error_output() {
        let client = dead_client();
        let out = dispatch(&client, "get_post", &json!({})).await.unwrap();
        assert!(out.is_error);
        assert!(out.items[0].text.contains("id"));
    }

    #[tokio::test]
    async fn wrong_argument_type_is_reported_as_error_output() {
        let client = dead_client();
        let out = dispatch(&client, "get_post", &json!({"id": "7"})).await.unwrap();
        assert!(out.is_error);
        assert!(out.items[0].text.contains("wrong type"));
    }

    #[tokio::test]
    async fn unreachable_api_is_reported_as_error_output() {
        let client = dead_client();
        let out = dispatch(&client, "get_post", &json!({"id": 7})).await.unwrap();
        assert!(out.is_error);
    }

    #[test]
    fn paging_query_clamps_per_page() {
        let query = paging_query(&json!({"per_page": 500, "page": 0})).unwrap();
        assert_eq!(query[0], ("per_page", "100".to_string()));
        assert_eq!(query[1], ("page", "1".to_string()));
    }
}
