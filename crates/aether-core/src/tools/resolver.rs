//! Maps user-friendly tool names to fully-qualified [`UniversalTool`]s with
//! permission filtering and fuzzy suggestions. Algorithm and permission
//! rules are grounded directly on `tools/resolver.py` in the original
//! source; the struct shape (a resolution-result enum plus a resolver
//! struct wrapping the tool registry) follows the teacher's
//! `engines/execution/tool_resolver.rs`.

use tracing::warn;

use crate::contracts::{UniversalTool, UserContext};
use crate::errors::{AetherError, AetherResult};
use crate::tools::registry::ToolService;

#[derive(Debug, Clone)]
pub enum ToolResolution {
    Exact(UniversalTool),
    BySuffix(UniversalTool),
    BySubstring(UniversalTool),
}

impl ToolResolution {
    pub fn into_tool(self) -> UniversalTool {
        match self {
            ToolResolution::Exact(t) | ToolResolution::BySuffix(t) | ToolResolution::BySubstring(t) => t,
        }
    }
}

pub struct ToolResolver<'a> {
    tool_service: &'a ToolService,
}

impl<'a> ToolResolver<'a> {
    pub fn new(tool_service: &'a ToolService) -> Self {
        Self { tool_service }
    }

    pub async fn resolve_tools(&self, names: &[String], user_context: Option<&UserContext>) -> AetherResult<Vec<UniversalTool>> {
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            resolved.push(self.resolve_single(name, user_context).await?);
        }
        Ok(resolved)
    }

    /// Three-tier priority match: (1) exact fully-qualified name, (2) any
    /// tool whose fully-qualified name ends with `.<name>`, (3) substring
    /// match on the tool's local (final-segment) name. Ties in tiers 2/3
    /// resolve to the first candidate in registration order, with a
    /// warning.
    pub async fn resolve_single(&self, name: &str, user_context: Option<&UserContext>) -> AetherResult<UniversalTool> {
        let all_tools = self.tool_service.list_tools().await;

        if let Some(tool) = all_tools.iter().find(|t| t.name == name) {
            return self.authorize(tool.clone(), user_context, name);
        }

        let suffix = format!(".{}", name);
        let suffix_candidates: Vec<&UniversalTool> = all_tools.iter().filter(|t| t.name.ends_with(&suffix)).collect();
        if !suffix_candidates.is_empty() {
            if suffix_candidates.len() > 1 {
                warn!(tool_name = name, candidates = suffix_candidates.len(), "multiple suffix matches for tool, using first");
            }
            return self.authorize(suffix_candidates[0].clone(), user_context, name);
        }

        let substring_candidates: Vec<&UniversalTool> = all_tools.iter().filter(|t| t.local_name().contains(name)).collect();
        if !substring_candidates.is_empty() {
            if substring_candidates.len() > 1 {
                warn!(tool_name = name, candidates = substring_candidates.len(), "multiple substring matches for tool, using first");
            }
            return self.authorize(substring_candidates[0].clone(), user_context, name);
        }

        let suggestions = self.find_similar(name, &all_tools);
        let message = if suggestions.is_empty() {
            format!("tool '{}' not found", name)
        } else {
            format!("tool '{}' not found. Did you mean: {}?", name, suggestions.join(", "))
        };
        Err(AetherError::tool_not_declared("tool_resolver.resolve_single", message))
    }

    fn authorize(&self, tool: UniversalTool, user_context: Option<&UserContext>, requested_name: &str) -> AetherResult<UniversalTool> {
        if check_permission(&tool, user_context) {
            Ok(tool)
        } else {
            warn!(tool_name = %tool.name, requested = requested_name, "tool access denied by permission filter");
            Err(AetherError::tool_not_declared(
                "tool_resolver.resolve_single",
                format!("tool '{}' not found", requested_name),
            ))
        }
    }

    fn find_similar(&self, name: &str, all_tools: &[UniversalTool]) -> Vec<String> {
        let lower = name.to_lowercase();
        let mut matches: Vec<String> = all_tools
            .iter()
            .filter(|t| t.local_name().to_lowercase().contains(&lower) || lower.contains(&t.local_name().to_lowercase()))
            .map(|t| t.name.clone())
            .collect();
        matches.truncate(3);
        matches
    }

    pub async fn list_available(&self, namespace_filter: Option<&str>, user_context: Option<&UserContext>) -> Vec<UniversalTool> {
        let mut tools: Vec<UniversalTool> = self
            .tool_service
            .list_tools()
            .await
            .into_iter()
            .filter(|t| namespace_filter.map_or(true, |ns| t.namespace == ns))
            .filter(|t| check_permission(t, user_context))
            .collect();
        tools.sort_by(|a, b| (a.namespace.as_str(), a.name.as_str()).cmp(&(b.namespace.as_str(), b.name.as_str())));
        tools
    }
}

/// `None` user_context => system-level access (everything allowed).
/// `permissions: None` => only builtin tools. Otherwise: full name,
/// namespace, or wildcard `<ns>.*` grants access; builtin is always
/// allowed.
fn check_permission(tool: &UniversalTool, user_context: Option<&UserContext>) -> bool {
    let Some(ctx) = user_context else {
        return true;
    };
    let Some(permissions) = &ctx.permissions else {
        return tool.namespace == "builtin";
    };
    let granted: std::collections::HashSet<&str> = permissions.permissions.iter().map(|s| s.as_str()).collect();
    if granted.contains(tool.name.as_str()) || granted.contains(tool.namespace.as_str()) {
        return true;
    }
    let wildcard = format!("{}.*", tool.namespace);
    if granted.contains(wildcard.as_str()) {
        return true;
    }
    tool.namespace == "builtin"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{UserPermissions};
    use crate::tools::registry::Tool;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct StubTool(&'static str, &'static str);

    #[async_trait]
    impl Tool for StubTool {
        fn schema(&self) -> UniversalTool {
            UniversalTool {
                name: self.0.to_string(),
                description: "stub".to_string(),
                parameters_schema: serde_json::json!({}),
                namespace: self.1.to_string(),
                supports_streaming: false,
                required_permissions: vec![],
                metadata: HashMap::new(),
            }
        }

        async fn execute(&self, _request: &crate::contracts::ToolRequest) -> AetherResult<crate::contracts::ToolResult> {
            Ok(crate::contracts::ToolResult::success(
                self.0,
                crate::contracts::ToolResultData::Null,
            ))
        }
    }

    async fn service_with(tools: Vec<(&'static str, &'static str)>) -> ToolService {
        let service = ToolService::new();
        for (name, ns) in tools {
            service.register_tool(Arc::new(StubTool(name, ns))).await;
        }
        service
    }

    #[tokio::test]
    async fn exact_match_wins() {
        let service = service_with(vec![("web.search", "web")]).await;
        let resolver = ToolResolver::new(&service);
        let tool = resolver.resolve_single("web.search", None).await.unwrap();
        assert_eq!(tool.name, "web.search");
    }

    #[tokio::test]
    async fn suffix_match_used_when_no_exact() {
        let service = service_with(vec![("web.search", "web")]).await;
        let resolver = ToolResolver::new(&service);
        let tool = resolver.resolve_single("search", None).await.unwrap();
        assert_eq!(tool.name, "web.search");
    }

    #[tokio::test]
    async fn substring_match_used_as_last_resort() {
        let service = service_with(vec![("web.search_engine", "web")]).await;
        let resolver = ToolResolver::new(&service);
        let tool = resolver.resolve_single("search", None).await.unwrap();
        assert_eq!(tool.name, "web.search_engine");
    }

    #[tokio::test]
    async fn not_found_suggests_similar_names() {
        let service = service_with(vec![("web.search", "web")]).await;
        let resolver = ToolResolver::new(&service);
        let err = resolver.resolve_single("serch", None).await.unwrap_err();
        assert!(err.message.contains("Did you mean"));
    }

    #[tokio::test]
    async fn permission_denied_for_non_builtin_without_grant() {
        let service = service_with(vec![("web.search", "web")]).await;
        let resolver = ToolResolver::new(&service);
        let ctx = UserContext {
            user_id: Some("u1".to_string()),
            user_name: None,
            session_token: None,
            permissions: Some(UserPermissions { permissions: vec![], roles: vec![], restrictions: HashMap::new() }),
            preferences: None,
        };
        let err = resolver.resolve_single("web.search", Some(&ctx)).await.unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::ToolNotDeclared);
    }

    #[tokio::test]
    async fn builtin_tools_always_allowed() {
        let service = service_with(vec![("builtin.ponder", "builtin")]).await;
        let resolver = ToolResolver::new(&service);
        let ctx = UserContext {
            user_id: Some("u1".to_string()),
            user_name: None,
            session_token: None,
            permissions: Some(UserPermissions { permissions: vec![], roles: vec![], restrictions: HashMap::new() }),
            preferences: None,
        };
        let tool = resolver.resolve_single("builtin.ponder", Some(&ctx)).await.unwrap();
        assert_eq!(tool.name, "builtin.ponder");
    }

    #[tokio::test]
    async fn wildcard_namespace_grant_allows_access() {
        let service = service_with(vec![("web.search", "web")]).await;
        let resolver = ToolResolver::new(&service);
        let ctx = UserContext {
            user_id: Some("u1".to_string()),
            user_name: None,
            session_token: None,
            permissions: Some(UserPermissions { permissions: vec!["web.*".to_string()], roles: vec![], restrictions: HashMap::new() }),
            preferences: None,
        };
        let tool = resolver.resolve_single("web.search", Some(&ctx)).await.unwrap();
        assert_eq!(tool.name, "web.search");
    }
}
