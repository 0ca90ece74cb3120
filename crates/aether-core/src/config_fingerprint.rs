//! Stable digest of a normalized [`AgentConfig`], used to decide whether two
//! agent-creation requests should share a runner.
//!
//! Normalization: sorted object keys, canonical number formatting, and
//! stripped null/empty fields, so field order and absent-vs-empty
//! differences never change the fingerprint. Hashed with blake3, the same
//! digest the teacher uses for bundle/manifest signatures.

use serde_json::Value;

use crate::contracts::AgentConfig;

pub fn fingerprint(config: &AgentConfig) -> String {
    let value = serde_json::to_value(config).unwrap_or(Value::Null);
    let normalized = normalize(&value);
    let canonical = normalized.to_string();
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .iter()
                .filter(|(_, v)| !is_empty(v))
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_config() -> AgentConfig {
        AgentConfig {
            agent_type: "helper".to_string(),
            framework_type: crate::contracts::FrameworkType::Adk,
            name: None,
            description: None,
            system_prompt: Some("Be brief".to_string()),
            model_config: HashMap::new(),
            available_tools: vec![],
            behavior_settings: HashMap::new(),
            tool_permissions: vec![],
            max_iterations: 10,
            timeout: None,
            memory_config: HashMap::new(),
            include_contents: "default".to_string(),
            output_schema: None,
            input_schema: None,
            output_key: None,
        }
    }

    #[test]
    fn identical_configs_fingerprint_equal() {
        let a = base_config();
        let b = base_config();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn key_order_irrelevant() {
        let mut a = base_config();
        let mut b = base_config();
        a.model_config.insert("temperature".to_string(), serde_json::json!(0.7));
        a.model_config.insert("model".to_string(), serde_json::json!("gpt-4o"));
        b.model_config.insert("model".to_string(), serde_json::json!("gpt-4o"));
        b.model_config.insert("temperature".to_string(), serde_json::json!(0.7));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn different_prompts_fingerprint_differently() {
        let a = base_config();
        let mut b = base_config();
        b.system_prompt = Some("Be verbose".to_string());
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn absent_vs_empty_collection_is_equivalent() {
        let mut a = base_config();
        let mut b = base_config();
        a.available_tools = vec![];
        b.available_tools = vec![];
        b.tool_permissions = vec![];
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}
