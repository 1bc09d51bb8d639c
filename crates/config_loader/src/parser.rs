//! Settings parsing
//!
//! TOML (preferred) and JSON.

use contracts::{CoreError, SdkSettings};

/// Settings file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML (preferred)
    Toml,
    Json,
}

impl ConfigFormat {
    /// Infer format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse TOML settings
pub fn parse_toml(content: &str) -> Result<SdkSettings, CoreError> {
    toml::from_str(content).map_err(|e| CoreError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse JSON settings
pub fn parse_json(content: &str) -> Result<SdkSettings, CoreError> {
    serde_json::from_str(content).map_err(|e| CoreError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<SdkSettings, CoreError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{BarrierScope, DispatcherKind, JsonPath, TransformationScope};
    use serde_json::json;

    #[test]
    fn test_parse_toml_full() {
        let content = r#"
[core]
max_queue_size = 20
expiration_secs = 60

[barriers.BatchingBarrier]
scopes = ["http"]
[barriers.BatchingBarrier.configuration]
batch_size = 5

[[transformations]]
id = "enrich"
transformer_id = "DeviceData"
scopes = ["after_collectors", "all_dispatchers"]

[[mappings.http]]
destination = "screen"
reference = "page.name"

[[mappings.http]]
destination = "command_name"
map_to = "track"

[[dispatchers]]
id = "http"
kind = "file"
dispatch_limit = 10
[dispatchers.params]
path = "/tmp/out"
"#;
        let settings = parse_toml(content).unwrap();
        assert_eq!(settings.core.max_queue_size, 20);
        assert_eq!(settings.core.max_in_flight, 50);

        let batching = &settings.barriers["BatchingBarrier"];
        assert_eq!(
            batching.scopes,
            Some(vec![BarrierScope::Dispatcher("http".into())])
        );
        assert_eq!(batching.configuration["batch_size"], json!(5));

        assert_eq!(
            settings.transformations[0].scopes,
            vec![
                TransformationScope::AfterCollectors,
                TransformationScope::AllDispatchers
            ]
        );

        let mappings = &settings.mappings["http"];
        assert_eq!(
            mappings[0].parameters.reference,
            Some(JsonPath::parse("page.name").unwrap())
        );
        assert_eq!(mappings[1].parameters.map_to, Some(json!("track")));

        assert_eq!(settings.dispatchers[0].kind, DispatcherKind::File);
        assert_eq!(settings.dispatchers[0].params["path"], "/tmp/out");
    }

    #[test]
    fn test_parse_json_minimal() {
        let settings = parse_json(r#"{ "dispatchers": [{ "id": "log", "kind": "log" }] }"#).unwrap();
        assert_eq!(settings.dispatchers.len(), 1);
        assert_eq!(settings.dispatchers[0].dispatch_limit, 1);
        assert!(settings.barriers.is_empty());
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let err = parse_toml("invalid toml [[[").unwrap_err();
        assert!(matches!(err, CoreError::ConfigParse { .. }));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
