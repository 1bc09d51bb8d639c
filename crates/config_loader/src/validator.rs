//! Settings validation
//!
//! Rules:
//! - core limits within range (`validator` derive)
//! - dispatcher ids non-empty and unique, dispatch_limit >= 1
//! - file dispatchers name a `path`
//! - transformation ids unique, each with at least one scope
//! - mapping destinations non-empty, mappings keyed by a non-empty id

use std::collections::HashSet;

use contracts::{CoreError, DispatcherKind, SdkSettings};
use validator::{Validate, ValidationErrors};

/// Validate settings, returning the first error found
pub fn validate(settings: &SdkSettings) -> Result<(), CoreError> {
    validate_core(settings)?;
    validate_dispatchers(settings)?;
    validate_transformations(settings)?;
    validate_mappings(settings)?;
    Ok(())
}

fn validate_core(settings: &SdkSettings) -> Result<(), CoreError> {
    settings
        .core
        .validate()
        .map_err(|e| to_core_error("core", &e))
}

fn validate_dispatchers(settings: &SdkSettings) -> Result<(), CoreError> {
    let mut seen = HashSet::new();
    for (idx, dispatcher) in settings.dispatchers.iter().enumerate() {
        dispatcher
            .validate()
            .map_err(|e| to_core_error(&format!("dispatchers[{idx}]"), &e))?;

        if !seen.insert(dispatcher.id.as_str()) {
            return Err(CoreError::config_validation(
                format!("dispatchers[id={}]", dispatcher.id),
                "duplicate dispatcher id",
            ));
        }

        if dispatcher.kind == DispatcherKind::File && !dispatcher.params.contains_key("path") {
            return Err(CoreError::config_validation(
                format!("dispatchers[{}].params.path", dispatcher.id),
                "file dispatcher requires 'path' parameter",
            ));
        }
    }
    Ok(())
}

fn validate_transformations(settings: &SdkSettings) -> Result<(), CoreError> {
    let mut seen = HashSet::new();
    for transformation in &settings.transformations {
        if !seen.insert(transformation.id.as_str()) {
            return Err(CoreError::config_validation(
                format!("transformations[id={}]", transformation.id),
                "duplicate transformation id",
            ));
        }
        if transformation.scopes.is_empty() {
            return Err(CoreError::config_validation(
                format!("transformations[{}].scopes", transformation.id),
                "at least one scope is required",
            ));
        }
    }
    Ok(())
}

fn validate_mappings(settings: &SdkSettings) -> Result<(), CoreError> {
    for (dispatcher_id, operations) in &settings.mappings {
        if dispatcher_id.is_empty() {
            return Err(CoreError::config_validation(
                "mappings",
                "mapping key must be a dispatcher id",
            ));
        }
        for (idx, operation) in operations.iter().enumerate() {
            if operation.destination.segments().is_empty() {
                return Err(CoreError::config_validation(
                    format!("mappings.{dispatcher_id}[{idx}].destination"),
                    "destination cannot be empty",
                ));
            }
        }
    }
    Ok(())
}

/// First field error, reported as `<prefix>.<field>`
fn to_core_error(prefix: &str, errors: &ValidationErrors) -> CoreError {
    let (field, message) = errors
        .field_errors()
        .into_iter()
        .next()
        .map(|(field, errs)| {
            let message = errs
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "invalid value".to_string());
            (format!("{prefix}.{field}"), message)
        })
        .unwrap_or_else(|| (prefix.to_string(), errors.to_string()));

    CoreError::config_validation(field, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CoreSettings, DispatcherConfig, TransformationSettings};

    fn dispatcher(id: &str, kind: DispatcherKind) -> DispatcherConfig {
        DispatcherConfig {
            id: id.to_string(),
            kind,
            dispatch_limit: 1,
            params: Default::default(),
        }
    }

    #[test]
    fn test_valid_settings() {
        let settings = SdkSettings {
            dispatchers: vec![dispatcher("console", DispatcherKind::Log)],
            ..Default::default()
        };
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn test_duplicate_dispatcher_ids() {
        let settings = SdkSettings {
            dispatchers: vec![
                dispatcher("a", DispatcherKind::Log),
                dispatcher("a", DispatcherKind::Log),
            ],
            ..Default::default()
        };
        let err = validate(&settings).unwrap_err();
        assert!(err.to_string().contains("duplicate dispatcher id"));
    }

    #[test]
    fn test_zero_dispatch_limit() {
        let mut config = dispatcher("a", DispatcherKind::Log);
        config.dispatch_limit = 0;
        let settings = SdkSettings {
            dispatchers: vec![config],
            ..Default::default()
        };
        let err = validate(&settings).unwrap_err();
        assert!(matches!(err, CoreError::ConfigValidation { ref field, .. } if field == "dispatchers[0].dispatch_limit"));
    }

    #[test]
    fn test_file_dispatcher_requires_path() {
        let settings = SdkSettings {
            dispatchers: vec![dispatcher("out", DispatcherKind::File)],
            ..Default::default()
        };
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn test_zero_in_flight_rejected() {
        let settings = SdkSettings {
            core: CoreSettings {
                max_in_flight: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = validate(&settings).unwrap_err();
        assert!(matches!(err, CoreError::ConfigValidation { ref field, .. } if field == "core.max_in_flight"));
    }

    #[test]
    fn test_transformation_without_scope() {
        let settings = SdkSettings {
            transformations: vec![TransformationSettings {
                id: "t".into(),
                transformer_id: "x".into(),
                scopes: vec![],
                configuration: Default::default(),
            }],
            ..Default::default()
        };
        assert!(validate(&settings).is_err());
    }
}
