use tracing::{debug, info};

use crate::error::LaunchError;
use crate::overrides::{evaluate_attribute, AttributeValue, OverrideRule};
use crate::schema;

use super::{
    BackendConfig, BackendKind, ResolvedBackend, StorageBackend, SyntheticBackend, UdsBackend,
};

/// Evaluate every rule against the attribute schema of `kind`.
///
/// Rules are returned in input order so that applying them in sequence lets
/// the last occurrence of an attribute win. Nothing is constructed here: an
/// unknown attribute or a bad expression aborts before any backend exists.
pub fn resolve_overrides(
    kind: BackendKind,
    rules: &[OverrideRule],
) -> Result<Vec<(&'static str, AttributeValue)>, LaunchError> {
    let mut ordered: Vec<&OverrideRule> = rules.iter().collect();
    ordered.sort_by_key(|rule| rule.position);

    ordered
        .into_iter()
        .map(|rule| {
            let spec = schema::lookup(kind, &rule.attribute).ok_or_else(|| {
                LaunchError::UnknownAttribute {
                    kind,
                    name: rule.attribute.clone(),
                }
            })?;
            let value = evaluate_attribute(spec, &rule.expression).map_err(|source| {
                LaunchError::Evaluation {
                    attribute: rule.attribute.clone(),
                    source,
                }
            })?;
            debug!(attribute = spec.name, expression = %rule.expression, ?value, "override evaluated");
            Ok((spec.name, value))
        })
        .collect()
}

/// Construct the backend for `config` and apply the override rules to it.
///
/// # Arguments
/// * `config` - Typed configuration selecting exactly one backend kind
/// * `rules` - Raw overrides, in any order; `position` decides precedence
///
/// # Errors
/// - `UnknownAttribute` when a rule names an attribute the kind lacks
/// - `Evaluation` when an expression does not evaluate to the attribute's kind
/// - `DatasetMissing` when the storage dataset path does not exist
pub fn build_backend(
    config: BackendConfig,
    rules: &[OverrideRule],
) -> Result<ResolvedBackend, LaunchError> {
    let kind = config.kind();
    let values = resolve_overrides(kind, rules)?;

    let mut backend: Box<dyn UdsBackend> = match config {
        BackendConfig::StorageBacked(config) => Box::new(StorageBackend::new(config)?),
        BackendConfig::Synthetic(config) => {
            info!(seed = config.seed, "synthetic backend seed");
            Box::new(SyntheticBackend::new(config))
        }
    };

    for (name, value) in values {
        backend.apply_attribute(name, value)?;
    }

    info!(backend = %kind, overrides = rules.len(), "backend constructed");
    Ok(ResolvedBackend::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{StorageBackedConfig, SyntheticConfig};
    use crate::error::EvaluationError;
    use crate::overrides::ServiceToggle;
    use crate::uds::ServiceId;

    #[test]
    fn later_rules_win() {
        let rules = vec![
            OverrideRule::new("p_service", "0.75", 3),
            OverrideRule::new("p_service", "0.25", 1),
        ];
        let values = resolve_overrides(BackendKind::Synthetic, &rules).unwrap();
        assert_eq!(values.last().unwrap(), &("p_service", AttributeValue::Probability(0.75)));
    }

    #[test]
    fn unknown_attribute_is_rejected_for_kind() {
        let rules = vec![OverrideRule::new("p_service", "0.5", 0)];
        let err = resolve_overrides(BackendKind::StorageBacked, &rules).unwrap_err();
        assert!(matches!(err, LaunchError::UnknownAttribute { .. }));
    }

    #[test]
    fn toggle_resolves_service_name() {
        let backend = build_backend(
            BackendConfig::Synthetic(SyntheticConfig { seed: 42 }),
            &[OverrideRule::new(
                "use_default_response_if_suppress",
                "TesterPresent",
                0,
            )],
        )
        .unwrap();
        let toggle = backend
            .with(|backend| backend.defaults().suppress.clone())
            .unwrap();
        assert_eq!(
            toggle,
            ServiceToggle::Only([ServiceId::TESTER_PRESENT].into_iter().collect())
        );
    }

    #[test]
    fn bad_expression_stops_before_construction() {
        let missing = std::env::temp_dir().join("vecu-selector-does-not-exist.json");
        let err = build_backend(
            BackendConfig::StorageBacked(StorageBackedConfig {
                path: missing,
                unit_name: None,
                properties: None,
            }),
            &[OverrideRule::new(
                "use_default_response_if_none",
                "os.system('x')",
                0,
            )],
        )
        .unwrap_err();
        // Evaluation happens first, so the missing dataset is never looked at.
        match err {
            LaunchError::Evaluation { source, .. } => {
                assert_eq!(source, EvaluationError::UnknownSymbol { name: "os".into() })
            }
            other => panic!("expected evaluation error, got {other:?}"),
        }
    }

    #[test]
    fn missing_dataset_is_a_configuration_error() {
        let err = build_backend(
            BackendConfig::StorageBacked(StorageBackedConfig {
                path: std::env::temp_dir().join("vecu-selector-missing.json"),
                unit_name: None,
                properties: None,
            }),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, LaunchError::DatasetMissing { .. }));
    }
}
