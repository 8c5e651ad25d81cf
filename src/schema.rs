//! Declarative schema of the attributes each backend kind exposes.
//!
//! The command line surface, the config-file overrides and the backend
//! `apply_attribute` implementations are all driven from the two lists in
//! this module, so an option can only exist if a backend accepts it.

use std::fmt;

use crate::backend::BackendKind;

/// Which backends an attribute belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeScope {
    /// Accepted by every backend kind.
    Universal,
    /// Accepted only by the synthetic backend.
    Synthetic,
}

/// Shape of the value an override expression must evaluate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Boolean, a single service, or a list of services.
    Toggle,
    /// Number in `0.0..=1.0`.
    Probability,
    /// Session number or list of session numbers.
    Sessions,
    /// Service or list of services.
    Services,
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeKind::Toggle => "toggle",
            AttributeKind::Probability => "probability",
            AttributeKind::Sessions => "sessions",
            AttributeKind::Services => "services",
        };
        f.write_str(name)
    }
}

/// One configurable attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub scope: AttributeScope,
    pub kind: AttributeKind,
    pub help: &'static str,
}

impl AttributeSpec {
    const fn universal(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            scope: AttributeScope::Universal,
            kind: AttributeKind::Toggle,
            help,
        }
    }

    const fn synthetic(name: &'static str, kind: AttributeKind, help: &'static str) -> Self {
        Self {
            name,
            scope: AttributeScope::Synthetic,
            kind,
            help,
        }
    }

    /// Whether a backend of `kind` accepts this attribute.
    pub fn applies_to(&self, kind: BackendKind) -> bool {
        match (self.scope, kind) {
            (AttributeScope::Universal, _) => true,
            (AttributeScope::Synthetic, BackendKind::Synthetic) => true,
            (AttributeScope::Synthetic, BackendKind::StorageBacked) => false,
        }
    }

    /// Long command line flag, e.g. `use-default-response-if-none`.
    pub fn flag(&self) -> String {
        self.name.replace('_', "-")
    }
}

/// Default-response toggles shared by all backends.
pub const UNIVERSAL_ATTRIBUTES: &[AttributeSpec] = &[
    AttributeSpec::universal(
        "use_default_response_if_service_not_supported",
        "Answer serviceNotSupported for services the backend lacks",
    ),
    AttributeSpec::universal(
        "use_default_response_if_missing_sub_function",
        "Answer incorrectMessageLengthOrInvalidFormat when a sub-function byte is missing",
    ),
    AttributeSpec::universal(
        "use_default_response_if_sub_function_not_supported",
        "Answer subFunctionNotSupported for sub-functions the backend lacks",
    ),
    AttributeSpec::universal(
        "use_default_response_if_suppress",
        "Drop positive responses when the suppress bit is set",
    ),
    AttributeSpec::universal(
        "use_default_response_if_none",
        "Answer generalReject when the backend has no response",
    ),
];

/// Tuning knobs of the synthetic backend.
pub const SYNTHETIC_ATTRIBUTES: &[AttributeSpec] = &[
    AttributeSpec::synthetic(
        "mandatory_sessions",
        AttributeKind::Sessions,
        "Sessions that are always supported",
    ),
    AttributeSpec::synthetic(
        "optional_sessions",
        AttributeKind::Sessions,
        "Sessions supported with probability p_session",
    ),
    AttributeSpec::synthetic(
        "p_session",
        AttributeKind::Probability,
        "Probability that an optional session is supported",
    ),
    AttributeSpec::synthetic(
        "mandatory_services",
        AttributeKind::Services,
        "Services that are always supported",
    ),
    AttributeSpec::synthetic(
        "optional_services",
        AttributeKind::Services,
        "Services supported per session with probability p_service",
    ),
    AttributeSpec::synthetic(
        "p_service",
        AttributeKind::Probability,
        "Probability that an optional service is supported in a session",
    ),
    AttributeSpec::synthetic(
        "p_sub_function",
        AttributeKind::Probability,
        "Probability that a sub-function is supported",
    ),
    AttributeSpec::synthetic(
        "p_identifier",
        AttributeKind::Probability,
        "Probability that a data or routine identifier is supported",
    ),
    AttributeSpec::synthetic(
        "p_correct_suppress",
        AttributeKind::Probability,
        "Probability that the suppress bit is honoured",
    ),
    AttributeSpec::synthetic(
        "p_dtc_status_byte",
        AttributeKind::Probability,
        "Probability that a DTC status bit is set",
    ),
];

/// Attributes declared for exactly this scope.
pub fn attributes_in_scope(scope: AttributeScope) -> &'static [AttributeSpec] {
    match scope {
        AttributeScope::Universal => UNIVERSAL_ATTRIBUTES,
        AttributeScope::Synthetic => SYNTHETIC_ATTRIBUTES,
    }
}

/// Every attribute a backend of `kind` accepts, universal ones first.
pub fn configurable_attributes(kind: BackendKind) -> impl Iterator<Item = &'static AttributeSpec> {
    UNIVERSAL_ATTRIBUTES
        .iter()
        .chain(SYNTHETIC_ATTRIBUTES.iter())
        .filter(move |spec| spec.applies_to(kind))
}

/// Find the attribute definition for `name` among the attributes of `kind`.
pub fn lookup(kind: BackendKind, name: &str) -> Option<&'static AttributeSpec> {
    configurable_attributes(kind).find(|spec| spec.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universal_attributes_follow_default_response_naming() {
        for spec in UNIVERSAL_ATTRIBUTES {
            assert!(
                spec.name.starts_with("use_default_response_if"),
                "{} is not a default-response toggle",
                spec.name
            );
            assert_eq!(spec.kind, AttributeKind::Toggle);
        }
    }

    #[test]
    fn synthetic_attributes_are_public_and_exclude_seed() {
        for spec in SYNTHETIC_ATTRIBUTES {
            assert!(!spec.name.starts_with('_'));
            assert_ne!(spec.name, "seed");
            assert!(!spec.name.starts_with("use_default_response_if"));
        }
    }

    #[test]
    fn storage_backend_only_sees_universal_attributes() {
        let names: Vec<_> = configurable_attributes(BackendKind::StorageBacked)
            .map(|spec| spec.name)
            .collect();
        let universal: Vec<_> = UNIVERSAL_ATTRIBUTES.iter().map(|spec| spec.name).collect();
        assert_eq!(names, universal);
        assert!(lookup(BackendKind::StorageBacked, "p_service").is_none());
        assert!(lookup(BackendKind::Synthetic, "p_service").is_some());
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = configurable_attributes(BackendKind::Synthetic)
            .map(|spec| spec.name)
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn flags_are_kebab_case() {
        let spec = lookup(BackendKind::Synthetic, "p_dtc_status_byte").unwrap();
        assert_eq!(spec.flag(), "p-dtc-status-byte");
    }
}
