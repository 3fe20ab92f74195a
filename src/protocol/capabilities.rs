//! Capability negotiation.
//!
//! A front end publishes what it *requires* (hard) and what it would *like*
//! (optional). A back end publishes a support map. [`negotiate`] compares
//! the two once, before any relay task exists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capability names a front end needs from its back end
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRequirements {
    /// Mediation is refused unless all of these are supported
    #[serde(rename = "required_capabilities", alias = "required", default)]
    pub required: Vec<String>,
    /// Missing ones only degrade the verdict to partial
    #[serde(rename = "optional_capabilities", alias = "optional", default)]
    pub optional: Vec<String>,
}

impl CapabilityRequirements {
    /// Create from required and optional name lists
    pub fn new<R, O>(required: R, optional: O) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            optional: optional.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether nothing at all is declared
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.optional.is_empty()
    }

    /// JSON form used on the wire (`compatibility_check.capabilities`)
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Capability name → supported flag, as advertised by a back end
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySupport {
    map: BTreeMap<String, bool>,
}

impl CapabilitySupport {
    /// Empty support map
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: record a capability
    pub fn with(mut self, name: &str, supported: bool) -> Self {
        self.map.insert(name.to_string(), supported);
        self
    }

    /// Record a capability
    pub fn set(&mut self, name: &str, supported: bool) {
        self.map.insert(name.to_string(), supported);
    }

    /// Absent and `false` both mean unsupported
    pub fn supports(&self, name: &str) -> bool {
        self.map.get(name).copied().unwrap_or(false)
    }

    /// Iterate over all advertised entries
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.map.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// JSON object form
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for CapabilitySupport {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Outcome of [`negotiate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompatibilityVerdict {
    /// Everything requested is supported
    Compatible,
    /// Required set satisfied; carries the unsupported optional names
    PartiallyCompatible(Vec<String>),
    /// Carries the unsupported required names
    Incompatible(Vec<String>),
}

impl CompatibilityVerdict {
    /// Whether mediation may start under this verdict
    pub fn allows_mediation(&self) -> bool {
        !matches!(self, Self::Incompatible(_))
    }

    /// Missing capability names (empty when compatible)
    pub fn missing(&self) -> &[String] {
        match self {
            Self::Compatible => &[],
            Self::PartiallyCompatible(missing) | Self::Incompatible(missing) => missing,
        }
    }
}

impl std::fmt::Display for CompatibilityVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compatible => write!(f, "compatible"),
            Self::PartiallyCompatible(missing) => {
                write!(
                    f,
                    "partially compatible (missing optional: {})",
                    missing.join(", ")
                )
            },
            Self::Incompatible(missing) => {
                write!(f, "incompatible (missing required: {})", missing.join(", "))
            },
        }
    }
}

/// Compare a front end's requirements against a back end's support map.
///
/// Missing names are reported once each, in declaration order. `None`
/// requirements are vacuously compatible.
pub fn negotiate(
    requirements: Option<&CapabilityRequirements>,
    support: &CapabilitySupport,
) -> CompatibilityVerdict {
    let Some(requirements) = requirements else {
        return CompatibilityVerdict::Compatible;
    };

    let missing_required = unsupported(&requirements.required, support);
    if !missing_required.is_empty() {
        return CompatibilityVerdict::Incompatible(missing_required);
    }

    let missing_optional = unsupported(&requirements.optional, support);
    if !missing_optional.is_empty() {
        return CompatibilityVerdict::PartiallyCompatible(missing_optional);
    }

    CompatibilityVerdict::Compatible
}

fn unsupported(names: &[String], support: &CapabilitySupport) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for name in names {
        if !support.supports(name) && !missing.contains(name) {
            missing.push(name.clone());
        }
    }
    missing
}

/// Check version compatibility: major components must match.
pub fn versions_compatible(local: &str, remote: &str) -> bool {
    let local_major = local.split('.').next().unwrap_or("0");
    let remote_major = remote.split('.').next().unwrap_or("0");
    local_major == remote_major
}

#[cfg(test)]
mod tests {
    use super::*;

    fn support() -> CapabilitySupport {
        CapabilitySupport::new()
            .with("text_io", true)
            .with("structured_output", false)
            .with("language_understanding", true)
    }

    #[test]
    fn test_required_satisfied() {
        let req = CapabilityRequirements::new(["text_io"], Vec::<String>::new());
        let support = CapabilitySupport::new().with("text_io", true);
        assert_eq!(
            negotiate(Some(&req), &support),
            CompatibilityVerdict::Compatible
        );
    }

    #[test]
    fn test_missing_required() {
        let req = CapabilityRequirements::new(["text_io", "vision"], Vec::<String>::new());
        let support = CapabilitySupport::new().with("text_io", true);
        assert_eq!(
            negotiate(Some(&req), &support),
            CompatibilityVerdict::Incompatible(vec!["vision".to_string()])
        );
    }

    #[test]
    fn test_false_counts_as_missing() {
        let req = CapabilityRequirements::new(["text_io"], ["structured_output"]);
        let verdict = negotiate(Some(&req), &support());
        assert_eq!(
            verdict,
            CompatibilityVerdict::PartiallyCompatible(vec!["structured_output".to_string()])
        );
        assert!(verdict.allows_mediation());
    }

    #[test]
    fn test_required_takes_precedence_over_optional() {
        let req = CapabilityRequirements::new(["vision"], ["audio"]);
        let verdict = negotiate(Some(&req), &support());
        assert_eq!(
            verdict,
            CompatibilityVerdict::Incompatible(vec!["vision".to_string()])
        );
        assert!(!verdict.allows_mediation());
    }

    #[test]
    fn test_absent_requirements_are_compatible() {
        assert_eq!(
            negotiate(None, &CapabilitySupport::new()),
            CompatibilityVerdict::Compatible
        );
    }

    #[test]
    fn test_duplicates_reported_once() {
        let req = CapabilityRequirements::new(["vision", "vision"], Vec::<String>::new());
        assert_eq!(
            negotiate(Some(&req), &support()).missing(),
            &["vision".to_string()]
        );
    }

    #[test]
    fn test_requirements_wire_names() {
        let req: CapabilityRequirements = serde_json::from_str(
            r#"{"required_capabilities":["text_io"],"optional_capabilities":["structured_output"]}"#,
        )
        .unwrap();
        assert_eq!(req.required, vec!["text_io"]);
        assert_eq!(req.optional, vec!["structured_output"]);

        let short: CapabilityRequirements =
            serde_json::from_str(r#"{"required":["text_io"]}"#).unwrap();
        assert!(short.optional.is_empty());
    }

    #[test]
    fn test_version_compatibility() {
        assert!(versions_compatible("1.0.0", "1.4.2"));
        assert!(!versions_compatible("1.0.0", "2.0.0"));
    }
}
