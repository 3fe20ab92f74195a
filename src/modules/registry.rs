//! Module registry for front end and back end lookup.
//!
//! The registry maps a stable id to a factory so hosts can pick modules by
//! name (CLI flags, config) and get a fresh instance per session.

use std::collections::BTreeMap;

use super::{BackEnd, EchoModel, FrontEnd, StdioInterface};
use crate::config::{InterfaceDescriptor, ModelDescriptor};
use crate::error::{ModlinkError, Result};
use crate::protocol::{negotiate, CompatibilityVerdict};

/// Builds a front end
pub type FrontEndFactory = Box<dyn Fn() -> Box<dyn FrontEnd> + Send + Sync>;

/// Builds a back end
pub type BackEndFactory = Box<dyn Fn() -> Box<dyn BackEnd> + Send + Sync>;

/// Registry of available modules
///
/// # Example
/// ```
/// use modlink::modules::{BackEnd, ModuleRegistry};
///
/// let registry = ModuleRegistry::with_builtins();
/// assert!(registry.interface_ids().contains(&"stdio"));
///
/// let model = registry.create_model("echo").unwrap();
/// assert_eq!(model.id(), "echo");
/// ```
#[derive(Default)]
pub struct ModuleRegistry {
    interfaces: BTreeMap<String, FrontEndFactory>,
    models: BTreeMap<String, BackEndFactory>,
}

impl ModuleRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `stdio` interface and `echo` model
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.interfaces.insert(
            StdioInterface::ID.to_string(),
            Box::new(|| Box::new(StdioInterface::new()) as Box<dyn FrontEnd>),
        );
        registry.models.insert(
            EchoModel::ID.to_string(),
            Box::new(|| Box::new(EchoModel::new()) as Box<dyn BackEnd>),
        );
        registry
    }

    /// Register a front end factory under `id`
    pub fn register_interface<F>(&mut self, id: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn FrontEnd> + Send + Sync + 'static,
    {
        if self.interfaces.contains_key(id) {
            return Err(ModlinkError::Registry(format!(
                "interface '{id}' already registered"
            )));
        }
        self.interfaces.insert(id.to_string(), Box::new(factory));
        Ok(())
    }

    /// Register a back end factory under `id`
    pub fn register_model<F>(&mut self, id: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn BackEnd> + Send + Sync + 'static,
    {
        if self.models.contains_key(id) {
            return Err(ModlinkError::Registry(format!(
                "model '{id}' already registered"
            )));
        }
        self.models.insert(id.to_string(), Box::new(factory));
        Ok(())
    }

    /// Fresh front end instance
    pub fn create_interface(&self, id: &str) -> Result<Box<dyn FrontEnd>> {
        self.interfaces
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| ModlinkError::Registry(format!("unknown interface '{id}'")))
    }

    /// Fresh back end instance
    pub fn create_model(&self, id: &str) -> Result<Box<dyn BackEnd>> {
        self.models
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| ModlinkError::Registry(format!("unknown model '{id}'")))
    }

    /// Registered interface ids, sorted
    pub fn interface_ids(&self) -> Vec<&str> {
        self.interfaces.keys().map(String::as_str).collect()
    }

    /// Registered model ids, sorted
    pub fn model_ids(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    /// Negotiate two descriptors without instantiating anything
    pub fn check_descriptors(
        interface: &InterfaceDescriptor,
        model: &ModelDescriptor,
    ) -> CompatibilityVerdict {
        negotiate(Some(&interface.requirements()), &model.capabilities)
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("interfaces", &self.interface_ids())
            .field("models", &self.model_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CapabilitySupport;

    #[test]
    fn test_builtins() {
        let registry = ModuleRegistry::with_builtins();
        assert_eq!(registry.interface_ids(), vec!["stdio"]);
        assert_eq!(registry.model_ids(), vec!["echo"]);
        assert!(registry.create_model("echo").is_ok());
    }

    #[test]
    fn test_unknown_id() {
        let registry = ModuleRegistry::new();
        let err = registry.create_model("gpt").err().unwrap();
        assert!(matches!(err, ModlinkError::Registry(_)));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ModuleRegistry::with_builtins();
        let err = registry
            .register_model("echo", || Box::new(EchoModel::new().with_suffix("!")) as Box<dyn BackEnd>)
            .unwrap_err();
        assert!(matches!(err, ModlinkError::Registry(_)));

        registry
            .register_model("loud", || Box::new(EchoModel::new().with_suffix("!")) as Box<dyn BackEnd>)
            .unwrap();
        assert_eq!(registry.model_ids(), vec!["echo", "loud"]);
    }

    #[test]
    fn test_check_descriptors() {
        let interface = InterfaceDescriptor {
            id: "chat".to_string(),
            name: "Chat".to_string(),
            description: String::new(),
            required_capabilities: vec!["text_io".to_string()],
            optional_capabilities: vec!["vision".to_string()],
        };
        let model = ModelDescriptor {
            id: "small".to_string(),
            name: "Small".to_string(),
            description: String::new(),
            capabilities: CapabilitySupport::new().with("text_io", true),
        };
        assert_eq!(
            ModuleRegistry::check_descriptors(&interface, &model),
            CompatibilityVerdict::PartiallyCompatible(vec!["vision".to_string()])
        );
    }
}
