//! Ordered component catalog with per-component enabled flags.

use serde::Serialize;
use thiserror::Error;

use crate::settings::ComponentSpec;

/// A tag that is not in the catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown component '{0}'")]
pub struct UnknownComponent(pub String);

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    pub tag: String,
    pub name: String,
    pub enabled: bool,
}

/// Components in worker order. Everything starts disabled.
#[derive(Debug, Clone, Default)]
pub struct ComponentCatalog {
    components: Vec<Component>,
}

impl ComponentCatalog {
    /// Builds a catalog from settings entries, preserving their order.
    pub fn new(specs: &[ComponentSpec]) -> Self {
        Self {
            components: specs
                .iter()
                .map(|spec| Component {
                    tag: spec.tag.clone(),
                    name: spec.name.clone(),
                    enabled: false,
                })
                .collect(),
        }
    }

    /// Iterates over all components.
    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }

    /// Returns the number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns true if the catalog has no components.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns whether `tag` is enabled; unknown tags are not.
    pub fn is_enabled(&self, tag: &str) -> bool {
        self.components.iter().any(|c| c.tag == tag && c.enabled)
    }

    /// Enables a component.
    pub fn enable(&mut self, tag: &str) -> Result<(), UnknownComponent> {
        self.set_enabled(tag, true)
    }

    /// Disables a component.
    pub fn disable(&mut self, tag: &str) -> Result<(), UnknownComponent> {
        self.set_enabled(tag, false)
    }

    /// Enables every component.
    pub fn enable_all(&mut self) {
        self.components.iter_mut().for_each(|c| c.enabled = true);
    }

    /// Disables every component.
    pub fn disable_all(&mut self) {
        self.components.iter_mut().for_each(|c| c.enabled = false);
    }

    /// Enabled tags in catalog order.
    pub fn enabled_tags(&self) -> Vec<String> {
        self.components
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.tag.clone())
            .collect()
    }

    fn set_enabled(&mut self, tag: &str, enabled: bool) -> Result<(), UnknownComponent> {
        let component = self
            .components
            .iter_mut()
            .find(|c| c.tag == tag)
            .ok_or_else(|| UnknownComponent(tag.to_string()))?;
        component.enabled = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ControllerSettings;

    fn catalog() -> ComponentCatalog {
        ComponentCatalog::new(&ControllerSettings::default().components)
    }

    #[test]
    fn catalog_starts_disabled() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 8);
        assert!(catalog.enabled_tags().is_empty());
    }

    #[test]
    fn enabled_tags_follow_catalog_order() {
        let mut catalog = catalog();
        catalog.enable("N63").unwrap();
        catalog.enable("BKT").unwrap();
        catalog.enable("SNT").unwrap();

        assert_eq!(catalog.enabled_tags(), vec!["BKT", "SNT", "N63"]);
        assert!(catalog.is_enabled("SNT"));
        assert!(!catalog.is_enabled("VT3"));
    }

    #[test]
    fn enable_rejects_unknown_tag() {
        let mut catalog = catalog();
        assert_eq!(
            catalog.enable("XYZ").unwrap_err(),
            UnknownComponent("XYZ".to_string())
        );
    }

    #[test]
    fn enable_all_and_disable_all() {
        let mut catalog = catalog();
        catalog.enable_all();
        assert_eq!(catalog.enabled_tags().len(), 8);

        catalog.disable("BBP").unwrap();
        assert_eq!(catalog.enabled_tags().len(), 7);

        catalog.disable_all();
        assert!(catalog.enabled_tags().is_empty());
    }
}
