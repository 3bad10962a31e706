use super::registry::{AiModel, ModelNotFound, ModelRegistry};

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSelection {
    pub model: AiModel,
    pub requested: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// An unknown name is an error, never a silent fallback to the default.
    pub fn select(&self, requested: Option<&str>) -> Result<ModelSelection, ModelNotFound> {
        let model = match requested {
            Some(name) => self.registry.find(name)?,
            None => self
                .registry
                .default_model()
                .ok_or_else(|| ModelNotFound("<default>".to_string()))?,
        };
        Ok(ModelSelection {
            model: model.clone(),
            requested: requested.map(str::to_string),
        })
    }
}
