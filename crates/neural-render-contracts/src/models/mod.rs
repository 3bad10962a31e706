mod parameters;
mod registry;
mod selectors;

pub use parameters::{ModelParameter, ParamKind, ParamValue, ParameterError, RESERVED_PARAMETERS};
pub use registry::{
    AiModel, ModelFamily, ModelNotFound, ModelRegistry, CLARITY_UPSCALER, CONTROL_NET,
    FLUX_CONTROL_NET,
};
pub use selectors::{ModelSelection, ModelSelector};
