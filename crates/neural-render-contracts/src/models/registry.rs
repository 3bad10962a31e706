use indexmap::IndexMap;
use thiserror::Error;

use super::parameters::{ModelParameter, ParameterError, RESERVED_PARAMETERS};

/// How a model consumes control inputs and shapes its output list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Upscaler,
    ControlNet,
    FluxControlNet,
}

impl ModelFamily {
    pub fn requires_control_image(&self) -> bool {
        matches!(self, Self::ControlNet | Self::FluxControlNet)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upscaler => "upscaler",
            Self::ControlNet => "control-net",
            Self::FluxControlNet => "flux-control-net",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiModel {
    pub name: String,
    pub provider: String,
    pub remote_id: String,
    pub description: String,
    pub family: ModelFamily,
    pub parameters: Vec<ModelParameter>,
}

impl AiModel {
    pub fn parameter(&self, name: &str) -> Option<&ModelParameter> {
        self.parameters.iter().find(|parameter| parameter.name == name)
    }

    /// Declared parameters a user may edit, in declaration order.
    pub fn editable_parameters(&self) -> impl Iterator<Item = &ModelParameter> {
        self.parameters
            .iter()
            .filter(|parameter| !parameter.is_reserved())
    }

    /// Looks up a parameter a user is allowed to set.
    pub fn editable(&self, name: &str) -> Result<&ModelParameter, ParameterError> {
        if RESERVED_PARAMETERS.contains(&name) {
            return Err(ParameterError::Reserved {
                name: name.to_string(),
            });
        }
        self.parameter(name).ok_or_else(|| ParameterError::Unknown {
            model: self.name.clone(),
            name: name.to_string(),
        })
    }

    pub fn declares(&self, name: &str) -> bool {
        self.parameter(name).is_some()
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        self.parameters.iter().try_for_each(ModelParameter::validate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("model '{0}' not found in registry")]
pub struct ModelNotFound(pub String);

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, AiModel>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, AiModel>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn find(&self, name: &str) -> Result<&AiModel, ModelNotFound> {
        self.models
            .get(name)
            .ok_or_else(|| ModelNotFound(name.to_string()))
    }

    pub fn list(&self) -> impl Iterator<Item = &AiModel> {
        self.models.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    /// First declared model; the initial selection.
    pub fn default_model(&self) -> Option<&AiModel> {
        self.models.values().next()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

pub const CLARITY_UPSCALER: &str = "Clarity Upscaler";
pub const CONTROL_NET: &str = "Control Net";
pub const FLUX_CONTROL_NET: &str = "Flux Control Net";

const SCHEDULERS: [&str; 30] = [
    "DPM++ 2M Karras",
    "DPM++ SDE Karras",
    "DPM++ 2M SDE Exponential",
    "DPM++ 2M SDE Karras",
    "Euler a",
    "Euler",
    "LMS",
    "Heun",
    "DPM2",
    "DPM2 a",
    "DPM++ 2S a",
    "DPM++ 2M",
    "DPM++ SDE",
    "DPM++ 2M SDE",
    "DPM++ 2M SDE Heun",
    "DPM++ 2M SDE Heun Karras",
    "DPM++ 2M SDE Heun Exponential",
    "DPM++ 3M SDE",
    "DPM++ 3M SDE Karras",
    "DPM++ 3M SDE Exponential",
    "DPM fast",
    "DPM adaptive",
    "LMS Karras",
    "DPM2 Karras",
    "DPM2 a Karras",
    "DPM++ 2S a Karras",
    "Restart",
    "DDIM",
    "PLMS",
    "UniPC",
];

const OUTPUT_FORMATS: [&str; 3] = ["webp", "jpg", "png"];

fn tile_sizes() -> Vec<String> {
    (16..=256).step_by(16).map(|size| size.to_string()).collect()
}

fn clarity_upscaler() -> AiModel {
    let tiles = tile_sizes();
    AiModel {
        name: CLARITY_UPSCALER.to_string(),
        provider: "Replicate".to_string(),
        remote_id: "philz1337x/clarity-upscaler:dfad41707589d68ecdccd1dfa600d55a208f9310748e44bfe35b4a6291453d5e".to_string(),
        description: "Upscale and enhance images using AI".to_string(),
        family: ModelFamily::Upscaler,
        parameters: vec![
            ModelParameter::int("seed", 0, "Seed for random number generator, 0 means random"),
            ModelParameter::text("prompt", "anime style", "Prompt for the image generation"),
            ModelParameter::text(
                "negative_prompt",
                "(worst quality, low quality, normal quality:2) JuggernautNegative-neg",
                "Negative prompt for the image generation",
            ),
            ModelParameter::int("num_inference_steps", 20, "Number of steps").with_bounds(1.0, 100.0),
            ModelParameter::choice(
                "scheduler",
                "DPM++ 3M SDE Karras",
                "Scheduler for the diffusion process",
                &SCHEDULERS,
            ),
            ModelParameter::float("scale_factor", 2.0, "Scale factor for upscaling").with_bounds(1.0, 4.0),
            ModelParameter::float("dynamic", 6.0, "HDR, try from 3 - 9").with_bounds(1.0, 50.0),
            ModelParameter::float("creativity", 0.35, "Creativity, try from 0.3 - 0.9").with_bounds(0.0, 1.0),
            ModelParameter::float("resemblance", 0.6, "Resemblance, try from 0.3 - 1.6").with_bounds(0.0, 3.0),
            ModelParameter::choice(
                "tiling_width",
                "112",
                "Fractality, set lower tile width for a high Fractality",
                &tiles,
            ),
            ModelParameter::choice(
                "tiling_height",
                "144",
                "Fractality, set lower tile height for a high Fractality",
                &tiles,
            ),
            ModelParameter::choice(
                "sd_model",
                "juggernaut_reborn.safetensors [338b85bc4f]",
                "Stable Diffusion model checkpoint",
                &[
                    "epicrealism_naturalSinRC1VAE.safetensors [84d76a0328]",
                    "juggernaut_reborn.safetensors [338b85bc4f]",
                    "flat2DAnimerge_v45Sharp.safetensors",
                ],
            ),
            ModelParameter::boolean("downscaling", false, "Downscale the image before upscaling"),
            ModelParameter::int("downscaling_resolution", 768, "Downscaling resolution").with_bounds(256.0, 2048.0),
            ModelParameter::text("lora_links", "", "Link to LoRA files, separated by commas"),
            ModelParameter::text("custom_sd_model", "", "Custom Stable Diffusion model link"),
            ModelParameter::float("sharpen", 0.0, "Sharpen the image after upscaling").with_bounds(0.0, 10.0),
            ModelParameter::choice(
                "handfix",
                "disabled",
                "Use clarity to fix hands in the image",
                &["disabled", "hands_only", "image_and_hands"],
            ),
            ModelParameter::boolean("pattern", false, "Upscale a pattern with seamless tiling"),
            ModelParameter::choice("output_format", "png", "Format of the output images", &OUTPUT_FORMATS),
        ],
    }
}

fn control_net_parameters() -> Vec<ModelParameter> {
    vec![
        ModelParameter::int("seed", 0, "Set a seed for reproducibility. Random by default."),
        ModelParameter::int("steps", 28, "Number of steps").with_bounds(1.0, 50.0),
        ModelParameter::text("prompt", "", "Prompt for image generation"),
        ModelParameter::choice(
            "control_type",
            "depth",
            "Type of control net",
            &["canny", "soft_edge", "depth"],
        ),
        ModelParameter::choice("output_format", "webp", "Format of the output images", &OUTPUT_FORMATS),
        ModelParameter::float("guidance_scale", 3.5, "Guidance scale").with_bounds(0.0, 5.0),
        ModelParameter::int(
            "output_quality",
            80,
            "Quality of the output images, from 0 to 100",
        )
        .with_bounds(0.0, 100.0),
        ModelParameter::text(
            "negative_prompt",
            "",
            "Things you do not want to see in your image",
        ),
        ModelParameter::float("control_strength", 0.5, "Strength of control net").with_bounds(0.0, 3.0),
        ModelParameter::choice(
            "depth_preprocessor",
            "DepthAnything",
            "Preprocessor to use with depth control net",
            &["Midas", "Zoe", "DepthAnything", "Zoe-DepthAnything"],
        ),
        ModelParameter::choice(
            "soft_edge_preprocessor",
            "HED",
            "Preprocessor to use with soft edge control net",
            &["HED", "TEED", "PiDiNet"],
        ),
        ModelParameter::float(
            "image_to_image_strength",
            0.0,
            "Strength of image to image control",
        )
        .with_bounds(0.0, 1.0),
    ]
}

fn default_models() -> IndexMap<String, AiModel> {
    let mut map = IndexMap::new();

    let mut insert = |model: AiModel| {
        map.insert(model.name.clone(), model);
    };

    insert(clarity_upscaler());
    insert(AiModel {
        name: CONTROL_NET.to_string(),
        provider: "Replicate".to_string(),
        remote_id: "jagilley/controlnet-canny:aff48af9c68d162388d230a2ab003f68d2638d88307bdaf1c2f1ac95079c9613".to_string(),
        description: "Generate images using Control Net with various control types".to_string(),
        family: ModelFamily::ControlNet,
        parameters: control_net_parameters(),
    });
    insert(AiModel {
        name: FLUX_CONTROL_NET.to_string(),
        provider: "Replicate".to_string(),
        remote_id: "xlabs-ai/flux-dev-controlnet:f2c31c31d81278a91b2447a304dae654c64a5d5a70340fba811bb1cbd41019a2".to_string(),
        description: "Generate images using Flux Control Net with various control types".to_string(),
        family: ModelFamily::FluxControlNet,
        parameters: control_net_parameters(),
    });

    map
}
