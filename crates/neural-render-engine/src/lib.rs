pub mod binding;
pub mod capture;
pub mod error;
pub mod operation;
pub mod persist;
pub mod replicate;
pub mod resolve;

#[cfg(test)]
mod test_support;

pub use binding::{
    build_payload, build_upscale_payload, Attachment, ParameterSource, ParameterValues,
    PayloadImages, RequestPayload, UPSCALE_PARAMETERS,
};
pub use capture::{CaptureFile, FrameSource, ImageFileSource};
pub use error::{CleanupWarning, OperationError};
pub use operation::{InvocationMode, Operation, OperationConfig, OperationReport, Stage};
pub use persist::{output_path, persist, HttpFetcher, ResultFetcher};
pub use replicate::{InferenceClient, ReplicateClient, DEFAULT_API_BASE};
pub use resolve::{resolve, resolve_output, InferenceResult};
