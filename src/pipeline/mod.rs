pub mod batch;
pub mod conversion;
pub mod embedding;
pub mod postprocess;
pub mod preprocess;

pub use conversion::{
    Conversion, ConversionParams, ConversionRequest, TargetVoice, convert, convert_cancellable,
    convert_file, convert_with_budget,
};
pub use embedding::{Embedding, ModelSnapshot, auto_train, embed};
pub use postprocess::apply_vocal_effects;
pub use preprocess::preprocess_target;
