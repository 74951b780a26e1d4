//! Feature extraction: transform descriptors, the plugin boundary, and
//! the transformer that drives a plugin over a dense input model.

mod plugin;
mod transformer;
mod types;

pub use plugin::{
    Feature, FeatureExtractionPlugin, FeatureSet, InputDomain, OutputDescriptor, PluginFactory,
    SampleType,
};
pub use transformer::{FeatureExtractionModelTransformer, Input, OutputModel};
pub use types::{Transform, WindowType};
