//! Method catalogue: parameter schemas and typed result views.

mod params;
mod registry;
pub mod types;

pub use params::{opt, req, FieldKind, FieldSpec};
pub use registry::{DecodeFn, EncodeFn, Encoder, MethodRegistry, MethodSpec};
pub use types::{
    ChangeGroupPoll, ComponentControls, ComponentDescriptor, ComponentProperty, ControlDescriptor,
    EngineStatus, MethodResult, StatusCode,
};
