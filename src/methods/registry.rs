//! Method registry mapping method names to encode/decode rules.
//!
//! Every catalogue entry knows how to turn a caller's parameter value into
//! the wire `params` (validating it first) and how to turn the response's
//! `result` into a [`MethodResult`].
//!
//! # Example
//!
//! ```
//! use qrc_client::methods::{MethodRegistry, MethodResult};
//! use serde_json::json;
//!
//! let registry = MethodRegistry::standard();
//! let spec = registry.get("Control.Set").unwrap();
//!
//! let params = spec.encode(&json!({"name": "gain1", "value": -6.0})).unwrap();
//! assert_eq!(params, Some(json!({"Name": "gain1", "Value": -6.0})));
//! assert_eq!(spec.decode(json!(true)).unwrap(), MethodResult::Ack);
//! ```

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::params::{
    check, encode_fields, invalid, opt, req, type_name, FieldKind::*, FieldSpec, Params,
};
use super::types::MethodResult;
use crate::error::{QrcError, Result};

/// Custom parameter encoder.
pub type EncodeFn = fn(&str, &Value) -> Result<Option<Value>>;

/// Result decoder.
pub type DecodeFn = fn(&str, Value) -> Result<MethodResult>;

/// How a method's parameters are encoded.
#[derive(Clone, Copy)]
pub enum Encoder {
    /// The method takes no parameters; `params` is omitted from the request.
    Nothing,
    /// An object described by a field table.
    Fields(&'static [FieldSpec]),
    Custom(EncodeFn),
}

/// Catalogue entry for one remote method.
#[derive(Clone, Copy)]
pub struct MethodSpec {
    pub name: &'static str,
    encoder: Encoder,
    decoder: DecodeFn,
}

impl MethodSpec {
    pub const fn new(name: &'static str, encoder: Encoder, decoder: DecodeFn) -> Self {
        Self {
            name,
            encoder,
            decoder,
        }
    }

    /// Validate caller parameters and build the wire `params`.
    pub fn encode(&self, params: &Value) -> Result<Option<Value>> {
        match self.encoder {
            Encoder::Nothing => match params {
                Value::Null => Ok(None),
                Value::Object(map) if map.is_empty() => Ok(None),
                Value::Array(items) if items.is_empty() => Ok(None),
                other => Err(invalid(
                    self.name,
                    format!("takes no parameters, got {}", type_name(other)),
                )),
            },
            Encoder::Fields(fields) => encode_fields(self.name, fields, params).map(Some),
            Encoder::Custom(encode) => encode(self.name, params),
        }
    }

    /// Map a response `result` to a typed view.
    pub fn decode(&self, result: Value) -> Result<MethodResult> {
        (self.decoder)(self.name, result)
    }
}

impl std::fmt::Debug for MethodSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodSpec").field("name", &self.name).finish()
    }
}

/// Registry mapping method names to their specs.
#[derive(Debug, Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<&'static str, MethodSpec>,
}

impl MethodRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the full QRC catalogue.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for spec in CATALOGUE {
            registry.insert(*spec);
        }
        registry
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, spec: MethodSpec) {
        self.methods.insert(spec.name, spec);
    }

    /// Look up a method by name.
    pub fn get(&self, name: &str) -> Result<&MethodSpec> {
        self.methods
            .get(name)
            .ok_or_else(|| QrcError::UnknownMethod(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.methods.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

// ============================================================================
// Catalogue
// ============================================================================

const LOGON: &[FieldSpec] = &[req("User", Name), req("Password", Text)];
const CONTROL_SET: &[FieldSpec] = &[
    req("Name", Name),
    req("Value", Scalar),
    opt("Ramp", NonNegative),
];
const NAME_ONLY: &[FieldSpec] = &[req("Name", Name)];
const SNAPSHOT_LOAD: &[FieldSpec] = &[
    req("Name", Name),
    req("Bank", Index),
    opt("Ramp", NonNegative),
];
const SNAPSHOT_SAVE: &[FieldSpec] = &[req("Name", Name), req("Bank", Index)];
const GROUP_ID: &[FieldSpec] = &[req("Id", Name)];
const GROUP_CONTROLS: &[FieldSpec] = &[req("Id", Name), req("Controls", NameList)];
const GROUP_AUTO_POLL: &[FieldSpec] = &[req("Id", Name), req("Rate", Positive)];

const MIXER_CROSSPOINT_LEVEL: &[FieldSpec] = &[
    req("Name", Name),
    req("Inputs", Name),
    req("Outputs", Name),
    req("Value", Number),
    opt("Ramp", NonNegative),
];
const MIXER_CROSSPOINT_SWITCH: &[FieldSpec] = &[
    req("Name", Name),
    req("Inputs", Name),
    req("Outputs", Name),
    req("Value", Level),
];
const MIXER_INPUT_LEVEL: &[FieldSpec] = &[
    req("Name", Name),
    req("Inputs", Name),
    req("Value", Number),
    opt("Ramp", NonNegative),
];
const MIXER_INPUT_SWITCH: &[FieldSpec] = &[
    req("Name", Name),
    req("Inputs", Name),
    req("Value", Level),
];
const MIXER_OUTPUT_LEVEL: &[FieldSpec] = &[
    req("Name", Name),
    req("Outputs", Name),
    req("Value", Number),
    opt("Ramp", NonNegative),
];
const MIXER_OUTPUT_SWITCH: &[FieldSpec] = &[
    req("Name", Name),
    req("Outputs", Name),
    req("Value", Level),
];
const MIXER_CUE_LEVEL: &[FieldSpec] = &[
    req("Name", Name),
    req("Cues", Name),
    req("Value", Number),
    opt("Ramp", NonNegative),
];
const MIXER_CUE_SWITCH: &[FieldSpec] = &[req("Name", Name), req("Cues", Name), req("Value", Level)];
const MIXER_INPUT_CUE_SWITCH: &[FieldSpec] = &[
    req("Name", Name),
    req("Cues", Name),
    req("Inputs", Name),
    req("Value", Level),
];

const LOOP_PLAYER_START: &[FieldSpec] = &[
    req("Name", Name),
    req("Files", Any),
    opt("StartTime", NonNegative),
    opt("Loop", Bool),
    opt("Log", Bool),
    opt("Seek", NonNegative),
];
const LOOP_PLAYER_STOP: &[FieldSpec] = &[req("Name", Name), req("Outputs", Any), opt("Log", Bool)];

const CATALOGUE: &[MethodSpec] = &[
    // Session
    MethodSpec::new("Logon", Encoder::Fields(LOGON), decode_logon),
    MethodSpec::new("NoOp", Encoder::Custom(encode_no_op), decode_ack),
    MethodSpec::new("StatusGet", Encoder::Nothing, decode_status),
    // Named controls
    MethodSpec::new("Control.Get", Encoder::Custom(encode_control_get), decode_controls),
    MethodSpec::new("Control.Set", Encoder::Fields(CONTROL_SET), decode_ack),
    // Components
    MethodSpec::new("Component.Get", Encoder::Custom(encode_component_get), decode_component),
    MethodSpec::new("Component.GetControls", Encoder::Fields(NAME_ONLY), decode_component),
    MethodSpec::new("Component.GetComponents", Encoder::Nothing, decode_components),
    MethodSpec::new(
        "Component.Set",
        Encoder::Custom(encode_component_set),
        decode_component_set,
    ),
    // Snapshots
    MethodSpec::new("Snapshot.Load", Encoder::Fields(SNAPSHOT_LOAD), decode_ack),
    MethodSpec::new("Snapshot.Save", Encoder::Fields(SNAPSHOT_SAVE), decode_ack),
    // Change groups
    MethodSpec::new("ChangeGroup.AddControl", Encoder::Fields(GROUP_CONTROLS), decode_ack),
    MethodSpec::new(
        "ChangeGroup.AddComponentControl",
        Encoder::Custom(encode_group_component_control),
        decode_ack,
    ),
    MethodSpec::new("ChangeGroup.Remove", Encoder::Fields(GROUP_CONTROLS), decode_ack),
    MethodSpec::new("ChangeGroup.Poll", Encoder::Fields(GROUP_ID), decode_poll),
    MethodSpec::new("ChangeGroup.Destroy", Encoder::Fields(GROUP_ID), decode_ack),
    MethodSpec::new("ChangeGroup.Invalidate", Encoder::Fields(GROUP_ID), decode_ack),
    MethodSpec::new("ChangeGroup.Clear", Encoder::Fields(GROUP_ID), decode_ack),
    MethodSpec::new("ChangeGroup.AutoPoll", Encoder::Fields(GROUP_AUTO_POLL), decode_ack),
    // Mixers
    MethodSpec::new("Mixer.SetCrossPointGain", Encoder::Fields(MIXER_CROSSPOINT_LEVEL), decode_ack),
    MethodSpec::new(
        "Mixer.SetCrossPointDelay",
        Encoder::Fields(MIXER_CROSSPOINT_LEVEL),
        decode_ack,
    ),
    MethodSpec::new(
        "Mixer.SetCrossPointMute",
        Encoder::Fields(MIXER_CROSSPOINT_SWITCH),
        decode_ack,
    ),
    MethodSpec::new(
        "Mixer.SetCrossPointSolo",
        Encoder::Fields(MIXER_CROSSPOINT_SWITCH),
        decode_ack,
    ),
    MethodSpec::new("Mixer.SetInputGain", Encoder::Fields(MIXER_INPUT_LEVEL), decode_ack),
    MethodSpec::new("Mixer.SetInputMute", Encoder::Fields(MIXER_INPUT_SWITCH), decode_ack),
    MethodSpec::new("Mixer.SetInputSolo", Encoder::Fields(MIXER_INPUT_SWITCH), decode_ack),
    MethodSpec::new("Mixer.SetOutputGain", Encoder::Fields(MIXER_OUTPUT_LEVEL), decode_ack),
    MethodSpec::new("Mixer.SetOutputMute", Encoder::Fields(MIXER_OUTPUT_SWITCH), decode_ack),
    MethodSpec::new("Mixer.SetCueMute", Encoder::Fields(MIXER_CUE_SWITCH), decode_ack),
    MethodSpec::new("Mixer.SetCueGain", Encoder::Fields(MIXER_CUE_LEVEL), decode_ack),
    MethodSpec::new("Mixer.SetInputCueEnable", Encoder::Fields(MIXER_INPUT_CUE_SWITCH), decode_ack),
    MethodSpec::new("Mixer.SetInputCueAfl", Encoder::Fields(MIXER_INPUT_CUE_SWITCH), decode_ack),
    // Loop players
    MethodSpec::new("LoopPlayer.Start", Encoder::Fields(LOOP_PLAYER_START), decode_ack),
    MethodSpec::new("LoopPlayer.Stop", Encoder::Fields(LOOP_PLAYER_STOP), decode_ack),
    MethodSpec::new("LoopPlayer.Cancel", Encoder::Fields(LOOP_PLAYER_STOP), decode_ack),
];

// ============================================================================
// Encoders
// ============================================================================

fn encode_no_op(method: &str, params: &Value) -> Result<Option<Value>> {
    match params {
        Value::Null => Ok(Some(json!({}))),
        Value::Object(map) if map.is_empty() => Ok(Some(json!({}))),
        other => Err(invalid(
            method,
            format!("takes no parameters, got {}", type_name(other)),
        )),
    }
}

/// A single name, a list of names, or `{"Names": [...]}`; always sent as a list.
fn encode_control_get(method: &str, params: &Value) -> Result<Option<Value>> {
    let names = match params {
        Value::String(_) => Value::Array(vec![params.clone()]),
        Value::Array(_) => params.clone(),
        Value::Object(_) => {
            let view = Params::new(method, params)?;
            view.only(&["Names"])?;
            view.field("Names", NameList)?
        }
        other => {
            return Err(invalid(
                method,
                format!("expected a name or a list of names, got {}", type_name(other)),
            ))
        }
    };
    check(method, "Names", NameList, &names)?;
    Ok(Some(names))
}

/// Control entries given as names or `{"Name": ..}` objects.
fn control_names(method: &str, items: &[Value]) -> Result<Vec<Value>> {
    items
        .iter()
        .map(|item| match item {
            Value::String(_) => {
                check(method, "Controls", Name, item)?;
                Ok(json!({ "Name": item }))
            }
            Value::Object(_) => {
                let view = Params::new(method, item)?;
                view.only(&["Name"])?;
                Ok(json!({ "Name": view.field("Name", Name)? }))
            }
            other => Err(invalid(
                method,
                format!("control entries must be names or objects, got {}", type_name(other)),
            )),
        })
        .collect()
}

fn encode_component_get(method: &str, params: &Value) -> Result<Option<Value>> {
    let view = Params::new(method, params)?;
    view.only(&["Name", "Controls"])?;
    let name = view.field("Name", Name)?;
    let controls = control_names(method, view.array("Controls")?)?;
    Ok(Some(json!({ "Name": name, "Controls": controls })))
}

fn encode_component_set(method: &str, params: &Value) -> Result<Option<Value>> {
    const CONTROL: &[FieldSpec] = &[
        req("Name", Name),
        req("Value", Scalar),
        opt("Ramp", NonNegative),
    ];

    let view = Params::new(method, params)?;
    view.only(&["Name", "Controls"])?;
    let name = view.field("Name", Name)?;
    let controls = view
        .array("Controls")?
        .iter()
        .map(|c| encode_fields(method, CONTROL, c))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(json!({ "Name": name, "Controls": controls })))
}

fn encode_group_component_control(method: &str, params: &Value) -> Result<Option<Value>> {
    let view = Params::new(method, params)?;
    view.only(&["Id", "Component"])?;
    let id = view.field("Id", Name)?;
    let component = view
        .get("Component")
        .ok_or_else(|| invalid(method, "missing Component"))?;
    let component = Params::new(method, component)?;
    component.only(&["Name", "Controls"])?;
    let name = component.field("Name", Name)?;
    let controls = control_names(method, component.array("Controls")?)?;
    Ok(Some(json!({
        "Id": id,
        "Component": { "Name": name, "Controls": controls }
    })))
}

// ============================================================================
// Decoders
// ============================================================================

fn shape<T: DeserializeOwned>(method: &str, result: Value) -> Result<T> {
    serde_json::from_value(result).map_err(|e| QrcError::UnexpectedResultShape {
        method: method.to_string(),
        detail: e.to_string(),
    })
}

fn decode_ack(method: &str, result: Value) -> Result<MethodResult> {
    match result {
        Value::Bool(_) | Value::Null | Value::Object(_) | Value::Array(_) => Ok(MethodResult::Ack),
        other => Err(QrcError::UnexpectedResultShape {
            method: method.to_string(),
            detail: format!("expected an acknowledgement, got {}", type_name(&other)),
        }),
    }
}

fn decode_logon(method: &str, result: Value) -> Result<MethodResult> {
    match result {
        Value::Bool(false) => Err(QrcError::AuthenticationFailed(
            "core rejected the credentials".into(),
        )),
        other => decode_ack(method, other),
    }
}

fn decode_status(method: &str, result: Value) -> Result<MethodResult> {
    shape(method, result).map(MethodResult::Status)
}

fn decode_controls(method: &str, result: Value) -> Result<MethodResult> {
    shape(method, result).map(MethodResult::Controls)
}

fn decode_component(method: &str, result: Value) -> Result<MethodResult> {
    shape(method, result).map(MethodResult::Component)
}

fn decode_components(method: &str, result: Value) -> Result<MethodResult> {
    shape(method, result).map(MethodResult::Components)
}

fn decode_poll(method: &str, result: Value) -> Result<MethodResult> {
    shape(method, result).map(MethodResult::ChangeGroup)
}

/// A list result names the controls the core skipped; a bare ack means none.
fn decode_component_set(method: &str, result: Value) -> Result<MethodResult> {
    let items = match result {
        Value::Array(items) => items,
        other => {
            decode_ack(method, other)?;
            return Ok(MethodResult::UnknownControls(Vec::new()));
        }
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(name) => Ok(name),
            Value::Object(mut control) => match control.remove("Name") {
                Some(Value::String(name)) => Ok(name),
                _ => Err(QrcError::UnexpectedResultShape {
                    method: method.to_string(),
                    detail: "unknown control entry has no Name".into(),
                }),
            },
            other => Err(QrcError::UnexpectedResultShape {
                method: method.to_string(),
                detail: format!("unknown control entry is {}", type_name(&other)),
            }),
        })
        .collect::<Result<Vec<_>>>()
        .map(MethodResult::UnknownControls)
}
