//! Typed views over `result` payloads.
//!
//! These are parsed per call and never cached. Field names on the wire are
//! PascalCase.

use serde::Deserialize;
use serde_json::Value;

/// One control as reported by `Control.Get`, `Component.GetControls` or a
/// change-group poll.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ControlDescriptor {
    pub name: String,
    /// Number, string or boolean depending on the control type.
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub string: Option<String>,
    /// Normalized position in `0.0..=1.0`.
    #[serde(default)]
    pub position: Option<f64>,
    #[serde(default)]
    pub value_min: Option<f64>,
    #[serde(default)]
    pub value_max: Option<f64>,
    #[serde(default)]
    pub string_min: Option<String>,
    #[serde(default)]
    pub string_max: Option<String>,
    #[serde(default, rename = "Type")]
    pub control_type: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    /// Owning component, present in change-group polls.
    #[serde(default)]
    pub component: Option<String>,
}

impl ControlDescriptor {
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|v| v != 0.0),
            _ => None,
        }
    }
}

/// Controls of one named component.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ComponentControls {
    pub name: String,
    pub controls: Vec<ControlDescriptor>,
}

impl ComponentControls {
    /// Look up a control by name.
    pub fn control(&self, name: &str) -> Option<&ControlDescriptor> {
        self.controls.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ComponentProperty {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// A named component in the running design.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ComponentDescriptor {
    pub name: String,
    #[serde(rename = "Type")]
    pub component_type: String,
    #[serde(default)]
    pub properties: Vec<ComponentProperty>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusCode {
    pub code: i64,
    pub string: String,
}

/// Result of `StatusGet`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EngineStatus {
    /// Engine state such as `Active`, `Standby`, `Idle`.
    pub state: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub design_name: Option<String>,
    #[serde(default)]
    pub design_code: Option<String>,
    #[serde(default)]
    pub is_redundant: Option<bool>,
    #[serde(default)]
    pub is_emulator: Option<bool>,
    #[serde(default)]
    pub status: Option<StatusCode>,
}

/// Result of `ChangeGroup.Poll`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeGroupPoll {
    pub id: String,
    #[serde(default)]
    pub changes: Vec<ControlDescriptor>,
}

/// Decoded result of any catalogue method.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResult {
    /// The call succeeded and carries nothing further of interest.
    Ack,
    Status(EngineStatus),
    Controls(Vec<ControlDescriptor>),
    Component(ComponentControls),
    Components(Vec<ComponentDescriptor>),
    ChangeGroup(ChangeGroupPoll),
    /// Control names the core did not recognise (`Component.Set`).
    UnknownControls(Vec<String>),
}

impl MethodResult {
    pub fn is_ack(&self) -> bool {
        matches!(self, MethodResult::Ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_control_descriptor_from_wire() {
        let control: ControlDescriptor = serde_json::from_value(json!({
            "Name": "gain1",
            "Value": -6.0,
            "String": "-6.00dB",
            "Position": 0.7,
            "ValueMin": -100.0,
            "ValueMax": 20.0,
            "Type": "Float"
        }))
        .unwrap();

        assert_eq!(control.name, "gain1");
        assert_eq!(control.as_f64(), Some(-6.0));
        assert_eq!(control.string.as_deref(), Some("-6.00dB"));
        assert_eq!(control.value_max, Some(20.0));
        assert_eq!(control.control_type.as_deref(), Some("Float"));
        assert!(control.component.is_none());
    }

    #[test]
    fn test_control_bool_view() {
        let mute: ControlDescriptor =
            serde_json::from_value(json!({"Name": "mute", "Value": 1.0})).unwrap();
        assert_eq!(mute.as_bool(), Some(true));
    }

    #[test]
    fn test_status_requires_state() {
        let ok: EngineStatus = serde_json::from_value(json!({
            "Platform": "Core 510i",
            "State": "Active",
            "DesignName": "Main",
            "IsEmulator": false,
            "Status": {"Code": 0, "String": "OK"}
        }))
        .unwrap();
        assert_eq!(ok.state, "Active");
        assert_eq!(ok.status.unwrap().code, 0);

        assert!(serde_json::from_value::<EngineStatus>(json!({"Platform": "x"})).is_err());
    }

    #[test]
    fn test_component_lookup() {
        let component: ComponentControls = serde_json::from_value(json!({
            "Name": "Mixer1",
            "Controls": [{"Name": "gain", "Value": 0.0}, {"Name": "mute", "Value": false}]
        }))
        .unwrap();

        assert!(component.control("mute").is_some());
        assert!(component.control("solo").is_none());
    }
}
