use serde::{Deserialize, Serialize};

/// One resonator as it travels on the wire. Which decay domain the value is
/// in depends on the message that carries it: full snapshots move the
/// device-domain coefficient, per-resonator and diff payloads move the
/// control-domain value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct WireResonator {
    pub index: usize,
    pub freq: f64,
    pub gain: f64,
    pub decay: f64,
}

/// Control-channel frames, tagged by the `event` field. Frames whose event
/// is not listed here are the open-ended custom kind and are classified by
/// the codec, not by serde.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ControlMsg {
    Connection {
        #[serde(rename = "projectName", default, skip_serializing_if = "Option::is_none")]
        project_name: Option<String>,
    },
    ConnectionReply,
    SetSlider {
        slider: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<f64>,
    },
    SetSelect {
        select: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<Vec<String>>,
        value: f64,
    },
}

/// Data-channel frames sent by the device, tagged by the `data` field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "data", rename_all = "camelCase")]
pub enum DataMsg {
    /// Full model as parallel arrays of equal length. Decay values are in
    /// the device domain.
    SetModel {
        index: Vec<usize>,
        freq: Vec<f64>,
        gain: Vec<f64>,
        decay: Vec<f64>,
    },
    /// Sparse update: `null` slots are skipped on apply.
    SetModelDiff { res: Vec<Option<WireResonator>> },
    SetResonator {
        index: usize,
        freq: f64,
        gain: f64,
        decay: f64,
    },
}

/// Diff payload pushed to the device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ModelDiff {
    pub res: Vec<WireResonator>,
}

/// Commands sent to the device inside the `{command, args}` envelope.
/// Variants without arguments serialize to a bare `{"command": ...}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "command", content = "args", rename_all = "camelCase")]
pub enum DeviceCommand {
    GetModel,
    SetModel {
        index: Vec<usize>,
        freq: Vec<f64>,
        gain: Vec<f64>,
        decay: Vec<f64>,
    },
    GetModelDiff,
    SetModelDiff(ModelDiff),
    GetResonator(usize),
    SetResonator(WireResonator),
    UpdateModel {
        index: usize,
        model: serde_json::Value,
    },
    UpdatePitch {
        index: usize,
        pitch: String,
    },
    #[serde(rename_all = "camelCase")]
    SetResAtBankIndex {
        bank_index: usize,
        res_index: usize,
        freq: f64,
        gain: f64,
        decay: f64,
    },
    #[serde(rename_all = "camelCase")]
    SetResParamAtBankIndex {
        bank_index: usize,
        res_index: usize,
        param_index: usize,
        value: f64,
    },
    /// Acknowledgment of the legacy bare-text handshake.
    HandshakeReply,
}

impl DeviceCommand {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::GetModel => "getModel",
            DeviceCommand::SetModel { .. } => "setModel",
            DeviceCommand::GetModelDiff => "getModelDiff",
            DeviceCommand::SetModelDiff(_) => "setModelDiff",
            DeviceCommand::GetResonator(_) => "getResonator",
            DeviceCommand::SetResonator(_) => "setResonator",
            DeviceCommand::UpdateModel { .. } => "updateModel",
            DeviceCommand::UpdatePitch { .. } => "updatePitch",
            DeviceCommand::SetResAtBankIndex { .. } => "setResAtBankIndex",
            DeviceCommand::SetResParamAtBankIndex { .. } => "setResParamAtBankIndex",
            DeviceCommand::HandshakeReply => "handshakeReply",
        }
    }
}
