//! Browser-style control surface for the resonator synthesis engine,
//! rebuilt as a native client: two persistent websocket channels to the
//! device (control and data), a diff-based model synchronization layer,
//! and the plot-space mappings the editing layer drags against.

pub mod codec;
pub mod control;
pub mod model;
pub mod plot;
pub mod sync;
pub mod transport;

use crate::codec::{EventProtocol, HandshakeProtocol, ModelSyncProtocol};
use crate::control::ControlSurface;
use crate::plot::PlotBounds;
use crate::sync::SyncController;
use crate::transport::{
    Endpoint, SocketThread, CONTROL_PATH, DATA_PATH, DEFAULT_HOST, DEFAULT_PORT, RECONNECT_DELAY,
};
use crossbeam_channel::bounded;
use resonator_protocol::DeviceCommand;
use std::time::Duration;

pub const EVENT_CAP: usize = 256;
pub const FRAME_CAP: usize = 256;

/// Which wire generation the device speaks. New firmware offers the
/// `connection` event; old firmware opens with a bare `"handshake"` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolGeneration {
    Event,
    LegacyHandshake,
}

impl ProtocolGeneration {
    fn protocol(self) -> Box<dyn ModelSyncProtocol> {
        match self {
            ProtocolGeneration::Event => Box::new(EventProtocol),
            ProtocolGeneration::LegacyHandshake => Box::new(HandshakeProtocol),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    pub control_path: String,
    pub data_path: String,
    pub reconnect_delay: Duration,
    pub plot: PlotBounds,
    pub generation: ProtocolGeneration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            control_path: CONTROL_PATH.to_string(),
            data_path: DATA_PATH.to_string(),
            reconnect_delay: RECONNECT_DELAY,
            plot: PlotBounds::default(),
            generation: ProtocolGeneration::Event,
        }
    }
}

impl LinkConfig {
    pub fn for_host(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Self::default()
        }
    }
}

/// One device, two channels. Owns both socket threads plus the control
/// surface and the sync controller; everything is ticked from the caller's
/// event loop and torn down (with reconnects suppressed) on drop.
pub struct DeviceLink {
    control_socket: SocketThread,
    data_socket: SocketThread,
    control: ControlSurface,
    sync: SyncController,
}

impl DeviceLink {
    pub fn connect(config: LinkConfig) -> Self {
        let control_endpoint = Endpoint::new(&config.host, config.port, &config.control_path);
        let data_endpoint = Endpoint::new(&config.host, config.port, &config.data_path);

        let (control_event_tx, control_event_rx) = bounded(EVENT_CAP);
        let (control_frame_tx, control_frame_rx) = bounded(FRAME_CAP);
        let control_socket = SocketThread::spawn_with_delay(
            control_endpoint,
            control_event_tx,
            control_frame_rx,
            config.reconnect_delay,
        );
        let control = ControlSurface::new(
            control_event_rx,
            control_frame_tx,
            control_socket.connection_flag(),
            config.generation.protocol(),
        );

        let (data_event_tx, data_event_rx) = bounded(EVENT_CAP);
        let (data_frame_tx, data_frame_rx) = bounded(FRAME_CAP);
        let data_socket = SocketThread::spawn_with_delay(
            data_endpoint,
            data_event_tx,
            data_frame_rx,
            config.reconnect_delay,
        );
        let sync = SyncController::new(
            data_event_rx,
            data_frame_tx,
            data_socket.connection_flag(),
            config.generation.protocol(),
            config.plot,
        );

        Self {
            control_socket,
            data_socket,
            control,
            sync,
        }
    }

    pub fn control(&self) -> &ControlSurface {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut ControlSurface {
        &mut self.control
    }

    pub fn sync(&self) -> &SyncController {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut SyncController {
        &mut self.sync
    }

    /// Both channels up.
    pub fn is_connected(&self) -> bool {
        self.control_socket.is_connected() && self.data_socket.is_connected()
    }

    /// Drains pending events on both channels. Call once per event-loop
    /// pass.
    pub fn tick(&mut self) {
        self.control.tick();
        self.sync.tick();
    }

    /// Pushes pending local edits (drag released / value committed).
    pub fn commit_edits(&mut self) {
        self.sync.commit_edits();
    }

    pub fn update_model(&mut self, index: usize, model: serde_json::Value) -> bool {
        self.sync
            .send_command(&DeviceCommand::UpdateModel { index, model })
    }

    pub fn update_pitch(&mut self, index: usize, pitch: &str) -> bool {
        self.sync.send_command(&DeviceCommand::UpdatePitch {
            index,
            pitch: pitch.to_string(),
        })
    }

    pub fn set_res_at_bank_index(
        &mut self,
        bank_index: usize,
        res_index: usize,
        freq: f64,
        gain: f64,
        decay: f64,
    ) -> bool {
        self.sync.send_command(&DeviceCommand::SetResAtBankIndex {
            bank_index,
            res_index,
            freq,
            gain,
            decay,
        })
    }

    pub fn set_res_param_at_bank_index(
        &mut self,
        bank_index: usize,
        res_index: usize,
        param_index: usize,
        value: f64,
    ) -> bool {
        self.sync
            .send_command(&DeviceCommand::SetResParamAtBankIndex {
                bank_index,
                res_index,
                param_index,
                value,
            })
    }

    /// Clean shutdown of both sockets; pending reconnects are suppressed.
    pub fn shutdown(&self) {
        self.control_socket.shutdown();
        self.data_socket.shutdown();
    }
}
