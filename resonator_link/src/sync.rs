use crate::codec::{DataFrame, Decoded, ModelSyncProtocol};
use crate::model::{control_to_device, ModelStore, Resonator};
use crate::plot::PlotBounds;
use crate::transport::LinkEvent;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use resonator_protocol::{DataMsg, DeviceCommand, ModelDiff, WireResonator};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const RAW_CAP: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    AwaitingFullModel,
    Syncing,
}

/// Drives the data channel: pulls the full model when the link opens,
/// applies whatever the device sends (the remote is authoritative on
/// receipt), and pushes local edits as a single-resonator update or a
/// batch diff.
pub struct SyncController {
    event_rx: Receiver<LinkEvent>,
    frame_tx: Sender<String>,
    connected: Arc<AtomicBool>,
    protocol: Box<dyn ModelSyncProtocol>,
    store: ModelStore,
    state: SyncState,
    raw_tx: Option<Sender<String>>,
}

impl SyncController {
    pub fn new(
        event_rx: Receiver<LinkEvent>,
        frame_tx: Sender<String>,
        connected: Arc<AtomicBool>,
        protocol: Box<dyn ModelSyncProtocol>,
        plot: PlotBounds,
    ) -> Self {
        Self {
            event_rx,
            frame_tx,
            connected,
            protocol,
            store: ModelStore::new(plot),
            state: SyncState::Idle,
            raw_tx: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ModelStore {
        &mut self.store
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Frames that failed to decode land here unmodified.
    pub fn raw_frames(&mut self) -> Receiver<String> {
        let (tx, rx) = bounded(RAW_CAP);
        self.raw_tx = Some(tx);
        rx
    }

    /// Drains pending link events. Call from the event loop.
    pub fn tick(&mut self) {
        loop {
            match self.event_rx.try_recv() {
                Ok(LinkEvent::Open) => {
                    // The legacy generation gates traffic on its own
                    // handshake frame; otherwise pull the model right away.
                    if !self.protocol.data_handshake_required() {
                        self.request_model();
                    }
                }
                Ok(LinkEvent::Closed { .. }) => {
                    if self.state == SyncState::AwaitingFullModel {
                        self.state = SyncState::Idle;
                    }
                }
                Ok(LinkEvent::Frame(text)) => self.handle_frame(&text),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Pushes everything marked dirty since the last successful push.
    /// Exactly one dirty entry goes out as `setResonator`; two or more go
    /// out as one `setModelDiff`. While the transport is down the dirty
    /// flags stay put so the next commit retries them.
    pub fn commit_edits(&mut self) {
        if self.store.dirty_len() == 0 || !self.is_connected() {
            return;
        }

        self.state = SyncState::Syncing;
        let diff = self.store.drain_diff();

        // Mirror the derived values back into the bank so model and shapes
        // agree after the push.
        for res in &diff {
            self.store.set_resonator(*res);
        }

        let sent = if diff.len() == 1 {
            let res = diff[0];
            tracing::debug!(index = res.index, "pushing single resonator");
            self.send(&DeviceCommand::SetResonator(WireResonator {
                index: res.index,
                freq: res.freq,
                gain: res.gain,
                decay: control_to_device(res.decay),
            }))
        } else {
            tracing::debug!(entries = diff.len(), "pushing model diff");
            self.send(&DeviceCommand::SetModelDiff(ModelDiff {
                res: diff
                    .iter()
                    .map(|res| WireResonator {
                        index: res.index,
                        freq: res.freq,
                        gain: res.gain,
                        decay: res.decay,
                    })
                    .collect(),
            }))
        };

        if !sent {
            self.store.restore_dirty(diff.iter().map(|res| res.index));
        }
        self.state = SyncState::Idle;
    }

    pub fn request_model(&mut self) {
        if self.send(&DeviceCommand::GetModel) {
            self.state = SyncState::AwaitingFullModel;
        }
    }

    pub fn request_resonator(&mut self, index: usize) {
        self.send(&DeviceCommand::GetResonator(index));
    }

    /// Pushes the whole local bank as a full snapshot (device-domain
    /// decay, parallel arrays).
    pub fn push_model(&mut self) {
        let mut index = Vec::with_capacity(self.store.len());
        let mut freq = Vec::with_capacity(self.store.len());
        let mut gain = Vec::with_capacity(self.store.len());
        let mut decay = Vec::with_capacity(self.store.len());
        for res in self.store.resonators() {
            index.push(res.index);
            freq.push(res.freq);
            gain.push(res.gain);
            decay.push(control_to_device(res.decay));
        }
        self.send(&DeviceCommand::SetModel {
            index,
            freq,
            gain,
            decay,
        });
    }

    pub fn send_command(&mut self, cmd: &DeviceCommand) -> bool {
        self.send(cmd)
    }

    fn handle_frame(&mut self, text: &str) {
        match self.protocol.decode_data(text) {
            Decoded::Msg(DataFrame::Handshake) => {
                if let Some(reply) = self.protocol.handshake_reply() {
                    self.send_frame(reply.to_string());
                }
                self.request_model();
            }
            Decoded::Msg(DataFrame::Msg(msg)) => self.apply(msg),
            Decoded::Raw(frame) => {
                if let Some(tx) = &self.raw_tx {
                    let _ = tx.try_send(frame);
                }
            }
        }
    }

    fn apply(&mut self, msg: DataMsg) {
        match msg {
            DataMsg::SetModel {
                index,
                freq,
                gain,
                decay,
            } => {
                tracing::debug!(entries = index.len(), "full model received");
                self.store.apply_snapshot(&index, &freq, &gain, &decay);
                if self.state == SyncState::AwaitingFullModel {
                    self.state = SyncState::Idle;
                }
            }
            DataMsg::SetModelDiff { res } => self.store.apply_diff(&res),
            DataMsg::SetResonator {
                index,
                freq,
                gain,
                decay,
            } => self.store.set_resonator(Resonator {
                index,
                freq,
                gain,
                decay,
            }),
        }
    }

    fn send(&mut self, cmd: &DeviceCommand) -> bool {
        match self.protocol.encode_command(cmd) {
            Ok(frame) => self.send_frame(frame),
            Err(e) => {
                tracing::warn!(command = cmd.name(), error = %e, "encode failed");
                false
            }
        }
    }

    fn send_frame(&mut self, frame: String) -> bool {
        if !self.is_connected() {
            // Dropped by design: control-rate traffic, latest value wins.
            return false;
        }
        self.frame_tx.try_send(frame).is_ok()
    }
}
