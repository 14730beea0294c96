use crate::codec::{ControlFrame, Decoded, ModelSyncProtocol};
use crate::transport::LinkEvent;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use resonator_protocol::ControlMsg;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Slider {
    pub id: u32,
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub value: f64,
    pub step: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub id: u32,
    pub name: String,
    pub options: Vec<String>,
    pub value: f64,
}

/// Typed notifications fanned out to every subscriber, in place of the
/// original's DOM-event dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlNotice {
    Connected { project_name: Option<String> },
    SliderChanged { id: u32 },
    SelectChanged { id: u32 },
    Custom(serde_json::Value),
}

/// Client side of the control channel: answers the connection offer,
/// tracks the project name, and mirrors the device's sliders and selects.
/// Widgets are created on first mention and updated in place after that.
pub struct ControlSurface {
    event_rx: Receiver<LinkEvent>,
    frame_tx: Sender<String>,
    connected: Arc<AtomicBool>,
    protocol: Box<dyn ModelSyncProtocol>,
    handshaken: bool,
    project_name: Option<String>,
    sliders: Vec<Slider>,
    selects: Vec<Select>,
    listeners: Vec<Sender<ControlNotice>>,
}

impl ControlSurface {
    pub fn new(
        event_rx: Receiver<LinkEvent>,
        frame_tx: Sender<String>,
        connected: Arc<AtomicBool>,
        protocol: Box<dyn ModelSyncProtocol>,
    ) -> Self {
        Self {
            event_rx,
            frame_tx,
            connected,
            protocol,
            handshaken: false,
            project_name: None,
            sliders: Vec::new(),
            selects: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Whether the session handshake has completed on the current
    /// connection. Resets whenever the socket leaves the open state.
    pub fn handshaken(&self) -> bool {
        self.handshaken
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project_name.as_deref()
    }

    pub fn sliders(&self) -> &[Slider] {
        &self.sliders
    }

    pub fn selects(&self) -> &[Select] {
        &self.selects
    }

    pub fn slider(&self, id: u32) -> Option<&Slider> {
        self.sliders.iter().find(|s| s.id == id)
    }

    pub fn select(&self, id: u32) -> Option<&Select> {
        self.selects.iter().find(|s| s.id == id)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Registers a listener. Every notice is delivered to every receiver
    /// still alive; dropped receivers are pruned.
    pub fn subscribe(&mut self) -> Receiver<ControlNotice> {
        let (tx, rx) = unbounded();
        self.listeners.push(tx);
        rx
    }

    pub fn tick(&mut self) {
        loop {
            match self.event_rx.try_recv() {
                Ok(LinkEvent::Open) => {
                    // Nothing to do until the device sends its offer.
                }
                Ok(LinkEvent::Closed { .. }) => {
                    self.handshaken = false;
                }
                Ok(LinkEvent::Frame(text)) => self.handle_frame(&text),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        match self.protocol.decode_control(text) {
            Decoded::Msg(ControlFrame::Msg(msg)) => self.apply(msg),
            Decoded::Msg(ControlFrame::Custom(value)) => {
                self.notify(ControlNotice::Custom(value));
            }
            Decoded::Raw(frame) => {
                tracing::debug!(len = frame.len(), "unparsed control frame");
            }
        }
    }

    fn apply(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::Connection { project_name } => {
                if let Some(name) = project_name {
                    tracing::info!(project = %name, "connection offer");
                    self.project_name = Some(name);
                }
                self.handshaken = true;
                self.send_frame(self.protocol.connection_reply().to_string());
                self.notify(ControlNotice::Connected {
                    project_name: self.project_name.clone(),
                });
            }
            ControlMsg::ConnectionReply => {
                // Peer-side acknowledgment; nothing to track here.
            }
            ControlMsg::SetSlider {
                slider,
                name,
                min,
                max,
                value,
                step,
            } => {
                if let Some(existing) = self.sliders.iter_mut().find(|s| s.id == slider) {
                    existing.value = value;
                } else {
                    self.sliders.push(Slider {
                        id: slider,
                        name: name.unwrap_or_default(),
                        min: min.unwrap_or(0.0),
                        max: max.unwrap_or(1.0),
                        value,
                        step: step.unwrap_or(0.0),
                    });
                }
                self.notify(ControlNotice::SliderChanged { id: slider });
            }
            ControlMsg::SetSelect {
                select,
                name,
                options,
                value,
            } => {
                if let Some(existing) = self.selects.iter_mut().find(|s| s.id == select) {
                    existing.value = value;
                } else {
                    self.selects.push(Select {
                        id: select,
                        name: name.unwrap_or_default(),
                        options: options.unwrap_or_default(),
                        value,
                    });
                }
                self.notify(ControlNotice::SelectChanged { id: select });
            }
        }
    }

    fn notify(&mut self, notice: ControlNotice) {
        self.listeners.retain(|tx| tx.send(notice.clone()).is_ok());
    }

    fn send_frame(&mut self, frame: String) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.frame_tx.try_send(frame).is_ok()
    }
}
