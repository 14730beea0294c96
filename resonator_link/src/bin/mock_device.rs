//! Stand-in for the device: serves both gui channels from one listener so
//! the client can be exercised without hardware. Run it, point a
//! `DeviceLink` at `127.0.0.1`, drag some handles.

use resonator_protocol::{DataMsg, DeviceCommand, WireResonator};
use std::collections::BTreeMap;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tungstenite::handshake::server::{Request, Response};
use tungstenite::protocol::Message;
use tungstenite::WebSocket;

const DEFAULT_ADDR: &str = "127.0.0.1:5555";
const PROJECT_NAME: &str = "mock-device";

/// Bank state, keyed by resonator index. Decay is kept in whatever domain
/// the last write used; the mock does not run audio.
type Bank = Arc<Mutex<BTreeMap<usize, WireResonator>>>;

fn seed_bank() -> Bank {
    let mut bank = BTreeMap::new();
    for (i, freq) in [110.0, 220.0, 330.0, 440.0, 550.0].into_iter().enumerate() {
        bank.insert(
            i,
            WireResonator {
                index: i,
                freq,
                gain: 0.1,
                decay: 0.999,
            },
        );
    }
    Arc::new(Mutex::new(bank))
}

fn parse_arg_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let addr = parse_arg_value(&args, "--addr").unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let listener = match TcpListener::bind(&addr) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("bind failed on {addr}: {e}");
            std::process::exit(1);
        }
    };
    println!("mock_device listening on ws://{addr}");

    let bank = seed_bank();
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let bank = Arc::clone(&bank);
                thread::spawn(move || serve(stream, bank));
            }
            Err(e) => tracing::warn!(error = %e, "accept failed"),
        }
    }
}

fn serve(stream: TcpStream, bank: Bank) {
    let _ = stream.set_nodelay(true);
    let _ = stream.set_write_timeout(Some(Duration::from_millis(200)));

    let mut path = String::new();
    let ws = tungstenite::accept_hdr(stream, |req: &Request, resp: Response| {
        path = req.uri().path().to_string();
        Ok(resp)
    });
    let ws = match ws {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(error = %e, "ws handshake failed");
            return;
        }
    };

    // Short read timeout keeps the session loops polling after the
    // blocking handshake completes.
    let _ = ws.get_ref().set_read_timeout(Some(Duration::from_millis(30)));

    tracing::info!(%path, "client connected");
    match path.as_str() {
        "/gui_control" => control_session(ws),
        "/gui_data" => data_session(ws, bank),
        other => tracing::warn!(path = other, "unknown channel path"),
    }
}

fn control_session(mut ws: WebSocket<TcpStream>) {
    let offer = format!(r#"{{"event":"connection","projectName":"{PROJECT_NAME}"}}"#);
    if ws.send(Message::Text(offer)).is_err() {
        return;
    }

    // Announce a small widget set so the surface has something to mirror.
    let widgets = [
        r#"{"event":"set-slider","slider":0,"name":"master gain","min":0,"max":1,"value":0.8,"step":0.01}"#,
        r#"{"event":"set-select","select":0,"name":"model","options":["marimba","bells"],"value":0}"#,
    ];
    for frame in widgets {
        if ws.send(Message::Text(frame.to_string())).is_err() {
            return;
        }
    }

    loop {
        match ws.read() {
            Ok(Message::Text(text)) => tracing::info!(%text, "control frame"),
            Ok(Message::Close(_)) | Err(tungstenite::Error::ConnectionClosed) => return,
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                tracing::warn!(error = %e, "control channel error");
                return;
            }
        }
    }
}

fn data_session(mut ws: WebSocket<TcpStream>, bank: Bank) {
    loop {
        let text = match ws.read() {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(tungstenite::Error::ConnectionClosed) => return,
            Ok(_) => continue,
            Err(tungstenite::Error::Io(e))
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(e) => {
                tracing::warn!(error = %e, "data channel error");
                return;
            }
        };

        let cmd: DeviceCommand = match serde_json::from_str(&text) {
            Ok(cmd) => cmd,
            Err(_) => {
                tracing::warn!(%text, "unrecognized data frame");
                continue;
            }
        };

        tracing::info!(command = cmd.name(), "data command");
        if handle_command(&mut ws, &bank, cmd).is_err() {
            return;
        }
    }
}

fn handle_command(
    ws: &mut WebSocket<TcpStream>,
    bank: &Bank,
    cmd: DeviceCommand,
) -> Result<(), ()> {
    let Ok(mut bank) = bank.lock() else {
        return Err(());
    };

    match cmd {
        DeviceCommand::GetModel => {
            let msg = DataMsg::SetModel {
                index: bank.keys().copied().collect(),
                freq: bank.values().map(|r| r.freq).collect(),
                gain: bank.values().map(|r| r.gain).collect(),
                decay: bank.values().map(|r| r.decay).collect(),
            };
            send_msg(ws, &msg)?;
        }
        DeviceCommand::GetResonator(index) => {
            if let Some(res) = bank.get(&index).copied() {
                let msg = DataMsg::SetResonator {
                    index: res.index,
                    freq: res.freq,
                    gain: res.gain,
                    decay: res.decay,
                };
                send_msg(ws, &msg)?;
            }
        }
        DeviceCommand::SetResonator(res) => {
            bank.insert(res.index, res);
        }
        DeviceCommand::SetModelDiff(diff) => {
            for res in diff.res {
                bank.insert(res.index, res);
            }
        }
        DeviceCommand::SetModel {
            index,
            freq,
            gain,
            decay,
        } => {
            let len = index.len().min(freq.len()).min(gain.len()).min(decay.len());
            for i in 0..len {
                bank.insert(
                    index[i],
                    WireResonator {
                        index: index[i],
                        freq: freq[i],
                        gain: gain[i],
                        decay: decay[i],
                    },
                );
            }
        }
        other => {
            tracing::info!(command = other.name(), "command accepted, no mock effect");
        }
    }
    Ok(())
}

fn send_msg(ws: &mut WebSocket<TcpStream>, msg: &DataMsg) -> Result<(), ()> {
    let payload = serde_json::to_string(msg).map_err(|_| ())?;
    ws.send(Message::Text(payload)).map_err(|_| ())
}
