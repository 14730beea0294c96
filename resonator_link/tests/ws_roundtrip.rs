use crossbeam_channel::bounded;
use resonator_link::codec::EventProtocol;
use resonator_link::control::ControlSurface;
use resonator_link::model::SAMPLE_RATE;
use resonator_link::plot::PlotBounds;
use resonator_link::sync::SyncController;
use resonator_link::transport::{Endpoint, LinkEvent, SocketThread};
use resonator_link::{EVENT_CAP, FRAME_CAP};
use std::io;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tungstenite::handshake::HandshakeError;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::{Message, WebSocket};

const FAST_RECONNECT: Duration = Duration::from_millis(200);

fn accept_ws(listener: &TcpListener, timeout: Duration) -> WebSocket<TcpStream> {
    let deadline = Instant::now() + timeout;
    listener
        .set_nonblocking(true)
        .expect("listener nonblocking");
    let stream = loop {
        match listener.accept() {
            Ok((stream, _)) => break stream,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    panic!("timeout waiting for a client connection");
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("tcp accept failed: {e:?}"),
        }
    };
    stream.set_nonblocking(false).expect("stream blocking");

    let mut attempt = tungstenite::accept(stream);
    let ws = loop {
        match attempt {
            Ok(ws) => break ws,
            Err(HandshakeError::Interrupted(mid)) => attempt = mid.handshake(),
            Err(HandshakeError::Failure(e)) => panic!("ws accept failed: {e:?}"),
        }
    };
    let _ = ws
        .get_ref()
        .set_read_timeout(Some(Duration::from_millis(50)));
    let _ = ws
        .get_ref()
        .set_write_timeout(Some(Duration::from_millis(200)));
    ws
}

fn no_connection_within(listener: &TcpListener, window: Duration) {
    let deadline = Instant::now() + window;
    let _ = listener.set_nonblocking(true);
    while Instant::now() < deadline {
        match listener.accept() {
            Ok(_) => panic!("unexpected connection attempt"),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10))
            }
            Err(e) => panic!("tcp accept failed: {e:?}"),
        }
    }
}

fn read_text(ws: &mut WebSocket<TcpStream>, timeout: Duration) -> String {
    let deadline = Instant::now() + timeout;
    loop {
        match ws.read() {
            Ok(Message::Text(text)) => return text,
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                if Instant::now() >= deadline {
                    panic!("timeout waiting for a frame");
                }
            }
            Err(e) => panic!("ws read failed: {e:?}"),
        }
    }
}

fn wait_until(what: &str, timeout: Duration, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !done() {
        if Instant::now() >= deadline {
            panic!("timeout waiting for {what}");
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn control_channel_handshake_and_project_name() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let (event_tx, event_rx) = bounded(EVENT_CAP);
    let (frame_tx, frame_rx) = bounded(FRAME_CAP);
    let socket = SocketThread::spawn(
        Endpoint::new("127.0.0.1", port, "gui_control"),
        event_tx,
        frame_rx,
    );
    let mut surface = ControlSurface::new(
        event_rx,
        frame_tx,
        socket.connection_flag(),
        Box::new(EventProtocol),
    );

    let mut ws = accept_ws(&listener, Duration::from_secs(2));
    ws.send(Message::Text(
        r#"{"event":"connection","projectName":"demo"}"#.to_string(),
    ))
    .expect("send offer");

    wait_until("handshake", Duration::from_secs(2), || {
        surface.tick();
        surface.handshaken()
    });
    assert_eq!(surface.project_name(), Some("demo"));

    let reply = read_text(&mut ws, Duration::from_secs(2));
    assert_eq!(reply, r#"{"event":"connection-reply"}"#);

    socket.shutdown();
}

#[test]
fn data_channel_full_model_then_single_and_batch_push() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let (event_tx, event_rx) = bounded(EVENT_CAP);
    let (frame_tx, frame_rx) = bounded(FRAME_CAP);
    let socket = SocketThread::spawn(
        Endpoint::new("127.0.0.1", port, "gui_data"),
        event_tx,
        frame_rx,
    );
    let mut sync = SyncController::new(
        event_rx,
        frame_tx,
        socket.connection_flag(),
        Box::new(EventProtocol),
        PlotBounds::default(),
    );

    let mut ws = accept_ws(&listener, Duration::from_secs(2));

    // The client asks for the full model as soon as the socket opens.
    let deadline = Instant::now() + Duration::from_secs(2);
    let request = loop {
        sync.tick();
        match ws.read() {
            Ok(Message::Text(text)) => break text,
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => panic!("ws read failed: {e:?}"),
        }
        if Instant::now() >= deadline {
            panic!("timeout waiting for getModel");
        }
        thread::sleep(Duration::from_millis(10));
    };
    assert_eq!(request, r#"{"command":"getModel"}"#);

    ws.send(Message::Text(
        r#"{"data":"setModel","index":[0,1],"freq":[100,2000],"gain":[0.1,0.2],"decay":[0.999,0.995]}"#
            .to_string(),
    ))
    .expect("send model");

    wait_until("model ingest", Duration::from_secs(2), || {
        sync.tick();
        sync.store().len() == 2
    });
    let r0 = sync.store().resonator(0).expect("resonator 0");
    assert_eq!(r0.freq, 100.0);
    assert_eq!(r0.gain, 0.1);
    assert!((r0.decay - (-0.999f64 / SAMPLE_RATE).exp()).abs() < 1e-12);

    // One dirty entry goes out as a single-resonator message.
    sync.store_mut().mark_dirty(1);
    sync.commit_edits();
    let single: serde_json::Value =
        serde_json::from_str(&read_text(&mut ws, Duration::from_secs(2))).expect("json");
    assert_eq!(single["command"], "setResonator");
    assert_eq!(single["args"]["index"], 1);
    assert!((single["args"]["decay"].as_f64().unwrap() - 0.995).abs() < 1e-6);

    // Drag resonator 0's gain handle, then dirty both: one batch, two
    // entries, current values.
    let plot = *sync.store().plot();
    let mut shape = *sync.store().shape(0).expect("shape 0");
    shape.gain.y = plot.map_to_y(0.25, plot.gain_axis);
    assert!(sync.store_mut().set_shape(0, shape));
    sync.store_mut().mark_dirty(0);
    sync.store_mut().mark_dirty(1);
    sync.commit_edits();

    let batch: serde_json::Value =
        serde_json::from_str(&read_text(&mut ws, Duration::from_secs(2))).expect("json");
    assert_eq!(batch["command"], "setModelDiff");
    let res = batch["args"]["res"].as_array().expect("diff entries");
    assert_eq!(res.len(), 2);
    assert_eq!(res[0]["index"], 0);
    assert!((res[0]["gain"].as_f64().unwrap() - 0.25).abs() < 1e-6);
    assert_eq!(res[1]["index"], 1);

    socket.shutdown();
}

#[test]
fn reconnects_once_after_abnormal_close() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let (event_tx, event_rx) = bounded(EVENT_CAP);
    let (_frame_tx, frame_rx) = bounded::<String>(FRAME_CAP);
    let socket = SocketThread::spawn_with_delay(
        Endpoint::new("127.0.0.1", port, "gui_data"),
        event_tx,
        frame_rx,
        FAST_RECONNECT,
    );

    let ws = accept_ws(&listener, Duration::from_secs(2));
    wait_until("open", Duration::from_secs(2), || socket.is_connected());

    // Kill the connection without a close frame.
    drop(ws);
    wait_until("close", Duration::from_secs(2), || !socket.is_connected());

    let _ws2 = accept_ws(&listener, Duration::from_secs(2));
    wait_until("reopen", Duration::from_secs(2), || socket.is_connected());

    // A single timer was pending: no further dial while this one is live.
    no_connection_within(&listener, FAST_RECONNECT * 3);

    let mut saw_open = 0;
    let mut saw_unclean_close = 0;
    while let Ok(event) = event_rx.try_recv() {
        match event {
            LinkEvent::Open => saw_open += 1,
            LinkEvent::Closed { clean: false } => saw_unclean_close += 1,
            LinkEvent::Closed { clean: true } => panic!("close was not clean"),
            LinkEvent::Frame(_) => {}
        }
    }
    assert_eq!(saw_open, 2);
    assert_eq!(saw_unclean_close, 1);

    socket.shutdown();
}

#[test]
fn clean_close_suppresses_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let (event_tx, event_rx) = bounded(EVENT_CAP);
    let (_frame_tx, frame_rx) = bounded::<String>(FRAME_CAP);
    let socket = SocketThread::spawn_with_delay(
        Endpoint::new("127.0.0.1", port, "gui_data"),
        event_tx,
        frame_rx,
        FAST_RECONNECT,
    );

    let mut ws = accept_ws(&listener, Duration::from_secs(2));
    wait_until("open", Duration::from_secs(2), || socket.is_connected());

    ws.close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }))
    .expect("send close");
    // Drive the close handshake to completion on the server side.
    loop {
        match ws.read() {
            Ok(_) => {}
            Err(tungstenite::Error::ConnectionClosed) => break,
            Err(tungstenite::Error::Io(e))
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => panic!("ws read failed: {e:?}"),
        }
    }

    wait_until("close", Duration::from_secs(2), || !socket.is_connected());
    no_connection_within(&listener, FAST_RECONNECT * 3);

    let events: Vec<LinkEvent> = event_rx.try_iter().collect();
    assert!(events.contains(&LinkEvent::Closed { clean: true }));

    socket.shutdown();
}
