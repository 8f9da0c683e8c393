use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use linkmux_event::EventLoop;
use linkmux_protocol::{
    Application, ChannelHandle, Connection, ConnectionState, ErrorKind, LinkListener, Scheduler,
};

use crate::cmd::PongArgs;
use crate::exit::{protocol_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_pong_summary, OutputFormat, PongSummary};

/// Echoes every raw sample back on its channel with the same importance.
#[derive(Default)]
struct Echo {
    channels: AtomicU64,
    echoed: AtomicU64,
}

impl Application for Echo {
    fn on_channel_accept(&self, channel: &ChannelHandle) -> bool {
        tracing::info!(
            connection = channel.connection().id(),
            channel = channel.local_id(),
            "accepting channel"
        );
        true
    }

    fn on_channel_opened(&self, _channel: &ChannelHandle) {
        self.channels.fetch_add(1, Ordering::Relaxed);
    }

    fn on_channel_closed(&self, channel: &ChannelHandle) {
        tracing::info!(
            connection = channel.connection().id(),
            channel = channel.local_id(),
            "channel closed"
        );
    }

    fn on_sample(&self, channel: &ChannelHandle, payload: Bytes, important: bool) {
        tracing::debug!(
            channel = channel.local_id(),
            size = payload.len(),
            important,
            "echoing sample"
        );
        match channel.send(payload, important) {
            Ok(()) => {
                self.echoed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => tracing::warn!(error = %err, "echo send failed"),
        }
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        tracing::warn!(%kind, message, "protocol error");
    }
}

pub fn run(args: PongArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.link.connection_config()?;
    let scheduler = Arc::new(Scheduler::default());
    let mut events = EventLoop::start(Arc::clone(&scheduler)).map_err(|err| {
        CliError::new(INTERNAL, format!("event loop start failed: {err}"))
    })?;

    let echo = Arc::new(Echo::default());
    let listener = LinkListener::bind(&args.addr, Arc::clone(&scheduler), echo.clone())
        .map_err(|err| protocol_error("bind failed", err))?
        .with_config(config);
    let addr = listener.local_addr();
    tracing::info!(addr = %addr, "pong listening");

    let (stop_tx, stop_rx) = mpsc::channel();
    install_ctrlc_handler(stop_tx.clone())?;

    let connections: Arc<Mutex<Vec<Connection>>> = Arc::default();
    let accepted = Arc::clone(&connections);
    let once = args.once;
    thread::Builder::new()
        .name("linkmux-accept".into())
        .spawn(move || accept_loop(listener, accepted, once, stop_tx))
        .map_err(|err| CliError::new(INTERNAL, format!("accept thread failed: {err}")))?;

    // Either ctrl-c, a fatal accept error, or the end of a --once session.
    let accept_result = stop_rx.recv().unwrap_or(Ok(()));

    let connections = std::mem::take(
        &mut *connections.lock().unwrap_or_else(PoisonError::into_inner),
    );
    for connection in &connections {
        if let Err(err) = connection.close() {
            tracing::warn!(connection = connection.id(), error = %err, "close failed");
        }
    }
    events.stop();

    print_pong_summary(
        &PongSummary {
            addr: addr.to_string(),
            connections: connections.len(),
            channels: echo.channels.load(Ordering::Relaxed),
            echoed: echo.echoed.load(Ordering::Relaxed),
        },
        format,
    );

    accept_result.map(|()| SUCCESS)
}

fn accept_loop(
    listener: LinkListener,
    connections: Arc<Mutex<Vec<Connection>>>,
    once: bool,
    stop: Sender<CliResult<()>>,
) {
    loop {
        let connection = match listener.accept() {
            Ok(connection) => connection,
            Err(err) => {
                let _ = stop.send(Err(protocol_error("accept failed", err)));
                return;
            }
        };
        tracing::info!(connection = connection.id(), "connection accepted");
        connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(connection.clone());

        if once {
            while connection.state() != ConnectionState::Closed {
                thread::sleep(Duration::from_millis(20));
            }
            let _ = stop.send(Ok(()));
            return;
        }
    }
}

fn install_ctrlc_handler(stop: Sender<CliResult<()>>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        let _ = stop.send(Ok(()));
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
