use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use linkmux_event::EventLoop;
use linkmux_protocol::{
    connect_with_config, Application, ChannelHandle, Connection, ErrorKind, Scheduler,
};

use crate::cmd::{parse_duration, PingArgs};
use crate::exit::{
    protocol_error, CliError, CliResult, DATA_INVALID, FAILURE, INTERNAL, SUCCESS, TIMEOUT,
    TRANSPORT_ERROR, USAGE,
};
use crate::output::{print_ping_report, OutputFormat, PingReport};

/// What the engine told the ping client, forwarded to the main thread.
enum Signal {
    Opened(ChannelHandle),
    Rejected,
    Closed,
    Echo(Bytes),
    Error(ErrorKind, String),
}

struct Pinger {
    signals: Mutex<Sender<Signal>>,
}

impl Pinger {
    fn signal(&self, signal: Signal) {
        let _ = self
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(signal);
    }
}

impl Application for Pinger {
    fn on_channel_accept(&self, _channel: &ChannelHandle) -> bool {
        false
    }

    fn on_channel_opened(&self, channel: &ChannelHandle) {
        self.signal(Signal::Opened(channel.clone()));
    }

    fn on_channel_closed(&self, _channel: &ChannelHandle) {
        self.signal(Signal::Closed);
    }

    fn on_channel_rejected(&self, _connection: &Connection) {
        self.signal(Signal::Rejected);
    }

    fn on_sample(&self, _channel: &ChannelHandle, payload: Bytes, _important: bool) {
        self.signal(Signal::Echo(payload));
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.signal(Signal::Error(kind, message.to_string()));
    }
}

pub fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be at least 1"));
    }
    let config = args.link.connection_config()?;
    let wait = parse_duration(&args.wait)?;

    let scheduler = Arc::new(Scheduler::default());
    let mut events = EventLoop::start(Arc::clone(&scheduler)).map_err(|err| {
        CliError::new(INTERNAL, format!("event loop start failed: {err}"))
    })?;

    let (tx, rx) = mpsc::channel();
    let pinger = Arc::new(Pinger {
        signals: Mutex::new(tx),
    });
    let connection = connect_with_config(&args.addr, scheduler, pinger, &config)
        .map_err(|err| protocol_error("connect failed", err))?;

    let result = exchange(&connection, &rx, &args, wait);

    if let Err(err) = connection.close() {
        tracing::warn!(error = %err, "close failed");
    }
    events.stop();

    let rtts = result?;
    let report = summarize(args.addr.to_string(), args.important, args.count, &rtts);
    print_ping_report(&report, format);

    Ok(match report.received {
        0 => TIMEOUT,
        received if received == report.sent => SUCCESS,
        _ => FAILURE,
    })
}

/// Open a channel and ping over it one sample at a time.
fn exchange(
    connection: &Connection,
    signals: &Receiver<Signal>,
    args: &PingArgs,
    wait: Duration,
) -> CliResult<Vec<Duration>> {
    connection
        .open_channel()
        .map_err(|err| protocol_error("open channel failed", err))?;

    let channel = loop {
        let signal = signals
            .recv_timeout(wait)
            .map_err(|_| CliError::new(TIMEOUT, "timed out waiting for the channel to open"))?;
        match signal {
            Signal::Opened(channel) => break channel,
            Signal::Rejected => return Err(CliError::new(FAILURE, "channel rejected by peer")),
            Signal::Error(kind, message) => return Err(signal_error(kind, &message)),
            Signal::Closed | Signal::Echo(_) => {}
        }
    };
    tracing::info!(
        channel = channel.local_id(),
        remote = ?channel.remote_id(),
        "channel open"
    );

    let mut rtts = Vec::with_capacity(args.count);
    for seq in 0..args.count {
        let payload = ping_payload(seq, args.size);
        let started = Instant::now();
        channel
            .send(payload.clone(), args.important)
            .map_err(|err| protocol_error("send failed", err))?;

        let deadline = started + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match signals.recv_timeout(remaining) {
                Ok(Signal::Echo(echo)) if echo == payload => {
                    rtts.push(started.elapsed());
                    break;
                }
                // A late echo of an earlier sample.
                Ok(Signal::Echo(_)) | Ok(Signal::Opened(_)) | Ok(Signal::Rejected) => {}
                Ok(Signal::Closed) => {
                    return Err(CliError::new(FAILURE, "channel closed by peer"));
                }
                Ok(Signal::Error(kind, message)) => return Err(signal_error(kind, &message)),
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(seq, "no echo before deadline");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CliError::new(INTERNAL, "engine stopped reporting"));
                }
            }
        }
    }

    if let Err(err) = channel.close() {
        tracing::warn!(error = %err, "channel close failed");
    }
    Ok(rtts)
}

/// Sequence tag padded to `size` bytes.
fn ping_payload(seq: usize, size: usize) -> Bytes {
    let mut payload = format!("ping {seq:08}").into_bytes();
    if payload.len() < size {
        payload.resize(size, b'.');
    }
    Bytes::from(payload)
}

fn summarize(addr: String, important: bool, sent: usize, rtts: &[Duration]) -> PingReport {
    let rtt_ms: Vec<f64> = rtts.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
    let min_ms = rtt_ms.iter().copied().reduce(f64::min);
    let max_ms = rtt_ms.iter().copied().reduce(f64::max);
    let avg_ms = (!rtt_ms.is_empty()).then(|| rtt_ms.iter().sum::<f64>() / rtt_ms.len() as f64);
    PingReport {
        addr,
        important,
        sent,
        received: rtt_ms.len(),
        lost: sent.saturating_sub(rtt_ms.len()),
        min_ms,
        avg_ms,
        max_ms,
        rtt_ms,
    }
}

fn signal_error(kind: ErrorKind, message: &str) -> CliError {
    let code = match kind {
        ErrorKind::TransportSocket | ErrorKind::TransportWrite => TRANSPORT_ERROR,
        ErrorKind::Codec | ErrorKind::ProtocolState => DATA_INVALID,
        _ => FAILURE,
    };
    CliError::new(code, format!("{kind}: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_tagged_and_padded() {
        let payload = ping_payload(7, 32);
        assert_eq!(payload.len(), 32);
        assert!(payload.starts_with(b"ping 00000007"));

        let short = ping_payload(7, 0);
        assert_eq!(&short[..], b"ping 00000007");
    }

    #[test]
    fn summary_statistics() {
        let rtts = [
            Duration::from_millis(2),
            Duration::from_millis(4),
            Duration::from_millis(6),
        ];
        let report = summarize("tcp:127.0.0.1:1".into(), true, 4, &rtts);
        assert_eq!(report.received, 3);
        assert_eq!(report.lost, 1);
        assert_eq!(report.min_ms, Some(2.0));
        assert_eq!(report.max_ms, Some(6.0));
        assert!((report.avg_ms.expect("avg") - 4.0).abs() < 1e-9);
    }

    #[test]
    fn empty_summary_has_no_statistics() {
        let report = summarize("unix:/tmp/x".into(), false, 2, &[]);
        assert_eq!(report.received, 0);
        assert_eq!(report.lost, 2);
        assert!(report.min_ms.is_none());
        assert!(report.avg_ms.is_none());
    }

    #[test]
    fn engine_errors_map_to_exit_codes() {
        assert_eq!(signal_error(ErrorKind::TransportWrite, "x").code, TRANSPORT_ERROR);
        assert_eq!(signal_error(ErrorKind::ProtocolState, "x").code, DATA_INVALID);
        assert_eq!(signal_error(ErrorKind::ChannelRefused, "x").code, FAILURE);
    }
}
