//! bluetoothctl Control Surface
//!
//! Line-oriented driver for the BlueZ `bluetoothctl` shell, used for
//! advertising. Commands go through a writer thread so a stalled pipe never
//! blocks the caller; output lines land in a bounded buffer that drops the
//! oldest line when full.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

const INIT_LINES: [&str; 5] = [
    "power on",
    "agent NoInputNoOutput",
    "default-agent",
    "pairable off",
    "discoverable off",
];

const POWERED_MARKER: &str = "Powered: yes";
const POWER_CHECK_TIMEOUT: Duration = Duration::from_secs(1);
const QUIT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum BluetoothCtlError {
    #[error("failed to start bluetoothctl: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("bluetoothctl {0} pipe unavailable")]
    MissingPipe(&'static str),
}

/// Something that accepts advertising-control lines
pub trait AdvertisingControl: Send + Sync + 'static {
    fn send_line(&self, line: &str);
}

/// Bounded line buffer with drop-oldest backpressure
#[derive(Clone)]
pub struct ResponseBuffer {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl ResponseBuffer {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    pub fn push(&self, line: String) {
        let mut line = line;
        loop {
            match self.tx.try_send(line) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    let _ = self.rx.try_recv();
                    line = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn drain(&self) -> Vec<String> {
        self.rx.try_iter().collect()
    }

    /// Consume lines until one contains `marker` or the timeout expires
    pub fn wait_for(&self, marker: &str, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(line) if line.contains(marker) => return Some(line),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }
}

pub struct BluetoothCtl {
    child: Option<Child>,
    commands: Option<Sender<String>>,
    responses: ResponseBuffer,
    writer: Option<JoinHandle<()>>,
}

impl BluetoothCtl {
    /// Start `bluetoothctl` and queue the agent/visibility setup lines
    pub fn spawn(buffer_capacity: usize) -> Result<Self, BluetoothCtlError> {
        let mut child = Command::new("bluetoothctl")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().ok_or(BluetoothCtlError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(BluetoothCtlError::MissingPipe("stdout"))?;

        let responses = ResponseBuffer::new(buffer_capacity);
        let (commands, command_rx) = unbounded();

        let writer = std::thread::Builder::new()
            .name("bluetoothctl-writer".to_string())
            .spawn(move || write_lines(stdin, command_rx))?;

        let reader_buffer = responses.clone();
        std::thread::Builder::new()
            .name("bluetoothctl-reader".to_string())
            .spawn(move || read_lines(stdout, reader_buffer))?;

        let ctl = Self {
            child: Some(child),
            commands: Some(commands),
            responses,
            writer: Some(writer),
        };
        for line in INIT_LINES {
            ctl.send(line);
        }
        info!("bluetoothctl started");
        Ok(ctl)
    }

    pub fn send(&self, line: &str) {
        match &self.commands {
            Some(commands) => {
                if commands.send(line.to_string()).is_err() {
                    warn!("bluetoothctl writer gone, dropping '{}'", line);
                }
            }
            None => debug!("bluetoothctl closed, dropping '{}'", line),
        }
    }

    pub fn responses(&self) -> &ResponseBuffer {
        &self.responses
    }

    pub fn wait_for(&self, marker: &str, timeout: Duration) -> Option<String> {
        self.responses.wait_for(marker, timeout)
    }

    /// Make sure the adapter is powered, retrying once
    pub fn power_on(&self) -> bool {
        self.send("power on");
        self.send("show");
        if self.wait_for(POWERED_MARKER, POWER_CHECK_TIMEOUT).is_some() {
            return true;
        }

        warn!("Adapter still not powered, retrying");
        self.send("power on");
        self.send("show");
        self.wait_for(POWERED_MARKER, POWER_CHECK_TIMEOUT).is_some()
    }

    pub fn start_scanning(&self) {
        self.send("scan on");
    }

    pub fn stop_scanning(&self) {
        self.send("scan off");
    }

    /// Send `quit`, give the process a moment, then kill it
    pub fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        self.send("quit");
        // Closing the channel lets the writer flush `quit` and exit
        self.commands = None;
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }

        let deadline = Instant::now() + QUIT_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("bluetoothctl exited: {}", status);
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                _ => break,
            }
        }

        warn!("bluetoothctl did not quit, killing it");
        if let Err(e) = child.kill() {
            warn!("Failed to kill bluetoothctl: {}", e);
        }
        let _ = child.wait();
    }
}

impl AdvertisingControl for BluetoothCtl {
    fn send_line(&self, line: &str) {
        self.send(line);
    }
}

impl Drop for BluetoothCtl {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_lines(mut stdin: ChildStdin, commands: Receiver<String>) {
    for line in commands {
        trace!("bluetoothctl <- {}", line);
        if let Err(e) = writeln!(stdin, "{}", line).and_then(|_| stdin.flush()) {
            warn!("bluetoothctl stdin closed: {}", e);
            break;
        }
    }
}

/// Pump output lines into the buffer until EOF. Device names are not
/// guaranteed to be UTF-8, so lines are decoded lossily.
fn read_lines(stdout: impl Read, buffer: ResponseBuffer) {
    let mut reader = BufReader::new(stdout);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches(&['\r', '\n'][..]);
                trace!("bluetoothctl -> {}", line);
                buffer.push(line.to_string());
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("bluetoothctl stdout closed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_drops_oldest() {
        let buffer = ResponseBuffer::new(3);
        for i in 0..5 {
            buffer.push(format!("line {}", i));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.drain(), vec!["line 2", "line 3", "line 4"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_wait_for_matches_content() {
        let buffer = ResponseBuffer::new(10);
        buffer.push("Controller 00:11:22:33:44:55".to_string());
        buffer.push("\tPowered: yes".to_string());
        buffer.push("\tDiscoverable: no".to_string());

        let line = buffer.wait_for(POWERED_MARKER, Duration::from_millis(50));
        assert_eq!(line.as_deref(), Some("\tPowered: yes"));
        assert_eq!(buffer.len(), 1);
        assert!(buffer
            .wait_for(POWERED_MARKER, Duration::from_millis(20))
            .is_none());
    }

    #[test]
    fn test_reader_survives_invalid_utf8() {
        let output: &[u8] = b"first\n\xffbad name\r\nPowered: yes\nlast";
        let buffer = ResponseBuffer::new(10);
        read_lines(output, buffer.clone());

        let lines = buffer.drain();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "first");
        assert!(lines[1].ends_with("bad name"));
        assert_eq!(lines[2], "Powered: yes");
        assert_eq!(lines[3], "last");
    }
}
