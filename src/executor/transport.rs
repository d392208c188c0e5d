//! JSON-lines writer for one script's channel.

use std::io::{self, Write};

use parking_lot::Mutex;
use serde_json::Value;

use super::MessagePort;
use crate::logging;
use crate::protocol::serialize_message;

/// Serializes writes from broker threads onto one connection.
///
/// `W` is the host end of the socketpair in production and any writer in tests.
pub struct JsonlPort<W: Write + Send> {
    pid: u32,
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonlPort<W> {
    pub fn new(pid: u32, writer: W) -> Self {
        Self {
            pid,
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> MessagePort for JsonlPort<W> {
    fn send(&self, message: &Value) -> io::Result<()> {
        let line = serialize_message(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        logging::log_protocol_send(self.pid, &line);

        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_writes_one_line_per_message() {
        let port = JsonlPort::new(1, Vec::new());
        port.send(&json!({"pid": 1, "channel": 5, "value": "a"})).unwrap();
        port.send(&json!({"pid": 1, "channel": 3})).unwrap();

        let written = String::from_utf8(port.writer.lock().clone()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            serde_json::from_str::<Value>(lines[0]).unwrap(),
            json!({"pid": 1, "channel": 5, "value": "a"})
        );
    }
}
