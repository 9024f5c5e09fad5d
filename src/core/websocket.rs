use serde::{Deserialize, Serialize};

/// Close code for a normal, intentional shutdown. Anything else is abnormal.
pub const CLOSE_NORMAL: u16 = 1000;
/// Reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Wire envelope exchanged with the shell endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    // Client-to-Server messages
    #[serde(rename = "input")]
    Input { data: String },
    #[serde(rename = "resize")]
    Resize { cols: u16, rows: u16 },

    // Either direction
    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(rename = "pong")]
    Pong {
        #[serde(default)]
        timestamp: i64,
    },

    // Server-to-Client
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

impl WireMessage {
    pub fn input(data: &[u8]) -> Self {
        WireMessage::Input {
            data: String::from_utf8_lossy(data).into_owned(),
        }
    }

    pub fn ping() -> Self {
        WireMessage::Ping {
            timestamp: now_millis(),
        }
    }

    pub fn pong() -> Self {
        WireMessage::Pong {
            timestamp: now_millis(),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self,
            WireMessage::Ping { .. } | WireMessage::Pong { .. } | WireMessage::Heartbeat
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// How an inbound text frame should be treated.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound<'a> {
    Control(WireMessage),
    Data(&'a [u8]),
}

/// The shell endpoint writes raw terminal output as text frames, so only
/// frames that parse as a control envelope are treated as protocol.
pub fn classify(text: &str) -> Inbound<'_> {
    if text.starts_with('{') {
        if let Ok(message) = serde_json::from_str::<WireMessage>(text) {
            if message.is_control() {
                return Inbound::Control(message);
            }
        }
    }
    Inbound::Data(text.as_bytes())
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_envelopes() {
        let input = serde_json::to_value(WireMessage::input(b"ls\r")).unwrap();
        assert_eq!(input, serde_json::json!({"type": "input", "data": "ls\r"}));

        let resize = serde_json::to_value(WireMessage::Resize { cols: 120, rows: 40 }).unwrap();
        assert_eq!(
            resize,
            serde_json::json!({"type": "resize", "cols": 120, "rows": 40})
        );
    }

    #[test]
    fn test_classify_control_frames() {
        assert_eq!(
            classify(r#"{"type":"heartbeat"}"#),
            Inbound::Control(WireMessage::Heartbeat)
        );
        assert_eq!(
            classify(r#"{"type":"pong","timestamp":42}"#),
            Inbound::Control(WireMessage::Pong { timestamp: 42 })
        );
        assert_eq!(
            classify(r#"{"type":"ping"}"#),
            Inbound::Control(WireMessage::Ping { timestamp: 0 })
        );
    }

    #[test]
    fn test_classify_terminal_output() {
        assert_eq!(classify("$ ls\r\n"), Inbound::Data(b"$ ls\r\n"));
        // JSON printed by a program in the shell is still terminal output
        let printed = r#"{"name": "demo"}"#;
        assert_eq!(classify(printed), Inbound::Data(printed.as_bytes()));
        let echoed = r#"{"type":"input","data":"x"}"#;
        assert_eq!(classify(echoed), Inbound::Data(echoed.as_bytes()));
    }
}
