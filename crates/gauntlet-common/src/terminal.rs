use serde::{Deserialize, Serialize};

/// Frame sent by a terminal client over the WebSocket.
///
/// Text frames carry these JSON messages; binary frames are raw input
/// bytes and bypass the codec entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Input { data: String },
    Resize { rows: u16, cols: u16 },
    Signal { data: String },
}

/// Frame sent to a terminal client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Output { data: String },
    Error { message: String },
    Closed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_roundtrip() {
        let frames = [
            (r#"{"type":"input","data":"ls -la\n"}"#, ClientFrame::Input { data: "ls -la\n".to_string() }),
            (r#"{"type":"resize","rows":40,"cols":120}"#, ClientFrame::Resize { rows: 40, cols: 120 }),
            (r#"{"type":"signal","data":"SIGINT"}"#, ClientFrame::Signal { data: "SIGINT".to_string() }),
        ];
        for (raw, expect) in frames {
            let parsed: ClientFrame = serde_json::from_str(raw).unwrap();
            assert_eq!(parsed, expect);
            let back: ClientFrame = serde_json::from_str(&serde_json::to_string(&expect).unwrap()).unwrap();
            assert_eq!(back, expect);
        }
    }

    #[test]
    fn test_server_frame_tags() {
        let out = serde_json::to_string(&ServerFrame::Closed { reason: "idle timeout".to_string() }).unwrap();
        assert_eq!(out, r#"{"type":"closed","reason":"idle timeout"}"#);

        let err = serde_json::to_string(&ServerFrame::Error { message: "pod gone".to_string() }).unwrap();
        assert!(err.contains(r#""type":"error""#));
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"detach"}"#).is_err());
    }
}
