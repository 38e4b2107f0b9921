//! obs-websocket v5 frame types
//!
//! Every frame on the wire is `{"op": <u8>, "d": {...}}`. The op code selects
//! the shape of `d`, so frames are decoded in two steps: envelope first, then
//! the payload for the op we expect.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::constants::protocol::{RPC_VERSION, SUBSCRIBE_OUTPUTS, op};

/// Raw frame envelope
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Frame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

impl Frame {
    pub fn new<T: Serialize>(op: u8, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            op,
            d: serde_json::to_value(payload)?,
        })
    }

    /// Decode the payload as `T`
    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.d.clone())
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Sent by the server immediately after the socket opens
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub obs_web_socket_version: String,
    pub rpc_version: u32,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

/// Present in Hello when the server requires a password
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

impl AuthChallenge {
    /// base64(sha256(base64(sha256(password + salt)) + challenge))
    pub fn respond(&self, password: &str) -> String {
        let secret = STANDARD.encode(Sha256::digest(format!("{password}{}", self.salt)));
        STANDARD.encode(Sha256::digest(format!("{secret}{}", self.challenge)))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    pub event_subscriptions: u32,
}

impl Identify {
    /// Identify in answer to `hello`, subscribing to output events
    pub fn answering(hello: &Hello, password: &str) -> Self {
        Self {
            rpc_version: RPC_VERSION,
            authentication: hello.authentication.as_ref().map(|auth| auth.respond(password)),
            event_subscriptions: SUBSCRIBE_OUTPUTS,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_type: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RequestStatus {
    pub result: bool,
    pub code: u16,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Option<Value>,
}

/// `eventData` of StreamStateChanged
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StreamStateData {
    pub output_active: bool,
    pub output_state: super::OutputState,
}

// Response payloads for the handful of requests we issue

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SceneList {
    pub scenes: Vec<SceneEntry>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SceneEntry {
    pub scene_name: String,
}

#[derive(Deserialize, Debug)]
pub struct InputList {
    pub inputs: Vec<InputEntry>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InputEntry {
    pub input_name: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InputSettings {
    #[serde(default)]
    pub input_settings: Map<String, Value>,
}

/// Build the text of a Request frame
pub fn request_text(request_type: &str, request_id: &str, data: Option<Value>) -> serde_json::Result<String> {
    let request = Request {
        request_type: request_type.to_string(),
        request_id: request_id.to_string(),
        request_data: data,
    };
    Frame::new(op::REQUEST, &request)?.to_text()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obs::OutputState;
    use serde_json::json;

    #[test]
    fn test_auth_response_known_vector() {
        let challenge = AuthChallenge {
            challenge: "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY=".to_string(),
            salt: "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=".to_string(),
        };
        assert_eq!(
            challenge.respond("supersecretpassword"),
            "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4="
        );
    }

    #[test]
    fn test_identify_without_auth_omits_field() {
        let hello: Hello = Frame {
            op: op::HELLO,
            d: json!({"obsWebSocketVersion": "5.4.2", "rpcVersion": 1}),
        }
        .payload()
        .unwrap();
        let identify = Identify::answering(&hello, "ignored");
        let text = Frame::new(op::IDENTIFY, &identify).unwrap().to_text().unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!({"op": 1, "d": {"rpcVersion": 1, "eventSubscriptions": 64}}));
    }

    #[test]
    fn test_identify_with_auth_includes_response() {
        let hello: Hello = serde_json::from_value(json!({
            "obsWebSocketVersion": "5.4.2",
            "rpcVersion": 1,
            "authentication": {"challenge": "c", "salt": "s"}
        }))
        .unwrap();
        let identify = Identify::answering(&hello, "pw");
        assert_eq!(identify.authentication.as_deref(), Some(hello.authentication.unwrap().respond("pw").as_str()));
    }

    #[test]
    fn test_request_text_shape() {
        let text = request_text("GetInputList", "7", Some(json!({"inputKind": "browser_source"}))).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            parsed,
            json!({"op": 6, "d": {
                "requestType": "GetInputList",
                "requestId": "7",
                "requestData": {"inputKind": "browser_source"}
            }})
        );
    }

    #[test]
    fn test_failed_request_status_decodes() {
        let frame: Frame = serde_json::from_str(
            r#"{"op":7,"d":{"requestType":"SetCurrentProgramScene","requestId":"3",
                "requestStatus":{"result":false,"code":600,"comment":"No source was found"}}}"#,
        )
        .unwrap();
        let response: RequestResponse = frame.payload().unwrap();
        assert!(!response.request_status.result);
        assert_eq!(response.request_status.code, 600);
        assert_eq!(response.request_status.comment.as_deref(), Some("No source was found"));
        assert!(response.response_data.is_none());
    }

    #[test]
    fn test_stream_state_event_decodes_unknown_state() {
        let data: StreamStateData = serde_json::from_value(json!({
            "outputActive": false,
            "outputState": "OBS_WEBSOCKET_OUTPUT_PAUSED"
        }))
        .unwrap();
        assert_eq!(data.output_state, OutputState::Other);

        let data: StreamStateData = serde_json::from_value(json!({
            "outputActive": true,
            "outputState": "OBS_WEBSOCKET_OUTPUT_STARTED"
        }))
        .unwrap();
        assert_eq!(data.output_state, OutputState::Started);
    }
}
