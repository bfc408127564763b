//! Control method dispatch
//!
//! The UI calls monitoring by method name. `start` and `stop` map onto the
//! lifecycle; any other method gets an explicit "not implemented" reply.

use crate::services::monitor::MonitorLifecycle;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequest {
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ControlResponse {
    Success { success: bool },
    Error { error: String },
}

impl ControlResponse {
    pub fn not_implemented() -> Self {
        ControlResponse::Error { error: "not implemented".to_string() }
    }
}

pub async fn handle_method(monitor: &MonitorLifecycle, method: &str) -> ControlResponse {
    let response = match method {
        "start" => ControlResponse::Success { success: monitor.start().await },
        "stop" => ControlResponse::Success { success: monitor.stop().await },
        other => {
            warn!(method = %other, "control_method_not_implemented");
            return ControlResponse::not_implemented();
        }
    };
    info!(method = %method, response = ?response, "control_method_handled");
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_wire_format() {
        let ok = serde_json::to_string(&ControlResponse::Success { success: true }).unwrap();
        assert_eq!(ok, r#"{"success":true}"#);

        let err = serde_json::to_string(&ControlResponse::not_implemented()).unwrap();
        assert_eq!(err, r#"{"error":"not implemented"}"#);
    }

    #[test]
    fn test_request_parse() {
        let req: ControlRequest = serde_json::from_str(r#"{"method":"stop"}"#).unwrap();
        assert_eq!(req.method, "stop");
    }
}
