//! Wire format between execution contexts and the supervisor
//!
//! Messages are JSON objects tagged by `type`:
//!
//! ```json
//! {"type":"spawn","request":{"kind":"task","handle":7,"name":"worker-a"}}
//! {"type":"spawn","request":{"kind":"secondary","cpu":2,"idle":99}}
//! {"type":"console","text":"Booting Linux"}
//! {"type":"halted"}
//! {"type":"restart"}
//! {"type":"error","message":"..."}
//! ```
//!
//! Roles use the same encoding as spawn requests, with `{"kind":"boot"}`
//! for the boot context.

use lwk_hal::{ContextMessage, ContextRole};

pub fn encode_message(message: &ContextMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

pub fn decode_message(payload: &str) -> Result<ContextMessage, serde_json::Error> {
    serde_json::from_str(payload)
}

pub fn encode_role(role: &ContextRole) -> Result<String, serde_json::Error> {
    serde_json::to_string(role)
}

pub fn decode_role(payload: &str) -> Result<ContextRole, serde_json::Error> {
    serde_json::from_str(payload)
}
