use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Visibility;

// -- Procedure envelope --

/// Response envelope returned by every remote procedure.
/// `success: false` is a failure even when the call itself went through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcEnvelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

// -- Procedure parameters --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesParams {
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageParams {
    pub channel_id: String,
    pub content: String,
    pub is_internal: bool,
}

// -- Table rows written by the sync layer --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalNoteInsert {
    pub complaint_id: String,
    pub staff_id: String,
    pub note: String,
    pub is_internal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficialNoteInsert {
    pub complaint_id: String,
    pub author_id: String,
    pub body: String,
    pub tags: Vec<String>,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessageInsert {
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
}
