use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Field names owned by [`InitUploadRequest`]; extra fields never override them.
pub const RESERVED_INIT_FIELDS: [&str; 4] = ["file_name", "file_size", "md5", "chunk_count"];

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts a new upload on the remote endpoint.
///
/// Collaborator-supplied `extra` fields are flattened into the same JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitUploadRequest {
    pub file_name: String,
    pub file_size: u64,
    pub md5: String,
    pub chunk_count: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InitUploadRequest {
    /// Builds a request, dropping any extra field that collides with a fixed one.
    pub fn new(
        file_name: impl Into<String>,
        file_size: u64,
        md5: impl Into<String>,
        chunk_count: u64,
        extra: &Map<String, Value>,
    ) -> Self {
        let extra = extra
            .iter()
            .filter(|(k, _)| !RESERVED_INIT_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            file_name: file_name.into(),
            file_size,
            md5: md5.into(),
            chunk_count,
            extra,
        }
    }
}

/// Finalizes an upload with the acknowledgement tokens in chunk order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    pub upload_id: String,
    pub etags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Envelope shared by the init and chunk responses: `{"data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Payload of a successful init response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitUploadData {
    #[serde(deserialize_with = "string_or_number")]
    pub upload_id: String,
}

/// Payload of a successful chunk response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkAck {
    #[serde(deserialize_with = "string_or_number")]
    pub etag: String,
}

/// Completion response. The server's schema is open, so the raw JSON is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompleteUploadResponse(pub Value);

impl CompleteUploadResponse {
    /// Returns the final storage location reported by the server, if any.
    pub fn location(&self) -> Option<&str> {
        const POINTERS: [&str; 4] = ["/data/file_path", "/file_path", "/data/location", "/location"];
        POINTERS
            .iter()
            .find_map(|p| self.0.pointer(p).and_then(Value::as_str))
    }

    /// Returns the raw JSON body.
    pub fn body(&self) -> &Value {
        &self.0
    }
}

/// Accepts identifiers the server may encode either as strings or integers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn init_request_flattens_extra_fields() {
        let mut extra = Map::new();
        extra.insert("channel_id".into(), json!("161049754137003364"));
        let req = InitUploadRequest::new("movie.mp4", 10, "abc", 4, &extra);

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "file_name": "movie.mp4",
                "file_size": 10,
                "md5": "abc",
                "chunk_count": 4,
                "channel_id": "161049754137003364",
            })
        );
    }

    #[test]
    fn init_request_fixed_fields_win() {
        let mut extra = Map::new();
        extra.insert("md5".into(), json!("forged"));
        extra.insert("chunk_count".into(), json!(1));
        let req = InitUploadRequest::new("a.bin", 10, "real", 4, &extra);

        assert!(req.extra.is_empty());
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"md5\":\"real\""));
        assert!(!json.contains("forged"));
    }

    #[test]
    fn init_response_accepts_numeric_id() {
        let resp: ApiResponse<InitUploadData> =
            serde_json::from_str(r#"{"data":{"upload_id":42}}"#).unwrap();
        assert_eq!(resp.data.upload_id, "42");

        let resp: ApiResponse<InitUploadData> =
            serde_json::from_str(r#"{"data":{"upload_id":"u-1","extra":true}}"#).unwrap();
        assert_eq!(resp.data.upload_id, "u-1");
    }

    #[test]
    fn chunk_ack_rejects_missing_etag() {
        let result = serde_json::from_str::<ApiResponse<ChunkAck>>(r#"{"data":{}}"#);
        assert!(result.is_err());

        let result = serde_json::from_str::<ApiResponse<ChunkAck>>(r#"{"data":{"etag":null}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn complete_request_keeps_etag_order() {
        let req = CompleteUploadRequest {
            upload_id: "u1".into(),
            etags: vec!["e0".into(), "e1".into(), "e2".into()],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"upload_id":"u1","etags":["e0","e1","e2"]}"#);
    }

    #[test]
    fn complete_response_location_lookup() {
        let resp = CompleteUploadResponse(json!({"data": {"file_path": "/media/a.mp4"}}));
        assert_eq!(resp.location(), Some("/media/a.mp4"));

        let resp = CompleteUploadResponse(json!({"location": "s3://bucket/a.mp4"}));
        assert_eq!(resp.location(), Some("s3://bucket/a.mp4"));

        let resp = CompleteUploadResponse(json!({"status": "ok"}));
        assert_eq!(resp.location(), None);
    }
}
