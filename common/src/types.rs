use serde::{Serialize, Serializer};

fn two_decimals<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f32((value * 100.0).round() / 100.0)
}

/// Query response: the merged latest reading with its freshness verdict.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TemperatureReport {
    #[serde(serialize_with = "two_decimals")]
    pub temperature: f32,
    #[serde(serialize_with = "two_decimals")]
    pub humidity: f32,
    pub valid: bool,
    pub last_update: String,
}

/// `{"status":"ok"}` acknowledgement for a committed ingest.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IngestAck {
    pub status: &'static str,
}

impl IngestAck {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

/// `{"status":"error","message":...}` body for parse-stage rejections.
#[derive(Debug, Clone, Serialize)]
pub struct IngestErrorBody {
    pub status: &'static str,
    pub message: String,
}

impl IngestErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn report_serializes_with_rounded_values() {
        let report = TemperatureReport {
            temperature: 23.204,
            humidity: 54.0,
            valid: true,
            last_update: "5 seconds ago".to_string(),
        };

        assert_eq!(
            serde_json::to_string(&report).unwrap(),
            r#"{"temperature":23.2,"humidity":54.0,"valid":true,"last_update":"5 seconds ago"}"#
        );
    }

    #[test]
    fn ingest_bodies_serialize_to_wire_shape() {
        assert_eq!(
            serde_json::to_string(&IngestAck::ok()).unwrap(),
            r#"{"status":"ok"}"#
        );
        assert_eq!(
            serde_json::to_string(&IngestErrorBody::new("Invalid data")).unwrap(),
            r#"{"status":"error","message":"Invalid data"}"#
        );
    }
}
