//! Flat hop records for ingestion by a standard tracing backend
//! (Jaeger/OpenTelemetry collector shape: microsecond timestamps, explicit
//! `CHILD_OF` references).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::span::{Span, TraceRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedSpan {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<Uuid>,
    pub operation_name: String,
    /// Microseconds since the Unix epoch
    pub start_time: i64,
    /// Microseconds
    pub duration: i64,
    pub tags: Vec<ExportedTag>,
    pub logs: Vec<ExportedLog>,
    pub references: Vec<ExportedReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedTag {
    pub key: String,
    pub value: String,
    #[serde(rename = "type")]
    pub value_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedLog {
    /// Microseconds since the Unix epoch
    pub timestamp: i64,
    pub fields: Vec<ExportedField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedField {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedReference {
    pub ref_type: String,
    pub trace_id: Uuid,
    pub span_id: Uuid,
}

impl ExportedSpan {
    /// Flatten a finished trace into one hop record per span.
    pub fn from_record(record: &TraceRecord) -> Vec<ExportedSpan> {
        record
            .root
            .iter_subtree()
            .into_iter()
            .map(Self::from_span)
            .collect()
    }

    fn from_span(span: &Span) -> ExportedSpan {
        let ctx = &span.context;
        let start_us = ctx.start_time.timestamp_micros();
        let end_us = span
            .end_time
            .map(|t| t.timestamp_micros())
            .unwrap_or(start_us);

        let mut tags: Vec<ExportedTag> = span
            .tags
            .iter()
            .map(|(k, v)| ExportedTag {
                key: k.clone(),
                value: v.clone(),
                value_type: "string".to_string(),
            })
            .collect();
        tags.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(error) = &span.error {
            tags.push(ExportedTag {
                key: "error".to_string(),
                value: error.clone(),
                value_type: "string".to_string(),
            });
        }

        let logs = span
            .logs
            .iter()
            .map(|log| {
                let mut fields = vec![
                    ExportedField {
                        key: "level".to_string(),
                        value: format!("{:?}", log.level).to_lowercase(),
                    },
                    ExportedField {
                        key: "message".to_string(),
                        value: log.message.clone(),
                    },
                ];
                if let Some(data) = &log.data {
                    fields.push(ExportedField {
                        key: "data".to_string(),
                        value: data.to_string(),
                    });
                }
                ExportedLog {
                    timestamp: log.timestamp.timestamp_micros(),
                    fields,
                }
            })
            .collect();

        let references = ctx
            .parent_span_id
            .map(|parent_id| {
                vec![ExportedReference {
                    ref_type: "CHILD_OF".to_string(),
                    trace_id: ctx.trace_id,
                    span_id: parent_id,
                }]
            })
            .unwrap_or_default();

        ExportedSpan {
            trace_id: ctx.trace_id,
            span_id: ctx.span_id,
            parent_span_id: ctx.parent_span_id,
            operation_name: ctx.operation.clone(),
            start_time: start_us,
            duration: end_us - start_us,
            tags,
            logs,
            references,
        }
    }
}
