//! HTTP collaborator - `Submitter` over reqwest
//!
//! Fields go out flat, the way an HTML form posts them: URL-encoded for
//! `submit`, multipart text parts next to the file for `upload`. Empty
//! fields are left out. Attempt metadata travels in headers only.
//!
//! Any HTTP status is a response. Only failing to get one is a transport error.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use crate::gate::{ResponseStatus, ServerResponse, SubmissionPayload, Submitter, TransportError};
use crate::normalize::FileDescriptor;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
pub const ATTEMPT_HEADER: &str = "X-Attempt-Id";
pub const FORM_HEADER: &str = "X-Form-Id";

#[derive(Debug, Clone, Default)]
pub struct HttpSubmitter {
    client: Client,
}

impl HttpSubmitter {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn post(&self, endpoint: &str, payload: &SubmissionPayload) -> RequestBuilder {
        self.client
            .post(endpoint)
            .header(IDEMPOTENCY_HEADER, payload.idempotency_key.as_str())
            .header(ATTEMPT_HEADER, payload.attempt_id.to_string())
            .header(FORM_HEADER, payload.form_id.as_str())
    }
}

/// Non-empty text fields in snapshot order.
fn text_fields(payload: &SubmissionPayload) -> Vec<(&str, &str)> {
    payload
        .fields
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.as_text()?)))
        .filter(|(_, text)| !text.is_empty())
        .collect()
}

#[async_trait]
impl Submitter for HttpSubmitter {
    async fn submit(
        &self,
        endpoint: &str,
        payload: &SubmissionPayload,
    ) -> Result<ServerResponse, TransportError> {
        debug!(endpoint, attempt = %payload.attempt_id, "posting form");
        let response = self
            .post(endpoint, payload)
            .form(&text_fields(payload))
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        into_server_response(response).await
    }

    async fn upload(
        &self,
        endpoint: &str,
        field: &str,
        file: &FileDescriptor,
        payload: &SubmissionPayload,
    ) -> Result<ServerResponse, TransportError> {
        debug!(endpoint, attempt = %payload.attempt_id, field, file = %file.name, "uploading file");
        let part = Part::bytes(file.content.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| TransportError(e.to_string()))?;

        let form = text_fields(payload)
            .into_iter()
            .fold(Form::new(), |form, (name, text)| form.text(name.to_string(), text.to_string()))
            .part(field.to_string(), part);

        let response = self
            .post(endpoint, payload)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        into_server_response(response).await
    }
}

async fn into_server_response(response: Response) -> Result<ServerResponse, TransportError> {
    let http_status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| TransportError(e.to_string()))?;
    let body = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    Ok(ServerResponse {
        status: response_status(http_status.as_u16(), &body),
        http_status: Some(http_status.as_u16()),
        body,
    })
}

/// Some servers answer 200 with `{"success": false}`.
fn response_status(http_status: u16, body: &Value) -> ResponseStatus {
    let declared_failure = body.get("success").and_then(Value::as_bool) == Some(false);
    if (200..300).contains(&http_status) && !declared_failure {
        ResponseStatus::Success
    } else {
        ResponseStatus::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::NormalizedValue;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use uuid::Uuid;

    /// Accepts one connection, answers 200 with `reply`, and yields the raw
    /// request it read.
    async fn capture_one(reply: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            while !request_complete(&request) {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                reply.len(),
                reply
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{}", addr), handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
        let body_len = request.len() - (end + 4);
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok());
        match content_length {
            Some(len) => body_len >= len,
            None if head.contains("transfer-encoding: chunked") => request.ends_with(b"0\r\n\r\n"),
            None => true,
        }
    }

    fn split(request: &str) -> (String, &str) {
        let (head, body) = request.split_once("\r\n\r\n").unwrap();
        (head.to_ascii_lowercase(), body)
    }

    fn payload(form_id: &str, fields: &[(&str, NormalizedValue)]) -> SubmissionPayload {
        SubmissionPayload {
            form_id: form_id.to_string(),
            attempt_id: Uuid::new_v4(),
            idempotency_key: "digest-1".to_string(),
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    fn text(value: &str) -> NormalizedValue {
        NormalizedValue::Text(value.to_string())
    }

    #[test]
    fn test_response_status() {
        assert_eq!(response_status(200, &json!({"success": true})), ResponseStatus::Success);
        assert_eq!(response_status(201, &Value::Null), ResponseStatus::Success);
        assert_eq!(response_status(200, &json!({"success": false})), ResponseStatus::Failure);
        assert_eq!(response_status(400, &json!({"message": "nope"})), ResponseStatus::Failure);
        assert_eq!(response_status(302, &Value::Null), ResponseStatus::Failure);
    }

    #[tokio::test]
    async fn test_submit_posts_flat_urlencoded_fields() {
        let (endpoint, server) = capture_one(r#"{"success": true, "id": "s-1"}"#).await;
        let payload = payload("student", &[
            ("name", text("Asha")),
            ("email", text("a@b.co")),
            ("feeStatus", NormalizedValue::Empty),
        ]);

        let response = HttpSubmitter::new().submit(&format!("{}/add", endpoint), &payload).await.unwrap();
        let request = server.await.unwrap();
        let (head, body) = split(&request);

        assert!(head.starts_with("post /add "));
        assert!(head.contains("content-type: application/x-www-form-urlencoded"));
        assert!(head.contains("idempotency-key: digest-1"));
        assert!(head.contains(&format!("x-attempt-id: {}", payload.attempt_id)));
        assert!(head.contains("x-form-id: student"));
        assert_eq!(body, "email=a%40b.co&name=Asha");
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.body["id"], "s-1");
    }

    #[tokio::test]
    async fn test_upload_uses_declared_part_name() {
        let (endpoint, server) = capture_one(r#"{"success": true, "filename": "resume-1.pdf"}"#).await;
        let payload = payload("job-portal", &[("applicant", text("Asha"))]);
        let pdf = FileDescriptor::new("cv.pdf", "application/pdf", b"%PDF-1.4".to_vec());

        let response = HttpSubmitter::new()
            .upload(&format!("{}/upload", endpoint), "resume", &pdf, &payload)
            .await
            .unwrap();
        let request = server.await.unwrap();
        let (head, body) = split(&request);
        let body = body.to_ascii_lowercase();

        assert!(head.contains("content-type: multipart/form-data; boundary="));
        assert!(head.contains("idempotency-key: digest-1"));
        assert!(body.contains(r#"form-data; name="resume"; filename="cv.pdf""#));
        assert!(body.contains("content-type: application/pdf"));
        assert!(body.contains("%pdf-1.4"));
        assert!(body.contains(r#"form-data; name="applicant""#));
        assert!(!body.contains(r#"name="file""#));
        assert_eq!(response.body["filename"], "resume-1.pdf");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let payload = payload("contact", &[]);
        // Port 9 (discard) on loopback is not expected to be listening.
        let result = HttpSubmitter::new().submit("http://127.0.0.1:9/contact", &payload).await;
        assert!(result.is_err());
    }
}
