//! OData `$batch` request building and response parsing
//!
//! Requests are placed directly in the batch (no change sets) so each one
//! commits independently; combined with `Prefer: odata.continue-on-error`
//! a failing item never rolls back or blocks the others.

use anyhow::{Context, Result};

use super::operation::OperationResult;

/// One HTTP request inside a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPart {
    pub method: &'static str,
    /// Absolute request URL
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

/// A multipart `$batch` body under construction
#[derive(Debug, Clone)]
pub struct BatchRequest {
    boundary: String,
    parts: Vec<BatchPart>,
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRequest {
    pub fn new() -> Self {
        Self {
            boundary: format!("batch_{}", uuid::Uuid::new_v4()),
            parts: Vec::new(),
        }
    }

    pub fn push(&mut self, part: BatchPart) {
        self.parts.push(part);
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }

    /// Render the multipart body
    pub fn body(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            out.push_str(&format!("--{}\r\n", self.boundary));
            out.push_str("Content-Type: application/http\r\n");
            out.push_str("Content-Transfer-Encoding: binary\r\n\r\n");
            out.push_str(&format!("{} {} HTTP/1.1\r\n", part.method, part.url));
            for (name, value) in &part.headers {
                out.push_str(&format!("{}: {}\r\n", name, value));
            }
            match &part.body {
                Some(body) => {
                    out.push_str("Content-Type: application/json\r\n\r\n");
                    out.push_str(&body.to_string());
                    out.push_str("\r\n");
                }
                None => out.push_str("\r\n"),
            }
        }
        out.push_str(&format!("--{}--\r\n", self.boundary));
        out
    }
}

/// Parse a multipart `$batch` response into per-item results.
///
/// Items without a response part (the service stopped early) are reported
/// as faults so they are never counted as successes.
pub fn parse_batch_response(
    content_type: &str,
    body: &str,
    expected: usize,
) -> Result<Vec<OperationResult>> {
    let boundary = boundary_of(content_type)
        .context("Batch response has no multipart boundary")?;
    let body = body.replace("\r\n", "\n");

    let mut statuses = Vec::new();
    collect_statuses(&body, boundary, &mut statuses);

    let mut results: Vec<OperationResult> = statuses
        .into_iter()
        .take(expected)
        .enumerate()
        .map(|(index, (status, message))| {
            if status < 400 {
                OperationResult::success(index, Some(status))
            } else {
                OperationResult::error(
                    index,
                    message.unwrap_or_else(|| format!("HTTP {}", status)),
                    Some(status),
                )
            }
        })
        .collect();

    for index in results.len()..expected {
        results.push(OperationResult::error(
            index,
            "No response returned for batch item",
            None,
        ));
    }

    Ok(results)
}

fn boundary_of(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"'))
}

fn collect_statuses(body: &str, boundary: &str, out: &mut Vec<(u16, Option<String>)>) {
    let delimiter = format!("--{}", boundary);

    for part in body.split(&delimiter).skip(1) {
        if part.starts_with("--") {
            break;
        }

        let (headers, rest) = part.trim_start_matches('\n').split_once("\n\n").unwrap_or((part, ""));

        // Change set responses nest another multipart body
        if let Some(nested) = headers
            .lines()
            .find(|l| l.to_ascii_lowercase().starts_with("content-type: multipart/mixed"))
            .and_then(boundary_of)
        {
            collect_statuses(rest, nested, out);
            continue;
        }

        let Some(status_line) = rest.lines().find(|l| l.starts_with("HTTP/")) else {
            continue;
        };
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(500);

        let message = if status >= 400 {
            let payload = rest
                .split_once("\n\n")
                .map(|(_, p)| p.trim())
                .unwrap_or_default();
            error_message(payload).or_else(|| Some(status_line.trim().to_string()))
        } else {
            None
        };

        out.push((status, message));
    }
}

/// Extract `error.message` from an OData error payload
pub fn error_message(payload: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(payload).ok()?;
    json.get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}
