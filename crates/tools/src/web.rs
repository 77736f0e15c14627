//! Web tools: render the curl template, send it, shape the response.

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use switchyard_core::error::ToolError;
use switchyard_core::tool::ToolDescriptor;
use tracing::{debug, warn};

use crate::substitution::substitute;
use crate::template::{FormValue, HttpTemplate, RequestBody, parse_curl};

/// Sends Web tool requests through one shared client.
#[derive(Clone)]
pub struct WebRunner {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebRunner {
    pub fn new(timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::Request(format!("HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Execute a Web descriptor. Substitution always runs for Web tools.
    pub async fn run(&self, descriptor: &ToolDescriptor, arguments: &Value) -> Result<Value, ToolError> {
        let rendered = substitute(&descriptor.payload, &descriptor.variable_map(), arguments);
        let template = parse_curl(&rendered)?;
        debug!(
            tool = %descriptor.name,
            method = %template.method,
            url = %template.url,
            body = template.body.as_ref().map(RequestBody::kind).unwrap_or("none"),
            "Sending web tool request"
        );

        let response = self.send(&descriptor.name, &template).await?;
        Ok(apply_response_map(response, &descriptor.response_map))
    }

    /// Send a parsed template and decode the body.
    pub async fn send(&self, tool_name: &str, template: &HttpTemplate) -> Result<Value, ToolError> {
        let method = match template.method.as_str() {
            "GET" => reqwest::Method::GET,
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "PATCH" => reqwest::Method::PATCH,
            "DELETE" => reqwest::Method::DELETE,
            other => return Err(ToolError::UnsupportedMethod(other.to_string())),
        };

        let mut request = self.client.request(method, &template.url);
        if !template.query.is_empty() {
            request = request.query(&template.query);
        }
        for (name, value) in &template.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = match &template.body {
            None => request,
            Some(RequestBody::Json(body)) => request.json(body),
            Some(RequestBody::UrlEncoded(pairs)) => request.form(pairs),
            Some(RequestBody::Raw(text)) => request.body(text.clone()),
            Some(RequestBody::Form(fields)) => request.multipart(multipart_form(fields).await?),
        };

        let request_error = |e: reqwest::Error| {
            if e.is_timeout() {
                ToolError::Timeout {
                    tool_name: tool_name.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                ToolError::Request(e.to_string())
            }
        };
        let response = request.send().await.map_err(request_error)?;
        let status = response.status();
        let text = response.text().await.map_err(request_error)?;

        if status.as_u16() >= 400 {
            warn!(status = status.as_u16(), url = %template.url, "Web tool request failed");
            return Err(ToolError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "response": text })))
    }
}

async fn multipart_form(fields: &[(String, FormValue)]) -> Result<reqwest::multipart::Form, ToolError> {
    let mut form = reqwest::multipart::Form::new();
    for (name, value) in fields {
        form = match value {
            FormValue::Text(text) => form.text(name.clone(), text.clone()),
            FormValue::File(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| ToolError::Request(format!("form file {}: {e}", path.display())))?;
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.clone());
                form.part(name.clone(), reqwest::multipart::Part::bytes(bytes).file_name(filename))
            }
        };
    }
    Ok(form)
}

/// Keep only mapped keys of an object response, renamed. An empty map or a
/// non-object response passes through unchanged.
pub fn apply_response_map(response: Value, map: &BTreeMap<String, String>) -> Value {
    if map.is_empty() {
        return response;
    }
    let Value::Object(source) = response else {
        return response;
    };
    let mapped: Map<String, Value> = map
        .iter()
        .filter_map(|(from, to)| source.get(from).map(|v| (to.clone(), v.clone())))
        .collect();
    Value::Object(mapped)
}
