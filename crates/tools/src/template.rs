//! HTTP templates written as curl commands.
//!
//! A Web tool stores its request as the curl line a developer would paste
//! from API docs. After substitution the rendered text is parsed into an
//! [`HttpTemplate`] which the web executor turns into a `reqwest` request.
//! The shorthand `METHOD url` is accepted as well.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::path::PathBuf;
use switchyard_core::error::ToolError;

/// Methods a Web tool may issue.
pub const SUPPORTED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// One `-F name=value` field.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    /// `-F name=@path`
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    UrlEncoded(Vec<(String, String)>),
    Form(Vec<(String, FormValue)>),
    Raw(String),
}

impl RequestBody {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::UrlEncoded(_) => "x-www-form-urlencoded",
            Self::Form(_) => "form-data",
            Self::Raw(_) => "raw",
        }
    }
}

/// A parsed request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpTemplate {
    pub method: String,
    /// URL without its query string
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Percent-decoded query parameters, in template order
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl HttpTemplate {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Check a stored template before it is accepted into a registry.
pub fn validate_curl(template: &str) -> Result<(), ToolError> {
    let trimmed = template.trim();
    if trimmed.is_empty() {
        return Err(ToolError::Template("template is empty".into()));
    }
    let first = trimmed.split_whitespace().next().unwrap_or_default();
    if first != "curl" && !SUPPORTED_METHODS.contains(&first.to_ascii_uppercase().as_str()) {
        return Err(ToolError::Template(
            "template must start with 'curl' or an HTTP method".into(),
        ));
    }
    if !trimmed.contains("http://") && !trimmed.contains("https://") {
        return Err(ToolError::Template("template has no http(s) URL".into()));
    }
    Ok(())
}

/// Parse a rendered template.
pub fn parse_curl(rendered: &str) -> Result<HttpTemplate, ToolError> {
    let mut tokens = tokenize(rendered)?.into_iter().peekable();

    let mut method: Option<String> = None;
    match tokens.peek().map(String::as_str) {
        Some("curl") => {
            tokens.next();
        }
        Some(m) if SUPPORTED_METHODS.contains(&m.to_ascii_uppercase().as_str()) => {
            method = Some(m.to_ascii_uppercase());
            tokens.next();
        }
        _ => {}
    }

    let mut url: Option<String> = None;
    let mut headers = Vec::new();
    let mut data: Vec<String> = Vec::new();
    let mut form: Vec<(String, FormValue)> = Vec::new();

    while let Some(token) = tokens.next() {
        let mut value_for = |flag: &str| {
            tokens
                .next()
                .ok_or_else(|| ToolError::Template(format!("flag {flag} expects a value")))
        };
        match token.as_str() {
            "-X" | "--request" => method = Some(value_for(&token)?.to_ascii_uppercase()),
            "-H" | "--header" => {
                let raw = value_for(&token)?;
                if let Some((k, v)) = raw.split_once(':') {
                    headers.push((k.trim().to_string(), v.trim().to_string()));
                }
            }
            "-d" | "--data" | "--data-raw" | "--data-binary" | "--data-ascii" => {
                data.push(value_for(&token)?);
            }
            "-F" | "--form" => {
                let raw = value_for(&token)?;
                if let Some((k, v)) = raw.split_once('=') {
                    let value = match v.strip_prefix('@') {
                        Some(path) => FormValue::File(PathBuf::from(path)),
                        None => FormValue::Text(v.to_string()),
                    };
                    form.push((k.to_string(), value));
                }
            }
            "-u" | "--user" => {
                let credentials = value_for(&token)?;
                headers.push((
                    "Authorization".into(),
                    format!("Basic {}", STANDARD.encode(credentials.as_bytes())),
                ));
            }
            "-A" | "--user-agent" => headers.push(("User-Agent".into(), value_for(&token)?)),
            "-b" | "--cookie" => headers.push(("Cookie".into(), value_for(&token)?)),
            "--url" => url = Some(value_for(&token)?),
            t if url.is_none() && (t.starts_with("http://") || t.starts_with("https://")) => {
                url = Some(t.to_string());
            }
            // -s, -L, --compressed and friends do not change the request
            _ => {}
        }
    }

    let full_url = url.ok_or_else(|| ToolError::Template("no http(s) URL found".into()))?;
    let (url, query) = split_query(&full_url);

    let body = if !form.is_empty() {
        Some(RequestBody::Form(form))
    } else if !data.is_empty() {
        Some(classify_body(data.join("&")))
    } else {
        None
    };

    let method = method.unwrap_or_else(|| if body.is_some() { "POST" } else { "GET" }.to_string());

    Ok(HttpTemplate {
        method,
        url,
        headers,
        query,
        body,
    })
}

fn classify_body(body: String) -> RequestBody {
    let body = body.trim().to_string();
    if let Ok(json) = serde_json::from_str::<Value>(&body) {
        return RequestBody::Json(json);
    }
    let form_like = body.contains('&') || !body.contains(char::is_whitespace);
    if form_like && body.contains('=') && !body.contains('{') {
        return RequestBody::UrlEncoded(decode_pairs(&body));
    }
    RequestBody::Raw(body)
}

fn split_query(full_url: &str) -> (String, Vec<(String, String)>) {
    match full_url.split_once('?') {
        Some((base, qs)) => (base.to_string(), decode_pairs(qs)),
        None => (full_url.to_string(), Vec::new()),
    }
}

fn decode_pairs(encoded: &str) -> Vec<(String, String)> {
    encoded
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(k), decode(v))
        })
        .collect()
}

fn decode(s: &str) -> String {
    let plus_as_space = s.replace('+', " ");
    urlencoding::decode(&plus_as_space)
        .map(|c| c.into_owned())
        .unwrap_or(plus_as_space)
}

/// Split a command line into words, honouring shell quoting and
/// backslash line continuations.
fn tokenize(input: &str) -> Result<Vec<String>, ToolError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(ToolError::Template("unterminated single quote".into())),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(esc @ ('"' | '\\' | '$' | '`')) => current.push(esc),
                            Some('\n') => {}
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => {
                                return Err(ToolError::Template("unterminated double quote".into()));
                            }
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(ToolError::Template("unterminated double quote".into())),
                    }
                }
            }
            '\\' => match chars.next() {
                Some('\n') => {}
                Some('\r') if chars.peek() == Some(&'\n') => {
                    chars.next();
                }
                Some(ch) => {
                    in_word = true;
                    current.push(ch);
                }
                None => {}
            },
            c if c.is_whitespace() => {
                if in_word {
                    tokens.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        tokens.push(current);
    }
    Ok(tokens)
}
