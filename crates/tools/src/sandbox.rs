//! Code tool sandbox: run a tool's script body in a fresh Lua 5.4 VM.
//!
//! Each call gets its own VM with only the `table`, `string`, `math` and
//! `utf8` libraries plus a trimmed base library. There is no `io`, `os` or
//! `package`, and the loaders that could reach the filesystem are removed.
//! `load` only accepts source text and `string.dump` is gone, so no
//! precompiled bytecode ever reaches the VM. `print` goes to the debug log
//! rather than the host's stdout.
//!
//! # Helper tables
//!
//! A [`SandboxPolicy`] decides which helper tables are installed:
//!
//! - `clock.now()`, `clock.unix()`, `clock.date(fmt)`
//! - `json.encode(value)`, `json.decode(text)`
//! - `http.request(method, url, body?, headers?) -> status, body`
//!
//! # Limits
//!
//! Memory is capped by the VM allocator. A hook fires every few thousand
//! instructions and aborts the script once the instruction budget or the
//! wall-clock deadline is spent. The whole run is also wrapped in a
//! `tokio::time::timeout` so a script blocked in `http.request` cannot
//! outlive the deadline.
//!
//! # Result
//!
//! The script hands its answer back through a global: the descriptor's
//! `output_variable` when set, otherwise `result`. When neither holds a
//! value the call reports `{"success": true}`.

use mlua::prelude::*;
use mlua::{HookTriggers, LuaOptions, StdLib, VmState};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use switchyard_config::SandboxConfig;
use switchyard_core::error::ToolError;
use switchyard_core::tool::ToolDescriptor;
use tracing::{debug, warn};

use crate::substitution::substitute;
use crate::template::SUPPORTED_METHODS;

/// Instructions between two hook checks.
const HOOK_STRIDE: u32 = 1_000;

/// Helper tables a script may be given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxHelper {
    Clock,
    Json,
    Http,
}

impl std::fmt::Display for SandboxHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxHelper::Clock => write!(f, "clock"),
            SandboxHelper::Json => write!(f, "json"),
            SandboxHelper::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for SandboxHelper {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clock" => Ok(Self::Clock),
            "json" => Ok(Self::Json),
            "http" => Ok(Self::Http),
            other => Err(format!("unknown sandbox helper '{other}'")),
        }
    }
}

/// Resource and capability limits for Code tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxPolicy {
    pub allowed_helpers: Vec<SandboxHelper>,
    pub max_memory_bytes: usize,
    pub max_instructions: u64,
    pub timeout: Duration,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

impl SandboxPolicy {
    /// Build a policy from config. Unknown helper names are skipped.
    pub fn from_config(config: &SandboxConfig) -> Self {
        let allowed_helpers = config
            .allowed_helpers
            .iter()
            .filter_map(|name| match name.parse::<SandboxHelper>() {
                Ok(helper) => Some(helper),
                Err(e) => {
                    warn!(error = %e, "Ignoring sandbox helper");
                    None
                }
            })
            .collect();
        Self {
            allowed_helpers,
            max_memory_bytes: config.max_memory_bytes,
            max_instructions: config.max_instructions,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// A policy with no helper tables at all.
    pub fn locked_down() -> Self {
        Self {
            allowed_helpers: Vec::new(),
            ..Self::default()
        }
    }

    pub fn allows(&self, helper: SandboxHelper) -> bool {
        self.allowed_helpers.contains(&helper)
    }
}

/// Runs Code tools under a [`SandboxPolicy`].
#[derive(Clone)]
pub struct Sandbox {
    policy: SandboxPolicy,
    client: reqwest::Client,
}

impl Sandbox {
    pub fn new(policy: SandboxPolicy, client: reqwest::Client) -> Self {
        Self { policy, client }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Execute a Code descriptor. Substitution runs only when the
    /// descriptor asks for it.
    pub async fn run(&self, descriptor: &ToolDescriptor, arguments: &Value) -> Result<Value, ToolError> {
        let code = if descriptor.substitute {
            substitute(&descriptor.payload, &descriptor.variable_map(), arguments)
        } else {
            descriptor.payload.clone()
        };
        self.eval(&descriptor.name, &code, arguments, descriptor.output_variable.as_deref())
            .await
    }

    /// Run `code` with `arguments` bound and read the result back.
    pub async fn eval(
        &self,
        tool_name: &str,
        code: &str,
        arguments: &Value,
        output_variable: Option<&str>,
    ) -> Result<Value, ToolError> {
        let exec_failed = |e: LuaError| ToolError::ExecutionFailed {
            tool_name: tool_name.to_string(),
            reason: e.to_string(),
        };

        let lua = self.new_vm().map_err(exec_failed)?;
        let violation = Arc::new(AtomicBool::new(false));
        self.install_limits(&lua, Arc::clone(&violation));
        lua.globals()
            .set("arguments", to_lua(&lua, arguments)?)
            .map_err(exec_failed)?;
        lua.globals().set("result", LuaNil).map_err(exec_failed)?;

        debug!(tool = %tool_name, helpers = ?self.policy.allowed_helpers, "Running code tool");
        let run = lua.load(code).set_name(tool_name).exec_async();
        match tokio::time::timeout(self.policy.timeout, run).await {
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool_name: tool_name.to_string(),
                    timeout_secs: self.policy.timeout.as_secs(),
                });
            }
            Ok(Err(e)) if violation.load(Ordering::Relaxed) => {
                return Err(ToolError::SandboxViolation(format!("{tool_name}: {}", root_message(&e))));
            }
            Ok(Err(LuaError::MemoryError(msg))) => {
                return Err(ToolError::SandboxViolation(format!(
                    "{tool_name}: memory limit of {} bytes exceeded ({msg})",
                    self.policy.max_memory_bytes
                )));
            }
            Ok(Err(e)) => return Err(exec_failed(e)),
            Ok(Ok(())) => {}
        }

        let globals = lua.globals();
        for name in output_variable.into_iter().chain(std::iter::once("result")) {
            let value: LuaValue = globals.get(name).map_err(exec_failed)?;
            if !value.is_nil() {
                return from_lua(&lua, value).map_err(exec_failed);
            }
        }
        Ok(json!({ "success": true }))
    }

    fn new_vm(&self) -> LuaResult<Lua> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            LuaOptions::new(),
        )?;
        lua.set_memory_limit(self.policy.max_memory_bytes)?;

        let globals = lua.globals();
        for name in ["dofile", "loadfile", "require", "collectgarbage"] {
            globals.set(name, LuaNil)?;
        }
        lua.load(TEXT_ONLY_LOAD).set_name("sandbox").exec()?;
        globals.set(
            "print",
            lua.create_function(|lua, args: LuaMultiValue| {
                let tostring: LuaFunction = lua.globals().get("tostring")?;
                let parts = args
                    .into_iter()
                    .map(|v| tostring.call::<String>(v))
                    .collect::<LuaResult<Vec<_>>>()?;
                debug!(output = %parts.join("\t"), "Script print");
                Ok(())
            })?,
        )?;
        if self.policy.allows(SandboxHelper::Clock) {
            globals.set("clock", clock_table(&lua)?)?;
        }
        if self.policy.allows(SandboxHelper::Json) {
            globals.set("json", json_table(&lua)?)?;
        }
        if self.policy.allows(SandboxHelper::Http) {
            globals.set("http", http_table(&lua, self.client.clone())?)?;
        }
        Ok(lua)
    }

    fn install_limits(&self, lua: &Lua, violation: Arc<AtomicBool>) {
        let budget = self.policy.max_instructions;
        let deadline = Instant::now() + self.policy.timeout;
        let executed = AtomicU64::new(0);
        let _ = lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_STRIDE),
            move |_, _| {
                let total = executed.fetch_add(u64::from(HOOK_STRIDE), Ordering::Relaxed) + u64::from(HOOK_STRIDE);
                if budget > 0 && total > budget {
                    violation.store(true, Ordering::Relaxed);
                    return Err(LuaError::runtime(format!("instruction budget of {budget} exhausted")));
                }
                if Instant::now() > deadline {
                    violation.store(true, Ordering::Relaxed);
                    return Err(LuaError::runtime("wall-clock deadline exceeded"));
                }
                Ok(VmState::Continue)
            },
        );
    }
}

/// Rebinds `load` to text mode and drops `string.dump`. An explicit `env`
/// argument is forwarded only when the caller passed one, since a nil
/// fourth argument would blank the chunk's globals.
const TEXT_ONLY_LOAD: &str = r##"
local raw_load = load
load = function(chunk, name, _mode, ...)
    if select("#", ...) > 0 then
        return raw_load(chunk, name, "t", ...)
    end
    return raw_load(chunk, name, "t")
end
string.dump = nil
"##;

fn to_lua(lua: &Lua, value: &Value) -> Result<LuaValue, ToolError> {
    lua.to_value_with(value, serialize_options())
        .map_err(|e| ToolError::InvalidArguments(format!("arguments are not representable in the sandbox: {e}")))
}

fn from_lua(lua: &Lua, value: LuaValue) -> LuaResult<Value> {
    lua.from_value_with(value, LuaDeserializeOptions::new().deny_unsupported_types(false))
}

/// JSON null maps to nil so scripts can test fields with `== nil`.
fn serialize_options() -> LuaSerializeOptions {
    LuaSerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false)
}

fn root_message(e: &LuaError) -> String {
    match e {
        LuaError::CallbackError { cause, .. } => root_message(cause),
        LuaError::RuntimeError(msg) => msg.clone(),
        other => other.to_string(),
    }
}

fn clock_table(lua: &Lua) -> LuaResult<LuaTable> {
    let clock = lua.create_table()?;
    clock.set(
        "now",
        lua.create_function(|_, ()| Ok(chrono::Utc::now().to_rfc3339()))?,
    )?;
    clock.set(
        "unix",
        lua.create_function(|_, ()| Ok(chrono::Utc::now().timestamp()))?,
    )?;
    clock.set(
        "date",
        lua.create_function(|_, fmt: Option<String>| {
            let fmt = fmt.unwrap_or_else(|| "%Y-%m-%d %H:%M:%S".into());
            let mut out = String::new();
            write!(out, "{}", chrono::Local::now().format(&fmt))
                .map_err(|_| LuaError::runtime(format!("invalid date format '{fmt}'")))?;
            Ok(out)
        })?,
    )?;
    Ok(clock)
}

fn json_table(lua: &Lua) -> LuaResult<LuaTable> {
    let table = lua.create_table()?;
    table.set(
        "encode",
        lua.create_function(|lua, value: LuaValue| {
            let json = from_lua(lua, value)?;
            Ok(json.to_string())
        })?,
    )?;
    table.set(
        "decode",
        lua.create_function(|lua, text: String| {
            let json: Value = serde_json::from_str(&text).map_err(LuaError::external)?;
            lua.to_value_with(&json, serialize_options())
        })?,
    )?;
    Ok(table)
}

fn http_table(lua: &Lua, client: reqwest::Client) -> LuaResult<LuaTable> {
    let table = lua.create_table()?;
    let request = lua.create_async_function(
        move |_, (method, url, body, headers): (String, String, Option<String>, Option<HashMap<String, String>>)| {
            let client = client.clone();
            async move {
                let method = method.to_ascii_uppercase();
                if !SUPPORTED_METHODS.contains(&method.as_str()) {
                    return Err(LuaError::runtime(format!("unsupported HTTP method '{method}'")));
                }
                let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(LuaError::external)?;
                let mut req = client.request(method, &url);
                for (name, value) in headers.unwrap_or_default() {
                    req = req.header(name, value);
                }
                if let Some(body) = body {
                    req = req.body(body);
                }
                let response = req.send().await.map_err(LuaError::external)?;
                let status = response.status().as_u16();
                let text = response.text().await.map_err(LuaError::external)?;
                Ok((status, text))
            }
        },
    )?;
    table.set("request", request)?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::tool::ToolKind;

    fn sandbox(policy: SandboxPolicy) -> Sandbox {
        Sandbox::new(policy, reqwest::Client::new())
    }

    #[tokio::test]
    async fn result_binding_is_returned() {
        let tool = ToolDescriptor::new("double", ToolKind::Code, "result = { value = arguments.n * 2 }");
        let out = sandbox(SandboxPolicy::default())
            .run(&tool, &json!({"n": 21}))
            .await
            .unwrap();
        assert_eq!(out, json!({"value": 42}));
    }

    #[tokio::test]
    async fn output_variable_wins_over_result() {
        let mut tool = ToolDescriptor::new("pick", ToolKind::Code, "answer = 'yes'\nresult = 'no'");
        tool.output_variable = Some("answer".into());
        let out = sandbox(SandboxPolicy::default()).run(&tool, &json!({})).await.unwrap();
        assert_eq!(out, json!("yes"));
    }

    #[tokio::test]
    async fn no_binding_reports_success_marker() {
        let tool = ToolDescriptor::new("noop", ToolKind::Code, "local x = 1");
        let out = sandbox(SandboxPolicy::default()).run(&tool, &json!({})).await.unwrap();
        assert_eq!(out, json!({"success": true}));
    }

    #[tokio::test]
    async fn substitution_only_when_enabled() {
        let mut tool = ToolDescriptor::new("greet", ToolKind::Code, "result = '{name}'");
        let sb = sandbox(SandboxPolicy::default());
        let out = sb.run(&tool, &json!({"name": "Ana"})).await.unwrap();
        assert_eq!(out, json!("Ana"));

        tool.substitute = false;
        let out = sb.run(&tool, &json!({"name": "Ana"})).await.unwrap();
        assert_eq!(out, json!("{name}"));
    }

    #[tokio::test]
    async fn host_access_is_removed() {
        let sb = sandbox(SandboxPolicy::default());
        let out = sb
            .eval(
                "host",
                "result = { io = io == nil, os = os == nil, require = require == nil, dofile = dofile == nil }",
                &json!({}),
                None,
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"io": true, "os": true, "require": true, "dofile": true}));

        // Bytecode can neither be produced nor loaded
        let code = r#"
local header = "\27Lua"
local chunk, err = load(header .. "\84\0", "bin", "b")
result = { dump = string.dump == nil, rejected = chunk == nil, err = tostring(err) }
"#;
        let out = sb.eval("bytecode", code, &json!({}), None).await.unwrap();
        assert_eq!(out["dump"], true);
        assert_eq!(out["rejected"], true);
        assert!(out["err"].as_str().unwrap().contains("binary chunk"), "{out}");
    }

    #[tokio::test]
    async fn source_load_still_works() {
        let code = r#"
local add = load("return 2 + 3")
local scoped = load("return x", "scoped", "bt", { x = 9 })
result = { add = add(), scoped = scoped() }
"#;
        let out = sandbox(SandboxPolicy::default()).eval("load", code, &json!({}), None).await.unwrap();
        assert_eq!(out, json!({"add": 5, "scoped": 9}));
    }

    #[tokio::test]
    async fn print_is_captured() {
        let out = sandbox(SandboxPolicy::default())
            .eval("print", "print('hello', 1, nil, {}) result = 'done'", &json!({}), None)
            .await
            .unwrap();
        assert_eq!(out, json!("done"));
    }

    #[tokio::test]
    async fn helpers_follow_policy() {
        let code = "result = { has_json = json ~= nil, has_clock = clock ~= nil }";
        let open = sandbox(SandboxPolicy::default()).eval("p", code, &json!({}), None).await.unwrap();
        assert_eq!(open, json!({"has_json": true, "has_clock": true}));

        let closed = sandbox(SandboxPolicy::locked_down()).eval("p", code, &json!({}), None).await.unwrap();
        assert_eq!(closed, json!({"has_json": false, "has_clock": false}));
    }

    #[tokio::test]
    async fn json_helper_roundtrips() {
        let code = r#"local t = json.decode('{"a":[1,2,3]}')
result = { n = #t.a, text = json.encode({ ok = true }) }"#;
        let out = sandbox(SandboxPolicy::default()).eval("j", code, &json!({}), None).await.unwrap();
        assert_eq!(out["n"], 3);
        assert_eq!(out["text"], "{\"ok\":true}");
    }

    #[tokio::test]
    async fn runaway_loop_hits_instruction_budget() {
        let policy = SandboxPolicy {
            max_instructions: 50_000,
            ..SandboxPolicy::default()
        };
        let err = sandbox(policy)
            .eval("spin", "while true do end", &json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation(ref m) if m.contains("instruction budget")), "{err}");
    }

    #[tokio::test]
    async fn runtime_fault_is_execution_error() {
        let err = sandbox(SandboxPolicy::default())
            .eval("boom", "error('kaboom')", &json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { ref reason, .. } if reason.contains("kaboom")));
    }

    #[test]
    fn policy_from_config_skips_unknown_helpers() {
        let config = SandboxConfig {
            allowed_helpers: vec!["clock".into(), "shell".into()],
            ..SandboxConfig::default()
        };
        let policy = SandboxPolicy::from_config(&config);
        assert_eq!(policy.allowed_helpers, vec![SandboxHelper::Clock]);
        assert!(!policy.allows(SandboxHelper::Http));
    }

    #[test]
    fn helper_display_and_parse() {
        assert_eq!(SandboxHelper::Json.to_string(), "json");
        assert_eq!("http".parse::<SandboxHelper>(), Ok(SandboxHelper::Http));
        assert!("fs".parse::<SandboxHelper>().is_err());
    }
}
