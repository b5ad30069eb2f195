// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Script execution: validate, compile (cached), execute, report.
//!
//! Every execution walks `Created → Validating → Compiling → Executing` and
//! ends in `Completed`, `TimedOut` or `Faulted`. Execution is synchronous on
//! the calling thread; when it returns, nothing from the script is left
//! running.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::crypto::sha256_hex;
use crate::error::{EnclaveError, ErrorKind};
use crate::registry::RegisteredFunction;

use super::ast::Program;
use super::builtins::install_globals;
use super::interpreter::{Control, Flow, Interpreter};
use super::lexer::Lexer;
use super::limits::{Abort, Budget, SandboxLimits};
use super::parser::parse_program;
use super::validate::{check_source, check_tokens};
use super::value::{ObjectMap, Value};
use super::ScriptHost;

/// Number of compiled programs kept in memory.
pub const COMPILED_CACHE_CAPACITY: usize = 128;

/// Phase of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Created,
    Validating,
    Compiling,
    Executing,
    Completed,
    TimedOut,
    Faulted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerContext {
    #[serde(default)]
    pub blockchain_type: String,
    #[serde(default)]
    pub caller: String,
    #[serde(default)]
    pub timestamp_hint: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub function_id: String,
    #[serde(default)]
    pub parameters_json: String,
    #[serde(default)]
    pub caller_context: CallerContext,
    /// Zero means the configured ceiling.
    #[serde(default)]
    pub timeout_ms: u64,
    /// Zero means the configured ceiling.
    #[serde(default)]
    pub max_output_bytes: usize,
}

impl ExecutionRequest {
    pub fn new(function_id: impl Into<String>, parameters_json: impl Into<String>) -> Self {
        Self {
            function_id: function_id.into(),
            parameters_json: parameters_json.into(),
            caller_context: CallerContext::default(),
            timeout_ms: 0,
            max_output_bytes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub logs: Vec<String>,
    pub state: ExecutionState,
}

impl ExecutionResult {
    fn completed(output_json: String, started: Instant, logs: Vec<String>) -> Self {
        Self {
            success: true,
            output_json: Some(output_json),
            error_kind: None,
            error_message: None,
            duration_ms: started.elapsed().as_millis() as u64,
            logs,
            state: ExecutionState::Completed,
        }
    }

    fn failed(error: EnclaveError, started: Instant, logs: Vec<String>) -> Self {
        let state = match error.kind {
            ErrorKind::Timeout => ExecutionState::TimedOut,
            _ => ExecutionState::Faulted,
        };
        Self {
            success: false,
            output_json: None,
            error_kind: Some(error.kind),
            error_message: Some(error.message),
            duration_ms: started.elapsed().as_millis() as u64,
            logs,
            state,
        }
    }

    /// The failure as a structured error, if the execution failed.
    pub fn error(&self) -> Option<EnclaveError> {
        self.error_kind.map(|kind| {
            EnclaveError::new(kind, self.error_message.clone().unwrap_or_default())
        })
    }
}

/// Compiles and runs scripts under the boundary's sandbox limits.
pub struct ScriptRuntime {
    limits: SandboxLimits,
    compiled: Mutex<LruCache<String, Arc<Program>>>,
}

impl ScriptRuntime {
    pub fn new(limits: SandboxLimits) -> Self {
        let capacity = NonZeroUsize::new(COMPILED_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            limits,
            compiled: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    pub fn cached_programs(&self) -> usize {
        self.compiled.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Validate and compile `source`, reusing a cached program with the same
    /// source hash.
    pub fn compile(&self, source: &str) -> Result<Arc<Program>, EnclaveError> {
        let source_hash = sha256_hex(source.as_bytes());
        if let Some(program) = self
            .compiled
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(&source_hash).cloned())
        {
            return Ok(program);
        }

        check_source(source, self.limits.max_source_bytes)?;
        let tokens = Lexer::new(source).tokenize().map_err(script_error)?;
        check_tokens(&tokens)?;
        let program = Arc::new(parse_program(tokens, source_hash.clone()).map_err(script_error)?);

        if let Ok(mut cache) = self.compiled.lock() {
            cache.put(source_hash, program.clone());
        }
        Ok(program)
    }

    /// Run `function` for `request`. Failures are reported in the result,
    /// never as a panic or an `Err`.
    pub fn execute(
        &self,
        function: &RegisteredFunction,
        request: &ExecutionRequest,
        host: &dyn ScriptHost,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        let function_id = function.function_id.as_str();
        let phase = |state: ExecutionState| {
            tracing::debug!(function_id = %function_id, state = ?state, "Script phase");
        };
        phase(ExecutionState::Created);

        phase(ExecutionState::Validating);
        if let Err(e) = check_source(&function.source, self.limits.max_source_bytes) {
            return self.finish(function_id, ExecutionResult::failed(e, started, Vec::new()));
        }

        phase(ExecutionState::Compiling);
        let program = match self.compile(&function.source) {
            Ok(program) => program,
            Err(e) => {
                return self.finish(function_id, ExecutionResult::failed(e, started, Vec::new()))
            }
        };

        phase(ExecutionState::Executing);
        let limits = self
            .limits
            .for_request(request.timeout_ms, request.max_output_bytes);
        let mut interp = Interpreter::new(Budget::new(&limits, cancel), host);

        let outcome = run(&mut interp, &program, function, request);
        let outcome = match outcome {
            Ok(output) if output.len() > limits.max_output_bytes => Err(EnclaveError::new(
                ErrorKind::ResourceLimitExceeded,
                format!(
                    "output is {} bytes, limit is {}",
                    output.len(),
                    limits.max_output_bytes
                ),
            )),
            Ok(output) => Ok(output),
            Err(control) => Err(control_to_error(control).scrubbed(&interp.sensitive())),
        };
        let logs = interp.take_logs();
        drop(interp);

        let result = match outcome {
            Ok(output) => ExecutionResult::completed(output, started, logs),
            Err(e) => ExecutionResult::failed(e, started, logs),
        };
        self.finish(function_id, result)
    }

    fn finish(&self, function_id: &str, result: ExecutionResult) -> ExecutionResult {
        match &result.error_kind {
            None => tracing::debug!(
                function_id = %function_id,
                duration_ms = result.duration_ms,
                "Script completed"
            ),
            Some(kind) => tracing::info!(
                function_id = %function_id,
                error_kind = %kind,
                state = ?result.state,
                duration_ms = result.duration_ms,
                "Script failed"
            ),
        }
        result
    }
}

fn script_error(err: impl std::fmt::Display) -> EnclaveError {
    EnclaveError::new(ErrorKind::ScriptError, err.to_string())
}

/// Run the program body, then its entry point. Returns the JSON output.
fn run(
    interp: &mut Interpreter<'_>,
    program: &Program,
    function: &RegisteredFunction,
    request: &ExecutionRequest,
) -> Flow<String> {
    install_globals(interp, context_object(function, request))?;
    interp.run_program(program)?;

    let entry = [function.function_id.as_str(), "main"]
        .into_iter()
        .filter_map(|name| interp.global(name))
        .find(Value::is_callable)
        .or_else(|| match program.functions.as_slice() {
            [only] => interp.global(only),
            _ => None,
        });
    let Some(entry) = entry else {
        return Err(Abort::Host(EnclaveError::new(
            ErrorKind::ScriptError,
            "no entry point: define main or a function named after the function id",
        ))
        .into());
    };

    let args = bind_arguments(interp, &entry, &request.parameters_json)?;
    let value = interp.call_value(&entry, args)?;
    let json = value.to_json().map_err(|message| {
        Control::Abort(Abort::Host(EnclaveError::new(
            ErrorKind::ScriptError,
            format!("result is not serializable: {message}"),
        )))
    })?;
    serde_json::to_string(&json).map_err(|e| {
        Control::Abort(Abort::Host(EnclaveError::new(ErrorKind::ScriptError, e.to_string())))
    })
}

fn context_object(function: &RegisteredFunction, request: &ExecutionRequest) -> ObjectMap {
    let ctx = &request.caller_context;
    let timestamp = ctx
        .timestamp_hint
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    let mut map = ObjectMap::default();
    map.set("functionId", Value::str(&function.function_id));
    map.set("blockchainType", Value::str(&ctx.blockchain_type));
    map.set("caller", Value::str(&ctx.caller));
    map.set("timestamp", Value::Number(timestamp as f64));
    map
}

/// Bind request parameters to the entry point's arguments.
fn bind_arguments(
    interp: &mut Interpreter<'_>,
    entry: &Value,
    parameters_json: &str,
) -> Flow<Vec<Value>> {
    if parameters_json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let json: serde_json::Value = serde_json::from_str(parameters_json).map_err(|_| {
        Control::Abort(Abort::Host(EnclaveError::invalid_argument(
            "parametersJson is not valid JSON",
        )))
    })?;
    let params = Interpreter::params_of(entry);

    match (&json, params) {
        (serde_json::Value::Object(map), Some(params)) => {
            if let [only] = params.as_slice() {
                if !map.contains_key(only) {
                    return Ok(vec![interp.value_from_json(&json)?]);
                }
            }
            let mut args = Vec::with_capacity(params.len());
            for name in &params {
                args.push(match map.get(name) {
                    Some(value) => interp.value_from_json(value)?,
                    None => Value::Undefined,
                });
            }
            Ok(args)
        }
        (serde_json::Value::Array(items), _) => {
            let mut args = Vec::with_capacity(items.len());
            for item in items {
                args.push(interp.value_from_json(item)?);
            }
            Ok(args)
        }
        (other, _) => Ok(vec![interp.value_from_json(other)?]),
    }
}

fn control_to_error(control: Control) -> EnclaveError {
    match control {
        Control::Abort(abort) => EnclaveError::new(abort.kind(), abort.message()),
        Control::Throw(value) => {
            EnclaveError::new(ErrorKind::ScriptError, format!("Uncaught {}", describe_thrown(&value)))
        }
        Control::Return(_) => EnclaveError::new(ErrorKind::ScriptError, "return outside a function"),
        Control::Break | Control::Continue => {
            EnclaveError::new(ErrorKind::ScriptError, "break or continue outside a loop")
        }
    }
}

fn describe_thrown(value: &Value) -> String {
    if let Value::Object(map) = value {
        let map = map.borrow();
        if let Some(message) = map.get("message") {
            let name = map
                .get("name")
                .map(Value::to_js_string)
                .unwrap_or_else(|| "Error".to_string());
            return format!("{name}: {}", message.to_js_string());
        }
    }
    value.display()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zeroize::Zeroizing;

    /// Host with one secret and a configurable blockchain delay.
    struct TestHost {
        chain_delay: Duration,
    }

    impl TestHost {
        fn new() -> Self {
            Self {
                chain_delay: Duration::ZERO,
            }
        }
    }

    impl ScriptHost for TestHost {
        fn secret(&self, secret_id: &str) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
            match secret_id {
                "api-key" => Ok(Zeroizing::new(b"s3cr3t".to_vec())),
                other => Err(EnclaveError::not_found(format!("secret {other} not found"))),
            }
        }

        fn call_contract(
            &self,
            _address: &str,
            method: &str,
            params: &serde_json::Value,
            _timeout: Duration,
        ) -> Result<serde_json::Value, EnclaveError> {
            Ok(serde_json::json!({ "method": method, "params": params }))
        }

        fn get_balance(&self, _address: &str, timeout: Duration) -> Result<String, EnclaveError> {
            std::thread::sleep(self.chain_delay.min(timeout + Duration::from_millis(50)));
            Ok("1000".to_string())
        }

        fn get_storage(
            &self,
            _address: &str,
            _slot: &str,
            _timeout: Duration,
        ) -> Result<String, EnclaveError> {
            Ok("0x01".to_string())
        }
    }

    fn limits() -> SandboxLimits {
        SandboxLimits {
            max_memory_bytes: 8 * 1024 * 1024,
            max_time: Duration::from_secs(5),
            max_output_bytes: 64 * 1024,
            max_source_bytes: 64 * 1024,
            host_call_timeout: Duration::from_secs(2),
        }
    }

    fn function(id: &str, source: &str) -> RegisteredFunction {
        RegisteredFunction {
            function_id: id.to_string(),
            source_hash: sha256_hex(source.as_bytes()),
            source: source.to_string(),
            registered_at: Utc::now(),
        }
    }

    fn run_with(runtime: &ScriptRuntime, source: &str, request: ExecutionRequest) -> ExecutionResult {
        runtime.execute(
            &function(&request.function_id, source),
            &request,
            &TestHost::new(),
            CancellationToken::new(),
        )
    }

    fn run_script(source: &str, params: &str) -> ExecutionResult {
        run_with(
            &ScriptRuntime::new(limits()),
            source,
            ExecutionRequest::new("f", params),
        )
    }

    fn output(source: &str, params: &str) -> String {
        let result = run_script(source, params);
        assert!(result.success, "{:?}", result.error_message);
        result.output_json.unwrap_or_default()
    }

    #[test]
    fn doubles_a_number() {
        let result = run_with(
            &ScriptRuntime::new(limits()),
            "function double(x) { return x * 2; }",
            ExecutionRequest::new("double", r#"{"x":21}"#),
        );
        assert!(result.success);
        assert_eq!(result.output_json.as_deref(), Some("42"));
        assert_eq!(result.state, ExecutionState::Completed);
    }

    #[test]
    fn parameter_binding_rules() {
        let src = "function main(a, b) { return [a, b]; }";
        assert_eq!(output(src, r#"{"b": 2, "a": 1}"#), "[1,2]");
        assert_eq!(output(src, "[3, 4]"), "[3,4]");
        assert_eq!(output(src, "7"), "[7,null]");
        assert_eq!(output(src, ""), "[null,null]");

        let whole = "function main(request) { return request.amount; }";
        assert_eq!(output(whole, r#"{"amount": 5}"#), "5");
    }

    #[test]
    fn entry_point_resolution() {
        assert_eq!(output("function helper() { return 1; }", ""), "1");
        assert_eq!(
            output("function a() { return 1; }\nfunction main() { return a() + 1; }", ""),
            "2"
        );
        let result = run_script("function a() {}\nfunction b() {}", "");
        assert_eq!(result.error_kind, Some(ErrorKind::ScriptError));
    }

    #[test]
    fn undefined_result_is_null() {
        assert_eq!(output("function main() {}", ""), "null");
    }

    #[test]
    fn language_features() {
        let src = r#"
            const rate = 3;
            function main(items) {
                let total = 0;
                for (const item of items) {
                    if (item.skip) continue;
                    total += item.price * rate;
                }
                const names = items.filter(i => !i.skip).map(i => i.name.toUpperCase());
                const counter = (() => { let n = 0; return () => ++n; })();
                counter(); counter();
                let kind;
                switch (names.length) {
                    case 1: kind = "one"; break;
                    case 2: kind = "two"; break;
                    default: kind = "many";
                }
                let caught = null;
                try { null.x; } catch (e) { caught = e.name; }
                const parsed = JSON.parse('{"k": [1, 2, 3]}');
                return {
                    total,
                    names: names.join("|"),
                    count: counter(),
                    kind,
                    caught,
                    sum: parsed.k.reduce((a, b) => a + b, 0),
                    label: `total=${total.toFixed(1)}`,
                    type: typeof missing,
                    keys: Object.keys({ x: 1, y: 2 }),
                };
            }
        "#;
        let params = r#"[[{"name":"a","price":2},{"name":"b","price":5,"skip":true},{"name":"c","price":1}]]"#;
        let out: serde_json::Value = serde_json::from_str(&output(src, params)).unwrap();
        assert_eq!(out["total"], 9);
        assert_eq!(out["names"], "A|C");
        assert_eq!(out["count"], 3);
        assert_eq!(out["kind"], "two");
        assert_eq!(out["caught"], "TypeError");
        assert_eq!(out["sum"], 6);
        assert_eq!(out["label"], "total=9.0");
        assert_eq!(out["type"], "undefined");
        assert_eq!(out["keys"], serde_json::json!(["x", "y"]));
    }

    #[test]
    fn context_is_read_only() {
        let mut request = ExecutionRequest::new("f", "");
        request.caller_context = CallerContext {
            blockchain_type: "neo-n3".into(),
            caller: "owner1".into(),
            timestamp_hint: Some(1_700_000_000_000),
        };
        let runtime = ScriptRuntime::new(limits());
        let result = run_with(
            &runtime,
            "function main() { return [context.caller, context.blockchainType, context.timestamp]; }",
            request.clone(),
        );
        assert_eq!(
            result.output_json.as_deref(),
            Some(r#"["owner1","neo-n3",1700000000000]"#)
        );

        let result = run_with(&runtime, "function main() { context.caller = 'x'; }", request);
        assert_eq!(result.error_kind, Some(ErrorKind::ScriptError));
    }

    #[test]
    fn infinite_loop_times_out() {
        let mut request = ExecutionRequest::new("f", "");
        request.timeout_ms = 200;
        let started = Instant::now();
        let result = run_with(
            &ScriptRuntime::new(limits()),
            "function main() { while (true) {} }",
            request,
        );
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(result.state, ExecutionState::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn timeout_cannot_be_caught() {
        let mut request = ExecutionRequest::new("f", "");
        request.timeout_ms = 100;
        let result = run_with(
            &ScriptRuntime::new(limits()),
            "function main() { try { for (;;) {} } catch (e) { return 'caught'; } }",
            request,
        );
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    }

    #[test]
    fn cancellation_stops_execution() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });
        let runtime = ScriptRuntime::new(limits());
        let result = runtime.execute(
            &function("f", "function main() { let i = 0; while (true) { i++; } }"),
            &ExecutionRequest::new("f", ""),
            &TestHost::new(),
            token,
        );
        handle.join().unwrap();
        assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
        assert_eq!(result.state, ExecutionState::Faulted);
    }

    #[test]
    fn secrets_are_available_and_scrubbed_from_errors() {
        assert_eq!(
            output("function main() { return secrets.get('api-key'); }", ""),
            r#""s3cr3t""#
        );

        let result = run_script(
            "function main() { const key = secrets.get('api-key'); throw 'bad key ' + key; }",
            "",
        );
        assert_eq!(result.error_kind, Some(ErrorKind::ScriptError));
        let message = result.error_message.unwrap();
        assert!(!message.contains("s3cr3t"), "{message}");
        assert!(message.contains("[redacted]"));

        let result = run_script("function main() { return secrets.get('missing'); }", "");
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
    }

    #[test]
    fn require_failure_is_reported() {
        let result = run_script(
            "function main(x) { try { require(x > 10, 'x too small'); } catch (e) { return 'caught'; } }",
            "5",
        );
        assert_eq!(result.error_kind, Some(ErrorKind::RequirementFailed));
        assert!(result.error_message.unwrap().contains("x too small"));
    }

    #[test]
    fn assert_failure_is_a_script_error() {
        let result = run_script("function main() { assert(1 === 2, 'math'); }", "");
        assert_eq!(result.error_kind, Some(ErrorKind::ScriptError));
        assert!(result.error_message.unwrap().contains("AssertionError: math"));
    }

    #[test]
    fn memory_ceiling_is_enforced() {
        let mut tight = limits();
        tight.max_memory_bytes = 64 * 1024;
        let result = run_with(
            &ScriptRuntime::new(tight),
            "function main() { let s = 'x'; while (true) { s = s + s; } }",
            ExecutionRequest::new("f", ""),
        );
        assert_eq!(result.error_kind, Some(ErrorKind::ResourceLimitExceeded));
    }

    fn run_tight(source: &str) -> ExecutionResult {
        let mut tight = limits();
        tight.max_memory_bytes = 256 * 1024;
        run_with(&ScriptRuntime::new(tight), source, ExecutionRequest::new("f", ""))
    }

    #[test]
    fn loop_temporaries_do_not_accumulate() {
        let result = run_tight(
            "function main() {
                let last = null;
                for (let i = 0; i < 50000; i++) { let o = { a: i }; o.a = i + 1; last = o.a; }
                return last;
            }",
        );
        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.output_json.as_deref(), Some("50000"));

        let result = run_tight(
            "function main() {
                let s = '';
                for (let i = 0; i < 20000; i++) { s = s + 'x'; }
                return s.length;
            }",
        );
        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.output_json.as_deref(), Some("20000"));
    }

    #[test]
    fn retained_values_still_hit_the_ceiling() {
        let result = run_tight(
            "function main() { let keep = []; while (true) { keep.push({ a: keep.length }); } }",
        );
        assert_eq!(result.error_kind, Some(ErrorKind::ResourceLimitExceeded));
    }

    #[test]
    fn output_ceiling_is_enforced() {
        let mut request = ExecutionRequest::new("f", "");
        request.max_output_bytes = 16;
        let result = run_with(
            &ScriptRuntime::new(limits()),
            "function main() { return 'a'.repeat(100); }",
            request,
        );
        assert_eq!(result.error_kind, Some(ErrorKind::ResourceLimitExceeded));
        assert!(result.output_json.is_none());
    }

    #[test]
    fn deep_recursion_hits_call_depth() {
        let handle = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| run_script("function main() { return main(); }", ""))
            .unwrap();
        let result = handle.join().unwrap();
        assert_eq!(result.error_kind, Some(ErrorKind::ResourceLimitExceeded));
    }

    #[test]
    fn disallowed_source_is_rejected_before_running() {
        let result = run_script("function main() { return eval('1'); }", "");
        assert_eq!(result.error_kind, Some(ErrorKind::ScriptError));
        assert_eq!(result.state, ExecutionState::Faulted);

        let result = run_script("function main( {", "");
        assert_eq!(result.error_kind, Some(ErrorKind::ScriptError));
    }

    #[test]
    fn logs_are_collected() {
        let result = run_script(
            "function main() { log('a', 1); console.warn({k: true}); return 0; }",
            "",
        );
        assert_eq!(result.logs, vec!["a 1".to_string(), r#"[warn] {"k":true}"#.to_string()]);
    }

    #[test]
    fn blockchain_callbacks() {
        let out = output(
            "function main() { return [blockchain.getBalance('0xabc'), blockchain.callContract('0xabc', 'totalSupply', [1]).method]; }",
            "",
        );
        assert_eq!(out, r#"["1000","totalSupply"]"#);
    }

    #[test]
    fn slow_blockchain_callback_is_unavailable() {
        let mut tight = limits();
        tight.host_call_timeout = Duration::from_millis(20);
        let runtime = ScriptRuntime::new(tight);
        let host = TestHost {
            chain_delay: Duration::from_millis(200),
        };
        let result = runtime.execute(
            &function("f", "function main() { return blockchain.getBalance('0xabc'); }"),
            &ExecutionRequest::new("f", ""),
            &host,
            CancellationToken::new(),
        );
        assert_eq!(result.error_kind, Some(ErrorKind::BlockchainUnavailable));
    }

    #[test]
    fn compiled_programs_are_cached_by_hash() {
        let runtime = ScriptRuntime::new(limits());
        let src = "function main() { return 1; }";
        let first = runtime.compile(src).unwrap();
        let second = runtime.compile(src).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(runtime.cached_programs(), 1);
        assert_eq!(first.source_hash, sha256_hex(src.as_bytes()));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let result = run_script("function main(x) { return x; }", "{not json");
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidArgument));
    }
}
