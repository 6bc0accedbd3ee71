//! Tree-walking interpreter for compiled map functions.

use super::ast::{BinaryOp, Expr, Function, LogicalOp, Stmt, UnaryOp};
use super::parser::parse_function;
use super::{EvalError, MapContext, MapEngine};
use crate::core::MapResult;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

/// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Loop iterations one function may run for one document.
pub const MAX_LOOP_ITERATIONS: u64 = 10_000_000;

#[derive(Debug, Clone, PartialEq)]
enum JsValue {
    Undefined,
    Json(Value),
    /// NaN and the infinities, which JSON cannot hold.
    NonFinite(f64),
    Builtin(Builtin),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Emit,
    Sum,
    DecodeBase64,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return,
}

// ============================================================================
// Engine and context
// ============================================================================

/// Built-in map engine for JavaScript-style map functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptEngine;

impl MapEngine for ScriptEngine {
    type Context = ScriptContext;

    fn init(&self, sources: &[String]) -> Result<ScriptContext, EvalError> {
        let functions = sources
            .iter()
            .map(|source| parse_function(source))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ScriptContext { functions })
    }
}

/// Compiled map functions, evaluated in the order they were supplied.
#[derive(Debug)]
pub struct ScriptContext {
    functions: Vec<Function>,
}

impl MapContext for ScriptContext {
    fn function_count(&self) -> usize {
        self.functions.len()
    }

    fn map_doc(&mut self, doc: &str) -> Result<Vec<Vec<MapResult>>, EvalError> {
        let doc: Value = serde_json::from_str(doc).map_err(|e| EvalError::InvalidDocument(e.to_string()))?;
        if !doc.is_object() {
            return Err(EvalError::NotAnObject);
        }

        self.functions
            .iter()
            .map(|function| Interpreter::default().call(function, &doc))
            .collect()
    }
}

// ============================================================================
// Interpreter
// ============================================================================

#[derive(Default)]
struct Interpreter {
    scope: HashMap<String, JsValue>,
    emitted: Vec<MapResult>,
    iterations: u64,
}

impl Interpreter {
    fn call(mut self, function: &Function, doc: &Value) -> Result<Vec<MapResult>, EvalError> {
        for (idx, param) in function.params.iter().enumerate() {
            let arg = if idx == 0 {
                JsValue::Json(doc.clone())
            } else {
                JsValue::Undefined
            };
            self.scope.insert(param.clone(), arg);
        }

        // Declarations are function-scoped and visible before they run.
        let mut declared = Vec::new();
        collect_declarations(&function.body, &mut declared);
        for name in declared {
            self.scope.entry(name.to_string()).or_insert(JsValue::Undefined);
        }

        self.exec_block(&function.body)?;
        Ok(self.emitted)
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, EvalError> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// Count one loop iteration against the per-document budget.
    fn tick(&mut self) -> Result<(), EvalError> {
        self.iterations += 1;
        if self.iterations > MAX_LOOP_ITERATIONS {
            return Err(EvalError::IterationLimit(MAX_LOOP_ITERATIONS));
        }
        Ok(())
    }

    fn exec_loop(&mut self, cond: Option<&Expr>, step: Option<&Expr>, body: &Stmt) -> Result<Flow, EvalError> {
        loop {
            if let Some(cond) = cond {
                if !truthy(&self.eval(cond)?) {
                    return Ok(Flow::Normal);
                }
            }
            self.tick()?;
            match self.exec(body)? {
                Flow::Break => return Ok(Flow::Normal),
                Flow::Return => return Ok(Flow::Return),
                Flow::Normal | Flow::Continue => {}
            }
            if let Some(step) = step {
                self.eval(step)?;
            }
        }
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, EvalError> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::Var(bindings) => {
                for (name, init) in bindings {
                    let value = match init {
                        Some(expr) => self.eval(expr)?,
                        None => self.scope.get(name).cloned().unwrap_or(JsValue::Undefined),
                    };
                    self.scope.insert(name.clone(), value);
                }
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if truthy(&self.eval(cond)?) {
                    self.exec(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::Block(body) => self.exec_block(body),
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.exec(init)?;
                }
                self.exec_loop(cond.as_ref(), step.as_ref(), body)
            }
            Stmt::While { cond, body } => self.exec_loop(Some(cond), None, body),
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Return(value) => {
                if let Some(expr) = value {
                    self.eval(expr)?;
                }
                Ok(Flow::Return)
            }
            Stmt::Empty => Ok(Flow::Normal),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<JsValue, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(JsValue::Json(value.clone())),
            Expr::Undefined => Ok(JsValue::Undefined),
            Expr::Ident(name) => self.lookup(name),
            Expr::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item).map(into_json))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(JsValue::Json(Value::Array(values)))
            }
            Expr::Object(members) => {
                let mut object = Map::new();
                for (key, value) in members {
                    match self.eval(value)? {
                        JsValue::Undefined | JsValue::Builtin(_) => {}
                        JsValue::NonFinite(_) => {
                            object.insert(key.clone(), Value::Null);
                        }
                        JsValue::Json(v) => {
                            object.insert(key.clone(), v);
                        }
                    }
                }
                Ok(JsValue::Json(Value::Object(object)))
            }
            Expr::Member(object, name) => {
                let object = self.eval(object)?;
                get_property(&object, name)
            }
            Expr::Index(object, index) => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                get_index(&object, &index)
            }
            Expr::Call(callee, args) => {
                let target = self.eval(callee)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                match target {
                    JsValue::Builtin(builtin) => self.call_builtin(builtin, args),
                    _ => Err(EvalError::Runtime(format!(
                        "TypeError: {} is not a function",
                        describe_callee(callee)
                    ))),
                }
            }
            Expr::Unary(op, operand) => {
                let value = match (op, &**operand) {
                    // `typeof` of an undeclared name is "undefined", not an error.
                    (UnaryOp::Typeof, Expr::Ident(name)) => self.lookup(name).unwrap_or(JsValue::Undefined),
                    _ => self.eval(operand)?,
                };
                Ok(match op {
                    UnaryOp::Not => JsValue::Json(Value::Bool(!truthy(&value))),
                    UnaryOp::Neg => number(-to_number(&value)),
                    UnaryOp::Plus => number(to_number(&value)),
                    UnaryOp::Typeof => JsValue::Json(Value::String(type_of(&value).to_string())),
                })
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(binary(*op, &left, &right))
            }
            Expr::Logical(op, left, right) => {
                let left = self.eval(left)?;
                match (op, truthy(&left)) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
            Expr::Conditional(cond, then_value, else_value) => {
                if truthy(&self.eval(cond)?) {
                    self.eval(then_value)
                } else {
                    self.eval(else_value)
                }
            }
            Expr::Assign(name, value) => {
                let value = self.eval(value)?;
                self.scope.insert(name.clone(), value.clone());
                Ok(value)
            }
            Expr::Update { name, delta, prefix } => {
                let old = to_number(&self.lookup(name)?);
                let new = old + delta;
                self.scope.insert(name.clone(), number(new));
                Ok(number(if *prefix { new } else { old }))
            }
            Expr::Function(_) => Err(EvalError::Runtime(
                "SyntaxError: nested function expressions are not supported".to_string(),
            )),
        }
    }

    fn lookup(&self, name: &str) -> Result<JsValue, EvalError> {
        if let Some(value) = self.scope.get(name) {
            return Ok(value.clone());
        }
        match name {
            "emit" => Ok(JsValue::Builtin(Builtin::Emit)),
            "sum" => Ok(JsValue::Builtin(Builtin::Sum)),
            "decodeBase64" => Ok(JsValue::Builtin(Builtin::DecodeBase64)),
            "NaN" => Ok(number(f64::NAN)),
            "Infinity" => Ok(number(f64::INFINITY)),
            _ => Err(EvalError::Runtime(format!("ReferenceError: {} is not defined", name))),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<JsValue>) -> Result<JsValue, EvalError> {
        let mut args = args.into_iter();
        match builtin {
            Builtin::Emit => {
                let key = args.next().unwrap_or(JsValue::Undefined);
                let value = args.next().unwrap_or(JsValue::Undefined);
                self.emitted.push(MapResult::new(stringify(&key), stringify(&value)));
                Ok(JsValue::Undefined)
            }
            Builtin::Sum => match args.next() {
                Some(JsValue::Json(Value::Array(values))) => {
                    let total = values.iter().map(|v| to_number(&JsValue::Json(v.clone()))).sum();
                    Ok(number(total))
                }
                _ => Err(EvalError::Runtime("TypeError: sum() expects an array".to_string())),
            },
            Builtin::DecodeBase64 => match args.next() {
                Some(JsValue::Json(Value::String(encoded))) => {
                    let bytes = BASE64
                        .decode(encoded.as_bytes())
                        .map_err(|_| EvalError::Runtime("Invalid base64 source.".to_string()))?;
                    // One character per byte, as String.fromCharCode builds it.
                    let decoded = bytes.into_iter().map(char::from).collect();
                    Ok(JsValue::Json(Value::String(decoded)))
                }
                _ => Err(EvalError::Runtime("TypeError: decodeBase64() expects a string".to_string())),
            },
        }
    }
}

/// Names declared with `var`, `let` or `const` anywhere in `body`.
fn collect_declarations<'a>(body: &'a [Stmt], names: &mut Vec<&'a str>) {
    for stmt in body {
        collect_declaration(stmt, names);
    }
}

fn collect_declaration<'a>(stmt: &'a Stmt, names: &mut Vec<&'a str>) {
    match stmt {
        Stmt::Var(bindings) => names.extend(bindings.iter().map(|(name, _)| name.as_str())),
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            collect_declaration(then_branch, names);
            if let Some(else_branch) = else_branch {
                collect_declaration(else_branch, names);
            }
        }
        Stmt::Block(body) => collect_declarations(body, names),
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                collect_declaration(init, names);
            }
            collect_declaration(body, names);
        }
        Stmt::While { body, .. } => collect_declaration(body, names),
        Stmt::Expr(_) | Stmt::Break | Stmt::Continue | Stmt::Return(_) | Stmt::Empty => {}
    }
}

// ============================================================================
// Value semantics
// ============================================================================

/// JSON number for an f64, printing integral values without a fraction.
/// Non-finite values become `null`, as `JSON.stringify` does.
pub(crate) fn number_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn number(n: f64) -> JsValue {
    if n.is_finite() {
        JsValue::Json(number_value(n))
    } else {
        JsValue::NonFinite(n)
    }
}

fn into_json(value: JsValue) -> Value {
    match value {
        JsValue::Json(v) => v,
        JsValue::Undefined | JsValue::NonFinite(_) | JsValue::Builtin(_) => Value::Null,
    }
}

fn stringify(value: &JsValue) -> String {
    match value {
        JsValue::Json(v) => v.to_string(),
        JsValue::Undefined | JsValue::NonFinite(_) | JsValue::Builtin(_) => "null".to_string(),
    }
}

fn truthy(value: &JsValue) -> bool {
    match value {
        JsValue::Undefined => false,
        JsValue::NonFinite(n) => !n.is_nan(),
        JsValue::Builtin(_) => true,
        JsValue::Json(v) => match v {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        },
    }
}

fn to_number(value: &JsValue) -> f64 {
    match value {
        JsValue::Undefined | JsValue::Builtin(_) => f64::NAN,
        JsValue::NonFinite(n) => *n,
        JsValue::Json(v) => match v {
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Array(_) | Value::Object(_) => f64::NAN,
        },
    }
}

fn to_js_string(value: &JsValue) -> String {
    match value {
        JsValue::Undefined => "undefined".to_string(),
        JsValue::NonFinite(n) => format_number(*n),
        JsValue::Builtin(_) => "function".to_string(),
        JsValue::Json(v) => match v {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Null => String::new(),
                    other => to_js_string(&JsValue::Json(other.clone())),
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
        },
    }
}

fn type_of(value: &JsValue) -> &'static str {
    match value {
        JsValue::Undefined => "undefined",
        JsValue::NonFinite(_) => "number",
        JsValue::Builtin(_) => "function",
        JsValue::Json(v) => match v {
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
        },
    }
}

fn get_property(object: &JsValue, name: &str) -> Result<JsValue, EvalError> {
    match object {
        JsValue::Undefined => Err(EvalError::Runtime(format!(
            "TypeError: Cannot read property '{}' of undefined",
            name
        ))),
        JsValue::Json(Value::Null) => Err(EvalError::Runtime(format!(
            "TypeError: Cannot read property '{}' of null",
            name
        ))),
        JsValue::Json(Value::Object(map)) => Ok(map.get(name).cloned().map_or(JsValue::Undefined, JsValue::Json)),
        JsValue::Json(Value::Array(items)) if name == "length" => Ok(number(items.len() as f64)),
        JsValue::Json(Value::String(s)) if name == "length" => Ok(number(s.encode_utf16().count() as f64)),
        _ => Ok(JsValue::Undefined),
    }
}

fn get_index(object: &JsValue, index: &JsValue) -> Result<JsValue, EvalError> {
    let position = match index {
        JsValue::Json(Value::Number(n)) => n.as_f64().filter(|n| n.fract() == 0.0 && *n >= 0.0),
        _ => None,
    };

    match (object, position) {
        (JsValue::Json(Value::Array(items)), Some(pos)) => {
            Ok(items.get(pos as usize).cloned().map_or(JsValue::Undefined, JsValue::Json))
        }
        // Strings index by UTF-16 code unit, the same unit `.length` counts.
        (JsValue::Json(Value::String(s)), Some(pos)) => Ok(s
            .encode_utf16()
            .nth(pos as usize)
            .map_or(JsValue::Undefined, |unit| {
                JsValue::Json(Value::String(String::from_utf16_lossy(&[unit])))
            })),
        _ => get_property(object, &to_js_string(index)),
    }
}

fn binary(op: BinaryOp, left: &JsValue, right: &JsValue) -> JsValue {
    let boolean = |b: bool| JsValue::Json(Value::Bool(b));
    match op {
        BinaryOp::Add => {
            if is_stringish(left) || is_stringish(right) {
                JsValue::Json(Value::String(to_js_string(left) + &to_js_string(right)))
            } else {
                number(to_number(left) + to_number(right))
            }
        }
        BinaryOp::Sub => number(to_number(left) - to_number(right)),
        BinaryOp::Mul => number(to_number(left) * to_number(right)),
        BinaryOp::Div => number(to_number(left) / to_number(right)),
        BinaryOp::Mod => number(to_number(left) % to_number(right)),
        BinaryOp::Lt => boolean(compare(left, right).is_some_and(|o| o.is_lt())),
        BinaryOp::LtEq => boolean(compare(left, right).is_some_and(|o| o.is_le())),
        BinaryOp::Gt => boolean(compare(left, right).is_some_and(|o| o.is_gt())),
        BinaryOp::GtEq => boolean(compare(left, right).is_some_and(|o| o.is_ge())),
        BinaryOp::StrictEq => boolean(strict_equals(left, right)),
        BinaryOp::StrictNotEq => boolean(!strict_equals(left, right)),
        BinaryOp::Eq => boolean(loose_equals(left, right)),
        BinaryOp::NotEq => boolean(!loose_equals(left, right)),
    }
}

fn is_stringish(value: &JsValue) -> bool {
    matches!(
        value,
        JsValue::Json(Value::String(_) | Value::Array(_) | Value::Object(_))
    )
}

fn compare(left: &JsValue, right: &JsValue) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (JsValue::Json(Value::String(a)), JsValue::Json(Value::String(b))) => Some(a.cmp(b)),
        _ => to_number(left).partial_cmp(&to_number(right)),
    }
}

fn strict_equals(left: &JsValue, right: &JsValue) -> bool {
    match (left, right) {
        (JsValue::Undefined, JsValue::Undefined) => true,
        (JsValue::NonFinite(_), JsValue::NonFinite(_) | JsValue::Json(Value::Number(_)))
        | (JsValue::Json(Value::Number(_)), JsValue::NonFinite(_)) => to_number(left) == to_number(right),
        (JsValue::Builtin(a), JsValue::Builtin(b)) => a == b,
        (JsValue::Json(Value::Number(a)), JsValue::Json(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (JsValue::Json(a), JsValue::Json(b)) => a == b,
        _ => false,
    }
}

fn loose_equals(left: &JsValue, right: &JsValue) -> bool {
    let nullish = |v: &JsValue| matches!(v, JsValue::Undefined | JsValue::Json(Value::Null));
    match (nullish(left), nullish(right)) {
        (true, true) => return true,
        (true, false) | (false, true) => return false,
        (false, false) => {}
    }

    let numeric = |v: &JsValue| matches!(v, JsValue::Json(Value::Number(_) | Value::Bool(_)) | JsValue::NonFinite(_));
    if numeric(left) || numeric(right) {
        if matches!(left, JsValue::Json(Value::Object(_) | Value::Array(_)))
            || matches!(right, JsValue::Json(Value::Object(_) | Value::Array(_)))
        {
            return false;
        }
        return to_number(left) == to_number(right);
    }
    strict_equals(left, right)
}

fn describe_callee(callee: &Expr) -> String {
    match callee {
        Expr::Ident(name) => name.clone(),
        Expr::Member(object, name) => format!("{}.{}", describe_callee(object), name),
        _ => "expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(sources: &[&str]) -> ScriptContext {
        let sources: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
        ScriptEngine.init(&sources).unwrap()
    }

    fn pairs(results: &[MapResult]) -> Vec<(String, String)> {
        results
            .iter()
            .map(|r| (r.key_str().into_owned(), r.value_str().into_owned()))
            .collect()
    }

    fn map_one(source: &str, doc: &str) -> Vec<(String, String)> {
        let mut ctx = context(&[source]);
        let results = ctx.map_doc(doc).unwrap();
        assert_eq!(results.len(), 1);
        pairs(&results[0])
    }

    #[test]
    fn test_emit_id_and_field() {
        let emitted = map_one("(function(doc){emit(doc._id, doc.a)})", r#"{"_id":"doc1","a":1}"#);
        assert_eq!(emitted, vec![("\"doc1\"".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_multiple_emits_keep_order() {
        let emitted = map_one(
            "(function(doc){ emit(1, 'one'); emit([doc.a, 2], {x: doc.a}); emit(null, true); })",
            r#"{"a":"v"}"#,
        );
        assert_eq!(
            emitted,
            vec![
                ("1".to_string(), "\"one\"".to_string()),
                ("[\"v\",2]".to_string(), "{\"x\":\"v\"}".to_string()),
                ("null".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_undefined_and_non_finite_emit_null() {
        let emitted = map_one(
            "(function(doc){ emit(doc.missing, 1 / 0); emit(NaN, {n: 0 / 0, u: doc.missing}); })",
            "{}",
        );
        assert_eq!(
            emitted,
            vec![
                ("null".to_string(), "null".to_string()),
                ("null".to_string(), "{\"n\":null}".to_string()),
            ]
        );
    }

    #[test]
    fn test_one_result_list_per_function() {
        let mut ctx = context(&["(function(d){emit(d.a, null)})", "(function(d){})"]);
        assert_eq!(ctx.function_count(), 2);

        let results = ctx.map_doc(r#"{"a":3}"#).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(pairs(&results[0]), vec![("3".to_string(), "null".to_string())]);
        assert!(results[1].is_empty());
    }

    #[test]
    fn test_control_flow() {
        let source = r#"(function(doc){
            var kind = doc.type || "unknown";
            if (kind === "beer") {
                emit(doc.name, doc.abv > 5 ? "strong" : "light");
                return;
            }
            emit(kind, typeof doc.abv);
        })"#;
        assert_eq!(
            map_one(source, r#"{"type":"beer","name":"ipa","abv":6.5}"#),
            vec![("\"ipa\"".to_string(), "\"strong\"".to_string())]
        );
        assert_eq!(
            map_one(source, r#"{"name":"water"}"#),
            vec![("\"unknown\"".to_string(), "\"undefined\"".to_string())]
        );
    }

    #[test]
    fn test_string_concat_and_arithmetic() {
        let emitted = map_one(
            "(function(doc){ emit('id-' + doc.n, doc.n * 2 + 0.5); emit(doc.tags.length, doc.tags[1]); })",
            r#"{"n":7,"tags":["a","b"]}"#,
        );
        assert_eq!(
            emitted,
            vec![
                ("\"id-7\"".to_string(), "14.5".to_string()),
                ("2".to_string(), "\"b\"".to_string()),
            ]
        );
    }

    #[test]
    fn test_sum() {
        let emitted = map_one("(function(doc){ emit(null, sum(doc.values)); })", r#"{"values":[1,2,3.5]}"#);
        assert_eq!(emitted, vec![("null".to_string(), "6.5".to_string())]);
    }

    #[test]
    fn test_loose_and_strict_equality() {
        let emitted = map_one(
            "(function(d){ emit(d.n == '1', d.n === '1'); emit(d.x == null, d.x === null); })",
            r#"{"n":1}"#,
        );
        assert_eq!(
            emitted,
            vec![
                ("true".to_string(), "false".to_string()),
                ("true".to_string(), "false".to_string()),
            ]
        );
    }

    #[test]
    fn test_reference_error() {
        let mut ctx = context(&["(function(doc){ emit(missing, 1); })"]);
        assert_eq!(
            ctx.map_doc("{}").unwrap_err(),
            EvalError::Runtime("ReferenceError: missing is not defined".to_string())
        );
    }

    #[test]
    fn test_property_of_undefined() {
        let mut ctx = context(&["(function(doc){ emit(doc.a.b, 1); })"]);
        assert_eq!(
            ctx.map_doc("{}").unwrap_err(),
            EvalError::Runtime("TypeError: Cannot read property 'b' of undefined".to_string())
        );
    }

    #[test]
    fn test_calling_a_non_function() {
        let mut ctx = context(&["(function(doc){ doc.a(); })"]);
        assert_eq!(
            ctx.map_doc(r#"{"a":1}"#).unwrap_err(),
            EvalError::Runtime("TypeError: doc.a is not a function".to_string())
        );
    }

    #[test]
    fn test_init_rejects_bad_sources() {
        let compile = ScriptEngine.init(&["(function(doc){".to_string()]).unwrap_err();
        assert!(matches!(compile, EvalError::Compile { .. }));

        let sources = vec!["(function(d){})".to_string(), "(42)".to_string()];
        assert_eq!(
            ScriptEngine.init(&sources).unwrap_err(),
            EvalError::InvalidFunction("(42)".to_string())
        );
    }

    #[test]
    fn test_zero_functions() {
        let mut ctx = context(&[]);
        assert_eq!(ctx.function_count(), 0);
        assert!(ctx.map_doc("{}").unwrap().is_empty());
    }

    #[test]
    fn test_document_must_be_a_json_object() {
        let mut ctx = context(&["(function(d){})"]);
        assert!(matches!(ctx.map_doc("{broken"), Err(EvalError::InvalidDocument(_))));
        assert_eq!(ctx.map_doc("[1,2]").unwrap_err(), EvalError::NotAnObject);
    }

    #[test]
    fn test_var_is_hoisted_to_function_scope() {
        let source = "(function(doc){ if (doc.t) { var k = doc.t; } emit(k, 1); })";
        assert_eq!(map_one(source, "{}"), vec![("null".to_string(), "1".to_string())]);
        assert_eq!(
            map_one(source, r#"{"t":"x"}"#),
            vec![("\"x\"".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn test_hoisting_keeps_parameter_values() {
        let emitted = map_one("(function(doc){ emit(doc.a, null); var doc = 1; })", r#"{"a":5}"#);
        assert_eq!(emitted, vec![("5".to_string(), "null".to_string())]);
    }

    #[test]
    fn test_for_loop_emits_once_per_element() {
        let emitted = map_one(
            "(function(doc){ for (var i = 0; i < doc.tags.length; i++) { emit(doc.tags[i], i); } })",
            r#"{"tags":["a","b","c"]}"#,
        );
        assert_eq!(
            emitted,
            vec![
                ("\"a\"".to_string(), "0".to_string()),
                ("\"b\"".to_string(), "1".to_string()),
                ("\"c\"".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_while_with_break_and_continue() {
        let source = r#"(function(doc){
            var n = 0, total = 0;
            while (true) {
                n += 1;
                if (n % 2 == 0) continue;
                if (n > 7) break;
                total += n;
            }
            var down = 3;
            while (down--) emit(down, null);
            emit(total, ++n);
        })"#;
        assert_eq!(
            map_one(source, "{}"),
            vec![
                ("2".to_string(), "null".to_string()),
                ("1".to_string(), "null".to_string()),
                ("0".to_string(), "null".to_string()),
                ("16".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn test_return_inside_loop() {
        let emitted = map_one(
            "(function(doc){ for (var i = 0; ; i++) { if (i == 2) return; emit(i, null); } })",
            "{}",
        );
        assert_eq!(
            emitted,
            vec![("0".to_string(), "null".to_string()), ("1".to_string(), "null".to_string())]
        );
    }

    #[test]
    fn test_runaway_loop_is_stopped() {
        let mut ctx = context(&["(function(doc){ while (true) {} })"]);
        assert_eq!(
            ctx.map_doc("{}").unwrap_err(),
            EvalError::IterationLimit(MAX_LOOP_ITERATIONS)
        );
    }

    #[test]
    fn test_decode_base64() {
        let emitted = map_one("(function(doc){ emit(decodeBase64(doc.b), null); })", r#"{"b":"aGk="}"#);
        assert_eq!(emitted, vec![("\"hi\"".to_string(), "null".to_string())]);

        let mut ctx = context(&["(function(doc){ emit(decodeBase64(doc.b), null); })"]);
        assert_eq!(
            ctx.map_doc(r#"{"b":"abc"}"#).unwrap_err(),
            EvalError::Runtime("Invalid base64 source.".to_string())
        );
        assert!(matches!(ctx.map_doc(r#"{"b":1}"#), Err(EvalError::Runtime(_))));
    }

    #[test]
    fn test_typeof_undeclared_name() {
        let emitted = map_one("(function(doc){ emit(typeof missing, typeof emit); })", "{}");
        assert_eq!(emitted, vec![("\"undefined\"".to_string(), "\"function\"".to_string())]);
    }

    #[test]
    fn test_string_length_and_index_agree() {
        let emitted = map_one(
            "(function(doc){ var s = doc.s; emit(s.length, s[s.length - 1]); })",
            r#"{"s":"\ud83d\ude00a"}"#,
        );
        assert_eq!(emitted, vec![("3".to_string(), "\"a\"".to_string())]);
    }

    #[test]
    fn test_update_of_undeclared_name() {
        let mut ctx = context(&["(function(doc){ missing++; })"]);
        assert_eq!(
            ctx.map_doc("{}").unwrap_err(),
            EvalError::Runtime("ReferenceError: missing is not defined".to_string())
        );
    }

    #[test]
    fn test_init_rejects_nested_functions() {
        let sources = vec!["(function(doc){ doc.tags.forEach(function(t){ emit(t, null); }); })".to_string()];
        assert!(matches!(ScriptEngine.init(&sources), Err(EvalError::Compile { .. })));
    }

    #[test]
    fn test_init_rejects_deep_nesting() {
        let depth = 200_000;
        let sources = vec![format!(
            "(function(doc){{ emit({}1{}, null); }})",
            "(".repeat(depth),
            ")".repeat(depth)
        )];
        assert!(matches!(ScriptEngine.init(&sources), Err(EvalError::Compile { .. })));
    }
}
