//! Tree-walking interpreter over the parsed AST.
//!
//! Identifier lookup is restricted to the context roots plus a fixed
//! intrinsic table; there is no way to reach the host environment.  Member
//! access on a missing key yields `undefined` rather than failing, matching
//! the path-resolution contract.

use regex::Regex;
use serde_json::{json, Map, Number, Value};

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::context::ExpressionContext;
use crate::parser::parse;
use crate::ExpressionError;

/// The result of evaluating an expression: a JSON value, or the distinct
/// `undefined` produced by missing-path lookups.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Undefined,
    Json(Value),
}

impl EvalValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Collapse into a plain JSON value (`undefined` becomes `null`).
    pub fn into_value(self) -> Value {
        match self {
            Self::Undefined => Value::Null,
            Self::Json(v) => v,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined => false,
            Self::Json(Value::Null) => false,
            Self::Json(Value::Bool(b)) => *b,
            Self::Json(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Self::Json(Value::String(s)) => !s.is_empty(),
            Self::Json(Value::Array(_)) | Self::Json(Value::Object(_)) => true,
        }
    }

    fn from_f64(fragment: &str, f: f64) -> Result<Self, ExpressionError> {
        Number::from_f64(f)
            .map(|n| Self::Json(Value::Number(n)))
            .ok_or_else(|| ExpressionError::eval(fragment, "arithmetic produced a non-finite number"))
    }

    fn from_bool(b: bool) -> Self {
        Self::Json(Value::Bool(b))
    }

    fn from_str(s: impl Into<String>) -> Self {
        Self::Json(Value::String(s.into()))
    }
}

/// Scalar stringification used for `+` concatenation and template splicing:
/// `null → "null"`, `undefined → "undefined"`, objects/arrays as compact
/// JSON, other primitives via the string cast.
pub fn display_string(value: &EvalValue) -> String {
    match value {
        EvalValue::Undefined => "undefined".into(),
        EvalValue::Json(Value::Null) => "null".into(),
        EvalValue::Json(Value::Bool(b)) => b.to_string(),
        EvalValue::Json(Value::Number(n)) => format_number(n.as_f64().unwrap_or(0.0)),
        EvalValue::Json(Value::String(s)) => s.clone(),
        EvalValue::Json(v) => serde_json::to_string(v).unwrap_or_default(),
    }
}

/// Integral floats print without a trailing `.0`.
fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

/// Parse and evaluate one fragment body against `ctx`.
pub fn evaluate(fragment: &str, ctx: &ExpressionContext) -> Result<EvalValue, ExpressionError> {
    let expr = parse(fragment)?;
    Evaluator { fragment, ctx }.eval(&expr)
}

struct Evaluator<'a> {
    fragment: &'a str,
    ctx: &'a ExpressionContext,
}

/// Namespaces that exist only as call targets (`Math.min(…)`), never as
/// standalone values.
const NAMESPACES: [&str; 7] = ["Math", "JSON", "Object", "Array", "Date", "DateTime", "RegExp"];

/// Marker key identifying the object values produced by `RegExp(…)`.
const REGEXP_MARKER: &str = "__regexp";

/// Callable globals (the encoding utilities, casts, and context helpers).
const GLOBAL_FUNCTIONS: [&str; 14] = [
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "encodeURIComponent",
    "decodeURIComponent",
    "encodeURI",
    "decodeURI",
    "String",
    "Number",
    "Boolean",
    "isExecuted",
    "hasData",
    "getNodeData",
];

impl Evaluator<'_> {
    fn err(&self, reason: impl Into<String>) -> ExpressionError {
        ExpressionError::eval(self.fragment, reason)
    }

    fn eval(&self, expr: &Expr) -> Result<EvalValue, ExpressionError> {
        match expr {
            Expr::Number(n) => EvalValue::from_f64(self.fragment, *n),
            Expr::Str(s) => Ok(EvalValue::from_str(s.clone())),
            Expr::Bool(b) => Ok(EvalValue::from_bool(*b)),
            Expr::Null => Ok(EvalValue::Json(Value::Null)),
            Expr::Ident(name) => self.ident(name),
            Expr::Member(target, name) => {
                let target = self.eval(target)?;
                self.member(&target, name)
            }
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                self.index(&target, &index)
            }
            Expr::Call { callee, args } => self.call(callee, args),
            Expr::Unary(op, operand) => {
                let operand = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(EvalValue::from_bool(!operand.truthy())),
                    UnaryOp::Neg => {
                        let n = self.to_number(&operand)?;
                        EvalValue::from_f64(self.fragment, -n)
                    }
                }
            }
            Expr::Binary(op, left, right) => self.binary(*op, left, right),
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Identifiers
    // -----------------------------------------------------------------------

    fn ident(&self, name: &str) -> Result<EvalValue, ExpressionError> {
        let ctx = self.ctx;
        let value = match name {
            "$json" => ctx.json.clone(),
            "$node" => Value::Object(ctx.nodes.clone().into_iter().collect()),
            "$workflow" => ctx.workflow.clone(),
            "$execution" => ctx.execution.clone(),
            "$vars" => ctx.vars.clone(),
            "$itemIndex" => Value::Number(Number::from(ctx.item_index)),
            "$now" => Value::String(ctx.now_iso()),
            "$today" => Value::String(ctx.today_iso()),
            "undefined" => return Ok(EvalValue::Undefined),
            _ if NAMESPACES.contains(&name) || GLOBAL_FUNCTIONS.contains(&name)
                || name == "firstExecuted" =>
            {
                return Err(self.err(format!("'{name}' can only be called, not read as a value")));
            }
            other => {
                return Err(self.err(format!("unknown identifier '{other}'")));
            }
        };
        Ok(EvalValue::Json(value))
    }

    // -----------------------------------------------------------------------
    // Member / index access
    // -----------------------------------------------------------------------

    fn member(&self, target: &EvalValue, name: &str) -> Result<EvalValue, ExpressionError> {
        match target {
            EvalValue::Undefined => Err(self.err(format!(
                "cannot read property '{name}' of undefined"
            ))),
            EvalValue::Json(Value::Null) => {
                Err(self.err(format!("cannot read property '{name}' of null")))
            }
            EvalValue::Json(Value::Object(map)) => Ok(map
                .get(name)
                .cloned()
                .map_or(EvalValue::Undefined, EvalValue::Json)),
            EvalValue::Json(Value::Array(items)) if name == "length" => {
                Ok(EvalValue::Json(Value::Number(Number::from(items.len()))))
            }
            EvalValue::Json(Value::String(s)) if name == "length" => Ok(EvalValue::Json(
                Value::Number(Number::from(s.chars().count())),
            )),
            _ => Ok(EvalValue::Undefined),
        }
    }

    fn index(&self, target: &EvalValue, index: &EvalValue) -> Result<EvalValue, ExpressionError> {
        match (target, index) {
            (EvalValue::Json(Value::Array(items)), EvalValue::Json(Value::Number(n))) => {
                let Some(i) = n.as_u64() else {
                    return Ok(EvalValue::Undefined);
                };
                Ok(items
                    .get(i as usize)
                    .cloned()
                    .map_or(EvalValue::Undefined, EvalValue::Json))
            }
            (EvalValue::Json(Value::Object(map)), EvalValue::Json(Value::String(key))) => Ok(map
                .get(key)
                .cloned()
                .map_or(EvalValue::Undefined, EvalValue::Json)),
            (EvalValue::Json(Value::String(s)), EvalValue::Json(Value::Number(n))) => {
                let Some(i) = n.as_u64() else {
                    return Ok(EvalValue::Undefined);
                };
                Ok(s.chars()
                    .nth(i as usize)
                    .map_or(EvalValue::Undefined, |c| EvalValue::from_str(c.to_string())))
            }
            (EvalValue::Undefined, _) | (EvalValue::Json(Value::Null), _) => {
                Err(self.err("cannot index into null or undefined"))
            }
            _ => Ok(EvalValue::Undefined),
        }
    }

    // -----------------------------------------------------------------------
    // Operators
    // -----------------------------------------------------------------------

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<EvalValue, ExpressionError> {
        // Short-circuit forms return the deciding operand, JS-style.
        if op == BinaryOp::And {
            let left = self.eval(left)?;
            return if left.truthy() { self.eval(right) } else { Ok(left) };
        }
        if op == BinaryOp::Or {
            let left = self.eval(left)?;
            return if left.truthy() { Ok(left) } else { self.eval(right) };
        }

        let left = self.eval(left)?;
        let right = self.eval(right)?;

        match op {
            BinaryOp::Add => {
                let is_string = |v: &EvalValue| matches!(v, EvalValue::Json(Value::String(_)));
                if is_string(&left) || is_string(&right) {
                    Ok(EvalValue::from_str(format!(
                        "{}{}",
                        display_string(&left),
                        display_string(&right)
                    )))
                } else {
                    let result = self.to_number(&left)? + self.to_number(&right)?;
                    EvalValue::from_f64(self.fragment, result)
                }
            }
            BinaryOp::Sub => {
                EvalValue::from_f64(self.fragment, self.to_number(&left)? - self.to_number(&right)?)
            }
            BinaryOp::Mul => {
                EvalValue::from_f64(self.fragment, self.to_number(&left)? * self.to_number(&right)?)
            }
            BinaryOp::Div => {
                let divisor = self.to_number(&right)?;
                if divisor == 0.0 {
                    return Err(self.err("division by zero"));
                }
                EvalValue::from_f64(self.fragment, self.to_number(&left)? / divisor)
            }
            BinaryOp::Rem => {
                let divisor = self.to_number(&right)?;
                if divisor == 0.0 {
                    return Err(self.err("division by zero"));
                }
                EvalValue::from_f64(self.fragment, self.to_number(&left)? % divisor)
            }
            BinaryOp::Eq => Ok(EvalValue::from_bool(loose_eq(&left, &right))),
            BinaryOp::NotEq => Ok(EvalValue::from_bool(!loose_eq(&left, &right))),
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                let ordering = self.compare(&left, &right)?;
                Ok(EvalValue::from_bool(match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::LtEq => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    BinaryOp::GtEq => ordering.is_ge(),
                    _ => unreachable!(),
                }))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn compare(
        &self,
        left: &EvalValue,
        right: &EvalValue,
    ) -> Result<std::cmp::Ordering, ExpressionError> {
        // Two strings compare lexicographically; anything else numerically.
        if let (EvalValue::Json(Value::String(a)), EvalValue::Json(Value::String(b))) =
            (left, right)
        {
            return Ok(a.cmp(b));
        }
        let a = self.to_number(left)?;
        let b = self.to_number(right)?;
        a.partial_cmp(&b)
            .ok_or_else(|| self.err("values are not comparable"))
    }

    fn to_number(&self, value: &EvalValue) -> Result<f64, ExpressionError> {
        match value {
            EvalValue::Json(Value::Number(n)) => Ok(n.as_f64().unwrap_or(0.0)),
            EvalValue::Json(Value::Bool(b)) => Ok(f64::from(*b)),
            EvalValue::Json(Value::Null) => Ok(0.0),
            EvalValue::Json(Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Ok(0.0);
                }
                trimmed
                    .parse::<f64>()
                    .map_err(|_| self.err(format!("'{s}' is not a number")))
            }
            EvalValue::Undefined => Err(self.err("undefined is not a number")),
            EvalValue::Json(other) => Err(self.err(format!(
                "cannot convert {} to a number",
                type_name(other)
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    fn call(&self, callee: &Expr, args: &[Expr]) -> Result<EvalValue, ExpressionError> {
        // `firstExecuted(["a", "b"])` takes a literal-array-free grammar, so
        // it accepts its names as plain call arguments instead.
        match callee {
            Expr::Ident(name) if GLOBAL_FUNCTIONS.contains(&name.as_str()) => {
                let args = self.eval_args(args)?;
                self.global_call(name, &args)
            }
            // `RegExp(pattern, flags?)` constructs a regex value.
            Expr::Ident(name) if name == "RegExp" => {
                let args = self.eval_args(args)?;
                self.regexp_construct(&args)
            }
            Expr::Ident(name) if name == "firstExecuted" => {
                let args = self.eval_args(args)?;
                let names: Vec<String> = args
                    .iter()
                    .map(|a| match a {
                        EvalValue::Json(Value::String(s)) => Ok(s.clone()),
                        _ => Err(self.err("firstExecuted expects node names")),
                    })
                    .collect::<Result<_, _>>()?;
                Ok(self
                    .ctx
                    .first_executed(names.iter().map(String::as_str))
                    .map_or(EvalValue::Json(Value::Null), EvalValue::from_str))
            }
            Expr::Member(target, method) => {
                if let Expr::Ident(namespace) = target.as_ref() {
                    if NAMESPACES.contains(&namespace.as_str()) {
                        let args = self.eval_args(args)?;
                        return self.namespace_call(namespace, method, &args);
                    }
                }
                let target = self.eval(target)?;
                let args = self.eval_args(args)?;
                self.method_call(&target, method, &args)
            }
            _ => Err(self.err("expression is not callable")),
        }
    }

    fn eval_args(&self, args: &[Expr]) -> Result<Vec<EvalValue>, ExpressionError> {
        args.iter().map(|a| self.eval(a)).collect()
    }

    fn arg<'v>(&self, args: &'v [EvalValue], i: usize) -> Result<&'v EvalValue, ExpressionError> {
        args.get(i)
            .ok_or_else(|| self.err(format!("missing argument {}", i + 1)))
    }

    fn arg_str(&self, args: &[EvalValue], i: usize) -> Result<String, ExpressionError> {
        Ok(display_string(self.arg(args, i)?))
    }

    fn global_call(&self, name: &str, args: &[EvalValue]) -> Result<EvalValue, ExpressionError> {
        match name {
            "parseInt" => {
                let text = self.arg_str(args, 0)?;
                let radix = match args.get(1) {
                    Some(v) => self.to_number(v)? as u32,
                    None => 10,
                };
                let trimmed = text.trim();
                // Consume leading digits only, JS-style.
                let (sign, digits) = match trimmed.strip_prefix('-') {
                    Some(rest) => (-1i64, rest),
                    None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
                };
                let prefix: String = digits
                    .chars()
                    .take_while(|c| c.is_digit(radix.clamp(2, 36)))
                    .collect();
                if prefix.is_empty() {
                    return Err(self.err(format!("parseInt: '{text}' has no digits")));
                }
                let parsed = i64::from_str_radix(&prefix, radix.clamp(2, 36))
                    .map_err(|_| self.err("parseInt: number out of range"))?;
                Ok(EvalValue::Json(Value::Number(Number::from(sign * parsed))))
            }
            "parseFloat" => {
                let text = self.arg_str(args, 0)?;
                let trimmed = text.trim();
                // Longest numeric prefix.
                let mut end = 0;
                for i in (0..=trimmed.len()).rev() {
                    if trimmed.is_char_boundary(i) && trimmed[..i].parse::<f64>().is_ok() {
                        end = i;
                        break;
                    }
                }
                if end == 0 {
                    return Err(self.err(format!("parseFloat: '{text}' has no digits")));
                }
                EvalValue::from_f64(self.fragment, trimmed[..end].parse::<f64>().unwrap())
            }
            "isNaN" => Ok(EvalValue::from_bool(self.to_number(self.arg(args, 0)?).is_err())),
            "isFinite" => Ok(EvalValue::from_bool(
                self.to_number(self.arg(args, 0)?)
                    .map(f64::is_finite)
                    .unwrap_or(false),
            )),
            "encodeURIComponent" => Ok(EvalValue::from_str(percent_encode(
                &self.arg_str(args, 0)?,
                false,
            ))),
            "encodeURI" => Ok(EvalValue::from_str(percent_encode(
                &self.arg_str(args, 0)?,
                true,
            ))),
            "decodeURIComponent" | "decodeURI" => {
                percent_decode(&self.arg_str(args, 0)?)
                    .map(EvalValue::from_str)
                    .ok_or_else(|| self.err("malformed percent-encoding"))
            }
            "String" => Ok(EvalValue::from_str(display_string(self.arg(args, 0)?))),
            "Number" => {
                let n = self.to_number(self.arg(args, 0)?)?;
                EvalValue::from_f64(self.fragment, n)
            }
            "Boolean" => Ok(EvalValue::from_bool(self.arg(args, 0)?.truthy())),
            "isExecuted" => {
                let name = self.arg_str(args, 0)?;
                Ok(EvalValue::from_bool(self.ctx.is_executed(&name)))
            }
            "hasData" => {
                let name = self.arg_str(args, 0)?;
                Ok(EvalValue::from_bool(self.ctx.has_data(&name)))
            }
            "getNodeData" => {
                let name = self.arg_str(args, 0)?;
                let default = args.get(1).cloned().unwrap_or(EvalValue::Json(Value::Null));
                Ok(EvalValue::Json(
                    self.ctx.get_node_data(&name, default.into_value()),
                ))
            }
            other => Err(self.err(format!("unknown function '{other}'"))),
        }
    }

    fn namespace_call(
        &self,
        namespace: &str,
        method: &str,
        args: &[EvalValue],
    ) -> Result<EvalValue, ExpressionError> {
        match (namespace, method) {
            ("Math", _) => self.math_call(method, args),
            ("JSON", "parse") => {
                let text = self.arg_str(args, 0)?;
                serde_json::from_str::<Value>(&text)
                    .map(EvalValue::Json)
                    .map_err(|e| self.err(format!("JSON.parse: {e}")))
            }
            ("JSON", "stringify") => {
                let value = self.arg(args, 0)?.clone().into_value();
                Ok(EvalValue::from_str(
                    serde_json::to_string(&value).unwrap_or_default(),
                ))
            }
            ("Object", "keys") => match self.arg(args, 0)? {
                EvalValue::Json(Value::Object(map)) => Ok(EvalValue::Json(Value::Array(
                    map.keys().cloned().map(Value::String).collect(),
                ))),
                _ => Err(self.err("Object.keys expects an object")),
            },
            ("Object", "values") => match self.arg(args, 0)? {
                EvalValue::Json(Value::Object(map)) => {
                    Ok(EvalValue::Json(Value::Array(map.values().cloned().collect())))
                }
                _ => Err(self.err("Object.values expects an object")),
            },
            ("Array", "isArray") => Ok(EvalValue::from_bool(matches!(
                self.arg(args, 0)?,
                EvalValue::Json(Value::Array(_))
            ))),
            ("Date", "now") => Ok(EvalValue::Json(Value::Number(Number::from(
                self.ctx.now.timestamp_millis(),
            )))),
            ("Date" | "DateTime", "parse") | ("DateTime", "fromISO") => {
                let text = self.arg_str(args, 0)?;
                let parsed = chrono::DateTime::parse_from_rfc3339(&text)
                    .map_err(|e| self.err(format!("cannot parse date '{text}': {e}")))?;
                if namespace == "Date" {
                    Ok(EvalValue::Json(Value::Number(Number::from(
                        parsed.timestamp_millis(),
                    ))))
                } else {
                    Ok(EvalValue::from_str(
                        parsed.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                    ))
                }
            }
            ("DateTime", "now") => Ok(EvalValue::from_str(self.ctx.now_iso())),
            // One-shot static forms: compile and apply in a single call.
            ("RegExp", "test") => {
                let regex = self.compile_regex(&self.arg_str(args, 0)?, "")?;
                Ok(EvalValue::from_bool(regex.is_match(&self.arg_str(args, 1)?)))
            }
            ("RegExp", "exec") => {
                let regex = self.compile_regex(&self.arg_str(args, 0)?, "")?;
                Ok(EvalValue::Json(regex_exec(&regex, &self.arg_str(args, 1)?)))
            }
            (ns, m) => Err(self.err(format!("unknown function {ns}.{m}"))),
        }
    }

    // -----------------------------------------------------------------------
    // RegExp
    // -----------------------------------------------------------------------

    fn regexp_construct(&self, args: &[EvalValue]) -> Result<EvalValue, ExpressionError> {
        let pattern = self.arg_str(args, 0)?;
        let flags = match args.get(1) {
            Some(v) => display_string(v),
            None => String::new(),
        };
        // Compile eagerly so a bad pattern fails at construction time.
        self.compile_regex(&pattern, &flags)?;
        Ok(EvalValue::Json(json!({
            REGEXP_MARKER: true,
            "source": pattern,
            "flags": flags,
        })))
    }

    /// Compile `source` with JS-style flags mapped to inline modifiers.
    /// `g`/`u`/`y` are accepted and ignored — there is no `lastIndex` state,
    /// so evaluation stays pure.
    fn compile_regex(&self, source: &str, flags: &str) -> Result<Regex, ExpressionError> {
        let mut inline = String::new();
        for flag in flags.chars() {
            match flag {
                'i' | 'm' | 's' => inline.push(flag),
                'g' | 'u' | 'y' => {}
                other => {
                    return Err(self.err(format!("unsupported regex flag '{other}'")));
                }
            }
        }
        let pattern = if inline.is_empty() {
            source.to_owned()
        } else {
            format!("(?{inline}){source}")
        };
        Regex::new(&pattern)
            .map_err(|e| self.err(format!("invalid regular expression '{source}': {e}")))
    }

    /// Instance method dispatch for values built by [`Self::regexp_construct`].
    fn regexp_method(
        &self,
        map: &Map<String, Value>,
        method: &str,
        args: &[EvalValue],
    ) -> Result<EvalValue, ExpressionError> {
        let source = map.get("source").and_then(Value::as_str).unwrap_or_default();
        let flags = map.get("flags").and_then(Value::as_str).unwrap_or_default();
        let regex = self.compile_regex(source, flags)?;
        match method {
            "test" => Ok(EvalValue::from_bool(regex.is_match(&self.arg_str(args, 0)?))),
            "exec" => Ok(EvalValue::Json(regex_exec(&regex, &self.arg_str(args, 0)?))),
            other => Err(self.err(format!("regular expressions have no method '{other}'"))),
        }
    }

    fn math_call(&self, method: &str, args: &[EvalValue]) -> Result<EvalValue, ExpressionError> {
        let unary = |f: fn(f64) -> f64| -> Result<EvalValue, ExpressionError> {
            EvalValue::from_f64(self.fragment, f(self.to_number(self.arg(args, 0)?)?))
        };
        match method {
            "abs" => unary(f64::abs),
            "floor" => unary(f64::floor),
            "ceil" => unary(f64::ceil),
            "round" => unary(f64::round),
            "trunc" => unary(f64::trunc),
            "sqrt" => unary(f64::sqrt),
            "pow" => {
                let base = self.to_number(self.arg(args, 0)?)?;
                let exp = self.to_number(self.arg(args, 1)?)?;
                EvalValue::from_f64(self.fragment, base.powf(exp))
            }
            "min" | "max" => {
                if args.is_empty() {
                    return Err(self.err(format!("Math.{method} needs at least one argument")));
                }
                let mut best = self.to_number(&args[0])?;
                for arg in &args[1..] {
                    let n = self.to_number(arg)?;
                    best = if method == "min" { best.min(n) } else { best.max(n) };
                }
                EvalValue::from_f64(self.fragment, best)
            }
            other => Err(self.err(format!("unknown function Math.{other}"))),
        }
    }

    fn method_call(
        &self,
        target: &EvalValue,
        method: &str,
        args: &[EvalValue],
    ) -> Result<EvalValue, ExpressionError> {
        if method == "toString" {
            return Ok(EvalValue::from_str(display_string(target)));
        }

        match target {
            EvalValue::Json(Value::String(s)) => self.string_method(s, method, args),
            EvalValue::Json(Value::Array(items)) => self.array_method(items, method, args),
            EvalValue::Json(Value::Object(map))
                if map.get(REGEXP_MARKER) == Some(&Value::Bool(true)) =>
            {
                self.regexp_method(map, method, args)
            }
            EvalValue::Json(Value::Number(n)) => match method {
                "toFixed" => {
                    let digits = match args.first() {
                        Some(v) => self.to_number(v)? as usize,
                        None => 0,
                    };
                    Ok(EvalValue::from_str(format!(
                        "{:.*}",
                        digits.min(20),
                        n.as_f64().unwrap_or(0.0)
                    )))
                }
                other => Err(self.err(format!("numbers have no method '{other}'"))),
            },
            EvalValue::Undefined | EvalValue::Json(Value::Null) => {
                Err(self.err(format!("cannot call '{method}' on null or undefined")))
            }
            EvalValue::Json(other) => Err(self.err(format!(
                "{} has no method '{method}'",
                type_name(other)
            ))),
        }
    }

    fn string_method(
        &self,
        s: &str,
        method: &str,
        args: &[EvalValue],
    ) -> Result<EvalValue, ExpressionError> {
        match method {
            "toUpperCase" => Ok(EvalValue::from_str(s.to_uppercase())),
            "toLowerCase" => Ok(EvalValue::from_str(s.to_lowercase())),
            "trim" => Ok(EvalValue::from_str(s.trim())),
            "includes" => Ok(EvalValue::from_bool(s.contains(&self.arg_str(args, 0)?))),
            "startsWith" => Ok(EvalValue::from_bool(s.starts_with(&self.arg_str(args, 0)?))),
            "endsWith" => Ok(EvalValue::from_bool(s.ends_with(&self.arg_str(args, 0)?))),
            "indexOf" => {
                let needle = self.arg_str(args, 0)?;
                let index = s.find(&needle).map_or(-1i64, |byte| {
                    s[..byte].chars().count() as i64
                });
                Ok(EvalValue::Json(Value::Number(Number::from(index))))
            }
            "split" => {
                let separator = self.arg_str(args, 0)?;
                let parts: Vec<Value> = if separator.is_empty() {
                    s.chars().map(|c| Value::String(c.to_string())).collect()
                } else {
                    s.split(&separator)
                        .map(|p| Value::String(p.to_owned()))
                        .collect()
                };
                Ok(EvalValue::Json(Value::Array(parts)))
            }
            "slice" => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = self.slice_bounds(args, chars.len())?;
                Ok(EvalValue::from_str(
                    chars[start..end].iter().collect::<String>(),
                ))
            }
            other => Err(self.err(format!("strings have no method '{other}'"))),
        }
    }

    fn array_method(
        &self,
        items: &[Value],
        method: &str,
        args: &[EvalValue],
    ) -> Result<EvalValue, ExpressionError> {
        match method {
            "includes" => {
                let needle = self.arg(args, 0)?.clone().into_value();
                Ok(EvalValue::from_bool(items.contains(&needle)))
            }
            "indexOf" => {
                let needle = self.arg(args, 0)?.clone().into_value();
                let index = items.iter().position(|v| *v == needle).map_or(-1i64, |i| i as i64);
                Ok(EvalValue::Json(Value::Number(Number::from(index))))
            }
            "join" => {
                let separator = match args.first() {
                    Some(v) => display_string(v),
                    None => ",".into(),
                };
                let joined = items
                    .iter()
                    .map(|v| display_string(&EvalValue::Json(v.clone())))
                    .collect::<Vec<_>>()
                    .join(&separator);
                Ok(EvalValue::from_str(joined))
            }
            "slice" => {
                let (start, end) = self.slice_bounds(args, items.len())?;
                Ok(EvalValue::Json(Value::Array(items[start..end].to_vec())))
            }
            other => Err(self.err(format!("arrays have no method '{other}'"))),
        }
    }

    /// Resolve `slice(start, end?)` arguments to clamped, in-order bounds,
    /// supporting negative offsets from the end.
    fn slice_bounds(
        &self,
        args: &[EvalValue],
        len: usize,
    ) -> Result<(usize, usize), ExpressionError> {
        let resolve = |raw: f64| -> usize {
            if raw < 0.0 {
                len.saturating_sub((-raw) as usize)
            } else {
                (raw as usize).min(len)
            }
        };
        let start = match args.first() {
            Some(v) => resolve(self.to_number(v)?),
            None => 0,
        };
        let end = match args.get(1) {
            Some(v) => resolve(self.to_number(v)?),
            None => len,
        };
        Ok((start.min(end), end))
    }
}

/// Loose equality: `undefined` and `null` are mutually equal; everything else
/// is deep value equality.
fn loose_eq(left: &EvalValue, right: &EvalValue) -> bool {
    let normalize = |v: &EvalValue| -> Value {
        match v {
            EvalValue::Undefined => Value::Null,
            EvalValue::Json(v) => v.clone(),
        }
    };
    normalize(left) == normalize(right)
}

/// JS-shaped `exec` result: `null` when there is no match, otherwise an
/// array of the full match followed by the capture groups (`null` for
/// groups that did not participate).
fn regex_exec(regex: &Regex, text: &str) -> Value {
    match regex.captures(text) {
        None => Value::Null,
        Some(captures) => Value::Array(
            captures
                .iter()
                .map(|group| {
                    group.map_or(Value::Null, |m| Value::String(m.as_str().to_owned()))
                })
                .collect(),
        ),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn percent_encode(input: &str, keep_uri_reserved: bool) -> String {
    const UNRESERVED: &str = "-_.!~*'()";
    const URI_RESERVED: &str = "#$&+,/:;=?@";
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        let c = byte as char;
        let keep = c.is_ascii_alphanumeric()
            || UNRESERVED.contains(c)
            || (keep_uri_reserved && URI_RESERVED.contains(c));
        if keep {
            out.push(c);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx() -> ExpressionContext {
        let now = chrono::Utc.with_ymd_and_hms(2024, 5, 4, 12, 30, 0).unwrap();
        ExpressionContext::new(now)
            .with_json(json!({ "user": { "name": "ada", "age": 36 }, "tags": ["a", "b"] }))
            .with_node(
                "Fetch",
                json!({ "json": { "title": "first" }, "items": [{ "title": "first" }, { "title": "second" }] }),
            )
            .with_vars(json!({ "region": "eu" }))
            .with_workflow(json!({ "id": "wf-1", "name": "Demo", "active": true }))
            .with_execution(json!({ "id": "ex-1", "mode": "manual" }))
    }

    fn eval_ok(fragment: &str) -> EvalValue {
        evaluate(fragment, &ctx()).unwrap()
    }

    #[test]
    fn context_roots_resolve() {
        assert_eq!(eval_ok("$json.user.name"), EvalValue::from_str("ada"));
        assert_eq!(
            eval_ok(r#"$node["Fetch"].items[1].title"#),
            EvalValue::from_str("second")
        );
        assert_eq!(eval_ok("$vars.region"), EvalValue::from_str("eu"));
        assert_eq!(eval_ok("$workflow.active"), EvalValue::from_bool(true));
        assert_eq!(eval_ok("$execution.mode"), EvalValue::from_str("manual"));
        assert_eq!(
            eval_ok("$itemIndex"),
            EvalValue::Json(Value::Number(Number::from(0)))
        );
        assert_eq!(eval_ok("$today"), EvalValue::from_str("2024-05-04"));
    }

    #[test]
    fn missing_keys_yield_undefined_not_errors() {
        assert!(eval_ok("$json.user.nickname").is_undefined());
        assert!(eval_ok("$json.tags[9]").is_undefined());
        // But reading through undefined fails.
        assert!(evaluate("$json.missing.deeper", &ctx()).is_err());
    }

    #[test]
    fn arithmetic_and_concatenation() {
        assert_eq!(
            eval_ok("$json.user.age + 4"),
            EvalValue::Json(Value::Number(Number::from_f64(40.0).unwrap()))
        );
        assert_eq!(
            eval_ok("'age: ' + $json.user.age"),
            EvalValue::from_str("age: 36")
        );
        assert!(evaluate("1 / 0", &ctx()).is_err());
    }

    #[test]
    fn logic_and_ternary() {
        assert_eq!(
            eval_ok("$json.user.age > 18 ? 'adult' : 'minor'"),
            EvalValue::from_str("adult")
        );
        assert_eq!(eval_ok("null == undefined"), EvalValue::from_bool(true));
        // Short-circuit returns the deciding operand.
        assert_eq!(eval_ok("'' || 'fallback'"), EvalValue::from_str("fallback"));
    }

    #[test]
    fn intrinsics_are_available() {
        assert_eq!(
            eval_ok("Math.min(3, 1, 2)"),
            EvalValue::Json(Value::Number(Number::from_f64(1.0).unwrap()))
        );
        assert_eq!(
            eval_ok("JSON.stringify($json.tags)"),
            EvalValue::from_str(r#"["a","b"]"#)
        );
        assert_eq!(
            eval_ok("parseInt('42px')"),
            EvalValue::Json(Value::Number(Number::from(42)))
        );
        assert_eq!(
            eval_ok("encodeURIComponent('a b&c')"),
            EvalValue::from_str("a%20b%26c")
        );
        assert_eq!(
            eval_ok("'HeLLo'.toLowerCase()"),
            EvalValue::from_str("hello")
        );
        assert_eq!(
            eval_ok("$json.tags.join('-')"),
            EvalValue::from_str("a-b")
        );
    }

    #[test]
    fn helper_predicates_reflect_node_state() {
        assert_eq!(eval_ok("isExecuted('Fetch')"), EvalValue::from_bool(true));
        assert_eq!(eval_ok("isExecuted('Ghost')"), EvalValue::from_bool(false));
        assert_eq!(eval_ok("hasData('Fetch')"), EvalValue::from_bool(true));
        assert_eq!(
            eval_ok("firstExecuted('Ghost', 'Fetch')"),
            EvalValue::from_str("Fetch")
        );
        assert_eq!(
            eval_ok("getNodeData('Ghost', 'none')"),
            EvalValue::from_str("none")
        );
    }

    #[test]
    fn regexp_constructs_and_matches() {
        assert_eq!(
            eval_ok("RegExp('^a.*d$').test($json.user.name)"),
            EvalValue::from_bool(false)
        );
        assert_eq!(
            eval_ok("RegExp('^A', 'i').test($json.user.name)"),
            EvalValue::from_bool(true)
        );
        assert_eq!(
            eval_ok(r"RegExp('(\\w+)@(\\w+)').exec('ada@lovelace')"),
            EvalValue::Json(serde_json::json!(["ada@lovelace", "ada", "lovelace"]))
        );
        assert_eq!(eval_ok("RegExp('^x').exec('abc')"), EvalValue::Json(Value::Null));
        // Properties of the constructed value are plain member accesses.
        assert_eq!(eval_ok("RegExp('ab+', 'i').source"), EvalValue::from_str("ab+"));

        // One-shot static forms.
        assert_eq!(eval_ok("RegExp.test('^h', 'hello')"), EvalValue::from_bool(true));
        assert_eq!(
            eval_ok("RegExp.exec('l+', 'hello')"),
            EvalValue::Json(serde_json::json!(["ll"]))
        );
    }

    #[test]
    fn regexp_rejects_bad_patterns_and_flags() {
        assert!(evaluate("RegExp('([')", &ctx()).is_err());
        assert!(evaluate("RegExp('a', 'q')", &ctx()).is_err());
        // A bare `RegExp` is not a value.
        assert!(evaluate("RegExp", &ctx()).is_err());
    }

    #[test]
    fn sandbox_rejects_unknown_identifiers() {
        assert!(evaluate("process.env", &ctx()).is_err());
        assert!(evaluate("require('fs')", &ctx()).is_err());
        assert!(evaluate("globalThis", &ctx()).is_err());
    }

    #[test]
    fn evaluation_is_pure() {
        let context = ctx();
        let first = evaluate("$now", &context).unwrap();
        let second = evaluate("$now", &context).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            evaluate("Math.max(1, 2) + $json.user.age", &context).unwrap(),
            evaluate("Math.max(1, 2) + $json.user.age", &context).unwrap()
        );
    }
}
