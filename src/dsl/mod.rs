// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Template Expression DSL
 * Compiled expressions, variable interpolation and the helper table
 *
 * Expressions appear in three places: `{{...}}` markers inside request
 * definitions, `dsl` matchers, and `dsl` extractors. All three compile to
 * the same AST and evaluate against a merged map of target, template,
 * payload and workflow values.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod functions;
pub mod parser;
pub mod value;

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use parser::{Ast, BinaryOp};
pub use value::Value;

/// Merged variable context handed to expression evaluation.
pub type DynamicValues = HashMap<String, Value>;

static MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").unwrap());
static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// A compiled dsl expression. Compilation happens once at template compile
/// time; evaluation is per event.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Ast,
}

impl Expression {
    pub fn compile(source: &str) -> Result<Self, String> {
        let ast = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, vars: &DynamicValues) -> Result<Value, String> {
        eval(&self.ast, vars)
    }

    /// Evaluate and require a boolean-ish outcome, used by dsl matchers.
    pub fn evaluate_bool(&self, vars: &DynamicValues) -> Result<bool, String> {
        Ok(self.evaluate(vars)?.truthy())
    }
}

fn eval(ast: &Ast, vars: &DynamicValues) -> Result<Value, String> {
    match ast {
        Ast::Literal(v) => Ok(v.clone()),
        Ast::Variable(name) => vars
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown variable '{}'", name)),
        Ast::Call(name, args) => {
            let mut evaluated = Vec::with_capacity(args.len());
            for arg in args {
                evaluated.push(eval(arg, vars)?);
            }
            functions::call(name, &evaluated)
        }
        Ast::Not(inner) => Ok(Value::Bool(!eval(inner, vars)?.truthy())),
        Ast::Negate(inner) => {
            let v = eval(inner, vars)?;
            v.as_float()
                .map(|f| {
                    if f.fract() == 0.0 {
                        Value::Int(-(f as i64))
                    } else {
                        Value::Float(-f)
                    }
                })
                .ok_or_else(|| format!("cannot negate {}", v.kind()))
        }
        Ast::Binary(op, left, right) => eval_binary(op, left, right, vars),
    }
}

fn eval_binary(op: &BinaryOp, left: &Ast, right: &Ast, vars: &DynamicValues) -> Result<Value, String> {
    // short-circuit logical operators before evaluating the right side
    match op {
        BinaryOp::And => {
            if !eval(left, vars)?.truthy() {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(eval(right, vars)?.truthy()));
        }
        BinaryOp::Or => {
            if eval(left, vars)?.truthy() {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(eval(right, vars)?.truthy()));
        }
        _ => {}
    }

    let lhs = eval(left, vars)?;
    let rhs = eval(right, vars)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = compare(&lhs, &rhs)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        BinaryOp::Add => {
            if matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_)) {
                return Ok(Value::String(format!("{}{}", lhs, rhs)));
            }
            numeric(op, &lhs, &rhs)
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => numeric(op, &lhs, &rhs),
        BinaryOp::And | BinaryOp::Or => unreachable!(),
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if let (Some(a), Some(b)) = (lhs.as_float(), rhs.as_float()) {
        return a == b;
    }
    lhs.to_string() == rhs.to_string()
}

fn compare(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, String> {
    if let (Some(a), Some(b)) = (lhs.as_float(), rhs.as_float()) {
        return a
            .partial_cmp(&b)
            .ok_or_else(|| "incomparable numbers".to_string());
    }
    Ok(lhs.to_string().cmp(&rhs.to_string()))
}

fn numeric(op: &BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    let (a, b) = match (lhs.as_float(), rhs.as_float()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(format!(
                "arithmetic over non numeric values ({}, {})",
                lhs.kind(),
                rhs.kind()
            ))
        }
    };
    if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0.0 {
        return Err("division by zero".into());
    }
    let out = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => unreachable!(),
    };
    if out.fract() == 0.0 && out.abs() < i64::MAX as f64 {
        Ok(Value::Int(out as i64))
    } else {
        Ok(Value::Float(out))
    }
}

/// Outcome of marker interpolation over a request definition.
#[derive(Debug)]
pub enum Interpolated {
    Done(String),
    /// One or more markers could not be resolved; the request must not be
    /// sent with dangling markers.
    Unresolved(Vec<String>),
}

/// Whether the text still carries `{{...}}` markers.
pub fn has_markers(text: &str) -> bool {
    MARKER_RE.is_match(text)
}

/// Replace every `{{...}}` marker in the text. Plain identifiers resolve
/// directly from the variable map; anything else is compiled and evaluated
/// as a dsl expression over the same map.
pub fn interpolate(text: &str, vars: &DynamicValues) -> Interpolated {
    let mut unresolved = Vec::new();
    let replaced = MARKER_RE.replace_all(text, |caps: &regex::Captures<'_>| {
        let expr = caps[1].trim().to_string();
        if IDENT_RE.is_match(&expr) {
            match vars.get(&expr) {
                Some(v) => return v.to_string(),
                None => {
                    unresolved.push(expr);
                    return caps[0].to_string();
                }
            }
        }
        match Expression::compile(&expr).and_then(|e| e.evaluate(vars)) {
            Ok(v) => v.to_string(),
            Err(_) => {
                unresolved.push(expr);
                caps[0].to_string()
            }
        }
    });
    if unresolved.is_empty() {
        Interpolated::Done(replaced.into_owned())
    } else {
        Interpolated::Unresolved(unresolved)
    }
}

/// Merge maps left to right; later entries win. The precedence rule for
/// workflow contexts (extracted values over inherited ones) falls out of
/// the argument order.
pub fn merge_values(maps: &[&DynamicValues]) -> DynamicValues {
    let mut merged = DynamicValues::new();
    for map in maps {
        for (k, v) in map.iter() {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}
