//! Expression interpreter
//!
//! Evaluates the action expression language against an [`EvalContext`]:
//! literals pass through, `$`-references resolve through the context's
//! priority tiers, and compound operations dispatch on the operator.
//!
//! Evaluation is strictly eager and left-to-right, except for `IF`,
//! `SWITCH`, `AND` and `OR`, which short-circuit.

use crate::context::EvalContext;
use crate::error::{EngineError, Result};
use crate::regulation::{Expr, OpExpr};
use crate::trace::TraceNode;
use crate::types::{Operation, TraceNodeType, Value};
use chrono::NaiveDate;

/// Evaluate an expression to a concrete value.
pub fn evaluate_expr(expr: &Expr, ctx: &mut EvalContext) -> Result<Value> {
    match expr {
        Expr::Literal(Value::String(s)) => {
            if let Some(name) = s.strip_prefix('$') {
                let value = ctx.resolve(name)?;
                let node = TraceNode::new(TraceNodeType::Resolve, format!("${name}"))
                    .with_resolve_type(ctx.resolve_kind(name))
                    .with_result(value.clone())
                    .with_detail("variable", name);
                ctx.attach_trace_child(node);
                Ok(value)
            } else {
                Ok(Value::String(s.clone()))
            }
        }
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Operation(op) => execute_operation(op, ctx),
    }
}

/// Execute a compound operation, recording it in the trace.
pub fn execute_operation(op: &OpExpr, ctx: &mut EvalContext) -> Result<Value> {
    ctx.push_trace(
        TraceNode::new(TraceNodeType::Operation, op.operation.as_str())
            .with_detail("operation", op.operation.as_str()),
    );

    let result = dispatch(op, ctx);
    if let Ok(value) = &result {
        ctx.set_trace_result(value.clone());
    }
    ctx.pop_trace();
    result
}

fn dispatch(op: &OpExpr, ctx: &mut EvalContext) -> Result<Value> {
    match op.operation {
        Operation::Equals => {
            let (subject, value) = comparison_operands(op, ctx)?;
            Ok(Value::Bool(values_equal(&subject, &value)))
        }
        Operation::NotEquals => {
            let (subject, value) = comparison_operands(op, ctx)?;
            Ok(Value::Bool(!values_equal(&subject, &value)))
        }
        Operation::GreaterThan => ordering(op, ctx, |o| o == std::cmp::Ordering::Greater),
        Operation::LessThan => ordering(op, ctx, |o| o == std::cmp::Ordering::Less),
        Operation::GreaterThanOrEqual => {
            ordering(op, ctx, |o| o != std::cmp::Ordering::Less)
        }
        Operation::LessThanOrEqual => {
            ordering(op, ctx, |o| o != std::cmp::Ordering::Greater)
        }

        Operation::Add => execute_add(op, ctx),
        Operation::Subtract => execute_subtract(op, ctx),
        Operation::Multiply => execute_multiply(op, ctx),
        Operation::Divide => execute_divide(op, ctx),

        Operation::Max => execute_aggregate(op, ctx, f64::max),
        Operation::Min => execute_aggregate(op, ctx, f64::min),

        Operation::And => execute_and(op, ctx),
        Operation::Or => execute_or(op, ctx),

        Operation::IsNull => Ok(Value::Bool(subject_operand(op, ctx)?.is_null())),
        Operation::NotNull => Ok(Value::Bool(!subject_operand(op, ctx)?.is_null())),

        Operation::In => execute_membership(op, ctx, true),
        Operation::NotIn => execute_membership(op, ctx, false),

        Operation::If => execute_if(op, ctx),
        Operation::Switch => execute_switch(op, ctx),

        Operation::SubtractDate => execute_subtract_date(op, ctx),

        Operation::Unknown => {
            tracing::warn!("Unknown operation encountered, yielding null");
            Ok(Value::Null)
        }
    }
}

// =============================================================================
// Comparison
// =============================================================================

/// Value equality with int/float coercion: `42 == 42.0` holds.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => *i as f64 == *f,
        _ => a == b,
    }
}

fn comparison_operands(op: &OpExpr, ctx: &mut EvalContext) -> Result<(Value, Value)> {
    let subject = op.subject.as_ref().ok_or_else(|| {
        EngineError::InvalidOperation(format!("{} requires 'subject'", op.operation.as_str()))
    })?;
    let value = op.value.as_ref().ok_or_else(|| {
        EngineError::InvalidOperation(format!("{} requires 'value'", op.operation.as_str()))
    })?;
    Ok((evaluate_expr(subject, ctx)?, evaluate_expr(value, ctx)?))
}

fn subject_operand(op: &OpExpr, ctx: &mut EvalContext) -> Result<Value> {
    let subject = op.subject.as_ref().ok_or_else(|| {
        EngineError::InvalidOperation(format!("{} requires 'subject'", op.operation.as_str()))
    })?;
    evaluate_expr(subject, ctx)
}

/// Ordering comparison over numbers or strings.
///
/// A null on either side yields `false` without raising; ISO date strings
/// order correctly under string comparison.
fn ordering(
    op: &OpExpr,
    ctx: &mut EvalContext,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value> {
    let (subject, value) = comparison_operands(op, ctx)?;

    if subject.is_null() || value.is_null() {
        return Ok(Value::Bool(false));
    }

    let ordering = match (&subject, &value) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => {
            let a = to_number(&subject)?;
            let b = to_number(&value)?;
            a.partial_cmp(&b).ok_or_else(|| EngineError::InvalidOperation(
                "Comparison of NaN is undefined".to_string(),
            ))?
        }
    };

    Ok(Value::Bool(accept(ordering)))
}

// =============================================================================
// Arithmetic
// =============================================================================

fn operand_values(op: &OpExpr, ctx: &mut EvalContext) -> Result<Vec<Value>> {
    let values = op.values.as_ref().ok_or_else(|| {
        EngineError::InvalidOperation(format!("{} requires 'values'", op.operation.as_str()))
    })?;
    values.iter().map(|v| evaluate_expr(v, ctx)).collect()
}

fn execute_add(op: &OpExpr, ctx: &mut EvalContext) -> Result<Value> {
    let evaluated = operand_values(op, ctx)?;

    let mut sum = 0.0;
    let mut has_float = false;
    for value in &evaluated {
        match value {
            Value::Int(i) => sum += *i as f64,
            Value::Float(f) => {
                sum += f;
                has_float = true;
            }
            other => return Err(type_error("number", other)),
        }
    }

    Ok(numeric(sum, has_float))
}

fn execute_subtract(op: &OpExpr, ctx: &mut EvalContext) -> Result<Value> {
    let evaluated = operand_values(op, ctx)?;
    let Some((first, rest)) = evaluated.split_first() else {
        return Err(EngineError::InvalidOperation(
            "SUBTRACT requires at least one value".to_string(),
        ));
    };

    let mut result = to_number(first)?;
    let mut has_float = matches!(first, Value::Float(_));
    for value in rest {
        result -= to_number(value)?;
        has_float |= matches!(value, Value::Float(_));
    }

    Ok(numeric(result, has_float))
}

fn execute_multiply(op: &OpExpr, ctx: &mut EvalContext) -> Result<Value> {
    let evaluated = operand_values(op, ctx)?;
    if evaluated.is_empty() {
        return Err(EngineError::InvalidOperation(
            "MULTIPLY requires at least one value".to_string(),
        ));
    }

    let mut result = 1.0;
    let mut has_float = false;
    for value in &evaluated {
        match value {
            Value::Int(i) => result *= *i as f64,
            Value::Float(f) => {
                result *= f;
                has_float = true;
            }
            other => return Err(type_error("number", other)),
        }
    }

    Ok(numeric(result, has_float))
}

/// DIVIDE folds left from the first element and always yields a float.
fn execute_divide(op: &OpExpr, ctx: &mut EvalContext) -> Result<Value> {
    let evaluated = operand_values(op, ctx)?;
    let Some((first, rest)) = evaluated.split_first() else {
        return Err(EngineError::InvalidOperation(
            "DIVIDE requires at least one value".to_string(),
        ));
    };

    let mut result = to_number(first)?;
    for value in rest {
        let divisor = to_number(value)?;
        if divisor == 0.0 {
            return Err(EngineError::DivisionByZero);
        }
        result /= divisor;
    }

    if !result.is_finite() {
        return Err(EngineError::InvalidOperation(
            "Division produced a non-finite result".to_string(),
        ));
    }

    Ok(Value::Float(result))
}

// =============================================================================
// Aggregate
// =============================================================================

fn execute_aggregate(
    op: &OpExpr,
    ctx: &mut EvalContext,
    combine: impl Fn(f64, f64) -> f64,
) -> Result<Value> {
    let evaluated = operand_values(op, ctx)?;
    if evaluated.is_empty() {
        return Err(EngineError::InvalidOperation(format!(
            "{} is undefined on an empty list",
            op.operation.as_str()
        )));
    }

    let mut has_float = false;
    let mut result: Option<f64> = None;
    for value in &evaluated {
        has_float |= matches!(value, Value::Float(_));
        let n = to_number(value)?;
        result = Some(match result {
            Some(acc) => combine(acc, n),
            None => n,
        });
    }

    // result is always Some here: the list was non-empty
    Ok(numeric(result.unwrap_or_default(), has_float))
}

// =============================================================================
// Logical
// =============================================================================

/// AND over zero conditions is true.
fn execute_and(op: &OpExpr, ctx: &mut EvalContext) -> Result<Value> {
    let conditions = op.conditions.as_ref().ok_or_else(|| {
        EngineError::InvalidOperation("AND requires 'conditions'".to_string())
    })?;

    for condition in conditions {
        if !evaluate_expr(condition, ctx)?.to_bool() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

/// OR over zero conditions is false.
fn execute_or(op: &OpExpr, ctx: &mut EvalContext) -> Result<Value> {
    let conditions = op.conditions.as_ref().ok_or_else(|| {
        EngineError::InvalidOperation("OR requires 'conditions'".to_string())
    })?;

    for condition in conditions {
        if evaluate_expr(condition, ctx)?.to_bool() {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

// =============================================================================
// Membership
// =============================================================================

fn execute_membership(op: &OpExpr, ctx: &mut EvalContext, expect_member: bool) -> Result<Value> {
    let subject = subject_operand(op, ctx)?;
    let evaluated = operand_values(op, ctx)?;

    let is_member = evaluated.iter().any(|v| values_equal(&subject, v));
    Ok(Value::Bool(is_member == expect_member))
}

// =============================================================================
// Conditional
// =============================================================================

fn execute_if(op: &OpExpr, ctx: &mut EvalContext) -> Result<Value> {
    let when = op
        .when
        .as_ref()
        .ok_or_else(|| EngineError::InvalidOperation("IF requires 'when'".to_string()))?;
    let then = op
        .then
        .as_ref()
        .ok_or_else(|| EngineError::InvalidOperation("IF requires 'then'".to_string()))?;

    if evaluate_expr(when, ctx)?.to_bool() {
        evaluate_expr(then, ctx)
    } else if let Some(else_branch) = &op.else_branch {
        evaluate_expr(else_branch, ctx)
    } else {
        Ok(Value::Null)
    }
}

fn execute_switch(op: &OpExpr, ctx: &mut EvalContext) -> Result<Value> {
    let cases = op
        .cases
        .as_ref()
        .ok_or_else(|| EngineError::InvalidOperation("SWITCH requires 'cases'".to_string()))?;

    for case in cases {
        if evaluate_expr(&case.when, ctx)?.to_bool() {
            return evaluate_expr(&case.then, ctx);
        }
    }

    match &op.default {
        Some(default) => evaluate_expr(default, ctx),
        None => Ok(Value::Null),
    }
}

// =============================================================================
// Date
// =============================================================================

/// Difference between two dates in days, months (`days / 30`) or years
/// (`days / 365`), floored. Unknown units fall back to days.
fn execute_subtract_date(op: &OpExpr, ctx: &mut EvalContext) -> Result<Value> {
    let values = op.values.as_deref().unwrap_or(&[]);
    if values.len() < 2 {
        tracing::warn!("SUBTRACT_DATE requires exactly 2 values");
        return Ok(Value::Int(0));
    }

    let first = evaluate_expr(&values[0], ctx)?;
    let second = evaluate_expr(&values[1], ctx)?;

    let (Some(d1), Some(d2)) = (to_date(&first), to_date(&second)) else {
        tracing::warn!(
            first = %first.type_name(),
            second = %second.type_name(),
            "SUBTRACT_DATE could not parse operands as dates"
        );
        return Ok(Value::Int(0));
    };

    let days = (d1 - d2).num_days();
    let unit = op.unit.as_deref().unwrap_or("days");
    let result = match unit {
        "days" => days,
        "months" => days.div_euclid(30),
        "years" => days.div_euclid(365),
        other => {
            tracing::warn!(unit = %other, "Unknown date unit, falling back to days");
            days
        }
    };

    Ok(Value::Int(result))
}

fn to_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
        // The referencedate object carries its ISO form
        Value::Object(obj) => match obj.get("iso") {
            Some(Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
            _ => None,
        },
        _ => None,
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn numeric(value: f64, has_float: bool) -> Value {
    if has_float {
        Value::Float(value)
    } else {
        Value::Int(value as i64)
    }
}

fn to_number(value: &Value) -> Result<f64> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(type_error("number", other)),
    }
}

fn type_error(expected: &str, actual: &Value) -> EngineError {
    EngineError::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EvalContext;
    use crate::regulation::{Regulation, SwitchCase};
    use crate::service::LawExecutionService;
    use std::collections::HashMap;

    fn empty_service() -> LawExecutionService {
        LawExecutionService::new()
    }

    fn empty_regulation() -> Regulation {
        Regulation::from_yaml_str(
            "$id: ops_test\nregulatory_layer: WET\npublication_date: '2025-01-01'\narticles: []\n",
        )
        .unwrap()
    }

    fn context<'a>(
        service: &'a LawExecutionService,
        regulation: &'a Regulation,
        params: HashMap<String, Value>,
    ) -> EvalContext<'a> {
        EvalContext::new(service, regulation, params, "2025-06-15", &[], &[], None, 0).unwrap()
    }

    fn lit(v: impl Into<Value>) -> Expr {
        Expr::Literal(v.into())
    }

    fn var(name: &str) -> Expr {
        Expr::Literal(Value::String(format!("${name}")))
    }

    fn op(operation: Operation) -> OpExpr {
        OpExpr {
            operation,
            ..Default::default()
        }
    }

    macro_rules! eval {
        ($op:expr, $params:expr) => {{
            let service = empty_service();
            let regulation = empty_regulation();
            let mut ctx = context(&service, &regulation, $params);
            execute_operation(&$op, &mut ctx)
        }};
        ($op:expr) => {
            eval!($op, HashMap::new())
        };
    }

    mod comparison {
        use super::*;

        #[test]
        fn test_equals() {
            let mut o = op(Operation::Equals);
            o.subject = Some(lit(42i64));
            o.value = Some(lit(42i64));
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));

            let mut o = op(Operation::Equals);
            o.subject = Some(lit(42i64));
            o.value = Some(lit(43i64));
            assert_eq!(eval!(o).unwrap(), Value::Bool(false));
        }

        #[test]
        fn test_equals_int_float_coercion() {
            let mut o = op(Operation::Equals);
            o.subject = Some(lit(42i64));
            o.value = Some(lit(42.0f64));
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));

            let mut o = op(Operation::NotEquals);
            o.subject = Some(lit(42i64));
            o.value = Some(lit(42.5f64));
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));
        }

        #[test]
        fn test_ordering_numbers() {
            let mut o = op(Operation::GreaterThan);
            o.subject = Some(lit(50i64));
            o.value = Some(lit(42i64));
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));

            let mut o = op(Operation::LessThanOrEqual);
            o.subject = Some(lit(42i64));
            o.value = Some(lit(42.0f64));
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));
        }

        #[test]
        fn test_ordering_strings() {
            // ISO dates order correctly as strings
            let mut o = op(Operation::LessThan);
            o.subject = Some(lit("2024-12-31"));
            o.value = Some(lit("2025-01-01"));
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));
        }

        #[test]
        fn test_ordering_null_is_false_not_error() {
            for operation in [
                Operation::GreaterThan,
                Operation::LessThan,
                Operation::GreaterThanOrEqual,
                Operation::LessThanOrEqual,
            ] {
                let mut o = op(operation);
                o.subject = Some(lit(Value::Null));
                o.value = Some(lit(5i64));
                assert_eq!(eval!(o).unwrap(), Value::Bool(false));
            }
        }

        #[test]
        fn test_equals_null_semantics() {
            let mut o = op(Operation::Equals);
            o.subject = Some(lit(Value::Null));
            o.value = Some(lit(Value::Null));
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));

            let mut o = op(Operation::Equals);
            o.subject = Some(lit(Value::Null));
            o.value = Some(lit(5i64));
            assert_eq!(eval!(o).unwrap(), Value::Bool(false));
        }

        #[test]
        fn test_ordering_incomparable_types_error() {
            let mut o = op(Operation::GreaterThan);
            o.subject = Some(lit("text"));
            o.value = Some(lit(5i64));
            assert!(matches!(
                eval!(o),
                Err(EngineError::TypeMismatch { .. })
            ));
        }

        #[test]
        fn test_comparison_with_variables() {
            let mut params = HashMap::new();
            params.insert("leeftijd".to_string(), Value::Int(25));
            params.insert("grens".to_string(), Value::Int(18));

            let mut o = op(Operation::GreaterThanOrEqual);
            o.subject = Some(var("leeftijd"));
            o.value = Some(var("grens"));
            assert_eq!(eval!(o, params).unwrap(), Value::Bool(true));
        }

        #[test]
        fn test_missing_operand_is_invalid() {
            let mut o = op(Operation::Equals);
            o.value = Some(lit(1i64));
            assert!(matches!(eval!(o), Err(EngineError::InvalidOperation(_))));
        }
    }

    mod arithmetic {
        use super::*;

        #[test]
        fn test_add_integers() {
            let mut o = op(Operation::Add);
            o.values = Some(vec![lit(10i64), lit(20i64), lit(30i64)]);
            assert_eq!(eval!(o).unwrap(), Value::Int(60));
        }

        #[test]
        fn test_add_mixed_preserves_float() {
            let mut o = op(Operation::Add);
            o.values = Some(vec![lit(10i64), lit(20.5f64)]);
            assert_eq!(eval!(o).unwrap(), Value::Float(30.5));
        }

        #[test]
        fn test_subtract_folds_left() {
            let mut o = op(Operation::Subtract);
            o.values = Some(vec![lit(100i64), lit(30i64), lit(20i64)]);
            assert_eq!(eval!(o).unwrap(), Value::Int(50));
        }

        #[test]
        fn test_multiply() {
            let mut o = op(Operation::Multiply);
            o.values = Some(vec![lit(2i64), lit(3i64), lit(4i64)]);
            assert_eq!(eval!(o).unwrap(), Value::Int(24));
        }

        #[test]
        fn test_divide_always_float() {
            let mut o = op(Operation::Divide);
            o.values = Some(vec![lit(100i64), lit(2i64)]);
            assert_eq!(eval!(o).unwrap(), Value::Float(50.0));
        }

        #[test]
        fn test_divide_by_zero() {
            let mut o = op(Operation::Divide);
            o.values = Some(vec![lit(100i64), lit(0i64)]);
            assert!(matches!(eval!(o), Err(EngineError::DivisionByZero)));
        }

        #[test]
        fn test_divide_folds_left() {
            let mut o = op(Operation::Divide);
            o.values = Some(vec![lit(100i64), lit(2i64), lit(5i64)]);
            assert_eq!(eval!(o).unwrap(), Value::Float(10.0));
        }

        #[test]
        fn test_arithmetic_on_string_is_type_error() {
            let mut o = op(Operation::Add);
            o.values = Some(vec![lit(10i64), lit("niet een getal")]);
            assert!(matches!(eval!(o), Err(EngineError::TypeMismatch { .. })));
        }

        #[test]
        fn test_add_commutes_subtract_does_not() {
            let mut forward = op(Operation::Add);
            forward.values = Some(vec![lit(1i64), lit(2i64), lit(3i64)]);
            let mut shuffled = op(Operation::Add);
            shuffled.values = Some(vec![lit(3i64), lit(1i64), lit(2i64)]);
            assert_eq!(eval!(forward).unwrap(), eval!(shuffled).unwrap());

            let mut forward = op(Operation::Subtract);
            forward.values = Some(vec![lit(10i64), lit(3i64)]);
            let mut shuffled = op(Operation::Subtract);
            shuffled.values = Some(vec![lit(3i64), lit(10i64)]);
            assert_ne!(eval!(forward).unwrap(), eval!(shuffled).unwrap());
        }
    }

    mod aggregate {
        use super::*;

        #[test]
        fn test_max_min() {
            let mut o = op(Operation::Max);
            o.values = Some(vec![lit(10i64), lit(50i64), lit(30i64)]);
            assert_eq!(eval!(o).unwrap(), Value::Int(50));

            let mut o = op(Operation::Min);
            o.values = Some(vec![lit(10i64), lit(50i64), lit(30i64)]);
            assert_eq!(eval!(o).unwrap(), Value::Int(10));
        }

        #[test]
        fn test_single_element_returns_it() {
            let mut o = op(Operation::Max);
            o.values = Some(vec![lit(7i64)]);
            assert_eq!(eval!(o).unwrap(), Value::Int(7));

            let mut o = op(Operation::Min);
            o.values = Some(vec![lit(7i64)]);
            assert_eq!(eval!(o).unwrap(), Value::Int(7));
        }

        #[test]
        fn test_empty_is_undefined() {
            let mut o = op(Operation::Max);
            o.values = Some(vec![]);
            assert!(matches!(eval!(o), Err(EngineError::InvalidOperation(_))));
        }

        #[test]
        fn test_max_preserves_float() {
            let mut o = op(Operation::Max);
            o.values = Some(vec![lit(10.5f64), lit(50.25f64)]);
            assert_eq!(eval!(o).unwrap(), Value::Float(50.25));
        }
    }

    mod logical {
        use super::*;

        #[test]
        fn test_and_or_basic() {
            let mut o = op(Operation::And);
            o.conditions = Some(vec![lit(true), lit(true)]);
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));

            let mut o = op(Operation::And);
            o.conditions = Some(vec![lit(true), lit(false)]);
            assert_eq!(eval!(o).unwrap(), Value::Bool(false));

            let mut o = op(Operation::Or);
            o.conditions = Some(vec![lit(false), lit(true)]);
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));
        }

        #[test]
        fn test_empty_conditions() {
            let mut o = op(Operation::And);
            o.conditions = Some(vec![]);
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));

            let mut o = op(Operation::Or);
            o.conditions = Some(vec![]);
            assert_eq!(eval!(o).unwrap(), Value::Bool(false));
        }

        #[test]
        fn test_short_circuit_skips_division_by_zero() {
            let mut explosive = op(Operation::Divide);
            explosive.values = Some(vec![lit(1i64), lit(0i64)]);

            let mut o = op(Operation::And);
            o.conditions = Some(vec![lit(false), Expr::Operation(Box::new(explosive.clone()))]);
            assert_eq!(eval!(o).unwrap(), Value::Bool(false));

            let mut o = op(Operation::Or);
            o.conditions = Some(vec![lit(true), Expr::Operation(Box::new(explosive))]);
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));
        }

        #[test]
        fn test_truthiness_casting() {
            let mut o = op(Operation::And);
            o.conditions = Some(vec![lit(1i64), lit("x")]);
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));

            let mut o = op(Operation::And);
            o.conditions = Some(vec![lit(1i64), lit(Value::Null)]);
            assert_eq!(eval!(o).unwrap(), Value::Bool(false));
        }
    }

    mod null_checks {
        use super::*;

        #[test]
        fn test_is_null_not_null() {
            let mut o = op(Operation::IsNull);
            o.subject = Some(lit(Value::Null));
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));

            let mut o = op(Operation::IsNull);
            o.subject = Some(lit(0i64));
            assert_eq!(eval!(o).unwrap(), Value::Bool(false));

            let mut o = op(Operation::NotNull);
            o.subject = Some(lit(0i64));
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));
        }
    }

    mod membership {
        use super::*;

        #[test]
        fn test_in_not_in() {
            let mut o = op(Operation::In);
            o.subject = Some(lit("b"));
            o.values = Some(vec![lit("a"), lit("b"), lit("c")]);
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));

            let mut o = op(Operation::NotIn);
            o.subject = Some(lit("d"));
            o.values = Some(vec![lit("a"), lit("b"), lit("c")]);
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));
        }

        #[test]
        fn test_in_numeric_coercion() {
            let mut o = op(Operation::In);
            o.subject = Some(lit(2i64));
            o.values = Some(vec![lit(1.0f64), lit(2.0f64)]);
            assert_eq!(eval!(o).unwrap(), Value::Bool(true));
        }
    }

    mod conditional {
        use super::*;

        #[test]
        fn test_if_branches() {
            let mut o = op(Operation::If);
            o.when = Some(lit(true));
            o.then = Some(lit(100i64));
            o.else_branch = Some(lit(50i64));
            assert_eq!(eval!(o).unwrap(), Value::Int(100));

            let mut o = op(Operation::If);
            o.when = Some(lit(false));
            o.then = Some(lit(100i64));
            o.else_branch = Some(lit(50i64));
            assert_eq!(eval!(o).unwrap(), Value::Int(50));
        }

        #[test]
        fn test_if_missing_else_yields_null() {
            let mut o = op(Operation::If);
            o.when = Some(lit(false));
            o.then = Some(lit(100i64));
            assert_eq!(eval!(o).unwrap(), Value::Null);
        }

        #[test]
        fn test_if_lazy_branches() {
            let mut explosive = op(Operation::Divide);
            explosive.values = Some(vec![lit(1i64), lit(0i64)]);

            let mut o = op(Operation::If);
            o.when = Some(lit(true));
            o.then = Some(lit(1i64));
            o.else_branch = Some(Expr::Operation(Box::new(explosive)));
            assert_eq!(eval!(o).unwrap(), Value::Int(1));
        }

        #[test]
        fn test_switch_first_truthy_wins() {
            let mut o = op(Operation::Switch);
            o.cases = Some(vec![
                SwitchCase {
                    when: lit(false),
                    then: lit(10i64),
                },
                SwitchCase {
                    when: lit(true),
                    then: lit(20i64),
                },
                SwitchCase {
                    when: lit(true),
                    then: lit(30i64),
                },
            ]);
            o.default = Some(lit(0i64));
            assert_eq!(eval!(o).unwrap(), Value::Int(20));
        }

        #[test]
        fn test_switch_default_and_null() {
            let mut o = op(Operation::Switch);
            o.cases = Some(vec![SwitchCase {
                when: lit(false),
                then: lit(10i64),
            }]);
            o.default = Some(lit(99i64));
            assert_eq!(eval!(o).unwrap(), Value::Int(99));

            let mut o = op(Operation::Switch);
            o.cases = Some(vec![SwitchCase {
                when: lit(false),
                then: lit(10i64),
            }]);
            assert_eq!(eval!(o).unwrap(), Value::Null);
        }
    }

    mod date {
        use super::*;

        #[test]
        fn test_subtract_date_days() {
            let mut o = op(Operation::SubtractDate);
            o.values = Some(vec![lit("2025-03-01"), lit("2025-01-01")]);
            o.unit = Some("days".to_string());
            assert_eq!(eval!(o).unwrap(), Value::Int(59));
        }

        #[test]
        fn test_subtract_date_identical_dates() {
            for unit in ["days", "months", "years"] {
                let mut o = op(Operation::SubtractDate);
                o.values = Some(vec![lit("2025-06-15"), lit("2025-06-15")]);
                o.unit = Some(unit.to_string());
                assert_eq!(eval!(o).unwrap(), Value::Int(0));
            }
        }

        #[test]
        fn test_subtract_date_months_and_years_floor() {
            let mut o = op(Operation::SubtractDate);
            o.values = Some(vec![lit("2025-03-01"), lit("2024-01-01")]);
            o.unit = Some("months".to_string());
            // 425 days -> 14 months
            assert_eq!(eval!(o).unwrap(), Value::Int(14));

            let mut o = op(Operation::SubtractDate);
            o.values = Some(vec![lit("2025-01-01"), lit("2000-06-15")]);
            o.unit = Some("years".to_string());
            assert_eq!(eval!(o).unwrap(), Value::Int(24));
        }

        #[test]
        fn test_subtract_date_age_calculation_with_referencedate() {
            let mut params = HashMap::new();
            params.insert(
                "geboortedatum".to_string(),
                Value::String("2005-01-01".to_string()),
            );

            let mut o = op(Operation::SubtractDate);
            o.values = Some(vec![var("referencedate"), var("geboortedatum")]);
            o.unit = Some("years".to_string());
            // 2005-01-01 .. 2025-06-15 is 20 years
            assert_eq!(eval!(o, params).unwrap(), Value::Int(20));
        }

        #[test]
        fn test_subtract_date_unknown_unit_falls_back_to_days() {
            let mut o = op(Operation::SubtractDate);
            o.values = Some(vec![lit("2025-01-03"), lit("2025-01-01")]);
            o.unit = Some("fortnights".to_string());
            assert_eq!(eval!(o).unwrap(), Value::Int(2));
        }

        #[test]
        fn test_subtract_date_unparseable_yields_zero() {
            let mut o = op(Operation::SubtractDate);
            o.values = Some(vec![lit("not a date"), lit("2025-01-01")]);
            o.unit = Some("days".to_string());
            assert_eq!(eval!(o).unwrap(), Value::Int(0));
        }
    }

    mod nesting {
        use super::*;

        #[test]
        fn test_nested_subtract_in_max() {
            // MAX(0, 100 - 150) = 0
            let mut inner = op(Operation::Subtract);
            inner.values = Some(vec![lit(100i64), lit(150i64)]);

            let mut outer = op(Operation::Max);
            outer.values = Some(vec![lit(0i64), Expr::Operation(Box::new(inner))]);
            assert_eq!(eval!(outer).unwrap(), Value::Int(0));
        }

        #[test]
        fn test_unknown_operator_yields_null() {
            let o = op(Operation::Unknown);
            assert_eq!(eval!(o).unwrap(), Value::Null);
        }

        #[test]
        fn test_unknown_variable_yields_null() {
            let service = empty_service();
            let regulation = empty_regulation();
            let mut ctx = context(&service, &regulation, HashMap::new());
            let result = evaluate_expr(&var("bestaat_niet"), &mut ctx).unwrap();
            assert_eq!(result, Value::Null);
        }
    }
}
