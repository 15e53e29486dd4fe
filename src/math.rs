//! Statistical primitives used by rule conditions.
//!
//! Everything here is a pure function over its inputs. Degenerate data (an empty
//! reference set, zero variance, a window longer than the series) resolves to a
//! documented sentinel instead of an error; only structurally invalid matrices
//! produce a `MathError`.

use serde_json::Value;

use crate::rules::operator::Operator;

pub type Matrix = Vec<Vec<f64>>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MathError {
    #[error("incompatible matrices for multiplication: {left_cols} columns vs {right_rows} rows")]
    DimensionMismatch { left_cols: usize, right_rows: usize },
    #[error("matrix has no rows or no columns")]
    EmptyMatrix,
    #[error("matrix row {row} has {len} columns, expected {expected}")]
    RaggedMatrix { row: usize, len: usize, expected: usize },
}

// =============================================================================
// Linear algebra
// =============================================================================

fn shape(m: &[Vec<f64>]) -> Result<(usize, usize), MathError> {
    let cols = m.first().map(|r| r.len()).unwrap_or(0);
    if m.is_empty() || cols == 0 {
        return Err(MathError::EmptyMatrix);
    }
    for (row, r) in m.iter().enumerate() {
        if r.len() != cols {
            return Err(MathError::RaggedMatrix { row, len: r.len(), expected: cols });
        }
    }
    Ok((m.len(), cols))
}

/// Standard matrix product `a × b`. Requires `cols(a) == rows(b)`.
pub fn multiply_matrices(a: &[Vec<f64>], b: &[Vec<f64>]) -> Result<Matrix, MathError> {
    let (a_rows, a_cols) = shape(a)?;
    let (b_rows, b_cols) = shape(b)?;
    if a_cols != b_rows {
        return Err(MathError::DimensionMismatch { left_cols: a_cols, right_rows: b_rows });
    }

    let mut out = vec![vec![0.0; b_cols]; a_rows];
    for (r, out_row) in out.iter_mut().enumerate() {
        for (c, cell) in out_row.iter_mut().enumerate() {
            *cell = (0..a_cols).map(|i| a[r][i] * b[i][c]).sum();
        }
    }
    Ok(out)
}

// =============================================================================
// Descriptive statistics
// =============================================================================

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population standard deviation (divides by N).
pub fn population_std_dev(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mu = mean(data);
    let variance = data.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / data.len() as f64;
    variance.sqrt()
}

/// `(value - mean) / σ` against `dataset`.
///
/// Returns 0.0 when the dataset is empty or has zero variance. That zero means
/// "no signal yet", not "exactly at the mean".
pub fn z_score(value: f64, dataset: &[f64]) -> f64 {
    if dataset.is_empty() {
        return 0.0;
    }
    let sd = population_std_dev(dataset);
    if sd == 0.0 {
        return 0.0;
    }
    (value - mean(dataset)) / sd
}

/// Simple moving averages of each full `window`-sized slice, in input order.
/// No partial windows: a series shorter than the window yields nothing.
pub fn moving_average(dataset: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || dataset.len() < window {
        return Vec::new();
    }
    dataset
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

// =============================================================================
// Generic comparison
// =============================================================================

fn as_number(v: &Value) -> Option<f64> {
    v.as_f64()
}

/// Equality with numbers compared as f64, so `1` and `1.0` match.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn ordered(a: &Value, b: &Value, pred: fn(std::cmp::Ordering) -> bool) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).map(pred).unwrap_or(false),
            _ => false,
        },
        (Value::String(x), Value::String(y)) => pred(x.cmp(y)),
        _ => false,
    }
}

/// Reads a `{ "live": n, "history": [..] }` statistical fact.
pub fn live_and_history(v: &Value) -> Option<(f64, Vec<f64>)> {
    let obj = v.as_object()?;
    let live = obj.get("live")?.as_f64()?;
    let history = obj
        .get("history")?
        .as_array()?
        .iter()
        .map(|h| h.as_f64())
        .collect::<Option<Vec<f64>>>()?;
    Some((live, history))
}

/// Compare `value` against `threshold` with `op`.
///
/// Type mismatches and unknown operators return `false`; this path never errors.
pub fn compare(value: &Value, op: &Operator, threshold: &Value) -> bool {
    use std::cmp::Ordering::*;
    match op {
        Operator::Equals => values_equal(value, threshold),
        Operator::NotEquals => !values_equal(value, threshold),
        Operator::GreaterThan => ordered(value, threshold, |o| o == Greater),
        Operator::LessThan => ordered(value, threshold, |o| o == Less),
        Operator::GreaterThanOrEquals => ordered(value, threshold, |o| o != Less),
        Operator::LessThanOrEquals => ordered(value, threshold, |o| o != Greater),
        Operator::In => match threshold {
            Value::Array(set) => set.iter().any(|t| values_equal(value, t)),
            _ => false,
        },
        Operator::NotIn => match threshold {
            Value::Array(set) => !set.iter().any(|t| values_equal(value, t)),
            _ => false,
        },
        Operator::Contains => match value {
            Value::Array(items) => items.iter().any(|i| values_equal(i, threshold)),
            _ => false,
        },
        Operator::DoesNotContain => match value {
            Value::Array(items) => !items.iter().any(|i| values_equal(i, threshold)),
            _ => false,
        },
        Operator::ContainsCaseInsensitive => match (value, threshold) {
            (Value::Array(items), Value::String(needle)) => {
                let needle = needle.to_lowercase();
                items
                    .iter()
                    .any(|i| i.as_str().map(|s| s.to_lowercase() == needle).unwrap_or(false))
            }
            _ => false,
        },
        Operator::ZScoreGreaterThan => match (live_and_history(value), as_number(threshold)) {
            (Some((live, history)), Some(th)) => z_score(live, &history) > th,
            _ => false,
        },
        Operator::Unsupported(_) => false,
    }
}

/// `compare` for a computed scalar (z-score, ratio, risk score).
pub fn compare_scalar(value: f64, op: &Operator, threshold: &Value) -> bool {
    match serde_json::Number::from_f64(value) {
        Some(n) => compare(&Value::Number(n), op, threshold),
        // NaN/inf have no JSON form; only ordering against a number is meaningful.
        None => match (op, threshold.as_f64()) {
            (Operator::GreaterThan, Some(t)) => value > t,
            (Operator::LessThan, Some(t)) => value < t,
            (Operator::GreaterThanOrEquals, Some(t)) => value >= t,
            (Operator::LessThanOrEquals, Some(t)) => value <= t,
            (Operator::NotEquals, _) => true,
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_risk_vector_product() {
        let vec = vec![vec![1.0, 2.0]];
        let weights = vec![vec![0.5, 0.2], vec![0.1, 0.8]];
        let out = multiply_matrices(&vec, &weights).unwrap();
        assert_eq!(out.len(), 1);
        assert!(approx(out[0][0], 0.7));
        assert!(approx(out[0][1], 1.8));
    }

    #[test]
    fn test_product_shape() {
        let a = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]; // 2x3
        let b = vec![vec![1.0, 0.0, 2.0, 1.0], vec![0.0, 1.0, 1.0, 1.0], vec![3.0, 1.0, 0.0, 1.0]]; // 3x4
        let out = multiply_matrices(&a, &b).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.len() == 4));
        assert!(approx(out[1][0], 4.0 + 18.0));
    }

    #[test]
    fn test_identity_is_noop() {
        let a = vec![vec![1.5, -2.0], vec![3.25, 4.0], vec![0.0, 7.0]];
        let id = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert_eq!(multiply_matrices(&a, &id).unwrap(), a);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = vec![vec![1.0, 2.0, 3.0]];
        let b = vec![vec![1.0], vec![2.0]];
        assert_eq!(
            multiply_matrices(&a, &b),
            Err(MathError::DimensionMismatch { left_cols: 3, right_rows: 2 })
        );
    }

    #[test]
    fn test_empty_and_ragged_rejected() {
        assert_eq!(multiply_matrices(&[], &[vec![1.0]]), Err(MathError::EmptyMatrix));
        let ragged = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(matches!(
            multiply_matrices(&[vec![1.0, 1.0]], &ragged),
            Err(MathError::RaggedMatrix { row: 1, .. })
        ));
    }

    #[test]
    fn test_z_score_reference_dataset() {
        let data = [10.0, 12.0, 23.0, 23.0, 16.0, 23.0, 21.0, 16.0];
        assert!(approx(mean(&data), 18.0));
        assert!(approx(population_std_dev(&data), 24.0_f64.sqrt()));
        let z = z_score(30.0, &data);
        assert!(approx(z, 12.0 / 24.0_f64.sqrt()));
        assert!((z - 2.48).abs() < 0.05);
    }

    #[test]
    fn test_z_score_sentinels() {
        assert_eq!(z_score(42.0, &[]), 0.0);
        let flat = [7.0; 12];
        assert_eq!(population_std_dev(&flat), 0.0);
        assert_eq!(z_score(7.0, &flat), 0.0);
        assert_eq!(z_score(1_000.0, &flat), 0.0);
    }

    #[test]
    fn test_moving_average() {
        assert_eq!(moving_average(&[10.0, 20.0, 30.0, 40.0, 50.0], 3), vec![20.0, 30.0, 40.0]);
        assert!(moving_average(&[1.0, 2.0], 3).is_empty());
        assert!(moving_average(&[1.0, 2.0], 0).is_empty());
        assert_eq!(moving_average(&[4.0, 6.0], 2), vec![5.0]);
    }

    #[test]
    fn test_compare_numeric() {
        assert!(compare(&json!(150), &Operator::GreaterThan, &json!(100)));
        assert!(!compare(&json!(100), &Operator::GreaterThan, &json!(100)));
        assert!(compare(&json!(100), &Operator::GreaterThanOrEquals, &json!(100.0)));
        assert!(compare(&json!(1), &Operator::Equals, &json!(1.0)));
        assert!(compare(&json!(3), &Operator::LessThanOrEquals, &json!(3)));
        assert!(compare(&json!("b"), &Operator::GreaterThan, &json!("a")));
    }

    #[test]
    fn test_compare_type_mismatch_is_false() {
        assert!(!compare(&json!("150"), &Operator::GreaterThan, &json!(100)));
        assert!(!compare(&Value::Null, &Operator::LessThan, &json!(100)));
        assert!(!compare(&json!(1), &Operator::In, &json!(1)));
        assert!(!compare(&json!(1), &Operator::NotIn, &json!("x")));
        assert!(!compare(&json!(1), &Operator::Unsupported("between".into()), &json!(1)));
    }

    #[test]
    fn test_compare_membership() {
        let set = json!(["US-East", "US-West"]);
        assert!(compare(&json!("US-East"), &Operator::In, &set));
        assert!(compare(&json!("EU"), &Operator::NotIn, &set));
        assert!(!compare(&json!("EU"), &Operator::In, &set));
    }

    #[test]
    fn test_contains_case_insensitive() {
        let items = json!(["Iced Matcha Latte", "Butter Croissant"]);
        assert!(compare(&items, &Operator::ContainsCaseInsensitive, &json!("iced matcha latte")));
        assert!(!compare(&items, &Operator::ContainsCaseInsensitive, &json!("latte")));
        assert!(!compare(&json!("Iced Matcha Latte"), &Operator::ContainsCaseInsensitive, &json!("iced matcha latte")));
    }

    #[test]
    fn test_contains_exact_member() {
        let items = json!(["Avocado Toast", "Latte"]);
        assert!(compare(&items, &Operator::Contains, &json!("Avocado Toast")));
        assert!(!compare(&items, &Operator::Contains, &json!("avocado toast")));
        assert!(compare(&json!([1, 2]), &Operator::Contains, &json!(2.0)));
        assert!(compare(&items, &Operator::DoesNotContain, &json!("Mocha")));
        assert!(!compare(&items, &Operator::DoesNotContain, &json!("Latte")));
        assert!(!compare(&json!("Avocado Toast"), &Operator::Contains, &json!("Avocado Toast")));
        assert!(!compare(&json!("Latte"), &Operator::DoesNotContain, &json!("Mocha")));
    }

    #[test]
    fn test_z_score_greater_than_uses_signed_score() {
        let spike = json!({ "live": 300.0, "history": [100, 110, 95, 105, 90] });
        let dip = json!({ "live": 10.0, "history": [100, 110, 95, 105, 90] });
        assert!(compare(&spike, &Operator::ZScoreGreaterThan, &json!(2)));
        assert!(!compare(&dip, &Operator::ZScoreGreaterThan, &json!(2)));
        assert!(!compare(&json!(300), &Operator::ZScoreGreaterThan, &json!(2)));
    }

    #[test]
    fn test_compare_scalar_non_finite() {
        assert!(compare_scalar(f64::INFINITY, &Operator::GreaterThan, &json!(1.2)));
        assert!(!compare_scalar(f64::NAN, &Operator::GreaterThan, &json!(1.2)));
        assert!(compare_scalar(2.5, &Operator::GreaterThan, &json!(2)));
    }
}
