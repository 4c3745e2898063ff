//! Decimal- and RFC3339-temporal-aware comparison semantics shared by the
//! predicate language's comparison operators.
//!
//! JSON numbers are compared via `BigDecimal` rather than `f64` so that
//! `1` and `1.0`, or large integers beyond `f64`'s exact range, compare
//! correctly. String values that parse as RFC3339 timestamps or dates
//! compare chronologically rather than lexicographically for ordering
//! operators.

use std::cmp::Ordering;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde_json::Number;
use serde_json::Value;
use time::Date;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A three-valued evaluation outcome: evaluation can fail to produce a
/// definite answer (e.g. comparing a string to a number) without that
/// being a predicate error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriState {
    /// The comparison holds.
    True,
    /// The comparison does not hold.
    False,
    /// The comparison could not be evaluated for the given operand types.
    Unknown,
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

impl TriState {
    /// Returns whether this outcome is definitely `True`.
    #[must_use]
    pub const fn is_true(self) -> bool {
        matches!(self, Self::True)
    }
}

/// The comparison operators the predicate language supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `==`
    Equals,
    /// `!=`
    NotEquals,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// String containment / array containment-of-all.
    Contains,
    /// Set membership: left value is one of the elements of right array.
    InSet,
    /// Deep structural equality for arrays/objects.
    DeepEquals,
    /// Deep structural inequality for arrays/objects.
    DeepNotEquals,
}

/// Evaluates a comparator between two JSON values.
#[must_use]
pub fn evaluate(comparator: Comparator, left: &Value, right: &Value) -> TriState {
    match comparator {
        Comparator::Equals => compare_equals(left, right),
        Comparator::NotEquals => compare_not_equals(left, right),
        Comparator::GreaterThan
        | Comparator::GreaterThanOrEqual
        | Comparator::LessThan
        | Comparator::LessThanOrEqual => compare_ordering(comparator, left, right),
        Comparator::Contains => compare_contains(left, right),
        Comparator::InSet => compare_in_set(left, right),
        Comparator::DeepEquals => compare_deep_equals(left, right),
        Comparator::DeepNotEquals => compare_deep_not_equals(left, right),
    }
}

/// Compares JSON values for equality, with decimal-aware numeric handling.
fn compare_equals(left: &Value, right: &Value) -> TriState {
    match (left, right) {
        (Value::Number(left_num), Value::Number(right_num)) => {
            compare_decimal_equality(left_num, right_num, true)
        }
        _ => TriState::from(left == right),
    }
}

/// Compares JSON values for inequality, with decimal-aware numeric
/// handling.
fn compare_not_equals(left: &Value, right: &Value) -> TriState {
    match (left, right) {
        (Value::Number(left_num), Value::Number(right_num)) => {
            compare_decimal_equality(left_num, right_num, false)
        }
        _ => TriState::from(left != right),
    }
}

/// Compares numeric or temporal JSON values using ordering comparators.
fn compare_ordering(comparator: Comparator, left: &Value, right: &Value) -> TriState {
    if let (Some(left_num), Some(right_num)) = (left.as_number(), right.as_number()) {
        return decimal_cmp(left_num, right_num).map_or(TriState::Unknown, |ordering| {
            TriState::from(ordering_holds(comparator, ordering))
        });
    }

    if let (Value::String(left), Value::String(right)) = (left, right) {
        if let Some(ordering) = temporal_cmp(left, right) {
            return TriState::from(ordering_holds(comparator, ordering));
        }
        let ordering = left.cmp(right);
        return TriState::from(ordering_holds(comparator, ordering));
    }

    TriState::Unknown
}

fn ordering_holds(comparator: Comparator, ordering: Ordering) -> bool {
    match comparator {
        Comparator::GreaterThan => ordering.is_gt(),
        Comparator::GreaterThanOrEqual => ordering.is_ge(),
        Comparator::LessThan => ordering.is_lt(),
        Comparator::LessThanOrEqual => ordering.is_le(),
        _ => false,
    }
}

/// Evaluates containment semantics for JSON values.
fn compare_contains(left: &Value, right: &Value) -> TriState {
    match (left, right) {
        (Value::String(haystack), Value::String(needle)) => {
            TriState::from(haystack.contains(needle.as_str()))
        }
        (Value::Array(haystack), Value::Array(needle)) => {
            TriState::from(needle.iter().all(|item| haystack.contains(item)))
        }
        _ => TriState::Unknown,
    }
}

/// Evaluates set membership for JSON values.
fn compare_in_set(value: &Value, expected: &Value) -> TriState {
    let Value::Array(values) = expected else {
        return TriState::Unknown;
    };
    match value {
        Value::Array(_) | Value::Object(_) => TriState::Unknown,
        _ => TriState::from(values.contains(value)),
    }
}

/// Compares arrays/objects using deep structural equality.
fn compare_deep_equals(left: &Value, right: &Value) -> TriState {
    match (left, right) {
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            TriState::from(left == right)
        }
        _ => TriState::Unknown,
    }
}

/// Compares arrays/objects using deep structural inequality.
fn compare_deep_not_equals(left: &Value, right: &Value) -> TriState {
    match (left, right) {
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            TriState::from(left != right)
        }
        _ => TriState::Unknown,
    }
}

/// Compares numbers by parsing them into `BigDecimal` values.
fn compare_decimal_equality(left: &Number, right: &Number, equals: bool) -> TriState {
    let (Some(left), Some(right)) = (decimal_from_number(left), decimal_from_number(right))
    else {
        return TriState::Unknown;
    };
    TriState::from(if equals { left == right } else { left != right })
}

/// Orders numeric JSON values using decimal-aware comparison.
fn decimal_cmp(left: &Number, right: &Number) -> Option<Ordering> {
    let left = decimal_from_number(left)?;
    let right = decimal_from_number(right)?;
    Some(left.cmp(&right))
}

/// Parses a JSON number into `BigDecimal` via its stable string
/// representation.
fn decimal_from_number(number: &Number) -> Option<BigDecimal> {
    BigDecimal::from_str(&number.to_string()).ok()
}

/// Compares RFC3339 date-time or date-only strings.
fn temporal_cmp(left: &str, right: &str) -> Option<Ordering> {
    if let (Ok(left), Ok(right)) =
        (OffsetDateTime::parse(left, &Rfc3339), OffsetDateTime::parse(right, &Rfc3339))
    {
        return Some(left.cmp(&right));
    }
    let left = parse_rfc3339_date(left)?;
    let right = parse_rfc3339_date(right)?;
    Some(left.cmp(&right))
}

/// Parses an RFC3339 date-only value (`YYYY-MM-DD`).
fn parse_rfc3339_date(value: &str) -> Option<Date> {
    let mut parts = value.split('-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u8 = parts.next()?.parse().ok()?;
    let day: u8 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let month = time::Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Comparator;
    use super::TriState;
    use super::evaluate;

    #[test]
    fn integer_and_float_compare_equal() {
        let result = evaluate(Comparator::Equals, &json!(1), &json!(1.0));
        assert_eq!(result, TriState::True);
    }

    #[test]
    fn string_and_number_ordering_is_unknown() {
        let result = evaluate(Comparator::GreaterThan, &json!("x"), &json!(1));
        assert_eq!(result, TriState::Unknown);
    }

    #[test]
    fn rfc3339_timestamps_order_chronologically() {
        let result = evaluate(
            Comparator::LessThan,
            &json!("2024-01-01T00:00:00Z"),
            &json!("2024-06-01T00:00:00Z"),
        );
        assert_eq!(result, TriState::True);
    }

    #[test]
    fn contains_checks_array_subset() {
        let result = evaluate(Comparator::Contains, &json!([1, 2, 3]), &json!([1, 3]));
        assert_eq!(result, TriState::True);
    }

    #[test]
    fn in_set_checks_membership() {
        let result = evaluate(Comparator::InSet, &json!("b"), &json!(["a", "b", "c"]));
        assert_eq!(result, TriState::True);
    }
}
