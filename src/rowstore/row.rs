// Row values crossing the worker/frontend boundary.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A single cell. Numeric arithmetic follows the row store's native types:
/// integer sums stay integral, anything touching a float becomes a float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

pub type Row = Vec<Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Total order used by merge-side ORDER BY: NULL sorts first, numbers
    /// compare across Int/Float, text compares bytewise.
    pub fn compare(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal),
            (Text(a), Text(b)) => a.cmp(b),
            // Mixed text/number: numbers sort before text.
            (Text(_), _) => Ordering::Greater,
            (_, Text(_)) => Ordering::Less,
        }
    }

    /// Sum accumulation. NULL operands are ignored per SQL aggregate rules.
    pub fn add(&self, other: &Value) -> Value {
        use Value::*;
        match (self, other) {
            (Null, v) | (v, Null) => v.clone(),
            (Int(a), Int(b)) => Int(a + b),
            (Int(a), Float(b)) | (Float(b), Int(a)) => Float(*a as f64 + b),
            (Float(a), Float(b)) => Float(a + b),
            // Summing text is a schema error upstream; propagate NULL.
            _ => Null,
        }
    }

    /// Division for AVG reconstruction; no intermediate truncation.
    pub fn divide(&self, other: &Value) -> Value {
        let num = match self.as_f64() {
            Some(n) => n,
            None => return Value::Null,
        };
        match other.as_f64() {
            Some(d) if d != 0.0 => Value::Float(num / d),
            _ => Value::Null,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_null_first() {
        assert_eq!(Value::Null.compare(&Value::Int(0)), Ordering::Less);
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Ordering::Less);
        assert_eq!(
            Value::Text("a".into()).compare(&Value::Text("b".into())),
            Ordering::Less
        );
    }

    #[test]
    fn integer_sum_stays_integral() {
        let s = Value::Int(2).add(&Value::Int(3));
        assert_eq!(s, Value::Int(5));
        let f = s.add(&Value::Float(0.5));
        assert_eq!(f, Value::Float(5.5));
    }

    #[test]
    fn avg_division_is_exact() {
        let avg = Value::Int(7).divide(&Value::Int(2));
        assert_eq!(avg, Value::Float(3.5));
        assert_eq!(Value::Int(1).divide(&Value::Int(0)), Value::Null);
    }
}
