//! Predicate tree: parses a filter document into a node tree and evaluates
//! it against a record. See spec.md §4.3. Parsing and evaluation are both
//! pure — no I/O, no shared state — so a filter can be built once and
//! evaluated across many records, including in parallel.

use crate::record::{partial_compare, values_equal, Record};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    MatchAll,
    AlwaysFalse,
    Invalid,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Eq { field: String, value: Value },
    Gt { field: String, value: Value },
    Lt { field: String, value: Value },
}

impl Filter {
    /// Parses a filter document per spec.md §4.3's five rules, in order.
    pub fn parse(doc: &Value) -> Filter {
        let Some(map) = doc.as_object() else {
            return Filter::Invalid;
        };

        if map.is_empty() {
            return Filter::MatchAll;
        }

        if let Some(Value::Array(items)) = map.get("$or") {
            if map.len() != 1 {
                return Filter::Invalid;
            }
            let children: Vec<Filter> = items
                .iter()
                .map(Filter::parse)
                .filter(|f| *f != Filter::MatchAll)
                .collect();
            return Filter::Or(children);
        }

        if let Some(Value::Array(items)) = map.get("$and") {
            if map.len() != 1 {
                return Filter::Invalid;
            }
            let children: Vec<Filter> = items.iter().map(Filter::parse).collect();
            return Filter::And(children);
        }

        if map.len() == 1 {
            let (field, value) = map.iter().next().expect("len == 1");
            return Self::parse_field_clause(field, value);
        }

        Filter::Invalid
    }

    fn parse_field_clause(field: &str, value: &Value) -> Filter {
        match value {
            Value::Object(op) if op.len() == 1 => {
                let (op_name, operand) = op.iter().next().expect("len == 1");
                match op_name.as_str() {
                    "$gt" => Filter::Gt {
                        field: field.to_string(),
                        value: operand.clone(),
                    },
                    "$lt" => Filter::Lt {
                        field: field.to_string(),
                        value: operand.clone(),
                    },
                    _ => Filter::Invalid,
                }
            }
            Value::Object(_) | Value::Array(_) | Value::Null => Filter::Invalid,
            scalar => Filter::Eq {
                field: field.to_string(),
                value: scalar.clone(),
            },
        }
    }

    /// Evaluates this node against `record` per spec.md §4.3's evaluation
    /// rules. `AND`/`OR` short-circuit; an empty `AND` is vacuously true, an
    /// empty `OR` is false.
    pub fn eval(&self, record: &Record) -> bool {
        match self {
            Filter::MatchAll => true,
            Filter::AlwaysFalse | Filter::Invalid => false,
            Filter::And(children) => children.iter().all(|c| c.eval(record)),
            Filter::Or(children) => children.iter().any(|c| c.eval(record)),
            Filter::Eq { field, value } => record
                .get(field)
                .is_some_and(|actual| values_equal(actual, value)),
            Filter::Gt { field, value } => record
                .get(field)
                .and_then(|actual| partial_compare(actual, value))
                .is_some_and(|ord| ord == Ordering::Greater),
            Filter::Lt { field, value } => record
                .get(field)
                .and_then(|actual| partial_compare(actual, value))
                .is_some_and(|ord| ord == Ordering::Less),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(json: Value) -> Record {
        json.as_object().unwrap().clone()
    }

    #[test]
    fn empty_mapping_is_match_all() {
        assert_eq!(Filter::parse(&json!({})), Filter::MatchAll);
        assert!(Filter::parse(&json!({})).eval(&rec(json!({"a": 1}))));
    }

    #[test]
    fn single_scalar_entry_is_eq() {
        let filter = Filter::parse(&json!({"status": "active"}));
        assert!(filter.eval(&rec(json!({"status": "active"}))));
        assert!(!filter.eval(&rec(json!({"status": "inactive"}))));
        assert!(!filter.eval(&rec(json!({"other": 1}))));
    }

    #[test]
    fn eq_permits_integer_float_crossover() {
        let filter = Filter::parse(&json!({"count": 3}));
        assert!(filter.eval(&rec(json!({"count": 3.0}))));
    }

    #[test]
    fn gt_and_lt_operator_forms() {
        let gt = Filter::parse(&json!({"age": {"$gt": 18}}));
        assert!(gt.eval(&rec(json!({"age": 21}))));
        assert!(!gt.eval(&rec(json!({"age": 18}))));

        let lt = Filter::parse(&json!({"age": {"$lt": 18}}));
        assert!(lt.eval(&rec(json!({"age": 10}))));
        assert!(!lt.eval(&rec(json!({"age": 18}))));
    }

    #[test]
    fn comparison_across_incompatible_types_is_false() {
        let gt = Filter::parse(&json!({"age": {"$gt": "18"}}));
        assert!(!gt.eval(&rec(json!({"age": 21}))));
    }

    #[test]
    fn and_short_circuits_and_empty_and_is_true() {
        let filter = Filter::parse(&json!({"$and": [{"a": 1}, {"b": 2}]}));
        assert!(filter.eval(&rec(json!({"a": 1, "b": 2}))));
        assert!(!filter.eval(&rec(json!({"a": 1, "b": 3}))));

        let empty_and = Filter::parse(&json!({"$and": []}));
        assert!(empty_and.eval(&rec(json!({}))));
    }

    #[test]
    fn or_drops_match_all_children_and_empty_or_is_false() {
        let filter = Filter::parse(&json!({"$or": [{}, {"a": 1}]}));
        // the {} child would trivialize the whole OR to true, so it's dropped
        assert_eq!(filter, Filter::Or(vec![Filter::Eq {
            field: "a".to_string(),
            value: json!(1),
        }]));
        assert!(filter.eval(&rec(json!({"a": 1}))));
        assert!(!filter.eval(&rec(json!({"a": 2}))));

        let empty_or = Filter::parse(&json!({"$or": [{}]}));
        assert!(!empty_or.eval(&rec(json!({"anything": true}))));
    }

    #[test]
    fn malformed_shapes_are_invalid() {
        assert_eq!(Filter::parse(&json!({"a": 1, "b": 2})), Filter::Invalid);
        assert_eq!(Filter::parse(&json!("not a map")), Filter::Invalid);
        assert_eq!(Filter::parse(&json!({"a": {"$unknown": 1}})), Filter::Invalid);
        assert!(!Filter::parse(&json!({"a": 1, "b": 2})).eval(&rec(json!({"a": 1, "b": 2}))));
    }
}
