//! Reference token interpreter
//!
//! Formulas: `operand (op operand)*`, evaluated left to right with `+ - * /`.
//! Conditions: a single operand (truthiness) or `lhs op rhs` with `== != < <= > >=`.
//! Tables: the first source node's value selects the row whose first cell matches;
//! the second cell is the result.
//!
//! Operands are `@value.<nodeId>` references or numeric/string literals. A missing
//! input yields no value rather than an error.

use tracing::trace;

use crate::domain::{Capability, LookupTable, Node, OwnInputs, Rule, RuleKind, TokenRef};
use crate::infrastructure::traits::{EvalError, Interpreter};

#[derive(Debug, Default)]
pub struct TokenInterpreter;

impl TokenInterpreter {
    pub fn new() -> Self {
        Self
    }

    fn operand<'a>(token: &'a str, inputs: &'a OwnInputs) -> Result<Option<&'a str>, EvalError> {
        match TokenRef::parse(token) {
            Some(TokenRef::Value(id)) => Ok(inputs.value_of(id)),
            Some(TokenRef::Table(id)) => Err(EvalError::new(format!(
                "table reference {id} is not a scalar operand"
            ))),
            None => Ok(Some(token)),
        }
    }

    fn number(raw: &str) -> Result<f64, EvalError> {
        raw.trim()
            .parse::<f64>()
            .map_err(|_| EvalError::new(format!("not a number: {raw}")))
    }

    fn format_number(value: f64) -> String {
        if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            format!("{value}")
        }
    }

    fn formula(rule: &Rule, inputs: &OwnInputs) -> Result<Option<String>, EvalError> {
        let mut tokens = rule.tokens.iter();
        let Some(first) = tokens.next() else {
            return Ok(None);
        };
        let Some(first) = Self::operand(first, inputs)? else {
            return Ok(None);
        };
        let mut acc = Self::number(first)?;

        while let Some(op) = tokens.next() {
            let rhs = tokens
                .next()
                .ok_or_else(|| EvalError::new(format!("dangling operator {op} in {}", rule.id)))?;
            let Some(rhs) = Self::operand(rhs, inputs)? else {
                return Ok(None);
            };
            let rhs = Self::number(rhs)?;
            acc = match op.as_str() {
                "+" => acc + rhs,
                "-" => acc - rhs,
                "*" => acc * rhs,
                "/" if rhs == 0.0 => {
                    return Err(EvalError::new(format!("division by zero in {}", rule.id)))
                }
                "/" => acc / rhs,
                other => return Err(EvalError::new(format!("unknown operator {other}"))),
            };
        }
        Ok(Some(Self::format_number(acc)))
    }

    fn truthy(raw: &str) -> bool {
        let raw = raw.trim();
        !(raw.is_empty() || raw == "0" || raw.eq_ignore_ascii_case("false"))
    }

    fn condition(rule: &Rule, inputs: &OwnInputs) -> Result<Option<String>, EvalError> {
        let result = match rule.tokens.as_slice() {
            [single] => match Self::operand(single, inputs)? {
                Some(v) => Self::truthy(v),
                None => return Ok(None),
            },
            [lhs, op, rhs] => {
                let (Some(lhs), Some(rhs)) =
                    (Self::operand(lhs, inputs)?, Self::operand(rhs, inputs)?)
                else {
                    return Ok(None);
                };
                Self::compare(lhs, op, rhs)?
            }
            _ => {
                return Err(EvalError::new(format!(
                    "condition {} must have 1 or 3 tokens",
                    rule.id
                )))
            }
        };
        Ok(Some(result.to_string()))
    }

    fn compare(lhs: &str, op: &str, rhs: &str) -> Result<bool, EvalError> {
        let numeric = Self::number(lhs).and_then(|l| Self::number(rhs).map(|r| (l, r)));
        match (op, numeric) {
            ("==", Ok((l, r))) => Ok(l == r),
            ("!=", Ok((l, r))) => Ok(l != r),
            ("==", Err(_)) => Ok(lhs == rhs),
            ("!=", Err(_)) => Ok(lhs != rhs),
            ("<", Ok((l, r))) => Ok(l < r),
            ("<=", Ok((l, r))) => Ok(l <= r),
            (">", Ok((l, r))) => Ok(l > r),
            (">=", Ok((l, r))) => Ok(l >= r),
            ("<" | "<=" | ">" | ">=", Err(e)) => Err(e),
            (other, _) => Err(EvalError::new(format!("unknown comparison {other}"))),
        }
    }

    fn table(
        node: &Node,
        table: &LookupTable,
        inputs: &OwnInputs,
    ) -> Result<Option<String>, EvalError> {
        let key = match table.source_node_ids.first() {
            Some(source) => inputs.value_of(source),
            None => node.value.as_deref(),
        };
        let Some(key) = key else {
            return Ok(None);
        };
        Ok(table
            .rows
            .iter()
            .find(|row| row.first().map(String::as_str) == Some(key))
            .and_then(|row| row.get(1).cloned()))
    }
}

impl Interpreter for TokenInterpreter {
    fn evaluate(
        &self,
        node: &Node,
        capability: &Capability,
        inputs: &OwnInputs,
    ) -> Result<Option<String>, EvalError> {
        trace!("evaluate: node={} capability={}", node.id, capability);
        match capability {
            Capability::Neutral => Ok(None),
            Capability::Formula(id) | Capability::Condition(id) => {
                let rule = inputs
                    .rules
                    .get(id)
                    .ok_or_else(|| EvalError::new(format!("rule {id} not among inputs")))?;
                match rule.kind {
                    RuleKind::Formula => Self::formula(rule, inputs),
                    RuleKind::Condition => Self::condition(rule, inputs),
                }
            }
            Capability::Table(id) => {
                let table = inputs
                    .tables
                    .get(id)
                    .ok_or_else(|| EvalError::new(format!("table {id} not among inputs")))?;
                Self::table(node, table, inputs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NodeType;
    use rstest::rstest;

    fn inputs_with(rule_kind: RuleKind, tokens: &[&str], values: &[(&str, &str)]) -> OwnInputs {
        let mut inputs = OwnInputs::default();
        inputs.rules.insert(
            "r".into(),
            Rule {
                id: "r".into(),
                node_id: "n".into(),
                kind: rule_kind,
                name: String::new(),
                tokens: tokens.iter().map(|t| t.to_string()).collect(),
            },
        );
        for (id, value) in values {
            inputs
                .node_values
                .insert(id.to_string(), Some(value.to_string()));
        }
        inputs
    }

    fn node() -> Node {
        Node::new("n", None, "t", NodeType::Field)
    }

    #[rstest]
    #[case(&["@value.a", "+", "@value.b"], Some("5"))]
    #[case(&["@value.a", "*", "2", "-", "1"], Some("3"))]
    #[case(&["@value.b", "/", "2"], Some("1.5"))]
    #[case(&["@value.missing", "+", "1"], None)]
    #[case(&[], None)]
    fn given_formula_when_evaluating_then_left_to_right_result(
        #[case] tokens: &[&str],
        #[case] expected: Option<&str>,
    ) {
        let inputs = inputs_with(RuleKind::Formula, tokens, &[("a", "2"), ("b", "3")]);
        let result = TokenInterpreter::new()
            .evaluate(&node(), &Capability::Formula("r".into()), &inputs)
            .unwrap();
        assert_eq!(result.as_deref(), expected);
    }

    #[test]
    fn given_division_by_zero_when_evaluating_then_error() {
        let inputs = inputs_with(RuleKind::Formula, &["1", "/", "0"], &[]);
        let err = TokenInterpreter::new()
            .evaluate(&node(), &Capability::Formula("r".into()), &inputs)
            .unwrap_err();
        assert!(err.message.contains("division by zero"));
    }

    #[rstest]
    #[case(&["@value.a", ">", "1"], Some("true"))]
    #[case(&["@value.a", "==", "3"], Some("false"))]
    #[case(&["@value.s", "==", "red"], Some("true"))]
    #[case(&["@value.a"], Some("true"))]
    #[case(&["@value.none", "<", "1"], None)]
    fn given_condition_when_evaluating_then_boolean_string(
        #[case] tokens: &[&str],
        #[case] expected: Option<&str>,
    ) {
        let inputs = inputs_with(RuleKind::Condition, tokens, &[("a", "2"), ("s", "red")]);
        let result = TokenInterpreter::new()
            .evaluate(&node(), &Capability::Condition("r".into()), &inputs)
            .unwrap();
        assert_eq!(result.as_deref(), expected);
    }

    #[test]
    fn given_table_when_evaluating_then_matching_row_value_returned() {
        let mut inputs = OwnInputs::default();
        inputs.node_values.insert("size".into(), Some("M".into()));
        inputs.tables.insert(
            "tbl".into(),
            LookupTable {
                id: "tbl".into(),
                node_id: "n".into(),
                name: "Prices".into(),
                columns: vec!["size".into(), "price".into()],
                rows: vec![
                    vec!["S".into(), "10".into()],
                    vec!["M".into(), "12".into()],
                ],
                source_node_ids: vec!["size".into()],
                linked_table_ids: vec![],
                lookup_variable_id: None,
            },
        );

        let result = TokenInterpreter::new()
            .evaluate(&node(), &Capability::Table("tbl".into()), &inputs)
            .unwrap();

        assert_eq!(result.as_deref(), Some("12"));
    }

    #[test]
    fn given_rule_outside_inputs_when_evaluating_then_error() {
        let err = TokenInterpreter::new()
            .evaluate(
                &node(),
                &Capability::Formula("foreign".into()),
                &OwnInputs::default(),
            )
            .unwrap_err();
        assert!(err.message.contains("foreign"));
    }
}
