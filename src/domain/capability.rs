//! Capability tagging and reference tokens
//!
//! A variable's `sourceRef` is decoded once into a [`Capability`]; rule tokens are
//! decoded into [`TokenRef`]s when ids need remapping.

use std::fmt;

const FORMULA_PREFIX: &str = "formula:";
const CONDITION_PREFIX: &str = "condition:";
const TABLE_PREFIX: &str = "table:";

const VALUE_TOKEN: &str = "@value.";
const TABLE_TOKEN: &str = "@table.";

/// Computed behavior of a variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    Neutral,
    Formula(String),
    Condition(String),
    Table(String),
}

impl Capability {
    /// Decode a `sourceRef` string. Unknown prefixes and empty targets are neutral.
    pub fn decode(source_ref: Option<&str>) -> Self {
        let Some(raw) = source_ref.map(str::trim) else {
            return Capability::Neutral;
        };
        let tagged: [(&str, fn(String) -> Capability); 3] = [
            (FORMULA_PREFIX, Capability::Formula),
            (CONDITION_PREFIX, Capability::Condition),
            (TABLE_PREFIX, Capability::Table),
        ];
        for (prefix, make) in tagged {
            if let Some(target) = raw.strip_prefix(prefix) {
                if target.is_empty() {
                    return Capability::Neutral;
                }
                return make(target.to_string());
            }
        }
        Capability::Neutral
    }

    /// Encode back into `sourceRef` form.
    pub fn encode(&self) -> Option<String> {
        match self {
            Capability::Neutral => None,
            Capability::Formula(id) => Some(format!("{FORMULA_PREFIX}{id}")),
            Capability::Condition(id) => Some(format!("{CONDITION_PREFIX}{id}")),
            Capability::Table(id) => Some(format!("{TABLE_PREFIX}{id}")),
        }
    }

    pub fn target_id(&self) -> Option<&str> {
        match self {
            Capability::Neutral => None,
            Capability::Formula(id) | Capability::Condition(id) | Capability::Table(id) => {
                Some(id)
            }
        }
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self, Capability::Neutral)
    }

    /// Rewrite the target id, keeping the tag.
    pub fn remap(&self, f: impl FnOnce(&str) -> String) -> Self {
        match self {
            Capability::Neutral => Capability::Neutral,
            Capability::Formula(id) => Capability::Formula(f(id)),
            Capability::Condition(id) => Capability::Condition(f(id)),
            Capability::Table(id) => Capability::Table(f(id)),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Some(s) => f.write_str(&s),
            None => f.write_str("neutral"),
        }
    }
}

/// Reference embedded in a rule token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRef<'a> {
    Value(&'a str),
    Table(&'a str),
}

impl<'a> TokenRef<'a> {
    pub fn parse(token: &'a str) -> Option<Self> {
        if let Some(id) = token.strip_prefix(VALUE_TOKEN) {
            return (!id.is_empty()).then_some(TokenRef::Value(id));
        }
        if let Some(id) = token.strip_prefix(TABLE_TOKEN) {
            return (!id.is_empty()).then_some(TokenRef::Table(id));
        }
        None
    }

    pub fn value_token(node_id: &str) -> String {
        format!("{VALUE_TOKEN}{node_id}")
    }

    pub fn table_token(table_id: &str) -> String {
        format!("{TABLE_TOKEN}{table_id}")
    }
}

/// Rewrite node and table references in `tokens`; literals pass through.
pub fn remap_tokens(
    tokens: &[String],
    mut node_id: impl FnMut(&str) -> Option<String>,
    mut table_id: impl FnMut(&str) -> Option<String>,
) -> Vec<String> {
    tokens
        .iter()
        .map(|token| match TokenRef::parse(token) {
            Some(TokenRef::Value(id)) => node_id(id)
                .map(|new| TokenRef::value_token(&new))
                .unwrap_or_else(|| token.clone()),
            Some(TokenRef::Table(id)) => table_id(id)
                .map(|new| TokenRef::table_token(&new))
                .unwrap_or_else(|| token.clone()),
            None => token.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("formula:f1"), Capability::Formula("f1".into()))]
    #[case(Some("condition:c1"), Capability::Condition("c1".into()))]
    #[case(Some("table:t1"), Capability::Table("t1".into()))]
    #[case(Some("  formula:f1 "), Capability::Formula("f1".into()))]
    #[case(Some("formula:"), Capability::Neutral)]
    #[case(Some("@value.n1"), Capability::Neutral)]
    #[case(Some("plain"), Capability::Neutral)]
    #[case(None, Capability::Neutral)]
    fn given_source_ref_when_decoding_then_returns_capability(
        #[case] source_ref: Option<&str>,
        #[case] expected: Capability,
    ) {
        assert_eq!(Capability::decode(source_ref), expected);
    }

    #[test]
    fn given_capability_when_remapping_then_tag_is_kept() {
        let cap = Capability::Table("t1".into()).remap(|id| format!("{id}-2"));
        assert_eq!(cap.encode().as_deref(), Some("table:t1-2"));
        assert_eq!(Capability::Neutral.remap(|_| "x".into()), Capability::Neutral);
    }

    #[test]
    fn given_tokens_when_remapping_then_only_known_references_change() {
        let tokens: Vec<String> = ["@value.a", "+", "@value.outside", "*", "@table.t", "2"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let remapped = remap_tokens(
            &tokens,
            |id| (id == "a").then(|| "a-2".to_string()),
            |id| (id == "t").then(|| "t-2".to_string()),
        );

        assert_eq!(
            remapped,
            vec!["@value.a-2", "+", "@value.outside", "*", "@table.t-2", "2"]
        );
    }
}
