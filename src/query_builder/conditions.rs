use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single filter on a query. Values are always bound as parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Eq { field: String, value: Value },
    NotEq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    IsNull { field: String },
    IsNotNull { field: String },
    /// Matches when any member matches
    Or { any: Vec<Predicate> },
}

impl Predicate {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn not_eq(field: &str, value: impl Into<Value>) -> Self {
        Predicate::NotEq {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn in_values(field: &str, values: Vec<Value>) -> Self {
        Predicate::In {
            field: field.to_string(),
            values,
        }
    }

    pub fn is_null(field: &str) -> Self {
        Predicate::IsNull {
            field: field.to_string(),
        }
    }

    pub fn is_not_null(field: &str) -> Self {
        Predicate::IsNotNull {
            field: field.to_string(),
        }
    }

    pub fn or(any: Vec<Predicate>) -> Self {
        Predicate::Or { any }
    }

    /// True when this predicate (or any member of an OR group) filters `field`
    pub fn references(&self, field: &str) -> bool {
        match self {
            Predicate::Eq { field: f, .. }
            | Predicate::NotEq { field: f, .. }
            | Predicate::In { field: f, .. }
            | Predicate::IsNull { field: f }
            | Predicate::IsNotNull { field: f } => f == field,
            Predicate::Or { any } => any.iter().any(|p| p.references(field)),
        }
    }

    /// Render as SQL, pushing bound values onto `params` and numbering
    /// placeholders from their position there.
    pub fn to_sql(&self, params: &mut Vec<Value>) -> String {
        match self {
            Predicate::Eq { field, value } => {
                params.push(value.clone());
                format!("{} = ${}", quote_ident(field), params.len())
            }
            Predicate::NotEq { field, value } => {
                params.push(value.clone());
                format!("{} IS DISTINCT FROM ${}", quote_ident(field), params.len())
            }
            Predicate::In { field, values } => {
                if values.is_empty() {
                    return "FALSE".to_string();
                }
                let placeholders = values
                    .iter()
                    .map(|value| {
                        params.push(value.clone());
                        format!("${}", params.len())
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} IN ({placeholders})", quote_ident(field))
            }
            Predicate::IsNull { field } => format!("{} IS NULL", quote_ident(field)),
            Predicate::IsNotNull { field } => format!("{} IS NOT NULL", quote_ident(field)),
            Predicate::Or { any } => {
                if any.is_empty() {
                    return "FALSE".to_string();
                }
                let parts: Vec<String> = any.iter().map(|p| p.to_sql(params)).collect();
                format!("({})", parts.join(" OR "))
            }
        }
    }

    /// Stable textual form used to build cache keys
    pub fn fingerprint(&self) -> String {
        match self {
            Predicate::Eq { field, value } => format!("{field}={value}"),
            Predicate::NotEq { field, value } => format!("{field}!={value}"),
            Predicate::In { field, values } => {
                let mut rendered: Vec<String> = values.iter().map(Value::to_string).collect();
                rendered.sort();
                format!("{field} in [{}]", rendered.join(","))
            }
            Predicate::IsNull { field } => format!("{field} is null"),
            Predicate::IsNotNull { field } => format!("{field} not null"),
            Predicate::Or { any } => {
                let mut parts: Vec<String> = any.iter().map(Predicate::fingerprint).collect();
                parts.sort();
                format!("or({})", parts.join("|"))
            }
        }
    }
}

/// Double-quote an identifier, escaping embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eq_binds_value() {
        let mut params = Vec::new();
        let sql = Predicate::eq("branch_id", "B1").to_sql(&mut params);
        assert_eq!(sql, "\"branch_id\" = $1");
        assert_eq!(params, vec![json!("B1")]);
    }

    #[test]
    fn test_placeholders_continue_from_existing_params() {
        let mut params = vec![json!(1)];
        let sql = Predicate::in_values("status", vec![json!("open"), json!("held")])
            .to_sql(&mut params);
        assert_eq!(sql, "\"status\" IN ($2, $3)");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let mut params = Vec::new();
        assert_eq!(Predicate::in_values("id", vec![]).to_sql(&mut params), "FALSE");
        assert!(params.is_empty());
    }

    #[test]
    fn test_or_group() {
        let mut params = Vec::new();
        let sql = Predicate::or(vec![
            Predicate::eq("branch_id", "B1"),
            Predicate::is_null("branch_id"),
        ])
        .to_sql(&mut params);
        assert_eq!(sql, "(\"branch_id\" = $1 OR \"branch_id\" IS NULL)");
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_fingerprint_ignores_value_order() {
        let a = Predicate::in_values("id", vec![json!(2), json!(1)]);
        let b = Predicate::in_values("id", vec![json!(1), json!(2)]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(
            Predicate::eq("branch_id", "A").fingerprint(),
            Predicate::eq("branch_id", "B").fingerprint()
        );
    }

    #[test]
    fn test_references_looks_inside_or() {
        let p = Predicate::or(vec![Predicate::eq("name", "x"), Predicate::is_null("branch_id")]);
        assert!(p.references("branch_id"));
        assert!(!p.references("sku"));
    }
}
