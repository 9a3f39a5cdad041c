use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::conditions::quote_ident;
use super::{Pagination, Predicate};
use crate::isolation::EntityType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Immutable description of a read against one entity's table.
///
/// Builder methods take `self` by value and return the extended spec, so a
/// spec handed to another layer can't be changed underneath it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    entity: EntityType,
    select: Vec<String>,
    predicates: Vec<Predicate>,
    ordering: Vec<OrderBy>,
    pagination: Option<Pagination>,
}

impl QuerySpec {
    pub fn new(entity: EntityType) -> Self {
        Self {
            entity,
            select: Vec::new(),
            predicates: Vec::new(),
            ordering: Vec::new(),
            pagination: None,
        }
    }

    /// Restrict the selected columns; the default is every column
    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Predicate::eq(field, value))
    }

    pub fn where_in(self, field: &str, values: Vec<Value>) -> Self {
        self.filter(Predicate::in_values(field, values))
    }

    pub fn where_null(self, field: &str) -> Self {
        self.filter(Predicate::is_null(field))
    }

    pub fn where_any(self, any: Vec<Predicate>) -> Self {
        self.filter(Predicate::or(any))
    }

    pub fn order_asc(mut self, field: &str) -> Self {
        self.ordering.push(OrderBy {
            field: field.to_string(),
            direction: SortDirection::Asc,
        });
        self
    }

    pub fn order_desc(mut self, field: &str) -> Self {
        self.ordering.push(OrderBy {
            field: field.to_string(),
            direction: SortDirection::Desc,
        });
        self
    }

    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        let mut pagination = self.pagination.unwrap_or_default();
        pagination.limit = Some(limit);
        self.pagination = Some(pagination);
        self
    }

    pub fn entity(&self) -> &EntityType {
        &self.entity
    }

    pub fn table(&self) -> &str {
        self.entity.table_name()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.ordering
    }

    pub fn pagination(&self) -> Option<Pagination> {
        self.pagination
    }

    pub fn has_predicate_on(&self, field: &str) -> bool {
        self.predicates.iter().any(|p| p.references(field))
    }

    /// Deterministic key for this exact read. Predicate order does not
    /// matter; everything else that changes the result set does.
    pub fn cache_key(&self) -> String {
        let mut predicates: Vec<String> = self.predicates.iter().map(Predicate::fingerprint).collect();
        predicates.sort();

        let ordering: Vec<String> = self
            .ordering
            .iter()
            .map(|o| format!("{} {}", o.field, o.direction.as_sql()))
            .collect();

        format!(
            "{}?select={}&where={}&order={}&page={}",
            self.entity.as_str(),
            if self.select.is_empty() {
                "*".to_string()
            } else {
                self.select.join(",")
            },
            predicates.join("&"),
            ordering.join(","),
            self.pagination
                .map(|p| p.fingerprint())
                .unwrap_or_else(|| "all".to_string()),
        )
    }

    /// Parameterised SQL plus its bind values, in placeholder order
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = String::from("SELECT ");

        if self.select.is_empty() {
            sql.push('*');
        } else {
            let fields: Vec<String> = self.select.iter().map(|f| quote_ident(f)).collect();
            sql.push_str(&fields.join(", "));
        }

        sql.push_str(&format!(" FROM {}", quote_ident(self.table())));

        if !self.predicates.is_empty() {
            let parts: Vec<String> = self
                .predicates
                .iter()
                .map(|p| p.to_sql(&mut params))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&parts.join(" AND "));
        }

        if !self.ordering.is_empty() {
            let parts: Vec<String> = self
                .ordering
                .iter()
                .map(|o| format!("{} {}", quote_ident(&o.field), o.direction.as_sql()))
                .collect();
            sql.push_str(&format!(" ORDER BY {}", parts.join(", ")));
        }

        if let Some(pagination) = &self.pagination {
            sql.push_str(&pagination.to_sql());
        }

        (sql, params)
    }
}
