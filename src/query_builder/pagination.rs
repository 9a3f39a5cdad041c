use serde::{Deserialize, Serialize};

/// LIMIT/OFFSET window over a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Pagination {
    /// 1-indexed page; page 0 is treated as page 1
    pub fn page(page: u32, per_page: u32) -> Self {
        Self {
            limit: Some(per_page),
            offset: Some(page.saturating_sub(1).saturating_mul(per_page)),
        }
    }

    /// Inclusive row range `from..=to`
    pub fn range(from: u32, to: u32) -> Self {
        Self {
            limit: Some(to.saturating_sub(from).saturating_add(1)),
            offset: Some(from),
        }
    }

    pub fn to_sql(&self) -> String {
        let mut sql = String::new();
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset.filter(|offset| *offset > 0) {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        sql
    }

    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}",
            self.limit.map_or_else(|| "-".to_string(), |l| l.to_string()),
            self.offset.unwrap_or(0)
        )
    }
}
