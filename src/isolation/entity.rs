use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::isolation::SHARE_FLAG_PREFIX;

/// Kinds of business entity whose visibility a branch can share or isolate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Products,
    Customers,
    Inventory,
    Suppliers,
    Categories,
    Employees,
    Payments,
    Accounts,
    GiftCards,
    QualityChecks,
    RecurringExpenses,
    Communications,
    Reports,
    FinanceTransfers,
    Sales,
    PurchaseOrders,
    Appointments,
    Devices,
    Expenses,
    Reminders,
    SpecialOrders,
    TradeIns,
    LoyaltyPoints,
    Attendance,
    /// Name of an entity this crate has no table mapping for; used as the table name
    Other(String),
}

impl EntityType {
    pub const KNOWN: [EntityType; 24] = [
        EntityType::Products,
        EntityType::Customers,
        EntityType::Inventory,
        EntityType::Suppliers,
        EntityType::Categories,
        EntityType::Employees,
        EntityType::Payments,
        EntityType::Accounts,
        EntityType::GiftCards,
        EntityType::QualityChecks,
        EntityType::RecurringExpenses,
        EntityType::Communications,
        EntityType::Reports,
        EntityType::FinanceTransfers,
        EntityType::Sales,
        EntityType::PurchaseOrders,
        EntityType::Appointments,
        EntityType::Devices,
        EntityType::Expenses,
        EntityType::Reminders,
        EntityType::SpecialOrders,
        EntityType::TradeIns,
        EntityType::LoyaltyPoints,
        EntityType::Attendance,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Products => "products",
            EntityType::Customers => "customers",
            EntityType::Inventory => "inventory",
            EntityType::Suppliers => "suppliers",
            EntityType::Categories => "categories",
            EntityType::Employees => "employees",
            EntityType::Payments => "payments",
            EntityType::Accounts => "accounts",
            EntityType::GiftCards => "gift_cards",
            EntityType::QualityChecks => "quality_checks",
            EntityType::RecurringExpenses => "recurring_expenses",
            EntityType::Communications => "communications",
            EntityType::Reports => "reports",
            EntityType::FinanceTransfers => "finance_transfers",
            EntityType::Sales => "sales",
            EntityType::PurchaseOrders => "purchase_orders",
            EntityType::Appointments => "appointments",
            EntityType::Devices => "devices",
            EntityType::Expenses => "expenses",
            EntityType::Reminders => "reminders",
            EntityType::SpecialOrders => "special_orders",
            EntityType::TradeIns => "trade_ins",
            EntityType::LoyaltyPoints => "loyalty_points",
            EntityType::Attendance => "attendance",
            EntityType::Other(name) => name,
        }
    }

    /// Column of the branch settings row holding this entity's share flag
    pub fn share_flag(&self) -> String {
        format!("{SHARE_FLAG_PREFIX}{}", self.as_str())
    }

    pub fn table_name(&self) -> &str {
        match self {
            EntityType::Products => "lats_products",
            EntityType::Customers => "customers",
            EntityType::Inventory => "lats_product_variants",
            EntityType::Suppliers => "lats_suppliers",
            EntityType::Categories => "lats_categories",
            EntityType::Employees => "employees",
            EntityType::Payments => "customer_payments",
            EntityType::Accounts => "finance_accounts",
            EntityType::GiftCards => "gift_cards",
            EntityType::QualityChecks => "quality_checks",
            EntityType::RecurringExpenses => "recurring_expenses",
            EntityType::Communications => "sms_logs",
            EntityType::Reports => "daily_reports",
            EntityType::FinanceTransfers => "finance_transfers",
            EntityType::Sales => "lats_sales",
            EntityType::PurchaseOrders => "lats_purchase_orders",
            EntityType::Appointments => "appointments",
            EntityType::Devices => "devices",
            EntityType::Expenses => "expenses",
            EntityType::Reminders => "reminders",
            EntityType::SpecialOrders => "customer_special_orders",
            EntityType::TradeIns => "lats_trade_in_transactions",
            EntityType::LoyaltyPoints => "loyalty_points",
            EntityType::Attendance => "attendance_records",
            EntityType::Other(name) => name,
        }
    }

    /// Inverse of [`share_flag`](Self::share_flag)
    pub fn from_share_flag(column: &str) -> Option<Self> {
        column
            .strip_prefix(SHARE_FLAG_PREFIX)
            .filter(|name| !name.is_empty())
            .map(|name| name.parse().unwrap_or_else(|_| EntityType::Other(name.to_string())))
    }
}

impl FromStr for EntityType {
    type Err = std::convert::Infallible;

    /// Unknown names become [`EntityType::Other`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Ok(EntityType::KNOWN
            .iter()
            .find(|known| known.as_str() == normalized)
            .cloned()
            .unwrap_or(EntityType::Other(normalized)))
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EntityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EntityType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or(EntityType::Other(raw)))
    }
}
