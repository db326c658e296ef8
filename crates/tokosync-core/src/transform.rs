//! Wire shape to local shape mapping
//!
//! The two remotes and several generations of clients have written records
//! with different field names (`costPrice`, `cost_price`, `cost`, ...).
//! [`RecordTransformer`] folds them into the single shape the local store
//! keeps. It is pure: the same input always yields the same record, and
//! nothing is read from or written to any store.
//!
//! Each collection has a declarative list of [`FieldRule`]s:
//! `target <- first non-null of [sources...] else fallback`. Fields no rule
//! mentions pass through unchanged; alias sources are dropped once folded
//! into their target.

use serde_json::{Map, Number, Value};

use crate::domain::{
    record::json_type_name, Collection, DomainError, Record, RecordId, RemoteEntry, ID_FIELD,
};

/// Category assigned to products that name none
pub const DEFAULT_CATEGORY: &str = "General";

// ============================================================================
// FieldRule
// ============================================================================

/// Value used when none of a rule's sources is present
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fallback {
    Number(i64),
    Text(&'static str),
    Bool(bool),
    EmptyList,
}

impl Fallback {
    fn to_value(self) -> Value {
        match self {
            Fallback::Number(n) => Value::Number(Number::from(n)),
            Fallback::Text(s) => Value::String(s.to_string()),
            Fallback::Bool(b) => Value::Bool(b),
            Fallback::EmptyList => Value::Array(Vec::new()),
        }
    }
}

/// Type a rule coerces its value into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Value is taken as-is
    Any,
    /// Numbers, and strings that parse as numbers
    Number,
    /// Strings, and numbers rendered as strings
    Text,
    /// Booleans, `"true"`/`"false"` and `0`/`1`
    Bool,
}

impl Coercion {
    /// Coerces `value`, returning `None` if it cannot be represented
    pub fn apply(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => None,
            (Coercion::Any, v) => Some(v.clone()),

            (Coercion::Number, Value::Number(_)) => Some(value.clone()),
            (Coercion::Number, Value::String(s)) => parse_number(s.trim()),

            (Coercion::Text, Value::String(s)) => Some(Value::String(s.clone())),
            (Coercion::Text, Value::Number(n)) => Some(Value::String(n.to_string())),

            (Coercion::Bool, Value::Bool(_)) => Some(value.clone()),
            (Coercion::Bool, Value::String(s)) => match s.trim() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (Coercion::Bool, Value::Number(n)) => match n.as_i64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },

            _ => None,
        }
    }
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(n) = s.parse::<i64>() {
        return Some(Value::Number(Number::from(n)));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// One field-fallback rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRule {
    /// Field written into the local record
    pub target: &'static str,
    /// Remote fields consulted in order; the first usable one wins
    pub sources: &'static [&'static str],
    /// Coercion applied to the chosen source
    pub coercion: Coercion,
    /// Value used when no source is usable
    pub fallback: Option<Fallback>,
    /// Record is rejected when no source is usable
    pub required: bool,
}

const fn any(target: &'static str, sources: &'static [&'static str]) -> FieldRule {
    FieldRule {
        target,
        sources,
        coercion: Coercion::Any,
        fallback: None,
        required: false,
    }
}

const fn required(target: &'static str, sources: &'static [&'static str]) -> FieldRule {
    FieldRule {
        target,
        sources,
        coercion: Coercion::Text,
        fallback: None,
        required: true,
    }
}

const fn number(target: &'static str, sources: &'static [&'static str], default: i64) -> FieldRule {
    FieldRule {
        target,
        sources,
        coercion: Coercion::Number,
        fallback: Some(Fallback::Number(default)),
        required: false,
    }
}

const fn text(
    target: &'static str,
    sources: &'static [&'static str],
    default: Option<&'static str>,
) -> FieldRule {
    FieldRule {
        target,
        sources,
        coercion: Coercion::Text,
        fallback: match default {
            Some(s) => Some(Fallback::Text(s)),
            None => None,
        },
        required: false,
    }
}

const fn flag(target: &'static str, sources: &'static [&'static str], default: bool) -> FieldRule {
    FieldRule {
        target,
        sources,
        coercion: Coercion::Bool,
        fallback: Some(Fallback::Bool(default)),
        required: false,
    }
}

const fn list(target: &'static str, sources: &'static [&'static str]) -> FieldRule {
    FieldRule {
        target,
        sources,
        coercion: Coercion::Any,
        fallback: Some(Fallback::EmptyList),
        required: false,
    }
}

// ============================================================================
// Rule tables
// ============================================================================

const PRODUCT_RULES: &[FieldRule] = &[
    text("name", &["name", "productName", "product_name"], None),
    number("price", &["price", "sellingPrice", "selling_price"], 0),
    number("cost", &["cost", "costPrice", "cost_price"], 0),
    number("stock", &["stock", "quantity", "qty"], 0),
    number("minStock", &["minStock", "min_stock"], 0),
    text("category", &["category", "categoryName", "category_name"], Some(DEFAULT_CATEGORY)),
    text("unit", &["unit"], Some("pcs")),
    text("sku", &["sku"], None),
    text("barcode", &["barcode"], None),
];

const CATEGORY_RULES: &[FieldRule] = &[required("name", &["name", "categoryName", "category_name"])];

const CUSTOMER_RULES: &[FieldRule] = &[
    text("name", &["name", "customerName", "customer_name"], None),
    text("phone", &["phone", "phoneNumber", "phone_number"], None),
    number("points", &["points", "loyaltyPoints", "loyalty_points"], 0),
];

const TRANSACTION_RULES: &[FieldRule] = &[
    text("transactionCode", &["transactionCode", "transaction_code"], None),
    number("total", &["total", "totalAmount", "total_amount", "grandTotal"], 0),
    text("paymentMethod", &["paymentMethod", "payment_method"], Some("cash")),
    list("items", &["items"]),
    any("createdAt", &["createdAt", "created_at"]),
];

const SUPPLIER_RULES: &[FieldRule] = &[
    required("name", &["name", "supplierName", "supplier_name"]),
    text("code", &["code", "supplierCode", "supplier_code"], None),
    text("phone", &["phone", "phone_number"], None),
];

const PURCHASE_RULES: &[FieldRule] = &[
    text("code", &["code", "purchaseCode", "purchase_code"], None),
    number("total", &["total", "totalAmount", "total_amount"], 0),
    list("items", &["items"]),
    any("createdAt", &["createdAt", "created_at"]),
];

const SALES_ORDER_RULES: &[FieldRule] = &[
    text("orderNumber", &["orderNumber", "order_number"], None),
    number("total", &["total", "totalAmount", "total_amount"], 0),
    text("status", &["status"], Some("pending")),
    list("items", &["items"]),
    any("createdAt", &["createdAt", "created_at"]),
];

const EXPENSE_RULES: &[FieldRule] = &[
    number("amount", &["amount", "total"], 0),
    text("category", &["category"], Some("Other")),
    text("description", &["description", "note", "notes"], None),
];

const DEBT_RULES: &[FieldRule] = &[
    number("amount", &["amount"], 0),
    number("paid", &["paid", "paidAmount", "paid_amount"], 0),
    text("status", &["status"], Some("unpaid")),
];

const EMPLOYEE_RULES: &[FieldRule] = &[
    required("name", &["name", "employeeName", "employee_name"]),
    number("salary", &["salary", "baseSalary", "base_salary"], 0),
];

const WAGE_ADVANCE_RULES: &[FieldRule] = &[
    number("amount", &["amount"], 0),
    text("employeeId", &["employeeId", "employee_id"], None),
];

const RETURN_RULES: &[FieldRule] = &[
    text("returnCode", &["returnCode", "return_code"], None),
    number("total", &["total", "refundAmount", "refund_amount"], 0),
    list("items", &["items"]),
];

const SETTINGS_RULES: &[FieldRule] = &[
    text("storeName", &["storeName", "store_name"], None),
    number("taxRate", &["taxRate", "tax_rate"], 0),
];

const ACCOUNT_RULES: &[FieldRule] = &[
    required("name", &["name", "accountName", "account_name"]),
    number("balance", &["balance"], 0),
    text("type", &["type", "accountType", "account_type"], Some("cash")),
    flag("isDefault", &["isDefault", "is_default"], false),
];

const CASH_FLOW_RULES: &[FieldRule] = &[
    number("amount", &["amount"], 0),
    text("type", &["type", "flowType", "flow_type"], None),
    text("accountId", &["accountId", "account_id"], None),
];

const USER_RULES: &[FieldRule] = &[
    required("username", &["username", "userName", "user_name"]),
    text("role", &["role"], Some("cashier")),
];

/// The field rules for a collection
pub fn rules_for(collection: Collection) -> &'static [FieldRule] {
    match collection {
        Collection::Products => PRODUCT_RULES,
        Collection::Categories => CATEGORY_RULES,
        Collection::Customers => CUSTOMER_RULES,
        Collection::Transactions => TRANSACTION_RULES,
        Collection::Suppliers => SUPPLIER_RULES,
        Collection::Purchases => PURCHASE_RULES,
        Collection::SalesOrders => SALES_ORDER_RULES,
        Collection::Expenses => EXPENSE_RULES,
        Collection::Debts => DEBT_RULES,
        Collection::Employees => EMPLOYEE_RULES,
        Collection::WageAdvances => WAGE_ADVANCE_RULES,
        Collection::Returns => RETURN_RULES,
        Collection::Settings => SETTINGS_RULES,
        Collection::Accounts => ACCOUNT_RULES,
        Collection::CashFlows => CASH_FLOW_RULES,
        Collection::Users => USER_RULES,
    }
}

/// Resolves `target` on a raw remote value through the collection's alias chain
///
/// Yields the value the transformer would write into `target`, before any
/// fallback is applied. Fields no rule targets are read as-is.
pub fn resolve_field(collection: Collection, target: &str, value: &Value) -> Option<Value> {
    let map = value.as_object()?;
    match rules_for(collection).iter().find(|rule| rule.target == target) {
        Some(rule) => rule
            .sources
            .iter()
            .find_map(|source| map.get(*source).and_then(|v| rule.coercion.apply(v))),
        None => map.get(target).filter(|v| !v.is_null()).cloned(),
    }
}

// ============================================================================
// RecordTransformer
// ============================================================================

/// Pure per-collection mapping from a remote record to a local record
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordTransformer;

impl RecordTransformer {
    /// Creates a transformer
    pub fn new() -> Self {
        Self
    }

    /// Transforms one remote entry into the local shape
    ///
    /// The record's `id` is taken from its own `id` field, else from the
    /// key the push remote stores it under. Records with neither keep no id;
    /// ids are never invented for inbound data. A valid id is normalized to
    /// its string form.
    ///
    /// # Errors
    /// - [`DomainError::NotAnObject`] if the entry is not an object (bare
    ///   strings are accepted for categories)
    /// - [`DomainError::MissingField`] if a required field has no usable source
    pub fn transform(
        &self,
        collection: Collection,
        entry: &RemoteEntry,
    ) -> Result<Record, DomainError> {
        let mut map = match &entry.value {
            Value::Object(map) => map.clone(),
            Value::String(name) if collection == Collection::Categories => {
                let mut map = Map::new();
                map.insert("name".to_string(), Value::String(name.clone()));
                map
            }
            other => {
                return Err(DomainError::NotAnObject {
                    collection: collection.to_string(),
                    found: json_type_name(other).to_string(),
                })
            }
        };

        for rule in rules_for(collection) {
            apply_rule(collection, rule, &mut map)?;
        }

        let mut record = Record::from_map(map);
        let id = record
            .get(ID_FIELD)
            .and_then(RecordId::from_json)
            .or_else(|| entry.key.as_deref().and_then(|k| RecordId::new(k).ok()));

        match id {
            Some(id) => record.set_id(&id),
            None if collection == Collection::Categories => {
                if let Some(id) = record.get_str("name").and_then(|n| RecordId::new(n).ok()) {
                    record.set_id(&id);
                }
            }
            None => {}
        }

        Ok(record)
    }

    /// Builds a local category record from a category name
    pub fn category_from_name(&self, name: &str) -> Record {
        let name = name.trim();
        let id = RecordId::new(name).unwrap_or_else(|_| RecordId::derive(name));
        let mut record = Record::new();
        record.set_id(&id);
        record.insert("name", Value::String(name.to_string()));
        record
    }
}

fn apply_rule(
    collection: Collection,
    rule: &FieldRule,
    map: &mut Map<String, Value>,
) -> Result<(), DomainError> {
    let chosen = rule
        .sources
        .iter()
        .find_map(|source| map.get(*source).and_then(|v| rule.coercion.apply(v)));

    // Text fields that are blank count as absent for required rules
    let chosen = match chosen {
        Some(Value::String(s)) if rule.required && s.trim().is_empty() => None,
        other => other,
    };

    for source in rule.sources {
        if *source != rule.target {
            map.shift_remove(*source);
        }
    }

    match chosen.or_else(|| rule.fallback.map(Fallback::to_value)) {
        Some(value) => {
            map.insert(rule.target.to_string(), value);
            Ok(())
        }
        None if rule.required => Err(DomainError::MissingField {
            collection: collection.to_string(),
            field: rule.target.to_string(),
        }),
        None => {
            map.shift_remove(rule.target);
            Ok(())
        }
    }
}
