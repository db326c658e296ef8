//! Collections and the per-collection sync policy table
//!
//! Every collection the engine synchronizes has an entry in the
//! [`Catalog`]. The entry decides:
//!
//! - where the collection lives on each remote (push path, pull table)
//! - what an empty push snapshot does to local state ([`MergePolicy`])
//! - which fields identify a record ([`IdentityKeySet`])
//! - whether incoming duplicates are collapsed by a normalized key
//! - where local mutations are forwarded ([`WriteBinding`])
//!
//! The policy assignments are deliberately asymmetric. They reflect how
//! each collection has always behaved and are kept per collection rather
//! than derived from a rule.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::errors::DomainError;
use super::newtypes::RecordId;
use super::record::{Record, ID_FIELD};

// ============================================================================
// Collection
// ============================================================================

/// A synchronized domain collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Products,
    Categories,
    Customers,
    Transactions,
    Suppliers,
    Purchases,
    SalesOrders,
    Expenses,
    Debts,
    Employees,
    WageAdvances,
    Returns,
    Settings,
    Accounts,
    CashFlows,
    Users,
}

impl Collection {
    /// Every collection, in catalog order
    pub const ALL: [Collection; 16] = [
        Collection::Products,
        Collection::Categories,
        Collection::Customers,
        Collection::Transactions,
        Collection::Suppliers,
        Collection::Purchases,
        Collection::SalesOrders,
        Collection::Expenses,
        Collection::Debts,
        Collection::Employees,
        Collection::WageAdvances,
        Collection::Returns,
        Collection::Settings,
        Collection::Accounts,
        Collection::CashFlows,
        Collection::Users,
    ];

    /// Stable snake_case name, used as the local storage key
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Products => "products",
            Collection::Categories => "categories",
            Collection::Customers => "customers",
            Collection::Transactions => "transactions",
            Collection::Suppliers => "suppliers",
            Collection::Purchases => "purchases",
            Collection::SalesOrders => "sales_orders",
            Collection::Expenses => "expenses",
            Collection::Debts => "debts",
            Collection::Employees => "employees",
            Collection::WageAdvances => "wage_advances",
            Collection::Returns => "returns",
            Collection::Settings => "settings",
            Collection::Accounts => "accounts",
            Collection::CashFlows => "cash_flows",
            Collection::Users => "users",
        }
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| DomainError::UnknownCollection(s.to_string()))
    }
}

// ============================================================================
// Policy types
// ============================================================================

/// What an empty or absent push snapshot does to local state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Local state is left untouched
    PreserveOnEmpty,
    /// Local state becomes empty (or, with a bootstrap record, exactly that record)
    ClearOnEmpty,
}

/// How a collection's push snapshots are merged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Non-empty snapshot replaces local state; empty snapshot follows the [`MergePolicy`]
    Standard,
    /// Category list unioned with the categories referenced by products,
    /// written back to the push remote when the union is larger
    DerivedCategories,
}

/// Where local mutations of a collection are forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBinding {
    /// The collection is not mutated locally
    ReadOnly,
    /// Full-record writes to the push remote
    Push,
    /// Row writes to the pull remote
    Pull,
    /// Both remotes
    Both,
}

impl WriteBinding {
    /// Returns true if mutations go to the push remote
    pub fn writes_push(&self) -> bool {
        matches!(self, WriteBinding::Push | WriteBinding::Both)
    }

    /// Returns true if mutations go to the pull remote
    pub fn writes_pull(&self) -> bool {
        matches!(self, WriteBinding::Pull | WriteBinding::Both)
    }

    /// Returns true if the collection accepts local mutations
    pub fn is_writable(&self) -> bool {
        !matches!(self, WriteBinding::ReadOnly)
    }
}

/// Ordered list of fields that identify a record: primary id first,
/// then secondary keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityKeySet(&'static [&'static str]);

impl IdentityKeySet {
    /// Primary id only
    pub const ID_ONLY: IdentityKeySet = IdentityKeySet(&[ID_FIELD]);

    /// Creates a key set; the first field is the primary key
    pub const fn new(fields: &'static [&'static str]) -> Self {
        Self(fields)
    }

    /// All fields, primary first
    pub fn fields(&self) -> &'static [&'static str] {
        self.0
    }

    /// The primary key field
    pub fn primary(&self) -> &'static str {
        self.0.first().copied().unwrap_or(ID_FIELD)
    }

    /// Secondary key fields, in the order they are tried
    pub fn secondary(&self) -> &'static [&'static str] {
        self.0.get(1..).unwrap_or(&[])
    }
}

// ============================================================================
// CollectionDef
// ============================================================================

/// Sync policy for one collection
#[derive(Debug, Clone)]
pub struct CollectionDef {
    /// The collection
    pub collection: Collection,
    /// Path of the collection on the push remote
    pub push_path: &'static str,
    /// Table on the pull remote, if the pull channel can reach it
    pub pull_table: Option<&'static str>,
    /// Effect of an empty push snapshot
    pub policy: MergePolicy,
    /// Merge flavour
    pub kind: CollectionKind,
    /// Identity fields used for pull-side matching
    pub identity: IdentityKeySet,
    /// Field whose normalized value must be unique among push records
    pub dedup_key: Option<&'static str>,
    /// Cap on the number of rows one pull query fetches
    pub pull_limit: Option<u32>,
    /// Where local mutations are forwarded
    pub writes: WriteBinding,
    /// Record synthesized when a `ClearOnEmpty` snapshot arrives empty
    pub bootstrap: Option<fn() -> Record>,
}

impl CollectionDef {
    fn standard(collection: Collection, push_path: &'static str, policy: MergePolicy) -> Self {
        Self {
            collection,
            push_path,
            pull_table: None,
            policy,
            kind: CollectionKind::Standard,
            identity: IdentityKeySet::ID_ONLY,
            dedup_key: None,
            pull_limit: None,
            writes: WriteBinding::Push,
            bootstrap: None,
        }
    }

    fn pulled_from(mut self, table: &'static str, limit: Option<u32>) -> Self {
        self.pull_table = Some(table);
        self.pull_limit = limit;
        self
    }

    fn identified_by(mut self, identity: IdentityKeySet) -> Self {
        self.identity = identity;
        self
    }

    fn deduplicated_by(mut self, field: &'static str) -> Self {
        self.dedup_key = Some(field);
        self
    }

    fn writing_to(mut self, writes: WriteBinding) -> Self {
        self.writes = writes;
        self
    }

    fn seeded_with(mut self, bootstrap: fn() -> Record) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    /// Returns true if the pull channel reaches this collection
    pub fn is_pullable(&self) -> bool {
        self.pull_table.is_some()
    }

    /// Push-remote path of one record: `{push_path}/{id}`
    pub fn record_path(&self, id: &RecordId) -> String {
        format!("{}/{}", self.push_path, id)
    }
}

/// Cap applied to pull queries on high-churn collections
pub const HIGH_CHURN_PULL_LIMIT: u32 = 500;

/// Id of the synthesized default cash account
pub const DEFAULT_ACCOUNT_ID: &str = "cash";

/// Id of the synthesized store settings record
pub const DEFAULT_SETTINGS_ID: &str = "store";

fn default_cash_account() -> Record {
    Record::from(
        json!({
            "id": DEFAULT_ACCOUNT_ID,
            "name": "Cash",
            "type": "cash",
            "balance": 0,
            "isDefault": true
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
    )
}

fn default_store_settings() -> Record {
    Record::from(
        json!({
            "id": DEFAULT_SETTINGS_ID,
            "storeName": "My Store",
            "currency": "IDR",
            "taxRate": 0
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
    )
}

// ============================================================================
// Catalog
// ============================================================================

/// The explicit per-collection policy table
#[derive(Debug, Clone)]
pub struct Catalog {
    defs: Vec<CollectionDef>,
}

impl Catalog {
    /// The standard retail catalog
    pub fn standard() -> Self {
        use CollectionKind::DerivedCategories;
        use MergePolicy::{ClearOnEmpty, PreserveOnEmpty};

        let defs = vec![
            CollectionDef::standard(Collection::Products, "products", PreserveOnEmpty)
                .pulled_from("products", None)
                .identified_by(IdentityKeySet::new(&["id", "sku", "barcode"]))
                .writing_to(WriteBinding::Both),
            CollectionDef {
                kind: DerivedCategories,
                writes: WriteBinding::ReadOnly,
                ..CollectionDef::standard(Collection::Categories, "categories", PreserveOnEmpty)
                    .identified_by(IdentityKeySet::new(&["id", "name"]))
            },
            CollectionDef::standard(Collection::Customers, "customers", ClearOnEmpty)
                .pulled_from("customers", None)
                .identified_by(IdentityKeySet::new(&["id", "phone"])),
            CollectionDef::standard(Collection::Transactions, "transactions", PreserveOnEmpty)
                .pulled_from("transactions", Some(HIGH_CHURN_PULL_LIMIT))
                .identified_by(IdentityKeySet::new(&["id", "transactionCode"]))
                .writing_to(WriteBinding::Both),
            CollectionDef::standard(Collection::Suppliers, "suppliers", ClearOnEmpty)
                .identified_by(IdentityKeySet::new(&["id", "code"]))
                .deduplicated_by("name"),
            CollectionDef::standard(Collection::Purchases, "purchases", ClearOnEmpty)
                .identified_by(IdentityKeySet::new(&["id", "code"])),
            CollectionDef::standard(Collection::SalesOrders, "salesOrders", PreserveOnEmpty)
                .pulled_from("sales_orders", Some(HIGH_CHURN_PULL_LIMIT))
                .identified_by(IdentityKeySet::new(&["id", "orderNumber"]))
                .writing_to(WriteBinding::Both),
            CollectionDef::standard(Collection::Expenses, "expenses", ClearOnEmpty),
            CollectionDef::standard(Collection::Debts, "debts", ClearOnEmpty),
            CollectionDef::standard(Collection::Employees, "employees", ClearOnEmpty),
            CollectionDef::standard(Collection::WageAdvances, "wageAdvances", ClearOnEmpty),
            CollectionDef::standard(Collection::Returns, "returns", ClearOnEmpty)
                .identified_by(IdentityKeySet::new(&["id", "returnCode"])),
            CollectionDef::standard(Collection::Settings, "settings", ClearOnEmpty)
                .seeded_with(default_store_settings),
            CollectionDef::standard(Collection::Accounts, "accounts", ClearOnEmpty)
                .identified_by(IdentityKeySet::new(&["id", "name"]))
                .seeded_with(default_cash_account),
            CollectionDef::standard(Collection::CashFlows, "cashFlows", ClearOnEmpty),
            CollectionDef::standard(Collection::Users, "users", PreserveOnEmpty)
                .identified_by(IdentityKeySet::new(&["id", "username"])),
        ];

        Self { defs }
    }

    /// Builds a catalog from explicit definitions
    pub fn from_defs(defs: Vec<CollectionDef>) -> Self {
        Self { defs }
    }

    /// Restricts the pull channel to the given collections
    ///
    /// Collections without a pull table are ignored.
    pub fn with_pull_set(mut self, pull_set: &[Collection]) -> Self {
        for def in &mut self.defs {
            if !pull_set.contains(&def.collection) {
                def.pull_table = None;
            }
        }
        self
    }

    /// Looks up a collection's definition
    pub fn get(&self, collection: Collection) -> Option<&CollectionDef> {
        self.defs.iter().find(|d| d.collection == collection)
    }

    /// All definitions, in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &CollectionDef> {
        self.defs.iter()
    }

    /// Definitions the pull channel polls
    pub fn pull_collections(&self) -> impl Iterator<Item = &CollectionDef> {
        self.defs.iter().filter(|d| d.is_pullable())
    }

    /// Number of collections
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Returns true if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}
