//! Domain records moved by the sync engine.
//!
//! The set of categories is closed. Each category has a fixed split of its
//! fields into *content* (what the item is) and *metadata* (bookkeeping).
//! The two sets are disjoint; a field may belong to neither.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use stockferry_codec::{Canonical, Value};

/// The kind of item a transfer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Electronic components.
    Component,
    /// Component packages.
    Package,
    /// Pallets of components.
    Pallet,
}

impl Category {
    /// Every category, in a stable order.
    pub const ALL: [Category; 3] = [Category::Component, Category::Package, Category::Pallet];

    /// Lowercase name used in URLs, logs and the CLI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Package => "package",
            Self::Pallet => "pallet",
        }
    }

    /// Fields hashed as `content_hash`.
    #[must_use]
    pub const fn content_fields(self) -> &'static [&'static str] {
        match self {
            Self::Component => &["name", "description", "datasheet", "image_url", "specifications"],
            Self::Package => &["name", "description", "dimensions", "pin_count", "package_type"],
            Self::Pallet => &["name", "description", "components", "layout", "notes"],
        }
    }

    /// Fields hashed as `metadata_hash`.
    #[must_use]
    pub const fn metadata_fields(self) -> &'static [&'static str] {
        match self {
            Self::Component => &["id", "created_at", "updated_at", "category_id", "manufacturer_id"],
            Self::Package => &["id", "created_at", "updated_at", "category"],
            Self::Pallet => &["id", "created_at", "updated_at", "project_id", "version"],
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "component" => Ok(Self::Component),
            "package" => Ok(Self::Package),
            "pallet" => Ok(Self::Pallet),
            other => Err(CoreError::invalid_category(other)),
        }
    }
}

/// What the remote side should do with a transfer's items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Upsert the items.
    Sync,
    /// Delete the items.
    Delete,
    /// Clear the category.
    Clear,
    /// Full re-upload of a category.
    FullSync,
}

impl OperationKind {
    /// Lowercase name used in URLs and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Delete => "delete",
            Self::Clear => "clear",
            Self::FullSync => "full_sync",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "sync" => Ok(Self::Sync),
            "delete" => Ok(Self::Delete),
            "clear" => Ok(Self::Clear),
            "full_sync" => Ok(Self::FullSync),
            other => Err(CoreError::InvalidOperation {
                name: other.to_string(),
            }),
        }
    }
}

/// A single electronic component.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Component {
    /// Stable identity used for upserts.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: Option<String>,
    /// Datasheet URL.
    pub datasheet: Option<String>,
    /// Product image URL.
    pub image_url: Option<String>,
    /// Named electrical or mechanical parameters.
    pub specifications: BTreeMap<String, String>,
    /// Units on hand.
    pub quantity: i64,
    /// Creation timestamp as stored locally.
    pub created_at: Option<String>,
    /// Last modification timestamp as stored locally.
    pub updated_at: Option<String>,
    /// Local category row.
    pub category_id: Option<i64>,
    /// Local manufacturer row.
    pub manufacturer_id: Option<i64>,
}

/// A component package (footprint).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Package {
    /// Stable identity used for upserts.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: Option<String>,
    /// Body dimensions.
    pub dimensions: Option<String>,
    /// Number of pins.
    pub pin_count: Option<i64>,
    /// Package family, e.g. `SMD` or `THT`.
    pub package_type: Option<String>,
    /// Ids of the components this item refers to.
    pub components: Vec<String>,
    /// Creation timestamp as stored locally.
    pub created_at: Option<String>,
    /// Last modification timestamp as stored locally.
    pub updated_at: Option<String>,
    /// Free-form package category.
    pub category: Option<String>,
}

/// A pallet grouping components for a project.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pallet {
    /// Stable identity used for upserts.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: Option<String>,
    /// Ids of the components this item refers to.
    pub components: Vec<String>,
    /// Serialized slot layout.
    pub layout: Option<String>,
    /// Operator notes.
    pub notes: Option<String>,
    /// Physical location.
    pub location: Option<String>,
    /// Creation timestamp as stored locally.
    pub created_at: Option<String>,
    /// Last modification timestamp as stored locally.
    pub updated_at: Option<String>,
    /// Owning project.
    pub project_id: Option<String>,
    /// Layout revision.
    pub version: i64,
}

/// A record of one of the known categories.
///
/// Serialized with a `kind` tag naming the category:
///
/// ```json
/// {"kind": "component", "id": "c-1", "name": "NE555", "quantity": 40}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    /// A component.
    Component(Component),
    /// A package.
    Package(Package),
    /// A pallet.
    Pallet(Pallet),
}

impl Record {
    /// The record's category.
    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Self::Component(_) => Category::Component,
            Self::Package(_) => Category::Package,
            Self::Pallet(_) => Category::Pallet,
        }
    }

    /// The record's identity, used by the remote side to upsert.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Component(c) => &c.id,
            Self::Package(p) => &p.id,
            Self::Pallet(p) => &p.id,
        }
    }

    /// Canonical map of the content fields only.
    #[must_use]
    pub fn content_value(&self) -> Value {
        let fields = self.category().content_fields();
        self.to_value().retain_keys(|k| fields.contains(&k))
    }

    /// Canonical map of the metadata fields only.
    #[must_use]
    pub fn metadata_value(&self) -> Value {
        let fields = self.category().metadata_fields();
        self.to_value().retain_keys(|k| fields.contains(&k))
    }
}

fn text(s: &str) -> Value {
    Value::from(s)
}

impl Canonical for Record {
    fn to_value(&self) -> Value {
        let pairs: Vec<(&str, Value)> = match self {
            Self::Component(c) => vec![
                ("id", text(&c.id)),
                ("name", text(&c.name)),
                ("description", c.description.clone().into()),
                ("datasheet", c.datasheet.clone().into()),
                ("image_url", c.image_url.clone().into()),
                ("specifications", c.specifications.clone().into()),
                ("quantity", c.quantity.into()),
                ("created_at", c.created_at.clone().into()),
                ("updated_at", c.updated_at.clone().into()),
                ("category_id", c.category_id.into()),
                ("manufacturer_id", c.manufacturer_id.into()),
            ],
            Self::Package(p) => vec![
                ("id", text(&p.id)),
                ("name", text(&p.name)),
                ("description", p.description.clone().into()),
                ("dimensions", p.dimensions.clone().into()),
                ("pin_count", p.pin_count.into()),
                ("package_type", p.package_type.clone().into()),
                ("components", p.components.clone().into()),
                ("created_at", p.created_at.clone().into()),
                ("updated_at", p.updated_at.clone().into()),
                ("category", p.category.clone().into()),
            ],
            Self::Pallet(p) => vec![
                ("id", text(&p.id)),
                ("name", text(&p.name)),
                ("description", p.description.clone().into()),
                ("components", p.components.clone().into()),
                ("layout", p.layout.clone().into()),
                ("notes", p.notes.clone().into()),
                ("location", p.location.clone().into()),
                ("created_at", p.created_at.clone().into()),
                ("updated_at", p.updated_at.clone().into()),
                ("project_id", p.project_id.clone().into()),
                ("version", p.version.into()),
            ],
        };
        Value::map(pairs)
    }
}
