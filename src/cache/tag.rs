//! Dependency tags for cache invalidation.

use std::fmt;

/// Identifies a class of dependency on a resource type.
///
/// Matching is exact equality on the `(resource, id)` pair: a `List` tag
/// matches only other `List` tags and a specific id only the same id.
/// Collection invalidation is never implied: a mutation that affects a
/// collection (create, delete) must declare the `List` tag itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
  pub resource: String,
  pub id: TagId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagId {
  /// Any read that enumerates the resource type. Used after a create,
  /// since the new item's id is not yet known to any cached list.
  List,
  /// One specific entity.
  Id(String),
}

impl Tag {
  pub fn list(resource: impl Into<String>) -> Self {
    Self {
      resource: resource.into(),
      id: TagId::List,
    }
  }

  pub fn id(resource: impl Into<String>, id: impl ToString) -> Self {
    Self {
      resource: resource.into(),
      id: TagId::Id(id.to_string()),
    }
  }

  pub fn is_list(&self) -> bool {
    matches!(self.id, TagId::List)
  }
}

impl fmt::Display for Tag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.id {
      TagId::List => write!(f, "{}#LIST", self.resource),
      TagId::Id(id) => write!(f, "{}#{}", self.resource, id),
    }
  }
}
