use std::collections::HashSet;

use crate::error::{QueryError, Result};
use crate::mapping::QueryMapping;
use crate::policy::IncludePath;

/// What the police should do with association members: include them in
/// results, and if so whether eagerly or on first access.
#[derive(Debug, Clone)]
pub struct QueryPolicy {
    included: HashSet<(String, String)>,
    deferred: HashSet<(String, String)>,
    client_joins: bool,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self { included: HashSet::new(), deferred: HashSet::new(), client_joins: true }
    }
}

impl QueryPolicy {
    /// Includes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, entity: &str, member: &str) -> Self {
        self.included.insert((entity.to_string(), member.to_string()));
        self
    }

    /// Include every association along a dotted path starting at `entity`.
    pub fn include_path(mut self, mapping: &dyn QueryMapping, entity: &str, path: &str) -> Result<Self> {
        let path = IncludePath::from(path);
        let mut current = entity.to_string();
        for member in path.segments() {
            if !mapping.is_association_relationship(&current, member) {
                return Err(QueryError::mapping(format!("'{current}.{member}' is not an association")));
            }
            let related = mapping
                .get_related_entity(&current, member)
                .ok_or_else(|| QueryError::mapping(format!("'{current}.{member}' has no related entity")))?
                .to_string();
            self.included.insert((current, member.to_string()));
            current = related;
        }
        Ok(self)
    }

    /// Include a member, loading it only when the row is materialized.
    pub fn defer(mut self, entity: &str, member: &str) -> Self {
        self.included.insert((entity.to_string(), member.to_string()));
        self.deferred.insert((entity.to_string(), member.to_string()));
        self
    }

    pub fn with_client_joins(mut self, enabled: bool) -> Self {
        self.client_joins = enabled;
        self
    }

    pub fn is_included(&self, entity: &str, member: &str) -> bool {
        self.included.contains(&(entity.to_string(), member.to_string()))
    }

    pub fn is_deferred(&self, entity: &str, member: &str) -> bool {
        self.deferred.contains(&(entity.to_string(), member.to_string()))
    }

    pub fn client_joins(&self) -> bool {
        self.client_joins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::_tests::fixtures::northwind_mapping;

    #[test]
    fn default_policy_includes_nothing() {
        let p = QueryPolicy::new();
        assert!(!p.is_included("Customer", "Orders"));
        assert!(p.client_joins());
    }

    #[test]
    fn include_path_walks_associations() {
        let mapping = northwind_mapping();
        let p = QueryPolicy::new().include_path(&mapping, "Customer", "Orders.Details").unwrap();
        assert!(p.is_included("Customer", "Orders"));
        assert!(p.is_included("Order", "Details"));
        assert!(!p.is_deferred("Order", "Details"));
    }

    #[test]
    fn include_path_rejects_columns() {
        let mapping = northwind_mapping();
        let err = QueryPolicy::new().include_path(&mapping, "Customer", "Name").unwrap_err();
        assert!(matches!(err, QueryError::Mapping(_)));
    }

    #[test]
    fn deferred_members_are_included() {
        let p = QueryPolicy::new().defer("Customer", "Orders");
        assert!(p.is_included("Customer", "Orders"));
        assert!(p.is_deferred("Customer", "Orders"));
    }
}
