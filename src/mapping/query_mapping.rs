use crate::expr::SqlType;

/// Key correspondence of an association or an extension table: the members
/// (or columns) on this side paired positionally with those on the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairs<'a> {
    pub local: Vec<&'a str>,
    pub related: Vec<&'a str>,
}

/// Everything the translator needs to know about how entities map onto
/// tables. "Not mapped" answers are plain `false`/`None`; it is up to the
/// caller to decide whether that is an error.
pub trait QueryMapping: Send + Sync {
    fn has_entity(&self, entity: &str) -> bool;

    /// The primary table of an entity.
    fn get_table_name(&self, entity: &str) -> Option<&str>;

    /// Primary table first, then extension tables in declaration order.
    fn get_tables(&self, entity: &str) -> Vec<&str>;

    /// For an extension table: its key columns (`local`) and the primary
    /// table members they correspond to (`related`).
    fn get_extension_key_columns(&self, entity: &str, table: &str) -> Option<KeyPairs<'_>>;

    /// Column and association members in declaration order.
    fn get_mapped_members(&self, entity: &str) -> Vec<&str>;

    /// Primary key members in declaration order.
    fn get_primary_key_members(&self, entity: &str) -> Vec<&str>;

    fn is_column(&self, entity: &str, member: &str) -> bool;

    fn is_primary_key(&self, entity: &str, member: &str) -> bool;

    /// Value assigned by the database on insert.
    fn is_generated(&self, entity: &str, member: &str) -> bool;

    fn get_column_name(&self, entity: &str, member: &str) -> Option<&str>;

    fn get_column_type(&self, entity: &str, member: &str) -> Option<&SqlType>;

    /// Table holding a column member.
    fn get_column_table(&self, entity: &str, member: &str) -> Option<&str>;

    fn is_association_relationship(&self, entity: &str, member: &str) -> bool;

    /// To-one association (the member holds one related entity or null).
    fn is_singleton_relationship(&self, entity: &str, member: &str) -> bool;

    fn get_related_entity(&self, entity: &str, member: &str) -> Option<&str>;

    /// Members of this entity (`local`) matched against members of the
    /// related entity (`related`).
    fn get_association_key_members(&self, entity: &str, member: &str) -> Option<KeyPairs<'_>>;

    fn is_mapped(&self, entity: &str, member: &str) -> bool {
        self.is_column(entity, member) || self.is_association_relationship(entity, member)
    }
}
