use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::expr::SqlType;
use crate::mapping::{KeyPairs, QueryMapping};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub column: String,
    pub sql_type: SqlType,
    pub primary_key: bool,
    pub generated: bool,
    /// Extension table holding the column; `None` means the primary table.
    pub table: Option<String>,
}

/// One side of an entity-to-entity relationship, keyed by member lists
/// matched positionally.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationInfo {
    pub related_entity: String,
    pub key_members: Vec<String>,
    pub related_key_members: Vec<String>,
    pub singleton: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MappedMember {
    Column(ColumnInfo),
    Association(AssociationInfo),
}

/// A second physical table carrying more columns of the same entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionTable {
    pub name: String,
    pub key_columns: Vec<String>,
    pub related_members: Vec<String>,
}

/// Mapping of one entity. Built with the chained helpers and validated when
/// the owning [`EntityMapping`] is built.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedEntity {
    pub name: String,
    pub table: String,
    pub members: IndexMap<String, MappedMember>,
    pub extension_tables: Vec<ExtensionTable>,
    duplicates: Vec<String>,
}

impl MappedEntity {
    /// Table name defaults to the entity name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: name.to_string(),
            members: IndexMap::new(),
            extension_tables: Vec::new(),
            duplicates: Vec::new(),
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    fn add(mut self, member: &str, mapped: MappedMember) -> Self {
        if self.members.contains_key(member) {
            self.duplicates.push(member.to_string());
        } else {
            self.members.insert(member.to_string(), mapped);
        }
        self
    }

    fn column_info(column: &str, sql_type: SqlType) -> ColumnInfo {
        ColumnInfo { column: column.to_string(), sql_type, primary_key: false, generated: false, table: None }
    }

    pub fn column(self, member: &str, sql_type: SqlType) -> Self {
        self.add(member, MappedMember::Column(Self::column_info(member, sql_type)))
    }

    /// Column whose name differs from the member name.
    pub fn column_named(self, member: &str, column: &str, sql_type: SqlType) -> Self {
        self.add(member, MappedMember::Column(Self::column_info(column, sql_type)))
    }

    pub fn key(self, member: &str, sql_type: SqlType) -> Self {
        let info = ColumnInfo { primary_key: true, ..Self::column_info(member, sql_type) };
        self.add(member, MappedMember::Column(info))
    }

    /// Primary key whose value the database assigns.
    pub fn generated_key(self, member: &str, sql_type: SqlType) -> Self {
        let info = ColumnInfo { primary_key: true, generated: true, ..Self::column_info(member, sql_type) };
        self.add(member, MappedMember::Column(info))
    }

    /// Column living in an extension table declared with [`extension`](Self::extension).
    pub fn column_in(self, table: &str, member: &str, sql_type: SqlType) -> Self {
        let info = ColumnInfo { table: Some(table.to_string()), ..Self::column_info(member, sql_type) };
        self.add(member, MappedMember::Column(info))
    }

    pub fn extension<S: AsRef<str>>(mut self, table: &str, key_columns: &[S], related_members: &[S]) -> Self {
        self.extension_tables.push(ExtensionTable {
            name: table.to_string(),
            key_columns: key_columns.iter().map(|s| s.as_ref().to_string()).collect(),
            related_members: related_members.iter().map(|s| s.as_ref().to_string()).collect(),
        });
        self
    }

    fn association<S: AsRef<str>>(self, member: &str, related: &str, keys: &[S], related_keys: &[S], singleton: bool) -> Self {
        let info = AssociationInfo {
            related_entity: related.to_string(),
            key_members: keys.iter().map(|s| s.as_ref().to_string()).collect(),
            related_key_members: related_keys.iter().map(|s| s.as_ref().to_string()).collect(),
            singleton,
        };
        self.add(member, MappedMember::Association(info))
    }

    /// To-one association.
    pub fn has_one<S: AsRef<str>>(self, member: &str, related: &str, keys: &[S], related_keys: &[S]) -> Self {
        self.association(member, related, keys, related_keys, true)
    }

    /// To-many association.
    pub fn has_many<S: AsRef<str>>(self, member: &str, related: &str, keys: &[S], related_keys: &[S]) -> Self {
        self.association(member, related, keys, related_keys, false)
    }

    pub fn member(&self, member: &str) -> Option<&MappedMember> {
        self.members.get(member)
    }

    fn column_of(&self, member: &str) -> Option<&ColumnInfo> {
        match self.members.get(member) {
            Some(MappedMember::Column(c)) => Some(c),
            _ => None,
        }
    }

    fn association_of(&self, member: &str) -> Option<&AssociationInfo> {
        match self.members.get(member) {
            Some(MappedMember::Association(a)) => Some(a),
            _ => None,
        }
    }
}

/// In-memory [`QueryMapping`].
#[derive(Debug, Clone, Default)]
pub struct EntityMapping {
    entities: IndexMap<String, MappedEntity>,
}

#[derive(Debug, Default)]
pub struct EntityMappingBuilder {
    entities: Vec<MappedEntity>,
}

impl EntityMappingBuilder {
    pub fn entity(mut self, entity: MappedEntity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn build(self) -> Result<EntityMapping> {
        let mut entities = IndexMap::new();
        for entity in self.entities {
            if entities.contains_key(&entity.name) {
                return Err(QueryError::mapping(format!("entity '{}' is mapped twice", entity.name)));
            }
            entities.insert(entity.name.clone(), entity);
        }
        let mapping = EntityMapping { entities };
        mapping.validate()?;
        debug!(entities = mapping.entities.len(), "entity mapping built");
        Ok(mapping)
    }
}

impl EntityMapping {
    pub fn builder() -> EntityMappingBuilder {
        EntityMappingBuilder::default()
    }

    pub fn entity(&self, name: &str) -> Option<&MappedEntity> {
        self.entities.get(name)
    }

    fn validate(&self) -> Result<()> {
        for entity in self.entities.values() {
            if let Some(dup) = entity.duplicates.first() {
                return Err(QueryError::mapping(format!("member '{}.{}' is mapped twice", entity.name, dup)));
            }
            let mut column_names = HashSet::new();
            for (member, mapped) in &entity.members {
                match mapped {
                    MappedMember::Column(c) => {
                        let table = c.table.as_deref().unwrap_or(&entity.table);
                        if !column_names.insert((table.to_string(), c.column.clone())) {
                            return Err(QueryError::mapping(format!(
                                "column '{}.{}' is mapped by more than one member of '{}'",
                                table, c.column, entity.name
                            )));
                        }
                        if let Some(t) = &c.table {
                            if !entity.extension_tables.iter().any(|x| &x.name == t) {
                                return Err(QueryError::mapping(format!(
                                    "member '{}.{}' names unknown table '{}'",
                                    entity.name, member, t
                                )));
                            }
                        }
                    }
                    MappedMember::Association(a) => self.validate_association(entity, member, a)?,
                }
            }
            for ext in &entity.extension_tables {
                if ext.key_columns.is_empty() || ext.key_columns.len() != ext.related_members.len() {
                    return Err(QueryError::mapping(format!(
                        "extension table '{}' of '{}' has no key correspondence with the primary table",
                        ext.name, entity.name
                    )));
                }
                for m in &ext.related_members {
                    match entity.column_of(m) {
                        Some(c) if c.table.is_none() => {}
                        _ => {
                            return Err(QueryError::mapping(format!(
                                "extension table '{}' references '{}.{}', which is not a primary table column",
                                ext.name, entity.name, m
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_association(&self, entity: &MappedEntity, member: &str, a: &AssociationInfo) -> Result<()> {
        let related = self.entities.get(&a.related_entity).ok_or_else(|| {
            QueryError::mapping(format!(
                "association '{}.{}' refers to unknown entity '{}'",
                entity.name, member, a.related_entity
            ))
        })?;
        if a.key_members.is_empty() || a.key_members.len() != a.related_key_members.len() {
            return Err(QueryError::mapping(format!(
                "association '{}.{}' has {} key members but {} related key members",
                entity.name,
                member,
                a.key_members.len(),
                a.related_key_members.len()
            )));
        }
        for k in &a.key_members {
            if entity.column_of(k).is_none() {
                return Err(QueryError::mapping(format!("association '{}.{}' uses unknown key member '{}'", entity.name, member, k)));
            }
        }
        for k in &a.related_key_members {
            if related.column_of(k).is_none() {
                return Err(QueryError::mapping(format!(
                    "association '{}.{}' uses unknown related key member '{}.{}'",
                    entity.name, member, related.name, k
                )));
            }
        }
        Ok(())
    }
}

impl QueryMapping for EntityMapping {
    fn has_entity(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    fn get_table_name(&self, entity: &str) -> Option<&str> {
        self.entities.get(entity).map(|e| e.table.as_str())
    }

    fn get_tables(&self, entity: &str) -> Vec<&str> {
        match self.entities.get(entity) {
            Some(e) => std::iter::once(e.table.as_str()).chain(e.extension_tables.iter().map(|x| x.name.as_str())).collect(),
            None => Vec::new(),
        }
    }

    fn get_extension_key_columns(&self, entity: &str, table: &str) -> Option<KeyPairs<'_>> {
        let ext = self.entities.get(entity)?.extension_tables.iter().find(|x| x.name == table)?;
        Some(KeyPairs {
            local: ext.key_columns.iter().map(String::as_str).collect(),
            related: ext.related_members.iter().map(String::as_str).collect(),
        })
    }

    fn get_mapped_members(&self, entity: &str) -> Vec<&str> {
        self.entities.get(entity).map(|e| e.members.keys().map(String::as_str).collect()).unwrap_or_default()
    }

    fn get_primary_key_members(&self, entity: &str) -> Vec<&str> {
        match self.entities.get(entity) {
            Some(e) => e
                .members
                .iter()
                .filter(|(_, m)| matches!(m, MappedMember::Column(c) if c.primary_key))
                .map(|(name, _)| name.as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    fn is_column(&self, entity: &str, member: &str) -> bool {
        self.entities.get(entity).and_then(|e| e.column_of(member)).is_some()
    }

    fn is_primary_key(&self, entity: &str, member: &str) -> bool {
        self.entities.get(entity).and_then(|e| e.column_of(member)).is_some_and(|c| c.primary_key)
    }

    fn is_generated(&self, entity: &str, member: &str) -> bool {
        self.entities.get(entity).and_then(|e| e.column_of(member)).is_some_and(|c| c.generated)
    }

    fn get_column_name(&self, entity: &str, member: &str) -> Option<&str> {
        self.entities.get(entity)?.column_of(member).map(|c| c.column.as_str())
    }

    fn get_column_type(&self, entity: &str, member: &str) -> Option<&SqlType> {
        self.entities.get(entity)?.column_of(member).map(|c| &c.sql_type)
    }

    fn get_column_table(&self, entity: &str, member: &str) -> Option<&str> {
        let e = self.entities.get(entity)?;
        e.column_of(member).map(|c| c.table.as_deref().unwrap_or(&e.table))
    }

    fn is_association_relationship(&self, entity: &str, member: &str) -> bool {
        self.entities.get(entity).and_then(|e| e.association_of(member)).is_some()
    }

    fn is_singleton_relationship(&self, entity: &str, member: &str) -> bool {
        self.entities.get(entity).and_then(|e| e.association_of(member)).is_some_and(|a| a.singleton)
    }

    fn get_related_entity(&self, entity: &str, member: &str) -> Option<&str> {
        self.entities.get(entity)?.association_of(member).map(|a| a.related_entity.as_str())
    }

    fn get_association_key_members(&self, entity: &str, member: &str) -> Option<KeyPairs<'_>> {
        let a = self.entities.get(entity)?.association_of(member)?;
        Some(KeyPairs {
            local: a.key_members.iter().map(String::as_str).collect(),
            related: a.related_key_members.iter().map(String::as_str).collect(),
        })
    }
}
