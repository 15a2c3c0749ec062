use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::binder::{bind_member, ColumnProjector, ComparisonRewriter, QueryBinder, RelationshipBinder};
use crate::dialect::Language;
use crate::error::{QueryError, Result};
use crate::expr::*;
use crate::mapping::QueryMapping;
use crate::query::Parameter;
use crate::rewrite::{
    AggregateRewriter, RedundantColumnRemover, RedundantJoinRemover, RedundantSubqueryRemover, UnusedColumnRemover,
};

/// Which write a batch template performs for every item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

/// Where the values of a write come from: a concrete instance, or the
/// current item of a batch.
#[derive(Clone, Copy)]
enum ValueSource<'v> {
    Instance(&'v Value),
    Item(&'v Parameter),
}

struct MappedColumn<'m> {
    member: &'m str,
    column: &'m str,
    table: &'m str,
    sql_type: SqlType,
}

/// Builds the relational trees for mapped entities: the entity query
/// itself, association members, primary key lookups and write commands.
pub struct QueryMapper<'a> {
    mapping: &'a dyn QueryMapping,
    language: &'a dyn Language,
}

impl<'a> QueryMapper<'a> {
    pub fn new(mapping: &'a dyn QueryMapping, language: &'a dyn Language) -> Self {
        Self { mapping, language }
    }

    pub fn mapping(&self) -> &'a dyn QueryMapping {
        self.mapping
    }

    pub fn language(&self) -> &'a dyn Language {
        self.language
    }

    /// Logical translation: bind the operator tree, fold group aggregates,
    /// drop redundancy, expand leftover association members and rewrite
    /// structured comparisons.
    pub fn translate(&self, expr: &ExprRef) -> Result<ExprRef> {
        debug!(dialect = self.language.name(), "mapper");
        let bound = QueryBinder::bind(self, expr)?;
        let bound = AggregateRewriter::rewrite(&bound)?;

        let bound = UnusedColumnRemover::remove(&bound)?;
        let bound = RedundantColumnRemover::remove(&bound)?;
        let bound = RedundantSubqueryRemover::remove(&bound)?;
        let bound = RedundantJoinRemover::remove(&bound)?;

        let related = RelationshipBinder::bind(self, &bound)?;
        let bound = if same(&related, &bound) {
            bound
        } else {
            let related = RedundantColumnRemover::remove(&related)?;
            RedundantJoinRemover::remove(&related)?
        };
        ComparisonRewriter::rewrite(self.mapping, &bound)
    }

    fn columns(&self, entity: &str) -> Result<Vec<MappedColumn<'a>>> {
        let mapping = self.mapping;
        if !mapping.has_entity(entity) {
            return Err(QueryError::mapping(format!("unknown entity '{entity}'")));
        }
        let mut out = Vec::new();
        for member in mapping.get_mapped_members(entity) {
            if !mapping.is_column(entity, member) {
                continue;
            }
            let column = mapping
                .get_column_name(entity, member)
                .ok_or_else(|| QueryError::mapping(format!("'{entity}.{member}' has no column name")))?;
            let table = mapping
                .get_column_table(entity, member)
                .ok_or_else(|| QueryError::mapping(format!("'{entity}.{member}' has no table")))?;
            let sql_type = mapping.get_column_type(entity, member).cloned().unwrap_or_else(|| SqlType::new(DbType::NVarChar));
            out.push(MappedColumn { member, column, table, sql_type });
        }
        Ok(out)
    }

    fn table_expr(entity: &str, name: &str) -> (TableAlias, ExprRef) {
        let alias = TableAlias::new();
        (alias, Arc::new(Expr::Table(TableExpr { alias, entity: entity.to_string(), name: name.to_string() })))
    }

    /// The projection reading every column member of `entity`, with its
    /// extension tables joined in by their key correspondences.
    pub fn get_query_expression(&self, entity: &str) -> Result<ExprRef> {
        let columns = self.columns(entity)?;
        let tables = self.mapping.get_tables(entity);
        let primary = *tables.first().ok_or_else(|| QueryError::mapping(format!("entity '{entity}' has no table")))?;

        let (primary_alias, mut source) = Self::table_expr(entity, primary);
        let mut aliases = vec![(primary, primary_alias)];
        for ext in tables.iter().skip(1) {
            let keys = self
                .mapping
                .get_extension_key_columns(entity, ext)
                .ok_or_else(|| QueryError::mapping(format!("extension table '{ext}' of '{entity}' has no key correspondence")))?;
            let (alias, table) = Self::table_expr(entity, ext);
            let mut predicates = Vec::new();
            for (key_column, member) in keys.local.iter().zip(&keys.related) {
                let related = columns
                    .iter()
                    .find(|c| c.member == *member)
                    .ok_or_else(|| QueryError::mapping(format!("'{entity}.{member}' is not a column")))?;
                predicates.push(Expr::equal(
                    Expr::column(alias, *key_column, related.sql_type.clone()),
                    Expr::column(primary_alias, related.column, related.sql_type.clone()),
                ));
            }
            source = Expr::join(JoinKind::SingletonLeftOuter, source, table, Expr::and_all(predicates));
            aliases.push((ext, alias));
        }

        let select_alias = TableAlias::new();
        let mut declarations: Vec<ColumnDeclaration> = Vec::with_capacity(columns.len());
        let mut fields = Vec::with_capacity(columns.len());
        for c in &columns {
            let table_alias = aliases.iter().find(|(t, _)| *t == c.table).map(|(_, a)| *a).unwrap_or(primary_alias);
            let name = available_column_name(&declarations, c.column);
            declarations.push(ColumnDeclaration::new(
                name.clone(),
                Expr::column(table_alias, c.column, c.sql_type.clone()),
                c.sql_type.clone(),
            ));
            fields.push((c.member.to_string(), Expr::column(select_alias, name, c.sql_type.clone())));
        }
        let projector = Arc::new(Expr::Entity(EntityExpr { entity: entity.to_string(), expr: Expr::record(fields) }));
        let select = SelectExpr::new(select_alias, declarations, Some(source), None);
        Ok(Expr::projection(select, projector, None))
    }

    /// Expression for `root.member`, where `root` is a bound entity.
    ///
    /// Columns resolve directly; associations become a projection of the
    /// related entity correlated on the association keys (aggregated to one
    /// element for to-one associations).
    pub fn get_member_expression(&self, root: &ExprRef, entity: &str, member: &str) -> Result<ExprRef> {
        if self.mapping.is_association_relationship(entity, member) {
            let related = self
                .mapping
                .get_related_entity(entity, member)
                .ok_or_else(|| QueryError::mapping(format!("'{entity}.{member}' has no related entity")))?;
            let keys = self
                .mapping
                .get_association_key_members(entity, member)
                .ok_or_else(|| QueryError::mapping(format!("'{entity}.{member}' has no key members")))?;
            let query = self.get_query_expression(related)?;
            let projection = query.as_projection()?;
            let inner = projection.select()?;

            let mut predicates = Vec::with_capacity(keys.local.len());
            for (local, remote) in keys.local.iter().zip(&keys.related) {
                let remote_expr = bind_member(&projection.projector, remote);
                let local_expr = bind_member(root, local);
                if matches!(local_expr.as_ref(), Expr::Member(_)) {
                    return Err(QueryError::mapping(format!("cannot bind key member '{entity}.{local}'")));
                }
                predicates.push(Expr::equal(remote_expr, local_expr));
            }

            let alias = TableAlias::new();
            let pc = ColumnProjector::project(&projection.projector, alias, &[inner.alias])?;
            let select = SelectExpr::new(alias, pc.columns, Some(projection.select.clone()), Expr::and_all(predicates));
            let aggregator = self.mapping.is_singleton_relationship(entity, member).then_some(ElementKind::SingleOrDefault);
            Ok(Expr::projection(select, pc.projector, aggregator))
        } else if self.mapping.is_column(entity, member) {
            Ok(bind_member(root, member))
        } else {
            Err(QueryError::mapping(format!("member '{entity}.{member}' is not mapped")))
        }
    }

    /// Lookup by primary key. Each key member gets its own named value,
    /// in key declaration order.
    pub fn get_by_id(&self, entity: &str, keys: &[Value]) -> Result<ExprRef> {
        let key_members = self.mapping.get_primary_key_members(entity);
        if key_members.is_empty() {
            return Err(QueryError::mapping(format!("entity '{entity}' has no primary key")));
        }
        if key_members.len() != keys.len() {
            return Err(QueryError::mapping(format!(
                "entity '{entity}' has {} key members but {} values were given",
                key_members.len(),
                keys.len()
            )));
        }
        let query = self.get_query_expression(entity)?;
        let projection = query.as_projection()?;
        let inner = projection.select()?;

        let mut predicates = Vec::with_capacity(keys.len());
        for (member, value) in key_members.iter().zip(keys) {
            let column = bind_member(&projection.projector, member);
            let literal = Literal::from_json(value)
                .ok_or_else(|| QueryError::mapping(format!("key value for '{entity}.{member}' is not a scalar")))?;
            let sql_type = TypeInference::sql_type_of(&column);
            predicates.push(Expr::equal(
                column,
                Arc::new(Expr::NamedValue(NamedValueExpr { name: member.to_string(), sql_type, value: Expr::constant(literal) })),
            ));
        }

        let alias = TableAlias::new();
        let pc = ColumnProjector::project(&projection.projector, alias, &[inner.alias])?;
        let select = SelectExpr::new(alias, pc.columns, Some(projection.select.clone()), Expr::and_all(predicates));
        debug!(entity, keys = keys.len(), "primary key lookup");
        Ok(Expr::projection(select, pc.projector, Some(ElementKind::SingleOrDefault)))
    }

    fn value_of(&self, source: ValueSource<'_>, entity: &str, member: &str) -> Result<ExprRef> {
        match source {
            ValueSource::Instance(instance) => {
                let value = instance.get(member).unwrap_or(&Value::Null);
                let literal = Literal::from_json(value)
                    .ok_or_else(|| QueryError::mapping(format!("value of '{entity}.{member}' is not a scalar")))?;
                Ok(Expr::constant(literal))
            }
            ValueSource::Item(item) => Ok(Expr::member(Arc::new(Expr::Parameter(item.clone())), member)),
        }
    }

    fn key_predicate(&self, source: ValueSource<'_>, entity: &str, table: &str, alias: TableAlias, columns: &[MappedColumn<'_>]) -> Result<ExprRef> {
        let mut predicates = Vec::new();
        let primary = self.mapping.get_table_name(entity).unwrap_or(table);
        if table == primary {
            for c in columns.iter().filter(|c| c.table == table && self.mapping.is_primary_key(entity, c.member)) {
                predicates.push(Expr::equal(Expr::column(alias, c.column, c.sql_type.clone()), self.value_of(source, entity, c.member)?));
            }
        } else {
            let keys = self
                .mapping
                .get_extension_key_columns(entity, table)
                .ok_or_else(|| QueryError::mapping(format!("extension table '{table}' of '{entity}' has no key correspondence")))?;
            for (key_column, member) in keys.local.iter().zip(&keys.related) {
                let sql_type = self.mapping.get_column_type(entity, member).cloned().unwrap_or_else(SqlType::int);
                predicates.push(Expr::equal(Expr::column(alias, *key_column, sql_type), self.value_of(source, entity, member)?));
            }
        }
        Expr::and_all(predicates).ok_or_else(|| QueryError::mapping(format!("entity '{entity}' has no primary key")))
    }

    fn generated_member(&self, entity: &str, columns: &[MappedColumn<'_>]) -> Option<(String, SqlType)> {
        columns
            .iter()
            .find(|c| self.mapping.is_generated(entity, c.member))
            .map(|c| (c.member.to_string(), c.sql_type.clone()))
    }

    fn insert_commands(&self, source: ValueSource<'_>, entity: &str, returning_id: bool) -> Result<ExprRef> {
        let columns = self.columns(entity)?;
        let tables = self.mapping.get_tables(entity);
        let generated = self.generated_member(entity, &columns);
        let mut commands = Vec::new();
        let mut identity: Option<ExprRef> = None;

        for (i, table) in tables.iter().enumerate() {
            let (alias, table_expr) = Self::table_expr(entity, table);
            let mut assignments = Vec::new();
            if i > 0 {
                let keys = self
                    .mapping
                    .get_extension_key_columns(entity, table)
                    .ok_or_else(|| QueryError::mapping(format!("extension table '{table}' of '{entity}' has no key correspondence")))?;
                for (key_column, member) in keys.local.iter().zip(&keys.related) {
                    let sql_type = self.mapping.get_column_type(entity, member).cloned().unwrap_or_else(SqlType::int);
                    let value = match (&generated, &identity) {
                        (Some((g, _)), Some(var)) if g == member => var.clone(),
                        _ => self.value_of(source, entity, member)?,
                    };
                    assignments.push(ColumnAssignment { column: Expr::column(alias, *key_column, sql_type), expr: value });
                }
            }
            for c in columns.iter().filter(|c| c.table == *table && !self.mapping.is_generated(entity, c.member)) {
                assignments.push(ColumnAssignment {
                    column: Expr::column(alias, c.column, c.sql_type.clone()),
                    expr: self.value_of(source, entity, c.member)?,
                });
            }
            commands.push(Arc::new(Expr::Insert(InsertCommand { table: table_expr, assignments })));

            // extension rows need the identity the primary insert produced
            if let (0, true, Some((member, sql_type))) = (i, tables.len() > 1, &generated) {
                let id = self.language.generated_id_expression()?;
                let select = SelectExpr::new(
                    TableAlias::new(),
                    vec![ColumnDeclaration::new(member.clone(), id.clone(), sql_type.clone())],
                    None,
                    None,
                );
                commands.push(Arc::new(Expr::Declaration(DeclarationCommand {
                    variables: vec![VariableDeclaration { name: member.clone(), sql_type: sql_type.clone(), expr: id }],
                    source: select.into_expr(),
                })));
                identity = Some(Arc::new(Expr::Variable(VariableExpr { name: member.clone(), sql_type: sql_type.clone() })));
            }
        }

        if returning_id {
            let (member, sql_type) = generated
                .clone()
                .ok_or_else(|| QueryError::mapping(format!("entity '{entity}' has no generated member")))?;
            let value = match &identity {
                Some(var) => var.clone(),
                None => self.language.generated_id_expression()?,
            };
            let alias = TableAlias::new();
            let select = SelectExpr::new(alias, vec![ColumnDeclaration::new(member.clone(), value, sql_type.clone())], None, None);
            commands.push(Expr::projection(select, Expr::column(alias, member, sql_type), Some(ElementKind::Single)));
        }
        Ok(block(commands))
    }

    pub fn insert(&self, entity: &str, instance: &Value) -> Result<ExprRef> {
        self.insert_commands(ValueSource::Instance(instance), entity, false)
    }

    /// Insert, then read back the generated identity as a single row.
    pub fn insert_returning_id(&self, entity: &str, instance: &Value) -> Result<ExprRef> {
        self.insert_commands(ValueSource::Instance(instance), entity, true)
    }

    fn update_commands(&self, source: ValueSource<'_>, entity: &str, original: Option<&Value>) -> Result<ExprRef> {
        let columns = self.columns(entity)?;
        let mut commands = Vec::new();
        for table in self.mapping.get_tables(entity) {
            let (alias, table_expr) = Self::table_expr(entity, table);
            let mut where_ = self.key_predicate(source, entity, table, alias, &columns)?;
            if let Some(original) = original {
                for c in columns.iter().filter(|c| c.table == table && !self.mapping.is_primary_key(entity, c.member)) {
                    let column = Expr::column(alias, c.column, c.sql_type.clone());
                    let check = match Literal::from_json(original.get(c.member).unwrap_or(&Value::Null)) {
                        Some(Literal::Null) => Expr::is_null(column),
                        Some(lit) => Expr::equal(column, Expr::constant(lit)),
                        None => return Err(QueryError::mapping(format!("original value of '{entity}.{}' is not a scalar", c.member))),
                    };
                    where_ = Expr::and(where_, check);
                }
            }
            let mut assignments = Vec::new();
            for c in columns.iter().filter(|c| c.table == table && !self.mapping.is_primary_key(entity, c.member)) {
                assignments.push(ColumnAssignment {
                    column: Expr::column(alias, c.column, c.sql_type.clone()),
                    expr: self.value_of(source, entity, c.member)?,
                });
            }
            if assignments.is_empty() {
                continue;
            }
            commands.push(Arc::new(Expr::Update(UpdateCommand { table: table_expr, where_, assignments })));
        }
        if commands.is_empty() {
            return Err(QueryError::mapping(format!("entity '{entity}' has no updatable members")));
        }
        Ok(block(commands))
    }

    /// Update every non-key column. With `original`, the update only
    /// applies while the stored row still matches that snapshot.
    pub fn update(&self, entity: &str, instance: &Value, original: Option<&Value>) -> Result<ExprRef> {
        self.update_commands(ValueSource::Instance(instance), entity, original)
    }

    fn delete_commands(&self, source: ValueSource<'_>, entity: &str) -> Result<ExprRef> {
        let columns = self.columns(entity)?;
        let mut commands = Vec::new();
        // extension rows go first
        for table in self.mapping.get_tables(entity).into_iter().rev() {
            let (alias, table_expr) = Self::table_expr(entity, table);
            let where_ = self.key_predicate(source, entity, table, alias, &columns)?;
            commands.push(Arc::new(Expr::Delete(DeleteCommand { table: table_expr, where_: Some(where_) })));
        }
        Ok(block(commands))
    }

    pub fn delete(&self, entity: &str, instance: &Value) -> Result<ExprRef> {
        self.delete_commands(ValueSource::Instance(instance), entity)
    }

    /// Insert when no row with the instance's key exists, update otherwise.
    pub fn upsert(&self, entity: &str, instance: &Value) -> Result<ExprRef> {
        let columns = self.columns(entity)?;
        let primary = self
            .mapping
            .get_table_name(entity)
            .ok_or_else(|| QueryError::mapping(format!("unknown entity '{entity}'")))?;
        let (alias, table_expr) = Self::table_expr(entity, primary);
        let where_ = self.key_predicate(ValueSource::Instance(instance), entity, primary, alias, &columns)?;
        let select_alias = TableAlias::new();
        let probe = SelectExpr::new(
            select_alias,
            vec![ColumnDeclaration::new("value", Expr::constant(1), SqlType::int())],
            Some(table_expr),
            Some(where_),
        );
        Ok(Arc::new(Expr::If(IfCommand {
            check: Arc::new(Expr::Exists(probe.into_expr())),
            if_true: self.update(entity, instance, None)?,
            if_false: Some(self.insert(entity, instance)?),
        })))
    }

    /// One command template run over every item of `items`.
    pub fn batch(&self, entity: &str, kind: WriteKind, items: Vec<Value>, batch_size: usize) -> Result<ExprRef> {
        let item = Parameter::new("item");
        let source = ValueSource::Item(&item);
        let operation = match kind {
            WriteKind::Insert => self.insert_commands(source, entity, false)?,
            WriteKind::Update => self.update_commands(source, entity, None)?,
            WriteKind::Delete => self.delete_commands(source, entity)?,
        };
        Ok(Arc::new(Expr::Batch(BatchCommand { item, operation, items: Arc::new(items), batch_size: batch_size.max(1) })))
    }

    /// Whether any scalar column member differs between `instance` and the
    /// `original` snapshot. Associations do not take part.
    pub fn is_modified(&self, entity: &str, instance: &Value, original: &Value) -> Result<bool> {
        let columns = self.columns(entity)?;
        Ok(columns.iter().any(|c| {
            let current = instance.get(c.member).unwrap_or(&Value::Null);
            let before = original.get(c.member).unwrap_or(&Value::Null);
            current != before
        }))
    }
}

fn block(mut commands: Vec<ExprRef>) -> ExprRef {
    if commands.len() == 1 {
        commands.remove(0)
    } else {
        Arc::new(Expr::Block(commands))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::_tests::fixtures::northwind_mapping;
    use crate::config::DialectKind;
    use crate::dialect::default_language;

    fn mapper_for<'a>(mapping: &'a dyn QueryMapping, kind: DialectKind) -> QueryMapper<'a> {
        QueryMapper::new(mapping, default_language(kind))
    }

    #[test]
    fn translate_binds_filter_to_columns() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        let q = crate::query::Query::from("Customer").filter(|c| c.member("City").eq("London"));
        let out = mapper.translate(q.expr()).unwrap();
        assert!(!crate::visitor::contains(&out, |e| matches!(e, Expr::Query(_) | Expr::Member(_))));
        let select = out.as_projection().unwrap().select().unwrap();
        assert!(select.where_.is_some());
    }

    #[test]
    fn entity_query_projects_every_column_member() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        let q = mapper.get_query_expression("Customer").unwrap();
        let p = q.as_projection().unwrap();
        let names: Vec<_> = p.select().unwrap().columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "Name", "City"]);
        match p.projector.as_ref() {
            Expr::Entity(e) => assert_eq!(e.entity, "Customer"),
            other => panic!("expected entity, got {other:?}"),
        }
    }

    #[test]
    fn extension_tables_are_joined_singleton_left_outer() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        let q = mapper.get_query_expression("Employee").unwrap();
        let select = q.as_projection().unwrap().select().unwrap().clone();
        match select.from.as_deref() {
            Some(Expr::Join(j)) => {
                assert_eq!(j.kind, JoinKind::SingletonLeftOuter);
                assert!(j.condition.is_some());
            }
            other => panic!("expected join, got {other:?}"),
        }
    }

    #[test]
    fn unknown_entity_is_a_mapping_error() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        match mapper.get_query_expression("Invoice") {
            Err(QueryError::Mapping(msg)) => assert!(msg.contains("Invoice")),
            other => panic!("expected mapping error, got {other:?}"),
        }
    }

    #[test]
    fn to_many_member_is_correlated_projection() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        let customer = mapper.get_query_expression("Customer").unwrap();
        let root = customer.as_projection().unwrap().projector.clone();
        let orders = mapper.get_member_expression(&root, "Customer", "Orders").unwrap();
        let p = orders.as_projection().unwrap();
        assert!(p.aggregator.is_none());
        assert!(p.select().unwrap().where_.is_some());

        let order = mapper.get_query_expression("Order").unwrap();
        let root = order.as_projection().unwrap().projector.clone();
        let customer = mapper.get_member_expression(&root, "Order", "Customer").unwrap();
        assert_eq!(customer.as_projection().unwrap().aggregator, Some(ElementKind::SingleOrDefault));
    }

    #[test]
    fn unmapped_member_is_rejected() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        let customer = mapper.get_query_expression("Customer").unwrap();
        let root = customer.as_projection().unwrap().projector.clone();
        assert!(matches!(mapper.get_member_expression(&root, "Customer", "Fax"), Err(QueryError::Mapping(_))));
    }

    #[test]
    fn get_by_id_binds_one_named_value_per_key() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        let q = mapper.get_by_id("OrderDetail", &[json!(10248), json!(11)]).unwrap();
        let where_ = q.as_projection().unwrap().select().unwrap().where_.clone().unwrap();
        let names: Vec<_> = Expr::split_and(&where_)
            .iter()
            .map(|p| match p.as_ref() {
                Expr::Binary(b) => match b.right.as_ref() {
                    Expr::NamedValue(nv) => nv.name.clone(),
                    other => panic!("expected named value, got {other:?}"),
                },
                other => panic!("expected comparison, got {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["OrderId", "ProductId"]);
    }

    #[test]
    fn get_by_id_checks_key_count() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        assert!(matches!(mapper.get_by_id("OrderDetail", &[json!(1)]), Err(QueryError::Mapping(_))));
    }

    #[test]
    fn insert_skips_generated_members() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        let cmd = mapper.insert("Customer", &json!({"Id": 7, "Name": "Alfreds", "City": "Berlin"})).unwrap();
        match cmd.as_ref() {
            Expr::Insert(i) => {
                let cols: Vec<_> = i.assignments.iter().filter_map(|a| a.column.as_column()).map(|c| c.name.as_str()).collect();
                assert_eq!(cols, vec!["Name", "City"]);
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn insert_into_extension_tables_declares_the_identity() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        let cmd = mapper.insert_returning_id("Employee", &json!({"Name": "Nancy", "Notes": "BA"})).unwrap();
        match cmd.as_ref() {
            Expr::Block(commands) => {
                let kinds: Vec<_> = commands.iter().map(|c| c.kind_name()).collect();
                assert_eq!(kinds, vec!["Insert", "Declaration", "Insert", "Projection"]);
            }
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn oracle_cannot_return_generated_ids() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::Oracle);
        let err = mapper.insert_returning_id("Customer", &json!({"Name": "x"})).unwrap_err();
        assert!(matches!(err, QueryError::Unsupported { dialect: Some(_), .. }));
    }

    #[test]
    fn update_with_snapshot_checks_original_values() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        let before = json!({"Id": 1, "Name": "A", "City": null});
        let after = json!({"Id": 1, "Name": "B", "City": null});
        let cmd = mapper.update("Customer", &after, Some(&before)).unwrap();
        match cmd.as_ref() {
            Expr::Update(u) => {
                assert_eq!(Expr::split_and(&u.where_).len(), 3);
                assert_eq!(u.assignments.len(), 2);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn delete_removes_extension_rows_first() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        let cmd = mapper.delete("Employee", &json!({"Id": 3})).unwrap();
        match cmd.as_ref() {
            Expr::Block(commands) => match commands[0].as_ref() {
                Expr::Delete(d) => match d.table.as_ref() {
                    Expr::Table(t) => assert_eq!(t.name, "EmployeeDetails"),
                    other => panic!("expected table, got {other:?}"),
                },
                other => panic!("expected delete, got {other:?}"),
            },
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn batch_template_reads_the_item_parameter() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        let cmd = mapper.batch("Customer", WriteKind::Delete, vec![json!({"Id": 1}), json!({"Id": 2})], 0).unwrap();
        match cmd.as_ref() {
            Expr::Batch(b) => {
                assert_eq!(b.items.len(), 2);
                assert_eq!(b.batch_size, 1);
                assert!(crate::visitor::contains(&b.operation, |e| matches!(e, Expr::Parameter(p) if *p == b.item)));
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn is_modified_compares_scalar_members_only() {
        let mapping = northwind_mapping();
        let mapper = mapper_for(&mapping, DialectKind::TSql);
        let a = json!({"Id": 1, "Name": "A", "City": "Paris", "Orders": [1]});
        let b = json!({"Id": 1, "Name": "A", "City": "Paris", "Orders": [1, 2]});
        assert!(!mapper.is_modified("Customer", &a, &b).unwrap());
        let c = json!({"Id": 1, "Name": "Z", "City": "Paris"});
        assert!(mapper.is_modified("Customer", &a, &c).unwrap());
    }
}
