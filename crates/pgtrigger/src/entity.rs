//! Entity descriptors: the slice of host model metadata triggers need.
//!
//! An entity is a logical table. Triggers only ever ask it for a table name,
//! a primary-key column, the column behind a field and whether a field is
//! maintained automatically (e.g. `updated_at`).

/// How a field is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKind {
    /// Plain column.
    #[default]
    Scalar,
    /// Foreign key; comparisons use its key column.
    ForeignKey,
}

/// Metadata for one field of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: String,
    pub column: String,
    pub kind: FieldKind,
    /// Maintained by the application or database on every write.
    pub auto: bool,
}

impl FieldMeta {
    /// A scalar field whose column has the same name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind: FieldKind::Scalar,
            auto: false,
        }
    }

    /// A foreign key field stored in `{name}_id`.
    pub fn foreign_key(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            column: format!("{name}_id"),
            name,
            kind: FieldKind::ForeignKey,
            auto: false,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn auto(mut self) -> Self {
        self.auto = true;
        self
    }

    pub fn is_foreign_key(&self) -> bool {
        self.kind == FieldKind::ForeignKey
    }
}

/// Static description of an entity (logical table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMeta {
    /// Label used in trigger URIs, e.g. `library.Book`.
    pub label: String,
    /// Table name as stored in the database.
    pub table: String,
    /// Primary key column.
    pub primary_key: String,
    /// Fields in declaration order.
    pub fields: Vec<FieldMeta>,
    /// Preferred database alias, if pinned.
    pub database: Option<String>,
}

impl EntityMeta {
    pub fn new(label: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            fields: Vec::new(),
            database: None,
        }
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn field(mut self, field: FieldMeta) -> Self {
        self.fields.push(field);
        self
    }

    pub fn database(mut self, alias: impl Into<String>) -> Self {
        self.database = Some(alias.into());
        self
    }

    /// Look up a field by name, falling back to its column name.
    pub fn get_field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.column == name))
    }

    /// Column backing `name`; the primary key alias `pk` is accepted.
    pub fn column_of(&self, name: &str) -> Option<&str> {
        if name == "pk" {
            return Some(&self.primary_key);
        }
        self.get_field(name).map(|f| f.column.as_str())
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn auto_fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields.iter().filter(|f| f.auto)
    }
}

/// Types that describe a database entity.
///
/// Usually implemented with `#[derive(Entity)]`.
pub trait Entity {
    fn meta() -> EntityMeta;
}

/// Decides which database an entity is written to and whether triggers may
/// be installed there.
pub trait Router: Send + Sync {
    /// Database alias used for writes, `None` for the default alias.
    fn db_for_write(&self, entity: &EntityMeta) -> Option<String> {
        entity.database.clone()
    }

    /// Whether schema changes for `entity` are allowed on `database`.
    fn allow_migrate(&self, database: &str, entity: &EntityMeta) -> bool {
        let _ = (database, entity);
        true
    }
}

/// Name of the database alias used when nothing else is configured.
pub const DEFAULT_DATABASE: &str = "default";

/// Routes every entity to its pinned database or `default`, and allows
/// installation everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRouter;

impl Router for DefaultRouter {}

/// Database alias an entity's triggers live in under `router`.
pub fn write_database(router: &dyn Router, entity: &EntityMeta) -> String {
    router
        .db_for_write(entity)
        .unwrap_or_else(|| DEFAULT_DATABASE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> EntityMeta {
        EntityMeta::new("library.Book", "library_book")
            .field(FieldMeta::new("id"))
            .field(FieldMeta::new("title"))
            .field(FieldMeta::foreign_key("author"))
            .field(FieldMeta::new("updated_at").auto())
    }

    #[test]
    fn resolves_columns() {
        let e = book();
        assert_eq!(e.column_of("title"), Some("title"));
        assert_eq!(e.column_of("author"), Some("author_id"));
        assert_eq!(e.column_of("author_id"), Some("author_id"));
        assert_eq!(e.column_of("pk"), Some("id"));
        assert_eq!(e.column_of("nope"), None);
    }

    #[test]
    fn auto_fields_are_listed() {
        let e = book();
        let auto: Vec<_> = e.auto_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(auto, vec!["updated_at"]);
    }

    #[test]
    fn default_router_uses_pinned_database() {
        let router = DefaultRouter;
        assert_eq!(write_database(&router, &book()), "default");
        assert_eq!(write_database(&router, &book().database("other")), "other");
        assert!(router.allow_migrate("default", &book()));
    }
}
