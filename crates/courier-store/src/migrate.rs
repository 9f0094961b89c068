//! Declarative "ensure-tables-exist" migration.
//!
//! Entities describe their table shape; the client renders idempotent
//! `CREATE TABLE IF NOT EXISTS` DDL, fanned out across every physical shard
//! for sharded tables. Nothing here alters or drops existing tables.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// Raw SQL type, e.g. `BIGINT UNSIGNED` or `VARCHAR(191)`.
    pub sql_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub auto_increment: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: false,
            default: None,
            auto_increment: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// The schema of one logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDef {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexDef>,
}

impl EntityDef {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }
}

pub(crate) fn render_create_table(physical: &str, entity: &EntityDef) -> String {
    let mut parts: Vec<String> = entity
        .columns
        .iter()
        .map(|column| {
            let mut part = format!("{} {}", quote(&column.name), column.sql_type);
            if !column.nullable {
                part.push_str(" NOT NULL");
            }
            if column.auto_increment {
                part.push_str(" AUTO_INCREMENT");
            }
            if let Some(default) = &column.default {
                part.push_str(&format!(" DEFAULT {default}"));
            }
            part
        })
        .collect();

    if !entity.primary_key.is_empty() {
        parts.push(format!("PRIMARY KEY ({})", quote_list(&entity.primary_key)));
    }
    for index in &entity.indexes {
        let kind = if index.unique { "UNIQUE KEY" } else { "KEY" };
        parts.push(format!(
            "{} {} ({})",
            kind,
            quote(&index.name),
            quote_list(&index.columns)
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({}) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        quote(physical),
        parts.join(", ")
    )
}

fn quote(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

fn quote_list(idents: &[String]) -> String {
    idents
        .iter()
        .map(|ident| quote(ident))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn users() -> EntityDef {
        EntityDef::new("users")
            .column(ColumnDef::new("id", "BIGINT UNSIGNED").auto_increment())
            .column(ColumnDef::new("user_id", "BIGINT").default_value("0"))
            .column(ColumnDef::new("name", "VARCHAR(191)").nullable())
            .primary_key(["id"])
            .index(IndexDef::new("idx_user_id", ["user_id"]).unique())
    }

    #[test]
    fn renders_idempotent_ddl() {
        let ddl = render_create_table("users_09", &users());
        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS `users_09` (\
             `id` BIGINT UNSIGNED NOT NULL AUTO_INCREMENT, \
             `user_id` BIGINT NOT NULL DEFAULT 0, \
             `name` VARCHAR(191), \
             PRIMARY KEY (`id`), \
             UNIQUE KEY `idx_user_id` (`user_id`)\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
        );
    }

    #[test]
    fn minimal_entity_renders_without_keys() {
        let entity = EntityDef::new("kv").column(ColumnDef::new("k", "VARCHAR(64)"));
        let ddl = render_create_table("kv", &entity);
        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS `kv` (`k` VARCHAR(64) NOT NULL) \
             ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
        );
    }
}
