//! Table spec types matching the JSON schema descriptor format.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnType {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnType {
    /// SQL type text, e.g. `varchar(255)`.
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Simple(s) => s.clone(),
            ColumnType::Parameterized { name, params } => match params {
                Some(p) if !p.is_empty() => format!(
                    "{}({})",
                    name,
                    p.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
                ),
                _ => name.clone(),
            },
        }
    }
}

impl From<&str> for ColumnType {
    fn from(s: &str) -> Self {
        ColumnType::Simple(s.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnDefault {
    Literal(Value),
    Expression { expression: String },
}

impl<'de> Deserialize<'de> for ColumnDefault {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        match v {
            Value::Object(mut obj) => {
                if let Some(Value::String(s)) = obj.remove("expression") {
                    return Ok(ColumnDefault::Expression { expression: s });
                }
                if let Some(lit) = obj.remove("value").or_else(|| obj.remove("literal")) {
                    return Ok(ColumnDefault::Literal(lit));
                }
                Err(serde::de::Error::custom(format!(
                    "column default object must be {{ \"expression\": \"...\" }} or {{ \"value\": ... }}; got keys: {:?}",
                    obj.keys().collect::<Vec<_>>()
                )))
            }
            Value::Null => Err(serde::de::Error::custom("column default must not be null")),
            other => Ok(ColumnDefault::Literal(other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<ColumnDefault>,
    #[serde(default)]
    pub unique: bool,
}

fn default_true() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, type_: impl Into<ColumnType>) -> Self {
        ColumnDef {
            name: name.into(),
            type_: type_.into(),
            nullable: true,
            default: None,
            unique: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, v: impl Into<Value>) -> Self {
        self.default = Some(ColumnDefault::Literal(v.into()));
        self
    }

    pub fn default_expr(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(ColumnDefault::Expression { expression: expression.into() });
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintDef {
    Unique {
        columns: Vec<String>,
        #[serde(default)]
        name: Option<String>,
    },
    PrimaryKey {
        columns: Vec<String>,
    },
    ForeignKey {
        column: String,
        references_table: String,
        #[serde(default = "default_id")]
        references_column: String,
        #[serde(default)]
        on_delete: Option<String>,
        #[serde(default)]
        on_update: Option<String>,
    },
    Check {
        name: String,
        expression: String,
    },
    Index {
        columns: Vec<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

fn default_id() -> String {
    "id".into()
}

impl ConstraintDef {
    pub fn unique<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        ConstraintDef::Unique {
            columns: columns.into_iter().map(Into::into).collect(),
            name: None,
        }
    }

    pub fn primary_key<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        ConstraintDef::PrimaryKey {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn foreign_key(column: impl Into<String>, references_table: impl Into<String>) -> Self {
        ConstraintDef::ForeignKey {
            column: column.into(),
            references_table: references_table.into(),
            references_column: default_id(),
            on_delete: None,
            on_update: None,
        }
    }

    /// Columns of the owning table this constraint touches.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            ConstraintDef::Unique { columns, .. }
            | ConstraintDef::PrimaryKey { columns }
            | ConstraintDef::Index { columns, .. } => columns.iter().map(String::as_str).collect(),
            ConstraintDef::ForeignKey { column, .. } => vec![column.as_str()],
            ConstraintDef::Check { .. } => Vec::new(),
        }
    }
}

/// to_one: our `local_column` holds their `foreign_column`; to_many: their `foreign_column` holds our `local_column`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    ToOne,
    ToMany,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Key the related row(s) are attached under in each result row.
    pub name: String,
    pub kind: RelationKind,
    pub table: String,
    pub local_column: String,
    pub foreign_column: String,
    /// Subset of related columns to load; all when absent.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl Relation {
    pub fn to_one(name: impl Into<String>, table: impl Into<String>, local_column: impl Into<String>) -> Self {
        Relation {
            name: name.into(),
            kind: RelationKind::ToOne,
            table: table.into(),
            local_column: local_column.into(),
            foreign_column: "id".into(),
            columns: None,
        }
    }

    pub fn to_many(name: impl Into<String>, table: impl Into<String>, foreign_column: impl Into<String>) -> Self {
        Relation {
            name: name.into(),
            kind: RelationKind::ToMany,
            table: table.into(),
            local_column: "id".into(),
            foreign_column: foreign_column.into(),
            columns: None,
        }
    }

    pub fn only<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// Relation names to eager-load per read operation. `None` loads every declared relation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct References {
    #[serde(default)]
    pub browse: Option<Vec<String>>,
    #[serde(default)]
    pub obtain: Option<Vec<String>>,
}

/// Static shape of one table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDef>,
    /// Statement run after constraints when the table is first created.
    #[serde(default)]
    pub raw: Option<String>,
    /// No auto-increment primary key; a unique surrogate `id` is added instead.
    #[serde(default)]
    pub composite: bool,
    /// Maintain `updated_at`.
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub references: References,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        TableSpec {
            name: name.into(),
            table: table.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
            raw: None,
            composite: false,
            timestamps: false,
            relations: Vec::new(),
            references: References::default(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn constraint(mut self, constraint: ConstraintDef) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn raw(mut self, sql: impl Into<String>) -> Self {
        self.raw = Some(sql.into());
        self
    }

    pub fn composite(mut self) -> Self {
        self.composite = true;
        self
    }

    pub fn timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    pub fn browse_references<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.references.browse = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn obtain_references<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.references.obtain = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Relations eager-loaded by browse, in declaration order of the reference list.
    pub fn browse_relations(&self) -> Vec<Relation> {
        self.pick_relations(self.references.browse.as_deref())
    }

    pub fn obtain_relations(&self) -> Vec<Relation> {
        self.pick_relations(self.references.obtain.as_deref())
    }

    fn pick_relations(&self, names: Option<&[String]>) -> Vec<Relation> {
        match names {
            None => self.relations.clone(),
            Some(names) => names
                .iter()
                .filter_map(|n| self.relations.iter().find(|r| &r.name == n).cloned())
                .collect(),
        }
    }
}
