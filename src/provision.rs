//! Table provisioner: creates a schema's table with its columns, then its constraints and raw statement.
//! The staged mode lets a whole group get its columns before any cross-table foreign key is added.

use crate::config::{validate_spec, ColumnDef, ConstraintDef, TableSpec};
use crate::context::Context;
use crate::error::ShelfError;
use crate::store::{Store, TablePlan};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Stage {
    /// Columns, constraints and raw statement in one go.
    #[default]
    Full,
    Columns,
    Constraints,
}

/// Per-call extras on top of what the spec declares.
#[derive(Clone, Debug, Default)]
pub struct ProvisionOptions {
    pub stage: Stage,
    /// Placed before the spec's own columns.
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<ConstraintDef>,
}

impl ProvisionOptions {
    pub fn stage(stage: Stage) -> Self {
        ProvisionOptions {
            stage,
            ..Default::default()
        }
    }

    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_constraint(mut self, constraint: ConstraintDef) -> Self {
        self.constraints.push(constraint);
        self
    }
}

fn table_plan(spec: &TableSpec, ctx: &Context, opts: &ProvisionOptions) -> TablePlan {
    let mut columns = vec![ColumnDef::new("created_at", "timestamptz").not_null().default_expr("now()")];
    if spec.timestamps {
        columns.push(ColumnDef::new("updated_at", "timestamptz").not_null().default_expr("now()"));
    }
    columns.extend(opts.columns.iter().cloned());
    columns.extend(spec.columns.iter().cloned());
    columns.extend(ctx.columns.iter().cloned());
    TablePlan {
        table: spec.table.clone(),
        identity: !spec.composite,
        columns,
    }
}

/// Ensures the table for `spec` exists. Returns whether this call created it.
///
/// `Full` and `Columns` do nothing when the table already exists. `Constraints` assumes the caller
/// already ran `Columns` and only adds constraints and the raw statement.
pub async fn create_table(
    spec: &TableSpec,
    store: &dyn Store,
    ctx: &Context,
    opts: &ProvisionOptions,
) -> Result<bool, ShelfError> {
    let extra: Vec<ColumnDef> = opts.columns.iter().chain(&ctx.columns).cloned().collect();
    validate_spec(spec, &extra)?;

    let mut created = false;
    if opts.stage != Stage::Constraints {
        if store.has_table(&spec.table).await? {
            tracing::debug!(table = %spec.table, "table exists");
            return Ok(false);
        }
        if spec.columns.is_empty() && opts.columns.is_empty() {
            tracing::debug!(table = %spec.table, "no columns declared, skipping");
            return Ok(false);
        }
        store.create_table(&table_plan(spec, ctx, opts)).await?;
        if spec.composite {
            store.add_surrogate_id(&spec.table).await?;
        }
        tracing::info!(table = %spec.table, composite = spec.composite, "table created");
        created = true;
        if opts.stage == Stage::Columns {
            return Ok(true);
        }
    }

    let constraints: Vec<ConstraintDef> = opts
        .constraints
        .iter()
        .chain(&spec.constraints)
        .cloned()
        .collect();
    if !constraints.is_empty() {
        store.add_constraints(&spec.table, &constraints).await?;
        tracing::info!(table = %spec.table, count = constraints.len(), "constraints added");
    }
    if let Some(raw) = spec.raw.as_deref() {
        store.raw(raw).await?;
    }
    Ok(created || opts.stage == Stage::Constraints)
}
