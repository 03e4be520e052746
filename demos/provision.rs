//! Demo: reads connection settings from the environment, provisions two related tables,
//! then runs a few operations through the method registry.
//!
//! `SHELF_SPECS` may point at a JSON file or directory of table specs; otherwise built-in specs are used.

use crud_shelf::{
    ensure_database_exists, load_specs_from_path, ChannelBroadcaster, ColumnDef, ConstraintDef, Context, MemoryCache,
    Relation, Settings, Shelf, TableSpec,
};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn builtin_specs() -> Vec<TableSpec> {
    vec![
        TableSpec::new("soloTable", "solo_table")
            .column(ColumnDef::new("label", "varchar(255)").not_null())
            .timestamps(),
        TableSpec::new("itemTable", "item_table")
            .column(ColumnDef::new("solo_id", "bigint").not_null())
            .column(ColumnDef::new("name", "text").not_null())
            .constraint(ConstraintDef::foreign_key("solo_id", "solo_table"))
            .relation(Relation::to_one("solo", "solo_table", "solo_id").only(["id", "label"])),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("crud_shelf=info".parse()?))
        .init();

    let settings = Settings::from_env()?;
    for url in settings.connections.groups()?.values() {
        ensure_database_exists(url).await?;
    }

    let specs = match std::env::var("SHELF_SPECS") {
        Ok(path) => load_specs_from_path(path).await?,
        Err(_) => builtin_specs(),
    };

    let broadcaster = Arc::new(ChannelBroadcaster::default());
    let mut changes = broadcaster.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = changes.recv().await {
            tracing::info!(channel = %event.channel, method = event.change.method(), "change");
        }
    });

    let ctx = Context::new()
        .with_cache(Arc::new(MemoryCache::new()))
        .with_broadcaster(broadcaster);
    let shelf = Shelf::builder(ctx)
        .connect(&settings.connections, settings.max_connections)
        .await?
        .schemas("default", specs)
        .build()
        .await?;

    for name in shelf.method_names() {
        tracing::info!(method = %name, "registered");
    }

    if shelf.model("soloTable").is_some() && shelf.model("itemTable").is_some() {
        let solo = shelf
            .invoke("models.soloTable.do.create", json!({ "payload": { "label": "first" } }))
            .await?;
        shelf
            .invoke(
                "models.itemTable.do.create",
                json!({ "payload": { "solo_id": solo["id"], "name": "widget" } }),
            )
            .await?;
        let page = shelf
            .invoke("models.itemTable.do.browse", json!({ "query": { "page": 1, "perPage": 10 } }))
            .await?;
        println!("{}", serde_json::to_string_pretty(&page)?);
    }
    Ok(())
}
