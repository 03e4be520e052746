//! Shelf build: staged provisioning, binding, method registry and hooks.

use async_trait::async_trait;
use crud_shelf::{
    load_specs_from_path, BuildHook, ColumnDef, ConstraintDef, Context, CustomOperation, FnMethod, Formatters,
    MemoryStore, Method, Model, ProvisionOptions, Row, Schema, SchemaOptions, Select, Shelf, ShelfError, Store, TableSpec,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn solo() -> TableSpec {
    TableSpec::new("soloTable", "solo_table").column(ColumnDef::new("label", "varchar(255)").not_null())
}

/// Declared before its parent so only the two-pass build can add its foreign key.
fn item() -> TableSpec {
    TableSpec::new("itemTable", "item_table")
        .column(ColumnDef::new("solo_id", "bigint").not_null())
        .constraint(ConstraintDef::foreign_key("solo_id", "solo_table"))
}

fn pair() -> TableSpec {
    TableSpec::new("pairTable", "pair_table")
        .column(ColumnDef::new("left_id", "bigint").not_null())
        .column(ColumnDef::new("right_id", "bigint").not_null())
        .constraint(ConstraintDef::unique(["left_id", "right_id"]))
        .composite()
}

#[tokio::test]
async fn foreign_keys_are_added_after_every_table_exists() {
    let store = Arc::new(MemoryStore::new());
    let shelf = Shelf::builder(Context::new())
        .store("default", store.clone())
        .schemas("default", [item(), solo()])
        .build()
        .await
        .unwrap();

    let statements = store.statements();
    assert!(statements[0].starts_with("CREATE TABLE \"item_table\""));
    assert!(statements[1].starts_with("CREATE TABLE \"solo_table\""));
    assert!(statements[2].contains("FOREIGN KEY (\"solo_id\") REFERENCES \"solo_table\""));

    let err = shelf
        .invoke("models.itemTable.do.create", json!({ "payload": { "solo_id": 5 } }))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("item_table_solo_id_foreign"));
}

#[tokio::test]
async fn rebuild_leaves_existing_tables_alone() {
    let store = Arc::new(MemoryStore::new());
    for _ in 0..2 {
        Shelf::builder(Context::new())
            .store("default", store.clone())
            .schemas("default", [solo(), item()])
            .build()
            .await
            .unwrap();
    }
    assert_eq!(store.statements().len(), 3);
}

#[tokio::test]
async fn composite_tables_get_a_surrogate_id() {
    let store = Arc::new(MemoryStore::new());
    let shelf = Shelf::builder(Context::new())
        .store("default", store.clone())
        .schemas("default", [pair()])
        .build()
        .await
        .unwrap();
    let created = shelf
        .invoke("models.pairTable.do.create", json!({ "payload": { "left_id": 1, "right_id": 2 } }))
        .await
        .unwrap();
    assert_eq!(created["id"], json!(1));
    let err = shelf
        .invoke("models.pairTable.do.create", json!({ "payload": { "left_id": 1, "right_id": 2 } }))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "duplicate key value violates unique constraint \"pair_table_left_id_right_id_unique\""
    );
}

#[tokio::test]
async fn every_group_needs_a_store() {
    let err = Shelf::builder(Context::new())
        .store("default", Arc::new(MemoryStore::new()))
        .schemas("default", [solo()])
        .schemas("reporting", [item()])
        .build()
        .await
        .err()
        .unwrap();
    assert_eq!(err.to_string(), "No store defined for: reporting");
    assert_eq!(err.code(), "invalid_binding");
}

#[tokio::test]
async fn groups_bind_to_their_own_store() {
    let main = Arc::new(MemoryStore::new());
    let side = Arc::new(MemoryStore::new());
    let shelf = Shelf::builder(Context::new())
        .store("default", main.clone())
        .store("side", side.clone())
        .schemas("default", [solo()])
        .schemas("side", [pair()])
        .build()
        .await
        .unwrap();
    assert!(main.has_table("solo_table").await.unwrap());
    assert!(!main.has_table("pair_table").await.unwrap());
    assert!(side.has_table("pair_table").await.unwrap());
    assert!(shelf.store("side").is_some());
}

#[tokio::test]
async fn schema_names_are_unique_across_groups() {
    let err = Shelf::builder(Context::new())
        .store("a", Arc::new(MemoryStore::new()))
        .store("b", Arc::new(MemoryStore::new()))
        .schemas("a", [solo()])
        .schemas("b", [solo()])
        .build()
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), "config_error");
}

#[tokio::test]
async fn methods_are_named_after_models() {
    let shelf = Shelf::builder(Context::new())
        .store("default", Arc::new(MemoryStore::new()))
        .schemas("default", [solo()])
        .build()
        .await
        .unwrap();
    let names: Vec<&str> = shelf.method_names().collect();
    for op in ["browse", "obtain", "create", "update", "delete", "scrimp"] {
        assert!(names.contains(&format!("models.soloTable.do.{}", op).as_str()));
    }
    assert!(names.contains(&"models.soloTable.schema"));
    assert!(names.contains(&"models.soloTable.columnInfo"));

    let err = shelf.invoke("models.nope.do.browse", Value::Null).await.unwrap_err();
    assert!(matches!(err, ShelfError::UnknownMethod(_)));
}

#[tokio::test]
async fn invoke_dispatches_json_arguments() {
    let shelf = Shelf::builder(Context::new())
        .store("default", Arc::new(MemoryStore::new()))
        .schemas("default", [solo()])
        .build()
        .await
        .unwrap();
    shelf
        .invoke("models.soloTable.do.create", json!({ "payload": { "label": "a" } }))
        .await
        .unwrap();
    shelf
        .invoke("models.soloTable.do.scrimp", json!({ "payload": { "label": "b" } }))
        .await
        .unwrap();

    let page = shelf
        .invoke("models.soloTable.do.browse", json!({ "query": { "page": 1, "perPage": 1 } }))
        .await
        .unwrap();
    assert_eq!(page["payload"].as_array().map(Vec::len), Some(1));
    assert_eq!(page["pagination"], json!({ "page": 1, "pageSize": 1, "rowCount": 2, "pageCount": 2 }));

    let missing = shelf.invoke("models.soloTable.do.obtain", Value::Null).await.unwrap();
    assert_eq!(missing, Value::Null);

    let updated = shelf
        .invoke(
            "models.soloTable.do.update",
            json!({ "params": { "id": 2 }, "payload": { "label": "bb" } }),
        )
        .await
        .unwrap();
    assert_eq!(updated["label"], json!("bb"));

    let err = shelf
        .invoke("models.soloTable.do.obtain", json!({ "params": { "id": 9 }, "require": true }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "empty_response");

    let err = shelf.invoke("models.soloTable.do.delete", json!("id")).await.unwrap_err();
    assert_eq!(err.code(), "bad_request");

    let columns = shelf.invoke("models.soloTable.columnInfo", Value::Null).await.unwrap();
    let names: Vec<&str> = columns
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["id", "created_at", "label"]);

    let spec = shelf.invoke("models.soloTable.schema", Value::Null).await.unwrap();
    assert_eq!(spec["table"], json!("solo_table"));
}

#[tokio::test]
async fn provider_methods_cannot_collide() {
    let err = Shelf::builder(Context::new())
        .store("default", Arc::new(MemoryStore::new()))
        .schemas("default", [solo()])
        .methods(|_: &Shelf| -> Vec<(String, Arc<dyn Method>)> {
            let m: Arc<dyn Method> = Arc::new(FnMethod(|_: Value| -> Result<Value, ShelfError> { Ok(json!(1)) }));
            vec![("testing".to_string(), m)]
        })
        .methods(|_: &Shelf| -> Vec<(String, Arc<dyn Method>)> {
            let m: Arc<dyn Method> = Arc::new(FnMethod(|_: Value| -> Result<Value, ShelfError> { Ok(json!(2)) }));
            vec![("testing".to_string(), m)]
        })
        .build()
        .await
        .err()
        .unwrap();
    assert_eq!(err.to_string(), "Duplicate method name testing.");
}

#[tokio::test]
async fn provider_can_wrap_models() {
    let shelf = Shelf::builder(Context::new())
        .store("default", Arc::new(MemoryStore::new()))
        .schemas("default", [solo()])
        .methods(|shelf: &Shelf| -> Vec<(String, Arc<dyn Method>)> {
            let count = shelf.models().count();
            let m: Arc<dyn Method> =
                Arc::new(FnMethod(move |_: Value| -> Result<Value, ShelfError> { Ok(json!(count)) }));
            vec![("stats.models".to_string(), m)]
        })
        .build()
        .await
        .unwrap();
    assert_eq!(shelf.invoke("stats.models", Value::Null).await.unwrap(), json!(1));
}

struct CountRows;

#[async_trait]
impl CustomOperation for CountRows {
    async fn call(&self, model: &Model, _args: Value) -> Result<Value, ShelfError> {
        let filter = Row::new();
        let rows = model.store().count(&Select::new(&model.spec().table, &filter)).await?;
        Ok(json!(rows))
    }
}

#[tokio::test]
async fn custom_operations_are_registered() {
    let schema = Schema::new(solo()).with_operation("count", Arc::new(CountRows));
    let shelf = Shelf::builder(Context::new())
        .store("default", Arc::new(MemoryStore::new()))
        .schemas("default", [schema])
        .build()
        .await
        .unwrap();
    shelf
        .invoke("models.soloTable.do.create", json!({ "payload": { "label": "a" } }))
        .await
        .unwrap();
    assert_eq!(shelf.invoke("models.soloTable.do.count", Value::Null).await.unwrap(), json!(1));
}

#[tokio::test]
async fn schema_options_overlay_formatters_and_provisioning() {
    let options = SchemaOptions::new()
        .formatters(Formatters::new().create(|mut p: Row, _: &TableSpec| -> Result<Row, ShelfError> {
            p.entry("label").or_insert(json!("from options"));
            Ok(p)
        }))
        .provision(ProvisionOptions::default().with_column(ColumnDef::new("tenant", "text")));
    let store = Arc::new(MemoryStore::new());
    let shelf = Shelf::builder(Context::new().with_column(ColumnDef::new("is_deleted", "boolean").default_value(false)))
        .store("default", store.clone())
        .schemas("default", [solo()])
        .schema_options("soloTable", options)
        .build()
        .await
        .unwrap();

    let created = shelf
        .invoke("models.soloTable.do.create", json!({ "payload": {} }))
        .await
        .unwrap();
    assert_eq!(created["label"], json!("from options"));
    assert_eq!(created["is_deleted"], json!(false));

    let names: Vec<String> = store
        .column_info("solo_table")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, ["id", "created_at", "tenant", "label", "is_deleted"]);
}

#[derive(Default)]
struct Hooks {
    after: AtomicBool,
}

#[async_trait]
impl BuildHook for Hooks {
    async fn before_build(&self, groups: &mut BTreeMap<String, Vec<Schema>>) -> Result<(), ShelfError> {
        groups.entry("default".into()).or_default().push(Schema::new(pair()));
        Ok(())
    }

    async fn after_build(&self, shelf: &Shelf) -> Result<(), ShelfError> {
        self.after.store(shelf.model("pairTable").is_some(), Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn hooks_run_around_the_build() {
    let hooks = Arc::new(Hooks::default());
    let shelf = Shelf::builder(Context::new().with_hook(hooks.clone()))
        .store("default", Arc::new(MemoryStore::new()))
        .schemas("default", [solo()])
        .build()
        .await
        .unwrap();
    assert!(shelf.model("pairTable").is_some());
    assert!(hooks.after.load(Ordering::SeqCst));
}

#[tokio::test]
async fn specs_load_from_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("a.json"),
        r#"{"name": "soloTable", "table": "solo_table", "columns": [{"name": "label", "type": "text", "nullable": false}]}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("b.json"),
        r#"[{"name": "itemTable", "table": "item_table",
             "columns": [{"name": "solo_id", "type": "bigint"}],
             "constraints": [{"kind": "foreign_key", "column": "solo_id", "references_table": "solo_table"}]}]"#,
    )
    .unwrap();
    let specs = load_specs_from_path(dir.path()).await.unwrap();
    let shelf = Shelf::builder(Context::new())
        .store("default", Arc::new(MemoryStore::new()))
        .schemas("default", specs)
        .build()
        .await
        .unwrap();
    assert_eq!(shelf.models().count(), 2);
}
