//! Operation layer against a live PostgreSQL database.
//!
//! Runs only when `DATABASE_URL` is set; every test creates its own uniquely named tables and
//! drops them at the end.

use crud_shelf::{
    BrowseQuery, ColumnDef, ConstraintDef, Context, CustomQuery, Model, Operations, Options, PgStore, Relation, Row,
    Shelf, ShelfError, Store, TableSpec,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn row(v: Value) -> Row {
    v.as_object().cloned().unwrap()
}

async fn connect() -> Option<Arc<PgStore>> {
    let url = std::env::var("DATABASE_URL").ok()?;
    Some(Arc::new(PgStore::connect(&url, 2).await.unwrap()))
}

fn suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

struct Tables {
    solo: String,
    item: String,
}

impl Tables {
    fn new() -> Self {
        let s = suffix();
        Tables {
            solo: format!("solo_{}", s),
            item: format!("item_{}", s),
        }
    }

    fn solo_spec(&self) -> TableSpec {
        TableSpec::new("soloTable", &self.solo)
            .column(ColumnDef::new("label", "varchar(255)").not_null())
            .column(ColumnDef::new("group_name", "text"))
            .column(ColumnDef::new("rank", "integer"))
            .relation(Relation::to_many("items", &self.item, "solo_id").only(["name"]))
            .browse_references(["items"])
            .obtain_references(Vec::<String>::new())
    }

    /// Declared first so its foreign key relies on the staged build.
    fn item_spec(&self) -> TableSpec {
        TableSpec::new("itemTable", &self.item)
            .column(ColumnDef::new("solo_id", "bigint"))
            .column(ColumnDef::new("name", "text"))
            .column(ColumnDef::new("meta", "jsonb"))
            .constraint(ConstraintDef::ForeignKey {
                column: "solo_id".into(),
                references_table: self.solo.clone(),
                references_column: "id".into(),
                on_delete: Some("CASCADE".into()),
                on_update: None,
            })
            .relation(Relation::to_one("solo", &self.solo, "solo_id").only(["label"]))
    }

    async fn build(&self, store: &Arc<PgStore>) -> Shelf {
        Shelf::builder(Context::new())
            .store("default", store.clone())
            .schemas("default", [self.item_spec(), self.solo_spec()])
            .build()
            .await
            .unwrap()
    }

    async fn cleanup(&self, store: &PgStore) {
        store.drop_table_if_exists(&self.item).await.unwrap();
        store.drop_table_if_exists(&self.solo).await.unwrap();
    }
}

fn model<'a>(shelf: &'a Shelf, name: &str) -> &'a Arc<Model> {
    shelf.model(name).unwrap()
}

async fn seed(solo: &Model, rows: &[(&str, &str, i64)]) {
    for (label, group, rank) in rows {
        solo.create(
            row(json!({ "label": label, "group_name": group, "rank": rank })),
            Options::new(),
        )
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn obtain_is_strict_where_browse_is_not() {
    let Some(store) = connect().await else { return };
    let t = Tables::new();
    let shelf = t.build(&store).await;
    let solo = model(&shelf, "soloTable");
    seed(solo, &[("a", "g", 1), ("b", "g", 2)]).await;

    let err = solo
        .obtain(Some(row(json!({ "group_name": "g" }))), Options::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Obtain params found more than one row. Use browse instead");

    let one = solo
        .obtain(Some(row(json!({ "label": "b" }))), Options::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(one["id"], json!(2));
    assert_eq!(one["rank"], json!(2));
    assert!(one["created_at"].is_string());

    let custom = CustomQuery::new()
        .filter("group_name", "g")
        .where_raw("\"rank\" > ?", vec![json!(1)]);
    let browse = solo
        .browse(BrowseQuery::new().custom(custom), Options::new())
        .await
        .unwrap();
    assert_eq!(browse.payload.len(), 1);
    assert_eq!(browse.payload[0]["label"], json!("b"));

    t.cleanup(&store).await;
}

#[tokio::test]
async fn bulk_and_single_update() {
    let Some(store) = connect().await else { return };
    let t = Tables::new();
    let shelf = t.build(&store).await;
    let solo = model(&shelf, "soloTable");
    seed(solo, &[("a", "g", 1), ("b", "g", 2), ("c", "h", 3)]).await;

    let err = solo
        .update(row(json!({ "group_name": "g" })), row(json!({ "rank": 9 })), Options::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Update params found more than one row. Use multiple option");

    let bulk = solo
        .update(
            row(json!({ "group_name": "g" })),
            row(json!({ "rank": 9 })),
            Options::new().multiple(),
        )
        .await
        .unwrap();
    assert_eq!(bulk.as_array().map(Vec::len), Some(2));

    let single = solo
        .update(row(json!({ "group_name": "h" })), row(json!({ "label": "cc" })), Options::new())
        .await
        .unwrap();
    assert_eq!(single["id"], json!(3));
    assert_eq!(single["label"], json!("cc"));

    let err = solo
        .update(
            row(json!({ "group_name": "none" })),
            row(json!({ "rank": 0 })),
            Options::new().multiple(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ShelfError::NoRowsUpdated));

    let err = solo
        .update(Row::new(), row(json!({ "rank": 0 })), Options::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ShelfError::NoRowsUpdated));

    t.cleanup(&store).await;
}

#[tokio::test]
async fn pagination_counts() {
    let Some(store) = connect().await else { return };
    let t = Tables::new();
    let shelf = t.build(&store).await;
    let solo = model(&shelf, "soloTable");

    let empty = solo.browse(BrowseQuery::new().page(1, 10), Options::new()).await.unwrap();
    assert!(empty.payload.is_empty());
    assert_eq!(
        serde_json::to_value(empty.pagination).unwrap(),
        json!({ "page": 1, "pageSize": 10, "rowCount": 0, "pageCount": 0 })
    );

    seed(solo, &[("a", "g", 1), ("b", "g", 2), ("c", "g", 3)]).await;
    let page = solo.browse(BrowseQuery::new().page(2, 2), Options::new()).await.unwrap();
    assert_eq!(page.payload.len(), 1);
    assert_eq!(page.payload[0]["label"], json!("c"));
    assert_eq!(page.pagination.row_count, 3);
    assert_eq!(page.pagination.page_count, 2);

    let far = solo
        .browse(BrowseQuery::new().page(u64::MAX, 2), Options::new())
        .await
        .unwrap();
    assert!(far.payload.is_empty());

    t.cleanup(&store).await;
}

#[tokio::test]
async fn relations_and_json_columns() {
    let Some(store) = connect().await else { return };
    let t = Tables::new();
    let shelf = t.build(&store).await;
    let solo = model(&shelf, "soloTable");
    let item = model(&shelf, "itemTable");
    seed(solo, &[("parent", "g", 1)]).await;
    for name in ["x", "y"] {
        item.create(
            row(json!({ "solo_id": 1, "name": name, "meta": { "tags": [name] } })),
            Options::new(),
        )
        .await
        .unwrap();
    }

    let items = item.browse(BrowseQuery::new(), Options::new()).await.unwrap();
    assert_eq!(items.payload.len(), 2);
    assert_eq!(items.payload[0]["solo"], json!({ "label": "parent" }));
    assert_eq!(items.payload[0]["meta"], json!({ "tags": ["x"] }));

    let parents = solo.browse(BrowseQuery::new(), Options::new()).await.unwrap();
    let mut names: Vec<Value> = parents.payload[0]["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["name"].clone())
        .collect();
    names.sort_by_key(|v| v.to_string());
    assert_eq!(names, [json!("x"), json!("y")]);

    let obtained = solo
        .obtain(Some(row(json!({ "id": 1 }))), Options::new())
        .await
        .unwrap()
        .unwrap();
    assert!(obtained.get("items").is_none());

    let err = item
        .create(row(json!({ "solo_id": 99, "name": "orphan" })), Options::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "database_error");

    let removed = solo.delete(row(json!({ "id": 1 })), Options::new()).await.unwrap();
    assert_eq!(removed["label"], json!("parent"));
    assert!(item.browse(BrowseQuery::new(), Options::new()).await.unwrap().payload.is_empty());

    t.cleanup(&store).await;
}
