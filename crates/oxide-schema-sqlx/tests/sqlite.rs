//! Round trips against an in-memory SQLite database.

use oxide_schema_core::introspect::TableFilter;
use oxide_schema_core::prelude::*;
use oxide_schema_sqlx::SqliteAdapter;

const BLOG: &str = r#"
create_table "users", force: :cascade do |t|
  t.string "email", null: false
  t.string "name", limit: 100
  t.boolean "admin", default: false
  t.datetime "created_at", default: -> { "CURRENT_TIMESTAMP" }
  t.index ["email"], unique: true
end

create_table "posts", force: :cascade do |t|
  t.references "user", foreign_key: { on_delete: :cascade }, null: false
  t.string "title", null: false
  t.text "body"
  t.index ["title"], where: "title <> ''"
end
"#;

async fn adapter() -> SqliteAdapter {
    SqliteAdapter::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite database")
}

fn differ() -> Differ {
    Differ::new(
        DiffOptions::default()
            .with_ignore_table_comment(true)
            .with_ignore_table_options(true)
            .with_skip_column_comment_change(true),
    )
}

fn parse(source: &str) -> Schema {
    Parser::default().parse_str(source).unwrap()
}

async fn apply(adapter: &SqliteAdapter, source: &str) -> Delta {
    let current = Introspector::new(adapter).introspect().await.unwrap();
    let delta = differ().diff(&current, &parse(source)).unwrap();
    delta.migrate(adapter).await.unwrap();
    delta
}

async fn assert_in_sync(adapter: &SqliteAdapter, source: &str) {
    let current = Introspector::new(adapter).introspect().await.unwrap();
    let delta = differ().diff(&current, &parse(source)).unwrap();
    assert!(!delta.differ(), "database differs:\n{}", delta.script());
}

#[tokio::test]
async fn test_create_and_introspect() {
    let adapter = adapter().await;
    let delta = apply(&adapter, BLOG).await;
    assert!(delta.differ());
    assert_in_sync(&adapter, BLOG).await;

    let schema = Introspector::new(&adapter).introspect().await.unwrap();
    let users = schema.table("users").unwrap();
    let id = users.column("id").unwrap();
    assert!(id.auto_increment);
    assert_eq!(id.column_type, ColumnType::Integer(IntWidth::Big));
    assert_eq!(
        users.column("admin").unwrap().default,
        DefaultValue::Bool(false)
    );

    let posts = schema.table("posts").unwrap();
    let fk = &posts.foreign_keys[0];
    assert_eq!(fk.name, "fk_posts_user_id");
    assert!(fk.default_name);
    assert_eq!(fk.on_delete, ForeignKeyAction::Cascade);
    let partial = posts.index("index_posts_on_title").unwrap();
    assert_eq!(partial.condition.as_deref(), Some("title <> ''"));
}

#[tokio::test]
async fn test_alterations_rebuild_tables() {
    let adapter = adapter().await;
    apply(&adapter, BLOG).await;
    sqlx::query("INSERT INTO users (email, name) VALUES ('a@example.com', 'Ann')")
        .execute(adapter.pool())
        .await
        .unwrap();

    let evolved = r#"
    create_table "users", force: :cascade do |t|
      t.string "email", null: false, limit: 191
      t.string "full_name", limit: 100, renamed_from: "name"
      t.boolean "admin", default: true
      t.datetime "created_at", default: -> { "CURRENT_TIMESTAMP" }
      t.string "locale"
      t.index ["email"], unique: true
    end

    create_table "posts", force: :cascade do |t|
      t.references "user", foreign_key: true, null: false
      t.string "title", null: false
    end
    "#;
    apply(&adapter, evolved).await;
    assert_in_sync(&adapter, evolved).await;

    let (full_name,): (String,) = sqlx::query_as("SELECT full_name FROM users")
        .fetch_one(adapter.pool())
        .await
        .unwrap();
    assert_eq!(full_name, "Ann");
}

#[tokio::test]
async fn test_drop_tables() {
    let adapter = adapter().await;
    apply(&adapter, BLOG).await;
    let delta = apply(&adapter, "").await;
    assert_eq!(delta.operations().len(), 2);
    assert_in_sync(&adapter, "").await;
}

#[tokio::test]
async fn test_table_filter() {
    let adapter = adapter().await;
    apply(&adapter, BLOG).await;

    let filter = TableFilter::new().ignore_pattern("^po").unwrap();
    let schema = Introspector::new(&adapter)
        .with_filter(filter)
        .introspect()
        .await
        .unwrap();
    assert!(schema.contains("users"));
    assert!(!schema.contains("posts"));
}

#[tokio::test]
async fn test_failed_statement_reports_operation() {
    let adapter = adapter().await;
    apply(&adapter, BLOG).await;
    sqlx::query("CREATE TABLE blocker (id INTEGER)")
        .execute(adapter.pool())
        .await
        .unwrap();

    // `blocker` exists but the current schema passed in does not know it.
    let current = Introspector::new(&adapter)
        .with_filter(TableFilter::new().with_tables(["users", "posts"]))
        .introspect()
        .await
        .unwrap();
    let desired = format!("{BLOG}\ncreate_table \"blocker\" do |t|\nend\n");
    let delta = differ().diff(&current, &parse(&desired)).unwrap();
    let err = delta.migrate(&adapter).await.unwrap_err();
    assert_eq!(err.index, 0);
    assert_eq!(err.operation, "Create table 'blocker'");
    assert!(err.statement.is_some());
}
