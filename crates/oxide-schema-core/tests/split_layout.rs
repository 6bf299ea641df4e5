//! Split schema layouts on disk.

mod common;

use std::fs;

use common::parse;
use oxide_schema_core::dsl::MANIFEST_NAME;
use oxide_schema_core::prelude::*;

const SCHEMA: &str = r#"
create_table "users", force: :cascade do |t|
  t.string "email", null: false
  t.index ["email"], unique: true
end

create_table "posts", force: :cascade do |t|
  t.references "user", foreign_key: { on_delete: :cascade }
  t.string "title"
end
"#;

#[test]
fn split_dump_loads_back_from_disk() {
    let schema = parse(SCHEMA);
    let split = dump_split(&schema, &DumpOptions::default());
    assert_eq!(split.files.len(), 2);

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(MANIFEST_NAME), &split.manifest).unwrap();
    for (name, contents) in &split.files {
        fs::write(dir.path().join(name), contents).unwrap();
    }

    let loaded = Parser::default()
        .parse_file(&dir.path().join(MANIFEST_NAME), &FsLoader)
        .unwrap();
    let delta = Differ::default().diff(&schema, &loaded).unwrap();
    assert!(!delta.differ(), "{}", delta.script());
}

#[test]
fn require_resolves_relative_to_requiring_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("tables")).unwrap();
    fs::write(
        dir.path().join(MANIFEST_NAME),
        "require \"tables/all.schema\"\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("tables").join("all.schema"),
        "require \"users.schema\"\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("tables").join("users.schema"),
        "create_table \"users\" do |t|\n  t.string \"name\"\nend\n",
    )
    .unwrap();

    let schema = Parser::default()
        .parse_file(&dir.path().join(MANIFEST_NAME), &FsLoader)
        .unwrap();
    assert!(schema.contains("users"));
}

#[test]
fn missing_required_file_is_a_definition_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(MANIFEST_NAME), "require \"nope.schema\"\n").unwrap();

    let err = Parser::default()
        .parse_file(&dir.path().join(MANIFEST_NAME), &FsLoader)
        .unwrap_err();
    assert!(err.to_string().contains("nope.schema"), "{err}");
}
