//! The schema definition language.
//!
//! A definition is a sequence of `create_table` blocks, `add_index` and
//! `add_foreign_key` statements and `require` directives:
//!
//! ```text
//! create_table "users", force: :cascade do |t|
//!   t.string "email", null: false
//!   t.index ["email"], unique: true
//! end
//! ```
//!
//! [`Parser`] turns sources into a [`Schema`](crate::schema::Schema);
//! [`dump`] and [`render_operations`] go the other way.

mod ast;
mod lexer;
mod loader;
mod parser;
mod render;
mod token;

pub use loader::{normalize_path, resolve_require, FsLoader, MemoryLoader, SourceLoader};
pub use parser::Parser;
pub use render::{dump, dump_split, dump_table, render_operations, DumpOptions, SplitDump, MANIFEST_NAME};
