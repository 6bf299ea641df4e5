//! oxide-schema CLI
//!
//! Command-line tool that reconciles a database with a schema definition.

mod config;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_schema_core::dsl::{Parser as DefinitionParser, MANIFEST_NAME};
use oxide_schema_core::options::WidthPolicy;
use oxide_schema_core::prelude::*;
use oxide_schema_sqlx::{Backend, MySqlAdapter, SqliteAdapter};

/// Declarative schema management for SQLite and MySQL.
#[derive(Parser)]
#[command(name = "oxide-schema")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Connection config: inline JSON, a JSON or YAML file, or a database URL.
    #[arg(short, long, env = "DATABASE_URL")]
    config: Option<String>,

    /// Config section to use.
    #[arg(short = 'E', long)]
    env: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the database in line with a definition file.
    Apply {
        /// Definition file.
        #[arg(short, long, default_value = MANIFEST_NAME)]
        file: PathBuf,

        /// Print the script and SQL without executing.
        #[arg(long)]
        dry_run: bool,

        /// Statement executed before the migration.
        #[arg(long)]
        pre_query: Option<String>,

        /// Statement executed after the migration.
        #[arg(long)]
        post_query: Option<String>,

        #[command(flatten)]
        diff: DiffFlags,
    },

    /// Write the database structure as a definition file.
    Export {
        /// Output file, or `-` for stdout. With `--split`, a directory.
        #[arg(short, long, default_value = "-")]
        output: String,

        /// Write one file per table plus a manifest.
        #[arg(long)]
        split: bool,

        /// Output format.
        #[arg(long, value_enum, default_value_t = ExportFormat::Dsl)]
        format: ExportFormat,

        /// Leave engine, charset and other table options out.
        #[arg(long)]
        dump_without_table_options: bool,

        /// Write foreign key names even when they are default names.
        #[arg(long)]
        dump_with_default_fk_name: bool,

        #[command(flatten)]
        filter: FilterFlags,
    },

    /// Compare two schemas, each a config or a definition file.
    Diff {
        /// Current schema.
        from: String,

        /// Desired schema.
        to: String,

        /// Migrate the current database to the desired schema.
        #[arg(long)]
        with_apply: bool,

        #[command(flatten)]
        diff: DiffFlags,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Dsl,
    Json,
}

#[derive(Args, Debug, Clone, Default)]
struct FilterFlags {
    /// Only consider these tables.
    #[arg(short, long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Skip tables matching these patterns.
    #[arg(long, value_delimiter = ',')]
    ignore_tables: Vec<String>,
}

impl FilterFlags {
    fn table_filter(&self) -> anyhow::Result<TableFilter> {
        let mut filter = TableFilter::new();
        if !self.tables.is_empty() {
            filter = filter.with_tables(self.tables.iter().cloned());
        }
        for pattern in &self.ignore_tables {
            filter = filter.ignore_pattern(pattern)?;
        }
        Ok(filter)
    }
}

#[derive(Args, Debug, Clone, Default)]
struct DiffFlags {
    /// Group the changes of each table into one ALTER TABLE.
    #[arg(long)]
    bulk_change: bool,

    /// Allow primary key changes.
    #[arg(long)]
    allow_pk_change: bool,

    /// Drop tables missing from the definition (default).
    #[arg(long, overrides_with = "skip_drop_table")]
    drop_table: bool,

    /// Keep tables missing from the definition.
    #[arg(long, overrides_with = "drop_table")]
    skip_drop_table: bool,

    /// Only drop tables missing from the definition; change nothing else.
    #[arg(long)]
    drop_table_only: bool,

    #[arg(long)]
    ignore_table_comment: bool,

    #[arg(long)]
    ignore_table_options: bool,

    #[arg(long)]
    skip_column_comment_change: bool,

    /// Do not drop indexes whose columns are all dropped.
    #[arg(long)]
    index_removed_drop_column: bool,

    /// Declare indexes inside CREATE TABLE.
    #[arg(long)]
    create_table_with_index: bool,

    /// Warn about foreign keys whose column types differ.
    #[arg(long)]
    check_relation_type: bool,

    /// Match foreign keys by name only.
    #[arg(long)]
    exact_fk_names: bool,

    #[arg(long)]
    default_string_limit: Option<u32>,

    #[arg(long)]
    default_char_limit: Option<u32>,

    #[arg(long)]
    default_binary_limit: Option<u32>,

    #[arg(long)]
    default_float_limit: Option<u32>,

    #[arg(long)]
    default_decimal_limit: Option<u32>,

    #[command(flatten)]
    filter: FilterFlags,
}

impl DiffFlags {
    fn widths(&self) -> WidthDefaults {
        let mut widths = WidthDefaults::default();
        let overrides = [
            (&mut widths.string, self.default_string_limit),
            (&mut widths.char, self.default_char_limit),
            (&mut widths.binary, self.default_binary_limit),
            (&mut widths.float, self.default_float_limit),
            (&mut widths.decimal_precision, self.default_decimal_limit),
        ];
        for (policy, limit) in overrides {
            if let Some(limit) = limit {
                *policy = WidthPolicy {
                    default: Some(limit),
                    ..*policy
                };
            }
        }
        widths
    }

    fn parser(&self) -> DefinitionParser {
        DefinitionParser::new(ParseOptions::new().with_widths(self.widths()))
    }

    fn diff_options(&self) -> DiffOptions {
        let fk_matching = if self.exact_fk_names {
            ForeignKeyMatching::Exact
        } else {
            ForeignKeyMatching::Structural
        };
        DiffOptions::new()
            .with_bulk_change(self.bulk_change)
            .with_allow_pk_change(self.allow_pk_change)
            .with_drop_table(self.drop_table || !self.skip_drop_table)
            .with_drop_table_only(self.drop_table_only)
            .with_ignore_table_comment(self.ignore_table_comment)
            .with_ignore_table_options(self.ignore_table_options)
            .with_skip_column_comment_change(self.skip_column_comment_change)
            .with_index_removed_drop_column(self.index_removed_drop_column)
            .with_create_table_with_index(self.create_table_with_index)
            .with_check_relation_type(self.check_relation_type)
            .with_fk_matching(fk_matching)
            .with_widths(self.widths())
    }
}

/// Turns off comparisons the dialect cannot store.
fn fit_to_dialect<D: Dialect + ?Sized>(mut options: DiffOptions, dialect: &D) -> DiffOptions {
    if !dialect.supports_table_options() {
        options = options
            .with_ignore_table_options(true)
            .with_ignore_table_comment(true);
    }
    if !dialect.supports_comments() {
        options = options.with_skip_column_comment_change(true);
    }
    options
}

/// A connected database of either backend.
enum Database {
    Sqlite(SqliteAdapter),
    MySql(MySqlAdapter),
}

/// Runs `$body` with `$adapter` bound to the concrete adapter.
macro_rules! with_adapter {
    ($database:expr, $adapter:ident => $body:expr) => {
        match $database {
            Database::Sqlite($adapter) => $body,
            Database::MySql($adapter) => $body,
        }
    };
}

impl Database {
    async fn connect(source: &str, env: Option<&str>) -> anyhow::Result<Self> {
        let url = config::load(source, env)?.url()?;
        let database = match Backend::from_url(&url)? {
            Backend::Sqlite => Self::Sqlite(SqliteAdapter::connect(&url).await?),
            Backend::MySql => Self::MySql(MySqlAdapter::connect(&url).await?),
        };
        Ok(database)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let env = cli.env.as_deref();
    let require_config = || {
        cli.config
            .as_deref()
            .context("No connection config; pass --config or set DATABASE_URL")
    };

    match &cli.command {
        Commands::Apply {
            file,
            dry_run,
            pre_query,
            post_query,
            diff,
        } => {
            let desired = diff
                .parser()
                .parse_file(file, &FsLoader)
                .with_context(|| format!("Cannot load {}", file.display()))?;
            let database = Database::connect(require_config()?, env).await?;
            let hooks = Hooks {
                pre: pre_query.as_deref(),
                post: post_query.as_deref(),
            };
            with_adapter!(&database, adapter => {
                apply(adapter, &desired, diff, *dry_run, hooks).await?;
            });
        }

        Commands::Export {
            output,
            split,
            format,
            dump_without_table_options,
            dump_with_default_fk_name,
            filter,
        } => {
            let database = Database::connect(require_config()?, env).await?;
            let schema = with_adapter!(&database, adapter => {
                Introspector::new(adapter)
                    .with_filter(filter.table_filter()?)
                    .introspect()
                    .await?
            });
            let options = DumpOptions::default()
                .with_table_options(!dump_without_table_options)
                .with_default_fk_name(*dump_with_default_fk_name);
            export(&schema, output, *split, *format, &options)?;
        }

        Commands::Diff {
            from,
            to,
            with_apply: true,
            diff,
        } => {
            if !config::is_connection_source(from) {
                bail!("--with-apply needs a database as the current schema, got '{from}'");
            }
            let desired = load_schema(to, env, diff).await?;
            let database = Database::connect(from, env).await?;
            let hooks = Hooks {
                pre: None,
                post: None,
            };
            with_adapter!(&database, adapter => {
                apply(adapter, &desired.schema, diff, false, hooks).await?;
            });
        }

        Commands::Diff {
            from,
            to,
            with_apply: false,
            diff,
        } => {
            let before = load_schema(from, env, diff).await?;
            let after = load_schema(to, env, diff).await?;
            let options = match (&before.dialect, &after.dialect) {
                (Some(dialect), _) | (None, Some(dialect)) => {
                    fit_to_dialect(diff.diff_options(), dialect.as_ref())
                }
                (None, None) => diff.diff_options(),
            };
            let delta = Differ::new(options).diff(&before.schema, &after.schema)?;
            if delta.differ() {
                print!("{}", delta.script());
                return Ok(ExitCode::from(1));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Statements run around a migration.
#[derive(Clone, Copy)]
struct Hooks<'a> {
    pre: Option<&'a str>,
    post: Option<&'a str>,
}

async fn apply<A: Adapter>(
    adapter: &A,
    desired: &Schema,
    flags: &DiffFlags,
    dry_run: bool,
    hooks: Hooks<'_>,
) -> anyhow::Result<()> {
    let filter = flags.filter.table_filter()?;
    let current = Introspector::new(adapter)
        .with_filter(filter.clone())
        .introspect()
        .await?;
    let desired = filter.filter_schema(desired.clone());
    let options = fit_to_dialect(flags.diff_options(), adapter.dialect());
    let delta = Differ::new(options).diff(&current, &desired)?;

    if !delta.differ() {
        println!("No change");
        return Ok(());
    }

    if dry_run {
        print!("{}", delta.script());
        println!();
        for planned in delta.sql(adapter.dialect())? {
            println!("-- {}", planned.operation.description());
            for statement in &planned.statements {
                println!("{statement};");
            }
        }
        return Ok(());
    }

    if let Some(query) = hooks.pre {
        info!(%query, "running pre-query");
        adapter.execute(query).await?;
    }
    let report = delta.migrate(adapter).await?;
    if let Some(query) = hooks.post {
        info!(%query, "running post-query");
        adapter.execute(query).await?;
    }
    print!("{}", delta.script_commented());
    info!(
        applied = report.applied,
        statements = report.statements,
        "database updated"
    );
    Ok(())
}

fn export(
    schema: &Schema,
    output: &str,
    split: bool,
    format: ExportFormat,
    options: &DumpOptions,
) -> anyhow::Result<()> {
    if split {
        if format == ExportFormat::Json {
            bail!("--split only applies to the definition format");
        }
        if output == "-" {
            bail!("--split needs an output directory");
        }
        let dir = Path::new(output);
        fs::create_dir_all(dir)?;
        let layout = dump_split(schema, options);
        for (name, contents) in &layout.files {
            fs::write(dir.join(name), contents)?;
        }
        fs::write(dir.join(MANIFEST_NAME), &layout.manifest)?;
        info!(tables = layout.files.len(), dir = %dir.display(), "exported");
        return Ok(());
    }

    let text = match format {
        ExportFormat::Dsl => dump(schema, options),
        ExportFormat::Json => serde_json::to_string_pretty(schema)? + "\n",
    };
    if output == "-" {
        print!("{text}");
    } else {
        fs::write(output, text)?;
        info!(tables = schema.len(), file = output, "exported");
    }
    Ok(())
}

/// A schema plus the dialect of the database it came from, if any.
struct LoadedSchema {
    schema: Schema,
    dialect: Option<Box<dyn Dialect>>,
}

async fn load_schema(
    source: &str,
    env: Option<&str>,
    flags: &DiffFlags,
) -> anyhow::Result<LoadedSchema> {
    let filter = flags.filter.table_filter()?;
    if !config::is_connection_source(source) {
        let schema = flags
            .parser()
            .parse_file(Path::new(source), &FsLoader)
            .with_context(|| format!("Cannot load {source}"))?;
        return Ok(LoadedSchema {
            schema: filter.filter_schema(schema),
            dialect: None,
        });
    }

    let database = Database::connect(source, env).await?;
    let loaded = with_adapter!(&database, adapter => LoadedSchema {
        schema: Introspector::new(adapter).with_filter(filter).introspect().await?,
        dialect: Some(Box::new(adapter.dialect().clone())),
    });
    Ok(loaded)
}
