//! oxide-query CLI
//!
//! Translates serialized query trees against a JSON mapping, shows the tree
//! after each rewrite pass, or runs the query on a SQLite database.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_query_core::ast::ExprRef;
use oxide_query_core::dialect::{AccessDialect, Dialect, GenericDialect, TsqlDialect};
use oxide_query_core::mapping::{JsonMappingSource, MappingRegistry};
use oxide_query_core::translate::{Translation, Translator};
use oxide_query_core::{QueryProvider, TranslatorConfig};
use oxide_query_sqlite::{SqliteDialect, SqliteExecutor};

/// Relational query translation.
#[derive(Parser)]
#[command(name = "oxide-query")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SQL commands for a query tree.
    Translate {
        #[command(flatten)]
        inputs: Inputs,

        /// Target dialect.
        #[arg(short, long, value_enum, default_value_t = DialectName::Generic)]
        dialect: DialectName,
    },

    /// Print the tree after every rewrite pass.
    Explain {
        #[command(flatten)]
        inputs: Inputs,

        /// Target dialect.
        #[arg(short, long, value_enum, default_value_t = DialectName::Generic)]
        dialect: DialectName,
    },

    /// Run a query tree on a SQLite database and print the result as JSON.
    Run {
        #[command(flatten)]
        inputs: Inputs,

        /// Database URL.
        #[arg(long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
        database: String,
    },
}

/// Files every subcommand reads.
#[derive(Args)]
struct Inputs {
    /// Serialized query tree (JSON).
    query: PathBuf,

    /// Mapping document (JSON).
    #[arg(short, long)]
    mapping: PathBuf,

    /// Translator configuration (JSON). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DialectName {
    Generic,
    Tsql,
    Access,
    Sqlite,
}

impl DialectName {
    fn dialect(self) -> Arc<dyn Dialect> {
        match self {
            Self::Generic => Arc::new(GenericDialect::new()),
            Self::Tsql => Arc::new(TsqlDialect::new()),
            Self::Access => Arc::new(AccessDialect::new()),
            Self::Sqlite => Arc::new(SqliteDialect::new()),
        }
    }
}

/// Parsed contents of [`Inputs`].
struct Loaded {
    query: ExprRef,
    mapping: MappingRegistry<JsonMappingSource>,
    config: TranslatorConfig,
}

impl Loaded {
    fn parse(query: &str, mapping: &str, config: Option<&str>) -> anyhow::Result<Self> {
        let query: ExprRef = serde_json::from_str(query).context("Invalid query tree")?;
        let mapping = MappingRegistry::new(
            JsonMappingSource::from_json(mapping).context("Invalid mapping document")?,
        );
        mapping.validate_all().context("Invalid mapping")?;
        let config = match config {
            Some(json) => TranslatorConfig::from_json(json).context("Invalid configuration")?,
            None => TranslatorConfig::default(),
        };
        Ok(Self {
            query,
            mapping,
            config,
        })
    }

    fn read(inputs: &Inputs) -> anyhow::Result<Self> {
        let config = inputs.config.as_deref().map(read_file).transpose()?;
        Self::parse(
            &read_file(&inputs.query)?,
            &read_file(&inputs.mapping)?,
            config.as_deref(),
        )
    }

    fn translate(&self, dialect: &dyn Dialect) -> anyhow::Result<String> {
        let translation = Translator::new(&self.mapping, dialect, &self.config)
            .translate(&self.query)
            .context("Translation failed")?;
        Ok(render_commands(&translation))
    }

    fn explain(&self, dialect: &dyn Dialect) -> anyhow::Result<String> {
        let passes = Translator::new(&self.mapping, dialect, &self.config)
            .explain(&self.query)
            .context("Rewrite failed")?;
        let mut out = String::new();
        for (name, tree) in passes {
            out.push_str(&format!("-- {name}\n{tree}\n"));
        }
        Ok(out)
    }
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn render_commands(translation: &Translation) -> String {
    translation
        .commands()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(";\n\n")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Translate { inputs, dialect } => {
            let loaded = Loaded::read(&inputs)?;
            println!("{}", loaded.translate(dialect.dialect().as_ref())?);
        }

        Commands::Explain { inputs, dialect } => {
            let loaded = Loaded::read(&inputs)?;
            print!("{}", loaded.explain(dialect.dialect().as_ref())?);
        }

        Commands::Run { inputs, database } => {
            let loaded = Loaded::read(&inputs)?;
            let executor = SqliteExecutor::connect(&database)
                .await
                .with_context(|| format!("Failed to open {database}"))?;
            info!(database = %database, "Connected");
            let provider = QueryProvider::new(
                Arc::new(loaded.mapping),
                Arc::new(SqliteDialect::new()),
                executor,
            )
            .with_config(loaded.config);
            let value = provider
                .execute(&loaded.query)
                .await
                .context("Query failed")?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}
