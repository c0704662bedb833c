use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use doctype_forms::dependency::DependencyGraph;
use doctype_forms::expression::Condition;
use doctype_forms::remote::{AuthState, SearchQuery, StaticAuth};
use doctype_forms::schema::{flatten_tabs, tabs_from_json, FieldRef, Scope};
use doctype_forms::{
    EngineConfig, FormOrchestrator, FormValues, HttpResolver, RecordResolver, ResolverConfig,
    TabbedLayout,
};

#[derive(Parser)]
#[command(name = "doctype-forms", version, about = "Check form schemas and move table data in and out")]
struct Cli {
    /// Engine settings file (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Check a schema file and list its fetch dependencies
    Check { schema: PathBuf },
    /// Evaluate a display condition against a values file
    Eval {
        condition: String,
        #[arg(long)]
        values: PathBuf,
    },
    /// Validate a document against a schema
    Validate { schema: PathBuf, document: PathBuf },
    /// Print one table of a document as delimited text
    ExportTable {
        schema: PathBuf,
        document: PathBuf,
        #[arg(long)]
        table: String,
    },
    /// Parse delimited text into rows of a table field and print them as JSON
    ImportTable {
        schema: PathBuf,
        input: PathBuf,
        #[arg(long)]
        table: String,
    },
    /// Search a collection on a live server
    Search {
        collection: String,
        #[arg(default_value = "")]
        term: String,
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        api_secret: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn read_object(path: &Path) -> Result<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    match serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))? {
        Value::Object(object) => Ok(object),
        _ => bail!("{} does not hold a JSON object", path.display()),
    }
}

fn load_tabs(path: &Path) -> Result<Vec<TabbedLayout>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(tabs_from_json(&raw)?)
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::from_file(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn load_form(schema: &Path, document: Option<&Path>, config: EngineConfig) -> Result<FormOrchestrator> {
    let tabs = load_tabs(schema)?;
    let form = match document {
        Some(document) => FormOrchestrator::with_document(tabs, &read_object(document)?, None, config)?,
        None => FormOrchestrator::new(tabs, None, config)?,
    };
    Ok(form)
}

fn check(schema: &Path, config: EngineConfig) -> Result<()> {
    let form = load_form(schema, None, config)?;
    for tab in form.tabs() {
        println!("{}: {} field(s)", tab.name, tab.fields.len());
    }

    let fields = flatten_tabs(form.tabs());
    let mut graphs = vec![(String::new(), DependencyGraph::build(&fields))];
    for table in fields.iter().filter(|f| f.columns.is_some()) {
        graphs.push((format!("{}.", table.name), DependencyGraph::build(table.columns())));
    }
    for (prefix, graph) in graphs {
        for group in graph.groups() {
            let targets: Vec<String> = group
                .dependents
                .iter()
                .map(|d| format!("{}{}", prefix, d.field.name))
                .collect();
            println!(
                "{}{} -> {} {:?} fills {}",
                prefix,
                group.source,
                group.target_doctype,
                group.requested_fields(),
                targets.join(", ")
            );
        }
    }
    Ok(())
}

fn eval(condition: &str, values: &Path) -> Result<bool> {
    let parsed = Condition::parse(condition)?;
    let mut form_values = FormValues::new();
    form_values.merge_json(&[], &read_object(values)?);
    let scope = Scope::form(&form_values);
    Ok(parsed.evaluate(|field: &FieldRef| scope.resolve(field).cloned()))
}

fn validate(schema: &Path, document: &Path, config: EngineConfig) -> Result<()> {
    let form = load_form(schema, Some(document), config)?;
    let errors = form.validate();
    if errors.is_empty() {
        println!("ok");
        return Ok(());
    }
    for (key, message) in errors.iter() {
        println!("{}: {}", key, message);
    }
    bail!("{} validation error(s)", errors.len())
}

fn import_table(schema: &Path, input: &Path, table: &str, config: EngineConfig) -> Result<Value> {
    let form = load_form(schema, None, config)?;
    let text = std::fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let field = form.table_field(table)?;
    let count = field.import(&text)?;
    log::info!("Imported {} row(s) into {}", count, table);
    Ok(Value::Array(
        field.rows().iter().map(|row| Value::Object(row.to_json())).collect(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.cmd {
        Cmd::Check { schema } => check(&schema, config)?,
        Cmd::Eval { condition, values } => println!("{}", eval(&condition, &values)?),
        Cmd::Validate { schema, document } => validate(&schema, &document, config)?,
        Cmd::ExportTable {
            schema,
            document,
            table,
        } => {
            let form = load_form(&schema, Some(&document), config)?;
            print!("{}", form.table_field(&table)?.export());
        }
        Cmd::ImportTable {
            schema,
            input,
            table,
        } => {
            let rows = import_table(&schema, &input, &table, config)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Cmd::Search {
            collection,
            term,
            base_url,
            api_key,
            api_secret,
            limit,
        } => {
            let auth = StaticAuth::new(AuthState::authenticated(api_key, api_secret));
            let resolver = HttpResolver::new(&ResolverConfig::new(base_url), Arc::new(auth))?;
            let query = SearchQuery::new(collection, term).with_limit(limit);
            for key in resolver.search(&query).await? {
                println!("{}", key);
            }
        }
    }
    Ok(())
}
