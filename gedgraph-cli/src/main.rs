use clap::{Parser, Subcommand, ValueEnum};
use gedgraph::grammar::parse_grammar;
use gedgraph::{persist, validation, EntityKey, Gedcom, GedcomError, Grammar, Indi, SearchIndex};
use std::path::{Path, PathBuf};
use std::process;

/// gedgraph: inspect and edit a GEDCOM file from the command line
#[derive(Parser)]
#[command(name = "gedgraph", version, about)]
struct Cli {
    /// GEDCOM file to read (and write back for editing commands)
    #[arg(long)]
    file: PathBuf,

    /// Grammar YAML replacing the built-in GEDCOM 5.5 rules
    #[arg(long)]
    grammar: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Record counts per tag
    Stats,

    /// Print one record as a property tree
    Show {
        /// Record tag (e.g. INDI)
        tag: String,
        /// Record id without @ signs
        id: String,
    },

    /// Check references, pairs and cycles
    Validate,

    /// List all ancestors of an individual
    Ancestors { id: String },

    /// List all descendants of an individual
    Descendants { id: String },

    /// Case-insensitive substring search over all values
    Search { term: String },

    /// Add an individual
    AddIndi {
        /// Name in GEDCOM form, e.g. "John /Doe/"
        #[arg(long)]
        name: String,
        /// M, F or U
        #[arg(long)]
        sex: Option<String>,
        /// Explicit id (allocated when omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Delete a record and every reference to it
    Delete { tag: String, id: String },

    /// Make an individual a spouse in a family
    Spouse { fam: String, indi: String },

    /// Add an individual as a child of a family
    Child { fam: String, indi: String },

    /// Exchange husband and wife of a family
    Swap { fam: String },

    /// Create a family, optionally with its spouses
    NewFamily {
        #[arg(long)]
        husband: Option<String>,
        #[arg(long)]
        wife: Option<String>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut gedcom = open(&cli.file, cli.grammar.as_deref())?;

    match cli.command {
        Command::Stats => {
            let mut records = serde_json::Map::new();
            for tag in gedcom.entity_tags() {
                records.insert(tag.to_string(), gedcom.entity_count(tag).into());
            }
            print_output(
                &serde_json::json!({ "total": gedcom.len(), "records": records }),
                &cli.format,
            )?;
        }

        Command::Show { tag, id } => {
            let entity = gedcom
                .entity_by_id(&tag, &id)
                .ok_or_else(|| GedcomError::NotFound(format!("{tag} @{id}@")))?;
            print_output(&serde_json::to_value(entity.root().snapshot())?, &cli.format)?;
        }

        Command::Validate => {
            let result = validation::validate(&gedcom);
            print_output(&serde_json::to_value(&result)?, &cli.format)?;
            if !result.is_ok() {
                return Err(format!("{} integrity errors", result.errors.len()).into());
            }
        }

        Command::Ancestors { id } => {
            let indi = require_indi(&gedcom, &id)?;
            print_output(&people(&indi.ancestors()), &cli.format)?;
        }

        Command::Descendants { id } => {
            let indi = require_indi(&gedcom, &id)?;
            print_output(&people(&indi.descendants()), &cli.format)?;
        }

        Command::Search { term } => {
            let index = SearchIndex::open_in_memory()?;
            index.rebuild(&gedcom)?;
            print_output(&serde_json::to_value(index.search(&term)?)?, &cli.format)?;
        }

        Command::AddIndi { name, sex, id } => {
            let tag = gedcom.grammar().individual_tag().to_string();
            let created = gedcom.do_unit_of_work(|tx| -> gedgraph::Result<String> {
                let key = tx.create_entity(&tag, id.as_deref())?;
                let root = tx
                    .entity(key)
                    .map(|e| e.root_key())
                    .ok_or_else(|| GedcomError::NotFound(format!("{tag} {key:?}")))?;
                tx.add_property(root, "NAME", &name)?;
                if let Some(sex) = &sex {
                    tx.add_property(root, "SEX", sex)?;
                }
                Ok(tx.entity(key).map(|e| e.id().to_string()).unwrap_or_default())
            })?;
            persist::save(&gedcom, &cli.file)?;
            print_output(&serde_json::json!({ "ok": true, "id": created }), &cli.format)?;
        }

        Command::Delete { tag, id } => {
            let key = require(&gedcom, &tag, &id)?;
            gedcom.do_unit_of_work(|tx| tx.delete_entity(key))?;
            persist::save(&gedcom, &cli.file)?;
            print_output(&serde_json::json!({ "ok": true, "deleted": id }), &cli.format)?;
        }

        Command::Spouse { fam, indi } => {
            let (fam_key, indi_key) = family_pair(&gedcom, &fam, &indi)?;
            gedcom.do_unit_of_work(|tx| tx.set_spouse(fam_key, indi_key))?;
            persist::save(&gedcom, &cli.file)?;
            print_output(&family_summary(&gedcom, fam_key), &cli.format)?;
        }

        Command::Child { fam, indi } => {
            let (fam_key, indi_key) = family_pair(&gedcom, &fam, &indi)?;
            gedcom.do_unit_of_work(|tx| tx.add_family_child(fam_key, indi_key))?;
            persist::save(&gedcom, &cli.file)?;
            print_output(&family_summary(&gedcom, fam_key), &cli.format)?;
        }

        Command::Swap { fam } => {
            let fam_key = require(&gedcom, gedcom.grammar().family_tag(), &fam)?;
            gedcom.do_unit_of_work(|tx| tx.swap_spouses(fam_key))?;
            persist::save(&gedcom, &cli.file)?;
            print_output(&family_summary(&gedcom, fam_key), &cli.format)?;
        }

        Command::NewFamily { husband, wife } => {
            let indi_tag = gedcom.grammar().individual_tag().to_string();
            let fam_tag = gedcom.grammar().family_tag().to_string();
            let spouses = [husband, wife]
                .into_iter()
                .flatten()
                .map(|id| require(&gedcom, &indi_tag, &id))
                .collect::<Result<Vec<_>, _>>()?;
            let fam_key = gedcom.do_unit_of_work(|tx| -> gedgraph::Result<EntityKey> {
                let fam = tx.create_entity(&fam_tag, None)?;
                for spouse in &spouses {
                    tx.set_spouse(fam, *spouse)?;
                }
                Ok(fam)
            })?;
            persist::save(&gedcom, &cli.file)?;
            print_output(&family_summary(&gedcom, fam_key), &cli.format)?;
        }
    }

    Ok(())
}

/// Load the file, or start an empty document if it does not exist yet.
fn open(file: &Path, grammar: Option<&Path>) -> Result<Gedcom, GedcomError> {
    let grammar = match grammar {
        Some(path) => parse_grammar(path)?,
        None => Grammar::standard().clone(),
    };
    if file.exists() {
        persist::load_with_grammar(file, grammar)
    } else {
        log::info!("{} does not exist, starting an empty document", file.display());
        Ok(Gedcom::with_grammar(grammar))
    }
}

fn require(gedcom: &Gedcom, tag: &str, id: &str) -> Result<EntityKey, GedcomError> {
    gedcom
        .get_entity(tag, id)
        .ok_or_else(|| GedcomError::NotFound(format!("{tag} @{id}@")))
}

fn require_indi<'a>(gedcom: &'a Gedcom, id: &str) -> Result<Indi<'a>, GedcomError> {
    gedcom
        .indi_by_id(id)
        .ok_or_else(|| GedcomError::NotFound(format!("{} @{id}@", gedcom.grammar().individual_tag())))
}

fn family_pair(gedcom: &Gedcom, fam: &str, indi: &str) -> Result<(EntityKey, EntityKey), GedcomError> {
    Ok((
        require(gedcom, gedcom.grammar().family_tag(), fam)?,
        require(gedcom, gedcom.grammar().individual_tag(), indi)?,
    ))
}

fn people(list: &[Indi<'_>]) -> serde_json::Value {
    list.iter()
        .map(|indi| serde_json::json!({ "id": indi.id(), "name": indi.name() }))
        .collect()
}

fn family_summary(gedcom: &Gedcom, key: EntityKey) -> serde_json::Value {
    match gedcom.fam(key) {
        Some(fam) => serde_json::json!({
            "id": fam.id(),
            "husband": fam.husband().map(|h| h.id()),
            "wife": fam.wife().map(|w| w.id()),
            "children": fam.children().iter().map(|c| c.id()).collect::<Vec<_>>(),
        }),
        None => serde_json::Value::Null,
    }
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
