use crate::error::{GedcomError, Result};
use crate::gedcom::{Gedcom, Transaction};
use crate::grammar::Grammar;
use crate::property::{PropertyKey, PropertyTree};
use crate::tag_path::TagPath;
use regex::Regex;
use std::sync::OnceLock;

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s+(?:@([^@]+)@\s+)?(\S+)(?: (.*))?$").expect("line pattern compiles")
    })
}

fn pointer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^@([^@\s]+)@$").expect("pointer pattern compiles"))
}

/// One line with its continuation lines folded in, plus its sub-lines.
#[derive(Debug)]
struct RawNode {
    line: usize,
    id: Option<String>,
    tag: String,
    value: String,
    children: Vec<RawNode>,
}

/// Split GEDCOM text into level 0 records.
fn parse_lines(content: &str) -> Result<Vec<RawNode>> {
    let mut records = Vec::new();
    let mut stack: Vec<RawNode> = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let raw = if line == 1 { raw.trim_start_matches('\u{feff}') } else { raw };
        if raw.trim().is_empty() {
            continue;
        }
        let caps = line_pattern().captures(raw).ok_or_else(|| GedcomError::Parse {
            line,
            message: format!("expected 'level [@id@] TAG [value]', found '{raw}'"),
        })?;
        let level: usize = caps[1].parse().map_err(|_| GedcomError::Parse {
            line,
            message: format!("level '{}' is out of range", &caps[1]),
        })?;
        if level > stack.len() {
            return Err(GedcomError::Parse {
                line,
                message: format!("level {level} follows level {}", stack.len() as isize - 1),
            });
        }

        while stack.len() > level {
            fold(&mut stack, &mut records);
        }

        let tag = caps[3].to_string();
        let value = caps.get(4).map_or("", |m| m.as_str());
        if tag == "CONT" || tag == "CONC" {
            let parent = stack.last_mut().ok_or_else(|| GedcomError::Parse {
                line,
                message: format!("{tag} needs a line to continue"),
            })?;
            if tag == "CONT" {
                parent.value.push('\n');
            }
            parent.value.push_str(value);
            continue;
        }

        stack.push(RawNode {
            line,
            id: caps.get(2).map(|m| m.as_str().to_string()),
            tag,
            value: value.to_string(),
            children: Vec::new(),
        });
    }
    while !stack.is_empty() {
        fold(&mut stack, &mut records);
    }
    Ok(records)
}

/// Close the innermost open line.
fn fold(stack: &mut Vec<RawNode>, records: &mut Vec<RawNode>) {
    if let Some(node) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => records.push(node),
        }
    }
}

/// A doubled `@@` in a literal value stands for one `@`.
fn unescape(value: &str) -> String {
    value.replace("@@", "@")
}

/// Values of the form `@id@` become cross-references where the grammar
/// declares a reference for the path; everything else stays literal.
fn to_tree(grammar: &Grammar, path: &TagPath, node: &RawNode) -> PropertyTree {
    let path = path.child(&node.tag);
    let pointer = pointer_pattern()
        .captures(&node.value)
        .filter(|_| grammar.reference_rule(&path).is_some())
        .map(|caps| caps[1].to_string());
    let mut tree = match pointer {
        Some(id) => PropertyTree::xref(&node.tag, &id),
        None => PropertyTree::new(&node.tag, &unescape(&node.value)),
    };
    tree.children = node.children.iter().map(|child| to_tree(grammar, &path, child)).collect();
    tree
}

/// Parse GEDCOM text into a new document using `grammar`.
///
/// Everything is created in one muted unit of work and linked once all
/// records exist, so forward references resolve. A reference to a
/// missing record fails the whole load.
pub fn read_str_with_grammar(content: &str, grammar: Grammar) -> Result<Gedcom> {
    let records = parse_lines(content)?;
    let rules = grammar.clone();
    let mut gedcom = Gedcom::with_grammar(grammar);

    gedcom.do_muted_unit_of_work(|tx| -> Result<()> {
        let mut roots = Vec::with_capacity(records.len());
        for record in &records {
            if let Some(root) = create_record(tx, &rules, record)? {
                roots.push(root);
            }
        }
        for root in roots {
            tx.link_subtree(root)?;
        }
        Ok(())
    })?;

    log::debug!("Loaded {} records", gedcom.len());
    Ok(gedcom)
}

fn create_record(tx: &mut Transaction<'_>, grammar: &Grammar, record: &RawNode) -> Result<Option<PropertyKey>> {
    if record.tag == "HEAD" || record.tag == "TRLR" {
        return Ok(None);
    }
    let Some(id) = record.id.as_deref() else {
        log::warn!("Skipping {} record without an id at line {}", record.tag, record.line);
        return Ok(None);
    };

    let entity = tx.create_entity(&record.tag, Some(id)).map_err(|e| match e {
        GedcomError::DuplicateId { .. } | GedcomError::Structure(_) => GedcomError::Parse {
            line: record.line,
            message: e.to_string(),
        },
        other => other,
    })?;
    let root = tx
        .entity(entity)
        .map(|e| e.root_key())
        .ok_or_else(|| GedcomError::NotFound(format!("{} @{id}@", record.tag)))?;
    if !record.value.is_empty() {
        tx.set_value(root, &unescape(&record.value))?;
    }

    let path = TagPath::from_segments([record.tag.as_str()]);
    for child in &record.children {
        let tree = to_tree(grammar, &path, child);
        tx.insert_tree(root, None, &tree)?;
    }
    Ok(Some(root))
}
