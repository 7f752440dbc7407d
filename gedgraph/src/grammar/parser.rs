use super::types::Grammar;
use crate::error::Result;
use std::path::Path;

/// Parse and validate a grammar YAML file
pub fn parse_grammar(path: &Path) -> Result<Grammar> {
    let content = std::fs::read_to_string(path)?;
    parse_grammar_str(&content)
}

/// Parse and validate a grammar YAML string
pub fn parse_grammar_str(content: &str) -> Result<Grammar> {
    let grammar: Grammar = serde_yaml::from_str(content)?;
    grammar.validate()?;
    Ok(grammar)
}
