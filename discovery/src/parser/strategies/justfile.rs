//! `just` recipe parser.

use std::path::Path;

use command_harvest_core::Command;

use super::super::util::join_continuations;
use super::super::{ParseError, Parser};

pub const KIND: &str = "just_recipe";

const KEYWORDS: &[&str] = &["set", "alias", "export", "import", "mod", "unexport"];

/// Emits `just <recipe>` for each public recipe callable without arguments.
///
/// Recipes whose name starts with `_`, recipes marked `[private]` and
/// recipes with a required parameter are skipped. A `#` comment directly
/// above a recipe becomes its description.
pub struct JustfileParser;

impl Parser for JustfileParser {
    fn name(&self) -> &'static str {
        "justfile"
    }

    fn file_patterns(&self) -> &'static [&'static str] {
        &["justfile", "Justfile", ".justfile"]
    }

    fn extract(&self, contents: &str, _path: &Path) -> Result<Vec<Command>, ParseError> {
        let mut commands = Vec::new();
        let mut doc: Option<String> = None;
        let mut private = false;

        for (_, line) in join_continuations(contents) {
            if line.starts_with([' ', '\t']) {
                doc = None;
                private = false;
                continue;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                doc = None;
                private = false;
                continue;
            }
            if let Some(comment) = trimmed.strip_prefix('#') {
                if !comment.starts_with('!') {
                    doc = Some(comment.trim().to_string());
                }
                continue;
            }
            if let Some(attributes) = trimmed.strip_prefix('[') {
                private |= attributes.trim_end_matches(']').split(',').any(|a| a.trim() == "private");
                continue;
            }

            let recipe = parse_recipe_header(trimmed);
            let description = doc.take();
            let is_private = std::mem::take(&mut private);
            let Some(recipe) = recipe else {
                continue;
            };
            if is_private || recipe.name.starts_with('_') || recipe.requires_arguments {
                continue;
            }

            let mut command = Command::new(format!("just {}", recipe.name), KIND)
                .with_metadata("recipe", recipe.name.as_str());
            if let Some(description) = description.filter(|d| !d.is_empty()) {
                command = command.with_description(description);
            }
            commands.push(command);
        }

        Ok(commands)
    }
}

struct RecipeHeader {
    name: String,
    requires_arguments: bool,
}

fn parse_recipe_header(line: &str) -> Option<RecipeHeader> {
    let first_word = line.split_whitespace().next()?;
    if KEYWORDS.contains(&first_word) {
        return None;
    }
    let colon = find_header_colon(line)?;
    let (head, rest) = line.split_at(colon);
    if rest.starts_with(":=") {
        return None;
    }

    let mut words = head.split_whitespace();
    let name = words.next()?.trim_start_matches('@');
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        return None;
    }
    let requires_arguments = words.any(|param| {
        let param = param.trim_start_matches('$');
        !param.contains('=') && !param.starts_with('*')
    });

    Some(RecipeHeader {
        name: name.to_string(),
        requires_arguments,
    })
}

/// First `:` outside quotes, so defaults like `url='http://x'` do not split.
fn find_header_colon(line: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, ch) in line.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, ':') => return Some(idx),
            _ => {}
        }
    }
    None
}
