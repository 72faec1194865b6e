//! A small parser for Google-style function documentation.
//!
//! ```text
//! Add two numbers.
//!
//! Longer explanation of what happens.
//!
//! Args:
//!     x (int): the first number
//!     y: the second number,
//!         continued on the next line
//!
//! Returns:
//!     int: the sum
//! ```

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Docstring {
    pub short_description: Option<String>,
    pub long_description: Option<String>,
    pub params: Vec<DocParam>,
    pub returns: Vec<DocReturn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocParam {
    pub name: String,
    pub type_name: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocReturn {
    pub type_name: Option<String>,
    pub description: String,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Description,
    Args,
    Returns,
    Other,
}

fn section_for(line: &str) -> Option<Section> {
    let header = line.trim().strip_suffix(':')?;
    match header.to_ascii_lowercase().as_str() {
        "args" | "arguments" | "params" | "parameters" => Some(Section::Args),
        "returns" | "return" | "yields" | "yield" => Some(Section::Returns),
        "raises" | "examples" | "example" | "note" | "notes" | "attributes" => {
            Some(Section::Other)
        }
        _ => None,
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Splits `head: rest` where `head` may be `name (type)` or just `type`.
fn split_entry(line: &str) -> (String, String) {
    match line.split_once(':') {
        Some((head, rest)) => (head.trim().to_string(), rest.trim().to_string()),
        None => (line.trim().to_string(), String::new()),
    }
}

/// Groups the lines of a section into entries, joining indented continuations.
fn entries(lines: &[&str]) -> Vec<String> {
    let Some(base) = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| indent_of(l))
        .min()
    else {
        return Vec::new();
    };

    let mut entries: Vec<String> = Vec::new();
    for line in lines.iter().filter(|l| !l.trim().is_empty()) {
        if indent_of(line) > base {
            if let Some(last) = entries.last_mut() {
                last.push(' ');
                last.push_str(line.trim());
                continue;
            }
        }
        entries.push(line.trim().to_string());
    }
    entries
}

fn join_paragraph(lines: &[&str]) -> Option<String> {
    let text = lines
        .iter()
        .map(|l| l.trim())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}

pub fn parse(doc: &str) -> Docstring {
    let mut description: Vec<&str> = Vec::new();
    let mut args: Vec<&str> = Vec::new();
    let mut returns: Vec<&str> = Vec::new();
    let mut section = Section::Description;

    for line in doc.lines() {
        if let Some(next) = section_for(line) {
            section = next;
            continue;
        }
        match section {
            Section::Description => description.push(line),
            Section::Args => args.push(line),
            Section::Returns => returns.push(line),
            Section::Other => {}
        }
    }

    // The short description is the first paragraph, the rest is the long one.
    let first = description
        .iter()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(description.len());
    let split = description[first..]
        .iter()
        .position(|l| l.trim().is_empty())
        .map_or(description.len(), |offset| first + offset);

    let short_description = join_paragraph(&description[first..split])
        .map(|text| text.replace('\n', " "));
    let long_description = join_paragraph(&description[split..]);

    let params = entries(&args)
        .into_iter()
        .map(|entry| {
            let (head, description) = split_entry(&entry);
            let (name, type_name) = match head.split_once('(') {
                Some((name, ty)) => (
                    name.trim().to_string(),
                    Some(ty.trim_end_matches(')').trim().to_string()),
                ),
                None => (head, None),
            };
            DocParam {
                name,
                type_name,
                description,
            }
        })
        .collect();

    let returns = entries(&returns)
        .into_iter()
        .map(|entry| match entry.split_once(':') {
            Some((ty, description)) => DocReturn {
                type_name: Some(ty.trim().to_string()),
                description: description.trim().to_string(),
            },
            None => DocReturn {
                type_name: None,
                description: entry,
            },
        })
        .collect();

    Docstring {
        short_description,
        long_description,
        params,
        returns,
    }
}

impl Docstring {
    pub fn param(&self, name: &str) -> Option<&DocParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// True when neither a short nor a long description was written.
    pub fn is_empty(&self) -> bool {
        self.short_description.is_none() && self.long_description.is_none()
    }
}
