//! MLSD listing parser (RFC 3659).
//!
//! Each line has the form `fact1=val1;fact2=val2; name`. Fact names are
//! case-insensitive. Only `type` and `size` matter to the backup.

use tracing::warn;

use crate::model::{EntryKind, RemoteEntry};

/// Parse every line of an MLSD response, dropping blank and malformed lines.
pub fn parse_mlsd_lines<I, S>(lines: I) -> Vec<RemoteEntry>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| parse_mlsd_line(line.as_ref()))
        .collect()
}

/// Parse a single MLSD fact line.
pub fn parse_mlsd_line(line: &str) -> Option<RemoteEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    // Facts end at the first "; ", the remainder is the name (which may contain spaces).
    let (facts, name) = match line.find("; ") {
        Some(pos) => (&line[..pos + 1], &line[pos + 2..]),
        None => match line.strip_prefix(' ') {
            // No facts at all
            Some(name) => ("", name),
            None => return None,
        },
    };
    if name.is_empty() {
        return None;
    }

    let mut kind = EntryKind::Other;
    let mut size = 0;
    for fact in facts.split(';') {
        let Some((key, value)) = fact.trim().split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => kind = kind_from_fact(value),
            "size" => match value.parse() {
                Ok(parsed) => size = parsed,
                Err(_) => warn!(line, "unparseable size fact '{}', counting the entry as 0 bytes", value),
            },
            _ => {}
        }
    }

    if name == "." || name == ".." {
        kind = EntryKind::Pseudo;
    }

    Some(RemoteEntry {
        name: name.to_string(),
        kind,
        size,
    })
}

fn kind_from_fact(value: &str) -> EntryKind {
    match value.to_ascii_lowercase().as_str() {
        "dir" => EntryKind::Directory,
        "file" => EntryKind::File,
        "cdir" | "pdir" => EntryKind::Pseudo,
        _ => EntryKind::Other,
    }
}
