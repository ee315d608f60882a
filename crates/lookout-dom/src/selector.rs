//! Parser for the CSS selector subset the memory host understands:
//! type (`div`, `*`), `#id`, `.class`, `[attr]`, `[attr=value]`, the
//! descendant and child (`>`) combinators, and `,` selector lists.

use lookout_common::DocumentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMatcher {
    pub name: String,
    pub value: Option<String>,
}

/// One compound selector, e.g. `button#login.primary[type=submit]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundSelector {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attributes: Vec<AttributeMatcher>,
}

/// A compound selector and how it relates to the one before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorPart {
    pub combinator: Option<Combinator>,
    pub compound: CompoundSelector,
}

/// Parsed selector list; a node matches when any chain matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    pub chains: Vec<Vec<SelectorPart>>,
}

impl SelectorList {
    pub fn parse(selector: &str) -> Result<Self, DocumentError> {
        let invalid = || DocumentError::InvalidSelector(selector.to_string());
        let mut chains = Vec::new();
        for group in split_groups(selector).ok_or_else(invalid)? {
            chains.push(parse_chain(&group).ok_or_else(invalid)?);
        }
        Ok(Self { chains })
    }
}

fn split_groups(selector: &str) -> Option<Vec<String>> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;
    let mut quote: Option<char> = None;

    for ch in selector.chars() {
        match (ch, quote) {
            (q, Some(open)) if q == open => {
                quote = None;
                current.push(ch);
            }
            (_, Some(_)) => current.push(ch),
            ('"' | '\'', None) if in_brackets => {
                quote = Some(ch);
                current.push(ch);
            }
            ('[', None) => {
                if in_brackets {
                    return None;
                }
                in_brackets = true;
                current.push(ch);
            }
            (']', None) => {
                if !in_brackets {
                    return None;
                }
                in_brackets = false;
                current.push(ch);
            }
            (',', None) if !in_brackets => {
                let trimmed = current.trim();
                if trimmed.is_empty() {
                    return None;
                }
                groups.push(trimmed.to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if in_brackets || quote.is_some() {
        return None;
    }
    let trimmed = current.trim();
    if trimmed.is_empty() {
        return None;
    }
    groups.push(trimmed.to_string());
    Some(groups)
}

enum Token {
    Compound(String),
    Child,
}

fn tokenize(group: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;
    let mut quote: Option<char> = None;

    let flush = |current: &mut String, tokens: &mut Vec<Token>| {
        if !current.is_empty() {
            tokens.push(Token::Compound(std::mem::take(current)));
        }
    };

    for ch in group.chars() {
        if let Some(open) = quote {
            if ch == open {
                quote = None;
            }
            current.push(ch);
            continue;
        }
        match ch {
            '"' | '\'' if in_brackets => {
                quote = Some(ch);
                current.push(ch);
            }
            '[' => {
                in_brackets = true;
                current.push(ch);
            }
            ']' => {
                in_brackets = false;
                current.push(ch);
            }
            '>' if !in_brackets => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::Child);
            }
            c if c.is_whitespace() && !in_brackets => flush(&mut current, &mut tokens),
            _ => current.push(ch),
        }
    }
    flush(&mut current, &mut tokens);
    Some(tokens)
}

fn parse_chain(group: &str) -> Option<Vec<SelectorPart>> {
    let mut parts = Vec::new();
    let mut pending: Option<Combinator> = None;

    for token in tokenize(group)? {
        match token {
            Token::Child => {
                if parts.is_empty() || pending == Some(Combinator::Child) {
                    return None;
                }
                pending = Some(Combinator::Child);
            }
            Token::Compound(text) => {
                let combinator = if parts.is_empty() {
                    None
                } else {
                    Some(pending.unwrap_or(Combinator::Descendant))
                };
                parts.push(SelectorPart {
                    combinator,
                    compound: parse_compound(&text)?,
                });
                pending = None;
            }
        }
    }

    if parts.is_empty() || pending.is_some() {
        return None;
    }
    Some(parts)
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '-' || ch == '_'
}

fn take_ident(chars: &[char], pos: &mut usize) -> Option<String> {
    let start = *pos;
    while *pos < chars.len() && is_ident_char(chars[*pos]) {
        *pos += 1;
    }
    if *pos == start {
        return None;
    }
    Some(chars[start..*pos].iter().collect())
}

fn parse_compound(text: &str) -> Option<CompoundSelector> {
    let chars: Vec<char> = text.chars().collect();
    let mut compound = CompoundSelector::default();
    let mut pos = 0;

    if chars.first() == Some(&'*') {
        pos = 1;
    } else if chars.first().is_some_and(|c| is_ident_char(*c)) {
        compound.tag = Some(take_ident(&chars, &mut pos)?.to_ascii_lowercase());
    }

    while pos < chars.len() {
        match chars[pos] {
            '#' => {
                pos += 1;
                compound.id = Some(take_ident(&chars, &mut pos)?);
            }
            '.' => {
                pos += 1;
                compound.classes.push(take_ident(&chars, &mut pos)?);
            }
            '[' => {
                let close = chars[pos..].iter().position(|c| *c == ']')? + pos;
                let inner: String = chars[pos + 1..close].iter().collect();
                compound.attributes.push(parse_attribute(&inner)?);
                pos = close + 1;
            }
            _ => return None,
        }
    }
    Some(compound)
}

fn parse_attribute(inner: &str) -> Option<AttributeMatcher> {
    let (name, value) = match inner.split_once('=') {
        Some((name, value)) => {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (name.trim(), Some(unquoted.to_string()))
        }
        None => (inner.trim(), None),
    };
    if name.is_empty() || !name.chars().all(is_ident_char) {
        return None;
    }
    Some(AttributeMatcher {
        name: name.to_ascii_lowercase(),
        value,
    })
}
