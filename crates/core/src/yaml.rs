//! A tag-preserving YAML subset for the textual projections of BYML and AAMP.
//!
//! Both formats lean on application tags (`!u`, `!l`, `!h 0x...`, `!str64`,
//! ...) to carry the binary type through the text form. General-purpose YAML
//! crates drop tags they do not recognize, so the text layer is implemented
//! here instead: a small node tree, a deterministic emitter, and an
//! indentation-based parser covering exactly the dialect the codecs emit.
//!
//! Supported: block mappings and sequences, flow mappings and sequences on a
//! single line, plain/single-quoted/double-quoted scalars, `!tag` and `!!tag`
//! tokens on scalars, containers and keys, `#` comments, an optional leading
//! `---`. Not supported (never emitted by the codecs): anchors, aliases,
//! directives, multi-document streams, block scalars.

use snafu::prelude::*;

/// Error conditions for when parsing the textual form.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Thrown on the first structural violation in the input text.
    #[snafu(display("Syntax error at line {line}, column {col}: {reason}"))]
    Syntax { line: u32, col: u32, reason: &'static str },
}
type Result<T> = core::result::Result<T, Error>;

/// A source position, 1-indexed. Zero means "not from a parse".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mark {
    pub line: u32,
    pub col: u32,
}

/// A scalar value with an optional tag. `quoted` records whether the scalar
/// was (or must be) quoted, which is how a string `"123"` stays distinct from
/// the integer `123`.
#[derive(Clone, Debug, PartialEq)]
pub struct Scalar {
    pub tag: Option<String>,
    pub value: String,
    pub quoted: bool,
    pub mark: Mark,
}

impl Scalar {
    /// A scalar that renders without quotes: numbers, booleans, null, hex hashes.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self { tag: None, value: value.into(), quoted: false, mark: Mark::default() }
    }

    /// A tagged literal, e.g. `!u 42`.
    #[must_use]
    pub fn tagged(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self { tag: Some(tag.into()), value: value.into(), quoted: false, mark: Mark::default() }
    }

    /// A string scalar; quotes are added exactly when the content would
    /// otherwise be reinterpreted by the parser.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        let value = value.into();
        let quoted = string_needs_quotes(&value);
        Self { tag: None, value, quoted, mark: Mark::default() }
    }

    /// A tagged string scalar, e.g. `!str64 ""`.
    #[must_use]
    pub fn tagged_string(tag: impl Into<String>, value: impl Into<String>) -> Self {
        let mut scalar = Self::string(value);
        scalar.tag = Some(tag.into());
        scalar
    }

    /// The null scalar.
    #[must_use]
    pub fn null() -> Self {
        Self::literal("null")
    }

    /// True if this scalar is an unquoted, untagged YAML null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        !self.quoted
            && self.tag.is_none()
            && matches!(self.value.as_str(), "null" | "~" | "Null" | "NULL" | "")
    }
}

/// A sequence node. `flow` selects `[a, b, c]` rendering instead of block items.
#[derive(Clone, Debug, PartialEq)]
pub struct Seq {
    pub tag: Option<String>,
    pub flow: bool,
    pub nodes: Vec<Node>,
    pub mark: Mark,
}

impl Seq {
    #[must_use]
    pub fn block(nodes: Vec<Node>) -> Self {
        Self { tag: None, flow: false, nodes, mark: Mark::default() }
    }

    #[must_use]
    pub fn flow(tag: Option<String>, nodes: Vec<Node>) -> Self {
        Self { tag, flow: true, nodes, mark: Mark::default() }
    }
}

/// A mapping node. Entry order is preserved; keys are scalars so they can
/// carry tags (`!h 0xDEADBEEF: ...`).
#[derive(Clone, Debug, PartialEq)]
pub struct Map {
    pub tag: Option<String>,
    pub flow: bool,
    pub entries: Vec<(Scalar, Node)>,
    pub mark: Mark,
}

impl Map {
    #[must_use]
    pub fn block(tag: Option<String>, entries: Vec<(Scalar, Node)>) -> Self {
        Self { tag, flow: false, entries, mark: Mark::default() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    Seq(Seq),
    Map(Map),
}

impl Node {
    #[must_use]
    pub fn mark(&self) -> Mark {
        match self {
            Node::Scalar(s) => s.mark,
            Node::Seq(s) => s.mark,
            Node::Map(m) => m.mark,
        }
    }

    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match self {
            Node::Scalar(s) => s.tag.as_deref(),
            Node::Seq(s) => s.tag.as_deref(),
            Node::Map(m) => m.tag.as_deref(),
        }
    }
}

//-------------------------------------------------------------------------------------------------
// Scalar formatting helpers shared by the codecs.
//-------------------------------------------------------------------------------------------------

/// Formats an `f32` in its shortest round-trip form, with YAML spellings for
/// the non-finite values.
#[must_use]
pub fn format_f32(value: f32) -> String {
    if value.is_nan() {
        ".nan".into()
    } else if value.is_infinite() {
        if value > 0.0 { ".inf".into() } else { "-.inf".into() }
    } else {
        ryu::Buffer::new().format(value).into()
    }
}

/// Formats an `f64` in its shortest round-trip form, with YAML spellings for
/// the non-finite values.
#[must_use]
pub fn format_f64(value: f64) -> String {
    if value.is_nan() {
        ".nan".into()
    } else if value.is_infinite() {
        if value > 0.0 { ".inf".into() } else { "-.inf".into() }
    } else {
        ryu::Buffer::new().format(value).into()
    }
}

/// Parses an `f32`, accepting the YAML spellings for the non-finite values.
#[must_use]
pub fn parse_f32(text: &str) -> Option<f32> {
    match text {
        ".inf" | "+.inf" => Some(f32::INFINITY),
        "-.inf" => Some(f32::NEG_INFINITY),
        ".nan" => Some(f32::NAN),
        _ => text.parse().ok(),
    }
}

/// Parses an `f64`, accepting the YAML spellings for the non-finite values.
#[must_use]
pub fn parse_f64(text: &str) -> Option<f64> {
    match text {
        ".inf" | "+.inf" => Some(f64::INFINITY),
        "-.inf" => Some(f64::NEG_INFINITY),
        ".nan" => Some(f64::NAN),
        _ => text.parse().ok(),
    }
}

/// Parses an unsigned integer, accepting a `0x` prefix for hexadecimal.
#[must_use]
pub fn parse_unsigned(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

fn string_needs_quotes(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    let first = value.chars().next().unwrap();
    if value != value.trim() {
        return true;
    }
    // Characters that start another construct, or content the parser would
    // reinterpret as a different scalar type.
    if "!&*?|>%@`\"'#,[]{}".contains(first) {
        return true;
    }
    if first == '-' && (value.len() == 1 || value.as_bytes()[1] == b' ') {
        return true;
    }
    if value.contains(": ")
        || value.ends_with(':')
        || value.contains(" #")
        || value.contains(['[', ']', '{', '}', ','])
        || value.chars().any(|c| c.is_control())
    {
        return true;
    }
    if matches!(
        value,
        "null" | "Null" | "NULL" | "~" | "true" | "True" | "TRUE" | "false" | "False" | "FALSE"
    ) {
        return true;
    }
    // Number-like plain scalars must be quoted to stay strings.
    value.parse::<i64>().is_ok()
        || value.parse::<u64>().is_ok()
        || value.parse::<f64>().is_ok()
        || parse_unsigned(value).is_some()
        || matches!(value, ".inf" | "-.inf" | "+.inf" | ".nan")
}

//-------------------------------------------------------------------------------------------------
// Emitter
//-------------------------------------------------------------------------------------------------

/// Renders a node tree to a YAML string. Output is deterministic.
#[must_use]
pub fn emit(node: &Node) -> String {
    let mut out = String::new();
    match node {
        Node::Scalar(s) => {
            out.push_str(&render_scalar(s));
            out.push('\n');
        }
        _ => {
            if let Some(tag) = node.tag() {
                // A tagged container at the root gets its tag on its own line.
                out.push_str(tag);
                out.push('\n');
            }
            if let Some(inline) = render_inline_untagged(node) {
                out.push_str(&inline);
                out.push('\n');
            } else {
                emit_block(node, 0, &mut out);
            }
        }
    }
    out
}

fn render_scalar(scalar: &Scalar) -> String {
    let mut out = String::new();
    if let Some(tag) = &scalar.tag {
        out.push_str(tag);
        out.push(' ');
    }
    if scalar.quoted {
        out.push('"');
        for c in scalar.value.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                '\0' => out.push_str("\\0"),
                c if c.is_control() => {
                    out.push_str(&format!("\\u{:04X}", c as u32));
                }
                c => out.push(c),
            }
        }
        out.push('"');
    } else {
        out.push_str(&scalar.value);
    }
    out
}

/// Renders a node on a single line if it is a scalar, a flow container, or an
/// empty container. Returns `None` for non-empty block containers.
fn render_inline(node: &Node) -> Option<String> {
    match node {
        Node::Scalar(s) => Some(render_scalar(s)),
        _ => {
            let body = render_inline_untagged(node)?;
            Some(match node.tag() {
                Some(tag) => format!("{tag} {body}"),
                None => body,
            })
        }
    }
}

fn render_inline_untagged(node: &Node) -> Option<String> {
    match node {
        Node::Scalar(_) => None,
        Node::Seq(seq) => {
            if seq.nodes.is_empty() {
                Some("[]".into())
            } else if seq.flow {
                let items: Vec<String> =
                    seq.nodes.iter().map(|n| render_inline(n).expect("flow item")).collect();
                Some(format!("[{}]", items.join(", ")))
            } else {
                None
            }
        }
        Node::Map(map) => {
            if map.entries.is_empty() {
                Some("{}".into())
            } else if map.flow {
                let items: Vec<String> = map
                    .entries
                    .iter()
                    .map(|(k, v)| {
                        format!("{}: {}", render_scalar(k), render_inline(v).expect("flow value"))
                    })
                    .collect();
                Some(format!("{{{}}}", items.join(", ")))
            } else {
                None
            }
        }
    }
}

fn emit_block(node: &Node, indent: usize, out: &mut String) {
    let pad = " ".repeat(indent);
    match node {
        Node::Scalar(s) => {
            out.push_str(&pad);
            out.push_str(&render_scalar(s));
            out.push('\n');
        }
        Node::Seq(seq) => {
            for item in &seq.nodes {
                if let Some(inline) = render_inline(item) {
                    out.push_str(&pad);
                    out.push_str("- ");
                    out.push_str(&inline);
                    out.push('\n');
                } else if item.tag().is_some() {
                    out.push_str(&pad);
                    out.push_str("- ");
                    out.push_str(item.tag().unwrap());
                    out.push('\n');
                    emit_block(item, indent + 2, out);
                } else {
                    // Compact form: the first line of the nested block rides
                    // on the dash.
                    let mut child = String::new();
                    emit_block(item, indent + 2, &mut child);
                    let rest = &child[indent + 2..];
                    out.push_str(&pad);
                    out.push_str("- ");
                    out.push_str(rest);
                }
            }
        }
        Node::Map(map) => {
            for (key, value) in &map.entries {
                out.push_str(&pad);
                out.push_str(&render_scalar(key));
                out.push(':');
                if let Some(inline) = render_inline(value) {
                    out.push(' ');
                    out.push_str(&inline);
                    out.push('\n');
                } else {
                    if let Some(tag) = value.tag() {
                        out.push(' ');
                        out.push_str(tag);
                    }
                    out.push('\n');
                    emit_block(value, indent + 2, out);
                }
            }
        }
    }
}

//-------------------------------------------------------------------------------------------------
// Parser
//-------------------------------------------------------------------------------------------------

/// Parses a YAML document into a node tree.
///
/// # Errors
/// Returns [`Syntax`](Error::Syntax) with the position of the first violation.
pub fn parse(text: &str) -> Result<Node> {
    let mut parser = Parser::from_text(text)?;
    if parser.lines.is_empty() {
        return Ok(Node::Scalar(Scalar::null()));
    }
    let node = parser.parse_block(0)?;
    if parser.idx != parser.lines.len() {
        let line = &parser.lines[parser.idx];
        return SyntaxSnafu {
            line: line.number,
            col: line.indent as u32 + 1,
            reason: "content after the end of the document",
        }
        .fail();
    }
    Ok(node)
}

#[derive(Debug)]
struct Line {
    indent: usize,
    text: String,
    number: u32,
}

struct Parser {
    lines: Vec<Line>,
    idx: usize,
}

impl Parser {
    fn from_text(text: &str) -> Result<Self> {
        let mut lines = Vec::new();
        for (i, raw) in text.lines().enumerate() {
            let number = i as u32 + 1;
            let indent = raw.len() - raw.trim_start_matches(' ').len();
            ensure!(
                !raw[..indent].contains('\t') && !raw.trim_start().starts_with('\t'),
                SyntaxSnafu { line: number, col: indent as u32 + 1, reason: "tabs are not allowed" }
            );
            let content = strip_comment(&raw[indent..]);
            let content = content.trim_end();
            if content.is_empty() {
                continue;
            }
            if lines.is_empty() && content == "---" {
                continue;
            }
            lines.push(Line { indent, text: content.to_string(), number });
        }
        Ok(Self { lines, idx: 0 })
    }

    fn peek(&self) -> Option<&Line> {
        self.lines.get(self.idx)
    }

    fn parse_block(&mut self, min_indent: usize) -> Result<Node> {
        let (base, is_seq, is_map) = {
            let line = &self.lines[self.idx];
            debug_assert!(line.indent >= min_indent);
            let is_seq = line.text == "-" || line.text.starts_with("- ");
            let is_map = !is_seq && split_map_entry(&line.text).is_some();
            (line.indent, is_seq, is_map)
        };

        if is_seq {
            self.parse_seq(base)
        } else if is_map {
            self.parse_map(base)
        } else {
            // A lone scalar, flow container, or tag-only line introducing a
            // nested block.
            let (number, indent, text) = {
                let line = &self.lines[self.idx];
                (line.number, line.indent, line.text.clone())
            };
            let (tag, rest, rest_col) = split_tag(&text);
            if rest.is_empty() {
                let tag = tag.map(str::to_string);
                self.idx += 1;
                if self.peek().is_some_and(|l| l.indent >= min_indent) {
                    let mut child = self.parse_block(min_indent)?;
                    attach_tag(&mut child, tag, number, indent)?;
                    Ok(child)
                } else {
                    let mut scalar = Scalar::null();
                    scalar.tag = tag;
                    scalar.mark = Mark { line: number, col: indent as u32 + 1 };
                    Ok(Node::Scalar(scalar))
                }
            } else {
                self.idx += 1;
                parse_inline(rest, tag, number, indent + rest_col)
            }
        }
    }

    fn parse_seq(&mut self, base: usize) -> Result<Node> {
        let mark = {
            let line = &self.lines[self.idx];
            Mark { line: line.number, col: line.indent as u32 + 1 }
        };
        let mut nodes = Vec::new();
        loop {
            let Some(line) = self.peek() else { break };
            if line.indent != base || !(line.text == "-" || line.text.starts_with("- ")) {
                break;
            }
            let number = line.number;
            let text = line.text.clone();
            let rest_full = text[1..].trim_start();
            let rest_col = text.len() - rest_full.len();
            if rest_full.is_empty() {
                self.idx += 1;
                if self.peek().is_some_and(|l| l.indent > base) {
                    nodes.push(self.parse_block(base + 1)?);
                } else {
                    nodes.push(Node::Scalar(Scalar::null()));
                }
                continue;
            }
            let (tag, rest, tag_len) = split_tag(rest_full);
            if rest.is_empty() {
                // `- !obj` with the tagged block nested beneath the dash.
                let tag = tag.map(str::to_string);
                self.idx += 1;
                if self.peek().is_some_and(|l| l.indent > base) {
                    let mut child = self.parse_block(base + 1)?;
                    attach_tag(&mut child, tag, number, base)?;
                    nodes.push(child);
                } else {
                    let mut scalar = Scalar::null();
                    scalar.tag = tag;
                    nodes.push(Node::Scalar(scalar));
                }
            } else if tag.is_none() && split_map_entry(rest_full).is_some() {
                // Compact mapping on the dash line: rewrite the line as the
                // first entry of a deeper block and re-parse.
                let line = &mut self.lines[self.idx];
                line.indent = base + rest_col;
                line.text = rest_full.to_string();
                nodes.push(self.parse_block(base + 1)?);
            } else {
                self.idx += 1;
                nodes.push(parse_inline(rest, tag, number, base + rest_col + tag_len)?);
            }
        }
        Ok(Node::Seq(Seq { tag: None, flow: false, nodes, mark }))
    }

    fn parse_map(&mut self, base: usize) -> Result<Node> {
        let mark = {
            let line = &self.lines[self.idx];
            Mark { line: line.number, col: line.indent as u32 + 1 }
        };
        let mut entries: Vec<(Scalar, Node)> = Vec::new();
        loop {
            let Some(line) = self.peek() else { break };
            if line.indent != base {
                break;
            }
            let number = line.number;
            let text = line.text.clone();
            let Some((key_text, rest, rest_col)) = split_map_entry(&text) else {
                break;
            };
            let mut key = parse_scalar_text(key_text, number, base as u32 + 1)?;
            key.mark = Mark { line: number, col: base as u32 + 1 };
            ensure!(
                !entries.iter().any(|(k, _)| k.value == key.value && k.tag == key.tag),
                SyntaxSnafu { line: number, col: base as u32 + 1, reason: "duplicate mapping key" }
            );
            if rest.is_empty() {
                self.idx += 1;
                if self.peek().is_some_and(|l| l.indent > base) {
                    entries.push((key, self.parse_block(base + 1)?));
                } else {
                    entries.push((key, Node::Scalar(Scalar::null())));
                }
                continue;
            }
            let (tag, payload, tag_len) = split_tag(rest);
            if payload.is_empty() {
                // `key: !list` with the tagged block nested beneath the key.
                let tag = tag.map(str::to_string);
                self.idx += 1;
                if self.peek().is_some_and(|l| l.indent > base) {
                    let mut child = self.parse_block(base + 1)?;
                    attach_tag(&mut child, tag, number, base)?;
                    entries.push((key, child));
                } else {
                    let mut scalar = Scalar::null();
                    scalar.tag = tag;
                    entries.push((key, Node::Scalar(scalar)));
                }
            } else {
                self.idx += 1;
                entries.push((key, parse_inline(payload, tag, number, base + rest_col + tag_len)?));
            }
        }
        Ok(Node::Map(Map { tag: None, flow: false, entries, mark }))
    }
}

fn attach_tag(node: &mut Node, tag: Option<String>, line: u32, col: usize) -> Result<()> {
    if tag.is_none() {
        return Ok(());
    }
    match node {
        Node::Seq(seq) => {
            ensure!(
                seq.tag.is_none(),
                SyntaxSnafu { line, col: col as u32 + 1, reason: "node has two tags" }
            );
            seq.tag = tag;
        }
        Node::Map(map) => {
            ensure!(
                map.tag.is_none(),
                SyntaxSnafu { line, col: col as u32 + 1, reason: "node has two tags" }
            );
            map.tag = tag;
        }
        Node::Scalar(scalar) => {
            ensure!(
                scalar.tag.is_none(),
                SyntaxSnafu { line, col: col as u32 + 1, reason: "node has two tags" }
            );
            scalar.tag = tag;
        }
    }
    Ok(())
}

/// Strips a trailing comment, honoring quoted sections. A `#` only opens a
/// comment at the start of the content or after whitespace.
fn strip_comment(text: &str) -> &str {
    let bytes = text.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_double => escaped = true,
            b'"' if !in_single => in_double = !in_double,
            b'\'' if !in_double => in_single = !in_single,
            b'#' if !in_single && !in_double => {
                if i == 0 || bytes[i - 1] == b' ' {
                    return &text[..i];
                }
            }
            _ => {}
        }
    }
    text
}

/// Splits a leading `!tag` (or `!!tag`) token. Returns the tag, the rest, and
/// the number of characters consumed before the rest.
fn split_tag(text: &str) -> (Option<&str>, &str, usize) {
    if !text.starts_with('!') {
        return (None, text, 0);
    }
    match text.find(' ') {
        Some(space) => {
            let rest = text[space..].trim_start();
            (Some(&text[..space]), rest, text.len() - rest.len())
        }
        None => (Some(text), "", text.len()),
    }
}

/// Splits `key: value` / `key:` at the first unquoted colon-space. Returns the
/// key text, the value text (may be empty), and the value's column offset.
fn split_map_entry(text: &str) -> Option<(&str, &str, usize)> {
    let bytes = text.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    for i in 0..bytes.len() {
        if escaped {
            escaped = false;
            continue;
        }
        match bytes[i] {
            b'\\' if in_double => escaped = true,
            b'"' if !in_single => in_double = !in_double,
            b'\'' if !in_double => in_single = !in_single,
            b':' if !in_single && !in_double => {
                if i + 1 == bytes.len() {
                    return Some((text[..i].trim_end(), "", i + 1));
                }
                if bytes[i + 1] == b' ' {
                    let rest = text[i + 1..].trim_start();
                    return Some((text[..i].trim_end(), rest, text.len() - rest.len()));
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses one line's worth of value text: a flow container or a scalar, with
/// `tag` already split off by the caller.
fn parse_inline(text: &str, tag: Option<&str>, line: u32, col: usize) -> Result<Node> {
    if text.starts_with('[') || text.starts_with('{') {
        let mut flow = FlowParser { text: text.as_bytes(), pos: 0, line, col_base: col };
        let mut node = flow.parse_value(tag.map(str::to_string))?;
        flow.skip_spaces();
        ensure!(
            flow.pos == flow.text.len(),
            SyntaxSnafu {
                line,
                col: (col + flow.pos) as u32 + 1,
                reason: "trailing characters after flow container"
            }
        );
        if let Node::Seq(seq) = &mut node {
            seq.mark = Mark { line, col: col as u32 + 1 };
        } else if let Node::Map(map) = &mut node {
            map.mark = Mark { line, col: col as u32 + 1 };
        }
        Ok(node)
    } else {
        let mut scalar = parse_scalar_text(text, line, col as u32 + 1)?;
        ensure!(
            scalar.tag.is_none() || tag.is_none(),
            SyntaxSnafu { line, col: col as u32 + 1, reason: "node has two tags" }
        );
        if let Some(tag) = tag {
            scalar.tag = Some(tag.to_string());
        }
        scalar.mark = Mark { line, col: col as u32 + 1 };
        Ok(Node::Scalar(scalar))
    }
}

/// Parses a standalone scalar: optional tag, then a quoted or plain body.
fn parse_scalar_text(text: &str, line: u32, col: u32) -> Result<Scalar> {
    let (tag, body, _) = split_tag(text);
    let tag = tag.map(str::to_string);
    if body.starts_with('"') || body.starts_with('\'') {
        let (value, consumed) = unquote(body, line, col)?;
        ensure!(
            body[consumed..].trim().is_empty(),
            SyntaxSnafu { line, col, reason: "trailing characters after quoted scalar" }
        );
        Ok(Scalar { tag, value, quoted: true, mark: Mark { line, col } })
    } else {
        Ok(Scalar { tag, value: body.to_string(), quoted: false, mark: Mark { line, col } })
    }
}

/// Decodes a quoted scalar starting at `text[0]`; returns the value and the
/// number of bytes consumed including the closing quote.
fn unquote(text: &str, line: u32, col: u32) -> Result<(String, usize)> {
    let mut out = String::new();
    let mut chars = text.char_indices();
    let (_, quote) = chars.next().unwrap();
    if quote == '\'' {
        let mut iter = chars.peekable();
        while let Some((i, c)) = iter.next() {
            if c == '\'' {
                if iter.peek().is_some_and(|&(_, n)| n == '\'') {
                    out.push('\'');
                    iter.next();
                } else {
                    return Ok((out, i + 1));
                }
            } else {
                out.push(c);
            }
        }
        SyntaxSnafu { line, col, reason: "unterminated single-quoted scalar" }.fail()
    } else {
        let mut iter = chars;
        while let Some((i, c)) = iter.next() {
            match c {
                '"' => return Ok((out, i + 1)),
                '\\' => match iter.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, '0')) => out.push('\0'),
                    Some((_, '\\')) => out.push('\\'),
                    Some((_, '"')) => out.push('"'),
                    Some((_, 'u')) => {
                        let mut code = 0u32;
                        for _ in 0..4 {
                            let Some((_, h)) = iter.next() else {
                                return SyntaxSnafu {
                                    line,
                                    col,
                                    reason: "truncated unicode escape",
                                }
                                .fail();
                            };
                            let Some(digit) = h.to_digit(16) else {
                                return SyntaxSnafu {
                                    line,
                                    col,
                                    reason: "invalid unicode escape",
                                }
                                .fail();
                            };
                            code = code * 16 + digit;
                        }
                        let Some(c) = char::from_u32(code) else {
                            return SyntaxSnafu { line, col, reason: "invalid unicode escape" }
                                .fail();
                        };
                        out.push(c);
                    }
                    _ => return SyntaxSnafu { line, col, reason: "unknown escape sequence" }.fail(),
                },
                c => out.push(c),
            }
        }
        SyntaxSnafu { line, col, reason: "unterminated double-quoted scalar" }.fail()
    }
}

/// Character-level parser for single-line flow containers.
struct FlowParser<'a> {
    text: &'a [u8],
    pos: usize,
    line: u32,
    col_base: usize,
}

impl FlowParser<'_> {
    fn col(&self) -> u32 {
        (self.col_base + self.pos) as u32 + 1
    }

    fn skip_spaces(&mut self) {
        while self.pos < self.text.len() && self.text[self.pos] == b' ' {
            self.pos += 1;
        }
    }

    fn rest_str(&self) -> &str {
        core::str::from_utf8(&self.text[self.pos..]).unwrap_or("")
    }

    fn parse_value(&mut self, outer_tag: Option<String>) -> Result<Node> {
        self.skip_spaces();
        ensure!(
            self.pos < self.text.len(),
            SyntaxSnafu { line: self.line, col: self.col(), reason: "expected a flow value" }
        );
        // A tag may also appear inside the flow context.
        let tag = if outer_tag.is_some() {
            outer_tag
        } else if self.text[self.pos] == b'!' {
            let rest = self.rest_str();
            let end = rest.find([' ', ',', ']', '}']).unwrap_or(rest.len());
            let tag = rest[..end].to_string();
            self.pos += end;
            self.skip_spaces();
            Some(tag)
        } else {
            None
        };

        ensure!(
            self.pos < self.text.len(),
            SyntaxSnafu { line: self.line, col: self.col(), reason: "expected a flow value" }
        );
        match self.text[self.pos] {
            b'[' => self.parse_seq(tag),
            b'{' => self.parse_map(tag),
            b'"' | b'\'' => {
                let col = self.col();
                let (value, consumed) = unquote(self.rest_str(), self.line, col)?;
                self.pos += consumed;
                Ok(Node::Scalar(Scalar {
                    tag,
                    value,
                    quoted: true,
                    mark: Mark { line: self.line, col },
                }))
            }
            _ => {
                let col = self.col();
                let rest = self.rest_str();
                let end = rest.find([',', ']', '}', ':']).unwrap_or(rest.len());
                let value = rest[..end].trim().to_string();
                self.pos += end;
                Ok(Node::Scalar(Scalar {
                    tag,
                    value,
                    quoted: false,
                    mark: Mark { line: self.line, col },
                }))
            }
        }
    }

    fn parse_seq(&mut self, tag: Option<String>) -> Result<Node> {
        let mark = Mark { line: self.line, col: self.col() };
        self.pos += 1; // [
        let mut nodes = Vec::new();
        loop {
            self.skip_spaces();
            ensure!(
                self.pos < self.text.len(),
                SyntaxSnafu { line: self.line, col: self.col(), reason: "unterminated flow sequence" }
            );
            if self.text[self.pos] == b']' {
                self.pos += 1;
                break;
            }
            nodes.push(self.parse_value(None)?);
            self.skip_spaces();
            ensure!(
                self.pos < self.text.len(),
                SyntaxSnafu { line: self.line, col: self.col(), reason: "unterminated flow sequence" }
            );
            match self.text[self.pos] {
                b',' => self.pos += 1,
                b']' => {}
                _ => {
                    return SyntaxSnafu {
                        line: self.line,
                        col: self.col(),
                        reason: "expected ',' or ']' in flow sequence",
                    }
                    .fail();
                }
            }
        }
        Ok(Node::Seq(Seq { tag, flow: true, nodes, mark }))
    }

    fn parse_map(&mut self, tag: Option<String>) -> Result<Node> {
        let mark = Mark { line: self.line, col: self.col() };
        self.pos += 1; // {
        let mut entries = Vec::new();
        loop {
            self.skip_spaces();
            ensure!(
                self.pos < self.text.len(),
                SyntaxSnafu { line: self.line, col: self.col(), reason: "unterminated flow mapping" }
            );
            if self.text[self.pos] == b'}' {
                self.pos += 1;
                break;
            }
            let key_node = self.parse_value(None)?;
            let Node::Scalar(key) = key_node else {
                return SyntaxSnafu {
                    line: self.line,
                    col: self.col(),
                    reason: "flow mapping key must be a scalar",
                }
                .fail();
            };
            self.skip_spaces();
            ensure!(
                self.pos < self.text.len() && self.text[self.pos] == b':',
                SyntaxSnafu { line: self.line, col: self.col(), reason: "expected ':' in flow mapping" }
            );
            self.pos += 1;
            let value = self.parse_value(None)?;
            entries.push((key, value));
            self.skip_spaces();
            ensure!(
                self.pos < self.text.len(),
                SyntaxSnafu { line: self.line, col: self.col(), reason: "unterminated flow mapping" }
            );
            match self.text[self.pos] {
                b',' => self.pos += 1,
                b'}' => {}
                _ => {
                    return SyntaxSnafu {
                        line: self.line,
                        col: self.col(),
                        reason: "expected ',' or '}' in flow mapping",
                    }
                    .fail();
                }
            }
        }
        Ok(Node::Map(Map { tag, flow: true, entries, mark }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(node: &Node) -> &Scalar {
        match node {
            Node::Scalar(s) => s,
            _ => panic!("expected scalar, got {node:?}"),
        }
    }

    #[test]
    fn parses_block_map_with_tags() {
        let text = "key: !u 42\nother: plain\n";
        let Node::Map(map) = parse(text).unwrap() else { panic!() };
        assert_eq!(map.entries.len(), 2);
        let (k, v) = &map.entries[0];
        assert_eq!(k.value, "key");
        let v = scalar(v);
        assert_eq!(v.tag.as_deref(), Some("!u"));
        assert_eq!(v.value, "42");
    }

    #[test]
    fn parses_nested_blocks_and_sequences() {
        let text = "outer:\n  - 1\n  - inner: true\n    more: false\n  - [1.0, 2.0]\n";
        let Node::Map(map) = parse(text).unwrap() else { panic!() };
        let Node::Seq(seq) = &map.entries[0].1 else { panic!() };
        assert_eq!(seq.nodes.len(), 3);
        assert_eq!(scalar(&seq.nodes[0]).value, "1");
        let Node::Map(inner) = &seq.nodes[1] else { panic!() };
        assert_eq!(inner.entries.len(), 2);
        let Node::Seq(flow) = &seq.nodes[2] else { panic!() };
        assert!(flow.flow);
        assert_eq!(flow.nodes.len(), 2);
    }

    #[test]
    fn parses_tagged_container_after_key() {
        let text = "root: !list\n  lists: {}\n  objects: {}\n";
        let Node::Map(map) = parse(text).unwrap() else { panic!() };
        let Node::Map(inner) = &map.entries[0].1 else { panic!() };
        assert_eq!(inner.tag.as_deref(), Some("!list"));
        assert_eq!(inner.entries.len(), 2);
        let Node::Map(empty) = &inner.entries[0].1 else { panic!() };
        assert!(empty.entries.is_empty());
    }

    #[test]
    fn parses_root_tag_line() {
        let text = "!io\nversion: 10\ntype: oead_test\n";
        let Node::Map(map) = parse(text).unwrap() else { panic!() };
        assert_eq!(map.tag.as_deref(), Some("!io"));
        assert_eq!(map.entries.len(), 2);
    }

    #[test]
    fn quoted_scalars_keep_their_flag() {
        let text = "a: \"123\"\nb: 123\nc: !str64 \"\"\n";
        let Node::Map(map) = parse(text).unwrap() else { panic!() };
        assert!(scalar(&map.entries[0].1).quoted);
        assert!(!scalar(&map.entries[1].1).quoted);
        let c = scalar(&map.entries[2].1);
        assert!(c.quoted);
        assert_eq!(c.value, "");
        assert_eq!(c.tag.as_deref(), Some("!str64"));
    }

    #[test]
    fn double_quote_escapes_round_trip() {
        let original = "line\nbreak\t\"quote\"\\";
        let node = Node::Map(Map::block(
            None,
            vec![(Scalar::literal("k"), Node::Scalar(Scalar::string(original)))],
        ));
        let text = emit(&node);
        let Node::Map(map) = parse(&text).unwrap() else { panic!() };
        assert_eq!(scalar(&map.entries[0].1).value, original);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = "# header\n\nkey: 1 # trailing\nother: \"# not a comment\"\n";
        let Node::Map(map) = parse(text).unwrap() else { panic!() };
        assert_eq!(map.entries.len(), 2);
        assert_eq!(scalar(&map.entries[0].1).value, "1");
        assert_eq!(scalar(&map.entries[1].1).value, "# not a comment");
    }

    #[test]
    fn error_positions_are_reported() {
        let err = parse("key: [1, 2\n").unwrap_err();
        let Error::Syntax { line, col, .. } = err;
        assert_eq!(line, 1);
        assert!(col > 1);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        assert!(parse("a: 1\na: 2\n").is_err());
    }

    #[test]
    fn hash_tagged_keys_parse() {
        let text = "!h 0xDEADBEEF: !u 1\n";
        let Node::Map(map) = parse(text).unwrap() else { panic!() };
        let (k, _) = &map.entries[0];
        assert_eq!(k.tag.as_deref(), Some("!h"));
        assert_eq!(k.value, "0xDEADBEEF");
    }

    #[test]
    fn emit_parse_round_trips_structures() {
        let node = Node::Map(Map::block(
            None,
            vec![
                (Scalar::literal("ints"), Node::Seq(Seq::block(vec![
                    Node::Scalar(Scalar::literal("1")),
                    Node::Scalar(Scalar::tagged("!u", "4294967295")),
                ]))),
                (Scalar::literal("vec"), Node::Seq(Seq::flow(Some("!vec3".into()), vec![
                    Node::Scalar(Scalar::literal("0.0")),
                    Node::Scalar(Scalar::literal("1.5")),
                    Node::Scalar(Scalar::literal("-2.0")),
                ]))),
                (Scalar::literal("empty"), Node::Map(Map::block(Some("!obj".into()), vec![]))),
                (Scalar::literal("name"), Node::Scalar(Scalar::string("true"))),
            ],
        ));
        let text = emit(&node);
        let Node::Map(map) = parse(&text).unwrap() else { panic!() };
        assert_eq!(map.entries.len(), 4);
        let Node::Seq(vec3) = &map.entries[1].1 else { panic!() };
        assert_eq!(vec3.tag.as_deref(), Some("!vec3"));
        // The string "true" must come back quoted, not as a boolean.
        assert!(scalar(&map.entries[3].1).quoted);
        let Node::Map(empty) = &map.entries[2].1 else { panic!() };
        assert_eq!(empty.tag.as_deref(), Some("!obj"));
        assert!(empty.entries.is_empty());
    }

    #[test]
    fn float_helpers_round_trip() {
        assert_eq!(format_f32(1.0), "1.0");
        assert_eq!(format_f32(f32::INFINITY), ".inf");
        assert_eq!(parse_f32(".inf"), Some(f32::INFINITY));
        assert_eq!(parse_f32("3.5"), Some(3.5));
        assert_eq!(parse_unsigned("0xDEADBEEF"), Some(0xDEADBEEF));
        assert_eq!(parse_unsigned("42"), Some(42));
    }
}
