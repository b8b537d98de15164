//! Turns one source file into the body of a registry function.
//!
//! ES modules get their `import`/`export` statements rewritten:
//!
//! ```text
//! import X, { a as b } from "dep";    var __i0 = __import("dep");
//! export const c = 1;           =>    var X = __importDefault(__i0);
//! export default c + 1;               var b = __i0.a;
//!                                     const c = 1;
//!                                     var __exportDefault = c + 1;
//! ```
//!
//! with a single `__export(exports, {...})` call at the top defining a getter
//! per export. CommonJS files keep their body and find dependencies through
//! `require("…")` calls; JSON files become `module.exports = …`.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::lexer::{self, Span};

/// Candidate statement keywords; boundaries are checked by the lexer.
static STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(import|export)\b").expect("valid regex"));

/// `require("literal")` calls.
static REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\brequire\s*\(\s*(?:'([^'\\\n]*)'|"([^"\\\n]*)")\s*\)"#).expect("valid regex")
});

/// Local name bound to an anonymous `export default` value.
const DEFAULT_BINDING: &str = "__exportDefault";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFormat {
    Esm,
    CommonJs,
    Json,
}

#[derive(Debug, thiserror::Error)]
#[error("{message} (byte {offset})")]
pub struct SyntaxError {
    pub offset: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// One parsed `import`/`export` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Statement {
    Import {
        specifier: String,
        default: Option<String>,
        namespace: Option<String>,
        /// (imported, local)
        named: Vec<(String, String)>,
    },
    ExportFrom {
        specifier: String,
        /// (imported, exported)
        names: Vec<(String, String)>,
    },
    ExportAll {
        specifier: String,
        /// `export * as ns from`
        alias: Option<String>,
    },
    /// `export { a, b as c }`: (local, exported)
    ExportLocal(Vec<(String, String)>),
    /// `export const a = ...`, `export function f() {}`
    ExportDeclaration(Vec<String>),
    /// `export default function f() {}`, `export default class C {}`
    ExportDefaultNamed(String),
    /// `export default <expression>`
    ExportDefault,
}

/// A statement and the source range it was parsed from.
#[derive(Debug, Clone)]
struct Located {
    statement: Statement,
    start: usize,
    end: usize,
}

/// A parsed module, ready to be rendered once its dependencies have ids.
#[derive(Debug, Clone)]
pub struct ParsedModule {
    pub format: ModuleFormat,
    /// Dependency specifiers in source order, without duplicates.
    pub dependencies: Vec<String>,
    statements: Vec<Located>,
}

impl ParsedModule {
    pub fn parse(path: &Path, source: &str) -> Result<Self, SyntaxError> {
        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str::<serde_json::Value>(source)
                .map_err(|e| SyntaxError::new(0, format!("invalid JSON: {e}")))?;
            return Ok(Self {
                format: ModuleFormat::Json,
                dependencies: Vec::new(),
                statements: Vec::new(),
            });
        }

        let spans = lexer::scan(source);
        let masked = lexer::mask_comments(source, &spans);
        let statements = parse_statements(&masked, &spans)?;

        if statements.is_empty() {
            return Ok(Self {
                format: ModuleFormat::CommonJs,
                dependencies: requires(source, &spans),
                statements,
            });
        }

        let mut dependencies = Vec::new();
        for located in &statements {
            let specifier = match &located.statement {
                Statement::Import { specifier, .. }
                | Statement::ExportFrom { specifier, .. }
                | Statement::ExportAll { specifier, .. } => specifier,
                _ => continue,
            };
            if !dependencies.contains(specifier) {
                dependencies.push(specifier.clone());
            }
        }

        Ok(Self {
            format: ModuleFormat::Esm,
            dependencies,
            statements,
        })
    }

    /// Render the registry function body.
    pub fn render(&self, source: &str, strict: bool) -> Result<String, SyntaxError> {
        match self.format {
            ModuleFormat::Json => {
                let value: serde_json::Value = serde_json::from_str(source)
                    .map_err(|e| SyntaxError::new(0, format!("invalid JSON: {e}")))?;
                Ok(format!("module.exports = {};\n", value))
            }
            ModuleFormat::CommonJs => {
                let mut body = source.to_string();
                if !body.ends_with('\n') {
                    body.push('\n');
                }
                Ok(body)
            }
            ModuleFormat::Esm => Ok(self.render_esm(source, strict)),
        }
    }

    fn render_esm(&self, source: &str, strict: bool) -> String {
        let mut bindings: Vec<String> = Vec::new();
        let mut getters: Vec<(String, String)> = Vec::new();
        let mut reexports: Vec<String> = Vec::new();
        let mut edits: Vec<(usize, usize, String)> = Vec::new();

        let mut import_vars: Vec<(String, String)> = Vec::new();
        let mut import_var = |specifier: &str, bindings: &mut Vec<String>| -> String {
            if let Some((_, var)) = import_vars.iter().find(|(s, _)| s == specifier) {
                return var.clone();
            }
            let var = format!("__i{}", import_vars.len());
            bindings.push(format!("var {} = __import({});", var, quote(specifier)));
            import_vars.push((specifier.to_string(), var.clone()));
            var
        };

        for located in &self.statements {
            let replacement = match &located.statement {
                Statement::Import {
                    specifier,
                    default,
                    namespace,
                    named,
                } => {
                    let var = import_var(specifier, &mut bindings);
                    if let Some(local) = default {
                        bindings.push(format!("var {} = __importDefault({});", local, var));
                    }
                    if let Some(local) = namespace {
                        bindings.push(format!("var {} = {};", local, var));
                    }
                    for (imported, local) in named {
                        bindings.push(format!("var {} = {};", local, member(&var, imported)));
                    }
                    String::new()
                }
                Statement::ExportFrom { specifier, names } => {
                    let var = import_var(specifier, &mut bindings);
                    for (imported, exported) in names {
                        getters.push((exported.clone(), member(&var, imported)));
                    }
                    String::new()
                }
                Statement::ExportAll { specifier, alias } => {
                    let var = import_var(specifier, &mut bindings);
                    match alias {
                        Some(alias) => getters.push((alias.clone(), var)),
                        None => reexports.push(format!("__reexport(exports, {});", var)),
                    }
                    String::new()
                }
                Statement::ExportLocal(names) => {
                    for (local, exported) in names {
                        getters.push((exported.clone(), local.clone()));
                    }
                    String::new()
                }
                Statement::ExportDeclaration(names) => {
                    for name in names {
                        getters.push((name.clone(), name.clone()));
                    }
                    // Only the `export` keyword goes.
                    edits.push((located.start, located.end, String::new()));
                    continue;
                }
                Statement::ExportDefaultNamed(name) => {
                    getters.push(("default".to_string(), name.clone()));
                    edits.push((located.start, located.end, String::new()));
                    continue;
                }
                Statement::ExportDefault => {
                    getters.push(("default".to_string(), DEFAULT_BINDING.to_string()));
                    edits.push((
                        located.start,
                        located.end,
                        format!("var {} = ", DEFAULT_BINDING),
                    ));
                    continue;
                }
            };
            edits.push((located.start, located.end, replacement));
        }

        let mut out = String::with_capacity(source.len() + 256);
        if strict {
            out.push_str("\"use strict\";\n");
        }
        if !getters.is_empty() {
            let entries: Vec<String> = getters
                .iter()
                .map(|(name, value)| {
                    format!("{}: function () {{ return {}; }}", quote(name), value)
                })
                .collect();
            out.push_str(&format!("__export(exports, {{ {} }});\n", entries.join(", ")));
        }
        for binding in &bindings {
            out.push_str(binding);
            out.push('\n');
        }
        for reexport in &reexports {
            out.push_str(reexport);
            out.push('\n');
        }

        let mut cursor = 0;
        for (start, end, replacement) in &edits {
            out.push_str(&source[cursor..*start]);
            out.push_str(replacement);
            cursor = *end;
        }
        out.push_str(&source[cursor..]);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

fn member(object: &str, name: &str) -> String {
    if name == "default" {
        format!("__importDefault({})", object)
    } else {
        format!("{}.{}", object, name)
    }
}

/// `require("…")` specifiers made from code, in source order.
fn requires(source: &str, spans: &[Span]) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for captures in REQUIRE.captures_iter(source) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if !lexer::is_code(spans, whole.start()) {
            continue;
        }
        // `obj.require(...)` is somebody else's function.
        let preceding = source[..whole.start()].trim_end();
        if preceding.ends_with('.') {
            continue;
        }
        let Some(specifier) = captures.get(1).or_else(|| captures.get(2)) else {
            continue;
        };
        let specifier = specifier.as_str().to_string();
        if !found.contains(&specifier) {
            found.push(specifier);
        }
    }
    found
}

fn parse_statements(masked: &str, spans: &[Span]) -> Result<Vec<Located>, SyntaxError> {
    let mut statements = Vec::new();

    for captures in STATEMENT.captures_iter(masked) {
        let Some(keyword) = captures.get(1) else {
            continue;
        };
        if !lexer::is_code(spans, keyword.start())
            || !lexer::statement_boundary(masked, keyword.start())
            || statements.last().is_some_and(|last: &Located| keyword.start() < last.end)
        {
            continue;
        }

        let mut cursor = Cursor::new(masked, spans, keyword.end());

        // `import(...)`, `import.meta` and `{ export: 1 }` are not statements.
        cursor.skip_ws();
        if matches!(
            cursor.peek(),
            Some(b'(' | b'.' | b':' | b'=' | b',' | b')' | b';')
        ) {
            continue;
        }

        let located = if keyword.as_str() == "import" {
            parse_import(&mut cursor, keyword.start())?
        } else {
            parse_export(&mut cursor, keyword.start())?
        };
        statements.push(located);
    }

    Ok(statements)
}

fn parse_import(cursor: &mut Cursor, start: usize) -> Result<Located, SyntaxError> {
    cursor.skip_ws();
    if cursor.at_string() {
        let specifier = cursor.string()?;
        return Ok(Located {
            statement: Statement::Import {
                specifier,
                default: None,
                namespace: None,
                named: Vec::new(),
            },
            start,
            end: cursor.end_statement(),
        });
    }

    let mut default = None;
    let mut namespace = None;
    let mut named = Vec::new();

    loop {
        cursor.skip_ws();
        if cursor.eat(b'*') {
            cursor.expect_word("as")?;
            namespace = Some(cursor.expect_ident()?);
        } else if cursor.eat(b'{') {
            named = cursor.name_list()?;
        } else {
            default = Some(cursor.expect_ident()?);
        }
        if !cursor.eat(b',') {
            break;
        }
    }

    cursor.expect_word("from")?;
    let specifier = cursor.string()?;

    Ok(Located {
        statement: Statement::Import {
            specifier,
            default,
            namespace,
            named,
        },
        start,
        end: cursor.end_statement(),
    })
}

fn parse_export(cursor: &mut Cursor, start: usize) -> Result<Located, SyntaxError> {
    cursor.skip_ws();

    if cursor.eat(b'*') {
        let alias = if cursor.eat_word("as") {
            Some(cursor.expect_ident()?)
        } else {
            None
        };
        cursor.expect_word("from")?;
        let specifier = cursor.string()?;
        return Ok(Located {
            statement: Statement::ExportAll { specifier, alias },
            start,
            end: cursor.end_statement(),
        });
    }

    if cursor.eat(b'{') {
        let names = cursor.name_list()?;
        let statement = if cursor.eat_word("from") {
            Statement::ExportFrom {
                specifier: cursor.string()?,
                names,
            }
        } else {
            Statement::ExportLocal(names)
        };
        return Ok(Located {
            statement,
            start,
            end: cursor.end_statement(),
        });
    }

    if cursor.eat_word("default") {
        let after_default = cursor.pos;
        let mut ahead = cursor.clone();
        ahead.eat_word("async");
        let named = if ahead.eat_word("function") {
            ahead.eat(b'*');
            ahead.ident()
        } else if ahead.eat_word("class") {
            ahead.ident().filter(|name| name != "extends")
        } else {
            None
        };

        let statement = match named {
            Some(name) => Statement::ExportDefaultNamed(name),
            None => Statement::ExportDefault,
        };
        return Ok(Located {
            statement,
            start,
            end: cursor.skip_ws_from(after_default),
        });
    }

    let keyword_end = cursor.pos;
    let names = declaration_names(cursor)?;
    Ok(Located {
        statement: Statement::ExportDeclaration(names),
        start,
        end: cursor.skip_ws_from(keyword_end),
    })
}

/// Names bound by the declaration following `export`.
fn declaration_names(cursor: &mut Cursor) -> Result<Vec<String>, SyntaxError> {
    let mut ahead = cursor.clone();
    ahead.eat_word("async");
    if ahead.eat_word("function") {
        ahead.eat(b'*');
        return Ok(vec![ahead.expect_ident()?]);
    }
    if ahead.eat_word("class") {
        return Ok(vec![ahead.expect_ident()?]);
    }

    let mut ahead = cursor.clone();
    if !(ahead.eat_word("const") || ahead.eat_word("let") || ahead.eat_word("var")) {
        return Err(SyntaxError::new(cursor.pos, "unsupported export form"));
    }

    let mut names = Vec::new();
    loop {
        ahead.skip_ws();
        if matches!(ahead.peek(), Some(b'{') | Some(b'[')) {
            return Err(SyntaxError::new(
                ahead.pos,
                "destructuring exports are not supported",
            ));
        }
        names.push(ahead.expect_ident()?);
        if !ahead.skip_initializer() {
            break;
        }
    }
    Ok(names)
}

/// A hand-written scanner over comment-masked source.
#[derive(Debug, Clone)]
struct Cursor<'a> {
    text: &'a str,
    bytes: &'a [u8],
    spans: &'a [Span],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str, spans: &'a [Span], pos: usize) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            spans,
            pos,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn skip_ws_from(&self, pos: usize) -> usize {
        let mut pos = pos;
        while self.bytes.get(pos).is_some_and(|b| b.is_ascii_whitespace()) {
            pos += 1;
        }
        pos
    }

    fn eat(&mut self, byte: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        self.skip_ws();
        let end = self.pos + word.len();
        let matches = self.text.get(self.pos..end) == Some(word)
            && !self.bytes.get(end).copied().is_some_and(is_ident_byte);
        if matches {
            self.pos = end;
        }
        matches
    }

    fn expect_word(&mut self, word: &str) -> Result<(), SyntaxError> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(SyntaxError::new(self.pos, format!("expected `{}`", word)))
        }
    }

    fn ident(&mut self) -> Option<String> {
        self.skip_ws();
        let start = self.pos;
        let first = self.peek()?;
        if !(is_ident_byte(first) && !first.is_ascii_digit()) {
            return None;
        }
        while self.peek().is_some_and(is_ident_byte) {
            self.pos += 1;
        }
        Some(self.text[start..self.pos].to_string())
    }

    fn expect_ident(&mut self) -> Result<String, SyntaxError> {
        let pos = self.pos;
        self.ident()
            .ok_or_else(|| SyntaxError::new(pos, "expected an identifier"))
    }

    fn at_string(&mut self) -> bool {
        self.skip_ws();
        matches!(self.peek(), Some(b'\'') | Some(b'"'))
    }

    /// A quoted string literal, with simple escapes decoded.
    fn string(&mut self) -> Result<String, SyntaxError> {
        if !self.at_string() {
            return Err(SyntaxError::new(self.pos, "expected a module specifier"));
        }
        let end = lexer::span_at(self.spans, self.pos)
            .map(|span| span.end)
            .ok_or_else(|| SyntaxError::new(self.pos, "unterminated string"))?;
        let raw = &self.text[self.pos + 1..end.saturating_sub(1).max(self.pos + 1)];

        let mut value = String::with_capacity(raw.len());
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    value.push(escaped);
                }
            } else {
                value.push(c);
            }
        }

        self.pos = end;
        Ok(value)
    }

    /// `name [as alias], ...}` after the opening brace.
    fn name_list(&mut self) -> Result<Vec<(String, String)>, SyntaxError> {
        let mut names = Vec::new();
        loop {
            if self.eat(b'}') {
                return Ok(names);
            }
            let name = self.expect_ident()?;
            let alias = if self.eat_word("as") {
                self.expect_ident()?
            } else {
                name.clone()
            };
            names.push((name, alias));
            if !self.eat(b',') {
                if self.eat(b'}') {
                    return Ok(names);
                }
                return Err(SyntaxError::new(self.pos, "expected `,` or `}`"));
            }
        }
    }

    /// Offset just past the statement, including a trailing `;`.
    fn end_statement(&mut self) -> usize {
        let mut ahead = self.pos;
        while self
            .bytes
            .get(ahead)
            .is_some_and(|b| *b == b' ' || *b == b'\t')
        {
            ahead += 1;
        }
        if self.bytes.get(ahead) == Some(&b';') {
            self.pos = ahead + 1;
        }
        self.pos
    }

    /// Skip a declarator's initializer. Returns true when a `,` follows,
    /// meaning another declarator comes next.
    fn skip_initializer(&mut self) -> bool {
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            if let Some(span) = lexer::span_at(self.spans, self.pos) {
                if span.kind == lexer::SpanKind::Literal {
                    self.pos = span.end;
                    continue;
                }
            }
            match b {
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => {
                    if depth == 0 {
                        return false;
                    }
                    depth -= 1;
                }
                b',' if depth == 0 => {
                    self.pos += 1;
                    return true;
                }
                b';' if depth == 0 => return false,
                b'\n' if depth == 0 && self.ends_line() => return false,
                _ => {}
            }
            self.pos += 1;
        }
        false
    }

    /// Whether the line break at the cursor ends the statement.
    fn ends_line(&self) -> bool {
        const CONTINUES: &[u8] = b",=+-*/%&|^!?:<>(.";

        let before = self.text[..self.pos].trim_end();
        if before
            .as_bytes()
            .last()
            .is_some_and(|b| CONTINUES.contains(b))
        {
            return false;
        }
        let after = self.text[self.pos..].trim_start();
        !after
            .as_bytes()
            .first()
            .is_some_and(|b| CONTINUES.contains(b) && *b != b'!' && *b != b'(')
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || !b.is_ascii()
}
