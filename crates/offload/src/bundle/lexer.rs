//! A small JavaScript scanner.
//!
//! The bundler does not need a syntax tree, only to know which parts of a
//! source file are code and which are comments or literals, so that import
//! statements and `require` calls are never matched inside a string and the
//! minifier never touches a literal.

/// What a span of source text is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Code,
    LineComment,
    BlockComment,
    /// String, template or regular expression literal.
    Literal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub kind: SpanKind,
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn is_comment(&self) -> bool {
        matches!(self.kind, SpanKind::LineComment | SpanKind::BlockComment)
    }
}

/// Keywords after which a `/` starts a regular expression.
const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "case", "do", "else", "in", "of", "new", "delete", "void",
    "throw", "yield", "await",
];

/// Split `source` into contiguous spans covering every byte.
pub fn scan(source: &str) -> Vec<Span> {
    let bytes = source.as_bytes();
    let mut spans = Vec::new();
    let mut code_start = 0;
    let mut last_significant: Option<usize> = None;
    let mut i = 0;

    while i < bytes.len() {
        let next = bytes.get(i + 1).copied();
        let (kind, end) = match bytes[i] {
            b'\'' | b'"' => (SpanKind::Literal, skip_string(bytes, i)),
            b'`' => (SpanKind::Literal, skip_template(bytes, i)),
            b'/' if next == Some(b'/') => (SpanKind::LineComment, skip_line(bytes, i)),
            b'/' if next == Some(b'*') => (SpanKind::BlockComment, skip_block(bytes, i)),
            b'/' if regex_allowed(bytes, last_significant) => {
                (SpanKind::Literal, skip_regex(bytes, i))
            }
            b => {
                if !b.is_ascii_whitespace() {
                    last_significant = Some(i);
                }
                i += 1;
                continue;
            }
        };

        if code_start < i {
            spans.push(Span {
                kind: SpanKind::Code,
                start: code_start,
                end: i,
            });
        }
        spans.push(Span {
            kind,
            start: i,
            end,
        });
        if kind == SpanKind::Literal {
            last_significant = Some(end - 1);
        }
        i = end;
        code_start = end;
    }

    if code_start < bytes.len() {
        spans.push(Span {
            kind: SpanKind::Code,
            start: code_start,
            end: bytes.len(),
        });
    }

    spans
}

/// Whether byte `offset` falls inside a code span.
pub fn is_code(spans: &[Span], offset: usize) -> bool {
    let index = spans.partition_point(|span| span.end <= offset);
    spans
        .get(index)
        .is_some_and(|span| span.kind == SpanKind::Code && span.start <= offset)
}

/// The span starting exactly at `offset`.
pub fn span_at(spans: &[Span], offset: usize) -> Option<&Span> {
    spans
        .binary_search_by_key(&offset, |span| span.start)
        .ok()
        .map(|index| &spans[index])
}

/// Whether a statement may begin at `offset` of comment-masked `source`.
///
/// True at the start of input, after `;`, `{` or `}`, and after a line break
/// that does not follow a member access.
pub fn statement_boundary(source: &str, offset: usize) -> bool {
    let mut newline = false;
    for &b in source.as_bytes()[..offset].iter().rev() {
        match b {
            b'\n' | b'\r' => newline = true,
            b' ' | b'\t' => {}
            b'.' => return false,
            b';' | b'{' | b'}' => return true,
            _ => return newline,
        }
    }
    true
}

/// Replace comments with spaces, keeping newlines and byte offsets intact.
pub fn mask_comments(source: &str, spans: &[Span]) -> String {
    let mut out = String::with_capacity(source.len());
    for span in spans {
        let text = &source[span.start..span.end];
        if span.is_comment() {
            for c in text.chars() {
                if c == '\n' {
                    out.push('\n');
                } else {
                    out.extend(std::iter::repeat_n(' ', c.len_utf8()));
                }
            }
        } else {
            out.push_str(text);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gap {
    None,
    Space,
    Newline,
}

/// Strip comments and collapse whitespace.
///
/// Line breaks survive (collapsed to one) so automatic semicolon insertion
/// sees the same statement boundaries. Literals are copied untouched.
pub fn minify(source: &str) -> String {
    let spans = scan(source);
    let mut out = String::with_capacity(source.len() / 2);
    let mut gap = Gap::None;

    for span in &spans {
        let text = &source[span.start..span.end];
        match span.kind {
            SpanKind::LineComment => widen(&mut gap, Gap::Space),
            SpanKind::BlockComment => {
                widen(&mut gap, if text.contains('\n') { Gap::Newline } else { Gap::Space })
            }
            SpanKind::Literal => {
                if let Some(first) = text.chars().next() {
                    flush_gap(&mut out, &mut gap, first);
                }
                out.push_str(text);
            }
            SpanKind::Code => {
                for c in text.chars() {
                    if c == '\n' {
                        widen(&mut gap, Gap::Newline);
                    } else if c.is_whitespace() {
                        widen(&mut gap, Gap::Space);
                    } else {
                        flush_gap(&mut out, &mut gap, c);
                        out.push(c);
                    }
                }
            }
        }
    }

    out
}

fn widen(gap: &mut Gap, to: Gap) {
    if to == Gap::Newline || *gap == Gap::None {
        *gap = to;
    }
}

fn flush_gap(out: &mut String, gap: &mut Gap, next: char) {
    if let Some(last) = out.chars().next_back() {
        match *gap {
            Gap::Newline => out.push('\n'),
            Gap::Space if needs_space(last, next) => out.push(' '),
            _ => {}
        }
    }
    *gap = Gap::None;
}

/// Whether dropping the whitespace between `a` and `b` would change meaning.
fn needs_space(a: char, b: char) -> bool {
    (is_word(a) && is_word(b))
        || (a == b && (a == '+' || a == '-'))
        || a == '/'
        || b == '/'
        || (a.is_ascii_digit() && b == '.')
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || !c.is_ascii()
}

fn regex_allowed(bytes: &[u8], last_significant: Option<usize>) -> bool {
    let Some(last) = last_significant else {
        return true;
    };

    let c = bytes[last];
    if b"(,=:[!&|?{};+-*%<>~^".contains(&c) {
        return true;
    }
    if !(c.is_ascii_alphanumeric() || c == b'_' || c == b'$') {
        return false;
    }

    let start = bytes[..=last]
        .iter()
        .rposition(|b| !(b.is_ascii_alphanumeric() || *b == b'_' || *b == b'$'))
        .map_or(0, |p| p + 1);
    let word = std::str::from_utf8(&bytes[start..=last]).unwrap_or_default();
    REGEX_KEYWORDS.contains(&word)
}

fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b if b == quote => return j + 1,
            // Unterminated; stop at the line end.
            b'\n' => return j,
            _ => j += 1,
        }
    }
    bytes.len()
}

fn skip_template(bytes: &[u8], start: usize) -> usize {
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'`' => return j + 1,
            b'$' if bytes.get(j + 1) == Some(&b'{') => j = skip_substitution(bytes, j + 2),
            _ => j += 1,
        }
    }
    bytes.len()
}

/// Skip a `${ ... }` body, returning the offset after its closing brace.
fn skip_substitution(bytes: &[u8], start: usize) -> usize {
    let mut depth = 1;
    let mut j = start;
    while j < bytes.len() {
        match bytes[j] {
            b'{' => {
                depth += 1;
                j += 1;
            }
            b'}' => {
                depth -= 1;
                j += 1;
                if depth == 0 {
                    return j;
                }
            }
            b'\'' | b'"' => j = skip_string(bytes, j),
            b'`' => j = skip_template(bytes, j),
            b'/' if bytes.get(j + 1) == Some(&b'/') => j = skip_line(bytes, j),
            b'/' if bytes.get(j + 1) == Some(&b'*') => j = skip_block(bytes, j),
            _ => j += 1,
        }
    }
    bytes.len()
}

fn skip_line(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(bytes.len(), |p| start + p)
}

fn skip_block(bytes: &[u8], start: usize) -> usize {
    bytes[start + 2..]
        .windows(2)
        .position(|w| w == b"*/")
        .map_or(bytes.len(), |p| start + 2 + p + 2)
}

fn skip_regex(bytes: &[u8], start: usize) -> usize {
    let mut in_class = false;
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'[' => {
                in_class = true;
                j += 1;
            }
            b']' => {
                in_class = false;
                j += 1;
            }
            b'/' if !in_class => {
                j += 1;
                while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
                    j += 1;
                }
                return j;
            }
            b'\n' => return j,
            _ => j += 1,
        }
    }
    bytes.len()
}
