use std::fmt;

/// Zero-based (row, column) of the first character of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub row: usize,
    pub col: usize,
}

impl Location {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub loc: Location,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: `{}`", self.loc, self.text)
    }
}

#[inline(always)]
fn is_delimiter(c: char) -> bool {
    matches!(c, ' ' | ':' | ',')
}

/// Splits `source` into tokens. Never fails: deciding whether a token means
/// anything is left to the decoder.
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    for (row, line) in source.split('\n').enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        tokenize_line(row, line, &mut tokens);
    }
    tokens
}

fn tokenize_line<'a>(row: usize, line: &'a str, tokens: &mut Vec<Token<'a>>) {
    // (byte offset, column) of the first character of the pending token
    let mut pending: Option<(usize, usize)> = None;
    for (col, (offset, c)) in line.char_indices().enumerate() {
        if is_delimiter(c) {
            if let Some((start, start_col)) = pending.take() {
                tokens.push(Token {
                    text: &line[start..offset],
                    loc: Location::new(row, start_col),
                });
            }
        } else if pending.is_none() {
            pending = Some((offset, col));
        }
    }
    if let Some((start, start_col)) = pending {
        tokens.push(Token {
            text: &line[start..],
            loc: Location::new(row, start_col),
        });
    }
}
