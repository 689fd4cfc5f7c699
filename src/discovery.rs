//! Subject discovery and output naming.

use std::path::{Path, PathBuf};

/// Length of the participant identifier taken from a file name.
pub const PARTICIPANT_ID_LEN: usize = 4;

/// Suffix of every feature table file name.
pub const OUTPUT_SUFFIX: &str = "_processed.csv";

/// List the files in `dir` whose name matches `pattern`, sorted by path.
pub fn discover_subjects(dir: &Path, pattern: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| wildcard_match(pattern, n))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Participant identifier of a subject file: the first four characters of
/// the file name before its first `.`.
///
/// `S002_whole_df.csv` becomes `S002`.
pub fn participant_id(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    let stem = name.split('.').next().unwrap_or("");
    stem.chars().take(PARTICIPANT_ID_LEN).collect()
}

/// Location of the feature table for `participant_id`.
pub fn output_path(output_dir: &Path, participant_id: &str) -> PathBuf {
    output_dir.join(format!("{participant_id}{OUTPUT_SUFFIX}"))
}

/// One element of a compiled file-name pattern.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(char),
    /// `?`
    AnyChar,
    /// `*`
    AnyRun,
    /// `[...]` or `[!...]`, as inclusive ranges
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Token {
    fn matches(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar => true,
            Token::AnyRun => false,
            Token::Class { negated, ranges } => {
                ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi) != *negated
            }
        }
    }
}

fn compile(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => tokens.push(Token::AnyRun),
            '?' => tokens.push(Token::AnyChar),
            '[' => match parse_class(&chars[i + 1..]) {
                Some((token, consumed)) => {
                    tokens.push(token);
                    i += consumed;
                }
                // Unclosed `[` is an ordinary character
                None => tokens.push(Token::Literal('[')),
            },
            c => tokens.push(Token::Literal(c)),
        }
        i += 1;
    }
    tokens
}

/// Parse the body of a character class following `[`.
///
/// Returns the class and the number of characters consumed, closing `]`
/// included. A `]` right after the opening `[` (or `[!`) is a member.
fn parse_class(body: &[char]) -> Option<(Token, usize)> {
    let negated = body.first() == Some(&'!');
    let mut i = usize::from(negated);
    let mut ranges = Vec::new();

    loop {
        let c = *body.get(i)?;
        if c == ']' && !(ranges.is_empty() && i == usize::from(negated)) {
            return Some((Token::Class { negated, ranges }, i + 1));
        }
        match (body.get(i + 1), body.get(i + 2)) {
            (Some(&'-'), Some(&hi)) if hi != ']' => {
                ranges.push((c, hi));
                i += 3;
            }
            _ => {
                ranges.push((c, c));
                i += 1;
            }
        }
    }
}

/// Match `name` against a shell-style pattern: `*` (any run of characters),
/// `?` (exactly one character) and `[...]` classes with ranges and `!`
/// negation.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern = compile(pattern);
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    // Position of the last `*` and the name index it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some(Token::AnyRun) => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(token) if token.matches(name[n]) => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star, absorbed)) => {
                    p = star + 1;
                    n = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|t| *t == Token::AnyRun)
}
