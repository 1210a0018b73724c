//! Text-rule fingerprints for MySQL-like dialects
//!
//! The rules run in a fixed order. Later rules assume earlier ones already
//! removed comments and collapsed literals, so reordering changes results.
//!
//! 1. Tool signatures (`mysqldump`, `percona-toolkit`) map to fixed names
//! 2. `CALL proc(...)` becomes `call proc`
//! 3. Multi-row `INSERT`/`REPLACE` keeps only its first value tuple
//! 4. Comments are stripped, except `/*!` optimizer hints
//! 5. `USE db` becomes `use ?`
//! 6. String literals become `?`
//! 7. Boolean literals become `?`
//! 8. Numeric literals (hex, signed, decimal) become `?`
//! 9. Whitespace is collapsed and everything lower-cased
//! 10. `null` becomes `?`
//! 11. `IN (?, ?, ...)` / `VALUES (...)` lists become `(?+)`
//! 12. Repeated `select ... union select ...` collapses to one select
//! 13. `limit ?, ?` and `limit ? offset ?` become `limit ?`
//! 14. `asc` qualifiers are dropped when the query has an `order by`

use regex::Regex;
use std::sync::LazyLock;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static fingerprint pattern")
}

static MYSQLDUMP: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\ASELECT /\*!40001 SQL_NO_CACHE \*/ \* FROM `"));
static PERCONA_TOOLKIT: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\*\w+\.\w+:[0-9]/[0-9]\*/"));
static CALL: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)\A\s*(call\s+\S+)\("));
static MULTI_ROW_INSERT: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?is)\A((?:INSERT|REPLACE)(?: IGNORE)?\s+INTO.+?VALUES\s*\(.*?\))\s*,\s*\(")
});
static BLOCK_COMMENT: LazyLock<Regex> = LazyLock::new(|| compile(r"(?s)/\*[^!].*?\*/"));
static LINE_COMMENT: LazyLock<Regex> = LazyLock::new(|| compile(r"(?:--|#)[^\r\n]*"));
static USE_DATABASE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)\Ause \S+\n?\z"));
static ESCAPED_QUOTE: LazyLock<Regex> = LazyLock::new(|| compile(r#"\\["']"#));
static DOUBLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| compile(r#"(?s)".*?""#));
static SINGLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| compile(r"(?s)'.*?'"));
static BOOLEAN: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)\btrue\b|\bfalse\b"));
static NUMBER: LazyLock<Regex> = LazyLock::new(|| compile(r"[0-9+-][0-9a-f.x+-]*"));
static NUMBER_ARTIFACT: LazyLock<Regex> = LazyLock::new(|| compile(r"[xb.+-]\?"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| compile(r"[ \n\t\r\f]+"));
static NULL: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)\bnull\b"));
static VALUE_LIST: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b(in|values?)(?:[\s,]*\([\s?,]*\))+"));
static SELECT_HEAD: LazyLock<Regex> = LazyLock::new(|| compile(r"\bselect\s"));
static LIMIT: LazyLock<Regex> = LazyLock::new(|| compile(r"\blimit \?(?:, ?\?| offset \?)"));
static ORDER_BY: LazyLock<Regex> = LazyLock::new(|| compile(r"\border by"));
static ASC: LazyLock<Regex> = LazyLock::new(|| compile(r"\s+asc\b"));

/// Fingerprint a MySQL-like query. Never fails.
pub fn fingerprint(sql: &str) -> String {
    if MYSQLDUMP.is_match(sql) {
        return "mysqldump".to_string();
    }
    if PERCONA_TOOLKIT.is_match(sql) {
        return "percona-toolkit".to_string();
    }
    if let Some(call) = CALL.captures(sql).and_then(|c| c.get(1)) {
        return call.as_str().to_lowercase();
    }

    let mut fp = match MULTI_ROW_INSERT.captures(sql).and_then(|c| c.get(1)) {
        Some(first_row) => first_row.as_str().to_string(),
        None => sql.to_string(),
    };

    fp = BLOCK_COMMENT.replace_all(&fp, "").into_owned();
    fp = LINE_COMMENT.replace_all(&fp, "").into_owned();

    if USE_DATABASE.is_match(&fp) {
        return "use ?".to_string();
    }

    fp = ESCAPED_QUOTE.replace_all(&fp, "").into_owned();
    fp = DOUBLE_QUOTED.replace_all(&fp, "?").into_owned();
    fp = SINGLE_QUOTED.replace_all(&fp, "?").into_owned();

    fp = BOOLEAN.replace_all(&fp, "?").into_owned();

    fp = NUMBER.replace_all(&fp, "?").into_owned();
    fp = NUMBER_ARTIFACT.replace_all(&fp, "?").into_owned();

    fp = WHITESPACE.replace_all(fp.trim(), " ").to_lowercase();

    fp = NULL.replace_all(&fp, "?").into_owned();

    fp = VALUE_LIST.replace_all(&fp, "${1}(?+)").into_owned();

    fp = collapse_repeated_unions(&fp);

    fp = LIMIT.replace_all(&fp, "limit ?").into_owned();

    if ORDER_BY.is_match(&fp) {
        fp = ASC.replace_all(&fp, "").into_owned();
    }

    fp
}

/// Collapse `select X union [all] select X ...` into `select X /*repeat union*/`
///
/// The head `select X` is the shortest text starting at a `select` that is
/// followed by at least one repetition of itself. Input must already be
/// lower-cased with single spaces.
fn collapse_repeated_unions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    'scan: loop {
        let mut from = 0;
        while let Some(head) = SELECT_HEAD.find_at(rest, from) {
            if let Some(repeat) = find_repeat(rest, head.start(), head.end()) {
                out.push_str(&rest[..repeat.head_end]);
                out.push_str(" /*repeat");
                out.push_str(repeat.separator);
                out.push_str("*/");
                rest = &rest[repeat.end..];
                continue 'scan;
            }
            from = head.start() + 1;
        }
        out.push_str(rest);
        return out;
    }
}

struct UnionRepeat {
    head_end: usize,
    end: usize,
    separator: &'static str,
}

fn find_repeat(text: &str, start: usize, min_head_end: usize) -> Option<UnionRepeat> {
    for (offset, _) in text[min_head_end..].match_indices(" union") {
        let head_end = min_head_end + offset;
        let head = &text[start..head_end];

        let mut pos = head_end;
        let mut separator = None;
        loop {
            let tail = &text[pos..];
            let sep = if tail.starts_with(" union all ") {
                " union all"
            } else if tail.starts_with(" union ") {
                " union"
            } else {
                break;
            };
            if !tail[sep.len() + 1..].starts_with(head) {
                break;
            }
            pos += sep.len() + 1 + head.len();
            separator = Some(sep);
        }

        if let Some(separator) = separator {
            return Some(UnionRepeat {
                head_end,
                end: pos,
                separator,
            });
        }
    }
    None
}
