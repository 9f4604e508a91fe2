//! Temporal scan binding.
//!
//! SQL reaching the engine may attach a `FOR` clause to any table
//! reference (`FOR <date>`, `FOR DATES BETWEEN a AND b`, `FOR DATES IN
//! <named-range>`, `FOR DATES SINCE d`, `FOR LAST n DAYS`). The external
//! parser does not understand these, so the binder runs first: it scans
//! the raw SQL token stream, strips each temporal clause, records the
//! resolved `(start, end)` range against the table it follows, and
//! returns parser-clean SQL.
//!
//! The same pass normalizes `$name` built-in relations and `@name`
//! parameter placeholders into double-quoted identifiers the parser
//! accepts.
//!
//! `FOR` and `FROM` also appear inside `SUBSTRING(x FROM 1 FOR 2)` and
//! `EXTRACT(YEAR FROM d)`; the scanner tracks whether the enclosing
//! parenthesis belongs to such a function and never treats those
//! keywords as clause starts there.

use std::collections::HashMap;

use chrono::{Datelike, Days, Months, NaiveDate};

use crate::error::{EngineError, EngineResult};

/// An inclusive range of UTC calendar days bound to a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TemporalRange {
    pub fn single(date: NaiveDate) -> TemporalRange {
        TemporalRange {
            start: date,
            end: date,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// The binder's output: parser-clean SQL plus per-relation date ranges.
#[derive(Debug, Clone)]
pub struct BoundSql {
    pub sql: String,
    /// Normalized (lowercased, unquoted) relation name -> bound range.
    pub ranges: HashMap<String, TemporalRange>,
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokKind {
    Word,
    Number,
    StringLit,
    QuotedIdent,
    Symbol,
}

#[derive(Debug, Clone)]
struct Tok {
    kind: TokKind,
    /// Raw text including quotes.
    raw: String,
}

impl Tok {
    fn word_eq(&self, keyword: &str) -> bool {
        self.kind == TokKind::Word && self.raw.eq_ignore_ascii_case(keyword)
    }
}

fn tokenize(sql: &str) -> EngineResult<Vec<Tok>> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '\'' {
            // String literal; doubled quotes escape.
            let mut raw = String::from('\'');
            chars.next();
            loop {
                match chars.next() {
                    Some('\'') => {
                        if chars.peek() == Some(&'\'') {
                            raw.push_str("''");
                            chars.next();
                        } else {
                            raw.push('\'');
                            break;
                        }
                    }
                    Some(c) => raw.push(c),
                    None => return Err(EngineError::Parse("unterminated string literal".into())),
                }
            }
            tokens.push(Tok {
                kind: TokKind::StringLit,
                raw,
            });
        } else if c == '"' {
            let mut raw = String::from('"');
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => {
                        if chars.peek() == Some(&'"') {
                            raw.push_str("\"\"");
                            chars.next();
                        } else {
                            raw.push('"');
                            break;
                        }
                    }
                    Some(c) => raw.push(c),
                    None => {
                        return Err(EngineError::Parse("unterminated quoted identifier".into()))
                    }
                }
            }
            tokens.push(Tok {
                kind: TokKind::QuotedIdent,
                raw,
            });
        } else if c == '-' {
            chars.next();
            if chars.peek() == Some(&'-') {
                // Line comment.
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                tokens.push(Tok {
                    kind: TokKind::Symbol,
                    raw: "-".into(),
                });
            }
        } else if c == '/' {
            chars.next();
            if chars.peek() == Some(&'*') {
                // Block comment.
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            } else {
                tokens.push(Tok {
                    kind: TokKind::Symbol,
                    raw: "/".into(),
                });
            }
        } else if matches!(c, '>' | '<' | '!' | '|' | ':') {
            // Two-character operators must survive re-emission intact.
            chars.next();
            let mut raw = c.to_string();
            if let Some(&next) = chars.peek() {
                let pair = matches!(
                    (c, next),
                    ('>', '=') | ('<', '=') | ('<', '>') | ('!', '=') | ('|', '|') | (':', ':')
                );
                if pair {
                    raw.push(next);
                    chars.next();
                }
            }
            tokens.push(Tok {
                kind: TokKind::Symbol,
                raw,
            });
        } else if c.is_ascii_digit() {
            let mut raw = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() || c == '.' {
                    raw.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Tok {
                kind: TokKind::Number,
                raw,
            });
        } else if c.is_alphabetic() || c == '_' || c == '$' || c == '@' {
            let mut raw = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_alphanumeric() || c == '_' || c == '$' || c == '@' || c == '.' {
                    // A dot splits qualified names; keep it a separate token.
                    if c == '.' {
                        break;
                    }
                    raw.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Tok {
                kind: TokKind::Word,
                raw,
            });
        } else {
            chars.next();
            tokens.push(Tok {
                kind: TokKind::Symbol,
                raw: c.to_string(),
            });
        }
    }
    Ok(tokens)
}

// ============================================================================
// Binder
// ============================================================================

/// Functions whose argument lists legitimately contain FROM / FOR.
const FUNCTIONS_WITH_KEYWORD_ARGS: &[&str] =
    &["EXTRACT", "SUBSTRING", "TRIM", "POSITION", "OVERLAY"];

/// Strip temporal clauses from `sql`, resolving placeholders relative to
/// `today` (UTC). Also quotes `$`/`@` prefixed names for the parser.
pub fn bind(sql: &str, today: NaiveDate) -> EngineResult<BoundSql> {
    let tokens = tokenize(sql)?;
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut ranges: HashMap<String, TemporalRange> = HashMap::new();

    // Paren stack entries record whether the paren belongs to a function
    // whose arguments reuse FROM/FOR.
    let mut paren_fn_stack: Vec<bool> = Vec::new();
    // Set after FROM/JOIN outside such functions; cleared once a table
    // reference (or something else) is consumed.
    let mut expecting_table = false;
    // The normalized name of the most recently read table reference,
    // still eligible for a FOR clause.
    let mut pending_table: Option<String> = None;
    // Paren depth of the FROM list we are inside, if any; commas at this
    // depth start another table reference.
    let mut from_depth: Option<usize> = None;

    let mut i = 0;
    while i < tokens.len() {
        let tok = &tokens[i];

        if tok.kind == TokKind::Symbol && tok.raw == "(" {
            let is_fn_args = out.last().is_some_and(|prev| {
                FUNCTIONS_WITH_KEYWORD_ARGS
                    .iter()
                    .any(|f| prev.eq_ignore_ascii_case(f))
            });
            paren_fn_stack.push(is_fn_args);
            expecting_table = false;
            pending_table = None;
            out.push(tok.raw.clone());
            i += 1;
            continue;
        }
        if tok.kind == TokKind::Symbol && tok.raw == ")" {
            paren_fn_stack.pop();
            expecting_table = false;
            pending_table = None;
            out.push(tok.raw.clone());
            i += 1;
            continue;
        }

        let in_keyword_fn = paren_fn_stack.last().copied().unwrap_or(false);

        if !in_keyword_fn && (tok.word_eq("FROM") || tok.word_eq("JOIN")) {
            expecting_table = true;
            pending_table = None;
            if tok.word_eq("FROM") {
                from_depth = Some(paren_fn_stack.len());
            }
            out.push(tok.raw.to_ascii_uppercase());
            i += 1;
            continue;
        }
        if tok.kind == TokKind::Word
            && ["WHERE", "ON", "SELECT", "HAVING", "LIMIT", "OFFSET"]
                .iter()
                .any(|k| tok.word_eq(k))
        {
            from_depth = None;
        }

        if tok.word_eq("FOR") && pending_table.is_some() && !in_keyword_fn {
            let relation = pending_table.take().unwrap_or_default();
            let (range, consumed) = parse_temporal_clause(&tokens[i + 1..], today)?;
            if let Some(existing) = ranges.get(&relation) {
                if *existing != range {
                    return Err(EngineError::InvalidInput(format!(
                        "conflicting temporal clauses for table '{relation}'"
                    )));
                }
            }
            ranges.insert(relation, range);
            i += 1 + consumed;
            continue;
        }

        match tok.kind {
            TokKind::Word => {
                let raw = &tok.raw;
                if expecting_table && !is_keyword(raw) {
                    // A table name; remember it for a trailing FOR.
                    pending_table = Some(raw.to_ascii_lowercase());
                    expecting_table = false;
                    out.push(quote_if_special(raw));
                } else if raw.starts_with('@') || raw.starts_with('$') {
                    pending_table = None;
                    out.push(quote_if_special(raw));
                } else {
                    // An alias directly after a table keeps the FOR
                    // eligibility; any other word ends it.
                    if pending_table.is_some() && !raw.eq_ignore_ascii_case("AS") {
                        let keyword = is_keyword(raw);
                        if keyword {
                            pending_table = None;
                        }
                    }
                    expecting_table = false;
                    out.push(raw.clone());
                }
            }
            TokKind::QuotedIdent => {
                if expecting_table {
                    let inner = tok.raw.trim_matches('"').to_ascii_lowercase();
                    pending_table = Some(inner);
                    expecting_table = false;
                }
                out.push(tok.raw.clone());
            }
            _ => {
                if tok.kind == TokKind::Symbol && tok.raw == "," {
                    // Comma in a FROM list starts another table reference.
                    pending_table = None;
                    if from_depth == Some(paren_fn_stack.len()) {
                        expecting_table = true;
                    }
                } else if tok.kind != TokKind::Symbol || tok.raw != "." {
                    pending_table = None;
                    expecting_table = false;
                }
                out.push(tok.raw.clone());
            }
        }
        i += 1;
    }

    Ok(BoundSql {
        sql: out.join(" "),
        ranges,
    })
}

fn quote_if_special(word: &str) -> String {
    if word.starts_with('$') || word.starts_with('@') {
        format!("\"{word}\"")
    } else {
        word.to_string()
    }
}

/// Keywords that terminate a table reference.
fn is_keyword(word: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "SELECT",
        "FROM",
        "WHERE",
        "GROUP",
        "HAVING",
        "ORDER",
        "LIMIT",
        "OFFSET",
        "JOIN",
        "INNER",
        "LEFT",
        "RIGHT",
        "FULL",
        "CROSS",
        "OUTER",
        "SEMI",
        "ANTI",
        "ON",
        "USING",
        "AS",
        "UNION",
        "INTERSECT",
        "EXCEPT",
        "ALL",
        "DISTINCT",
        "WITH",
        "BY",
        "AND",
        "OR",
        "NOT",
        "FOR",
        "UNNEST",
        "EXPLAIN",
        "ANALYZE",
    ];
    KEYWORDS.iter().any(|k| word.eq_ignore_ascii_case(k))
}

/// Parse the tokens of one temporal clause (after `FOR`). Returns the
/// resolved range and how many tokens were consumed.
fn parse_temporal_clause(tokens: &[Tok], today: NaiveDate) -> EngineResult<(TemporalRange, usize)> {
    let first = tokens
        .first()
        .ok_or_else(|| EngineError::InvalidInput("FOR clause is missing its date".into()))?;

    if first.word_eq("DATES") {
        let second = tokens
            .get(1)
            .ok_or_else(|| EngineError::InvalidInput("incomplete FOR DATES clause".into()))?;
        if second.word_eq("BETWEEN") {
            let d1 = date_token(tokens.get(2), today)?;
            let and = tokens.get(3).ok_or_else(|| {
                EngineError::InvalidInput("FOR DATES BETWEEN is missing AND".into())
            })?;
            if !and.word_eq("AND") {
                return Err(EngineError::InvalidInput(
                    "FOR DATES BETWEEN expects 'AND' between its dates".into(),
                ));
            }
            let d2 = date_token(tokens.get(4), today)?;
            if d1.start > d2.end {
                return Err(EngineError::InvalidInput(
                    "FOR DATES BETWEEN start is after its end".into(),
                ));
            }
            return Ok((
                TemporalRange {
                    start: d1.start,
                    end: d2.end,
                },
                5,
            ));
        }
        if second.word_eq("SINCE") {
            let d = date_token(tokens.get(2), today)?;
            return Ok((
                TemporalRange {
                    start: d.start,
                    end: today,
                },
                3,
            ));
        }
        if second.word_eq("IN") {
            let name = tokens.get(2).ok_or_else(|| {
                EngineError::InvalidInput("FOR DATES IN is missing its range name".into())
            })?;
            let range = named_range(&name.raw, today)?;
            return Ok((range, 3));
        }
        return Err(EngineError::InvalidInput(format!(
            "unrecognized FOR DATES form near '{}'",
            second.raw
        )));
    }

    if first.word_eq("LAST") {
        let n_tok = tokens
            .get(1)
            .ok_or_else(|| EngineError::InvalidInput("FOR LAST is missing a day count".into()))?;
        let n: u64 = n_tok
            .raw
            .parse()
            .map_err(|_| EngineError::InvalidInput("FOR LAST expects an integer".into()))?;
        if n == 0 {
            return Err(EngineError::InvalidInput("FOR LAST 0 DAYS is empty".into()));
        }
        let days = tokens
            .get(2)
            .ok_or_else(|| EngineError::InvalidInput("FOR LAST n expects DAYS".into()))?;
        if !days.word_eq("DAYS") && !days.word_eq("DAY") {
            return Err(EngineError::InvalidInput("FOR LAST n expects DAYS".into()));
        }
        let start = today
            .checked_sub_days(Days::new(n - 1))
            .ok_or_else(|| EngineError::InvalidInput("FOR LAST range out of bounds".into()))?;
        return Ok((TemporalRange { start, end: today }, 3));
    }

    // FOR <date-or-placeholder>
    let range = date_token(Some(first), today)?;
    Ok((range, 1))
}

fn date_token(token: Option<&Tok>, today: NaiveDate) -> EngineResult<TemporalRange> {
    let token = token
        .ok_or_else(|| EngineError::InvalidInput("temporal clause is missing a date".into()))?;
    match token.kind {
        TokKind::StringLit => {
            let inner = token.raw.trim_matches('\'');
            let date = NaiveDate::parse_from_str(inner, "%Y-%m-%d").map_err(|_| {
                EngineError::InvalidInput(format!("temporal dates use YYYY-MM-DD, got '{inner}'"))
            })?;
            Ok(TemporalRange::single(date))
        }
        TokKind::Word => named_range(&token.raw, today),
        _ => Err(EngineError::InvalidInput(format!(
            "expected a date or placeholder after FOR, got '{}'",
            token.raw
        ))),
    }
}

fn named_range(name: &str, today: NaiveDate) -> EngineResult<TemporalRange> {
    let month_start = |d: NaiveDate| {
        NaiveDate::from_ymd_opt(d.year(), d.month(), 1)
            .ok_or_else(|| EngineError::Internal("month start out of range".into()))
    };
    match name.to_ascii_uppercase().as_str() {
        "TODAY" => Ok(TemporalRange::single(today)),
        "YESTERDAY" => {
            let date = today
                .checked_sub_days(Days::new(1))
                .ok_or_else(|| EngineError::InvalidInput("YESTERDAY out of range".into()))?;
            Ok(TemporalRange::single(date))
        }
        "THIS_MONTH" => Ok(TemporalRange {
            start: month_start(today)?,
            end: today,
        }),
        "LAST_MONTH" => {
            let this_start = month_start(today)?;
            let last_start = this_start
                .checked_sub_months(Months::new(1))
                .ok_or_else(|| EngineError::InvalidInput("LAST_MONTH out of range".into()))?;
            let last_end = this_start
                .checked_sub_days(Days::new(1))
                .ok_or_else(|| EngineError::InvalidInput("LAST_MONTH out of range".into()))?;
            Ok(TemporalRange {
                start: last_start,
                end: last_end,
            })
        }
        "LAST_7_DAYS" => Ok(TemporalRange {
            start: today
                .checked_sub_days(Days::new(6))
                .ok_or_else(|| EngineError::InvalidInput("range out of bounds".into()))?,
            end: today,
        }),
        "LAST_30_DAYS" => Ok(TemporalRange {
            start: today
                .checked_sub_days(Days::new(29))
                .ok_or_else(|| EngineError::InvalidInput("range out of bounds".into()))?,
            end: today,
        }),
        other => Err(EngineError::InvalidInput(format!(
            "unknown temporal placeholder '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn test_plain_sql_untouched_ranges() {
        let bound = bind("SELECT id FROM planets WHERE id = 3", day("2026-08-01")).expect("bind");
        assert!(bound.ranges.is_empty());
        assert!(bound.sql.contains("FROM planets"));
    }

    #[test]
    fn test_for_literal_date() {
        let bound = bind(
            "SELECT name FROM $planets FOR '1846-01-01'",
            day("2026-08-01"),
        )
        .expect("bind");
        let range = bound.ranges.get("$planets").expect("range bound");
        assert_eq!(range.start, day("1846-01-01"));
        assert_eq!(range.end, day("1846-01-01"));
        assert!(!bound.sql.to_uppercase().contains("FOR"));
        assert!(bound.sql.contains("\"$planets\""));
    }

    #[test]
    fn test_for_dates_between() {
        let bound = bind(
            "SELECT * FROM events FOR DATES BETWEEN '2026-01-01' AND '2026-01-31'",
            day("2026-08-01"),
        )
        .expect("bind");
        let range = bound.ranges.get("events").expect("range");
        assert_eq!(range.start, day("2026-01-01"));
        assert_eq!(range.end, day("2026-01-31"));
    }

    #[test]
    fn test_for_last_n_days() {
        let bound = bind("SELECT * FROM t FOR LAST 7 DAYS", day("2026-08-01")).expect("bind");
        let range = bound.ranges.get("t").expect("range");
        assert_eq!(range.start, day("2026-07-26"));
        assert_eq!(range.end, day("2026-08-01"));
    }

    #[test]
    fn test_for_today_placeholder() {
        let bound = bind("SELECT * FROM t FOR TODAY", day("2026-08-01")).expect("bind");
        assert_eq!(
            bound.ranges.get("t"),
            Some(&TemporalRange::single(day("2026-08-01")))
        );
    }

    #[test]
    fn test_for_dates_in_last_month() {
        let bound =
            bind("SELECT * FROM t FOR DATES IN LAST_MONTH", day("2026-08-01")).expect("bind");
        let range = bound.ranges.get("t").expect("range");
        assert_eq!(range.start, day("2026-07-01"));
        assert_eq!(range.end, day("2026-07-31"));
    }

    #[test]
    fn test_substring_for_not_confused() {
        let bound = bind(
            "SELECT SUBSTRING(name FROM 1 FOR 2) FROM $planets",
            day("2026-08-01"),
        )
        .expect("bind");
        assert!(bound.ranges.is_empty());
        assert!(bound.sql.contains("FOR"));
    }

    #[test]
    fn test_extract_from_not_confused() {
        let bound = bind(
            "SELECT EXTRACT(YEAR FROM birth_date) FROM $astronauts FOR TODAY",
            day("2026-08-01"),
        )
        .expect("bind");
        assert_eq!(bound.ranges.len(), 1);
        assert!(bound.ranges.contains_key("$astronauts"));
    }

    #[test]
    fn test_join_tables_bind_independently() {
        let bound = bind(
            "SELECT * FROM a FOR '2026-01-01' INNER JOIN b FOR '2026-02-01' ON a.id = b.id",
            day("2026-08-01"),
        )
        .expect("bind");
        assert_eq!(
            bound.ranges.get("a"),
            Some(&TemporalRange::single(day("2026-01-01")))
        );
        assert_eq!(
            bound.ranges.get("b"),
            Some(&TemporalRange::single(day("2026-02-01")))
        );
    }

    #[test]
    fn test_conflicting_clauses_rejected() {
        let err = bind(
            "SELECT * FROM a FOR '2026-01-01' INNER JOIN a FOR '2026-02-01' ON a.id = a.id",
            day("2026-08-01"),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_alias_keeps_for_eligibility() {
        let bound = bind(
            "SELECT p.name FROM $planets AS p FOR YESTERDAY",
            day("2026-08-01"),
        )
        .expect("bind");
        assert_eq!(
            bound.ranges.get("$planets"),
            Some(&TemporalRange::single(day("2026-07-31")))
        );
    }

    #[test]
    fn test_comma_separated_from_list() {
        let bound = bind(
            "SELECT * FROM a FOR '2026-01-01', b FOR '2026-02-01' WHERE a.id = b.id",
            day("2026-08-01"),
        )
        .expect("bind");
        assert_eq!(
            bound.ranges.get("a"),
            Some(&TemporalRange::single(day("2026-01-01")))
        );
        assert_eq!(
            bound.ranges.get("b"),
            Some(&TemporalRange::single(day("2026-02-01")))
        );
    }

    #[test]
    fn test_parameter_quoting() {
        let bound = bind(
            "SELECT name FROM $planets WHERE id = @planet_id",
            day("2026-08-01"),
        )
        .expect("bind");
        assert!(bound.sql.contains("\"@planet_id\""));
        assert!(bound.sql.contains("\"$planets\""));
    }

    #[test]
    fn test_bad_date_format() {
        let err = bind("SELECT * FROM t FOR '01-02-2026'", day("2026-08-01")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_between_inverted_rejected() {
        let err = bind(
            "SELECT * FROM t FOR DATES BETWEEN '2026-02-01' AND '2026-01-01'",
            day("2026-08-01"),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
}
