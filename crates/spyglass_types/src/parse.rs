//! A recursive-descent parser for query expressions.
//!
//! The grammar, loosely:
//!
//! ```text
//! expression  := conjunction ( "||" conjunction )*
//! conjunction := negation ( "&&" negation )*
//! negation    := "!" negation | "(" expression ")" | predicate
//! predicate   := operand op operand
//! operand     := ":" type | "&" attribute | key | literal
//! op          := == != < <= > >= in !in ni !ni ~ !~
//! ```
//!
//! Literals cover every scalar data kind: `true`, `-42`, `7`, `1.5`,
//! `"text"`, `/pattern/`, `10.0.0.1`, `10.0.0.0/8`, `80/tcp`, `90s`,
//! `2021-02-03T04:05:06`, and `nil`.

use crate::data::Data;
use crate::error::{TypeError, TypeResult};
use crate::expr::{Expression, Extractor, Operand};
use crate::operator::RelOp;
use crate::schema::Type;

/// Parses an expression from its textual form.
///
/// # Errors
///
/// Returns [`TypeError::Parse`] with the offending offset when the input
/// is malformed. The result is not normalized; callers normalize before
/// scheduling.
pub fn parse_expression(input: &str) -> TypeResult<Expression> {
    let mut parser = Parser { input, pos: 0 };
    let expr = parser.expression()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error("trailing input after expression"));
    }
    Ok(expr)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn expression(&mut self) -> TypeResult<Expression> {
        let mut children = vec![self.conjunction()?];
        while self.eat_symbol("||") {
            children.push(self.conjunction()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Expression::Disjunction(children)
        })
    }

    fn conjunction(&mut self) -> TypeResult<Expression> {
        let mut children = vec![self.negation()?];
        while self.eat_symbol("&&") {
            children.push(self.negation()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Expression::Conjunction(children)
        })
    }

    fn negation(&mut self) -> TypeResult<Expression> {
        self.skip_ws();
        // A lone "!" negates; "!in"/"!ni"/"!="/"!~" only occur after an
        // operand and never reach this position.
        if self.peek() == Some('!') {
            self.pos += 1;
            let inner = self.negation()?;
            return Ok(Expression::Negation(Box::new(inner)));
        }
        if self.peek() == Some('(') {
            self.pos += 1;
            let inner = self.expression()?;
            self.skip_ws();
            if self.peek() != Some(')') {
                return Err(self.error("expected closing parenthesis"));
            }
            self.pos += 1;
            return Ok(inner);
        }
        self.predicate()
    }

    fn predicate(&mut self) -> TypeResult<Expression> {
        let lhs = self.operand()?;
        let op = self.operator()?;
        let rhs = self.operand()?;
        Ok(Expression::predicate(lhs, op, rhs))
    }

    fn operator(&mut self) -> TypeResult<RelOp> {
        self.skip_ws();
        let rest = &self.input[self.pos..];
        let table: &[(&str, RelOp)] = &[
            ("==", RelOp::Equal),
            ("!=", RelOp::NotEqual),
            ("<=", RelOp::LessEqual),
            ("<", RelOp::Less),
            (">=", RelOp::GreaterEqual),
            (">", RelOp::Greater),
            ("!in", RelOp::NotIn),
            ("in", RelOp::In),
            ("!ni", RelOp::NotNi),
            ("ni", RelOp::Ni),
            ("!~", RelOp::NotMatch),
            ("~", RelOp::Match),
        ];
        for (symbol, op) in table {
            if let Some(after) = rest.strip_prefix(symbol) {
                // Word operators must not swallow an identifier prefix.
                let word = symbol.chars().all(|c| c.is_ascii_alphabetic() || c == '!');
                if word
                    && after
                        .chars()
                        .next()
                        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    continue;
                }
                self.pos += symbol.len();
                return Ok(*op);
            }
        }
        Err(self.error("expected a relational operator"))
    }

    fn operand(&mut self) -> TypeResult<Operand> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.error("expected an operand")),
            Some('"') => {
                let s = self.quoted_string()?;
                Ok(Operand::Value(Data::String(s)))
            }
            Some('/') => {
                self.pos += 1;
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c == '/' {
                        break;
                    }
                    self.pos += 1;
                }
                if self.peek() != Some('/') {
                    return Err(self.error("unterminated pattern literal"));
                }
                let pattern = self.input[start..self.pos].to_string();
                self.pos += 1;
                Ok(Operand::Value(Data::Pattern(pattern)))
            }
            Some('&') => {
                self.pos += 1;
                let name = self.word();
                if name.is_empty() {
                    return Err(self.error("expected an attribute name after '&'"));
                }
                Ok(Operand::Extractor(Extractor::Attribute(name.to_string())))
            }
            Some(':') => {
                let start = self.pos;
                self.pos += 1;
                let name = self.word();
                if let Some(t) = type_by_name(name) {
                    return Ok(Operand::Extractor(Extractor::Type(t)));
                }
                // Not a type name; re-read as a literal (e.g. "::1").
                self.pos = start;
                let word = self.word();
                parse_literal(word, start).map(Operand::Value)
            }
            _ => {
                let start = self.pos;
                let word = self.word();
                if word.is_empty() {
                    return Err(self.error("expected an operand"));
                }
                if word == "nil" {
                    return Ok(Operand::Value(Data::Nil));
                }
                if is_key(word) {
                    return Ok(Operand::Extractor(Extractor::Key(word.to_string())));
                }
                parse_literal(word, start).map(Operand::Value)
            }
        }
    }

    fn quoted_string(&mut self) -> TypeResult<String> {
        debug_assert_eq!(self.peek(), Some('"'));
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string literal")),
                Some('"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some('\\') => out.push('\\'),
                        Some('"') => out.push('"'),
                        _ => return Err(self.error("invalid escape sequence")),
                    }
                    self.pos += 1;
                }
                Some(c) => {
                    out.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    /// Consumes the symbol if it comes next (after whitespace).
    fn eat_symbol(&mut self, symbol: &str) -> bool {
        self.skip_ws();
        if self.input[self.pos..].starts_with(symbol) {
            self.pos += symbol.len();
            true
        } else {
            false
        }
    }

    fn word(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '/' | '+' | '-') {
                self.pos += 1;
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn error(&self, message: impl Into<String>) -> TypeError {
        TypeError::parse(self.pos, message)
    }
}

fn type_by_name(name: &str) -> Option<Type> {
    Some(match name {
        "bool" => Type::bool(),
        "int" => Type::int(),
        "count" => Type::count(),
        "real" => Type::real(),
        "duration" => Type::timespan(),
        "time" => Type::timestamp(),
        "string" => Type::string(),
        "pattern" => Type::pattern(),
        "addr" => Type::address(),
        "subnet" => Type::subnet(),
        "port" => Type::port(),
        _ => return None,
    })
}

/// A key is a dotted identifier that starts with a letter or underscore
/// and contains no literal punctuation.
fn is_key(word: &str) -> bool {
    let mut chars = word.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    word.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && word != "true"
        && word != "false"
}

/// Classifies a bare literal word into a data value.
fn parse_literal(word: &str, offset: usize) -> TypeResult<Data> {
    if word == "true" {
        return Ok(Data::Bool(true));
    }
    if word == "false" {
        return Ok(Data::Bool(false));
    }
    if looks_like_timestamp(word) {
        return parse_timestamp(word, offset).map(Data::Timestamp);
    }
    if let Some(value) = parse_duration(word) {
        return Ok(Data::Timespan(value));
    }
    if word.contains('/') {
        if let Ok(port) = word.parse() {
            return Ok(Data::Port(port));
        }
        if let Ok(subnet) = word.parse() {
            return Ok(Data::Subnet(subnet));
        }
        return Err(TypeError::parse(offset, format!("invalid literal: {word}")));
    }
    if word.contains(':') || is_dotted_quad(word) {
        return word
            .parse()
            .map(Data::Address)
            .map_err(|_| TypeError::parse(offset, format!("invalid literal: {word}")));
    }
    if let Some(rest) = word.strip_prefix('+').or_else(|| word.strip_prefix('-')) {
        if rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() {
            return word
                .parse()
                .map(Data::Int)
                .map_err(|_| TypeError::parse(offset, format!("integer out of range: {word}")));
        }
    }
    if word.contains('.') {
        return word
            .parse()
            .map(Data::Real)
            .map_err(|_| TypeError::parse(offset, format!("invalid literal: {word}")));
    }
    if word.chars().all(|c| c.is_ascii_digit()) && !word.is_empty() {
        return word
            .parse()
            .map(Data::Count)
            .map_err(|_| TypeError::parse(offset, format!("count out of range: {word}")));
    }
    Err(TypeError::parse(offset, format!("invalid literal: {word}")))
}

fn is_dotted_quad(word: &str) -> bool {
    let parts: Vec<_> = word.split('.').collect();
    parts.len() == 4 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

fn looks_like_timestamp(word: &str) -> bool {
    let bytes = word.as_bytes();
    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}

fn parse_timestamp(word: &str, offset: usize) -> TypeResult<i64> {
    let err = || TypeError::parse(offset, format!("invalid timestamp: {word}"));
    let (date, time) = match word.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (word, None),
    };
    let mut date_parts = date.split('-');
    let year: i64 = date_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let month: u32 = date_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let day: u32 = date_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    if date_parts.next().is_some() || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(err());
    }
    let mut seconds = days_from_civil(year, month, day) * 86_400;
    if let Some(time) = time {
        let mut time_parts = time.split(':');
        let hour: i64 = time_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let minute: i64 = time_parts.next().unwrap_or("0").parse().map_err(|_| err())?;
        let second: i64 = time_parts.next().unwrap_or("0").parse().map_err(|_| err())?;
        if time_parts.next().is_some() || hour > 23 || minute > 59 || second > 60 {
            return Err(err());
        }
        seconds += hour * 3600 + minute * 60 + second;
    }
    Ok(seconds * 1_000_000_000)
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = i64::from(if month > 2 { month - 3 } else { month + 9 });
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn parse_duration(word: &str) -> Option<i64> {
    let suffixes: &[(&str, i64)] = &[
        ("ns", 1),
        ("us", 1_000),
        ("ms", 1_000_000),
        ("min", 60_000_000_000),
        ("h", 3_600_000_000_000),
        ("d", 86_400_000_000_000),
        ("s", 1_000_000_000),
    ];
    for (suffix, factor) in suffixes {
        if let Some(number) = word.strip_suffix(suffix) {
            if number.is_empty() {
                return None;
            }
            let signed = number.strip_prefix(['+', '-']).unwrap_or(number);
            if !signed.is_empty() && signed.chars().all(|c| c.is_ascii_digit()) {
                return number.parse::<i64>().ok().map(|n| n * factor);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Port, Protocol};

    fn lookup(e: &Expression) -> (&Extractor, RelOp, &Data) {
        match e {
            Expression::Predicate(p) => p.as_lookup().expect("lookup form"),
            _ => panic!("expected a predicate"),
        }
    }

    #[test]
    fn parses_key_predicate() {
        let e = parse_expression("id.resp_p == 80/tcp").unwrap();
        let (ex, op, x) = lookup(&e);
        assert_eq!(*ex, Extractor::Key("id.resp_p".into()));
        assert_eq!(op, RelOp::Equal);
        assert_eq!(*x, Data::Port(Port::new(80, Protocol::Tcp)));
    }

    #[test]
    fn parses_compound_with_precedence() {
        let e = parse_expression("a == 1 && b == 2 || c == 3").unwrap();
        match e {
            Expression::Disjunction(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[0], Expression::Conjunction(_)));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn parses_type_extractor_and_subnet() {
        let e = parse_expression(":addr in 10.0.0.0/8").unwrap();
        let (ex, op, x) = lookup(&e);
        assert_eq!(*ex, Extractor::Type(Type::address()));
        assert_eq!(op, RelOp::In);
        assert_eq!(*x, Data::Subnet("10.0.0.0/8".parse().unwrap()));
    }

    #[test]
    fn parses_attribute_extractor_and_timestamp() {
        let e = parse_expression("&time >= 1970-01-02").unwrap();
        let (ex, op, x) = lookup(&e);
        assert_eq!(*ex, Extractor::Attribute("time".into()));
        assert_eq!(op, RelOp::GreaterEqual);
        assert_eq!(*x, Data::Timestamp(86_400_000_000_000));
    }

    #[test]
    fn parses_v6_literal_despite_type_prefix() {
        let e = parse_expression(":addr != ::1").unwrap();
        let (_, _, x) = lookup(&e);
        assert_eq!(*x, Data::Address("::1".parse().unwrap()));
    }

    #[test]
    fn parses_negation_and_parens() {
        let e = parse_expression("! (x == 1 || y == 2)").unwrap();
        assert!(matches!(e, Expression::Negation(_)));
    }

    #[test]
    fn parses_string_and_substring_op() {
        let e = parse_expression("uri ni \"login\"").unwrap();
        let (_, op, x) = lookup(&e);
        assert_eq!(op, RelOp::Ni);
        assert_eq!(*x, Data::String("login".into()));
    }

    #[test]
    fn parses_durations_and_reals() {
        let expr = parse_expression("duration > 90s").unwrap();
        let (_, _, x) = lookup(&expr);
        assert_eq!(*x, Data::Timespan(90_000_000_000));
        let expr = parse_expression("ratio >= 0.5").unwrap();
        let (_, _, x) = lookup(&expr);
        assert_eq!(*x, Data::Real(0.5));
        let expr = parse_expression("delta == -3").unwrap();
        let (_, _, x) = lookup(&expr);
        assert_eq!(*x, Data::Int(-3));
    }

    #[test]
    fn timestamp_round_trips_against_known_epoch() {
        // 2021-02-03T04:05:06 UTC
        let expr = parse_expression("&time == 2021-02-03T04:05:06").unwrap();
        let (_, _, x) = lookup(&expr);
        assert_eq!(*x, Data::Timestamp(1_612_325_106_000_000_000));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_expression("x ==").is_err());
        assert!(parse_expression("x == 1 &&").is_err());
        assert!(parse_expression("(x == 1").is_err());
        assert!(parse_expression("x @ 1").is_err());
        assert!(parse_expression("x == 1 extra").is_err());
        assert!(parse_expression("x == 99999999999999999999999999").is_err());
    }

    #[test]
    fn word_operators_do_not_swallow_identifiers() {
        // "ni" must not match the prefix of a column called "nice".
        let e = parse_expression("tag ni \"x\"").unwrap();
        assert!(matches!(e, Expression::Predicate(_)));
        assert!(parse_expression("tag nice \"x\"").is_err());
    }
}
