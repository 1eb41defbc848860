// Reader: source text to expression trees

use crate::runtime::values::Value;
use pest::iterators::Pair;
use pest::Parser;

#[derive(pest_derive::Parser)]
#[grammar = "reader.pest"] // Path relative to src/
struct ArcParser;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReaderError {
    #[error("syntax error:\n{0}")]
    Syntax(String),

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("expected exactly one form, found {0}")]
    NotOneForm(usize),
}

/// Read every top-level form in `source`.
pub fn read(source: &str) -> Result<Vec<Value>, ReaderError> {
    let mut pairs =
        ArcParser::parse(Rule::program, source).map_err(|e| ReaderError::Syntax(e.to_string()))?;
    let program = match pairs.next() {
        Some(program) => program,
        None => return Ok(Vec::new()),
    };
    program
        .into_inner()
        .filter(|p| p.as_rule() != Rule::EOI)
        .map(build_datum)
        .collect()
}

/// Read a source text that holds exactly one form.
pub fn read_one(source: &str) -> Result<Value, ReaderError> {
    let mut forms = read(source)?;
    match forms.len() {
        1 => Ok(forms.remove(0)),
        n => Err(ReaderError::NotOneForm(n)),
    }
}

fn build_datum(pair: Pair<Rule>) -> Result<Value, ReaderError> {
    match pair.as_rule() {
        Rule::integer => pair
            .as_str()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| ReaderError::InvalidNumber(pair.as_str().to_string())),
        Rule::float => pair
            .as_str()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| ReaderError::InvalidNumber(pair.as_str().to_string())),
        Rule::string => {
            let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Value::String(unescape(inner)))
        }
        Rule::symbol => Ok(match pair.as_str() {
            "nil" => Value::Nil,
            "t" => Value::Boolean(true),
            name => Value::symbol(name),
        }),
        Rule::quoted => {
            let quoted = first_inner(pair)?;
            Ok(Value::list(vec![Value::symbol("quote"), build_datum(quoted)?]))
        }
        Rule::list => {
            let mut items = Vec::new();
            let mut tail = Value::Nil;
            for child in pair.into_inner() {
                if child.as_rule() == Rule::dotted_tail {
                    tail = build_datum(first_inner(child)?)?;
                } else {
                    items.push(build_datum(child)?);
                }
            }
            Ok(Value::list_with_tail(items, tail))
        }
        other => Err(ReaderError::Syntax(format!("unexpected {:?}", other))),
    }
}

fn first_inner(pair: Pair<Rule>) -> Result<Pair<Rule>, ReaderError> {
    let rule = pair.as_rule();
    pair.into_inner()
        .next()
        .ok_or_else(|| ReaderError::Syntax(format!("empty {:?}", rule)))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_atoms() {
        assert_eq!(read_one("42").unwrap(), Value::Integer(42));
        assert_eq!(read_one("-7").unwrap(), Value::Integer(-7));
        assert_eq!(read_one("2.5").unwrap(), Value::Float(2.5));
        assert_eq!(read_one("foo").unwrap(), Value::symbol("foo"));
        assert_eq!(read_one("-").unwrap(), Value::symbol("-"));
        assert_eq!(read_one("nil").unwrap(), Value::Nil);
        assert_eq!(read_one("t").unwrap(), Value::Boolean(true));
        assert_eq!(
            read_one(r#""a\"b\n""#).unwrap(),
            Value::string("a\"b\n")
        );
    }

    #[test]
    fn reads_lists_dotted_tails_and_quotes() {
        assert_eq!(
            read_one("(1 (2) . 3)").unwrap(),
            Value::list_with_tail(
                vec![Value::Integer(1), Value::list(vec![Value::Integer(2)])],
                Value::Integer(3)
            )
        );
        assert_eq!(read_one("()").unwrap(), Value::Nil);
        assert_eq!(
            read_one("'x").unwrap(),
            Value::list(vec![Value::symbol("quote"), Value::symbol("x")])
        );
    }

    #[test]
    fn reads_multiple_forms_and_skips_comments() {
        let forms = read("; leading\n(a) b ; trailing\n").unwrap();
        assert_eq!(forms.len(), 2);
        assert_eq!(forms[1], Value::symbol("b"));
    }

    #[test]
    fn reports_errors() {
        assert!(matches!(read("(a b"), Err(ReaderError::Syntax(_))));
        assert_eq!(read_one("a b"), Err(ReaderError::NotOneForm(2)));
        assert!(matches!(
            read_one("99999999999999999999"),
            Err(ReaderError::InvalidNumber(_))
        ));
    }
}
