//! Boolean condition expressions over pipeline paths.
//!
//! Grammar: comparisons (`==`, `!=`, `<`, `<=`, `>`, `>=`) over pipeline
//! paths and literals, combined with `&&`, `||`, `!` and parentheses.
//! Literals are numbers, `true`/`false`, `null`, and quoted strings. A bare
//! identifier is resolved as a pipeline path; unresolved paths evaluate to
//! `null`.

use serde_json::Value;

use super::{Pipeline, PipelineError};

pub(crate) fn evaluate(expr: &str, pipeline: &Pipeline) -> Result<bool, PipelineError> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        pipeline,
    };
    let result = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parse_error(expr, "trailing input after expression"));
    }
    Ok(result)
}

fn parse_error(expr: &str, reason: &str) -> PipelineError {
    PipelineError::Condition(format!("cannot parse '{expr}': {reason}"))
}

// =============================================================================
// Tokenizer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    And,
    Or,
    Not,
    LParen,
    RParen,
    Cmp(CmpOp),
    Number(f64),
    Str(String),
    Ident(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>, PipelineError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Cmp(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Cmp(CmpOp::Le));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Cmp(CmpOp::Lt));
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Cmp(CmpOp::Ge));
                i += 2;
            }
            '>' => {
                tokens.push(Token::Cmp(CmpOp::Gt));
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end == chars.len() {
                    return Err(parse_error(expr, "unterminated string literal"));
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            _ if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == 'e')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| parse_error(expr, "invalid number literal"))?;
                tokens.push(Token::Number(number));
            }
            _ if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(parse_error(expr, "unexpected character")),
        }
    }

    Ok(tokens)
}

// =============================================================================
// Parser / evaluator
// =============================================================================

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    pipeline: &'a Pipeline,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn or_expr(&mut self) -> Result<bool, PipelineError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = left || right;
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<bool, PipelineError> {
        let mut left = self.unary_expr()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary_expr()?;
            left = left && right;
        }
        Ok(left)
    }

    fn unary_expr(&mut self) -> Result<bool, PipelineError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(!self.unary_expr()?);
        }
        self.primary_expr()
    }

    fn primary_expr(&mut self) -> Result<bool, PipelineError> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.or_expr()?;
            if self.next() != Some(Token::RParen) {
                return Err(PipelineError::Condition(
                    "missing closing parenthesis".to_string(),
                ));
            }
            return Ok(inner);
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<bool, PipelineError> {
        let left = self.operand()?;

        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.operand()?;
            return compare(&left, op, &right);
        }

        // A lone operand must itself be a boolean (e.g. `flags.enabled`).
        match left {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(PipelineError::Condition(format!(
                "expected a boolean operand, got {other}"
            ))),
        }
    }

    fn operand(&mut self) -> Result<Value, PipelineError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(serde_json::Number::from_f64(n)
                .map_or(Value::Null, Value::Number)),
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Ident(ident)) => Ok(match ident.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" => Value::Null,
                path => self.pipeline.get(path).cloned().unwrap_or(Value::Null),
            }),
            other => Err(PipelineError::Condition(format!(
                "expected an operand, got {other:?}"
            ))),
        }
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> Result<bool, PipelineError> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            let l = l.as_f64().unwrap_or(f64::NAN);
            let r = r.as_f64().unwrap_or(f64::NAN);
            Ok(match op {
                CmpOp::Eq => (l - r).abs() < f64::EPSILON,
                CmpOp::Ne => (l - r).abs() >= f64::EPSILON,
                CmpOp::Lt => l < r,
                CmpOp::Le => l <= r,
                CmpOp::Gt => l > r,
                CmpOp::Ge => l >= r,
            })
        }
        (Value::String(l), Value::String(r)) => match op {
            CmpOp::Eq => Ok(l == r),
            CmpOp::Ne => Ok(l != r),
            _ => Err(type_mismatch(op, "strings")),
        },
        (Value::Bool(l), Value::Bool(r)) => match op {
            CmpOp::Eq => Ok(l == r),
            CmpOp::Ne => Ok(l != r),
            _ => Err(type_mismatch(op, "booleans")),
        },
        (Value::Null, Value::Null) => match op {
            CmpOp::Eq => Ok(true),
            CmpOp::Ne => Ok(false),
            _ => Err(type_mismatch(op, "null")),
        },
        (Value::Null, _) | (_, Value::Null) => match op {
            CmpOp::Eq => Ok(false),
            CmpOp::Ne => Ok(true),
            _ => Err(type_mismatch(op, "null")),
        },
        (l, r) => Err(PipelineError::Condition(format!(
            "cannot compare {l} with {r}"
        ))),
    }
}

fn type_mismatch(op: CmpOp, kind: &str) -> PipelineError {
    PipelineError::Condition(format!("operator '{}' not defined for {kind}", op.symbol()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serde_json::Map;

    fn pipeline(value: serde_json::Value) -> Pipeline {
        match value {
            serde_json::Value::Object(map) => Pipeline::from_map(map),
            _ => Pipeline::from_map(Map::new()),
        }
    }

    #[test]
    fn test_bool_equality() {
        let p = pipeline(json!({"flag": true}));
        assert!(p.evaluate_condition("flag == true").unwrap());
        assert!(!p.evaluate_condition("flag == false").unwrap());
        assert!(p.evaluate_condition("flag != false").unwrap());
    }

    #[test]
    fn test_numeric_comparisons() {
        let p = pipeline(json!({"count": 5}));
        assert!(p.evaluate_condition("count > 3").unwrap());
        assert!(p.evaluate_condition("count <= 5").unwrap());
        assert!(!p.evaluate_condition("count < 5").unwrap());
        assert!(p.evaluate_condition("count == 5").unwrap());
    }

    #[test]
    fn test_string_comparison() {
        let p = pipeline(json!({"env": "prod"}));
        assert!(p.evaluate_condition("env == \"prod\"").unwrap());
        assert!(p.evaluate_condition("env != 'dev'").unwrap());
        assert!(p.evaluate_condition("env < 'z'").is_err());
    }

    #[test]
    fn test_logical_operators() {
        let p = pipeline(json!({"a": 1, "b": 2}));
        assert!(p.evaluate_condition("a == 1 && b == 2").unwrap());
        assert!(p.evaluate_condition("a == 9 || b == 2").unwrap());
        assert!(!p.evaluate_condition("a == 9 && b == 2").unwrap());
        assert!(p.evaluate_condition("!(a == 9)").unwrap());
    }

    #[test]
    fn test_parentheses_grouping() {
        let p = pipeline(json!({"a": 1, "b": 2, "c": 3}));
        assert!(p
            .evaluate_condition("(a == 9 || b == 2) && c == 3")
            .unwrap());
        assert!(!p
            .evaluate_condition("a == 9 || (b == 2 && c == 9)")
            .unwrap());
    }

    #[test]
    fn test_dotted_path_operand() {
        let p = pipeline(json!({"order": {"total": 120.5}}));
        assert!(p.evaluate_condition("order.total >= 100").unwrap());
    }

    #[test]
    fn test_missing_path_is_null() {
        let p = pipeline(json!({}));
        assert!(p.evaluate_condition("missing == null").unwrap());
        assert!(!p.evaluate_condition("missing == 5").unwrap());
        assert!(p.evaluate_condition("missing != 5").unwrap());
    }

    #[test]
    fn test_bare_boolean_operand() {
        let p = pipeline(json!({"flags": {"enabled": true}}));
        assert!(p.evaluate_condition("flags.enabled").unwrap());
        assert!(!p.evaluate_condition("flags.missing").unwrap());
    }

    #[test]
    fn test_parse_errors() {
        let p = pipeline(json!({}));
        assert!(p.evaluate_condition("a == ").is_err());
        assert!(p.evaluate_condition("(a == 1").is_err());
        assert!(p.evaluate_condition("a == 'unterminated").is_err());
        assert!(p.evaluate_condition("a @ 1").is_err());
    }

    #[test]
    fn test_type_mismatch_error() {
        let p = pipeline(json!({"count": 5}));
        assert!(p.evaluate_condition("count < 'five'").is_err());
    }
}
