//! Filter and property expressions.
//!
//! The language covers what Mapnik filters and CartoCSS selectors use:
//! `[field]` lookups, `[nuti::name]` style parameter substitution, the `zoom`
//! variable, literals, comparisons, boolean connectives and `+`.

use crate::value::Value;

/// Values an expression can refer to while it is evaluated.
pub trait Variables {
    fn field(&self, name: &str) -> Value;

    fn parameter(&self, name: &str) -> Value;

    fn zoom(&self) -> f32;
}

const PARAMETER_PREFIX: &str = "nuti::";

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Constant(Value),
    Field(String),
    Parameter(String),
    Zoom,
    Not(Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
    /// String concatenation of every part.
    Template(Vec<Expression>),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Neq,
    Lt,
    Lteq,
    Gt,
    GtEq,
    And,
    Or,
    Add,
}

impl Default for Expression {
    fn default() -> Self {
        Expression::Constant(Value::Bool(true))
    }
}

impl Expression {
    pub fn constant<V: Into<Value>>(value: V) -> Self {
        Expression::Constant(value.into())
    }

    pub fn parse(source: &str) -> Result<Self, String> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let exp = parser.or()?;
        if let Some(token) = parser.tokens.get(parser.pos) {
            return Err(format!("unexpected {token:?} in expression '{source}'"));
        }
        Ok(exp)
    }

    /// Parses a property value: literal text with embedded `[..]` lookups.
    /// Values without lookups stay string constants.
    pub fn parse_template(source: &str) -> Result<Self, String> {
        if !source.contains('[') {
            return Ok(Expression::Constant(Value::String(source.to_string())));
        }

        let mut parts = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find('[') {
            if start > 0 {
                parts.push(Expression::constant(&rest[..start]));
            }
            let end = rest[start..]
                .find(']')
                .ok_or_else(|| format!("unterminated '[' in '{source}'"))?;
            parts.push(lookup(&rest[start + 1..start + end]));
            rest = &rest[start + end + 1..];
        }
        if !rest.is_empty() {
            parts.push(Expression::constant(rest));
        }

        if parts.len() == 1 {
            Ok(parts.remove(0))
        } else {
            Ok(Expression::Template(parts))
        }
    }

    pub fn and(self, other: Expression) -> Expression {
        match self {
            Expression::Constant(Value::Bool(true)) => other,
            _ => Expression::Binary(BinaryOp::And, Box::new(self), Box::new(other)),
        }
    }

    pub fn eval(&self, vars: &dyn Variables) -> Value {
        match self {
            Expression::Constant(v) => v.clone(),
            Expression::Field(name) => vars.field(name),
            Expression::Parameter(name) => vars.parameter(name),
            Expression::Zoom => Value::Float(vars.zoom() as f64),
            Expression::Not(exp) => Value::Bool(!exp.eval(vars).truthy()),
            Expression::Binary(op, left, right) => match op {
                BinaryOp::And => Value::Bool(left.eval(vars).truthy() && right.eval(vars).truthy()),
                BinaryOp::Or => Value::Bool(left.eval(vars).truthy() || right.eval(vars).truthy()),
                op => binary(*op, left.eval(vars), right.eval(vars)),
            },
            Expression::Template(parts) => {
                let mut text = String::new();
                for part in parts {
                    text.push_str(&part.eval(vars).to_string());
                }
                Value::String(text)
            }
        }
    }

    pub fn matches(&self, vars: &dyn Variables) -> bool {
        self.eval(vars).truthy()
    }

    /// True when evaluation reads feature attributes.
    pub fn uses_fields(&self) -> bool {
        match self {
            Expression::Field(_) => true,
            Expression::Constant(_) | Expression::Parameter(_) | Expression::Zoom => false,
            Expression::Not(exp) => exp.uses_fields(),
            Expression::Binary(_, l, r) => l.uses_fields() || r.uses_fields(),
            Expression::Template(parts) => parts.iter().any(Expression::uses_fields),
        }
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Value {
    use std::cmp::Ordering;

    let ord = || l.loose_cmp(&r);
    let result = match op {
        BinaryOp::Eq => l.loose_eq(&r),
        BinaryOp::Neq => !l.loose_eq(&r),
        BinaryOp::Lt => ord() == Some(Ordering::Less),
        BinaryOp::Lteq => matches!(ord(), Some(Ordering::Less | Ordering::Equal)),
        BinaryOp::Gt => ord() == Some(Ordering::Greater),
        BinaryOp::GtEq => matches!(ord(), Some(Ordering::Greater | Ordering::Equal)),
        BinaryOp::Add => {
            return match (&l, &r) {
                (Value::Integer(a), Value::Integer(b)) => Value::Integer(a.wrapping_add(*b)),
                _ => match (l.as_f64(), r.as_f64()) {
                    (Some(a), Some(b)) if !matches!(l, Value::String(_)) => Value::Float(a + b),
                    _ => Value::String(format!("{l}{r}")),
                },
            };
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("short circuit operators evaluate lazily"),
    };

    Value::Bool(result)
}

fn lookup(name: &str) -> Expression {
    let name = name.trim();
    match name.strip_prefix(PARAMETER_PREFIX) {
        Some(param) => Expression::Parameter(param.to_string()),
        None if name == "zoom" => Expression::Zoom,
        None => Expression::Field(name.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Lookup(String),
    Ident(String),
    Str(String),
    Number(Value),
    Op(&'static str),
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                let end = chars[i..]
                    .iter()
                    .position(|c| *c == ']')
                    .ok_or_else(|| format!("unterminated '[' in '{source}'"))?;
                tokens.push(Token::Lookup(chars[i + 1..i + end].iter().collect()));
                i += end + 1;
            }
            '\'' | '"' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(format!("unterminated string in '{source}'")),
                        Some('\\') => {
                            if let Some(escaped) = chars.get(i + 1) {
                                text.push(*escaped);
                            }
                            i += 2;
                        }
                        Some(q) if *q == c => {
                            i += 1;
                            break;
                        }
                        Some(other) => {
                            text.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit() || *d == '.')) || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = if text.contains('.') {
                    Value::Float(text.parse().map_err(|_| format!("invalid number '{text}'"))?)
                } else {
                    Value::Integer(text.parse().map_err(|_| format!("invalid number '{text}'"))?)
                };
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | ':' | '-')) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let op = match two.as_str() {
                    "==" => Some("=="),
                    "!=" => Some("!="),
                    "<>" => Some("!="),
                    "<=" => Some("<="),
                    ">=" => Some(">="),
                    "&&" => Some("and"),
                    "||" => Some("or"),
                    _ => None,
                };
                if let Some(op) = op {
                    tokens.push(Token::Op(op));
                    i += 2;
                    continue;
                }

                let op = match c {
                    '=' => "==",
                    '<' => "<",
                    '>' => ">",
                    '!' => "not",
                    '+' => "+",
                    _ => return Err(format!("unexpected character '{c}' in '{source}'")),
                };
                tokens.push(Token::Op(op));
                i += 1;
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = match self.peek() {
            Some(Token::Op(op)) => *op == keyword,
            Some(Token::Ident(ident)) => ident.eq_ignore_ascii_case(keyword),
            _ => false,
        };
        if found {
            self.pos += 1;
        }
        found
    }

    fn or(&mut self) -> Result<Expression, String> {
        let mut left = self.and()?;
        while self.eat_keyword("or") {
            let right = self.and()?;
            left = Expression::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expression, String> {
        let mut left = self.not()?;
        while self.eat_keyword("and") {
            let right = self.not()?;
            left = Expression::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expression, String> {
        if self.eat_keyword("not") {
            return Ok(Expression::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expression, String> {
        let left = self.sum()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => BinaryOp::Eq,
            Some(Token::Op("!=")) => BinaryOp::Neq,
            Some(Token::Op("<")) => BinaryOp::Lt,
            Some(Token::Op("<=")) => BinaryOp::Lteq,
            Some(Token::Op(">")) => BinaryOp::Gt,
            Some(Token::Op(">=")) => BinaryOp::GtEq,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.sum()?;
        Ok(Expression::Binary(op, Box::new(left), Box::new(right)))
    }

    fn sum(&mut self) -> Result<Expression, String> {
        let mut left = self.primary()?;
        while self.eat_keyword("+") {
            let right = self.primary()?;
            left = Expression::Binary(BinaryOp::Add, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expression, String> {
        match self.next() {
            Some(Token::Lookup(name)) => Ok(lookup(&name)),
            Some(Token::Str(s)) => Ok(Expression::Constant(Value::String(s))),
            Some(Token::Number(n)) => Ok(Expression::Constant(n)),
            Some(Token::Ident(ident)) => Ok(match ident.to_ascii_lowercase().as_str() {
                "true" => Expression::constant(true),
                "false" => Expression::constant(false),
                "null" => Expression::Constant(Value::Null),
                _ => lookup(&ident),
            }),
            Some(Token::LParen) => {
                let exp = self.or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(exp),
                    _ => Err("expected ')'".to_string()),
                }
            }
            Some(token) => Err(format!("unexpected {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}
