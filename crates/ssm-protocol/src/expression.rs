//! Conversion Expressions
//!
//! Vendor parameter definitions describe the raw-to-engineering conversion as
//! a short algebraic string over `x`, e.g. `x/4`, `(x-128)/2`, `14.7/(1+x)`.
//! Expressions are tokenized and then tried against an ordered list of
//! matchers, most constrained shape first. Anything unrecognized evaluates as
//! the identity and is logged once, at parse time.

use tracing::warn;

/// Arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Op::Add),
            '-' => Some(Op::Sub),
            '*' => Some(Op::Mul),
            '/' => Some(Op::Div),
            _ => None,
        }
    }

    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Op::Add => lhs + rhs,
            Op::Sub => lhs - rhs,
            Op::Mul => lhs * rhs,
            Op::Div => lhs / rhs,
        }
    }

    fn is_additive(self) -> bool {
        matches!(self, Op::Add | Op::Sub)
    }

    fn is_multiplicative(self) -> bool {
        !self.is_additive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    X,
    Num(f64),
    Op(Op),
    Open,
    Close,
}

/// A compiled conversion expression.
///
/// Variant order mirrors matcher precedence.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `C op (C2 op2 x)`, e.g. `14.7/(1+x)`
    ConstOverGroup {
        constant: f64,
        op: Op,
        inner_constant: f64,
        inner_op: Op,
    },
    /// `(x op1 N) op2 M op3 P`, e.g. `(x-128)*100/128`
    GroupedChain {
        inner: (Op, f64),
        first: (Op, f64),
        second: (Op, f64),
    },
    /// `(x op1 N) op2 M` with a multiplicative group and additive tail,
    /// e.g. `(x*.078125)-5`
    ScaledOffset { scale: (Op, f64), offset: (Op, f64) },
    /// `x op1 N op2 M`, e.g. `x*25-3200`, `x*100/255`
    Chain { first: (Op, f64), second: (Op, f64) },
    /// Remaining `(x op N) op2 M` forms, e.g. `(x-128)/2`
    OffsetScaled { offset: (Op, f64), scale: (Op, f64) },
    /// `x op N`, e.g. `x/4`, `x-40`
    Single { op: Op, operand: f64 },
    /// `N op x`, e.g. `0-x`, `1/x`
    ConstFirst { constant: f64, op: Op },
    /// `bit:N`, extracts one bit of the raw value
    Bit(u32),
    /// `x`
    Identity,
    /// Unrecognized text, evaluated as the identity
    Unrecognized(String),
}

type Matcher = fn(&[Token]) -> Option<Expression>;

/// Grammar matchers in precedence order.
///
/// A shorter shape must never be tried before a longer one it could
/// shadow, so reordering this list changes results.
const MATCHERS: [(&str, Matcher); 7] = [
    ("const-over-group", match_const_over_group),
    ("grouped-chain", match_grouped_chain),
    ("scaled-offset", match_scaled_offset),
    ("chain", match_chain),
    ("offset-scaled", match_offset_scaled),
    ("single", match_single),
    ("const-first", match_const_first),
];

impl Expression {
    /// Compile an expression. Never fails; unknown text becomes
    /// [`Expression::Unrecognized`].
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();

        if let Some(bit) = trimmed.strip_prefix("bit:") {
            if let Ok(n) = bit.trim().parse::<u32>() {
                return Expression::Bit(n);
            }
        }

        let matched = tokenize(trimmed).and_then(|tokens| {
            if tokens == [Token::X] {
                return Some(Expression::Identity);
            }
            MATCHERS.iter().find_map(|(_, matcher)| matcher(&tokens))
        });

        matched.unwrap_or_else(|| {
            warn!("Unknown expression format: '{}', using identity", text);
            Expression::Unrecognized(text.to_string())
        })
    }

    /// Whether the text matched one of the supported grammars
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Expression::Unrecognized(_))
    }

    /// Evaluate against a raw value
    pub fn apply(&self, x: f64) -> f32 {
        let value = match *self {
            Expression::ConstOverGroup {
                constant,
                op,
                inner_constant,
                inner_op,
            } => op.apply(constant, inner_op.apply(inner_constant, x)),
            Expression::GroupedChain {
                inner,
                first,
                second,
            } => chain(inner.0.apply(x, inner.1), first, second),
            Expression::ScaledOffset { scale, offset } => {
                offset.0.apply(scale.0.apply(x, scale.1), offset.1)
            }
            Expression::Chain { first, second } => chain(x, first, second),
            Expression::OffsetScaled { offset, scale } => {
                scale.0.apply(offset.0.apply(x, offset.1), scale.1)
            }
            Expression::Single { op, operand } => op.apply(x, operand),
            Expression::ConstFirst { constant, op } => op.apply(constant, x),
            Expression::Bit(n) => {
                let raw = x as u64;
                if n < 64 && (raw >> n) & 1 == 1 {
                    1.0
                } else {
                    0.0
                }
            }
            Expression::Identity | Expression::Unrecognized(_) => x,
        };
        value as f32
    }
}

/// Evaluate `expression` for raw value `x`
pub fn evaluate(expression: &str, x: u32) -> f32 {
    Expression::parse(expression).apply(x as f64)
}

/// `v op1 a op2 b`, honouring multiplication before addition
fn chain(v: f64, (op1, a): (Op, f64), (op2, b): (Op, f64)) -> f64 {
    if op1.is_additive() && op2.is_multiplicative() {
        op1.apply(v, op2.apply(a, b))
    } else {
        op2.apply(op1.apply(v, a), b)
    }
}

fn tokenize(text: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        // A minus directly after an operator, an opening paren or at the
        // start is a sign, not a subtraction.
        let signed = c == '-'
            && matches!(tokens.last(), None | Some(Token::Op(_)) | Some(Token::Open));

        if c.is_ascii_digit() || c == '.' || signed {
            let mut literal = String::new();
            if signed {
                literal.push('-');
                chars.next();
                while chars.peek().is_some_and(|c| c.is_whitespace()) {
                    chars.next();
                }
            }
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    literal.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Num(literal.parse().ok()?));
            continue;
        }

        let token = match c {
            'x' | 'X' => Token::X,
            '(' => Token::Open,
            ')' => Token::Close,
            other => Token::Op(Op::from_char(other)?),
        };
        tokens.push(token);
        chars.next();
    }

    Some(tokens)
}

fn match_const_over_group(tokens: &[Token]) -> Option<Expression> {
    use Token::*;
    match *tokens {
        [Num(constant), Op(op), Open, Num(inner_constant), Op(inner_op), X, Close] => {
            Some(Expression::ConstOverGroup {
                constant,
                op,
                inner_constant,
                inner_op,
            })
        }
        _ => None,
    }
}

fn match_grouped_chain(tokens: &[Token]) -> Option<Expression> {
    use Token::*;
    match *tokens {
        [Open, X, Op(op1), Num(n), Close, Op(op2), Num(m), Op(op3), Num(p)] => {
            Some(Expression::GroupedChain {
                inner: (op1, n),
                first: (op2, m),
                second: (op3, p),
            })
        }
        _ => None,
    }
}

fn match_scaled_offset(tokens: &[Token]) -> Option<Expression> {
    use Token::*;
    match *tokens {
        [Open, X, Op(op1), Num(n), Close, Op(op2), Num(m)]
            if op1.is_multiplicative() && op2.is_additive() =>
        {
            Some(Expression::ScaledOffset {
                scale: (op1, n),
                offset: (op2, m),
            })
        }
        _ => None,
    }
}

fn match_chain(tokens: &[Token]) -> Option<Expression> {
    use Token::*;
    match *tokens {
        [X, Op(op1), Num(n), Op(op2), Num(m)] => Some(Expression::Chain {
            first: (op1, n),
            second: (op2, m),
        }),
        _ => None,
    }
}

fn match_offset_scaled(tokens: &[Token]) -> Option<Expression> {
    use Token::*;
    match *tokens {
        [Open, X, Op(op1), Num(n), Close, Op(op2), Num(m)] => Some(Expression::OffsetScaled {
            offset: (op1, n),
            scale: (op2, m),
        }),
        _ => None,
    }
}

fn match_single(tokens: &[Token]) -> Option<Expression> {
    use Token::*;
    match *tokens {
        [X, Op(op), Num(operand)] => Some(Expression::Single { op, operand }),
        _ => None,
    }
}

fn match_const_first(tokens: &[Token]) -> Option<Expression> {
    use Token::*;
    match *tokens {
        [Num(constant), Op(op), X] => Some(Expression::ConstFirst { constant, op }),
        _ => None,
    }
}
