/*!
# Scoring Expression Grammar

Parses the nested-angle-bracket form `Name<arg, arg, …>` into a
[`ScoringExpr`] tree:

```text
expr  :=  NAME [ '<' arg (',' arg)* '>' ]
arg   :=  expr | INTEGER | BOOLEAN
```

Whitespace (including newlines) is insignificant. Integer and boolean
arguments are only accepted where the named node expects them; unknown names
fail with an `UnsupportedScoring` error, malformed text with a
`ScoringParse` error. Parsing happens before any volume data is touched.
*/

use crate::core::error::{AquiferError, Result};
use crate::scoring::ScoringExpr;

/// Default bin count for histogram quantiles.
const DEFAULT_HISTOGRAM_BINS: usize = 256;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Integer(i64),
    Open,
    Close,
    Comma,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some(&(at, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '<' => {
                chars.next();
                tokens.push(Token::Open);
            }
            '>' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            c if c.is_ascii_alphabetic() => {
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Name(name));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut digits = String::new();
                digits.push(c);
                chars.next();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = digits.parse::<i64>().map_err(|_| {
                    AquiferError::scoring_parse(format!("invalid integer '{}'", digits))
                })?;
                tokens.push(Token::Integer(value));
            }
            _ => {
                return Err(AquiferError::scoring_parse(format!(
                    "unexpected character '{}' at offset {}",
                    c, at
                )));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.position)
            .cloned()
            .ok_or_else(|| AquiferError::scoring_parse("unexpected end of expression"))?;
        self.position += 1;
        Ok(token)
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        let found = self.next()?;
        if found != token {
            return Err(AquiferError::scoring_parse(format!(
                "expected {:?}, found {:?}",
                token, found
            )));
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<ScoringExpr> {
        let name = match self.next()? {
            Token::Name(name) => name,
            other => {
                return Err(AquiferError::scoring_parse(format!(
                    "expected a node name, found {:?}",
                    other
                )));
            }
        };
        let args = self.parse_args()?;
        build_node(&name, args)
    }

    fn parse_args(&mut self) -> Result<Vec<Argument>> {
        if self.peek() != Some(&Token::Open) {
            return Ok(Vec::new());
        }
        self.next()?;
        let mut args = Vec::new();
        loop {
            args.push(self.parse_arg()?);
            match self.next()? {
                Token::Comma => continue,
                Token::Close => break,
                other => {
                    return Err(AquiferError::scoring_parse(format!(
                        "expected ',' or '>', found {:?}",
                        other
                    )));
                }
            }
        }
        Ok(args)
    }

    fn parse_arg(&mut self) -> Result<Argument> {
        match self.peek() {
            Some(Token::Integer(_)) => {
                let Token::Integer(value) = self.next()? else {
                    unreachable!()
                };
                Ok(Argument::Integer(value))
            }
            Some(Token::Name(name)) if name == "true" || name == "false" => {
                let value = name == "true";
                self.next()?;
                Ok(Argument::Boolean(value))
            }
            _ => Ok(Argument::Expr(self.parse_expr()?)),
        }
    }
}

#[derive(Debug)]
enum Argument {
    Expr(ScoringExpr),
    Integer(i64),
    Boolean(bool),
}

impl Argument {
    fn describe(&self) -> &'static str {
        match self {
            Argument::Expr(_) => "expression",
            Argument::Integer(_) => "integer",
            Argument::Boolean(_) => "boolean",
        }
    }
}

/// Parses a scoring expression from text.
pub fn parse(text: &str) -> Result<ScoringExpr> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        position: 0,
    };
    let expr = parser.parse_expr()?;
    if let Some(extra) = parser.peek() {
        return Err(AquiferError::scoring_parse(format!(
            "trailing input after expression: {:?}",
            extra
        )));
    }
    Ok(expr)
}

fn build_node(name: &str, args: Vec<Argument>) -> Result<ScoringExpr> {
    match name {
        "Constant" => {
            let [Argument::Integer(value)] = args[..] else {
                return bad_args(name, &args, "one integer");
            };
            Ok(ScoringExpr::Constant(value))
        }
        "MinSize" => leaf(name, args, ScoringExpr::MinSize),
        "MaxSize" => leaf(name, args, ScoringExpr::MaxSize),
        "ContactArea" => leaf(name, args, ScoringExpr::ContactArea),
        "MinAffinity" => leaf(name, args, ScoringExpr::MinAffinity),
        "MaxAffinity" => leaf(name, args, ScoringExpr::MaxAffinity),
        "MeanAffinity" => leaf(name, args, ScoringExpr::MeanAffinity),
        "Random" => leaf(name, args, ScoringExpr::Random),
        "MedianAffinity" => leaf(name, args, ScoringExpr::median_affinity()),
        "MeanMaxKAffinity" => {
            let [Argument::Integer(k)] = args[..] else {
                return bad_args(name, &args, "one integer");
            };
            if k < 1 {
                return Err(AquiferError::scoring_parse(format!(
                    "MeanMaxKAffinity needs k >= 1, got {}",
                    k
                )));
            }
            Ok(ScoringExpr::MeanMaxKAffinity(k as usize))
        }
        "QuantileAffinity" => {
            let (q, init_with_max) = match args[..] {
                [Argument::Integer(q)] => (q, true),
                [Argument::Integer(q), Argument::Boolean(init)] => (q, init),
                _ => return bad_args(name, &args, "an integer and an optional boolean"),
            };
            Ok(ScoringExpr::QuantileAffinity {
                q: percentile(q)?,
                init_with_max,
            })
        }
        "HistogramQuantileAffinity" => {
            let (q, bins, init_with_max) = match args[..] {
                [Argument::Integer(q)] => (q, DEFAULT_HISTOGRAM_BINS as i64, true),
                [Argument::Integer(q), Argument::Integer(bins)] => (q, bins, true),
                [
                    Argument::Integer(q),
                    Argument::Integer(bins),
                    Argument::Boolean(init),
                ] => (q, bins, init),
                _ => {
                    return bad_args(
                        name,
                        &args,
                        "an integer, an optional bin count, and an optional boolean",
                    );
                }
            };
            if bins < 1 {
                return Err(AquiferError::scoring_parse(format!(
                    "HistogramQuantileAffinity needs at least one bin, got {}",
                    bins
                )));
            }
            Ok(ScoringExpr::HistogramQuantileAffinity {
                q: percentile(q)?,
                bins: bins as usize,
                init_with_max,
            })
        }
        "OneMinus" => unary(name, args, ScoringExpr::OneMinus),
        "Invert" => unary(name, args, ScoringExpr::Invert),
        "Square" => unary(name, args, ScoringExpr::Square),
        "Add" => binary(name, args, ScoringExpr::Add),
        "Subtract" => binary(name, args, ScoringExpr::Subtract),
        "Multiply" => binary(name, args, ScoringExpr::Multiply),
        "Divide" => binary(name, args, ScoringExpr::Divide),
        "Step" => binary(name, args, ScoringExpr::Step),
        _ => Err(AquiferError::unsupported_scoring(format!(
            "unknown scoring primitive '{}'",
            name
        ))),
    }
}

fn leaf(name: &str, args: Vec<Argument>, node: ScoringExpr) -> Result<ScoringExpr> {
    if args.is_empty() {
        Ok(node)
    } else {
        bad_args(name, &args, "no arguments")
    }
}

fn unary(
    name: &str,
    mut args: Vec<Argument>,
    node: fn(Box<ScoringExpr>) -> ScoringExpr,
) -> Result<ScoringExpr> {
    if args.len() == 1 && matches!(args[0], Argument::Expr(_)) {
        let Argument::Expr(a) = args.remove(0) else {
            unreachable!()
        };
        return Ok(node(Box::new(a)));
    }
    bad_args(name, &args, "one expression")
}

fn binary(
    name: &str,
    mut args: Vec<Argument>,
    node: fn(Box<ScoringExpr>, Box<ScoringExpr>) -> ScoringExpr,
) -> Result<ScoringExpr> {
    if args.len() == 2 {
        if let (Argument::Expr(_), Argument::Expr(_)) = (&args[0], &args[1]) {
            let (Argument::Expr(a), Argument::Expr(b)) = (args.remove(0), args.remove(0)) else {
                unreachable!()
            };
            return Ok(node(Box::new(a), Box::new(b)));
        }
    }
    bad_args(name, &args, "two expressions")
}

fn percentile(q: i64) -> Result<u8> {
    if (0..=100).contains(&q) {
        Ok(q as u8)
    } else {
        Err(AquiferError::scoring_parse(format!(
            "percentile must be between 0 and 100, got {}",
            q
        )))
    }
}

fn bad_args(name: &str, args: &[Argument], expected: &str) -> Result<ScoringExpr> {
    let found: Vec<&str> = args.iter().map(Argument::describe).collect();
    Err(AquiferError::scoring_parse(format!(
        "{} expects {}, found ({})",
        name,
        expected,
        found.join(", ")
    )))
}
