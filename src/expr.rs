//! Numeric value expressions for parameter values.
//!
//! Timeline scripts and the CLI accept values like `100*3/2` or `-(2+0.5)`.
//! The grammar is deliberately tiny: decimal literals, `+ - * /`, unary minus
//! and parentheses. Anything else is rejected.
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := ('-' | '+') unary | atom
//! atom   := number | '(' expr ')'
//! ```

use crate::error::ExprError;

/// Evaluates a value expression.
///
/// # Examples
///
/// ```
/// use splicemix::expr::evaluate;
///
/// assert_eq!(evaluate("100*3/2").unwrap(), 150.0);
/// assert_eq!(evaluate(" -0.5 ").unwrap(), -0.5);
/// ```
pub fn evaluate(input: &str) -> Result<f64, ExprError> {
    let mut parser = Parser {
        chars: input.char_indices().collect(),
        pos: 0,
        depth: 0,
    };
    parser.skip_ws();
    if parser.peek().is_none() {
        return Err(ExprError::Empty);
    }
    let value = parser.expr()?;
    parser.skip_ws();
    if let Some((pos, ch)) = parser.current() {
        return Err(ExprError::UnexpectedChar { ch, pos });
    }
    if !value.is_finite() {
        return Err(ExprError::NotFinite);
    }
    Ok(value)
}

/// Deepest parenthesis nesting accepted.
const MAX_DEPTH: usize = 64;

struct Parser {
    chars: Vec<(usize, char)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn current(&self) -> Option<(usize, char)> {
        self.chars.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.current().map(|(_, c)| c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expr(&mut self) -> Result<f64, ExprError> {
        let mut value = self.term()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('+') => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some('-') => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, ExprError> {
        let mut value = self.unary()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('*') => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Some('/') => {
                    self.pos += 1;
                    value /= self.unary()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, ExprError> {
        let mut negate = false;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('-') => negate = !negate,
                Some('+') => {}
                _ => break,
            }
            self.pos += 1;
        }
        let value = self.atom()?;
        Ok(if negate { -value } else { value })
    }

    fn atom(&mut self) -> Result<f64, ExprError> {
        self.skip_ws();
        match self.current() {
            None => Err(ExprError::UnexpectedEnd),
            Some((_, '(')) => {
                if self.depth == MAX_DEPTH {
                    return Err(ExprError::TooDeep(MAX_DEPTH));
                }
                self.pos += 1;
                self.depth += 1;
                let value = self.expr()?;
                self.depth -= 1;
                self.skip_ws();
                match self.current() {
                    Some((_, ')')) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    Some((pos, ch)) => Err(ExprError::UnexpectedChar { ch, pos }),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some((_, c)) if c.is_ascii_digit() || c == '.' => self.number(),
            Some((pos, ch)) => Err(ExprError::UnexpectedChar { ch, pos }),
        }
    }

    fn number(&mut self) -> Result<f64, ExprError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            let exponent_sign = (c == '-' || c == '+') && text.ends_with(['e', 'E']);
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map_err(|_| ExprError::InvalidNumber(text.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals() {
        assert_eq!(evaluate("100").unwrap(), 100.0);
        assert_eq!(evaluate("0.25").unwrap(), 0.25);
        assert_eq!(evaluate(".5").unwrap(), 0.5);
        assert_eq!(evaluate("1e3").unwrap(), 1000.0);
        assert_eq!(evaluate("2.5E-1").unwrap(), 0.25);
    }

    #[test]
    fn test_precedence() {
        assert_eq!(evaluate("100*3/2").unwrap(), 150.0);
        assert_eq!(evaluate("1+2*3").unwrap(), 7.0);
        assert_eq!(evaluate("(1+2)*3").unwrap(), 9.0);
        assert_eq!(evaluate("10-4-3").unwrap(), 3.0);
        assert_eq!(evaluate("8/4/2").unwrap(), 1.0);
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(evaluate("-3").unwrap(), -3.0);
        assert_eq!(evaluate("2*-3").unwrap(), -6.0);
        assert_eq!(evaluate("-(2 + 0.5)").unwrap(), -2.5);
        assert_eq!(evaluate("1e-2").unwrap(), 0.01);
    }

    #[test]
    fn test_rejects_code() {
        assert_eq!(evaluate(""), Err(ExprError::Empty));
        assert_eq!(evaluate("   "), Err(ExprError::Empty));
        assert!(matches!(
            evaluate("Math.PI"),
            Err(ExprError::UnexpectedChar { ch: 'M', pos: 0 })
        ));
        assert!(matches!(
            evaluate("1; 2"),
            Err(ExprError::UnexpectedChar { ch: ';', .. })
        ));
        assert_eq!(evaluate("(1+2"), Err(ExprError::UnexpectedEnd));
        assert_eq!(evaluate("1+"), Err(ExprError::UnexpectedEnd));
        assert!(matches!(evaluate("1..2"), Err(ExprError::InvalidNumber(_))));
    }

    #[test]
    fn test_long_sign_runs_and_deep_nesting() {
        let signs = "-".repeat(100_001);
        assert_eq!(evaluate(&format!("{}2", signs)).unwrap(), -2.0);
        assert_eq!(evaluate("--+-4").unwrap(), -4.0);

        let nested = format!("{}1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(evaluate(&nested).unwrap(), 1.0);
        let too_deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(evaluate(&too_deep), Err(ExprError::TooDeep(MAX_DEPTH)));
    }

    #[test]
    fn test_division_by_zero_is_not_finite() {
        assert_eq!(evaluate("1/0"), Err(ExprError::NotFinite));
    }
}
