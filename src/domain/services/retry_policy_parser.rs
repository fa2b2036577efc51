//! Recursive-descent parser for the retry-policy grammar (spec §4.2, §9).
//!
//! Deliberately not a general expression evaluator: only the constructors
//! and binary operators named in the grammar are recognized, and anything
//! else is a `ConfigError`.

use std::time::Duration;

use crate::domain::models::retry_policy::{RetryPolicy, StopCondition, WaitPolicy};
use crate::error::{DownloadError, Result};

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser { input: input.as_bytes(), pos: 0 }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.input.get(self.pos).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        self.skip_ws();
        if self.input.get(self.pos) == Some(&b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, b: u8) -> Result<()> {
        if self.eat(b) {
            Ok(())
        } else {
            Err(DownloadError::Config(format!(
                "expected {:?} at offset {}",
                b as char, self.pos
            )))
        }
    }

    fn ident(&mut self) -> Result<&'a str> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_alphanumeric() || self.input[self.pos] == b'_')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(DownloadError::Config(format!("expected identifier at offset {start}")));
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| DownloadError::Config("non-utf8 identifier".to_string()))
    }

    fn number(&mut self) -> Result<f64> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_digit() || self.input[self.pos] == b'.' || self.input[self.pos] == b'-')
        {
            self.pos += 1;
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| DownloadError::Config(format!("expected number at offset {start}")))
    }

    fn string_literal(&mut self) -> Result<String> {
        self.skip_ws();
        self.expect(b'\'').or_else(|_| self.expect(b'"'))?;
        let start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos] != b'\'' && self.input[self.pos] != b'"' {
            self.pos += 1;
        }
        let s = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| DownloadError::Config("non-utf8 string literal".to_string()))?
            .to_string();
        self.pos += 1;
        Ok(s)
    }

    fn args(&mut self) -> Result<Vec<String>> {
        self.expect(b'(')?;
        let mut out = Vec::new();
        if self.peek() == Some(b')') {
            self.pos += 1;
            return Ok(out);
        }
        loop {
            let start = self.pos;
            let mut depth = 0i32;
            loop {
                match self.input.get(self.pos) {
                    Some(b'(') => {
                        depth += 1;
                        self.pos += 1;
                    }
                    Some(b')') if depth == 0 => break,
                    Some(b')') => {
                        depth -= 1;
                        self.pos += 1;
                    }
                    Some(b',') if depth == 0 => break,
                    Some(_) => self.pos += 1,
                    None => {
                        return Err(DownloadError::Config("unterminated argument list".to_string()))
                    }
                }
            }
            out.push(
                std::str::from_utf8(&self.input[start..self.pos])
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
            );
            if self.eat(b',') {
                continue;
            }
            break;
        }
        self.expect(b')')?;
        Ok(out)
    }

    // stop ::= stop_atom ( ('|'|'&') stop_atom )*
    fn stop_expr(&mut self) -> Result<StopCondition> {
        let mut left = self.stop_atom()?;
        loop {
            match self.peek() {
                Some(b'|') => {
                    self.pos += 1;
                    let right = self.stop_atom()?;
                    left = StopCondition::Or(Box::new(left), Box::new(right));
                }
                Some(b'&') => {
                    self.pos += 1;
                    let right = self.stop_atom()?;
                    left = StopCondition::And(Box::new(left), Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn stop_atom(&mut self) -> Result<StopCondition> {
        let name = self.ident()?;
        match name {
            "stop_never" => Ok(StopCondition::Never),
            "stop_after_attempt" => {
                let args = self.args()?;
                let n = parse_arg_u32(&args, 0)?;
                Ok(StopCondition::AfterAttempt(n))
            }
            "stop_after_delay" => {
                let args = self.args()?;
                let secs = parse_arg_f64(&args, 0)?;
                Ok(StopCondition::AfterDelay(Duration::from_secs_f64(secs)))
            }
            "stop_when_event_set" => {
                let args = self.args()?;
                let name = args
                    .first()
                    .ok_or_else(|| DownloadError::Config("stop_when_event_set requires an argument".to_string()))?;
                Ok(StopCondition::WhenEventSet(
                    name.trim_matches(|c| c == '\'' || c == '"').to_string(),
                ))
            }
            "stop_any" | "stop_all" => {
                let args = self.args()?;
                let mut conds = Vec::with_capacity(args.len());
                for a in &args {
                    conds.push(parse_stop(a)?);
                }
                if name == "stop_any" {
                    Ok(StopCondition::Any(conds))
                } else {
                    Ok(StopCondition::All(conds))
                }
            }
            other => Err(DownloadError::Config(format!("unknown stop constructor {other:?}"))),
        }
    }

    // wait ::= wait_atom ( '+' wait_atom )*
    fn wait_expr(&mut self) -> Result<WaitPolicy> {
        let mut left = self.wait_atom()?;
        while self.eat(b'+') {
            let right = self.wait_atom()?;
            left = WaitPolicy::Add(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn wait_atom(&mut self) -> Result<WaitPolicy> {
        let name = self.ident()?;
        match name {
            "wait_none" => Ok(WaitPolicy::None),
            "wait_fixed" => {
                let args = self.args()?;
                Ok(WaitPolicy::Fixed(Duration::from_secs_f64(parse_arg_f64(&args, 0)?)))
            }
            "wait_random" => {
                let args = self.args()?;
                let lo = Duration::from_secs_f64(parse_arg_f64(&args, 0)?);
                let hi = Duration::from_secs_f64(parse_arg_f64(&args, 1)?);
                Ok(WaitPolicy::Random(lo, hi))
            }
            "wait_incrementing" => {
                let args = self.args()?;
                let start = Duration::from_secs_f64(parse_arg_f64(&args, 0)?);
                let inc = Duration::from_secs_f64(parse_arg_f64(&args, 1)?);
                Ok(WaitPolicy::Incrementing(start, inc))
            }
            "wait_exponential" => {
                let args = self.args()?;
                Ok(WaitPolicy::Exponential {
                    multiplier: parse_arg_f64(&args, 0)?,
                    min: Duration::from_secs_f64(parse_arg_f64(&args, 1).unwrap_or(0.0)),
                    max: Duration::from_secs_f64(parse_arg_f64(&args, 2).unwrap_or(f64::MAX.min(1e9))),
                })
            }
            "wait_random_exponential" => {
                let args = self.args()?;
                Ok(WaitPolicy::RandomExponential {
                    multiplier: parse_arg_f64(&args, 0)?,
                    max: Duration::from_secs_f64(parse_arg_f64(&args, 1).unwrap_or(1e9)),
                })
            }
            "wait_combine" | "wait_chain" => {
                let args = self.args()?;
                let mut parts = Vec::with_capacity(args.len());
                for a in &args {
                    parts.push(parse_wait(a)?);
                }
                if name == "wait_combine" {
                    Ok(WaitPolicy::Combine(parts))
                } else {
                    Ok(WaitPolicy::Chain(parts))
                }
            }
            other => Err(DownloadError::Config(format!("unknown wait constructor {other:?}"))),
        }
    }
}

fn parse_arg_u32(args: &[String], idx: usize) -> Result<u32> {
    args.get(idx)
        .and_then(|s| s.trim().parse::<u32>().ok())
        .ok_or_else(|| DownloadError::Config(format!("expected integer argument at position {idx}")))
}

fn parse_arg_f64(args: &[String], idx: usize) -> Result<f64> {
    args.get(idx)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .ok_or_else(|| DownloadError::Config(format!("expected numeric argument at position {idx}")))
}

fn parse_stop(expr: &str) -> Result<StopCondition> {
    let mut p = Parser::new(expr);
    let cond = p.stop_expr()?;
    p.skip_ws();
    if p.pos != p.input.len() {
        return Err(DownloadError::Config(format!("trailing input in stop expression {expr:?}")));
    }
    Ok(cond)
}

fn parse_wait(expr: &str) -> Result<WaitPolicy> {
    let mut p = Parser::new(expr);
    let wait = p.wait_expr()?;
    p.skip_ws();
    if p.pos != p.input.len() {
        return Err(DownloadError::Config(format!("trailing input in wait expression {expr:?}")));
    }
    Ok(wait)
}

/// Parses a combined `"<stop expr> & <wait expr>"` retry policy string, e.g.
/// `"stop_after_attempt(5) & wait_none"`. The `&` glue between the two halves
/// mirrors the literal scenario in spec §8.2; a bare stop or wait expression
/// alone is also accepted (the other half defaults).
pub fn parse_retry_policy(expr: &str) -> Result<RetryPolicy> {
    if let Some((stop_part, wait_part)) = split_top_level(expr) {
        let stop = parse_stop(stop_part.trim())?;
        let wait = parse_wait(wait_part.trim())?;
        return Ok(RetryPolicy { stop, wait });
    }

    if expr.trim_start().starts_with("wait_") {
        let wait = parse_wait(expr.trim())?;
        return Ok(RetryPolicy { stop: StopCondition::AfterAttempt(1), wait });
    }

    let stop = parse_stop(expr.trim())?;
    Ok(RetryPolicy { stop, wait: WaitPolicy::None })
}

/// Splits `"stop_x(...) & wait_y(...)"` at the top-level `&` that separates
/// the stop half from the wait half (not an `&` inside `stop_all(...)`
/// parens, which stays within the stop half).
fn split_top_level(expr: &str) -> Option<(&str, &str)> {
    let bytes = expr.as_bytes();
    let mut depth = 0i32;
    let mut seen_wait = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b'&' if depth == 0 => {
                let rest = expr[i + 1..].trim_start();
                if rest.starts_with("wait_") {
                    seen_wait = true;
                    return Some((&expr[..i], &expr[i + 1..]));
                }
            }
            _ => {}
        }
    }
    let _ = seen_wait;
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stop_after_attempt_and_wait_none() {
        let policy = parse_retry_policy("stop_after_attempt(5) & wait_none").unwrap();
        assert_eq!(policy.stop, StopCondition::AfterAttempt(5));
        assert_eq!(policy.wait, WaitPolicy::None);
    }

    #[test]
    fn parses_nested_stop_any() {
        let policy = parse_retry_policy("stop_any(stop_after_attempt(3), stop_after_delay(10))").unwrap();
        match policy.stop {
            StopCondition::Any(conds) => assert_eq!(conds.len(), 2),
            other => panic!("expected Any, got {other:?}"),
        }
    }

    #[test]
    fn parses_wait_exponential() {
        let policy = parse_retry_policy("wait_exponential(1, 0, 60)").unwrap();
        match policy.wait {
            WaitPolicy::Exponential { multiplier, .. } => assert_eq!(multiplier, 1.0),
            other => panic!("expected Exponential, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_constructs() {
        let err = parse_retry_policy("drop_table_users()").unwrap_err();
        assert!(matches!(err, DownloadError::Config(_)));
    }

    #[test]
    fn parses_or_and_and_operators() {
        let policy = parse_retry_policy("stop_never | stop_after_attempt(2)").unwrap();
        assert!(matches!(policy.stop, StopCondition::Or(_, _)));
    }
}
