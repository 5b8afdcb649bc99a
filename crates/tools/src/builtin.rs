use std::sync::Arc;

use async_trait::async_trait;
use clara_common::now_ms;
use serde_json::Value;

use crate::registry::{Tool, ToolRegistry};

/// Registers the gateway's built-in demonstration tools. Real deployments
/// are expected to register additional tools against the same
/// [`ToolRegistry`] before handing it to [`crate::ToolExecutorImpl`].
pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.register(Arc::new(EchoTool));
    registry.register(Arc::new(CurrentTimeTool));
    registry.register(Arc::new(CalculatorTool));
}

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo back the given text. Useful for verifying tool wiring end to end."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"],
        })
    }

    async fn execute(
        &self,
        arguments: Value,
        _user_id: &str,
        _files_buffer: &mut Vec<String>,
    ) -> Result<String, String> {
        arguments
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "missing required argument: text".to_string())
    }
}

struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current time as Unix milliseconds."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(
        &self,
        _arguments: Value,
        _user_id: &str,
        _files_buffer: &mut Vec<String>,
    ) -> Result<String, String> {
        Ok(now_ms().to_string())
    }
}

/// Evaluates a small arithmetic expression grammar (`+`, `-`, `*`, `/`,
/// parentheses, decimals). Runs on a blocking worker thread since
/// expression evaluation is CPU-bound and the executor must not stall the
/// event loop on it.
struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate a basic arithmetic expression, e.g. \"(2 + 3) * 4\"."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"expression": {"type": "string"}},
            "required": ["expression"],
        })
    }

    async fn execute(
        &self,
        arguments: Value,
        _user_id: &str,
        _files_buffer: &mut Vec<String>,
    ) -> Result<String, String> {
        let expression = arguments
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing required argument: expression".to_string())?
            .to_string();

        tokio::task::spawn_blocking(move || evaluate(&expression))
            .await
            .map_err(|e| format!("calculator task panicked: {e}"))?
            .map(|n| n.to_string())
    }
}

fn evaluate(expression: &str) -> Result<f64, String> {
    let tokens = tokenize(expression)?;
    let mut parser = ExprParser { tokens: &tokens, pos: 0 };
    let value = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("unexpected trailing input".to_string());
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number: {text}"))?;
                tokens.push(Token::Number(n));
            }
            other => return Err(format!("unexpected character: {other}")),
        }
    }
    Ok(tokens)
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_expr(&mut self) -> Result<f64, String> {
        let mut value = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value += self.parse_term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value -= self.parse_term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_term(&mut self) -> Result<f64, String> {
        let mut value = self.parse_factor()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    value *= self.parse_factor()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let divisor = self.parse_factor()?;
                    if divisor == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_factor(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.parse_factor()?)
            }
            Some(Token::Number(n)) => {
                let n = *n;
                self.pos += 1;
                Ok(n)
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let value = self.parse_expr()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err("expected closing parenthesis".to_string()),
                }
            }
            other => Err(format!("unexpected token: {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_operator_precedence() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
    }

    #[test]
    fn evaluates_parentheses() {
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(evaluate("1 / 0").is_err());
    }

    #[tokio::test]
    async fn calculator_tool_executes_on_blocking_thread() {
        let tool = CalculatorTool;
        let mut files = Vec::new();
        let output = tool
            .execute(serde_json::json!({"expression": "10 / 2"}), "u1", &mut files)
            .await
            .unwrap();
        assert_eq!(output, "5");
    }
}
