//! A small extension showing how tools and prompt text are contributed.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::extension::Extension;
use crate::permission::Confirmer;
use crate::tools::{ExecutionResult, ToolHandler};

const PROMPT: &str = "\
[example extension]
Simple demonstration tools. They need no special permission.
- @hello(name) greets someone, e.g. @hello(Alice)
- @get_time() returns the current local time
- @calculate(expression) evaluates arithmetic with + - * / and parentheses, e.g. @calculate(2+3*4)
- @repeat(text,count) repeats text up to 100 times, e.g. @repeat(hi,3)";

const MAX_REPEAT: usize = 100;

pub struct ExampleExtension;

impl Extension for ExampleExtension {
    fn name(&self) -> &str {
        "example"
    }

    fn description(&self) -> &str {
        "Demonstration tools: greetings, clock, calculator, repeat"
    }

    fn author(&self) -> &str {
        "iflow"
    }

    fn prompt_text(&self) -> String {
        PROMPT.to_string()
    }

    fn tools(&self) -> BTreeMap<String, Arc<dyn ToolHandler>> {
        let mut tools: BTreeMap<String, Arc<dyn ToolHandler>> = BTreeMap::new();
        tools.insert("hello".to_string(), Arc::new(Hello));
        tools.insert("get_time".to_string(), Arc::new(GetTime));
        tools.insert("calculate".to_string(), Arc::new(Calculate));
        tools.insert("repeat".to_string(), Arc::new(Repeat));
        tools
    }

    fn on_load(&self) -> anyhow::Result<()> {
        debug!("Example extension loaded");
        Ok(())
    }
}

struct Hello;

#[async_trait]
impl ToolHandler for Hello {
    async fn execute(
        &self,
        args: &str,
        _confirmer: &dyn Confirmer,
    ) -> anyhow::Result<ExecutionResult> {
        let name = match args.trim() {
            "" => "friend",
            name => name,
        };
        Ok(ExecutionResult::ok(format!(
            "Hello, {}! Nice to meet you.",
            name
        )))
    }

    fn description(&self) -> &str {
        "Greet someone: @hello(name)"
    }
}

struct GetTime;

#[async_trait]
impl ToolHandler for GetTime {
    async fn execute(
        &self,
        _args: &str,
        _confirmer: &dyn Confirmer,
    ) -> anyhow::Result<ExecutionResult> {
        let now = chrono::Local::now();
        Ok(ExecutionResult::ok(format!(
            "Current time: {}",
            now.format("%Y-%m-%d %H:%M:%S %A")
        )))
    }

    fn description(&self) -> &str {
        "Current local time: @get_time()"
    }
}

struct Calculate;

#[async_trait]
impl ToolHandler for Calculate {
    async fn execute(
        &self,
        args: &str,
        _confirmer: &dyn Confirmer,
    ) -> anyhow::Result<ExecutionResult> {
        let expression = args.trim();
        Ok(match evaluate(expression) {
            Ok(value) => ExecutionResult::ok(format!("{} = {}", expression, format_number(value))),
            Err(e) => ExecutionResult::failure(e),
        })
    }

    fn description(&self) -> &str {
        "Evaluate arithmetic: @calculate(expression)"
    }
}

struct Repeat;

#[async_trait]
impl ToolHandler for Repeat {
    async fn execute(
        &self,
        args: &str,
        _confirmer: &dyn Confirmer,
    ) -> anyhow::Result<ExecutionResult> {
        let Some((text, count)) = args.split_once(',') else {
            return Ok(ExecutionResult::failure(
                "invalid arguments, expected: text,count",
            ));
        };
        let Ok(count) = count.trim().parse::<i64>() else {
            return Ok(ExecutionResult::failure("count must be a number"));
        };
        if count <= 0 {
            return Ok(ExecutionResult::failure("count must be greater than 0"));
        }
        if count > MAX_REPEAT as i64 {
            return Ok(ExecutionResult::failure(format!(
                "count cannot exceed {}",
                MAX_REPEAT
            )));
        }

        let text = text.trim();
        let repeated = vec![text; count as usize].join(" ");
        Ok(ExecutionResult::ok(repeated))
    }

    fn description(&self) -> &str {
        "Repeat text: @repeat(text,count)"
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Evaluate `+ - * /` with parentheses and unary signs over decimal numbers.
fn evaluate(expression: &str) -> Result<f64, String> {
    if let Some(c) = expression
        .chars()
        .find(|c| !c.is_ascii_digit() && !"+-*/.() ".contains(*c))
    {
        return Err(format!(
            "unsupported character '{}', only digits and + - * / ( ) are allowed",
            c
        ));
    }

    let tokens: Vec<char> = expression.chars().filter(|c| *c != ' ').collect();
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err("syntax error".to_string());
    }
    if !value.is_finite() {
        return Err("result is not a finite number".to_string());
    }
    Ok(value)
}

/// Deepest run of unary signs and parentheses the parser will follow.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.tokens.get(self.pos).copied()
    }

    fn expression(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == '/' {
                if rhs == 0.0 {
                    return Err("division by zero".to_string());
                }
                value /= rhs;
            } else {
                value *= rhs;
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, String> {
        if self.depth >= MAX_NESTING {
            return Err("expression nested too deeply".to_string());
        }
        self.depth += 1;
        let value = self.unary();
        self.depth -= 1;
        value
    }

    fn unary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some('+') => {
                self.pos += 1;
                self.factor()
            }
            Some('(') => {
                self.pos += 1;
                let value = self.expression()?;
                if self.peek() != Some(')') {
                    return Err("syntax error: missing ')'".to_string());
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            _ => Err("syntax error".to_string()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let literal: String = self.tokens[start..self.pos].iter().collect();
        literal
            .parse::<f64>()
            .map_err(|_| format!("syntax error: bad number '{}'", literal))
    }
}
