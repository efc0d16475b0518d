use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ToolError, ToolHandler, text_argument};
use crate::tool::ToolDescriptor;

/// Evaluates a single binary operation such as `12 * 3.5`.
pub struct Calculator;

#[async_trait]
impl ToolHandler for Calculator {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "calculator",
            "Evaluate a basic arithmetic expression of the form 'a op b' with op one of + - * /",
            json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "Expression to evaluate, e.g. \"2 + 2\""
                    }
                },
                "required": ["expression"]
            }),
        )
    }

    async fn call(&self, arguments: &Value) -> Result<String, ToolError> {
        let expression = text_argument(arguments, "expression")?;
        evaluate(&expression).map(|value| value.to_string())
    }
}

fn evaluate(expression: &str) -> Result<f64, ToolError> {
    // Skip the first character so a leading sign belongs to the left operand.
    let split = expression
        .char_indices()
        .skip(1)
        .find(|&(_, c)| matches!(c, '+' | '-' | '*' | '/'))
        .map(|(i, _)| i)
        .ok_or_else(|| ToolError::InvalidParameter(format!("no operator in {expression:?}")))?;

    let left = operand(&expression[..split])?;
    let op = &expression[split..split + 1];
    let right = operand(&expression[split + 1..])?;

    match op {
        "+" => Ok(left + right),
        "-" => Ok(left - right),
        "*" => Ok(left * right),
        _ if right == 0.0 => Err(ToolError::Internal("division by zero".into())),
        _ => Ok(left / right),
    }
}

fn operand(text: &str) -> Result<f64, ToolError> {
    let text = text.trim();
    text.parse()
        .map_err(|_| ToolError::InvalidParameter(format!("not a number: {text:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn calc(expression: &str) -> Result<String, ToolError> {
        Calculator.call(&json!({ "expression": expression })).await
    }

    #[tokio::test]
    async fn basic_operations() {
        assert_eq!(calc("2 + 2").await.unwrap(), "4");
        assert_eq!(calc("10-4").await.unwrap(), "6");
        assert_eq!(calc("1.5 * 4").await.unwrap(), "6");
        assert_eq!(calc("7 / 2").await.unwrap(), "3.5");
        assert_eq!(calc("-3 + 1").await.unwrap(), "-2");
    }

    #[tokio::test]
    async fn strips_markers() {
        assert_eq!(calc("3 * 3<|im_end|>").await.unwrap(), "9");
    }

    #[tokio::test]
    async fn division_by_zero_is_internal() {
        assert_eq!(
            calc("1 / 0").await,
            Err(ToolError::Internal("division by zero".into()))
        );
    }

    #[tokio::test]
    async fn rejects_bad_input() {
        assert!(matches!(calc("two + 2").await, Err(ToolError::InvalidParameter(_))));
        assert!(matches!(calc("42").await, Err(ToolError::InvalidParameter(_))));
        assert!(matches!(
            Calculator.call(&json!({})).await,
            Err(ToolError::MissingParameter(_))
        ));
    }
}
