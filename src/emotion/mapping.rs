/// Robot expression and emotion for one detected emotion type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expression {
    pub expression: &'static str,
    pub emotion: &'static str,
}

pub const DEFAULT_EXPRESSION: Expression = Expression {
    expression: "none",
    emotion: "indifferent",
};

/// Fixed lookup, case-insensitive on the emotion type.
pub fn expression_for(kind: &str) -> Expression {
    let (expression, emotion) = match kind.to_lowercase().as_str() {
        "anger" => ("angry", "indifferent"),
        "calm" => ("curious", "curious"),
        "disgusted" => ("scared", "indifferent"),
        "happy" => ("happy", "happy"),
        "sad" => ("sad", "sad"),
        "surprised" => ("startled", "indifferent"),
        _ => return DEFAULT_EXPRESSION,
    };
    Expression {
        expression,
        emotion,
    }
}
