//! The einsum expression parser (component H): turns a bracketed
//! expression string into an [`EinsumNode`] tree.
//!
//! Grounded on `examples/original_source/src/einsum/EinsumTree.cpp`'s
//! `parse_einsum_expression`/`parse_einsum_expression_recursive`/
//! `get_dimensions_from_expression`: find the rightmost (hence
//! outermost, per the grammar's structure) `->`, bracket-depth-track the
//! left side for a top-level comma, and recurse. The character
//! allowlist and explicit bracket-balance check are this crate's own
//! addition — the original only ever throws on invalid characters
//! (never checks balance directly, relying on the recursive descent to
//! panic-via-index-out-of-bounds instead), which this port replaces
//! with a proper `ExprError::UnbalancedBrackets`.

use super::node::{EinsumNode, ExprError, ExprResult};

const ALLOWED: &[u8] = b"[]->,0123456789";

/// Parses a bracketed einsum expression (§4.5/§6 grammar) into its root
/// [`EinsumNode`]. The resulting tree is unlowered: call
/// [`EinsumNode::lower`] before [`EinsumNode::execute`].
pub fn parse_einsum_expression(expr: &str) -> ExprResult<EinsumNode> {
    validate_chars(expr)?;
    validate_balanced(expr)?;
    if !expr.contains("->") {
        return Err(ExprError::MalformedDims(expr.to_string()));
    }

    match parse_rec(expr)? {
        Some(node) => Ok(*node),
        None => Err(ExprError::EmptyExpression),
    }
}

fn validate_chars(expr: &str) -> ExprResult<()> {
    for c in expr.chars() {
        if !c.is_ascii() || !ALLOWED.contains(&(c as u8)) {
            return Err(ExprError::InvalidChar(c));
        }
    }
    Ok(())
}

fn validate_balanced(expr: &str) -> ExprResult<()> {
    let mut depth = 0i32;
    for c in expr.chars() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(ExprError::UnbalancedBrackets(expr.to_string()));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ExprError::UnbalancedBrackets(expr.to_string()));
    }
    Ok(())
}

fn parse_rec(s: &str) -> ExprResult<Option<Box<EinsumNode>>> {
    if s.is_empty() {
        return Ok(None);
    }

    match s.rfind("->") {
        Some(pos) => {
            let inputs = &s[..pos];
            let output_bracketed = &s[pos + 2..];
            let output_inner = strip_one_bracket_layer(output_bracketed)?;
            let (left_str, right_str) = split_inputs(inputs)?;
            if left_str.is_empty() {
                return Err(ExprError::MalformedDims(inputs.to_string()));
            }

            let left = parse_rec(left_str)?;
            let right = parse_rec(right_str)?;
            let out_ids = parse_dims(output_inner)?;

            Ok(Some(Box::new(EinsumNode::new(out_ids, output_inner.to_string(), left, right))))
        }
        None => {
            let out_ids = parse_dims(s)?;
            Ok(Some(Box::new(EinsumNode::new(out_ids, s.to_string(), None, None))))
        }
    }
}

/// Splits the bracketed operand-list preceding a `->` into its left and
/// right sub-expressions (right is `""` for a unary/permutation node),
/// bracket-depth-tracking to find the top-level comma so nested operand
/// brackets don't confuse the split.
fn split_inputs(inputs: &str) -> ExprResult<(&str, &str)> {
    if !inputs.starts_with('[') || !inputs.ends_with(']') {
        return Err(ExprError::UnbalancedBrackets(inputs.to_string()));
    }

    let bytes = inputs.as_bytes();
    let mut depth = 0i32;
    let mut split_pos: Option<usize> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => depth -= 1,
            b',' if depth == 0 => {
                split_pos = Some(i);
                break;
            }
            _ => {}
        }
    }

    match split_pos {
        Some(comma) => {
            if comma < 2 || comma + 2 >= inputs.len() {
                return Err(ExprError::UnbalancedBrackets(inputs.to_string()));
            }
            let left = &inputs[1..comma - 1];
            let right = &inputs[comma + 2..inputs.len() - 1];
            Ok((left, right))
        }
        None => Ok((&inputs[1..inputs.len() - 1], "")),
    }
}

fn strip_one_bracket_layer(s: &str) -> ExprResult<&str> {
    if s.len() < 2 || !s.starts_with('[') || !s.ends_with(']') {
        return Err(ExprError::UnbalancedBrackets(s.to_string()));
    }
    Ok(&s[1..s.len() - 1])
}

fn parse_dims(s: &str) -> ExprResult<Vec<i64>> {
    if s.is_empty() {
        return Err(ExprError::MalformedDims(s.to_string()));
    }
    s.split(',')
        .map(|tok| tok.parse::<i64>().map_err(|_| ExprError::MalformedDims(s.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_character() {
        assert_eq!(parse_einsum_expression("[a,0]->[0,1]"), Err(ExprError::InvalidChar('a')));
    }

    #[test]
    fn rejects_unbalanced_brackets() {
        assert!(matches!(parse_einsum_expression("[2,0],[1,2]->[1,0"), Err(ExprError::UnbalancedBrackets(_))));
    }

    #[test]
    fn parses_matmul_expression() {
        let root = parse_einsum_expression("[2,0],[1,2]->[1,0]").unwrap();
        assert_eq!(root.output_dimension_ids, vec![1, 0]);
        assert!(!root.is_leaf());
        let left = root.left.as_ref().unwrap();
        let right = root.right.as_ref().unwrap();
        assert_eq!(left.output_dimension_ids, vec![2, 0]);
        assert_eq!(right.output_dimension_ids, vec![1, 2]);
        assert!(left.is_leaf());
        assert!(right.is_leaf());
    }

    #[test]
    fn parses_unary_permutation() {
        let root = parse_einsum_expression("[3,2,1,0]->[3,1,2,0]").unwrap();
        assert_eq!(root.output_dimension_ids, vec![3, 1, 2, 0]);
        assert!(root.right.is_none());
        let left = root.left.as_ref().unwrap();
        assert_eq!(left.output_dimension_ids, vec![3, 2, 1, 0]);
        assert!(left.is_leaf());
    }

    #[test]
    fn parses_nested_subtree_with_relaxed_outer_brackets() {
        // A sub-expression used as a single operand, wrapped in an
        // extra bracket layer per the grammar's stated relaxation.
        let expr = "[[2,0],[1,2]->[1,0]],[4,5]->[4,5]";
        let root = parse_einsum_expression(expr).unwrap();
        assert_eq!(root.output_dimension_ids, vec![4, 5]);
        let left = root.left.as_ref().unwrap();
        assert!(!left.is_leaf());
        assert_eq!(left.output_dimension_ids, vec![1, 0]);
    }

    #[test]
    fn round_trips_through_to_string_tree() {
        let root = parse_einsum_expression("[2,0],[1,2]->[1,0]").unwrap();
        assert_eq!(root.to_string_tree(), "([2,0] . [1,2] -> [1,0])");
    }
}
