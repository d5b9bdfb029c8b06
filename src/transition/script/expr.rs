//! Arithmetic expression parser.
//!
//! Operator precedence parsing over `+ - * / ^` with parentheses and unary
//! minus in front of names. Operands are numbers, script variables or
//! context values. Sub-expressions made only of immediates are folded at
//! compile time.

use std::collections::HashMap;

use super::{Instruction, Op};
use crate::transition::curve::parse_simple_number;

const OPERATORS: &str = "+-*/^";

fn precedence(op: char) -> u8 {
    match op {
        '+' | '-' => 0,
        '*' | '/' => 1,
        _ => 2,
    }
}

fn char_to_op(op: char) -> Op {
    match op {
        '+' => Op::Add,
        '-' => Op::Sub,
        '*' => Op::Mul,
        '/' => Op::Div,
        _ => Op::Pow,
    }
}

/// Names an expression may refer to.
pub(super) struct Symbols<'a> {
    /// Variable name to (variable index, memory slot).
    pub vars: &'a HashMap<String, (usize, usize)>,
    /// Context name to offset in the evaluation context.
    pub context: &'a HashMap<String, usize>,
}

/// Result of compiling one expression.
#[derive(Debug, Default)]
pub(super) struct CompiledExpr {
    pub instrs: Vec<Instruction>,
    /// Indices of the variables this expression reads.
    pub deps: Vec<usize>,
    pub need_context: bool,
    /// Deepest evaluation stack the expression needs.
    pub max_stack: usize,
}

struct Parser<'a, 's> {
    input: &'s str,
    symbols: &'a Symbols<'a>,
    out: CompiledExpr,
    ops: Vec<char>,
    operands: usize,
}

impl<'a, 's> Parser<'a, 's> {
    /// Parses a number or a variable name optionally prefixed with `-`.
    fn raw_operand(&mut self, s: &'s str) -> Result<&'s str, String> {
        if let Some((number, rest)) = parse_simple_number(s) {
            self.out.instrs.push(Instruction::Imm(number));
            return Ok(rest);
        }
        let (neg, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, s),
        };
        let len = s
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
            .unwrap_or(s.len());
        if len == 0 {
            return Err(format!(
                "Expected a number or a variable name, got \"{}\".",
                s
            ));
        }
        let name = &s[..len];
        if let Some(&(index, slot)) = self.symbols.vars.get(name) {
            self.out.instrs.push(Instruction::Load(slot));
            self.out.deps.push(index);
        } else if let Some(&offset) = self.symbols.context.get(name) {
            self.out.instrs.push(Instruction::LoadCtx(offset));
            self.out.need_context = true;
        } else {
            return Err(format!("variable name \"{}\" is not defined", name));
        }
        if neg {
            self.out.instrs.push(Instruction::Op(Op::Neg));
        }
        Ok(&s[len..])
    }

    /// Parses an operand with any number of opening parentheses before it
    /// and closing parentheses after it.
    fn operand_or_paren(&mut self, mut s: &'s str) -> Result<&'s str, String> {
        while let Some(rest) = s.strip_prefix('(') {
            self.ops.push('(');
            s = rest.trim_start();
        }
        s = self.raw_operand(s)?.trim_start();
        self.operands += 1;
        self.out.max_stack = self.out.max_stack.max(self.operands);

        while let Some(rest) = s.strip_prefix(')') {
            while matches!(self.ops.last(), Some(&op) if op != '(') {
                self.pop_op()?;
            }
            if self.ops.pop().is_none() {
                return Err(format!("Unmatched ')' in expression \"{}\"", self.input));
            }
            s = rest.trim_start();
        }
        Ok(s)
    }

    fn pop_op(&mut self) -> Result<(), String> {
        let Some(op) = self.ops.pop() else {
            return Ok(());
        };
        if op == '(' {
            return Err(format!("Unmatched '(' in expression \"{}\"", self.input));
        }
        if self.operands < 2 {
            return Err(format!(
                "Missing operand for operator {}, in expression {}",
                op, self.input
            ));
        }
        self.operands -= 1;
        let op = char_to_op(op);
        let n = self.out.instrs.len();
        if let [.., Instruction::Imm(l), Instruction::Imm(r)] = self.out.instrs[..] {
            self.out.instrs.truncate(n - 1);
            self.out.instrs[n - 2] = Instruction::Imm(op.apply(l, r));
            return Ok(());
        }
        self.out.instrs.push(Instruction::Op(op));
        Ok(())
    }

    fn parse(mut self) -> Result<CompiledExpr, String> {
        let mut s = self.operand_or_paren(self.input)?;
        while let Some(c) = s.chars().next() {
            if !OPERATORS.contains(c) {
                return Err(format!("Expected one of \"{}\", got '{}'.", OPERATORS, c));
            }
            s = s[c.len_utf8()..].trim_start();
            let pre = precedence(c);
            while matches!(self.ops.last(), Some(&top) if top != '(' && pre <= precedence(top)) {
                self.pop_op()?;
            }
            self.ops.push(c);
            s = self.operand_or_paren(s)?;
        }
        while !self.ops.is_empty() {
            self.pop_op()?;
        }
        if self.operands != 1 {
            return Err(format!("excessive operand on stack {}", self.input));
        }
        Ok(self.out)
    }
}

/// Compiles `input` into instructions that leave its value in `slot`.
/// Overridable slots are written with store-over-NaN so a caller can
/// pre-fill them.
pub(super) fn compile_expression(
    input: &str,
    symbols: &Symbols<'_>,
    slot: usize,
    allow_override: bool,
) -> Result<CompiledExpr, String> {
    let input = input.trim_start();
    if input.is_empty() {
        return Err("Empty expression.".to_string());
    }
    let parser = Parser {
        input,
        symbols,
        out: CompiledExpr::default(),
        ops: Vec::new(),
        operands: 0,
    };
    let mut out = parser.parse()?;
    out.instrs.push(if allow_override {
        Instruction::StoreOverNan(slot)
    } else {
        Instruction::Store(slot)
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(input: &str) -> Result<CompiledExpr, String> {
        let vars: HashMap<String, (usize, usize)> =
            [("a".to_string(), (0, 0)), ("b-c".to_string(), (1, 1))].into();
        let context: HashMap<String, usize> = [("window-width".to_string(), 3)].into();
        let symbols = Symbols {
            vars: &vars,
            context: &context,
        };
        compile_expression(input, &symbols, 7, false)
    }

    #[test]
    fn test_constant_folding() {
        let out = compile("(1 + 2) * 3 ^ 2").unwrap();
        assert_eq!(out.instrs, [Instruction::Imm(27.0), Instruction::Store(7)]);
        let out = compile("10 - 4 - 3").unwrap();
        assert_eq!(out.instrs, [Instruction::Imm(3.0), Instruction::Store(7)]);
        let out = compile("8 / 2").unwrap();
        assert_eq!(out.instrs[0], Instruction::Imm(4.0));
    }

    #[test]
    fn test_precedence() {
        let out = compile("a + 2 * a").unwrap();
        assert_eq!(
            out.instrs,
            [
                Instruction::Load(0),
                Instruction::Imm(2.0),
                Instruction::Load(0),
                Instruction::Op(Op::Mul),
                Instruction::Op(Op::Add),
                Instruction::Store(7),
            ]
        );
        assert_eq!(out.deps, [0, 0]);
        assert_eq!(out.max_stack, 3);
    }

    #[test]
    fn test_negated_names_and_context() {
        let out = compile("- b-c * window-width").unwrap();
        assert_eq!(
            out.instrs,
            [
                Instruction::Load(1),
                Instruction::Op(Op::Neg),
                Instruction::LoadCtx(3),
                Instruction::Op(Op::Mul),
                Instruction::Store(7),
            ]
        );
        assert!(out.need_context);
        assert_eq!(out.deps, [1]);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            compile("1 @ 2 ").unwrap_err(),
            "Expected one of \"+-*/^\", got '@'."
        );
        assert_eq!(
            compile("1 + +").unwrap_err(),
            "Expected a number or a variable name, got \"+\"."
        );
        assert_eq!(
            compile("1)").unwrap_err(),
            "Unmatched ')' in expression \"1)\""
        );
        assert_eq!(
            compile("(1 + a").unwrap_err(),
            "Unmatched '(' in expression \"(1 + a\""
        );
        assert_eq!(
            compile("nope * 2").unwrap_err(),
            "variable name \"nope\" is not defined"
        );
    }
}
