//! Animation scripts
//!
//! A script is a set of named variables compiled into bytecode for a small
//! stack machine. Variables are constants, arithmetic expressions over other
//! variables and context values, or transitions easing from a start value
//! to an end value over a duration.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use lucent::transition::script::{Script, ScriptInstance, ScriptSource};
//!
//! let source: ScriptSource = r#"
//! opacity = { duration = 1, start = 0, end = 1 }
//! shadow-opacity = "opacity * 0.5"
//! "#
//! .parse()
//! .unwrap();
//! let script = Arc::new(Script::compile(&source, &[]).unwrap());
//! let mut instance = ScriptInstance::new(script);
//!
//! // The first evaluation, at elapsed time zero, fixes the start values.
//! instance.evaluate(&[]).unwrap();
//! assert_eq!(instance.value("opacity"), Some(0.0));
//!
//! instance.advance(0.5);
//! instance.evaluate(&[]).unwrap();
//! let opacity = instance.value("opacity").unwrap();
//! let shadow = instance.value("shadow-opacity").unwrap();
//! println!("opacity = {}, shadow-opacity = {}", opacity, shadow);
//! assert_eq!((opacity, shadow), (0.5, 0.25));
//! assert!(!instance.is_finished());
//! ```

mod compile;
mod expr;
pub mod source;
mod vm;


use std::collections::HashMap;
use thiserror::Error;

use crate::transition::curve::Curve;

pub use source::{ScriptSource, Variable};
pub use vm::ScriptInstance;

/// Arithmetic operators understood by the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Max,
}

impl Op {
    /// Applies a binary operator. `Neg` ignores `r`.
    pub fn apply(self, l: f64, r: f64) -> f64 {
        match self {
            Op::Add => l + r,
            Op::Sub => l - r,
            Op::Mul => l * r,
            Op::Div => l / r,
            Op::Pow => l.powf(r),
            Op::Neg => -l,
            Op::Max => l.max(r),
        }
    }
}

/// One VM instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    /// Push an immediate.
    Imm(f64),
    /// Pop operands, push the result.
    Op(Op),
    /// Push a memory slot.
    Load(usize),
    /// Push a value from the evaluation context.
    LoadCtx(usize),
    /// Pop into a memory slot.
    Store(usize),
    /// Pop into a memory slot, only if the slot holds NaN.
    StoreOverNan(usize),
    /// Replace the top of the stack with the curve sampled at it, clamped
    /// to `[0, 1]`.
    Curve(Curve),
    /// Jump by a relative offset on the first evaluation only.
    BranchOnce(isize),
    /// Jump by a relative offset.
    Branch(isize),
    Halt,
}

/// Failure to compile a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{0}")]
    Compile(String),
    #[error("failed to parse animation script: {0}")]
    Syntax(#[from] toml::de::Error),
}

/// Failure during evaluation. The instance's memory is left as it was
/// when the bad value appeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("script evaluation produced NaN")]
    Nan,
    #[error("script evaluation produced an infinite value")]
    Inf,
}

/// An immutable compiled script, shared between instances.
#[derive(Debug, Clone)]
pub struct Script {
    instructions: Vec<Instruction>,
    /// Variable name to memory slot.
    vars: HashMap<String, usize>,
    /// Transition name to the slot holding its overridable start value.
    overrides: HashMap<String, usize>,
    elapsed_slot: usize,
    n_slots: usize,
    stack_size: usize,
}

impl Script {
    /// Compiles a script. Each name in `context` can be referenced from
    /// expressions; its value is read at evaluation time from the context
    /// slice at the name's index.
    pub fn compile(source: &ScriptSource, context: &[&str]) -> Result<Script, ScriptError> {
        compile::compile(source, context)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Memory slot holding variable `name`.
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.vars.get(name).copied()
    }

    /// Memory slot of the overridable start value of transition `name`.
    pub fn override_slot(&self, name: &str) -> Option<usize> {
        self.overrides.get(name).copied()
    }

    pub fn elapsed_slot(&self) -> usize {
        self.elapsed_slot
    }

    pub fn total_duration_slot(&self) -> usize {
        self.elapsed_slot + 1
    }

    pub fn n_slots(&self) -> usize {
        self.n_slots
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Replaces context loads with constants. `values` pairs a context
    /// offset with its fixed value; other offsets are left alone.
    pub fn specialize(&mut self, values: &[(usize, f64)]) {
        for inst in &mut self.instructions {
            if let Instruction::LoadCtx(offset) = *inst {
                if let Some(&(_, value)) = values.iter().find(|(o, _)| *o == offset) {
                    *inst = Instruction::Imm(value);
                }
            }
        }
    }
}
