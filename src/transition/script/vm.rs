//! Script instances and the evaluator.

use std::sync::Arc;

use super::{EvalError, Instruction, Op, Script};

/// Evaluation state of one running script.
///
/// Memory starts out as NaN everywhere except the elapsed time, which
/// starts at zero. NaN marks a value that has not been produced yet.
#[derive(Debug, Clone)]
pub struct ScriptInstance {
    script: Arc<Script>,
    memory: Vec<f64>,
    stack: Vec<f64>,
}

impl ScriptInstance {
    pub fn new(script: Arc<Script>) -> Self {
        let mut memory = vec![f64::NAN; script.n_slots.max(1)];
        memory[script.elapsed_slot] = 0.0;
        let stack = Vec::with_capacity(script.stack_size);
        Self {
            script,
            memory,
            stack,
        }
    }

    pub fn script(&self) -> &Arc<Script> {
        &self.script
    }

    pub fn memory(&self) -> &[f64] {
        &self.memory
    }

    pub fn get(&self, slot: usize) -> f64 {
        self.memory.get(slot).copied().unwrap_or(f64::NAN)
    }

    /// Overwrites a memory slot. Out of range slots are ignored.
    pub fn set(&mut self, slot: usize, value: f64) {
        if let Some(v) = self.memory.get_mut(slot) {
            *v = value;
        }
    }

    /// Current value of variable `name`.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.script.slot(name).map(|slot| self.memory[slot])
    }

    pub fn elapsed(&self) -> f64 {
        self.memory[self.script.elapsed_slot]
    }

    pub fn set_elapsed(&mut self, elapsed: f64) {
        self.memory[self.script.elapsed_slot] = elapsed;
    }

    /// Moves the clock forward by `dt` seconds.
    pub fn advance(&mut self, dt: f64) {
        self.memory[self.script.elapsed_slot] += dt;
    }

    /// Total duration of all transitions, known after the first evaluation.
    pub fn total_duration(&self) -> f64 {
        self.memory[self.script.total_duration_slot()]
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed() >= self.total_duration()
    }

    /// Seeds the overridable start values of this instance's transitions
    /// from the current values of same-named variables in `old`, so a new
    /// animation continues from where the interrupted one was.
    pub fn resume_from(&mut self, old: &ScriptInstance) {
        for (name, &slot) in &self.script.overrides {
            if let Some(src) = old.script.slot(name) {
                self.memory[slot] = old.memory[src];
            }
        }
    }

    /// Runs the program once. `context` supplies values for context loads;
    /// missing entries read as NaN.
    pub fn evaluate(&mut self, context: &[f64]) -> Result<(), EvalError> {
        let Self {
            script,
            memory,
            stack,
        } = self;
        stack.clear();
        let do_once = memory[script.elapsed_slot] == 0.0;
        let pop = |stack: &mut Vec<f64>| stack.pop().unwrap_or(f64::NAN);
        let mut pc = 0usize;
        while let Some(&inst) = script.instructions.get(pc) {
            let mut next = pc + 1;
            match inst {
                Instruction::Imm(value) => stack.push(value),
                Instruction::Load(slot) => stack.push(memory[slot]),
                Instruction::LoadCtx(offset) => {
                    stack.push(context.get(offset).copied().unwrap_or(f64::NAN))
                }
                Instruction::Store(slot) => memory[slot] = pop(stack),
                Instruction::StoreOverNan(slot) => {
                    let value = pop(stack);
                    if memory[slot].is_nan() {
                        memory[slot] = value;
                    }
                }
                Instruction::Branch(rel) => next = pc.wrapping_add_signed(rel),
                Instruction::BranchOnce(rel) => {
                    if do_once {
                        next = pc.wrapping_add_signed(rel);
                    }
                }
                Instruction::Halt => return Ok(()),
                Instruction::Op(Op::Neg) => {
                    if let Some(top) = stack.last_mut() {
                        *top = -*top;
                    }
                }
                Instruction::Op(op) => {
                    let r = pop(stack);
                    let l = pop(stack);
                    stack.push(op.apply(l, r));
                }
                Instruction::Curve(curve) => {
                    if let Some(top) = stack.last_mut() {
                        *top = curve.sample(top.clamp(0.0, 1.0));
                    }
                }
            }
            if let Some(&top) = stack.last() {
                if top.is_nan() {
                    return Err(EvalError::Nan);
                }
                if top.is_infinite() {
                    return Err(EvalError::Inf);
                }
            }
            pc = next;
        }
        Ok(())
    }
}
