//! Script compiler.
//!
//! Each variable compiles into a chain of fragments (straight-line
//! instruction blocks with a fall-through successor and an optional
//! branch-once successor). Fragments are stitched together in dependency
//! order, then laid out into one flat program.
//!
//! The program has three parts:
//!
//! - the *once* chain, executed only on the first evaluation, stores
//!   constants and static transition parameters;
//! - the *main* chain, executed on every evaluation, computes expressions
//!   and transitions;
//! - the *once-end* chain, executed at the end of the first evaluation,
//!   computes transition parameters that depend on other variables, and
//!   the total duration of the script.

use log::{debug, log_enabled, trace, Level};
use std::collections::{HashMap, VecDeque};

use super::expr::{compile_expression, Symbols};
use super::source::{ScriptSource, Variable};
use super::{Instruction, Op, Script, ScriptError};
use crate::transition::curve::Curve;

#[derive(Debug, Default)]
struct Fragment {
    instrs: Vec<Instruction>,
    /// Successor when the branch-once edge is not taken.
    next: Option<usize>,
    /// Successor on the first evaluation, if set.
    once_next: Option<usize>,
}

/// An outgoing edge of a fragment that has not been connected yet.
#[derive(Debug, Clone, Copy)]
enum Exit {
    Next(usize),
    OnceNext(usize),
}

/// A compiled variable waiting for its dependencies.
#[derive(Debug)]
struct Entry {
    entry_point: usize,
    exit: Exit,
    index: usize,
    deps: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    InProgress,
    Done,
}

struct Compiler<'a> {
    source: &'a ScriptSource,
    context: HashMap<String, usize>,
    /// Variable name to (index, slot). Slot equals index.
    vars: HashMap<String, (usize, usize)>,
    overrides: HashMap<String, usize>,
    elapsed_slot: usize,
    allocated_slots: usize,
    max_stack: usize,
    state: Vec<State>,
    fragments: Vec<Fragment>,
    head: usize,
    tail: Exit,
    once_tail: Exit,
    once_end_head: usize,
    once_end_tail: Exit,
}

fn as_number(value: &toml::Value) -> Option<f64> {
    match value {
        toml::Value::Float(f) => Some(*f),
        toml::Value::Integer(i) => Some(*i as f64),
        _ => None,
    }
}

/// How a transition parameter is loaded in the main program.
enum Param {
    Number(f64),
    Expression(String),
    Missing,
}

impl Param {
    fn lookup(table: &toml::Table, key: &str) -> Param {
        match table.get(key) {
            Some(toml::Value::String(s)) => Param::Expression(s.clone()),
            Some(value) => as_number(value).map_or(Param::Missing, Param::Number),
            None => Param::Missing,
        }
    }
}

impl<'a> Compiler<'a> {
    fn new(source: &'a ScriptSource, context: &[&str]) -> Self {
        let n = source.len();
        let vars = source
            .variables
            .iter()
            .enumerate()
            .map(|(i, v)| (v.name.clone(), (i, i)))
            .collect();
        let context = context
            .iter()
            .enumerate()
            .map(|(offset, name)| (name.to_string(), offset))
            .collect();
        let mut compiler = Self {
            source,
            context,
            vars,
            overrides: HashMap::new(),
            elapsed_slot: n,
            allocated_slots: n + 2,
            max_stack: 1,
            state: vec![State::Pending; n],
            fragments: Vec::new(),
            head: 0,
            tail: Exit::Next(0),
            once_tail: Exit::OnceNext(0),
            once_end_head: 0,
            once_end_tail: Exit::Next(0),
        };
        compiler.head = compiler.fragment(Vec::new());
        compiler.tail = Exit::Next(compiler.head);
        compiler.once_tail = Exit::OnceNext(compiler.head);
        let total_slot = compiler.elapsed_slot + 1;
        compiler.once_end_head =
            compiler.fragment(vec![Instruction::Imm(0.0), Instruction::Store(total_slot)]);
        compiler.once_end_tail = Exit::Next(compiler.once_end_head);
        compiler
    }

    fn fragment(&mut self, instrs: Vec<Instruction>) -> usize {
        self.fragments.push(Fragment {
            instrs,
            ..Default::default()
        });
        self.fragments.len() - 1
    }

    fn link(&mut self, exit: Exit, target: usize) {
        match exit {
            Exit::Next(i) => self.fragments[i].next = Some(target),
            Exit::OnceNext(i) => self.fragments[i].once_next = Some(target),
        }
    }

    fn alloc_slot(&mut self) -> usize {
        self.allocated_slots += 1;
        self.allocated_slots - 1
    }

    /// Stores an immediate in the once chain. The returned entry is an
    /// empty placeholder in the main chain.
    fn imm_entry(&mut self, imm: f64, slot: usize, allow_override: bool) -> Entry {
        let store = if allow_override {
            Instruction::StoreOverNan(slot)
        } else {
            Instruction::Store(slot)
        };
        let frag = self.fragment(vec![Instruction::Imm(imm), store]);
        self.link(self.once_tail, frag);
        self.once_tail = Exit::Next(frag);

        let empty = self.fragment(Vec::new());
        Entry {
            entry_point: empty,
            exit: Exit::Next(empty),
            index: 0,
            deps: Vec::new(),
        }
    }

    /// Compiles an expression into a new fragment. With an existing entry,
    /// the fragment is prepended to it and dependencies are merged.
    fn expression_entry(
        &mut self,
        entry: Option<Entry>,
        input: &str,
        slot: usize,
        allow_override: bool,
    ) -> Result<Entry, String> {
        let symbols = Symbols {
            vars: &self.vars,
            context: &self.context,
        };
        let compiled = compile_expression(input, &symbols, slot, allow_override)?;
        self.max_stack = self.max_stack.max(compiled.max_stack);
        let frag = self.fragment(compiled.instrs);
        Ok(match entry {
            None => Entry {
                entry_point: frag,
                exit: Exit::Next(frag),
                index: 0,
                deps: compiled.deps,
            },
            Some(mut entry) => {
                self.fragments[frag].next = Some(entry.entry_point);
                entry.entry_point = frag;
                entry.deps.extend(compiled.deps);
                entry
            }
        })
    }

    fn transition_entry(
        &mut self,
        var: &Variable,
        table: &toml::Table,
        slot: usize,
    ) -> Result<Entry, String> {
        let line = var.line;
        let curve = match table.get("curve") {
            Some(toml::Value::String(s)) => Curve::parse(s)
                .map(|(curve, _)| curve)
                .map_err(|e| format!("Cannot parse curve at line {}: {}", line, e))?,
            Some(_) => {
                return Err(format!(
                    "Invalid curve definition at line {}. `curve` must be a string.",
                    line
                ))
            }
            None => Curve::Linear,
        };
        let reset = table
            .get("reset")
            .and_then(toml::Value::as_bool)
            .unwrap_or(false);

        // The start value always takes a slot so it can be overridden.
        let start_slot = self.alloc_slot();
        if !reset {
            self.overrides.insert(var.name.clone(), start_slot);
        }
        let start = match Param::lookup(table, "start") {
            Param::Number(n) => self.imm_entry(n, start_slot, true),
            Param::Expression(s) => self
                .expression_entry(None, &s, start_slot, !reset)
                .map_err(|e| {
                    format!(
                        "transition has an invalid start expression: {} Line {}.",
                        e, line
                    )
                })?,
            Param::Missing => {
                return Err(format!(
                    "Transition definition does not contain a start value or expression. Line {}.",
                    line
                ))
            }
        };

        // end, duration, delay share one entry when they are expressions.
        let mut end: Option<Entry> = None;
        let mut load = |this: &mut Self, key: &str, default: Option<f64>| -> Result<Instruction, String> {
            match Param::lookup(table, key) {
                Param::Number(n) => {
                    if key == "duration" && n == 0.0 {
                        return Err(format!("Duration must be greater than 0. Line {}.", line));
                    }
                    Ok(Instruction::Imm(n))
                }
                Param::Expression(s) => {
                    let param_slot = this.alloc_slot();
                    end = Some(
                        this.expression_entry(end.take(), &s, param_slot, false)
                            .map_err(|e| {
                                format!("Transition has an invalid {} expression: {}. Line {}", key, e, line)
                            })?,
                    );
                    Ok(Instruction::Load(param_slot))
                }
                Param::Missing => default.map(Instruction::Imm).ok_or_else(|| {
                    format!(
                        "Transition definition does not contain a {} value or expression. Line {}.",
                        key, line
                    )
                }),
            }
        };
        let load_end = load(self, "end", None)?;
        let load_duration = load(self, "duration", None)?;
        let load_delay = load(self, "delay", Some(0.0))?;

        let elapsed = self.elapsed_slot;
        let total = elapsed + 1;
        let main = self.fragment(vec![
            load_end,
            Instruction::Load(start_slot),
            Instruction::Op(Op::Sub),
            Instruction::Load(elapsed),
            load_delay,
            Instruction::Op(Op::Sub),
            load_duration,
            Instruction::Op(Op::Div),
            Instruction::Curve(curve),
            Instruction::Op(Op::Mul),
            Instruction::Load(start_slot),
            Instruction::Op(Op::Add),
            Instruction::Store(slot),
        ]);
        let total_duration = self.fragment(vec![
            load_duration,
            load_delay,
            Instruction::Op(Op::Add),
            Instruction::Load(total),
            Instruction::Op(Op::Max),
            Instruction::Store(total),
        ]);
        self.max_stack = self.max_stack.max(3);

        // A start value with dependencies is computed on the first
        // evaluation in place. Otherwise it joins the once chain.
        let head_exit = if start.deps.is_empty() {
            self.link(self.once_tail, start.entry_point);
            self.once_tail = start.exit;
            None
        } else {
            let branch = self.fragment(Vec::new());
            self.fragments[branch].once_next = Some(start.entry_point);
            let phi = self.fragment(Vec::new());
            self.link(start.exit, phi);
            self.fragments[branch].next = Some(phi);
            Some((branch, Exit::Next(phi)))
        };

        let (body, exit) = match end {
            Some(end) if !end.deps.is_empty() => {
                // Parameters that read other variables are only known at
                // the end of the first evaluation. Until then the output is
                // the start value.
                self.link(self.once_end_tail, end.entry_point);
                self.once_end_tail = end.exit;

                let load_store = self.fragment(vec![
                    Instruction::Load(start_slot),
                    Instruction::Store(slot),
                ]);
                let branch = self.fragment(Vec::new());
                self.fragments[branch].once_next = Some(load_store);
                self.fragments[branch].next = Some(main);
                let phi = self.fragment(Vec::new());
                self.fragments[load_store].next = Some(phi);
                self.fragments[main].next = Some(phi);
                (branch, Exit::Next(phi))
            }
            end => {
                if let Some(end) = end {
                    self.link(self.once_tail, end.entry_point);
                    self.once_tail = end.exit;
                }
                (main, Exit::Next(main))
            }
        };

        self.link(self.once_end_tail, total_duration);
        self.once_end_tail = Exit::Next(total_duration);

        let entry_point = match head_exit {
            Some((branch, phi_exit)) => {
                self.link(phi_exit, body);
                branch
            }
            None => body,
        };
        Ok(Entry {
            entry_point,
            exit,
            index: 0,
            deps: start.deps,
        })
    }

    fn compile_one(&mut self, index: usize) -> Result<Entry, String> {
        let source = self.source;
        let var = &source.variables[index];
        let slot = index;
        let mut entry = match &var.value {
            toml::Value::String(s) => self
                .expression_entry(None, s, slot, false)
                .map_err(|e| format!("Failed to parse expression at line {}. {}", var.line, e))?,
            toml::Value::Table(table) => self.transition_entry(var, table, slot)?,
            value => match as_number(value) {
                Some(n) => self.imm_entry(n, slot, false),
                None => {
                    return Err(format!(
                        "Invalid variable \"{}\", it must be either a number, a string, or a config group defining a transition.",
                        var.name
                    ))
                }
            },
        };
        entry.index = index;
        self.state[index] = State::InProgress;
        Ok(entry)
    }

    fn report_cycle(&self, stack: &[Entry], dep: usize) -> String {
        let start = stack.iter().rposition(|e| e.index == dep).unwrap_or(0);
        let names = &self.source.variables;
        let mut path: Vec<&str> = stack[start..]
            .iter()
            .map(|e| names[e.index].name.as_str())
            .collect();
        path.push(&names[dep].name);
        format!(
            "Cyclic references detected in animation script defined at line {}: {}",
            self.source.line,
            path.join(" -> ")
        )
    }

    /// Depth first compilation of variable `index` and everything it
    /// depends on, with an explicit stack so cycles can be reported with
    /// their full path.
    fn compile_with_deps(&mut self, index: usize) -> Result<(), String> {
        let mut stack = vec![self.compile_one(index)?];
        while let Some(top) = stack.last_mut() {
            if let Some(dep) = top.deps.pop() {
                match self.state[dep] {
                    State::Done => {}
                    State::InProgress => return Err(self.report_cycle(&stack, dep)),
                    State::Pending => {
                        let entry = self.compile_one(dep)?;
                        stack.push(entry);
                    }
                }
                continue;
            }
            let Some(done) = stack.pop() else { break };
            self.link(self.tail, done.entry_point);
            self.tail = done.exit;
            self.state[done.index] = State::Done;
        }
        Ok(())
    }

    fn finish(mut self) -> Script {
        let once_end = self.fragment(Vec::new());
        self.link(self.tail, once_end);
        self.fragments[once_end].once_next = Some(self.once_end_head);
        if let Some(main) = self.fragments[self.head].next {
            self.link(self.once_tail, main);
        }

        self.prune();
        let instructions = self.codegen();
        let vars = self
            .vars
            .into_iter()
            .map(|(name, (_, slot))| (name, slot))
            .collect();
        Script {
            instructions,
            vars,
            overrides: self.overrides,
            elapsed_slot: self.elapsed_slot,
            n_slots: self.allocated_slots,
            stack_size: self.max_stack,
        }
    }

    /// Skips empty fragments and drops branch-once edges that lead to the
    /// fall-through successor anyway.
    fn prune(&mut self) {
        let skip_empty = |fragments: &[Fragment], mut target: Option<usize>| {
            while let Some(t) = target {
                let f = &fragments[t];
                if !f.instrs.is_empty() || f.once_next.is_some() {
                    break;
                }
                target = f.next;
            }
            target
        };
        let mut changed = true;
        while changed {
            changed = false;
            for f in &mut self.fragments {
                if f.next.is_some() && f.once_next == f.next {
                    f.once_next = None;
                    changed = true;
                }
            }
            for i in 0..self.fragments.len() {
                let next = skip_empty(self.fragments.as_slice(), self.fragments[i].next);
                let once_next = skip_empty(self.fragments.as_slice(), self.fragments[i].once_next);
                let f = &mut self.fragments[i];
                changed |= next != f.next || once_next != f.once_next;
                f.next = next;
                f.once_next = once_next;
            }
        }
    }

    /// Lays out reachable fragments breadth first, falling through to the
    /// successor where possible, and emits branches everywhere else.
    fn codegen(&self) -> Vec<Instruction> {
        let n = self.fragments.len();
        let mut addr = vec![0usize; n];
        let mut placed = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let mut queue = VecDeque::from([self.head]);
        placed[self.head] = true;
        let mut pos = 0;
        while let Some(first) = queue.pop_front() {
            let mut curr = first;
            loop {
                let f = &self.fragments[curr];
                addr[curr] = pos;
                placed[curr] = true;
                order.push(curr);
                pos += f.instrs.len();
                if let Some(once) = f.once_next {
                    pos += 1;
                    if !placed[once] {
                        placed[once] = true;
                        queue.push_back(once);
                    }
                }
                match f.next {
                    Some(next) if !placed[next] => curr = next,
                    _ => {
                        pos += 1;
                        break;
                    }
                }
            }
        }

        let mut code = vec![Instruction::Halt; pos];
        for &i in &order {
            let f = &self.fragments[i];
            let mut at = addr[i];
            code[at..at + f.instrs.len()].copy_from_slice(&f.instrs);
            at += f.instrs.len();
            if let Some(once) = f.once_next {
                code[at] = Instruction::BranchOnce(addr[once] as isize - at as isize);
                at += 1;
            }
            match f.next {
                Some(next) if addr[next] != at => {
                    code[at] = Instruction::Branch(addr[next] as isize - at as isize)
                }
                Some(_) => {}
                None => code[at] = Instruction::Halt,
            }
        }
        code
    }
}

/// Compiles `source` against the given context variable names. A context
/// name's offset is its index in `context`.
pub fn compile(source: &ScriptSource, context: &[&str]) -> Result<Script, ScriptError> {
    let mut compiler = Compiler::new(source, context);
    for index in 0..source.len() {
        if compiler.state[index] != State::Pending {
            continue;
        }
        compiler
            .compile_with_deps(index)
            .map_err(ScriptError::Compile)?;
    }
    let script = compiler.finish();
    debug!(
        "Compiled script at line {}, total instructions: {}, slots: {}, stack size: {}, \
         memory[{}] = total duration, memory[{}] = elapsed",
        source.line,
        script.instructions.len(),
        script.n_slots,
        script.stack_size,
        script.elapsed_slot + 1,
        script.elapsed_slot
    );
    if log_enabled!(Level::Trace) {
        for (i, inst) in script.instructions.iter().enumerate() {
            trace!("{}: {:?}", i, inst);
        }
    }
    Ok(script)
}
