//! Code-generation backends for traced expressions.
//!
//! Two interchangeable engines compile a list of [`Sym`] outputs into an
//! in-place numerical evaluator:
//!
//! - [`Backend::Tape`] flattens the DAG into a bytecode program — an opcode
//!   array with `[u32; 2]` operand slots and a value scratch overwritten on
//!   every sweep. Re-evaluation allocates nothing.
//! - [`Backend::Graph`] interprets the DAG directly with a per-call memo
//!   table keyed by node identity.
//!
//! The engine choice is made once at compile time; after compilation the
//! evaluator is a concrete enum, so the dispatch cost in the hot path is a
//! match on a small tag, not a virtual call.

use std::collections::HashMap;

use crate::expr::{self, eval_binary, eval_unary, BinaryOp, Node, Sym, UnaryOp};

/// Which symbolic engine generates the numerical evaluators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Memoized interpretation of the expression DAG.
    Graph,
    /// Flattened bytecode program with a reusable value scratch.
    Tape,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Tape
    }
}

/// Engine-specific tuning knobs, all optional.
#[derive(Clone, Debug, Default)]
pub struct BackendOptions {
    /// Pre-allocation hint for the tape backend's program length.
    pub tape_capacity: Option<usize>,
}

impl Backend {
    /// Compile `exprs` into an in-place evaluator over an input vector of
    /// length `num_inputs`.
    pub fn build_function(
        &self,
        exprs: &[Sym],
        num_inputs: usize,
        options: &BackendOptions,
    ) -> CompiledFn {
        match self {
            Backend::Graph => CompiledFn::Graph(GraphProgram::new(exprs, num_inputs)),
            Backend::Tape => CompiledFn::Tape(TapeProgram::new(
                exprs,
                num_inputs,
                options.tape_capacity.unwrap_or(num_inputs * 8),
            )),
        }
    }
}

/// A compiled in-place evaluator: `call(out, input)` writes one value per
/// compiled expression.
#[derive(Debug)]
pub enum CompiledFn {
    Graph(GraphProgram),
    Tape(TapeProgram),
}

impl CompiledFn {
    pub fn call(&mut self, out: &mut [f64], input: &[f64]) {
        match self {
            CompiledFn::Graph(p) => p.call(out, input),
            CompiledFn::Tape(p) => p.call(out, input),
        }
    }

    /// Number of output values written per call.
    pub fn num_outputs(&self) -> usize {
        match self {
            CompiledFn::Graph(p) => p.exprs.len(),
            CompiledFn::Tape(p) => p.outputs.len(),
        }
    }
}

// ── Graph backend ──

/// DAG interpreter with per-call memoization.
#[derive(Debug)]
pub struct GraphProgram {
    exprs: Vec<Sym>,
    num_inputs: usize,
    cache: HashMap<*const Node, f64>,
}

impl GraphProgram {
    fn new(exprs: &[Sym], num_inputs: usize) -> Self {
        GraphProgram {
            exprs: exprs.to_vec(),
            num_inputs,
            cache: HashMap::new(),
        }
    }

    fn call(&mut self, out: &mut [f64], input: &[f64]) {
        debug_assert_eq!(input.len(), self.num_inputs, "wrong number of inputs");
        debug_assert_eq!(out.len(), self.exprs.len(), "wrong number of outputs");
        self.cache.clear();
        for (slot, e) in self.exprs.iter().enumerate() {
            out[slot] = eval_cached(e, input, &mut self.cache);
        }
    }
}

fn eval_cached(expr: &Sym, input: &[f64], cache: &mut HashMap<*const Node, f64>) -> f64 {
    if let Some(&v) = cache.get(&expr.ptr()) {
        return v;
    }
    let v = match &*expr.0 {
        Node::Var(i) => input[*i as usize],
        Node::Const(c) => *c,
        Node::Unary(op, a) => eval_unary(*op, eval_cached(a, input, cache)),
        Node::Binary(op, a, b) => {
            let va = eval_cached(a, input, cache);
            let vb = eval_cached(b, input, cache);
            eval_binary(*op, va, vb)
        }
        Node::Powi(a, k) => eval_cached(a, input, cache).powi(*k),
    };
    cache.insert(expr.ptr(), v);
    v
}

// ── Tape backend ──

/// Opcodes of the flattened program. `Input` and `Const` slots are skipped
/// by the forward sweep; their values live in the scratch already.
#[derive(Clone, Copy, Debug)]
enum Op {
    Input,
    Const,
    Un(UnaryOp),
    Bin(BinaryOp),
    /// Integer power; the exponent is stashed in the second operand slot.
    Powi,
}

/// Sentinel for an unused second operand slot.
const UNUSED: u32 = u32::MAX;

/// Bytecode program: structure-of-arrays layout, one value slot per node.
///
/// The first `num_inputs` slots are the input variables, so a sweep starts
/// by copying the input over them and then evaluates the remaining ops in
/// recorded (topological) order.
#[derive(Debug)]
pub struct TapeProgram {
    ops: Vec<Op>,
    args: Vec<[u32; 2]>,
    values: Vec<f64>,
    outputs: Vec<u32>,
    num_inputs: usize,
}

impl TapeProgram {
    fn new(exprs: &[Sym], num_inputs: usize, capacity: usize) -> Self {
        let mut program = TapeProgram {
            ops: Vec::with_capacity(num_inputs + capacity),
            args: Vec::with_capacity(num_inputs + capacity),
            values: Vec::with_capacity(num_inputs + capacity),
            outputs: Vec::with_capacity(exprs.len()),
            num_inputs,
        };
        for _ in 0..num_inputs {
            program.ops.push(Op::Input);
            program.args.push([UNUSED, UNUSED]);
            program.values.push(0.0);
        }
        let mut slots: HashMap<*const Node, u32> = HashMap::new();
        for e in exprs {
            let slot = program.flatten(e, &mut slots);
            program.outputs.push(slot);
        }
        program
    }

    fn push(&mut self, op: Op, args: [u32; 2], value: f64) -> u32 {
        let slot = self.ops.len() as u32;
        self.ops.push(op);
        self.args.push(args);
        self.values.push(value);
        slot
    }

    fn flatten(&mut self, expr: &Sym, slots: &mut HashMap<*const Node, u32>) -> u32 {
        if let Some(&slot) = slots.get(&expr.ptr()) {
            return slot;
        }
        let slot = match &*expr.0 {
            Node::Var(i) => {
                debug_assert!((*i as usize) < self.num_inputs, "variable out of range");
                *i
            }
            Node::Const(c) => self.push(Op::Const, [UNUSED, UNUSED], *c),
            Node::Unary(op, a) => {
                let a_slot = self.flatten(a, slots);
                self.push(Op::Un(*op), [a_slot, UNUSED], 0.0)
            }
            Node::Binary(op, a, b) => {
                let a_slot = self.flatten(a, slots);
                let b_slot = self.flatten(b, slots);
                self.push(Op::Bin(*op), [a_slot, b_slot], 0.0)
            }
            Node::Powi(a, k) => {
                let a_slot = self.flatten(a, slots);
                self.push(Op::Powi, [a_slot, *k as u32], 0.0)
            }
        };
        slots.insert(expr.ptr(), slot);
        slot
    }

    fn call(&mut self, out: &mut [f64], input: &[f64]) {
        debug_assert_eq!(input.len(), self.num_inputs, "wrong number of inputs");
        debug_assert_eq!(out.len(), self.outputs.len(), "wrong number of outputs");
        self.values[..self.num_inputs].copy_from_slice(input);
        for i in self.num_inputs..self.ops.len() {
            let [a_idx, b_idx] = self.args[i];
            self.values[i] = match self.ops[i] {
                Op::Input | Op::Const => continue,
                Op::Un(op) => eval_unary(op, self.values[a_idx as usize]),
                Op::Bin(op) => eval_binary(
                    op,
                    self.values[a_idx as usize],
                    self.values[b_idx as usize],
                ),
                Op::Powi => self.values[a_idx as usize].powi(b_idx as i32),
            };
        }
        for (slot, &oi) in self.outputs.iter().enumerate() {
            out[slot] = self.values[oi as usize];
        }
    }
}

// ── Evaluator adapter ──

/// Owned function object with the `(out, z, θ)` calling convention.
///
/// Wraps a compiled program together with the scratch buffer holding the
/// concatenated `[z; θ]` input, so a call copies the two argument slices
/// and runs one sweep without allocating.
#[derive(Debug)]
pub struct Evaluator {
    program: CompiledFn,
    input: Vec<f64>,
    state_dim: usize,
}

impl Evaluator {
    pub(crate) fn new(program: CompiledFn, state_dim: usize, param_dim: usize) -> Self {
        Evaluator {
            program,
            input: vec![0.0; state_dim + param_dim],
            state_dim,
        }
    }

    /// Evaluate into `out` at `(z, θ)`.
    pub fn call(&mut self, out: &mut [f64], z: &[f64], theta: &[f64]) {
        debug_assert_eq!(z.len(), self.state_dim, "wrong decision-vector length");
        debug_assert_eq!(
            theta.len(),
            self.input.len() - self.state_dim,
            "wrong parameter-vector length"
        );
        self.input[..self.state_dim].copy_from_slice(z);
        self.input[self.state_dim..].copy_from_slice(theta);
        self.program.call(out, &self.input);
    }

    pub fn num_outputs(&self) -> usize {
        self.program.num_outputs()
    }
}

// ── Symbolic derivatives ──

/// Symbolic sparse Jacobian of `exprs` with respect to `vars`.
///
/// Returns `(row, col, ∂exprs[row]/∂vars[col])` triplets in CSC order
/// (column-major, rows ascending within a column). Entries that simplify
/// to the zero constant are structural zeros and are dropped, so the
/// triplet set is the stable sparsity pattern.
pub fn sparse_jacobian(exprs: &[Sym], vars: &[Sym]) -> Vec<(usize, usize, Sym)> {
    let var_indices: Vec<u32> = vars.iter().map(var_index).collect();
    let mut triplets = Vec::new();
    for (col, &v) in var_indices.iter().enumerate() {
        for (row, e) in exprs.iter().enumerate() {
            let d = expr::diff(e, v);
            if !d.is_zero() {
                triplets.push((row, col, d));
            }
        }
    }
    triplets
}

/// Dense symbolic Jacobian, `result[row][col] = ∂exprs[row]/∂vars[col]`.
pub fn jacobian(exprs: &[Sym], vars: &[Sym]) -> Vec<Vec<Sym>> {
    exprs
        .iter()
        .map(|e| vars.iter().map(|v| expr::diff(e, var_index(v))).collect())
        .collect()
}

/// Dense symbolic gradient of a scalar expression.
pub fn gradient(expr: &Sym, vars: &[Sym]) -> Vec<Sym> {
    vars.iter()
        .map(|v| expr::diff(expr, var_index(v)))
        .collect()
}

fn var_index(v: &Sym) -> u32 {
    match &*v.0 {
        Node::Var(i) => *i,
        _ => panic!("differentiation variable is not a symbolic variable"),
    }
}
