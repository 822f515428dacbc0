//! Per-context transform stacks.
//!
//! Each logical canvas gets a [`Uuid`]-keyed context holding its current
//! matrix, a lazily recomputed inverse, and a push/pop stack of saved
//! matrices. Stack slots come from a shared free-list so push/pop — which can
//! run hundreds of times per frame — stay allocation-free at steady state.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use log::warn;
use uuid::Uuid;

use crate::matrix::Mat4;

/// Push is refused (with a warning) past this depth unless configured
/// otherwise. Deep stacks almost always mean an unbalanced caller.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Stack slots preallocated across all contexts.
const MATRIX_POOL_SIZE: usize = 256;

struct TransformContext {
    current: Mat4,
    inverse: Mat4,
    inverse_dirty: bool,
    inverse_valid: bool,
    stack: Vec<Mat4>,
}

impl TransformContext {
    fn new(max_depth: usize) -> Self {
        Self {
            current: Mat4::IDENTITY,
            inverse: Mat4::IDENTITY,
            inverse_dirty: false,
            inverse_valid: true,
            stack: Vec::with_capacity(max_depth),
        }
    }
}

pub struct TransformStacks {
    contexts: HashMap<Uuid, TransformContext>,
    /// Free slots shared by every context's stack.
    matrix_pool: Vec<Mat4>,
    /// Slots handed out past the preallocated pool. Non-zero means the pool
    /// size should probably be raised.
    overflow_allocations: usize,
    max_depth: usize,
}

impl Default for TransformStacks {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl TransformStacks {
    pub fn new(max_depth: usize) -> Self {
        Self {
            contexts: HashMap::new(),
            matrix_pool: vec![Mat4::IDENTITY; MATRIX_POOL_SIZE],
            overflow_allocations: 0,
            max_depth,
        }
    }

    /// Registers a context starting at the identity matrix. Refuses (and
    /// warns) when the id is already registered; the existing context is left
    /// untouched.
    pub fn create_context(&mut self, id: Uuid) -> bool {
        if self.contexts.contains_key(&id) {
            warn!("transform context {id} already exists, ignoring create");
            return false;
        }
        self.contexts
            .insert(id, TransformContext::new(self.max_depth));
        true
    }

    /// Removes a context and returns its stack slots to the free-list.
    pub fn remove_context(&mut self, id: &Uuid) {
        if let Some(mut ctx) = self.contexts.remove(id) {
            self.matrix_pool.append(&mut ctx.stack);
        }
    }

    pub fn has_context(&self, id: &Uuid) -> bool {
        self.contexts.contains_key(id)
    }

    fn context_mut(&mut self, id: &Uuid) -> &mut TransformContext {
        self.contexts
            .get_mut(id)
            .unwrap_or_else(|| panic!("transform context {id} used before create_context"))
    }

    fn context(&self, id: &Uuid) -> &TransformContext {
        self.contexts
            .get(id)
            .unwrap_or_else(|| panic!("transform context {id} used before create_context"))
    }

    /// Saves the current matrix onto the context's stack. Returns whether the
    /// push actually happened: pushes past the depth limit are refused with a
    /// warning, and the previous state is retained.
    pub fn push(&mut self, id: &Uuid) -> bool {
        let Some(ctx) = self.contexts.get_mut(id) else {
            panic!("transform context {id} used before create_context");
        };
        if ctx.stack.len() >= self.max_depth {
            warn!(
                "transform stack for {id} at max depth {}, push refused",
                self.max_depth
            );
            return false;
        }
        // claim a slot from the free-list; an empty pool is recoverable, the
        // push just falls through to a fresh allocation
        if self.matrix_pool.pop().is_none() {
            warn!("matrix pool exhausted, allocating a fresh stack slot");
            self.overflow_allocations += 1;
        }
        ctx.stack.push(ctx.current);
        true
    }

    /// Restores the top of the stack into the current matrix and recycles the
    /// slot. Popping an empty stack warns and leaves the context unchanged.
    pub fn pop(&mut self, id: &Uuid) -> bool {
        let ctx = self.context_mut(id);
        let Some(saved) = ctx.stack.pop() else {
            warn!("transform stack for {id} is empty, pop ignored");
            return false;
        };
        ctx.current = saved;
        ctx.inverse_dirty = true;
        self.matrix_pool.push(saved);
        true
    }

    pub fn depth(&self, id: &Uuid) -> usize {
        self.context(id).stack.len()
    }

    /// `(free slots, overflow allocations)` for diagnostics.
    pub fn pool_stats(&self) -> (usize, usize) {
        (self.matrix_pool.len(), self.overflow_allocations)
    }

    pub fn translate(&mut self, id: &Uuid, dx: f32, dy: f32) {
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        self.compose(id, Mat4::from_translation(dx, dy));
    }

    pub fn scale(&mut self, id: &Uuid, sx: f32, sy: f32) {
        if sx == 1.0 && sy == 1.0 {
            return;
        }
        self.compose(id, Mat4::from_scale(sx, sy));
    }

    pub fn rotate(&mut self, id: &Uuid, radians: f32) {
        if radians == 0.0 {
            return;
        }
        self.compose(id, Mat4::from_rotation(radians));
    }

    fn compose(&mut self, id: &Uuid, elementary: Mat4) {
        let ctx = self.context_mut(id);
        ctx.current = Mat4::mul(&ctx.current, &elementary);
        ctx.inverse_dirty = true;
    }

    pub fn set_current(&mut self, id: &Uuid, matrix: Mat4) {
        let ctx = self.context_mut(id);
        ctx.current = matrix;
        ctx.inverse_dirty = true;
    }

    pub fn current(&self, id: &Uuid) -> Mat4 {
        self.context(id).current
    }

    /// The cached inverse of the current matrix, recomputed only when stale.
    /// A singular current matrix yields `None` — never stale or garbage data.
    pub fn current_inverse(&mut self, id: &Uuid) -> Option<Mat4> {
        let ctx = self.context_mut(id);
        if ctx.inverse_dirty {
            match ctx.current.invert() {
                Some(inverse) => {
                    ctx.inverse = inverse;
                    ctx.inverse_valid = true;
                }
                None => {
                    warn!("current matrix for {id} is singular, inverse unavailable");
                    ctx.inverse_valid = false;
                }
            }
            ctx.inverse_dirty = false;
        }
        ctx.inverse_valid.then_some(ctx.inverse)
    }

    pub fn transform_point(&self, id: &Uuid, x: f32, y: f32) -> (f32, f32) {
        self.context(id).current.transform_point(x, y)
    }

    pub fn inverse_transform_point(&mut self, id: &Uuid, x: f32, y: f32) -> Option<(f32, f32)> {
        self.current_inverse(id)
            .map(|inverse| inverse.transform_point(x, y))
    }

    /// Runs `f` between a push and a pop. The pop runs even when `f` panics,
    /// so the stack depth is unchanged on every exit path. The pop is skipped
    /// only when the push itself was refused at the depth limit.
    pub fn with_scope<R>(&mut self, id: &Uuid, f: impl FnOnce(&mut Self) -> R) -> R {
        let pushed = self.push(id);
        let result = panic::catch_unwind(AssertUnwindSafe(|| f(self)));
        if pushed {
            self.pop(id);
        }
        match result {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}
