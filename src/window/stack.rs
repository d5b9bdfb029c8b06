//! Window Z-ordering
//!
//! [`WindowStack`] owns the compositor's windows and keeps their stacking
//! order. Windows are ordered from bottom to top, the last window in the
//! stack being the top-most one.

use std::collections::HashMap;

use super::{LayerKey, Window, WindowId};

/// Windows in stacking order.
///
/// # Examples
///
/// ```
/// use lucent::window::{Geometry, Window, WindowId, WindowStack};
///
/// let mut stack = WindowStack::new();
/// stack.push(Window::new(WindowId(1), Geometry::new(0, 0, 10, 10)));
/// stack.push(Window::new(WindowId(2), Geometry::new(5, 5, 10, 10)));
///
/// assert_eq!(stack.top(), Some(WindowId(2)));
/// ```
#[derive(Debug, Default)]
pub struct WindowStack {
    /// Window ids ordered from bottom to top
    order: Vec<WindowId>,

    /// Fast lookup: window id → position in `order`
    positions: HashMap<WindowId, usize>,

    windows: HashMap<WindowId, Entry>,

    next_generation: u64,
}

#[derive(Debug)]
struct Entry {
    window: Window,
    generation: u64,
}

impl WindowStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            windows: HashMap::with_capacity(capacity),
            next_generation: 0,
        }
    }

    /// Adds a window to the top of the stack.
    ///
    /// Returns `false`, dropping `window`, if a window with the same id is
    /// already present.
    pub fn push(&mut self, window: Window) -> bool {
        let id = window.id;
        if self.positions.contains_key(&id) {
            return false;
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        self.positions.insert(id, self.order.len());
        self.order.push(id);
        self.windows.insert(id, Entry { window, generation });
        true
    }

    /// Removes a window from the stack and hands it back.
    pub fn remove(&mut self, id: WindowId) -> Option<Window> {
        let pos = self.positions.remove(&id)?;
        self.order.remove(pos);
        self.rebuild_positions();
        self.windows.remove(&id).map(|entry| entry.window)
    }

    pub fn raise_to_top(&mut self, id: WindowId) -> bool {
        let Some(pos) = self.positions.get(&id).copied() else {
            return false;
        };
        self.order.remove(pos);
        self.order.push(id);
        self.rebuild_positions();
        true
    }

    pub fn lower_to_bottom(&mut self, id: WindowId) -> bool {
        let Some(pos) = self.positions.get(&id).copied() else {
            return false;
        };
        self.order.remove(pos);
        self.order.insert(0, id);
        self.rebuild_positions();
        true
    }

    /// Restacks `id` immediately above `above`.
    pub fn raise_above(&mut self, id: WindowId, above: WindowId) -> bool {
        if id == above || !self.positions.contains_key(&above) {
            return false;
        }
        let Some(pos) = self.positions.get(&id).copied() else {
            return false;
        };
        self.order.remove(pos);
        // The target may have shifted down after the removal.
        let new_pos = self.order.iter().position(|&w| w == above).map_or(0, |p| p + 1);
        self.order.insert(new_pos, id);
        self.rebuild_positions();
        true
    }

    /// Window ids in bottom-to-top rendering order.
    pub fn render_order(&self) -> &[WindowId] {
        &self.order
    }

    /// Windows in bottom-to-top order.
    pub fn iter(&self) -> impl Iterator<Item = &Window> + '_ {
        self.order.iter().filter_map(|id| self.get(*id))
    }

    /// Windows in no particular order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Window> + '_ {
        self.windows.values_mut().map(|entry| &mut entry.window)
    }

    pub fn get(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(&id).map(|entry| &entry.window)
    }

    pub fn get_mut(&mut self, id: WindowId) -> Option<&mut Window> {
        self.windows.get_mut(&id).map(|entry| &mut entry.window)
    }

    /// Identity of the window instance currently using `id`.
    pub fn key(&self, id: WindowId) -> Option<LayerKey> {
        self.windows.get(&id).map(|entry| LayerKey {
            window: id,
            generation: entry.generation,
        })
    }

    pub fn top(&self) -> Option<WindowId> {
        self.order.last().copied()
    }

    pub fn bottom(&self) -> Option<WindowId> {
        self.order.first().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.positions.contains_key(&id)
    }

    /// Position 0 is the bottom-most window.
    pub fn position(&self, id: WindowId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn windows_above(&self, id: WindowId) -> &[WindowId] {
        match self.positions.get(&id) {
            Some(&pos) => &self.order[pos + 1..],
            None => &[],
        }
    }

    pub fn windows_below(&self, id: WindowId) -> &[WindowId] {
        match self.positions.get(&id) {
            Some(&pos) => &self.order[..pos],
            None => &[],
        }
    }

    /// Removes every window, returning them bottom to top.
    pub fn drain(&mut self) -> Vec<Window> {
        let order = std::mem::take(&mut self.order);
        self.positions.clear();
        let mut windows = std::mem::take(&mut self.windows);
        order
            .into_iter()
            .filter_map(|id| windows.remove(&id).map(|entry| entry.window))
            .collect()
    }

    fn rebuild_positions(&mut self) {
        self.positions.clear();
        for (i, &id) in self.order.iter().enumerate() {
            self.positions.insert(id, i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::Geometry;

    fn stack_of(ids: &[u32]) -> WindowStack {
        let mut stack = WindowStack::new();
        for &id in ids {
            stack.push(Window::new(WindowId(id), Geometry::new(0, 0, 10, 10)));
        }
        stack
    }

    fn order(stack: &WindowStack) -> Vec<u32> {
        stack.render_order().iter().map(|id| id.0).collect()
    }

    #[test]
    fn test_new_stack_is_empty() {
        let stack = WindowStack::new();
        assert!(stack.is_empty());
        assert_eq!(stack.top(), None);
        assert_eq!(stack.bottom(), None);
    }

    #[test]
    fn test_push_adds_to_top() {
        let stack = stack_of(&[1, 2, 3]);
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.top(), Some(WindowId(3)));
        assert_eq!(stack.bottom(), Some(WindowId(1)));
        assert_eq!(order(&stack), [1, 2, 3]);
    }

    #[test]
    fn test_push_duplicate_is_noop() {
        let mut stack = stack_of(&[1]);
        assert!(!stack.push(Window::new(WindowId(1), Geometry::new(0, 0, 1, 1))));
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.get(WindowId(1)).unwrap().geometry.width, 10);
    }

    #[test]
    fn test_remove_window() {
        let mut stack = stack_of(&[1, 2, 3]);
        let removed = stack.remove(WindowId(2)).unwrap();
        assert_eq!(removed.id, WindowId(2));
        assert_eq!(order(&stack), [1, 3]);
        assert!(stack.remove(WindowId(99)).is_none());
    }

    #[test]
    fn test_restacking() {
        let mut stack = stack_of(&[1, 2, 3, 4]);
        assert!(stack.raise_to_top(WindowId(1)));
        assert_eq!(order(&stack), [2, 3, 4, 1]);
        assert!(stack.lower_to_bottom(WindowId(4)));
        assert_eq!(order(&stack), [4, 2, 3, 1]);
        assert!(stack.raise_above(WindowId(4), WindowId(3)));
        assert_eq!(order(&stack), [2, 3, 4, 1]);
        assert!(!stack.raise_above(WindowId(4), WindowId(99)));
        assert!(!stack.raise_to_top(WindowId(99)));
    }

    #[test]
    fn test_windows_above_and_below() {
        let stack = stack_of(&[1, 2, 3, 4]);
        assert_eq!(stack.windows_above(WindowId(2)), &[WindowId(3), WindowId(4)]);
        assert_eq!(stack.windows_below(WindowId(2)), &[WindowId(1)]);
        assert!(stack.windows_above(WindowId(99)).is_empty());
    }

    #[test]
    fn test_reused_id_gets_new_key() {
        let mut stack = stack_of(&[1]);
        let first = stack.key(WindowId(1)).unwrap();
        stack.remove(WindowId(1));
        stack.push(Window::new(WindowId(1), Geometry::new(0, 0, 10, 10)));
        let second = stack.key(WindowId(1)).unwrap();
        assert_eq!(first.window, second.window);
        assert_ne!(first, second);
    }

    #[test]
    fn test_position_consistency_after_operations() {
        let mut stack = stack_of(&[1, 2, 3]);
        stack.remove(WindowId(2));
        for (i, &id) in stack.render_order().iter().enumerate() {
            assert_eq!(stack.position(id), Some(i));
        }
        let ids: Vec<_> = stack.iter().map(|w| w.id.0).collect();
        assert_eq!(ids, [1, 3]);
    }

    #[test]
    fn test_drain() {
        let mut stack = stack_of(&[3, 1, 2]);
        let drained: Vec<_> = stack.drain().into_iter().map(|w| w.id.0).collect();
        assert_eq!(drained, [3, 1, 2]);
        assert!(stack.is_empty());
    }
}
