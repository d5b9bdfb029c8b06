//! Damage tracking
//!
//! With buffer age, the back buffer still holds a frame rendered a few
//! frames ago. Only the parts of the screen that changed since then need to
//! be repainted. [`damage`] finds those parts by comparing the layout of the
//! current frame with the layout the back buffer was rendered from.
//!
//! Windows may have opened, closed or restacked in between, so the layers
//! of the two layouts are aligned first: matching windows are compared
//! command by command, the rest are damaged as a whole. Finding the best
//! alignment is a longest common subsequence problem; layouts rarely change
//! much between frames, so a linear greedy approximation is used instead.
//!
//! # Example
//!
//! ```
//! use lucent::renderer::damage;
//! use lucent::renderer::layout::LayoutManager;
//! use lucent::types::IVec2;
//! use lucent::window::WindowStack;
//!
//! let mut stack = WindowStack::new();
//! let mut layouts = LayoutManager::new(2);
//! layouts.append_layout(&mut stack, 0, IVec2::new(640, 480));
//!
//! // Nothing to compare against: everything is damaged.
//! let region = damage::damage(&layouts, 1, IVec2::ZERO);
//! assert_eq!(region.area(), 640 * 480);
//! ```

use log::trace;

use super::command::{BlitCommand, CommandKind, CommandSource, RenderCommand};
use super::layout::{Layer, Layout, LayoutManager};
use crate::region::Region;
use crate::types::{IBox, IVec2};

/// Region of the screen that changed between the layout `buffer_age` frames
/// ago and the current one. `blur_size` is how far blurs read beyond their
/// target.
///
/// Everything is damaged when there is no layout that old, or the screen
/// or root background changed in between.
pub fn damage(lm: &LayoutManager, buffer_age: usize, blur_size: IVec2) -> Region {
    let curr = lm.current();
    let full = Region::from_box(IBox::new(IVec2::ZERO, curr.size));
    let Some(past) = lm.layout(buffer_age) else {
        trace!("No layout {} frames old, damaging everything", buffer_age);
        return full;
    };
    if buffer_age == 0
        || past.size != curr.size
        || past.root_image_generation != curr.root_image_generation
    {
        return full;
    }

    let mut damage = Region::new();
    let mut scratch = Region::new();
    let mut past_rank = 0;
    let mut curr_rank = 0;
    let mut past_cmd = past.first_layer_start;
    let mut curr_cmd = curr.first_layer_start;

    loop {
        // First layer on each side whose window is still ahead on the
        // other side.
        let past_match = (past_rank..past.layers.len()).find_map(|i| {
            lm.layer_next_rank(buffer_age, i)
                .filter(|&r| r >= curr_rank)
                .map(|r| (i, r))
        });
        let curr_match = (curr_rank..curr.layers.len()).find_map(|i| {
            lm.layer_prev_rank(buffer_age, i)
                .filter(|&r| r >= past_rank)
                .map(|r| (i, r))
        });

        // Skip to whichever match leaves fewer layers behind.
        let (past_target, curr_target) = match (past_match, curr_match) {
            (Some((past_i, past_in_curr)), Some((curr_i, curr_in_past))) => {
                let skipped_using_past = past_i - past_rank + (past_in_curr - curr_rank);
                let skipped_using_curr = curr_i - curr_rank + (curr_in_past - past_rank);
                if skipped_using_curr < skipped_using_past {
                    (curr_in_past, curr_i)
                } else {
                    (past_i, past_in_curr)
                }
            }
            _ => (past.layers.len(), curr.layers.len()),
        };

        while past_rank < past_target {
            past_cmd += union_layer(&mut damage, past, past_cmd, &past.layers[past_rank]);
            past_rank += 1;
        }
        while curr_rank < curr_target {
            curr_cmd += union_layer(&mut damage, curr, curr_cmd, &curr.layers[curr_rank]);
            curr_rank += 1;
        }
        if past_rank >= past.layers.len() || curr_rank >= curr.layers.len() {
            break;
        }

        let past_layer = &past.layers[past_rank];
        let curr_layer = &curr.layers[curr_rank];
        debug_assert_eq!(past_layer.key, curr_layer.key);
        let past_cmds = &past.commands[past_cmd..past_cmd + past_layer.number_of_commands];
        let curr_cmds = &curr.commands[curr_cmd..curr_cmd + curr_layer.number_of_commands];
        trace!("{} matched at {} -> {}", curr_layer.key.window, past_rank, curr_rank);

        if !layer_compare(past_layer, past_cmds, curr_layer, curr_cmds) {
            union_commands(&mut damage, past_cmds);
            union_commands(&mut damage, curr_cmds);
        } else {
            for (cmd1, cmd2) in past_cmds.iter().zip(curr_cmds) {
                match (&cmd1.kind, &cmd2.kind) {
                    (CommandKind::Blit(blit1), CommandKind::Blit(blit2)) => {
                        blit_damage(&mut damage, &mut scratch, (cmd1, blit1), (cmd2, blit2), |out| {
                            lm.collect_window_damage(curr_rank, buffer_age, out)
                        });
                    }
                    (CommandKind::Blur(blur1), CommandKind::Blur(blur2)) => {
                        if blur1.opacity != blur2.opacity {
                            damage.union_with(&cmd1.target_mask);
                            damage.union_with(&cmd2.target_mask);
                        } else if blur1.opacity != 0.0 {
                            damage.union_with(&cmd1.target_mask.xor(&cmd2.target_mask));
                            // Blur spreads changes below it.
                            scratch = damage.dilated(blur_size.x, blur_size.y);
                            scratch.intersect_with(&cmd2.target_mask);
                            damage.union_with(&scratch);
                        }
                    }
                    _ => {}
                }
            }
        }

        past_cmd += past_layer.number_of_commands;
        curr_cmd += curr_layer.number_of_commands;
        past_rank += 1;
        curr_rank += 1;
    }
    trace!("Damage over {} frames: {:?}", buffer_age, damage.extents());
    damage
}

/// Whether two layers of the same window are drawn the same way at the same
/// place, window content aside.
fn layer_compare(
    past: &Layer,
    past_cmds: &[RenderCommand],
    curr: &Layer,
    curr_cmds: &[RenderCommand],
) -> bool {
    if past.window != curr.window {
        return false;
    }
    if past.scale != curr.scale {
        return false;
    }
    if past.shadow != curr.shadow || past.shadow_scale != curr.shadow_scale {
        return false;
    }
    if past.saved_image_blend != curr.saved_image_blend {
        return false;
    }
    // TODO: pair up the commands that survived when only some were added
    // or removed, e.g. a window losing its shadow.
    if past.number_of_commands != curr.number_of_commands {
        return false;
    }
    past_cmds
        .iter()
        .zip(curr_cmds)
        .all(|(cmd1, cmd2)| cmd1.same_kind(cmd2))
}

/// Adds the area drawn by the commands of `layer` to `damage`, returns the
/// number of commands.
fn union_layer(damage: &mut Region, layout: &Layout, start: usize, layer: &Layer) -> usize {
    union_commands(damage, &layout.commands[start..start + layer.number_of_commands]);
    layer.number_of_commands
}

fn union_commands(damage: &mut Region, commands: &[RenderCommand]) {
    for cmd in commands {
        damage.union_with(&cmd.target_mask);
    }
}

fn blit_damage(
    damage: &mut Region,
    scratch: &mut Region,
    (cmd1, blit1): (&RenderCommand, &BlitCommand),
    (cmd2, blit2): (&RenderCommand, &BlitCommand),
    collect_window_damage: impl FnOnce(&mut Region),
) {
    let (p1, p2) = (&blit1.params, &blit2.params);
    let whole_image_changed = p1.dim != p2.dim
        || p1.shader != p2.shader
        || p1.opacity != p2.opacity
        || p1.corner_radius != p2.corner_radius
        || p1.max_brightness != p2.max_brightness
        || p1.color_inverted != p2.color_inverted
        // Rounded corners depend on the border and the size too.
        || (p1.corner_radius > 0.0
            && (p1.border_width != p2.border_width || p1.effective_size != p2.effective_size));
    if whole_image_changed {
        damage.union_with(&cmd1.target_mask);
        damage.union_with(&cmd2.target_mask);
        return;
    }
    if p1.opacity == 0.0 {
        return;
    }

    // Damage from below that is covered up is not visible.
    damage.subtract_with(&blit2.opaque_region);
    damage.union_with(&cmd1.target_mask.xor(&cmd2.target_mask));
    if cmd1.source == CommandSource::Window {
        scratch.clear();
        collect_window_damage(scratch);
        scratch.intersect_with(&cmd1.target_mask);
        scratch.intersect_with(&cmd2.target_mask);
        damage.union_with(scratch);
    }
}

/// Restricts every command of `commands` to the part of `damage` it can
/// affect on the final screen, going top to bottom. Opaque blits and copies
/// hide what's below them; blurs need the pixels around their area.
///
/// The result is stored in each command's `culled_mask`, `target_mask` is
/// left untouched.
pub fn cull(commands: &mut [RenderCommand], damage: &Region, blur_size: IVec2) {
    let mut visible = damage.clone();
    for cmd in commands.iter_mut().rev() {
        let culled = cmd.target_mask.intersect(&visible);
        match &cmd.kind {
            CommandKind::Blit(blit) => visible.subtract_with(&blit.opaque_region),
            CommandKind::CopyArea => visible.subtract_with(&cmd.target_mask),
            CommandKind::Blur(_) => {
                let mut around = visible.intersect(&cmd.target_mask);
                around.dilate(blur_size.x, blur_size.y);
                visible.union_with(&around);
            }
        }
        cmd.culled_mask = Some(culled);
    }
}

/// Undoes [`cull`].
pub fn uncull(commands: &mut [RenderCommand]) {
    for cmd in commands {
        cmd.culled_mask = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ImageHandle;
    use crate::renderer::command_builder::{BuildOptions, CommandBuilder};
    use crate::types::Vec2;
    use crate::window::{Geometry, Monitors, Window, WindowId, WindowStack};
    use std::collections::HashMap;

    const SCREEN: IVec2 = IVec2::new(500, 500);

    struct Frames {
        stack: WindowStack,
        lm: LayoutManager,
        builder: CommandBuilder,
        root_generation: u64,
    }

    impl Frames {
        fn new() -> Self {
            Self {
                stack: WindowStack::new(),
                lm: LayoutManager::new(3),
                builder: CommandBuilder::new(),
                root_generation: 0,
            }
        }

        fn add(&mut self, id: u32, x: i32, y: i32, size: i32) -> &mut Window {
            let mut w = Window::new(WindowId(id), Geometry::new(x, y, size, size));
            w.map();
            w.ever_damaged = true;
            w.win_image = Some(ImageHandle::from_raw(id as u64));
            self.stack.push(w);
            self.window(id)
        }

        fn window(&mut self, id: u32) -> &mut Window {
            self.stack.get_mut(WindowId(id)).unwrap()
        }

        fn frame(&mut self) {
            self.lm
                .append_layout(&mut self.stack, self.root_generation, SCREEN);
            self.builder.build(
                self.lm.current_mut(),
                &BuildOptions::default(),
                &Monitors::default(),
                &HashMap::new(),
            );
        }

        fn damage(&self, age: usize) -> Region {
            damage(&self.lm, age, IVec2::new(5, 5))
        }
    }

    fn screen() -> Region {
        Region::from_xywh(0, 0, SCREEN.x, SCREEN.y)
    }

    #[test]
    fn test_unchanged_layout_has_no_damage() {
        let mut f = Frames::new();
        f.add(1, 10, 10, 100);
        f.frame();
        f.frame();
        assert!(f.damage(1).is_empty());
    }

    #[test]
    fn test_full_damage_without_history() {
        let mut f = Frames::new();
        f.add(1, 10, 10, 100);
        f.frame();
        f.frame();
        assert_eq!(f.damage(4), screen());
        assert_eq!(f.damage(0), screen());
    }

    #[test]
    fn test_full_damage_on_root_change() {
        let mut f = Frames::new();
        f.frame();
        f.root_generation += 1;
        f.frame();
        assert_eq!(f.damage(1), screen());
    }

    #[test]
    fn test_window_content_damage() {
        let mut f = Frames::new();
        f.add(1, 10, 10, 100);
        f.frame();
        f.window(1).add_damage(&Region::from_xywh(5, 5, 10, 10));
        f.frame();
        f.frame();
        assert_eq!(f.damage(1), Region::new());
        assert_eq!(f.damage(2), Region::from_xywh(15, 15, 10, 10));
    }

    #[test]
    fn test_moved_window_damages_both_boxes() {
        let mut f = Frames::new();
        f.add(1, 0, 0, 50);
        f.frame();
        f.window(1).configure(Geometry::new(10, 10, 50, 50));
        f.frame();
        let expected = Region::from_xywh(0, 0, 50, 50).union(&Region::from_xywh(10, 10, 50, 50));
        assert_eq!(f.damage(1), expected);
    }

    #[test]
    fn test_closed_and_opened_windows() {
        let mut f = Frames::new();
        f.add(1, 0, 0, 50);
        f.add(2, 100, 100, 50);
        f.frame();
        f.stack.remove(WindowId(1));
        f.add(3, 300, 300, 20);
        f.frame();
        let expected = Region::from_xywh(0, 0, 50, 50).union(&Region::from_xywh(300, 300, 20, 20));
        assert_eq!(f.damage(1), expected);
    }

    #[test]
    fn test_restack_damages_moved_window() {
        let mut f = Frames::new();
        f.add(1, 0, 0, 100);
        f.add(2, 50, 50, 100);
        f.frame();
        f.stack.raise_to_top(WindowId(1));
        f.frame();
        assert_eq!(f.damage(1), Region::from_xywh(50, 50, 100, 100));
    }

    #[test]
    fn test_opacity_change_damages_window() {
        let mut f = Frames::new();
        f.add(1, 20, 20, 100);
        f.frame();
        f.window(1).set_opacity(0.5);
        f.frame();
        assert_eq!(f.damage(1), Region::from_xywh(20, 20, 100, 100));
    }

    #[test]
    fn test_scale_change_damages_window() {
        let mut f = Frames::new();
        f.add(1, 20, 20, 100);
        f.frame();
        f.frame();
        // Same boxes and commands, only the scale differs.
        f.lm.current_mut().layers[0].scale = Vec2::new(0.5, 0.5);
        assert_eq!(f.damage(1), Region::from_xywh(20, 20, 100, 100));
    }

    #[test]
    fn test_saved_image_blend_change_damages_window() {
        let mut f = Frames::new();
        f.add(1, 20, 20, 100);
        f.frame();
        f.frame();
        assert!(f.damage(1).is_empty());
        f.lm.current_mut().layers[0].saved_image_blend = 0.5;
        assert_eq!(f.damage(1), Region::from_xywh(20, 20, 100, 100));
    }

    #[test]
    fn test_covered_damage_is_dropped() {
        let mut f = Frames::new();
        f.add(1, 0, 0, 100);
        f.add(2, 0, 0, 50);
        f.frame();
        f.window(1).add_damage(&Region::from_xywh(0, 0, 100, 100));
        f.frame();
        let expected = Region::from_xywh(0, 0, 100, 100).subtract(&Region::from_xywh(0, 0, 50, 50));
        assert_eq!(f.damage(1), expected);
    }

    #[test]
    fn test_blur_spreads_damage_below() {
        let mut f = Frames::new();
        f.add(1, 0, 0, 300);
        let glass = f.add(2, 50, 50, 200);
        glass.has_alpha = true;
        glass.client_has_alpha = true;
        glass.options.blur_background = true;
        f.frame();
        f.window(1).add_damage(&Region::from_xywh(100, 100, 10, 10));
        f.frame();
        assert_eq!(f.damage(1), Region::from_xywh(95, 95, 20, 20));
    }

    #[test]
    fn test_cull_and_uncull() {
        let mut f = Frames::new();
        f.add(1, 0, 0, 200);
        f.add(2, 0, 0, 100);
        f.frame();
        let layout = f.lm.current_mut();
        cull(&mut layout.commands, &Region::from_xywh(50, 50, 100, 100), IVec2::ZERO);

        let [background, bottom, top] = &layout.commands[..] else {
            panic!("unexpected commands");
        };
        assert_eq!(top.mask(), &Region::from_xywh(50, 50, 50, 50));
        assert_eq!(
            bottom.mask(),
            &Region::from_xywh(50, 50, 100, 100).subtract(&Region::from_xywh(50, 50, 50, 50))
        );
        // Fully covered by the bottom window.
        assert!(background.mask().is_empty());
        assert_eq!(top.target_mask, Region::from_xywh(0, 0, 100, 100));

        uncull(&mut layout.commands);
        assert!(layout
            .commands
            .iter()
            .all(|cmd| cmd.culled_mask.is_none() && cmd.mask() == &cmd.target_mask));
    }

    #[test]
    fn test_cull_keeps_pixels_around_blur() {
        let mut f = Frames::new();
        f.add(1, 0, 0, 300);
        let glass = f.add(2, 100, 100, 100);
        glass.has_alpha = true;
        glass.client_has_alpha = true;
        glass.options.blur_background = true;
        f.frame();
        let layout = f.lm.current_mut();
        cull(&mut layout.commands, &Region::from_xywh(120, 120, 10, 10), IVec2::new(4, 4));
        let bottom = &layout.commands[1];
        assert_eq!(bottom.mask(), &Region::from_xywh(116, 116, 18, 18));
    }
}
