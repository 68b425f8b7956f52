//! Skyline rectangle packer
//!
//! Bottom-left skyline heuristic after stb_rect_pack. The skyline is a
//! singly linked list of nodes kept in a fixed pool: `num_nodes` ordinary
//! nodes plus two that seed the initial profile, `(0, 0)` and a right
//! boundary at `(width, None)`. Nodes leaving the skyline go onto a free
//! list, so `active + free == num_nodes + 2` always holds.

use std::cmp::Ordering;

/// Rectangle to place
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
    pub placed: bool,
    /// Input position, used to undo the heuristic sort
    order: usize,
}

impl Rect {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SkylineNode {
    x: u32,
    /// `None` only for the right boundary
    y: Option<u32>,
    next: Option<usize>,
}

/// Link that points at a skyline node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertPoint {
    /// `active_head` itself
    Head,
    /// The `next` link of the given node
    After(usize),
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    link: InsertPoint,
    x: u32,
    y: u32,
}

/// Skyline packer for one fixed atlas size
pub struct SkylinePacker {
    width: u32,
    height: u32,
    num_nodes: usize,
    nodes: Vec<SkylineNode>,
    active_head: usize,
    free_head: Option<usize>,
}

impl SkylinePacker {
    /// `num_nodes` should be at least `width` so a full skyline fits
    pub fn new(width: u32, height: u32, num_nodes: usize) -> Self {
        let mut nodes: Vec<SkylineNode> = (0..num_nodes)
            .map(|i| SkylineNode {
                x: 0,
                y: Some(0),
                next: (i + 1 < num_nodes).then_some(i + 1),
            })
            .collect();

        let left = num_nodes;
        let right = num_nodes + 1;
        nodes.push(SkylineNode {
            x: 0,
            y: Some(0),
            next: Some(right),
        });
        nodes.push(SkylineNode {
            x: width,
            y: None,
            next: None,
        });

        Self {
            width,
            height,
            num_nodes,
            nodes,
            active_head: left,
            free_head: (num_nodes > 0).then_some(0),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn link_target(&self, link: InsertPoint) -> Option<usize> {
        match link {
            InsertPoint::Head => Some(self.active_head),
            InsertPoint::After(node) => self.nodes[node].next,
        }
    }

    fn set_link(&mut self, link: InsertPoint, target: usize) {
        match link {
            InsertPoint::Head => self.active_head = target,
            InsertPoint::After(node) => self.nodes[node].next = Some(target),
        }
    }

    /// Highest skyline point under `[x0, x0 + width)` starting at `first`
    fn find_min_y(&self, first: usize, x0: u32, width: u32) -> u32 {
        let x1 = x0 + width;
        debug_assert!(self.nodes[first].x <= x0);
        let mut min_y = 0;
        let mut node = Some(first);
        while let Some(n) = node {
            let current = &self.nodes[n];
            if current.x >= x1 {
                break;
            }
            debug_assert!(current.y.is_some(), "span reached the right boundary");
            min_y = min_y.max(current.y.unwrap_or(0));
            node = current.next;
        }
        min_y
    }

    /// Lowest position for a `width` x `height` rectangle; first seen wins ties
    fn find_best_pos(&self, width: u32, height: u32) -> Option<Placement> {
        if width > self.width || height > self.height {
            return None;
        }

        let mut best: Option<Placement> = None;
        let mut prev = InsertPoint::Head;
        let mut node = Some(self.active_head);
        while let Some(n) = node {
            let x = self.nodes[n].x;
            if x + width > self.width {
                break;
            }
            let y = self.find_min_y(n, x, width);
            if best.map_or(true, |b| y < b.y) {
                best = Some(Placement { link: prev, x, y });
            }
            prev = InsertPoint::After(n);
            node = self.nodes[n].next;
        }
        best
    }

    /// Place one rectangle and raise the skyline over it
    fn pack_rectangle(&mut self, width: u32, height: u32) -> Option<(u32, u32)> {
        let pos = self.find_best_pos(width, height)?;
        if pos.y + height > self.height {
            return None;
        }
        let new = self.free_head?;
        self.free_head = self.nodes[new].next;
        self.nodes[new].x = pos.x;
        self.nodes[new].y = Some(pos.y + height);

        // Splice the new node in; `cur` is the first node that may need freeing
        let mut cur = self.link_target(pos.link)?;
        if self.nodes[cur].x < pos.x {
            let next = self.nodes[cur].next?;
            self.nodes[cur].next = Some(new);
            cur = next;
        } else {
            self.set_link(pos.link, new);
        }

        // Free nodes hidden under the new rectangle
        let right = pos.x + width;
        while let Some(next) = self.nodes[cur].next {
            if self.nodes[next].x > right {
                break;
            }
            self.nodes[cur].next = self.free_head;
            self.free_head = Some(cur);
            cur = next;
        }

        self.nodes[new].next = Some(cur);

        // A straddling node keeps the visible remainder of its segment
        if self.nodes[cur].x < right {
            self.nodes[cur].x = right;
        }

        #[cfg(debug_assertions)]
        if let Err(msg) = self.check_invariants() {
            panic!("skyline invariant violated: {}", msg);
        }

        Some((pos.x, pos.y))
    }

    /// Pack `rects` in place; true iff every rectangle was placed
    ///
    /// Rectangles are tried tallest first (then widest), and the input order
    /// is restored before returning. Unplaced rectangles end at (0, 0) with
    /// `placed == false`; zero-area rectangles are placed at (0, 0) without
    /// using any space.
    pub fn pack(&mut self, rects: &mut [Rect]) -> bool {
        for (i, r) in rects.iter_mut().enumerate() {
            r.order = i;
        }

        rects.sort_by(|a, b| match b.height.cmp(&a.height) {
            Ordering::Equal => b.width.cmp(&a.width),
            other => other,
        });

        for r in rects.iter_mut() {
            if r.width == 0 || r.height == 0 {
                r.x = 0;
                r.y = 0;
                r.placed = true;
            } else if let Some((x, y)) = self.pack_rectangle(r.width, r.height) {
                r.x = x;
                r.y = y;
                r.placed = true;
            } else {
                r.x = 0;
                r.y = 0;
                r.placed = false;
            }
        }

        rects.sort_by_key(|r| r.order);
        rects.iter().all(|r| r.placed)
    }

    /// x-coordinates of the active skyline, left to right
    pub fn active_xs(&self) -> Vec<u32> {
        let mut xs = Vec::new();
        let mut node = Some(self.active_head);
        while let Some(n) = node {
            xs.push(self.nodes[n].x);
            node = self.nodes[n].next;
        }
        xs
    }

    fn free_len(&self) -> usize {
        let mut count = 0;
        let mut node = self.free_head;
        while let Some(n) = node {
            count += 1;
            node = self.nodes[n].next;
        }
        count
    }

    /// Verify list ordering and node accounting
    pub fn check_invariants(&self) -> Result<(), String> {
        let xs = self.active_xs();
        if xs.windows(2).any(|w| w[0] >= w[1]) {
            return Err(format!("active x not strictly increasing: {:?}", xs));
        }
        if xs.last() != Some(&self.width) {
            return Err(format!("skyline does not end at {}: {:?}", self.width, xs));
        }
        let total = xs.len() + self.free_len();
        if total != self.num_nodes + 2 {
            return Err(format!(
                "node count {} != {} + 2",
                total, self.num_nodes
            ));
        }
        Ok(())
    }
}
