//! Built-in deterministic layered layout for compound statechart graphs

use std::collections::{HashMap, VecDeque};

use super::{
    EdgeRoute, LayoutDirection, LayoutEngine, LayoutError, LayoutInput, LayoutNodeInput,
    LayoutOptions, LayoutResult, NodePlacement,
};
use crate::geometry::{Point, Rect};
use crate::graph::EdgeSection;

/// Ranks siblings by BFS from the initial child, stacks ranks along the
/// layout direction and places parallel regions side by side
#[derive(Debug, Clone, Default)]
pub struct LayeredLayout;

impl LayeredLayout {
    pub fn new() -> Self {
        Self
    }
}

/// Flattened view of the input tree
struct FlatNode<'a> {
    input: &'a LayoutNodeInput,
    parent: Option<usize>,
    children: Vec<usize>,
}

struct Placer<'a> {
    nodes: Vec<FlatNode<'a>>,
    index: HashMap<&'a str, usize>,
    /// Position relative to the parent and final size
    rects: Vec<Rect>,
    options: &'a LayoutOptions,
    /// (source, target) index pairs of every edge
    links: Vec<(usize, usize)>,
}

impl<'a> Placer<'a> {
    fn new(input: &'a LayoutInput) -> Self {
        let mut placer = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            rects: Vec::new(),
            options: &input.options,
            links: Vec::new(),
        };
        placer.flatten(&input.root, None);
        placer.rects = vec![Rect::default(); placer.nodes.len()];
        placer.links = input
            .edges
            .iter()
            .filter_map(|e| Some((*placer.index.get(e.source.as_str())?, *placer.index.get(e.target.as_str())?)))
            .collect();
        placer
    }

    fn flatten(&mut self, node: &'a LayoutNodeInput, parent: Option<usize>) -> usize {
        let idx = self.nodes.len();
        self.index.insert(node.id.as_str(), idx);
        self.nodes.push(FlatNode {
            input: node,
            parent,
            children: Vec::new(),
        });
        for child in &node.children {
            let child_idx = self.flatten(child, Some(idx));
            self.nodes[idx].children.push(child_idx);
        }
        idx
    }

    /// The child of `container` on the path from `container` down to `node`
    fn child_toward(&self, container: usize, node: usize) -> Option<usize> {
        let mut current = node;
        loop {
            let parent = self.nodes[current].parent?;
            if parent == container {
                return Some(current);
            }
            current = parent;
        }
    }

    /// Rank index of each child of `container`
    fn ranks(&self, container: usize) -> Vec<Vec<usize>> {
        let children = &self.nodes[container].children;
        let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();
        for &(source, target) in &self.links {
            let (Some(a), Some(b)) = (self.child_toward(container, source), self.child_toward(container, target)) else {
                continue;
            };
            if a != b {
                adjacency.entry(a).or_default().push(b);
            }
        }

        let start = self.nodes[container]
            .input
            .initial
            .as_deref()
            .and_then(|id| self.index.get(id).copied())
            .or_else(|| children.first().copied());

        let mut rank_of: HashMap<usize, usize> = HashMap::new();
        let mut queue = VecDeque::new();
        if let Some(start) = start {
            rank_of.insert(start, 0);
            queue.push_back(start);
        }
        while let Some(current) = queue.pop_front() {
            let rank = rank_of[&current];
            for &next in adjacency.get(&current).into_iter().flatten() {
                if !rank_of.contains_key(&next) {
                    rank_of.insert(next, rank + 1);
                    queue.push_back(next);
                }
            }
        }

        // Unreached children go after everything else, in declared order
        let max_rank = rank_of.values().max().copied().unwrap_or(0);
        let mut ranks: Vec<Vec<usize>> = vec![Vec::new(); max_rank + 2];
        for &child in children {
            let rank = rank_of.get(&child).copied().unwrap_or(max_rank + 1);
            ranks[rank].push(child);
        }
        ranks.retain(|r| !r.is_empty());
        ranks
    }

    /// Size every node bottom-up and place children relative to their parent
    fn place(&mut self, idx: usize) -> (f64, f64) {
        let input = self.nodes[idx].input;
        let children = self.nodes[idx].children.clone();
        if children.is_empty() {
            self.rects[idx].width = input.width;
            self.rects[idx].height = input.height;
            return (input.width, input.height);
        }

        let sizes: HashMap<usize, (f64, f64)> = children.iter().map(|&c| (c, self.place(c))).collect();
        let options = self.options;
        let origin = Point::new(options.padding, options.header_height);

        let groups = if input.parallel {
            // Regions side by side, as one rank
            vec![children.clone()]
        } else {
            self.ranks(idx)
        };
        let horizontal_ranks = options.direction == LayoutDirection::Lr && !input.parallel;

        let mut cursor_main = 0.0;
        let mut content_w: f64 = 0.0;
        let mut content_h: f64 = 0.0;

        for group in &groups {
            let mut cursor_cross = 0.0;
            let mut rank_extent: f64 = 0.0;
            for &child in group {
                let (w, h) = sizes[&child];
                let (x, y) = if horizontal_ranks {
                    (cursor_main, cursor_cross)
                } else {
                    (cursor_cross, cursor_main)
                };
                self.rects[child].x = origin.x + x;
                self.rects[child].y = origin.y + y;

                let (along, across) = if horizontal_ranks { (h, w) } else { (w, h) };
                cursor_cross += along + options.node_spacing;
                rank_extent = rank_extent.max(across);
                content_w = content_w.max(self.rects[child].right() - origin.x);
                content_h = content_h.max(self.rects[child].bottom() - origin.y);
            }
            cursor_main += rank_extent + options.rank_spacing;
        }

        let width = (content_w + 2.0 * options.padding).max(input.width);
        let height = (content_h + options.header_height + options.padding).max(input.height);
        self.rects[idx].width = width;
        self.rects[idx].height = height;
        (width, height)
    }

    fn absolute(&self, idx: usize) -> Rect {
        let mut rect = self.rects[idx];
        let mut current = self.nodes[idx].parent;
        while let Some(parent) = current {
            rect.x += self.rects[parent].x;
            rect.y += self.rects[parent].y;
            current = self.nodes[parent].parent;
        }
        rect
    }
}

/// Point on `rect`'s border along the ray from its center toward `toward`
fn border_point(rect: &Rect, toward: Point) -> Point {
    let center = rect.center();
    let dx = toward.x - center.x;
    let dy = toward.y - center.y;
    if dx == 0.0 && dy == 0.0 {
        return center;
    }
    let half_w = rect.width / 2.0;
    let half_h = rect.height / 2.0;
    let tx = if dx != 0.0 { half_w / dx.abs() } else { f64::INFINITY };
    let ty = if dy != 0.0 { half_h / dy.abs() } else { f64::INFINITY };
    let t = tx.min(ty);
    Point::new(center.x + dx * t, center.y + dy * t)
}

fn route(id: &str, source: &Rect, target: &Rect, label_size: (f64, f64)) -> EdgeRoute {
    let (label_w, label_h) = label_size;

    if source == target {
        let right = source.right();
        let cy = source.center().y;
        return EdgeRoute {
            id: id.to_string(),
            sections: vec![EdgeSection {
                start: Point::new(right, cy - 8.0),
                end: Point::new(right, cy + 8.0),
                bend_points: vec![Point::new(right + 20.0, cy - 8.0), Point::new(right + 20.0, cy + 8.0)],
            }],
            label: Point::new(right + 24.0, cy - label_h / 2.0),
        };
    }

    let start = border_point(source, target.center());
    let end = border_point(target, source.center());
    let mid = Point::new((start.x + end.x) / 2.0, (start.y + end.y) / 2.0);

    EdgeRoute {
        id: id.to_string(),
        sections: vec![EdgeSection {
            start,
            end,
            bend_points: Vec::new(),
        }],
        label: Point::new(mid.x - label_w / 2.0, mid.y - label_h / 2.0),
    }
}

impl LayoutEngine for LayeredLayout {
    fn name(&self) -> &str {
        "layered"
    }

    fn layout(&self, input: &LayoutInput) -> Result<LayoutResult, LayoutError> {
        let mut placer = Placer::new(input);
        let (width, height) = placer.place(0);

        let nodes = placer
            .nodes
            .iter()
            .zip(&placer.rects)
            .map(|(node, rect)| NodePlacement {
                id: node.input.id.clone(),
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
            })
            .collect();

        let mut edges = Vec::with_capacity(input.edges.len());
        for edge in &input.edges {
            let source = placer
                .index
                .get(edge.source.as_str())
                .ok_or_else(|| LayoutError::UnknownNode(edge.source.clone()))?;
            let target = placer
                .index
                .get(edge.target.as_str())
                .ok_or_else(|| LayoutError::UnknownNode(edge.target.clone()))?;
            edges.push(route(
                &edge.id,
                &placer.absolute(*source),
                &placer.absolute(*target),
                (edge.label_width, edge.label_height),
            ));
        }

        log::debug!("layered layout placed {} nodes ({}x{})", placer.nodes.len(), width, height);

        Ok(LayoutResult {
            nodes,
            edges,
            width,
            height,
        })
    }
}
