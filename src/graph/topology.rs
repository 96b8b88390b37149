//! Dependency analysis of a graph.
//!
//! Edges are derived, not declared: node B depends on node A when something B reads
//! overlaps something A writes. Overlap is decided on storage extents, so an ROI and
//! its parent image, a pyramid and one of its levels, or two views of one tensor are
//! recognized as the same data.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::reference::{Handle, Image, Node, ObjectArray, Pyramid, Tensor};
use crate::core::types::{ObjectType, Rectangle};
use std::collections::VecDeque;

/// A piece of storage a parameter touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extent {
    /// All of an object.
    Whole(Handle),
    /// Some element of a container; only conflicts with the whole container.
    Member(Handle),
    /// Rectangle of an image's storage root.
    Region { root: Handle, rect: Rectangle },
    /// Box of a tensor's storage root, end-exclusive per dimension.
    Block { root: Handle, start: Vec<usize>, end: Vec<usize> },
}

impl Extent {
    fn root(&self) -> Handle {
        match self {
            Extent::Whole(h) | Extent::Member(h) => *h,
            Extent::Region { root, .. } | Extent::Block { root, .. } => *root,
        }
    }

    pub fn overlaps(&self, other: &Extent) -> bool {
        if self.root() != other.root() {
            return false;
        }
        match (self, other) {
            (Extent::Member(_), Extent::Member(_)) => false,
            (Extent::Member(_), Extent::Whole(_)) | (Extent::Whole(_), Extent::Member(_)) => true,
            (Extent::Member(_), _) | (_, Extent::Member(_)) => false,
            (Extent::Region { rect: a, .. }, Extent::Region { rect: b, .. }) => a.overlaps(b),
            (
                Extent::Block { start: s1, end: e1, .. },
                Extent::Block { start: s2, end: e2, .. },
            ) => s1
                .iter()
                .zip(e1)
                .zip(s2.iter().zip(e2))
                .all(|((a0, a1), (b0, b1))| a0 < b1 && b0 < a1),
            _ => true,
        }
    }
}

/// What one node reads and writes.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub node: Node,
    pub reads: Vec<Extent>,
    pub writes: Vec<Extent>,
}

impl Context {
    /// Storage extents behind a parameter.
    pub(crate) fn extents_of(&self, handle: Handle) -> VxResult<Vec<Extent>> {
        let extents = match self.object_type(handle)? {
            ObjectType::Image => {
                let (root, rect) = self.image_extent(Image(handle))?;
                let mut out = vec![if rect.is_empty() {
                    Extent::Whole(root)
                } else {
                    Extent::Region { root, rect }
                }];
                if let Some((container, _)) = self.container_of(handle)? {
                    out.push(Extent::Member(container));
                }
                out
            }
            ObjectType::Pyramid => {
                let mut out = vec![Extent::Whole(handle)];
                for level in self.pyramid_levels(Pyramid(handle))? {
                    out.extend(self.item_extents(level)?);
                }
                out
            }
            ObjectType::ObjectArray => {
                let mut out = vec![Extent::Whole(handle)];
                for item in self.object_array_items(ObjectArray(handle))? {
                    out.extend(self.item_extents(item)?);
                }
                out
            }
            ObjectType::Tensor => {
                let (root, start, end) = self.tensor_extent(Tensor(handle))?;
                if start.is_empty() {
                    vec![Extent::Whole(root)]
                } else {
                    vec![Extent::Block { root, start, end }]
                }
            }
            _ => vec![Extent::Whole(handle)],
        };
        Ok(extents)
    }

    /// Extents of an element, without its membership in the container.
    fn item_extents(&self, handle: Handle) -> VxResult<Vec<Extent>> {
        Ok(self
            .extents_of(handle)?
            .into_iter()
            .filter(|e| !matches!(e, Extent::Member(_)))
            .collect())
    }

    /// Read and write sets of a node. A replicated parameter touches its whole container.
    pub(crate) fn node_view(&self, node: Node) -> VxResult<NodeView> {
        let (kernel, params, replicated) =
            self.node_data(node, |d| Ok((d.kernel, d.params.clone(), d.replicated.clone())))?;
        let signature = self.kernel_data(kernel)?.signature();
        let mut view = NodeView {
            node,
            reads: Vec::new(),
            writes: Vec::new(),
        };
        for (i, (spec, param)) in signature.iter().zip(&params).enumerate() {
            let Some(h) = param else { continue };
            let is_replicated = replicated.as_ref().is_some_and(|r| r.get(i).copied().unwrap_or(false));
            let target = match (is_replicated, self.container_of(*h)?) {
                (true, Some((container, _))) => container,
                _ => *h,
            };
            let extents = self.extents_of(target)?;
            if spec.direction.writes() {
                view.writes.extend(extents.iter().cloned());
            }
            if spec.direction != crate::core::types::Direction::Output {
                view.reads.extend(extents);
            }
        }
        Ok(view)
    }
}

/// Dependency analyzer over a set of node views.
pub struct TopologyAnalyzer<'a> {
    views: &'a [NodeView],
    successors: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
}

impl<'a> TopologyAnalyzer<'a> {
    /// Derive the edges between `views`.
    pub fn new(views: &'a [NodeView]) -> Self {
        let n = views.len();
        let mut successors = vec![Vec::new(); n];
        let mut in_degree = vec![0; n];
        for (a, producer) in views.iter().enumerate() {
            for (b, consumer) in views.iter().enumerate() {
                if a == b {
                    continue;
                }
                let feeds = producer
                    .writes
                    .iter()
                    .any(|w| consumer.reads.iter().any(|r| w.overlaps(r)));
                if feeds {
                    successors[a].push(b);
                    in_degree[b] += 1;
                }
            }
        }
        Self {
            views,
            successors,
            in_degree,
        }
    }

    pub fn successors(&self, index: usize) -> &[usize] {
        &self.successors[index]
    }

    /// Nodes with no producer in the graph.
    pub fn heads(&self) -> Vec<usize> {
        (0..self.views.len()).filter(|i| self.in_degree[*i] == 0).collect()
    }

    /// Kahn's algorithm; ties keep creation order. Fails with `InvalidGraph` on a cycle.
    pub fn topological_sort(&self) -> VxResult<Vec<usize>> {
        let mut in_degree = self.in_degree.clone();
        let mut queue: VecDeque<usize> = self.heads().into();
        let mut order = Vec::with_capacity(self.views.len());
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &next in &self.successors[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }
        if order.len() != self.views.len() {
            return Err(VxError::InvalidGraph);
        }
        Ok(order)
    }

    pub fn has_cycle(&self) -> bool {
        self.topological_sort().is_err()
    }

    /// Nodes grouped by dependency depth; nodes in one wave never depend on each other.
    pub fn parallel_batches(&self) -> VxResult<Vec<Vec<usize>>> {
        let order = self.topological_sort()?;
        let mut depth = vec![0usize; self.views.len()];
        for &i in &order {
            for &next in &self.successors[i] {
                depth[next] = depth[next].max(depth[i] + 1);
            }
        }
        let waves = depth.iter().copied().max().map_or(0, |d| d + 1);
        let mut batches = vec![Vec::new(); waves];
        for &i in &order {
            batches[depth[i]].push(i);
        }
        Ok(batches)
    }

    /// First pair of distinct nodes writing overlapping storage.
    pub fn writer_conflict(&self) -> Option<(usize, usize)> {
        for (a, first) in self.views.iter().enumerate() {
            for (b, second) in self.views.iter().enumerate().skip(a + 1) {
                if first.writes.iter().any(|w| second.writes.iter().any(|x| w.overlaps(x))) {
                    return Some((a, b));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DfImage, SCALE_PYRAMID_HALF};
    use crate::core::reference::AsHandle;

    fn view(node: Handle, reads: Vec<Extent>, writes: Vec<Extent>) -> NodeView {
        NodeView {
            node: Node(node),
            reads,
            writes,
        }
    }

    #[test]
    fn test_chain_sorts_and_batches() {
        let ctx = Context::create().unwrap();
        let imgs: Vec<Handle> = (0..4).map(|_| ctx.create_image(4, 4, DfImage::U8).unwrap().handle()).collect();
        let w = |h: Handle| Extent::Whole(h);
        let views = vec![
            view(imgs[0], vec![w(imgs[0])], vec![w(imgs[1])]),
            view(imgs[1], vec![w(imgs[2])], vec![w(imgs[3])]),
            view(imgs[2], vec![w(imgs[1])], vec![w(imgs[2])]),
            view(imgs[3], vec![], vec![w(imgs[0])]),
        ];
        let analyzer = TopologyAnalyzer::new(&views);
        // 0 writes imgs[1], read by 2; 2 writes imgs[2], read by 1; 3 writes imgs[0], read by 0.
        assert_eq!(analyzer.topological_sort().unwrap(), vec![3, 0, 2, 1]);
        assert_eq!(analyzer.heads(), vec![3]);
        assert_eq!(analyzer.parallel_batches().unwrap(), vec![vec![3], vec![0], vec![2], vec![1]]);
    }

    #[test]
    fn test_cycle_detected() {
        let ctx = Context::create().unwrap();
        let a = ctx.create_image(4, 4, DfImage::U8).unwrap().handle();
        let b = ctx.create_image(4, 4, DfImage::U8).unwrap().handle();
        let views = vec![
            view(a, vec![Extent::Whole(b)], vec![Extent::Whole(a)]),
            view(b, vec![Extent::Whole(a)], vec![Extent::Whole(b)]),
        ];
        let analyzer = TopologyAnalyzer::new(&views);
        assert!(analyzer.has_cycle());
        assert_eq!(analyzer.topological_sort(), Err(VxError::InvalidGraph));
    }

    #[test]
    fn test_roi_overlap() {
        let ctx = Context::create().unwrap();
        let parent = ctx.create_image(16, 16, DfImage::U8).unwrap();
        let left = ctx.create_image_from_roi(parent, Rectangle::new(0, 0, 8, 16)).unwrap();
        let right = ctx.create_image_from_roi(parent, Rectangle::new(8, 0, 16, 16)).unwrap();
        let p = ctx.extents_of(parent.handle()).unwrap();
        let l = ctx.extents_of(left.handle()).unwrap();
        let r = ctx.extents_of(right.handle()).unwrap();
        assert!(p[0].overlaps(&l[0]));
        assert!(p[0].overlaps(&r[0]));
        assert!(!l[0].overlaps(&r[0]));
    }

    #[test]
    fn test_pyramid_levels_conflict_with_pyramid_only() {
        let ctx = Context::create().unwrap();
        let pyr = ctx.create_pyramid(2, SCALE_PYRAMID_HALF, 8, 8, DfImage::U8).unwrap();
        let levels = ctx.pyramid_levels(pyr).unwrap();
        let whole = ctx.extents_of(pyr.handle()).unwrap();
        let l0 = ctx.extents_of(levels[0]).unwrap();
        let l1 = ctx.extents_of(levels[1]).unwrap();
        assert!(l0.iter().any(|a| whole.iter().any(|b| a.overlaps(b))));
        assert!(!l0.iter().any(|a| l1.iter().any(|b| a.overlaps(b))));
    }

    #[test]
    fn test_writer_conflict() {
        let ctx = Context::create().unwrap();
        let a = ctx.create_image(4, 4, DfImage::U8).unwrap().handle();
        let b = ctx.create_image(4, 4, DfImage::U8).unwrap().handle();
        let views = vec![
            view(a, vec![], vec![Extent::Whole(a)]),
            view(b, vec![], vec![Extent::Whole(b)]),
            view(b, vec![], vec![Extent::Whole(a)]),
        ];
        assert_eq!(TopologyAnalyzer::new(&views).writer_conflict(), Some((0, 2)));
    }
}
