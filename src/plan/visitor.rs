
use crate::error::Result;

/// Apply a visit closure to each item, short-circuiting on `Stop`.
#[macro_export]
macro_rules! apply_each {
    ($f:expr; $ARRAY:expr) => {{
        let mut action: VisitRecursion = VisitRecursion::Continue;
        for it in $ARRAY.iter() {
            action = $f(it)?;
            match action {
                VisitRecursion::Continue | VisitRecursion::Jump => {}
                VisitRecursion::Stop => return Ok(VisitRecursion::Stop)
            }
        }
        Ok::<VisitRecursion, $crate::error::Error>(action)
    }};
    ($f:expr, $($x:expr),+ $(,)?) => {{
        let items = vec![$($x),+];
        let mut action: VisitRecursion = VisitRecursion::Continue;
        for it in items.iter() {
            action = $f(it)?;
            match action {
                VisitRecursion::Continue | VisitRecursion::Jump => {}
                VisitRecursion::Stop => return Ok(VisitRecursion::Stop)
            }
        }
        Ok::<VisitRecursion, $crate::error::Error>(action)
    }};
}

/// Depth-first traversal over an immutable tree of nodes.
///
/// Plan rewrites in this crate build new trees with shared subtrees rather
/// than mutating in place, so the traversal surface is read-only: `visit`
/// calls a [`TreeNodeVisitor`] top-down (`f_down`) and bottom-up (`f_up`),
/// `walk` calls a single closure pre-order.
pub trait TreeNode: Sized {
    /// Visit the node and its children with both pre-order and post-order
    /// hooks. Higher-ranked trait bounds let the visitor borrow nodes with
    /// any lifetime.
    fn visit<V>(&self, visitor: &mut V) -> Result<VisitRecursion>
    where
        V: for<'n> TreeNodeVisitor<'n, Node = Self>,
    {
        visitor
            .f_down(self)?
            .when_children(|| self.visit_children(|c| c.visit(visitor)))?
            .when_parent(|| visitor.f_up(self))
    }

    /// Walk the node and its children pre-order with a single closure.
    fn walk<F>(&self, mut f: F) -> Result<VisitRecursion>
    where
        F: FnMut(&Self) -> Result<VisitRecursion>,
    {
        fn walk_impl<N: TreeNode, F>(node: &N, f: &mut F) -> Result<VisitRecursion>
        where
            F: FnMut(&N) -> Result<VisitRecursion>,
        {
            f(node)?.when_children(|| node.visit_children(|c| walk_impl(c, f)))
        }

        walk_impl(self, &mut f)
    }

    /// Apply `f` to the node's children (but **not** the node itself).
    fn visit_children<F>(&self, f: F) -> Result<VisitRecursion>
    where
        F: FnMut(&Self) -> Result<VisitRecursion>;
}

pub trait TreeNodeVisitor<'n> {
    type Node: TreeNode;

    fn f_down(&mut self, _node: &'n Self::Node) -> Result<VisitRecursion> {
        Ok(VisitRecursion::Continue)
    }

    fn f_up(&mut self, _node: &'n Self::Node) -> Result<VisitRecursion> {
        Ok(VisitRecursion::Continue)
    }
}

/// Drives traversal control flow: each visit closure returns a
/// `VisitRecursion` telling the controller which nodes to traverse next.
#[derive(Copy, Clone)]
pub enum VisitRecursion {
    /// Continue recursion with the next node.
    Continue,
    /// Skip recursing into the current node's children (pruning the subtree
    /// in a pre-order phase) but continue with the next node.
    Jump,
    /// Stop recursion entirely.
    Stop,
}

impl VisitRecursion {
    /// Decide whether to run the closure over the node's children.
    pub fn when_children<F>(self, f: F) -> Result<VisitRecursion>
    where
        F: FnOnce() -> Result<VisitRecursion>,
    {
        match self {
            VisitRecursion::Continue => f(),
            VisitRecursion::Jump => Ok(VisitRecursion::Continue),
            VisitRecursion::Stop => Ok(self),
        }
    }

    /// Decide whether to run the closure over the node's sibling.
    pub fn when_sibling<F>(self, f: F) -> Result<VisitRecursion>
    where
        F: FnOnce() -> Result<VisitRecursion>,
    {
        match self {
            VisitRecursion::Continue | VisitRecursion::Jump => f(),
            VisitRecursion::Stop => Ok(self),
        }
    }

    /// Decide whether to run the closure over the node's parent.
    pub fn when_parent<F>(self, f: F) -> Result<VisitRecursion>
    where
        F: FnOnce() -> Result<VisitRecursion>,
    {
        match self {
            VisitRecursion::Continue => f(),
            VisitRecursion::Jump | VisitRecursion::Stop => Ok(self),
        }
    }
}
