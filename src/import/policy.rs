//! Split-or-inline decisions
//!
//! Before descending into a folderish child, a task asks its policy whether
//! the child should become a new, independently scheduled task. Policies are
//! pure functions of the `SplitContext`.

use crate::source::SourceNode;

/// Signals available when deciding on a split
pub struct SplitContext<'a> {
    /// The child being considered
    pub node: &'a dyn SourceNode,

    /// Depth of the node whose children are being walked (root = 0)
    pub depth: u32,

    /// Workers currently executing a task
    pub active_workers: usize,

    /// Tasks waiting in the scheduler queue
    pub queue_depth: usize,

    /// Size of the worker pool
    pub worker_cap: usize,

    /// Leaf documents created so far by the calling task
    pub task_documents: u64,

    /// Batch size of the calling task
    pub batch_size: usize,
}

/// Decides whether a subtree gets its own task
pub trait ThreadingPolicy: Send + Sync {
    fn should_split(&self, ctx: &SplitContext<'_>) -> bool;

    /// Name used in logs
    fn name(&self) -> &'static str;
}

/// Split shallow folders while idle workers remain
///
/// Beyond `max_split_depth`, or once every worker is busy, subtrees are
/// walked inline by the current task.
#[derive(Debug, Clone)]
pub struct DefaultThreadingPolicy {
    max_split_depth: u32,
}

impl DefaultThreadingPolicy {
    pub fn new(max_split_depth: u32) -> Self {
        Self { max_split_depth }
    }

    pub fn max_split_depth(&self) -> u32 {
        self.max_split_depth
    }
}

impl ThreadingPolicy for DefaultThreadingPolicy {
    fn should_split(&self, ctx: &SplitContext<'_>) -> bool {
        ctx.depth < self.max_split_depth
            && !ctx.node.is_leaf()
            && ctx.active_workers < ctx.worker_cap
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Split once the calling task has done a third of a batch
///
/// Keeps tiny folders inline and stops splitting while the queue already
/// holds `max_queued` tasks.
#[derive(Debug, Clone)]
pub struct VolumeThreadingPolicy {
    max_queued: usize,
}

impl VolumeThreadingPolicy {
    pub fn new(max_queued: usize) -> Self {
        Self { max_queued }
    }
}

impl Default for VolumeThreadingPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

impl ThreadingPolicy for VolumeThreadingPolicy {
    fn should_split(&self, ctx: &SplitContext<'_>) -> bool {
        if ctx.node.is_leaf() {
            return false;
        }
        if ctx.task_documents < (ctx.batch_size / 3) as u64 {
            return false;
        }
        ctx.queue_depth < self.max_queued
    }

    fn name(&self) -> &'static str {
        "volume"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SyntheticNode;

    fn ctx<'a>(node: &'a dyn SourceNode, depth: u32, active: usize) -> SplitContext<'a> {
        SplitContext {
            node,
            depth,
            active_workers: active,
            queue_depth: 0,
            worker_cap: 4,
            task_documents: 0,
            batch_size: 50,
        }
    }

    #[test]
    fn test_default_policy_depth_bound() {
        let folder = SyntheticNode::root(2, 1);
        let policy = DefaultThreadingPolicy::new(2);

        assert!(policy.should_split(&ctx(&folder, 0, 1)));
        assert!(policy.should_split(&ctx(&folder, 1, 1)));
        assert!(!policy.should_split(&ctx(&folder, 2, 1)));
    }

    #[test]
    fn test_default_policy_worker_cap() {
        let folder = SyntheticNode::root(2, 1);
        let policy = DefaultThreadingPolicy::new(8);

        assert!(policy.should_split(&ctx(&folder, 0, 3)));
        assert!(!policy.should_split(&ctx(&folder, 0, 4)));
    }

    #[test]
    fn test_default_policy_never_splits_leaves() {
        let leaf = SyntheticNode::root(0, 1);
        let policy = DefaultThreadingPolicy::new(8);
        assert!(!policy.should_split(&ctx(&leaf, 0, 0)));
    }

    #[test]
    fn test_volume_policy() {
        let folder = SyntheticNode::root(2, 1);
        let policy = VolumeThreadingPolicy::new(2);

        let mut c = ctx(&folder, 0, 1);
        assert!(!policy.should_split(&c));

        c.task_documents = 16;
        assert!(policy.should_split(&c));

        c.queue_depth = 2;
        assert!(!policy.should_split(&c));
    }
}
