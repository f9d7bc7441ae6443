//! `DependencyJobGraph`: the build-time description of a job DAG, built
//! before it's handed to a [`crate::DependencyJobQueue`] (§4.6).

use std::collections::HashMap;

/// The order a job was registered in, assigned by [`DependencyJobGraph::register_job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterId(pub(crate) u32);

/// A caller-chosen stable identifier, used to wire up dependencies before
/// both endpoints have necessarily called `register_job` yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(pub u32);

/// Sentinel `core_number` meaning "runnable on any worker".
pub const ANY_CORE: u32 = u32::MAX;

pub type JobBody = dyn FnMut() + Send;

pub struct JobInfo {
    pub priority: i32,
    pub core_number: u32,
    pub multi_run_count: u16,
    /// Whether the queue should force-dequeue this node from the
    /// priority queue once its first run completes, even if more runs
    /// remain scheduled (mirrors `is_multi_run_complete_once`).
    pub complete_once: bool,
    pub user_id: Option<UserId>,
}

pub(crate) struct GraphNode {
    pub(crate) core_number: u32,
    pub(crate) priority: i32,
    pub(crate) multi_run_count: u16,
    pub(crate) complete_once: bool,
    pub(crate) job: Box<JobBody>,
}

#[derive(Clone, Copy)]
pub(crate) struct RegisterLink {
    pub(crate) parent: RegisterId,
    pub(crate) dependent: RegisterId,
}

struct PendingUserLink {
    parent_user_id: UserId,
    dependent_user_id: UserId,
}

/// Describes a DAG of jobs before it's built into a runnable
/// [`crate::DependencyJobQueue`]. Dependencies may reference either side
/// by the `RegisterId` returned from `register_job`, or by a caller's own
/// `UserId`, which resolves lazily once both endpoints have registered.
#[derive(Default)]
pub struct DependencyJobGraph {
    pub(crate) nodes: Vec<GraphNode>,
    pub(crate) links: Vec<RegisterLink>,
    pending: Vec<PendingUserLink>,
    user_id_to_register: HashMap<UserId, RegisterId>,
}

impl DependencyJobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_job(&mut self, info: JobInfo, job: Box<JobBody>) -> RegisterId {
        let id = RegisterId(u32::try_from(self.nodes.len()).expect("register id overflow"));
        self.nodes.push(GraphNode {
            core_number: info.core_number,
            priority: info.priority,
            multi_run_count: info.multi_run_count.max(1),
            complete_once: info.complete_once,
            job,
        });
        if let Some(user_id) = info.user_id {
            self.user_id_to_register.insert(user_id, id);
            self.resolve_pending(user_id);
        }
        id
    }

    pub fn register_dependency(&mut self, parent: RegisterId, dependent: RegisterId) {
        self.links.push(RegisterLink { parent, dependent });
    }

    /// Registers a dependency named by `UserId` on each side. If both
    /// sides have already registered, resolves immediately; otherwise the
    /// link stays pending until the missing side calls `register_job`.
    ///
    /// The original's skip condition when scanning pending links for a
    /// newly-registered id was tautological (`parent_user_id != user_id
    /// && parent_user_id != user_id`); the evidently-intended check, used
    /// here, is that a pending link is still irrelevant only if *neither*
    /// side names the id just registered.
    pub fn register_dependency_by_user_id(&mut self, parent_user_id: UserId, dependent_user_id: UserId) {
        match (
            self.user_id_to_register.get(&parent_user_id).copied(),
            self.user_id_to_register.get(&dependent_user_id).copied(),
        ) {
            (Some(parent), Some(dependent)) => self.links.push(RegisterLink { parent, dependent }),
            _ => self.pending.push(PendingUserLink {
                parent_user_id,
                dependent_user_id,
            }),
        }
    }

    fn resolve_pending(&mut self, user_id: UserId) {
        let mut i = 0;
        while i < self.pending.len() {
            let link = &self.pending[i];
            if link.parent_user_id != user_id && link.dependent_user_id != user_id {
                i += 1;
                continue;
            }
            let parent = self.user_id_to_register.get(&link.parent_user_id).copied();
            let dependent = self
                .user_id_to_register
                .get(&link.dependent_user_id)
                .copied();
            match (parent, dependent) {
                (Some(parent), Some(dependent)) => {
                    self.links.push(RegisterLink { parent, dependent });
                    self.pending.swap_remove(i);
                }
                _ => i += 1,
            }
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.links.clear();
        self.pending.clear();
        self.user_id_to_register.clear();
    }

    pub fn job_count(&self) -> usize {
        self.nodes.len()
    }
}

impl PartialEq for UserId {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for UserId {}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_info(priority: i32, user_id: Option<u32>) -> JobInfo {
        JobInfo {
            priority,
            core_number: ANY_CORE,
            multi_run_count: 1,
            complete_once: false,
            user_id: user_id.map(UserId),
        }
    }

    #[test]
    fn user_id_dependency_resolves_regardless_of_registration_order() {
        let mut graph = DependencyJobGraph::new();
        // dependent named before it (or its parent) is registered
        graph.register_dependency_by_user_id(UserId(1), UserId(2));
        assert!(graph.links.is_empty());

        let _parent = graph.register_job(job_info(0, Some(1)), Box::new(|| {}));
        assert!(graph.links.is_empty(), "still waiting on the dependent side");

        let _dependent = graph.register_job(job_info(0, Some(2)), Box::new(|| {}));
        assert_eq!(graph.links.len(), 1);
    }

    #[test]
    fn unrelated_pending_link_is_not_disturbed() {
        let mut graph = DependencyJobGraph::new();
        graph.register_dependency_by_user_id(UserId(10), UserId(20));
        let _unrelated = graph.register_job(job_info(0, Some(99)), Box::new(|| {}));
        assert!(graph.links.is_empty());
    }
}
