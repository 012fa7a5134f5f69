use braid_core::types::{BranchId, ROOT_BRANCH};
use dashmap::DashMap;
use std::sync::Arc;

use crate::types::{Conversation, Message, UiState};

/// One entry of the visible path: a message plus the branch chosen for it.
#[derive(Debug, Clone)]
pub struct VisibleStep {
    pub message: Message,
    pub branch_id: BranchId,
}

/// Pure function computing the linear "visible path" through a message
/// tree for one viewer (spec §4.4).
///
/// `detached` overrides the message → active-branch choice for messages the
/// viewer has explicitly navigated away from the canonical active branch
/// (`UiState.detached_branches`); everything else follows
/// `Message.active_branch_id`.
pub fn project(
    messages: &[Message],
    ui_state: &UiState,
    viewer: &braid_core::types::UserId,
) -> Vec<VisibleStep> {
    // Step 1: branchId -> message index, honoring per-viewer detached overrides.
    let mut active_branch_of = std::collections::HashMap::new();
    for m in messages {
        let branch_id = ui_state
            .detached_branches
            .get(&m.id)
            .cloned()
            .unwrap_or_else(|| m.active_branch_id.clone());
        active_branch_of.insert(m.id.clone(), branch_id);
    }

    // Step 2: find root messages (active branch's parent is "root"/absent),
    // pick the canonical root as the one whose subtree has the most recent
    // branch creation timestamp.
    let root_messages: Vec<&Message> = messages
        .iter()
        .filter(|m| {
            let bid = &active_branch_of[&m.id];
            m.branch(bid)
                .map(|b| b.parent_branch_id == ROOT_BRANCH || b.parent_branch_id.is_empty())
                .unwrap_or(false)
        })
        .collect();

    let canonical_root = root_messages
        .into_iter()
        .max_by_key(|root| subtree_latest_timestamp(root, messages, &active_branch_of));

    let Some(root) = canonical_root else {
        return Vec::new();
    };

    // Step 3: walk the tree, maintaining branchPath, truncating on append.
    let mut output = Vec::new();
    let mut branch_path: Vec<BranchId> = Vec::new();
    let mut current = Some(root);

    while let Some(message) = current {
        let branch_id = active_branch_of[&message.id].clone();
        let branch = match message.branch(&branch_id) {
            Some(b) => b,
            None => break,
        };

        // Step 4: exclude branches private to someone else.
        let visible_to_viewer = branch
            .private_to_user_id
            .as_ref()
            .map(|owner| owner == viewer)
            .unwrap_or(true);

        let parent_ok = branch.parent_branch_id == ROOT_BRANCH
            || branch.parent_branch_id.is_empty()
            || branch_path
                .iter()
                .any(|b| b.as_str() == branch.parent_branch_id);

        if !parent_ok {
            break;
        }

        if let Some(idx) = branch_path
            .iter()
            .position(|b| b.as_str() == branch.parent_branch_id)
        {
            branch_path.truncate(idx + 1);
        }
        branch_path.push(branch_id.clone());

        if visible_to_viewer {
            output.push(VisibleStep {
                message: message.clone(),
                branch_id: branch_id.clone(),
            });
        }

        current = next_message(messages, &branch_id, &active_branch_of);
    }

    output
}

fn next_message<'a>(
    messages: &'a [Message],
    parent_branch: &BranchId,
    active_branch_of: &std::collections::HashMap<braid_core::types::MessageId, BranchId>,
) -> Option<&'a Message> {
    messages.iter().find(|m| {
        let bid = &active_branch_of[&m.id];
        m.branch(bid)
            .map(|b| b.parent_branch_id == parent_branch.as_str())
            .unwrap_or(false)
    })
}

fn subtree_latest_timestamp(
    root: &Message,
    messages: &[Message],
    active_branch_of: &std::collections::HashMap<braid_core::types::MessageId, BranchId>,
) -> chrono::DateTime<chrono::Utc> {
    let mut latest = root
        .branches
        .iter()
        .map(|b| b.created_at)
        .max()
        .unwrap_or_else(chrono::Utc::now);

    let mut frontier = vec![root.active_branch_id.clone()];
    let mut seen = std::collections::HashSet::new();
    while let Some(parent) = frontier.pop() {
        if !seen.insert(parent.clone()) {
            continue;
        }
        for m in messages {
            for b in &m.branches {
                if b.parent_branch_id == parent.as_str() {
                    latest = latest.max(b.created_at);
                    frontier.push(active_branch_of[&m.id].clone());
                }
            }
        }
    }
    latest
}

/// Caches `project()` output keyed by `(conversation, viewer, store version)`.
/// Satisfies §4.4's "must be cacheable by a version counter" requirement.
#[derive(Default)]
pub struct ProjectionCache {
    entries: DashMap<(braid_core::types::ConversationId, braid_core::types::UserId, u64), Arc<Vec<VisibleStep>>>,
}

impl ProjectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &self,
        conversation: &Conversation,
        viewer: &braid_core::types::UserId,
        version: u64,
        messages: &[Message],
        ui_state: &UiState,
    ) -> Arc<Vec<VisibleStep>> {
        let key = (conversation.id.clone(), viewer.clone(), version);
        if let Some(hit) = self.entries.get(&key) {
            return hit.clone();
        }
        let computed = Arc::new(project(messages, ui_state, viewer));
        self.entries.insert(key, computed.clone());
        computed
    }
}
