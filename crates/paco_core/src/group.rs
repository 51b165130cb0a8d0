//! Ordered groups of stacks.
//!
//! A controller composes its stacks into a [`StackGroup`]: an ordered list
//! of items, each attached under one or more phases. `PROVISION` submits
//! without waiting, `WAIT` blocks until the stack settles, and `WAITLAST`
//! defers its wait until every ordinary `WAIT` in the group has finished,
//! which lets independent long-running stacks overlap.
//!
//! A dotted-path filter scopes execution to a model subtree; stacks
//! outside the filter are logged as `Filtered` and skipped.

use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::StackResult;
use crate::outputs::write_atomic;
use crate::stack::Stack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOrder {
    Provision,
    Wait,
    WaitLast,
}

#[derive(Clone)]
pub enum GroupItem {
    Stack(Arc<Stack>),
    Group(Arc<StackGroup>),
}

#[derive(Clone)]
struct StackOrderItem {
    order: StackOrder,
    item: GroupItem,
}

/// One line of the group's persisted state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedStackEntry {
    pub stack_name: String,
    pub account: String,
    pub region: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GroupStateFile {
    stacks: Vec<ManagedStackEntry>,
}

pub struct StackGroup {
    name: String,
    items: Mutex<Vec<StackOrderItem>>,
    filter: RwLock<Option<String>>,
    state_path: Option<std::path::PathBuf>,
}

impl StackGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(Vec::new()),
            filter: RwLock::new(None),
            state_path: None,
        }
    }

    pub fn with_state_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a stack under one or more phases, in registration order.
    pub fn add_stack_order(&self, stack: Arc<Stack>, orders: &[StackOrder]) {
        let mut items = self.items.lock().expect("group items lock");
        for order in orders {
            items.push(StackOrderItem {
                order: *order,
                item: GroupItem::Stack(stack.clone()),
            });
        }
    }

    /// Shorthand for the common submit-then-wait arrangement.
    pub fn add_stack(&self, stack: Arc<Stack>) {
        self.add_stack_order(stack, &[StackOrder::Provision, StackOrder::Wait]);
    }

    /// Nest another group; its matching operation runs in place.
    pub fn add_group(&self, group: Arc<StackGroup>, orders: &[StackOrder]) {
        let mut items = self.items.lock().expect("group items lock");
        for order in orders {
            items.push(StackOrderItem {
                order: *order,
                item: GroupItem::Group(group.clone()),
            });
        }
    }

    /// Scope execution to a model subtree. Propagates to nested groups.
    pub fn set_filter(&self, filter: Option<String>) {
        *self.filter.write().expect("group filter lock") = filter.clone();
        for item in self.items.lock().expect("group items lock").iter() {
            if let GroupItem::Group(group) = &item.item {
                group.set_filter(filter.clone());
            }
        }
    }

    fn snapshot(&self) -> Vec<StackOrderItem> {
        self.items.lock().expect("group items lock").clone()
    }

    /// Whether the filter admits this stack: exact match or a dotted
    /// prefix of the stack's model path.
    fn admits(&self, stack: &Stack) -> bool {
        let filter = self.filter.read().expect("group filter lock");
        match filter.as_deref() {
            None => true,
            Some(filter) => {
                let path = stack.resource_path();
                path == filter || path.starts_with(&format!("{}.", filter))
            }
        }
    }

    /// Collect every stack in this group and its nested groups, honoring
    /// each group's filter when `admitted_only` is set.
    fn collect_stacks(&self, admitted_only: bool, seen: &mut Vec<Arc<Stack>>) {
        for item in self.snapshot() {
            match item.item {
                GroupItem::Stack(stack) => {
                    if admitted_only && !self.admits(&stack) {
                        continue;
                    }
                    if !seen.iter().any(|s| Arc::ptr_eq(s, &stack)) {
                        seen.push(stack);
                    }
                }
                GroupItem::Group(group) => group.collect_stacks(admitted_only, seen),
            }
        }
    }

    fn admitted_stacks(&self) -> Vec<Arc<Stack>> {
        let mut seen = Vec::new();
        self.collect_stacks(true, &mut seen);
        seen
    }

    fn model_stacks(&self) -> Vec<Arc<Stack>> {
        let mut seen = Vec::new();
        self.collect_stacks(false, &mut seen);
        seen
    }

    pub async fn validate(&self) -> StackResult<()> {
        for item in self.snapshot() {
            match item.item {
                GroupItem::Group(group) => {
                    if item.order == StackOrder::Provision {
                        Box::pin(group.validate()).await?;
                    }
                }
                GroupItem::Stack(stack) => {
                    if item.order == StackOrder::Provision {
                        if !self.admits(&stack) {
                            info!("Filtered {}", stack.name());
                            continue;
                        }
                        stack.validate().await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Run all phases in registration order, deferring `WAITLAST` items to
    /// the end. A failed wait propagates immediately, short-circuiting the
    /// phases of dependent stacks.
    pub async fn provision(&self) -> StackResult<()> {
        let mut deferred: Vec<Arc<Stack>> = Vec::new();
        for item in self.snapshot() {
            match item.item {
                GroupItem::Group(group) => match item.order {
                    StackOrder::Provision => Box::pin(group.provision()).await?,
                    // A nested group's own ordering handled its waits.
                    StackOrder::Wait | StackOrder::WaitLast => {}
                },
                GroupItem::Stack(stack) => {
                    if !self.admits(&stack) {
                        info!("Filtered {}", stack.name());
                        continue;
                    }
                    match item.order {
                        StackOrder::Provision => stack.provision().await?,
                        StackOrder::Wait => stack.wait_for_complete().await?,
                        StackOrder::WaitLast => deferred.push(stack),
                    }
                }
            }
        }
        for stack in deferred {
            stack.wait_for_complete().await?;
        }
        self.save_state()?;
        Ok(())
    }

    /// Delete admitted stacks in reverse registration order.
    pub async fn delete(&self) -> StackResult<()> {
        let mut items = self.snapshot();
        items.reverse();
        let mut deleted: Vec<Arc<Stack>> = Vec::new();
        for item in items {
            match item.item {
                GroupItem::Group(group) => {
                    if item.order == StackOrder::Provision {
                        Box::pin(group.delete()).await?;
                    }
                }
                GroupItem::Stack(stack) => {
                    if item.order != StackOrder::Provision {
                        continue;
                    }
                    if !self.admits(&stack) {
                        info!("Filtered {}", stack.name());
                        continue;
                    }
                    if deleted.iter().any(|s| Arc::ptr_eq(s, &stack)) {
                        continue;
                    }
                    stack.delete().await?;
                    deleted.push(stack);
                }
            }
        }
        if let Some(path) = &self.state_path {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Persist the set of managed stacks, nested groups included. On the
    /// next run this reveals resources that were removed from the model
    /// but still deployed. Entries outside the active filter are carried
    /// over from the previous file rather than dropped.
    fn save_state(&self) -> StackResult<()> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        let entry = |stack: &Arc<Stack>| ManagedStackEntry {
            stack_name: stack.name().to_string(),
            account: stack.account().name.clone(),
            region: stack.region().to_string(),
        };
        let mut current: Vec<ManagedStackEntry> =
            self.admitted_stacks().iter().map(entry).collect();
        let modeled: Vec<ManagedStackEntry> = self.model_stacks().iter().map(entry).collect();

        if path.exists() {
            let previous: GroupStateFile =
                serde_yaml::from_str(&std::fs::read_to_string(path)?).unwrap_or_default();
            for prev in previous.stacks {
                if current.contains(&prev) {
                    continue;
                }
                if modeled.contains(&prev) {
                    // Outside the filter this run but still in the model.
                    current.push(prev);
                    continue;
                }
                warn!(
                    "Stack {} ({}:{}) is no longer in the model; delete it to reclaim",
                    prev.stack_name, prev.account, prev.region
                );
            }
        }

        let state = GroupStateFile { stacks: current };
        write_atomic(path, serde_yaml::to_string(&state)?.as_bytes())?;
        Ok(())
    }

    /// The persisted entries, for tests and reporting.
    pub fn managed_stacks(&self) -> Vec<ManagedStackEntry> {
        self.admitted_stacks()
            .iter()
            .map(|stack| ManagedStackEntry {
                stack_name: stack.name().to_string(),
                account: stack.account().name.clone(),
                region: stack.region().to_string(),
            })
            .collect()
    }
}

impl std::fmt::Debug for StackGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackGroup").field("name", &self.name).finish()
    }
}
