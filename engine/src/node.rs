//! Chain nodes and the synchronous step kinds.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::event::{Event, EventHandle};
use crate::host::Host;
use crate::trigger::Trigger;

/// Shared reference to a node. Chains are immutable and shared by every event running them.
pub type NodeRef = Arc<dyn ChainNode>;

/// Logic of a synchronous step.
pub type EffectFn = dyn Fn(&EventHandle) -> anyhow::Result<()> + Send + Sync;

/// Predicate of a condition step.
pub type ConditionFn = dyn Fn(&EventHandle) -> anyhow::Result<bool> + Send + Sync;

/// A step of a script.
pub trait ChainNode: Send + Sync + fmt::Debug {
    /// Run this step on the current context.
    ///
    /// Returns the node the walker should continue with, or `None` to end
    /// this walk. Deferred steps always return `None`; they resume the chain
    /// themselves later.
    fn walk(&self, host: &Host, event: &EventHandle) -> anyhow::Result<Option<NodeRef>>;

    fn link(&self) -> &Link;

    /// Human-readable form of this step for debug traces.
    fn describe(&self, event: &Event) -> String;

    fn next(&self) -> Option<&NodeRef> {
        self.link().next()
    }

    fn has_next(&self) -> bool {
        self.link().next().is_some()
    }

    /// The trigger owning this node. Upgrades a weak reference; callers on hot
    /// paths should only ask when they need the result.
    fn trigger(&self) -> Option<Arc<Trigger>> {
        self.link().trigger()
    }
}

/// A node's place in its chain: its successor and its owning trigger.
#[derive(Clone)]
pub struct Link {
    next: Option<NodeRef>,
    owner: Weak<Trigger>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("has_next", &self.next.is_some())
            .field("owned", &(self.owner.strong_count() > 0))
            .finish()
    }
}

impl Link {
    #[must_use]
    pub fn new(next: Option<NodeRef>, owner: Weak<Trigger>) -> Self {
        Self { next, owner }
    }

    /// A link with no successor and no owner.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(None, Weak::new())
    }

    #[must_use]
    pub fn next(&self) -> Option<&NodeRef> {
        self.next.as_ref()
    }

    #[must_use]
    pub fn owner(&self) -> Weak<Trigger> {
        Weak::clone(&self.owner)
    }

    #[must_use]
    pub fn trigger(&self) -> Option<Arc<Trigger>> {
        self.owner.upgrade()
    }
}

/// A synchronous step: run the logic, then continue with the successor.
pub struct EffectNode {
    link: Link,
    description: String,
    requires_undelayed: bool,
    logic: Arc<EffectFn>,
}

impl fmt::Debug for EffectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectNode")
            .field("description", &self.description)
            .field("requires_undelayed", &self.requires_undelayed)
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

impl EffectNode {
    #[must_use]
    pub fn new(link: Link, description: impl Into<String>, logic: Arc<EffectFn>) -> Self {
        Self {
            link,
            description: description.into(),
            requires_undelayed: false,
            logic,
        }
    }

    /// Refuse to run once the event has been delayed, e.g. for steps that
    /// change the outcome of the event itself.
    #[must_use]
    pub fn requiring_undelayed(mut self) -> Self {
        self.requires_undelayed = true;
        self
    }
}

impl ChainNode for EffectNode {
    fn walk(&self, host: &Host, event: &EventHandle) -> anyhow::Result<Option<NodeRef>> {
        if self.requires_undelayed && host.delays().is_delayed(event) {
            anyhow::bail!(
                "'{}' can't run: event {} has already passed",
                self.description,
                event.id()
            );
        }
        (self.logic)(event)?;
        host.trace().trace(event, self, true);
        Ok(self.next().cloned())
    }

    fn link(&self) -> &Link {
        &self.link
    }

    fn describe(&self, _event: &Event) -> String {
        self.description.clone()
    }
}

/// A guard step: continue only if the predicate holds, otherwise end the walk.
pub struct ConditionNode {
    link: Link,
    description: String,
    predicate: Arc<ConditionFn>,
}

impl fmt::Debug for ConditionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionNode")
            .field("description", &self.description)
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

impl ConditionNode {
    #[must_use]
    pub fn new(link: Link, description: impl Into<String>, predicate: Arc<ConditionFn>) -> Self {
        Self {
            link,
            description: description.into(),
            predicate,
        }
    }
}

impl ChainNode for ConditionNode {
    fn walk(&self, host: &Host, event: &EventHandle) -> anyhow::Result<Option<NodeRef>> {
        let holds = (self.predicate)(event)?;
        host.trace().trace(event, self, holds);
        Ok(if holds { self.next().cloned() } else { None })
    }

    fn link(&self) -> &Link {
        &self.link
    }

    fn describe(&self, _event: &Event) -> String {
        self.description.clone()
    }
}
