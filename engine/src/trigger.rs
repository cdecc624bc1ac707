//! Triggers and chain building.
//!
//! A [`Trigger`] owns the first node of an immutable chain. Chains are
//! assembled with [`ChainBuilder`] from [`Step`]s and linked back to front, so
//! every node knows its successor and holds a weak reference to its trigger.
//!
//! The builder tracks whether a delay has happened before each step. Steps that
//! need the event to still be undelayed (cancelling it, changing its outcome)
//! are rejected once a delay has definitely occurred.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use thiserror::Error;
use tether_types::{DebugLabel, EmptyLabelError, Kleenean};

use crate::continuation::{ContinuationNode, DeferredLogic};
use crate::delay::DelayNode;
use crate::event::EventHandle;
use crate::host::Host;
use crate::locals;
use crate::node::{ConditionNode, EffectNode, Link, NodeRef};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{label}: '{step}' (step {index}) can't be used after the event has already passed")]
    EventAlreadyPassed {
        label: String,
        step: String,
        index: usize,
    },
    #[error("{label}: trigger has no steps")]
    Empty { label: String },
    #[error("invalid trigger label {label:?}: {source}")]
    InvalidLabel {
        label: String,
        #[source]
        source: EmptyLabelError,
    },
}

type MakeNode = Box<dyn FnOnce(Link) -> NodeRef + Send>;

/// One step of a chain, before it is linked.
pub struct Step {
    description: String,
    delay_effect: Kleenean,
    requires_undelayed: bool,
    make: MakeNode,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("description", &self.description)
            .field("delay_effect", &self.delay_effect)
            .field("requires_undelayed", &self.requires_undelayed)
            .finish_non_exhaustive()
    }
}

impl Step {
    /// A step built by `make` once its link is known.
    ///
    /// `delay_effect` says whether running the step delays the event.
    pub fn custom(
        description: impl Into<String>,
        delay_effect: Kleenean,
        make: impl FnOnce(Link) -> NodeRef + Send + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            delay_effect,
            requires_undelayed: false,
            make: Box::new(make),
        }
    }

    pub fn effect<F>(description: impl Into<String>, logic: F) -> Self
    where
        F: Fn(&EventHandle) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let description = description.into();
        let text = description.clone();
        Self::custom(description, Kleenean::False, move |link| {
            Arc::new(EffectNode::new(link, text, Arc::new(logic)))
        })
    }

    /// An effect that acts on the event itself and so must run before any delay.
    pub fn event_effect<F>(description: impl Into<String>, logic: F) -> Self
    where
        F: Fn(&EventHandle) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let description = description.into();
        let text = description.clone();
        let mut step = Self::custom(description, Kleenean::False, move |link| {
            Arc::new(EffectNode::new(link, text, Arc::new(logic)).requiring_undelayed())
        });
        step.requires_undelayed = true;
        step
    }

    pub fn condition<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&EventHandle) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let description = description.into();
        let text = description.clone();
        Self::custom(description, Kleenean::False, move |link| {
            Arc::new(ConditionNode::new(link, text, Arc::new(predicate)))
        })
    }

    /// A step whose logic runs on a background worker.
    pub fn detour<F>(description: impl Into<String>, logic: F) -> Self
    where
        F: Fn(&EventHandle) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::deferred(description, Arc::new(logic))
    }

    /// Like [`Step::detour`], for logic implemented as a type.
    pub fn deferred(description: impl Into<String>, logic: Arc<dyn DeferredLogic>) -> Self {
        let description = description.into();
        let text = description.clone();
        Self::custom(description, Kleenean::True, move |link| {
            Arc::new(ContinuationNode::new(link, text, logic))
        })
    }

    /// `wait <duration>` on the privileged context.
    #[must_use]
    pub fn wait(duration: Duration) -> Self {
        Self::custom(format!("wait {duration:?}"), Kleenean::True, move |link| {
            Arc::new(DelayNode::new(link, duration))
        })
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn delay_effect(&self) -> Kleenean {
        self.delay_effect
    }

    #[must_use]
    pub fn requires_undelayed(&self) -> bool {
        self.requires_undelayed
    }
}

/// Assembles a [`Trigger`] step by step.
#[derive(Debug)]
pub struct ChainBuilder {
    label: String,
    steps: Vec<Step>,
    has_delay_before: Kleenean,
}

impl ChainBuilder {
    /// Start a chain for the trigger labelled `label`. An empty label is
    /// reported by [`ChainBuilder::build`].
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
            has_delay_before: Kleenean::False,
        }
    }

    /// Whether a delay happens before the next step added.
    #[must_use]
    pub fn has_delay_before(&self) -> Kleenean {
        self.has_delay_before
    }

    pub fn then(mut self, step: Step) -> Result<Self, LoadError> {
        if step.requires_undelayed {
            match self.has_delay_before {
                Kleenean::True => {
                    return Err(LoadError::EventAlreadyPassed {
                        label: self.label,
                        step: step.description,
                        index: self.steps.len(),
                    });
                }
                Kleenean::Unknown => tracing::warn!(
                    trigger = %self.label,
                    step = %step.description,
                    "Step may run after the event has already passed"
                ),
                Kleenean::False => {}
            }
        }
        self.has_delay_before = self.has_delay_before.or(step.delay_effect);
        self.steps.push(step);
        Ok(self)
    }

    pub fn build(self) -> Result<Arc<Trigger>, LoadError> {
        let Self {
            label: raw,
            steps,
            has_delay_before,
        } = self;
        let label = match DebugLabel::new(raw.as_str()) {
            Ok(label) => label,
            Err(source) => return Err(LoadError::InvalidLabel { label: raw, source }),
        };
        if steps.is_empty() {
            return Err(LoadError::Empty { label: raw });
        }

        let step_count = steps.len();
        let trigger = Arc::new_cyclic(|owner: &Weak<Trigger>| {
            let mut next: Option<NodeRef> = None;
            for step in steps.into_iter().rev() {
                let link = Link::new(next.take(), Weak::clone(owner));
                next = Some((step.make)(link));
            }
            Trigger {
                label,
                first: next,
                step_count,
                delays: has_delay_before,
            }
        });
        tracing::debug!(trigger = %trigger.label, steps = step_count, "Trigger loaded");
        Ok(trigger)
    }
}

/// A loaded script entry point.
#[derive(Debug)]
pub struct Trigger {
    label: DebugLabel,
    first: Option<NodeRef>,
    step_count: usize,
    delays: Kleenean,
}

impl Trigger {
    #[must_use]
    pub fn label(&self) -> &DebugLabel {
        &self.label
    }

    #[must_use]
    pub fn first(&self) -> Option<&NodeRef> {
        self.first.as_ref()
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Whether running this trigger delays the event.
    #[must_use]
    pub fn delays(&self) -> Kleenean {
        self.delays
    }

    /// Walk the chain for `event` on the current context, then purge its locals.
    ///
    /// If a deferred step took the event over, its locals travel with that
    /// step and are purged where the chain finally ends.
    pub fn execute(&self, host: &Host, event: &EventHandle) {
        let Some(first) = self.first.clone() else {
            return;
        };
        let hand_offs = event.hand_off_count();
        host.walker().walk(host, first, event);
        if event.hand_off_count() == hand_offs {
            locals::purge(event);
        }
    }
}
