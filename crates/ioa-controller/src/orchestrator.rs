use ioa::action::ActionInvocation;

use serde_json::Value;

use tracing::{info, warn};

use crate::agents::{ActionDecision, ActionSelector, DecisionOutcome, ThingSelector};
use crate::error::{Error, ErrorKind, Result};
use crate::generation::TextGenerator;
use crate::registry::{ThingHandle, ThingRegistryClient};

/// The final report of a request processed by an [`Orchestrator`].
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// No thing of the registry has been resolved for the request.
    NoThingResolved {
        /// The identifier returned by the thing selection, if any.
        selected: Option<String>,
        /// Why the pipeline stopped.
        reason: String,
    },
    /// The action selection did not produce a valid invocation, so nothing
    /// has been invoked.
    Declined {
        /// Thing identifier.
        thing_id: String,
        /// The action selection along with its diagnostics.
        decision: ActionDecision,
    },
    /// The action has been invoked.
    Invoked {
        /// Thing identifier.
        thing_id: String,
        /// The invoked action.
        invocation: ActionInvocation,
        /// The raw response of the registry.
        response: Value,
    },
    /// The action invocation has failed.
    InvocationFailed {
        /// Thing identifier.
        thing_id: String,
        /// The action which has failed.
        invocation: ActionInvocation,
        /// The invocation error.
        error: Error,
    },
}

impl Report {
    /// Checks whether an action has been invoked successfully.
    #[must_use]
    #[inline]
    pub const fn is_invoked(&self) -> bool {
        matches!(self, Self::Invoked { .. })
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoThingResolved { selected, reason } => {
                write!(f, "No thing resolved")?;
                if let Some(selected) = selected {
                    write!(f, " (selected `{selected}`)")?;
                }
                write!(f, ": {reason}")
            }
            Self::Declined { thing_id, decision } => {
                writeln!(f, "No action taken on `{thing_id}`")?;
                write!(f, "{decision}")
            }
            Self::Invoked {
                thing_id,
                invocation,
                response,
            } => write!(f, "Invoked `{invocation}` on `{thing_id}`: {response}"),
            Self::InvocationFailed {
                thing_id,
                invocation,
                error,
            } => write!(f, "Failed to invoke `{invocation}` on `{thing_id}`: {error}"),
        }
    }
}

/// The pipeline which turns a request into a thing action.
///
/// The steps are strictly sequential, each one consumes the output of the
/// previous step:
///
/// 1. Fetch the registry snapshot
/// 2. Select a thing for the request
/// 3. Resolve the thing and read its current state
/// 4. Select an action of the thing for the request
/// 5. Invoke the action
///
/// No step is ever retried, since every text generation is costly and its
/// output is not reproducible.
#[derive(Debug)]
pub struct Orchestrator<G> {
    registry: ThingRegistryClient,
    generator: G,
    thing_selector: ThingSelector,
    action_selector: ActionSelector,
}

impl<G: TextGenerator> Orchestrator<G> {
    /// Creates an [`Orchestrator`] from a [`ThingRegistryClient`] and a
    /// [`TextGenerator`].
    #[must_use]
    pub fn new(registry: ThingRegistryClient, generator: G) -> Self {
        Self {
            registry,
            generator,
            thing_selector: ThingSelector::new(),
            action_selector: ActionSelector::new(),
        }
    }

    /// Sets the [`ThingSelector`].
    #[must_use]
    #[inline]
    pub fn thing_selector(mut self, thing_selector: ThingSelector) -> Self {
        self.thing_selector = thing_selector;
        self
    }

    /// Sets the [`ActionSelector`].
    #[must_use]
    #[inline]
    pub fn action_selector(mut self, action_selector: ActionSelector) -> Self {
        self.action_selector = action_selector;
        self
    }

    /// Returns the [`ThingRegistryClient`].
    #[must_use]
    #[inline]
    pub const fn registry(&self) -> &ThingRegistryClient {
        &self.registry
    }

    /// Returns the [`TextGenerator`].
    #[must_use]
    #[inline]
    pub const fn generator(&self) -> &G {
        &self.generator
    }

    /// Processes a request and reports its outcome.
    ///
    /// A failed thing selection, a thing absent from the registry, or an
    /// invalid action selection stop the pipeline with a [`Report`].
    ///
    /// # Errors
    ///
    /// Registry failures occurring before the action invocation, and
    /// text-generation failures during the action selection, cause an error.
    pub async fn run(&self, request: &str) -> Result<Report> {
        info!("Processing the request `{request}`");

        let things = self.registry.list_things().await?;
        info!("Selecting a thing among {} things", things.len());

        let selected = match self
            .thing_selector
            .select(&self.generator, request, &things)
            .await
        {
            Ok(selected) => selected,
            Err(e) => {
                warn!("Thing selection failed: {e}");
                return Ok(Report::NoThingResolved {
                    selected: None,
                    reason: e.to_string(),
                });
            }
        };

        let Some(thing) = things.find(&selected) else {
            warn!("The selected thing `{selected}` is not in the registry");
            return Ok(Report::NoThingResolved {
                reason: format!("No thing with identifier `{selected}` in the registry."),
                selected: Some(selected),
            });
        };
        info!("Selected thing `{}`", thing.id);

        let index = match self.registry.resolve(&ThingHandle::id(&thing.id)).await {
            Ok(index) => index,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("The selected thing `{selected}` left the registry");
                return Ok(Report::NoThingResolved {
                    selected: Some(selected),
                    reason: e.info().to_owned(),
                });
            }
            Err(e) => return Err(e),
        };

        let handle = ThingHandle::index(index).with_id(&thing.id);
        let state = self.registry.get_properties(&handle).await?;
        info!("Selecting an action of `{}` in state {state}", thing.id);

        let decision = self
            .action_selector
            .select(&self.generator, request, thing, &state)
            .await?;

        let DecisionOutcome::Success(invocation) = &decision.outcome else {
            warn!(
                "No action taken on `{}`, {}\nPrompt: ```\n{}\n```\nResponse: {}",
                thing.id, decision.outcome, decision.prompt, decision.output
            );
            return Ok(Report::Declined {
                thing_id: thing.id.clone(),
                decision,
            });
        };
        let invocation = invocation.clone();
        info!("Invoking `{invocation}` on `{}`", thing.id);

        Ok(match self.registry.run_action(&handle, &invocation).await {
            Ok(response) => Report::Invoked {
                thing_id: thing.id.clone(),
                invocation,
                response,
            },
            Err(error) => {
                warn!("Invocation of `{invocation}` on `{}` failed: {error}", thing.id);
                Report::InvocationFailed {
                    thing_id: thing.id.clone(),
                    invocation,
                    error,
                }
            }
        })
    }
}
