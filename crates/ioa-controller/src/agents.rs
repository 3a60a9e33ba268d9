use ioa::action::{ActionInvocation, INPUT_KEY};
use ioa::property::PropertyState;
use ioa::thing::{ThingDescriptor, Things};

use serde_json::{Map, Value};

use tracing::debug;

use crate::error::Result;
use crate::generation::{GenerationOptions, TextGenerator};

fn thing_selector_prompt(catalog: &str, request: &str) -> String {
    format!(
        r"### Instructions
You are an agent that controls the devices of a home network.
Among the devices listed below, choose the most appropriate one for the user request.

```
{catalog}
```

The text before the `:` is the device ID, the rest is the device description.
Your answer must be exactly one string containing the ID of the device most relevant to the user request.

### Input

{request}

### Result
"
    )
}

fn action_selector_prompt(description: &str, state: &str, actions: &str, request: &str) -> String {
    format!(
        r#"### Instruction
You are a home automation system. Your task is to turn a user request into a JSON action call for the device described below.

RULES:
1. Answer ONLY with the JSON.
2. Use the format: {{$ACTION_NAME: {{"input": {{...}} }} }}
3. Replace "$ACTION_NAME" with the action id as the JSON key.
4. Set the parameter values according to the user request.
5. If no action is relevant for the user request, answer with an empty JSON.


CURRENT DEVICE:
{description}

CURRENT STATE:
{state}

AVAILABLE ACTIONS:
{actions}

### Input:
User: "{request}"

### Response:
{{"#
    )
}

/// An agent which selects the thing that better addresses a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThingSelector {
    options: GenerationOptions,
}

impl ThingSelector {
    /// Creates a [`ThingSelector`] with the default [`GenerationOptions`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the [`GenerationOptions`].
    #[must_use]
    #[inline]
    pub const fn options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Renders the prompt which lists every thing as an `id: description`
    /// pair, one per line, followed by the request.
    #[must_use]
    pub fn render_prompt(&self, request: &str, things: &Things) -> String {
        thing_selector_prompt(&things.to_string(), request)
    }

    /// Returns the identifier of the thing chosen for the request.
    ///
    /// The returned identifier is only trimmed: it comes from an untrusted
    /// channel and its existence among the given things is not verified.
    ///
    /// # Errors
    ///
    /// The text-generation channel failure is returned as is.
    pub async fn select<G: TextGenerator>(
        &self,
        generator: &G,
        request: &str,
        things: &Things,
    ) -> Result<String> {
        let prompt = self.render_prompt(request, things);
        debug!("Thing selection prompt:\n{prompt}");

        let completion = generator.complete(&prompt, &self.options).await?;
        debug!("Thing selection response: {completion}");

        Ok(completion.trim().to_owned())
    }
}

/// The outcome of an action selection.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    /// A valid action invocation.
    Success(ActionInvocation),
    /// The completion cannot be parsed into the expected `JSON` object.
    MalformedResponse,
    /// The chosen action does not belong to the thing.
    UnknownAction(String),
    /// The completion declined to select any action.
    NoApplicableAction,
}

impl DecisionOutcome {
    /// Checks whether the outcome is a valid action invocation.
    #[must_use]
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the action invocation, if any.
    #[must_use]
    #[inline]
    pub const fn invocation(&self) -> Option<&ActionInvocation> {
        match self {
            Self::Success(invocation) => Some(invocation),
            _ => None,
        }
    }
}

impl std::fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success(invocation) => write!(f, "Success: {invocation}"),
            Self::MalformedResponse => f.write_str("Malformed Response"),
            Self::UnknownAction(action_id) => write!(f, "Unknown Action `{action_id}`"),
            Self::NoApplicableAction => f.write_str("No Applicable Action"),
        }
    }
}

/// An action selection along with its diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDecision {
    /// Selection outcome.
    pub outcome: DecisionOutcome,
    /// The rendered prompt.
    pub prompt: String,
    /// The raw completion, prefixed by the `{` which primes it.
    pub output: String,
    /// The parsed completion object, present only on success.
    pub parsed: Option<Map<String, Value>>,
}

impl std::fmt::Display for ActionDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Outcome: {}", self.outcome)?;
        writeln!(f, "Prompt: ```")?;
        writeln!(f, "{}", self.prompt)?;
        writeln!(f, "```")?;
        write!(f, "Response: {}", self.output)
    }
}

/// An agent which selects the action of a thing that addresses a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionSelector {
    options: GenerationOptions,
}

impl ActionSelector {
    /// Creates an [`ActionSelector`] with the default [`GenerationOptions`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the [`GenerationOptions`].
    #[must_use]
    #[inline]
    pub const fn options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Renders the prompt which contains the thing description, its current
    /// state, its action schemas, and the request.
    ///
    /// The prompt ends with a `{` which primes the completion.
    #[must_use]
    pub fn render_prompt(
        &self,
        request: &str,
        thing: &ThingDescriptor,
        state: &PropertyState,
    ) -> String {
        action_selector_prompt(
            &thing.description,
            &state.to_string(),
            &thing.actions_json(),
            request,
        )
    }

    /// Selects the action of a thing for the request.
    ///
    /// The text-generation channel is invoked once, then its completion is
    /// classified through [`classify`].
    ///
    /// # Errors
    ///
    /// The text-generation channel failure is returned as is. Every
    /// malformed completion is an [`ActionDecision`] instead.
    pub async fn select<G: TextGenerator>(
        &self,
        generator: &G,
        request: &str,
        thing: &ThingDescriptor,
        state: &PropertyState,
    ) -> Result<ActionDecision> {
        let prompt = self.render_prompt(request, thing, state);
        debug!("Action selection prompt:\n{prompt}");

        let completion = generator.complete(&prompt, &self.options).await?;
        debug!("Action selection response: {completion}");

        let output = prime(&completion);
        let (outcome, parsed) = decide(&output, thing);

        Ok(ActionDecision {
            outcome,
            prompt,
            output,
            parsed,
        })
    }
}

/// Classifies the completion of an action selection prompt.
///
/// The completion is expected to continue the `{` which ends the prompt,
/// and to contain a single `JSON` object mapping an action identifier to
/// its `{"input": {...}}` parameters. A completion which already starts
/// with `{` is taken as is.
///
/// Exactly one [`DecisionOutcome`] is returned for any completion.
#[must_use]
pub fn classify(completion: &str, thing: &ThingDescriptor) -> DecisionOutcome {
    decide(&prime(completion), thing).0
}

fn prime(completion: &str) -> String {
    let completion = completion.trim();
    if completion.starts_with('{') {
        completion.to_owned()
    } else {
        format!("{{{completion}")
    }
}

fn decide(
    output: &str,
    thing: &ThingDescriptor,
) -> (DecisionOutcome, Option<Map<String, Value>>) {
    let Some(candidate) = locate_object(output) else {
        return (DecisionOutcome::MalformedResponse, None);
    };

    if is_empty_object(candidate) {
        return (DecisionOutcome::NoApplicableAction, None);
    }

    let Some(parsed) = parse_object(candidate) else {
        return (DecisionOutcome::MalformedResponse, None);
    };

    // Only the first action is honoured.
    let Some((action_id, body)) = parsed.iter().next() else {
        return (DecisionOutcome::NoApplicableAction, None);
    };

    if !thing.has_action(action_id) {
        return (DecisionOutcome::UnknownAction(action_id.clone()), None);
    }

    let Value::Object(body) = body else {
        return (DecisionOutcome::MalformedResponse, None);
    };

    let parameters = match body.get(INPUT_KEY) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(parameters)) => parameters.clone(),
        Some(_) => return (DecisionOutcome::MalformedResponse, None),
    };

    let invocation = ActionInvocation::new(action_id.as_str()).with_parameters(parameters);
    (DecisionOutcome::Success(invocation), Some(parsed))
}

// Returns the first object of the text, from its first `{` up to the brace
// which closes it. Braces inside string literals are ignored.
fn locate_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[inline]
fn is_empty_object(candidate: &str) -> bool {
    candidate
        .chars()
        .filter(|c| !c.is_whitespace())
        .eq("{}".chars())
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    let candidate = candidate.replace(['\n', '\r'], "");

    let value = serde_json::from_str::<Value>(&candidate)
        .or_else(|_| serde_json::from_str::<Value>(&quote_bare_keys(&candidate)))
        .ok()?;

    match value {
        Value::Object(object) => Some(object),
        _ => None,
    }
}

#[inline]
fn is_key_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

#[inline]
fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-' | '.')
}

// Quotes the object keys written as bare identifiers, such as `turnOn` in
// `{turnOn: {"input": {}}}`.
fn quote_bare_keys(text: &str) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    let mut quoted = String::with_capacity(text.len() + 8);

    let mut in_string = false;
    let mut escaped = false;
    let mut expects_key = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];

        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            quoted.push(c);
            i += 1;
            continue;
        }

        if expects_key && is_key_start(c) {
            let start = i;
            while i < chars.len() && is_key_char(chars[i]) {
                i += 1;
            }

            let mut next = i;
            while next < chars.len() && chars[next].is_whitespace() {
                next += 1;
            }

            let key = chars[start..i].iter().collect::<String>();
            if chars.get(next) == Some(&':') {
                quoted.push('"');
                quoted.push_str(&key);
                quoted.push('"');
            } else {
                quoted.push_str(&key);
            }
            expects_key = false;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                expects_key = false;
            }
            '{' | ',' => expects_key = true,
            c if c.is_whitespace() => {}
            _ => expects_key = false,
        }
        quoted.push(c);
        i += 1;
    }
    quoted
}
