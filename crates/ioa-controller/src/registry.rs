use std::time::Duration;

use ioa::action::ActionInvocation;
use ioa::property::PropertyState;
use ioa::thing::Things;

use reqwest::{Client, StatusCode, Url};

use serde_json::{Map, Value};

use tracing::{debug, error};

use crate::error::{Error, ErrorKind, Result};
use crate::subscription::Subscription;

// The default timeout of a registry request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A reference to a thing of a registry.
///
/// A handle contains the position of a thing inside a registry snapshot,
/// its identifier, or both. When a position is present, it takes precedence
/// over the identifier.
///
/// A position is only valid for the snapshot it was derived from, so it
/// must not be kept across different listing calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThingHandle {
    index: Option<usize>,
    id: Option<String>,
}

impl ThingHandle {
    /// Creates a [`ThingHandle`] from the position of a thing.
    #[must_use]
    #[inline]
    pub const fn index(index: usize) -> Self {
        Self {
            index: Some(index),
            id: None,
        }
    }

    /// Creates a [`ThingHandle`] from the identifier of a thing.
    #[must_use]
    #[inline]
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            index: None,
            id: Some(id.into()),
        }
    }

    /// Sets the position of a thing.
    #[must_use]
    #[inline]
    pub const fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Sets the identifier of a thing.
    #[must_use]
    #[inline]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Returns the position of a thing, if any.
    #[must_use]
    #[inline]
    pub const fn position(&self) -> Option<usize> {
        self.index
    }

    /// Returns the identifier of a thing, if any.
    #[must_use]
    #[inline]
    pub fn thing_id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl std::fmt::Display for ThingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.index, self.id.as_deref()) {
            (Some(index), Some(id)) => write!(f, "thing {index} (`{id}`)"),
            (Some(index), None) => write!(f, "thing {index}"),
            (None, Some(id)) => write!(f, "thing `{id}`"),
            (None, None) => write!(f, "unspecified thing"),
        }
    }
}

/// A client for the registry of things.
///
/// The client translates the logical operations on things into `HTTP`
/// requests and `WebSocket` subscriptions against the registry. The base
/// address of the registry is the only state shared among all operations.
#[derive(Debug, Clone)]
pub struct ThingRegistryClient {
    base_url: String,
    timeout: Duration,
    client: Client,
}

impl ThingRegistryClient {
    /// Creates a [`ThingRegistryClient`] for the registry at the given
    /// base address.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
            client: Client::new(),
        }
    }

    /// Sets the timeout of every registry request.
    #[must_use]
    #[inline]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base address of the registry.
    #[must_use]
    #[inline]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches the current snapshot of the registry things.
    ///
    /// Both a single thing and a list of things are accepted as responses,
    /// and always returned as a list.
    ///
    /// # Errors
    ///
    /// Network failures, timeouts, a non-success status, or a malformed
    /// response body cause an error.
    pub async fn list_things(&self) -> Result<Things> {
        debug!("Fetching the things of `{}`", self.base_url);

        let things = self
            .client
            .get(&self.base_url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<Things>()
            .await?;

        debug!("The registry exposes {} things", things.len());
        Ok(things)
    }

    /// Resolves a [`ThingHandle`] to the position of a thing inside the
    /// current registry snapshot.
    ///
    /// An explicit position is returned unchanged, without any existence
    /// check. Otherwise, a fresh snapshot is fetched and the position of the
    /// first thing with the handle identifier is returned.
    ///
    /// # Errors
    ///
    /// An error is returned if the handle identifier does not match any
    /// thing, if the handle is empty, or if the snapshot cannot be fetched.
    pub async fn resolve(&self, handle: &ThingHandle) -> Result<usize> {
        if let Some(index) = handle.position() {
            return Ok(index);
        }

        let Some(id) = handle.thing_id() else {
            return Err(Error::not_found(
                "The handle contains neither a position nor an identifier.",
            ));
        };

        let things = self.list_things().await?;
        things.position(id).ok_or_else(|| {
            error!("Unable to find the thing `{id}` in the registry");
            Error::not_found(format!("No thing with identifier `{id}` in the registry."))
        })
    }

    /// Reads the current [`PropertyState`] of a thing.
    ///
    /// # Errors
    ///
    /// Resolution failures, network failures, timeouts, a non-success status,
    /// or a malformed response body cause an error.
    pub async fn get_properties(&self, handle: &ThingHandle) -> Result<PropertyState> {
        let index = self.resolve(handle).await?;
        let url = format!("{}/{index}/properties", self.base_url);
        debug!("Reading the properties of thing {index} at `{url}`");

        let state = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<PropertyState>()
            .await?;

        Ok(state)
    }

    /// Writes a property value of a thing.
    ///
    /// Returns `true` when the registry acknowledges the write with an `OK`
    /// status. The acknowledgement does not guarantee that the thing has
    /// applied the value.
    ///
    /// # Errors
    ///
    /// Resolution failures, network failures, or timeouts cause an error.
    pub async fn set_property(
        &self,
        handle: &ThingHandle,
        name: &str,
        value: Value,
    ) -> Result<bool> {
        let index = self.resolve(handle).await?;
        let url = self.property_url(index, name)?;
        debug!("Writing the property `{name}` of thing {index} at `{url}`");

        let mut body = Map::new();
        let _ = body.insert(name.to_owned(), value);

        let response = self
            .client
            .put(url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        Ok(response.status() == StatusCode::OK)
    }

    /// Invokes an action of a thing and returns the raw response body.
    ///
    /// An empty response body is returned as [`Value::Null`], a body which
    /// is not `JSON` as [`Value::String`].
    ///
    /// # Errors
    ///
    /// Resolution failures, network failures, timeouts, or a non-success
    /// status cause an error.
    pub async fn run_action(
        &self,
        handle: &ThingHandle,
        invocation: &ActionInvocation,
    ) -> Result<Value> {
        let index = self.resolve(handle).await?;
        let url = format!("{}/{index}/actions", self.base_url);
        debug!("Invoking `{invocation}` on thing {index} at `{url}`");

        let body = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&invocation.request_body())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    /// Subscribes to the update channel of a thing.
    ///
    /// The returned [`Subscription`] yields a [`PropertyState`] for every
    /// property status message pushed by the thing.
    ///
    /// # Errors
    ///
    /// Resolution failures, or failures in opening the channel, cause
    /// an error.
    pub async fn subscribe(&self, handle: &ThingHandle) -> Result<Subscription> {
        let index = self.resolve(handle).await?;
        let url = format!("{}/{index}", self.updates_url());
        Subscription::open(&url, index).await
    }

    // The property name is a single percent-encoded path segment.
    fn property_url(&self, index: usize, name: &str) -> Result<Url> {
        let invalid = || {
            Error::new(
                ErrorKind::Transport,
                format!("`{}` cannot be a registry address.", self.base_url),
            )
        };

        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        {
            let mut segments = url.path_segments_mut().map_err(|()| invalid())?;
            let _ = segments
                .pop_if_empty()
                .push(&index.to_string())
                .push("properties")
                .push(name);
        }
        Ok(url)
    }

    fn updates_url(&self) -> String {
        if let Some(address) = self.base_url.strip_prefix("https://") {
            format!("wss://{address}")
        } else if let Some(address) = self.base_url.strip_prefix("http://") {
            format!("ws://{address}")
        } else {
            self.base_url.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use ioa::action::ActionInvocation;
    use ioa::property::PropertyState;
    use ioa::thing::{ThingDescriptor, Things};

    use crate::error::ErrorKind;
    use crate::tests::{MockRegistry, lamp, sensor, start_registry};

    use super::{ThingHandle, ThingRegistryClient};

    fn two_things() -> MockRegistry {
        MockRegistry::new(json!([lamp(), sensor()]))
            .properties(0, json!({ "on": false, "brightness": 30 }))
            .properties(1, json!({ "humidity": 41.0 }))
    }

    #[test]
    fn base_url_normalization() {
        let client = ThingRegistryClient::new("http://localhost:8888/");
        assert_eq!(client.base_url(), "http://localhost:8888");
        assert_eq!(client.updates_url(), "ws://localhost:8888");

        let client = ThingRegistryClient::new("https://things.local");
        assert_eq!(client.updates_url(), "wss://things.local");
    }

    #[test]
    fn handle_display() {
        assert_eq!(ThingHandle::index(0).to_string(), "thing 0");
        assert_eq!(ThingHandle::id("lamp-1").to_string(), "thing `lamp-1`");
        assert_eq!(
            ThingHandle::id("lamp-1").with_index(2).to_string(),
            "thing 2 (`lamp-1`)"
        );
        assert_eq!(ThingHandle::default().to_string(), "unspecified thing");
    }

    #[tokio::test]
    async fn list_of_things() {
        let (url, _) = start_registry(two_things()).await;
        let client = ThingRegistryClient::new(url);

        let things = client.list_things().await.unwrap();
        assert_eq!(
            things,
            Things::from_things(vec![
                serde_json::from_value::<ThingDescriptor>(lamp()).unwrap(),
                serde_json::from_value::<ThingDescriptor>(sensor()).unwrap(),
            ])
        );
    }

    #[tokio::test]
    async fn single_thing_listing() {
        let (url, _) = start_registry(MockRegistry::new(lamp())).await;
        let client = ThingRegistryClient::new(url);

        let things = client.list_things().await.unwrap();
        assert_eq!(things.len(), 1);
        assert_eq!(things.position("lamp-1"), Some(0));
    }

    #[tokio::test]
    async fn explicit_index_is_honoured() {
        let (url, registry) = start_registry(two_things()).await;
        let client = ThingRegistryClient::new(url);

        // The first position is a valid explicit index.
        assert_eq!(client.resolve(&ThingHandle::index(0)).await, Ok(0));
        // An explicit index wins over an identifier.
        assert_eq!(
            client
                .resolve(&ThingHandle::id("sensor-1").with_index(0))
                .await,
            Ok(0)
        );
        // An explicit index is trusted without an existence check.
        assert_eq!(client.resolve(&ThingHandle::index(7)).await, Ok(7));

        assert_eq!(registry.listing_requests(), 0);
    }

    #[tokio::test]
    async fn resolve_by_id() {
        let (url, registry) = start_registry(two_things()).await;
        let client = ThingRegistryClient::new(url);

        assert_eq!(client.resolve(&ThingHandle::id("lamp-1")).await, Ok(0));
        assert_eq!(client.resolve(&ThingHandle::id("sensor-1")).await, Ok(1));
        // Every resolution fetches a fresh snapshot.
        assert_eq!(registry.listing_requests(), 2);
    }

    #[tokio::test]
    async fn unknown_id_stops_the_operation() {
        let (url, registry) = start_registry(two_things()).await;
        let client = ThingRegistryClient::new(url);
        let handle = ThingHandle::id("fridge");

        let error = client.resolve(&handle).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);

        assert_eq!(
            client.get_properties(&handle).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            client
                .set_property(&handle, "on", json!(true))
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            client
                .run_action(&handle, &ActionInvocation::new("turnOn"))
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            client.subscribe(&handle).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );

        assert_eq!(registry.thing_requests(), 0);
        assert!(registry.invocations().is_empty());
    }

    #[tokio::test]
    async fn empty_handle() {
        let (url, registry) = start_registry(two_things()).await;
        let client = ThingRegistryClient::new(url);

        let error = client.resolve(&ThingHandle::default()).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert_eq!(registry.listing_requests(), 0);
    }

    #[tokio::test]
    async fn read_properties() {
        let (url, _) = start_registry(two_things()).await;
        let client = ThingRegistryClient::new(url);

        assert_eq!(
            client.get_properties(&ThingHandle::index(0)).await,
            Ok(PropertyState::new()
                .insert("on", json!(false))
                .insert("brightness", json!(30)))
        );
        assert_eq!(
            client.get_properties(&ThingHandle::id("sensor-1")).await,
            Ok(PropertyState::new().insert("humidity", json!(41.0)))
        );

        // A missing thing is a status failure, not an empty state.
        assert_eq!(
            client
                .get_properties(&ThingHandle::index(5))
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::Status
        );
    }

    #[tokio::test]
    async fn write_properties() {
        let (url, registry) = start_registry(two_things()).await;
        let client = ThingRegistryClient::new(url);

        assert_eq!(
            client
                .set_property(&ThingHandle::index(0), "on", json!(true))
                .await,
            Ok(true)
        );
        assert_eq!(
            client
                .get_properties(&ThingHandle::index(0))
                .await
                .unwrap()
                .get("on"),
            Some(&json!(true))
        );

        // The registry refuses to write an unknown property.
        assert_eq!(
            client
                .set_property(&ThingHandle::index(0), "color", json!("red"))
                .await,
            Ok(false)
        );
        assert_eq!(registry.writes(), vec![(0, json!({ "on": true }))]);
    }

    #[test]
    fn property_names_stay_in_their_segment() {
        let client = ThingRegistryClient::new("http://localhost:8888/");
        assert_eq!(
            client.property_url(2, "on").unwrap().as_str(),
            "http://localhost:8888/2/properties/on"
        );
        assert_eq!(
            client.property_url(0, "a/b?c#d").unwrap().as_str(),
            "http://localhost:8888/0/properties/a%2Fb%3Fc%23d"
        );

        let client = ThingRegistryClient::new("registry:8888");
        assert_eq!(
            client.property_url(0, "on").unwrap_err().kind(),
            ErrorKind::Transport
        );
    }

    #[tokio::test]
    async fn write_property_with_reserved_characters() {
        let registry = MockRegistry::new(json!([lamp()]))
            .properties(0, json!({ "color/rgb": "white", "on": false }));
        let (url, registry) = start_registry(registry).await;
        let client = ThingRegistryClient::new(url);

        assert_eq!(
            client
                .set_property(&ThingHandle::index(0), "color/rgb", json!("red"))
                .await,
            Ok(true)
        );
        assert_eq!(
            client
                .get_properties(&ThingHandle::index(0))
                .await
                .unwrap(),
            PropertyState::new()
                .insert("color/rgb", json!("red"))
                .insert("on", json!(false))
        );
        assert_eq!(registry.writes(), vec![(0, json!({ "color/rgb": "red" }))]);
    }

    #[tokio::test]
    async fn invoke_action() {
        let (url, registry) = start_registry(two_things()).await;
        let client = ThingRegistryClient::new(url);

        let invocation = ActionInvocation::new("turnOn").parameter("brightness", json!(80));
        let response = client
            .run_action(&ThingHandle::id("lamp-1"), &invocation)
            .await
            .unwrap();

        assert_eq!(
            response,
            json!({ "turnOn": { "input": { "brightness": 80 }, "status": "created" } })
        );
        assert_eq!(
            registry.invocations(),
            vec![(0, json!({ "turnOn": { "input": { "brightness": 80 } } }))]
        );
    }

    #[tokio::test]
    async fn unreachable_registry() {
        // Bind a port and release it so nothing is listening there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let client = ThingRegistryClient::new(format!("http://{address}"));
        assert_eq!(
            client.list_things().await.unwrap_err().kind(),
            ErrorKind::Transport
        );
    }
}
