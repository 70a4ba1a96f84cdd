//! Discovery engine
//!
//! A [`Spot`] is one participant ("point") in the presence protocol. It
//! owns two datagram sockets - control traffic on the shared broadcast
//! port, addressed traffic on its own data port - advertises itself every
//! [`ADVERTISE_INTERVAL`], answers searches, keeps a table of live hosts,
//! and surfaces everything to application code through an [`Emitter`].
//!
//! All table and channel mutation happens inside the engine's own
//! handlers; callers only ever see snapshots.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use crate::codec::Value;
use crate::events::{Emitter, SpotEvent};
use crate::protocol::{
    AlivePayload, ByePayload, Channel, DataBody, DataPayload, Envelope, Identity, MessageIds,
    MessageKind, PointKind, SearchRequest, SearchResponse, SearchTarget, DATA_PORT,
};
use crate::socket::DatagramSocket;

/// How often a started spot re-broadcasts its `alive` advertisement.
pub const ADVERTISE_INTERVAL: Duration = Duration::from_secs(3);

/// Engine errors
#[derive(Error, Debug)]
pub enum SpotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("already started")]
    AlreadyStarted,

    #[error("channel {0} already registered")]
    DuplicateChannel(u32),
}

pub type SpotResult<T> = Result<T, SpotError>;

/// Identity of this point, minus the host address peers fill in on
/// receipt. Immutable once the spot is constructed.
#[derive(Debug, Clone)]
pub struct SpotOptions {
    /// Stable key for host-table membership, generated per process by
    /// default.
    pub uuid: String,
    pub kind: PointKind,
    /// Data port peers address replies and `data` messages to.
    pub port: u16,
    pub name: String,
}

impl Default for SpotOptions {
    fn default() -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            kind: PointKind::Host,
            port: DATA_PORT,
            name: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }
}

/// A live peer: its identity plus when we last accepted an `alive` from it.
///
/// Entries are only removed by an explicit `bye`; there is no staleness
/// sweep.
#[derive(Debug, Clone)]
pub struct HostEntry {
    pub identity: Identity,
    pub active: SystemTime,
}

/// Presence discovery engine.
///
/// Cheap to clone; clones share the same engine state.
#[derive(Clone)]
pub struct Spot {
    inner: Arc<SpotInner>,
}

struct SpotInner {
    options: SpotOptions,
    sig: Arc<dyn DatagramSocket>,
    dat: Arc<dyn DatagramSocket>,
    sig_port: u16,
    emitter: Emitter,
    ids: MessageIds,
    hosts: RwLock<HashMap<String, HostEntry>>,
    channels: RwLock<Vec<Channel>>,
    started: RwLock<bool>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl Spot {
    /// Create a spot over two pre-bound sockets: `sig` on the shared
    /// broadcast port, `dat` on this point's data port. The data port in
    /// `options` is overwritten with the port `dat` is actually bound to.
    pub fn new(
        sig: Arc<dyn DatagramSocket>,
        dat: Arc<dyn DatagramSocket>,
        mut options: SpotOptions,
    ) -> Spot {
        options.port = dat.local_port();
        let sig_port = sig.local_port();
        Spot {
            inner: Arc::new(SpotInner {
                options,
                sig,
                dat,
                sig_port,
                emitter: Emitter::new(),
                ids: MessageIds::new(),
                hosts: RwLock::new(HashMap::new()),
                channels: RwLock::new(Vec::new()),
                started: RwLock::new(false),
                shutdown: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &SpotOptions {
        &self.inner.options
    }

    /// This point's identity as sent on the wire (empty host field; peers
    /// fill it in from the observed sender address).
    pub fn identity(&self) -> Identity {
        self.inner.self_identity()
    }

    /// Listener registry for `alive`, `bye`, `found` and `data` events.
    pub fn events(&self) -> &Emitter {
        &self.inner.emitter
    }

    /// Next id from this spot's message-id counter, for callers building
    /// their own envelopes.
    pub fn next_message_id(&self) -> u64 {
        self.inner.ids.next()
    }

    /// Snapshot of the live-host table.
    pub async fn hosts(&self) -> Vec<HostEntry> {
        self.inner.hosts.read().await.values().cloned().collect()
    }

    /// Look up a live host by uuid.
    pub async fn host(&self, uuid: &str) -> Option<HostEntry> {
        self.inner.hosts.read().await.get(uuid).cloned()
    }

    /// Snapshot of the registered channels.
    pub async fn channels(&self) -> Vec<Channel> {
        self.inner.channels.read().await.clone()
    }

    pub async fn is_started(&self) -> bool {
        *self.inner.started.read().await
    }

    /// Attach the inbound handlers on both sockets and begin the periodic
    /// advertisement. Fails with [`SpotError::AlreadyStarted`] on a second
    /// call.
    pub async fn start(&self) -> SpotResult<()> {
        {
            let mut started = self.inner.started.write().await;
            if *started {
                return Err(SpotError::AlreadyStarted);
            }
            *started = true;
        }

        self.inner.sig.set_broadcast(true)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.inner.shutdown.lock().await = Some(shutdown_tx);

        // Control socket: full command/response routing.
        let inner = self.inner.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = inner.sig.recv_from() => match result {
                        Ok((buf, src)) => {
                            if let Err(e) = inner.handle_signal(&buf, src).await {
                                tracing::warn!("dropping control datagram from {}: {}", src, e);
                            }
                        }
                        Err(e) => {
                            tracing::error!("control socket receive failed: {}", e);
                            break;
                        }
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });

        // Data socket: data messages and search responses only.
        let inner = self.inner.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = inner.dat.recv_from() => match result {
                        Ok((buf, src)) => {
                            if let Err(e) = inner.handle_data(&buf, src).await {
                                tracing::warn!("dropping data datagram from {}: {}", src, e);
                            }
                        }
                        Err(e) => {
                            tracing::error!("data socket receive failed: {}", e);
                            break;
                        }
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });

        // Recurring advertisement. The first tick fires a full interval
        // after start, not immediately.
        let inner = self.inner.clone();
        let mut shutdown = shutdown_rx;
        tokio::spawn(async move {
            let start_at = tokio::time::Instant::now() + ADVERTISE_INTERVAL;
            let mut ticker = tokio::time::interval_at(start_at, ADVERTISE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => inner.advertise(true).await,
                    _ = shutdown.changed() => break,
                }
            }
        });

        tracing::info!(
            "spot [{}] started with ports [{},{}]",
            self.inner.options.name,
            self.inner.options.port,
            self.inner.sig_port
        );
        Ok(())
    }

    /// Cancel the advertisement timer, broadcast a final `bye` and detach
    /// the inbound handlers. No-op if never started or already stopped; a
    /// stopped spot cannot be restarted.
    pub async fn stop(&self) {
        // Taking the shutdown sender makes further calls no-ops, so `bye`
        // goes out exactly once.
        let tx = match self.inner.shutdown.lock().await.take() {
            Some(tx) => tx,
            None => return,
        };
        let _ = tx.send(true);
        self.inner.advertise(false).await;
        tracing::info!("spot [{}] stopped", self.inner.options.name);
    }

    /// Register a channel and immediately re-advertise so peers learn it
    /// without waiting for the next tick. Rejects duplicate channel ids.
    pub async fn add_channel(&self, channel: Channel) -> SpotResult<()> {
        {
            let mut channels = self.inner.channels.write().await;
            if channels.iter().any(|c| c.id == channel.id) {
                tracing::warn!("channel [{}] exists", channel.id);
                return Err(SpotError::DuplicateChannel(channel.id));
            }
            channels.push(channel);
        }
        self.inner.advertise(true).await;
        Ok(())
    }

    /// Remove a channel and re-advertise. No-op if the id is unknown.
    pub async fn remove_channel(&self, id: u32) {
        let removed = {
            let mut channels = self.inner.channels.write().await;
            match channels.iter().position(|c| c.id == id) {
                Some(index) => {
                    channels.remove(index);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.inner.advertise(true).await;
        }
    }

    /// Broadcast a `search` request for points of the given kind.
    pub async fn search(&self, target: SearchTarget) {
        let req = SearchRequest { from: self.inner.self_identity(), target };
        let env = Envelope::request(MessageKind::Search, req.to_value(), self.inner.ids.next());
        self.inner.broadcast(&env).await;
    }

    /// Unicast a serialized envelope over the data socket. Fire-and-forget.
    pub async fn send(&self, message: &Envelope, target: SocketAddr) -> SpotResult<()> {
        self.inner.dat.send_to(&message.to_bytes(), target).await?;
        Ok(())
    }

    /// Build and send a `data` envelope addressed to `target`.
    pub async fn send_data(
        &self,
        body: impl Into<DataBody>,
        target: SocketAddr,
        channel: u32,
    ) -> SpotResult<()> {
        let payload = DataPayload {
            from: self.inner.self_identity(),
            channel,
            body: body.into(),
        };
        let env = Envelope::request(MessageKind::Data, payload.to_value(), self.inner.ids.next());
        self.send(&env, target).await
    }
}

impl SpotInner {
    fn self_identity(&self) -> Identity {
        Identity {
            uuid: self.options.uuid.clone(),
            kind: self.options.kind,
            host: String::new(),
            port: self.options.port,
            name: self.options.name.clone(),
        }
    }

    /// Broadcast on the control socket to the link-local broadcast address.
    async fn broadcast(&self, message: &Envelope) {
        let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.sig_port);
        if let Err(e) = self.sig.send_to(&message.to_bytes(), target).await {
            tracing::warn!("broadcast failed: {}", e);
        }
    }

    /// Broadcast either the current `alive` advertisement or, at shutdown,
    /// a `bye`.
    async fn advertise(&self, alive: bool) {
        let env = if alive {
            let payload = AlivePayload {
                from: self.self_identity(),
                channels: self.channels.read().await.clone(),
            };
            Envelope::request(MessageKind::Alive, payload.to_value(), self.ids.next())
        } else {
            let payload = ByePayload { from: self.self_identity() };
            Envelope::request(MessageKind::Bye, payload.to_value(), self.ids.next())
        };
        self.broadcast(&env).await;
    }

    /// Routing for the control socket. A decode failure is fatal for this
    /// datagram only.
    async fn handle_signal(&self, buf: &[u8], src: SocketAddr) -> crate::codec::DecodeResult<()> {
        let mut env = Envelope::from_bytes(buf)?;

        // Never react to our own broadcasts.
        let from_uuid = env
            .fields
            .get("from")
            .and_then(|from| from.get("uuid"))
            .and_then(Value::as_str);
        if from_uuid == Some(self.options.uuid.as_str()) {
            return Ok(());
        }

        overwrite_sender_host(&mut env.fields, src);

        if env.is_response {
            self.handle_response(&env);
        } else {
            self.handle_command(env, src).await;
        }
        Ok(())
    }

    /// Routing for the data socket: only `data` messages and responses
    /// ever arrive here.
    async fn handle_data(&self, buf: &[u8], src: SocketAddr) -> crate::codec::DecodeResult<()> {
        let mut env = Envelope::from_bytes(buf)?;
        overwrite_sender_host(&mut env.fields, src);

        if env.is_response {
            self.handle_response(&env);
        } else {
            self.emitter
                .emit(&SpotEvent::Data(DataPayload::from_value(&env.fields)));
        }
        Ok(())
    }

    async fn handle_command(&self, env: Envelope, src: SocketAddr) {
        match env.kind {
            Some(MessageKind::Alive) => {
                let payload = AlivePayload::from_value(&env.fields);
                if payload.from.kind != PointKind::Host {
                    return;
                }
                let entry = HostEntry {
                    identity: payload.from.clone(),
                    active: SystemTime::now(),
                };
                self.hosts.write().await.insert(payload.from.uuid.clone(), entry);
                tracing::info!(
                    "alive from {}:{} [{}]",
                    payload.from.host,
                    payload.from.port,
                    payload.from.name
                );
                self.emitter.emit(&SpotEvent::Alive(payload));
            }
            Some(MessageKind::Bye) => {
                let payload = ByePayload::from_value(&env.fields);
                if payload.from.kind != PointKind::Host {
                    return;
                }
                self.hosts.write().await.remove(&payload.from.uuid);
                tracing::info!(
                    "bye from {}:{} [{}]",
                    payload.from.host,
                    payload.from.port,
                    payload.from.name
                );
                self.emitter.emit(&SpotEvent::Bye(payload));
            }
            Some(MessageKind::Search) => {
                self.handle_search(SearchRequest::from_value(&env.fields)).await;
            }
            // Unknown commands carry no protocol effect.
            Some(MessageKind::Data) | None => {
                tracing::warn!("unhandled command from {}", src);
            }
        }
    }

    /// Answer a search if the kind filter covers us: unicast our identity
    /// back to the requester's claimed address.
    async fn handle_search(&self, req: SearchRequest) {
        if !req.target.matches(self.options.kind) {
            return;
        }
        tracing::info!(
            "search from {}:{} [{}]",
            req.from.host,
            req.from.port,
            req.from.name
        );
        let rsp = SearchResponse {
            from: self.self_identity(),
            code: 0,
            error: None,
        };
        let env = Envelope::response(MessageKind::Search, rsp.to_value(), self.ids.next());
        match req.from.address() {
            Some(addr) => {
                if let Err(e) = self.dat.send_to(&env.to_bytes(), addr).await {
                    tracing::warn!("search response to {} failed: {}", addr, e);
                }
            }
            None => tracing::warn!("search requester has no usable address"),
        }
    }

    /// Only `search` responses produce an effect today; responses to other
    /// commands are accepted and dropped.
    fn handle_response(&self, env: &Envelope) {
        let rsp = SearchResponse::from_value(&env.fields);
        tracing::info!(
            "response from {}:{} [{}]",
            rsp.from.host,
            rsp.from.port,
            rsp.from.name
        );
        if env.kind == Some(MessageKind::Search) {
            self.emitter.emit(&SpotEvent::Found(rsp.from));
        }
    }
}

/// The address a peer claims for itself is never trusted: replace
/// `from.host` with the observed sender address.
fn overwrite_sender_host(fields: &mut Value, src: SocketAddr) {
    let host = Value::Text(src.ip().to_string());
    if let Value::Map(entries) = fields {
        match entries.iter_mut().find(|(k, _)| k == "from") {
            Some((_, from)) => from.set("host", host),
            None => entries.push((
                "from".to_string(),
                Value::Map(vec![("host".to_string(), host)]),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::protocol::BROADCAST_PORT;
    use crate::socket::{MemoryHub, MemorySocket};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);
    const SETTLE: Duration = Duration::from_millis(200);

    struct TestPoint {
        spot: Spot,
        data_addr: SocketAddr,
    }

    fn point(hub: &Arc<MemoryHub>, kind: PointKind, name: &str) -> TestPoint {
        let host = hub.host();
        let sig = host.bind(BROADCAST_PORT);
        let dat = host.bind(DATA_PORT);
        let data_addr = dat.local_addr();
        let options = SpotOptions {
            kind,
            name: name.to_string(),
            ..SpotOptions::default()
        };
        TestPoint {
            spot: Spot::new(Arc::new(sig), Arc::new(dat), options),
            data_addr,
        }
    }

    fn capture(spot: &Spot, kind: EventKind) -> mpsc::UnboundedReceiver<SpotEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        spot.events().on(kind, move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    async fn expect_event(rx: &mut mpsc::UnboundedReceiver<SpotEvent>) -> SpotEvent {
        timeout(WAIT, rx.recv()).await.expect("event timed out").unwrap()
    }

    /// A raw control-port endpoint for injecting hand-built datagrams.
    fn raw_endpoint(hub: &Arc<MemoryHub>) -> MemorySocket {
        let socket = hub.host().bind(BROADCAST_PORT);
        socket.set_broadcast(true).unwrap();
        socket
    }

    fn broadcast_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), BROADCAST_PORT)
    }

    fn alive_from(uuid: &str, kind: PointKind, channels: Vec<Channel>) -> Vec<u8> {
        let payload = AlivePayload {
            from: Identity {
                uuid: uuid.to_string(),
                kind,
                host: String::new(),
                port: DATA_PORT,
                name: "peer".to_string(),
            },
            channels,
        };
        Envelope::request(MessageKind::Alive, payload.to_value(), 1).to_bytes()
    }

    fn bye_from(uuid: &str) -> Vec<u8> {
        let payload = ByePayload {
            from: Identity {
                uuid: uuid.to_string(),
                kind: PointKind::Host,
                host: String::new(),
                port: DATA_PORT,
                name: "peer".to_string(),
            },
        };
        Envelope::request(MessageKind::Bye, payload.to_value(), 2).to_bytes()
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let hub = MemoryHub::new();
        let p = point(&hub, PointKind::Host, "a");
        p.spot.start().await.unwrap();
        assert!(matches!(p.spot.start().await, Err(SpotError::AlreadyStarted)));
        p.spot.stop().await;
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let hub = MemoryHub::new();
        let p = point(&hub, PointKind::Host, "a");
        p.spot.stop().await;
        assert!(!p.spot.is_started().await);
    }

    #[tokio::test]
    async fn test_loopback_filter() {
        let hub = MemoryHub::new();
        let p = point(&hub, PointKind::Host, "a");
        let mut alive = capture(&p.spot, EventKind::Alive);
        p.spot.start().await.unwrap();

        let raw = raw_endpoint(&hub);
        let own_uuid = p.spot.options().uuid.clone();
        raw.send_to(&alive_from(&own_uuid, PointKind::Host, vec![]), broadcast_addr())
            .await
            .unwrap();

        tokio::time::sleep(SETTLE).await;
        assert!(p.spot.hosts().await.is_empty());
        assert!(alive.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_host_table_lifecycle() {
        let hub = MemoryHub::new();
        let p = point(&hub, PointKind::Controller, "watcher");
        let mut alive = capture(&p.spot, EventKind::Alive);
        let mut bye = capture(&p.spot, EventKind::Bye);
        p.spot.start().await.unwrap();

        let raw = raw_endpoint(&hub);
        raw.send_to(
            &alive_from("ua", PointKind::Host, vec![Channel::new(7, "x")]),
            broadcast_addr(),
        )
        .await
        .unwrap();

        let event = expect_event(&mut alive).await;
        match event {
            SpotEvent::Alive(payload) => {
                assert_eq!(payload.from.uuid, "ua");
                assert_eq!(payload.channels, vec![Channel::new(7, "x")]);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let entry = p.spot.host("ua").await.expect("host admitted");
        // From the observed sender address, not the (empty) claimed one.
        assert_eq!(entry.identity.host, raw.local_addr().ip().to_string());
        let age = SystemTime::now().duration_since(entry.active).unwrap();
        assert!(age < Duration::from_secs(5));

        // A second alive refreshes, it does not duplicate.
        raw.send_to(&alive_from("ua", PointKind::Host, vec![]), broadcast_addr())
            .await
            .unwrap();
        expect_event(&mut alive).await;
        assert_eq!(p.spot.hosts().await.len(), 1);

        raw.send_to(&bye_from("ua"), broadcast_addr()).await.unwrap();
        expect_event(&mut bye).await;
        assert!(p.spot.host("ua").await.is_none());

        p.spot.stop().await;
    }

    #[tokio::test]
    async fn test_non_host_alive_is_ignored() {
        let hub = MemoryHub::new();
        let p = point(&hub, PointKind::Host, "a");
        let mut alive = capture(&p.spot, EventKind::Alive);
        p.spot.start().await.unwrap();

        let raw = raw_endpoint(&hub);
        raw.send_to(&alive_from("uc", PointKind::Controller, vec![]), broadcast_addr())
            .await
            .unwrap();

        tokio::time::sleep(SETTLE).await;
        assert!(p.spot.hosts().await.is_empty());
        assert!(alive.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_search_round_trip() {
        let hub = MemoryHub::new();
        let a = point(&hub, PointKind::Host, "a");
        let b = point(&hub, PointKind::Controller, "b");

        let mut a_alive = capture(&a.spot, EventKind::Alive);
        let mut a_found = capture(&a.spot, EventKind::Found);
        let mut a_data = capture(&a.spot, EventKind::Data);
        let mut b_found = capture(&b.spot, EventKind::Found);

        a.spot.start().await.unwrap();
        b.spot.start().await.unwrap();

        b.spot.search(SearchTarget::Any).await;

        let event = expect_event(&mut b_found).await;
        match event {
            SpotEvent::Found(identity) => {
                assert_eq!(identity.uuid, a.spot.options().uuid);
                assert_eq!(identity.name, "a");
                assert_eq!(identity.kind, PointKind::Host);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // The responder emits nothing publicly.
        assert!(a_alive.try_recv().is_err());
        assert!(a_found.try_recv().is_err());
        assert!(a_data.try_recv().is_err());

        a.spot.stop().await;
        b.spot.stop().await;
    }

    #[tokio::test]
    async fn test_search_kind_filtering() {
        let hub = MemoryHub::new();
        let a = point(&hub, PointKind::Host, "a");
        let b = point(&hub, PointKind::Controller, "b");
        let mut b_found = capture(&b.spot, EventKind::Found);

        a.spot.start().await.unwrap();
        b.spot.start().await.unwrap();

        // Wrong kind: no response.
        b.spot.search(SearchTarget::Kind(PointKind::Controller)).await;
        tokio::time::sleep(SETTLE).await;
        assert!(b_found.try_recv().is_err());

        // Matching kind: exactly one response.
        b.spot.search(SearchTarget::Kind(PointKind::Host)).await;
        expect_event(&mut b_found).await;
        tokio::time::sleep(SETTLE).await;
        assert!(b_found.try_recv().is_err());

        a.spot.stop().await;
        b.spot.stop().await;
    }

    #[tokio::test]
    async fn test_channel_registration() {
        let hub = MemoryHub::new();
        let a = point(&hub, PointKind::Host, "a");
        let b = point(&hub, PointKind::Controller, "b");
        let mut b_alive = capture(&b.spot, EventKind::Alive);

        a.spot.start().await.unwrap();
        b.spot.start().await.unwrap();

        // add_channel advertises immediately, no timer wait.
        a.spot.add_channel(Channel::new(1, "control")).await.unwrap();
        let event = expect_event(&mut b_alive).await;
        match event {
            SpotEvent::Alive(payload) => {
                assert_eq!(payload.channels, vec![Channel::new(1, "control")]);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // A colliding id is rejected without mutation.
        assert!(matches!(
            a.spot.add_channel(Channel::new(1, "duplicate")).await,
            Err(SpotError::DuplicateChannel(1))
        ));
        assert_eq!(a.spot.channels().await.len(), 1);
        assert_eq!(a.spot.channels().await[0].name, "control");

        // Removal re-advertises with the channel gone.
        a.spot.remove_channel(1).await;
        let event = expect_event(&mut b_alive).await;
        match event {
            SpotEvent::Alive(payload) => assert!(payload.channels.is_empty()),
            other => panic!("unexpected event {:?}", other),
        }
        a.spot.remove_channel(99).await; // unknown id: no-op

        a.spot.stop().await;
        b.spot.stop().await;
    }

    #[tokio::test]
    async fn test_stop_broadcasts_bye() {
        let hub = MemoryHub::new();
        let a = point(&hub, PointKind::Host, "a");
        let b = point(&hub, PointKind::Controller, "b");
        let mut b_alive = capture(&b.spot, EventKind::Alive);
        let mut b_bye = capture(&b.spot, EventKind::Bye);

        a.spot.start().await.unwrap();
        b.spot.start().await.unwrap();

        a.spot.add_channel(Channel::new(1, "c")).await.unwrap();
        expect_event(&mut b_alive).await;
        assert_eq!(b.spot.hosts().await.len(), 1);

        a.spot.stop().await;
        let event = expect_event(&mut b_bye).await;
        match event {
            SpotEvent::Bye(payload) => assert_eq!(payload.from.uuid, a.spot.options().uuid),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(b.spot.hosts().await.is_empty());

        b.spot.stop().await;
    }

    #[tokio::test]
    async fn test_stop_twice_sends_single_bye() {
        let hub = MemoryHub::new();
        let a = point(&hub, PointKind::Host, "a");
        let b = point(&hub, PointKind::Controller, "b");
        let mut b_bye = capture(&b.spot, EventKind::Bye);

        a.spot.start().await.unwrap();
        b.spot.start().await.unwrap();

        a.spot.stop().await;
        a.spot.stop().await;

        expect_event(&mut b_bye).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(b_bye.try_recv().is_err());

        b.spot.stop().await;
    }

    #[tokio::test]
    async fn test_send_data() {
        let hub = MemoryHub::new();
        let a = point(&hub, PointKind::Host, "a");
        let b = point(&hub, PointKind::Controller, "b");
        let mut a_data = capture(&a.spot, EventKind::Data);

        a.spot.start().await.unwrap();
        b.spot.start().await.unwrap();

        b.spot.send_data("ping", a.data_addr, 7).await.unwrap();

        let event = expect_event(&mut a_data).await;
        match event {
            SpotEvent::Data(payload) => {
                assert_eq!(payload.channel, 7);
                assert_eq!(payload.body, DataBody::Text("ping".to_string()));
                assert_eq!(payload.from.uuid, b.spot.options().uuid);
            }
            other => panic!("unexpected event {:?}", other),
        }

        a.spot.stop().await;
        b.spot.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_isolated() {
        let hub = MemoryHub::new();
        let p = point(&hub, PointKind::Controller, "watcher");
        let mut alive = capture(&p.spot, EventKind::Alive);
        p.spot.start().await.unwrap();

        let raw = raw_endpoint(&hub);
        raw.send_to(b"Zgarbage", broadcast_addr()).await.unwrap();
        raw.send_to(&alive_from("ua", PointKind::Host, vec![]), broadcast_addr())
            .await
            .unwrap();

        // The bad packet is dropped; the next one still lands.
        expect_event(&mut alive).await;
        assert!(p.spot.host("ua").await.is_some());

        p.spot.stop().await;
    }
}
