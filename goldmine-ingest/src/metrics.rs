use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Prometheus counters for the ingestion path.
#[derive(Clone)]
pub struct IngestMetrics {
    registry: Registry,
    messages_received: IntCounter,
    decode_errors: IntCounter,
    fills_enqueued: IntCounter,
    fills_persisted: IntCounter,
    store_errors: IntCounter,
    active_connections: IntGauge,
}

impl IngestMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let messages_received = IntCounter::new(
            "goldmine_messages_received_total",
            "Frames read from connected peers",
        )?;
        let decode_errors = IntCounter::new(
            "goldmine_decode_errors_total",
            "Frames dropped because they did not decode into a fill",
        )?;
        let fills_enqueued = IntCounter::new(
            "goldmine_fills_enqueued_total",
            "Decoded fills handed to the ingestion queue",
        )?;
        let fills_persisted = IntCounter::new(
            "goldmine_fills_persisted_total",
            "Fills appended to the fill store",
        )?;
        let store_errors = IntCounter::new(
            "goldmine_store_errors_total",
            "Fills dropped because the store rejected them",
        )?;
        let active_connections =
            IntGauge::new("goldmine_active_connections", "Currently connected peers")?;

        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(fills_enqueued.clone()))?;
        registry.register(Box::new(fills_persisted.clone()))?;
        registry.register(Box::new(store_errors.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;

        Ok(Self {
            registry,
            messages_received,
            decode_errors,
            fills_enqueued,
            fills_persisted,
            store_errors,
            active_connections,
        })
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Text exposition of every registered metric.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn inc_received(&self) {
        self.messages_received.inc();
    }

    pub fn inc_decode_error(&self) {
        self.decode_errors.inc();
    }

    pub fn inc_enqueued(&self) {
        self.fills_enqueued.inc();
    }

    pub fn inc_persisted(&self) {
        self.fills_persisted.inc();
    }

    pub fn inc_store_error(&self) {
        self.store_errors.inc();
    }

    pub fn connection_opened(&self) {
        self.active_connections.inc();
    }

    pub fn connection_closed(&self) {
        self.active_connections.dec();
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.get()
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.get()
    }

    pub fn fills_enqueued(&self) -> u64 {
        self.fills_enqueued.get()
    }

    pub fn fills_persisted(&self) -> u64 {
        self.fills_persisted.get()
    }

    pub fn store_errors(&self) -> u64 {
        self.store_errors.get()
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.get()
    }
}
