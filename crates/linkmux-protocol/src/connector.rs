use std::sync::Arc;

use linkmux_transport::{LinkAddr, Listener};
use tracing::info;

use crate::application::Application;
use crate::binding::StreamBinding;
use crate::config::ConnectionConfig;
use crate::connection::{Connection, Scheduler};
use crate::error::Result;

/// Connect to a listening peer and open a connection over the link.
pub fn connect(
    addr: &LinkAddr,
    scheduler: Arc<Scheduler>,
    application: Arc<dyn Application>,
) -> Result<Connection> {
    connect_with_config(addr, scheduler, application, &ConnectionConfig::default())
}

/// Connect with explicit configuration.
pub fn connect_with_config(
    addr: &LinkAddr,
    scheduler: Arc<Scheduler>,
    application: Arc<dyn Application>,
    config: &ConnectionConfig,
) -> Result<Connection> {
    let stream = linkmux_transport::connect(addr)?;
    let binding = StreamBinding::new(stream, config)?;
    info!(addr = %addr, "connected");
    Connection::open(scheduler, Arc::new(binding), Some(application))
}

/// Accepts links and turns each into a [`Connection`].
pub struct LinkListener {
    listener: Listener,
    scheduler: Arc<Scheduler>,
    application: Arc<dyn Application>,
    config: ConnectionConfig,
}

impl LinkListener {
    /// Bind to `addr`. Every accepted connection shares the scheduler and
    /// the application.
    pub fn bind(
        addr: &LinkAddr,
        scheduler: Arc<Scheduler>,
        application: Arc<dyn Application>,
    ) -> Result<Self> {
        let listener = Listener::bind(addr)?;
        info!(addr = %listener.local_addr(), "listening");
        Ok(Self {
            listener,
            scheduler,
            application,
            config: ConnectionConfig::default(),
        })
    }

    /// Override connection config for accepted links.
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept the next link (blocking).
    pub fn accept(&self) -> Result<Connection> {
        let stream = self.listener.accept()?;
        let binding = StreamBinding::new(stream, &self.config)?;
        info!(peer = binding.peer(), "link accepted");
        Connection::open(
            Arc::clone(&self.scheduler),
            Arc::new(binding),
            Some(Arc::clone(&self.application)),
        )
    }

    /// The address peers should connect to.
    pub fn local_addr(&self) -> LinkAddr {
        self.listener.local_addr()
    }
}

impl std::fmt::Debug for LinkListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkListener")
            .field("addr", &self.listener.local_addr())
            .field("config", &self.config)
            .finish()
    }
}
