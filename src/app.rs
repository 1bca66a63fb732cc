//! Application container for lspwire

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};

use crate::config::WireConfig;
use crate::dispatch::{HandlerMode, Router};
use crate::error::{FrameError, LspwireResult, RouterError};
use crate::infra::protocol::{ResponseError, error_codes};
use crate::server::{ExitReason, Server};

pub struct App {
    server: Server,
    lifecycle: Arc<Lifecycle>,
}

/// Shutdown bookkeeping shared by the lifecycle handlers.
#[derive(Debug, Default)]
pub struct Lifecycle {
    initialized: AtomicBool,
    shutdown_requested: AtomicBool,
}

impl Lifecycle {
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }
}

impl App {
    pub async fn new(config_path: Option<&Path>, log_wire: bool) -> LspwireResult<Self> {
        let mut config = WireConfig::load(config_path).await?;
        config.log_wire_traffic |= log_wire;
        Self::with_config(config)
    }

    pub fn with_config(config: WireConfig) -> LspwireResult<Self> {
        let lifecycle = Arc::new(Lifecycle::default());
        let router = lifecycle_router(Arc::clone(&lifecycle))?;

        tracing::debug!("Initializing lspwire with {:?}", config);

        Ok(Self {
            server: Server::new(router, config),
            lifecycle,
        })
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub async fn run_stdio(&self) -> Result<ExitReason, FrameError> {
        self.server.stdio().await
    }
}

/// Routes for the LSP lifecycle methods.
pub fn lifecycle_router(lifecycle: Arc<Lifecycle>) -> Result<Router, RouterError> {
    let mut router = Router::new();

    let state = Arc::clone(&lifecycle);
    router.register("initialize", HandlerMode::Sequential, move |params, _| {
        let state = Arc::clone(&state);
        async move {
            match &params {
                Some(raw) => tracing::info!("initialize params: {}", raw.get()),
                None => tracing::info!("initialize without params"),
            }
            if state.initialized.swap(true, Ordering::AcqRel) {
                return Err(ResponseError::new(
                    error_codes::INVALID_REQUEST,
                    "Server already initialized",
                ));
            }
            Ok(json!({
                "capabilities": {},
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }))
        }
    })?;

    router.raw_notification("initialized", |_, _| async {
        tracing::info!("Client initialized");
    })?;

    let state = Arc::clone(&lifecycle);
    router.register("shutdown", HandlerMode::Sequential, move |_, _| {
        let state = Arc::clone(&state);
        async move {
            state.shutdown_requested.store(true, Ordering::Release);
            tracing::info!("Shutdown requested");
            Ok::<_, ResponseError>(Value::Null)
        }
    })?;

    let state = lifecycle;
    router.raw_notification("exit", move |_, ctx| {
        let state = Arc::clone(&state);
        async move {
            if !state.is_shutdown_requested() {
                tracing::warn!("Exit received before shutdown");
            }
            ctx.request_exit();
        }
    })?;

    Ok(router)
}
