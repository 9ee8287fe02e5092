//! Chat pipeline objects owned by the orchestrator

use crate::error::{Result, StartupError};
use crate::services::WebSocketManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Dispatches agent tool calls
#[derive(Debug, Default)]
pub struct ToolDispatcher {
    tools: Vec<String>,
    websocket_enhanced: AtomicBool,
}

impl ToolDispatcher {
    pub fn new(tools: Vec<String>) -> Self {
        Self {
            tools,
            websocket_enhanced: AtomicBool::new(false),
        }
    }

    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    /// Whether tool progress is streamed to live sockets
    pub fn websocket_enhanced(&self) -> bool {
        self.websocket_enhanced.load(Ordering::SeqCst)
    }

    fn enable_websocket_events(&self) {
        self.websocket_enhanced.store(true, Ordering::SeqCst);
    }
}

/// Couples agent execution to live socket delivery
///
/// This is the one place that wires the tool dispatcher to the WebSocket manager.
pub struct AgentWebSocketBridge {
    websocket: Arc<dyn WebSocketManager>,
    dispatcher: Arc<ToolDispatcher>,
    integrated: AtomicBool,
}

impl AgentWebSocketBridge {
    pub fn new(websocket: Arc<dyn WebSocketManager>, dispatcher: Arc<ToolDispatcher>) -> Self {
        Self {
            websocket,
            dispatcher,
            integrated: AtomicBool::new(false),
        }
    }

    pub fn integrate(&self) -> Result<()> {
        if self.dispatcher.tools().is_empty() {
            return Err(StartupError::postcondition(
                "websocket_bridge",
                "tool dispatcher has no tools to bridge",
            ));
        }
        self.dispatcher.enable_websocket_events();
        self.integrated.store(true, Ordering::SeqCst);
        info!(
            "Agent WebSocket bridge integrated for {} tools",
            self.dispatcher.tools().len()
        );
        Ok(())
    }

    pub fn is_integrated(&self) -> bool {
        self.integrated.load(Ordering::SeqCst) && self.dispatcher.websocket_enhanced()
    }

    pub fn websocket(&self) -> &Arc<dyn WebSocketManager> {
        &self.websocket
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }
}

/// Message types registered with the WebSocket manager
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageRouter {
    pub handlers: Vec<String>,
}

impl MessageRouter {
    pub async fn register(
        websocket: &Arc<dyn WebSocketManager>,
        handlers: &[String],
    ) -> Result<Self> {
        if handlers.is_empty() {
            return Err(StartupError::postcondition(
                "message_handlers",
                "no message handlers configured",
            ));
        }
        websocket.register_handlers(handlers).await?;
        debug!("Registered message handlers: {:?}", handlers);
        Ok(Self {
            handlers: handlers.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::local::LocalWebSocketManager;

    #[test]
    fn test_bridge_enables_dispatcher_events() {
        let websocket: Arc<dyn WebSocketManager> = Arc::new(LocalWebSocketManager::new());
        let dispatcher = Arc::new(ToolDispatcher::new(vec!["web_search".to_string()]));
        let bridge = AgentWebSocketBridge::new(websocket, Arc::clone(&dispatcher));

        assert!(!bridge.is_integrated());
        bridge.integrate().unwrap();
        assert!(bridge.is_integrated());
        assert!(dispatcher.websocket_enhanced());
    }

    #[test]
    fn test_bridge_rejects_empty_dispatcher() {
        let websocket: Arc<dyn WebSocketManager> = Arc::new(LocalWebSocketManager::new());
        let bridge = AgentWebSocketBridge::new(websocket, Arc::new(ToolDispatcher::default()));
        assert!(matches!(
            bridge.integrate(),
            Err(StartupError::Postcondition { .. })
        ));
    }

    #[tokio::test]
    async fn test_message_router_registration() {
        let local = Arc::new(LocalWebSocketManager::new());
        let websocket: Arc<dyn WebSocketManager> = local.clone();
        let router = MessageRouter::register(&websocket, &["user_message".to_string()])
            .await
            .unwrap();
        assert_eq!(router.handlers, vec!["user_message"]);
        assert_eq!(local.handlers(), vec!["user_message"]);
    }
}
