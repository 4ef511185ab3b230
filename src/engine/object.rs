//! Bus-facing method surface of an engine.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Weak;

use super::{Engine, ENGINE_INTERFACE};
use crate::bus::{BusObject, Invocation};
use crate::types::{Error, Result};

#[derive(Debug, Deserialize)]
struct KeyEventArgs {
    keycode: u32,
    pressed: bool,
}

#[derive(Debug, Deserialize)]
struct FocusArgs {
    focused: bool,
}

#[derive(Debug, Deserialize)]
struct SurroundingTextArgs {
    text: String,
    cursor_pos: u32,
    anchor_pos: u32,
}

#[derive(Debug, Deserialize)]
struct ContentTypeArgs {
    purpose: u32,
    hints: u32,
}

fn args<T: DeserializeOwned>(method: &str, body: Value) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|e| Error::validation(format!("Invalid {} arguments: {}", method, e)))
}

/// Exported object; holds the engine weakly so the registry decides its lifetime.
pub(crate) struct EngineObject {
    engine: Weak<Engine>,
}

impl EngineObject {
    pub(crate) fn new(engine: Weak<Engine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl BusObject for EngineObject {
    fn interface(&self) -> &'static str {
        ENGINE_INTERFACE
    }

    async fn handle_call(&self, invocation: Invocation, method: &str, body: Value) -> Result<Value> {
        let engine = self
            .engine
            .upgrade()
            .filter(|engine| !engine.is_destroyed())
            .ok_or_else(|| Error::not_found(format!("engine at {} is gone", invocation.path)))?;
        engine.note_caller(&invocation.sender);

        match method {
            "KeyEvent" => {
                let KeyEventArgs { keycode, pressed } = args(method, body)?;
                let handled = engine.key_event(keycode, pressed);
                Ok(json!({ "handled": handled }))
            }
            "Focus" => {
                let FocusArgs { focused } = args(method, body)?;
                engine.focus(focused);
                Ok(json!({}))
            }
            "Reset" => {
                engine.reset();
                Ok(json!({}))
            }
            "Destroy" => {
                tracing::debug!(
                    "engine_destroy_requested: path={} sender={}",
                    invocation.path,
                    invocation.sender
                );
                engine.destroy();
                Ok(json!({}))
            }
            "SetSurroundingText" => {
                let SurroundingTextArgs {
                    text,
                    cursor_pos,
                    anchor_pos,
                } = args(method, body)?;
                engine.set_surrounding_text(&text, cursor_pos, anchor_pos);
                Ok(json!({}))
            }
            "SetContentType" => {
                let ContentTypeArgs { purpose, hints } = args(method, body)?;
                engine.set_content_type(purpose, hints);
                Ok(json!({}))
            }
            _ => Err(Error::not_found(format!("Unknown engine method: {}", method))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusConnection, LocalBus};
    use crate::engine::EngineHandler;
    use crate::types::{ClientId, ObjectPath};
    use std::sync::Arc;

    struct HelloOnA;

    impl EngineHandler for HelloOnA {
        fn key_event(&self, engine: &Engine, keycode: u32, pressed: bool) -> bool {
            if keycode == 38 && pressed {
                let _ = engine.commit("Hello!");
                return true;
            }
            false
        }
    }

    #[tokio::test]
    async fn test_dispatch_over_bus() {
        let bus = LocalBus::new();
        let (service, _) = bus.connect();
        let (client, mut signals) = bus.connect();
        let client_id = ClientId::from_string(client.unique_name().unwrap()).unwrap();

        let engine = Arc::new(Engine::new(client_id).with_handler(HelloOnA));
        let path = ObjectPath::from_string("/im/Engine_0".to_string()).unwrap();
        engine.export(Arc::new(service), path.clone(), true).unwrap();

        let reply = client
            .call(None, &path, "KeyEvent", json!({"keycode": 38, "pressed": true}))
            .await
            .unwrap();
        assert_eq!(reply, json!({"handled": true}));
        assert_eq!(signals.try_recv().unwrap().member, "Commit");

        let reply = client
            .call(None, &path, "KeyEvent", json!({"keycode": 24, "pressed": true}))
            .await
            .unwrap();
        assert_eq!(reply, json!({"handled": false}));

        let bad = client.call(None, &path, "KeyEvent", json!({"keycode": "x"})).await;
        assert!(matches!(bad, Err(Error::Validation(_))));

        let unknown = client.call(None, &path, "Explode", json!({})).await;
        assert!(matches!(unknown, Err(Error::NotFound(_))));

        client.call(None, &path, "Destroy", Value::Null).await.unwrap();
        assert!(engine.is_destroyed());
        let gone = client.call(None, &path, "Reset", Value::Null).await;
        assert!(matches!(gone, Err(Error::NotFound(_))));
    }
}
