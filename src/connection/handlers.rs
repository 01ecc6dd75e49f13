//! Handler table for server-to-client invocations.
//!
//! Handlers are registered per method name with their parameter types
//! declared as a tuple; dispatch checks the argument count against the
//! declared arity, deserializes each raw JSON argument into the declared
//! type and invokes the callback. At most one handler per method name: a
//! duplicate registration is logged and dropped, the first wins.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Argument tuple of a registered handler.
///
/// Implemented for tuples of up to eight [`DeserializeOwned`] types, plus
/// `()` for parameterless methods.
pub trait InvocationArguments: Sized {
    /// Number of arguments the handler expects.
    const ARITY: usize;

    /// Deserializes the raw argument values, one per tuple element.
    fn from_values(values: Vec<Value>) -> Result<Self, serde_json::Error>;
}

impl InvocationArguments for () {
    const ARITY: usize = 0;

    fn from_values(_values: Vec<Value>) -> Result<Self, serde_json::Error> {
        Ok(())
    }
}

macro_rules! tuple_arguments {
    ($count:expr => $($name:ident),+) => {
        impl<$($name: DeserializeOwned),+> InvocationArguments for ($($name,)+) {
            const ARITY: usize = $count;

            fn from_values(values: Vec<Value>) -> Result<Self, serde_json::Error> {
                let mut values = values.into_iter();
                Ok(($(serde_json::from_value::<$name>(
                    values.next().unwrap_or(Value::Null),
                )?,)+))
            }
        }
    };
}

tuple_arguments!(1 => A);
tuple_arguments!(2 => A, B);
tuple_arguments!(3 => A, B, C);
tuple_arguments!(4 => A, B, C, D);
tuple_arguments!(5 => A, B, C, D, E);
tuple_arguments!(6 => A, B, C, D, E, F);
tuple_arguments!(7 => A, B, C, D, E, F, G);
tuple_arguments!(8 => A, B, C, D, E, F, G, H);

type HandlerFn = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

struct HandlerEntry {
    arity: usize,
    callback: HandlerFn,
}

/// Registered server-invocation handlers, keyed by method name.
#[derive(Clone)]
pub(crate) struct HandlerTable {
    entries: Arc<RwLock<HashMap<String, HandlerEntry>>>,
}

impl HandlerTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a handler for a method name. The first registration wins;
    /// duplicates are logged and dropped.
    pub(crate) async fn register<A, F>(&self, target: &str, handler: F)
    where
        A: InvocationArguments + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        let method = target.to_string();
        let wrapped: HandlerFn = Arc::new(move |values| match A::from_values(values) {
            Ok(arguments) => handler(arguments),
            Err(e) => error!(method = %method, error = %e, "failed to deserialize invocation arguments"),
        });

        let mut entries = self.entries.write().await;
        if entries.contains_key(target) {
            error!(method = %target, "handler already registered for this method; keeping the first");
            return;
        }
        entries.insert(
            target.to_string(),
            HandlerEntry {
                arity: A::ARITY,
                callback: wrapped,
            },
        );
    }

    /// Dispatches an incoming invocation to the registered handler.
    ///
    /// The table lock is released before the callback runs.
    pub(crate) async fn dispatch(&self, target: &str, arguments: Vec<Value>) {
        let callback = {
            let entries = self.entries.read().await;
            match entries.get(target) {
                None => {
                    info!(method = %target, "no handler registered for server invocation");
                    return;
                }
                Some(entry) if entry.arity != arguments.len() => {
                    warn!(
                        method = %target,
                        expected = entry.arity,
                        received = arguments.len(),
                        "argument count mismatch; dropping invocation"
                    );
                    return;
                }
                Some(entry) => Arc::clone(&entry.callback),
            }
        };
        callback(arguments);
    }
}
