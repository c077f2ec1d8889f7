//! Scripted fakes shared by the engine's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use framewalk_core::error::{FramewalkError, Result};
use framewalk_core::traits::{DecisionPort, DepCallable, ExecHost, InputPort};
use framewalk_core::types::{DepInputs, FieldMap, FillRequest, ResolvePorts};

struct FnCallable<F> {
    name: String,
    deps: Vec<String>,
    f: F,
}

impl<F> DepCallable for FnCallable<F>
where
    F: Fn(DepInputs) -> Result<serde_json::Value> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn depends_on(&self) -> Vec<String> {
        self.deps.clone()
    }

    fn resolve(&self, inputs: DepInputs) -> BoxFuture<'_, Result<serde_json::Value>> {
        let result = (self.f)(inputs);
        Box::pin(async move { result })
    }
}

pub fn static_callable(name: &str, value: serde_json::Value) -> Arc<dyn DepCallable> {
    Arc::new(FnCallable {
        name: name.to_string(),
        deps: vec![],
        f: move |_| Ok(value.clone()),
    })
}

pub fn chained_callable(name: &str, deps: Vec<String>) -> Arc<dyn DepCallable> {
    Arc::new(FnCallable {
        name: name.to_string(),
        deps,
        f: |_| Ok(serde_json::Value::Null),
    })
}

/// Callable that counts its invocations, for cache-idempotence tests.
pub fn counting_callable(name: &str) -> (Arc<AtomicUsize>, Arc<dyn DepCallable>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let inner = counter.clone();
    let callable = Arc::new(FnCallable {
        name: name.to_string(),
        deps: vec![],
        f: move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!(1))
        },
    });
    (counter, callable)
}

/// Sums the numeric values of its upstream callables plus a constant.
pub fn summing_callable(name: &str, deps: Vec<String>, add: i64) -> Arc<dyn DepCallable> {
    Arc::new(FnCallable {
        name: name.to_string(),
        deps,
        f: move |inputs: DepInputs| {
            let sum: i64 = inputs
                .values
                .values()
                .filter_map(serde_json::Value::as_i64)
                .sum();
            Ok(serde_json::json!(sum + add))
        },
    })
}

pub fn failing_callable(name: &str, message: &str) -> Arc<dyn DepCallable> {
    let message = message.to_string();
    Arc::new(FnCallable {
        name: name.to_string(),
        deps: vec![],
        f: move |_| Err(FramewalkError::Exec(message.clone())),
    })
}

pub fn cancelled_callable(name: &str) -> Arc<dyn DepCallable> {
    Arc::new(FnCallable {
        name: name.to_string(),
        deps: vec![],
        f: |_| Err(FramewalkError::Cancelled),
    })
}

/// Callable that asks the input port and returns the answer as text.
pub fn asking_callable(name: &str, question: &str) -> Arc<dyn DepCallable> {
    struct Asking {
        name: String,
        question: String,
    }
    impl DepCallable for Asking {
        fn name(&self) -> &str {
            &self.name
        }
        fn resolve(&self, inputs: DepInputs) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move {
                let answer = inputs.ports.input.ask(self.question.clone()).await?;
                Ok(serde_json::json!(answer))
            })
        }
    }
    Arc::new(Asking {
        name: name.to_string(),
        question: question.to_string(),
    })
}

struct NullInput;

impl InputPort for NullInput {
    fn ask(&self, _question: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async { Err(FramewalkError::InputClosed) })
    }
}

struct CannedInput(String);

impl InputPort for CannedInput {
    fn ask(&self, _question: String) -> BoxFuture<'_, Result<String>> {
        let answer = self.0.clone();
        Box::pin(async move { Ok(answer) })
    }
}

struct NullExec;

impl ExecHost for NullExec {
    fn run_command(&self, program: String, _args: Vec<String>) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { Err(FramewalkError::Exec(format!("no exec host for {}", program))) })
    }
}

/// Ports whose input side always fails — for tests that never suspend.
pub fn test_ports() -> ResolvePorts {
    ResolvePorts {
        input: Arc::new(NullInput),
        exec: Arc::new(NullExec),
    }
}

/// Ports whose input side answers every question with a canned response.
pub fn canned_ports(answer: &str) -> ResolvePorts {
    ResolvePorts {
        input: Arc::new(CannedInput(answer.to_string())),
        exec: Arc::new(NullExec),
    }
}

/// Decision port replaying scripted choices and fills in order.
/// An unscripted call is a `Decision` error, which doubles as an
/// assertion that the executor never called it.
#[derive(Default)]
pub struct ScriptedPort {
    choices: Mutex<VecDeque<String>>,
    fills: Mutex<VecDeque<FieldMap>>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn choice(self, chosen: &str) -> Self {
        self.choices.lock().unwrap().push_back(chosen.to_string());
        self
    }

    pub fn fill_with(self, values: FieldMap) -> Self {
        self.fills.lock().unwrap().push_back(values);
        self
    }
}

impl DecisionPort for ScriptedPort {
    fn choose(&self, _candidates: Vec<String>, _context: FieldMap) -> BoxFuture<'_, Result<String>> {
        let next = self.choices.lock().unwrap().pop_front();
        Box::pin(async move {
            next.ok_or_else(|| FramewalkError::Decision("unscripted choose call".into()))
        })
    }

    fn fill(&self, _request: FillRequest) -> BoxFuture<'_, Result<FieldMap>> {
        let next = self.fills.lock().unwrap().pop_front();
        Box::pin(async move {
            next.ok_or_else(|| FramewalkError::Decision("unscripted fill call".into()))
        })
    }
}

/// Build a `FieldMap` from (name, value) pairs.
pub fn fields(pairs: &[(&str, serde_json::Value)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
