//! Mock GATT transport for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use super::{GattTransport, LinkLost, Notifications, TransportError};
use crate::protocol::commands::{NOTIFY_UUID, SERVICE_UUID, WRITE_UUID};

/// Failure switches for each transport step.
#[derive(Debug, Default, Clone, Copy)]
pub struct Failures {
    pub connect: bool,
    pub service: bool,
    pub write: bool,
    pub subscribe: bool,
    pub unsubscribe: bool,
    pub disconnect: bool,
}

#[derive(Default)]
struct MockState {
    failures: Failures,
    /// Transport calls in order.
    calls: Vec<&'static str>,
    /// Captured writes with the (virtual) time they happened.
    writes: Vec<(Instant, Vec<u8>)>,
    notify_tx: Option<mpsc::Sender<Vec<u8>>>,
    lost_tx: Option<oneshot::Sender<()>>,
    /// Steps that wait for a release before completing.
    gates: HashMap<&'static str, Arc<Notify>>,
}

/// Mock transport for unit testing session logic. Clones share state, so a
/// test keeps one clone to drive and inspect the one given to the session.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: Failures) -> Self {
        let mock = Self::new();
        mock.state.lock().unwrap().failures = failures;
        mock
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .map(|(_, w)| w.clone())
            .collect()
    }

    pub fn write_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().writes.iter().map(|(t, _)| *t).collect()
    }

    /// Simulate a notification from the device.
    pub async fn notify(&self, value: &[u8]) {
        let tx = self.state.lock().unwrap().notify_tx.clone();
        tx.expect("not subscribed").send(value.to_vec()).await.unwrap();
    }

    /// Simulate the device dropping the link.
    pub fn drop_link(&self) {
        if let Some(tx) = self.state.lock().unwrap().lost_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Make `step` ("connect" or "discover") block until the returned gate is
    /// notified, so a test can act while the session is mid-connect.
    pub fn hold(&self, step: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().gates.insert(step, gate.clone());
        gate
    }

    async fn pass_gate(&self, step: &'static str) {
        let gate = self.state.lock().unwrap().gates.get(step).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    fn record(&self, call: &'static str) -> Failures {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state.failures
    }
}

#[async_trait]
impl GattTransport for MockTransport {
    type Link = ();
    type Service = ();
    type Characteristic = Uuid;

    fn describe(&self) -> String {
        "mock".into()
    }

    async fn connect_link(&self) -> Result<((), LinkLost), TransportError> {
        let failures = self.record("connect");
        self.pass_gate("connect").await;
        if failures.connect {
            return Err(TransportError::ConnectFailed("mock".into()));
        }
        let (tx, rx) = oneshot::channel();
        self.state.lock().unwrap().lost_tx = Some(tx);
        Ok(((), rx))
    }

    async fn discover_service(&self, _link: &(), service: Uuid) -> Result<(), TransportError> {
        let failures = self.record("discover");
        self.pass_gate("discover").await;
        if failures.service || service != SERVICE_UUID {
            return Err(TransportError::ServiceNotFound(service));
        }
        Ok(())
    }

    async fn characteristic(&self, _service: &(), id: Uuid) -> Result<Uuid, TransportError> {
        self.record("characteristic");
        if id == WRITE_UUID || id == NOTIFY_UUID {
            Ok(id)
        } else {
            Err(TransportError::CharacteristicNotFound(id))
        }
    }

    async fn write_without_response(&self, ch: &Uuid, data: &[u8]) -> Result<(), TransportError> {
        if self.record("write").write {
            return Err(TransportError::WriteFailed("mock".into()));
        }
        assert_eq!(*ch, WRITE_UUID);
        self.state
            .lock()
            .unwrap()
            .writes
            .push((Instant::now(), data.to_vec()));
        Ok(())
    }

    async fn subscribe(&self, ch: &Uuid) -> Result<Notifications, TransportError> {
        if self.record("subscribe").subscribe {
            return Err(TransportError::SubscribeFailed("mock".into()));
        }
        assert_eq!(*ch, NOTIFY_UUID);
        let (tx, rx) = mpsc::channel(16);
        self.state.lock().unwrap().notify_tx = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, _ch: &Uuid) -> Result<(), TransportError> {
        if self.record("unsubscribe").unsubscribe {
            return Err(TransportError::SubscribeFailed("mock unsubscribe".into()));
        }
        Ok(())
    }

    async fn disconnect_link(&self, _link: &()) -> Result<(), TransportError> {
        if self.record("disconnect").disconnect {
            return Err(TransportError::DisconnectFailed("mock".into()));
        }
        Ok(())
    }
}
