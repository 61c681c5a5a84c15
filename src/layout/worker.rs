//! Background thread running layout requests off the UI thread

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{LayoutEngine, LayoutError, LayoutRequest, LayoutResponse};

/// Owns one layout thread; requests queued while a layout runs are
/// coalesced so only the newest one is computed
pub struct LayoutWorker {
    requests: Option<Sender<LayoutRequest>>,
    responses: Receiver<LayoutResponse>,
    handle: Option<JoinHandle<()>>,
}

impl LayoutWorker {
    pub fn spawn(engine: Box<dyn LayoutEngine>) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<LayoutRequest>();
        let (response_tx, response_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("layout".to_string())
            .spawn(move || run(engine, request_rx, response_tx))
            .map_err(|err| log::error!("failed to spawn layout thread: {}", err))
            .ok();

        Self {
            requests: handle.as_ref().map(|_| request_tx),
            responses: response_rx,
            handle,
        }
    }

    pub fn submit(&self, request: LayoutRequest) -> Result<(), LayoutError> {
        let sender = self.requests.as_ref().ok_or(LayoutError::WorkerGone)?;
        sender.send(request).map_err(|_| LayoutError::WorkerGone)
    }

    /// Next finished response, if any
    pub fn try_recv(&self) -> Option<LayoutResponse> {
        self.responses.try_recv().ok()
    }

    /// Block up to `timeout` for the next response
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<LayoutResponse>, LayoutError> {
        match self.responses.recv_timeout(timeout) {
            Ok(response) => Ok(Some(response)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(LayoutError::WorkerGone),
        }
    }
}

impl Drop for LayoutWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the thread loop
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("layout thread panicked");
            }
        }
    }
}

fn run(engine: Box<dyn LayoutEngine>, requests: Receiver<LayoutRequest>, responses: Sender<LayoutResponse>) {
    log::debug!("layout worker started with engine '{}'", engine.name());

    while let Ok(mut request) = requests.recv() {
        // Last write wins
        while let Ok(newer) = requests.try_recv() {
            log::debug!("superseding layout generation {} with {}", request.generation, newer.generation);
            request = newer;
        }

        let result = engine.layout(&request.input);
        let response = LayoutResponse {
            generation: request.generation,
            result,
        };
        if responses.send(response).is_err() {
            break;
        }
    }

    log::debug!("layout worker stopped");
}
